//! Vision capabilities: detect-and-embed, and within-tolerance comparison.
//!
//! The identification loop only talks to these traits. [`OnnxAnalyzer`] is the
//! production backend; tests substitute scripted fakes.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{Embedding, FaceObservation};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("failed to read image {path}: {source}")]
    Image {
        path: String,
        #[source]
        source: image::ImageError,
    },
}

/// Finds faces in an image and computes one embedding per face.
pub trait FaceAnalyzer {
    fn detect_and_embed(&mut self, image: &RgbImage) -> Result<Vec<FaceObservation>, VisionError>;
}

/// Decides, per known embedding, whether `probe` is within `tolerance` of it.
pub trait FaceComparator {
    fn compare_faces(&self, known: &[Embedding], probe: &Embedding, tolerance: f32) -> Vec<bool>;
}

/// Cosine distance comparator: a candidate matches when `1 - cos` is strictly below the tolerance.
///
/// Suited to L2-normalised ArcFace embeddings; a tolerance of 0.5 accepts cosine similarity above 0.5.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineComparator;

impl FaceComparator for CosineComparator {
    fn compare_faces(&self, known: &[Embedding], probe: &Embedding, tolerance: f32) -> Vec<bool> {
        known
            .iter()
            .map(|candidate| candidate.cosine_distance(probe) < tolerance)
            .collect()
    }
}

/// Euclidean distance comparator: a candidate matches when its distance is strictly below the tolerance.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanComparator;

impl FaceComparator for EuclideanComparator {
    fn compare_faces(&self, known: &[Embedding], probe: &Embedding, tolerance: f32) -> Vec<bool> {
        known
            .iter()
            .map(|candidate| candidate.euclidean_distance(probe) < tolerance)
            .collect()
    }
}

/// SCRFD detection followed by ArcFace embedding of every detected face.
pub struct OnnxAnalyzer {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxAnalyzer {
    pub fn load(detector_path: &Path, recognizer_path: &Path) -> Result<Self, VisionError> {
        Ok(Self {
            detector: FaceDetector::load(detector_path)?,
            recognizer: FaceRecognizer::load(recognizer_path)?,
        })
    }
}

impl FaceAnalyzer for OnnxAnalyzer {
    fn detect_and_embed(&mut self, image: &RgbImage) -> Result<Vec<FaceObservation>, VisionError> {
        let boxes = self.detector.detect(image)?;
        let mut faces = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            match self.recognizer.extract(image, &bbox) {
                Ok(embedding) => faces.push(FaceObservation { bbox, embedding }),
                Err(RecognizerError::EmptyCrop) => {
                    tracing::debug!(?bbox, "skipping face outside the frame");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(faces)
    }
}

/// Open an image file and return the embedding of the first face found in it.
///
/// `Ok(None)` when the image holds no detectable face.
pub fn embed_image_file(
    analyzer: &mut dyn FaceAnalyzer,
    path: &Path,
) -> Result<Option<Embedding>, VisionError> {
    let image = image::open(path)
        .map_err(|source| VisionError::Image {
            path: path.display().to_string(),
            source,
        })?
        .to_rgb8();
    let faces = analyzer.detect_and_embed(&image)?;
    Ok(faces.into_iter().next().map(|face| face.embedding))
}
