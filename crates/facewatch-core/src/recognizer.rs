//! ArcFace face embedder via ONNX Runtime.
//!
//! Crops a square region around each detected face, resizes it to the
//! 112x112 model input and returns an L2-normalised 512-dimensional embedding.

use crate::types::{BoundingBox, Embedding};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // not 128.0, ArcFace normalises symmetrically
const ARCFACE_EMBEDDING_DIM: usize = 512;
/// Extra context around the detector box, as a fraction of the longer side.
const CROP_MARGIN: f32 = 0.1;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0} (download from insightface and place in the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face box lies outside the frame")]
    EmptyCrop,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based face embedder.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = %model_path.display(), "loaded ArcFace model");

        Ok(Self { session })
    }

    /// Extract the embedding of `face` from an RGB frame.
    pub fn extract(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Embedding, RecognizerError> {
        let crop = crop_face(image, face).ok_or(RecognizerError::EmptyCrop)?;
        let input = preprocess(&crop);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding::new(l2_normalize(raw.to_vec())))
    }
}

/// Square crop centred on the face box, clipped to the frame, resized to the model input.
fn crop_face(image: &RgbImage, face: &BoundingBox) -> Option<RgbImage> {
    let side = face.width.max(face.height) * (1.0 + 2.0 * CROP_MARGIN);
    let square = BoundingBox {
        x: face.x + face.width / 2.0 - side / 2.0,
        y: face.y + face.height / 2.0 - side / 2.0,
        width: side,
        height: side,
        confidence: face.confidence,
    };
    let (x, y, w, h) = square.pixel_rect(image.width(), image.height())?;
    let region = imageops::crop_imm(image, x, y, w, h).to_image();
    Some(imageops::resize(
        &region,
        ARCFACE_INPUT_SIZE,
        ARCFACE_INPUT_SIZE,
        FilterType::Triangle,
    ))
}

fn preprocess(face: &RgbImage) -> Array4<f32> {
    let size = ARCFACE_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in face.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }
    tensor
}

fn l2_normalize(raw: Vec<f32>) -> Vec<f32> {
    let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.into_iter().map(|x| x / norm).collect()
    } else {
        raw
    }
}
