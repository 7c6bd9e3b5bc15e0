//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes an RGB frame into the 640x640 model input, decodes the three
//! anchor-free stride levels and removes overlapping boxes with NMS.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} (download from insightface and place in the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Placement of the source frame inside the square model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: u32,
    pad_y: u32,
    width: u32,
    height: u32,
}

impl Letterbox {
    fn fit(src_width: u32, src_height: u32, target: u32) -> Self {
        let scale = (target as f32 / src_width as f32).min(target as f32 / src_height as f32);
        let width = ((src_width as f32 * scale).round() as u32).clamp(1, target);
        let height = ((src_height as f32 * scale).round() as u32).clamp(1, target);
        Self {
            scale,
            pad_x: (target - width) / 2,
            pad_y: (target - height) / 2,
            width,
            height,
        }
    }

    /// Map a point in model-input space back to the source frame.
    fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// Output tensor indices for one stride level: (scores, box deltas).
type LevelOutputs = (usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    levels: [LevelOutputs; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        if output_names.len() < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model needs score and bbox outputs for 3 strides, got {} outputs",
                output_names.len()
            )));
        }

        let levels = locate_outputs(&output_names);
        tracing::info!(path = %model_path.display(), outputs = ?output_names, ?levels, "loaded SCRFD model");

        Ok(Self { session, levels })
    }

    /// Detect faces in an RGB frame. Boxes are in frame coordinates, highest confidence first.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let letterbox = Letterbox::fit(image.width(), image.height(), SCRFD_INPUT_SIZE);
        let input = preprocess(image, &letterbox);
        let levels = self.levels;

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (&stride, &(score_idx, bbox_idx)) in SCRFD_STRIDES.iter().zip(levels.iter()) {
            let (_, scores) = outputs[score_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectorError::InferenceFailed(format!("scores stride {stride}: {e}"))
            })?;
            let (_, deltas) = outputs[bbox_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}"))
            })?;

            candidates.extend(decode_level(
                scores,
                deltas,
                stride,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        let faces = suppress(candidates, SCRFD_NMS_THRESHOLD);
        tracing::trace!(count = faces.len(), "SCRFD detections");
        Ok(faces)
    }
}

/// Resize into the letterbox and build a normalised NCHW tensor. Padding normalises to 0.0.
fn preprocess(image: &RgbImage, letterbox: &Letterbox) -> Array4<f32> {
    let size = SCRFD_INPUT_SIZE as usize;
    let resized = imageops::resize(image, letterbox.width, letterbox.height, FilterType::Triangle);

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let tx = (x + letterbox.pad_x) as usize;
        let ty = (y + letterbox.pad_y) as usize;
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }
    tensor
}

/// Map stride levels to output tensors.
///
/// Exports either name their tensors `score_8`, `bbox_8`, ... or use numeric
/// names in the standard order `[scores 8/16/32, bboxes 8/16/32, kps 8/16/32]`.
fn locate_outputs(names: &[String]) -> [LevelOutputs; 3] {
    let position = |prefix: &str, stride: usize| {
        let wanted = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == wanted)
    };

    let by_name: Option<Vec<LevelOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((position("score", stride)?, position("bbox", stride)?)))
        .collect();

    match by_name {
        Some(levels) => [levels[0], levels[1], levels[2]],
        None => [(0, 3), (1, 4), (2, 5)],
    }
}

/// Decode one stride level into candidate boxes in source-frame coordinates.
fn decode_level(
    scores: &[f32],
    deltas: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid = SCRFD_INPUT_SIZE as usize / stride;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    let mut boxes = Vec::new();
    for (idx, &score) in scores.iter().take(anchors).enumerate() {
        if score <= threshold {
            continue;
        }
        let Some(d) = deltas.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let cx = (cell % grid) as f32 * step;
        let cy = (cell / grid) as f32 * step;

        let (x1, y1) = letterbox.to_source(cx - d[0] * step, cy - d[1] * step);
        let (x2, y2) = letterbox.to_source(cx + d[2] * step, cy + d[3] * step);

        boxes.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
        });
    }
    boxes
}

/// Greedy non-maximum suppression. Output is sorted by descending confidence.
fn suppress(mut boxes: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        if kept.iter().all(|k| k.iou(&candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}
