//! Frame annotation: one box and a few text lines per detected face, coloured by match source.

use crate::types::{DetectedFace, MatchSource};
use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;
use thiserror::Error;

pub const REGISTRY_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const REFERENCE_COLOR: Rgb<u8> = Rgb([0, 255, 255]);
pub const UNKNOWN_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

const TITLE_SCALE: f32 = 20.0;
const DETAIL_SCALE: f32 = 16.0;

#[derive(Error, Debug)]
pub enum AnnotateError {
    #[error("failed to read font {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid font file {0}")]
    InvalidFont(String),
}

/// What to draw for one face.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub color: Rgb<u8>,
    /// Drawn above the box.
    pub title: String,
    /// Drawn below the box, one per line.
    pub details: Vec<String>,
}

pub fn source_color(source: MatchSource) -> Rgb<u8> {
    match source {
        MatchSource::Registry => REGISTRY_COLOR,
        MatchSource::Reference => REFERENCE_COLOR,
        MatchSource::None => UNKNOWN_COLOR,
    }
}

/// Build overlays for the faces of the latest processed cycle.
pub fn overlays(faces: &[DetectedFace]) -> Vec<Overlay> {
    faces
        .iter()
        .map(|face| {
            let (title, details) = match face.identification.profile() {
                Some(profile) => (
                    format!("Name: {}", profile.name),
                    vec![format!("Age: {}", profile.age), format!("Mood: {}", profile.mood)],
                ),
                None => ("Unknown".to_string(), Vec::new()),
            };
            Overlay {
                x: face.bbox.x.round() as i32,
                y: face.bbox.y.round() as i32,
                width: face.bbox.width.round().max(1.0) as u32,
                height: face.bbox.height.round().max(1.0) as u32,
                color: source_color(face.identification.source()),
                title,
                details,
            }
        })
        .collect()
}

/// Rasterises overlays onto frames. Without a font only the boxes are drawn.
#[derive(Default)]
pub struct Annotator {
    font: Option<FontVec>,
}

impl Annotator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_font(path: &Path) -> Result<Self, AnnotateError> {
        let bytes = std::fs::read(path).map_err(|source| AnnotateError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|_| AnnotateError::InvalidFont(path.display().to_string()))?;
        Ok(Self { font: Some(font) })
    }

    pub fn draw(&self, image: &mut RgbImage, overlays: &[Overlay]) {
        for overlay in overlays {
            let outer = Rect::at(overlay.x, overlay.y).of_size(overlay.width, overlay.height);
            draw_hollow_rect_mut(image, outer, overlay.color);
            if overlay.width > 2 && overlay.height > 2 {
                let inner = Rect::at(overlay.x + 1, overlay.y + 1)
                    .of_size(overlay.width - 2, overlay.height - 2);
                draw_hollow_rect_mut(image, inner, overlay.color);
            }

            let Some(font) = &self.font else {
                continue;
            };
            let title_y = overlay.y - TITLE_SCALE as i32 - 4;
            draw_text_mut(image, overlay.color, overlay.x, title_y, PxScale::from(TITLE_SCALE), font, &overlay.title);

            let bottom = overlay.y + overlay.height as i32;
            for (i, line) in overlay.details.iter().enumerate() {
                let line_y = bottom + 4 + i as i32 * (DETAIL_SCALE as i32 + 4);
                draw_text_mut(image, overlay.color, overlay.x, line_y, PxScale::from(DETAIL_SCALE), font, line);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, Embedding, Identification, Profile};

    fn face(identification: Identification) -> DetectedFace {
        DetectedFace {
            bbox: BoundingBox { x: 10.0, y: 12.0, width: 20.0, height: 30.0, confidence: 0.9 },
            embedding: Embedding::new(vec![0.0]),
            identification,
        }
    }

    fn profile() -> Profile {
        Profile { name: "Ana".into(), age: "30".into(), mood: "calm".into() }
    }

    #[test]
    fn test_overlay_colors_by_source() {
        let faces = vec![
            face(Identification::Registry { index: 0, profile: profile() }),
            face(Identification::Reference(profile())),
            face(Identification::Unknown),
        ];
        let colors: Vec<_> = overlays(&faces).iter().map(|o| o.color).collect();
        assert_eq!(colors, vec![REGISTRY_COLOR, REFERENCE_COLOR, UNKNOWN_COLOR]);
    }

    #[test]
    fn test_overlay_text() {
        let known = &overlays(&[face(Identification::Registry { index: 0, profile: profile() })])[0];
        assert_eq!(known.title, "Name: Ana");
        assert_eq!(known.details, vec!["Age: 30".to_string(), "Mood: calm".to_string()]);
        assert_eq!((known.x, known.y, known.width, known.height), (10, 12, 20, 30));

        let unknown = &overlays(&[face(Identification::Unknown)])[0];
        assert_eq!(unknown.title, "Unknown");
        assert!(unknown.details.is_empty());
    }

    #[test]
    fn test_draw_box_without_font() {
        let mut image = RgbImage::new(64, 64);
        let overlay = &overlays(&[face(Identification::Unknown)])[0];
        Annotator::new().draw(&mut image, std::slice::from_ref(overlay));
        assert_eq!(*image.get_pixel(10, 12), UNKNOWN_COLOR);
        assert_eq!(*image.get_pixel(11, 13), UNKNOWN_COLOR);
        assert_eq!(*image.get_pixel(20, 25), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_missing_font_is_error() {
        assert!(Annotator::with_font(Path::new("/nonexistent/font.ttf")).is_err());
    }
}
