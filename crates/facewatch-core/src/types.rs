use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

/// Bounding box for a detected face, in pixel coordinates of the image it was found in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    /// Multiply every coordinate by `factor`.
    ///
    /// Used to map boxes found on a downscaled frame back onto the full-resolution frame.
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
            confidence: self.confidence,
        }
    }

    /// Clip the box to an image of the given size and round to whole pixels.
    ///
    /// Returns `(x, y, width, height)`, or `None` if nothing of the box lies inside the image.
    pub fn pixel_rect(&self, image_width: u32, image_height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.max(0.0).round() as u32;
        let y0 = self.y.max(0.0).round() as u32;
        let x1 = ((self.x + self.width).round().max(0.0) as u32).min(image_width);
        let y1 = ((self.y + self.height).round().max(0.0) as u32).min(image_height);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0, y0, x1 - x0, y1 - y0))
    }

    /// Intersection-over-Union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.width * self.height + other.width * other.height - inter;

        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// Face embedding vector. Dimensionality is fixed by the embedding model.
///
/// Serialized as a bare JSON array of numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean distance between two embeddings.
    ///
    /// Embeddings of different length are never close: the distance is infinite.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Cosine similarity in [-1, 1]. Zero or mismatched vectors score 0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return 0.0;
        }
        let dot: f32 = self.values.iter().zip(&other.values).map(|(a, b)| a * b).sum();
        let norm_a = self.values.iter().map(|v| v * v).sum::<f32>().sqrt();
        let norm_b = other.values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }
        dot / (norm_a * norm_b)
    }

    /// `1 - cosine similarity`, in [0, 2]. Infinite when the vectors cannot be compared.
    pub fn cosine_distance(&self, other: &Embedding) -> f32 {
        let comparable = self.values.len() == other.values.len()
            && self.values.iter().any(|v| *v != 0.0)
            && other.values.iter().any(|v| *v != 0.0);
        if !comparable {
            return f32::INFINITY;
        }
        1.0 - self.similarity(other)
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

/// Descriptive fields shown next to a recognised face.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
    pub age: String,
    pub mood: String,
}

/// One enrolled identity, as stored on one line of the registry file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub name: String,
    /// Free-form, voice transcribed. Older files may hold a plain number.
    #[serde(deserialize_with = "string_or_number")]
    pub age: String,
    pub mood: String,
    pub photo_path: PathBuf,
    pub embedding: Embedding,
}

impl IdentityRecord {
    pub fn profile(&self) -> Profile {
        Profile {
            name: self.name.clone(),
            age: self.age.clone(),
            mood: self.mood.clone(),
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    })
}

/// Hard-coded identity derived from a single reference image at startup. Never persisted.
#[derive(Debug, Clone)]
pub struct ReferenceIdentity {
    pub profile: Profile,
    pub embedding: Embedding,
}

/// A face found by the detector together with its embedding, before identification.
#[derive(Debug, Clone)]
pub struct FaceObservation {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// Where an identification came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSource {
    Registry,
    Reference,
    None,
}

/// Outcome of identifying one face.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identification {
    /// Matched the registry record at `index` (enrollment order).
    Registry { index: usize, profile: Profile },
    Reference(Profile),
    Unknown,
}

impl Identification {
    pub fn source(&self) -> MatchSource {
        match self {
            Identification::Registry { .. } => MatchSource::Registry,
            Identification::Reference(_) => MatchSource::Reference,
            Identification::Unknown => MatchSource::None,
        }
    }

    pub fn profile(&self) -> Option<&Profile> {
        match self {
            Identification::Registry { profile, .. } | Identification::Reference(profile) => {
                Some(profile)
            }
            Identification::Unknown => None,
        }
    }
}

/// A face of the latest processed frame, in full-frame coordinates.
///
/// Reused unchanged for the frames between two processing cycles and replaced
/// wholesale on the next one; there is no tracking across cycles.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
    pub identification: Identification,
}
