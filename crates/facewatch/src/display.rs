//! Display surface for annotated frames.

use facewatch_core::{Annotator, Overlay};
use image::{ImageFormat, RgbImage};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("failed to encode frame: {0}")]
    Encode(#[from] image::ImageError),
    #[error("display I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Receives every captured frame together with the overlays of the latest processed cycle.
pub trait Display {
    fn show(&mut self, frame: &RgbImage, overlays: &[Overlay]) -> Result<(), DisplayError>;
}

/// Tracks the set of overlay titles and reports when it changes.
#[derive(Default)]
struct LabelLog {
    last: Vec<String>,
}

impl LabelLog {
    fn update(&mut self, overlays: &[Overlay]) {
        let titles: Vec<String> = overlays.iter().map(|o| o.title.clone()).collect();
        if titles != self.last {
            tracing::info!(faces = titles.len(), labels = ?titles, "overlay changed");
            self.last = titles;
        }
    }
}

/// Writes the annotated frame to an image file, replacing it atomically.
pub struct SnapshotDisplay {
    path: PathBuf,
    tmp_path: PathBuf,
    format: ImageFormat,
    annotator: Annotator,
    labels: LabelLog,
}

impl SnapshotDisplay {
    pub fn new(path: &Path, annotator: Annotator) -> Result<Self, DisplayError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| DisplayError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let format = ImageFormat::from_path(path).unwrap_or(ImageFormat::Jpeg);
        let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        tmp_name.push(".tmp");

        tracing::info!(path = %path.display(), ?format, "display surface ready");
        Ok(Self {
            path: path.to_path_buf(),
            tmp_path: path.with_file_name(tmp_name),
            format,
            annotator,
            labels: LabelLog::default(),
        })
    }
}

impl Display for SnapshotDisplay {
    fn show(&mut self, frame: &RgbImage, overlays: &[Overlay]) -> Result<(), DisplayError> {
        let mut canvas = frame.clone();
        self.annotator.draw(&mut canvas, overlays);
        canvas.save_with_format(&self.tmp_path, self.format)?;
        std::fs::rename(&self.tmp_path, &self.path).map_err(|source| DisplayError::Io {
            path: self.path.clone(),
            source,
        })?;
        self.labels.update(overlays);
        Ok(())
    }
}

/// No surface: only overlay changes are logged.
#[derive(Default)]
pub struct HeadlessDisplay {
    labels: LabelLog,
}

impl Display for HeadlessDisplay {
    fn show(&mut self, _frame: &RgbImage, overlays: &[Overlay]) -> Result<(), DisplayError> {
        self.labels.update(overlays);
        Ok(())
    }
}
