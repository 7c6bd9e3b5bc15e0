//! Append-only identity registry: one JSON record per line, plus a snapshot image per enrollment.

use crate::types::{Embedding, IdentityRecord};
use chrono::{DateTime, Local};
use image::{ImageFormat, RgbImage};
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const REGISTRY_FILE: &str = "registry.jsonl";
pub const PHOTO_DIR: &str = "photos";

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to write snapshot {path}: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> RegistryError + '_ {
    move |source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Registry file and snapshot directory under one output directory.
#[derive(Debug, Clone)]
pub struct RegistryStore {
    registry_path: PathBuf,
    photo_dir: PathBuf,
}

impl RegistryStore {
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        let output_dir = output_dir.as_ref();
        Self {
            registry_path: output_dir.join(REGISTRY_FILE),
            photo_dir: output_dir.join(PHOTO_DIR),
        }
    }

    pub fn registry_path(&self) -> &Path {
        &self.registry_path
    }

    pub fn photo_dir(&self) -> &Path {
        &self.photo_dir
    }

    /// Read every enrolled identity, in file order.
    ///
    /// Returns index-aligned records and embeddings. A missing registry file is
    /// an empty registry. Blank, malformed or embedding-less lines are skipped.
    pub fn load(&self) -> Result<(Vec<IdentityRecord>, Vec<Embedding>), RegistryError> {
        let file = match fs::File::open(&self.registry_path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %self.registry_path.display(), "no registry yet, starting empty");
                return Ok((Vec::new(), Vec::new()));
            }
            Err(e) => return Err(io_error(&self.registry_path)(e)),
        };

        let records = parse_records(BufReader::new(file), &self.registry_path)?;
        let embeddings = records.iter().map(|r| r.embedding.clone()).collect();

        tracing::info!(
            path = %self.registry_path.display(),
            count = records.len(),
            "registry loaded"
        );
        Ok((records, embeddings))
    }

    /// Save a snapshot of `frame`, then append one record line to the registry.
    pub fn append(
        &self,
        name: &str,
        age: &str,
        mood: &str,
        embedding: &Embedding,
        frame: &RgbImage,
    ) -> Result<IdentityRecord, RegistryError> {
        let photo_path = self.write_snapshot(name, frame, Local::now())?;

        let record = IdentityRecord {
            name: name.to_string(),
            age: age.to_string(),
            mood: mood.to_string(),
            photo_path,
            embedding: embedding.clone(),
        };

        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        if let Some(parent) = self.registry_path.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.registry_path)
            .map_err(io_error(&self.registry_path))?;
        file.write_all(line.as_bytes())
            .and_then(|_| file.flush())
            .map_err(io_error(&self.registry_path))?;

        tracing::info!(
            name,
            photo = %record.photo_path.display(),
            dim = embedding.len(),
            "identity enrolled"
        );
        Ok(record)
    }

    fn write_snapshot(
        &self,
        name: &str,
        frame: &RgbImage,
        taken_at: DateTime<Local>,
    ) -> Result<PathBuf, RegistryError> {
        fs::create_dir_all(&self.photo_dir).map_err(io_error(&self.photo_dir))?;

        let stem = snapshot_stem(name, &taken_at);
        let mut path = self.photo_dir.join(format!("{stem}.jpg"));
        let mut n = 2;
        while path.exists() {
            path = self.photo_dir.join(format!("{stem}_{n}.jpg"));
            n += 1;
        }

        frame
            .save_with_format(&path, ImageFormat::Jpeg)
            .map_err(|source| RegistryError::Snapshot {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }
}

fn parse_records(reader: impl BufRead, path: &Path) -> Result<Vec<IdentityRecord>, RegistryError> {
    let mut records = Vec::new();
    for (lineno, bytes) in reader.split(b'\n').enumerate() {
        let bytes = bytes.map_err(io_error(path))?;
        let Ok(line) = std::str::from_utf8(&bytes) else {
            tracing::warn!(line = lineno + 1, "skipping registry line with invalid UTF-8");
            continue;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<IdentityRecord>(line) {
            Ok(record) if record.embedding.is_empty() => {
                tracing::warn!(line = lineno + 1, name = %record.name, "skipping registry record without embedding");
            }
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(line = lineno + 1, error = %e, "skipping malformed registry line");
            }
        }
    }
    Ok(records)
}

/// `<name>_<YYYYMMDD_HHMMSS>` with the name reduced to file-name-safe characters.
fn snapshot_stem(name: &str, taken_at: &DateTime<Local>) -> String {
    let safe: String = name
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    let safe = if safe.is_empty() { "unnamed".to_string() } else { safe };
    format!("{safe}_{}", taken_at.format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn frame() -> RgbImage {
        RgbImage::from_pixel(8, 8, image::Rgb([120, 90, 60]))
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::new(dir.path());
        let (records, embeddings) = store.load().unwrap();
        assert!(records.is_empty());
        assert!(embeddings.is_empty());
    }

    #[test]
    fn test_append_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::new(dir.path());
        let vector = Embedding::new(vec![0.125, -0.5, 0.333_333_34]);

        let record = store.append("Ana Lima", "31", "happy", &vector, &frame()).unwrap();
        assert!(record.photo_path.exists());
        assert!(record.photo_path.starts_with(store.photo_dir()));

        let (records, embeddings) = store.load().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(embeddings.len(), 1);
        assert_eq!(records[0], record);
        for (a, b) in embeddings[0].values.iter().zip(vector.values.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_load_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::new(dir.path());
        store.append("a", "1", "x", &Embedding::new(vec![1.0, 2.0]), &frame()).unwrap();
        store.append("b", "2", "y", &Embedding::new(vec![3.0, 4.0]), &frame()).unwrap();
        let first = store.load().unwrap();
        let second = store.load().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_load_skips_blank_and_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::new(dir.path());
        let text = concat!(
            r#"{"name":"first","age":"20","mood":"ok","photo_path":"f.jpg","embedding":[0.1,0.2]}"#, "\n",
            "\n",
            r#"{"name":"broken","age":"#, "\n",
            r#"{"name":"second","age":"40","mood":"tired","photo_path":"s.jpg","embedding":[0.3,0.4]}"#, "\n",
        );
        fs::write(store.registry_path(), text).unwrap();

        let (records, embeddings) = store.load().unwrap();
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(embeddings, vec![Embedding::new(vec![0.1, 0.2]), Embedding::new(vec![0.3, 0.4])]);
    }

    #[test]
    fn test_load_skips_invalid_utf8_line() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::new(dir.path());
        let mut bytes = Vec::new();
        bytes.extend_from_slice(
            br#"{"name":"first","age":"20","mood":"ok","photo_path":"f.jpg","embedding":[0.1,0.2]}"#,
        );
        bytes.push(b'\n');
        // Truncated in the middle of a two-byte character.
        bytes.extend_from_slice(b"{\"name\":\"Jos\xC3");
        bytes.push(b'\n');
        bytes.extend_from_slice(
            br#"{"name":"second","age":"40","mood":"tired","photo_path":"s.jpg","embedding":[0.3,0.4]}"#,
        );
        bytes.push(b'\n');
        fs::write(store.registry_path(), bytes).unwrap();

        let (records, embeddings) = store.load().unwrap();
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(embeddings.len(), 2);
    }

    #[test]
    fn test_append_never_rewrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::new(dir.path());
        store.append("a", "1", "x", &Embedding::new(vec![1.0]), &frame()).unwrap();
        let first = fs::read_to_string(store.registry_path()).unwrap();
        store.append("b", "2", "y", &Embedding::new(vec![2.0]), &frame()).unwrap();
        let second = fs::read_to_string(store.registry_path()).unwrap();
        assert!(second.starts_with(&first));
        assert_eq!(second.lines().count(), 2);
    }

    #[test]
    fn test_snapshot_names_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::new(dir.path());
        let when = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let a = store.write_snapshot("Bo", &frame(), when).unwrap();
        let b = store.write_snapshot("Bo", &frame(), when).unwrap();
        assert_eq!(a.file_name().unwrap(), "Bo_20240309_140507.jpg");
        assert_eq!(b.file_name().unwrap(), "Bo_20240309_140507_2.jpg");
    }

    #[test]
    fn test_snapshot_stem_sanitizes() {
        let when = Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(snapshot_stem("../Jo Ann", &when), "___Jo_Ann_20240102_030405");
        assert_eq!(snapshot_stem("  ", &when), "unnamed_20240102_030405");
    }

    #[test]
    fn test_parse_skips_records_without_embedding() {
        let text = concat!(
            r#"{"name":"a","age":"1","mood":"m","photo_path":"a.jpg","embedding":[]}"#, "\n",
            r#"{"name":"b","age":"2","mood":"m","photo_path":"b.jpg","embedding":[1.0]}"#, "\n",
        );
        let records = parse_records(text.as_bytes(), Path::new("mem")).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "b");
    }
}
