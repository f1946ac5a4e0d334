//! PDF Regression Snapshots
//!
//! Stores a rendered report baseline on disk for visual-regression checks:
//! the PDF bytes, the extracted text, and a metadata JSON sidecar
//! `{ name, captured_at, pdf_size, metadata }`. Comparison is byte-level for
//! the PDF and line-level for the text.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot '{0}' not found")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Metadata sidecar persisted next to the PDF baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub name: String,
    /// RFC 3339 capture timestamp.
    pub captured_at: String,
    pub pdf_size: u64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// A loaded baseline.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub meta: SnapshotMeta,
    pub pdf: Vec<u8>,
    pub text: String,
}

/// Differences between a baseline and a fresh render.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotDiff {
    pub pdf_changed: bool,
    pub text_changed: bool,
    pub size_delta: i64,
    /// Baseline text lines missing from the new render.
    pub missing_lines: Vec<String>,
}

impl SnapshotDiff {
    pub fn is_clean(&self) -> bool {
        !self.pdf_changed && !self.text_changed
    }
}

/// Directory-backed snapshot store: `{name}.pdf`, `{name}.txt`,
/// `{name}.json` per baseline.
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        SnapshotStore { dir: dir.into() }
    }

    fn paths(&self, name: &str) -> (PathBuf, PathBuf, PathBuf) {
        (
            self.dir.join(format!("{name}.pdf")),
            self.dir.join(format!("{name}.txt")),
            self.dir.join(format!("{name}.json")),
        )
    }

    /// Persist a baseline, overwriting any previous capture of `name`.
    pub fn save(
        &self,
        name: &str,
        pdf: &[u8],
        text: &str,
        metadata: HashMap<String, String>,
    ) -> Result<SnapshotMeta, SnapshotError> {
        std::fs::create_dir_all(&self.dir)?;
        let (pdf_path, text_path, meta_path) = self.paths(name);

        let meta = SnapshotMeta {
            name: name.to_string(),
            captured_at: Utc::now().to_rfc3339(),
            pdf_size: pdf.len() as u64,
            metadata,
        };

        std::fs::write(pdf_path, pdf)?;
        std::fs::write(text_path, text)?;
        std::fs::write(meta_path, serde_json::to_vec_pretty(&meta)?)?;
        Ok(meta)
    }

    pub fn load(&self, name: &str) -> Result<Snapshot, SnapshotError> {
        let (pdf_path, text_path, meta_path) = self.paths(name);
        if !meta_path.exists() {
            return Err(SnapshotError::NotFound(name.to_string()));
        }
        let meta: SnapshotMeta = serde_json::from_slice(&std::fs::read(meta_path)?)?;
        Ok(Snapshot {
            meta,
            pdf: std::fs::read(pdf_path)?,
            text: std::fs::read_to_string(text_path)?,
        })
    }

    pub fn exists(&self, name: &str) -> bool {
        self.paths(name).2.exists()
    }

    pub fn list(&self) -> Result<Vec<String>, SnapshotError> {
        let mut names = Vec::new();
        if !self.dir.exists() {
            return Ok(names);
        }
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn remove(&self, name: &str) -> Result<(), SnapshotError> {
        let (pdf_path, text_path, meta_path) = self.paths(name);
        if !meta_path.exists() {
            return Err(SnapshotError::NotFound(name.to_string()));
        }
        let _ = std::fs::remove_file(pdf_path);
        let _ = std::fs::remove_file(text_path);
        std::fs::remove_file(meta_path)?;
        Ok(())
    }

    /// Compare a fresh render against the stored baseline.
    pub fn compare(
        &self,
        name: &str,
        new_pdf: &[u8],
        new_text: &str,
    ) -> Result<SnapshotDiff, SnapshotError> {
        let baseline = self.load(name)?;
        let new_lines: std::collections::HashSet<&str> = new_text.lines().collect();
        let missing_lines = baseline
            .text
            .lines()
            .filter(|line| !line.trim().is_empty() && !new_lines.contains(line))
            .map(str::to_string)
            .collect();

        Ok(SnapshotDiff {
            pdf_changed: baseline.pdf != new_pdf,
            text_changed: baseline.text != new_text,
            size_delta: new_pdf.len() as i64 - baseline.pdf.len() as i64,
            missing_lines,
        })
    }
}
