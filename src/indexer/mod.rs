//! Document ingestion: loading source files and splitting them into chunks.

pub mod chunker;
pub mod extractor;
pub mod walker;

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::{panic_message, AppError, AppResult};
use self::extractor::extract_text;
use self::walker::{walk_directory, SupportedFormat};

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Human-readable origin, e.g. a path relative to the source directory.
    pub source: String,
    pub text: String,
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub documents: Vec<Document>,
    pub failed: Vec<String>,
}

/// Where ingestion gets its documents from.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    async fn load(&self) -> AppResult<LoadReport>;
}

/// Stable short id for a source path.
pub fn source_id(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    hex::encode(&digest[..8])
}

/// Loads every supported file under a directory.
#[derive(Debug, Clone)]
pub struct DirectoryLoader {
    root: PathBuf,
}

impl DirectoryLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Extract every supported file with `extract`. A file whose extractor
    /// fails or panics is reported in `failed` and the walk continues.
    fn load_blocking<F>(root: &Path, extract: F) -> LoadReport
    where
        F: Fn(&Path, SupportedFormat) -> AppResult<String>,
    {
        let mut report = LoadReport::default();

        if !root.is_dir() {
            tracing::warn!("Document directory {} does not exist", root.display());
            return report;
        }

        for (path, format) in walk_directory(root) {
            let source = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .to_string();

            let extracted = std::panic::catch_unwind(AssertUnwindSafe(|| extract(&path, format)))
                .unwrap_or_else(|payload| {
                    Err(AppError::Extraction(format!(
                        "extractor panicked: {}",
                        panic_message(payload.as_ref())
                    )))
                });

            match extracted {
                Ok(text) if text.trim().is_empty() => {
                    tracing::debug!("Skipping empty document {}", source);
                }
                Ok(text) => report.documents.push(Document { source, text }),
                Err(e) => {
                    tracing::warn!("Failed to extract {}: {}", path.display(), e);
                    report.failed.push(source);
                }
            }
        }

        report
    }
}

#[async_trait]
impl DocumentLoader for DirectoryLoader {
    async fn load(&self) -> AppResult<LoadReport> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || Self::load_blocking(&root, extract_text))
            .await
            .map_err(|e| AppError::Task(format!("document loader: {}", e)))
    }
}

/// Loader over documents already held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticLoader {
    documents: Vec<Document>,
}

impl StaticLoader {
    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents }
    }
}

#[async_trait]
impl DocumentLoader for StaticLoader {
    async fn load(&self) -> AppResult<LoadReport> {
        Ok(LoadReport {
            documents: self.documents.clone(),
            failed: Vec::new(),
        })
    }
}
