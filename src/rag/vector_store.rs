//! Flat vector index persisted as a directory of JSON files.
//!
//! The directory holds `manifest.json` and `index.json`. An index counts as
//! present once its manifest exists; an empty directory is only a
//! placeholder.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const ENTRIES_FILE: &str = "index.json";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub format_version: u32,
    pub build_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub embedding_model: String,
    /// Zero for an empty index.
    pub dimensions: usize,
    pub entries: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// `{source_id}_{chunk_index}`.
    pub id: String,
    pub text: String,
    pub source: String,
    pub chunk_index: usize,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit<'a> {
    pub entry: &'a IndexEntry,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    manifest: IndexManifest,
    entries: Vec<IndexEntry>,
}

pub fn index_exists(dir: &Path) -> bool {
    dir.join(MANIFEST_FILE).is_file()
}

impl VectorIndex {
    pub fn new(embedding_model: &str) -> Self {
        Self {
            manifest: IndexManifest {
                format_version: FORMAT_VERSION,
                build_id: Uuid::new_v4(),
                created_at: Utc::now(),
                embedding_model: embedding_model.to_string(),
                dimensions: 0,
                entries: 0,
            },
            entries: Vec::new(),
        }
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn add(&mut self, entry: IndexEntry) -> AppResult<()> {
        if entry.vector.is_empty() {
            return Err(AppError::Embedding(format!(
                "empty embedding for chunk {} of {}",
                entry.chunk_index, entry.source
            )));
        }
        if self.entries.is_empty() {
            self.manifest.dimensions = entry.vector.len();
        } else if entry.vector.len() != self.manifest.dimensions {
            return Err(AppError::Embedding(format!(
                "embedding dimension {} does not match index dimension {}",
                entry.vector.len(),
                self.manifest.dimensions
            )));
        }
        self.entries.push(entry);
        self.manifest.entries = self.entries.len();
        Ok(())
    }

    /// Top-`k` entries by cosine similarity, best first. Ties keep
    /// insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> AppResult<Vec<SearchHit<'_>>> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.manifest.dimensions {
            return Err(AppError::Embedding(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.manifest.dimensions
            )));
        }

        let query_norm = norm(query);
        let mut hits: Vec<SearchHit<'_>> = self
            .entries
            .iter()
            .map(|entry| SearchHit {
                entry,
                score: cosine_similarity(query, query_norm, &entry.vector),
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        Ok(hits)
    }

    pub async fn save(&self, dir: &Path) -> AppResult<()> {
        tokio::fs::create_dir_all(dir).await?;
        let entries = serde_json::to_vec(&self.entries)?;
        tokio::fs::write(dir.join(ENTRIES_FILE), entries).await?;
        // Manifest last: its presence marks the directory as a complete index.
        let manifest = serde_json::to_vec_pretty(&self.manifest)?;
        tokio::fs::write(dir.join(MANIFEST_FILE), manifest).await?;
        Ok(())
    }

    pub async fn load(dir: &Path) -> AppResult<Self> {
        let manifest_path = dir.join(MANIFEST_FILE);
        let raw_manifest = match tokio::fs::read(&manifest_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::NoIndexAvailable(dir.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let manifest: IndexManifest = serde_json::from_slice(&raw_manifest)
            .map_err(|e| AppError::CorruptIndex(format!("{}: {}", MANIFEST_FILE, e)))?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(AppError::CorruptIndex(format!(
                "unsupported format version {}",
                manifest.format_version
            )));
        }

        let raw_entries = tokio::fs::read(dir.join(ENTRIES_FILE))
            .await
            .map_err(|e| AppError::CorruptIndex(format!("{}: {}", ENTRIES_FILE, e)))?;
        let entries: Vec<IndexEntry> = serde_json::from_slice(&raw_entries)
            .map_err(|e| AppError::CorruptIndex(format!("{}: {}", ENTRIES_FILE, e)))?;

        if entries.len() != manifest.entries {
            return Err(AppError::CorruptIndex(format!(
                "manifest lists {} entries, found {}",
                manifest.entries,
                entries.len()
            )));
        }
        if let Some(bad) = entries.iter().find(|e| e.vector.len() != manifest.dimensions) {
            return Err(AppError::CorruptIndex(format!(
                "entry {}#{} has dimension {}, expected {}",
                bad.source,
                bad.chunk_index,
                bad.vector.len(),
                manifest.dimensions
            )));
        }

        Ok(Self { manifest, entries })
    }
}

fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn cosine_similarity(query: &[f32], query_norm: f32, other: &[f32]) -> f32 {
    let denom = query_norm * norm(other);
    if denom == 0.0 {
        return 0.0;
    }
    let dot: f32 = query.iter().zip(other).map(|(a, b)| a * b).sum();
    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(text: &str, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            id: format!("test_{}", text),
            text: text.to_string(),
            source: "test.txt".to_string(),
            chunk_index: 0,
            vector,
        }
    }

    #[test]
    fn test_search_ranks_most_similar_first() {
        let mut index = VectorIndex::new("test");
        index.add(entry("east", vec![1.0, 0.0])).unwrap();
        index.add(entry("north", vec![0.0, 1.0])).unwrap();
        index.add(entry("north-east", vec![0.7, 0.7])).unwrap();

        let hits = index.search(&[0.1, 1.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].entry.text, "north");
        assert_eq!(hits[1].entry.text, "north-east");
    }

    #[test]
    fn test_search_k_larger_than_index() {
        let mut index = VectorIndex::new("test");
        index.add(entry("only", vec![1.0, 0.0])).unwrap();
        assert_eq!(index.search(&[1.0, 0.0], 20).unwrap().len(), 1);
    }

    #[test]
    fn test_search_empty_index() {
        let index = VectorIndex::new("test");
        assert!(index.search(&[1.0, 2.0, 3.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut index = VectorIndex::new("test");
        index.add(entry("a", vec![1.0, 0.0])).unwrap();
        assert!(index.add(entry("b", vec![1.0, 0.0, 0.0])).is_err());
        assert!(index.search(&[1.0], 1).is_err());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");

        let mut index = VectorIndex::new("test-model");
        index.add(entry("alpha", vec![0.5, 0.5])).unwrap();
        index.save(&path).await.unwrap();

        assert!(index_exists(&path));
        let loaded = VectorIndex::load(&path).await.unwrap();
        assert_eq!(loaded.manifest(), index.manifest());
        assert_eq!(loaded.entries(), index.entries());
    }

    #[tokio::test]
    async fn test_load_missing_is_no_index() {
        let dir = tempfile::tempdir().unwrap();
        let err = VectorIndex::load(dir.path()).await.unwrap_err();
        assert!(matches!(err, AppError::NoIndexAvailable(_)));
    }

    #[tokio::test]
    async fn test_load_corrupt_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = VectorIndex::new("test");
        index.add(entry("alpha", vec![1.0])).unwrap();
        index.save(dir.path()).await.unwrap();
        std::fs::write(dir.path().join(ENTRIES_FILE), b"not json").unwrap();

        let err = VectorIndex::load(dir.path()).await.unwrap_err();
        assert!(matches!(err, AppError::CorruptIndex(_)));
    }

    #[tokio::test]
    async fn test_load_rejects_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = VectorIndex::new("test");
        index.add(entry("alpha", vec![1.0])).unwrap();
        index.save(dir.path()).await.unwrap();
        std::fs::write(dir.path().join(ENTRIES_FILE), b"[]").unwrap();

        let err = VectorIndex::load(dir.path()).await.unwrap_err();
        assert!(matches!(err, AppError::CorruptIndex(_)));
    }
}
