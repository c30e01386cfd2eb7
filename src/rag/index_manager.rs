use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::{panic_message, AppError, AppResult};
use crate::indexer::chunker::TextSplitter;
use crate::indexer::{source_id, DocumentLoader};
use super::embeddings::EmbeddingProvider;
use super::vector_store::{index_exists, IndexEntry, VectorIndex};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStatus {
    pub present: bool,
    pub is_indexing: bool,
    pub last_indexed_at: Option<DateTime<Utc>>,
    pub total_documents: usize,
    pub total_chunks: usize,
    pub failed_documents: Vec<String>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexReport {
    pub documents: usize,
    pub chunks: usize,
    pub failed_documents: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NothingToDelete,
}

/// Clears the indexing flag when a rebuild ends, is dropped mid-flight, or
/// unwinds.
struct IndexingFlag<'a>(&'a AtomicBool);

impl<'a> IndexingFlag<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for IndexingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Staging directory that is removed on drop unless it was moved into place.
struct StagingDir {
    path: PathBuf,
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                tracing::warn!("Failed to remove staging index {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Owns the on-disk index directory.
///
/// Readers load under a shared lock; rebuilds stage a complete index beside
/// the live one and swap it in under the exclusive lock, so a reader sees
/// either the old index or the new one.
pub struct IndexManager {
    dir: PathBuf,
    dir_lock: RwLock<()>,
    indexing: AtomicBool,
    status: Mutex<IndexStatus>,
    embeddings: Arc<dyn EmbeddingProvider>,
    loader: Arc<dyn DocumentLoader>,
    splitter: Arc<dyn TextSplitter>,
    batch_size: usize,
}

impl IndexManager {
    pub fn new(
        dir: PathBuf,
        embeddings: Arc<dyn EmbeddingProvider>,
        loader: Arc<dyn DocumentLoader>,
        splitter: Arc<dyn TextSplitter>,
        batch_size: usize,
    ) -> Self {
        Self {
            dir,
            dir_lock: RwLock::new(()),
            indexing: AtomicBool::new(false),
            status: Mutex::new(IndexStatus::default()),
            embeddings,
            loader,
            splitter,
            batch_size: batch_size.max(1),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the index directory placeholder if missing.
    pub async fn ensure_dir(&self) -> AppResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    pub async fn has_index(&self) -> bool {
        let _read = self.dir_lock.read().await;
        index_exists(&self.dir)
    }

    pub async fn status(&self) -> IndexStatus {
        let mut status = self.status.lock().await.clone();
        status.is_indexing = self.indexing.load(Ordering::Acquire);
        status.present = self.has_index().await;
        status
    }

    pub async fn load(&self) -> AppResult<VectorIndex> {
        let _read = self.dir_lock.read().await;
        VectorIndex::load(&self.dir).await
    }

    pub async fn delete(&self) -> AppResult<DeleteOutcome> {
        let _write = self.dir_lock.write().await;

        if !index_exists(&self.dir) {
            tokio::fs::create_dir_all(&self.dir).await?;
            return Ok(DeleteOutcome::NothingToDelete);
        }

        tokio::fs::remove_dir_all(&self.dir).await?;
        tokio::fs::create_dir_all(&self.dir).await?;
        tracing::info!("Vectorstore deleted: {}", self.dir.display());
        Ok(DeleteOutcome::Deleted)
    }

    /// Rebuild the whole index from the configured document loader.
    ///
    /// Dropping the returned future leaves the live index untouched and
    /// allows the next rebuild to start.
    pub async fn rebuild(&self) -> AppResult<IndexReport> {
        let Some(_flag) = IndexingFlag::acquire(&self.indexing) else {
            return Err(AppError::IndexingInProgress);
        };
        self.status.lock().await.last_error = None;

        let result = match AssertUnwindSafe(self.do_rebuild()).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(AppError::Task(format!(
                "indexing panicked: {}",
                panic_message(payload.as_ref())
            ))),
        };

        let mut status = self.status.lock().await;
        match &result {
            Ok(report) => {
                status.last_indexed_at = Some(Utc::now());
                status.total_documents = report.documents;
                status.total_chunks = report.chunks;
                status.failed_documents = report.failed_documents.clone();
            }
            Err(e) => {
                tracing::error!("Indexing failed: {}", e);
                status.last_error = Some(e.to_string());
            }
        }
        result
    }

    async fn do_rebuild(&self) -> AppResult<IndexReport> {
        let loaded = self.loader.load().await?;
        tracing::info!(
            "Indexing {} documents ({} failed to load)",
            loaded.documents.len(),
            loaded.failed.len()
        );
        if loaded.documents.is_empty() {
            tracing::warn!("No documents to index; writing an empty vectorstore");
        }

        let mut pending: Vec<(String, usize, String)> = Vec::new();
        for doc in &loaded.documents {
            for chunk in self.splitter.split(&doc.text) {
                pending.push((doc.source.clone(), chunk.chunk_index, chunk.text));
            }
        }

        let mut index = VectorIndex::new(self.embeddings.model_name());
        for batch in pending.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|(_, _, text)| text.clone()).collect();
            let vectors = self.embeddings.embed_batch(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(AppError::Embedding(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    vectors.len()
                )));
            }

            for ((source, chunk_index, text), vector) in batch.iter().zip(vectors) {
                index.add(IndexEntry {
                    id: format!("{}_{}", source_id(source), chunk_index),
                    text: text.clone(),
                    source: source.clone(),
                    chunk_index: *chunk_index,
                    vector,
                })?;
            }
        }

        self.replace(&index).await?;

        tracing::info!(
            "Indexing complete: {} documents, {} chunks",
            loaded.documents.len(),
            index.len()
        );
        Ok(IndexReport {
            documents: loaded.documents.len(),
            chunks: index.len(),
            failed_documents: loaded.failed,
        })
    }

    /// Write `index` to a staging directory, then swap it into place.
    async fn replace(&self, index: &VectorIndex) -> AppResult<()> {
        let token = Uuid::new_v4().simple().to_string();
        let staging = StagingDir {
            path: self.sibling("staging", &token),
        };
        let retired = self.sibling("retired", &token);

        index.save(&staging.path).await?;

        // No await between the renames: the swap runs to completion once
        // the write lock is held.
        let _write = self.dir_lock.write().await;
        let had_live = self.dir.exists();
        if had_live {
            std::fs::rename(&self.dir, &retired)?;
        }
        if let Err(e) = std::fs::rename(&staging.path, &self.dir) {
            if had_live {
                if let Err(restore) = std::fs::rename(&retired, &self.dir) {
                    tracing::error!("Failed to restore previous index: {}", restore);
                }
            }
            return Err(e.into());
        }
        if had_live {
            if let Err(e) = std::fs::remove_dir_all(&retired) {
                tracing::warn!("Failed to remove retired index {}: {}", retired.display(), e);
            }
        }
        Ok(())
    }

    fn sibling(&self, kind: &str, token: &str) -> PathBuf {
        let name = self
            .dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "vectorstore".to_string());
        self.dir.with_file_name(format!(".{}.{}-{}", name, kind, token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::indexer::chunker::RecursiveSplitter;
    use crate::indexer::{Document, StaticLoader};
    use crate::rag::embeddings::HashingEmbeddings;
    use crate::rag::vector_store::ENTRIES_FILE;

    fn manager(dir: PathBuf, docs: Vec<Document>) -> IndexManager {
        IndexManager::new(
            dir,
            Arc::new(HashingEmbeddings::new(64)),
            Arc::new(StaticLoader::new(docs)),
            Arc::new(RecursiveSplitter::new(200, 20).unwrap()),
            2,
        )
    }

    fn doc(source: &str, text: &str) -> Document {
        Document {
            source: source.to_string(),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_rebuild_then_load() {
        let root = tempfile::tempdir().unwrap();
        let mgr = manager(
            root.path().join("vectorstore"),
            vec![
                doc("a.txt", "Rust guarantees memory safety."),
                doc("b.txt", "Tokio is an async runtime."),
                doc("c.txt", "Axum is a web framework."),
            ],
        );
        mgr.ensure_dir().await.unwrap();
        assert!(!mgr.has_index().await);

        let report = mgr.rebuild().await.unwrap();
        assert_eq!(report.documents, 3);
        assert_eq!(report.chunks, 3);

        let index = mgr.load().await.unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.entries()[0].id, format!("{}_0", source_id("a.txt")));
        assert_eq!(index.manifest().embedding_model, "hashing-trigram");

        let status = mgr.status().await;
        assert!(status.present);
        assert!(!status.is_indexing);
        assert_eq!(status.total_chunks, 3);
        assert!(status.last_indexed_at.is_some());
    }

    #[tokio::test]
    async fn test_rebuild_replaces_previous_index_without_leftovers() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("vectorstore");

        manager(dir.clone(), vec![doc("old.txt", "old content")])
            .rebuild()
            .await
            .unwrap();
        let mgr = manager(dir.clone(), vec![doc("new.txt", "fresh content")]);
        mgr.rebuild().await.unwrap();

        let index = mgr.load().await.unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.entries()[0].source, "new.txt");

        let names: Vec<String> = std::fs::read_dir(root.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["vectorstore".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_rebuild_writes_empty_index() {
        let root = tempfile::tempdir().unwrap();
        let mgr = manager(root.path().join("vectorstore"), Vec::new());
        let report = mgr.rebuild().await.unwrap();
        assert_eq!(report.chunks, 0);
        assert!(mgr.has_index().await);
        assert!(mgr.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_outcomes() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("vectorstore");
        let mgr = manager(dir.clone(), vec![doc("a.txt", "content")]);

        assert_eq!(mgr.delete().await.unwrap(), DeleteOutcome::NothingToDelete);
        assert!(dir.is_dir());

        mgr.rebuild().await.unwrap();
        assert_eq!(mgr.delete().await.unwrap(), DeleteOutcome::Deleted);
        assert!(dir.is_dir());
        assert!(!mgr.has_index().await);
        assert!(matches!(mgr.load().await, Err(AppError::NoIndexAvailable(_))));
    }

    /// Hashing embeddings that take `delay` per batch.
    struct SlowEmbeddings {
        inner: HashingEmbeddings,
        delay: Duration,
    }

    #[async_trait]
    impl EmbeddingProvider for SlowEmbeddings {
        fn model_name(&self) -> &str {
            self.inner.model_name()
        }

        async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
            tokio::time::sleep(self.delay).await;
            self.inner.embed_batch(texts).await
        }
    }

    struct PanickingEmbeddings;

    #[async_trait]
    impl EmbeddingProvider for PanickingEmbeddings {
        fn model_name(&self) -> &str {
            "panicking"
        }

        async fn embed_batch(&self, _texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
            panic!("embedding backend crashed");
        }
    }

    fn manager_with(
        dir: PathBuf,
        docs: Vec<Document>,
        embeddings: Arc<dyn EmbeddingProvider>,
    ) -> IndexManager {
        IndexManager::new(
            dir,
            embeddings,
            Arc::new(StaticLoader::new(docs)),
            Arc::new(RecursiveSplitter::new(200, 20).unwrap()),
            8,
        )
    }

    fn slow(delay_ms: u64) -> Arc<dyn EmbeddingProvider> {
        Arc::new(SlowEmbeddings {
            inner: HashingEmbeddings::new(64),
            delay: Duration::from_millis(delay_ms),
        })
    }

    #[tokio::test]
    async fn test_concurrent_rebuild_rejected() {
        let root = tempfile::tempdir().unwrap();
        let mgr = manager_with(
            root.path().join("vectorstore"),
            vec![doc("a.txt", "content")],
            slow(100),
        );

        let (first, second) = tokio::join!(mgr.rebuild(), mgr.rebuild());
        let outcomes = [first, second];
        let rejected = outcomes
            .iter()
            .filter(|r| matches!(r, Err(AppError::IndexingInProgress)))
            .count();
        let succeeded = outcomes.iter().filter(|r| r.is_ok()).count();
        assert_eq!(rejected, 1);
        assert_eq!(succeeded, 1);
        assert!(!mgr.status().await.is_indexing);
    }

    #[tokio::test]
    async fn test_cancelled_rebuild_releases_guard() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("vectorstore");
        let mgr = manager_with(dir.clone(), vec![doc("a.txt", "content")], slow(300));

        let cancelled = tokio::time::timeout(Duration::from_millis(30), mgr.rebuild()).await;
        assert!(cancelled.is_err());
        assert!(!mgr.status().await.is_indexing);
        assert!(!mgr.has_index().await);

        let report = mgr.rebuild().await.unwrap();
        assert_eq!(report.chunks, 1);
        assert!(mgr.has_index().await);
    }

    #[tokio::test]
    async fn test_panicking_rebuild_reports_error_and_recovers() {
        let root = tempfile::tempdir().unwrap();
        let mgr = manager_with(
            root.path().join("vectorstore"),
            vec![doc("a.txt", "content")],
            Arc::new(PanickingEmbeddings),
        );

        let err = mgr.rebuild().await.unwrap_err();
        assert!(matches!(err, AppError::Task(_)));

        let status = mgr.status().await;
        assert!(!status.is_indexing);
        assert!(status.last_error.unwrap().contains("embedding backend crashed"));
        assert!(matches!(mgr.rebuild().await, Err(AppError::Task(_))));
    }

    #[test]
    fn test_staging_dir_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join(".vectorstore.staging-test");
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join(ENTRIES_FILE), "[]").unwrap();

        drop(StagingDir { path: path.clone() });
        assert!(!path.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_readers_never_see_partial_index() {
        let root = tempfile::tempdir().unwrap();
        let docs = (0..40)
            .map(|i| doc(&format!("doc{}.txt", i), &format!("document number {} body", i)))
            .collect();
        let mgr = Arc::new(manager(root.path().join("vectorstore"), docs));
        mgr.ensure_dir().await.unwrap();

        let done = Arc::new(AtomicBool::new(false));

        let rebuilder = {
            let mgr = mgr.clone();
            tokio::spawn(async move {
                for _ in 0..15 {
                    mgr.rebuild().await.unwrap();
                }
            })
        };
        let deleter = {
            let mgr = mgr.clone();
            tokio::spawn(async move {
                for _ in 0..15 {
                    mgr.delete().await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };
        let reader = {
            let mgr = mgr.clone();
            let done = done.clone();
            tokio::spawn(async move {
                let mut loads = 0usize;
                while !done.load(Ordering::Acquire) {
                    match mgr.load().await {
                        Ok(index) => assert_eq!(index.len(), 40),
                        Err(AppError::NoIndexAvailable(_)) => {}
                        Err(e) => panic!("reader saw a broken index: {}", e),
                    }
                    loads += 1;
                    tokio::task::yield_now().await;
                }
                loads
            })
        };

        rebuilder.await.unwrap();
        deleter.await.unwrap();
        done.store(true, Ordering::Release);
        assert!(reader.await.unwrap() > 0);

        let leftovers: Vec<String> = std::fs::read_dir(root.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|name| name != "vectorstore")
            .collect();
        assert!(leftovers.is_empty(), "leftover directories: {:?}", leftovers);
    }
}
