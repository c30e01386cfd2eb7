//! Retrieval-augmented question answering over a locally persisted vector
//! index.

pub mod config;
pub mod error;
pub mod indexer;
pub mod llm;
pub mod logging;
pub mod models;
pub mod rag;
pub mod routes;

use std::sync::Arc;

use crate::config::Settings;
use crate::error::AppResult;
use crate::indexer::chunker::RecursiveSplitter;
use crate::indexer::DirectoryLoader;
use crate::llm::{ChatModel, OpenAiChat};
use crate::rag::embeddings::{create_provider, EmbeddingProvider};
use crate::rag::index_manager::IndexManager;
use crate::rag::{AnswerOptions, RagEngine};

/// Index manager reading documents from `documents.dir`.
pub fn build_index_manager(
    settings: &Settings,
    embeddings: Arc<dyn EmbeddingProvider>,
) -> AppResult<IndexManager> {
    Ok(IndexManager::new(
        settings.vectorstore.dir.clone(),
        embeddings,
        Arc::new(DirectoryLoader::new(settings.documents.dir.clone())),
        Arc::new(RecursiveSplitter::from_settings(&settings.chunking)?),
        settings.embeddings.batch_size,
    ))
}

/// Wire the production providers together.
pub fn build_engine(settings: &Settings) -> AppResult<RagEngine> {
    let embeddings = create_provider(&settings.embeddings)?;
    let index = Arc::new(build_index_manager(settings, embeddings.clone())?);
    let chat: Arc<dyn ChatModel> = Arc::new(OpenAiChat::from_settings(&settings.llm)?);

    Ok(RagEngine::new(
        index,
        embeddings,
        chat,
        AnswerOptions::from_settings(&settings.retrieval, &settings.llm),
    ))
}
