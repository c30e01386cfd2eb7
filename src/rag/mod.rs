pub mod embeddings;
pub mod index_manager;
pub mod vector_store;

use std::sync::Arc;

use crate::config::{LlmSettings, RetrievalSettings};
use crate::error::{AppError, AppResult};
use crate::llm::ChatModel;
use crate::models::{ChatRequest, Message};
use self::embeddings::EmbeddingProvider;
use self::index_manager::IndexManager;

pub const NO_QUESTION_MESSAGE: &str = "No question provided";

const PROMPT_PREAMBLE: &str = "Use the following pieces of context to answer the question at the end. \
If you don't know the answer, just say that you don't know, don't try to make up an answer.";

/// Sampling and retrieval parameters for one `ask`.
#[derive(Debug, Clone)]
pub struct AnswerOptions {
    pub top_k: usize,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl AnswerOptions {
    pub fn from_settings(retrieval: &RetrievalSettings, llm: &LlmSettings) -> Self {
        Self {
            top_k: retrieval.top_k,
            model: llm.model.clone(),
            temperature: llm.temperature,
            max_tokens: llm.max_tokens,
        }
    }
}

impl Default for AnswerOptions {
    fn default() -> Self {
        Self::from_settings(&RetrievalSettings::default(), &LlmSettings::default())
    }
}

pub fn build_prompt(passages: &[&str], question: &str) -> String {
    format!(
        "{}\n\n{}\n\nQuestion: {}\nHelpful Answer:",
        PROMPT_PREAMBLE,
        passages.join("\n\n"),
        question
    )
}

pub struct RagEngine {
    index: Arc<IndexManager>,
    embeddings: Arc<dyn EmbeddingProvider>,
    chat: Arc<dyn ChatModel>,
    options: AnswerOptions,
}

impl RagEngine {
    pub fn new(
        index: Arc<IndexManager>,
        embeddings: Arc<dyn EmbeddingProvider>,
        chat: Arc<dyn ChatModel>,
        options: AnswerOptions,
    ) -> Self {
        Self {
            index,
            embeddings,
            chat,
            options,
        }
    }

    pub fn index(&self) -> &Arc<IndexManager> {
        &self.index
    }

    /// Top-k passages for `query`, best first.
    pub async fn retrieve_context(&self, query: &str) -> AppResult<Vec<String>> {
        let index = self.index.load().await?;
        let query_embedding = self.embeddings.embed(query).await?;
        let hits = index.search(&query_embedding, self.options.top_k)?;
        tracing::debug!("Retrieved {} passages", hits.len());
        Ok(hits.into_iter().map(|h| h.entry.text.clone()).collect())
    }

    pub async fn ask(&self, question: &str) -> AppResult<String> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AppError::MissingInput(NO_QUESTION_MESSAGE.to_string()));
        }

        let passages = self.retrieve_context(question).await?;
        let passages: Vec<&str> = passages.iter().map(String::as_str).collect();

        let request = ChatRequest {
            model: self.options.model.clone(),
            messages: vec![Message::user(build_prompt(&passages, question))],
            temperature: Some(self.options.temperature),
            max_tokens: Some(self.options.max_tokens),
        };

        self.chat.complete(&request).await
    }
}
