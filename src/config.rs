//! Layered settings: serde defaults, an optional `rag-qa.*` file, then
//! `RAG_QA__*` environment variables.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{AppError, AppResult};

const CONFIG_FILE: &str = "rag-qa";
const ENV_PREFIX: &str = "RAG_QA";
const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub vectorstore: VectorStoreSettings,
    pub documents: DocumentSettings,
    pub chunking: ChunkingSettings,
    pub retrieval: RetrievalSettings,
    pub llm: LlmSettings,
    pub embeddings: EmbeddingSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VectorStoreSettings {
    pub dir: PathBuf,
}

impl Default for VectorStoreSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("vectorstore"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DocumentSettings {
    pub dir: PathBuf,
}

impl Default for DocumentSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("documents"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    /// Maximum chunk length in UTF-8 bytes.
    pub chunk_size: usize,
    /// Bytes shared by consecutive chunks.
    pub chunk_overlap: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub top_k: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self { top_k: 20 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: OPENAI_BASE_URL.to_string(),
            api_key: None,
            model: "chatgpt-4o-latest".to_string(),
            temperature: 0.0,
            max_tokens: 1000,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    OpenAi,
    Hashing,
    Local,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingBackend,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Only used by the hashing provider; remote and local models report
    /// their own dimension.
    pub dimensions: usize,
    pub batch_size: usize,
    pub model_dir: PathBuf,
    pub timeout_secs: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingBackend::OpenAi,
            base_url: OPENAI_BASE_URL.to_string(),
            api_key: None,
            model: "text-embedding-3-small".to_string(),
            dimensions: 384,
            batch_size: 32,
            model_dir: PathBuf::from("models/bge-small-en-v1.5"),
            timeout_secs: 120,
        }
    }
}

impl Settings {
    /// Load settings from `.env`, the optional config file and the
    /// environment, then validate them.
    pub fn load() -> AppResult<Self> {
        dotenv::dotenv().ok();

        let raw = ::config::Config::builder()
            .add_source(::config::File::with_name(CONFIG_FILE).required(false))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut settings: Settings = raw.try_deserialize()?;
        settings.apply_api_key(std::env::var(OPENAI_API_KEY).ok());
        settings.validate()?;
        Ok(settings)
    }

    /// Fill provider keys that were not set explicitly.
    pub fn apply_api_key(&mut self, key: Option<String>) {
        let Some(key) = key.filter(|k| !k.is_empty()) else {
            return;
        };
        if self.llm.api_key.is_none() {
            self.llm.api_key = Some(key.clone());
        }
        if self.embeddings.api_key.is_none() {
            self.embeddings.api_key = Some(key);
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.chunking.chunk_size == 0 {
            return Err(AppError::Config("chunking.chunk_size must be positive".to_string()));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(AppError::Config(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            )));
        }
        if self.retrieval.top_k == 0 {
            return Err(AppError::Config("retrieval.top_k must be positive".to_string()));
        }
        if self.embeddings.batch_size == 0 {
            return Err(AppError::Config("embeddings.batch_size must be positive".to_string()));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
