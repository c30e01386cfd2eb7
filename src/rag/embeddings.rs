use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::config::{EmbeddingBackend, EmbeddingSettings};
use crate::error::{AppError, AppResult};
use crate::models::{EmbeddingRequest, EmbeddingResponse};

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Identifier stored in the index manifest.
    fn model_name(&self) -> &str;

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>>;

    async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| AppError::Embedding("no embedding returned".to_string()))
    }
}

pub fn create_provider(settings: &EmbeddingSettings) -> AppResult<Arc<dyn EmbeddingProvider>> {
    match settings.provider {
        EmbeddingBackend::OpenAi => Ok(Arc::new(OpenAiEmbeddings::from_settings(settings)?)),
        EmbeddingBackend::Hashing => Ok(Arc::new(HashingEmbeddings::new(settings.dimensions))),
        #[cfg(feature = "local-embeddings")]
        EmbeddingBackend::Local => Ok(Arc::new(local::LocalEmbeddings::new(&settings.model_dir)?)),
        #[cfg(not(feature = "local-embeddings"))]
        EmbeddingBackend::Local => Err(AppError::Config(
            "local embeddings require building with the `local-embeddings` feature".to_string(),
        )),
    }
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbeddings {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiEmbeddings {
    pub fn from_settings(settings: &EmbeddingSettings) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/embeddings", self.base_url);
        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let mut req = self.client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Embedding(format!(
                "embedding request failed: {} - {}",
                status, error_text
            )));
        }

        let mut parsed: EmbeddingResponse = response.json().await?;
        if parsed.data.len() != texts.len() {
            return Err(AppError::Embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Deterministic offline embeddings built from hashed words and character
/// trigrams. Texts that share vocabulary land close together, which is
/// enough for tests and air-gapped demos.
#[derive(Debug, Clone)]
pub struct HashingEmbeddings {
    dimensions: usize,
}

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "was", "were", "with", "from", "this", "that", "have", "has",
    "had", "its", "their", "they", "them", "what", "which", "who", "how", "does", "about",
];

impl HashingEmbeddings {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn bucket(&self, token: &str, seed: u64) -> usize {
        let hash = token
            .bytes()
            .fold(seed, |acc, b| acc.wrapping_mul(0x100_0000_01b3).wrapping_add(b as u64));
        (hash % self.dimensions as u64) as usize
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];

        let mut counts: HashMap<String, usize> = HashMap::new();
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .map(str::to_lowercase)
            .filter(|w| w.chars().count() > 2 && !STOP_WORDS.contains(&w.as_str()))
        {
            *counts.entry(word).or_insert(0) += 1;
        }

        for (word, count) in &counts {
            let weight = (*count as f32).sqrt();
            vector[self.bucket(word, 0xcbf2_9ce4_8422_2325)] += *count as f32;

            let chars: Vec<char> = word.chars().collect();
            for window in chars.windows(3) {
                let trigram: String = window.iter().collect();
                vector[self.bucket(&trigram, 0x9e37_79b9_7f4a_7c15)] += weight * 0.5;
            }
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddings {
    fn model_name(&self) -> &str {
        "hashing-trigram"
    }

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

#[cfg(feature = "local-embeddings")]
mod local {
    use std::path::Path;

    use async_trait::async_trait;
    use fastembed::{InitOptionsUserDefined, TextEmbedding, TokenizerFiles, UserDefinedEmbeddingModel};

    use super::EmbeddingProvider;
    use crate::error::{AppError, AppResult};

    /// ONNX embedding model read from a local directory.
    pub struct LocalEmbeddings {
        model: TextEmbedding,
        name: String,
    }

    fn read_model_file(dir: &Path, name: &str) -> AppResult<Vec<u8>> {
        std::fs::read(dir.join(name))
            .map_err(|e| AppError::Embedding(format!("failed to read {}: {}", name, e)))
    }

    impl LocalEmbeddings {
        pub fn new(model_dir: &Path) -> AppResult<Self> {
            if !model_dir.exists() {
                return Err(AppError::Config(format!(
                    "model directory not found: {}",
                    model_dir.display()
                )));
            }
            tracing::info!("Loading embedding model from {}", model_dir.display());

            let user_model = UserDefinedEmbeddingModel {
                onnx_file: read_model_file(model_dir, "model.onnx")?,
                tokenizer_files: TokenizerFiles {
                    tokenizer_file: read_model_file(model_dir, "tokenizer.json")?,
                    config_file: read_model_file(model_dir, "config.json")?,
                    special_tokens_map_file: read_model_file(model_dir, "special_tokens_map.json")?,
                    tokenizer_config_file: read_model_file(model_dir, "tokenizer_config.json")?,
                },
            };

            let model = TextEmbedding::try_new_from_user_defined(user_model, InitOptionsUserDefined::default())
                .map_err(|e| AppError::Embedding(format!("failed to initialize embedding model: {}", e)))?;

            let name = model_dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "local".to_string());

            tracing::info!("Embedding model {} ready", name);
            Ok(Self { model, name })
        }
    }

    #[async_trait]
    impl EmbeddingProvider for LocalEmbeddings {
        fn model_name(&self) -> &str {
            &self.name
        }

        async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
            self.model
                .embed(texts.to_vec(), None)
                .map_err(|e| AppError::Embedding(e.to_string()))
        }
    }
}
