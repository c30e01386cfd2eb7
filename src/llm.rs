use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::config::LlmSettings;
use crate::error::{AppError, AppResult};
use crate::models::{ChatRequest, ChatResponse};

/// A chat-completion backend. Returns the first choice's text.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> AppResult<String>;
}

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiChat {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiChat {
    pub fn new(base_url: String, api_key: Option<String>, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn from_settings(settings: &LlmSettings) -> AppResult<Self> {
        if settings.api_key.is_none() {
            tracing::warn!("No LLM API key configured; chat completions will likely be rejected");
        }
        Self::new(
            settings.base_url.clone(),
            settings.api_key.clone(),
            Duration::from_secs(settings.timeout_secs),
        )
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, request: &ChatRequest) -> AppResult<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut req = self.client.post(&url).json(request);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Llm(format!(
                "chat completion failed: {} - {}",
                status, error_text
            )));
        }

        let chat_response: ChatResponse = response.json().await?;
        tracing::debug!(model = %chat_response.model, id = %chat_response.id, "chat completion received");

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::Llm("chat completion returned no content".to_string()))
    }
}
