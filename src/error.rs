//! Error types shared by the service, the ingestion pipeline and the CLI.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

pub const NO_VECTORSTORE_MESSAGE: &str =
    "No vectorstore available. Please process the files first.";
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal Server Error";

#[derive(Error, Debug)]
pub enum AppError {
    /// A required request field was missing or empty.
    #[error("{0}")]
    MissingInput(String),

    /// No index has been built at the configured path.
    #[error("no vectorstore found at {0}")]
    NoIndexAvailable(String),

    #[error("indexing already in progress")]
    IndexingInProgress,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("LLM error: {0}")]
    Llm(String),

    /// The index files exist but cannot be trusted.
    #[error("corrupt vectorstore: {0}")]
    CorruptIndex(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("extraction error: {0}")]
    Extraction(String),

    /// A spawned or unwinding task did not finish normally.
    #[error("task failed: {0}")]
    Task(String),
}

impl From<::config::ConfigError> for AppError {
    fn from(err: ::config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Best-effort text of a caught panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::MissingInput(_) | AppError::NoIndexAvailable(_) => StatusCode::BAD_REQUEST,
            AppError::IndexingInProgress => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand to HTTP clients. Internal failures collapse to
    /// one generic string.
    pub fn client_message(&self) -> String {
        match self {
            AppError::MissingInput(msg) => msg.clone(),
            AppError::NoIndexAvailable(_) => NO_VECTORSTORE_MESSAGE.to_string(),
            AppError::IndexingInProgress => "Indexing already in progress".to_string(),
            _ => INTERNAL_ERROR_MESSAGE.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.client_message() });
        (self.status_code(), Json(body)).into_response()
    }
}
