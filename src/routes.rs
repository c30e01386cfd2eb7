use std::sync::Arc;

use axum::{
    extract::State,
    http::Method,
    routing::{delete, get, post},
    Json, Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{AppError, AppResult};
use crate::models::{AskRequest, AskResponse, HealthResponse, MessageResponse, ProcessResponse};
use crate::rag::index_manager::{DeleteOutcome, IndexStatus};
use crate::rag::{RagEngine, NO_QUESTION_MESSAGE};

pub struct AppState {
    pub engine: RagEngine,
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/ask", post(ask_handler))
        .route("/process", post(process_handler))
        .route("/delete_vectorstore", delete(delete_vectorstore_handler))
        .route("/health", get(health_check))
        .route("/vectorstore/status", get(status_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

async fn ask_handler(
    State(state): State<Arc<AppState>>,
    payload: Option<Json<AskRequest>>,
) -> AppResult<Json<AskResponse>> {
    let question = payload
        .and_then(|Json(req)| req.question)
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| AppError::MissingInput(NO_QUESTION_MESSAGE.to_string()))?;

    let answer = state.engine.ask(&question).await.map_err(|e| {
        match &e {
            AppError::NoIndexAvailable(_) => tracing::warn!("Ask rejected: {}", e),
            _ => tracing::error!("Error during inference: {}", e),
        }
        e
    })?;

    Ok(Json(AskResponse { answer }))
}

async fn process_handler(State(state): State<Arc<AppState>>) -> AppResult<Json<ProcessResponse>> {
    let report = state.engine.index().rebuild().await.map_err(|e| {
        tracing::error!("Error processing files: {}", e);
        e
    })?;

    Ok(Json(ProcessResponse {
        message: "Files processed successfully.".to_string(),
        documents: report.documents,
        chunks: report.chunks,
        failed_documents: report.failed_documents,
    }))
}

async fn delete_vectorstore_handler(
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<MessageResponse>> {
    let outcome = state.engine.index().delete().await.map_err(|e| {
        tracing::error!("Error deleting vectorstore: {}", e);
        e
    })?;

    let message = match outcome {
        DeleteOutcome::Deleted => "Vectorstore deleted successfully.",
        DeleteOutcome::NothingToDelete => "No vectorstore to delete.",
    };
    Ok(Json(MessageResponse {
        message: message.to_string(),
    }))
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Json<IndexStatus> {
    Json(state.engine.index().status().await)
}
