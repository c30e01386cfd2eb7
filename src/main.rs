use std::sync::Arc;

use anyhow::Result;

use rag_qa::config::Settings;
use rag_qa::routes::{router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    rag_qa::logging::init_tracing();

    let settings = Settings::load()?;
    tracing::info!("Vectorstore directory: {}", settings.vectorstore.dir.display());
    tracing::info!("Document directory: {}", settings.documents.dir.display());
    tracing::info!("LLM endpoint: {} ({})", settings.llm.base_url, settings.llm.model);

    let engine = rag_qa::build_engine(&settings)?;
    engine.index().ensure_dir().await?;

    let state = Arc::new(AppState { engine });
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(settings.bind_addr()).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
}
