use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use rag_qa::config::Settings;
use rag_qa::indexer::chunker::RecursiveSplitter;
use rag_qa::indexer::DirectoryLoader;
use rag_qa::rag::embeddings::{create_provider, EmbeddingProvider};
use rag_qa::rag::index_manager::IndexManager;

#[derive(Parser, Debug)]
#[command(name = "rag-indexer")]
#[command(about = "Build the vectorstore from a directory of documents")]
struct Args {
    /// Directory to recursively index (defaults to documents.dir)
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Vectorstore directory to replace (defaults to vectorstore.dir)
    #[arg(long, env = "RAG_QA_VECTORSTORE")]
    vectorstore: Option<PathBuf>,

    /// Maximum chunk size in bytes
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Overlap between chunks in bytes
    #[arg(long)]
    chunk_overlap: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    rag_qa::logging::init_tracing();

    let args = Args::parse();
    let mut settings = Settings::load()?;
    if let Some(size) = args.chunk_size {
        settings.chunking.chunk_size = size;
    }
    if let Some(overlap) = args.chunk_overlap {
        settings.chunking.chunk_overlap = overlap;
    }
    settings.validate()?;

    let source_dir = args.dir.unwrap_or_else(|| settings.documents.dir.clone());
    let vectorstore_dir = args
        .vectorstore
        .unwrap_or_else(|| settings.vectorstore.dir.clone());

    if !source_dir.is_dir() {
        anyhow::bail!("Directory does not exist: {}", source_dir.display());
    }

    let embeddings = create_provider(&settings.embeddings)?;
    let manager = IndexManager::new(
        vectorstore_dir.clone(),
        embeddings.clone(),
        Arc::new(DirectoryLoader::new(source_dir.clone())),
        Arc::new(RecursiveSplitter::from_settings(&settings.chunking)?),
        settings.embeddings.batch_size,
    );

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    spinner.set_message(format!("Indexing {}", source_dir.display()));
    spinner.enable_steady_tick(Duration::from_millis(120));

    let report = manager.rebuild().await;
    spinner.finish_and_clear();
    let report = report?;

    println!("Indexing complete!");
    println!("  Documents indexed: {}", report.documents);
    println!("  Documents failed:  {}", report.failed_documents.len());
    println!("  Total chunks:      {}", report.chunks);
    println!("  Embedding model:   {}", embeddings.model_name());
    println!("  Vectorstore:       {}", vectorstore_dir.display());

    if !report.failed_documents.is_empty() {
        println!("\nFailed documents:");
        for name in &report.failed_documents {
            println!("  {}", name);
        }
    }

    Ok(())
}
