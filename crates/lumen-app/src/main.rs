//! Lumen server binary - composition root.
//!
//! Ties the crates together into a single executable:
//! 1. Load and validate configuration from the environment
//! 2. Open the conversation store (SQLite)
//! 3. Open the retrieval store and scan the documents folder
//! 4. Build the LLM gateway for the configured provider
//! 5. Start the HTTP/WebSocket listener
//!
//! On SIGTERM/Ctrl+C the listener stops accepting, live sessions get a
//! grace window to finish their current turn, and sockets close with 1001.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use lumen_api::{create_router, AppState};
use lumen_core::config::Config;
use lumen_engine::ConversationEngine;
use lumen_llm::build_gateway;
use lumen_retrieval::{Chunker, HashEmbedding, RetrievalStore};
use lumen_storage::{ConversationStore, Database};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match Config::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    tracing::info!("Starting Lumen v{}", env!("CARGO_PKG_VERSION"));

    // Conversation store.
    let db = Database::new(&config.database_path)?;
    let store = Arc::new(ConversationStore::new(Arc::new(db)));
    tracing::info!(path = %config.database_path.display(), "Conversation store ready");

    // Retrieval store: load persisted vectors, then converge on the folder.
    let retrieval = Arc::new(RetrievalStore::open(
        Arc::new(HashEmbedding::new()),
        &config.rag_docs_folder,
        &config.rag_index_dir,
        Chunker::new(config.rag_chunk_size, config.rag_chunk_overlap),
        config.rag_min_score,
    )?);
    match retrieval.reload().await {
        Ok(report) => tracing::info!(
            ingested = report.ingested,
            removed = report.removed,
            unchanged = report.unchanged,
            failed = report.failed,
            folder = %config.rag_docs_folder.display(),
            "Document index ready"
        ),
        Err(e) => tracing::warn!(error = %e, "Initial document scan failed; index may be stale"),
    }

    // LLM gateway.
    let gateway = build_gateway(&config)?;

    // Engine and shared state.
    let engine = Arc::new(ConversationEngine::new(
        Arc::clone(&store),
        Arc::clone(&retrieval),
        gateway,
        Arc::clone(&config),
    ));
    let shutdown = CancellationToken::new();
    let state = AppState::new(
        Arc::clone(&config),
        store,
        retrieval,
        engine,
        shutdown.clone(),
    );

    let router = create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind; is another instance running?");
            return Err(e.into());
        }
    };
    tracing::info!(addr = %addr, "Listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Resolve when SIGTERM or Ctrl+C arrives; cancelling the token tells
/// every live session to drain and close with 1001.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Shutdown signal received (Ctrl+C)"),
        _ = terminate => tracing::info!("Shutdown signal received (SIGTERM)"),
    }
    shutdown.cancel();
}
