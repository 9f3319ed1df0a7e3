//! Application state shared across all route handlers and sessions.
//!
//! This is the composition root object: every session and admin handler
//! reaches the stores and the engine through it. All fields are cheap
//! clones.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use lumen_core::config::Config;
use lumen_engine::ConversationEngine;
use lumen_retrieval::RetrievalStore;
use lumen_storage::ConversationStore;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Frozen configuration.
    pub config: Arc<Config>,
    /// Durable conversation store.
    pub store: Arc<ConversationStore>,
    /// Vector index over the documents folder.
    pub retrieval: Arc<RetrievalStore>,
    /// Turn driver.
    pub engine: Arc<ConversationEngine>,
    /// Cancelled once at shutdown; sessions watch it to drain gracefully.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        store: Arc<ConversationStore>,
        retrieval: Arc<RetrievalStore>,
        engine: Arc<ConversationEngine>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            store,
            retrieval,
            engine,
            shutdown,
        }
    }
}
