use lumen_core::error::LumenError;

/// Errors surfaced to the session manager by the engine.
///
/// Failures after the user message is durably appended are converted into
/// user-visible frames inside the engine and never reach this type.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The user message could not be appended; the turn never started.
    #[error("store error: {0}")]
    Store(#[from] LumenError),
    /// The session's outbound queue closed underneath the turn.
    #[error("outbound queue closed")]
    SinkClosed,
}
