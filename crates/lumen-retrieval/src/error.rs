use lumen_core::error::LumenError;

/// Errors from the retrieval subsystem.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("extraction failed: {0}")]
    Extraction(String),
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error("invalid document name: {0}")]
    InvalidName(String),
    #[error("document not found: {0}")]
    DocumentNotFound(String),
    #[error("index storage error: {0}")]
    Storage(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RetrievalError> for LumenError {
    fn from(err: RetrievalError) -> Self {
        match err {
            RetrievalError::DocumentNotFound(name) => LumenError::NotFound(name),
            other => LumenError::Retrieval(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for RetrievalError {
    fn from(err: serde_json::Error) -> Self {
        RetrievalError::Storage(err.to_string())
    }
}
