use lumen_core::error::LumenError;

/// Errors from the LLM gateway.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Provider rejected the credentials. Non-retryable; subsequent calls
    /// will fail identically.
    #[error("provider authentication failed: {0}")]
    Auth(String),
    /// Transport-level failure (connect, TLS, mid-stream disconnect).
    #[error("transport error: {0}")]
    Transport(String),
    /// The provider answered with something the gateway cannot interpret.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Provider returned a non-success status that is not an auth failure.
    #[error("provider error ({status}): {body}")]
    Provider { status: u16, body: String },
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::Transport(err.to_string())
    }
}

impl From<LlmError> for LumenError {
    fn from(err: LlmError) -> Self {
        LumenError::Llm(err.to_string())
    }
}

impl LlmError {
    /// Classify a non-success HTTP response.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => LlmError::Auth(body),
            _ => LlmError::Provider { status, body },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = LlmError::Auth("bad key".to_string());
        assert_eq!(err.to_string(), "provider authentication failed: bad key");

        let err = LlmError::Provider {
            status: 429,
            body: "rate limited".to_string(),
        };
        assert_eq!(err.to_string(), "provider error (429): rate limited");
    }

    #[test]
    fn test_from_status_classifies_auth() {
        assert!(matches!(
            LlmError::from_status(401, String::new()),
            LlmError::Auth(_)
        ));
        assert!(matches!(
            LlmError::from_status(403, String::new()),
            LlmError::Auth(_)
        ));
        assert!(matches!(
            LlmError::from_status(500, String::new()),
            LlmError::Provider { status: 500, .. }
        ));
    }

    #[test]
    fn test_converts_to_lumen_error() {
        let err: LumenError = LlmError::Transport("reset".to_string()).into();
        assert!(matches!(err, LumenError::Llm(_)));
    }
}
