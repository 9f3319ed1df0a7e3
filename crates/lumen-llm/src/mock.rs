//! Scripted in-process provider for tests.
//!
//! Yields a fixed sequence of chunks with an optional per-chunk delay, can
//! fail after N chunks, and records the last request it received so tests
//! can assert on prompt assembly.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::LlmError;
use crate::types::ChatRequest;
use crate::{LlmGateway, TokenStream};

/// Deterministic gateway used across engine and API tests.
pub struct MockProvider {
    chunks: Vec<String>,
    chunk_delay: Duration,
    completion: String,
    fail_after: Option<usize>,
    fail_on_connect: bool,
    last_request: Mutex<Option<ChatRequest>>,
}

impl MockProvider {
    /// Stream the given chunks, then end normally.
    pub fn scripted<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            chunk_delay: Duration::ZERO,
            completion: "mock summary".to_string(),
            fail_after: None,
            fail_on_connect: false,
            last_request: Mutex::new(None),
        }
    }

    /// Sleep this long before each chunk (for cancellation tests).
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Text returned by `complete` (summarisation path).
    pub fn with_completion(mut self, completion: impl Into<String>) -> Self {
        self.completion = completion.into();
        self
    }

    /// Emit a transport error after this many chunks.
    pub fn failing_after(mut self, chunks: usize) -> Self {
        self.fail_after = Some(chunks);
        self
    }

    /// Refuse the call outright, as a provider with bad credentials would.
    pub fn failing_on_connect(mut self) -> Self {
        self.fail_on_connect = true;
        self
    }

    /// The most recent request passed to `stream_chat` or `complete`.
    pub fn last_request(&self) -> Option<ChatRequest> {
        self.last_request.lock().ok().and_then(|g| g.clone())
    }

    fn record(&self, request: &ChatRequest) {
        if let Ok(mut guard) = self.last_request.lock() {
            *guard = Some(request.clone());
        }
    }
}

#[async_trait]
impl LlmGateway for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<TokenStream, LlmError> {
        self.record(&request);
        if self.fail_on_connect {
            return Err(LlmError::Auth("mock credentials rejected".to_string()));
        }

        let chunks = self.chunks.clone();
        let delay = self.chunk_delay;
        let fail_after = self.fail_after;

        let stream = async_stream::try_stream! {
            for (i, chunk) in chunks.into_iter().enumerate() {
                if let Some(n) = fail_after {
                    if i >= n {
                        Err(LlmError::Transport("mock stream failure".to_string()))?;
                    }
                }
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield chunk;
            }
        };
        Ok(Box::pin(stream))
    }

    async fn complete(&self, request: ChatRequest) -> Result<String, LlmError> {
        self.record(&request);
        if self.fail_on_connect {
            return Err(LlmError::Auth("mock credentials rejected".to_string()));
        }
        Ok(self.completion.clone())
    }
}
