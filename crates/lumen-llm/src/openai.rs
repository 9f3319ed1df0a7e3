//! OpenAI provider: streaming chat completions over SSE.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::json;
use tracing::{debug, error};

use crate::error::LlmError;
use crate::sse::{SseDecoder, SseLine};
use crate::types::ChatRequest;
use crate::{LlmGateway, TokenStream};

const DEFAULT_MODEL: &str = "gpt-4.1";
const API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI chat-completions client.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    api_url: String,
}

impl OpenAiProvider {
    pub fn new(
        api_key: String,
        model: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(timeout_secs.max(1) * 2))
            .build()
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_url: API_URL.to_string(),
        })
    }

    /// Point the provider at a different endpoint (testing, proxies).
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    fn payload(&self, request: &ChatRequest, stream: bool) -> serde_json::Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.system.is_empty() {
            messages.push(json!({"role": "system", "content": request.system}));
        }
        for msg in &request.messages {
            messages.push(json!({"role": msg.role.as_str(), "content": msg.content}));
        }
        json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "stream": stream,
        })
    }

    async fn send(
        &self,
        request: &ChatRequest,
        stream: bool,
    ) -> Result<reqwest::Response, LlmError> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&self.payload(request, stream))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = LlmError::from_status(status.as_u16(), body);
            if matches!(err, LlmError::Auth(_)) {
                error!(provider = "openai", "Authentication rejected by provider");
            }
            return Err(err);
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmGateway for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<TokenStream, LlmError> {
        let response = self.send(&request, true).await?;

        let stream = async_stream::try_stream! {
            let byte_stream = response.bytes_stream();
            futures_util::pin_mut!(byte_stream);
            let mut decoder = SseDecoder::new();
            while let Some(chunk) = byte_stream.next().await {
                let chunk = chunk.map_err(|e| LlmError::Transport(e.to_string()))?;
                for line in decoder.push(&chunk) {
                    let SseLine::Data(data) = line else { continue };
                    if data == "[DONE]" {
                        return;
                    }
                    let value: serde_json::Value = serde_json::from_str(&data)
                        .map_err(|e| LlmError::Protocol(format!("bad SSE payload: {}", e)))?;
                    if let Some(piece) = value["choices"][0]["delta"]["content"].as_str() {
                        if !piece.is_empty() {
                            yield piece.to_string();
                        }
                    }
                }
            }
            debug!(provider = "openai", "Stream ended without [DONE]");
        };

        Ok(Box::pin(stream))
    }

    async fn complete(&self, request: ChatRequest) -> Result<String, LlmError> {
        let response = self.send(&request, false).await?;
        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::Protocol(e.to_string()))?;
        value["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| LlmError::Protocol("response missing message content".to_string()))
    }
}
