//! Anthropic provider: streaming messages API over SSE.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::json;
use tracing::error;

use crate::error::LlmError;
use crate::sse::{SseDecoder, SseLine};
use crate::types::ChatRequest;
use crate::{LlmGateway, TokenStream};

const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// Anthropic messages-API client.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    api_url: String,
}

impl AnthropicProvider {
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
        // Anthropic takes the system prompt as a top-level field; the
        // message list holds only user/assistant turns.
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .filter(|m| m.role != crate::types::ChatRole::System)
            .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
            .collect();
        json!({
            "model": self.model,
            "system": request.system,
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
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&self.payload(request, stream))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = LlmError::from_status(status.as_u16(), body);
            if matches!(err, LlmError::Auth(_)) {
                error!(provider = "anthropic", "Authentication rejected by provider");
            }
            return Err(err);
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmGateway for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
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
                    let value: serde_json::Value = serde_json::from_str(&data)
                        .map_err(|e| LlmError::Protocol(format!("bad SSE payload: {}", e)))?;
                    match value["type"].as_str() {
                        Some("content_block_delta") => {
                            if let Some(piece) = value["delta"]["text"].as_str() {
                                if !piece.is_empty() {
                                    yield piece.to_string();
                                }
                            }
                        }
                        Some("message_stop") => return,
                        Some("error") => {
                            let message = value["error"]["message"]
                                .as_str()
                                .unwrap_or("unknown provider error")
                                .to_string();
                            Err(LlmError::Provider { status: 200, body: message })?;
                        }
                        _ => {}
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn complete(&self, request: ChatRequest) -> Result<String, LlmError> {
        let response = self.send(&request, false).await?;
        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::Protocol(e.to_string()))?;
        value["content"][0]["text"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| LlmError::Protocol("response missing content text".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChatMessage, ChatRole};

    fn provider() -> AnthropicProvider {
        AnthropicProvider::new("sk-ant-test".to_string(), None, 30).unwrap()
    }

    #[test]
    fn test_default_model() {
        assert_eq!(provider().model, "claude-3-5-sonnet-20241022");
    }

    #[test]
    fn test_payload_puts_system_top_level() {
        let req = ChatRequest::new("be kind", vec![ChatMessage::user("hello")]);
        let payload = provider().payload(&req, true);
        assert_eq!(payload["system"], "be kind");
        assert_eq!(payload["messages"][0]["role"], "user");
        assert_eq!(payload["stream"], true);
    }

    #[test]
    fn test_payload_filters_system_messages_from_list() {
        let req = ChatRequest::new(
            "sys",
            vec![
                ChatMessage::new(ChatRole::System, "sneaky"),
                ChatMessage::user("hello"),
            ],
        );
        let payload = provider().payload(&req, false);
        let messages = payload["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
    }

    #[test]
    fn test_payload_carries_limits() {
        let req = ChatRequest::new("s", vec![ChatMessage::user("q")]).with_limits(256, 0.1);
        let payload = provider().payload(&req, true);
        assert_eq!(payload["max_tokens"], 256);
    }
}
