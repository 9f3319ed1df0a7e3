//! LLM gateway: one streaming text-completion interface regardless of the
//! configured provider variant.
//!
//! Providers deliver output token-by-token (or in small chunks); the
//! gateway does not buffer beyond what the provider emits. Dropping the
//! returned stream aborts the underlying HTTP connection, which is how
//! cancellation propagates to the provider.

pub mod anthropic;
pub mod error;
pub mod mock;
pub mod openai;
pub mod sse;
pub mod types;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::Stream;

use lumen_core::config::{Config, LlmProviderKind};

pub use anthropic::AnthropicProvider;
pub use error::LlmError;
pub use mock::MockProvider;
pub use openai::OpenAiProvider;
pub use types::{ChatMessage, ChatRequest, ChatRole};

/// Lazy sequence of incremental text pieces. The stream ends after the
/// provider's terminal signal; transport failures surface as a single
/// terminal `Err` item.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// Uniform streaming interface over provider variants.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Human-readable provider name for logs.
    fn name(&self) -> &str;

    /// Stream a chat completion. Cancellation is dropping the stream.
    async fn stream_chat(&self, request: ChatRequest) -> Result<TokenStream, LlmError>;

    /// Non-streaming completion, used for summarisation.
    async fn complete(&self, request: ChatRequest) -> Result<String, LlmError>;
}

/// Build the gateway selected by `LLM_PROVIDER`.
pub fn build_gateway(config: &Config) -> Result<Arc<dyn LlmGateway>, LlmError> {
    let gateway: Arc<dyn LlmGateway> = match config.llm_provider {
        LlmProviderKind::OpenAi => Arc::new(OpenAiProvider::new(
            config.openai_api_key.clone(),
            config.llm_model.clone(),
            config.llm_timeout_secs,
        )?),
        LlmProviderKind::Anthropic => Arc::new(AnthropicProvider::new(
            config.anthropic_api_key.clone(),
            config.llm_model.clone(),
            config.llm_timeout_secs,
        )?),
    };
    tracing::info!(provider = gateway.name(), "LLM gateway initialized");
    Ok(gateway)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(provider: &str) -> Config {
        let mut vars = HashMap::new();
        vars.insert("CHAT_API_KEY".to_string(), "c".to_string());
        vars.insert("ADMIN_API_KEY".to_string(), "a".to_string());
        vars.insert("LLM_PROVIDER".to_string(), provider.to_string());
        vars.insert("OPENAI_API_KEY".to_string(), "sk-test".to_string());
        vars.insert("ANTHROPIC_API_KEY".to_string(), "sk-ant-test".to_string());
        Config::from_vars(&vars).unwrap()
    }

    #[test]
    fn test_build_gateway_openai() {
        let gateway = build_gateway(&config_with("openai")).unwrap();
        assert_eq!(gateway.name(), "openai");
    }

    #[test]
    fn test_build_gateway_anthropic() {
        let gateway = build_gateway(&config_with("anthropic")).unwrap();
        assert_eq!(gateway.name(), "anthropic");
    }
}
