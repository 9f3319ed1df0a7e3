use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{LumenError, Result};

/// Which upstream LLM provider variant to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProviderKind {
    OpenAi,
    Anthropic,
}

impl LlmProviderKind {
    /// Parse a provider name as given in `LLM_PROVIDER`.
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "openai" => Ok(LlmProviderKind::OpenAi),
            "anthropic" => Ok(LlmProviderKind::Anthropic),
            other => Err(LumenError::Config(format!(
                "unknown LLM_PROVIDER '{}', expected 'openai' or 'anthropic'",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProviderKind::OpenAi => "openai",
            LlmProviderKind::Anthropic => "anthropic",
        }
    }
}

/// Frozen application configuration, loaded once at startup from the
/// process environment and validated before anything else runs.
///
/// All recognised keys and their defaults are listed in the project
/// documentation; missing numeric keys fall back to defaults, while the two
/// API keys are required.
#[derive(Debug, Clone)]
pub struct Config {
    /// Token compared against inbound WebSocket credentials.
    pub chat_api_key: String,
    /// Bearer token for the admin HTTP surface.
    pub admin_api_key: String,

    /// Selected LLM provider variant.
    pub llm_provider: LlmProviderKind,
    /// Credential for the OpenAI provider.
    pub openai_api_key: String,
    /// Credential for the Anthropic provider.
    pub anthropic_api_key: String,
    /// Optional model name override for the selected provider.
    pub llm_model: Option<String>,
    /// Cap on generated tokens per turn.
    pub llm_max_tokens: u32,
    /// Sampling temperature for replies.
    pub llm_temperature: f32,
    /// Per-turn wall-clock deadline for the LLM call, in seconds.
    pub llm_timeout_secs: u64,

    /// Trailing window size for prompt assembly.
    pub max_history_messages: usize,
    /// Uncovered-message count that triggers summarisation.
    pub summary_threshold: u64,
    /// Minimum number of recent messages left out of the summary.
    pub summary_keep_tail: u64,

    /// Folder scanned for RAG documents on startup and reload.
    pub rag_docs_folder: PathBuf,
    /// Directory holding persisted vectors and index metadata.
    pub rag_index_dir: PathBuf,
    /// Number of passages retrieved per query.
    pub rag_top_k: usize,
    /// Passages scoring below this cosine similarity are omitted.
    pub rag_min_score: f64,
    /// Chunk size, in characters, used at ingestion.
    pub rag_chunk_size: usize,
    /// Chunk overlap, in characters.
    pub rag_chunk_overlap: usize,

    /// Path of the SQLite conversation store.
    pub database_path: PathBuf,

    /// Listener bind address.
    pub host: String,
    /// Listener bind port.
    pub port: u16,
    /// Log verbosity passed to the tracing filter.
    pub log_level: String,

    /// Inbound frames larger than this are rejected and the socket closed.
    pub max_frame_bytes: usize,
    /// Depth of each session's bounded outbound queue.
    pub outbound_queue_depth: usize,
    /// Grace window given to in-flight turns on shutdown, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Build configuration from an explicit key/value map.
    ///
    /// This is the full loading and validation path; `from_env` only
    /// collects the environment into a map first. Tests use this directly so
    /// they never mutate process-global state.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let chat_api_key = require(vars, "CHAT_API_KEY")?;
        let admin_api_key = require(vars, "ADMIN_API_KEY")?;

        let llm_provider = match vars.get("LLM_PROVIDER") {
            Some(v) => LlmProviderKind::parse(v)?,
            None => LlmProviderKind::OpenAi,
        };

        let database_path = match vars.get("DATABASE_PATH") {
            Some(p) => PathBuf::from(p),
            None => match vars.get("DATABASE_URL") {
                Some(url) => PathBuf::from(strip_sqlite_url(url)),
                None => PathBuf::from("chat.db"),
            },
        };

        let config = Config {
            chat_api_key,
            admin_api_key,
            llm_provider,
            openai_api_key: string_or(vars, "OPENAI_API_KEY", ""),
            anthropic_api_key: string_or(vars, "ANTHROPIC_API_KEY", ""),
            llm_model: vars.get("LLM_MODEL").filter(|m| !m.is_empty()).cloned(),
            llm_max_tokens: parse_or(vars, "LLM_MAX_TOKENS", 4096)?,
            llm_temperature: parse_or(vars, "LLM_TEMPERATURE", 0.7)?,
            llm_timeout_secs: parse_or(vars, "LLM_TIMEOUT_SECS", 60)?,
            max_history_messages: parse_or(vars, "MAX_HISTORY_MESSAGES", 50)?,
            summary_threshold: parse_or(vars, "SUMMARY_THRESHOLD", 30)?,
            summary_keep_tail: parse_or(vars, "SUMMARY_KEEP_TAIL", 8)?,
            rag_docs_folder: PathBuf::from(string_or(vars, "RAG_DOCS_FOLDER", "documents")),
            rag_index_dir: PathBuf::from(string_or(vars, "RAG_INDEX_DIR", "rag_index")),
            rag_top_k: parse_or(vars, "RAG_TOP_K", 3)?,
            rag_min_score: parse_or(vars, "RAG_MIN_SCORE", 0.0)?,
            rag_chunk_size: parse_or(vars, "RAG_CHUNK_SIZE", 2000)?,
            rag_chunk_overlap: parse_or(vars, "RAG_CHUNK_OVERLAP", 200)?,
            database_path,
            host: string_or(vars, "HOST", "0.0.0.0"),
            port: parse_or(vars, "PORT", 8000)?,
            log_level: string_or(vars, "LOG_LEVEL", "info"),
            max_frame_bytes: parse_or(vars, "MAX_FRAME_BYTES", 64 * 1024)?,
            outbound_queue_depth: parse_or(vars, "OUTBOUND_QUEUE_DEPTH", 32)?,
            shutdown_grace_secs: parse_or(vars, "SHUTDOWN_GRACE_SECS", 10)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_history_messages == 0 {
            return Err(LumenError::Config(
                "MAX_HISTORY_MESSAGES must be at least 1".to_string(),
            ));
        }
        if self.rag_chunk_overlap >= self.rag_chunk_size {
            return Err(LumenError::Config(format!(
                "RAG_CHUNK_OVERLAP ({}) must be smaller than RAG_CHUNK_SIZE ({})",
                self.rag_chunk_overlap, self.rag_chunk_size
            )));
        }
        if self.outbound_queue_depth == 0 {
            return Err(LumenError::Config(
                "OUTBOUND_QUEUE_DEPTH must be at least 1".to_string(),
            ));
        }
        let provider_key = match self.llm_provider {
            LlmProviderKind::OpenAi => &self.openai_api_key,
            LlmProviderKind::Anthropic => &self.anthropic_api_key,
        };
        if provider_key.is_empty() {
            tracing::warn!(
                provider = self.llm_provider.as_str(),
                "No API key configured for the selected LLM provider; calls will fail"
            );
        }
        Ok(())
    }

    /// API key credential for the currently selected provider.
    pub fn provider_api_key(&self) -> &str {
        match self.llm_provider {
            LlmProviderKind::OpenAi => &self.openai_api_key,
            LlmProviderKind::Anthropic => &self.anthropic_api_key,
        }
    }
}

fn require(vars: &HashMap<String, String>, key: &str) -> Result<String> {
    match vars.get(key) {
        Some(v) if !v.trim().is_empty() => Ok(v.clone()),
        _ => Err(LumenError::Config(format!("{} is required", key))),
    }
}

fn string_or(vars: &HashMap<String, String>, key: &str, default: &str) -> String {
    vars.get(key)
        .filter(|v| !v.is_empty())
        .cloned()
        .unwrap_or_else(|| default.to_string())
}

fn parse_or<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T> {
    match vars.get(key) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|_| {
            LumenError::Config(format!("{} has invalid value '{}'", key, raw))
        }),
        _ => Ok(default),
    }
}

/// Reduce a `sqlite://` style URL to a filesystem path.
///
/// Bare paths pass through unchanged so `DATABASE_URL=chat.db` also works.
fn strip_sqlite_url(url: &str) -> &str {
    url.strip_prefix("sqlite:///")
        .or_else(|| url.strip_prefix("sqlite://"))
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("CHAT_API_KEY".to_string(), "chat-key".to_string());
        vars.insert("ADMIN_API_KEY".to_string(), "admin-key".to_string());
        vars
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(&base_vars()).unwrap();
        assert_eq!(config.llm_provider, LlmProviderKind::OpenAi);
        assert_eq!(config.llm_max_tokens, 4096);
        assert_eq!(config.llm_timeout_secs, 60);
        assert_eq!(config.max_history_messages, 50);
        assert_eq!(config.summary_threshold, 30);
        assert_eq!(config.summary_keep_tail, 8);
        assert_eq!(config.rag_docs_folder, PathBuf::from("documents"));
        assert_eq!(config.rag_top_k, 3);
        assert_eq!(config.database_path, PathBuf::from("chat.db"));
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.max_frame_bytes, 65536);
        assert_eq!(config.outbound_queue_depth, 32);
    }

    #[test]
    fn test_missing_chat_api_key() {
        let mut vars = base_vars();
        vars.remove("CHAT_API_KEY");
        let err = Config::from_vars(&vars).unwrap_err();
        assert!(err.to_string().contains("CHAT_API_KEY"));
    }

    #[test]
    fn test_missing_admin_api_key() {
        let mut vars = base_vars();
        vars.remove("ADMIN_API_KEY");
        let err = Config::from_vars(&vars).unwrap_err();
        assert!(err.to_string().contains("ADMIN_API_KEY"));
    }

    #[test]
    fn test_blank_required_key_rejected() {
        let mut vars = base_vars();
        vars.insert("CHAT_API_KEY".to_string(), "   ".to_string());
        assert!(Config::from_vars(&vars).is_err());
    }

    #[test]
    fn test_provider_selection() {
        let mut vars = base_vars();
        vars.insert("LLM_PROVIDER".to_string(), "anthropic".to_string());
        vars.insert("ANTHROPIC_API_KEY".to_string(), "sk-ant".to_string());
        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.llm_provider, LlmProviderKind::Anthropic);
        assert_eq!(config.provider_api_key(), "sk-ant");
    }

    #[test]
    fn test_provider_case_insensitive() {
        let mut vars = base_vars();
        vars.insert("LLM_PROVIDER".to_string(), "OpenAI".to_string());
        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.llm_provider, LlmProviderKind::OpenAi);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let mut vars = base_vars();
        vars.insert("LLM_PROVIDER".to_string(), "cohere".to_string());
        let err = Config::from_vars(&vars).unwrap_err();
        assert!(err.to_string().contains("cohere"));
    }

    #[test]
    fn test_numeric_overrides() {
        let mut vars = base_vars();
        vars.insert("LLM_MAX_TOKENS".to_string(), "1024".to_string());
        vars.insert("MAX_HISTORY_MESSAGES".to_string(), "10".to_string());
        vars.insert("SUMMARY_THRESHOLD".to_string(), "3".to_string());
        vars.insert("PORT".to_string(), "9000".to_string());
        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.llm_max_tokens, 1024);
        assert_eq!(config.max_history_messages, 10);
        assert_eq!(config.summary_threshold, 3);
        assert_eq!(config.port, 9000);
    }

    #[test]
    fn test_invalid_numeric_value() {
        let mut vars = base_vars();
        vars.insert("PORT".to_string(), "not-a-port".to_string());
        let err = Config::from_vars(&vars).unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn test_database_url_sqlite_forms() {
        for (url, expected) in [
            ("sqlite:///data/chat.db", "data/chat.db"),
            ("sqlite://chat.db", "chat.db"),
            ("sqlite:chat.db", "chat.db"),
            ("plain/path.db", "plain/path.db"),
        ] {
            let mut vars = base_vars();
            vars.insert("DATABASE_URL".to_string(), url.to_string());
            let config = Config::from_vars(&vars).unwrap();
            assert_eq!(config.database_path, PathBuf::from(expected), "url: {}", url);
        }
    }

    #[test]
    fn test_database_path_wins_over_url() {
        let mut vars = base_vars();
        vars.insert("DATABASE_PATH".to_string(), "native.db".to_string());
        vars.insert("DATABASE_URL".to_string(), "sqlite:///other.db".to_string());
        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.database_path, PathBuf::from("native.db"));
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let mut vars = base_vars();
        vars.insert("RAG_CHUNK_SIZE".to_string(), "100".to_string());
        vars.insert("RAG_CHUNK_OVERLAP".to_string(), "100".to_string());
        assert!(Config::from_vars(&vars).is_err());
    }

    #[test]
    fn test_zero_history_window_rejected() {
        let mut vars = base_vars();
        vars.insert("MAX_HISTORY_MESSAGES".to_string(), "0".to_string());
        assert!(Config::from_vars(&vars).is_err());
    }

    #[test]
    fn test_zero_queue_depth_rejected() {
        let mut vars = base_vars();
        vars.insert("OUTBOUND_QUEUE_DEPTH".to_string(), "0".to_string());
        assert!(Config::from_vars(&vars).is_err());
    }

    #[test]
    fn test_llm_model_override() {
        let mut vars = base_vars();
        vars.insert("LLM_MODEL".to_string(), "gpt-4.1-mini".to_string());
        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.llm_model.as_deref(), Some("gpt-4.1-mini"));
    }

    #[test]
    fn test_empty_llm_model_is_none() {
        let mut vars = base_vars();
        vars.insert("LLM_MODEL".to_string(), String::new());
        let config = Config::from_vars(&vars).unwrap();
        assert!(config.llm_model.is_none());
    }
}
