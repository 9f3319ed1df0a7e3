//! Wire-protocol types for the client WebSocket.
//!
//! Every frame is a single JSON object with a `type` discriminator. Inbound
//! frames deserialize into [`ClientFrame`]; outbound frames serialize from
//! [`ServerFrame`]. Unknown discriminators fail to parse and are answered
//! with an `error` frame without tearing down the session.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Emotion label carried by each assistant segment.
///
/// The vocabulary is closed; anything else degrades to `Neutral`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    #[default]
    Neutral,
    Happy,
    Excited,
    Thoughtful,
    Curious,
    Confident,
    Concerned,
    Empathetic,
}

impl Emotion {
    /// Parse an emotion name, accepting a handful of close synonyms the
    /// model tends to produce. Unknown names degrade to `Neutral`.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "neutral" => Emotion::Neutral,
            "happy" | "positive" => Emotion::Happy,
            "excited" | "enthusiastic" => Emotion::Excited,
            "thoughtful" | "analytical" => Emotion::Thoughtful,
            "curious" | "questioning" => Emotion::Curious,
            "confident" => Emotion::Confident,
            "concerned" | "sad" | "worried" | "negative" => Emotion::Concerned,
            "empathetic" | "supportive" | "caring" => Emotion::Empathetic,
            _ => Emotion::Neutral,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Neutral => "neutral",
            Emotion::Happy => "happy",
            Emotion::Excited => "excited",
            Emotion::Thoughtful => "thoughtful",
            Emotion::Curious => "curious",
            Emotion::Confident => "confident",
            Emotion::Concerned => "concerned",
            Emotion::Empathetic => "empathetic",
        }
    }
}

impl std::fmt::Display for Emotion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a stored conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    /// Parse a stored role string.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

/// Machine-readable error code attached to `error` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidApiKey,
    NoActiveConversation,
    MessageTooLong,
    ConversationNotFound,
    InternalError,
}

/// Frame sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Bind the session to an existing conversation or create a new one.
    StartConversation {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
    },
    /// A user utterance for the bound conversation.
    UserMessage { content: String },
}

/// Metadata attached to every `message` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMetadata {
    pub conversation_id: String,
    /// ISO-8601 UTC timestamp with millisecond precision.
    pub timestamp: String,
    /// Document ids that contributed retrieved passages to this turn.
    pub sources: Vec<String>,
}

/// Metadata attached to `error` frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMetadata {
    pub error_code: ErrorCode,
}

/// Frame sent to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    ConversationStarted {
        conversation_id: String,
    },
    Message {
        content: String,
        emotion: Emotion,
        chunk_id: String,
        is_final: bool,
        metadata: FrameMetadata,
    },
    Error {
        content: String,
        emotion: Emotion,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<ErrorMetadata>,
    },
}

impl ServerFrame {
    /// Build an `error` frame; the emotion is always `concerned`.
    pub fn error(content: impl Into<String>, code: Option<ErrorCode>) -> Self {
        ServerFrame::Error {
            content: content.into(),
            emotion: Emotion::Concerned,
            metadata: code.map(|error_code| ErrorMetadata { error_code }),
        }
    }

    /// True for the terminal frame of an assistant turn.
    pub fn is_final(&self) -> bool {
        matches!(self, ServerFrame::Message { is_final: true, .. })
    }
}

/// Current UTC time in the wire format: RFC 3339, milliseconds, `Z` suffix.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
