//! Prompt assembly and the built-in instruction texts.
//!
//! Assembly order is deterministic: stored system prompt, rolling summary,
//! retrieved passages, trailing message window, then the new user message.
//! Contributing document ids are tracked out-of-band by the engine, never
//! inside the prompt.

use lumen_core::types::Role;
use lumen_llm::{ChatMessage, ChatRequest, ChatRole};
use lumen_retrieval::Passage;
use lumen_storage::StoredMessage;

/// Settings key under which the admin-editable system prompt is stored.
pub const PROMPT_SETTING_KEY: &str = "prompt";

/// Default system prompt, used until an admin stores their own.
///
/// Instructs the model to interleave emotion markers that the segmenter
/// cuts on.
pub const BASE_SYSTEM_PROMPT: &str = "\
You are a warm, attentive conversational assistant whose replies drive a \
speaking avatar. Answer in short spoken-style sentences.

Tag the tone of your reply by inserting emotion markers of the exact form \
[[emotion:<name>]] directly before the text that carries that tone. Text \
before the first marker is read as neutral. Use only these names:
- neutral: standard informational content
- happy: positive or celebratory content
- excited: enthusiastic, energetic responses
- thoughtful: analytical, contemplative content
- curious: questioning, exploring ideas
- confident: assertive, certain statements
- concerned: addressing problems or warnings
- empathetic: understanding, supportive content

Change the marker only when the tone actually shifts; two to five marked \
spans per reply is typical. Never mention the markers themselves.";

/// Fixed sentence emitted when a turn produces no usable text.
pub const FALLBACK_REPLY: &str = "I'm sorry, I didn't manage to put that into words. Could you rephrase?";

/// Apology emitted as the terminal segment when the LLM call fails or
/// times out.
pub const LLM_ERROR_REPLY: &str =
    "I'm sorry, something went wrong while I was thinking. Please try again.";

const SUMMARY_DELIMITER: &str = "Previous conversation summary:";
const RAG_DELIMITER: &str = "Relevant context from documents:";
const PASSAGE_SEPARATOR: &str = "\n---\n";

/// Everything that feeds one turn's prompt.
#[derive(Debug)]
pub struct PromptInputs<'a> {
    pub system_prompt: &'a str,
    pub summary: Option<&'a str>,
    pub history: &'a [StoredMessage],
    pub passages: &'a [Passage],
    pub user_message: &'a str,
}

/// Assemble the full generation request for one turn.
pub fn assemble(inputs: &PromptInputs<'_>, max_tokens: u32, temperature: f32) -> ChatRequest {
    let mut system = String::from(inputs.system_prompt);

    if let Some(summary) = inputs.summary {
        let summary = summary.trim();
        if !summary.is_empty() {
            system.push_str("\n\n");
            system.push_str(SUMMARY_DELIMITER);
            system.push('\n');
            system.push_str(summary);
        }
    }

    if !inputs.passages.is_empty() {
        let joined = inputs
            .passages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join(PASSAGE_SEPARATOR);
        system.push_str("\n\n");
        system.push_str(RAG_DELIMITER);
        system.push('\n');
        system.push_str(&joined);
    }

    let mut messages: Vec<ChatMessage> = inputs
        .history
        .iter()
        .filter_map(|msg| match msg.role {
            Role::User => Some(ChatMessage::user(msg.content.clone())),
            Role::Assistant => Some(ChatMessage::assistant(msg.content.clone())),
            // Stored system messages never re-enter the prompt; the system
            // prompt is rebuilt fresh each turn.
            Role::System => None,
        })
        .collect();
    messages.push(ChatMessage::user(inputs.user_message));

    ChatRequest::new(system, messages).with_limits(max_tokens, temperature)
}

/// Build the summarisation request for the covered message range.
pub fn summary_request(
    messages: &[StoredMessage],
    previous_summary: Option<&str>,
    max_tokens: u32,
) -> ChatRequest {
    let transcript = messages
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str(), m.content))
        .collect::<Vec<_>>()
        .join("\n");

    let instruction = match previous_summary.filter(|s| !s.trim().is_empty()) {
        Some(previous) => format!(
            "Update a running conversation summary.\n\n\
             Current summary of the earlier conversation:\n{}\n\n\
             New messages to fold in:\n{}\n\n\
             Produce one updated summary that keeps the key points of the \
             current summary, adds what matters from the new messages, and \
             stays under four sentences. Reply with the summary only.",
            previous, transcript
        ),
        None => format!(
            "Summarise this conversation in two to three sentences, keeping \
             the main topics, decisions, and anything needed to continue the \
             conversation later. Reply with the summary only.\n\n{}",
            transcript
        ),
    };

    ChatRequest::new(String::new(), vec![ChatMessage::user(instruction)])
        .with_limits(max_tokens, 0.2)
}
