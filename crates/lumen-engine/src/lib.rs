//! Conversation engine.
//!
//! Given a bound conversation and a new user message, produces a streamed
//! assistant reply that is persisted, emotion-segmented, and
//! source-attributed, then triggers rolling summarisation in the
//! background when the uncovered history grows past the threshold.

pub mod engine;
pub mod error;
pub mod prompt;
pub mod segmenter;
mod summarize;

pub use engine::{ConversationEngine, TurnOutcome};
pub use error::EngineError;
pub use segmenter::{EmotionSegmenter, Segment};
