//! Background rolling summarisation.
//!
//! Condenses the oldest uncovered prefix of a conversation into the rolling
//! summary, leaving at least `summary_keep_tail` recent messages
//! unsummarised. A per-conversation async lock prevents two summarisations
//! of the same conversation from interleaving; failures leave the prior
//! summary intact.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use lumen_core::error::LumenError;

use crate::engine::ConversationEngine;
use crate::prompt;

impl ConversationEngine {
    /// Launch summarisation for a conversation on a background task.
    pub(crate) fn spawn_summarisation(self: &Arc<Self>, conversation_id: Uuid) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = engine.summarize_conversation(conversation_id).await {
                warn!(
                    conversation_id = %conversation_id,
                    error = %e,
                    "Summarisation failed; previous summary left intact"
                );
            }
        });
    }

    /// Condense the uncovered prefix and atomically replace the summary.
    pub async fn summarize_conversation(&self, conversation_id: Uuid) -> Result<(), LumenError> {
        let lock = self.summary_lock(conversation_id);
        let _guard = lock.lock().await;

        // Re-read under the lock: a concurrent run may already have
        // advanced the coverage.
        let previous = self.store().latest_summary(conversation_id)?;
        let covered = previous.as_ref().map(|s| s.covered_upto_seq).unwrap_or(0);
        let max_seq = self.store().max_seq(conversation_id)?;
        let keep_tail = self.config().summary_keep_tail as i64;

        // The unsummarised suffix must keep at least `keep_tail` messages.
        let target = max_seq - keep_tail;
        if target <= covered {
            debug!(
                conversation_id = %conversation_id,
                covered, max_seq, "Nothing to summarise"
            );
            return Ok(());
        }

        let messages = self.store().load_range(conversation_id, covered, target)?;
        if messages.is_empty() {
            return Ok(());
        }

        let request = prompt::summary_request(
            &messages,
            previous.as_ref().map(|s| s.summary.as_str()),
            self.config().llm_max_tokens,
        );
        let summary = self
            .gateway()
            .complete(request)
            .await
            .map_err(|e| LumenError::Llm(e.to_string()))?;
        let summary = summary.trim();
        if summary.is_empty() {
            warn!(conversation_id = %conversation_id, "Summariser returned empty text; keeping previous summary");
            return Ok(());
        }

        self.store()
            .update_summary(conversation_id, summary, target)?;
        info!(
            conversation_id = %conversation_id,
            covered_upto_seq = target,
            messages = messages.len(),
            "Rolling summary updated"
        );
        Ok(())
    }

    fn summary_lock(&self, conversation_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = match self.summary_locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(locks.entry(conversation_id).or_default())
    }
}
