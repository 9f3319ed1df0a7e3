//! The turn driver.
//!
//! One call to [`ConversationEngine::run_turn`] handles a complete
//! user-message → assistant-segments cycle: persist the user message, gather
//! summary/history/passages, stream the LLM reply through the emotion
//! segmenter, persist and emit each segment, and trigger background
//! summarisation afterwards.
//!
//! Every segment is persisted before it is emitted, and cancellation is only
//! observed between provider chunks, so the set of persisted segments always
//! equals the set of emitted ones — including for cancelled turns.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use lumen_core::config::Config;
use lumen_core::error::LumenError;
use lumen_core::types::{now_rfc3339, Emotion, ErrorCode, FrameMetadata, ServerFrame};
use lumen_llm::LlmGateway;
use lumen_retrieval::RetrievalStore;
use lumen_storage::{ConversationStore, NewMessage};

use crate::error::EngineError;
use crate::prompt::{self, PromptInputs};
use crate::segmenter::{EmotionSegmenter, Segment};

/// What a completed turn did.
#[derive(Debug, Clone, Copy)]
pub struct TurnOutcome {
    pub chunk_id: Uuid,
    pub segments_emitted: usize,
    pub cancelled: bool,
}

/// How the streaming phase of a turn ended.
enum TurnEnd {
    Done,
    Cancelled,
    Failed,
}

enum FlushError {
    Store(LumenError),
    SinkClosed,
}

struct TurnCtx<'a> {
    conversation_id: Uuid,
    chunk_id: Uuid,
    sources: Vec<String>,
    outbound: &'a mpsc::Sender<ServerFrame>,
}

/// Per-conversation state machine driver shared by all sessions.
pub struct ConversationEngine {
    store: Arc<ConversationStore>,
    retrieval: Arc<RetrievalStore>,
    gateway: Arc<dyn LlmGateway>,
    config: Arc<Config>,
    pub(crate) summary_locks: std::sync::Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl ConversationEngine {
    pub fn new(
        store: Arc<ConversationStore>,
        retrieval: Arc<RetrievalStore>,
        gateway: Arc<dyn LlmGateway>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            retrieval,
            gateway,
            config,
            summary_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub(crate) fn gateway(&self) -> &dyn LlmGateway {
        self.gateway.as_ref()
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    /// Drive one assistant turn for a bound conversation.
    ///
    /// Returns `Err` only if the user message could not be appended (the
    /// turn never started); every later failure is converted into
    /// user-visible frames here. Cancelling `cancel` stops the provider
    /// stream; segments persisted so far remain and the buffered remainder
    /// is flushed as the final segment.
    pub async fn run_turn(
        self: &Arc<Self>,
        conversation_id: Uuid,
        user_message: &str,
        outbound: &mpsc::Sender<ServerFrame>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, EngineError> {
        let user_seq = self
            .store
            .append_message(conversation_id, &NewMessage::user(user_message))?;

        let chunk_id = Uuid::new_v4();
        let (request, sources) = self
            .build_request(conversation_id, user_seq, user_message)
            .await;

        let ctx = TurnCtx {
            conversation_id,
            chunk_id,
            sources,
            outbound,
        };

        let deadline = tokio::time::sleep(Duration::from_secs(self.config.llm_timeout_secs));
        tokio::pin!(deadline);

        // Connect to the provider, racing cancellation and the deadline.
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Ok(TurnOutcome { chunk_id, segments_emitted: 0, cancelled: true });
            }
            () = &mut deadline => {
                warn!(conversation_id = %conversation_id, "LLM call timed out before connecting");
                let emitted = self.emit_failure_reply(&ctx, 0).await;
                return Ok(TurnOutcome { chunk_id, segments_emitted: emitted, cancelled: false });
            }
            result = self.gateway.stream_chat(request) => match result {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(conversation_id = %conversation_id, error = %e, "LLM call failed");
                    let emitted = self.emit_failure_reply(&ctx, 0).await;
                    return Ok(TurnOutcome { chunk_id, segments_emitted: emitted, cancelled: false });
                }
            }
        };

        let mut segmenter = EmotionSegmenter::new();
        // The most recent completed segment is held back one step so the
        // last one can carry `is_final`.
        let mut held: Option<Segment> = None;
        let mut emitted = 0usize;

        let end = 'stream: loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break 'stream TurnEnd::Cancelled,
                () = &mut deadline => {
                    warn!(conversation_id = %conversation_id, "Turn deadline expired mid-stream");
                    break 'stream TurnEnd::Failed;
                }
                next = stream.next() => match next {
                    Some(Ok(chunk)) => {
                        for segment in segmenter.push(&chunk) {
                            if let Some(previous) = held.replace(segment) {
                                match self.flush(&ctx, previous, false).await {
                                    Ok(()) => emitted += 1,
                                    Err(FlushError::Store(e)) => {
                                        self.emit_store_error(&ctx, e).await;
                                        return Ok(TurnOutcome { chunk_id, segments_emitted: emitted, cancelled: false });
                                    }
                                    Err(FlushError::SinkClosed) => return Err(EngineError::SinkClosed),
                                }
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(conversation_id = %conversation_id, error = %e, "LLM stream error");
                        break 'stream TurnEnd::Failed;
                    }
                    None => break 'stream TurnEnd::Done,
                }
            }
        };

        // Drop the provider stream promptly on cancellation/failure so the
        // underlying connection closes.
        drop(stream);

        let outcome = match end {
            TurnEnd::Done => {
                let mut tail: Vec<(Segment, bool)> = Vec::new();
                match segmenter.finish() {
                    Some(last) => {
                        if let Some(previous) = held.take() {
                            tail.push((previous, false));
                        }
                        tail.push((last, true));
                    }
                    None => {
                        if let Some(previous) = held.take() {
                            tail.push((previous, true));
                        }
                    }
                }
                if tail.is_empty() && emitted == 0 {
                    // The stream yielded nothing usable.
                    tail.push((
                        Segment {
                            content: prompt::FALLBACK_REPLY.to_string(),
                            emotion: Emotion::Neutral,
                        },
                        true,
                    ));
                }
                for (segment, is_final) in tail {
                    match self.flush(&ctx, segment, is_final).await {
                        Ok(()) => emitted += 1,
                        Err(FlushError::Store(e)) => {
                            self.emit_store_error(&ctx, e).await;
                            return Ok(TurnOutcome { chunk_id, segments_emitted: emitted, cancelled: false });
                        }
                        Err(FlushError::SinkClosed) => return Err(EngineError::SinkClosed),
                    }
                }

                self.maybe_spawn_summarisation(conversation_id);
                TurnOutcome { chunk_id, segments_emitted: emitted, cancelled: false }
            }
            TurnEnd::Cancelled => {
                // Flush what was already complete, plus the partial buffer,
                // marking the last flushed segment final.
                let partial = segmenter.finish();
                let mut tail: Vec<(Segment, bool)> = Vec::new();
                match (held.take(), partial) {
                    (Some(previous), Some(last)) => {
                        tail.push((previous, false));
                        tail.push((last, true));
                    }
                    (Some(previous), None) => tail.push((previous, true)),
                    (None, Some(last)) => tail.push((last, true)),
                    (None, None) => {}
                }
                for (segment, is_final) in tail {
                    match self.flush(&ctx, segment, is_final).await {
                        Ok(()) => emitted += 1,
                        Err(FlushError::Store(e)) => {
                            warn!(error = %e, "Failed to persist tail of cancelled turn");
                            break;
                        }
                        Err(FlushError::SinkClosed) => return Err(EngineError::SinkClosed),
                    }
                }
                debug!(conversation_id = %conversation_id, segments = emitted, "Turn cancelled");
                TurnOutcome { chunk_id, segments_emitted: emitted, cancelled: true }
            }
            TurnEnd::Failed => {
                // A completed-but-held segment is still well-formed; deliver
                // it before the terminal apology. The partial buffer is
                // discarded.
                if let Some(previous) = held.take() {
                    match self.flush(&ctx, previous, false).await {
                        Ok(()) => emitted += 1,
                        Err(FlushError::SinkClosed) => return Err(EngineError::SinkClosed),
                        Err(FlushError::Store(e)) => {
                            warn!(error = %e, "Failed to persist held segment before apology");
                        }
                    }
                }
                let emitted = self.emit_failure_reply(&ctx, emitted).await;
                TurnOutcome { chunk_id, segments_emitted: emitted, cancelled: false }
            }
        };

        Ok(outcome)
    }

    /// Gather prompt inputs and assemble the request plus the source ids.
    async fn build_request(
        &self,
        conversation_id: Uuid,
        user_seq: i64,
        user_message: &str,
    ) -> (lumen_llm::ChatRequest, Vec<String>) {
        // The admin-configured prompt is fetched fresh each turn so edits
        // take effect on the next turn.
        let system_prompt = match self.store.get_setting(prompt::PROMPT_SETTING_KEY) {
            Ok(Some(stored)) if !stored.trim().is_empty() => stored,
            Ok(_) => {
                if let Err(e) = self
                    .store
                    .set_setting(prompt::PROMPT_SETTING_KEY, prompt::BASE_SYSTEM_PROMPT)
                {
                    warn!(error = %e, "Failed to persist default system prompt");
                }
                prompt::BASE_SYSTEM_PROMPT.to_string()
            }
            Err(e) => {
                warn!(error = %e, "Failed to load system prompt; using default");
                prompt::BASE_SYSTEM_PROMPT.to_string()
            }
        };

        let summary = match self.store.latest_summary(conversation_id) {
            Ok(row) => row,
            Err(e) => {
                warn!(error = %e, "Failed to load summary; continuing without it");
                None
            }
        };
        let covered = summary.as_ref().map(|s| s.covered_upto_seq).unwrap_or(0);

        let mut history = match self.store.load_window(
            conversation_id,
            self.config.max_history_messages,
            covered,
        ) {
            Ok(messages) => messages,
            Err(e) => {
                warn!(error = %e, "Failed to load history window");
                Vec::new()
            }
        };
        // The new user message is appended explicitly below.
        history.retain(|m| m.seq < user_seq);

        // Retrieval failures degrade silently: the reply just goes
        // unaugmented with an empty sources list.
        let passages = match self
            .retrieval
            .query(user_message, self.config.rag_top_k)
            .await
        {
            Ok(passages) => passages,
            Err(e) => {
                warn!(error = %e, "RAG query failed; continuing without passages");
                Vec::new()
            }
        };

        let mut sources: Vec<String> = Vec::new();
        for passage in &passages {
            if !sources.contains(&passage.document_id) {
                sources.push(passage.document_id.clone());
            }
        }

        let request = prompt::assemble(
            &PromptInputs {
                system_prompt: &system_prompt,
                summary: summary.as_ref().map(|s| s.summary.as_str()),
                history: &history,
                passages: &passages,
                user_message,
            },
            self.config.llm_max_tokens,
            self.config.llm_temperature,
        );
        (request, sources)
    }

    /// Persist one segment, then emit it. Persist-first keeps the persisted
    /// and emitted sets identical at every cancellation point.
    async fn flush(
        &self,
        ctx: &TurnCtx<'_>,
        segment: Segment,
        is_final: bool,
    ) -> Result<(), FlushError> {
        self.store
            .append_message(
                ctx.conversation_id,
                &NewMessage::assistant(
                    segment.content.clone(),
                    segment.emotion,
                    ctx.sources.clone(),
                    ctx.chunk_id,
                ),
            )
            .map_err(FlushError::Store)?;

        let frame = ServerFrame::Message {
            content: segment.content,
            emotion: segment.emotion,
            chunk_id: ctx.chunk_id.to_string(),
            is_final,
            metadata: FrameMetadata {
                conversation_id: ctx.conversation_id.to_string(),
                timestamp: now_rfc3339(),
                sources: ctx.sources.clone(),
            },
        };
        ctx.outbound
            .send(frame)
            .await
            .map_err(|_| FlushError::SinkClosed)
    }

    /// Terminal apology for LLM failures and timeouts; counts toward the
    /// emitted total so the caller's bookkeeping stays right.
    async fn emit_failure_reply(&self, ctx: &TurnCtx<'_>, emitted: usize) -> usize {
        let apology = Segment {
            content: prompt::LLM_ERROR_REPLY.to_string(),
            emotion: Emotion::Concerned,
        };
        match self.flush(ctx, apology, true).await {
            Ok(()) => emitted + 1,
            Err(FlushError::Store(e)) => {
                self.emit_store_error(ctx, e).await;
                emitted
            }
            Err(FlushError::SinkClosed) => emitted,
        }
    }

    /// Store failures mid-turn end the turn with an error frame; the
    /// session survives.
    async fn emit_store_error(&self, ctx: &TurnCtx<'_>, error: LumenError) {
        warn!(conversation_id = %ctx.conversation_id, error = %error, "Store error mid-turn");
        let frame = ServerFrame::error(
            "Something went wrong while saving the reply.",
            Some(ErrorCode::InternalError),
        );
        let _ = ctx.outbound.send(frame).await;
    }

    fn maybe_spawn_summarisation(self: &Arc<Self>, conversation_id: Uuid) {
        let uncovered = match self.store.count_uncovered(conversation_id) {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Failed to count uncovered messages");
                return;
            }
        };
        if uncovered > self.config.summary_threshold as i64 {
            self.spawn_summarisation(conversation_id);
        }
    }
}
