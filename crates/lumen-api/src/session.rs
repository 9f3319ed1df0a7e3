//! WebSocket session manager.
//!
//! One task per accepted connection. The session authenticates the
//! upgrade, decodes inbound frames, enforces the conversation state
//! machine, hands user messages to the engine, and writes outgoing frames
//! through a bounded FIFO queue (the engine blocks on a full queue, it
//! never drops).
//!
//! ```text
//! Connected ──start_conversation──▶ ConversationBound
//! ConversationBound ──user_message──▶ Responding
//! Responding ──(last segment sent)──▶ ConversationBound
//! Responding ──user_message──▶ (cancel) ──▶ Responding
//! any ──disconnect/error──▶ Closing
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{RawQuery, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures_util::future::OptionFuture;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use lumen_core::types::{ClientFrame, ErrorCode, ServerFrame};
use lumen_engine::EngineError;
use lumen_storage::ConversationStore;

use crate::auth;
use crate::state::AppState;

const CLOSE_NORMAL: u16 = 1000;
const CLOSE_GOING_AWAY: u16 = 1001;
const CLOSE_POLICY_VIOLATION: u16 = 1008;
const CLOSE_TOO_LARGE: u16 = 1009;

/// Coarse per-session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Connected,
    ConversationBound,
    Responding,
    Closing,
}

/// In-memory state of one connection.
struct Session {
    state: SessionState,
    conversation: Option<Uuid>,
}

/// An in-flight assistant turn.
struct Turn {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// What the inbound handler wants the session loop to do next.
enum Flow {
    Continue,
    Close(u16, &'static str),
    /// The outbound queue is gone; the socket is effectively dead.
    Closed,
}

/// One wake-up of the session loop.
enum Event {
    Shutdown,
    TurnDone,
    Incoming(Option<Result<Message, axum::Error>>),
}

/// Close frame chosen by the session loop, delivered by the writer after
/// the queue drains so frame order is preserved.
type CloseCell = Arc<Mutex<Option<(u16, String)>>>;

/// `GET /ws` upgrade endpoint.
///
/// Authentication happens before any frame is processed: an invalid or
/// missing token closes the socket with code 1008 immediately after the
/// upgrade completes.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    let credentials = auth::extract_ws_token(&headers, query.as_deref());
    let authorized = credentials.token.as_deref() == Some(state.config.chat_api_key.as_str());

    let ws = if credentials.subprotocol.is_some() {
        ws.protocols(["chat"])
    } else {
        ws
    };

    ws.on_upgrade(move |socket| async move {
        if !authorized {
            warn!("WebSocket connection with invalid or missing API key");
            refuse(socket).await;
            return;
        }
        run_session(socket, state).await;
    })
}

async fn refuse(mut socket: WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_POLICY_VIOLATION,
            reason: "Invalid or missing API key".into(),
        })))
        .await;
}

async fn run_session(socket: WebSocket, state: AppState) {
    let session_id = Uuid::new_v4();
    info!(session_id = %session_id, "WebSocket session connected");

    let (sink, mut inbound) = socket.split();
    let (outbound_tx, outbound_rx) =
        mpsc::channel::<ServerFrame>(state.config.outbound_queue_depth);
    let close_cell: CloseCell = Arc::new(Mutex::new(None));
    let writer = tokio::spawn(write_loop(sink, outbound_rx, Arc::clone(&close_cell)));

    let mut session = Session {
        state: SessionState::Connected,
        conversation: None,
    };
    let mut turn: Option<Turn> = None;

    let close_with: Option<(u16, &'static str)> = loop {
        // The turn future borrows `turn`, so select into an event first
        // and act on session state afterwards.
        let event = {
            let turn_done: OptionFuture<_> = turn.as_mut().map(|t| &mut t.handle).into();
            tokio::select! {
                biased;
                _ = state.shutdown.cancelled() => Event::Shutdown,
                Some(_) = turn_done => Event::TurnDone,
                incoming = inbound.next() => Event::Incoming(incoming),
            }
        };

        match event {
            Event::Shutdown => {
                // Grace window: let the in-flight turn finish, then cancel.
                if let Some(active) = turn.take() {
                    let grace = Duration::from_secs(state.config.shutdown_grace_secs);
                    let mut handle = active.handle;
                    tokio::select! {
                        _ = &mut handle => {}
                        _ = tokio::time::sleep(grace) => {
                            debug!(session_id = %session_id, "Grace window expired; cancelling turn");
                            active.cancel.cancel();
                            let _ = handle.await;
                        }
                    }
                }
                break Some((CLOSE_GOING_AWAY, "Server shutting down"));
            }
            Event::TurnDone => {
                turn = None;
                if session.state == SessionState::Responding {
                    session.state = SessionState::ConversationBound;
                }
            }
            Event::Incoming(Some(Ok(Message::Text(text)))) => {
                match handle_text(&state, &mut session, &mut turn, &outbound_tx, text.as_str())
                    .await
                {
                    Flow::Continue => {}
                    Flow::Close(code, reason) => break Some((code, reason)),
                    Flow::Closed => break None,
                }
            }
            Event::Incoming(Some(Ok(Message::Close(_)))) | Event::Incoming(None) => break None,
            Event::Incoming(Some(Ok(_))) => {} // binary frames and pings are ignored
            Event::Incoming(Some(Err(e))) => {
                debug!(session_id = %session_id, error = %e, "WebSocket read error");
                break None;
            }
        }
    };

    // Transport errors and closes are terminal: cancel whatever is in
    // flight; nothing persisted is rolled back.
    session.state = SessionState::Closing;
    if let Some(active) = turn.take() {
        active.cancel.cancel();
        let _ = active.handle.await;
    }

    if let Some((code, reason)) = close_with {
        if let Ok(mut cell) = close_cell.lock() {
            *cell = Some((code, reason.to_string()));
        }
    }
    drop(outbound_tx);
    let _ = writer.await;
    info!(session_id = %session_id, "WebSocket session closed");
}

/// Drain the outbound queue onto the socket in FIFO order, then deliver
/// the close frame.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<ServerFrame>,
    close: CloseCell,
) {
    while let Some(frame) = outbound.recv().await {
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Failed to serialize outbound frame");
                continue;
            }
        };
        if sink.send(Message::Text(text.into())).await.is_err() {
            // Socket write failed: close the queue so senders (including an
            // in-flight turn) observe closure and stop.
            outbound.close();
            return;
        }
    }

    let (code, reason) = close
        .lock()
        .ok()
        .and_then(|cell| cell.clone())
        .unwrap_or((CLOSE_NORMAL, String::new()));
    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}

async fn handle_text(
    state: &AppState,
    session: &mut Session,
    turn: &mut Option<Turn>,
    outbound: &mpsc::Sender<ServerFrame>,
    text: &str,
) -> Flow {
    if text.len() > state.config.max_frame_bytes {
        let frame = ServerFrame::error(
            "Message exceeds the maximum frame size.",
            Some(ErrorCode::MessageTooLong),
        );
        if outbound.send(frame).await.is_err() {
            return Flow::Closed;
        }
        return Flow::Close(CLOSE_TOO_LARGE, "Frame exceeds size limit");
    }

    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(error = %e, "Undecodable client frame");
            let reply = ServerFrame::error("Unsupported or malformed message.", None);
            return send_or_closed(outbound, reply).await;
        }
    };

    match frame {
        ClientFrame::StartConversation { conversation_id } => {
            // Rebinding while a turn is in flight cancels it first.
            cancel_turn(turn).await;
            if session.state == SessionState::Responding {
                session.state = SessionState::ConversationBound;
            }
            let reply = bind_conversation(&state.store, session, conversation_id);
            send_or_closed(outbound, reply).await
        }
        ClientFrame::UserMessage { content } => {
            let Some(conversation_id) = session.conversation else {
                let reply = ServerFrame::error(
                    "No active conversation. Please start a conversation first.",
                    Some(ErrorCode::NoActiveConversation),
                );
                return send_or_closed(outbound, reply).await;
            };

            // A new user message while responding cancels the previous
            // turn before the next one starts; segments it already
            // persisted remain.
            cancel_turn(turn).await;

            let cancel = CancellationToken::new();
            let task_cancel = cancel.clone();
            let engine = Arc::clone(&state.engine);
            let tx = outbound.clone();
            let handle = tokio::spawn(async move {
                match engine
                    .run_turn(conversation_id, &content, &tx, &task_cancel)
                    .await
                {
                    Ok(outcome) => {
                        debug!(
                            conversation_id = %conversation_id,
                            segments = outcome.segments_emitted,
                            cancelled = outcome.cancelled,
                            "Turn finished"
                        );
                    }
                    Err(EngineError::Store(e)) => {
                        warn!(conversation_id = %conversation_id, error = %e, "Turn failed to start");
                        let reply = ServerFrame::error(
                            "Failed to process your message.",
                            Some(ErrorCode::InternalError),
                        );
                        let _ = tx.send(reply).await;
                    }
                    Err(EngineError::SinkClosed) => {}
                }
            });
            *turn = Some(Turn { cancel, handle });
            session.state = SessionState::Responding;
            Flow::Continue
        }
    }
}

/// Resolve a start_conversation request against the store.
///
/// Binds the session on success; on failure the session keeps its previous
/// binding and state.
fn bind_conversation(
    store: &ConversationStore,
    session: &mut Session,
    requested: Option<String>,
) -> ServerFrame {
    let resolved = match requested {
        Some(raw) => match Uuid::parse_str(raw.trim()) {
            Ok(id) => match store.get(id) {
                Ok(Some(_)) => Ok(id),
                Ok(None) => Err(ServerFrame::error(
                    "Conversation not found.",
                    Some(ErrorCode::ConversationNotFound),
                )),
                Err(e) => {
                    warn!(error = %e, "Store error while resolving conversation");
                    Err(ServerFrame::error(
                        "Failed to look up the conversation.",
                        Some(ErrorCode::InternalError),
                    ))
                }
            },
            Err(_) => Err(ServerFrame::error(
                "Conversation not found.",
                Some(ErrorCode::ConversationNotFound),
            )),
        },
        None => match store.create_conversation() {
            Ok(id) => Ok(id),
            Err(e) => {
                warn!(error = %e, "Failed to create conversation");
                Err(ServerFrame::error(
                    "Failed to create a conversation.",
                    Some(ErrorCode::InternalError),
                ))
            }
        },
    };

    match resolved {
        Ok(id) => {
            session.conversation = Some(id);
            if session.state == SessionState::Connected {
                session.state = SessionState::ConversationBound;
            }
            ServerFrame::ConversationStarted {
                conversation_id: id.to_string(),
            }
        }
        Err(frame) => frame,
    }
}

async fn cancel_turn(turn: &mut Option<Turn>) {
    if let Some(active) = turn.take() {
        active.cancel.cancel();
        // Await completion so no frame from the cancelled turn can trail
        // the next turn's first frame.
        let _ = active.handle.await;
    }
}

async fn send_or_closed(outbound: &mpsc::Sender<ServerFrame>, frame: ServerFrame) -> Flow {
    if outbound.send(frame).await.is_err() {
        Flow::Closed
    } else {
        Flow::Continue
    }
}
