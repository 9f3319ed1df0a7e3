//! Conversation store: conversations, ordered messages, rolling summaries,
//! and admin settings.
//!
//! Appends are serialised by the connection mutex and committed inside a
//! transaction, so sequence numbers are gap-free per conversation and reads
//! only observe durable appends.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lumen_core::error::LumenError;
use lumen_core::types::{Emotion, Role};

use crate::db::Database;

/// A message to be appended to a conversation.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    pub emotion: Option<Emotion>,
    pub sources: Vec<String>,
    pub chunk_id: Option<Uuid>,
}

impl NewMessage {
    /// A plain user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            emotion: None,
            sources: Vec::new(),
            chunk_id: None,
        }
    }

    /// One emitted assistant segment.
    pub fn assistant(
        content: impl Into<String>,
        emotion: Emotion,
        sources: Vec<String>,
        chunk_id: Uuid,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            emotion: Some(emotion),
            sources,
            chunk_id: Some(chunk_id),
        }
    }
}

/// A message as stored, with its assigned sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub seq: i64,
    pub role: Role,
    pub content: String,
    pub emotion: Option<Emotion>,
    pub sources: Vec<String>,
    pub chunk_id: Option<String>,
    pub created_at: i64,
}

/// Conversation identity row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRow {
    pub id: Uuid,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Row returned by the admin listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationListRow {
    pub id: Uuid,
    pub created_at: i64,
    pub updated_at: i64,
    pub message_count: i64,
}

/// The rolling summary of a conversation, covering the message prefix up to
/// `covered_upto_seq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub summary: String,
    pub covered_upto_seq: i64,
    pub version: i64,
    pub updated_at: i64,
}

/// Full conversation dump for the admin download endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationExport {
    pub id: Uuid,
    pub created_at: i64,
    pub updated_at: i64,
    pub summary: Option<SummaryRow>,
    pub messages: Vec<StoredMessage>,
}

/// SQLite-backed store for conversations and their messages.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    db: Arc<Database>,
}

impl ConversationStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create a new empty conversation and return its id.
    pub fn create_conversation(&self) -> Result<Uuid, LumenError> {
        let id = Uuid::new_v4();
        let now = Utc::now().timestamp();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, created_at, updated_at) VALUES (?1, ?2, ?2)",
                params![id.to_string(), now],
            )
            .map_err(|e| LumenError::Storage(format!("Failed to create conversation: {}", e)))?;
            Ok(())
        })?;
        Ok(id)
    }

    /// Look up a conversation by id.
    pub fn get(&self, id: Uuid) -> Result<Option<ConversationRow>, LumenError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, created_at, updated_at FROM conversations WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok(ConversationRow {
                        id,
                        created_at: row.get(1)?,
                        updated_at: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(|e| LumenError::Storage(e.to_string()))
        })
    }

    /// Append a message, returning its assigned sequence number.
    ///
    /// Runs in a transaction so the seq assignment and the insert commit
    /// together; the connection mutex serialises concurrent appends.
    pub fn append_message(&self, conversation_id: Uuid, msg: &NewMessage) -> Result<i64, LumenError> {
        let now = Utc::now().timestamp();
        let sources_json = serde_json::to_string(&msg.sources)?;
        self.db.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| LumenError::Storage(e.to_string()))?;

            let exists: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM conversations WHERE id = ?1",
                    params![conversation_id.to_string()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| LumenError::Storage(e.to_string()))?;
            if exists.is_none() {
                return Err(LumenError::NotFound(format!(
                    "conversation {}",
                    conversation_id
                )));
            }

            let seq: i64 = tx
                .query_row(
                    "SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE conversation_id = ?1",
                    params![conversation_id.to_string()],
                    |row| row.get(0),
                )
                .map_err(|e| LumenError::Storage(e.to_string()))?;

            tx.execute(
                "INSERT INTO messages
                   (id, conversation_id, seq, role, content, emotion, sources, chunk_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    Uuid::new_v4().to_string(),
                    conversation_id.to_string(),
                    seq,
                    msg.role.as_str(),
                    msg.content,
                    msg.emotion.map(|e| e.as_str()),
                    sources_json,
                    msg.chunk_id.map(|c| c.to_string()),
                    now,
                ],
            )
            .map_err(|e| LumenError::Storage(format!("Failed to append message: {}", e)))?;

            tx.execute(
                "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                params![now, conversation_id.to_string()],
            )
            .map_err(|e| LumenError::Storage(e.to_string()))?;

            tx.commit().map_err(|e| LumenError::Storage(e.to_string()))?;
            Ok(seq)
        })
    }

    /// Load up to `n` most-recent messages with `seq > after_seq`, in
    /// chronological order.
    pub fn load_window(
        &self,
        conversation_id: Uuid,
        n: usize,
        after_seq: i64,
    ) -> Result<Vec<StoredMessage>, LumenError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, conversation_id, seq, role, content, emotion, sources, chunk_id, created_at
                     FROM messages
                     WHERE conversation_id = ?1 AND seq > ?2
                     ORDER BY seq DESC
                     LIMIT ?3",
                )
                .map_err(|e| LumenError::Storage(e.to_string()))?;
            let mut messages = collect_messages(&mut stmt, params![
                conversation_id.to_string(),
                after_seq,
                n as i64
            ])?;
            messages.reverse();
            Ok(messages)
        })
    }

    /// Load messages with `from_seq < seq <= to_seq`, in chronological order.
    pub fn load_range(
        &self,
        conversation_id: Uuid,
        from_seq_exclusive: i64,
        to_seq_inclusive: i64,
    ) -> Result<Vec<StoredMessage>, LumenError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, conversation_id, seq, role, content, emotion, sources, chunk_id, created_at
                     FROM messages
                     WHERE conversation_id = ?1 AND seq > ?2 AND seq <= ?3
                     ORDER BY seq ASC",
                )
                .map_err(|e| LumenError::Storage(e.to_string()))?;
            collect_messages(&mut stmt, params![
                conversation_id.to_string(),
                from_seq_exclusive,
                to_seq_inclusive
            ])
        })
    }

    /// Highest assigned sequence number, or 0 for an empty conversation.
    pub fn max_seq(&self, conversation_id: Uuid) -> Result<i64, LumenError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT COALESCE(MAX(seq), 0) FROM messages WHERE conversation_id = ?1",
                params![conversation_id.to_string()],
                |row| row.get(0),
            )
            .map_err(|e| LumenError::Storage(e.to_string()))
        })
    }

    /// The conversation's rolling summary, if one exists.
    pub fn latest_summary(&self, conversation_id: Uuid) -> Result<Option<SummaryRow>, LumenError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT summary, covered_upto_seq, version, updated_at
                 FROM summaries WHERE conversation_id = ?1",
                params![conversation_id.to_string()],
                |row| {
                    Ok(SummaryRow {
                        summary: row.get(0)?,
                        covered_upto_seq: row.get(1)?,
                        version: row.get(2)?,
                        updated_at: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(|e| LumenError::Storage(e.to_string()))
        })
    }

    /// Replace the rolling summary atomically.
    ///
    /// Rejects any update that would move `covered_upto_seq` backwards; the
    /// version counter increases monotonically.
    pub fn update_summary(
        &self,
        conversation_id: Uuid,
        summary: &str,
        covered_upto_seq: i64,
    ) -> Result<(), LumenError> {
        let now = Utc::now().timestamp();
        self.db.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| LumenError::Storage(e.to_string()))?;

            let current: Option<i64> = tx
                .query_row(
                    "SELECT covered_upto_seq FROM summaries WHERE conversation_id = ?1",
                    params![conversation_id.to_string()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| LumenError::Storage(e.to_string()))?;

            if let Some(existing) = current {
                if covered_upto_seq < existing {
                    return Err(LumenError::Storage(format!(
                        "summary coverage regression: {} < {}",
                        covered_upto_seq, existing
                    )));
                }
            }

            tx.execute(
                "INSERT INTO summaries (conversation_id, summary, covered_upto_seq, version, updated_at)
                 VALUES (?1, ?2, ?3, 1, ?4)
                 ON CONFLICT (conversation_id) DO UPDATE SET
                   summary = excluded.summary,
                   covered_upto_seq = excluded.covered_upto_seq,
                   version = summaries.version + 1,
                   updated_at = excluded.updated_at",
                params![conversation_id.to_string(), summary, covered_upto_seq, now],
            )
            .map_err(|e| LumenError::Storage(format!("Failed to update summary: {}", e)))?;

            tx.commit().map_err(|e| LumenError::Storage(e.to_string()))?;
            Ok(())
        })
    }

    /// Number of messages not yet covered by the rolling summary.
    pub fn count_uncovered(&self, conversation_id: Uuid) -> Result<i64, LumenError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE conversation_id = ?1
                   AND seq > COALESCE(
                     (SELECT covered_upto_seq FROM summaries WHERE conversation_id = ?1), 0)",
                params![conversation_id.to_string()],
                |row| row.get(0),
            )
            .map_err(|e| LumenError::Storage(e.to_string()))
        })
    }

    /// Paginated conversation listing, most recently updated first.
    pub fn list(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<(i64, Vec<ConversationListRow>), LumenError> {
        self.db.with_conn(|conn| {
            let total: i64 = conn
                .query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))
                .map_err(|e| LumenError::Storage(e.to_string()))?;

            let mut stmt = conn
                .prepare(
                    "SELECT c.id, c.created_at, c.updated_at,
                            (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id)
                     FROM conversations c
                     ORDER BY c.updated_at DESC, c.id ASC
                     LIMIT ?1 OFFSET ?2",
                )
                .map_err(|e| LumenError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(params![limit as i64, offset as i64], |row| {
                    let id: String = row.get(0)?;
                    Ok((id, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?, row.get::<_, i64>(3)?))
                })
                .map_err(|e| LumenError::Storage(e.to_string()))?;

            let mut out = Vec::new();
            for row in rows {
                let (id, created_at, updated_at, message_count) =
                    row.map_err(|e| LumenError::Storage(e.to_string()))?;
                let id = Uuid::parse_str(&id)
                    .map_err(|e| LumenError::Storage(format!("corrupt conversation id: {}", e)))?;
                out.push(ConversationListRow {
                    id,
                    created_at,
                    updated_at,
                    message_count,
                });
            }
            Ok((total, out))
        })
    }

    /// Delete a conversation and, via cascade, all of its messages and
    /// summary.
    pub fn delete(&self, conversation_id: Uuid) -> Result<(), LumenError> {
        self.db.with_conn(|conn| {
            let affected = conn
                .execute(
                    "DELETE FROM conversations WHERE id = ?1",
                    params![conversation_id.to_string()],
                )
                .map_err(|e| LumenError::Storage(e.to_string()))?;
            if affected == 0 {
                return Err(LumenError::NotFound(format!(
                    "conversation {}",
                    conversation_id
                )));
            }
            Ok(())
        })
    }

    /// Dump a full conversation for the admin download endpoint.
    pub fn export(&self, conversation_id: Uuid) -> Result<ConversationExport, LumenError> {
        let row = self
            .get(conversation_id)?
            .ok_or_else(|| LumenError::NotFound(format!("conversation {}", conversation_id)))?;
        let summary = self.latest_summary(conversation_id)?;
        let messages = self.load_range(conversation_id, 0, i64::MAX)?;
        Ok(ConversationExport {
            id: row.id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            summary,
            messages,
        })
    }

    /// Read an admin setting.
    pub fn get_setting(&self, key: &str) -> Result<Option<String>, LumenError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| LumenError::Storage(e.to_string()))
        })
    }

    /// Write an admin setting (atomic upsert).
    pub fn set_setting(&self, key: &str, value: &str) -> Result<(), LumenError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT (key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map_err(|e| LumenError::Storage(e.to_string()))?;
            Ok(())
        })
    }
}

fn collect_messages(
    stmt: &mut rusqlite::Statement<'_>,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<StoredMessage>, LumenError> {
    let rows = stmt
        .query_map(params, row_to_message)
        .map_err(|e| LumenError::Storage(e.to_string()))?;
    let mut out = Vec::new();
    for row in rows {
        let msg = row.map_err(|e| LumenError::Storage(e.to_string()))??;
        out.push(msg);
    }
    Ok(out)
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Result<StoredMessage, LumenError>> {
    let id: String = row.get(0)?;
    let conversation_id: String = row.get(1)?;
    let seq: i64 = row.get(2)?;
    let role: String = row.get(3)?;
    let content: String = row.get(4)?;
    let emotion: Option<String> = row.get(5)?;
    let sources: String = row.get(6)?;
    let chunk_id: Option<String> = row.get(7)?;
    let created_at: i64 = row.get(8)?;

    Ok((|| {
        let id = Uuid::parse_str(&id)
            .map_err(|e| LumenError::Storage(format!("corrupt message id: {}", e)))?;
        let conversation_id = Uuid::parse_str(&conversation_id)
            .map_err(|e| LumenError::Storage(format!("corrupt conversation id: {}", e)))?;
        let role = Role::parse(&role)
            .ok_or_else(|| LumenError::Storage(format!("corrupt role '{}'", role)))?;
        let sources: Vec<String> = serde_json::from_str(&sources)?;
        Ok(StoredMessage {
            id,
            conversation_id,
            seq,
            role,
            content,
            emotion: emotion.as_deref().map(Emotion::parse),
            sources,
            chunk_id,
            created_at,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ConversationStore {
        ConversationStore::new(Arc::new(Database::in_memory().unwrap()))
    }

    // ---- Conversation lifecycle ----

    #[test]
    fn test_create_and_get() {
        let store = store();
        let id = store.create_conversation().unwrap();
        let row = store.get(id).unwrap().unwrap();
        assert_eq!(row.id, id);
        assert!(row.created_at > 0);
        assert_eq!(row.created_at, row.updated_at);
    }

    #[test]
    fn test_get_unknown_returns_none() {
        let store = store();
        assert!(store.get(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let store = store();
        let a = store.create_conversation().unwrap();
        let b = store.create_conversation().unwrap();
        assert_ne!(a, b);
    }

    // ---- Appends ----

    #[test]
    fn test_append_assigns_monotonic_seq() {
        let store = store();
        let conv = store.create_conversation().unwrap();
        let s1 = store.append_message(conv, &NewMessage::user("one")).unwrap();
        let s2 = store.append_message(conv, &NewMessage::user("two")).unwrap();
        let s3 = store.append_message(conv, &NewMessage::user("three")).unwrap();
        assert_eq!((s1, s2, s3), (1, 2, 3));
    }

    #[test]
    fn test_append_to_unknown_conversation_fails() {
        let store = store();
        let err = store
            .append_message(Uuid::new_v4(), &NewMessage::user("x"))
            .unwrap_err();
        assert!(matches!(err, LumenError::NotFound(_)));
    }

    #[test]
    fn test_append_updates_conversation_timestamp() {
        let store = store();
        let conv = store.create_conversation().unwrap();
        store.append_message(conv, &NewMessage::user("hi")).unwrap();
        let row = store.get(conv).unwrap().unwrap();
        assert!(row.updated_at >= row.created_at);
    }

    #[test]
    fn test_assistant_message_round_trip() {
        let store = store();
        let conv = store.create_conversation().unwrap();
        let chunk = Uuid::new_v4();
        store
            .append_message(
                conv,
                &NewMessage::assistant(
                    "Bonjour!",
                    Emotion::Happy,
                    vec!["docA.txt".to_string()],
                    chunk,
                ),
            )
            .unwrap();

        let messages = store.load_window(conv, 10, 0).unwrap();
        assert_eq!(messages.len(), 1);
        let msg = &messages[0];
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.content, "Bonjour!");
        assert_eq!(msg.emotion, Some(Emotion::Happy));
        assert_eq!(msg.sources, vec!["docA.txt".to_string()]);
        assert_eq!(msg.chunk_id.as_deref(), Some(chunk.to_string().as_str()));
    }

    // ---- Windows ----

    #[test]
    fn test_load_window_chronological_order() {
        let store = store();
        let conv = store.create_conversation().unwrap();
        for i in 0..5 {
            store
                .append_message(conv, &NewMessage::user(format!("m{}", i)))
                .unwrap();
        }
        let window = store.load_window(conv, 3, 0).unwrap();
        let contents: Vec<&str> = window.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn test_load_window_respects_after_seq() {
        let store = store();
        let conv = store.create_conversation().unwrap();
        for i in 0..6 {
            store
                .append_message(conv, &NewMessage::user(format!("m{}", i)))
                .unwrap();
        }
        // Exclude the summarised prefix (seq <= 3).
        let window = store.load_window(conv, 10, 3).unwrap();
        let seqs: Vec<i64> = window.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![4, 5, 6]);
    }

    #[test]
    fn test_load_window_empty_conversation() {
        let store = store();
        let conv = store.create_conversation().unwrap();
        assert!(store.load_window(conv, 10, 0).unwrap().is_empty());
    }

    #[test]
    fn test_load_range() {
        let store = store();
        let conv = store.create_conversation().unwrap();
        for i in 0..5 {
            store
                .append_message(conv, &NewMessage::user(format!("m{}", i)))
                .unwrap();
        }
        let range = store.load_range(conv, 1, 3).unwrap();
        let seqs: Vec<i64> = range.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![2, 3]);
    }

    #[test]
    fn test_max_seq() {
        let store = store();
        let conv = store.create_conversation().unwrap();
        assert_eq!(store.max_seq(conv).unwrap(), 0);
        store.append_message(conv, &NewMessage::user("a")).unwrap();
        store.append_message(conv, &NewMessage::user("b")).unwrap();
        assert_eq!(store.max_seq(conv).unwrap(), 2);
    }

    // ---- Summaries ----

    #[test]
    fn test_summary_round_trip() {
        let store = store();
        let conv = store.create_conversation().unwrap();
        assert!(store.latest_summary(conv).unwrap().is_none());

        store.update_summary(conv, "first summary", 4).unwrap();
        let row = store.latest_summary(conv).unwrap().unwrap();
        assert_eq!(row.summary, "first summary");
        assert_eq!(row.covered_upto_seq, 4);
        assert_eq!(row.version, 1);
    }

    #[test]
    fn test_summary_replacement_bumps_version() {
        let store = store();
        let conv = store.create_conversation().unwrap();
        store.update_summary(conv, "v1", 4).unwrap();
        store.update_summary(conv, "v2", 8).unwrap();
        let row = store.latest_summary(conv).unwrap().unwrap();
        assert_eq!(row.summary, "v2");
        assert_eq!(row.covered_upto_seq, 8);
        assert_eq!(row.version, 2);
    }

    #[test]
    fn test_summary_coverage_never_regresses() {
        let store = store();
        let conv = store.create_conversation().unwrap();
        store.update_summary(conv, "v1", 8).unwrap();
        let err = store.update_summary(conv, "bad", 4).unwrap_err();
        assert!(err.to_string().contains("regression"));

        // Original summary intact.
        let row = store.latest_summary(conv).unwrap().unwrap();
        assert_eq!(row.summary, "v1");
        assert_eq!(row.covered_upto_seq, 8);
    }

    #[test]
    fn test_count_uncovered() {
        let store = store();
        let conv = store.create_conversation().unwrap();
        for _ in 0..6 {
            store.append_message(conv, &NewMessage::user("x")).unwrap();
        }
        assert_eq!(store.count_uncovered(conv).unwrap(), 6);
        store.update_summary(conv, "s", 4).unwrap();
        assert_eq!(store.count_uncovered(conv).unwrap(), 2);
    }

    // ---- Listing / deletion / export ----

    #[test]
    fn test_list_pagination() {
        let store = store();
        for _ in 0..5 {
            store.create_conversation().unwrap();
        }
        let (total, page) = store.list(2, 0).unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
        let (_, rest) = store.list(10, 4).unwrap();
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn test_list_includes_message_count() {
        let store = store();
        let conv = store.create_conversation().unwrap();
        store.append_message(conv, &NewMessage::user("a")).unwrap();
        store.append_message(conv, &NewMessage::user("b")).unwrap();
        let (_, rows) = store.list(10, 0).unwrap();
        assert_eq!(rows[0].message_count, 2);
    }

    #[test]
    fn test_delete_cascades() {
        let store = store();
        let conv = store.create_conversation().unwrap();
        store.append_message(conv, &NewMessage::user("a")).unwrap();
        store.update_summary(conv, "s", 1).unwrap();

        store.delete(conv).unwrap();
        assert!(store.get(conv).unwrap().is_none());
        assert!(store.load_window(conv, 10, 0).unwrap().is_empty());
        assert!(store.latest_summary(conv).unwrap().is_none());
    }

    #[test]
    fn test_delete_unknown_is_not_found() {
        let store = store();
        let err = store.delete(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, LumenError::NotFound(_)));
    }

    #[test]
    fn test_export_round_trip() {
        let store = store();
        let conv = store.create_conversation().unwrap();
        store.append_message(conv, &NewMessage::user("hello")).unwrap();
        store
            .append_message(
                conv,
                &NewMessage::assistant("hi", Emotion::Neutral, vec![], Uuid::new_v4()),
            )
            .unwrap();
        store.update_summary(conv, "greeting", 2).unwrap();

        let export = store.export(conv).unwrap();
        assert_eq!(export.id, conv);
        assert_eq!(export.messages.len(), 2);
        assert_eq!(export.messages[0].content, "hello");
        assert_eq!(export.messages[1].content, "hi");
        assert_eq!(export.summary.as_ref().unwrap().summary, "greeting");

        // Serialized export deserializes to the identical message sequence.
        let json = serde_json::to_string(&export).unwrap();
        let back: ConversationExport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.messages, export.messages);
    }

    #[test]
    fn test_export_unknown_is_not_found() {
        let store = store();
        assert!(matches!(
            store.export(Uuid::new_v4()).unwrap_err(),
            LumenError::NotFound(_)
        ));
    }

    // ---- Settings ----

    #[test]
    fn test_settings_round_trip() {
        let store = store();
        assert!(store.get_setting("prompt").unwrap().is_none());
        store.set_setting("prompt", "You are helpful.").unwrap();
        assert_eq!(
            store.get_setting("prompt").unwrap().as_deref(),
            Some("You are helpful.")
        );
        store.set_setting("prompt", "You are terse.").unwrap();
        assert_eq!(
            store.get_setting("prompt").unwrap().as_deref(),
            Some("You are terse.")
        );
    }

    // ---- Interleaving across conversations ----

    #[test]
    fn test_seq_is_per_conversation() {
        let store = store();
        let a = store.create_conversation().unwrap();
        let b = store.create_conversation().unwrap();
        assert_eq!(store.append_message(a, &NewMessage::user("a1")).unwrap(), 1);
        assert_eq!(store.append_message(b, &NewMessage::user("b1")).unwrap(), 1);
        assert_eq!(store.append_message(a, &NewMessage::user("a2")).unwrap(), 2);
    }

    #[test]
    fn test_concurrent_appends_serialise() {
        use std::thread;

        let store = Arc::new(store());
        let conv = store.create_conversation().unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                store
                    .append_message(conv, &NewMessage::user(format!("m{}", i)))
                    .unwrap()
            }));
        }
        let mut seqs: Vec<i64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        seqs.sort_unstable();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }
}
