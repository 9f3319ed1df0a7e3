//! Database schema migrations.
//!
//! Applies the initial schema: conversations, messages, summaries,
//! settings, and the schema_migrations tracking table.

use rusqlite::Connection;
use tracing::info;

use lumen_core::error::LumenError;

/// Run all pending database migrations.
///
/// Currently implements the initial schema (version 1). Future migrations
/// can be added by checking the current version and applying incremental
/// changes.
pub fn run_migrations(conn: &Connection) -> Result<(), LumenError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| LumenError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| LumenError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<(), LumenError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS conversations (
            id          TEXT PRIMARY KEY NOT NULL,
            created_at  INTEGER NOT NULL,
            updated_at  INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_updated
            ON conversations (updated_at DESC);

        -- Messages are append-only; seq is assigned per conversation and
        -- never reused. Sources is a JSON array of document ids.
        CREATE TABLE IF NOT EXISTS messages (
            id               TEXT PRIMARY KEY NOT NULL,
            conversation_id  TEXT NOT NULL,
            seq              INTEGER NOT NULL,
            role             TEXT NOT NULL
                             CHECK (role IN ('user', 'assistant', 'system')),
            content          TEXT NOT NULL,
            emotion          TEXT,
            sources          TEXT NOT NULL DEFAULT '[]',
            chunk_id         TEXT,
            created_at       INTEGER NOT NULL,
            UNIQUE (conversation_id, seq),
            FOREIGN KEY (conversation_id) REFERENCES conversations(id)
                ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation_seq
            ON messages (conversation_id, seq ASC);

        -- At most one rolling summary per conversation; it always covers the
        -- message prefix up to covered_upto_seq.
        CREATE TABLE IF NOT EXISTS summaries (
            conversation_id   TEXT PRIMARY KEY NOT NULL,
            summary           TEXT NOT NULL,
            covered_upto_seq  INTEGER NOT NULL,
            version           INTEGER NOT NULL DEFAULT 1,
            updated_at        INTEGER NOT NULL,
            FOREIGN KEY (conversation_id) REFERENCES conversations(id)
                ON DELETE CASCADE
        );

        -- Admin-mutable settings (system prompt).
        CREATE TABLE IF NOT EXISTS settings (
            key    TEXT PRIMARY KEY NOT NULL,
            value  TEXT NOT NULL
        );

        INSERT INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| LumenError::Storage(format!("Failed to apply migration v1: {}", e)))?;
    Ok(())
}
