//! Idempotent schema creation.
//!
//! Timestamps are stored as microseconds since the Unix epoch. Embeddings
//! are little-endian `f32` BLOBs. Structured fields (rubric levels, signal
//! phrases, per-concept scores) are JSON text columns.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'uploaded',
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunks (
        id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL,
        source TEXT NOT NULL,
        ordinal INTEGER NOT NULL,
        sequence INTEGER NOT NULL,
        text TEXT NOT NULL,
        hash TEXT NOT NULL,
        embedding BLOB NOT NULL,
        FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS summaries (
        id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL UNIQUE,
        content TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS rubrics (
        id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL,
        concept TEXT NOT NULL,
        levels_json TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS misconception_patterns (
        id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL,
        concept TEXT NOT NULL,
        name TEXT NOT NULL,
        signal_phrases_json TEXT NOT NULL,
        followups_json TEXT NOT NULL,
        FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS conversations (
        id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        evaluating INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        conversation_id TEXT NOT NULL,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS grade_reports (
        id TEXT PRIMARY KEY,
        conversation_id TEXT NOT NULL,
        overall_score REAL NOT NULL,
        detailed_scores_json TEXT NOT NULL,
        feedback TEXT NOT NULL,
        recommendations_json TEXT NOT NULL,
        strengths_json TEXT NOT NULL,
        weaknesses_json TEXT NOT NULL,
        evaluated_at INTEGER NOT NULL,
        FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_chunks_document_sequence ON chunks(document_id, sequence)",
    "CREATE INDEX IF NOT EXISTS idx_rubrics_document_id ON rubrics(document_id)",
    "CREATE INDEX IF NOT EXISTS idx_patterns_document_id ON misconception_patterns(document_id)",
    "CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, created_at, seq)",
    "CREATE INDEX IF NOT EXISTS idx_reports_conversation ON grade_reports(conversation_id)",
];

/// Apply the schema to an open pool.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// Clear every in-flight evaluation marker. Markers only outlive their
/// evaluation when the process running it died, so this is safe whenever
/// no other `soc` process is evaluating.
pub async fn clear_evaluation_markers(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("UPDATE conversations SET evaluating = 0 WHERE evaluating = 1")
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    let cleared = clear_evaluation_markers(&pool).await?;
    if cleared > 0 {
        tracing::warn!(cleared, "cleared stale evaluation markers");
    }
    pool.close().await;
    Ok(())
}
