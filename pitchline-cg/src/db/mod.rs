//! Database access for pitchline-cg
//!
//! Shared SQLite database access for training sessions, conversation events
//! and service settings.

pub mod conversations;
pub mod sessions;
pub mod settings;

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
///
/// Connects to the shared pitchline.db in the root folder.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Use proper SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Initialize pitchline-cg specific tables
///
/// Creates training_sessions, conversation_events and settings tables if
/// they don't exist.
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    // Settings table for service configuration persistence
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per training call session
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS training_sessions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            conversation_id TEXT,
            started_at TEXT NOT NULL,
            ended_at TEXT,
            transcript TEXT NOT NULL DEFAULT '[]',
            instant_metrics TEXT,
            key_moments TEXT,
            deep_analysis TEXT,
            score_overall REAL,
            score_rapport REAL,
            score_discovery REAL,
            score_objection_handling REAL,
            score_close_effectiveness REAL,
            sale_closed INTEGER,
            virtual_earnings REAL NOT NULL DEFAULT 0,
            grading_status TEXT NOT NULL DEFAULT 'pending',
            graded_at TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0,
            diagnostics TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Correlator window query: agent match + started_at range, newest first
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_sessions_agent_started
        ON training_sessions (agent_id, started_at)
        "#,
    )
    .execute(pool)
    .await?;

    // One row per provider end-of-call notification
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversation_events (
            conversation_id TEXT PRIMARY KEY,
            agent_id TEXT NOT NULL,
            occurred_at TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            session_id TEXT,
            user_id TEXT,
            correlated_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!(
        "Database tables initialized (settings, training_sessions, conversation_events)"
    );

    Ok(())
}
