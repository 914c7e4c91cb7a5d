//! Conversation event database operations
//!
//! Stores provider end-of-call notifications and their correlation links.

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use pitchline_common::{Error, Result};

use crate::models::ExternalConversationEvent;

/// Insert or refresh a provider notification
///
/// The provider may redeliver a webhook; conversation_id is the primary key
/// so redelivery overwrites rather than duplicates.
pub async fn upsert_event(pool: &SqlitePool, event: &ExternalConversationEvent) -> Result<()> {
    let metadata = serde_json::to_string(&event.metadata)
        .map_err(|e| Error::Internal(format!("Failed to serialize event metadata: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO conversation_events (conversation_id, agent_id, occurred_at, metadata)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(conversation_id) DO UPDATE SET
            agent_id = excluded.agent_id,
            occurred_at = excluded.occurred_at,
            metadata = excluded.metadata
        "#,
    )
    .bind(&event.conversation_id)
    .bind(&event.agent_id)
    .bind(event.occurred_at.to_rfc3339())
    .bind(&metadata)
    .execute(pool)
    .await?;

    Ok(())
}

/// Record the matched session on the external record
///
/// Idempotent: re-running correlation for the same event overwrites the
/// link, it never duplicates it.
pub async fn link_session(
    pool: &SqlitePool,
    conversation_id: &str,
    session_id: Uuid,
    user_id: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE conversation_events
        SET session_id = ?, user_id = ?, correlated_at = ?
        WHERE conversation_id = ?
        "#,
    )
    .bind(session_id.to_string())
    .bind(user_id)
    .bind(Utc::now().to_rfc3339())
    .bind(conversation_id)
    .execute(pool)
    .await?;

    Ok(())
}
