//! Training session database operations
//!
//! Grading state is shared between the request-scoped orchestrator and the
//! detached deep analysis task, so every write here is a column-scoped
//! partial UPDATE keyed by session id. There is no optimistic locking;
//! concurrent writers resolve by last-write-wins, except that grading_status
//! transitions are guarded so a session never moves backwards.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use pitchline_common::{Error, Result};

use crate::models::{
    session::DEEP_ANALYSIS_ERROR_KEY, DeepAnalysisErrorMarker, GradingStatus, SessionScores,
    TrainingSession, Turn,
};

/// Candidate row for the correlator window query
#[derive(Debug, Clone)]
pub struct SessionCandidate {
    pub id: Uuid,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
}

/// Insert a session, or fully refresh it when the id already exists
pub async fn save_session(pool: &SqlitePool, session: &TrainingSession) -> Result<()> {
    let transcript = serde_json::to_string(&session.transcript)
        .map_err(|e| Error::Internal(format!("Failed to serialize transcript: {}", e)))?;
    let diagnostics = serde_json::to_string(&session.diagnostics)
        .map_err(|e| Error::Internal(format!("Failed to serialize diagnostics: {}", e)))?;
    let instant_metrics = to_json_opt(&session.instant_metrics)?;
    let key_moments = to_json_opt(&session.key_moments)?;
    let deep_analysis = to_json_opt(&session.deep_analysis)?;

    sqlx::query(
        r#"
        INSERT INTO training_sessions (
            id, user_id, agent_id, conversation_id, started_at, ended_at,
            transcript, instant_metrics, key_moments, deep_analysis,
            score_overall, score_rapport, score_discovery,
            score_objection_handling, score_close_effectiveness,
            sale_closed, virtual_earnings, grading_status, graded_at,
            retry_count, diagnostics
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            conversation_id = excluded.conversation_id,
            ended_at = excluded.ended_at,
            transcript = excluded.transcript,
            instant_metrics = excluded.instant_metrics,
            key_moments = excluded.key_moments,
            deep_analysis = excluded.deep_analysis,
            score_overall = excluded.score_overall,
            score_rapport = excluded.score_rapport,
            score_discovery = excluded.score_discovery,
            score_objection_handling = excluded.score_objection_handling,
            score_close_effectiveness = excluded.score_close_effectiveness,
            sale_closed = excluded.sale_closed,
            virtual_earnings = excluded.virtual_earnings,
            grading_status = excluded.grading_status,
            graded_at = excluded.graded_at,
            retry_count = excluded.retry_count,
            diagnostics = excluded.diagnostics
        "#,
    )
    .bind(session.id.to_string())
    .bind(&session.user_id)
    .bind(&session.agent_id)
    .bind(&session.conversation_id)
    .bind(session.started_at.to_rfc3339())
    .bind(session.ended_at.map(|dt| dt.to_rfc3339()))
    .bind(&transcript)
    .bind(&instant_metrics)
    .bind(&key_moments)
    .bind(&deep_analysis)
    .bind(session.scores.map(|s| s.overall))
    .bind(session.scores.map(|s| s.rapport))
    .bind(session.scores.map(|s| s.discovery))
    .bind(session.scores.map(|s| s.objection_handling))
    .bind(session.scores.map(|s| s.close_effectiveness))
    .bind(session.sale_closed.map(|b| b as i64))
    .bind(session.virtual_earnings)
    .bind(session.grading_status.as_str())
    .bind(session.graded_at.map(|dt| dt.to_rfc3339()))
    .bind(session.retry_count as i64)
    .bind(&diagnostics)
    .execute(pool)
    .await?;

    Ok(())
}

/// Load a session by id
pub async fn load_session(pool: &SqlitePool, id: Uuid) -> Result<Option<TrainingSession>> {
    let row = sqlx::query(
        r#"
        SELECT id, user_id, agent_id, conversation_id, started_at, ended_at,
               transcript, instant_metrics, key_moments, deep_analysis,
               score_overall, score_rapport, score_discovery,
               score_objection_handling, score_close_effectiveness,
               sale_closed, virtual_earnings, grading_status, graded_at,
               retry_count, diagnostics
        FROM training_sessions
        WHERE id = ?
        "#,
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(session_from_row).transpose()
}

/// Correlator window query: sessions for an agent with started_at inside
/// [window_start, window_end], newest first, capped at `limit`.
pub async fn find_by_agent_in_window(
    pool: &SqlitePool,
    agent_id: &str,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    limit: u32,
) -> Result<Vec<SessionCandidate>> {
    let rows = sqlx::query(
        r#"
        SELECT id, user_id, started_at
        FROM training_sessions
        WHERE agent_id = ? AND started_at >= ? AND started_at <= ?
        ORDER BY started_at DESC
        LIMIT ?
        "#,
    )
    .bind(agent_id)
    .bind(window_start.to_rfc3339())
    .bind(window_end.to_rfc3339())
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let id: String = row.get("id");
            let id = Uuid::parse_str(&id)
                .map_err(|e| Error::Internal(format!("Failed to parse session id: {}", e)))?;
            let started_at = parse_timestamp(row.get("started_at"))?;
            Ok(SessionCandidate {
                id,
                user_id: row.get("user_id"),
                started_at,
            })
        })
        .collect()
}

/// Replace the persisted transcript with freshly normalized turns
pub async fn update_transcript(pool: &SqlitePool, id: Uuid, turns: &[Turn]) -> Result<()> {
    let transcript = serde_json::to_string(turns)
        .map_err(|e| Error::Internal(format!("Failed to serialize transcript: {}", e)))?;

    sqlx::query("UPDATE training_sessions SET transcript = ? WHERE id = ?")
        .bind(&transcript)
        .bind(id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

/// Finalize a session when the call terminates
pub async fn set_ended_at(pool: &SqlitePool, id: Uuid, ended_at: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE training_sessions SET ended_at = ? WHERE id = ? AND ended_at IS NULL")
        .bind(ended_at.to_rfc3339())
        .bind(id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

/// Record the provider conversation id on a session
///
/// Idempotent: re-running correlation for the same event overwrites the
/// link, it never duplicates it.
pub async fn link_conversation(
    pool: &SqlitePool,
    id: Uuid,
    conversation_id: &str,
) -> Result<()> {
    sqlx::query("UPDATE training_sessions SET conversation_id = ? WHERE id = ?")
        .bind(conversation_id)
        .bind(id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

/// Persist phase 1 output
///
/// Advances grading_status to phase1_done only from pending; a rerun over a
/// further-along session refreshes the payload without regressing state.
pub async fn update_instant_metrics(
    pool: &SqlitePool,
    id: Uuid,
    metrics: &serde_json::Value,
) -> Result<()> {
    let payload = serde_json::to_string(metrics)
        .map_err(|e| Error::Internal(format!("Failed to serialize instant metrics: {}", e)))?;

    sqlx::query(
        r#"
        UPDATE training_sessions
        SET instant_metrics = ?,
            grading_status = CASE
                WHEN grading_status = 'pending' THEN 'phase1_done'
                ELSE grading_status
            END
        WHERE id = ?
        "#,
    )
    .bind(&payload)
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Persist phase 2 output
pub async fn update_key_moments(
    pool: &SqlitePool,
    id: Uuid,
    moments: &serde_json::Value,
) -> Result<()> {
    let payload = serde_json::to_string(moments)
        .map_err(|e| Error::Internal(format!("Failed to serialize key moments: {}", e)))?;

    sqlx::query(
        r#"
        UPDATE training_sessions
        SET key_moments = ?,
            grading_status = CASE
                WHEN grading_status IN ('pending', 'phase1_done') THEN 'phase2_done'
                ELSE grading_status
            END
        WHERE id = ?
        "#,
    )
    .bind(&payload)
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Mark deep analysis as dispatched and in flight
pub async fn mark_processing(pool: &SqlitePool, id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE training_sessions
        SET grading_status = CASE
                WHEN grading_status IN ('pending', 'phase1_done', 'phase2_done', 'error')
                THEN 'processing'
                ELSE grading_status
            END
        WHERE id = ?
        "#,
    )
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Persist the full deep analysis result: analysis payload, final scores,
/// sale outcome, virtual earnings, graded_at, grading_status = complete.
///
/// Idempotently overwritten on retry.
pub async fn complete_deep_analysis(
    pool: &SqlitePool,
    id: Uuid,
    analysis: &serde_json::Value,
    scores: &SessionScores,
    sale_closed: bool,
    virtual_earnings: f64,
) -> Result<()> {
    let payload = serde_json::to_string(analysis)
        .map_err(|e| Error::Internal(format!("Failed to serialize deep analysis: {}", e)))?;

    sqlx::query(
        r#"
        UPDATE training_sessions
        SET deep_analysis = ?,
            score_overall = ?,
            score_rapport = ?,
            score_discovery = ?,
            score_objection_handling = ?,
            score_close_effectiveness = ?,
            sale_closed = ?,
            virtual_earnings = ?,
            graded_at = ?,
            grading_status = 'complete',
            diagnostics = json_remove(diagnostics, '$.' || ?)
        WHERE id = ?
        "#,
    )
    .bind(&payload)
    .bind(scores.overall)
    .bind(scores.rapport)
    .bind(scores.discovery)
    .bind(scores.objection_handling)
    .bind(scores.close_effectiveness)
    .bind(sale_closed as i64)
    .bind(virtual_earnings)
    .bind(Utc::now().to_rfc3339())
    .bind(DEEP_ANALYSIS_ERROR_KEY)
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Persist the deep analysis error marker
///
/// The marker is what the health diagnostic uses to distinguish "errored"
/// from "still running"; a failed attempt is never left silent. Status moves
/// to error unless the session already completed (a duplicate retry racing a
/// late completion must not clobber final scores).
pub async fn mark_deep_analysis_error(
    pool: &SqlitePool,
    id: Uuid,
    marker: &DeepAnalysisErrorMarker,
) -> Result<()> {
    let payload = serde_json::to_string(marker)
        .map_err(|e| Error::Internal(format!("Failed to serialize error marker: {}", e)))?;

    sqlx::query(
        r#"
        UPDATE training_sessions
        SET diagnostics = json_set(diagnostics, '$.' || ?, json(?)),
            grading_status = CASE
                WHEN grading_status != 'complete' THEN 'error'
                ELSE grading_status
            END
        WHERE id = ?
        "#,
    )
    .bind(DEEP_ANALYSIS_ERROR_KEY)
    .bind(&payload)
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Claim a retry attempt for a session with a persisted deep analysis error
///
/// The retry budget is enforced here, in one place, atomically: the UPDATE
/// only matches while retry_count is below `max_retries` and an error marker
/// is present. Returns true when the attempt was claimed (retry_count
/// incremented, marker cleared, status moved to processing).
pub async fn claim_retry(pool: &SqlitePool, id: Uuid, max_retries: u32) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE training_sessions
        SET retry_count = retry_count + 1,
            diagnostics = json_remove(diagnostics, '$.' || ?),
            grading_status = 'processing'
        WHERE id = ?
          AND retry_count < ?
          AND json_extract(diagnostics, '$.' || ?) IS NOT NULL
          AND grading_status != 'complete'
        "#,
    )
    .bind(DEEP_ANALYSIS_ERROR_KEY)
    .bind(id.to_string())
    .bind(max_retries as i64)
    .bind(DEEP_ANALYSIS_ERROR_KEY)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Record a non-fatal phase failure in the diagnostics bag
pub async fn record_phase_failure(
    pool: &SqlitePool,
    id: Uuid,
    phase_key: &str,
    message: &str,
) -> Result<()> {
    let entry = serde_json::json!({
        "message": message,
        "failed_at": Utc::now().to_rfc3339(),
    });
    let payload = serde_json::to_string(&entry)
        .map_err(|e| Error::Internal(format!("Failed to serialize phase failure: {}", e)))?;

    sqlx::query(
        r#"
        UPDATE training_sessions
        SET diagnostics = json_set(diagnostics, '$.' || ?, json(?))
        WHERE id = ?
        "#,
    )
    .bind(phase_key)
    .bind(&payload)
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

fn to_json_opt(value: &Option<serde_json::Value>) -> Result<Option<String>> {
    value
        .as_ref()
        .map(|v| {
            serde_json::to_string(v)
                .map_err(|e| Error::Internal(format!("Failed to serialize JSON column: {}", e)))
        })
        .transpose()
}

fn parse_timestamp(s: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse timestamp: {}", e)))
}

fn parse_timestamp_opt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.map(parse_timestamp).transpose()
}

fn session_from_row(row: sqlx::sqlite::SqliteRow) -> Result<TrainingSession> {
    let id: String = row.get("id");
    let id = Uuid::parse_str(&id)
        .map_err(|e| Error::Internal(format!("Failed to parse session id: {}", e)))?;

    let transcript: String = row.get("transcript");
    let transcript: Vec<Turn> = serde_json::from_str(&transcript)
        .map_err(|e| Error::Internal(format!("Failed to deserialize transcript: {}", e)))?;

    let diagnostics: String = row.get("diagnostics");
    let diagnostics: serde_json::Value = serde_json::from_str(&diagnostics)
        .map_err(|e| Error::Internal(format!("Failed to deserialize diagnostics: {}", e)))?;

    let grading_status: String = row.get("grading_status");
    let grading_status = GradingStatus::parse(&grading_status).ok_or_else(|| {
        Error::Internal(format!("Unknown grading_status value: {}", grading_status))
    })?;

    let scores = match (
        row.get::<Option<f64>, _>("score_overall"),
        row.get::<Option<f64>, _>("score_rapport"),
        row.get::<Option<f64>, _>("score_discovery"),
        row.get::<Option<f64>, _>("score_objection_handling"),
        row.get::<Option<f64>, _>("score_close_effectiveness"),
    ) {
        (Some(overall), Some(rapport), Some(discovery), Some(objection), Some(close)) => {
            Some(SessionScores {
                overall,
                rapport,
                discovery,
                objection_handling: objection,
                close_effectiveness: close,
            })
        }
        _ => None,
    };

    Ok(TrainingSession {
        id,
        user_id: row.get("user_id"),
        agent_id: row.get("agent_id"),
        conversation_id: row.get("conversation_id"),
        started_at: parse_timestamp(row.get("started_at"))?,
        ended_at: parse_timestamp_opt(row.get("ended_at"))?,
        transcript,
        instant_metrics: from_json_opt(row.get("instant_metrics"))?,
        key_moments: from_json_opt(row.get("key_moments"))?,
        deep_analysis: from_json_opt(row.get("deep_analysis"))?,
        scores,
        sale_closed: row.get::<Option<i64>, _>("sale_closed").map(|v| v != 0),
        virtual_earnings: row.get("virtual_earnings"),
        grading_status,
        graded_at: parse_timestamp_opt(row.get("graded_at"))?,
        retry_count: row.get::<i64, _>("retry_count") as u32,
        diagnostics,
    })
}

fn from_json_opt(value: Option<String>) -> Result<Option<serde_json::Value>> {
    value
        .map(|s| {
            serde_json::from_str(&s)
                .map_err(|e| Error::Internal(format!("Failed to deserialize JSON column: {}", e)))
        })
        .transpose()
}
