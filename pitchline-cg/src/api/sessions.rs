//! Training session lifecycle API handlers
//!
//! POST /sessions/start, POST /sessions/{id}/turns, POST /sessions/{id}/end
//!
//! A session is created when a call starts and ended when the call
//! terminates. Turns are append-only during the live call and immutable
//! once the session is ended.

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pitchline_common::events::PitchlineEvent;

use crate::error::{ApiError, ApiResult};
use crate::models::TrainingSession;
use crate::services::{RawTranscriptEntry, TranscriptNormalizer};
use crate::AppState;

/// POST /sessions/start request
#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub user_id: String,
    pub agent_id: String,
}

/// POST /sessions/start response
#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub session_id: Uuid,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// POST /sessions/{id}/turns response
#[derive(Debug, Serialize)]
pub struct AppendTurnResponse {
    pub session_id: Uuid,
    pub turn_count: usize,
}

/// POST /sessions/{id}/end response
#[derive(Debug, Serialize)]
pub struct EndSessionResponse {
    pub session_id: Uuid,
    pub ended_at: chrono::DateTime<chrono::Utc>,
    pub turn_count: usize,
}

/// POST /sessions/start
///
/// Create a session at call start.
pub async fn start_session(
    State(state): State<AppState>,
    Json(request): Json<StartSessionRequest>,
) -> ApiResult<Json<StartSessionResponse>> {
    if request.user_id.trim().is_empty() || request.agent_id.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "user_id and agent_id must be non-empty".to_string(),
        ));
    }

    let session = TrainingSession::new(request.user_id, request.agent_id);
    crate::db::sessions::save_session(&state.db, &session).await?;

    tracing::info!(
        session_id = %session.id,
        user_id = %session.user_id,
        agent_id = %session.agent_id,
        "Training session started"
    );

    state.event_bus.emit_lossy(PitchlineEvent::SessionStarted {
        session_id: session.id,
        user_id: session.user_id.clone(),
        agent_id: session.agent_id.clone(),
        timestamp: session.started_at,
    });

    Ok(Json(StartSessionResponse {
        session_id: session.id,
        started_at: session.started_at,
    }))
}

/// POST /sessions/{session_id}/turns
///
/// Append one turn to a live session's transcript.
pub async fn append_turn(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(entry): Json<RawTranscriptEntry>,
) -> ApiResult<Json<AppendTurnResponse>> {
    let mut session = crate::db::sessions::load_session(&state.db, session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Session not found: {}", session_id)))?;

    if session.ended_at.is_some() {
        return Err(ApiError::Conflict(format!(
            "Session {} has ended; transcript is immutable",
            session_id
        )));
    }

    let normalizer = TranscriptNormalizer::new();
    let turn = normalizer.normalize_entry(&entry, session.transcript.len());
    session.transcript.push(turn);

    crate::db::sessions::update_transcript(&state.db, session_id, &session.transcript).await?;

    Ok(Json(AppendTurnResponse {
        session_id,
        turn_count: session.transcript.len(),
    }))
}

/// POST /sessions/{session_id}/end
///
/// Finalize a session when the call terminates. Idempotent: ending an
/// already-ended session keeps the original ended_at.
pub async fn end_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<EndSessionResponse>> {
    let session = crate::db::sessions::load_session(&state.db, session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Session not found: {}", session_id)))?;

    let ended_at = match session.ended_at {
        Some(existing) => existing,
        None => {
            let now = Utc::now();
            crate::db::sessions::set_ended_at(&state.db, session_id, now).await?;

            tracing::info!(
                session_id = %session_id,
                turn_count = session.transcript.len(),
                "Training session ended"
            );

            state.event_bus.emit_lossy(PitchlineEvent::SessionEnded {
                session_id,
                turn_count: session.transcript.len(),
                timestamp: now,
            });

            now
        }
    };

    Ok(Json(EndSessionResponse {
        session_id,
        ended_at,
        turn_count: session.transcript.len(),
    }))
}

/// Build session lifecycle routes
pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/sessions/start", post(start_session))
        .route("/sessions/:session_id/turns", post(append_turn))
        .route("/sessions/:session_id/end", post(end_session))
}
