//! Grading API handlers
//!
//! POST /grading/start, POST /grading/retry/{id}, GET /grading/diagnosis/{id}

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::GradingStatus;
use crate::services::{
    health_diagnostic, GradingOrchestrator, GradingReport, GradingRequest, RawTranscriptEntry,
    RetryController,
};
use crate::AppState;

/// POST /grading/start request
#[derive(Debug, Deserialize)]
pub struct StartGradingRequest {
    pub session_id: Uuid,
    /// Caller-supplied raw transcript; takes precedence over the persisted one
    #[serde(default)]
    pub transcript: Option<Vec<RawTranscriptEntry>>,
    /// Provider conversation id to link, when the caller already knows it
    #[serde(default)]
    pub external_conversation_id: Option<String>,
}

/// POST /grading/retry/{id} response
#[derive(Debug, Serialize)]
pub struct RetryResponse {
    pub session_id: Uuid,
    pub grading_status: GradingStatus,
    pub retry_count: u32,
}

/// POST /grading/start
///
/// Run the grading pipeline for a session. Phases 1 and 2 run within this
/// request; deep analysis is dispatched and completes later. Callers poll
/// GET /grading/diagnosis/{id} for the final verdict.
pub async fn start_grading(
    State(state): State<AppState>,
    Json(request): Json<StartGradingRequest>,
) -> ApiResult<Json<GradingReport>> {
    let orchestrator = GradingOrchestrator::new(
        state.db.clone(),
        state.event_bus.clone(),
        state.evaluator.clone(),
        state.dispatcher.clone(),
    );

    let report = match orchestrator
        .run(GradingRequest {
            session_id: request.session_id,
            transcript: request.transcript,
            external_conversation_id: request.external_conversation_id,
        })
        .await
    {
        Ok(report) => report,
        Err(e) => {
            *state.last_error.write().await = Some(e.to_string());
            return Err(ApiError::from(e));
        }
    };

    Ok(Json(report))
}

/// POST /grading/retry/{session_id}
///
/// Re-dispatch deep analysis for a session with a persisted error marker.
/// Rejected with 409 when the retry budget is exhausted.
pub async fn retry_grading(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<RetryResponse>> {
    let controller = RetryController::new(state.db.clone(), state.dispatcher.clone());

    let outcome = controller.retry(session_id).await.map_err(ApiError::from)?;

    Ok(Json(RetryResponse {
        session_id: outcome.session_id,
        grading_status: outcome.grading_status,
        retry_count: outcome.retry_count,
    }))
}

/// GET /grading/diagnosis/{session_id}
///
/// Read-only diagnosis of a session's grading pipeline. No side effects.
pub async fn get_diagnosis(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<health_diagnostic::GradingDiagnosis>> {
    let session = crate::db::sessions::load_session(&state.db, session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Session not found: {}", session_id)))?;

    Ok(Json(health_diagnostic::diagnose(&session, Utc::now())))
}

/// Build grading routes
pub fn grading_routes() -> Router<AppState> {
    Router::new()
        .route("/grading/start", post(start_grading))
        .route("/grading/retry/:session_id", post(retry_grading))
        .route("/grading/diagnosis/:session_id", get(get_diagnosis))
}
