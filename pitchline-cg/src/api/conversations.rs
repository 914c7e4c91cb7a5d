//! Conversation webhook API handlers
//!
//! POST /conversations/call-ended

use axum::{extract::State, routing::post, Json, Router};
use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::models::{CorrelationResult, ExternalConversationEvent};
use crate::services::SessionCorrelator;
use crate::AppState;

/// POST /conversations/call-ended response
#[derive(Debug, Serialize)]
pub struct CallEndedResponse {
    pub conversation_id: String,
    /// The matched session, or null when correlation found no candidate
    pub correlation: Option<CorrelationResult>,
}

/// POST /conversations/call-ended
///
/// Provider webhook for end-of-call notifications. Accepts both payload
/// shapes (nested `metadata.started` vs top-level `created`). The event is
/// recorded and correlation runs best-effort: a miss still returns 200 with
/// a null correlation, since correlation is enrichment, not a dependency.
pub async fn call_ended(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> ApiResult<Json<CallEndedResponse>> {
    let event = ExternalConversationEvent::from_webhook_payload(&payload).ok_or_else(|| {
        ApiError::BadRequest(
            "Webhook payload must carry conversation_id, agent_id and a timestamp \
             (metadata.started or created)"
                .to_string(),
        )
    })?;

    crate::db::conversations::upsert_event(&state.db, &event).await?;

    let correlator = SessionCorrelator::new(state.db.clone(), state.event_bus.clone());
    let correlation = correlator.correlate(&event).await;

    if correlation.is_none() {
        tracing::info!(
            conversation_id = %event.conversation_id,
            "Call-ended event recorded without correlation"
        );
    }

    Ok(Json(CallEndedResponse {
        conversation_id: event.conversation_id,
        correlation,
    }))
}

/// Build conversation webhook routes
pub fn conversation_routes() -> Router<AppState> {
    Router::new().route("/conversations/call-ended", post(call_ended))
}
