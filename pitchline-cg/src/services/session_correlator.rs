//! Session correlation
//!
//! The voice provider and the training platform share no primary key, so an
//! end-of-call notification is bound to the most likely session by a
//! time-window heuristic over (agent_id, started_at). Correlation is
//! best-effort enrichment, never a blocking dependency of grading: any
//! datastore error aborts with no match and the caller proceeds without it.

use chrono::{Duration, Utc};
use sqlx::SqlitePool;

use pitchline_common::events::{EventBus, PitchlineEvent};

use crate::db;
use crate::models::{CorrelationConfidence, CorrelationResult, ExternalConversationEvent};

/// Search window around the event timestamp (each side)
const CORRELATION_WINDOW_MINUTES: i64 = 5;

/// |Δt| below this is a high-confidence match
const HIGH_CONFIDENCE_MINUTES: i64 = 1;

/// |Δt| below this is a medium-confidence match
const MEDIUM_CONFIDENCE_MINUTES: i64 = 3;

/// Candidate cap for the window query
const MAX_CANDIDATES: u32 = 10;

/// Session correlator service
pub struct SessionCorrelator {
    db: SqlitePool,
    event_bus: EventBus,
}

impl SessionCorrelator {
    pub fn new(db: SqlitePool, event_bus: EventBus) -> Self {
        Self { db, event_bus }
    }

    /// Bind an external conversation event to the most likely session
    ///
    /// Returns None when no session matches the window or when the datastore
    /// fails; both are non-fatal. On a match, two idempotent writes record
    /// the link on both sides. Confidence is advisory metadata, not a gate.
    pub async fn correlate(&self, event: &ExternalConversationEvent) -> Option<CorrelationResult> {
        match self.try_correlate(event).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(
                    conversation_id = %event.conversation_id,
                    agent_id = %event.agent_id,
                    error = %e,
                    "Correlation aborted by datastore error, proceeding without match"
                );
                None
            }
        }
    }

    async fn try_correlate(
        &self,
        event: &ExternalConversationEvent,
    ) -> pitchline_common::Result<Option<CorrelationResult>> {
        let window = Duration::minutes(CORRELATION_WINDOW_MINUTES);
        let window_start = event.occurred_at - window;
        let window_end = event.occurred_at + window;

        let candidates = db::sessions::find_by_agent_in_window(
            &self.db,
            &event.agent_id,
            window_start,
            window_end,
            MAX_CANDIDATES,
        )
        .await?;

        if candidates.is_empty() {
            tracing::info!(
                conversation_id = %event.conversation_id,
                agent_id = %event.agent_id,
                "No session candidates in correlation window"
            );
            return Ok(None);
        }

        // Minimize |Δt|; min_by_key keeps the first-returned row on ties,
        // which is the newest-first query order.
        let Some(best) = candidates.iter().min_by_key(|candidate| {
            (candidate.started_at - event.occurred_at)
                .num_milliseconds()
                .abs()
        }) else {
            return Ok(None);
        };

        let delta = (best.started_at - event.occurred_at).abs();
        let confidence = if delta < Duration::minutes(HIGH_CONFIDENCE_MINUTES) {
            CorrelationConfidence::High
        } else if delta < Duration::minutes(MEDIUM_CONFIDENCE_MINUTES) {
            CorrelationConfidence::Medium
        } else {
            CorrelationConfidence::Low
        };

        // Two idempotent writes: session gets the conversation id, the
        // external record gets the session binding. Re-running correlation
        // overwrites, never duplicates.
        db::sessions::link_conversation(&self.db, best.id, &event.conversation_id).await?;
        db::conversations::link_session(
            &self.db,
            &event.conversation_id,
            best.id,
            &best.user_id,
        )
        .await?;

        tracing::info!(
            conversation_id = %event.conversation_id,
            session_id = %best.id,
            delta_seconds = delta.num_seconds(),
            confidence = confidence.as_str(),
            "Conversation correlated to session"
        );

        self.event_bus.emit_lossy(PitchlineEvent::ConversationCorrelated {
            conversation_id: event.conversation_id.clone(),
            session_id: best.id,
            confidence: confidence.as_str().to_string(),
            timestamp: Utc::now(),
        });

        Ok(Some(CorrelationResult {
            session_id: best.id,
            user_id: best.user_id.clone(),
            confidence,
        }))
    }
}
