//! Deep analysis retry controller
//!
//! The retry budget lives here and nowhere else. A retry is only valid for a
//! session with a persisted deep analysis error marker and a retry counter
//! below the cap; claiming the attempt is a single conditional UPDATE so
//! concurrent retry requests cannot overspend the budget. Exceeding the cap
//! is a permanent failure surfaced via diagnostics, requiring external
//! intervention.

use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::db;
use crate::models::{DeepAnalysisErrorMarker, GradingStatus};
use crate::services::deep_analysis::{
    deep_analysis_context, DeepAnalysisDispatcher, DeepAnalysisJob, DispatchError,
};

/// Centralized retry budget for deep analysis
pub const MAX_DEEP_ANALYSIS_RETRIES: u32 = 2;

/// Retry request errors
#[derive(Debug, Error)]
pub enum RetryError {
    #[error("Session not found: {0}")]
    NotFound(Uuid),

    /// Session has no persisted deep analysis error to retry
    #[error("No deep analysis error recorded for session {0}")]
    NoErrorMarker(Uuid),

    /// Retry budget exhausted; no further attempt is dispatched
    #[error("Deep analysis retry budget exhausted for session {0} (cap: {MAX_DEEP_ANALYSIS_RETRIES})")]
    BudgetExhausted(Uuid),

    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Storage(#[from] pitchline_common::Error),
}

/// Successful retry outcome
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    pub session_id: Uuid,
    pub grading_status: GradingStatus,
    pub retry_count: u32,
}

/// Retry controller service
pub struct RetryController {
    db: SqlitePool,
    dispatcher: Arc<dyn DeepAnalysisDispatcher>,
}

impl RetryController {
    pub fn new(db: SqlitePool, dispatcher: Arc<dyn DeepAnalysisDispatcher>) -> Self {
        Self { db, dispatcher }
    }

    /// Re-dispatch deep analysis for a session with a persisted error
    ///
    /// Uses whatever instant metrics and key moments are currently
    /// persisted; increments retry_count, clears the error marker and moves
    /// grading_status error → processing before dispatch.
    pub async fn retry(&self, session_id: Uuid) -> Result<RetryOutcome, RetryError> {
        let session = db::sessions::load_session(&self.db, session_id)
            .await?
            .ok_or(RetryError::NotFound(session_id))?;

        if session.deep_analysis_error_marker().is_none() {
            return Err(RetryError::NoErrorMarker(session_id));
        }

        if session.retry_count >= MAX_DEEP_ANALYSIS_RETRIES {
            tracing::warn!(
                session_id = %session_id,
                retry_count = session.retry_count,
                "Deep analysis retry rejected: budget exhausted"
            );
            return Err(RetryError::BudgetExhausted(session_id));
        }

        // Atomic claim: the UPDATE only matches while the budget holds and
        // the marker is still present, so a racing duplicate request loses.
        let claimed =
            db::sessions::claim_retry(&self.db, session_id, MAX_DEEP_ANALYSIS_RETRIES).await?;
        if !claimed {
            return Err(RetryError::BudgetExhausted(session_id));
        }

        let retry_count = session.retry_count + 1;

        tracing::info!(
            session_id = %session_id,
            retry_count,
            "Re-dispatching deep analysis"
        );

        let job = DeepAnalysisJob {
            session_id,
            transcript: session.transcript.clone(),
            context: deep_analysis_context(
                session.instant_metrics.as_ref(),
                session.key_moments.as_ref(),
            ),
            retry_count,
        };

        if let Err(e) = self.dispatcher.dispatch(job) {
            // The claim already consumed an attempt; restore the error
            // marker so the session is not left silently stuck in
            // processing with no task behind it.
            let marker = DeepAnalysisErrorMarker {
                message: format!("Retry dispatch failed: {}", e),
                retry_count,
                failed_at: Utc::now(),
            };
            if let Err(db_err) =
                db::sessions::mark_deep_analysis_error(&self.db, session_id, &marker).await
            {
                tracing::error!(
                    session_id = %session_id,
                    error = %db_err,
                    "Failed to restore error marker after dispatch failure"
                );
            }
            return Err(e.into());
        }

        Ok(RetryOutcome {
            session_id,
            grading_status: GradingStatus::Processing,
            retry_count,
        })
    }
}
