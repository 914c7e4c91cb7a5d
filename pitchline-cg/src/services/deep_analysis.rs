//! Deep analysis background dispatch
//!
//! Phase 3 is fire-and-forget: the orchestrator issues the dispatch and
//! returns without waiting, and the analysis outlives the triggering
//! request. Rather than a bare unawaited call, dispatch goes through the
//! `DeepAnalysisDispatcher` seam so failure visibility and retry stay
//! first-class: every outcome of the detached task is persisted, either as
//! final scores or as an explicit error marker.

use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use pitchline_common::events::{EventBus, PitchlineEvent};

use crate::db;
use crate::models::{DeepAnalysisErrorMarker, Turn};
use crate::services::evaluator_client::{EvaluationRequest, PhaseEvaluator};

/// Deep analysis dispatch errors (synchronous, pre-spawn)
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Job carried no transcript to analyze
    #[error("Cannot dispatch deep analysis without a transcript")]
    MissingTranscript,

    /// Dispatch backend failed to accept the job
    #[error("Dispatch failed: {0}")]
    Backend(String),
}

/// One unit of detached deep analysis work
#[derive(Debug, Clone)]
pub struct DeepAnalysisJob {
    pub session_id: Uuid,
    pub transcript: Vec<Turn>,
    /// Whatever instant metrics / key moments are currently persisted
    pub context: serde_json::Value,
    /// Retry counter at dispatch time (0 = first attempt)
    pub retry_count: u32,
}

/// Seam for dispatching the detached phase-3 task
///
/// `dispatch` returns as soon as the job is accepted; it never waits for the
/// analysis itself. A synchronous error here means the job could not even be
/// started.
pub trait DeepAnalysisDispatcher: Send + Sync {
    fn dispatch(&self, job: DeepAnalysisJob) -> Result<(), DispatchError>;
}

/// Production dispatcher: runs the job on a detached tokio task
///
/// The spawned task has an independent lifetime; an abandoned triggering
/// request does not stop it.
pub struct BackgroundDeepAnalysis {
    db: SqlitePool,
    evaluator: Arc<dyn PhaseEvaluator>,
    event_bus: EventBus,
}

impl BackgroundDeepAnalysis {
    pub fn new(db: SqlitePool, evaluator: Arc<dyn PhaseEvaluator>, event_bus: EventBus) -> Self {
        Self {
            db,
            evaluator,
            event_bus,
        }
    }
}

impl DeepAnalysisDispatcher for BackgroundDeepAnalysis {
    fn dispatch(&self, job: DeepAnalysisJob) -> Result<(), DispatchError> {
        if job.transcript.is_empty() {
            return Err(DispatchError::MissingTranscript);
        }

        let db = self.db.clone();
        let evaluator = self.evaluator.clone();
        let event_bus = self.event_bus.clone();

        self.event_bus.emit_lossy(PitchlineEvent::DeepAnalysisDispatched {
            session_id: job.session_id,
            retry_count: job.retry_count,
            timestamp: Utc::now(),
        });

        tokio::spawn(async move {
            run_deep_analysis(db, evaluator, event_bus, job).await;
        });

        Ok(())
    }
}

/// Execute one deep analysis attempt and persist its outcome
///
/// On success: deep_analysis payload, final scores, sale_closed,
/// virtual_earnings, graded_at and grading_status = complete. On failure: an
/// explicit error marker so the session is never silently stuck.
async fn run_deep_analysis(
    db: SqlitePool,
    evaluator: Arc<dyn PhaseEvaluator>,
    event_bus: EventBus,
    job: DeepAnalysisJob,
) {
    let session_id = job.session_id;

    tracing::info!(
        session_id = %session_id,
        retry_count = job.retry_count,
        "Deep analysis task started"
    );

    let request = EvaluationRequest {
        session_id,
        transcript: job.transcript,
        context: job.context,
    };

    match evaluator.evaluate_deep(&request).await {
        Ok(result) => {
            if let Err(e) = db::sessions::complete_deep_analysis(
                &db,
                session_id,
                &result.analysis,
                &result.scores,
                result.sale_closed,
                result.virtual_earnings,
            )
            .await
            {
                tracing::error!(
                    session_id = %session_id,
                    error = %e,
                    "Deep analysis succeeded but persisting results failed"
                );
                return;
            }

            tracing::info!(
                session_id = %session_id,
                overall = result.scores.overall,
                sale_closed = result.sale_closed,
                "Deep analysis completed, final scores written"
            );

            event_bus.emit_lossy(PitchlineEvent::DeepAnalysisCompleted {
                session_id,
                overall_score: result.scores.overall,
                sale_closed: result.sale_closed,
                timestamp: Utc::now(),
            });
        }
        Err(e) => {
            let marker = DeepAnalysisErrorMarker {
                message: e.to_string(),
                retry_count: job.retry_count,
                failed_at: Utc::now(),
            };

            tracing::warn!(
                session_id = %session_id,
                retry_count = job.retry_count,
                error = %e,
                "Deep analysis failed, persisting error marker"
            );

            if let Err(db_err) =
                db::sessions::mark_deep_analysis_error(&db, session_id, &marker).await
            {
                tracing::error!(
                    session_id = %session_id,
                    error = %db_err,
                    "Failed to persist deep analysis error marker"
                );
            }

            event_bus.emit_lossy(PitchlineEvent::DeepAnalysisFailed {
                session_id,
                error: marker.message,
                retry_count: job.retry_count,
                timestamp: Utc::now(),
            });
        }
    }
}

/// Build the phase-3 context object from whatever phase 1/2 outputs exist
pub fn deep_analysis_context(
    instant_metrics: Option<&serde_json::Value>,
    key_moments: Option<&serde_json::Value>,
) -> serde_json::Value {
    serde_json::json!({
        "instant_metrics": instant_metrics.cloned().unwrap_or(serde_json::Value::Null),
        "key_moments": key_moments.cloned().unwrap_or(serde_json::Value::Null),
    })
}
