//! Grading orchestrator
//!
//! Drives the three grading phases for one session, tolerating partial
//! failure:
//!
//! pending → phase1_done → phase2_done → (phase 3 dispatched, async)
//!         → complete | error
//!
//! Phase 1 runs synchronously and feeds phase 2 as context; a phase 1
//! failure does not block phase 2. Phase 3 is dispatched and never awaited;
//! the orchestrator returns immediately after dispatch with a structured
//! report. The only error that escapes this module is the precondition
//! (missing session or empty transcript), raised before any phase runs and
//! before any session field is mutated.

use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;

use pitchline_common::events::{EventBus, GradingPhase, PitchlineEvent};

use crate::db;
use crate::models::{TrainingSession, Turn};
use crate::services::deep_analysis::{
    deep_analysis_context, DeepAnalysisDispatcher, DeepAnalysisJob,
};
use crate::services::evaluator_client::{EvaluationRequest, PhaseEvaluator};
use crate::services::transcript_normalizer::{RawTranscriptEntry, TranscriptNormalizer};

/// Diagnostics keys for non-fatal phase failures
const INSTANT_METRICS_ERROR_KEY: &str = "instant_metrics_error";
const KEY_MOMENTS_ERROR_KEY: &str = "key_moments_error";
const DEEP_DISPATCH_ERROR_KEY: &str = "deep_analysis_dispatch_error";

/// Fatal orchestration errors
///
/// Everything else a phase can do wrong is recovered into the report.
#[derive(Debug, Error)]
pub enum GradingError {
    /// Missing session or empty transcript; raised before any phase runs
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Datastore failure while resolving the session
    #[error(transparent)]
    Storage(#[from] pitchline_common::Error),
}

/// Orchestration entrypoint input
#[derive(Debug, Clone, Default)]
pub struct GradingRequest {
    pub session_id: Uuid,
    /// Caller-supplied raw transcript; takes precedence over the persisted one
    pub transcript: Option<Vec<RawTranscriptEntry>>,
    /// Provider conversation id to link, when the caller already knows it
    pub external_conversation_id: Option<String>,
}

/// Outcome status of one phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    /// Phase succeeded (for deep analysis: dispatch was accepted)
    Complete,
    /// Evaluator returned failure or raised; pipeline continued
    Failed,
    /// Phase could not even be started
    Error,
}

/// Structured record of one phase outcome
#[derive(Debug, Clone, Serialize)]
pub struct PhaseOutcome {
    pub status: PhaseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl PhaseOutcome {
    fn complete(data: serde_json::Value, elapsed_ms: u64) -> Self {
        Self {
            status: PhaseStatus::Complete,
            data: Some(data),
            error: None,
            elapsed_ms,
        }
    }

    fn failed(error: String, elapsed_ms: u64) -> Self {
        Self {
            status: PhaseStatus::Failed,
            data: None,
            error: Some(error),
            elapsed_ms,
        }
    }

    fn error(error: String, elapsed_ms: u64) -> Self {
        Self {
            status: PhaseStatus::Error,
            data: None,
            error: Some(error),
            elapsed_ms,
        }
    }
}

/// Per-phase entries of the grading report
#[derive(Debug, Clone, Serialize)]
pub struct PhaseReports {
    pub instant: PhaseOutcome,
    #[serde(rename = "keyMoments")]
    pub key_moments: PhaseOutcome,
    #[serde(rename = "deepAnalysis")]
    pub deep_analysis: PhaseOutcome,
}

/// Orchestration entrypoint output
///
/// `status` reports that orchestration itself completed; deep analysis is
/// still in flight. Callers poll the diagnosis surface for the final verdict.
#[derive(Debug, Clone, Serialize)]
pub struct GradingReport {
    pub phases: PhaseReports,
    #[serde(rename = "totalTimeElapsed")]
    pub total_time_elapsed_ms: u64,
    pub status: String,
}

/// Grading orchestrator service
pub struct GradingOrchestrator {
    db: SqlitePool,
    event_bus: EventBus,
    evaluator: Arc<dyn PhaseEvaluator>,
    dispatcher: Arc<dyn DeepAnalysisDispatcher>,
    normalizer: TranscriptNormalizer,
}

impl GradingOrchestrator {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        evaluator: Arc<dyn PhaseEvaluator>,
        dispatcher: Arc<dyn DeepAnalysisDispatcher>,
    ) -> Self {
        Self {
            db,
            event_bus,
            evaluator,
            dispatcher,
            normalizer: TranscriptNormalizer::new(),
        }
    }

    /// Execute the grading pipeline for one session
    ///
    /// Re-invoking for the same session never raises (for a gradable
    /// session) and never regresses grading_status: payload writes are
    /// idempotent overwrites and status advances are guarded.
    pub async fn run(&self, request: GradingRequest) -> Result<GradingReport, GradingError> {
        let start_time = Instant::now();
        let session_id = request.session_id;

        // Precondition: session exists and resolves to a non-empty
        // transcript. Nothing is mutated until this passes.
        let session = db::sessions::load_session(&self.db, session_id)
            .await?
            .ok_or_else(|| {
                GradingError::Precondition(format!("Session not found: {}", session_id))
            })?;

        let turns = self.resolve_transcript(&session, request.transcript.as_deref())?;

        tracing::info!(
            session_id = %session_id,
            turns = turns.len(),
            grading_status = session.grading_status.as_str(),
            "Starting grading orchestration"
        );

        self.event_bus.emit_lossy(PitchlineEvent::GradingStarted {
            session_id,
            turn_count: turns.len(),
            timestamp: Utc::now(),
        });

        // Persist a caller-supplied transcript so later phases and retries
        // see the same turns this run grades.
        if request.transcript.is_some() {
            if let Err(e) = db::sessions::update_transcript(&self.db, session_id, &turns).await {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to persist supplied transcript");
            }
        }

        // Correlation enrichment, never a blocking dependency of grading
        if let Some(conversation_id) = &request.external_conversation_id {
            if let Err(e) =
                db::sessions::link_conversation(&self.db, session_id, conversation_id).await
            {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to link conversation id");
            }
        }

        // Phase 1: instant metrics
        let instant = self.phase_instant(session_id, &turns).await;

        // Phase 2: key moments, with the freshest available instant-metrics
        // context: just-computed, else previously persisted.
        let phase2_context = instant
            .data
            .clone()
            .or_else(|| session.instant_metrics.clone());
        let key_moments = self
            .phase_key_moments(session_id, &turns, phase2_context)
            .await;

        // Phase 3: dispatched, never awaited
        let deep_analysis = self
            .phase_dispatch_deep(&session, &turns, &instant, &key_moments)
            .await;

        let report = GradingReport {
            phases: PhaseReports {
                instant,
                key_moments,
                deep_analysis,
            },
            total_time_elapsed_ms: start_time.elapsed().as_millis() as u64,
            status: "orchestration_complete".to_string(),
        };

        tracing::info!(
            session_id = %session_id,
            elapsed_ms = report.total_time_elapsed_ms,
            "Grading orchestration complete (deep analysis in flight)"
        );

        Ok(report)
    }

    /// Caller-supplied transcript takes precedence over the persisted one
    fn resolve_transcript(
        &self,
        session: &TrainingSession,
        supplied: Option<&[RawTranscriptEntry]>,
    ) -> Result<Vec<Turn>, GradingError> {
        match supplied {
            Some(entries) => self.normalizer.normalize(entries).map_err(|e| {
                GradingError::Precondition(format!(
                    "Session {}: {}",
                    session.id, e
                ))
            }),
            None => {
                if session.has_transcript() {
                    Ok(session.transcript.clone())
                } else {
                    Err(GradingError::Precondition(format!(
                        "Session {} has no transcript to grade",
                        session.id
                    )))
                }
            }
        }
    }

    async fn phase_instant(&self, session_id: Uuid, turns: &[Turn]) -> PhaseOutcome {
        let phase_start = Instant::now();
        let request = EvaluationRequest {
            session_id,
            transcript: turns.to_vec(),
            context: serde_json::Value::Null,
        };

        match self.evaluator.evaluate_instant(&request).await {
            Ok(metrics) => {
                if let Err(e) =
                    db::sessions::update_instant_metrics(&self.db, session_id, &metrics).await
                {
                    tracing::warn!(session_id = %session_id, error = %e, "Failed to persist instant metrics");
                }
                let elapsed_ms = phase_start.elapsed().as_millis() as u64;
                self.event_bus.emit_lossy(PitchlineEvent::PhaseCompleted {
                    session_id,
                    phase: GradingPhase::InstantMetrics,
                    elapsed_ms,
                    timestamp: Utc::now(),
                });
                PhaseOutcome::complete(metrics, elapsed_ms)
            }
            Err(e) => {
                self.record_phase_failure(
                    session_id,
                    GradingPhase::InstantMetrics,
                    INSTANT_METRICS_ERROR_KEY,
                    &e.to_string(),
                )
                .await;
                PhaseOutcome::failed(e.to_string(), phase_start.elapsed().as_millis() as u64)
            }
        }
    }

    async fn phase_key_moments(
        &self,
        session_id: Uuid,
        turns: &[Turn],
        context: Option<serde_json::Value>,
    ) -> PhaseOutcome {
        let phase_start = Instant::now();
        let request = EvaluationRequest {
            session_id,
            transcript: turns.to_vec(),
            context: context.unwrap_or(serde_json::Value::Null),
        };

        match self.evaluator.evaluate_key_moments(&request).await {
            Ok(moments) => {
                if let Err(e) =
                    db::sessions::update_key_moments(&self.db, session_id, &moments).await
                {
                    tracing::warn!(session_id = %session_id, error = %e, "Failed to persist key moments");
                }
                let elapsed_ms = phase_start.elapsed().as_millis() as u64;
                self.event_bus.emit_lossy(PitchlineEvent::PhaseCompleted {
                    session_id,
                    phase: GradingPhase::KeyMoments,
                    elapsed_ms,
                    timestamp: Utc::now(),
                });
                PhaseOutcome::complete(moments, elapsed_ms)
            }
            Err(e) => {
                self.record_phase_failure(
                    session_id,
                    GradingPhase::KeyMoments,
                    KEY_MOMENTS_ERROR_KEY,
                    &e.to_string(),
                )
                .await;
                PhaseOutcome::failed(e.to_string(), phase_start.elapsed().as_millis() as u64)
            }
        }
    }

    /// Dispatch phase 3 without waiting on it
    ///
    /// A synchronous failure merely to start the phase is caught, recorded
    /// as the deepAnalysis outcome and does not fail the orchestration
    /// response.
    async fn phase_dispatch_deep(
        &self,
        session: &TrainingSession,
        turns: &[Turn],
        instant: &PhaseOutcome,
        key_moments: &PhaseOutcome,
    ) -> PhaseOutcome {
        let phase_start = Instant::now();
        let session_id = session.id;

        let fresh_instant = instant
            .data
            .clone()
            .or_else(|| session.instant_metrics.clone());
        let fresh_moments = key_moments
            .data
            .clone()
            .or_else(|| session.key_moments.clone());
        let context = deep_analysis_context(fresh_instant.as_ref(), fresh_moments.as_ref());

        if let Err(e) = db::sessions::mark_processing(&self.db, session_id).await {
            tracing::warn!(session_id = %session_id, error = %e, "Failed to mark session processing");
        }

        let job = DeepAnalysisJob {
            session_id,
            transcript: turns.to_vec(),
            context,
            retry_count: session.retry_count,
        };

        match self.dispatcher.dispatch(job) {
            Ok(()) => {
                tracing::info!(session_id = %session_id, "Deep analysis dispatched");
                PhaseOutcome::complete(
                    serde_json::json!({ "dispatched": true }),
                    phase_start.elapsed().as_millis() as u64,
                )
            }
            Err(e) => {
                self.record_phase_failure(
                    session_id,
                    GradingPhase::DeepAnalysis,
                    DEEP_DISPATCH_ERROR_KEY,
                    &e.to_string(),
                )
                .await;
                PhaseOutcome::error(e.to_string(), phase_start.elapsed().as_millis() as u64)
            }
        }
    }

    async fn record_phase_failure(
        &self,
        session_id: Uuid,
        phase: GradingPhase,
        diagnostics_key: &str,
        message: &str,
    ) {
        tracing::warn!(
            session_id = %session_id,
            phase = phase.as_str(),
            error = message,
            "Grading phase failed, pipeline continues"
        );

        if let Err(e) =
            db::sessions::record_phase_failure(&self.db, session_id, diagnostics_key, message)
                .await
        {
            tracing::warn!(session_id = %session_id, error = %e, "Failed to record phase failure");
        }

        self.event_bus.emit_lossy(PitchlineEvent::PhaseFailed {
            session_id,
            phase,
            error: message.to_string(),
            timestamp: Utc::now(),
        });
    }
}
