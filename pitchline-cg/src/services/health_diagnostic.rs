//! Grading health diagnostic
//!
//! Read-only inference over a session's persisted fields. Never re-runs
//! grading and performs no remediation; recommendations are advisory
//! strings for operators and automation.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{GradingStatus, TrainingSession};
use crate::services::retry_controller::MAX_DEEP_ANALYSIS_RETRIES;

/// A session ended longer ago than this with incomplete grading is stuck
const STUCK_THRESHOLD_MINUTES: i64 = 5;

/// Overall diagnosis status; checks only ever downgrade it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosisStatus {
    Healthy,
    Warning,
    Error,
}

impl DiagnosisStatus {
    fn severity(&self) -> u8 {
        match self {
            DiagnosisStatus::Healthy => 0,
            DiagnosisStatus::Warning => 1,
            DiagnosisStatus::Error => 2,
        }
    }
}

/// Phase-completion booleans derived from persisted payloads
#[derive(Debug, Clone, Serialize)]
pub struct PhaseCompletion {
    pub instant_metrics: bool,
    pub key_moments: bool,
    pub deep_analysis: bool,
}

/// Full diagnosis of a session's grading pipeline
#[derive(Debug, Clone, Serialize)]
pub struct GradingDiagnosis {
    pub session_id: Uuid,
    pub status: DiagnosisStatus,
    pub grading_status: GradingStatus,
    pub phases: PhaseCompletion,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub retry_count: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub graded_at: Option<DateTime<Utc>>,
}

impl GradingDiagnosis {
    fn downgrade(&mut self, to: DiagnosisStatus) {
        if to.severity() > self.status.severity() {
            self.status = to;
        }
    }
}

/// Diagnose a session's grading pipeline from its persisted state
///
/// `now` is passed in rather than read from the clock so the stuck check is
/// deterministic under test.
pub fn diagnose(session: &TrainingSession, now: DateTime<Utc>) -> GradingDiagnosis {
    let mut diagnosis = GradingDiagnosis {
        session_id: session.id,
        status: DiagnosisStatus::Healthy,
        grading_status: session.grading_status,
        phases: PhaseCompletion {
            instant_metrics: session.instant_metrics.is_some(),
            key_moments: session.key_moments.is_some(),
            deep_analysis: session.deep_analysis.is_some(),
        },
        issues: Vec::new(),
        recommendations: Vec::new(),
        retry_count: session.retry_count,
        started_at: session.started_at,
        ended_at: session.ended_at,
        graded_at: session.graded_at,
    };

    // 1. Call never finalized: nothing downstream can run
    if session.ended_at.is_none() {
        diagnosis.downgrade(DiagnosisStatus::Error);
        diagnosis
            .issues
            .push("Session has not been finalized (ended_at missing)".to_string());
        diagnosis.recommendations.push(format!(
            "Finalize the session (POST /sessions/{}/end) so grading can run",
            session.id
        ));
    }

    // 2. No transcript, nothing to grade
    if !session.has_transcript() {
        diagnosis.downgrade(DiagnosisStatus::Error);
        diagnosis
            .issues
            .push("Transcript is missing or empty".to_string());
    }

    // 3. Instant metrics missing: noted, no escalation on its own
    if session.instant_metrics.is_none() {
        diagnosis
            .issues
            .push("Instant metrics have not been recorded".to_string());
    }

    // 4. Phase 2 behind phase 1
    if session.key_moments.is_none() && session.instant_metrics.is_some() {
        diagnosis
            .issues
            .push("Key moments missing while instant metrics are present".to_string());
    }

    // 5. Phase 3 behind phase 2; an explicit error marker escalates
    if session.deep_analysis.is_none() && session.key_moments.is_some() {
        diagnosis.downgrade(DiagnosisStatus::Warning);
        diagnosis
            .issues
            .push("Deep analysis missing while key moments are present".to_string());

        if let Some(marker) = session.deep_analysis_error_marker() {
            diagnosis.downgrade(DiagnosisStatus::Error);
            diagnosis
                .issues
                .push(format!("Deep analysis failed: {}", marker.message));
            if session.retry_count < MAX_DEEP_ANALYSIS_RETRIES {
                diagnosis.recommendations.push(format!(
                    "Retry deep analysis (POST /grading/retry/{})",
                    session.id
                ));
            } else {
                diagnosis.recommendations.push(
                    "Deep analysis retry budget exhausted; manual intervention required"
                        .to_string(),
                );
            }
        }
    }

    // 6. Inconsistent state: complete without a numeric score
    if session.grading_status == GradingStatus::Complete && session.scores.is_none() {
        diagnosis.downgrade(DiagnosisStatus::Warning);
        diagnosis
            .issues
            .push("Grading marked complete but no numeric score is present".to_string());
    }

    // 7. Finalized long ago, still not graded: pipeline appears stuck
    if let Some(ended_at) = session.ended_at {
        let since_end = now - ended_at;
        if since_end > Duration::minutes(STUCK_THRESHOLD_MINUTES)
            && session.grading_status != GradingStatus::Complete
        {
            diagnosis.downgrade(DiagnosisStatus::Error);
            diagnosis.issues.push(format!(
                "Call ended {} minutes ago but grading is not complete; pipeline appears stuck",
                since_end.num_minutes()
            ));
        }
    }

    diagnosis
}
