//! Training session record and grading state machine
//!
//! A session is created when a call starts and ended when the call
//! terminates; grading begins post-end and progresses through the
//! pending → phase1_done → phase2_done → processing → complete | error
//! state machine. An explicit retry may move error back to processing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Turn;

/// Persisted grading pipeline state for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradingStatus {
    /// Grading has not started
    Pending,
    /// Instant metrics persisted
    Phase1Done,
    /// Key moments persisted
    Phase2Done,
    /// Deep analysis dispatched and in flight
    Processing,
    /// Deep analysis persisted final scores
    Complete,
    /// Deep analysis ran but errored (marker in diagnostics)
    Error,
}

impl GradingStatus {
    /// Database TEXT representation
    pub fn as_str(&self) -> &'static str {
        match self {
            GradingStatus::Pending => "pending",
            GradingStatus::Phase1Done => "phase1_done",
            GradingStatus::Phase2Done => "phase2_done",
            GradingStatus::Processing => "processing",
            GradingStatus::Complete => "complete",
            GradingStatus::Error => "error",
        }
    }

    /// Parse the database TEXT representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(GradingStatus::Pending),
            "phase1_done" => Some(GradingStatus::Phase1Done),
            "phase2_done" => Some(GradingStatus::Phase2Done),
            "processing" => Some(GradingStatus::Processing),
            "complete" => Some(GradingStatus::Complete),
            "error" => Some(GradingStatus::Error),
            _ => None,
        }
    }

    /// Forward-progress rank of non-error states
    fn rank(&self) -> u8 {
        match self {
            GradingStatus::Pending => 0,
            GradingStatus::Phase1Done => 1,
            GradingStatus::Phase2Done => 2,
            GradingStatus::Processing => 3,
            GradingStatus::Complete => 4,
            // Error sits outside the forward ladder
            GradingStatus::Error => 3,
        }
    }

    /// Whether a transition from `prev` to `self` is allowed
    ///
    /// Status is monotonic: a write never moves a session backwards. The one
    /// sanctioned exception is an explicit retry moving error → processing.
    pub fn may_follow(&self, prev: GradingStatus) -> bool {
        if *self == prev {
            // Idempotent rewrite of the same state
            return true;
        }
        match (prev, *self) {
            // Retry edge
            (GradingStatus::Error, GradingStatus::Processing) => true,
            // Complete is terminal
            (GradingStatus::Complete, _) => false,
            // Error is reachable from any non-complete state
            (_, GradingStatus::Error) => true,
            (p, n) => n.rank() > p.rank(),
        }
    }
}

/// Final category scores written by deep analysis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionScores {
    pub overall: f64,
    pub rapport: f64,
    pub discovery: f64,
    pub objection_handling: f64,
    pub close_effectiveness: f64,
}

/// Persisted error marker for a failed deep analysis attempt
///
/// Written into the session diagnostics bag so the health diagnostic can
/// distinguish "errored" from "still running". Never left implicit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepAnalysisErrorMarker {
    /// Evaluator error message
    pub message: String,
    /// Retry counter value when the failure was recorded
    pub retry_count: u32,
    /// When the failure was recorded
    pub failed_at: DateTime<Utc>,
}

/// One sales training call session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSession {
    /// Unique session identifier
    pub id: Uuid,
    /// Trainee user id
    pub user_id: String,
    /// Voice agent id the trainee spoke with
    pub agent_id: String,
    /// Provider-side conversation id, set by correlation
    pub conversation_id: Option<String>,
    /// Call start time
    pub started_at: DateTime<Utc>,
    /// Call end time (None while the call is live)
    pub ended_at: Option<DateTime<Utc>>,
    /// Normalized transcript turns, ordered by start_ms
    pub transcript: Vec<Turn>,
    /// Phase 1 payload (opaque evaluator output)
    pub instant_metrics: Option<serde_json::Value>,
    /// Phase 2 payload (opaque evaluator output)
    pub key_moments: Option<serde_json::Value>,
    /// Phase 3 payload (opaque evaluator output)
    pub deep_analysis: Option<serde_json::Value>,
    /// Final category scores, written once by deep analysis
    pub scores: Option<SessionScores>,
    /// Whether the simulated sale closed
    pub sale_closed: Option<bool>,
    /// Virtual earnings credited for this call
    pub virtual_earnings: f64,
    /// Grading pipeline state
    pub grading_status: GradingStatus,
    /// When final scores were written
    pub graded_at: Option<DateTime<Utc>>,
    /// Deep analysis retry counter (bounded by the retry controller)
    pub retry_count: u32,
    /// Free-form diagnostics bag: per-phase error markers and timestamps
    pub diagnostics: serde_json::Value,
}

/// Diagnostics key holding the deep analysis error marker
pub const DEEP_ANALYSIS_ERROR_KEY: &str = "deep_analysis_error";

impl TrainingSession {
    /// Create a new session at call start
    pub fn new(user_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            agent_id: agent_id.into(),
            conversation_id: None,
            started_at: Utc::now(),
            ended_at: None,
            transcript: Vec::new(),
            instant_metrics: None,
            key_moments: None,
            deep_analysis: None,
            scores: None,
            sale_closed: None,
            virtual_earnings: 0.0,
            grading_status: GradingStatus::Pending,
            graded_at: None,
            retry_count: 0,
            diagnostics: serde_json::json!({}),
        }
    }

    /// Whether the session has a non-empty transcript
    pub fn has_transcript(&self) -> bool {
        !self.transcript.is_empty()
    }

    /// Extract the deep analysis error marker, if one is persisted
    pub fn deep_analysis_error_marker(&self) -> Option<DeepAnalysisErrorMarker> {
        self.diagnostics
            .get(DEEP_ANALYSIS_ERROR_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}
