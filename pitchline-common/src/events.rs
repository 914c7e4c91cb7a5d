//! Event types for the Pitchline event system
//!
//! Provides shared event definitions and EventBus for all Pitchline modules.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// One stage of the grading pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradingPhase {
    /// Phase 1: instant call metrics
    InstantMetrics,
    /// Phase 2: key moment extraction
    KeyMoments,
    /// Phase 3: deep analysis and final scoring
    DeepAnalysis,
}

impl GradingPhase {
    /// Stable name used in logs, diagnostics and SSE payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            GradingPhase::InstantMetrics => "instant_metrics",
            GradingPhase::KeyMoments => "key_moments",
            GradingPhase::DeepAnalysis => "deep_analysis",
        }
    }
}

/// Pitchline event types
///
/// Events are broadcast via EventBus and can be serialized for SSE transmission.
/// All events use this central enum for type safety and exhaustive matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PitchlineEvent {
    /// A training call session was created (call started)
    SessionStarted {
        /// Session UUID
        session_id: Uuid,
        /// Trainee user id
        user_id: String,
        /// Voice agent id the trainee spoke with
        agent_id: String,
        /// When the call started
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A training call session was finalized (call ended)
    SessionEnded {
        /// Session UUID
        session_id: Uuid,
        /// Number of transcript turns at end of call
        turn_count: usize,
        /// When the call ended
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Grading orchestration began for a session
    GradingStarted {
        /// Session UUID
        session_id: Uuid,
        /// Number of normalized transcript turns being graded
        turn_count: usize,
        /// When orchestration began
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A grading phase completed successfully
    PhaseCompleted {
        /// Session UUID
        session_id: Uuid,
        /// Which pipeline phase completed
        phase: GradingPhase,
        /// Wall-clock phase duration in milliseconds
        elapsed_ms: u64,
        /// When the phase completed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A grading phase failed (pipeline continues; failure is recorded)
    PhaseFailed {
        /// Session UUID
        session_id: Uuid,
        /// Which pipeline phase failed
        phase: GradingPhase,
        /// Evaluator error message
        error: String,
        /// When the failure was recorded
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Deep analysis was dispatched as a background task
    DeepAnalysisDispatched {
        /// Session UUID
        session_id: Uuid,
        /// Retry counter at dispatch time (0 = first attempt)
        retry_count: u32,
        /// When dispatch occurred
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Deep analysis finished and final scores were persisted
    DeepAnalysisCompleted {
        /// Session UUID
        session_id: Uuid,
        /// Final overall score
        overall_score: f64,
        /// Whether the simulated sale closed
        sale_closed: bool,
        /// When final scores were written
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Deep analysis ran but errored; error marker persisted
    DeepAnalysisFailed {
        /// Session UUID
        session_id: Uuid,
        /// Persisted error message
        error: String,
        /// Retry counter at failure time
        retry_count: u32,
        /// When the error marker was written
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An external voice conversation was bound to a session
    ConversationCorrelated {
        /// Provider-side conversation id
        conversation_id: String,
        /// Matched session UUID
        session_id: Uuid,
        /// Confidence tier ("high", "medium", "low")
        confidence: String,
        /// When correlation was recorded
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl PitchlineEvent {
    /// Stable event type name for SSE `event:` fields and logging
    pub fn event_type(&self) -> &'static str {
        match self {
            PitchlineEvent::SessionStarted { .. } => "SessionStarted",
            PitchlineEvent::SessionEnded { .. } => "SessionEnded",
            PitchlineEvent::GradingStarted { .. } => "GradingStarted",
            PitchlineEvent::PhaseCompleted { .. } => "PhaseCompleted",
            PitchlineEvent::PhaseFailed { .. } => "PhaseFailed",
            PitchlineEvent::DeepAnalysisDispatched { .. } => "DeepAnalysisDispatched",
            PitchlineEvent::DeepAnalysisCompleted { .. } => "DeepAnalysisCompleted",
            PitchlineEvent::DeepAnalysisFailed { .. } => "DeepAnalysisFailed",
            PitchlineEvent::ConversationCorrelated { .. } => "ConversationCorrelated",
        }
    }
}

// ============================================================================
// EventBus Implementation
// ============================================================================

/// Event bus for broadcasting Pitchline events to all subscribers
///
/// Uses tokio::broadcast internally, providing:
/// - Multiple producers (any component can emit)
/// - Multiple consumers (SSE handlers, loggers, tests)
/// - Bounded buffering (old events dropped when capacity exceeded)
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PitchlineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before dropping old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Returns a receiver that will receive all events emitted after
    /// subscription. Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<PitchlineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PitchlineEvent,
    ) -> Result<usize, broadcast::error::SendError<PitchlineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    ///
    /// Useful for non-critical events where it's acceptable if no component
    /// is currently listening.
    pub fn emit_lossy(&self, event: PitchlineEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
