//! External voice conversation events and correlation results
//!
//! The voice provider and the training platform share no primary key, so
//! end-of-call notifications are bound to sessions by the correlator using a
//! time-window heuristic.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Qualitative closeness of a correlation match in time
///
/// Advisory metadata, not a gate: callers decide whether to require a
/// particular tier before using the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationConfidence {
    /// |Δt| under 1 minute
    High,
    /// |Δt| under 3 minutes
    Medium,
    /// |Δt| inside the window but 3 minutes or more
    Low,
}

impl CorrelationConfidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrelationConfidence::High => "high",
            CorrelationConfidence::Medium => "medium",
            CorrelationConfidence::Low => "low",
        }
    }
}

/// Result of binding an external conversation event to a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub session_id: Uuid,
    pub user_id: String,
    pub confidence: CorrelationConfidence,
}

/// End-of-call notification pushed by the voice provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalConversationEvent {
    /// Provider-side conversation id
    pub conversation_id: String,
    /// Voice agent id
    pub agent_id: String,
    /// When the conversation occurred
    pub occurred_at: DateTime<Utc>,
    /// Remaining provider metadata, kept opaque
    pub metadata: serde_json::Value,
}

impl ExternalConversationEvent {
    /// Parse a provider webhook payload
    ///
    /// The provider sends timing in one of two shapes: a nested
    /// `metadata.started` field or a top-level `created` field. The nested
    /// "started" timestamp is preferred when both are present.
    pub fn from_webhook_payload(payload: &serde_json::Value) -> Option<Self> {
        let conversation_id = payload.get("conversation_id")?.as_str()?.to_string();
        let agent_id = payload.get("agent_id")?.as_str()?.to_string();

        let metadata = payload
            .get("metadata")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));

        let occurred_at = metadata
            .get("started")
            .and_then(parse_event_timestamp)
            .or_else(|| payload.get("created").and_then(parse_event_timestamp))?;

        Some(Self {
            conversation_id,
            agent_id,
            occurred_at,
            metadata,
        })
    }
}

/// Parse a provider timestamp value: epoch milliseconds or ISO-8601 string
fn parse_event_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    if let Some(ms) = value.as_i64() {
        return Utc.timestamp_millis_opt(ms).single();
    }
    if let Some(s) = value.as_str() {
        return DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc));
    }
    None
}
