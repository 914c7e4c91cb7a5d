//! Normalized transcript turns

use serde::{Deserialize, Serialize};

/// Speaker role in a normalized transcript turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeakerRole {
    /// The trainee sales rep
    Rep,
    /// The simulated prospect on the other side of the call
    Counterpart,
}

/// One normalized utterance with a speaker role and derived timing
///
/// Timing is a coarse pacing proxy derived during normalization, not ground
/// truth from the audio stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Position of this turn in the conversation (0-based)
    pub sequence: usize,
    /// Who spoke
    pub speaker: SpeakerRole,
    /// Utterance text
    pub text: String,
    /// Start offset in milliseconds
    pub start_ms: i64,
    /// Derived end offset in milliseconds
    pub end_ms: i64,
}
