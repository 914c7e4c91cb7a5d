//! Transcript normalization
//!
//! Converts raw speaker/text/timestamp entries into ordered, typed turns.
//! Timing fallbacks (4000 ms spacing, 30 ms/char, 1500 ms floor) are coarse
//! pacing proxies carried over for behavioral compatibility, not ground
//! truth from the audio stream.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{SpeakerRole, Turn};

/// Synthetic spacing between turns with no timestamp
const MISSING_TIMESTAMP_SPACING_MS: i64 = 4000;

/// Estimated speaking pace per character of text
const MS_PER_CHAR: i64 = 30;

/// Minimum derived turn duration
const MIN_TURN_DURATION_MS: i64 = 1500;

/// Transcript normalization errors
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// Empty input is a hard precondition failure, never a silent degrade
    #[error("Transcript is empty")]
    EmptyTranscript,
}

/// Raw timestamp as delivered by the transcript source: epoch milliseconds,
/// an ISO-8601 string, or absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    /// Epoch milliseconds
    EpochMs(i64),
    /// ISO-8601 / RFC 3339 string
    Iso(String),
}

/// One raw transcript entry before normalization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTranscriptEntry {
    /// Raw speaker label ("user", "rep", "agent", ...)
    pub speaker: String,
    /// Utterance text
    pub text: String,
    /// Raw timestamp, if the source supplied one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<RawTimestamp>,
}

/// Transcript normalizer service
#[derive(Debug, Default)]
pub struct TranscriptNormalizer;

impl TranscriptNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Normalize raw entries into ordered turns
    ///
    /// Numeric timestamps are used directly; string timestamps are parsed to
    /// epoch-ms; missing (or unparseable) timestamps are synthesized at fixed
    /// 4000 ms spacing by index to preserve source order. Output is sorted by
    /// start_ms ascending (stable, so equal timestamps keep source order).
    pub fn normalize(&self, entries: &[RawTranscriptEntry]) -> Result<Vec<Turn>, NormalizeError> {
        if entries.is_empty() {
            return Err(NormalizeError::EmptyTranscript);
        }

        let mut turns: Vec<Turn> = entries
            .iter()
            .enumerate()
            .map(|(index, entry)| self.normalize_entry(entry, index))
            .collect();

        turns.sort_by_key(|turn| turn.start_ms);
        for (index, turn) in turns.iter_mut().enumerate() {
            turn.sequence = index;
        }

        Ok(turns)
    }

    /// Normalize one raw entry at a given conversation index
    ///
    /// Also used when appending turns to a live session, so the timing
    /// fallbacks stay in one place.
    pub fn normalize_entry(&self, entry: &RawTranscriptEntry, index: usize) -> Turn {
        let start_ms = resolve_start_ms(entry.timestamp.as_ref(), index);
        let duration_ms =
            (entry.text.chars().count() as i64 * MS_PER_CHAR).max(MIN_TURN_DURATION_MS);

        Turn {
            sequence: index,
            speaker: normalize_speaker(&entry.speaker),
            text: entry.text.clone(),
            start_ms,
            end_ms: start_ms + duration_ms,
        }
    }
}

/// Map raw speaker labels onto the two conversation roles
fn normalize_speaker(raw: &str) -> SpeakerRole {
    match raw.trim().to_ascii_lowercase().as_str() {
        "user" | "rep" => SpeakerRole::Rep,
        _ => SpeakerRole::Counterpart,
    }
}

fn resolve_start_ms(timestamp: Option<&RawTimestamp>, index: usize) -> i64 {
    match timestamp {
        Some(RawTimestamp::EpochMs(ms)) => *ms,
        Some(RawTimestamp::Iso(s)) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.timestamp_millis())
            .unwrap_or_else(|_| synthetic_start_ms(index)),
        None => synthetic_start_ms(index),
    }
}

fn synthetic_start_ms(index: usize) -> i64 {
    index as i64 * MISSING_TIMESTAMP_SPACING_MS
}
