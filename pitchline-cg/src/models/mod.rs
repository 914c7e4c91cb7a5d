//! Data model for the call grading service

pub mod conversation;
pub mod session;
pub mod turn;

pub use conversation::{
    CorrelationConfidence, CorrelationResult, ExternalConversationEvent,
};
pub use session::{DeepAnalysisErrorMarker, GradingStatus, SessionScores, TrainingSession};
pub use turn::{SpeakerRole, Turn};
