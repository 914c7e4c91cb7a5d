//! Service modules for the call grading pipeline

pub mod deep_analysis;
pub mod evaluator_client;
pub mod grading_orchestrator;
pub mod health_diagnostic;
pub mod retry_controller;
pub mod session_correlator;
pub mod transcript_normalizer;

pub use deep_analysis::{
    BackgroundDeepAnalysis, DeepAnalysisDispatcher, DeepAnalysisJob, DispatchError,
};
pub use evaluator_client::{
    DeepAnalysisResult, EvalError, EvaluationRequest, EvaluatorClient, PhaseEvaluator,
};
pub use grading_orchestrator::{
    GradingError, GradingOrchestrator, GradingReport, GradingRequest, PhaseOutcome, PhaseStatus,
};
pub use health_diagnostic::{diagnose, DiagnosisStatus, GradingDiagnosis};
pub use retry_controller::{RetryController, RetryError, RetryOutcome, MAX_DEEP_ANALYSIS_RETRIES};
pub use session_correlator::SessionCorrelator;
pub use transcript_normalizer::{
    NormalizeError, RawTimestamp, RawTranscriptEntry, TranscriptNormalizer,
};
