//! Remote phase evaluator client
//!
//! The three grading phases (instant metrics, key moments, deep analysis)
//! are opaque remote operations with their own latency and availability
//! profiles. This module defines the `PhaseEvaluator` seam the orchestrator
//! and retry controller depend on, plus the production HTTP implementation.
//!
//! What an evaluator computes (the rubric, the prompts) is collaborator
//! behavior and is not modeled here; payloads stay opaque JSON.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{SessionScores, Turn};

const USER_AGENT: &str = "Pitchline/0.1.0 (https://github.com/pitchline/pitchline)";
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Phase evaluator errors
#[derive(Debug, Error)]
pub enum EvalError {
    /// Network communication error
    #[error("Network error: {0}")]
    Network(String),

    /// Evaluator API returned an error response
    #[error("Evaluator error {0}: {1}")]
    Api(u16, String),

    /// Failed to parse the evaluator response
    #[error("Parse error: {0}")]
    Parse(String),

    /// Evaluator explicitly rejected the transcript
    #[error("Evaluation rejected: {0}")]
    Rejected(String),
}

/// Request payload shared by all three phase operations
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationRequest {
    /// Session being graded
    pub session_id: Uuid,
    /// Normalized transcript turns
    pub transcript: Vec<Turn>,
    /// Context from earlier phases (freshest instant metrics for phase 2,
    /// instant metrics + key moments for phase 3); null when unavailable
    pub context: serde_json::Value,
}

/// Deep analysis result: the one phase whose output is structurally
/// interpreted, because it carries the final scores written to the session.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeepAnalysisResult {
    /// Full analysis payload (kept opaque, persisted verbatim)
    pub analysis: serde_json::Value,
    /// Final category scores
    pub scores: SessionScores,
    /// Whether the simulated sale closed
    pub sale_closed: bool,
    /// Virtual earnings credited for the call
    pub virtual_earnings: f64,
}

/// Seam between the grading pipeline and the remote evaluators
///
/// Implementations must be safe to call concurrently for different sessions.
#[async_trait]
pub trait PhaseEvaluator: Send + Sync {
    /// Phase 1: instant call metrics
    async fn evaluate_instant(
        &self,
        request: &EvaluationRequest,
    ) -> Result<serde_json::Value, EvalError>;

    /// Phase 2: key moment extraction
    async fn evaluate_key_moments(
        &self,
        request: &EvaluationRequest,
    ) -> Result<serde_json::Value, EvalError>;

    /// Phase 3: deep analysis and final scoring
    async fn evaluate_deep(
        &self,
        request: &EvaluationRequest,
    ) -> Result<DeepAnalysisResult, EvalError>;
}

/// HTTP client for the remote evaluator service
pub struct EvaluatorClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl EvaluatorClient {
    /// Create a new evaluator client for the given base URL
    pub fn new(base_url: impl Into<String>) -> Result<Self, EvalError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| EvalError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post_evaluation(
        &self,
        endpoint: &str,
        request: &EvaluationRequest,
    ) -> Result<serde_json::Value, EvalError> {
        let url = format!("{}/{}", self.base_url, endpoint);

        tracing::debug!(
            session_id = %request.session_id,
            url = %url,
            turns = request.transcript.len(),
            "Querying evaluator"
        );

        let response = self
            .http_client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| EvalError::Network(e.to_string()))?;

        let status = response.status();

        if status == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            let body = response.text().await.unwrap_or_default();
            return Err(EvalError::Rejected(body));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EvalError::Api(status.as_u16(), body));
        }

        response
            .json()
            .await
            .map_err(|e| EvalError::Parse(e.to_string()))
    }
}

#[async_trait]
impl PhaseEvaluator for EvaluatorClient {
    async fn evaluate_instant(
        &self,
        request: &EvaluationRequest,
    ) -> Result<serde_json::Value, EvalError> {
        let payload = self.post_evaluation("evaluate/instant", request).await?;
        tracing::info!(session_id = %request.session_id, "Instant metrics evaluation succeeded");
        Ok(payload)
    }

    async fn evaluate_key_moments(
        &self,
        request: &EvaluationRequest,
    ) -> Result<serde_json::Value, EvalError> {
        let payload = self.post_evaluation("evaluate/key-moments", request).await?;
        tracing::info!(session_id = %request.session_id, "Key moments evaluation succeeded");
        Ok(payload)
    }

    async fn evaluate_deep(
        &self,
        request: &EvaluationRequest,
    ) -> Result<DeepAnalysisResult, EvalError> {
        let payload = self.post_evaluation("evaluate/deep", request).await?;
        let result: DeepAnalysisResult = serde_json::from_value(payload)
            .map_err(|e| EvalError::Parse(format!("Deep analysis payload: {}", e)))?;

        tracing::info!(
            session_id = %request.session_id,
            overall = result.scores.overall,
            sale_closed = result.sale_closed,
            "Deep analysis evaluation succeeded"
        );

        Ok(result)
    }
}
