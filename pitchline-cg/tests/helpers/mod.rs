//! Shared test utilities: temp databases, mock evaluators and dispatchers

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tempfile::TempDir;

use pitchline_cg::models::{SessionScores, SpeakerRole, TrainingSession, Turn};
use pitchline_cg::services::{
    DeepAnalysisDispatcher, DeepAnalysisJob, DeepAnalysisResult, DispatchError, EvalError,
    EvaluationRequest, PhaseEvaluator,
};

/// Create temporary test database with tables initialized
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration
/// of the test.
pub async fn create_test_db() -> anyhow::Result<(TempDir, SqlitePool)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test_pitchline.db");

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePool::connect(&db_url).await?;

    pitchline_cg::db::init_tables(&pool).await?;

    Ok((temp_dir, pool))
}

/// Build `count` alternating rep/counterpart turns
pub fn sample_turns(count: usize) -> Vec<Turn> {
    (0..count)
        .map(|i| Turn {
            sequence: i,
            speaker: if i % 2 == 0 {
                SpeakerRole::Rep
            } else {
                SpeakerRole::Counterpart
            },
            text: format!("Turn number {}", i),
            start_ms: i as i64 * 4000,
            end_ms: i as i64 * 4000 + 1500,
        })
        .collect()
}

/// Seed a session that ended `ended_minutes_ago` minutes ago with a transcript
pub async fn seed_ended_session(
    pool: &SqlitePool,
    turn_count: usize,
    ended_minutes_ago: i64,
) -> TrainingSession {
    let mut session = TrainingSession::new("user-1", "agent-1");
    session.transcript = sample_turns(turn_count);
    session.started_at = Utc::now() - Duration::minutes(ended_minutes_ago + 5);
    session.ended_at = Some(Utc::now() - Duration::minutes(ended_minutes_ago));
    pitchline_cg::db::sessions::save_session(pool, &session)
        .await
        .unwrap();
    session
}

/// Deep analysis result used by the mock evaluator's success path
pub fn sample_deep_result() -> DeepAnalysisResult {
    DeepAnalysisResult {
        analysis: serde_json::json!({ "summary": "Strong discovery, hesitant close" }),
        scores: SessionScores {
            overall: 74.0,
            rapport: 81.0,
            discovery: 88.0,
            objection_handling: 63.0,
            close_effectiveness: 64.0,
        },
        sale_closed: true,
        virtual_earnings: 125.0,
    }
}

/// Configurable mock phase evaluator
pub struct MockEvaluator {
    pub fail_instant: bool,
    pub fail_key_moments: bool,
    pub fail_deep: bool,
    pub deep_calls: AtomicUsize,
}

impl MockEvaluator {
    pub fn succeeding() -> Self {
        Self {
            fail_instant: false,
            fail_key_moments: false,
            fail_deep: false,
            deep_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_deep() -> Self {
        Self {
            fail_deep: true,
            ..Self::succeeding()
        }
    }

    pub fn deep_call_count(&self) -> usize {
        self.deep_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PhaseEvaluator for MockEvaluator {
    async fn evaluate_instant(
        &self,
        request: &EvaluationRequest,
    ) -> Result<serde_json::Value, EvalError> {
        if self.fail_instant {
            return Err(EvalError::Network("mock instant metrics failure".to_string()));
        }
        Ok(serde_json::json!({
            "talk_ratio": 0.42,
            "turn_count": request.transcript.len(),
        }))
    }

    async fn evaluate_key_moments(
        &self,
        request: &EvaluationRequest,
    ) -> Result<serde_json::Value, EvalError> {
        if self.fail_key_moments {
            return Err(EvalError::Api(503, "mock key moments failure".to_string()));
        }
        Ok(serde_json::json!([
            { "label": "objection", "turn": 3 },
            { "had_context": !request.context.is_null() },
        ]))
    }

    async fn evaluate_deep(
        &self,
        _request: &EvaluationRequest,
    ) -> Result<DeepAnalysisResult, EvalError> {
        self.deep_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_deep {
            return Err(EvalError::Api(500, "mock deep analysis failure".to_string()));
        }
        Ok(sample_deep_result())
    }
}

/// Dispatcher that records jobs without running anything
#[derive(Default)]
pub struct RecordingDispatcher {
    pub jobs: Mutex<Vec<DeepAnalysisJob>>,
}

impl RecordingDispatcher {
    pub fn job_count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}

impl DeepAnalysisDispatcher for RecordingDispatcher {
    fn dispatch(&self, job: DeepAnalysisJob) -> Result<(), DispatchError> {
        if job.transcript.is_empty() {
            return Err(DispatchError::MissingTranscript);
        }
        self.jobs.lock().unwrap().push(job);
        Ok(())
    }
}

/// Dispatcher whose dispatch always fails synchronously
pub struct FailingDispatcher;

impl DeepAnalysisDispatcher for FailingDispatcher {
    fn dispatch(&self, _job: DeepAnalysisJob) -> Result<(), DispatchError> {
        Err(DispatchError::Backend(
            "mock dispatch backend unavailable".to_string(),
        ))
    }
}

/// Poll the session row until `predicate` holds or the timeout elapses
pub async fn wait_for_session<F>(
    pool: &SqlitePool,
    session_id: uuid::Uuid,
    predicate: F,
) -> TrainingSession
where
    F: Fn(&TrainingSession) -> bool,
{
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        let session = pitchline_cg::db::sessions::load_session(pool, session_id)
            .await
            .unwrap()
            .expect("session should exist");
        if predicate(&session) {
            return session;
        }
        if std::time::Instant::now() > deadline {
            panic!(
                "Timed out waiting for session condition; grading_status = {}",
                session.grading_status.as_str()
            );
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}
