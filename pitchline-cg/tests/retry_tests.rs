//! Retry Controller Integration Tests
//!
//! The deep analysis retry budget (2 attempts) is enforced centrally: a
//! third retry is rejected and dispatches nothing.

mod helpers;

use chrono::Utc;
use std::sync::Arc;

use pitchline_cg::models::{DeepAnalysisErrorMarker, GradingStatus};
use pitchline_cg::services::{RetryController, RetryError, MAX_DEEP_ANALYSIS_RETRIES};

use helpers::{create_test_db, seed_ended_session, RecordingDispatcher};

async fn mark_failed(pool: &sqlx::SqlitePool, session_id: uuid::Uuid, retry_count: u32) {
    let marker = DeepAnalysisErrorMarker {
        message: "evaluator unavailable".to_string(),
        retry_count,
        failed_at: Utc::now(),
    };
    pitchline_cg::db::sessions::mark_deep_analysis_error(pool, session_id, &marker)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_retry_redispatches_and_increments_counter() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let session = seed_ended_session(&pool, 8, 2).await;
    pitchline_cg::db::sessions::update_instant_metrics(
        &pool,
        session.id,
        &serde_json::json!({"talk_ratio": 0.5}),
    )
    .await
    .unwrap();
    mark_failed(&pool, session.id, 0).await;

    let dispatcher = Arc::new(RecordingDispatcher::default());
    let controller = RetryController::new(pool.clone(), dispatcher.clone());

    let outcome = controller.retry(session.id).await.unwrap();
    assert_eq!(outcome.retry_count, 1);
    assert_eq!(outcome.grading_status, GradingStatus::Processing);

    // The job carries whatever phase outputs are persisted
    assert_eq!(dispatcher.job_count(), 1);
    let job = dispatcher.jobs.lock().unwrap().remove(0);
    assert_eq!(job.retry_count, 1);
    assert!(!job.context["instant_metrics"].is_null());
    assert!(job.context["key_moments"].is_null());

    // Marker cleared, counter incremented, status moved error → processing
    let stored = pitchline_cg::db::sessions::load_session(&pool, session.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.retry_count, 1);
    assert_eq!(stored.grading_status, GradingStatus::Processing);
    assert!(stored.deep_analysis_error_marker().is_none());
}

#[tokio::test]
async fn test_retry_without_error_marker_is_rejected() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let session = seed_ended_session(&pool, 8, 2).await;

    let dispatcher = Arc::new(RecordingDispatcher::default());
    let controller = RetryController::new(pool.clone(), dispatcher.clone());

    let result = controller.retry(session.id).await;
    assert!(matches!(result, Err(RetryError::NoErrorMarker(_))));
    assert_eq!(dispatcher.job_count(), 0);
}

#[tokio::test]
async fn test_retry_for_unknown_session_is_rejected() {
    let (_dir, pool) = create_test_db().await.unwrap();

    let controller =
        RetryController::new(pool.clone(), Arc::new(RecordingDispatcher::default()));
    let result = controller.retry(uuid::Uuid::new_v4()).await;
    assert!(matches!(result, Err(RetryError::NotFound(_))));
}

#[tokio::test]
async fn test_third_retry_is_rejected_and_dispatches_nothing() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let session = seed_ended_session(&pool, 8, 2).await;

    let dispatcher = Arc::new(RecordingDispatcher::default());
    let controller = RetryController::new(pool.clone(), dispatcher.clone());

    // Attempt 1 fails, retry; attempt 2 fails, retry; attempt 3 is refused.
    mark_failed(&pool, session.id, 0).await;
    let first = controller.retry(session.id).await.unwrap();
    assert_eq!(first.retry_count, 1);

    mark_failed(&pool, session.id, 1).await;
    let second = controller.retry(session.id).await.unwrap();
    assert_eq!(second.retry_count, MAX_DEEP_ANALYSIS_RETRIES);

    mark_failed(&pool, session.id, 2).await;
    let third = controller.retry(session.id).await;
    assert!(matches!(third, Err(RetryError::BudgetExhausted(_))));

    // Only the two budgeted attempts were ever dispatched
    assert_eq!(dispatcher.job_count(), 2);

    let stored = pitchline_cg::db::sessions::load_session(&pool, session.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.retry_count, MAX_DEEP_ANALYSIS_RETRIES);
    // The marker stays for diagnostics; the exhausted budget is permanent
    assert!(stored.deep_analysis_error_marker().is_some());
}
