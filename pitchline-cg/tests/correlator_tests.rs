//! Session Correlator Integration Tests
//!
//! Time-window matching, confidence tiers, idempotent link writes, and the
//! non-fatal no-candidate path.

mod helpers;

use chrono::{Duration, Utc};
use sqlx::Row;

use pitchline_cg::models::{
    CorrelationConfidence, ExternalConversationEvent, TrainingSession,
};
use pitchline_cg::services::SessionCorrelator;
use pitchline_common::events::EventBus;

use helpers::create_test_db;

async fn seed_session_started_at(
    pool: &sqlx::SqlitePool,
    agent_id: &str,
    started_at: chrono::DateTime<Utc>,
) -> TrainingSession {
    let mut session = TrainingSession::new("user-1", agent_id);
    session.started_at = started_at;
    pitchline_cg::db::sessions::save_session(pool, &session)
        .await
        .unwrap();
    session
}

fn event_at(occurred_at: chrono::DateTime<Utc>) -> ExternalConversationEvent {
    ExternalConversationEvent {
        conversation_id: "conv-1".to_string(),
        agent_id: "agent-1".to_string(),
        occurred_at,
        metadata: serde_json::json!({}),
    }
}

async fn record_event(pool: &sqlx::SqlitePool, event: &ExternalConversationEvent) {
    pitchline_cg::db::conversations::upsert_event(pool, event)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_candidate_30s_away_matches_with_high_confidence() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let t = Utc::now();
    let session = seed_session_started_at(&pool, "agent-1", t + Duration::seconds(30)).await;

    let event = event_at(t);
    record_event(&pool, &event).await;

    let correlator = SessionCorrelator::new(pool.clone(), EventBus::new(16));
    let result = correlator.correlate(&event).await.unwrap();

    assert_eq!(result.session_id, session.id);
    assert_eq!(result.user_id, "user-1");
    assert_eq!(result.confidence, CorrelationConfidence::High);
}

#[tokio::test]
async fn test_candidate_4min_away_still_matches_inside_window() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let t = Utc::now();
    seed_session_started_at(&pool, "agent-1", t + Duration::minutes(4)).await;

    let event = event_at(t);
    record_event(&pool, &event).await;

    let correlator = SessionCorrelator::new(pool.clone(), EventBus::new(16));
    let result = correlator.correlate(&event).await.unwrap();

    // 4 minutes is past the medium threshold (3 min) but inside the window
    assert_eq!(result.confidence, CorrelationConfidence::Low);
}

#[tokio::test]
async fn test_candidate_2min_away_is_medium() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let t = Utc::now();
    seed_session_started_at(&pool, "agent-1", t - Duration::minutes(2)).await;

    let event = event_at(t);
    record_event(&pool, &event).await;

    let correlator = SessionCorrelator::new(pool.clone(), EventBus::new(16));
    let result = correlator.correlate(&event).await.unwrap();

    assert_eq!(result.confidence, CorrelationConfidence::Medium);
}

#[tokio::test]
async fn test_candidate_outside_window_is_no_match() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let t = Utc::now();
    seed_session_started_at(&pool, "agent-1", t + Duration::minutes(7)).await;

    let event = event_at(t);
    record_event(&pool, &event).await;

    let correlator = SessionCorrelator::new(pool.clone(), EventBus::new(16));
    assert!(correlator.correlate(&event).await.is_none());
}

#[tokio::test]
async fn test_other_agents_sessions_are_not_candidates() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let t = Utc::now();
    seed_session_started_at(&pool, "agent-other", t).await;

    let event = event_at(t);
    record_event(&pool, &event).await;

    let correlator = SessionCorrelator::new(pool.clone(), EventBus::new(16));
    assert!(correlator.correlate(&event).await.is_none());
}

#[tokio::test]
async fn test_closest_candidate_wins() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let t = Utc::now();
    seed_session_started_at(&pool, "agent-1", t - Duration::minutes(4)).await;
    let closest = seed_session_started_at(&pool, "agent-1", t + Duration::seconds(45)).await;
    seed_session_started_at(&pool, "agent-1", t + Duration::minutes(3)).await;

    let event = event_at(t);
    record_event(&pool, &event).await;

    let correlator = SessionCorrelator::new(pool.clone(), EventBus::new(16));
    let result = correlator.correlate(&event).await.unwrap();

    assert_eq!(result.session_id, closest.id);
    assert_eq!(result.confidence, CorrelationConfidence::High);
}

#[tokio::test]
async fn test_rerunning_correlation_overwrites_without_duplicating() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let t = Utc::now();
    let session = seed_session_started_at(&pool, "agent-1", t + Duration::seconds(10)).await;

    let event = event_at(t);
    record_event(&pool, &event).await;

    let correlator = SessionCorrelator::new(pool.clone(), EventBus::new(16));
    let first = correlator.correlate(&event).await.unwrap();
    let second = correlator.correlate(&event).await.unwrap();
    assert_eq!(first.session_id, second.session_id);

    // Both sides carry exactly one link
    let stored = pitchline_cg::db::sessions::load_session(&pool, session.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.conversation_id.as_deref(), Some("conv-1"));

    let rows = sqlx::query("SELECT session_id FROM conversation_events WHERE conversation_id = ?")
        .bind("conv-1")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let linked: Option<String> = rows[0].get("session_id");
    assert_eq!(linked.as_deref(), Some(session.id.to_string().as_str()));
}

#[tokio::test]
async fn test_datastore_error_aborts_with_no_match() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let event = event_at(Utc::now());

    // Closing the pool makes the window query fail; correlation must
    // swallow the error and report no match.
    pool.close().await;

    let correlator = SessionCorrelator::new(pool.clone(), EventBus::new(16));
    assert!(correlator.correlate(&event).await.is_none());
}
