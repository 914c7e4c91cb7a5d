//! HTTP API Integration Tests
//!
//! Exercises the axum surface end to end against a temp database with mock
//! evaluators: session lifecycle, grading entrypoint, retry entrypoint,
//! diagnosis surface, conversation webhook and health check.

mod helpers;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use pitchline_cg::{build_router, AppState};
use pitchline_common::events::EventBus;

use helpers::{create_test_db, seed_ended_session, MockEvaluator, RecordingDispatcher};

async fn test_app(
    pool: sqlx::SqlitePool,
) -> (axum::Router, Arc<RecordingDispatcher>) {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let state = AppState::new(
        pool,
        EventBus::new(100),
        Arc::new(MockEvaluator::succeeding()),
        dispatcher.clone(),
    );
    (build_router(state), dispatcher)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let (app, _) = test_app(pool).await;

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["module"], "pitchline-cg");
    assert!(json["uptime_seconds"].is_u64());
}

#[tokio::test]
async fn test_session_lifecycle_start_turns_end() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let (app, _) = test_app(pool.clone()).await;

    // Start a session
    let response = app
        .clone()
        .oneshot(post_json(
            "/sessions/start",
            json!({"user_id": "user-9", "agent_id": "agent-3"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let started = body_json(response).await;
    let session_id = started["session_id"].as_str().unwrap().to_string();

    // Append two turns
    for text in ["Hello there", "Hi, who is this?"] {
        let response = app
            .clone()
            .oneshot(post_json(
                &format!("/sessions/{}/turns", session_id),
                json!({"speaker": "rep", "text": text}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    // End the call
    let response = app
        .clone()
        .oneshot(post_json(&format!("/sessions/{}/end", session_id), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let ended = body_json(response).await;
    assert_eq!(ended["turn_count"], 2);

    // Transcript is immutable after end
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/sessions/{}/turns", session_id),
            json!({"speaker": "rep", "text": "too late"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_grading_start_returns_report() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let session = seed_ended_session(&pool, 10, 1).await;
    let (app, dispatcher) = test_app(pool).await;

    let response = app
        .oneshot(post_json(
            "/grading/start",
            json!({"session_id": session.id}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "orchestration_complete");
    assert_eq!(json["phases"]["instant"]["status"], "complete");
    assert_eq!(json["phases"]["keyMoments"]["status"], "complete");
    assert_eq!(json["phases"]["deepAnalysis"]["status"], "complete");
    assert!(json["totalTimeElapsed"].is_u64());
    assert_eq!(dispatcher.job_count(), 1);
}

#[tokio::test]
async fn test_grading_start_with_empty_transcript_is_422() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let session = seed_ended_session(&pool, 0, 1).await;
    let (app, dispatcher) = test_app(pool).await;

    let response = app
        .oneshot(post_json(
            "/grading/start",
            json!({"session_id": session.id, "transcript": []}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "PRECONDITION_FAILED");
    assert_eq!(dispatcher.job_count(), 0);
}

#[tokio::test]
async fn test_retry_without_error_marker_is_409() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let session = seed_ended_session(&pool, 5, 1).await;
    let (app, _) = test_app(pool).await;

    let response = app
        .oneshot(post_json(
            &format!("/grading/retry/{}", session.id),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_diagnosis_unknown_session_is_404() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let (app, _) = test_app(pool).await;

    let response = app
        .oneshot(get(&format!("/grading/diagnosis/{}", uuid::Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_diagnosis_reports_stuck_pipeline() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let session = seed_ended_session(&pool, 5, 10).await;
    pitchline_cg::db::sessions::update_instant_metrics(&pool, session.id, &json!({}))
        .await
        .unwrap();
    pitchline_cg::db::sessions::update_key_moments(&pool, session.id, &json!([]))
        .await
        .unwrap();
    let (app, _) = test_app(pool).await;

    let response = app
        .oneshot(get(&format!("/grading/diagnosis/{}", session.id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "error");
    let issues = json["issues"].as_array().unwrap();
    assert!(issues
        .iter()
        .any(|i| i.as_str().unwrap().contains("pipeline appears stuck")));
}

#[tokio::test]
async fn test_webhook_accepts_both_payload_shapes() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let (app, _) = test_app(pool).await;

    // Nested metadata.started shape; no session in window → null correlation
    let response = app
        .clone()
        .oneshot(post_json(
            "/conversations/call-ended",
            json!({
                "conversation_id": "conv-a",
                "agent_id": "agent-x",
                "metadata": {"started": "2026-08-06T10:00:00Z"}
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["conversation_id"], "conv-a");
    assert!(json["correlation"].is_null());

    // Top-level created shape
    let response = app
        .clone()
        .oneshot(post_json(
            "/conversations/call-ended",
            json!({
                "conversation_id": "conv-b",
                "agent_id": "agent-x",
                "created": 1754474100000_i64
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Missing timing → 400
    let response = app
        .oneshot(post_json(
            "/conversations/call-ended",
            json!({"conversation_id": "conv-c", "agent_id": "agent-x"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_webhook_correlates_to_seeded_session() {
    let (_dir, pool) = create_test_db().await.unwrap();

    let mut session = pitchline_cg::models::TrainingSession::new("user-5", "agent-9");
    session.started_at = chrono::Utc::now();
    pitchline_cg::db::sessions::save_session(&pool, &session)
        .await
        .unwrap();
    let (app, _) = test_app(pool).await;

    let response = app
        .oneshot(post_json(
            "/conversations/call-ended",
            json!({
                "conversation_id": "conv-match",
                "agent_id": "agent-9",
                "metadata": {"started": chrono::Utc::now().to_rfc3339()}
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(
        json["correlation"]["session_id"],
        session.id.to_string().as_str()
    );
    assert_eq!(json["correlation"]["user_id"], "user-5");
    assert_eq!(json["correlation"]["confidence"], "high");
}
