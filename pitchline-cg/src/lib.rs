//! pitchline-cg library interface for testing
//!
//! Exposes public APIs for integration testing

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;

use pitchline_common::events::EventBus;

use crate::services::{DeepAnalysisDispatcher, PhaseEvaluator};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Remote phase evaluator seam
    pub evaluator: Arc<dyn PhaseEvaluator>,
    /// Deep analysis background dispatcher seam
    pub dispatcher: Arc<dyn DeepAnalysisDispatcher>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        evaluator: Arc<dyn PhaseEvaluator>,
        dispatcher: Arc<dyn DeepAnalysisDispatcher>,
    ) -> Self {
        Self {
            db,
            event_bus,
            evaluator,
            dispatcher,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::session_routes())
        .merge(api::grading_routes())
        .merge(api::conversation_routes())
        .route("/events", get(api::event_stream))
        .merge(api::health_routes())
        .with_state(state)
}
