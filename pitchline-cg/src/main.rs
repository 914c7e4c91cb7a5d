//! pitchline-cg - Call Grading Microservice
//!
//! **Module Identity:**
//! - Name: pitchline-cg (Call Grading)
//! - Port: 5741
//!
//! Converts raw sales-call transcripts into structured performance grades
//! through a three-phase evaluator pipeline, correlates external voice
//! conversations to training sessions, and serves the grading diagnosis
//! surface.

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use pitchline_common::events::EventBus;

use pitchline_cg::services::{BackgroundDeepAnalysis, EvaluatorClient};
use pitchline_cg::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting pitchline-cg (Call Grading) microservice");
    info!("Port: 5741");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Step 1: Resolve root folder
    let root_folder = pitchline_common::config::resolve_root_folder(None, "PITCHLINE_ROOT");

    // Step 2: Create root folder directory if missing
    let db_path = pitchline_common::config::ensure_root_folder(&root_folder)
        .map_err(|e| anyhow::anyhow!("Failed to initialize root folder: {}", e))?;
    info!("Database: {}", db_path.display());

    // Step 3: Open or create database
    let db_pool = pitchline_cg::db::init_database_pool(&db_path).await?;
    info!("Database connection established");

    // Step 4: Resolve evaluator base URL (Database → ENV → TOML)
    let toml_config = pitchline_common::config::load_toml_config().unwrap_or_default();
    let evaluator_url =
        pitchline_cg::config::resolve_evaluator_base_url(&db_pool, &toml_config).await?;
    let evaluator = Arc::new(EvaluatorClient::new(evaluator_url.as_str())?);
    info!("Evaluator endpoint: {}", evaluator_url);

    // Create event bus for SSE broadcasting
    let event_bus = EventBus::new(100); // 100 event capacity
    info!("Event bus initialized");

    // Deep analysis runs on detached tasks supervised by this dispatcher
    let dispatcher = Arc::new(BackgroundDeepAnalysis::new(
        db_pool.clone(),
        evaluator.clone(),
        event_bus.clone(),
    ));

    // Create application state
    let state = AppState::new(db_pool, event_bus, evaluator, dispatcher);

    // Build router
    let app = pitchline_cg::build_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind("127.0.0.1:5741").await?;
    info!("Listening on http://127.0.0.1:5741");
    info!("Health check: http://127.0.0.1:5741/health");

    axum::serve(listener, app).await?;

    Ok(())
}
