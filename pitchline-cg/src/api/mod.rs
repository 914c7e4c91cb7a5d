//! HTTP API handlers for pitchline-cg

pub mod conversations;
pub mod grading;
pub mod health;
pub mod sessions;
pub mod sse;

pub use conversations::conversation_routes;
pub use grading::grading_routes;
pub use health::health_routes;
pub use sessions::session_routes;
pub use sse::event_stream;
