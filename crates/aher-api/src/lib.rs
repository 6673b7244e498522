//! AHER API crate - axum HTTP boundary for the assistant.
//!
//! Exposes the conversation endpoint (`POST /chatapi/`), the standalone
//! location lookup (`GET /aiapi/?q=`) and a health check.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
