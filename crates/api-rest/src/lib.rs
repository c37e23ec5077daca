//! REST API for the experiment engine
//!
//! Exposes experiment lifecycle, subject assignment, event ingestion and
//! results over HTTP using axum.

pub mod error;
pub mod handlers;
pub mod jobs;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::build_router;
pub use state::AppState;
