//! Router construction

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::{
    handlers::{assignment, experiments, health},
    middleware::{logging_middleware, request_id_middleware, request_timeout},
    state::AppState,
};

/// Build the API router with its middleware stack
pub fn build_router(state: AppState) -> Router {
    let timeout_secs = state.config.service.request_timeout_secs;

    Router::new()
        .route("/health", get(health::health))
        .route(
            "/experiments",
            post(experiments::create_experiment).get(experiments::list_experiments),
        )
        .route("/experiments/:id", get(experiments::get_experiment))
        .route("/experiments/:id/start", post(experiments::start_experiment))
        .route("/experiments/:id/pause", post(experiments::pause_experiment))
        .route("/experiments/:id/resume", post(experiments::resume_experiment))
        .route("/experiments/:id/end", post(experiments::end_experiment))
        .route("/experiments/:id/cancel", post(experiments::cancel_experiment))
        .route("/experiments/:id/results", get(experiments::get_results))
        .route("/experiments/:id/assign", post(assignment::assign))
        .route("/experiments/:id/events", post(assignment::record_event))
        .layer(request_timeout(timeout_secs))
        .layer(middleware::from_fn(logging_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}
