use axum::{extract::State, Json};

use crate::{models::HealthResponse, state::AppState};

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: state.config.service.name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        experiments: state.engine.list_experiments().len(),
    })
}
