//! Experiment lifecycle and results handlers

use abtest_types::{Experiment, TestResult};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::ApiResult,
    models::{CreateExperimentRequest, ListExperimentsQuery, PaginatedResponse, ResultsQuery},
    state::AppState,
};

pub async fn create_experiment(
    State(state): State<AppState>,
    Json(body): Json<CreateExperimentRequest>,
) -> ApiResult<(StatusCode, Json<Experiment>)> {
    body.validate_all()?;
    let experiment = state.engine.create_experiment(body.into_spec())?;
    Ok((StatusCode::CREATED, Json(experiment)))
}

pub async fn list_experiments(
    State(state): State<AppState>,
    Query(query): Query<ListExperimentsQuery>,
) -> ApiResult<Json<PaginatedResponse<Experiment>>> {
    query.validate()?;

    let experiments = state
        .engine
        .list_experiments()
        .into_iter()
        .filter(|e| query.status.map_or(true, |status| e.status == status))
        .collect();

    Ok(Json(PaginatedResponse::paginate(experiments, &query)))
}

pub async fn get_experiment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Experiment>> {
    let experiment = state
        .engine
        .get_experiment(&id)
        .ok_or_else(|| decision::DecisionError::ExperimentNotFound(id.to_string()))?;
    Ok(Json(experiment))
}

pub async fn start_experiment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Experiment>> {
    Ok(Json(state.engine.start(&id)?))
}

pub async fn pause_experiment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Experiment>> {
    Ok(Json(state.engine.pause(&id)?))
}

pub async fn resume_experiment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Experiment>> {
    Ok(Json(state.engine.resume(&id)?))
}

pub async fn end_experiment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Experiment>> {
    Ok(Json(state.engine.end(&id)?))
}

pub async fn cancel_experiment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Experiment>> {
    Ok(Json(state.engine.cancel(&id)?))
}

pub async fn get_results(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ResultsQuery>,
) -> ApiResult<Json<TestResult>> {
    Ok(Json(state.engine.results(&id, query.require_final)?))
}
