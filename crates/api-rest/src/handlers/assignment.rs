//! Subject assignment and event ingestion handlers

use abtest_types::EventKind;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use decision::{RecordOutcome, Subject};
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::ApiResult,
    models::{AssignRequest, AssignResponse, EventAck, RecordEventRequest},
    state::AppState,
};

pub async fn assign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<AssignRequest>,
) -> ApiResult<Json<AssignResponse>> {
    body.validate()?;
    let subject = Subject::from(body);

    let response = match state.engine.assign_variant(&id, &subject)? {
        Some(variant) => AssignResponse::from(variant),
        None => AssignResponse::not_enrolled(),
    };
    Ok(Json(response))
}

/// Conversions are acknowledged with 200, other events with 202
pub async fn record_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<RecordEventRequest>,
) -> ApiResult<(StatusCode, Json<EventAck>)> {
    body.validate()?;
    let event = body.into_event(id);

    let outcome = state.engine.record_event(&event)?;
    let status = match event.kind {
        EventKind::Conversion => StatusCode::OK,
        EventKind::Exposure | EventKind::Engagement => StatusCode::ACCEPTED,
    };

    Ok((
        status,
        Json(EventAck {
            accepted: true,
            counted: outcome == RecordOutcome::Counted,
        }),
    ))
}
