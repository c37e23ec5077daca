//! API error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use decision::DecisionError;
use serde::{Deserialize, Serialize};
use validator::ValidationErrors;

/// JSON error body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    /// Stable machine-readable code
    pub error: String,
    /// Human-readable message naming the violated rule
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

/// Error returned by handlers
#[derive(Debug)]
pub enum ApiError {
    Engine(DecisionError),
    InvalidRequest(String),
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl ApiError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            ApiError::Engine(err) => match err {
                DecisionError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
                DecisionError::ExperimentNotFound(_) => {
                    (StatusCode::NOT_FOUND, "experiment_not_found")
                }
                DecisionError::VariantNotFound(_) => (StatusCode::NOT_FOUND, "variant_not_found"),
                DecisionError::SegmentNotFound(_) => (StatusCode::NOT_FOUND, "segment_not_found"),
                DecisionError::InvalidTransition { .. } => {
                    (StatusCode::CONFLICT, "invalid_transition")
                }
                DecisionError::NotEligible(_) => (StatusCode::CONFLICT, "not_eligible"),
                DecisionError::TooEarly(_) => (StatusCode::TOO_EARLY, "too_early"),
                DecisionError::InsufficientData(_)
                | DecisionError::StatisticalError(_)
                | DecisionError::Storage(_)
                | DecisionError::Other(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
                }
            },
        }
    }
}

impl From<DecisionError> for ApiError {
    fn from(err: DecisionError) -> Self {
        ApiError::Engine(err)
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(err: ValidationErrors) -> Self {
        ApiError::InvalidRequest(err.to_string())
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Engine(err) => write!(f, "{err}"),
            ApiError::InvalidRequest(msg) => write!(f, "{msg}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        (status, Json(ErrorResponse::new(code, self.to_string()))).into_response()
    }
}
