//! Error types for the experiment engine

use abtest_types::ExperimentStatus;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DecisionError>;

#[derive(Error, Debug)]
pub enum DecisionError {
    /// Malformed experiment spec or event; never persisted
    #[error("Invalid experiment configuration: {0}")]
    Validation(String),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: ExperimentStatus,
        to: ExperimentStatus,
    },

    /// Callers should treat the subject as unenrolled and not retry
    #[error("Not eligible: {0}")]
    NotEligible(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// A final verdict was requested before the minimum sample was reached
    #[error("Too early: {0}")]
    TooEarly(String),

    #[error("Statistical error: {0}")]
    StatisticalError(String),

    #[error("Experiment not found: {0}")]
    ExperimentNotFound(String),

    #[error("Variant not found: {0}")]
    VariantNotFound(String),

    #[error("Segment not found: {0}")]
    SegmentNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sled::Error> for DecisionError {
    fn from(err: sled::Error) -> Self {
        DecisionError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for DecisionError {
    fn from(err: serde_json::Error) -> Self {
        DecisionError::Storage(format!("serialization failed: {err}"))
    }
}
