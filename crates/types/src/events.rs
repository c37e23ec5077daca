//! Metric events recorded against experiment variants

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of outcome observed for a subject
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The subject actually saw the variant
    Exposure,
    /// The subject interacted with the variant
    Engagement,
    /// The subject completed the success action
    Conversion,
}

/// Append-only outcome record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricEvent {
    /// Producer-assigned id; redelivered events with the same id are dropped
    #[serde(default)]
    pub event_id: Option<Uuid>,
    pub experiment_id: Uuid,
    pub variant_id: Uuid,
    pub subject_id: String,
    pub kind: EventKind,
    /// Numeric payload, e.g. revenue for conversions
    #[serde(default)]
    pub value: f64,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl MetricEvent {
    pub fn new(
        experiment_id: Uuid,
        variant_id: Uuid,
        subject_id: impl Into<String>,
        kind: EventKind,
    ) -> Self {
        Self {
            event_id: None,
            experiment_id,
            variant_id,
            subject_id: subject_id.into(),
            kind,
            value: 0.0,
            timestamp: Utc::now(),
        }
    }

    pub fn exposure(experiment_id: Uuid, variant_id: Uuid, subject_id: impl Into<String>) -> Self {
        Self::new(experiment_id, variant_id, subject_id, EventKind::Exposure)
    }

    pub fn engagement(experiment_id: Uuid, variant_id: Uuid, subject_id: impl Into<String>) -> Self {
        Self::new(experiment_id, variant_id, subject_id, EventKind::Engagement)
    }

    pub fn conversion(
        experiment_id: Uuid,
        variant_id: Uuid,
        subject_id: impl Into<String>,
        value: f64,
    ) -> Self {
        Self {
            value,
            ..Self::new(experiment_id, variant_id, subject_id, EventKind::Conversion)
        }
    }

    pub fn with_event_id(mut self, event_id: Uuid) -> Self {
        self.event_id = Some(event_id);
        self
    }
}
