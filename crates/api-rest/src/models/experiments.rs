//! Experiment request/response models

use abtest_types::{EventKind, ExperimentSpec, ExperimentType, MetricEvent, Variant};
use decision::Subject;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

/// Request to create an experiment
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateExperimentRequest {
    /// Experiment name
    #[validate(length(min = 1, max = 200))]
    pub test_name: String,

    /// Experiment category
    #[serde(default)]
    pub test_type: ExperimentType,

    /// Treatment arms, exactly one flagged as control
    #[validate(length(min = 2))]
    pub variants: Vec<VariantInput>,

    #[serde(default)]
    pub target_segments: Vec<String>,

    #[serde(default)]
    pub success_metrics: Vec<String>,

    #[serde(default = "default_duration_days")]
    pub duration_days: u32,

    #[serde(default = "default_traffic_allocation")]
    pub traffic_allocation: f64,
}

fn default_duration_days() -> u32 {
    14
}

fn default_traffic_allocation() -> f64 {
    1.0
}

/// One variant in a create request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct VariantInput {
    #[validate(length(min = 1))]
    pub name: String,

    pub weight: f64,

    #[serde(default)]
    pub content_config: Value,

    #[serde(default)]
    pub is_control: bool,
}

impl CreateExperimentRequest {
    /// Validate the request and every variant in it
    pub fn validate_all(&self) -> Result<(), ValidationErrors> {
        self.validate()?;
        for variant in &self.variants {
            variant.validate()?;
        }
        Ok(())
    }

    /// Weight and control invariants are checked by the registry
    pub fn into_spec(self) -> ExperimentSpec {
        let variants = self
            .variants
            .into_iter()
            .map(|input| {
                let variant = if input.is_control {
                    Variant::control(input.name, input.weight)
                } else {
                    Variant::new(input.name, input.weight)
                };
                variant.with_content(input.content_config)
            })
            .collect();

        let mut spec = ExperimentSpec::new(self.test_name, variants)
            .with_type(self.test_type)
            .with_duration_days(self.duration_days)
            .with_traffic_allocation(self.traffic_allocation);
        for segment in self.target_segments {
            spec = spec.with_segment(segment);
        }
        for metric in self.success_metrics {
            spec = spec.with_success_metric(metric);
        }
        spec
    }
}

/// Subject-scoped assignment request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AssignRequest {
    #[validate(length(min = 1))]
    pub subject_id: String,

    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

impl From<AssignRequest> for Subject {
    fn from(request: AssignRequest) -> Self {
        Subject {
            id: request.subject_id,
            attributes: request.attributes,
        }
    }
}

/// Assignment outcome; a null variant means not enrolled
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssignResponse {
    pub variant_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_config: Option<Value>,
}

impl AssignResponse {
    pub fn not_enrolled() -> Self {
        Self {
            variant_id: None,
            variant_name: None,
            content_config: None,
        }
    }
}

impl From<Variant> for AssignResponse {
    fn from(variant: Variant) -> Self {
        Self {
            variant_id: Some(variant.id),
            variant_name: Some(variant.name),
            content_config: Some(variant.content_config),
        }
    }
}

/// Event body; the experiment id comes from the path
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RecordEventRequest {
    #[serde(default)]
    pub event_id: Option<Uuid>,
    pub variant_id: Uuid,
    #[validate(length(min = 1))]
    pub subject_id: String,
    pub kind: EventKind,
    #[serde(default)]
    pub value: f64,
}

impl RecordEventRequest {
    pub fn into_event(self, experiment_id: Uuid) -> MetricEvent {
        MetricEvent {
            event_id: self.event_id,
            value: self.value,
            ..MetricEvent::new(experiment_id, self.variant_id, self.subject_id, self.kind)
        }
    }
}

/// Acknowledgement for a recorded event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventAck {
    pub accepted: bool,
    /// False when the event was a repeat and changed nothing
    pub counted: bool,
}
