//! Experiment, variant and segment definitions

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::results::TestResult;

/// Lifecycle state of an experiment
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    Draft,
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl ExperimentStatus {
    /// Completed and cancelled experiments accept no further mutations
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExperimentStatus::Completed | ExperimentStatus::Cancelled)
    }

    /// Whether the lifecycle state machine permits `self -> target`
    pub fn can_transition_to(&self, target: ExperimentStatus) -> bool {
        use ExperimentStatus::*;

        matches!(
            (self, target),
            (Draft, Active)
                | (Active, Paused)
                | (Paused, Active)
                | (Active, Completed)
                | (Paused, Completed)
                | (Draft, Cancelled)
                | (Active, Cancelled)
                | (Paused, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentStatus::Draft => "draft",
            ExperimentStatus::Active => "active",
            ExperimentStatus::Paused => "paused",
            ExperimentStatus::Completed => "completed",
            ExperimentStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of experiment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentType {
    ContentFormat,
    TimingOptimization,
    Engagement,
    #[default]
    Conversion,
    Other(String),
}

/// A single treatment arm of an experiment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Variant {
    /// Unique variant identifier
    pub id: Uuid,
    /// Variant name (e.g., "control", "short_subject")
    pub name: String,
    /// Share of enrolled traffic routed to this variant (0.0-1.0)
    pub weight: f64,
    /// Opaque payload interpreted only by the rendering collaborator
    #[serde(default)]
    pub content_config: serde_json::Value,
    /// Whether this variant is the baseline
    #[serde(default)]
    pub is_control: bool,
    /// Creation time, used to order assignment buckets
    pub created_at: DateTime<Utc>,
}

impl Variant {
    /// Create a treatment variant
    pub fn new(name: impl Into<String>, weight: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            weight,
            content_config: serde_json::Value::Null,
            is_control: false,
            created_at: Utc::now(),
        }
    }

    /// Create the control variant
    pub fn control(name: impl Into<String>, weight: f64) -> Self {
        Self {
            is_control: true,
            ..Self::new(name, weight)
        }
    }

    /// Attach the content payload shown to subjects in this arm
    pub fn with_content(mut self, content_config: serde_json::Value) -> Self {
        self.content_config = content_config;
        self
    }
}

/// Named inclusion criteria over subject attributes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Segment {
    pub id: String,
    pub name: String,
    /// Opaque predicate, evaluated by the segment-membership collaborator
    #[serde(default)]
    pub criteria: serde_json::Value,
    /// Cached population size estimate
    #[serde(default)]
    pub estimated_size: Option<u64>,
}

impl Segment {
    pub fn new(id: impl Into<String>, name: impl Into<String>, criteria: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            criteria,
            estimated_size: None,
        }
    }
}

/// Input accepted by the registry when creating an experiment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentSpec {
    pub name: String,
    #[serde(default)]
    pub experiment_type: ExperimentType,
    pub variants: Vec<Variant>,
    #[serde(default)]
    pub target_segments: Vec<String>,
    #[serde(default)]
    pub success_metrics: Vec<String>,
    pub duration_days: u32,
    pub traffic_allocation: f64,
}

impl ExperimentSpec {
    /// Create a spec with full traffic, no segments and a 14 day duration
    pub fn new(name: impl Into<String>, variants: Vec<Variant>) -> Self {
        Self {
            name: name.into(),
            experiment_type: ExperimentType::default(),
            variants,
            target_segments: Vec::new(),
            success_metrics: Vec::new(),
            duration_days: 14,
            traffic_allocation: 1.0,
        }
    }

    pub fn with_type(mut self, experiment_type: ExperimentType) -> Self {
        self.experiment_type = experiment_type;
        self
    }

    pub fn with_traffic_allocation(mut self, traffic_allocation: f64) -> Self {
        self.traffic_allocation = traffic_allocation;
        self
    }

    pub fn with_duration_days(mut self, duration_days: u32) -> Self {
        self.duration_days = duration_days;
        self
    }

    pub fn with_segment(mut self, segment_id: impl Into<String>) -> Self {
        self.target_segments.push(segment_id.into());
        self
    }

    pub fn with_success_metric(mut self, metric: impl Into<String>) -> Self {
        self.success_metrics.push(metric.into());
        self
    }
}

/// A/B test experiment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    /// Unique experiment identifier
    pub id: Uuid,
    pub name: String,
    pub experiment_type: ExperimentType,
    pub status: ExperimentStatus,
    /// Portion of the eligible population enrolled at all (0.0-1.0)
    pub traffic_allocation: f64,
    pub duration_days: u32,
    /// Segment ids; empty means every eligible subject
    pub target_segments: Vec<String>,
    pub success_metrics: Vec<String>,
    /// Variants in creation order
    pub variants: Vec<Variant>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Verdict captured when the experiment completed
    pub final_result: Option<TestResult>,
}

impl Experiment {
    /// Build a draft experiment from a validated spec
    pub fn from_spec(spec: ExperimentSpec) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: spec.name,
            experiment_type: spec.experiment_type,
            status: ExperimentStatus::Draft,
            traffic_allocation: spec.traffic_allocation,
            duration_days: spec.duration_days,
            target_segments: spec.target_segments,
            success_metrics: spec.success_metrics,
            variants: spec.variants,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            final_result: None,
        }
    }

    /// The baseline variant
    pub fn control(&self) -> Option<&Variant> {
        self.variants.iter().find(|v| v.is_control)
    }

    pub fn variant(&self, variant_id: &Uuid) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id == *variant_id)
    }

    /// Variants in bucket order: creation time, then lexicographic id
    pub fn bucket_order(&self) -> Vec<&Variant> {
        let mut ordered: Vec<&Variant> = self.variants.iter().collect();
        ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        ordered
    }

    /// When the experiment is scheduled to stop, once started
    pub fn scheduled_end(&self) -> Option<DateTime<Utc>> {
        self.started_at
            .map(|started| started + Duration::days(i64::from(self.duration_days)))
    }

    pub fn targets_segments(&self) -> bool {
        !self.target_segments.is_empty()
    }
}

/// Immutable record of a subject's bucket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Assignment {
    pub experiment_id: Uuid,
    pub subject_id: String,
    pub variant_id: Uuid,
    pub assigned_at: DateTime<Utc>,
}

impl Assignment {
    pub fn new(experiment_id: Uuid, subject_id: impl Into<String>, variant_id: Uuid) -> Self {
        Self {
            experiment_id,
            subject_id: subject_id.into(),
            variant_id,
            assigned_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_experiment_from_spec() {
        let spec = ExperimentSpec::new(
            "Subject line test",
            vec![Variant::control("control", 0.5), Variant::new("short", 0.5)],
        )
        .with_type(ExperimentType::ContentFormat)
        .with_traffic_allocation(0.8);

        let experiment = Experiment::from_spec(spec);

        assert_eq!(experiment.status, ExperimentStatus::Draft);
        assert_eq!(experiment.variants.len(), 2);
        assert_eq!(experiment.control().map(|v| v.name.as_str()), Some("control"));
        assert!(experiment.started_at.is_none());
        assert!(experiment.scheduled_end().is_none());
    }

    #[test]
    fn test_transition_table() {
        use ExperimentStatus::*;

        assert!(Draft.can_transition_to(Active));
        assert!(Active.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Active));
        assert!(Paused.can_transition_to(Completed));
        assert!(Draft.can_transition_to(Cancelled));

        assert!(!Draft.can_transition_to(Paused));
        assert!(!Draft.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Active));
        assert!(!Cancelled.can_transition_to(Draft));
        assert!(!Active.can_transition_to(Active));
    }

    #[test]
    fn test_bucket_order_ties_break_on_id() {
        let now = Utc::now();
        let mut a = Variant::control("a", 0.5);
        let mut b = Variant::new("b", 0.5);
        a.created_at = now;
        b.created_at = now;

        let experiment = Experiment::from_spec(ExperimentSpec::new("t", vec![a.clone(), b.clone()]));
        let order: Vec<Uuid> = experiment.bucket_order().iter().map(|v| v.id).collect();

        let mut expected = vec![a.id, b.id];
        expected.sort();
        assert_eq!(order, expected);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ExperimentStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
        assert_eq!(ExperimentStatus::Paused.to_string(), "paused");
    }
}
