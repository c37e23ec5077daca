//! Evaluation and verdict types rendered by the dashboard

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::experiments::ExperimentStatus;
use crate::metrics::VariantMetrics;

/// Whether there is enough data behind a comparison to claim significance
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceGrade {
    Low,
    Sufficient,
}

/// How an effect size is expressed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LiftKind {
    /// (variant - control) / control
    Relative,
    /// variant - control, used when the control rate is zero
    Absolute,
}

/// Two-sided interval at a given confidence level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
    pub level: f64,
}

impl ConfidenceInterval {
    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }
}

/// Statistical evaluation of one variant against the control
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariantResult {
    pub variant_id: Uuid,
    pub name: String,
    pub is_control: bool,
    pub metrics: VariantMetrics,
    /// Interval around this variant's own conversion rate
    pub rate_interval: Option<ConfidenceInterval>,
    /// Interval around (variant - control) conversion rate
    pub difference_interval: Option<ConfidenceInterval>,
    pub z_score: Option<f64>,
    pub p_value: Option<f64>,
    /// 1 - p_value, for charting
    pub statistical_significance: f64,
    pub is_significant: bool,
    pub confidence: ConfidenceGrade,
    /// Set when either arm has no exposures and no test was run
    pub insufficient_data: bool,
    pub lift: Option<f64>,
    pub lift_kind: LiftKind,
}

/// Per-experiment verdict snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestResult {
    pub experiment_id: Uuid,
    pub experiment_name: String,
    pub status: ExperimentStatus,
    pub winner_variant: Option<Uuid>,
    pub is_statistically_significant: bool,
    pub confidence_level: f64,
    /// Lift of the winner, or of the best treatment when there is none
    pub effect_size: Option<f64>,
    pub effect_size_kind: LiftKind,
    pub variants: Vec<VariantResult>,
    pub recommendations: Vec<String>,
    pub total_sample_size: u64,
    pub is_final: bool,
    pub generated_at: DateTime<Utc>,
}

impl TestResult {
    pub fn variant(&self, variant_id: &Uuid) -> Option<&VariantResult> {
        self.variants.iter().find(|v| v.variant_id == *variant_id)
    }

    pub fn control(&self) -> Option<&VariantResult> {
        self.variants.iter().find(|v| v.is_control)
    }

    pub fn winner(&self) -> Option<&VariantResult> {
        self.winner_variant.as_ref().and_then(|id| self.variant(id))
    }
}
