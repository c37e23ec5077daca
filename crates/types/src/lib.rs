//! Core types and data models for the experiment engine
//!
//! This crate provides the data structures shared by the assignment engine,
//! the event aggregator, the statistical evaluator and the REST surface.

pub mod events;
pub mod experiments;
pub mod metrics;
pub mod results;

pub use events::{EventKind, MetricEvent};
pub use experiments::{
    Assignment, Experiment, ExperimentSpec, ExperimentStatus, ExperimentType, Segment, Variant,
};
pub use metrics::VariantMetrics;
pub use results::{ConfidenceGrade, ConfidenceInterval, LiftKind, TestResult, VariantResult};
