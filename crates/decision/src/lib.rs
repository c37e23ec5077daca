//! Experiment assignment and statistical evaluation engine
//!
//! This crate provides the decision-making logic for content experiments:
//! an experiment registry with a lifecycle state machine, deterministic
//! hash-based variant assignment backed by an insert-if-absent store,
//! idempotent event aggregation, two-proportion significance testing and
//! template-driven verdicts. Engine state can be kept in an embedded sled
//! database and restored on startup.

pub mod ab_testing;
pub mod aggregator;
pub mod assignment;
pub mod decision_engine;
pub mod errors;
pub mod evaluator;
pub mod registry;
pub mod segments;
pub mod statistical;
pub mod store;

pub use ab_testing::ABTestEngine;
pub use aggregator::{EventAggregator, RecordOutcome};
pub use assignment::{derive_variant, unit_hash, AssignmentEngine};
pub use decision_engine::{DecisionEngine, LiftMagnitude};
pub use errors::{DecisionError, Result};
pub use evaluator::{Evaluation, StatisticalEvaluator};
pub use registry::ExperimentRegistry;
pub use segments::{AttributeMatcher, SegmentMembership, StaticMembership, Subject};
pub use statistical::{SampleSizeCalculator, StatisticalTest, ZTest};
pub use store::{AssignmentStore, MemoryAssignmentStore, SledStore, StateStore};
