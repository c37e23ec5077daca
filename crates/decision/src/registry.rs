//! Experiment registry
//!
//! Owns experiment definitions and segments, validates new experiments and
//! enforces the lifecycle state machine. With a [`StateStore`] attached,
//! every change is written through before it becomes visible.

use abtest_types::{Experiment, ExperimentSpec, ExperimentStatus, Segment, TestResult};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    errors::{DecisionError, Result},
    store::StateStore,
};

/// Allowed drift of the weight sum from 1.0
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Registry of experiment definitions
pub struct ExperimentRegistry {
    experiments: DashMap<Uuid, Experiment>,
    segments: DashMap<String, Segment>,
    state: Option<Arc<dyn StateStore>>,
}

impl ExperimentRegistry {
    pub fn new() -> Self {
        Self {
            experiments: DashMap::new(),
            segments: DashMap::new(),
            state: None,
        }
    }

    /// Registry restored from, and written through to, `state`
    pub fn with_state(state: Arc<dyn StateStore>) -> Result<Self> {
        let experiments = DashMap::new();
        for experiment in state.load_experiments()? {
            experiments.insert(experiment.id, experiment);
        }
        let segments = DashMap::new();
        for segment in state.load_segments()? {
            segments.insert(segment.id.clone(), segment);
        }

        info!(
            experiments = experiments.len(),
            segments = segments.len(),
            "Restored experiment registry"
        );

        Ok(Self {
            experiments,
            segments,
            state: Some(state),
        })
    }

    fn persist(&self, experiment: &Experiment) -> Result<()> {
        match &self.state {
            Some(state) => state.save_experiment(experiment),
            None => Ok(()),
        }
    }

    /// Validate a spec and store it as a draft experiment
    pub fn create_experiment(&self, spec: ExperimentSpec) -> Result<Experiment> {
        self.validate_spec(&spec)?;

        let experiment = Experiment::from_spec(spec);
        info!(
            experiment_id = %experiment.id,
            name = %experiment.name,
            variants = experiment.variants.len(),
            traffic_allocation = experiment.traffic_allocation,
            "Created experiment"
        );

        self.persist(&experiment)?;
        self.experiments.insert(experiment.id, experiment.clone());
        Ok(experiment)
    }

    /// Check every creation invariant; the first violation is reported
    pub fn validate_spec(&self, spec: &ExperimentSpec) -> Result<()> {
        if spec.name.trim().is_empty() {
            return Err(DecisionError::Validation(
                "experiment name must not be empty".to_string(),
            ));
        }

        if spec.variants.len() < 2 {
            return Err(DecisionError::Validation(
                "experiment must have at least 2 variants".to_string(),
            ));
        }

        let mut ids = HashSet::new();
        for variant in &spec.variants {
            if !ids.insert(variant.id) {
                return Err(DecisionError::Validation(format!(
                    "duplicate variant id {}",
                    variant.id
                )));
            }
            if !variant.weight.is_finite() || !(0.0..=1.0).contains(&variant.weight) {
                return Err(DecisionError::Validation(format!(
                    "variant '{}' weight must be between 0 and 1, got {}",
                    variant.name, variant.weight
                )));
            }
        }

        let total_weight: f64 = spec.variants.iter().map(|v| v.weight).sum();
        if (total_weight - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(DecisionError::Validation(format!(
                "variant weights must sum to 100%, got {:.4}%",
                total_weight * 100.0
            )));
        }

        let controls: Vec<_> = spec.variants.iter().filter(|v| v.is_control).collect();
        if controls.len() != 1 {
            return Err(DecisionError::Validation(format!(
                "exactly one variant must be flagged as control, found {}",
                controls.len()
            )));
        }
        if controls[0].weight <= 0.0 {
            return Err(DecisionError::Validation(format!(
                "control variant '{}' must receive a non-zero weight",
                controls[0].name
            )));
        }

        if !spec.traffic_allocation.is_finite() || !(0.0..=1.0).contains(&spec.traffic_allocation)
        {
            return Err(DecisionError::Validation(format!(
                "traffic allocation must be a finite value between 0 and 1, got {}",
                spec.traffic_allocation
            )));
        }

        if spec.duration_days == 0 {
            return Err(DecisionError::Validation(
                "duration must be greater than 0 days".to_string(),
            ));
        }

        for segment_id in &spec.target_segments {
            if !self.segments.contains_key(segment_id) {
                return Err(DecisionError::Validation(format!(
                    "unknown target segment '{segment_id}'"
                )));
            }
        }

        Ok(())
    }

    /// Move an experiment to `target`, rejecting transitions the lifecycle forbids
    pub fn transition(&self, experiment_id: &Uuid, target: ExperimentStatus) -> Result<Experiment> {
        let mut entry = self
            .experiments
            .get_mut(experiment_id)
            .ok_or_else(|| DecisionError::ExperimentNotFound(experiment_id.to_string()))?;

        let from = entry.status;
        if !from.can_transition_to(target) {
            warn!(
                experiment_id = %experiment_id,
                from = %from,
                to = %target,
                "Rejected lifecycle transition"
            );
            return Err(DecisionError::InvalidTransition { from, to: target });
        }

        let mut updated = entry.clone();
        let now = Utc::now();
        match target {
            ExperimentStatus::Active if updated.started_at.is_none() => updated.started_at = Some(now),
            ExperimentStatus::Completed | ExperimentStatus::Cancelled => updated.ended_at = Some(now),
            _ => {}
        }
        updated.status = target;

        self.persist(&updated)?;
        *entry = updated.clone();

        info!(experiment_id = %experiment_id, from = %from, to = %target, "Experiment transitioned");
        Ok(updated)
    }

    /// Attach the verdict computed at completion
    pub fn set_final_result(&self, experiment_id: &Uuid, result: TestResult) -> Result<Experiment> {
        let mut entry = self
            .experiments
            .get_mut(experiment_id)
            .ok_or_else(|| DecisionError::ExperimentNotFound(experiment_id.to_string()))?;

        if entry.status != ExperimentStatus::Completed {
            return Err(DecisionError::NotEligible(format!(
                "final result can only be recorded for completed experiments, experiment is {}",
                entry.status
            )));
        }

        let mut updated = entry.clone();
        updated.final_result = Some(result);
        self.persist(&updated)?;
        *entry = updated.clone();
        Ok(updated)
    }

    pub fn get(&self, experiment_id: &Uuid) -> Option<Experiment> {
        self.experiments.get(experiment_id).map(|e| e.clone())
    }

    /// Like `get`, but a missing experiment is an error
    pub fn require(&self, experiment_id: &Uuid) -> Result<Experiment> {
        self.get(experiment_id)
            .ok_or_else(|| DecisionError::ExperimentNotFound(experiment_id.to_string()))
    }

    /// All experiments, oldest first
    pub fn list(&self) -> Vec<Experiment> {
        let mut experiments: Vec<Experiment> =
            self.experiments.iter().map(|e| e.value().clone()).collect();
        experiments.sort_by_key(|e| e.created_at);
        experiments
    }

    pub fn list_by_status(&self, status: ExperimentStatus) -> Vec<Experiment> {
        self.list().into_iter().filter(|e| e.status == status).collect()
    }

    pub fn register_segment(&self, segment: Segment) -> Result<()> {
        if segment.id.trim().is_empty() {
            return Err(DecisionError::Validation(
                "segment id must not be empty".to_string(),
            ));
        }

        if let Some(state) = &self.state {
            state.save_segment(&segment)?;
        }

        info!(segment_id = %segment.id, name = %segment.name, "Registered segment");
        self.segments.insert(segment.id.clone(), segment);
        Ok(())
    }

    pub fn get_segment(&self, segment_id: &str) -> Option<Segment> {
        self.segments.get(segment_id).map(|s| s.clone())
    }

    /// Store an experiment without validating it
    #[cfg(test)]
    pub(crate) fn insert_unchecked(&self, experiment: Experiment) {
        self.experiments.insert(experiment.id, experiment);
    }
}

impl Default for ExperimentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
