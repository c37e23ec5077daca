//! Deterministic variant assignment
//!
//! A subject's bucket is derived from a SHA-256 hash of the experiment id and
//! subject id, so every process computes the same answer without
//! coordination. Two independently salted hashes are used: one decides
//! whether the subject is enrolled at all (traffic allocation), the other
//! picks the variant from the cumulative weight buckets.

use abtest_types::{Assignment, Experiment, ExperimentStatus, Variant};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::{
    errors::{DecisionError, Result},
    registry::ExperimentRegistry,
    segments::{SegmentMembership, Subject},
    store::AssignmentStore,
};

const VARIANT_SALT: &str = "variant";
const TRAFFIC_SALT: &str = "traffic";

/// Map (experiment, subject, salt) to a uniform point in [0, 1)
pub fn unit_hash(experiment_id: &Uuid, subject_id: &str, salt: &str) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(experiment_id.as_bytes());
    hasher.update(b":");
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(subject_id.as_bytes());
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);

    // Top 53 bits fit exactly in an f64 mantissa
    (u64::from_be_bytes(prefix) >> 11) as f64 / (1u64 << 53) as f64
}

/// Whether the traffic gate admits this subject
pub fn in_traffic(experiment: &Experiment, subject_id: &str) -> bool {
    if experiment.traffic_allocation >= 1.0 {
        return true;
    }
    unit_hash(&experiment.id, subject_id, TRAFFIC_SALT) < experiment.traffic_allocation
}

/// Pick the variant whose cumulative weight bucket contains `point`
pub fn select_bucket(experiment: &Experiment, point: f64) -> Option<&Variant> {
    let ordered = experiment.bucket_order();

    let mut cumulative = 0.0;
    for variant in &ordered {
        cumulative += variant.weight;
        if point < cumulative {
            return Some(*variant);
        }
    }

    // Weights may sum to slightly under 1.0
    ordered.into_iter().rev().find(|v| v.weight > 0.0)
}

/// Variant a subject would receive, ignoring gates and stored assignments
pub fn derive_variant<'a>(experiment: &'a Experiment, subject_id: &str) -> Option<&'a Variant> {
    select_bucket(experiment, unit_hash(&experiment.id, subject_id, VARIANT_SALT))
}

/// Assigns subjects to variants
pub struct AssignmentEngine {
    registry: Arc<ExperimentRegistry>,
    store: Arc<dyn AssignmentStore>,
    membership: Arc<dyn SegmentMembership>,
}

impl AssignmentEngine {
    pub fn new(
        registry: Arc<ExperimentRegistry>,
        store: Arc<dyn AssignmentStore>,
        membership: Arc<dyn SegmentMembership>,
    ) -> Self {
        Self {
            registry,
            store,
            membership,
        }
    }

    /// Assign a subject, returning `None` when the subject is not enrolled
    ///
    /// Only active experiments enroll new subjects. Paused experiments
    /// return an existing assignment and refuse new enrollment.
    pub fn assign(&self, experiment_id: &Uuid, subject: &Subject) -> Result<Option<Uuid>> {
        let experiment = self.registry.require(experiment_id)?;

        match experiment.status {
            ExperimentStatus::Active => {}
            ExperimentStatus::Paused => {
                return match self.store.get(experiment_id, &subject.id)? {
                    Some(existing) => Ok(Some(existing.variant_id)),
                    None => Err(DecisionError::NotEligible(format!(
                        "experiment {experiment_id} is paused; no new enrollment"
                    ))),
                };
            }
            status => {
                return Err(DecisionError::NotEligible(format!(
                    "experiment {experiment_id} is {status}"
                )));
            }
        }

        if let Some(existing) = self.store.get(experiment_id, &subject.id)? {
            return Ok(Some(existing.variant_id));
        }

        if !self.matches_segments(&experiment, subject)? {
            debug!(experiment_id = %experiment_id, subject_id = %subject.id, "Subject outside target segments");
            return Ok(None);
        }

        if !in_traffic(&experiment, &subject.id) {
            debug!(experiment_id = %experiment_id, subject_id = %subject.id, "Subject outside traffic allocation");
            return Ok(None);
        }

        let variant = derive_variant(&experiment, &subject.id).ok_or_else(|| {
            DecisionError::Validation(format!(
                "experiment {experiment_id} has no variant with positive weight"
            ))
        })?;

        let canonical = self
            .store
            .insert_if_absent(Assignment::new(*experiment_id, subject.id.clone(), variant.id))?;

        debug!(
            experiment_id = %experiment_id,
            subject_id = %subject.id,
            variant_id = %canonical.variant_id,
            "Assigned subject"
        );

        Ok(Some(canonical.variant_id))
    }

    /// The persisted assignment for a subject, if any
    pub fn assignment(&self, experiment_id: &Uuid, subject_id: &str) -> Result<Option<Assignment>> {
        self.store.get(experiment_id, subject_id)
    }

    pub fn enrolled_count(&self, experiment_id: &Uuid) -> Result<usize> {
        self.store.count(experiment_id)
    }

    fn matches_segments(&self, experiment: &Experiment, subject: &Subject) -> Result<bool> {
        if !experiment.targets_segments() {
            return Ok(true);
        }

        for segment_id in &experiment.target_segments {
            let segment = self
                .registry
                .get_segment(segment_id)
                .ok_or_else(|| DecisionError::SegmentNotFound(segment_id.clone()))?;
            if self.membership.is_member(&segment, subject) {
                return Ok(true);
            }
        }

        Ok(false)
    }
}
