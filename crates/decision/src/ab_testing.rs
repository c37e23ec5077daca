//! A/B testing engine
//!
//! This module provides the main A/B testing engine that combines the
//! experiment registry, deterministic assignment, event aggregation,
//! statistical evaluation and verdicts behind one shareable handle.

use abtest_config::{EngineConfig, StorageConfig};
use abtest_types::{
    Experiment, ExperimentSpec, ExperimentStatus, MetricEvent, Segment, TestResult, Variant,
    VariantMetrics,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    aggregator::{EventAggregator, RecordOutcome},
    assignment::AssignmentEngine,
    decision_engine::DecisionEngine,
    errors::{DecisionError, Result},
    evaluator::{Evaluation, StatisticalEvaluator},
    registry::ExperimentRegistry,
    segments::{AttributeMatcher, SegmentMembership, Subject},
    store::{AssignmentStore, MemoryAssignmentStore, SledStore, StateStore},
};

/// A/B testing engine
pub struct ABTestEngine {
    registry: Arc<ExperimentRegistry>,
    assignments: AssignmentEngine,
    aggregator: EventAggregator,
    evaluator: StatisticalEvaluator,
    decisions: DecisionEngine,
}

impl ABTestEngine {
    /// Create an engine with the storage backend selected by configuration
    ///
    /// The sled backend holds assignments, experiments, segments and the
    /// event log, and restores all of them when reopened.
    pub fn new(config: &EngineConfig) -> Result<Self> {
        match &config.storage {
            StorageConfig::Memory => Self::with_components(
                config,
                Arc::new(MemoryAssignmentStore::new()),
                Arc::new(AttributeMatcher),
            ),
            StorageConfig::Sled { path } => {
                let store = Arc::new(SledStore::open(path)?);
                Self::with_state(config, store.clone(), store, Arc::new(AttributeMatcher))
            }
        }
    }

    /// Create a process-local engine around caller-supplied collaborators
    pub fn with_components(
        config: &EngineConfig,
        store: Arc<dyn AssignmentStore>,
        membership: Arc<dyn SegmentMembership>,
    ) -> Result<Self> {
        Self::assemble(
            config,
            store,
            membership,
            ExperimentRegistry::new(),
            EventAggregator::new(),
        )
    }

    /// Create an engine restored from, and written through to, `state`
    pub fn with_state(
        config: &EngineConfig,
        store: Arc<dyn AssignmentStore>,
        state: Arc<dyn StateStore>,
        membership: Arc<dyn SegmentMembership>,
    ) -> Result<Self> {
        let registry = ExperimentRegistry::with_state(Arc::clone(&state))?;
        let aggregator = EventAggregator::with_state(state)?;

        for experiment in registry.list() {
            if experiment.status.is_terminal() {
                aggregator.release(&experiment.id);
            }
        }

        Self::assemble(config, store, membership, registry, aggregator)
    }

    fn assemble(
        config: &EngineConfig,
        store: Arc<dyn AssignmentStore>,
        membership: Arc<dyn SegmentMembership>,
        registry: ExperimentRegistry,
        aggregator: EventAggregator,
    ) -> Result<Self> {
        let registry = Arc::new(registry);

        Ok(Self {
            assignments: AssignmentEngine::new(Arc::clone(&registry), store, membership),
            registry,
            aggregator,
            evaluator: StatisticalEvaluator::from_config(&config.statistics)?,
            decisions: DecisionEngine::new(&config.statistics),
        })
    }

    /// Validate and store a new draft experiment
    pub fn create_experiment(&self, spec: ExperimentSpec) -> Result<Experiment> {
        self.registry.create_experiment(spec)
    }

    pub fn register_segment(&self, segment: Segment) -> Result<()> {
        self.registry.register_segment(segment)
    }

    /// Start an experiment
    pub fn start(&self, experiment_id: &Uuid) -> Result<Experiment> {
        info!("Starting experiment {}", experiment_id);
        self.registry.transition(experiment_id, ExperimentStatus::Active)
    }

    /// Pause an experiment
    pub fn pause(&self, experiment_id: &Uuid) -> Result<Experiment> {
        info!("Pausing experiment {}", experiment_id);
        self.registry.transition(experiment_id, ExperimentStatus::Paused)
    }

    /// Resume an experiment
    pub fn resume(&self, experiment_id: &Uuid) -> Result<Experiment> {
        let experiment = self.registry.require(experiment_id)?;
        if experiment.status != ExperimentStatus::Paused {
            return Err(DecisionError::InvalidTransition {
                from: experiment.status,
                to: ExperimentStatus::Active,
            });
        }

        info!("Resuming experiment {}", experiment_id);
        self.registry.transition(experiment_id, ExperimentStatus::Active)
    }

    /// Complete an experiment and capture its final verdict
    ///
    /// Event counting stops at the transition, so the verdict covers every
    /// event accepted before it. If the verdict cannot be computed the
    /// experiment still completes without one, and `results` recomputes it.
    pub fn end(&self, experiment_id: &Uuid) -> Result<Experiment> {
        info!("Concluding experiment {}", experiment_id);
        let completed = self.registry.transition(experiment_id, ExperimentStatus::Completed)?;
        self.aggregator.release(experiment_id);

        let result = match self.decide(&completed, true) {
            Ok(result) => result,
            Err(e) => {
                error!(
                    experiment_id = %experiment_id,
                    error = %e,
                    "Final verdict not recorded"
                );
                return Ok(completed);
            }
        };

        match result.winner() {
            Some(winner) => info!(
                "Experiment {} concluded. Winner: {}, p-value: {:?}, effect size: {:?}",
                experiment_id, winner.name, winner.p_value, result.effect_size
            ),
            None => info!(
                "Experiment {} concluded with no significant winner",
                experiment_id
            ),
        }

        self.registry.set_final_result(experiment_id, result)
    }

    /// Cancel an experiment; no verdict is kept
    pub fn cancel(&self, experiment_id: &Uuid) -> Result<Experiment> {
        info!("Cancelling experiment {}", experiment_id);
        let cancelled = self.registry.transition(experiment_id, ExperimentStatus::Cancelled)?;
        self.aggregator.release(experiment_id);
        Ok(cancelled)
    }

    /// Get experiment details
    pub fn get_experiment(&self, experiment_id: &Uuid) -> Option<Experiment> {
        self.registry.get(experiment_id)
    }

    /// List all experiments
    pub fn list_experiments(&self) -> Vec<Experiment> {
        self.registry.list()
    }

    /// List active experiments
    pub fn list_active_experiments(&self) -> Vec<Experiment> {
        self.registry.list_by_status(ExperimentStatus::Active)
    }

    /// Active experiments that have run past their scheduled duration
    pub fn overdue_experiments(&self, now: DateTime<Utc>) -> Vec<Experiment> {
        self.list_active_experiments()
            .into_iter()
            .filter(|e| e.scheduled_end().is_some_and(|end| end <= now))
            .collect()
    }

    /// Assign a subject; `None` means not enrolled
    pub fn assign(&self, experiment_id: &Uuid, subject: &Subject) -> Result<Option<Uuid>> {
        self.assignments.assign(experiment_id, subject)
    }

    /// Assign a subject and return the variant with its content payload
    pub fn assign_variant(&self, experiment_id: &Uuid, subject: &Subject) -> Result<Option<Variant>> {
        let Some(variant_id) = self.assign(experiment_id, subject)? else {
            return Ok(None);
        };

        let experiment = self.registry.require(experiment_id)?;
        let variant = experiment
            .variant(&variant_id)
            .cloned()
            .ok_or_else(|| DecisionError::VariantNotFound(variant_id.to_string()))?;

        debug!("Assigned variant {} for experiment {}", variant.name, experiment_id);
        Ok(Some(variant))
    }

    pub fn enrolled_count(&self, experiment_id: &Uuid) -> Result<usize> {
        self.assignments.enrolled_count(experiment_id)
    }

    /// Record a metric event from an enrolled subject
    ///
    /// Active and paused experiments accept events; the subject's stored
    /// assignment must match the event's variant.
    pub fn record_event(&self, event: &MetricEvent) -> Result<RecordOutcome> {
        let experiment = self.registry.require(&event.experiment_id)?;

        if !matches!(
            experiment.status,
            ExperimentStatus::Active | ExperimentStatus::Paused
        ) {
            warn!(
                experiment_id = %experiment.id,
                status = %experiment.status,
                "Rejected event for experiment that is not running"
            );
            return Err(DecisionError::NotEligible(format!(
                "experiment {} is {} and does not accept events",
                experiment.id, experiment.status
            )));
        }

        if experiment.variant(&event.variant_id).is_none() {
            return Err(DecisionError::VariantNotFound(event.variant_id.to_string()));
        }

        match self.assignments.assignment(&experiment.id, &event.subject_id)? {
            Some(assignment) if assignment.variant_id == event.variant_id => {}
            Some(_) => {
                warn!(
                    experiment_id = %experiment.id,
                    subject_id = %event.subject_id,
                    "Rejected event for a variant the subject was not assigned"
                );
                return Err(DecisionError::NotEligible(format!(
                    "subject {} is not assigned to variant {}",
                    event.subject_id, event.variant_id
                )));
            }
            None => {
                return Err(DecisionError::NotEligible(format!(
                    "subject {} is not enrolled in experiment {}",
                    event.subject_id, experiment.id
                )));
            }
        }

        self.aggregator.record(event)
    }

    /// Current per-variant metrics
    pub fn snapshot(&self, experiment_id: &Uuid) -> Result<HashMap<Uuid, VariantMetrics>> {
        let experiment = self.registry.require(experiment_id)?;
        Ok(self.aggregator.snapshot(&experiment))
    }

    /// Statistical evaluation of every variant against the control
    pub fn evaluate(&self, experiment_id: &Uuid) -> Result<Evaluation> {
        let experiment = self.registry.require(experiment_id)?;
        self.evaluate_experiment(&experiment)
    }

    fn evaluate_experiment(&self, experiment: &Experiment) -> Result<Evaluation> {
        let snapshot = self.aggregator.snapshot(experiment);
        self.evaluator.evaluate(experiment, &snapshot)
    }

    fn decide(&self, experiment: &Experiment, is_final: bool) -> Result<TestResult> {
        let evaluation = self.evaluate_experiment(experiment)?;
        Ok(self.decisions.decide(experiment, evaluation, is_final))
    }

    /// Verdict for an experiment
    ///
    /// Completed experiments return the verdict captured at completion. With
    /// `require_final`, a running experiment with any arm under the minimum
    /// sample fails `TooEarly`, and a cancelled one fails `NotEligible`.
    pub fn results(&self, experiment_id: &Uuid, require_final: bool) -> Result<TestResult> {
        let experiment = self.registry.require(experiment_id)?;

        match experiment.status {
            ExperimentStatus::Completed => match experiment.final_result {
                Some(result) => Ok(result),
                None => self.decide(&experiment, true),
            },
            ExperimentStatus::Cancelled if require_final => Err(DecisionError::NotEligible(
                format!("experiment {experiment_id} was cancelled and has no final verdict"),
            )),
            _ => {
                let evaluation = self.evaluate_experiment(&experiment)?;
                if require_final && evaluation.has_low_confidence() {
                    return Err(DecisionError::TooEarly(format!(
                        "every variant needs at least {} exposures before a final verdict",
                        self.evaluator.min_sample_size()
                    )));
                }
                Ok(self.decisions.decide(&experiment, evaluation, false))
            }
        }
    }

    /// Interim verdicts for every active experiment
    pub fn reevaluate_active(&self) -> Vec<TestResult> {
        self.list_active_experiments()
            .into_iter()
            .filter_map(|experiment| match self.decide(&experiment, false) {
                Ok(result) => Some(result),
                Err(e) => {
                    warn!(experiment_id = %experiment.id, error = %e, "Re-evaluation failed");
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abtest_types::EventKind;

    fn engine() -> ABTestEngine {
        ABTestEngine::new(&EngineConfig::default()).unwrap()
    }

    fn spec(name: &str) -> ExperimentSpec {
        ExperimentSpec::new(
            name,
            vec![Variant::control("control", 0.5), Variant::new("treatment", 0.5)],
        )
    }

    #[test]
    fn test_create_engine() {
        let engine = engine();

        assert_eq!(engine.evaluator.confidence_level(), 0.95);
        assert_eq!(engine.evaluator.min_sample_size(), 30);
        assert!(engine.list_experiments().is_empty());
    }

    #[test]
    fn test_pause_resume() {
        let engine = engine();
        let exp = engine.create_experiment(spec("Test")).unwrap();

        engine.start(&exp.id).unwrap();
        let enrolled = engine.assign(&exp.id, &Subject::new("early")).unwrap();
        engine.pause(&exp.id).unwrap();

        let paused = engine.get_experiment(&exp.id).unwrap();
        assert_eq!(paused.status, ExperimentStatus::Paused);

        // Enrolled subjects keep their variant, new ones are refused
        assert_eq!(engine.assign(&exp.id, &Subject::new("early")).unwrap(), enrolled);
        assert!(matches!(
            engine.assign(&exp.id, &Subject::new("late")),
            Err(DecisionError::NotEligible(_))
        ));

        engine.resume(&exp.id).unwrap();
        assert!(engine.assign(&exp.id, &Subject::new("late")).unwrap().is_some());
    }

    #[test]
    fn test_resume_requires_pause() {
        let engine = engine();
        let exp = engine.create_experiment(spec("Test")).unwrap();

        assert!(matches!(
            engine.resume(&exp.id),
            Err(DecisionError::InvalidTransition { .. })
        ));
        assert_eq!(
            engine.get_experiment(&exp.id).unwrap().status,
            ExperimentStatus::Draft
        );
    }

    #[test]
    fn test_assign_variant_returns_content() {
        let engine = engine();
        let exp = engine
            .create_experiment(ExperimentSpec::new(
                "Hero image",
                vec![
                    Variant::control("control", 0.5).with_content(serde_json::json!({"image": "a.png"})),
                    Variant::new("new", 0.5).with_content(serde_json::json!({"image": "b.png"})),
                ],
            ))
            .unwrap();
        engine.start(&exp.id).unwrap();

        let variant = engine
            .assign_variant(&exp.id, &Subject::new("visitor"))
            .unwrap()
            .unwrap();
        assert!(variant.content_config.get("image").is_some());
    }

    #[test]
    fn test_event_gating() {
        let engine = engine();
        let exp = engine.create_experiment(spec("Gating")).unwrap();
        let subject = Subject::new("u1");

        // Draft experiments reject events
        let draft_event = MetricEvent::exposure(exp.id, exp.variants[0].id, "u1");
        assert!(matches!(
            engine.record_event(&draft_event),
            Err(DecisionError::NotEligible(_))
        ));

        engine.start(&exp.id).unwrap();
        let assigned = engine.assign(&exp.id, &subject).unwrap().unwrap();
        let other = exp.variants.iter().find(|v| v.id != assigned).unwrap().id;

        assert!(engine
            .record_event(&MetricEvent::exposure(exp.id, assigned, "u1"))
            .is_ok());
        assert!(matches!(
            engine.record_event(&MetricEvent::exposure(exp.id, other, "u1")),
            Err(DecisionError::NotEligible(_))
        ));
        assert!(matches!(
            engine.record_event(&MetricEvent::exposure(exp.id, assigned, "stranger")),
            Err(DecisionError::NotEligible(_))
        ));
        assert!(matches!(
            engine.record_event(&MetricEvent::exposure(exp.id, Uuid::new_v4(), "u1")),
            Err(DecisionError::VariantNotFound(_))
        ));

        // Paused experiments keep counting enrolled subjects
        engine.pause(&exp.id).unwrap();
        let conversion = MetricEvent::conversion(exp.id, assigned, "u1", 9.99);
        assert_eq!(conversion.kind, EventKind::Conversion);
        assert_eq!(engine.record_event(&conversion).unwrap(), RecordOutcome::Counted);

        // Completion freezes counting
        engine.end(&exp.id).unwrap();
        assert!(matches!(
            engine.record_event(&MetricEvent::engagement(exp.id, assigned, "u1")),
            Err(DecisionError::NotEligible(_))
        ));

        let snapshot = engine.snapshot(&exp.id).unwrap();
        assert_eq!(snapshot[&assigned].users_exposed, 1);
        assert_eq!(snapshot[&assigned].conversions, 1);
        assert_eq!(snapshot[&assigned].engagement_events, 0);
    }

    #[test]
    fn test_results_too_early() {
        let engine = engine();
        let exp = engine.create_experiment(spec("Early")).unwrap();
        engine.start(&exp.id).unwrap();

        assert!(matches!(
            engine.results(&exp.id, true),
            Err(DecisionError::TooEarly(_))
        ));

        let interim = engine.results(&exp.id, false).unwrap();
        assert!(!interim.is_final);
        assert!(interim.winner_variant.is_none());
        assert!(interim.recommendations[0].starts_with("No clear winner"));
    }

    #[test]
    fn test_end_captures_final_result() {
        let engine = engine();
        let exp = engine.create_experiment(spec("Final")).unwrap();
        engine.start(&exp.id).unwrap();
        engine.assign(&exp.id, &Subject::new("u1")).unwrap();

        let completed = engine.end(&exp.id).unwrap();
        assert_eq!(completed.status, ExperimentStatus::Completed);
        assert!(completed.ended_at.is_some());

        let stored = completed.final_result.unwrap();
        assert!(stored.is_final);
        assert_eq!(stored.status, ExperimentStatus::Completed);
        assert_eq!(engine.results(&exp.id, true).unwrap(), stored);
    }

    #[test]
    fn test_end_completes_when_verdict_fails() {
        let engine = engine();

        // A control-less experiment cannot be evaluated
        let mut broken = Experiment::from_spec(ExperimentSpec::new(
            "Broken",
            vec![Variant::new("a", 0.5), Variant::new("b", 0.5)],
        ));
        broken.status = ExperimentStatus::Active;
        engine.registry.insert_unchecked(broken.clone());

        let completed = engine.end(&broken.id).unwrap();
        assert_eq!(completed.status, ExperimentStatus::Completed);
        assert!(completed.final_result.is_none());
        assert_eq!(
            engine.get_experiment(&broken.id).unwrap().status,
            ExperimentStatus::Completed
        );
    }

    #[test]
    fn test_terminal_states_release_event_ids() {
        let engine = engine();
        let exp = engine.create_experiment(spec("Dedup")).unwrap();
        engine.start(&exp.id).unwrap();
        let variant = engine.assign(&exp.id, &Subject::new("u1")).unwrap().unwrap();

        for _ in 0..1000 {
            let event =
                MetricEvent::engagement(exp.id, variant, "u1").with_event_id(Uuid::new_v4());
            engine.record_event(&event).unwrap();
        }
        assert_eq!(engine.aggregator.tracked_event_ids(&exp.id), 1000);

        engine.end(&exp.id).unwrap();
        assert_eq!(engine.aggregator.tracked_event_ids(&exp.id), 0);
        assert_eq!(engine.snapshot(&exp.id).unwrap()[&variant].engagement_events, 1000);

        let cancelled = engine.create_experiment(spec("Dropped")).unwrap();
        engine.start(&cancelled.id).unwrap();
        let variant = engine.assign(&cancelled.id, &Subject::new("u2")).unwrap().unwrap();
        engine
            .record_event(
                &MetricEvent::exposure(cancelled.id, variant, "u2").with_event_id(Uuid::new_v4()),
            )
            .unwrap();
        engine.cancel(&cancelled.id).unwrap();
        assert_eq!(engine.aggregator.tracked_event_ids(&cancelled.id), 0);
    }

    #[test]
    fn test_overdue_experiments() {
        let engine = engine();
        let exp = engine
            .create_experiment(spec("Two weeks").with_duration_days(14))
            .unwrap();
        engine.create_experiment(spec("Never started")).unwrap();
        engine.start(&exp.id).unwrap();

        assert!(engine.overdue_experiments(Utc::now()).is_empty());

        let later = Utc::now() + chrono::Duration::days(15);
        let overdue = engine.overdue_experiments(later);
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].id, exp.id);
    }

    #[test]
    fn test_cancelled_has_no_final_verdict() {
        let engine = engine();
        let exp = engine.create_experiment(spec("Cancelled")).unwrap();
        engine.cancel(&exp.id).unwrap();

        assert!(matches!(
            engine.results(&exp.id, true),
            Err(DecisionError::NotEligible(_))
        ));
        assert!(engine.start(&exp.id).is_err());
    }

    #[test]
    fn test_list_active_experiments() {
        let engine = engine();
        let first = engine.create_experiment(spec("Test 1")).unwrap();
        engine.create_experiment(spec("Test 2")).unwrap();
        engine.start(&first.id).unwrap();

        assert_eq!(engine.list_experiments().len(), 2);
        let active = engine.list_active_experiments();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, first.id);
        assert_eq!(engine.reevaluate_active().len(), 1);
    }

    #[test]
    fn test_unknown_experiment() {
        let engine = engine();
        let missing = Uuid::new_v4();

        assert!(matches!(
            engine.start(&missing),
            Err(DecisionError::ExperimentNotFound(_))
        ));
        assert!(matches!(
            engine.assign(&missing, &Subject::new("u")),
            Err(DecisionError::ExperimentNotFound(_))
        ));
    }
}
