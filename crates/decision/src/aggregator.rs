//! Event aggregation
//!
//! Maintains running per-variant tallies from metric events. Exposure,
//! engagement and conversion counts used for rates are sets of subject ids,
//! so redelivered events never inflate a denominator. Raw engagement and
//! conversion event totals and revenue are kept alongside.
//!
//! Event ids seen for redelivery detection are tracked per experiment and
//! released once the experiment reaches a terminal state.

use abtest_types::{EventKind, Experiment, MetricEvent, VariantMetrics};
use dashmap::{DashMap, DashSet};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::{
    errors::{DecisionError, Result},
    store::StateStore,
};

/// Whether an event changed the tallies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Counted,
    /// Repeat exposure, or an event id already seen
    Duplicate,
}

#[derive(Debug, Default)]
struct VariantTally {
    exposed: HashSet<String>,
    engaged: HashSet<String>,
    converted: HashSet<String>,
    engagement_events: u64,
    conversion_events: u64,
    revenue: f64,
}

impl VariantTally {
    fn to_metrics(&self, variant_id: Uuid) -> VariantMetrics {
        VariantMetrics::from_counts(
            variant_id,
            self.exposed.len() as u64,
            self.engaged.len() as u64,
            self.converted.len() as u64,
        )
        .with_event_totals(self.engagement_events, self.conversion_events, self.revenue)
    }
}

/// Running counters keyed by (experiment, variant)
pub struct EventAggregator {
    tallies: DashMap<(Uuid, Uuid), VariantTally>,
    seen_events: DashMap<Uuid, DashSet<Uuid>>,
    state: Option<Arc<dyn StateStore>>,
}

impl EventAggregator {
    pub fn new() -> Self {
        Self {
            tallies: DashMap::new(),
            seen_events: DashMap::new(),
            state: None,
        }
    }

    /// Aggregator rebuilt by replaying the event log in `state`
    ///
    /// Counted events are appended to the log as they arrive.
    pub fn with_state(state: Arc<dyn StateStore>) -> Result<Self> {
        let events = state.load_events()?;
        let aggregator = Self {
            state: Some(state),
            ..Self::new()
        };

        for event in &events {
            aggregator.apply(event);
        }
        info!(events = events.len(), "Replayed event log");

        Ok(aggregator)
    }

    /// Fold one event into the tallies
    ///
    /// An engagement or conversion from a subject with no recorded exposure
    /// counts as that subject's exposure as well.
    pub fn record(&self, event: &MetricEvent) -> Result<RecordOutcome> {
        if event.subject_id.is_empty() {
            return Err(DecisionError::Validation(
                "event subject_id must not be empty".to_string(),
            ));
        }
        if !event.value.is_finite() || event.value < 0.0 {
            return Err(DecisionError::Validation(format!(
                "event value must be a finite non-negative number, got {}",
                event.value
            )));
        }

        let outcome = self.apply(event);
        if outcome == RecordOutcome::Counted {
            if let Some(state) = &self.state {
                state.append_event(event)?;
            }
        }

        trace!(
            experiment_id = %event.experiment_id,
            variant_id = %event.variant_id,
            kind = ?event.kind,
            outcome = ?outcome,
            "Recorded event"
        );

        Ok(outcome)
    }

    fn apply(&self, event: &MetricEvent) -> RecordOutcome {
        if let Some(event_id) = event.event_id {
            let fresh = self
                .seen_events
                .entry(event.experiment_id)
                .or_default()
                .insert(event_id);
            if !fresh {
                trace!(event_id = %event_id, "Dropped redelivered event");
                return RecordOutcome::Duplicate;
            }
        }

        let mut tally = self
            .tallies
            .entry((event.experiment_id, event.variant_id))
            .or_default();

        match event.kind {
            EventKind::Exposure => {
                if tally.exposed.insert(event.subject_id.clone()) {
                    RecordOutcome::Counted
                } else {
                    RecordOutcome::Duplicate
                }
            }
            EventKind::Engagement => {
                tally.exposed.insert(event.subject_id.clone());
                tally.engaged.insert(event.subject_id.clone());
                tally.engagement_events += 1;
                RecordOutcome::Counted
            }
            EventKind::Conversion => {
                tally.exposed.insert(event.subject_id.clone());
                tally.converted.insert(event.subject_id.clone());
                tally.conversion_events += 1;
                tally.revenue += event.value;
                RecordOutcome::Counted
            }
        }
    }

    /// Forget the event ids seen for an experiment that accepts no more events
    pub fn release(&self, experiment_id: &Uuid) -> usize {
        let released = self
            .seen_events
            .remove(experiment_id)
            .map(|(_, ids)| ids.len())
            .unwrap_or(0);
        debug!(experiment_id = %experiment_id, released, "Released event ids");
        released
    }

    /// Number of event ids held for redelivery detection
    pub fn tracked_event_ids(&self, experiment_id: &Uuid) -> usize {
        self.seen_events
            .get(experiment_id)
            .map(|ids| ids.len())
            .unwrap_or(0)
    }

    /// Metrics for every variant of an experiment, including ones with no events
    pub fn snapshot(&self, experiment: &Experiment) -> HashMap<Uuid, VariantMetrics> {
        experiment
            .variants
            .iter()
            .map(|variant| (variant.id, self.variant_metrics(&experiment.id, &variant.id)))
            .collect()
    }

    pub fn variant_metrics(&self, experiment_id: &Uuid, variant_id: &Uuid) -> VariantMetrics {
        self.tallies
            .get(&(*experiment_id, *variant_id))
            .map(|tally| tally.to_metrics(*variant_id))
            .unwrap_or_else(|| VariantMetrics::empty(*variant_id))
    }
}

impl Default for EventAggregator {
    fn default() -> Self {
        Self::new()
    }
}
