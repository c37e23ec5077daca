//! Verdicts and recommendations
//!
//! Turns an [`Evaluation`] into a [`TestResult`]: picks the winner, sizes the
//! effect and renders human-readable recommendations for the dashboard.

use abtest_config::StatisticsConfig;
use abtest_types::{Experiment, LiftKind, TestResult, VariantResult};
use chrono::Utc;
use tracing::{debug, info};

use crate::{evaluator::Evaluation, statistical::SampleSizeCalculator};

/// Magnitude bucket of an observed lift
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiftMagnitude {
    Negligible,
    Small,
    Moderate,
    Large,
}

impl LiftMagnitude {
    pub fn of(lift: f64) -> Self {
        match lift.abs() {
            l if l < 0.02 => LiftMagnitude::Negligible,
            l if l < 0.10 => LiftMagnitude::Small,
            l if l < 0.25 => LiftMagnitude::Moderate,
            _ => LiftMagnitude::Large,
        }
    }
}

/// Builds verdicts from evaluations
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    alpha: f64,
    min_sample_size: u64,
    power: f64,
    minimum_detectable_effect: f64,
}

impl DecisionEngine {
    pub fn new(config: &StatisticsConfig) -> Self {
        Self {
            alpha: config.alpha(),
            min_sample_size: config.min_sample_size,
            power: config.power,
            minimum_detectable_effect: config.minimum_detectable_effect,
        }
    }

    /// Significant treatment beating control by the widest absolute margin
    pub fn select_winner<'a>(&self, evaluation: &'a Evaluation) -> Option<&'a VariantResult> {
        let control_rate = evaluation.control()?.metrics.conversion_rate;

        evaluation
            .treatments()
            .filter(|v| v.is_significant && v.metrics.conversion_rate > control_rate)
            .max_by(|a, b| {
                let da = a.metrics.conversion_rate - control_rate;
                let db = b.metrics.conversion_rate - control_rate;
                da.total_cmp(&db)
            })
    }

    /// Exposures each arm needs to detect the configured effect
    ///
    /// Falls back to the minimum sample when the baseline rate is degenerate.
    pub fn required_sample_size(&self, baseline_rate: f64) -> u64 {
        SampleSizeCalculator::new(
            baseline_rate,
            self.minimum_detectable_effect,
            self.power,
            self.alpha,
        )
        .and_then(|calculator| calculator.calculate())
        .map(|n| n.max(self.min_sample_size))
        .unwrap_or(self.min_sample_size)
    }

    pub fn decide(&self, experiment: &Experiment, evaluation: Evaluation, is_final: bool) -> TestResult {
        let winner = self.select_winner(&evaluation).cloned();

        // Effect size falls back to the best-converting treatment
        let headline = winner.clone().or_else(|| {
            evaluation
                .treatments()
                .filter(|v| v.lift.is_some())
                .max_by(|a, b| a.metrics.conversion_rate.total_cmp(&b.metrics.conversion_rate))
                .cloned()
        });

        let recommendations = self.recommendations(&evaluation, winner.as_ref());
        let any_significant = evaluation.treatments().any(|v| v.is_significant);
        let total_sample_size = evaluation
            .variants
            .iter()
            .map(|v| v.metrics.users_exposed)
            .sum();

        let result = TestResult {
            experiment_id: experiment.id,
            experiment_name: experiment.name.clone(),
            status: experiment.status,
            winner_variant: winner.as_ref().map(|w| w.variant_id),
            is_statistically_significant: any_significant,
            confidence_level: evaluation.confidence_level,
            effect_size: headline.as_ref().and_then(|v| v.lift),
            effect_size_kind: headline
                .as_ref()
                .map(|v| v.lift_kind)
                .unwrap_or(LiftKind::Relative),
            variants: evaluation.variants,
            recommendations,
            total_sample_size,
            is_final,
            generated_at: Utc::now(),
        };

        match &result.winner_variant {
            Some(winner_id) => info!(
                experiment_id = %experiment.id,
                winner = %winner_id,
                effect_size = ?result.effect_size,
                is_final,
                "Experiment has a winner"
            ),
            None => debug!(
                experiment_id = %experiment.id,
                is_final,
                "Experiment has no winner"
            ),
        }

        result
    }

    fn recommendations(&self, evaluation: &Evaluation, winner: Option<&VariantResult>) -> Vec<String> {
        let mut lines = Vec::new();
        let confidence_pct = evaluation.confidence_level * 100.0;

        match winner {
            Some(w) => {
                lines.push(format!(
                    "Roll out '{}': {} over control at {:.0}% confidence",
                    w.name,
                    describe_lift(w),
                    confidence_pct
                ));
                if let Some(lift) = w.lift {
                    lines.push(
                        match LiftMagnitude::of(lift) {
                            LiftMagnitude::Negligible => {
                                "The effect is negligible; weigh the cost of switching before rollout"
                            }
                            LiftMagnitude::Small => {
                                "The effect is small; monitor conversion after rollout"
                            }
                            LiftMagnitude::Moderate => {
                                "The effect is moderate; roll out to all traffic"
                            }
                            LiftMagnitude::Large => {
                                "The effect is large; verify event instrumentation before rollout"
                            }
                        }
                        .to_string(),
                    );
                }
            }
            None => {
                let reason = if evaluation.variants.iter().any(|v| v.insufficient_data) {
                    "some variants have no exposures yet".to_string()
                } else {
                    format!("no variant beat control at {confidence_pct:.0}% confidence")
                };
                lines.push(format!("No clear winner: {reason}"));
            }
        }

        if let Some(control) = evaluation.control() {
            for loser in evaluation.treatments().filter(|v| {
                v.is_significant && v.metrics.conversion_rate < control.metrics.conversion_rate
            }) {
                lines.push(format!(
                    "Retire '{}': {} against control",
                    loser.name,
                    describe_lift(loser)
                ));
            }

            if evaluation.has_low_confidence() {
                let needed = self.required_sample_size(control.metrics.conversion_rate);
                lines.push(format!(
                    "Keep collecting data: at least {} exposures per variant are needed to detect a {:.0}% lift",
                    needed,
                    self.minimum_detectable_effect * 100.0
                ));
            }
        }

        lines
    }
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self::new(&StatisticsConfig::default())
    }
}

fn describe_lift(result: &VariantResult) -> String {
    match (result.lift, result.lift_kind) {
        (Some(lift), LiftKind::Relative) => format!("{:+.1}% relative lift", lift * 100.0),
        (Some(lift), LiftKind::Absolute) => {
            format!("{:+.1} percentage points absolute lift", lift * 100.0)
        }
        (None, _) => "no measurable lift".to_string(),
    }
}
