//! Per-variant statistical evaluation against the control

use abtest_config::StatisticsConfig;
use abtest_types::{
    ConfidenceGrade, ConfidenceInterval, Experiment, LiftKind, Variant, VariantMetrics,
    VariantResult,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::{
    errors::{DecisionError, Result},
    statistical::{proportion_interval, StatisticalTest, ZTest},
};

/// Evaluation of every variant of one experiment, control first
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evaluation {
    pub experiment_id: Uuid,
    pub confidence_level: f64,
    pub variants: Vec<VariantResult>,
}

impl Evaluation {
    pub fn get(&self, variant_id: &Uuid) -> Option<&VariantResult> {
        self.variants.iter().find(|v| v.variant_id == *variant_id)
    }

    pub fn control(&self) -> Option<&VariantResult> {
        self.variants.iter().find(|v| v.is_control)
    }

    pub fn treatments(&self) -> impl Iterator<Item = &VariantResult> {
        self.variants.iter().filter(|v| !v.is_control)
    }

    /// True when any arm is still under the minimum sample
    pub fn has_low_confidence(&self) -> bool {
        self.variants
            .iter()
            .any(|v| v.insufficient_data || v.confidence == ConfidenceGrade::Low)
    }
}

/// Compares each treatment's conversion rate with the control
#[derive(Debug, Clone)]
pub struct StatisticalEvaluator {
    confidence_level: f64,
    min_sample_size: u64,
}

impl StatisticalEvaluator {
    pub fn new(confidence_level: f64, min_sample_size: u64) -> Result<Self> {
        if !(confidence_level > 0.0 && confidence_level < 1.0) {
            return Err(DecisionError::Validation(format!(
                "confidence level must be between 0 and 1, got {confidence_level}"
            )));
        }

        Ok(Self {
            confidence_level,
            min_sample_size,
        })
    }

    pub fn from_config(config: &StatisticsConfig) -> Result<Self> {
        Self::new(config.confidence_level, config.min_sample_size)
    }

    pub fn confidence_level(&self) -> f64 {
        self.confidence_level
    }

    pub fn min_sample_size(&self) -> u64 {
        self.min_sample_size
    }

    fn alpha(&self) -> f64 {
        1.0 - self.confidence_level
    }

    fn grade(&self, exposures: u64) -> ConfidenceGrade {
        if exposures >= self.min_sample_size {
            ConfidenceGrade::Sufficient
        } else {
            ConfidenceGrade::Low
        }
    }

    fn rate_interval(&self, metrics: &VariantMetrics) -> Result<Option<ConfidenceInterval>> {
        if !metrics.has_exposures() {
            return Ok(None);
        }

        let (lower, upper) =
            proportion_interval(metrics.conversions, metrics.users_exposed, self.confidence_level)?;
        Ok(Some(ConfidenceInterval {
            lower,
            upper,
            level: self.confidence_level,
        }))
    }

    /// Evaluate every variant from a metrics snapshot
    ///
    /// Variants missing from the snapshot are treated as having no events.
    pub fn evaluate(
        &self,
        experiment: &Experiment,
        snapshot: &HashMap<Uuid, VariantMetrics>,
    ) -> Result<Evaluation> {
        let control = experiment.control().ok_or_else(|| {
            DecisionError::Validation(format!("experiment {} has no control variant", experiment.id))
        })?;

        let metrics_for = |variant: &Variant| -> Result<VariantMetrics> {
            let metrics = snapshot
                .get(&variant.id)
                .cloned()
                .unwrap_or_else(|| VariantMetrics::empty(variant.id));

            if metrics.conversions > metrics.users_exposed {
                return Err(DecisionError::StatisticalError(format!(
                    "variant {} has more converting subjects than exposed subjects",
                    variant.id
                )));
            }
            Ok(metrics)
        };

        let control_metrics = metrics_for(control)?;
        let mut variants = vec![self.control_row(control, &control_metrics)?];

        for variant in experiment.bucket_order() {
            if variant.is_control {
                continue;
            }
            let metrics = metrics_for(variant)?;
            variants.push(self.compare(variant, metrics, &control_metrics)?);
        }

        debug!(
            experiment_id = %experiment.id,
            variants = variants.len(),
            "Evaluated experiment"
        );

        Ok(Evaluation {
            experiment_id: experiment.id,
            confidence_level: self.confidence_level,
            variants,
        })
    }

    fn control_row(&self, control: &Variant, metrics: &VariantMetrics) -> Result<VariantResult> {
        Ok(VariantResult {
            variant_id: control.id,
            name: control.name.clone(),
            is_control: true,
            rate_interval: self.rate_interval(metrics)?,
            difference_interval: None,
            z_score: None,
            p_value: None,
            statistical_significance: 0.0,
            is_significant: false,
            confidence: self.grade(metrics.users_exposed),
            insufficient_data: !metrics.has_exposures(),
            lift: None,
            lift_kind: LiftKind::Relative,
            metrics: metrics.clone(),
        })
    }

    /// Compare one treatment with the control
    pub fn compare(
        &self,
        variant: &Variant,
        metrics: VariantMetrics,
        control: &VariantMetrics,
    ) -> Result<VariantResult> {
        let rate_interval = self.rate_interval(&metrics)?;

        let (lift, lift_kind) = if control.conversion_rate > 0.0 {
            (
                (metrics.conversion_rate - control.conversion_rate) / control.conversion_rate,
                LiftKind::Relative,
            )
        } else {
            (metrics.conversion_rate - control.conversion_rate, LiftKind::Absolute)
        };

        if !metrics.has_exposures() || !control.has_exposures() {
            return Ok(VariantResult {
                variant_id: variant.id,
                name: variant.name.clone(),
                is_control: false,
                metrics,
                rate_interval,
                difference_interval: None,
                z_score: None,
                p_value: None,
                statistical_significance: 0.0,
                is_significant: false,
                confidence: ConfidenceGrade::Low,
                insufficient_data: true,
                lift: None,
                lift_kind,
            });
        }

        let test = ZTest::new(
            metrics.conversions,
            metrics.users_exposed,
            control.conversions,
            control.users_exposed,
        );
        let z_score = test.z_statistic()?;
        let p_value = test.test()?;
        let (lower, upper) = test.confidence_interval(self.confidence_level)?;

        let confidence = self.grade(metrics.users_exposed.min(control.users_exposed));
        let is_significant =
            confidence == ConfidenceGrade::Sufficient && test.is_significant(self.alpha())?;

        Ok(VariantResult {
            variant_id: variant.id,
            name: variant.name.clone(),
            is_control: false,
            metrics,
            rate_interval,
            difference_interval: Some(ConfidenceInterval {
                lower,
                upper,
                level: self.confidence_level,
            }),
            z_score: Some(z_score),
            p_value: Some(p_value),
            statistical_significance: 1.0 - p_value,
            is_significant,
            confidence,
            insufficient_data: false,
            lift: Some(lift),
            lift_kind,
        })
    }
}

impl Default for StatisticalEvaluator {
    fn default() -> Self {
        Self {
            confidence_level: 0.95,
            min_sample_size: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abtest_types::ExperimentSpec;
    use approx::assert_relative_eq;

    fn experiment() -> Experiment {
        Experiment::from_spec(ExperimentSpec::new(
            "Subject line",
            vec![Variant::control("control", 0.5), Variant::new("question", 0.5)],
        ))
    }

    fn snapshot(
        exp: &Experiment,
        control: (u64, u64),
        treatment: (u64, u64),
    ) -> HashMap<Uuid, VariantMetrics> {
        let mut map = HashMap::new();
        let c = exp.variants[0].id;
        let t = exp.variants[1].id;
        map.insert(c, VariantMetrics::from_counts(c, control.0, 0, control.1));
        map.insert(t, VariantMetrics::from_counts(t, treatment.0, 0, treatment.1));
        map
    }

    #[test]
    fn test_significant_lift() {
        let exp = experiment();
        let evaluation = StatisticalEvaluator::default()
            .evaluate(&exp, &snapshot(&exp, (1000, 100), (1000, 140)))
            .unwrap();

        let treatment = evaluation.get(&exp.variants[1].id).unwrap();
        assert!(treatment.is_significant);
        assert_eq!(treatment.confidence, ConfidenceGrade::Sufficient);
        assert_relative_eq!(treatment.lift.unwrap(), 0.4, epsilon = 1e-9);
        assert_eq!(treatment.lift_kind, LiftKind::Relative);
        assert!(treatment.p_value.unwrap() < 0.05);
        assert_relative_eq!(
            treatment.statistical_significance,
            1.0 - treatment.p_value.unwrap()
        );

        let diff = treatment.difference_interval.unwrap();
        assert!(diff.lower > 0.0);
        assert!(diff.contains(0.04));
    }

    #[test]
    fn test_control_row_has_no_test() {
        let exp = experiment();
        let evaluation = StatisticalEvaluator::default()
            .evaluate(&exp, &snapshot(&exp, (1000, 100), (1000, 140)))
            .unwrap();

        let control = evaluation.control().unwrap();
        assert_eq!(evaluation.variants[0].variant_id, control.variant_id);
        assert!(control.p_value.is_none());
        assert!(control.lift.is_none());
        assert!(!control.is_significant);
        assert!(control.rate_interval.unwrap().contains(0.1));
    }

    #[test]
    fn test_small_sample_not_significant() {
        let exp = experiment();
        let evaluation = StatisticalEvaluator::default()
            .evaluate(&exp, &snapshot(&exp, (50, 10), (50, 12)))
            .unwrap();

        let treatment = evaluation.get(&exp.variants[1].id).unwrap();
        assert!(!treatment.is_significant);
        assert!(treatment.p_value.unwrap() > 0.05);
    }

    #[test]
    fn test_min_sample_guard_suppresses_significance() {
        let exp = experiment();
        // Large effect on a tiny sample
        let evaluation = StatisticalEvaluator::default()
            .evaluate(&exp, &snapshot(&exp, (20, 0), (20, 15)))
            .unwrap();

        let treatment = evaluation.get(&exp.variants[1].id).unwrap();
        assert!(treatment.p_value.unwrap() < 0.05);
        assert_eq!(treatment.confidence, ConfidenceGrade::Low);
        assert!(!treatment.is_significant);
        assert!(evaluation.has_low_confidence());
    }

    #[test]
    fn test_zero_control_rate_uses_absolute_lift() {
        let exp = experiment();
        let evaluation = StatisticalEvaluator::default()
            .evaluate(&exp, &snapshot(&exp, (100, 0), (100, 5)))
            .unwrap();

        let treatment = evaluation.get(&exp.variants[1].id).unwrap();
        assert_eq!(treatment.lift_kind, LiftKind::Absolute);
        assert_relative_eq!(treatment.lift.unwrap(), 0.05, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_conversions_both_arms() {
        let exp = experiment();
        let evaluation = StatisticalEvaluator::default()
            .evaluate(&exp, &snapshot(&exp, (100, 0), (100, 0)))
            .unwrap();

        let treatment = evaluation.get(&exp.variants[1].id).unwrap();
        assert_relative_eq!(treatment.p_value.unwrap(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(treatment.statistical_significance, 0.0, epsilon = 1e-12);
        assert!(!treatment.is_significant);
    }

    #[test]
    fn test_no_exposures_is_insufficient_data() {
        let exp = experiment();
        let evaluation = StatisticalEvaluator::default()
            .evaluate(&exp, &HashMap::new())
            .unwrap();

        let treatment = evaluation.get(&exp.variants[1].id).unwrap();
        assert!(treatment.insufficient_data);
        assert!(treatment.p_value.is_none());
        assert!(treatment.rate_interval.is_none());
        assert_eq!(treatment.metrics.conversion_rate, 0.0);
    }

    #[test]
    fn test_rejects_impossible_counts() {
        let exp = experiment();
        let result =
            StatisticalEvaluator::default().evaluate(&exp, &snapshot(&exp, (10, 11), (10, 1)));

        assert!(matches!(result, Err(DecisionError::StatisticalError(_))));
    }

    #[test]
    fn test_invalid_confidence_level() {
        assert!(StatisticalEvaluator::new(1.0, 30).is_err());
        assert!(StatisticalEvaluator::new(0.0, 30).is_err());
        assert!(StatisticalEvaluator::new(0.99, 30).is_ok());
    }
}
