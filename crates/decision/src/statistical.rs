//! Statistical significance testing for A/B experiments
//!
//! This module provides the two-proportion z-test used to compare conversion
//! rates, confidence intervals for proportions and their differences, and a
//! sample size calculator.

use statrs::distribution::{ContinuousCDF, Normal};

use crate::errors::{DecisionError, Result};

/// Statistical test trait
pub trait StatisticalTest {
    /// Perform the test and return p-value
    fn test(&self) -> Result<f64>;

    /// Check if result is significant at given alpha level
    fn is_significant(&self, alpha: f64) -> Result<bool> {
        Ok(self.test()? < alpha)
    }
}

fn standard_normal() -> Result<Normal> {
    Normal::new(0.0, 1.0).map_err(|e| DecisionError::StatisticalError(e.to_string()))
}

/// Two-sided critical value z* for a confidence level
pub fn z_critical(confidence: f64) -> Result<f64> {
    if !(confidence > 0.0 && confidence < 1.0) {
        return Err(DecisionError::StatisticalError(format!(
            "Confidence level must be between 0 and 1, got {confidence}"
        )));
    }

    let alpha = 1.0 - confidence;
    Ok(standard_normal()?.inverse_cdf(1.0 - alpha / 2.0))
}

/// Wald interval for a single proportion, clamped to [0, 1]
pub fn proportion_interval(successes: u64, trials: u64, confidence: f64) -> Result<(f64, f64)> {
    if trials == 0 {
        return Err(DecisionError::InsufficientData(
            "Cannot calculate confidence interval with zero trials".to_string(),
        ));
    }

    let n = trials as f64;
    let p = successes as f64 / n;
    let margin = z_critical(confidence)? * (p * (1.0 - p) / n).sqrt();

    Ok(((p - margin).max(0.0), (p + margin).min(1.0)))
}

/// Two-proportion z-test for comparing conversion rates
///
/// Tests the null hypothesis that two proportions are equal. Group 1 is the
/// treatment and group 2 the control, so positive statistics favour the
/// treatment.
#[derive(Debug, Clone)]
pub struct ZTest {
    /// Successes in group 1
    pub successes_1: u64,
    /// Total trials in group 1
    pub trials_1: u64,
    /// Successes in group 2
    pub successes_2: u64,
    /// Total trials in group 2
    pub trials_2: u64,
}

impl ZTest {
    /// Create a new z-test
    pub fn new(successes_1: u64, trials_1: u64, successes_2: u64, trials_2: u64) -> Self {
        Self {
            successes_1,
            trials_1,
            successes_2,
            trials_2,
        }
    }

    /// Calculate sample proportions
    pub fn proportions(&self) -> (f64, f64) {
        let p1 = if self.trials_1 > 0 {
            self.successes_1 as f64 / self.trials_1 as f64
        } else {
            0.0
        };

        let p2 = if self.trials_2 > 0 {
            self.successes_2 as f64 / self.trials_2 as f64
        } else {
            0.0
        };

        (p1, p2)
    }

    /// Calculate pooled proportion
    pub fn pooled_proportion(&self) -> f64 {
        let total_successes = self.successes_1 + self.successes_2;
        let total_trials = self.trials_1 + self.trials_2;

        if total_trials > 0 {
            total_successes as f64 / total_trials as f64
        } else {
            0.0
        }
    }

    fn require_trials(&self) -> Result<(f64, f64)> {
        if self.trials_1 == 0 || self.trials_2 == 0 {
            return Err(DecisionError::InsufficientData(
                "Cannot perform z-test with zero trials".to_string(),
            ));
        }
        Ok((self.trials_1 as f64, self.trials_2 as f64))
    }

    /// Calculate z-statistic using the pooled standard error
    ///
    /// With no variation in either arm (pooled proportion of 0 or 1) the
    /// arms are identical and the statistic is 0.
    pub fn z_statistic(&self) -> Result<f64> {
        let (n1, n2) = self.require_trials()?;
        let (p1, p2) = self.proportions();
        let p_pool = self.pooled_proportion();

        // Standard error: sqrt(p_pool * (1 - p_pool) * (1/n1 + 1/n2))
        let se = (p_pool * (1.0 - p_pool) * (1.0 / n1 + 1.0 / n2)).sqrt();

        if se == 0.0 {
            return Ok(0.0);
        }

        Ok((p1 - p2) / se)
    }

    /// Confidence interval for p1 - p2 using the unpooled standard error
    pub fn confidence_interval(&self, confidence: f64) -> Result<(f64, f64)> {
        let (n1, n2) = self.require_trials()?;
        let (p1, p2) = self.proportions();
        let diff = p1 - p2;

        // Standard error for difference: sqrt(p1(1-p1)/n1 + p2(1-p2)/n2)
        let se = ((p1 * (1.0 - p1) / n1) + (p2 * (1.0 - p2) / n2)).sqrt();

        let margin = z_critical(confidence)? * se;
        Ok((diff - margin, diff + margin))
    }
}

impl StatisticalTest for ZTest {
    /// Perform two-tailed z-test and return p-value
    fn test(&self) -> Result<f64> {
        let z = self.z_statistic()?;

        // Two-tailed p-value
        let p_value = 2.0 * (1.0 - standard_normal()?.cdf(z.abs()));

        Ok(p_value.clamp(0.0, 1.0))
    }
}

/// Sample size calculator for A/B tests
pub struct SampleSizeCalculator {
    /// Baseline conversion rate
    pub baseline_rate: f64,
    /// Minimum detectable effect (relative improvement)
    pub min_effect: f64,
    /// Statistical power (1 - beta)
    pub power: f64,
    /// Significance level (alpha)
    pub alpha: f64,
}

impl SampleSizeCalculator {
    /// Create a new sample size calculator
    pub fn new(baseline_rate: f64, min_effect: f64, power: f64, alpha: f64) -> Result<Self> {
        if baseline_rate <= 0.0 || baseline_rate >= 1.0 {
            return Err(DecisionError::Validation(
                "Baseline rate must be between 0 and 1".to_string(),
            ));
        }

        if min_effect <= 0.0 {
            return Err(DecisionError::Validation(
                "Minimum detectable effect must be positive".to_string(),
            ));
        }

        if power <= 0.0 || power >= 1.0 {
            return Err(DecisionError::Validation(
                "Power must be between 0 and 1".to_string(),
            ));
        }

        if alpha <= 0.0 || alpha >= 1.0 {
            return Err(DecisionError::Validation(
                "Alpha must be between 0 and 1".to_string(),
            ));
        }

        Ok(Self {
            baseline_rate,
            min_effect,
            power,
            alpha,
        })
    }

    /// Calculate required sample size per variant
    pub fn calculate(&self) -> Result<u64> {
        let p1 = self.baseline_rate;
        let p2 = self.baseline_rate * (1.0 + self.min_effect);

        if p2 >= 1.0 {
            return Err(DecisionError::Validation(
                "Effect size too large, treatment rate exceeds 1.0".to_string(),
            ));
        }

        let normal = standard_normal()?;
        let z_alpha = normal.inverse_cdf(1.0 - self.alpha / 2.0);
        let z_beta = normal.inverse_cdf(self.power);

        let p_avg = (p1 + p2) / 2.0;
        let delta = (p2 - p1).abs();

        let n = ((z_alpha + z_beta).powi(2) * 2.0 * p_avg * (1.0 - p_avg)) / delta.powi(2);

        Ok(n.ceil() as u64)
    }
}
