//! Residual calibration: turn a point estimate into a probability
//! distribution over outcomes.
//!
//! The scale estimate is the MAD-based robust standard deviation
//! `1.4826 × median(|r − median(r)|)`, taken over held-out validation
//! residuals. Threshold probabilities then assume a normal distribution
//! around the point estimate. That normality is a documented
//! approximation, not a claim about reality, which is why `estimated_std`
//! travels with every probability this layer emits.

use serde::{Deserialize, Serialize};

use crate::db::models::{Confidence, ThresholdProbability};
use crate::error::EngineError;

/// MAD → stddev conversion factor for a normal distribution.
const MAD_TO_STD: f64 = 1.4826;

/// Below this scale the residual distribution is degenerate and any
/// probability would be spuriously certain.
const MIN_STD: f64 = 1e-6;

/// Fitted residual scale from a held-out partition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub estimated_std: f64,
    pub residual_count: usize,
}

impl Calibration {
    pub const MIN_RESIDUALS: usize = 8;

    /// Fit the robust scale estimate. Fails rather than emit a scale that
    /// would make every probability 0 or 1.
    pub fn fit(residuals: &[f64]) -> Result<Calibration, EngineError> {
        if residuals.len() < Self::MIN_RESIDUALS {
            return Err(EngineError::InsufficientCalibrationData {
                residuals: residuals.len(),
                estimated_std: 0.0,
            });
        }
        let med = median(residuals);
        let abs_devs: Vec<f64> = residuals.iter().map(|r| (r - med).abs()).collect();
        let estimated_std = MAD_TO_STD * median(&abs_devs);

        if !estimated_std.is_finite() || estimated_std < MIN_STD {
            return Err(EngineError::InsufficientCalibrationData {
                residuals: residuals.len(),
                estimated_std,
            });
        }
        Ok(Calibration {
            estimated_std,
            residual_count: residuals.len(),
        })
    }

    /// P(actual > threshold) = 1 − Φ((threshold − point_estimate) / std).
    pub fn prob_above(&self, point_estimate: f64, threshold: f64) -> f64 {
        let z = (threshold - point_estimate) / self.estimated_std;
        1.0 - normal_cdf(z)
    }

    /// P(actual > X) for evenly spaced thresholds centered on `center`,
    /// always including `center` itself.
    pub fn probability_curve(
        &self,
        point_estimate: f64,
        center: f64,
        half_span: f64,
        step: f64,
    ) -> Vec<(f64, f64)> {
        let mut thresholds = Vec::new();
        let mut t = center - half_span;
        while t <= center + half_span + 1e-9 {
            thresholds.push(t);
            t += step;
        }
        if !thresholds.iter().any(|&t| (t - center).abs() < 1e-9) {
            thresholds.push(center);
            thresholds.sort_by(|a, b| a.partial_cmp(b).expect("finite thresholds"));
        }
        thresholds
            .into_iter()
            .map(|t| (t, self.prob_above(point_estimate, t)))
            .collect()
    }

    /// Confidence from the edge (point estimate minus reference line)
    /// relative to the uncertainty: > 1.5σ high, > 0.5σ medium, else low.
    pub fn confidence(&self, edge: f64) -> Confidence {
        let ratio = edge.abs() / self.estimated_std;
        if ratio > 1.5 {
            Confidence::High
        } else if ratio > 0.5 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }

    /// Convenience wrapper building labeled threshold queries.
    pub fn threshold_probability(
        &self,
        label: impl Into<String>,
        point_estimate: f64,
        threshold: f64,
    ) -> ThresholdProbability {
        ThresholdProbability {
            label: label.into(),
            threshold,
            probability: self.prob_above(point_estimate, threshold),
        }
    }
}

fn median(xs: &[f64]) -> f64 {
    let mut sorted = xs.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("residuals must be finite"));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Standard normal CDF via the Abramowitz & Stegun erf polynomial
/// (formula 7.1.26, |error| < 1.5e-7).
pub fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;

    let t = 1.0 / (1.0 + P * x);
    let y = 1.0 - (((((A5 * t + A4) * t) + A3) * t + A2) * t + A1) * t * (-x * x).exp();
    sign * y
}
