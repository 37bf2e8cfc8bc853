//! Tail-risk metrics over a rolling window of prior cover margins.
//!
//! All rates here use *lined* prior games as the denominator: a game
//! without a closing spread has no cover margin, so it can neither
//! survive a teaser nor blow up against one. Games missing a line are
//! excluded from these rates but still count toward straight-up features.

use serde::{Deserialize, Serialize};

use crate::db::models::DerivedMetrics;
use crate::engine::FeatureConfig;

/// Coarse volatility classification derived from the blowout rate.
/// Thresholds match the production scorer: < 15% low, < 25% medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl RiskTier {
    pub fn from_blowout_rate(rate: Option<f64>) -> RiskTier {
        match rate {
            Some(r) if r < 0.15 => RiskTier::Low,
            Some(r) if r < 0.25 => RiskTier::Medium,
            Some(_) => RiskTier::High,
            // No lined history: assume the worst until proven otherwise.
            None => RiskTier::High,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
        }
    }
}

/// Fraction of prior lined games with cover_margin below `threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TailRate {
    pub threshold: f64,
    pub rate: f64,
}

/// Fraction of prior lined games the team would still have won against a
/// line moved `points` in its favor: cover_margin + points > 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TeaserSurvival {
    pub points: f64,
    pub rate: f64,
}

/// Distributional shape of a team's recent spread results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TailRiskMetrics {
    /// Lined prior games the rates below are computed over.
    pub lined_games: usize,
    pub downside_tail_rates: Vec<TailRate>,
    /// Fraction of prior lined games with cover_margin above the upside
    /// threshold (covered by a blowout themselves).
    pub upside_tail_rate: Option<f64>,
    /// Fraction of prior lined games at or below the blowout threshold.
    pub blowout_rate: Option<f64>,
    pub teaser_survival: Vec<TeaserSurvival>,
}

impl TailRiskMetrics {
    /// Compute tail metrics from the window's derived metrics. Empty lined
    /// history yields empty/None rates, never fabricated zeros.
    pub fn from_window(window: &[DerivedMetrics], cfg: &FeatureConfig) -> TailRiskMetrics {
        let covers: Vec<f64> = window.iter().filter_map(|m| m.cover_margin).collect();
        let n = covers.len();

        if n == 0 {
            return TailRiskMetrics {
                lined_games: 0,
                downside_tail_rates: Vec::new(),
                upside_tail_rate: None,
                blowout_rate: None,
                teaser_survival: Vec::new(),
            };
        }

        let rate = |pred: &dyn Fn(f64) -> bool| -> f64 {
            covers.iter().filter(|&&c| pred(c)).count() as f64 / n as f64
        };

        let downside_tail_rates = cfg
            .downside_tail_thresholds
            .iter()
            .map(|&t| TailRate {
                threshold: t,
                rate: rate(&|c| c < t),
            })
            .collect();

        let teaser_survival = cfg
            .teaser_points
            .iter()
            .map(|&points| TeaserSurvival {
                points,
                rate: rate(&|c| c + points > 0.0),
            })
            .collect();

        TailRiskMetrics {
            lined_games: n,
            downside_tail_rates,
            upside_tail_rate: Some(rate(&|c| c > cfg.upside_tail_threshold)),
            blowout_rate: Some(rate(&|c| c <= cfg.blowout_threshold)),
            teaser_survival,
        }
    }

    pub fn teaser_survival_at(&self, points: f64) -> Option<f64> {
        self.teaser_survival
            .iter()
            .find(|t| (t.points - points).abs() < f64::EPSILON)
            .map(|t| t.rate)
    }

    pub fn downside_tail_at(&self, threshold: f64) -> Option<f64> {
        self.downside_tail_rates
            .iter()
            .find(|t| (t.threshold - threshold).abs() < f64::EPSILON)
            .map(|t| t.rate)
    }
}

/// Ratio of short-horizon to long-horizon dispersion. Below 1.0 the team
/// has recently stabilized; above 1.0 it is destabilizing. None when
/// either stddev is undefined or the long-horizon dispersion is ~zero.
pub fn variance_contraction(short_stddev: Option<f64>, long_stddev: Option<f64>) -> Option<f64> {
    let short = short_stddev?;
    let long = long_stddev?;
    if long < 1e-9 {
        return None;
    }
    Some(short / long)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn metrics(covers: &[f64]) -> Vec<DerivedMetrics> {
        covers
            .iter()
            .map(|&c| DerivedMetrics {
                score_margin: c,
                cover_margin: Some(c),
                total_margin: None,
            })
            .collect()
    }

    #[test]
    fn teaser_survival_worked_example() {
        // [-9, -3, 2, 5, -1] at +6: only -9 fails (-9 + 6 = -3), 4 of 5.
        let window = metrics(&[-9.0, -3.0, 2.0, 5.0, -1.0]);
        let tail = TailRiskMetrics::from_window(&window, &FeatureConfig::default());
        assert_relative_eq!(tail.teaser_survival_at(6.0).unwrap(), 0.8);
    }

    #[test]
    fn teaser_push_does_not_survive() {
        // cover_margin + points == 0 is a push, not a survival.
        let window = metrics(&[-6.0]);
        let tail = TailRiskMetrics::from_window(&window, &FeatureConfig::default());
        assert_relative_eq!(tail.teaser_survival_at(6.0).unwrap(), 0.0);
    }

    #[test]
    fn downside_tails_are_strictly_below_threshold() {
        let window = metrics(&[-8.0, -9.0, -20.0, 3.0]);
        let tail = TailRiskMetrics::from_window(&window, &FeatureConfig::default());
        // -9 and -20 are below -8; -8 itself is not.
        assert_relative_eq!(tail.downside_tail_at(-8.0).unwrap(), 0.5);
        assert_relative_eq!(tail.downside_tail_at(-15.0).unwrap(), 0.25);
    }

    #[test]
    fn blowout_rate_includes_threshold() {
        let window = metrics(&[-15.0, -2.0, 1.0, 4.0]);
        let tail = TailRiskMetrics::from_window(&window, &FeatureConfig::default());
        assert_relative_eq!(tail.blowout_rate.unwrap(), 0.25);
        assert_eq!(RiskTier::from_blowout_rate(tail.blowout_rate), RiskTier::High);
    }

    #[test]
    fn unlined_games_are_excluded_from_denominator() {
        let mut window = metrics(&[-9.0, 2.0]);
        window.push(DerivedMetrics {
            score_margin: 30.0,
            cover_margin: None,
            total_margin: None,
        });
        let tail = TailRiskMetrics::from_window(&window, &FeatureConfig::default());
        assert_eq!(tail.lined_games, 2);
        assert_relative_eq!(tail.teaser_survival_at(6.0).unwrap(), 0.5);
    }

    #[test]
    fn empty_lined_history_yields_none_not_zero() {
        let tail = TailRiskMetrics::from_window(&[], &FeatureConfig::default());
        assert_eq!(tail.lined_games, 0);
        assert!(tail.blowout_rate.is_none());
        assert!(tail.teaser_survival.is_empty());
        assert_eq!(RiskTier::from_blowout_rate(tail.blowout_rate), RiskTier::High);
    }

    #[test]
    fn risk_tier_thresholds() {
        assert_eq!(RiskTier::from_blowout_rate(Some(0.10)), RiskTier::Low);
        assert_eq!(RiskTier::from_blowout_rate(Some(0.20)), RiskTier::Medium);
        assert_eq!(RiskTier::from_blowout_rate(Some(0.30)), RiskTier::High);
    }

    #[test]
    fn contraction_ratio() {
        assert_relative_eq!(
            variance_contraction(Some(4.0), Some(8.0)).unwrap(),
            0.5
        );
        assert!(variance_contraction(None, Some(8.0)).is_none());
        assert!(variance_contraction(Some(4.0), Some(0.0)).is_none());
    }
}
