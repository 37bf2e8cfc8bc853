//! Feature engine: rolling windows, tail risk, matchup composition and
//! training labels. Everything here is a pure function of strictly-earlier
//! games in an entity's timeline (the labels module being the one
//! deliberate exception: labels read the *current* game and are attached
//! only to that game's training row).

pub mod labels;
pub mod matchup;
pub mod rolling;
pub mod variance;

pub use rolling::{DataQualityTier, HorizonAggregates, RollingFeatureSet};
pub use variance::RiskTier;

/// Knobs for the rolling-window computation. Defaults mirror the horizons
/// and thresholds the production dataset was built with.
#[derive(Debug, Clone)]
pub struct FeatureConfig {
    /// Window sizes, ascending. Each horizon is computed independently.
    pub horizons: Vec<usize>,
    /// Cover-margin thresholds for downside tail-exceedance rates
    /// (fraction of prior lined games with cover_margin below each).
    pub downside_tail_thresholds: Vec<f64>,
    /// Cover-margin threshold for the upside tail rate.
    pub upside_tail_threshold: f64,
    /// A prior game counts as a blowout when cover_margin fell at or
    /// below this.
    pub blowout_threshold: f64,
    /// Teaser point values for survival rates and labels.
    pub teaser_points: Vec<f64>,
    /// Short/long horizons for the variance-contraction ratio.
    pub contraction_short: usize,
    pub contraction_long: usize,
    /// Minimum prior games before a row qualifies for training.
    pub minimum_history: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        FeatureConfig {
            horizons: vec![3, 5, 10, 20],
            downside_tail_thresholds: vec![-8.0, -10.0, -12.0, -15.0],
            upside_tail_threshold: 15.0,
            blowout_threshold: -15.0,
            teaser_points: vec![6.0, 7.0, 8.0, 10.0],
            contraction_short: 3,
            contraction_long: 10,
            minimum_history: 3,
        }
    }
}

impl FeatureConfig {
    /// Largest configured horizon; data-quality tiers are judged on it.
    pub fn max_horizon(&self) -> usize {
        self.horizons.iter().copied().max().unwrap_or(0)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.horizons.is_empty() {
            anyhow::bail!("at least one horizon is required");
        }
        if self.horizons.windows(2).any(|w| w[0] >= w[1]) {
            anyhow::bail!("horizons must be strictly ascending");
        }
        if self.minimum_history == 0 {
            anyhow::bail!("minimum_history must be at least 1");
        }
        if self.contraction_short >= self.contraction_long {
            anyhow::bail!("contraction_short must be smaller than contraction_long");
        }
        Ok(())
    }
}
