use clap::{Parser, Subcommand};

use crate::model::PredictionTarget;

/// Leakage-safe rolling-feature and probability engine for spread/teaser
/// betting datasets
#[derive(Parser, Debug, Clone)]
#[command(name = "spread-engine", version, about)]
pub struct Config {
    /// SQLite database path
    #[arg(long, env = "DATABASE_PATH", default_value = "spread_engine.db")]
    pub database_path: String,

    /// Model version tag stamped on every prediction and manifest
    #[arg(long, env = "MODEL_VERSION", default_value = "spread-engine-v1")]
    pub model_version: String,

    /// What the point-estimate model predicts
    #[arg(long, env = "PREDICTION_TARGET", value_enum, default_value = "cover-margin")]
    pub target: PredictionTarget,

    /// Rolling window horizons, comma-separated game counts
    #[arg(long, env = "HORIZONS", value_delimiter = ',', default_values_t = vec![3, 5, 10, 20])]
    pub horizons: Vec<usize>,

    /// Teaser leg sizes in points
    #[arg(long, env = "TEASER_POINTS", value_delimiter = ',', default_values_t = vec![6.0, 7.0, 8.0, 10.0])]
    pub teaser_points: Vec<f64>,

    /// Minimum prior games on both sides before a row may train
    #[arg(long, env = "MINIMUM_HISTORY", default_value = "3")]
    pub minimum_history: usize,

    /// Training fraction of the chronological split
    #[arg(long, env = "TRAIN_FRACTION", default_value = "0.6")]
    pub train_fraction: f64,

    /// Validation fraction of the chronological split
    #[arg(long, env = "VALIDATION_FRACTION", default_value = "0.2")]
    pub validation_fraction: f64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the full batch pipeline: features, labels, fit, calibrate, score
    Run,
    /// Seed the database with a deterministic synthetic season
    Seed {
        /// RNG seed; the same seed always produces the same season
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Number of teams in the synthetic league
        #[arg(long, default_value = "24")]
        teams: usize,
        /// Completed games per team
        #[arg(long, default_value = "28")]
        games_per_team: usize,
        /// Upcoming (unplayed) games to append for inference
        #[arg(long, default_value = "12")]
        upcoming: usize,
    },
    /// Print the latest predictions and run manifest
    Show {
        /// Maximum number of predictions to print
        #[arg(long, default_value = "20")]
        limit: i64,
    },
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.horizons.is_empty() {
            anyhow::bail!("at least one rolling horizon is required");
        }
        if self.horizons.iter().any(|&h| h == 0) {
            anyhow::bail!("rolling horizons must be positive");
        }
        if self.teaser_points.iter().any(|&t| t <= 0.0) {
            anyhow::bail!("teaser points must be positive");
        }
        if self.minimum_history == 0 {
            anyhow::bail!("minimum_history must be at least 1");
        }
        if !(0.0..1.0).contains(&self.train_fraction)
            || !(0.0..1.0).contains(&self.validation_fraction)
            || self.train_fraction + self.validation_fraction >= 1.0
        {
            anyhow::bail!(
                "train_fraction and validation_fraction must each be in (0, 1) and sum below 1.0"
            );
        }
        Ok(())
    }
}
