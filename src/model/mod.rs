//! Point-estimate model, chronological splitting, calibration and
//! prediction scoring.

pub mod calibration;
pub mod linear;
pub mod scoring;
pub mod split;

use serde::{Deserialize, Serialize};

use crate::engine::matchup::MatchupFeatureRow;

/// What the point-estimate model predicts. Both targets flow through the
/// same calibration layer; they differ only in the label column and in
/// which threshold queries make sense at scoring time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PredictionTarget {
    /// Expected cover margin; threshold queries answer teaser survival
    /// (P(cover_margin + t > 0)) and straight cover probability.
    CoverMargin,
    /// Expected combined score; threshold queries answer P(total > X)
    /// around the closing total.
    GameTotal,
}

impl PredictionTarget {
    /// Training label for a row, when it has one.
    pub fn label(&self, row: &MatchupFeatureRow) -> Option<f64> {
        let labels = row.labels.as_ref()?;
        match self {
            PredictionTarget::CoverMargin => labels.cover_margin,
            PredictionTarget::GameTotal => Some(labels.game_total),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionTarget::CoverMargin => "cover_margin",
            PredictionTarget::GameTotal => "game_total",
        }
    }
}
