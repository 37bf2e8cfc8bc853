use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One team's view of one game: two of these exist per game, one per
/// perspective. Immutable once the game is final; corrections require a
/// full re-derived run, never an in-place edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameObservation {
    /// Stable game identifier shared by both perspectives
    pub game_id: i64,
    pub team_id: i64,
    pub opponent_id: i64,
    pub game_date: NaiveDate,
    /// Season label (e.g. 2025 for the Nov 2024 – Apr 2025 season)
    pub season: i32,
    pub is_home: bool,
    pub is_neutral_site: bool,
    pub is_conference_game: bool,
    /// Closing spread from this team's perspective (negative = favored)
    pub closing_line_for_team: Option<f64>,
    pub closing_total: Option<f64>,
    pub opening_line_for_team: Option<f64>,
    pub opening_total: Option<f64>,
    /// None until the game completes
    pub team_points: Option<i32>,
    pub opponent_points: Option<i32>,
}

impl GameObservation {
    /// A game is completed once both scores are recorded.
    pub fn is_completed(&self) -> bool {
        self.team_points.is_some() && self.opponent_points.is_some()
    }

    pub fn has_closing_line(&self) -> bool {
        self.closing_line_for_team.is_some()
    }

    /// Derive outcome metrics for a completed game. Returns `None` for
    /// games that have not finished; cover/total margins inside are `None`
    /// when the corresponding market line is missing.
    pub fn derived(&self) -> Option<DerivedMetrics> {
        let team = self.team_points? as f64;
        let opp = self.opponent_points? as f64;
        let score_margin = team - opp;
        Some(DerivedMetrics {
            score_margin,
            cover_margin: self.closing_line_for_team.map(|line| score_margin + line),
            total_margin: self.closing_total.map(|total| team + opp - total),
        })
    }
}

/// Pure functions of a single completed observation plus its paired line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    /// team_points - opponent_points
    pub score_margin: f64,
    /// score_margin + closing_line_for_team; positive = covered
    pub cover_margin: Option<f64>,
    /// (team + opponent points) - closing_total; positive = went over
    pub total_margin: Option<f64>,
}

/// A single threshold query answered by the calibration layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdProbability {
    /// Human-readable query, e.g. "cover" or "teaser_8" or "over_closing"
    pub label: String,
    /// Threshold X in P(actual > X)
    pub threshold: f64,
    pub probability: f64,
}

/// Confidence in a prediction, from |edge| relative to estimated_std.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

/// Inference-time output for one (game, team). Carries the uncertainty
/// estimate alongside every probability so downstream consumers can judge
/// how much to trust it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub game_id: i64,
    pub team_id: i64,
    pub model_version: String,
    pub point_estimate: f64,
    /// Robust residual scale from the validation partition. None when the
    /// run could not calibrate (record is then flagged `calibrated=false`).
    pub estimated_std: Option<f64>,
    pub threshold_probabilities: Vec<ThresholdProbability>,
    pub confidence: Confidence,
    /// False when calibration failed and only the raw point estimate is
    /// being surfaced.
    pub calibrated: bool,
    /// True when either team's rolling window was below minimum history.
    pub low_confidence: bool,
    pub scored_at: DateTime<Utc>,
}

/// One isolated per-entity failure from a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityFailure {
    pub team_id: i64,
    pub season: i32,
    pub error: String,
}

/// Error manifest for a batch run: partial success must be visible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub model_version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub observations_loaded: usize,
    pub timelines_built: usize,
    pub entity_failures: Vec<EntityFailure>,
    pub rows_composed: usize,
    pub rows_training: usize,
    pub rows_excluded_from_training: usize,
    pub rows_missing_market_line: usize,
    pub predictions_scored: usize,
    pub calibrated: bool,
}
