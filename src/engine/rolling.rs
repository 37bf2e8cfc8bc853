//! Rolling-window feature computation.
//!
//! For every (team, game, horizon) this module aggregates the `horizon`
//! games immediately *preceding* the game in that team's season timeline.
//! The current game never contributes to its own features: the record for
//! game N is a pure function of games strictly before N, which is the
//! central no-lookahead invariant of the engine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::db::models::{DerivedMetrics, GameObservation};
use crate::engine::variance::{variance_contraction, RiskTier, TailRiskMetrics};
use crate::engine::FeatureConfig;

/// Coarse confidence label from how many prior games the largest window
/// holds: full ≥ 20, moderate ≥ 10, minimal ≥ 5, insufficient otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataQualityTier {
    Insufficient,
    Minimal,
    Moderate,
    Full,
}

impl DataQualityTier {
    pub fn from_games_in_window(n: usize) -> DataQualityTier {
        match n {
            n if n >= 20 => DataQualityTier::Full,
            n if n >= 10 => DataQualityTier::Moderate,
            n if n >= 5 => DataQualityTier::Minimal,
            _ => DataQualityTier::Insufficient,
        }
    }

    /// The weaker of two tiers; a matchup is only as reliable as its
    /// thinner side.
    pub fn worse_of(a: DataQualityTier, b: DataQualityTier) -> DataQualityTier {
        a.min(b)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataQualityTier::Full => "full",
            DataQualityTier::Moderate => "moderate",
            DataQualityTier::Minimal => "minimal",
            DataQualityTier::Insufficient => "insufficient",
        }
    }
}

/// Aggregates over one horizon's window of prior games.
///
/// Count fields are split by what each statistic can legitimately see:
/// `games_in_window` counts all completed prior games, `lined_games` only
/// those carrying a closing spread, `totaled_games` those with a closing
/// total. A missing market line degrades ATS/teaser features, it does not
/// invalidate straight-up ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HorizonAggregates {
    pub horizon: usize,
    pub games_in_window: usize,
    pub lined_games: usize,
    pub totaled_games: usize,
    pub mean_score_margin: Option<f64>,
    pub stddev_score_margin: Option<f64>,
    pub mean_cover_margin: Option<f64>,
    pub stddev_cover_margin: Option<f64>,
    pub mean_total_margin: Option<f64>,
    pub stddev_total_margin: Option<f64>,
    /// Fraction of prior lined games covered (pushes count against).
    pub ats_cover_rate: Option<f64>,
    /// Fraction of prior totaled games that went over.
    pub over_rate: Option<f64>,
    pub worst_cover_margin: Option<f64>,
    pub best_cover_margin: Option<f64>,
    pub tail: TailRiskMetrics,
}

/// All rolling features for one (team, game): every configured horizon
/// plus the window-derived volatility summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingFeatureSet {
    pub team_id: i64,
    pub season: i32,
    pub game_id: i64,
    /// Prior games available to the largest horizon.
    pub games_in_window: usize,
    pub lined_games_in_window: usize,
    /// Consecutive covers entering this game (negative = consecutive
    /// non-covers, 0 = no lined history or most recent was a push).
    pub ats_streak: i64,
    /// stddev(cover, short horizon) / stddev(cover, long horizon).
    pub variance_contraction: Option<f64>,
    pub risk_tier: RiskTier,
    pub data_quality_tier: DataQualityTier,
    pub by_horizon: BTreeMap<usize, HorizonAggregates>,
}

impl RollingFeatureSet {
    pub fn horizon(&self, h: usize) -> Option<&HorizonAggregates> {
        self.by_horizon.get(&h)
    }

    /// Build the feature set from the prior-game metrics window (oldest
    /// first, at most `cfg.max_horizon()` entries, current game excluded).
    pub fn from_metrics(
        team_id: i64,
        season: i32,
        game_id: i64,
        prior: &[DerivedMetrics],
        cfg: &FeatureConfig,
    ) -> RollingFeatureSet {
        let mut by_horizon = BTreeMap::new();
        for &h in &cfg.horizons {
            let sub = last_n(prior, h);
            by_horizon.insert(h, aggregate_window(sub, h, cfg));
        }

        let short_std = stddev_cover(last_n(prior, cfg.contraction_short));
        let long_std = stddev_cover(last_n(prior, cfg.contraction_long));
        let long_window = last_n(prior, cfg.contraction_long);
        let long_tail = TailRiskMetrics::from_window(long_window, cfg);

        let max_agg = &by_horizon[&cfg.max_horizon()];
        let games_in_window = max_agg.games_in_window;
        let lined_games_in_window = max_agg.lined_games;

        RollingFeatureSet {
            team_id,
            season,
            game_id,
            games_in_window,
            lined_games_in_window,
            ats_streak: ats_streak(prior),
            variance_contraction: variance_contraction(short_std, long_std),
            risk_tier: RiskTier::from_blowout_rate(long_tail.blowout_rate),
            data_quality_tier: DataQualityTier::from_games_in_window(games_in_window),
            by_horizon,
        }
    }
}

/// Compute feature sets for every game in one entity's ordered sequence.
/// Position i reads only metrics from positions [0, i).
pub fn compute_entity_features(
    team_id: i64,
    season: i32,
    seq: &[GameObservation],
    cfg: &FeatureConfig,
) -> Vec<RollingFeatureSet> {
    let metrics: Vec<DerivedMetrics> = seq.iter().filter_map(|o| o.derived()).collect();
    let max_h = cfg.max_horizon();
    (0..metrics.len())
        .map(|i| {
            let start = i.saturating_sub(max_h);
            RollingFeatureSet::from_metrics(team_id, season, seq[i].game_id, &metrics[start..i], cfg)
        })
        .collect()
}

/// Feature set "as of now" for a game that has not been played: the
/// window ends at the entity's most recent completed game.
pub fn compute_as_of_end(
    team_id: i64,
    season: i32,
    game_id: i64,
    seq: &[GameObservation],
    cfg: &FeatureConfig,
) -> RollingFeatureSet {
    let metrics: Vec<DerivedMetrics> = seq.iter().filter_map(|o| o.derived()).collect();
    let start = metrics.len().saturating_sub(cfg.max_horizon());
    RollingFeatureSet::from_metrics(team_id, season, game_id, &metrics[start..], cfg)
}

fn aggregate_window(window: &[DerivedMetrics], horizon: usize, cfg: &FeatureConfig) -> HorizonAggregates {
    let score_margins: Vec<f64> = window.iter().map(|m| m.score_margin).collect();
    let covers: Vec<f64> = window.iter().filter_map(|m| m.cover_margin).collect();
    let totals: Vec<f64> = window.iter().filter_map(|m| m.total_margin).collect();

    let rate_positive = |xs: &[f64]| -> Option<f64> {
        if xs.is_empty() {
            None
        } else {
            Some(xs.iter().filter(|&&x| x > 0.0).count() as f64 / xs.len() as f64)
        }
    };

    HorizonAggregates {
        horizon,
        games_in_window: window.len(),
        lined_games: covers.len(),
        totaled_games: totals.len(),
        mean_score_margin: mean(&score_margins),
        stddev_score_margin: sample_stddev(&score_margins),
        mean_cover_margin: mean(&covers),
        stddev_cover_margin: sample_stddev(&covers),
        mean_total_margin: mean(&totals),
        stddev_total_margin: sample_stddev(&totals),
        ats_cover_rate: rate_positive(&covers),
        over_rate: rate_positive(&totals),
        worst_cover_margin: covers.iter().copied().fold(None, |acc: Option<f64>, c| {
            Some(acc.map_or(c, |a| a.min(c)))
        }),
        best_cover_margin: covers.iter().copied().fold(None, |acc: Option<f64>, c| {
            Some(acc.map_or(c, |a| a.max(c)))
        }),
        tail: TailRiskMetrics::from_window(window, cfg),
    }
}

/// Signed ATS streak entering the current game, over lined prior games
/// only. A push terminates the streak.
fn ats_streak(prior: &[DerivedMetrics]) -> i64 {
    let mut streak = 0i64;
    let mut direction = 0i64;
    for cover in prior.iter().rev().filter_map(|m| m.cover_margin) {
        let sign = if cover > 0.0 {
            1
        } else if cover < 0.0 {
            -1
        } else {
            0
        };
        if sign == 0 {
            break;
        }
        if direction == 0 {
            direction = sign;
        }
        if sign != direction {
            break;
        }
        streak += sign;
    }
    streak
}

fn last_n(xs: &[DerivedMetrics], n: usize) -> &[DerivedMetrics] {
    &xs[xs.len().saturating_sub(n)..]
}

fn stddev_cover(window: &[DerivedMetrics]) -> Option<f64> {
    let covers: Vec<f64> = window.iter().filter_map(|m| m.cover_margin).collect();
    sample_stddev(&covers)
}

fn mean(xs: &[f64]) -> Option<f64> {
    if xs.is_empty() {
        None
    } else {
        Some(xs.iter().sum::<f64>() / xs.len() as f64)
    }
}

/// Sample standard deviation (n−1). Undefined below 2 samples: returns
/// None so downstream calibration never mistakes "no variance data" for
/// "zero variance".
fn sample_stddev(xs: &[f64]) -> Option<f64> {
    if xs.len() < 2 {
        return None;
    }
    let m = xs.iter().sum::<f64>() / xs.len() as f64;
    let var = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
    Some(var.sqrt())
}
