//! Ground-truth labels for completed games.
//!
//! Labels read the *current* game's outcome and are attached only to that
//! game's training row. They can never leak into a rolling window for a
//! later game because the window engine reads metrics from strictly
//! earlier games only.

use serde::{Deserialize, Serialize};

use crate::db::models::GameObservation;
use crate::engine::FeatureConfig;

/// Graded result against a (possibly shifted) spread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Win,
    Push,
    Loss,
}

impl Outcome {
    pub fn from_margin(margin: f64) -> Outcome {
        if margin > 0.0 {
            Outcome::Win
        } else if margin < 0.0 {
            Outcome::Loss
        } else {
            Outcome::Push
        }
    }
}

/// Graded result against the closing total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OuOutcome {
    Over,
    Push,
    Under,
}

impl OuOutcome {
    pub fn from_margin(margin: f64) -> OuOutcome {
        if margin > 0.0 {
            OuOutcome::Over
        } else if margin < 0.0 {
            OuOutcome::Under
        } else {
            OuOutcome::Push
        }
    }
}

/// Outcome at one teaser point value, graded on cover_margin + points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TeaserLabel {
    pub points: f64,
    pub outcome: Outcome,
    /// True when the teaser changed the graded class relative to the
    /// unshifted spread (the teaser points actually mattered).
    pub flipped: bool,
}

/// Training labels for one (game, team) row. ATS and teaser labels exist
/// only when the game carried a closing spread; the O/U label only when it
/// carried a closing total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameLabels {
    pub score_margin: f64,
    pub game_total: f64,
    pub cover_margin: Option<f64>,
    pub total_margin: Option<f64>,
    pub ats: Option<Outcome>,
    pub over_under: Option<OuOutcome>,
    pub teasers: Vec<TeaserLabel>,
}

impl GameLabels {
    pub fn teaser_at(&self, points: f64) -> Option<&TeaserLabel> {
        self.teasers
            .iter()
            .find(|t| (t.points - points).abs() < f64::EPSILON)
    }
}

/// Compute labels for a completed game; `None` for games still to be
/// played (inference rows carry no labels, ever).
pub fn labels_for(obs: &GameObservation, cfg: &FeatureConfig) -> Option<GameLabels> {
    let derived = obs.derived()?;
    let game_total = (obs.team_points? + obs.opponent_points?) as f64;

    let ats = derived.cover_margin.map(Outcome::from_margin);
    let teasers = match derived.cover_margin {
        Some(cover) => cfg
            .teaser_points
            .iter()
            .map(|&points| {
                let outcome = Outcome::from_margin(cover + points);
                TeaserLabel {
                    points,
                    outcome,
                    flipped: Some(outcome) != ats,
                }
            })
            .collect(),
        None => Vec::new(),
    };

    Some(GameLabels {
        score_margin: derived.score_margin,
        game_total,
        cover_margin: derived.cover_margin,
        total_margin: derived.total_margin,
        ats,
        over_under: derived.total_margin.map(OuOutcome::from_margin),
        teasers,
    })
}
