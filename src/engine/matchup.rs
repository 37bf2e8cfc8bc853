//! Matchup composition: join both teams' as-of-this-game rolling features
//! into one row per (game, team).
//!
//! This is a two-phase computation by construction — build a keyed map of
//! every entity's feature sets first, then resolve each row's opponent by
//! `(game_id, opponent_id)` lookup — so there is no hidden ordering
//! dependency between entities.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::db::models::GameObservation;
use crate::engine::labels::{labels_for, GameLabels};
use crate::engine::rolling::{DataQualityTier, RollingFeatureSet};
use crate::engine::FeatureConfig;

/// One composed row: the team's own rolling features, the opponent's
/// rolling features for the same game, and (for historical rows only) the
/// current game's outcome labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchupFeatureRow {
    pub game_id: i64,
    pub team_id: i64,
    pub opponent_id: i64,
    pub game_date: NaiveDate,
    pub season: i32,
    pub is_home: bool,
    pub closing_line_for_team: Option<f64>,
    pub closing_total: Option<f64>,
    pub team: RollingFeatureSet,
    pub opponent: RollingFeatureSet,
    /// The weaker of the two sides' tiers.
    pub data_quality_tier: DataQualityTier,
    /// Either side's window below minimum_history. Inference rows are
    /// still produced with this set — never silently dropped.
    pub low_confidence: bool,
    /// Fail-closed gate: low-confidence historical rows never train.
    pub excluded_from_training: bool,
    /// True for games that have not been played (no labels, ever).
    pub is_inference: bool,
    pub labels: Option<GameLabels>,
}

impl MatchupFeatureRow {
    /// team_value − opponent_value for any per-side statistic.
    pub fn delta<F>(&self, f: F) -> Option<f64>
    where
        F: Fn(&RollingFeatureSet) -> Option<f64>,
    {
        Some(f(&self.team)? - f(&self.opponent)?)
    }

    /// A row trains only when it is historical, not gated out, and its
    /// target label exists.
    pub fn is_trainable(&self) -> bool {
        !self.is_inference && !self.excluded_from_training && self.labels.is_some()
    }
}

/// Keyed lookup of phase-1 output: `(game_id, team_id) → RollingFeatureSet`.
#[derive(Debug, Default)]
pub struct FeatureIndex {
    by_key: HashMap<(i64, i64), RollingFeatureSet>,
}

impl FeatureIndex {
    pub fn insert(&mut self, set: RollingFeatureSet) {
        self.by_key.insert((set.game_id, set.team_id), set);
    }

    pub fn get(&self, game_id: i64, team_id: i64) -> Option<&RollingFeatureSet> {
        self.by_key.get(&(game_id, team_id))
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// Result of composing one batch of observations.
#[derive(Debug)]
pub struct ComposeOutcome {
    pub rows: Vec<MatchupFeatureRow>,
    /// (game_id, team_id) pairs whose own or opponent feature set was
    /// absent from the index; reported in the manifest, never silent.
    pub unresolved: Vec<(i64, i64)>,
}

/// Compose matchup rows for every observation whose both sides exist in
/// the index. Output ordering is deterministic: (game_date, game_id,
/// team_id).
pub fn compose_rows(
    observations: &[GameObservation],
    index: &FeatureIndex,
    cfg: &FeatureConfig,
) -> ComposeOutcome {
    let mut rows = Vec::new();
    let mut unresolved = Vec::new();

    for obs in observations {
        let (team_set, opp_set) = match (
            index.get(obs.game_id, obs.team_id),
            index.get(obs.game_id, obs.opponent_id),
        ) {
            (Some(t), Some(o)) => (t, o),
            _ => {
                unresolved.push((obs.game_id, obs.team_id));
                continue;
            }
        };

        let low_confidence = team_set.games_in_window < cfg.minimum_history
            || opp_set.games_in_window < cfg.minimum_history;
        let is_inference = !obs.is_completed();

        rows.push(MatchupFeatureRow {
            game_id: obs.game_id,
            team_id: obs.team_id,
            opponent_id: obs.opponent_id,
            game_date: obs.game_date,
            season: obs.season,
            is_home: obs.is_home,
            closing_line_for_team: obs.closing_line_for_team,
            closing_total: obs.closing_total,
            team: team_set.clone(),
            opponent: opp_set.clone(),
            data_quality_tier: DataQualityTier::worse_of(
                team_set.data_quality_tier,
                opp_set.data_quality_tier,
            ),
            low_confidence,
            excluded_from_training: low_confidence,
            is_inference,
            labels: if is_inference {
                None
            } else {
                labels_for(obs, cfg)
            },
        });
    }

    rows.sort_by(|a, b| {
        (a.game_date, a.game_id, a.team_id).cmp(&(b.game_date, b.game_id, b.team_id))
    });

    ComposeOutcome { rows, unresolved }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::rolling::compute_entity_features;
    use approx::assert_relative_eq;

    /// Two teams that only play each other; margins from team 1's side.
    fn head_to_head(margins: &[i32]) -> Vec<GameObservation> {
        let mut observations = Vec::new();
        for (i, &m) in margins.iter().enumerate() {
            let base = GameObservation {
                game_id: i as i64 + 1,
                team_id: 1,
                opponent_id: 2,
                game_date: NaiveDate::from_ymd_opt(2025, 1, i as u32 + 1).unwrap(),
                season: 2025,
                is_home: true,
                is_neutral_site: false,
                is_conference_game: true,
                closing_line_for_team: Some(-2.0),
                closing_total: Some(140.0),
                opening_line_for_team: None,
                opening_total: None,
                team_points: Some(70 + m.max(0)),
                opponent_points: Some(70 - m.min(0)),
            };
            let mut flipped = base.clone();
            flipped.team_id = 2;
            flipped.opponent_id = 1;
            flipped.is_home = false;
            flipped.closing_line_for_team = Some(2.0);
            flipped.team_points = base.opponent_points;
            flipped.opponent_points = base.team_points;
            observations.push(base);
            observations.push(flipped);
        }
        observations
    }

    fn build_index(observations: &[GameObservation], cfg: &FeatureConfig) -> FeatureIndex {
        let mut index = FeatureIndex::default();
        for team_id in [1i64, 2] {
            let seq: Vec<GameObservation> = observations
                .iter()
                .filter(|o| o.team_id == team_id)
                .cloned()
                .collect();
            for set in compute_entity_features(team_id, 2025, &seq, cfg) {
                index.insert(set);
            }
        }
        index
    }

    #[test]
    fn opponent_features_come_from_same_game() {
        let cfg = FeatureConfig::default();
        let observations = head_to_head(&[6, -3, 9, 2, -5]);
        let index = build_index(&observations, &cfg);
        let out = compose_rows(&observations, &index, &cfg);

        assert!(out.unresolved.is_empty());
        let row = out
            .rows
            .iter()
            .find(|r| r.game_id == 5 && r.team_id == 1)
            .unwrap();
        assert_eq!(row.opponent.team_id, 2);
        assert_eq!(row.opponent.game_id, 5);
        // Mirror matchup: the opponent's cover margins are the exact
        // negation of ours, so the window means cancel.
        let own = row.team.horizon(10).unwrap().mean_cover_margin.unwrap();
        let theirs = row.opponent.horizon(10).unwrap().mean_cover_margin.unwrap();
        assert_relative_eq!(own + theirs, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn delta_is_team_minus_opponent() {
        let cfg = FeatureConfig::default();
        let observations = head_to_head(&[6, -3, 9, 2, -5]);
        let index = build_index(&observations, &cfg);
        let out = compose_rows(&observations, &index, &cfg);
        let row = out
            .rows
            .iter()
            .find(|r| r.game_id == 5 && r.team_id == 1)
            .unwrap();
        let delta = row
            .delta(|s| s.horizon(10).and_then(|h| h.mean_cover_margin))
            .unwrap();
        let own = row.team.horizon(10).unwrap().mean_cover_margin.unwrap();
        assert_relative_eq!(delta, 2.0 * own, epsilon = 1e-9);
    }

    #[test]
    fn short_history_gates_training_but_not_inference() {
        let cfg = FeatureConfig::default();
        let mut observations = head_to_head(&[4, -2]);
        // Game 3 is upcoming: features exist as-of-end, no labels.
        let mut upcoming = observations[0].clone();
        upcoming.game_id = 3;
        upcoming.game_date = NaiveDate::from_ymd_opt(2025, 1, 20).unwrap();
        upcoming.team_points = None;
        upcoming.opponent_points = None;
        let mut upcoming_flip = upcoming.clone();
        upcoming_flip.team_id = 2;
        upcoming_flip.opponent_id = 1;

        let mut index = build_index(&observations, &cfg);
        for (team_id, game) in [(1i64, &upcoming), (2i64, &upcoming_flip)] {
            let seq: Vec<GameObservation> = observations
                .iter()
                .filter(|o| o.team_id == team_id)
                .cloned()
                .collect();
            index.insert(crate::engine::rolling::compute_as_of_end(
                team_id, 2025, game.game_id, &seq, &cfg,
            ));
        }
        observations.push(upcoming);
        observations.push(upcoming_flip);

        let out = compose_rows(&observations, &index, &cfg);
        let inference_row = out
            .rows
            .iter()
            .find(|r| r.game_id == 3 && r.team_id == 1)
            .unwrap();
        // Two prior games < minimum_history of 3: produced, flagged, not
        // trainable.
        assert!(inference_row.is_inference);
        assert!(inference_row.low_confidence);
        assert!(!inference_row.is_trainable());
        assert!(inference_row.labels.is_none());
        assert_eq!(inference_row.data_quality_tier, DataQualityTier::Insufficient);
    }

    #[test]
    fn missing_opponent_side_is_reported_not_silent() {
        let cfg = FeatureConfig::default();
        let observations = head_to_head(&[4, -2, 1]);
        // Index built only for team 1; team 2 lookups fail.
        let mut index = FeatureIndex::default();
        let seq: Vec<GameObservation> = observations
            .iter()
            .filter(|o| o.team_id == 1)
            .cloned()
            .collect();
        for set in compute_entity_features(1, 2025, &seq, &cfg) {
            index.insert(set);
        }

        let out = compose_rows(&observations, &index, &cfg);
        assert!(out.rows.is_empty());
        assert_eq!(out.unresolved.len(), observations.len());
    }

    #[test]
    fn rows_are_deterministically_ordered() {
        let cfg = FeatureConfig::default();
        let observations = head_to_head(&[6, -3, 9]);
        let index = build_index(&observations, &cfg);
        let out = compose_rows(&observations, &index, &cfg);
        let keys: Vec<(i64, i64)> = out.rows.iter().map(|r| (r.game_id, r.team_id)).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }
}
