//! Per-entity game timelines.
//!
//! Every downstream feature is a function of an ordered, per-(team, season)
//! sequence of completed games. History resets at season boundaries: a
//! team's first game of a new season has an empty window.

use std::collections::HashMap;

use crate::db::models::GameObservation;
use crate::error::EngineError;

/// Key for one entity's timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub team_id: i64,
    pub season: i32,
}

/// Ordered, append-only store of completed observations per (team, season).
///
/// Ordering is `(game_date, game_id)` ascending; the game_id tie-break keeps
/// doubleheaders stable. Incomplete games are rejected at construction —
/// they are inference targets, never history.
#[derive(Debug, Default)]
pub struct TimelineStore {
    timelines: HashMap<EntityKey, Vec<GameObservation>>,
}

impl TimelineStore {
    /// Build timelines from a feed of observations. Incomplete games are
    /// skipped (they must not contribute to anyone's history); completed
    /// games are partitioned by (team, season) and sorted.
    pub fn from_observations(observations: &[GameObservation]) -> Self {
        let mut timelines: HashMap<EntityKey, Vec<GameObservation>> = HashMap::new();
        for obs in observations {
            if !obs.is_completed() {
                continue;
            }
            let key = EntityKey {
                team_id: obs.team_id,
                season: obs.season,
            };
            timelines.entry(key).or_default().push(obs.clone());
        }
        for seq in timelines.values_mut() {
            seq.sort_by(|a, b| (a.game_date, a.game_id).cmp(&(b.game_date, b.game_id)));
        }
        TimelineStore { timelines }
    }

    pub fn len(&self) -> usize {
        self.timelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timelines.is_empty()
    }

    /// Sorted entity keys, for deterministic iteration order.
    pub fn entity_keys(&self) -> Vec<EntityKey> {
        let mut keys: Vec<EntityKey> = self.timelines.keys().copied().collect();
        keys.sort();
        keys
    }

    /// Full ordered sequence for one entity.
    pub fn sequence(&self, key: EntityKey) -> Result<&[GameObservation], EngineError> {
        self.timelines
            .get(&key)
            .map(|v| v.as_slice())
            .ok_or(EngineError::UnknownEntity {
                team_id: key.team_id,
                season: key.season,
            })
    }

    /// Position of a game within the entity's ordered sequence.
    pub fn position_of(&self, key: EntityKey, game_id: i64) -> Result<usize, EngineError> {
        let seq = self.sequence(key)?;
        seq.iter()
            .position(|o| o.game_id == game_id)
            .ok_or(EngineError::UnknownEntity {
                team_id: key.team_id,
                season: key.season,
            })
    }

    /// The up-to-`n` observations immediately before `game_id` in this
    /// entity's timeline. A short history yields a short (possibly empty)
    /// window, not an error — callers treat short windows as
    /// lower-confidence, not invalid.
    pub fn prior(
        &self,
        key: EntityKey,
        game_id: i64,
        n: usize,
    ) -> Result<&[GameObservation], EngineError> {
        let idx = self.position_of(key, game_id)?;
        let seq = self.sequence(key)?;
        Ok(window_before(seq, idx, n))
    }

    /// Trailing window at the end of the timeline, for games that have not
    /// been played yet ("as of now" features).
    pub fn as_of_end(&self, key: EntityKey, n: usize) -> Result<&[GameObservation], EngineError> {
        let seq = self.sequence(key)?;
        Ok(window_before(seq, seq.len(), n))
    }
}

/// The slice `[idx - n, idx)` clamped at 0: everything strictly before
/// position `idx`, newest `n` entries.
pub fn window_before(seq: &[GameObservation], idx: usize, n: usize) -> &[GameObservation] {
    let start = idx.saturating_sub(n);
    &seq[start..idx]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn obs(game_id: i64, team_id: i64, day: u32) -> GameObservation {
        GameObservation {
            game_id,
            team_id,
            opponent_id: 99,
            game_date: NaiveDate::from_ymd_opt(2025, 1, day).unwrap(),
            season: 2025,
            is_home: true,
            is_neutral_site: false,
            is_conference_game: false,
            closing_line_for_team: Some(-3.0),
            closing_total: Some(140.0),
            opening_line_for_team: None,
            opening_total: None,
            team_points: Some(70),
            opponent_points: Some(65),
        }
    }

    fn key(team_id: i64) -> EntityKey {
        EntityKey {
            team_id,
            season: 2025,
        }
    }

    #[test]
    fn sequence_is_date_ordered_with_game_id_tiebreak() {
        // Doubleheader on day 5: game 52 before game 53 regardless of
        // insertion order.
        let observations = vec![obs(53, 1, 5), obs(50, 1, 2), obs(52, 1, 5), obs(40, 1, 1)];
        let store = TimelineStore::from_observations(&observations);
        let seq = store.sequence(key(1)).unwrap();
        let ids: Vec<i64> = seq.iter().map(|o| o.game_id).collect();
        assert_eq!(ids, vec![40, 50, 52, 53]);
    }

    #[test]
    fn prior_excludes_current_game() {
        let observations = vec![obs(1, 1, 1), obs(2, 1, 2), obs(3, 1, 3)];
        let store = TimelineStore::from_observations(&observations);
        let prior = store.prior(key(1), 3, 10).unwrap();
        let ids: Vec<i64> = prior.iter().map(|o| o.game_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn short_history_yields_short_window_not_error() {
        let observations = vec![obs(1, 1, 1), obs(2, 1, 2)];
        let store = TimelineStore::from_observations(&observations);
        assert_eq!(store.prior(key(1), 1, 5).unwrap().len(), 0);
        assert_eq!(store.prior(key(1), 2, 5).unwrap().len(), 1);
    }

    #[test]
    fn unknown_team_is_an_error() {
        let store = TimelineStore::from_observations(&[obs(1, 1, 1)]);
        assert!(matches!(
            store.sequence(key(42)),
            Err(EngineError::UnknownEntity { team_id: 42, .. })
        ));
    }

    #[test]
    fn incomplete_games_never_enter_history() {
        let mut upcoming = obs(9, 1, 9);
        upcoming.team_points = None;
        upcoming.opponent_points = None;
        let store = TimelineStore::from_observations(&[obs(1, 1, 1), upcoming]);
        assert_eq!(store.sequence(key(1)).unwrap().len(), 1);
    }

    #[test]
    fn season_boundary_resets_history() {
        let mut prev_season = obs(1, 1, 1);
        prev_season.season = 2024;
        let store = TimelineStore::from_observations(&[prev_season, obs(2, 1, 2)]);
        // 2025 timeline has one game; its prior window is empty.
        assert_eq!(store.prior(key(1), 2, 10).unwrap().len(), 0);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn as_of_end_returns_trailing_window() {
        let observations = vec![obs(1, 1, 1), obs(2, 1, 2), obs(3, 1, 3)];
        let store = TimelineStore::from_observations(&observations);
        let tail = store.as_of_end(key(1), 2).unwrap();
        let ids: Vec<i64> = tail.iter().map(|o| o.game_id).collect();
        assert_eq!(ids, vec![2, 3]);
    }
}
