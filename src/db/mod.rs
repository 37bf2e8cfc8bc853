use anyhow::Result;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

pub mod models;
use models::*;

/// Thread-safe SQLite handle (single connection with mutex).
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// In-memory database, used by the test suite.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    // ── Game observations (input contract) ───────────────────────────────────

    /// Upsert one observation, keyed (game_id, team_id). Completed games are
    /// immutable upstream; the upsert exists so line corrections before
    /// tip-off and final scores can land on the same row.
    pub fn upsert_observation(&self, obs: &GameObservation) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO game_observations (
                game_id, team_id, opponent_id, game_date, season,
                is_home, is_neutral_site, is_conference_game,
                closing_line_for_team, closing_total,
                opening_line_for_team, opening_total,
                team_points, opponent_points
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)
             ON CONFLICT(game_id, team_id) DO UPDATE SET
                closing_line_for_team=excluded.closing_line_for_team,
                closing_total=excluded.closing_total,
                opening_line_for_team=excluded.opening_line_for_team,
                opening_total=excluded.opening_total,
                team_points=excluded.team_points,
                opponent_points=excluded.opponent_points",
            params![
                obs.game_id,
                obs.team_id,
                obs.opponent_id,
                obs.game_date,
                obs.season,
                obs.is_home,
                obs.is_neutral_site,
                obs.is_conference_game,
                obs.closing_line_for_team,
                obs.closing_total,
                obs.opening_line_for_team,
                obs.opening_total,
                obs.team_points,
                obs.opponent_points,
            ],
        )?;
        Ok(())
    }

    pub fn insert_observations(&self, observations: &[GameObservation]) -> Result<()> {
        for obs in observations {
            self.upsert_observation(obs)?;
        }
        Ok(())
    }

    /// Load every observation in deterministic order.
    pub fn load_observations(&self) -> Result<Vec<GameObservation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT game_id, team_id, opponent_id, game_date, season,
                    is_home, is_neutral_site, is_conference_game,
                    closing_line_for_team, closing_total,
                    opening_line_for_team, opening_total,
                    team_points, opponent_points
             FROM game_observations
             ORDER BY game_date, game_id, team_id",
        )?;
        let observations = stmt
            .query_map([], map_observation)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(observations)
    }

    pub fn count_observations(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let n = conn.query_row("SELECT COUNT(*) FROM game_observations", [], |r| r.get(0))?;
        Ok(n)
    }

    // ── Matchup feature rows (derived, replaced wholesale) ───────────────────

    /// Replace all stored matchup rows with this run's output. Derived rows
    /// are never patched in place: a rerun owns the whole table.
    pub fn replace_matchup_rows(
        &self,
        rows: &[crate::engine::matchup::MatchupFeatureRow],
    ) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM matchup_feature_rows", [])?;
        for row in rows {
            tx.execute(
                "INSERT INTO matchup_feature_rows (
                    game_id, team_id, opponent_id, game_date, season, is_home,
                    closing_line_for_team, closing_total,
                    team_features, opponent_features,
                    data_quality_tier, low_confidence, excluded_from_training,
                    is_inference, labels
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
                params![
                    row.game_id,
                    row.team_id,
                    row.opponent_id,
                    row.game_date,
                    row.season,
                    row.is_home,
                    row.closing_line_for_team,
                    row.closing_total,
                    serde_json::to_string(&row.team)?,
                    serde_json::to_string(&row.opponent)?,
                    row.data_quality_tier.as_str(),
                    row.low_confidence,
                    row.excluded_from_training,
                    row.is_inference,
                    row.labels
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn count_matchup_rows(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let n = conn.query_row("SELECT COUNT(*) FROM matchup_feature_rows", [], |r| r.get(0))?;
        Ok(n)
    }

    // ── Prediction records ───────────────────────────────────────────────────

    pub fn replace_predictions(&self, records: &[PredictionRecord]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM prediction_records", [])?;
        for rec in records {
            tx.execute(
                "INSERT INTO prediction_records (
                    game_id, team_id, model_version, point_estimate,
                    estimated_std, threshold_probabilities, confidence,
                    calibrated, low_confidence, scored_at
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
                params![
                    rec.game_id,
                    rec.team_id,
                    rec.model_version,
                    rec.point_estimate,
                    rec.estimated_std,
                    serde_json::to_string(&rec.threshold_probabilities)?,
                    rec.confidence.as_str(),
                    rec.calibrated,
                    rec.low_confidence,
                    rec.scored_at,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn list_predictions(&self, limit: i64) -> Result<Vec<PredictionRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT game_id, team_id, model_version, point_estimate,
                    estimated_std, threshold_probabilities, confidence,
                    calibrated, low_confidence, scored_at
             FROM prediction_records
             ORDER BY game_id, team_id LIMIT ?1",
        )?;
        let records = stmt
            .query_map(params![limit], map_prediction)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    // ── Run manifests ────────────────────────────────────────────────────────

    /// Manifests append; they are the audit trail, not derived state.
    pub fn insert_manifest(&self, manifest: &RunManifest) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO run_manifests (
                model_version, started_at, finished_at,
                observations_loaded, timelines_built, entity_failures,
                rows_composed, rows_training, rows_excluded_from_training,
                rows_missing_market_line, predictions_scored, calibrated
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
            params![
                manifest.model_version,
                manifest.started_at,
                manifest.finished_at,
                manifest.observations_loaded as i64,
                manifest.timelines_built as i64,
                serde_json::to_string(&manifest.entity_failures)?,
                manifest.rows_composed as i64,
                manifest.rows_training as i64,
                manifest.rows_excluded_from_training as i64,
                manifest.rows_missing_market_line as i64,
                manifest.predictions_scored as i64,
                manifest.calibrated,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn latest_manifest(&self) -> Result<Option<RunManifest>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT model_version, started_at, finished_at,
                    observations_loaded, timelines_built, entity_failures,
                    rows_composed, rows_training, rows_excluded_from_training,
                    rows_missing_market_line, predictions_scored, calibrated
             FROM run_manifests ORDER BY id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map([], map_manifest)?;
        match rows.next() {
            Some(m) => Ok(Some(m?)),
            None => Ok(None),
        }
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

fn map_observation(row: &rusqlite::Row) -> rusqlite::Result<GameObservation> {
    Ok(GameObservation {
        game_id: row.get(0)?,
        team_id: row.get(1)?,
        opponent_id: row.get(2)?,
        game_date: row.get(3)?,
        season: row.get(4)?,
        is_home: row.get(5)?,
        is_neutral_site: row.get(6)?,
        is_conference_game: row.get(7)?,
        closing_line_for_team: row.get(8)?,
        closing_total: row.get(9)?,
        opening_line_for_team: row.get(10)?,
        opening_total: row.get(11)?,
        team_points: row.get(12)?,
        opponent_points: row.get(13)?,
    })
}

fn map_prediction(row: &rusqlite::Row) -> rusqlite::Result<PredictionRecord> {
    let thresholds_json: String = row.get(5)?;
    let confidence_str: String = row.get(6)?;
    Ok(PredictionRecord {
        game_id: row.get(0)?,
        team_id: row.get(1)?,
        model_version: row.get(2)?,
        point_estimate: row.get(3)?,
        estimated_std: row.get(4)?,
        threshold_probabilities: json_column(5, &thresholds_json)?,
        confidence: match confidence_str.as_str() {
            "high" => Confidence::High,
            "medium" => Confidence::Medium,
            _ => Confidence::Low,
        },
        calibrated: row.get(7)?,
        low_confidence: row.get(8)?,
        scored_at: row.get(9)?,
    })
}

fn map_manifest(row: &rusqlite::Row) -> rusqlite::Result<RunManifest> {
    let failures_json: String = row.get(5)?;
    Ok(RunManifest {
        model_version: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        observations_loaded: row.get::<_, i64>(3)? as usize,
        timelines_built: row.get::<_, i64>(4)? as usize,
        entity_failures: json_column(5, &failures_json)?,
        rows_composed: row.get::<_, i64>(6)? as usize,
        rows_training: row.get::<_, i64>(7)? as usize,
        rows_excluded_from_training: row.get::<_, i64>(8)? as usize,
        rows_missing_market_line: row.get::<_, i64>(9)? as usize,
        predictions_scored: row.get::<_, i64>(10)? as usize,
        calibrated: row.get(11)?,
    })
}

fn json_column<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS game_observations (
    game_id               INTEGER NOT NULL,
    team_id               INTEGER NOT NULL,
    opponent_id           INTEGER NOT NULL,
    game_date             TEXT    NOT NULL,
    season                INTEGER NOT NULL,
    is_home               INTEGER NOT NULL,
    is_neutral_site       INTEGER NOT NULL DEFAULT 0,
    is_conference_game    INTEGER NOT NULL DEFAULT 0,
    closing_line_for_team REAL,
    closing_total         REAL,
    opening_line_for_team REAL,
    opening_total         REAL,
    team_points           INTEGER,
    opponent_points       INTEGER,
    PRIMARY KEY (game_id, team_id)
);

CREATE TABLE IF NOT EXISTS matchup_feature_rows (
    game_id                 INTEGER NOT NULL,
    team_id                 INTEGER NOT NULL,
    opponent_id             INTEGER NOT NULL,
    game_date               TEXT    NOT NULL,
    season                  INTEGER NOT NULL,
    is_home                 INTEGER NOT NULL,
    closing_line_for_team   REAL,
    closing_total           REAL,
    team_features           TEXT    NOT NULL,
    opponent_features       TEXT    NOT NULL,
    data_quality_tier       TEXT    NOT NULL,
    low_confidence          INTEGER NOT NULL,
    excluded_from_training  INTEGER NOT NULL,
    is_inference            INTEGER NOT NULL,
    labels                  TEXT,
    PRIMARY KEY (game_id, team_id)
);

CREATE TABLE IF NOT EXISTS prediction_records (
    game_id                 INTEGER NOT NULL,
    team_id                 INTEGER NOT NULL,
    model_version           TEXT    NOT NULL,
    point_estimate          REAL    NOT NULL,
    estimated_std           REAL,
    threshold_probabilities TEXT    NOT NULL,
    confidence              TEXT    NOT NULL,
    calibrated              INTEGER NOT NULL,
    low_confidence          INTEGER NOT NULL,
    scored_at               TEXT    NOT NULL,
    PRIMARY KEY (game_id, team_id, model_version)
);

CREATE TABLE IF NOT EXISTS run_manifests (
    id                          INTEGER PRIMARY KEY AUTOINCREMENT,
    model_version               TEXT    NOT NULL,
    started_at                  TEXT    NOT NULL,
    finished_at                 TEXT,
    observations_loaded         INTEGER NOT NULL,
    timelines_built             INTEGER NOT NULL,
    entity_failures             TEXT    NOT NULL,
    rows_composed               INTEGER NOT NULL,
    rows_training               INTEGER NOT NULL,
    rows_excluded_from_training INTEGER NOT NULL,
    rows_missing_market_line    INTEGER NOT NULL,
    predictions_scored          INTEGER NOT NULL,
    calibrated                  INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_observations_date ON game_observations(game_date);
CREATE INDEX IF NOT EXISTS idx_observations_team ON game_observations(team_id, season);
CREATE INDEX IF NOT EXISTS idx_matchup_rows_date ON matchup_feature_rows(game_date);
CREATE INDEX IF NOT EXISTS idx_predictions_game ON prediction_records(game_id);
"#;
