//! Batch orchestration: observations in, features, labels, fitted model,
//! calibrated predictions and a run manifest out.
//!
//! Phase 1 computes every entity's rolling features in parallel; entities
//! are independent by construction, so a failure in one is recorded in
//! the manifest and the rest proceed. Phase 2 (matchup composition
//! onwards) starts only after phase 1 fully completes. Temporal-leakage
//! errors are the exception to failure isolation: they abort the run
//! before anything is persisted.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::db::models::{EntityFailure, GameObservation, PredictionRecord, RunManifest};
use crate::db::Database;
use crate::engine::matchup::{compose_rows, FeatureIndex, MatchupFeatureRow};
use crate::engine::rolling::{compute_as_of_end, compute_entity_features, RollingFeatureSet};
use crate::engine::FeatureConfig;
use crate::error::EngineError;
use crate::model::calibration::Calibration;
use crate::model::linear::{feature_vector, FitOptions, LinearModel};
use crate::model::scoring::Scorer;
use crate::model::split::{chronological_split, validate_fit, SplitRatios};
use crate::model::PredictionTarget;
use crate::timeline::{EntityKey, TimelineStore};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub feature: FeatureConfig,
    pub ratios: SplitRatios,
    pub target: PredictionTarget,
    pub model_version: String,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions {
            feature: FeatureConfig::default(),
            ratios: SplitRatios::default(),
            target: PredictionTarget::CoverMargin,
            model_version: "spread-engine-v1".into(),
        }
    }
}

/// Everything one run produced, before persistence.
pub struct PipelineRun {
    pub rows: Vec<MatchupFeatureRow>,
    pub predictions: Vec<PredictionRecord>,
    pub manifest: RunManifest,
    pub model: Option<LinearModel>,
    pub calibration: Option<Calibration>,
}

/// Load observations from the database, execute the pipeline, persist the
/// outputs wholesale.
pub async fn run(db: &Database, opts: &PipelineOptions) -> Result<RunManifest> {
    let observations = db.load_observations()?;
    let mut run = execute(&observations, opts, Utc::now()).await?;

    db.replace_matchup_rows(&run.rows)?;
    db.replace_predictions(&run.predictions)?;
    run.manifest.finished_at = Some(Utc::now());
    db.insert_manifest(&run.manifest)?;

    info!(
        rows = run.manifest.rows_composed,
        training = run.manifest.rows_training,
        predictions = run.manifest.predictions_scored,
        calibrated = run.manifest.calibrated,
        "pipeline run persisted"
    );
    Ok(run.manifest)
}

/// Pure pipeline over an in-memory batch. `scored_at` is fixed by the
/// caller so reruns over identical input serialize identically.
pub async fn execute(
    observations: &[GameObservation],
    opts: &PipelineOptions,
    scored_at: DateTime<Utc>,
) -> Result<PipelineRun> {
    opts.feature.validate()?;
    opts.ratios.validate()?;
    let started_at = scored_at;

    let store = TimelineStore::from_observations(observations);
    info!(
        observations = observations.len(),
        timelines = store.len(),
        "timelines built"
    );

    let (index, entity_failures) = phase_one(&store, observations, &opts.feature).await;
    for f in &entity_failures {
        warn!(team_id = f.team_id, season = f.season, error = %f.error, "entity skipped");
    }

    // Barrier: composition only sees the completed index.
    let composed = compose_rows(observations, &index, &opts.feature);
    let rows = composed.rows;
    for &(game_id, team_id) in &composed.unresolved {
        warn!(game_id, team_id, "row skipped: missing feature set for one side");
    }

    let historical: Vec<&MatchupFeatureRow> = rows.iter().filter(|r| !r.is_inference).collect();
    let inference: Vec<&MatchupFeatureRow> = rows.iter().filter(|r| r.is_inference).collect();
    let rows_missing_market_line = historical
        .iter()
        .filter(|r| r.closing_line_for_team.is_none())
        .count();

    // Rows are already (game_date, game_id, team_id) sorted, which is what
    // the splitter requires.
    let dates: Vec<NaiveDate> = historical.iter().map(|r| r.game_date).collect();
    let split = chronological_split(&dates, opts.ratios)?;
    let (train, validation, test) = split.apply(&historical);
    validate_fit(
        &partition_dates(train),
        &partition_dates(validation),
    )?;
    validate_fit(&partition_dates(validation), &partition_dates(test))?;

    let (train_x, train_y) = training_matrix(train, opts.target);
    let rows_training = train_y.len();
    let rows_excluded = historical.iter().filter(|r| r.excluded_from_training).count();
    info!(
        train = train.len(),
        validation = validation.len(),
        test = test.len(),
        trainable = rows_training,
        "chronological split"
    );

    let model = LinearModel::fit(&train_x, &train_y, FitOptions::default());
    let (predictions, calibration) = match &model {
        Some(model) => {
            let calibration = calibrate(model, validation, opts.target);
            let scorer = Scorer {
                model,
                calibration: calibration.as_ref(),
                target: opts.target,
                model_version: opts.model_version.clone(),
                teaser_points: opts.feature.teaser_points.clone(),
                scored_at,
            };
            let mut predictions: Vec<PredictionRecord> = test
                .iter()
                .chain(inference.iter())
                .map(|r| scorer.score(r))
                .collect();
            predictions.sort_by(|a, b| (a.game_id, a.team_id).cmp(&(b.game_id, b.team_id)));
            (predictions, calibration)
        }
        None => {
            warn!(
                trainable = rows_training,
                "too few trainable rows to fit a model; run produces features only"
            );
            (Vec::new(), None)
        }
    };

    let manifest = RunManifest {
        model_version: opts.model_version.clone(),
        started_at,
        finished_at: None,
        observations_loaded: observations.len(),
        timelines_built: store.len(),
        entity_failures,
        rows_composed: rows.len(),
        rows_training,
        rows_excluded_from_training: rows_excluded,
        rows_missing_market_line,
        predictions_scored: predictions.len(),
        calibrated: calibration.is_some(),
    };

    Ok(PipelineRun {
        rows,
        predictions,
        manifest,
        model,
        calibration,
    })
}

/// Parallel per-entity feature computation. Results land in a keyed index
/// (order-independent); failures are isolated per entity.
async fn phase_one(
    store: &TimelineStore,
    observations: &[GameObservation],
    cfg: &FeatureConfig,
) -> (FeatureIndex, Vec<EntityFailure>) {
    let mut tasks: JoinSet<(EntityKey, Result<Vec<RollingFeatureSet>, EngineError>)> =
        JoinSet::new();

    for key in store.entity_keys() {
        let seq = match store.sequence(key) {
            Ok(seq) => seq.to_vec(),
            Err(e) => {
                tasks.spawn(async move { (key, Err(e)) });
                continue;
            }
        };
        let cfg = cfg.clone();
        tasks.spawn_blocking(move || {
            (key, entity_features(key, &seq, &cfg))
        });
    }

    let mut by_key: BTreeMap<EntityKey, Vec<RollingFeatureSet>> = BTreeMap::new();
    let mut failures = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((key, Ok(sets))) => {
                by_key.insert(key, sets);
            }
            Ok((key, Err(e))) => failures.push(EntityFailure {
                team_id: key.team_id,
                season: key.season,
                error: e.to_string(),
            }),
            Err(join_err) => {
                // A panicked worker is a bug, but it still must not take
                // the whole batch down.
                failures.push(EntityFailure {
                    team_id: -1,
                    season: 0,
                    error: format!("worker task failed: {join_err}"),
                });
            }
        }
    }
    failures.sort_by_key(|f| (f.team_id, f.season));

    let mut index = FeatureIndex::default();
    for sets in by_key.into_values() {
        for set in sets {
            index.insert(set);
        }
    }

    // As-of-end features for unplayed games; a team with no completed
    // history gets an empty-window set, not a dropped row.
    for obs in observations.iter().filter(|o| !o.is_completed()) {
        let key = EntityKey {
            team_id: obs.team_id,
            season: obs.season,
        };
        let seq = store.sequence(key).unwrap_or(&[]);
        index.insert(compute_as_of_end(
            obs.team_id,
            obs.season,
            obs.game_id,
            seq,
            cfg,
        ));
    }

    (index, failures)
}

/// Per-entity phase-1 unit of work. The ordering check catches store
/// corruption before it can turn into silent lookahead.
fn entity_features(
    key: EntityKey,
    seq: &[GameObservation],
    cfg: &FeatureConfig,
) -> Result<Vec<RollingFeatureSet>, EngineError> {
    if seq.windows(2).any(|w| w[0].game_date > w[1].game_date) {
        return Err(EngineError::TemporalLeakage(format!(
            "timeline for team {} season {} is out of order",
            key.team_id, key.season
        )));
    }
    Ok(compute_entity_features(key.team_id, key.season, seq, cfg))
}

fn partition_dates(rows: &[&MatchupFeatureRow]) -> Vec<NaiveDate> {
    rows.iter().map(|r| r.game_date).collect()
}

fn training_matrix(
    rows: &[&MatchupFeatureRow],
    target: PredictionTarget,
) -> (Vec<Vec<Option<f64>>>, Vec<f64>) {
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    for row in rows {
        if !row.is_trainable() {
            continue;
        }
        let Some(y) = target.label(row) else {
            continue;
        };
        xs.push(feature_vector(row));
        ys.push(y);
    }
    (xs, ys)
}

/// Residual calibration on the validation partition. Failure here is
/// survivable: predictions go out uncalibrated rather than not at all.
fn calibrate(
    model: &LinearModel,
    validation: &[&MatchupFeatureRow],
    target: PredictionTarget,
) -> Option<Calibration> {
    let residuals: Vec<f64> = validation
        .iter()
        .filter(|r| r.is_trainable())
        .filter_map(|r| {
            let y = target.label(r)?;
            Some(y - model.predict(&feature_vector(r)))
        })
        .collect();
    match Calibration::fit(&residuals) {
        Ok(cal) => {
            info!(
                residuals = cal.residual_count,
                estimated_std = cal.estimated_std,
                "calibration fitted"
            );
            Some(cal)
        }
        Err(e) => {
            warn!(error = %e, "calibration unavailable; scoring uncalibrated");
            None
        }
    }
}
