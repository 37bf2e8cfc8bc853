use anyhow::Result;
use clap::Parser;
use tracing::info;

use spread_engine::config::{Command, Config};
use spread_engine::db::Database;
use spread_engine::engine::FeatureConfig;
use spread_engine::model::split::SplitRatios;
use spread_engine::pipeline::{self, PipelineOptions};
use spread_engine::synthetic::{generate_season, SyntheticOptions};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    let db = Database::open(&config.database_path)?;
    info!("Database opened: {}", config.database_path);

    match config.command.clone() {
        Command::Run => {
            let opts = pipeline_options(&config)?;
            let manifest = pipeline::run(&db, &opts).await?;
            println!(
                "run complete: {} rows composed, {} trained, {} predictions ({}calibrated), {} entity failures",
                manifest.rows_composed,
                manifest.rows_training,
                manifest.predictions_scored,
                if manifest.calibrated { "" } else { "un" },
                manifest.entity_failures.len(),
            );
        }
        Command::Seed {
            seed,
            teams,
            games_per_team,
            upcoming,
        } => {
            let season = generate_season(&SyntheticOptions {
                seed,
                teams,
                games_per_team,
                upcoming,
                season: 2025,
            });
            db.insert_observations(&season)?;
            println!(
                "seeded {} observations ({} now in database)",
                season.len(),
                db.count_observations()?
            );
        }
        Command::Show { limit } => {
            match db.latest_manifest()? {
                Some(m) => println!(
                    "latest run {} started {}: {} predictions, calibrated={}",
                    m.model_version, m.started_at, m.predictions_scored, m.calibrated
                ),
                None => println!("no runs recorded yet"),
            }
            for rec in db.list_predictions(limit)? {
                let cover = rec
                    .threshold_probabilities
                    .first()
                    .map(|t| format!(" p({})={:.3}", t.label, t.probability))
                    .unwrap_or_default();
                println!(
                    "game {} team {}: estimate {:+.2}{} [{}{}]",
                    rec.game_id,
                    rec.team_id,
                    rec.point_estimate,
                    cover,
                    rec.confidence.as_str(),
                    if rec.low_confidence { ", low history" } else { "" },
                );
            }
        }
    }

    Ok(())
}

/// Map CLI flags onto engine options. Horizons arrive in any order on the
/// command line; the engine requires them strictly ascending.
fn pipeline_options(config: &Config) -> Result<PipelineOptions> {
    let mut horizons = config.horizons.clone();
    horizons.sort_unstable();
    horizons.dedup();

    let feature = FeatureConfig {
        horizons,
        teaser_points: config.teaser_points.clone(),
        minimum_history: config.minimum_history,
        ..FeatureConfig::default()
    };
    feature.validate()?;

    let ratios = SplitRatios {
        train: config.train_fraction,
        validation: config.validation_fraction,
    };
    ratios.validate()?;

    Ok(PipelineOptions {
        feature,
        ratios,
        target: config.target,
        model_version: config.model_version.clone(),
    })
}
