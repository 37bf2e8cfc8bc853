use thiserror::Error;

/// Engine error taxonomy.
///
/// Per-row and per-entity errors (`UnknownEntity`, `InsufficientHistory`,
/// `MissingMarketLine`) are isolated: the row or team is skipped and the
/// failure is recorded in the run manifest. `TemporalLeakage` is a structural
/// invariant violation and always aborts the whole run, because it means the
/// numbers produced elsewhere in the same run cannot be trusted.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No timeline exists for the referenced team (or team-season).
    #[error("unknown entity: team {team_id} season {season}")]
    UnknownEntity { team_id: i64, season: i32 },

    /// A rolling window has fewer prior games than the caller requires.
    /// Callers normally degrade to a lower data-quality tier instead of
    /// surfacing this; it is an error only when a consumer demands a
    /// minimum history and refuses to degrade.
    #[error("insufficient history for team {team_id}: {available} prior games, {required} required")]
    InsufficientHistory {
        team_id: i64,
        available: usize,
        required: usize,
    },

    /// Game has no closing line, so ATS/teaser features and labels cannot
    /// be derived. Straight-up features are still available.
    #[error("no closing line recorded for game {game_id}")]
    MissingMarketLine { game_id: i64 },

    /// A train/evaluation partition violates chronological ordering.
    #[error("temporal leakage: {0}")]
    TemporalLeakage(String),

    /// The held-out residual distribution is degenerate; a probability
    /// emitted from it would be spuriously certain.
    #[error("insufficient calibration data: {residuals} residuals, estimated std {estimated_std:.6}")]
    InsufficientCalibrationData {
        residuals: usize,
        estimated_std: f64,
    },
}
