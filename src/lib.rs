//! Leakage-safe rolling-feature and probability engine for spread/teaser
//! betting datasets.
//!
//! Every feature attached to a game is a pure function of games strictly
//! earlier in that team's season timeline; the model/calibration stages
//! are fit and evaluated on strictly chronological partitions. The binary
//! drives the whole thing as a batch job over a SQLite database.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod synthetic;
pub mod timeline;

pub use error::EngineError;
