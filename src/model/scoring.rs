//! Prediction scoring: point estimate → `PredictionRecord`.
//!
//! The scorer never drops a row. When calibration is unavailable the
//! record still goes out with the raw point estimate, `calibrated =
//! false`, no threshold probabilities and low confidence, so downstream
//! consumers see exactly what the run could and could not support.

use chrono::{DateTime, Utc};

use crate::db::models::{Confidence, PredictionRecord, ThresholdProbability};
use crate::engine::matchup::MatchupFeatureRow;
use crate::model::calibration::Calibration;
use crate::model::linear::{feature_vector, LinearModel};
use crate::model::PredictionTarget;

/// Scores composed rows with one fitted model and (when available) one
/// calibration. `scored_at` is fixed per run so reruns over identical
/// input serialize identically.
pub struct Scorer<'a> {
    pub model: &'a LinearModel,
    pub calibration: Option<&'a Calibration>,
    pub target: PredictionTarget,
    pub model_version: String,
    pub teaser_points: Vec<f64>,
    pub scored_at: DateTime<Utc>,
}

impl<'a> Scorer<'a> {
    pub fn score(&self, row: &MatchupFeatureRow) -> PredictionRecord {
        let point_estimate = self.model.predict(&feature_vector(row));

        let (estimated_std, thresholds, confidence) = match self.calibration {
            Some(cal) => {
                let thresholds = self.threshold_queries(cal, row, point_estimate);
                let confidence = match self.edge(row, point_estimate) {
                    Some(edge) => cal.confidence(edge),
                    None => Confidence::Low,
                };
                (Some(cal.estimated_std), thresholds, confidence)
            }
            None => (None, Vec::new(), Confidence::Low),
        };

        PredictionRecord {
            game_id: row.game_id,
            team_id: row.team_id,
            model_version: self.model_version.clone(),
            point_estimate,
            estimated_std,
            threshold_probabilities: thresholds,
            confidence,
            calibrated: self.calibration.is_some(),
            low_confidence: row.low_confidence,
            scored_at: self.scored_at,
        }
    }

    pub fn score_all(&self, rows: &[MatchupFeatureRow]) -> Vec<PredictionRecord> {
        rows.iter().map(|r| self.score(r)).collect()
    }

    /// The edge driving the confidence level. A cover-margin estimate is
    /// already line-relative, so the edge is the estimate itself; a total
    /// estimate is measured against the closing total.
    fn edge(&self, row: &MatchupFeatureRow, point_estimate: f64) -> Option<f64> {
        match self.target {
            PredictionTarget::CoverMargin => Some(point_estimate),
            PredictionTarget::GameTotal => {
                row.closing_total.map(|total| point_estimate - total)
            }
        }
    }

    fn threshold_queries(
        &self,
        cal: &Calibration,
        row: &MatchupFeatureRow,
        point_estimate: f64,
    ) -> Vec<ThresholdProbability> {
        match self.target {
            PredictionTarget::CoverMargin => {
                // P(cover) is P(cover_margin > 0); teaser survival at t
                // points is P(cover_margin > -t).
                let mut out = vec![cal.threshold_probability("cover", point_estimate, 0.0)];
                for &t in &self.teaser_points {
                    out.push(cal.threshold_probability(
                        format!("teaser_{}", t as i64),
                        point_estimate,
                        -t,
                    ));
                }
                out
            }
            PredictionTarget::GameTotal => match row.closing_total {
                Some(total) => cal
                    .probability_curve(point_estimate, total, 10.0, 2.5)
                    .into_iter()
                    .map(|(threshold, probability)| ThresholdProbability {
                        label: if (threshold - total).abs() < 1e-9 {
                            "over_closing".to_string()
                        } else {
                            format!("over_{threshold:+.1}")
                        },
                        threshold,
                        probability,
                    })
                    .collect(),
                None => Vec::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::GameObservation;
    use crate::engine::matchup::{compose_rows, FeatureIndex};
    use crate::engine::rolling::compute_entity_features;
    use crate::engine::FeatureConfig;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn fixture_row() -> MatchupFeatureRow {
        let cfg = FeatureConfig::default();
        let mut observations = Vec::new();
        for (i, &m) in [6i32, -3, 9, 2, -5].iter().enumerate() {
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
        let mut index = FeatureIndex::default();
        for team_id in [1i64, 2] {
            let seq: Vec<GameObservation> = observations
                .iter()
                .filter(|o| o.team_id == team_id)
                .cloned()
                .collect();
            for set in compute_entity_features(team_id, 2025, &seq, &cfg) {
                index.insert(set);
            }
        }
        compose_rows(&observations, &index, &cfg)
            .rows
            .into_iter()
            .find(|r| r.game_id == 5 && r.team_id == 1)
            .unwrap()
    }

    fn trivial_model() -> LinearModel {
        let dims = crate::model::linear::FEATURE_NAMES.len();
        LinearModel {
            weights: vec![0.0; dims],
            bias: 3.5,
            feature_means: vec![0.0; dims],
            feature_stds: vec![1.0; dims],
        }
    }

    #[test]
    fn uncalibrated_record_still_goes_out() {
        let model = trivial_model();
        let scorer = Scorer {
            model: &model,
            calibration: None,
            target: PredictionTarget::CoverMargin,
            model_version: "test-1".into(),
            teaser_points: vec![6.0, 8.0],
            scored_at: Utc::now(),
        };
        let rec = scorer.score(&fixture_row());
        assert!(!rec.calibrated);
        assert!(rec.estimated_std.is_none());
        assert!(rec.threshold_probabilities.is_empty());
        assert_eq!(rec.confidence, Confidence::Low);
        assert_relative_eq!(rec.point_estimate, 3.5);
    }

    #[test]
    fn cover_margin_thresholds_answer_cover_and_teaser() {
        let model = trivial_model();
        let cal = Calibration {
            estimated_std: 10.0,
            residual_count: 50,
        };
        let scorer = Scorer {
            model: &model,
            calibration: Some(&cal),
            target: PredictionTarget::CoverMargin,
            model_version: "test-1".into(),
            teaser_points: vec![6.0, 7.0, 8.0, 10.0],
            scored_at: Utc::now(),
        };
        let rec = scorer.score(&fixture_row());
        assert!(rec.calibrated);
        assert_eq!(rec.threshold_probabilities.len(), 5);

        let cover = &rec.threshold_probabilities[0];
        assert_eq!(cover.label, "cover");
        assert_relative_eq!(cover.threshold, 0.0);
        // Estimate +3.5 with std 10 → P(cover) just above half.
        assert!(cover.probability > 0.5 && cover.probability < 0.75);

        let teaser8 = rec
            .threshold_probabilities
            .iter()
            .find(|t| t.label == "teaser_8")
            .unwrap();
        assert_relative_eq!(teaser8.threshold, -8.0);
        // Teasing down always adds survival probability.
        assert!(teaser8.probability > cover.probability);
    }

    #[test]
    fn game_total_curve_centers_on_closing_total() {
        let mut model = trivial_model();
        model.bias = 144.0;
        let cal = Calibration {
            estimated_std: 9.0,
            residual_count: 40,
        };
        let scorer = Scorer {
            model: &model,
            calibration: Some(&cal),
            target: PredictionTarget::GameTotal,
            model_version: "test-1".into(),
            teaser_points: vec![],
            scored_at: Utc::now(),
        };
        let rec = scorer.score(&fixture_row());
        let at_close = rec
            .threshold_probabilities
            .iter()
            .find(|t| t.label == "over_closing")
            .unwrap();
        assert_relative_eq!(at_close.threshold, 140.0);
        // Estimate 4 points above the closing total → over is favored.
        assert!(at_close.probability > 0.5);
    }

    #[test]
    fn confidence_follows_edge_over_std() {
        let mut model = trivial_model();
        model.bias = 20.0;
        let cal = Calibration {
            estimated_std: 10.0,
            residual_count: 50,
        };
        let scorer = Scorer {
            model: &model,
            calibration: Some(&cal),
            target: PredictionTarget::CoverMargin,
            model_version: "test-1".into(),
            teaser_points: vec![],
            scored_at: Utc::now(),
        };
        // Edge 20 over std 10 = 2σ → high.
        assert_eq!(scorer.score(&fixture_row()).confidence, Confidence::High);
    }

    #[test]
    fn low_confidence_flag_propagates_from_row() {
        let model = trivial_model();
        let scorer = Scorer {
            model: &model,
            calibration: None,
            target: PredictionTarget::CoverMargin,
            model_version: "test-1".into(),
            teaser_points: vec![],
            scored_at: Utc::now(),
        };
        let mut row = fixture_row();
        row.low_confidence = true;
        assert!(scorer.score(&row).low_confidence);
    }
}
