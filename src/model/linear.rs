//! Linear point-estimate model fit by batch gradient descent.
//!
//! Features are standardized with training-set means and stddevs; missing
//! values impute to the training mean (z = 0). The fit is deterministic:
//! fixed initialization, fixed iteration count, decaying learning rate.

use serde::{Deserialize, Serialize};

use crate::engine::matchup::MatchupFeatureRow;
use crate::engine::rolling::RollingFeatureSet;

/// Feature names, in extraction order. Kept alongside the weights so a
/// persisted model stays interpretable.
pub const FEATURE_NAMES: &[&str] = &[
    "team_stddev_cover_5",
    "team_stddev_cover_10",
    "team_stddev_cover_20",
    "team_mean_cover_10",
    "team_ats_rate_5",
    "team_ats_rate_10",
    "team_teaser_8_survival_10",
    "team_tail_10_rate_10",
    "team_blowout_rate_10",
    "team_worst_cover_10",
    "team_mean_total_margin_10",
    "team_over_rate_10",
    "team_variance_contraction",
    "team_ats_streak",
    "opp_stddev_cover_5",
    "opp_stddev_cover_10",
    "opp_stddev_cover_20",
    "opp_mean_cover_10",
    "opp_ats_rate_5",
    "opp_ats_rate_10",
    "opp_teaser_8_survival_10",
    "opp_tail_10_rate_10",
    "opp_blowout_rate_10",
    "opp_worst_cover_10",
    "opp_mean_total_margin_10",
    "opp_over_rate_10",
    "opp_variance_contraction",
    "opp_ats_streak",
    "delta_mean_cover_10",
    "delta_stddev_cover_10",
    "delta_ats_rate_10",
    "closing_line_for_team",
    "closing_total",
    "is_home",
];

fn side_features(set: &RollingFeatureSet, out: &mut Vec<Option<f64>>) {
    let h = |n: usize| set.horizon(n);
    out.push(h(5).and_then(|a| a.stddev_cover_margin));
    out.push(h(10).and_then(|a| a.stddev_cover_margin));
    out.push(h(20).and_then(|a| a.stddev_cover_margin));
    out.push(h(10).and_then(|a| a.mean_cover_margin));
    out.push(h(5).and_then(|a| a.ats_cover_rate));
    out.push(h(10).and_then(|a| a.ats_cover_rate));
    out.push(h(10).and_then(|a| a.tail.teaser_survival_at(8.0)));
    out.push(h(10).and_then(|a| a.tail.downside_tail_at(-10.0)));
    out.push(h(10).and_then(|a| a.tail.blowout_rate));
    out.push(h(10).and_then(|a| a.worst_cover_margin));
    out.push(h(10).and_then(|a| a.mean_total_margin));
    out.push(h(10).and_then(|a| a.over_rate));
    out.push(set.variance_contraction);
    out.push(Some(set.ats_streak as f64));
}

/// Extract the model's feature vector from a composed row. `None` entries
/// are imputed at predict time.
pub fn feature_vector(row: &MatchupFeatureRow) -> Vec<Option<f64>> {
    let mut x = Vec::with_capacity(FEATURE_NAMES.len());
    side_features(&row.team, &mut x);
    side_features(&row.opponent, &mut x);
    x.push(row.delta(|s| s.horizon(10).and_then(|a| a.mean_cover_margin)));
    x.push(row.delta(|s| s.horizon(10).and_then(|a| a.stddev_cover_margin)));
    x.push(row.delta(|s| s.horizon(10).and_then(|a| a.ats_cover_rate)));
    x.push(row.closing_line_for_team);
    x.push(row.closing_total);
    x.push(Some(if row.is_home { 1.0 } else { 0.0 }));
    debug_assert_eq!(x.len(), FEATURE_NAMES.len());
    x
}

#[derive(Debug, Clone, Copy)]
pub struct FitOptions {
    pub max_iters: usize,
    pub learning_rate: f64,
    pub l2: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        FitOptions {
            max_iters: 400,
            learning_rate: 0.1,
            l2: 1e-3,
        }
    }
}

/// Linear model over standardized features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearModel {
    pub weights: Vec<f64>,
    pub bias: f64,
    /// Per-feature standardization parameters from the training set;
    /// also serve as the imputation values for missing features.
    pub feature_means: Vec<f64>,
    pub feature_stds: Vec<f64>,
}

impl LinearModel {
    /// Fit on training rows. Returns `None` when there are too few
    /// samples or the descent diverges (mirrors how the Platt fitter in
    /// this codebase's lineage reports an unusable fit).
    pub fn fit(xs: &[Vec<Option<f64>>], ys: &[f64], opts: FitOptions) -> Option<LinearModel> {
        if xs.len() != ys.len() || xs.len() < 8 {
            return None;
        }
        let dims = xs.first()?.len();
        if dims == 0 || xs.iter().any(|x| x.len() != dims) {
            return None;
        }

        let (means, stds) = column_stats(xs, dims);
        let standardized: Vec<Vec<f64>> = xs
            .iter()
            .map(|x| standardize(x, &means, &stds))
            .collect();

        let n = xs.len() as f64;
        let mut weights = vec![0.0f64; dims];
        let mut bias = ys.iter().sum::<f64>() / n;

        for i in 0..opts.max_iters.max(1) {
            let lr = opts.learning_rate / (1.0 + 0.01 * i as f64);
            let mut grad_w = vec![0.0f64; dims];
            let mut grad_b = 0.0f64;
            for (x, &y) in standardized.iter().zip(ys) {
                let err = dot(&weights, x) + bias - y;
                for (g, &xi) in grad_w.iter_mut().zip(x) {
                    *g += err * xi;
                }
                grad_b += err;
            }
            for (w, g) in weights.iter_mut().zip(&grad_w) {
                *w -= lr * (g / n + opts.l2 * *w);
            }
            bias -= lr * grad_b / n;
            if !bias.is_finite() || weights.iter().any(|w| !w.is_finite()) {
                return None;
            }
        }

        Some(LinearModel {
            weights,
            bias,
            feature_means: means,
            feature_stds: stds,
        })
    }

    pub fn predict(&self, x: &[Option<f64>]) -> f64 {
        let z = standardize(x, &self.feature_means, &self.feature_stds);
        dot(&self.weights, &z) + self.bias
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn column_stats(xs: &[Vec<Option<f64>>], dims: usize) -> (Vec<f64>, Vec<f64>) {
    let mut means = vec![0.0f64; dims];
    let mut stds = vec![1.0f64; dims];
    for d in 0..dims {
        let present: Vec<f64> = xs.iter().filter_map(|x| x[d]).collect();
        if present.is_empty() {
            continue;
        }
        let m = present.iter().sum::<f64>() / present.len() as f64;
        means[d] = m;
        if present.len() > 1 {
            let var = present.iter().map(|v| (v - m).powi(2)).sum::<f64>()
                / (present.len() - 1) as f64;
            if var.sqrt() > 1e-9 {
                stds[d] = var.sqrt();
            }
        }
    }
    (means, stds)
}

/// Missing values standardize to 0 (the training mean).
fn standardize(x: &[Option<f64>], means: &[f64], stds: &[f64]) -> Vec<f64> {
    x.iter()
        .enumerate()
        .map(|(d, v)| match v {
            Some(v) => (v - means[d]) / stds[d],
            None => 0.0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn dense(rows: &[&[f64]]) -> Vec<Vec<Option<f64>>> {
        rows.iter()
            .map(|r| r.iter().map(|&v| Some(v)).collect())
            .collect()
    }

    #[test]
    fn fit_recovers_linear_relationship() {
        // y = 3x + 1 over a spread of x values.
        let xs: Vec<Vec<Option<f64>>> = (0..40).map(|i| vec![Some(i as f64)]).collect();
        let ys: Vec<f64> = (0..40).map(|i| 3.0 * i as f64 + 1.0).collect();
        let model = LinearModel::fit(&xs, &ys, FitOptions::default()).expect("fit");
        for probe in [0.0_f64, 10.0, 39.0] {
            let y = model.predict(&[Some(probe)]);
            assert_relative_eq!(y, 3.0 * probe + 1.0, epsilon = 0.5);
        }
    }

    #[test]
    fn missing_feature_imputes_to_training_mean() {
        let xs: Vec<Vec<Option<f64>>> = (0..40).map(|i| vec![Some(i as f64)]).collect();
        let ys: Vec<f64> = (0..40).map(|i| 2.0 * i as f64).collect();
        let model = LinearModel::fit(&xs, &ys, FitOptions::default()).expect("fit");
        // Mean of x is 19.5 → prediction near 39.
        let y = model.predict(&[None]);
        assert_relative_eq!(y, 39.0, epsilon = 1.0);
    }

    #[test]
    fn too_few_samples_refuses_to_fit() {
        let xs = dense(&[&[1.0], &[2.0]]);
        assert!(LinearModel::fit(&xs, &[1.0, 2.0], FitOptions::default()).is_none());
    }

    #[test]
    fn mismatched_dimensions_refuse_to_fit() {
        let mut xs = dense(&[&[1.0], &[2.0], &[3.0], &[4.0], &[5.0], &[6.0], &[7.0], &[8.0]]);
        xs[3] = vec![Some(1.0), Some(2.0)];
        let ys = vec![0.0; 8];
        assert!(LinearModel::fit(&xs, &ys, FitOptions::default()).is_none());
    }

    #[test]
    fn fit_is_deterministic() {
        let xs: Vec<Vec<Option<f64>>> = (0..30)
            .map(|i| vec![Some(i as f64), Some((i * i) as f64 % 7.0)])
            .collect();
        let ys: Vec<f64> = (0..30).map(|i| i as f64 * 0.5 - 2.0).collect();
        let a = LinearModel::fit(&xs, &ys, FitOptions::default()).expect("fit a");
        let b = LinearModel::fit(&xs, &ys, FitOptions::default()).expect("fit b");
        assert_eq!(a.weights, b.weights);
        assert_eq!(a.bias, b.bias);
    }
}
