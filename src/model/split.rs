//! Chronological train/validation/test partitioning.
//!
//! Partitions are cut by *global* date order across all entities, never
//! per-entity. A calendar date is never allowed to straddle two
//! partitions: the boundary advances past it, so the maximum training
//! date is strictly earlier than the minimum evaluation date.

use std::ops::Range;

use chrono::NaiveDate;

use crate::error::EngineError;

/// Split fractions; the test share is whatever remains.
#[derive(Debug, Clone, Copy)]
pub struct SplitRatios {
    pub train: f64,
    pub validation: f64,
}

impl Default for SplitRatios {
    fn default() -> Self {
        SplitRatios {
            train: 0.6,
            validation: 0.2,
        }
    }
}

impl SplitRatios {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.train <= 0.0 || self.validation <= 0.0 {
            anyhow::bail!("split ratios must be positive");
        }
        if self.train + self.validation >= 1.0 {
            anyhow::bail!("train + validation ratios must leave room for a test partition");
        }
        Ok(())
    }
}

/// Index ranges into a date-sorted row slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Range<usize>,
    pub validation: Range<usize>,
    pub test: Range<usize>,
}

impl SplitIndices {
    /// Project the ranges onto the row slice they were computed for.
    pub fn apply<'a, T>(&self, rows: &'a [T]) -> (&'a [T], &'a [T], &'a [T]) {
        (
            &rows[self.train.clone()],
            &rows[self.validation.clone()],
            &rows[self.test.clone()],
        )
    }
}

/// Partition a date-sorted sequence by ratio, advancing each boundary to
/// the next date change so no date straddles partitions. Rejects unsorted
/// input: feeding this splitter out-of-order rows is a leakage bug
/// upstream, not something to silently fix here.
pub fn chronological_split(
    dates: &[NaiveDate],
    ratios: SplitRatios,
) -> Result<SplitIndices, EngineError> {
    if dates.windows(2).any(|w| w[0] > w[1]) {
        return Err(EngineError::TemporalLeakage(
            "rows passed to the splitter are not in chronological order".into(),
        ));
    }

    let n = dates.len();
    let train_end = advance_to_date_change(dates, (n as f64 * ratios.train) as usize);
    let val_end = advance_to_date_change(
        dates,
        ((n as f64 * (ratios.train + ratios.validation)) as usize).max(train_end),
    );

    Ok(SplitIndices {
        train: 0..train_end,
        validation: train_end..val_end,
        test: val_end..n,
    })
}

/// Move a boundary forward while it sits inside a run of equal dates.
fn advance_to_date_change(dates: &[NaiveDate], mut idx: usize) -> usize {
    while idx > 0 && idx < dates.len() && dates[idx] == dates[idx - 1] {
        idx += 1;
    }
    idx.min(dates.len())
}

/// Guard called before fitting any parameters: every date used to fit
/// must be strictly earlier than the earliest date the fit is applied to.
/// A violation is always fatal for the run.
pub fn validate_fit(fit_dates: &[NaiveDate], eval_dates: &[NaiveDate]) -> Result<(), EngineError> {
    let (Some(fit_max), Some(eval_min)) = (fit_dates.iter().max(), eval_dates.iter().min()) else {
        return Ok(());
    };
    if fit_max >= eval_min {
        return Err(EngineError::TemporalLeakage(format!(
            "fit partition reaches {fit_max} but evaluation starts at {eval_min}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn days(ds: &[u32]) -> Vec<NaiveDate> {
        ds.iter()
            .map(|&d| NaiveDate::from_ymd_opt(2025, 1, d).unwrap())
            .collect()
    }

    #[test]
    fn split_ordering_is_strict_by_date() {
        let dates = days(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        let split = chronological_split(&dates, SplitRatios::default()).unwrap();
        let (train, val, test) = split.apply(&dates);
        assert!(train.iter().max().unwrap() < val.iter().min().unwrap());
        assert!(val.iter().max().unwrap() < test.iter().min().unwrap());
        assert_eq!(train.len() + val.len() + test.len(), dates.len());
    }

    #[test]
    fn straddled_date_moves_wholly_into_earlier_partition() {
        // Ten rows but only three distinct dates; naive 60/20/20 cuts
        // would land mid-date.
        let dates = days(&[1, 1, 1, 1, 2, 2, 2, 2, 3, 3]);
        let split = chronological_split(&dates, SplitRatios::default()).unwrap();
        let (train, val, _test) = split.apply(&dates);
        // Boundary advanced to the end of day 2's run.
        assert_eq!(train.len(), 8);
        assert!(val.is_empty() || train.iter().max().unwrap() < val.iter().min().unwrap());
    }

    #[test]
    fn unsorted_input_is_a_leakage_error() {
        let dates = days(&[3, 1, 2]);
        assert!(matches!(
            chronological_split(&dates, SplitRatios::default()),
            Err(EngineError::TemporalLeakage(_))
        ));
    }

    #[test]
    fn validator_rejects_equal_boundary_date() {
        let fit = days(&[1, 2, 3]);
        let eval = days(&[3, 4]);
        assert!(matches!(
            validate_fit(&fit, &eval),
            Err(EngineError::TemporalLeakage(_))
        ));
    }

    #[test]
    fn validator_accepts_strictly_ordered_partitions() {
        let fit = days(&[1, 2]);
        let eval = days(&[3, 4]);
        assert!(validate_fit(&fit, &eval).is_ok());
    }

    #[test]
    fn empty_partitions_are_not_leakage() {
        assert!(validate_fit(&[], &days(&[1])).is_ok());
        assert!(validate_fit(&days(&[1]), &[]).is_ok());
    }

    #[test]
    fn ratio_validation() {
        assert!(SplitRatios::default().validate().is_ok());
        assert!(SplitRatios {
            train: 0.9,
            validation: 0.2
        }
        .validate()
        .is_err());
    }
}
