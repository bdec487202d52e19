//! Seeded, label-stratified row splits.
//!
//! Both splitters shuffle each class independently with a ChaCha RNG so the
//! assignment depends only on the labels and the seed.

use crate::error::{PipelineError, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

/// Row indices of each class, shuffled.
fn shuffled_classes(labels: &[u8], rng: &mut ChaCha20Rng) -> [Vec<usize>; 2] {
    let mut classes: [Vec<usize>; 2] = [Vec::new(), Vec::new()];
    for (row, &label) in labels.iter().enumerate() {
        classes[usize::from(label.min(1))].push(row);
    }
    for rows in &mut classes {
        rows.shuffle(rng);
    }
    classes
}

/// Stratified holdout: returns sorted `(train_rows, test_rows)`.
///
/// Each class contributes `round(count * test_fraction)` rows to the test
/// split, keeping at least one row of every class in training.
pub fn stratified_holdout(labels: &[u8], test_fraction: f64, seed: u64) -> Result<(Vec<usize>, Vec<usize>)> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(PipelineError::InvalidConfig(format!(
            "test_fraction must be in (0, 1), got {test_fraction}"
        )));
    }
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(labels.len());
    let mut test = Vec::new();

    for rows in shuffled_classes(labels, &mut rng) {
        let n_test = ((rows.len() as f64) * test_fraction).round() as usize;
        let n_test = n_test.min(rows.len().saturating_sub(1));
        test.extend_from_slice(&rows[..n_test]);
        train.extend_from_slice(&rows[n_test..]);
    }

    if test.is_empty() {
        return Err(PipelineError::InsufficientData(format!(
            "holdout of {} rows at fraction {test_fraction} leaves an empty test split",
            labels.len()
        )));
    }
    train.sort_unstable();
    test.sort_unstable();
    Ok((train, test))
}

/// One cross-validation fold over a row set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub index: usize,
    /// Rows the fold's base models are fitted on
    pub train: Vec<usize>,
    /// Rows the fold's base models predict (out-of-fold)
    pub validation: Vec<usize>,
}

/// Stratified k-fold: each class is shuffled and dealt round-robin.
#[derive(Debug, Clone, Copy)]
pub struct StratifiedKFold {
    pub n_splits: usize,
    pub seed: u64,
}

impl StratifiedKFold {
    pub fn new(n_splits: usize, seed: u64) -> Self {
        Self { n_splits, seed }
    }

    /// Partition `0..labels.len()` into `n_splits` folds.
    ///
    /// Every row appears in exactly one validation set.
    pub fn split(&self, labels: &[u8]) -> Result<Vec<Fold>> {
        if self.n_splits < 2 {
            return Err(PipelineError::InvalidConfig(format!(
                "k-fold needs at least 2 splits, got {}",
                self.n_splits
            )));
        }
        if labels.len() < self.n_splits {
            return Err(PipelineError::InsufficientData(format!(
                "{} rows cannot fill {} folds",
                labels.len(),
                self.n_splits
            )));
        }

        let mut rng = ChaCha20Rng::seed_from_u64(self.seed);
        let mut assignment = vec![0usize; labels.len()];
        let mut offset = 0;
        for rows in shuffled_classes(labels, &mut rng) {
            for (i, &row) in rows.iter().enumerate() {
                assignment[row] = (offset + i) % self.n_splits;
            }
            // Continue the deal so small classes do not pile into fold 0.
            offset = (offset + rows.len()) % self.n_splits;
        }

        Ok((0..self.n_splits)
            .map(|index| {
                let (validation, train): (Vec<usize>, Vec<usize>) =
                    (0..labels.len()).partition(|&row| assignment[row] == index);
                Fold {
                    index,
                    train,
                    validation,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(neg: usize, pos: usize) -> Vec<u8> {
        let mut l = vec![0u8; neg];
        l.extend(std::iter::repeat(1u8).take(pos));
        l
    }

    #[test]
    fn test_holdout_is_stratified_and_disjoint() {
        let y = labels(50, 50);
        let (train, test) = stratified_holdout(&y, 0.2, 42).unwrap();
        assert_eq!(train.len(), 80);
        assert_eq!(test.len(), 20);
        assert_eq!(test.iter().filter(|&&r| y[r] == 1).count(), 10);
        assert!(train.iter().all(|r| !test.contains(r)));
    }

    #[test]
    fn test_holdout_is_seeded() {
        let y = labels(30, 20);
        assert_eq!(stratified_holdout(&y, 0.2, 7).unwrap(), stratified_holdout(&y, 0.2, 7).unwrap());
        assert_ne!(stratified_holdout(&y, 0.2, 7).unwrap(), stratified_holdout(&y, 0.2, 8).unwrap());
    }

    #[test]
    fn test_holdout_rejects_bad_fraction() {
        assert!(stratified_holdout(&labels(5, 5), 0.0, 1).is_err());
        assert!(stratified_holdout(&labels(5, 5), 1.0, 1).is_err());
    }

    #[test]
    fn test_kfold_partitions_rows() {
        let y = labels(23, 17);
        let folds = StratifiedKFold::new(5, 42).split(&y).unwrap();
        assert_eq!(folds.len(), 5);

        let mut seen = vec![0usize; y.len()];
        for fold in &folds {
            assert_eq!(fold.train.len() + fold.validation.len(), y.len());
            for &row in &fold.validation {
                seen[row] += 1;
                assert!(!fold.train.contains(&row));
            }
            let pos = fold.validation.iter().filter(|&&r| y[r] == 1).count();
            assert!((3..=4).contains(&pos), "fold {} has {pos} positives", fold.index);
        }
        assert!(seen.iter().all(|&n| n == 1));
    }

    #[test]
    fn test_kfold_needs_enough_rows() {
        assert!(StratifiedKFold::new(5, 0).split(&labels(2, 2)).is_err());
        assert!(StratifiedKFold::new(1, 0).split(&labels(5, 5)).is_err());
    }
}
