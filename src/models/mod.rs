//! Base and meta classifiers.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────────┐
//!  features[14] ─►│ LogisticRegression   │─► p_tabular ─┐
//!                 └──────────────────────┘              │   ┌──────────────┐
//!                                                       ├──►│ meta logistic │─► risk
//!                 ┌──────────────────────┐              │   └──────────────┘
//!  sequence[96] ─►│ LstmClassifier       │─► p_sequence ┘
//!                 └──────────────────────┘
//! ```
//!
//! Both base learners implement [`RiskModel`] so the trainer and predictor
//! treat them uniformly; their configurations implement [`Learner`] to
//! produce fresh fitted instances per fold.

pub mod logistic;
pub mod lstm;

pub use logistic::{ClassWeight, LogisticConfig, LogisticRegression};
pub use lstm::{LstmClassifier, LstmConfig};

use crate::error::{PipelineError, Result};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

/// One patient's model input.
///
/// `tabular` is the *preprocessed* feature row; `sequence` is the raw
/// glucose window.
#[derive(Debug, Clone, Copy)]
pub struct PatientInput<'a> {
    pub tabular: ArrayView1<'a, f64>,
    pub sequence: ArrayView1<'a, f32>,
}

/// A fitted model producing an event probability.
pub trait RiskModel: Send + Sync {
    /// Short model name used in logs and reports.
    fn name(&self) -> &'static str;

    /// Probability of the positive class, in `[0, 1]`.
    fn predict_probability(&self, input: &PatientInput<'_>) -> f64;

    /// Probabilities for row-aligned tabular and sequence matrices.
    fn predict_batch(&self, tabular: ArrayView2<'_, f64>, sequences: ArrayView2<'_, f32>) -> Vec<f64> {
        tabular
            .rows()
            .into_iter()
            .zip(sequences.rows())
            .map(|(tabular, sequence)| self.predict_probability(&PatientInput { tabular, sequence }))
            .collect()
    }
}

/// Row-aligned training data for the base learners.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSet {
    /// `[n, n_features]` preprocessed features
    pub tabular: Array2<f64>,
    /// `[n, L]` raw sequences
    pub sequences: Array2<f32>,
    /// Binary labels
    pub labels: Vec<u8>,
}

impl TrainingSet {
    /// Assemble, checking that all three parts have the same row count.
    pub fn new(tabular: Array2<f64>, sequences: Array2<f32>, labels: Vec<u8>) -> Result<Self> {
        if tabular.nrows() != labels.len() || sequences.nrows() != labels.len() {
            return Err(PipelineError::InvalidInput(format!(
                "row mismatch: tabular {}, sequences {}, labels {}",
                tabular.nrows(),
                sequences.nrows(),
                labels.len()
            )));
        }
        Ok(Self {
            tabular,
            sequences,
            labels,
        })
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether there are no rows.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Copy of the given rows, in the given order.
    pub fn subset(&self, rows: &[usize]) -> Self {
        Self {
            tabular: self.tabular.select(Axis(0), rows),
            sequences: self.sequences.select(Axis(0), rows),
            labels: rows.iter().map(|&r| self.labels[r]).collect(),
        }
    }

    /// `(negatives, positives)`.
    pub fn class_counts(&self) -> (usize, usize) {
        class_counts(&self.labels)
    }
}

/// Produces fitted models from training data.
pub trait Learner: Send + Sync {
    /// Fitted model type.
    type Model: RiskModel;

    /// Fit a fresh model; `seed` drives any internal randomness.
    fn fit(&self, data: &TrainingSet, seed: u64) -> Result<Self::Model>;
}

/// `(negatives, positives)` in `labels`.
pub fn class_counts(labels: &[u8]) -> (usize, usize) {
    let positives = labels.iter().filter(|&&y| y == 1).count();
    (labels.len() - positives, positives)
}

/// Numerically stable logistic function.
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_sigmoid_stable_at_extremes() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(-800.0) >= 0.0);
        assert!(sigmoid(800.0) <= 1.0);
        assert!((sigmoid(2.0) + sigmoid(-2.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_training_set_subset() {
        let set = TrainingSet::new(
            array![[1.0], [2.0], [3.0]],
            array![[1.0_f32, 1.0], [2.0, 2.0], [3.0, 3.0]],
            vec![0, 1, 1],
        )
        .unwrap();
        let sub = set.subset(&[2, 0]);
        assert_eq!(sub.labels, vec![1, 0]);
        assert_eq!(sub.tabular[[0, 0]], 3.0);
        assert_eq!(sub.sequences[[1, 1]], 1.0);
        assert_eq!(set.class_counts(), (1, 2));
    }

    #[test]
    fn test_training_set_row_mismatch() {
        let result = TrainingSet::new(array![[1.0]], array![[1.0_f32], [2.0]], vec![0]);
        assert!(result.is_err());
    }
}
