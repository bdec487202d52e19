//! Binary classification metrics at a 0.5 decision threshold.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Probability at or above which a row is predicted positive.
pub const DECISION_THRESHOLD: f64 = 0.5;

/// Metrics for one model on one split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    /// `None` when the labels hold a single class
    pub roc_auc: Option<f64>,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

impl ClassificationReport {
    /// Score `probabilities` against binary `labels`.
    pub fn compute(probabilities: &[f64], labels: &[u8]) -> Self {
        let c = ConfusionMatrix::at_threshold(probabilities, labels, DECISION_THRESHOLD);
        Self {
            roc_auc: roc_auc(probabilities, labels),
            accuracy: c.accuracy(),
            precision: c.precision(),
            recall: c.recall(),
            f1: c.f1(),
            support: labels.len(),
        }
    }

    /// Log as one row of a metrics table.
    pub fn log_row(&self, model: &str) {
        let auc = self
            .roc_auc
            .map(|v| format!("{v:.4}"))
            .unwrap_or_else(|| "n/a".to_string());
        log::info!(
            "  {model:<10} auc {auc:>6}  acc {:.4}  prec {:.4}  rec {:.4}  f1 {:.4}  (n={})",
            self.accuracy,
            self.precision,
            self.recall,
            self.f1,
            self.support
        );
    }
}

/// Confusion counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    pub tp: usize,
    pub fp: usize,
    pub tn: usize,
    pub fn_: usize,
}

impl ConfusionMatrix {
    pub fn at_threshold(probabilities: &[f64], labels: &[u8], threshold: f64) -> Self {
        let mut c = Self::default();
        for (&p, &y) in probabilities.iter().zip(labels) {
            match (p >= threshold, y == 1) {
                (true, true) => c.tp += 1,
                (true, false) => c.fp += 1,
                (false, false) => c.tn += 1,
                (false, true) => c.fn_ += 1,
            }
        }
        c
    }

    pub fn total(&self) -> usize {
        self.tp + self.fp + self.tn + self.fn_
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.tp + self.tn, self.total())
    }

    /// Zero when nothing is predicted positive.
    pub fn precision(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp)
    }

    /// Zero when there are no positives.
    pub fn recall(&self) -> f64 {
        ratio(self.tp, self.tp + self.fn_)
    }

    pub fn f1(&self) -> f64 {
        ratio(2 * self.tp, 2 * self.tp + self.fp + self.fn_)
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Area under the ROC curve via the Mann-Whitney rank statistic.
///
/// Tied scores receive their average rank. Returns `None` when `labels`
/// contain only one class.
pub fn roc_auc(scores: &[f64], labels: &[u8]) -> Option<f64> {
    let n = scores.len().min(labels.len());
    let n_pos = labels[..n].iter().filter(|&&y| y == 1).count();
    let n_neg = n - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| scores[a].partial_cmp(&scores[b]).unwrap_or(Ordering::Equal));

    let mut positive_rank_sum = 0.0;
    let mut i = 0;
    while i < n {
        let mut j = i + 1;
        while j < n && scores[order[j]] == scores[order[i]] {
            j += 1;
        }
        // Ranks i+1..=j share their mean.
        let rank = (i + 1 + j) as f64 / 2.0;
        let tied_positives = order[i..j].iter().filter(|&&r| labels[r] == 1).count();
        positive_rank_sum += rank * tied_positives as f64;
        i = j;
    }

    let n_pos = n_pos as f64;
    let u = positive_rank_sum - n_pos * (n_pos + 1.0) / 2.0;
    Some(u / (n_pos * n_neg as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_auc_perfect_and_inverted() {
        let y = [0, 0, 1, 1];
        assert_relative_eq!(roc_auc(&[0.1, 0.2, 0.8, 0.9], &y).unwrap(), 1.0);
        assert_relative_eq!(roc_auc(&[0.9, 0.8, 0.2, 0.1], &y).unwrap(), 0.0);
    }

    #[test]
    fn test_auc_ties_count_half() {
        assert_relative_eq!(roc_auc(&[0.5, 0.5, 0.5, 0.5], &[0, 1, 0, 1]).unwrap(), 0.5);
        // pos {0.4, 0.8} vs neg {0.1, 0.4}: pairs 1 + 0.5 + 1 + 1 = 3.5 of 4
        assert_relative_eq!(roc_auc(&[0.1, 0.4, 0.4, 0.8], &[0, 0, 1, 1]).unwrap(), 0.875);
    }

    #[test]
    fn test_auc_single_class_is_none() {
        assert_eq!(roc_auc(&[0.2, 0.9], &[1, 1]), None);
    }

    #[test]
    fn test_report_zero_division() {
        let report = ClassificationReport::compute(&[0.1, 0.2, 0.3], &[0, 1, 1]);
        assert_eq!(report.precision, 0.0);
        assert_eq!(report.recall, 0.0);
        assert_eq!(report.f1, 0.0);
        assert_relative_eq!(report.accuracy, 1.0 / 3.0);
        assert_eq!(report.support, 3);
    }

    #[test]
    fn test_confusion_counts() {
        let c = ConfusionMatrix::at_threshold(&[0.9, 0.6, 0.4, 0.1], &[1, 0, 1, 0], 0.5);
        assert_eq!(c, ConfusionMatrix { tp: 1, fp: 1, tn: 1, fn_: 1 });
        assert_relative_eq!(c.f1(), 0.5);
    }
}
