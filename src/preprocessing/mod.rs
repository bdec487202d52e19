//! Feature preprocessing for the base learners.
//!
//! - **Imputation**: per-column median of the fitted rows replaces NaN
//! - **Standardization**: per-column z-score with population statistics
//!   (Welford's algorithm), a zero-variance column is centered only
//! - **Sequence standardization**: one global mean/std over every sequence
//!   value, applied before the recurrent network
//!
//! Both transforms are fitted on the training split only and persisted with
//! the model bundle so serving applies exactly the same mapping.
//!
//! # Example
//!
//! ```
//! use cgm_risk::preprocessing::TabularPreprocessor;
//! use ndarray::array;
//!
//! let train = array![[1.0, 10.0], [3.0, f64::NAN], [5.0, 30.0]];
//! let pre = TabularPreprocessor::fit(train.view()).unwrap();
//!
//! let z = pre.transform(train.view());
//! assert!((z[[0, 0]] + 1.2247).abs() < 1e-3);
//! assert_eq!(z[[1, 1]], 0.0); // imputed with the median, then centered
//! ```

use crate::error::{PipelineError, Result};
use crate::features::statistics::median;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Standard deviations below this are treated as zero.
pub const MIN_STD: f64 = 1e-8;

/// Welford running mean and population variance.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningStats {
    mean: f64,
    m2: f64,
    count: u64,
}

impl RunningStats {
    /// Add one observation.
    #[inline]
    pub fn update(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    /// Running mean (0 before any update).
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Population standard deviation; `1.0` when degenerate.
    pub fn scale(&self) -> f64 {
        if self.count < 2 {
            return 1.0;
        }
        let std = (self.m2 / self.count as f64).sqrt();
        if std < MIN_STD {
            1.0
        } else {
            std
        }
    }

    /// Observations seen.
    pub fn count(&self) -> u64 {
        self.count
    }
}

/// Median imputer followed by a standard scaler, fitted per column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabularPreprocessor {
    medians: Vec<f64>,
    means: Vec<f64>,
    scales: Vec<f64>,
}

impl TabularPreprocessor {
    /// Fit on `[n_rows, n_features]` training data (NaN = missing).
    pub fn fit(data: ArrayView2<'_, f64>) -> Result<Self> {
        if data.nrows() == 0 {
            return Err(PipelineError::InsufficientData(
                "cannot fit preprocessing on zero rows".to_string(),
            ));
        }

        let mut medians = Vec::with_capacity(data.ncols());
        let mut means = Vec::with_capacity(data.ncols());
        let mut scales = Vec::with_capacity(data.ncols());

        for column in data.axis_iter(Axis(1)) {
            let observed: Vec<f64> = column.iter().copied().filter(|v| v.is_finite()).collect();
            let fill = if observed.is_empty() { 0.0 } else { median(&observed) };

            let mut stats = RunningStats::default();
            for &v in column {
                stats.update(if v.is_finite() { v } else { fill });
            }

            medians.push(fill);
            means.push(stats.mean());
            scales.push(stats.scale());
        }

        Ok(Self {
            medians,
            means,
            scales,
        })
    }

    /// Number of input columns.
    pub fn n_features(&self) -> usize {
        self.means.len()
    }

    /// Transform one row.
    pub fn transform_row(&self, row: ArrayView1<'_, f64>) -> Array1<f64> {
        row.iter()
            .zip(&self.medians)
            .zip(self.means.iter().zip(&self.scales))
            .map(|((&v, &fill), (&mean, &scale))| {
                let v = if v.is_finite() { v } else { fill };
                (v - mean) / scale
            })
            .collect()
    }

    /// Transform `[n_rows, n_features]` data.
    pub fn transform(&self, data: ArrayView2<'_, f64>) -> Array2<f64> {
        let mut out = Array2::zeros(data.raw_dim());
        for (mut dst, src) in out.rows_mut().into_iter().zip(data.rows()) {
            dst.assign(&self.transform_row(src));
        }
        out
    }
}

/// One global z-score over all sequence values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SequenceStandardizer {
    pub mean: f32,
    pub scale: f32,
}

impl Default for SequenceStandardizer {
    fn default() -> Self {
        Self {
            mean: 0.0,
            scale: 1.0,
        }
    }
}

impl SequenceStandardizer {
    /// Fit on the selected rows of `[n, L]` sequences.
    pub fn fit(sequences: ArrayView2<'_, f32>) -> Self {
        let mut stats = RunningStats::default();
        for &v in sequences {
            stats.update(v as f64);
        }
        Self {
            mean: stats.mean() as f32,
            scale: stats.scale() as f32,
        }
    }

    /// Standardize one value.
    #[inline]
    pub fn apply(&self, value: f32) -> f32 {
        (value - self.mean) / self.scale
    }
}
