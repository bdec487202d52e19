//! Glycemic feature aggregation.
//!
//! Reduces one patient's trace to a fixed statistical fingerprint used by
//! the tabular base learner.
//!
//! # Canonical Feature Order
//!
//! | Index | Name | Description |
//! |-------|------|-------------|
//! | 0 | `mean_glucose` | Mean of the filled series |
//! | 1 | `std_glucose` | Population standard deviation |
//! | 2 | `cov` | Coefficient of variation (`std / mean`) |
//! | 3 | `iqr` | 75th minus 25th percentile |
//! | 4 | `mean_abs_slope` | Mean absolute first difference |
//! | 5 | `max_abs_slope` | Max absolute first difference |
//! | 6 | `skewness` | Third standardized moment |
//! | 7 | `kurtosis` | Fourth standardized moment (not excess) |
//! | 8 | `frac_above_high` | Fraction of samples above the high threshold |
//! | 9 | `circadian_diff` | Absolute day/night mean difference |
//! | 10 | `diff_variance` | Variance of first differences (entropy proxy) |
//! | 11 | `median_rise` | Median of qualifying lagged rises |
//! | 12 | `short_spikes` | Spike runs ending after one step |
//! | 13 | `sustained_spikes` | Spike runs of three consecutive steps |
//!
//! The same order is used by the persisted feature table, the tabular
//! preprocessor and the predictor; [`FEATURE_NAMES`] is the single source of
//! truth.
//!
//! # Modules
//!
//! - `statistics`: moments and percentiles
//! - `area_over_threshold`: rolling-window maximum area over a threshold

pub mod area_over_threshold;
pub mod statistics;

pub use area_over_threshold::{
    max_area_over_threshold, max_area_over_threshold_naive, trace_area_over_threshold,
};

use crate::trace::Trace;
use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use statistics::{central_moment, diff, mean, percentile_sorted, sorted, variance, MOMENT_EPSILON};

/// Number of aggregate features.
pub const FEATURE_COUNT: usize = 14;

/// Canonical feature column order.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "mean_glucose",
    "std_glucose",
    "cov",
    "iqr",
    "mean_abs_slope",
    "max_abs_slope",
    "skewness",
    "kurtosis",
    "frac_above_high",
    "circadian_diff",
    "diff_variance",
    "median_rise",
    "short_spikes",
    "sustained_spikes",
];

/// Fixed statistical fingerprint of one trace.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GlycemicFeatures {
    pub mean_glucose: f64,
    pub std_glucose: f64,
    pub cov: f64,
    pub iqr: f64,
    pub mean_abs_slope: f64,
    pub max_abs_slope: f64,
    pub skewness: f64,
    pub kurtosis: f64,
    pub frac_above_high: f64,
    pub circadian_diff: f64,
    pub diff_variance: f64,
    pub median_rise: f64,
    pub short_spikes: u32,
    pub sustained_spikes: u32,
}

impl GlycemicFeatures {
    /// Features as an array in [`FEATURE_NAMES`] order.
    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.mean_glucose,
            self.std_glucose,
            self.cov,
            self.iqr,
            self.mean_abs_slope,
            self.max_abs_slope,
            self.skewness,
            self.kurtosis,
            self.frac_above_high,
            self.circadian_diff,
            self.diff_variance,
            self.median_rise,
            self.short_spikes as f64,
            self.sustained_spikes as f64,
        ]
    }

    /// Inverse of [`GlycemicFeatures::to_array`].
    ///
    /// Count features are rounded to the nearest non-negative integer.
    pub fn from_array(values: &[f64; FEATURE_COUNT]) -> Self {
        Self {
            mean_glucose: values[0],
            std_glucose: values[1],
            cov: values[2],
            iqr: values[3],
            mean_abs_slope: values[4],
            max_abs_slope: values[5],
            skewness: values[6],
            kurtosis: values[7],
            frac_above_high: values[8],
            circadian_diff: values[9],
            diff_variance: values[10],
            median_rise: values[11],
            short_spikes: values[12].round().max(0.0) as u32,
            sustained_spikes: values[13].round().max(0.0) as u32,
        }
    }
}

/// One row of the persisted feature table.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRecord {
    /// Patient identifier
    pub patient_id: String,

    /// Aggregate statistics
    pub features: GlycemicFeatures,

    /// Binary event label (1 = event-positive)
    pub label: u8,
}

impl FeatureRecord {
    /// Column header: `patient_id`, the features in canonical order, `label`.
    pub fn header() -> Vec<String> {
        std::iter::once("patient_id")
            .chain(FEATURE_NAMES)
            .chain(std::iter::once("label"))
            .map(str::to_string)
            .collect()
    }
}

/// Configuration for feature aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Glucose level above which time is counted as high (mg/dL)
    pub high_threshold: f64,

    /// First hour (inclusive) counted as daytime
    pub day_start_hour: u32,

    /// Last hour (inclusive) counted as daytime
    pub day_end_hour: u32,

    /// Lag in samples for the local rise statistic
    pub rise_lag: usize,

    /// Minimum lagged rise that qualifies (mg/dL)
    pub rise_threshold: f64,

    /// Absolute slope above which a step is flagged as a spike (mg/dL per sample)
    pub spike_slope_threshold: f64,

    /// Length of the constant 100 mg/dL series used for an all-missing trace
    pub fallback_length: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            high_threshold: 140.0,
            day_start_hour: 8,
            day_end_hour: 20,
            rise_lag: 3,
            rise_threshold: 12.0,
            spike_slope_threshold: 15.0,
            fallback_length: 96,
        }
    }
}

impl FeatureConfig {
    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.day_start_hour > 23 || self.day_end_hour > 23 {
            return Err("day hours must be within 0..=23".to_string());
        }
        if self.day_start_hour > self.day_end_hour {
            return Err("day_start_hour must be <= day_end_hour".to_string());
        }
        if self.rise_lag == 0 {
            return Err("rise_lag must be > 0".to_string());
        }
        if self.fallback_length == 0 {
            return Err("fallback_length must be > 0".to_string());
        }
        Ok(())
    }
}

/// Fallback glucose level for an all-missing trace.
pub const FALLBACK_GLUCOSE: f64 = 100.0;

/// Computes [`GlycemicFeatures`] from traces.
#[derive(Debug, Clone, Default)]
pub struct FeatureAggregator {
    config: FeatureConfig,
}

impl FeatureAggregator {
    /// Create an aggregator.
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    /// Aggregation parameters.
    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Aggregate the glucose channel of `trace`.
    pub fn aggregate(&self, trace: &Trace) -> GlycemicFeatures {
        let values = trace
            .filled_values()
            .unwrap_or_else(|| vec![FALLBACK_GLUCOSE; self.config.fallback_length]);
        self.aggregate_values(&values, &trace.timestamps())
    }

    /// Aggregate an already filled series.
    ///
    /// `timestamps` drive the day/night split only; when they are shorter
    /// than `values` the uncovered samples are left out of that split.
    pub fn aggregate_values(&self, values: &[f64], timestamps: &[NaiveDateTime]) -> GlycemicFeatures {
        if values.is_empty() {
            let fallback = vec![FALLBACK_GLUCOSE; self.config.fallback_length];
            return self.aggregate_values(&fallback, timestamps);
        }
        let cfg = &self.config;
        let n = values.len() as f64;

        let mean_glucose = mean(values);
        let std_glucose = variance(values).sqrt();
        let cov = if mean_glucose != 0.0 {
            std_glucose / mean_glucose
        } else {
            0.0
        };

        let ordered = sorted(values);
        let iqr = percentile_sorted(&ordered, 75.0) - percentile_sorted(&ordered, 25.0);

        let steps = diff(values);
        let abs_slopes: Vec<f64> = steps.iter().map(|d| d.abs()).collect();
        let mean_abs_slope = mean(&abs_slopes);
        let max_abs_slope = abs_slopes.iter().copied().fold(0.0_f64, f64::max);

        let skewness = central_moment(values, mean_glucose, 3) / (std_glucose.powi(3) + MOMENT_EPSILON);
        let kurtosis = central_moment(values, mean_glucose, 4) / (std_glucose.powi(4) + MOMENT_EPSILON);

        let frac_above_high = values.iter().filter(|&&v| v > cfg.high_threshold).count() as f64 / n;

        let circadian_diff = self.circadian_difference(values, timestamps, mean_glucose);

        let diff_variance = if values.len() > 2 { variance(&steps) } else { 0.0 };

        let median_rise = self.median_rise(values);
        let (short_spikes, sustained_spikes) = self.spike_counts(&abs_slopes);

        GlycemicFeatures {
            mean_glucose,
            std_glucose,
            cov,
            iqr,
            mean_abs_slope,
            max_abs_slope,
            skewness,
            kurtosis,
            frac_above_high,
            circadian_diff,
            diff_variance,
            median_rise,
            short_spikes,
            sustained_spikes,
        }
    }

    fn circadian_difference(&self, values: &[f64], timestamps: &[NaiveDateTime], overall: f64) -> f64 {
        let (mut day_sum, mut day_n, mut night_sum, mut night_n) = (0.0, 0usize, 0.0, 0usize);
        for (v, t) in values.iter().zip(timestamps) {
            let hour = t.hour();
            if hour >= self.config.day_start_hour && hour <= self.config.day_end_hour {
                day_sum += v;
                day_n += 1;
            } else {
                night_sum += v;
                night_n += 1;
            }
        }
        let day_mean = if day_n > 0 { day_sum / day_n as f64 } else { overall };
        let night_mean = if night_n > 0 {
            night_sum / night_n as f64
        } else {
            overall
        };
        (day_mean - night_mean).abs()
    }

    fn median_rise(&self, values: &[f64]) -> f64 {
        let lag = self.config.rise_lag;
        let rises: Vec<f64> = values
            .windows(lag + 1)
            .map(|w| w[lag] - w[0])
            .filter(|&rise| rise > self.config.rise_threshold)
            .collect();
        if rises.is_empty() {
            0.0
        } else {
            statistics::median(&rises)
        }
    }

    /// Count spike runs on the thresholded absolute-slope indicator.
    ///
    /// A short spike is a flagged step followed by an unflagged one; a
    /// sustained spike is any three consecutive flagged steps.
    fn spike_counts(&self, abs_slopes: &[f64]) -> (u32, u32) {
        let flags: Vec<bool> = abs_slopes
            .iter()
            .map(|&s| s > self.config.spike_slope_threshold)
            .collect();
        let short = flags.windows(2).filter(|w| w[0] && !w[1]).count() as u32;
        let sustained = flags.windows(3).filter(|w| w[0] && w[1] && w[2]).count() as u32;
        (short, sustained)
    }
}
