//! CGM traces.
//!
//! A [`Trace`] is the ordered list of `(timestamp, channel code, value)`
//! samples recorded for one patient. Glucose readings use channel code
//! [`GLUCOSE_CODE`]; a missing reading is stored as `None` and written as an
//! empty CSV field.
//!
//! Every statistic downstream runs on the *filled* glucose series produced by
//! [`fill_missing`]: forward fill, then backward fill for a leading gap.

use crate::error::Result;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

/// Channel code of CGM glucose readings.
pub const GLUCOSE_CODE: u16 = 58;

/// One CGM reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Reading time (naive local time, fixed cadence)
    pub timestamp: NaiveDateTime,

    /// Channel code ([`GLUCOSE_CODE`] for glucose)
    pub code: u16,

    /// Glucose value in mg/dL, `None` when the reading is missing
    pub value: Option<f64>,
}

/// Time-ordered CGM samples for one patient.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trace {
    samples: Vec<Sample>,
}

impl Trace {
    /// Wrap already ordered samples.
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    /// Build a glucose trace from parallel timestamp and value slices.
    ///
    /// The shorter of the two slices bounds the trace length.
    pub fn from_glucose(timestamps: &[NaiveDateTime], values: &[Option<f64>]) -> Self {
        let samples = timestamps
            .iter()
            .zip(values)
            .map(|(&timestamp, &value)| Sample {
                timestamp,
                code: GLUCOSE_CODE,
                value,
            })
            .collect();
        Self { samples }
    }

    /// Number of samples.
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when the trace holds no samples.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// All samples in time order.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Mutable access for in-place perturbation (event injection).
    pub fn samples_mut(&mut self) -> &mut [Sample] {
        &mut self.samples
    }

    /// Glucose-channel samples only.
    pub fn glucose(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter().filter(|s| s.code == GLUCOSE_CODE)
    }

    /// Timestamps of the glucose channel.
    pub fn timestamps(&self) -> Vec<NaiveDateTime> {
        self.glucose().map(|s| s.timestamp).collect()
    }

    /// Raw glucose values (missing = `None`).
    pub fn values(&self) -> Vec<Option<f64>> {
        self.glucose().map(|s| s.value).collect()
    }

    /// Glucose values with missing readings filled.
    ///
    /// Returns `None` when the trace holds no observed glucose value.
    pub fn filled_values(&self) -> Option<Vec<f64>> {
        fill_missing(&self.values())
    }

    /// Fraction of glucose readings that are missing.
    pub fn missing_fraction(&self) -> f64 {
        let (total, missing) = self
            .glucose()
            .fold((0usize, 0usize), |(t, m), s| (t + 1, m + s.value.is_none() as usize));
        if total == 0 {
            0.0
        } else {
            missing as f64 / total as f64
        }
    }

    /// Write the trace as `timestamp,code,value` CSV.
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::Writer::from_writer(File::create(path)?);
        for sample in &self.samples {
            writer.serialize(sample)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Read a trace written by [`Trace::write_csv`].
    pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let samples = reader
            .deserialize()
            .collect::<std::result::Result<Vec<Sample>, csv::Error>>()?;
        Ok(Self { samples })
    }
}

/// Forward-fill then backward-fill missing values.
///
/// Returns `None` if no value is observed at all (including an empty input).
pub fn fill_missing(values: &[Option<f64>]) -> Option<Vec<f64>> {
    let first = values.iter().find_map(|v| *v)?;

    let mut last = first;
    let filled = values
        .iter()
        .map(|v| {
            if let Some(x) = v {
                last = *x;
            }
            last
        })
        .collect();

    Some(filled)
}

/// [`fill_missing`] for series that encode missing readings as `NaN`.
pub fn fill_missing_nan(values: &[f64]) -> Option<Vec<f64>> {
    let as_options: Vec<Option<f64>> = values
        .iter()
        .map(|&v| if v.is_nan() { None } else { Some(v) })
        .collect();
    fill_missing(&as_options)
}
