//! Trace Validation Module
//!
//! Checks every simulated or ingested CGM trace, and the features reduced
//! from it, before anything is persisted.
//!
//! # Checks
//!
//! | Check | Fails when |
//! |-------|------------|
//! | `timestamp_ordering` | a reading is not strictly later than the previous one |
//! | `timestamp_cadence` | a gap differs from the sensor interval |
//! | `trace_length` | length is not `days × samples_per_day` |
//! | `missing_fraction` | (warning) too many dropped readings |
//! | `<feature name>` | an aggregate is NaN or infinite |
//!
//! # Usage
//!
//! ```
//! use cgm_risk::simulation::Timeline;
//! use cgm_risk::trace::Trace;
//! use cgm_risk::validation::TraceValidator;
//!
//! let timeline = Timeline::new(Timeline::default_start(), 15);
//! let times = timeline.timestamps(1);
//! let trace = Trace::from_glucose(&times, &vec![Some(110.0); times.len()]);
//!
//! let report = TraceValidator::new(timeline).validate_trace(&trace, Some(1));
//! assert!(report.is_clean());
//! ```

use crate::features::{GlycemicFeatures, FEATURE_NAMES};
use crate::simulation::Timeline;
use crate::trace::Trace;
use chrono::{Duration, NaiveDateTime};
use std::fmt;

/// Outcome of one named check.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    Pass,
    /// Usable, but worth logging
    Warn(String),
    /// The trace must not reach the dataset
    Fail(String),
}

impl fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckOutcome::Pass => write!(f, "ok"),
            CheckOutcome::Warn(msg) => write!(f, "warning, {msg}"),
            CheckOutcome::Fail(msg) => write!(f, "failed, {msg}"),
        }
    }
}

/// Named check outcomes for one trace.
#[derive(Debug, Clone, Default)]
pub struct TraceReport {
    checks: Vec<(&'static str, CheckOutcome)>,
}

impl TraceReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, check: &'static str, outcome: CheckOutcome) {
        self.checks.push((check, outcome));
    }

    /// True when every check passed without warnings.
    pub fn is_clean(&self) -> bool {
        self.checks.iter().all(|(_, o)| *o == CheckOutcome::Pass)
    }

    pub fn has_failures(&self) -> bool {
        self.checks.iter().any(|(_, o)| matches!(o, CheckOutcome::Fail(_)))
    }

    /// `"check: message"` for every warning.
    pub fn warnings(&self) -> Vec<String> {
        self.checks
            .iter()
            .filter_map(|(name, o)| match o {
                CheckOutcome::Warn(msg) => Some(format!("{name}: {msg}")),
                _ => None,
            })
            .collect()
    }

    /// `"check: message"` for every failure.
    pub fn failures(&self) -> Vec<String> {
        self.checks
            .iter()
            .filter_map(|(name, o)| match o {
                CheckOutcome::Fail(msg) => Some(format!("{name}: {msg}")),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

impl fmt::Display for TraceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let passed = self
            .checks
            .iter()
            .filter(|(_, o)| *o == CheckOutcome::Pass)
            .count();
        write!(f, "{passed}/{} trace checks passed", self.checks.len())?;
        for (name, outcome) in self.checks.iter().filter(|(_, o)| *o != CheckOutcome::Pass) {
            write!(f, "; {name} {outcome}")?;
        }
        Ok(())
    }
}

/// Validates traces against the sensor timeline.
#[derive(Debug, Clone)]
pub struct TraceValidator {
    timeline: Timeline,

    /// Missing fraction above which a warning is raised
    pub max_missing_fraction: f64,
}

impl TraceValidator {
    pub fn new(timeline: Timeline) -> Self {
        Self {
            timeline,
            max_missing_fraction: 0.05,
        }
    }

    /// Ordering, cadence, length (when `expected_days` is given) and
    /// missingness of one trace.
    pub fn validate_trace(&self, trace: &Trace, expected_days: Option<usize>) -> TraceReport {
        let mut report = check_timestamps(
            &trace.timestamps(),
            Duration::minutes(i64::from(self.timeline.interval_minutes)),
        );

        if let Some(days) = expected_days {
            let expected = self.timeline.total_samples(days);
            let outcome = if trace.len() == expected {
                CheckOutcome::Pass
            } else {
                CheckOutcome::Fail(format!(
                    "{days} days need {expected} readings, trace has {}",
                    trace.len()
                ))
            };
            report.record("trace_length", outcome);
        }

        let missing = trace.missing_fraction();
        let outcome = if missing >= 1.0 && !trace.is_empty() {
            CheckOutcome::Warn("sensor reported no glucose at all".to_string())
        } else if missing > self.max_missing_fraction {
            CheckOutcome::Warn(format!(
                "{:.1}% of readings dropped (limit {:.1}%)",
                missing * 100.0,
                self.max_missing_fraction * 100.0
            ))
        } else {
            CheckOutcome::Pass
        };
        report.record("missing_fraction", outcome);

        report
    }
}

/// One check per aggregate, failing on NaN or infinite values.
pub fn check_features(features: &GlycemicFeatures) -> TraceReport {
    let mut report = TraceReport::new();
    for (name, value) in FEATURE_NAMES.into_iter().zip(features.to_array()) {
        let outcome = if value.is_finite() {
            CheckOutcome::Pass
        } else {
            CheckOutcome::Fail(format!("value is {value}"))
        };
        report.record(name, outcome);
    }
    report
}

/// Strictly increasing readings at a fixed `interval`.
pub fn check_timestamps(timestamps: &[NaiveDateTime], interval: Duration) -> TraceReport {
    let mut report = TraceReport::new();

    if timestamps.is_empty() {
        report.record("timestamp_ordering", CheckOutcome::Warn("empty trace".to_string()));
        return report;
    }

    if let Some(i) = (1..timestamps.len()).find(|&i| timestamps[i] <= timestamps[i - 1]) {
        report.record(
            "timestamp_ordering",
            CheckOutcome::Fail(format!(
                "reading {i} at {} does not follow {}",
                timestamps[i],
                timestamps[i - 1]
            )),
        );
        return report;
    }
    report.record("timestamp_ordering", CheckOutcome::Pass);

    let off_cadence = timestamps
        .windows(2)
        .filter(|w| w[1] - w[0] != interval)
        .count();
    let outcome = if off_cadence == 0 {
        CheckOutcome::Pass
    } else {
        CheckOutcome::Fail(format!(
            "{off_cadence} gaps differ from the {}-minute sensor interval",
            interval.num_minutes()
        ))
    };
    report.record("timestamp_cadence", outcome);

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minutes(m: i64) -> Duration {
        Duration::minutes(m)
    }

    #[test]
    fn test_fixed_cadence_is_clean() {
        let times = Timeline::default().timestamps(1);
        let report = check_timestamps(&times, minutes(15));
        assert!(report.is_clean());
        assert_eq!(report.len(), 2);
    }

    #[test]
    fn test_repeated_timestamp_fails_ordering() {
        let mut times = Timeline::default().timestamps(1);
        times[5] = times[4];
        let report = check_timestamps(&times, minutes(15));
        assert!(report.has_failures());
        assert!(report.failures()[0].starts_with("timestamp_ordering"));
    }

    #[test]
    fn test_dropped_reading_fails_cadence() {
        let mut times = Timeline::default().timestamps(1);
        times.remove(10);
        let report = check_timestamps(&times, minutes(15));
        assert!(report.has_failures());
        assert!(report.failures()[0].contains("1 gaps"));
    }

    #[test]
    fn test_trace_length_and_missing() {
        let timeline = Timeline::default();
        let times = timeline.timestamps(1);
        let mut values = vec![Some(110.0); times.len()];
        for v in values.iter_mut().take(20) {
            *v = None;
        }
        let trace = Trace::from_glucose(&times, &values);
        let report = TraceValidator::new(timeline).validate_trace(&trace, Some(2));

        assert!(report.has_failures());
        assert_eq!(report.warnings().len(), 1);
        assert!(report.warnings()[0].starts_with("missing_fraction"));
    }

    #[test]
    fn test_non_finite_features_fail() {
        assert!(check_features(&GlycemicFeatures::default()).is_clean());

        let features = GlycemicFeatures {
            skewness: f64::NAN,
            cov: f64::INFINITY,
            ..GlycemicFeatures::default()
        };
        let failures = check_features(&features).failures();
        assert_eq!(failures.len(), 2);
        assert!(failures.iter().any(|f| f.starts_with("skewness")));
        assert!(failures.iter().any(|f| f.starts_with("cov")));
    }

    #[test]
    fn test_report_display() {
        let mut report = TraceReport::new();
        report.record("timestamp_ordering", CheckOutcome::Pass);
        report.record("missing_fraction", CheckOutcome::Warn("7.0% of readings dropped".to_string()));
        assert_eq!(
            report.to_string(),
            "1/2 trace checks passed; missing_fraction warning, 7.0% of readings dropped"
        );
    }
}
