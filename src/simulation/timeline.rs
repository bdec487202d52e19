//! Fixed-cadence calendar timestamps.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Minutes in one day.
pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// Generates evenly spaced timestamps over a multi-day window.
///
/// # Example
///
/// ```
/// use cgm_risk::simulation::Timeline;
///
/// let timeline = Timeline::new(Timeline::default_start(), 15);
/// assert_eq!(timeline.samples_per_day(), 96);
/// assert_eq!(timeline.timestamps(2).len(), 192);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    /// First timestamp of every generated window
    pub start: NaiveDateTime,

    /// Sampling interval in minutes
    pub interval_minutes: u32,
}

impl Timeline {
    /// Create a timeline starting at `start` with the given cadence.
    pub fn new(start: NaiveDateTime, interval_minutes: u32) -> Self {
        Self {
            start,
            interval_minutes,
        }
    }

    /// Fixed default origin (2024-01-01 00:00).
    pub fn default_start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap_or_default()
    }

    /// Number of samples in one day at this cadence.
    #[inline]
    pub fn samples_per_day(&self) -> usize {
        (MINUTES_PER_DAY / self.interval_minutes.max(1)) as usize
    }

    /// Total number of samples for `days` days.
    #[inline]
    pub fn total_samples(&self, days: usize) -> usize {
        days * self.samples_per_day()
    }

    /// Timestamp of sample `index`.
    #[inline]
    pub fn at(&self, index: usize) -> NaiveDateTime {
        self.start + Duration::minutes(index as i64 * self.interval_minutes as i64)
    }

    /// Seconds elapsed since `start` at sample `index`.
    #[inline]
    pub fn offset_seconds(&self, index: usize) -> f64 {
        index as f64 * self.interval_minutes as f64 * 60.0
    }

    /// All timestamps for a `days`-day window.
    pub fn timestamps(&self, days: usize) -> Vec<NaiveDateTime> {
        (0..self.total_samples(days)).map(|i| self.at(i)).collect()
    }
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new(Self::default_start(), 15)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strictly_increasing_fixed_cadence() {
        let timeline = Timeline::default();
        let times = timeline.timestamps(3);

        assert_eq!(times.len(), 3 * 96);
        for pair in times.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::minutes(15));
        }
    }

    #[test]
    fn test_other_cadence() {
        let timeline = Timeline::new(Timeline::default_start(), 5);
        assert_eq!(timeline.samples_per_day(), 288);
        assert_eq!(timeline.offset_seconds(2), 600.0);
    }
}
