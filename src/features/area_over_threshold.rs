//! Rolling-window maximum area over a glucose threshold.
//!
//! For a window length `W` minutes, the statistic is
//!
//! ```text
//! max over windows [t_l, t_r] with t_r - t_l <= W of  Σ_{i=l..=r} max(g_i - θ, 0) · dt_i
//! ```
//!
//! where `dt_i` is the forward gap to the next sample in minutes and the last
//! sample uses the median gap. The result is in `mg/dL · minutes`.
//!
//! [`max_area_over_threshold`] runs a monotonic two-pointer sweep in
//! amortized O(n). [`max_area_over_threshold_naive`] recomputes every window
//! from scratch in O(n²) and exists as a test oracle.

use super::statistics::median;
use crate::trace::{fill_missing_nan, Trace};
use chrono::NaiveDateTime;

/// Maximum area over `threshold` across all windows of `window_minutes`.
///
/// `values` may encode missing readings as `NaN`; they are forward then
/// backward filled first. An empty or all-missing series, or fewer than two
/// timestamps, returns `0.0`. So does a negative or NaN window.
pub fn max_area_over_threshold(
    values: &[f64],
    timestamps: &[NaiveDateTime],
    threshold: f64,
    window_minutes: f64,
) -> f64 {
    if window_minutes.is_nan() || window_minutes < 0.0 {
        return 0.0;
    }
    match prepare(values, timestamps, threshold) {
        Some(prepared) => prepared.sweep(window_minutes),
        None => 0.0,
    }
}

/// O(n²) reference for [`max_area_over_threshold`].
pub fn max_area_over_threshold_naive(
    values: &[f64],
    timestamps: &[NaiveDateTime],
    threshold: f64,
    window_minutes: f64,
) -> f64 {
    if window_minutes.is_nan() || window_minutes < 0.0 {
        return 0.0;
    }
    let Some(prepared) = prepare(values, timestamps, threshold) else {
        return 0.0;
    };

    let Prepared {
        minutes,
        contributions,
    } = prepared;
    let mut best = 0.0_f64;
    for right in 0..contributions.len() {
        let sum: f64 = (0..=right)
            .filter(|&left| minutes[right] - minutes[left] <= window_minutes)
            .map(|left| contributions[left])
            .sum();
        best = best.max(sum);
    }
    best
}

/// [`max_area_over_threshold`] over the glucose channel of a trace.
pub fn trace_area_over_threshold(trace: &Trace, threshold: f64, window_minutes: f64) -> f64 {
    let values: Vec<f64> = trace
        .values()
        .into_iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect();
    max_area_over_threshold(&values, &trace.timestamps(), threshold, window_minutes)
}

struct Prepared {
    /// Sample times in minutes since the first sample
    minutes: Vec<f64>,
    /// Threshold excess times forward-looking dt, per sample
    contributions: Vec<f64>,
}

impl Prepared {
    fn sweep(&self, window_minutes: f64) -> f64 {
        let mut best = 0.0_f64;
        let mut running = 0.0_f64;
        let mut left = 0usize;

        for right in 0..self.contributions.len() {
            running += self.contributions[right];
            while left < right && self.minutes[right] - self.minutes[left] > window_minutes {
                running -= self.contributions[left];
                left += 1;
            }
            best = best.max(running);
        }

        best
    }
}

fn prepare(values: &[f64], timestamps: &[NaiveDateTime], threshold: f64) -> Option<Prepared> {
    let n = values.len().min(timestamps.len());
    if n < 2 {
        return None;
    }
    let filled = fill_missing_nan(&values[..n])?;

    let origin = timestamps[0];
    let minutes: Vec<f64> = timestamps[..n]
        .iter()
        .map(|t| (*t - origin).num_seconds() as f64 / 60.0)
        .collect();

    let mut dt: Vec<f64> = minutes.windows(2).map(|w| w[1] - w[0]).collect();
    dt.push(median(&dt));

    let contributions = filled
        .iter()
        .zip(&dt)
        .map(|(g, d)| (g - threshold).max(0.0) * d)
        .collect();

    Some(Prepared {
        minutes,
        contributions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::Timeline;
    use approx::assert_abs_diff_eq;

    fn times(n: usize) -> Vec<NaiveDateTime> {
        Timeline::default().timestamps(1)[..n].to_vec()
    }

    #[test]
    fn test_below_threshold_is_zero() {
        let values = vec![150.0; 48];
        assert_eq!(max_area_over_threshold(&values, &times(48), 180.0, 120.0), 0.0);
    }

    #[test]
    fn test_pulse_equals_delta_times_duration() {
        // 8 samples at threshold + 20 span exactly 120 minutes of dt.
        let mut values = vec![100.0; 48];
        for v in &mut values[10..18] {
            *v = 200.0;
        }
        let area = max_area_over_threshold(&values, &times(48), 180.0, 120.0);
        assert_abs_diff_eq!(area, 20.0 * 120.0, epsilon = 1e-9);
    }

    #[test]
    fn test_degenerate_inputs() {
        let t = times(4);
        assert_eq!(max_area_over_threshold(&[], &t, 180.0, 60.0), 0.0);
        assert_eq!(max_area_over_threshold(&[250.0], &t[..1], 180.0, 60.0), 0.0);
        assert_eq!(
            max_area_over_threshold(&[f64::NAN; 4], &t, 180.0, 60.0),
            0.0
        );
    }

    #[test]
    fn test_missing_values_filled_before_area() {
        let t = times(4);
        let values = [f64::NAN, 190.0, f64::NAN, 100.0];
        // Filled: 190, 190, 190, 100 -> three samples of 10 mg/dL for 15 min.
        let area = max_area_over_threshold(&values, &t, 180.0, 600.0);
        assert_abs_diff_eq!(area, 450.0, epsilon = 1e-9);
    }

    #[test]
    fn test_sweep_matches_naive() {
        let values: Vec<f64> = (0..96)
            .map(|i| 170.0 + 30.0 * ((i as f64) * 0.37).sin() + (i % 7) as f64)
            .collect();
        let t = times(96);
        for window in [0.0, 15.0, 45.0, 120.0, 240.0, 2000.0] {
            let fast = max_area_over_threshold(&values, &t, 180.0, window);
            let slow = max_area_over_threshold_naive(&values, &t, 180.0, window);
            assert_abs_diff_eq!(fast, slow, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_negative_or_nan_window_is_zero() {
        let t = times(3);
        let values = [200.0; 3];
        for window in [-1.0, -0.001, f64::NAN] {
            assert_eq!(max_area_over_threshold(&values, &t, 180.0, window), 0.0);
            assert_eq!(max_area_over_threshold_naive(&values, &t, 180.0, window), 0.0);
        }
        // Zero still covers the single-sample windows.
        assert_abs_diff_eq!(max_area_over_threshold(&values, &t, 180.0, 0.0), 300.0, epsilon = 1e-9);
    }
}
