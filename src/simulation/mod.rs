//! Synthetic CGM trace generation.
//!
//! The [`PhysiologySimulator`] composes a glucose trace from independent
//! effects, applied in this order:
//!
//! ```text
//! base level ~ N(baseline_mean, 12) clipped to [70, 140]
//!   + per-sample N(base, 8) + circadian sinusoid (24h period)
//!   + meal impulses (2-4 per day, rise then exponential decay)
//!   - exercise dip            (p = 0.45, one event)
//!   - insulin impulses        (p = 0.45, 0..2·days events)
//!   + measurement noise N(0, 5) + linear drift
//!   → 1% of samples dropped, values rounded to 2 decimals
//! ```
//!
//! All randomness comes from the RNG handle passed in by the caller. A
//! cohort shares one seeded stream consumed in generation order, so a fixed
//! seed reproduces the whole cohort.

pub mod timeline;

pub use timeline::{Timeline, MINUTES_PER_DAY};

use crate::trace::Trace;
use chrono::NaiveDateTime;
use rand::seq::index;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

// Meal impulse shape
const MEAL_RISE_RATE: f64 = 0.6;
const MEAL_DECAY_RATE: f64 = 0.35;
const MEAL_JITTER_SD: f64 = 0.12;
const MEAL_RISE_LEN: (usize, usize) = (1, 3);
const MEAL_IMPULSE_LEN: (usize, usize) = (5, 12);

// Exercise dip
const EXERCISE_LEN: (usize, usize) = (4, 12);
const EXERCISE_DROP: (f64, f64) = (6.0, 3.0);

// Insulin impulse
const INSULIN_LEN: (usize, usize) = (6, 14);
const INSULIN_DROP: (f64, f64) = (16.0, 7.0);
const INSULIN_DECAY_RATE: f64 = 0.28;

/// Parameters of the physiological simulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Sampling interval in minutes
    pub interval_minutes: u32,

    /// Timestamp of the first sample of every trace
    #[serde(default = "Timeline::default_start")]
    pub start: NaiveDateTime,

    /// Circadian amplitude range (uniform)
    pub circadian_amplitude: [f64; 2],

    /// Standard deviation of the per-patient base level draw
    pub baseline_sd: f64,

    /// Clip range of the per-patient base level
    pub baseline_clip: [f64; 2],

    /// Standard deviation of per-sample values around the base level
    pub sample_sd: f64,

    /// Candidate meal counts per day (drawn uniformly)
    pub meals_per_day: Vec<usize>,

    /// Meal start window as fractions of the day
    pub meal_window: [f64; 2],

    /// Meal spike size N(mean, sd) for regular variability
    pub spike: [f64; 2],

    /// Meal spike size N(mean, sd) for high variability patients
    pub spike_high_variability: [f64; 2],

    /// Lower bound on any meal spike
    pub min_spike: f64,

    /// Probability of one exercise dip per trace
    pub exercise_probability: f64,

    /// Probability of insulin injections in a trace
    pub insulin_probability: f64,

    /// Residual measurement noise standard deviation
    pub measurement_sd: f64,

    /// Standard deviation of the end point of the linear drift
    pub drift_sd: f64,

    /// Per-sample probability of a missing reading
    pub missing_probability: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 15,
            start: Timeline::default_start(),
            circadian_amplitude: [3.0, 12.0],
            baseline_sd: 12.0,
            baseline_clip: [70.0, 140.0],
            sample_sd: 8.0,
            meals_per_day: vec![2, 3, 3, 4],
            meal_window: [0.2, 0.85],
            spike: [40.0, 25.0],
            spike_high_variability: [60.0, 30.0],
            min_spike: 5.0,
            exercise_probability: 0.45,
            insulin_probability: 0.45,
            measurement_sd: 5.0,
            drift_sd: 1.2,
            missing_probability: 0.01,
        }
    }
}

impl SimulationConfig {
    /// Timeline implied by this configuration.
    pub fn timeline(&self) -> Timeline {
        Timeline::new(self.start, self.interval_minutes)
    }

    /// Samples per simulated day.
    pub fn samples_per_day(&self) -> usize {
        self.timeline().samples_per_day()
    }

    /// Validate simulation parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.interval_minutes == 0 || MINUTES_PER_DAY % self.interval_minutes != 0 {
            return Err(format!(
                "interval_minutes ({}) must be > 0 and divide a day",
                self.interval_minutes
            ));
        }

        let ranges = [
            ("circadian_amplitude", self.circadian_amplitude),
            ("baseline_clip", self.baseline_clip),
            ("meal_window", self.meal_window),
        ];
        for (name, [lo, hi]) in ranges {
            if !(lo <= hi) {
                return Err(format!("{name} must satisfy min <= max"));
            }
        }

        if self.meal_window[0] < 0.0 || self.meal_window[1] > 1.0 {
            return Err("meal_window must lie within [0, 1]".to_string());
        }

        if self.meals_per_day.is_empty() {
            return Err("meals_per_day must not be empty".to_string());
        }

        let sds = [
            self.baseline_sd,
            self.sample_sd,
            self.spike[1],
            self.spike_high_variability[1],
            self.measurement_sd,
            self.drift_sd,
        ];
        if sds.iter().any(|sd| !sd.is_finite() || *sd < 0.0) {
            return Err("standard deviations must be finite and >= 0".to_string());
        }

        for (name, p) in [
            ("exercise_probability", self.exercise_probability),
            ("insulin_probability", self.insulin_probability),
            ("missing_probability", self.missing_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(format!("{name} must be in [0, 1]"));
            }
        }

        Ok(())
    }
}

/// Draw from N(mean, sd); degenerate `sd` collapses to the mean.
#[inline]
pub(crate) fn normal<R: Rng + ?Sized>(rng: &mut R, mean: f64, sd: f64) -> f64 {
    match Normal::new(mean, sd) {
        Ok(dist) => dist.sample(rng),
        Err(_) => mean,
    }
}

/// Synthetic glucose trace generator.
#[derive(Debug, Clone)]
pub struct PhysiologySimulator {
    config: SimulationConfig,
    timeline: Timeline,
}

impl Default for PhysiologySimulator {
    fn default() -> Self {
        Self::new(SimulationConfig::default())
    }
}

impl PhysiologySimulator {
    /// Create a simulator from configuration.
    pub fn new(config: SimulationConfig) -> Self {
        let timeline = config.timeline();
        Self { config, timeline }
    }

    /// Simulation parameters.
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Timeline used for every trace.
    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// Simulate `days` days of CGM readings for one patient.
    ///
    /// The returned trace has exactly `days × samples_per_day` samples.
    pub fn simulate<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        days: usize,
        baseline_mean: f64,
        high_variability: bool,
    ) -> Trace {
        let cfg = &self.config;
        let per_day = self.timeline.samples_per_day();
        let total = days * per_day;

        let [amp_lo, amp_hi] = cfg.circadian_amplitude;
        let amplitude = rng.gen_range(amp_lo..=amp_hi);
        let phase = rng.gen_range(0.0..2.0 * PI);

        let [clip_lo, clip_hi] = cfg.baseline_clip;
        let base = normal(rng, baseline_mean, cfg.baseline_sd).clamp(clip_lo, clip_hi);

        let mut glucose: Vec<f64> = (0..total)
            .map(|i| {
                let t = self.timeline.offset_seconds(i);
                let circadian = amplitude * (2.0 * PI * t / 86_400.0 + phase).sin();
                normal(rng, base, cfg.sample_sd) + circadian
            })
            .collect();

        self.add_meals(rng, &mut glucose, days, high_variability);
        self.add_exercise(rng, &mut glucose);
        self.add_insulin(rng, &mut glucose, days);

        for g in glucose.iter_mut() {
            *g += normal(rng, 0.0, cfg.measurement_sd);
        }

        let drift_end = normal(rng, 0.0, cfg.drift_sd);
        if total > 1 {
            for (i, g) in glucose.iter_mut().enumerate() {
                *g += drift_end * i as f64 / (total - 1) as f64;
            }
        }

        let values: Vec<Option<f64>> = glucose
            .into_iter()
            .map(|g| {
                if rng.gen::<f64>() < cfg.missing_probability {
                    None
                } else {
                    Some((g * 100.0).round() / 100.0)
                }
            })
            .collect();

        Trace::from_glucose(&self.timeline.timestamps(days), &values)
    }

    fn add_meals<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        glucose: &mut [f64],
        days: usize,
        high_variability: bool,
    ) {
        let cfg = &self.config;
        let per_day = self.timeline.samples_per_day();
        let total = glucose.len();
        let window_lo = (per_day as f64 * cfg.meal_window[0]) as usize;
        let window_hi = (per_day as f64 * cfg.meal_window[1]) as usize;
        let [spike_mean, spike_sd] = if high_variability {
            cfg.spike_high_variability
        } else {
            cfg.spike
        };

        for day in 0..days {
            let meals = cfg.meals_per_day[rng.gen_range(0..cfg.meals_per_day.len())];
            for _ in 0..meals {
                let start = day * per_day + rng.gen_range(window_lo..=window_hi);
                let spike = normal(rng, spike_mean, spike_sd).max(cfg.min_spike);
                let impulse_len = rng.gen_range(MEAL_IMPULSE_LEN.0..=MEAL_IMPULSE_LEN.1);
                let rise_len = rng.gen_range(MEAL_RISE_LEN.0..=MEAL_RISE_LEN.1);

                for k in 0..impulse_len {
                    let pos = start + k;
                    if pos >= total {
                        continue;
                    }
                    let factor = if k < rise_len {
                        1.0 - (-MEAL_RISE_RATE * (k + 1) as f64).exp()
                    } else {
                        (-MEAL_DECAY_RATE * (k - rise_len) as f64).exp()
                    };
                    glucose[pos] += spike * factor * (1.0 + normal(rng, 0.0, MEAL_JITTER_SD));
                }
            }
        }
    }

    fn add_exercise<R: Rng + ?Sized>(&self, rng: &mut R, glucose: &mut [f64]) {
        if glucose.is_empty() || rng.gen::<f64>() >= self.config.exercise_probability {
            return;
        }
        let total = glucose.len();
        let start = rng.gen_range(0..total);
        let len = rng.gen_range(EXERCISE_LEN.0..=EXERCISE_LEN.1);
        for pos in (start..start + len).filter(|&p| p < total) {
            glucose[pos] -= normal(rng, EXERCISE_DROP.0, EXERCISE_DROP.1);
        }
    }

    fn add_insulin<R: Rng + ?Sized>(&self, rng: &mut R, glucose: &mut [f64], days: usize) {
        if glucose.is_empty() || rng.gen::<f64>() >= self.config.insulin_probability {
            return;
        }
        let total = glucose.len();
        let injections = rng.gen_range(0..=days * 2).min(total);
        let starts = index::sample(rng, total, injections).into_vec();

        for start in starts {
            let len = rng.gen_range(INSULIN_LEN.0..=INSULIN_LEN.1);
            for k in 0..len {
                let pos = start + k;
                if pos < total {
                    glucose[pos] -=
                        normal(rng, INSULIN_DROP.0, INSULIN_DROP.1) * (-INSULIN_DECAY_RATE * k as f64).exp();
                }
            }
        }
    }
}
