//! Maximum area over threshold on hand-built and simulated traces.

use approx::assert_relative_eq;
use cgm_risk::cohort::{CohortBuilder, CohortConfig};
use cgm_risk::features::{max_area_over_threshold, max_area_over_threshold_naive, trace_area_over_threshold};
use cgm_risk::simulation::PhysiologySimulator;
use cgm_risk::trace::Trace;
use cgm_risk::EventLabel;
use chrono::{NaiveDate, NaiveDateTime};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

fn ts(minute: i64) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        + chrono::Duration::minutes(minute)
}

fn trace_of(values: &[Option<f64>]) -> Trace {
    let times: Vec<_> = (0..values.len() as i64).map(|i| ts(i * 15)).collect();
    Trace::from_glucose(&times, values)
}

#[test]
fn test_below_threshold_is_zero() {
    let trace = trace_of(&[Some(100.0), Some(150.0), Some(179.9), Some(120.0)]);
    assert_eq!(trace_area_over_threshold(&trace, 180.0, 120.0), 0.0);
}

#[test]
fn test_pulse_area() {
    let trace = trace_of(&[Some(100.0), Some(100.0), Some(200.0), Some(200.0), Some(100.0), Some(100.0)]);
    // Each 200 reading contributes 20 mg/dL over 15 minutes.
    assert_relative_eq!(trace_area_over_threshold(&trace, 180.0, 0.0), 300.0);
    assert_relative_eq!(trace_area_over_threshold(&trace, 180.0, 15.0), 600.0);
    assert_relative_eq!(trace_area_over_threshold(&trace, 180.0, 120.0), 600.0);
}

#[test]
fn test_missing_readings_are_filled() {
    let trace = trace_of(&[Some(100.0), Some(200.0), None, Some(100.0)]);
    assert_relative_eq!(trace_area_over_threshold(&trace, 180.0, 60.0), 600.0);
}

#[test]
fn test_empty_and_all_missing() {
    assert_eq!(trace_area_over_threshold(&Trace::default(), 180.0, 60.0), 0.0);
    assert_eq!(trace_area_over_threshold(&trace_of(&[None, None]), 180.0, 60.0), 0.0);
    assert_eq!(max_area_over_threshold(&[], &[], 180.0, 60.0), 0.0);
}

#[test]
fn test_sweep_matches_naive_on_simulated_traces() {
    let simulator = PhysiologySimulator::default();
    let mut rng = ChaCha20Rng::seed_from_u64(99);

    for high_variability in [false, true] {
        let trace = simulator.simulate(&mut rng, 2, 135.0, high_variability);
        let values: Vec<f64> = trace.values().into_iter().map(|v| v.unwrap_or(f64::NAN)).collect();
        let times = trace.timestamps();

        let mut previous = 0.0;
        for window in [0.0, 30.0, 60.0, 120.0, 240.0, 1440.0] {
            let fast = max_area_over_threshold(&values, &times, 140.0, window);
            let slow = max_area_over_threshold_naive(&values, &times, 140.0, window);
            assert_relative_eq!(fast, slow, epsilon = 1e-6, max_relative = 1e-9);
            assert!(fast + 1e-9 >= previous, "area shrank when widening the window");
            previous = fast;
        }
    }
}

/// Positive event windows score above quiet stretches of negative patients.
#[test]
fn test_event_window_scores_above_quiet_negative_segment() {
    let config = CohortConfig {
        n_patients: 20,
        min_days: 2,
        max_days: 3,
        positive_baseline: 116.0,
        negative_baseline: 112.0,
        event_threshold: 180.0,
        seed: 2024,
        ..Default::default()
    };
    let cohort = CohortBuilder::new(config, Default::default(), Default::default(), Default::default())
        .unwrap()
        .build_seeded()
        .unwrap();

    let positive = cohort
        .patients
        .iter()
        .find(|p| p.patient.label == EventLabel::Positive)
        .unwrap();
    assert!(positive.patient.high_variability);
    let event = positive.event.unwrap();
    let samples = positive.trace.samples();
    let from = event.start.saturating_sub(4);
    let to = (event.end(samples.len()) + 4).min(samples.len());
    let around_event = Trace::new(samples[from..to].to_vec());
    let positive_area = trace_area_over_threshold(&around_event, 180.0, 120.0);
    assert!(positive_area > 0.0);

    let negative = cohort
        .patients
        .iter()
        .find(|p| p.patient.label == EventLabel::Negative)
        .unwrap();
    let filled = negative.trace.filled_values().unwrap();
    let quiet_start = (0..=filled.len() - 9)
        .min_by(|&a, &b| {
            let max_a = filled[a..a + 9].iter().cloned().fold(f64::MIN, f64::max);
            let max_b = filled[b..b + 9].iter().cloned().fold(f64::MIN, f64::max);
            max_a.total_cmp(&max_b)
        })
        .unwrap();
    let quiet = Trace::new(negative.trace.samples()[quiet_start..quiet_start + 9].to_vec());
    let negative_area = trace_area_over_threshold(&quiet, 180.0, 120.0);

    assert!(negative_area < positive_area, "{negative_area} >= {positive_area}");
}
