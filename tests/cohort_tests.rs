//! Cohort generation integration tests.
//!
//! Cadence, determinism and label/event consistency of generated cohorts.

use cgm_risk::cohort::{CohortBuilder, CohortConfig};
use cgm_risk::features::FeatureConfig;
use cgm_risk::sequence_builder::SequenceConfig;
use cgm_risk::simulation::SimulationConfig;
use cgm_risk::EventLabel;

fn builder(n_patients: usize, seed: u64) -> CohortBuilder {
    let config = CohortConfig {
        n_patients,
        min_days: 2,
        max_days: 4,
        seed,
        ..Default::default()
    };
    CohortBuilder::new(
        config,
        SimulationConfig::default(),
        FeatureConfig::default(),
        SequenceConfig::default(),
    )
    .unwrap()
}

#[test]
fn test_every_trace_has_fixed_cadence() {
    let cohort = builder(12, 7).build_seeded().unwrap();
    assert_eq!(cohort.patients.len(), 12);

    for p in &cohort.patients {
        assert!((2..=4).contains(&p.patient.days));
        assert_eq!(p.trace.len(), p.patient.days * 96, "patient {}", p.patient.id);

        let times = p.trace.timestamps();
        for pair in times.windows(2) {
            assert_eq!((pair[1] - pair[0]).num_minutes(), 15);
        }
    }
}

#[test]
fn test_same_seed_same_cohort() {
    let a = builder(10, 11).build_seeded().unwrap();
    let b = builder(10, 11).build_seeded().unwrap();

    assert_eq!(a.dataset, b.dataset);
    for (pa, pb) in a.patients.iter().zip(&b.patients) {
        assert_eq!(pa.patient, pb.patient);
        assert_eq!(pa.trace, pb.trace);
        assert_eq!(pa.event, pb.event);
    }
}

#[test]
fn test_different_seed_different_cohort() {
    let a = builder(10, 1).build_seeded().unwrap();
    let b = builder(10, 2).build_seeded().unwrap();
    assert_ne!(a.dataset.sequences(), b.dataset.sequences());
}

#[test]
fn test_positive_patients_carry_an_event() {
    let cohort = builder(16, 3).build_seeded().unwrap();
    let threshold = CohortConfig::default().event_threshold;

    let mut positives = 0;
    for p in &cohort.patients {
        match p.patient.label {
            EventLabel::Positive => {
                positives += 1;
                let event = p.event.expect("positive patient without event");
                assert_eq!(event.precursor_start + 96, event.start);

                let values = p.trace.values();
                for v in &values[event.start..event.end(values.len())] {
                    assert!(v.unwrap() >= threshold + 15.0);
                }
            }
            EventLabel::Negative => assert!(p.event.is_none()),
        }
    }

    assert_eq!(positives, 8);
    assert_eq!(cohort.log.positive_class_count, 8);
    assert_eq!(cohort.log.positives_without_event, 0);
}

#[test]
fn test_labels_match_dataset_records() {
    let cohort = builder(10, 5).build_seeded().unwrap();
    for record in cohort.dataset.records() {
        let patient = cohort
            .patients
            .iter()
            .find(|p| p.patient.id == record.patient_id)
            .unwrap();
        assert_eq!(record.label, patient.patient.label.as_int());
    }
}
