//! Sequence extraction against generated cohorts.

use cgm_risk::cohort::{CohortBuilder, CohortConfig};
use cgm_risk::sequence_builder::{extract_sequence, SequenceAnchor, SequenceConfig, SequenceExtractor, EMPTY_PAD_VALUE};
use cgm_risk::trace::Trace;

#[test]
fn test_dataset_sequences_follow_anchors() {
    let config = CohortConfig {
        n_patients: 8,
        min_days: 2,
        max_days: 3,
        seed: 17,
        ..Default::default()
    };
    let cohort = CohortBuilder::new(config, Default::default(), Default::default(), Default::default())
        .unwrap()
        .build_seeded()
        .unwrap();

    for p in &cohort.patients {
        let filled = p.trace.filled_values().unwrap();
        let stored = cohort.dataset.sequence_for(&p.patient.id).unwrap();
        assert_eq!(stored.len(), 96);

        let expected: Vec<f32> = match p.event {
            // Precursor only: the window stops right before the event.
            Some(event) => filled[event.start - 96..event.start].iter().map(|&v| v as f32).collect(),
            None => filled[filled.len() - 96..].iter().map(|&v| v as f32).collect(),
        };
        assert_eq!(stored.to_vec(), expected, "patient {}", p.patient.id);
    }
}

#[test]
fn test_short_series_is_left_padded() {
    let seq = extract_sequence(&[120.0, 130.0], 5, SequenceAnchor::TraceEnd);
    assert_eq!(seq, vec![120.0, 120.0, 120.0, 120.0, 130.0]);

    let seq = extract_sequence(&[120.0, 130.0, 140.0], 4, SequenceAnchor::EventStart(0));
    assert_eq!(seq, vec![EMPTY_PAD_VALUE; 4]);
}

#[test]
fn test_anchor_past_end_is_clamped() {
    let values = [1.0, 2.0, 3.0, 4.0];
    assert_eq!(
        extract_sequence(&values, 2, SequenceAnchor::EventStart(10)),
        extract_sequence(&values, 2, SequenceAnchor::TraceEnd)
    );
}

#[test]
fn test_extractor_fills_missing_readings() {
    let extractor = SequenceExtractor::new(SequenceConfig::new(3));
    let times: Vec<_> = (0..4)
        .map(|i| {
            chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
                + chrono::Duration::minutes(15 * i)
        })
        .collect();
    let trace = Trace::from_glucose(&times, &[None, Some(110.0), None, Some(125.0)]);

    assert_eq!(extractor.extract_trace(&trace, SequenceAnchor::TraceEnd), vec![110.0, 110.0, 125.0]);
    assert_eq!(
        extractor.extract_trace(&Trace::default(), SequenceAnchor::TraceEnd),
        vec![EMPTY_PAD_VALUE; 3]
    );
}
