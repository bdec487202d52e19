//! Persisted cohort layout: write, read back, detect schema drift.

use cgm_risk::cohort::{CohortBuilder, CohortConfig};
use cgm_risk::export::{CohortDataset, GenerationLog, FEATURES_FILE, GENERATION_LOG_FILE, RAW_DIR, SEQUENCES_FILE, SEQUENCE_INDEX_FILE};
use cgm_risk::trace::Trace;
use cgm_risk::PipelineError;
use std::fs;
use tempfile::TempDir;

fn small_cohort() -> cgm_risk::cohort::Cohort {
    let config = CohortConfig {
        n_patients: 10,
        min_days: 2,
        max_days: 3,
        seed: 5,
        ..Default::default()
    };
    CohortBuilder::new(config, Default::default(), Default::default(), Default::default())
        .unwrap()
        .build_seeded()
        .unwrap()
}

#[test]
fn test_layout_on_disk() {
    let dir = TempDir::new().unwrap();
    let cohort = small_cohort();
    cohort.save(dir.path()).unwrap();

    for file in [FEATURES_FILE, SEQUENCES_FILE, SEQUENCE_INDEX_FILE, GENERATION_LOG_FILE] {
        assert!(dir.path().join(file).is_file(), "missing {file}");
    }
    let raw_files = fs::read_dir(dir.path().join(RAW_DIR)).unwrap().count();
    assert_eq!(raw_files, 10);
}

#[test]
fn test_dataset_reloads_identically() {
    let dir = TempDir::new().unwrap();
    let cohort = small_cohort();
    cohort.save(dir.path()).unwrap();

    let loaded = CohortDataset::load(dir.path()).unwrap();
    assert_eq!(loaded, cohort.dataset);
    assert_eq!(loaded.aligned_sequences().unwrap(), cohort.dataset.aligned_sequences().unwrap());

    let log = GenerationLog::load(dir.path().join(GENERATION_LOG_FILE)).unwrap();
    assert_eq!(log, cohort.log);
    assert_eq!(log.n_patients, 10);
    assert_eq!(log.positive_class_count, 5);
    assert_eq!(log.sequence_length, 96);
}

#[test]
fn test_raw_traces_reload() {
    let dir = TempDir::new().unwrap();
    let cohort = small_cohort();
    cohort.save(dir.path()).unwrap();

    for p in &cohort.patients {
        let path = dir.path().join(RAW_DIR).join(format!("{}.csv", p.patient.id));
        let trace = Trace::read_csv(path).unwrap();
        assert_eq!(trace, p.trace);
    }
}

#[test]
fn test_renamed_feature_column_is_rejected() {
    let dir = TempDir::new().unwrap();
    small_cohort().save(dir.path()).unwrap();

    let path = dir.path().join(FEATURES_FILE);
    let contents = fs::read_to_string(&path).unwrap();
    fs::write(&path, contents.replacen("mean_glucose", "glucose_mean", 1)).unwrap();

    assert!(matches!(
        CohortDataset::load(dir.path()),
        Err(PipelineError::SchemaMismatch { .. })
    ));
}

#[test]
fn test_missing_sequences_file_fails() {
    let dir = TempDir::new().unwrap();
    small_cohort().save(dir.path()).unwrap();
    fs::remove_file(dir.path().join(SEQUENCES_FILE)).unwrap();

    assert!(CohortDataset::load(dir.path()).is_err());
}
