//! End-to-end ensemble training and serving.
//!
//! Generates a small, well-separated cohort, trains the stacked ensemble
//! through the pipeline, then serves predictions from the saved bundle.

use approx::assert_relative_eq;
use cgm_risk::cohort::CohortConfig;
use cgm_risk::export::CohortDataset;
use cgm_risk::inference::{EnsemblePredictor, ModelBundle, ModelSlot};
use cgm_risk::models::{LstmConfig, TrainingSet};
use cgm_risk::training::{EnsembleTrainer, TrainingConfig, EVALUATION_FILE, EXPLANATION_FILE, TOP_COEFFICIENTS};
use cgm_risk::{Pipeline, PipelineConfig, PipelineError, TabularPreprocessor};
use std::fs;
use tempfile::TempDir;

fn quick_config() -> PipelineConfig {
    let lstm = LstmConfig {
        hidden_units: 4,
        dense_units: 3,
        max_epochs: 3,
        validation_fraction: 0.0,
        ..LstmConfig::default()
    };
    PipelineConfig::default()
        .with_cohort(CohortConfig {
            n_patients: 60,
            min_days: 2,
            max_days: 3,
            positive_baseline: 135.0,
            negative_baseline: 95.0,
            seed: 8,
            ..Default::default()
        })
        .with_training(TrainingConfig {
            folds: 3,
            fold_lstm: lstm.clone(),
            lstm,
            ..TrainingConfig::default()
        })
}

#[test]
fn test_pipeline_trains_and_serves() {
    let data_dir = TempDir::new().unwrap();
    let model_dir = TempDir::new().unwrap();
    let pipeline = Pipeline::from_config(quick_config()).unwrap();

    pipeline.generate(data_dir.path()).unwrap();
    let slot = ModelSlot::unavailable("not trained yet");
    let outcome = pipeline
        .train_and_publish(data_dir.path(), model_dir.path(), &slot)
        .unwrap();

    // Stacking inputs never come from a model that saw the row.
    assert!(outcome.out_of_fold.is_leak_free());
    assert_eq!(outcome.out_of_fold.tabular.len(), outcome.train_rows.len());
    assert_eq!(outcome.train_rows.len() + outcome.test_rows.len(), 60);

    let eval = &outcome.evaluation;
    assert_eq!(eval.ensemble.support, outcome.test_rows.len());
    assert!(eval.logistic.roc_auc.unwrap() > 0.8, "{:?}", eval.logistic);
    assert!(eval.ensemble.roc_auc.unwrap() > 0.7, "{:?}", eval.ensemble);

    // Reports next to the bundle.
    let evaluation: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(model_dir.path().join(EVALUATION_FILE)).unwrap()).unwrap();
    for model in ["logistic", "lstm", "ensemble"] {
        assert!(evaluation[model].is_object(), "missing {model}");
    }
    let explanation: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(model_dir.path().join(EXPLANATION_FILE)).unwrap()).unwrap();
    assert!(explanation["meta_weights"]["logistic_base_model_weight"].is_number());
    assert_eq!(
        explanation["top_logistic_coefficients"].as_array().unwrap().len(),
        TOP_COEFFICIENTS
    );

    // Published in-process.
    assert!(slot.current().is_some());

    // Served from disk, matching the in-memory bundle.
    let dataset = CohortDataset::load(data_dir.path()).unwrap();
    let sequences = dataset.aligned_sequences().unwrap();
    let predictor = EnsemblePredictor::from_dir(model_dir.path());
    assert!(predictor.is_available());

    for (row, record) in dataset.records().iter().enumerate().take(10) {
        let sequence = sequences.row(row).to_vec();
        let response = predictor.predict(&record.features, &sequence);
        let served = response.probability().unwrap();
        let direct = outcome.bundle.predict(&record.features, &sequence).unwrap();

        assert!((0.0..=1.0).contains(&served));
        assert_relative_eq!(served, direct, epsilon = 1e-9);
        assert!(response.label().is_some());
    }
}

#[test]
fn test_predictor_without_bundle_reports_error() {
    let dir = TempDir::new().unwrap();
    let predictor = EnsemblePredictor::from_dir(dir.path().join("missing"));
    assert!(!predictor.is_available());

    let response = predictor.predict(&Default::default(), &[100.0; 96]);
    assert!(response.is_error());
    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["error"], "Glucose event model not loaded.");
}

#[test]
fn test_bundle_rejects_wrong_sequence_length() {
    let data_dir = TempDir::new().unwrap();
    let model_dir = TempDir::new().unwrap();
    let pipeline = Pipeline::from_config(quick_config()).unwrap();
    pipeline.generate(data_dir.path()).unwrap();
    pipeline.train(data_dir.path(), model_dir.path()).unwrap();

    let bundle = ModelBundle::load(model_dir.path()).unwrap();
    assert!(matches!(
        bundle.predict(&Default::default(), &[100.0; 12]),
        Err(PipelineError::InvalidInput(_))
    ));

    let predictor = EnsemblePredictor::from_bundle(bundle);
    assert!(predictor.predict(&Default::default(), &[100.0; 12]).is_error());
}

#[test]
fn test_out_of_fold_on_generated_cohort() {
    let config = quick_config();
    let cohort = Pipeline::from_config(config.clone())
        .unwrap()
        .cohort_builder()
        .unwrap()
        .build_seeded()
        .unwrap();
    let dataset = &cohort.dataset;

    let features = dataset.feature_matrix();
    let preprocessor = TabularPreprocessor::fit(features.view()).unwrap();
    let train = TrainingSet::new(
        preprocessor.transform(features.view()),
        dataset.aligned_sequences().unwrap(),
        dataset.labels(),
    )
    .unwrap();

    let oof = EnsembleTrainer::new(config.training).unwrap().out_of_fold(&train).unwrap();
    assert!(oof.is_leak_free());
    assert_eq!(oof.meta_features().dim(), (60, 2));
    assert!(oof.fold_of_row.iter().all(|&f| f < 3));
}
