//! Stacking ensemble trainer.
//!
//! # Protocol
//!
//! ```text
//! CohortDataset ──► stratified holdout ──► train split ──┬──► preprocessor.fit
//!                                      └─► test split    │
//!                                                        ▼
//!                        k-fold on train split: fit logistic + LSTM on k-1 folds,
//!                        predict the held-out fold ──► OOF [n_train, 2]
//!                                                        │
//!                        meta logistic.fit(OOF, y_train) ◄┘
//!                        refit logistic + LSTM on the whole train split
//!                        evaluate all three on the test split
//! ```
//!
//! Every out-of-fold probability comes from models that never saw that row.
//! [`OutOfFold`] keeps the fold membership so this can be checked.
//!
//! A fold whose training rows hold a single class aborts the run with
//! [`PipelineError::SingleClassFold`].

pub mod metrics;
pub mod split;

pub use metrics::{roc_auc, ClassificationReport, ConfusionMatrix};
pub use split::{stratified_holdout, Fold, StratifiedKFold};

use crate::error::{PipelineError, Result};
use crate::export::CohortDataset;
use crate::features::FEATURE_NAMES;
use crate::inference::ModelBundle;
use crate::models::{Learner, LogisticConfig, LogisticRegression, LstmConfig, RiskModel, TrainingSet};
use crate::preprocessing::TabularPreprocessor;
use ndarray::{Array2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Evaluation report file name.
pub const EVALUATION_FILE: &str = "evaluation.json";

/// Explanation summary file name.
pub const EXPLANATION_FILE: &str = "explanation.json";

/// Tabular coefficients listed in the explanation summary.
pub const TOP_COEFFICIENTS: usize = 10;

/// Trainer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Cross-validation folds on the training split
    pub folds: usize,

    /// Fraction of each class held out for evaluation
    pub test_fraction: f64,

    /// Seed for the split, the folds and every model fit
    pub seed: u64,

    /// Tabular base model (fold copies and final refit)
    pub logistic: LogisticConfig,

    /// Sequence base model for the final refit
    pub lstm: LstmConfig,

    /// Sequence base model for the fold copies
    pub fold_lstm: LstmConfig,

    /// Meta model over the two base probabilities
    pub meta: LogisticConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            folds: 5,
            test_fraction: 0.2,
            seed: 42,
            logistic: LogisticConfig::default(),
            lstm: LstmConfig::default(),
            fold_lstm: LstmConfig::fold(),
            meta: LogisticConfig::default(),
        }
    }
}

impl TrainingConfig {
    /// Validate configuration.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.folds < 2 {
            return Err(format!("folds must be >= 2, got {}", self.folds));
        }
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return Err(format!("test_fraction must be in (0, 1), got {}", self.test_fraction));
        }
        self.logistic.validate().map_err(|e| format!("logistic: {e}"))?;
        self.lstm.validate().map_err(|e| format!("lstm: {e}"))?;
        self.fold_lstm.validate().map_err(|e| format!("fold_lstm: {e}"))?;
        self.meta.validate().map_err(|e| format!("meta: {e}"))?;
        Ok(())
    }
}

/// Out-of-fold base probabilities over the training split.
#[derive(Debug, Clone, PartialEq)]
pub struct OutOfFold {
    /// Tabular model probability per training row
    pub tabular: Vec<f64>,

    /// Sequence model probability per training row
    pub sequence: Vec<f64>,

    /// Fold whose models produced each row's probabilities
    pub fold_of_row: Vec<usize>,

    /// Rows each fold's models were fitted on
    pub fold_train_rows: Vec<Vec<usize>>,
}

impl OutOfFold {
    /// `[n, 2]` meta-model input in `[tabular, sequence]` column order.
    pub fn meta_features(&self) -> Array2<f64> {
        stack_columns(&self.tabular, &self.sequence)
    }

    /// True when no row was predicted by a model fitted on it.
    pub fn is_leak_free(&self) -> bool {
        self.fold_of_row.iter().enumerate().all(|(row, &fold)| {
            self.fold_train_rows
                .get(fold)
                .map_or(false, |fitted| fitted.binary_search(&row).is_err())
        })
    }
}

fn stack_columns(first: &[f64], second: &[f64]) -> Array2<f64> {
    let mut out = Array2::zeros((first.len(), 2));
    for (mut row, (&a, &b)) in out.rows_mut().into_iter().zip(first.iter().zip(second)) {
        row[0] = a;
        row[1] = b;
    }
    out
}

/// Test-split metrics for each model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub logistic: ClassificationReport,
    pub lstm: ClassificationReport,
    pub ensemble: ClassificationReport,
}

impl EvaluationReport {
    pub fn log_table(&self) {
        log::info!("Test-split evaluation:");
        self.logistic.log_row("logistic");
        self.lstm.log_row("lstm");
        self.ensemble.log_row("ensemble");
    }
}

/// Meta-model weights on the two base probabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaWeights {
    pub logistic_base_model_weight: f64,
    pub lstm_base_model_weight: f64,
    pub intercept: f64,
}

/// One tabular coefficient by feature name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureWeight {
    pub feature: String,
    pub coefficient: f64,
}

/// Global explanation of the fitted ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationSummary {
    pub meta_weights: MetaWeights,
    /// Largest-magnitude standardized coefficients, descending by `|coef|`
    pub top_logistic_coefficients: Vec<FeatureWeight>,
}

impl ExplanationSummary {
    pub fn from_models(tabular: &LogisticRegression, meta: &LogisticRegression) -> Self {
        let coefficients = meta.coefficients();
        let mut ranked: Vec<FeatureWeight> = FEATURE_NAMES
            .iter()
            .zip(tabular.coefficients())
            .map(|(name, &coefficient)| FeatureWeight {
                feature: name.to_string(),
                coefficient,
            })
            .collect();
        ranked.sort_by(|a, b| b.coefficient.abs().total_cmp(&a.coefficient.abs()));
        ranked.truncate(TOP_COEFFICIENTS);

        Self {
            meta_weights: MetaWeights {
                logistic_base_model_weight: coefficients.first().copied().unwrap_or(0.0),
                lstm_base_model_weight: coefficients.get(1).copied().unwrap_or(0.0),
                intercept: meta.intercept(),
            },
            top_logistic_coefficients: ranked,
        }
    }
}

/// Everything a training run produces.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub bundle: ModelBundle,
    pub out_of_fold: OutOfFold,
    pub evaluation: EvaluationReport,
    pub explanation: ExplanationSummary,
    /// Dataset rows in the training split
    pub train_rows: Vec<usize>,
    /// Dataset rows in the test split
    pub test_rows: Vec<usize>,
}

impl TrainingOutcome {
    /// Write `evaluation.json` and `explanation.json` into `dir`.
    pub fn save_reports<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        serde_json::to_writer_pretty(BufWriter::new(File::create(dir.join(EVALUATION_FILE))?), &self.evaluation)?;
        serde_json::to_writer_pretty(BufWriter::new(File::create(dir.join(EXPLANATION_FILE))?), &self.explanation)?;
        Ok(())
    }
}

/// Runs the stacking protocol on a [`CohortDataset`].
#[derive(Debug, Clone)]
pub struct EnsembleTrainer {
    config: TrainingConfig,
}

impl EnsembleTrainer {
    pub fn new(config: TrainingConfig) -> Result<Self> {
        config.validate().map_err(PipelineError::InvalidConfig)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Full protocol: split, OOF, meta fit, refit, evaluate.
    pub fn train(&self, dataset: &CohortDataset) -> Result<TrainingOutcome> {
        let labels = dataset.labels();
        let features = dataset.feature_matrix();
        let sequences = dataset.aligned_sequences()?;
        log::info!(
            "Training on {} patients ({} positive), sequence length {}",
            dataset.len(),
            dataset.positive_count(),
            dataset.sequence_length()
        );

        let (train_rows, test_rows) = stratified_holdout(&labels, self.config.test_fraction, self.config.seed)?;
        let x_train = features.select(Axis(0), &train_rows);
        let preprocessor = TabularPreprocessor::fit(x_train.view())?;

        let split = |rows: &[usize], x: Array2<f64>| {
            TrainingSet::new(
                preprocessor.transform(x.view()),
                sequences.select(Axis(0), rows),
                rows.iter().map(|&r| labels[r]).collect(),
            )
        };
        let train = split(&train_rows, x_train)?;
        let test = split(&test_rows, features.select(Axis(0), &test_rows))?;
        log::info!("Split: {} train / {} test", train.len(), test.len());

        let out_of_fold = self.out_of_fold(&train)?;
        let meta = LogisticRegression::fit_matrix(out_of_fold.meta_features().view(), &train.labels, &self.config.meta)?;
        log::info!(
            "Meta model: logistic weight {:.4}, lstm weight {:.4}",
            meta.coefficients()[0],
            meta.coefficients()[1]
        );

        log::info!("Refitting base models on the full training split");
        require_both_classes(&train.labels, usize::MAX)?;
        let tabular = self.config.logistic.fit(&train, self.config.seed)?;
        let sequence = self.config.lstm.fit(&train, self.config.seed)?;

        let p_tabular = tabular.predict_batch(test.tabular.view(), test.sequences.view());
        let p_sequence = sequence.predict_batch(test.tabular.view(), test.sequences.view());
        let p_ensemble = meta.predict_proba(stack_columns(&p_tabular, &p_sequence).view());

        let evaluation = EvaluationReport {
            logistic: ClassificationReport::compute(&p_tabular, &test.labels),
            lstm: ClassificationReport::compute(&p_sequence, &test.labels),
            ensemble: ClassificationReport::compute(&p_ensemble, &test.labels),
        };
        evaluation.log_table();

        let explanation = ExplanationSummary::from_models(&tabular, &meta);
        let bundle = ModelBundle::new(preprocessor, tabular, sequence, meta)?;

        Ok(TrainingOutcome {
            bundle,
            out_of_fold,
            evaluation,
            explanation,
            train_rows,
            test_rows,
        })
    }

    /// Out-of-fold probabilities of fresh base models over `train`.
    ///
    /// Folds run in parallel; each fold's models are seeded from the run seed
    /// and the fold index.
    pub fn out_of_fold(&self, train: &TrainingSet) -> Result<OutOfFold> {
        let folds = StratifiedKFold::new(self.config.folds, self.config.seed).split(&train.labels)?;
        for fold in &folds {
            let fold_labels: Vec<u8> = fold.train.iter().map(|&r| train.labels[r]).collect();
            require_both_classes(&fold_labels, fold.index)?;
        }

        let predictions = folds
            .par_iter()
            .map(|fold| {
                let fit_set = train.subset(&fold.train);
                let held_out = train.subset(&fold.validation);
                let seed = self.config.seed.wrapping_add(fold.index as u64 + 1);

                let tabular = self.config.logistic.fit(&fit_set, seed)?;
                let sequence = self.config.fold_lstm.fit(&fit_set, seed)?;
                let p_tabular = tabular.predict_batch(held_out.tabular.view(), held_out.sequences.view());
                let p_sequence = sequence.predict_batch(held_out.tabular.view(), held_out.sequences.view());

                log::info!(
                    "Fold {}/{}: fit {} rows, predicted {} (lstm stopped after {} epochs)",
                    fold.index + 1,
                    self.config.folds,
                    fit_set.len(),
                    held_out.len(),
                    sequence.epochs_trained()
                );
                Ok((p_tabular, p_sequence))
            })
            .collect::<Result<Vec<_>>>()?;

        let n = train.len();
        let mut oof = OutOfFold {
            tabular: vec![f64::NAN; n],
            sequence: vec![f64::NAN; n],
            fold_of_row: vec![usize::MAX; n],
            fold_train_rows: folds.iter().map(|f| f.train.clone()).collect(),
        };
        for (fold, (p_tabular, p_sequence)) in folds.iter().zip(predictions) {
            for (i, &row) in fold.validation.iter().enumerate() {
                oof.tabular[row] = p_tabular[i];
                oof.sequence[row] = p_sequence[i];
                oof.fold_of_row[row] = fold.index;
            }
        }

        if oof.fold_of_row.contains(&usize::MAX) {
            return Err(PipelineError::InsufficientData(
                "some training rows received no out-of-fold prediction".to_string(),
            ));
        }
        Ok(oof)
    }
}

fn require_both_classes(labels: &[u8], fold: usize) -> Result<()> {
    let (negatives, positives) = crate::models::class_counts(labels);
    match (negatives, positives) {
        (0, _) => Err(PipelineError::SingleClassFold { fold, class: 1 }),
        (_, 0) => Err(PipelineError::SingleClassFold { fold, class: 0 }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClassWeight, LogisticConfig};
    use ndarray::Array2;

    fn quick_config() -> TrainingConfig {
        let lstm = LstmConfig {
            hidden_units: 4,
            dense_units: 3,
            max_epochs: 3,
            validation_fraction: 0.0,
            ..LstmConfig::default()
        };
        TrainingConfig {
            folds: 3,
            fold_lstm: lstm.clone(),
            lstm,
            ..TrainingConfig::default()
        }
    }

    fn toy_set(n: usize) -> TrainingSet {
        let labels: Vec<u8> = (0..n).map(|i| u8::from(i % 3 == 0)).collect();
        let tabular = Array2::from_shape_fn((n, 3), |(i, j)| f64::from(labels[i]) * 2.0 + (i * (j + 1)) as f64 % 5.0 * 0.1);
        let sequences = Array2::from_shape_fn((n, 6), |(i, t)| 100.0 + 40.0 * f32::from(labels[i]) + t as f32);
        TrainingSet::new(tabular, sequences, labels).unwrap()
    }

    #[test]
    fn test_out_of_fold_never_sees_its_rows() {
        let trainer = EnsembleTrainer::new(quick_config()).unwrap();
        let oof = trainer.out_of_fold(&toy_set(30)).unwrap();

        assert!(oof.is_leak_free());
        assert!(oof.tabular.iter().chain(&oof.sequence).all(|p| (0.0..=1.0).contains(p)));
        for (row, &fold) in oof.fold_of_row.iter().enumerate() {
            assert!(!oof.fold_train_rows[fold].contains(&row));
        }
        assert_eq!(oof.meta_features().dim(), (30, 2));
    }

    #[test]
    fn test_leak_detector_flags_contamination() {
        let mut oof = OutOfFold {
            tabular: vec![0.5; 4],
            sequence: vec![0.5; 4],
            fold_of_row: vec![0, 0, 1, 1],
            fold_train_rows: vec![vec![2, 3], vec![0, 1]],
        };
        assert!(oof.is_leak_free());
        oof.fold_train_rows[1] = vec![0, 1, 2];
        assert!(!oof.is_leak_free());
    }

    #[test]
    fn test_single_class_fold_is_fatal() {
        let mut set = toy_set(12);
        set.labels = vec![0; 12];
        let trainer = EnsembleTrainer::new(quick_config()).unwrap();
        assert!(matches!(
            trainer.out_of_fold(&set),
            Err(PipelineError::SingleClassFold { class: 0, .. })
        ));
    }

    #[test]
    fn test_explanation_ranks_by_magnitude() {
        let mut coefs = vec![0.0; FEATURE_NAMES.len()];
        coefs[2] = -3.0;
        coefs[5] = 2.0;
        coefs[0] = 0.5;
        let tabular = LogisticRegression::from_parameters(coefs, 0.0);
        let meta = LogisticRegression::from_parameters(vec![1.5, 2.5], -1.0);

        let summary = ExplanationSummary::from_models(&tabular, &meta);
        assert_eq!(summary.top_logistic_coefficients.len(), TOP_COEFFICIENTS);
        assert_eq!(summary.top_logistic_coefficients[0].feature, FEATURE_NAMES[2]);
        assert_eq!(summary.top_logistic_coefficients[1].feature, FEATURE_NAMES[5]);
        assert_eq!(summary.meta_weights.lstm_base_model_weight, 2.5);
    }

    #[test]
    fn test_config_validation() {
        let mut config = TrainingConfig::default();
        assert!(config.validate().is_ok());
        config.folds = 1;
        assert!(config.validate().is_err());

        let config = TrainingConfig {
            meta: LogisticConfig {
                class_weight: ClassWeight::Uniform,
                c: -1.0,
                ..LogisticConfig::default()
            },
            ..TrainingConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
