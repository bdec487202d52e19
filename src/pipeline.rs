//! End-to-end pipeline: generate → persist → train → publish.
//!
//! # Architecture
//!
//! ```text
//! PipelineConfig
//!     │
//!     ├─► CohortBuilder ──► Cohort ──► <data_dir>/ (features.csv, sequences.npy, seq_index.json, raw/, log)
//!     │
//!     └─► CohortDataset::load(<data_dir>) ──► EnsembleTrainer ──► TrainingOutcome
//!                                                                   │
//!                              <model_dir>/ (bundle + evaluation + explanation)
//!                              ModelSlot::publish (in-process swap)
//! ```
//!
//! Generation and training are separate calls so a persisted cohort can be
//! retrained without regenerating it.
//!
//! # Example
//!
//! ```ignore
//! use cgm_risk::prelude::*;
//!
//! let pipeline = Pipeline::from_config(PipelineConfig::load_toml("experiment.toml")?)?;
//! pipeline.generate("data/synthetic")?;
//! let outcome = pipeline.train("data/synthetic", "models")?;
//! println!("ensemble AUC: {:?}", outcome.evaluation.ensemble.roc_auc);
//! ```

use crate::cohort::{Cohort, CohortBuilder};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::export::CohortDataset;
use crate::inference::ModelSlot;
use crate::training::{EnsembleTrainer, TrainingOutcome};
use std::path::Path;

/// Configuration snapshot written next to generated data and models.
pub const CONFIG_SNAPSHOT_FILE: &str = "pipeline_config.toml";

/// Configured pipeline.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a pipeline after validating `config`.
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        config.check()?;
        Ok(Self { config })
    }

    /// Configuration in use.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Cohort builder for this configuration.
    pub fn cohort_builder(&self) -> Result<CohortBuilder> {
        CohortBuilder::new(
            self.config.cohort.clone(),
            self.config.simulation.clone(),
            self.config.features.clone(),
            self.config.sequence.clone(),
        )
    }

    /// Generate the cohort and persist it under `output_dir`.
    pub fn generate<P: AsRef<Path>>(&self, output_dir: P) -> Result<Cohort> {
        let output_dir = output_dir.as_ref();
        let cohort = self.cohort_builder()?.build_seeded()?;
        cohort.save(output_dir)?;
        self.config.save_toml(output_dir.join(CONFIG_SNAPSHOT_FILE))?;
        log::info!(
            "Cohort of {} patients ({} positive) saved to {}",
            cohort.dataset.len(),
            cohort.dataset.positive_count(),
            output_dir.display()
        );
        Ok(cohort)
    }

    /// Train on an in-memory dataset.
    pub fn train_dataset(&self, dataset: &CohortDataset) -> Result<TrainingOutcome> {
        if dataset.sequence_length() != self.config.sequence.length {
            return Err(PipelineError::InvalidInput(format!(
                "dataset sequences have length {}, configuration expects {}",
                dataset.sequence_length(),
                self.config.sequence.length
            )));
        }
        EnsembleTrainer::new(self.config.training.clone())?.train(dataset)
    }

    /// Train on the dataset in `data_dir` and publish artifacts to `model_dir`.
    pub fn train<P: AsRef<Path>, Q: AsRef<Path>>(&self, data_dir: P, model_dir: Q) -> Result<TrainingOutcome> {
        let model_dir = model_dir.as_ref();
        let dataset = CohortDataset::load(data_dir)?;
        let outcome = self.train_dataset(&dataset)?;

        // Reports and the config snapshot are staged with the bundle.
        outcome.bundle.save_with(model_dir, |staging| {
            outcome.save_reports(staging)?;
            self.config.save_toml(staging.join(CONFIG_SNAPSHOT_FILE))
        })?;
        Ok(outcome)
    }

    /// [`Pipeline::train`], then swap the new bundle into `slot`.
    pub fn train_and_publish<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        data_dir: P,
        model_dir: Q,
        slot: &ModelSlot,
    ) -> Result<TrainingOutcome> {
        let outcome = self.train(data_dir, model_dir)?;
        if slot.publish(outcome.bundle.clone()).is_some() {
            log::info!("Replaced the serving bundle");
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = PipelineConfig::default();
        config.training.folds = 0;
        assert!(matches!(
            Pipeline::from_config(config),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_train_publishes_reports_with_bundle() {
        use crate::inference::ModelBundle;
        use crate::models::LstmConfig;
        use crate::training::{EVALUATION_FILE, EXPLANATION_FILE};
        use tempfile::TempDir;

        let mut config = PipelineConfig::default();
        config.cohort.n_patients = 30;
        config.cohort.min_days = 2;
        config.cohort.max_days = 2;
        config.training.folds = 3;
        let lstm = LstmConfig {
            hidden_units: 2,
            dense_units: 2,
            max_epochs: 1,
            validation_fraction: 0.0,
            ..LstmConfig::default()
        };
        config.training.lstm = lstm.clone();
        config.training.fold_lstm = lstm;

        let data = TempDir::new().unwrap();
        let models = TempDir::new().unwrap();
        let model_dir = models.path().join("current");
        let pipeline = Pipeline::from_config(config).unwrap();
        pipeline.generate(data.path()).unwrap();
        pipeline.train(data.path(), &model_dir).unwrap();

        for file in [EVALUATION_FILE, EXPLANATION_FILE, CONFIG_SNAPSHOT_FILE] {
            assert!(model_dir.join(file).is_file(), "missing {file}");
        }
        assert!(ModelBundle::load(&model_dir).is_ok());
        assert!(!models.path().join(".current.staging").exists());
    }

    #[test]
    fn test_train_rejects_mismatched_sequence_length() {
        let mut config = PipelineConfig::default();
        config.cohort.n_patients = 12;
        config.cohort.min_days = 2;
        config.cohort.max_days = 2;
        let pipeline = Pipeline::from_config(config.clone()).unwrap();
        let cohort = pipeline.cohort_builder().unwrap().build_seeded().unwrap();

        config.sequence.length = 48;
        let other = Pipeline::from_config(config).unwrap();
        assert!(matches!(
            other.train_dataset(&cohort.dataset),
            Err(PipelineError::InvalidInput(_))
        ));
    }
}
