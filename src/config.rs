//! Pipeline configuration management.
//!
//! One serializable struct carries every stage's settings so an experiment
//! (cohort generation plus ensemble training) is reproducible from a single
//! file.
//!
//! # Features
//!
//! - **Unified Configuration**: simulation, features, sequences, cohort and training
//! - **Serialization**: save/load as TOML or JSON
//! - **Validation**: per-section checks plus cross-section invariants
//!
//! # Example
//!
//! ```
//! use cgm_risk::config::PipelineConfig;
//!
//! let config = PipelineConfig::default();
//! assert!(config.validate().is_ok());
//!
//! let toml = toml::to_string_pretty(&config).unwrap();
//! let parsed: PipelineConfig = toml::from_str(&toml).unwrap();
//! assert_eq!(parsed.sequence.length, 96);
//! ```

use crate::cohort::CohortConfig;
use crate::error::{PipelineError, Result};
use crate::features::FeatureConfig;
use crate::sequence_builder::SequenceConfig;
use crate::simulation::SimulationConfig;
use crate::training::TrainingConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Unified pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Physiological simulator settings
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Feature aggregation settings
    #[serde(default)]
    pub features: FeatureConfig,

    /// Sequence extraction settings
    #[serde(default)]
    pub sequence: SequenceConfig,

    /// Cohort composition and event injection
    #[serde(default)]
    pub cohort: CohortConfig,

    /// Ensemble training
    #[serde(default)]
    pub training: TrainingConfig,

    /// Experiment metadata (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ExperimentMetadata>,
}

/// Experiment metadata for tracking.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentMetadata {
    /// Experiment name
    pub name: String,

    /// Description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Creation timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,

    /// Version or git commit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Custom tags
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl ExperimentMetadata {
    /// Metadata stamped with the current time and crate version.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            created_at: Some(chrono::Utc::now().to_rfc3339()),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
            tags: None,
        }
    }
}

impl PipelineConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set experiment metadata.
    pub fn with_metadata(mut self, metadata: ExperimentMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Set cohort configuration.
    pub fn with_cohort(mut self, config: CohortConfig) -> Self {
        self.cohort = config;
        self
    }

    /// Set training configuration.
    pub fn with_training(mut self, config: TrainingConfig) -> Self {
        self.training = config;
        self
    }

    /// Set sequence configuration.
    pub fn with_sequence(mut self, config: SequenceConfig) -> Self {
        self.sequence = config;
        self
    }

    /// Validate every section and the invariants that span sections.
    pub fn validate(&self) -> std::result::Result<(), String> {
        self.simulation.validate().map_err(|e| format!("simulation: {e}"))?;
        self.features.validate().map_err(|e| format!("features: {e}"))?;
        self.sequence.validate().map_err(|e| format!("sequence: {e}"))?;
        self.cohort.validate().map_err(|e| format!("cohort: {e}"))?;
        self.training.validate().map_err(|e| format!("training: {e}"))?;

        let per_day = self.simulation.samples_per_day();
        if self.features.fallback_length != per_day {
            return Err(format!(
                "features.fallback_length ({}) must equal samples per day ({per_day})",
                self.features.fallback_length
            ));
        }

        // Event injection needs len > L + tail on the shortest trace.
        let shortest = self.cohort.min_days * per_day;
        if shortest <= self.sequence.length + self.cohort.event_tail {
            return Err(format!(
                "shortest trace ({shortest} samples) leaves no room for a {}-sample precursor and {}-sample tail",
                self.sequence.length, self.cohort.event_tail
            ));
        }

        let positives = self.cohort.positive_count();
        let negatives = self.cohort.n_patients - positives;
        if positives.min(negatives) < self.training.folds {
            return Err(format!(
                "each class needs at least {} patients for {}-fold training ({positives} positive, {negatives} negative)",
                self.training.folds, self.training.folds
            ));
        }

        Ok(())
    }

    /// Validate, lifting the message into [`PipelineError::InvalidConfig`].
    pub fn check(&self) -> Result<()> {
        self.validate().map_err(PipelineError::InvalidConfig)
    }

    /// Save configuration to TOML file.
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Load and validate configuration from TOML file.
    pub fn load_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: PipelineConfig = toml::from_str(&contents)?;
        config.check()?;
        Ok(config)
    }

    /// Save configuration to JSON file.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Load and validate configuration from JSON file.
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&contents)?;
        config.check()?;
        Ok(config)
    }

    /// Load by extension: `.json` as JSON, anything else as TOML.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::load_json(path),
            _ => Self::load_toml(path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_save_load_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("experiment.toml");
        let config = PipelineConfig::default().with_metadata(ExperimentMetadata {
            name: "test_experiment".to_string(),
            description: Some("Test configuration".to_string()),
            created_at: None,
            version: Some("0.1.0".to_string()),
            tags: Some(vec!["test".to_string()]),
        });

        config.save_toml(&path).unwrap();
        let loaded = PipelineConfig::load_toml(&path).unwrap();

        assert_eq!(loaded.cohort.n_patients, config.cohort.n_patients);
        assert_eq!(loaded.sequence.length, config.sequence.length);
        assert_eq!(loaded.training.lstm.patience, 6);
        assert_eq!(loaded.simulation.start, config.simulation.start);
        assert_eq!(loaded.metadata, config.metadata);
    }

    #[test]
    fn test_save_load_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("experiment.json");
        PipelineConfig::default().save_json(&path).unwrap();

        let loaded = PipelineConfig::load(&path).unwrap();
        assert_eq!(loaded.training.folds, 5);
        assert_eq!(loaded.cohort.seed, 42);
    }

    #[test]
    fn test_fallback_length_must_match_cadence() {
        let mut config = PipelineConfig::default();
        config.simulation.interval_minutes = 5;
        let err = config.validate().unwrap_err();
        assert!(err.contains("fallback_length"), "{err}");

        config.features.fallback_length = 288;
        config.sequence.length = 288;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sequence_must_fit_shortest_trace() {
        let mut config = PipelineConfig::default();
        config.cohort.min_days = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_too_few_patients_for_folds() {
        let mut config = PipelineConfig::default();
        config.cohort.n_patients = 8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        let mut config = PipelineConfig::default();
        config.training.folds = 1;
        config.save_toml(&path).unwrap();
        assert!(matches!(
            PipelineConfig::load_toml(&path),
            Err(PipelineError::InvalidConfig(_))
        ));
    }
}
