//! Prelude module for convenient imports.
//!
//! # Usage
//!
//! ```
//! use cgm_risk::prelude::*;
//!
//! let config = PipelineConfig::default();
//! let pipeline = Pipeline::from_config(config)?;
//! assert_eq!(pipeline.config().sequence.length, 96);
//! # Ok::<(), PipelineError>(())
//! ```
//!
//! # What's Included
//!
//! ## Core Pipeline
//! - [`Pipeline`], [`PipelineConfig`], [`PipelineError`], [`Result`]
//!
//! ## Generation
//! - [`CohortBuilder`], [`CohortConfig`], [`PhysiologySimulator`], [`Trace`]
//! - [`FeatureAggregator`], [`GlycemicFeatures`], [`SequenceExtractor`]
//!
//! ## Training
//! - [`CohortDataset`], [`EnsembleTrainer`], [`TrainingConfig`]
//! - [`RiskModel`] / [`Learner`] traits and the two base models
//!
//! ## Serving
//! - [`ModelBundle`], [`ModelSlot`], [`EnsemblePredictor`], [`PredictionResponse`]
//! - [`RiskHead`], [`RiskLabel`]

// Core pipeline
pub use crate::config::{ExperimentMetadata, PipelineConfig};
pub use crate::error::{PipelineError, Result};
pub use crate::pipeline::Pipeline;

// Generation
pub use crate::cohort::{Cohort, CohortBuilder, CohortConfig};
pub use crate::features::{FeatureAggregator, FeatureConfig, GlycemicFeatures, FEATURE_NAMES};
pub use crate::sequence_builder::{SequenceAnchor, SequenceConfig, SequenceExtractor};
pub use crate::simulation::{PhysiologySimulator, SimulationConfig};
pub use crate::trace::Trace;

// Training
pub use crate::export::CohortDataset;
pub use crate::models::{Learner, LogisticConfig, LogisticRegression, LstmClassifier, LstmConfig, RiskModel};
pub use crate::training::{EnsembleTrainer, TrainingConfig, TrainingOutcome};

// Serving
pub use crate::inference::{EnsemblePredictor, ModelBundle, ModelSlot, PredictionResponse};
pub use crate::labeling::{EventLabel, RiskHead, RiskLabel};
