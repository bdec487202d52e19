//! CGM Risk
//!
//! Synthetic continuous-glucose-monitoring cohorts and a stacking ensemble
//! that scores glucose-event risk.
//!
//! # Overview
//!
//! The crate generates per-patient glucose traces from a physiological
//! simulator, injects precursor drifts and acute hyperglycemic events into
//! positive patients, reduces every trace to a fixed 14-field feature record
//! plus a 96-sample sequence, and trains a logistic model, an LSTM and a meta
//! logistic model on top of them without out-of-fold leakage.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            CGM Risk                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  simulation/       - Timeline + physiological glucose simulator │
//! │  features/         - 14 glycemic statistics, area over threshold│
//! │  sequence_builder/ - Fixed-length, left-padded windows          │
//! │  cohort/           - Labels, event injection, cohort generation │
//! │  export/           - features.csv, sequences.npy, seq_index     │
//! │  preprocessing/    - Median imputer + standard scaler           │
//! │  models/           - RiskModel trait, logistic, LSTM            │
//! │  training/         - Splits, OOF stacking, metrics              │
//! │  inference/        - ModelBundle, ModelSlot, EnsemblePredictor  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use cgm_risk::prelude::*;
//!
//! let pipeline = Pipeline::from_config(PipelineConfig::default())?;
//! let cohort = pipeline.generate("data/synthetic")?;
//! let outcome = pipeline.train("data/synthetic", "models")?;
//!
//! let predictor = EnsemblePredictor::from_dir("models");
//! let patient = &cohort.dataset.records()[0];
//! let response = predictor.predict(&patient.features, &[110.0; 96]);
//! ```

pub mod cohort;
pub mod config;
pub mod error;
pub mod export;
pub mod features;
pub mod inference;
pub mod labeling;
pub mod models;
pub mod pipeline;
pub mod prelude;
pub mod preprocessing;
pub mod sequence_builder;
pub mod simulation;
pub mod trace;
pub mod training;
pub mod validation;

// Re-exports - Errors
pub use error::{PipelineError, Result};

// Re-exports - Config
pub use config::{ExperimentMetadata, PipelineConfig};

// Re-exports - Data
pub use trace::{Sample, Trace, GLUCOSE_CODE};

// Re-exports - Simulation
pub use simulation::{PhysiologySimulator, SimulationConfig, Timeline};

// Re-exports - Features
pub use features::{
    max_area_over_threshold, FeatureAggregator, FeatureConfig, FeatureRecord, GlycemicFeatures,
    FEATURE_COUNT, FEATURE_NAMES,
};

// Re-exports - Sequence Building
pub use sequence_builder::{SequenceAnchor, SequenceConfig, SequenceExtractor};

// Re-exports - Cohort
pub use cohort::{Cohort, CohortBuilder, CohortConfig};
pub use export::{CohortDataset, GenerationLog};

// Re-exports - Models
pub use models::{Learner, LogisticRegression, LstmClassifier, RiskModel};
pub use preprocessing::TabularPreprocessor;

// Re-exports - Training
pub use training::{EnsembleTrainer, TrainingConfig, TrainingOutcome};

// Re-exports - Inference
pub use inference::{EnsemblePredictor, ModelBundle, ModelSlot, PredictionResponse};

// Re-exports - Labeling
pub use labeling::{EventLabel, RiskHead, RiskLabel};

// Re-exports - Validation
pub use validation::{CheckOutcome, TraceReport, TraceValidator};

// Re-exports - Pipeline
pub use pipeline::Pipeline;
