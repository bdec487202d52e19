//! Error types shared by every pipeline stage.
//!
//! All fallible operations in the crate return [`Result`]. Configuration
//! validators keep returning `Result<(), String>` so they can be composed
//! cheaply; the pipeline lifts those messages into
//! [`PipelineError::InvalidConfig`] at its boundary.

use std::io;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors raised by generation, persistence, training and inference.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Feature table or raw trace CSV could not be read or written.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON artifact or index could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML configuration could not be parsed.
    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// TOML configuration could not be rendered.
    #[error("TOML write error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// Sequence tensor could not be read from `.npy`.
    #[error("NumPy read error: {0}")]
    NpyRead(#[from] ndarray_npy::ReadNpyError),

    /// Sequence tensor could not be written to `.npy`.
    #[error("NumPy write error: {0}")]
    NpyWrite(#[from] ndarray_npy::WriteNpyError),

    /// Array shape did not match the data handed to it.
    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// A configuration section failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Caller supplied malformed input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Persisted column layout differs from the canonical feature order.
    #[error("schema mismatch: expected {expected:?}, found {found:?}")]
    SchemaMismatch {
        /// Canonical column list
        expected: Vec<String>,
        /// Column list found on disk
        found: Vec<String>,
    },

    /// A feature row references a patient with no sequence row.
    #[error("no sequence row for patient '{0}'")]
    MissingSequence(String),

    /// A cross-validation fold trained on rows of a single class.
    #[error("fold {fold} has only class {class} in its training rows")]
    SingleClassFold {
        /// Zero-based fold index (`usize::MAX` for the full training split)
        fold: usize,
        /// The only class present
        class: u8,
    },

    /// Not enough rows to perform the requested operation.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// A solver produced a non-finite or singular result.
    #[error("numerical failure: {0}")]
    Numerical(String),

    /// Loaded artifacts disagree on feature order or sequence length.
    #[error("incompatible artifacts: {0}")]
    IncompatibleArtifacts(String),

    /// A model required for prediction was never loaded.
    #[error("{model} not loaded: {reason}")]
    ModelUnavailable {
        /// Human readable model name
        model: String,
        /// Why it is unavailable
        reason: String,
    },
}

impl From<String> for PipelineError {
    fn from(msg: String) -> Self {
        PipelineError::InvalidConfig(msg)
    }
}
