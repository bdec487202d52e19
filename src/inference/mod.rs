//! Serving-side ensemble prediction.
//!
//! # Artifact set
//!
//! ```text
//! <model_dir>/
//! ├── manifest.json       feature order, sequence length, meta column order
//! ├── preprocessor.json   median imputer + standard scaler
//! ├── logistic.json       tabular base model
//! ├── lstm.json           sequence base model
//! └── meta.json           meta logistic over [logistic, lstm]
//! ```
//!
//! A [`ModelBundle`] owns all five and is immutable once built. Publishing
//! writes a complete staging directory and renames it into place, so a
//! reader never sees a mix of old and new files. In memory, a
//! [`ModelSlot`] holds an `Arc<ModelBundle>` behind a lock that is only
//! taken to clone or replace the pointer.
//!
//! # Unavailable models
//!
//! If the bundle fails to load at startup the failure is captured once in
//! the slot. Every later [`EnsemblePredictor::predict`] call returns
//! [`PredictionResponse::Error`] instead of propagating the error.

use crate::error::{PipelineError, Result};
use crate::features::{GlycemicFeatures, FEATURE_COUNT, FEATURE_NAMES};
use crate::labeling::{RiskHead, RiskLabel};
use crate::models::{LogisticRegression, LstmClassifier, PatientInput, RiskModel};
use crate::preprocessing::TabularPreprocessor;
use ndarray::{arr1, ArrayView1};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const PREPROCESSOR_FILE: &str = "preprocessor.json";
pub const TABULAR_MODEL_FILE: &str = "logistic.json";
pub const SEQUENCE_MODEL_FILE: &str = "lstm.json";
pub const META_MODEL_FILE: &str = "meta.json";

/// Column order of the meta model's input.
pub const META_COLUMNS: [&str; 2] = ["logistic", "lstm"];

/// Preprocessing assumptions shared by every artifact in a bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleManifest {
    pub feature_names: Vec<String>,
    pub sequence_length: usize,
    pub meta_columns: Vec<String>,
    pub created_at: String,
    pub crate_version: String,
}

impl BundleManifest {
    /// Manifest for the canonical feature order and the given sequence length.
    pub fn current(sequence_length: usize) -> Self {
        Self {
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            sequence_length,
            meta_columns: META_COLUMNS.iter().map(|s| s.to_string()).collect(),
            created_at: chrono::Utc::now().to_rfc3339(),
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// The four fitted artifacts plus their manifest.
#[derive(Debug, Clone)]
pub struct ModelBundle {
    manifest: BundleManifest,
    preprocessor: TabularPreprocessor,
    tabular: LogisticRegression,
    sequence: LstmClassifier,
    meta: LogisticRegression,
}

impl ModelBundle {
    /// Assemble a bundle from freshly fitted artifacts.
    pub fn new(
        preprocessor: TabularPreprocessor,
        tabular: LogisticRegression,
        sequence: LstmClassifier,
        meta: LogisticRegression,
    ) -> Result<Self> {
        let bundle = Self {
            manifest: BundleManifest::current(sequence.sequence_length()),
            preprocessor,
            tabular,
            sequence,
            meta,
        };
        bundle.check_compatible()?;
        Ok(bundle)
    }

    /// Refuse any combination whose feature order or shapes disagree.
    pub fn check_compatible(&self) -> Result<()> {
        let incompatible = |msg: String| Err(PipelineError::IncompatibleArtifacts(msg));

        if self.manifest.feature_names != FEATURE_NAMES {
            return incompatible(format!(
                "feature order {:?} differs from the canonical order",
                self.manifest.feature_names
            ));
        }
        if self.manifest.meta_columns != META_COLUMNS {
            return incompatible(format!("meta columns {:?}", self.manifest.meta_columns));
        }
        if self.preprocessor.n_features() != FEATURE_COUNT {
            return incompatible(format!(
                "preprocessor expects {} features, not {FEATURE_COUNT}",
                self.preprocessor.n_features()
            ));
        }
        if self.tabular.n_features() != FEATURE_COUNT {
            return incompatible(format!(
                "tabular model expects {} features, not {FEATURE_COUNT}",
                self.tabular.n_features()
            ));
        }
        if self.meta.n_features() != META_COLUMNS.len() {
            return incompatible(format!("meta model expects {} inputs", self.meta.n_features()));
        }
        if self.sequence.sequence_length() != self.manifest.sequence_length {
            return incompatible(format!(
                "sequence model trained on length {}, manifest says {}",
                self.sequence.sequence_length(),
                self.manifest.sequence_length
            ));
        }
        Ok(())
    }

    pub fn manifest(&self) -> &BundleManifest {
        &self.manifest
    }

    pub fn preprocessor(&self) -> &TabularPreprocessor {
        &self.preprocessor
    }

    pub fn tabular(&self) -> &LogisticRegression {
        &self.tabular
    }

    pub fn sequence(&self) -> &LstmClassifier {
        &self.sequence
    }

    pub fn meta(&self) -> &LogisticRegression {
        &self.meta
    }

    /// `(tabular, sequence)` base probabilities for one patient.
    pub fn base_probabilities(&self, features: &GlycemicFeatures, sequence: &[f32]) -> Result<(f64, f64)> {
        if sequence.len() != self.manifest.sequence_length {
            return Err(PipelineError::InvalidInput(format!(
                "sequence length {} (model expects {})",
                sequence.len(),
                self.manifest.sequence_length
            )));
        }
        // Non-finite features are imputed by the preprocessor; sequences have no imputer.
        if let Some(i) = sequence.iter().position(|v| !v.is_finite()) {
            return Err(PipelineError::InvalidInput(format!(
                "sequence value {} at index {i} is not finite",
                sequence[i]
            )));
        }
        let raw = arr1(&features.to_array());
        let tabular = self.preprocessor.transform_row(raw.view());
        let input = PatientInput {
            tabular: tabular.view(),
            sequence: ArrayView1::from(sequence),
        };
        Ok((
            self.tabular.predict_probability(&input),
            self.sequence.predict_probability(&input),
        ))
    }

    /// Final ensemble probability for one patient.
    pub fn predict(&self, features: &GlycemicFeatures, sequence: &[f32]) -> Result<f64> {
        let (p_tabular, p_sequence) = self.base_probabilities(features, sequence)?;
        let stacked = arr1(&[p_tabular, p_sequence]);
        let probability = self.meta.predict_proba_row(stacked.view());
        if !probability.is_finite() {
            return Err(PipelineError::Numerical(format!(
                "ensemble produced {probability} (base probabilities {p_tabular}, {p_sequence})"
            )));
        }
        Ok(probability)
    }

    /// Publish into `dir`, replacing any previous bundle as one unit.
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        self.save_with(dir, |_| Ok(()))
    }

    /// [`ModelBundle::save`], letting `extra` add files to the staging
    /// directory so they are published together with the artifacts.
    ///
    /// If `extra` or any artifact write fails, the staging directory is
    /// removed and `dir` is left as it was.
    pub fn save_with<P, F>(&self, dir: P, extra: F) -> Result<()>
    where
        P: AsRef<Path>,
        F: FnOnce(&Path) -> Result<()>,
    {
        let dir = dir.as_ref();
        let staging = sibling(dir, "staging");
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        if let Err(e) = self.write_artifacts(&staging).and_then(|()| extra(&staging)) {
            if let Err(cleanup) = fs::remove_dir_all(&staging) {
                log::warn!("Could not remove staging directory {}: {cleanup}", staging.display());
            }
            return Err(e);
        }
        replace_dir(&staging, dir)?;

        log::info!("Published model bundle to {}", dir.display());
        Ok(())
    }

    fn write_artifacts(&self, dir: &Path) -> Result<()> {
        write_json(&dir.join(MANIFEST_FILE), &self.manifest)?;
        write_json(&dir.join(PREPROCESSOR_FILE), &self.preprocessor)?;
        write_json(&dir.join(TABULAR_MODEL_FILE), &self.tabular)?;
        self.sequence.save_json(dir.join(SEQUENCE_MODEL_FILE))?;
        write_json(&dir.join(META_MODEL_FILE), &self.meta)?;
        Ok(())
    }

    /// Load and cross-check a bundle written by [`ModelBundle::save`].
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let bundle = Self {
            manifest: read_json(&dir.join(MANIFEST_FILE))?,
            preprocessor: read_json(&dir.join(PREPROCESSOR_FILE))?,
            tabular: read_json(&dir.join(TABULAR_MODEL_FILE))?,
            sequence: LstmClassifier::load_json(dir.join(SEQUENCE_MODEL_FILE))?,
            meta: read_json(&dir.join(META_MODEL_FILE))?,
        };
        bundle.check_compatible()?;
        Ok(bundle)
    }
}

/// Rename `staging` over `dir`.
///
/// The previous `dir` is parked as a `retired` sibling and renamed back if
/// the swap fails. A leftover `retired` directory is only logged.
fn replace_dir(staging: &Path, dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::rename(staging, dir)?;
        return Ok(());
    }

    let retired = sibling(dir, "retired");
    if retired.exists() {
        fs::remove_dir_all(&retired)?;
    }
    fs::rename(dir, &retired)?;

    if let Err(e) = fs::rename(staging, dir) {
        match fs::rename(&retired, dir) {
            Ok(()) => log::warn!("Bundle swap into {} failed, previous bundle kept", dir.display()),
            Err(restore) => log::error!(
                "Bundle swap into {} failed and the previous bundle is left at {}: {restore}",
                dir.display(),
                retired.display()
            ),
        }
        return Err(e.into());
    }

    if let Err(e) = fs::remove_dir_all(&retired) {
        log::warn!("Could not remove retired bundle {}: {e}", retired.display());
    }
    Ok(())
}

fn sibling(dir: &Path, suffix: &str) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "models".to_string());
    dir.with_file_name(format!(".{name}.{suffix}"))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(file, value)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(file)?)
}

// ============================================================================
// Shared handle
// ============================================================================

#[derive(Debug, Clone)]
enum SlotState {
    Ready(Arc<ModelBundle>),
    Unavailable(String),
}

/// Shared, swappable reference to the serving bundle.
#[derive(Debug)]
pub struct ModelSlot {
    state: RwLock<SlotState>,
}

impl ModelSlot {
    pub fn ready(bundle: ModelBundle) -> Self {
        Self {
            state: RwLock::new(SlotState::Ready(Arc::new(bundle))),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            state: RwLock::new(SlotState::Unavailable(reason.into())),
        }
    }

    /// Load once from `dir`, recording any failure as the unavailable state.
    pub fn load_from_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        match ModelBundle::load(dir) {
            Ok(bundle) => {
                log::info!("Loaded model bundle from {}", dir.display());
                Self::ready(bundle)
            }
            Err(e) => {
                log::error!("Model bundle at {} unavailable: {e}", dir.display());
                Self::unavailable(e.to_string())
            }
        }
    }

    /// Current bundle, if one is loaded.
    pub fn current(&self) -> Option<Arc<ModelBundle>> {
        match &*self.state.read() {
            SlotState::Ready(bundle) => Some(Arc::clone(bundle)),
            SlotState::Unavailable(_) => None,
        }
    }

    /// Current bundle or [`PipelineError::ModelUnavailable`].
    pub fn require(&self, model: &str) -> Result<Arc<ModelBundle>> {
        match &*self.state.read() {
            SlotState::Ready(bundle) => Ok(Arc::clone(bundle)),
            SlotState::Unavailable(reason) => Err(PipelineError::ModelUnavailable {
                model: model.to_string(),
                reason: reason.clone(),
            }),
        }
    }

    /// Why the slot is empty, if it is.
    pub fn unavailable_reason(&self) -> Option<String> {
        match &*self.state.read() {
            SlotState::Ready(_) => None,
            SlotState::Unavailable(reason) => Some(reason.clone()),
        }
    }

    /// Swap in a new bundle; in-flight requests keep the one they cloned.
    pub fn publish(&self, bundle: ModelBundle) -> Option<Arc<ModelBundle>> {
        let next = SlotState::Ready(Arc::new(bundle));
        match std::mem::replace(&mut *self.state.write(), next) {
            SlotState::Ready(previous) => Some(previous),
            SlotState::Unavailable(_) => None,
        }
    }
}

// ============================================================================
// Predictor
// ============================================================================

/// Response handed to the serving layer.
///
/// Serializes as either `{"risk_probability": .., "risk_label": ..}` or
/// `{"error": ".."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredictionResponse {
    Assessment { risk_probability: f64, risk_label: RiskLabel },
    Error { error: String },
}

impl PredictionResponse {
    pub fn is_error(&self) -> bool {
        matches!(self, PredictionResponse::Error { .. })
    }

    pub fn probability(&self) -> Option<f64> {
        match self {
            PredictionResponse::Assessment { risk_probability, .. } => Some(*risk_probability),
            PredictionResponse::Error { .. } => None,
        }
    }

    pub fn label(&self) -> Option<RiskLabel> {
        match self {
            PredictionResponse::Assessment { risk_label, .. } => Some(*risk_label),
            PredictionResponse::Error { .. } => None,
        }
    }
}

/// Glucose-event ensemble predictor over a shared [`ModelSlot`].
#[derive(Debug, Clone)]
pub struct EnsemblePredictor {
    head: RiskHead,
    slot: Arc<ModelSlot>,
}

impl EnsemblePredictor {
    pub fn new(slot: Arc<ModelSlot>) -> Self {
        Self {
            head: RiskHead::GlucoseEvent,
            slot,
        }
    }

    /// Load the bundle at `dir` once; failures leave the predictor unavailable.
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self::new(Arc::new(ModelSlot::load_from_dir(dir)))
    }

    pub fn from_bundle(bundle: ModelBundle) -> Self {
        Self::new(Arc::new(ModelSlot::ready(bundle)))
    }

    pub fn slot(&self) -> &Arc<ModelSlot> {
        &self.slot
    }

    pub fn is_available(&self) -> bool {
        self.slot.current().is_some()
    }

    /// Risk assessment for one patient.
    pub fn predict(&self, features: &GlycemicFeatures, sequence: &[f32]) -> PredictionResponse {
        let model = self.head.model_name();
        let bundle = match self.slot.require(model) {
            Ok(bundle) => bundle,
            Err(e) => {
                log::debug!("{e}");
                return PredictionResponse::Error {
                    error: format!("{model} model not loaded."),
                };
            }
        };

        match bundle.predict(features, sequence) {
            Ok(probability) => PredictionResponse::Assessment {
                risk_probability: probability,
                risk_label: self.head.label(probability),
            },
            Err(e) => {
                log::warn!("{model} prediction rejected: {e}");
                PredictionResponse::Error { error: e.to_string() }
            }
        }
    }
}
