//! Synthetic cohort generation.
//!
//! # Pipeline
//!
//! ```text
//! ids synt_0001..synt_N ── shuffle ──► first half positive
//!        │
//!        ▼  (one seeded RNG stream, generation order)
//! ┌──────────────────────────┐
//! │ PhysiologySimulator      │  days ~ U{min_days..=max_days}
//! └──────────┬───────────────┘
//!            │ base trace ──────────────► FeatureAggregator ──► FeatureRecord
//!            ▼
//! ┌──────────────────────────┐
//! │ inject precursor + event │  positives only
//! └──────────┬───────────────┘
//!            │ injected trace ──► SequenceExtractor (anchored at event start)
//!            ▼
//!   raw trace, feature row (table reshuffled), sequence row + index entry
//! ```
//!
//! Features are aggregated from the trace *before* injection, so the acute
//! event itself never reaches the tabular model. The sequence ends at the
//! event start and therefore holds only the precursor drift.
//!
//! Simulation and injection consume the RNG sequentially; aggregation,
//! extraction and validation of the finished traces run in parallel.

use crate::error::{PipelineError, Result};
use crate::export::{write_raw_traces, CohortDataset, GenerationLog, GENERATION_LOG_FILE};
use crate::features::{FeatureAggregator, FeatureConfig, FeatureRecord, GlycemicFeatures};
use crate::labeling::EventLabel;
use crate::sequence_builder::{SequenceAnchor, SequenceConfig, SequenceExtractor};
use crate::simulation::{normal, PhysiologySimulator, SimulationConfig};
use crate::trace::{Trace, GLUCOSE_CODE};
use crate::validation::{check_features, TraceValidator};
use ndarray::Array2;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

// ============================================================================
// Configuration
// ============================================================================

/// Cohort composition and event injection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortConfig {
    /// Number of synthetic patients
    pub n_patients: usize,

    /// Minimum simulated days per patient
    pub min_days: usize,

    /// Maximum simulated days per patient (inclusive)
    pub max_days: usize,

    /// Fraction of the cohort labeled positive (floored)
    pub positive_fraction: f64,

    /// Baseline glucose mean for positives (mg/dL)
    pub positive_baseline: f64,

    /// Baseline glucose mean for negatives (mg/dL)
    pub negative_baseline: f64,

    /// Hyperglycemia threshold (mg/dL); event samples end at least 15 above it
    pub event_threshold: f64,

    /// Margin above the threshold every event sample is forced to
    pub event_floor_margin: f64,

    /// Range of the precursor ramp's final magnitude (mg/dL)
    pub precursor_drift: [f64; 2],

    /// Noise added to each precursor sample (SD, mg/dL)
    pub precursor_noise_sd: f64,

    /// Range of acute event lengths in samples (inclusive)
    pub event_duration: [usize; 2],

    /// Range of the additive jump applied to each event sample (mg/dL)
    pub event_jump: [f64; 2],

    /// Samples kept free after the latest possible event start
    pub event_tail: usize,

    /// Seed of the single generation RNG stream
    pub seed: u64,
}

impl Default for CohortConfig {
    fn default() -> Self {
        Self {
            n_patients: 300,
            min_days: 5,
            max_days: 14,
            positive_fraction: 0.5,
            positive_baseline: 116.0,
            negative_baseline: 112.0,
            event_threshold: 180.0,
            event_floor_margin: 15.0,
            precursor_drift: [8.0, 15.0],
            precursor_noise_sd: 1.5,
            event_duration: [8, 14],
            event_jump: [50.0, 100.0],
            event_tail: 12,
            seed: 42,
        }
    }
}

impl CohortConfig {
    /// Validate configuration.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.n_patients == 0 {
            return Err("n_patients must be > 0".to_string());
        }
        if self.min_days == 0 || self.min_days > self.max_days {
            return Err("require 0 < min_days <= max_days".to_string());
        }
        if !(self.positive_fraction > 0.0 && self.positive_fraction < 1.0) {
            return Err("positive_fraction must be in (0, 1)".to_string());
        }
        if self.precursor_drift[0] > self.precursor_drift[1] {
            return Err("precursor_drift range is inverted".to_string());
        }
        if self.event_duration[0] == 0 || self.event_duration[0] > self.event_duration[1] {
            return Err("event_duration must be a non-empty range of positive lengths".to_string());
        }
        if self.event_jump[0] > self.event_jump[1] {
            return Err("event_jump range is inverted".to_string());
        }
        if !self.precursor_noise_sd.is_finite() || self.precursor_noise_sd < 0.0 {
            return Err("precursor_noise_sd must be finite and >= 0".to_string());
        }
        Ok(())
    }

    /// Number of positive patients.
    pub fn positive_count(&self) -> usize {
        (self.n_patients as f64 * self.positive_fraction).floor() as usize
    }
}

// ============================================================================
// Patients
// ============================================================================

/// Generation parameters of one synthetic patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: String,
    pub days: usize,
    pub label: EventLabel,
    pub baseline_mean: f64,
    pub high_variability: bool,
}

/// Sample indices of an injected precursor and event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectedEvent {
    /// First precursor sample (`start - sequence_length`)
    pub precursor_start: usize,

    /// First acute event sample
    pub start: usize,

    /// Drawn event length; samples past the trace end are dropped
    pub duration: usize,
}

impl InjectedEvent {
    /// Exclusive end of the event, clamped to `len`.
    pub fn end(&self, len: usize) -> usize {
        (self.start + self.duration).min(len)
    }
}

/// A patient with its final (post-injection) trace.
#[derive(Debug, Clone)]
pub struct SimulatedPatient {
    pub patient: Patient,
    pub trace: Trace,
    pub event: Option<InjectedEvent>,
}

/// Generated cohort: per-patient traces plus the training dataset.
#[derive(Debug, Clone)]
pub struct Cohort {
    pub patients: Vec<SimulatedPatient>,
    pub dataset: CohortDataset,
    pub log: GenerationLog,
}

impl Cohort {
    /// Persist the dataset, raw traces and generation log under `dir`.
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        self.dataset.save(dir)?;
        let written = write_raw_traces(
            dir,
            self.patients
                .iter()
                .map(|p| (p.patient.id.as_str(), &p.trace)),
        )?;
        self.log.save(dir.join(GENERATION_LOG_FILE))?;
        log::info!("Wrote {written} raw traces and generation log to {}", dir.display());
        Ok(())
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Generates a labeled synthetic cohort.
///
/// # Example
///
/// ```
/// use cgm_risk::cohort::{CohortBuilder, CohortConfig};
///
/// let config = CohortConfig { n_patients: 6, min_days: 2, max_days: 3, ..Default::default() };
/// let builder = CohortBuilder::new(config, Default::default(), Default::default(), Default::default())?;
/// let cohort = builder.build_seeded()?;
/// assert_eq!(cohort.dataset.len(), 6);
/// assert_eq!(cohort.dataset.positive_count(), 3);
/// # Ok::<(), cgm_risk::PipelineError>(())
/// ```
#[derive(Debug, Clone)]
pub struct CohortBuilder {
    config: CohortConfig,
    simulator: PhysiologySimulator,
    aggregator: FeatureAggregator,
    extractor: SequenceExtractor,
    validator: TraceValidator,
}

impl CohortBuilder {
    /// Create a builder, validating every section.
    pub fn new(
        config: CohortConfig,
        simulation: SimulationConfig,
        features: FeatureConfig,
        sequence: SequenceConfig,
    ) -> Result<Self> {
        config.validate().map_err(PipelineError::InvalidConfig)?;
        simulation.validate().map_err(PipelineError::InvalidConfig)?;
        features.validate().map_err(PipelineError::InvalidConfig)?;
        sequence.validate().map_err(PipelineError::InvalidConfig)?;

        let simulator = PhysiologySimulator::new(simulation);
        let validator = TraceValidator::new(*simulator.timeline());
        Ok(Self {
            config,
            simulator,
            aggregator: FeatureAggregator::new(features),
            extractor: SequenceExtractor::new(sequence),
            validator,
        })
    }

    /// Cohort parameters.
    pub fn config(&self) -> &CohortConfig {
        &self.config
    }

    /// Build with a fresh RNG seeded from [`CohortConfig::seed`].
    pub fn build_seeded(&self) -> Result<Cohort> {
        let mut rng = ChaCha20Rng::seed_from_u64(self.config.seed);
        self.build(&mut rng)
    }

    /// Build the cohort from `rng`.
    pub fn build<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Cohort> {
        let cfg = &self.config;

        let mut ids: Vec<String> = (1..=cfg.n_patients).map(|i| format!("synt_{i:04}")).collect();
        ids.shuffle(rng);
        let n_pos = cfg.positive_count();

        log::info!(
            "Generating cohort: {} patients ({} positive), {}-{} days, seed {}",
            cfg.n_patients,
            n_pos,
            cfg.min_days,
            cfg.max_days,
            cfg.seed
        );

        // Sequential: every draw comes from the shared stream.
        let mut pending = Vec::with_capacity(ids.len());
        for (i, id) in ids.into_iter().enumerate() {
            let patient = self.draw_patient(rng, id, i < n_pos);
            let base = self.simulator.simulate(
                rng,
                patient.days,
                patient.baseline_mean,
                patient.high_variability,
            );

            let mut injected = base.clone();
            let event = if patient.label.is_positive() {
                let event = self.inject_event(rng, &mut injected);
                if event.is_none() {
                    log::warn!(
                        "Patient {} is too short ({} samples) for event injection",
                        patient.id,
                        base.len()
                    );
                }
                event
            } else {
                None
            };

            pending.push((patient, base, injected, event));
            if (i + 1) % 50 == 0 {
                log::debug!("Simulated {}/{} patients", i + 1, cfg.n_patients);
            }
        }

        // Parallel: pure per-patient work.
        let outputs: Vec<(FeatureRecord, Vec<f32>)> = pending
            .par_iter()
            .map(|(patient, base, injected, event)| {
                let report = self.validator.validate_trace(base, Some(patient.days));
                if report.has_failures() {
                    return Err(PipelineError::InvalidInput(format!(
                        "patient {} produced an invalid trace: {}",
                        patient.id,
                        report.failures().join("; ")
                    )));
                }
                for warning in report.warnings() {
                    log::warn!("Patient {}: {warning}", patient.id);
                }

                let features = self.aggregator.aggregate(base);
                ensure_finite_features(&patient.id, &features)?;
                let record = FeatureRecord {
                    patient_id: patient.id.clone(),
                    features,
                    label: patient.label.as_int(),
                };
                let anchor = event.map_or(SequenceAnchor::TraceEnd, |e| {
                    SequenceAnchor::EventStart(e.start)
                });
                Ok((record, self.extractor.extract_trace(injected, anchor)))
            })
            .collect::<Result<_>>()?;

        let length = self.extractor.length();
        let mut sequences = Array2::<f32>::zeros((outputs.len(), length));
        let mut index = BTreeMap::new();
        let mut records = Vec::with_capacity(outputs.len());
        for (row, (record, sequence)) in outputs.into_iter().enumerate() {
            for (dst, src) in sequences.row_mut(row).iter_mut().zip(sequence) {
                *dst = src;
            }
            index.insert(record.patient_id.clone(), row);
            records.push(record);
        }
        records.shuffle(rng);

        let positives_without_event = pending
            .iter()
            .filter(|(p, _, _, e)| p.label.is_positive() && e.is_none())
            .count();
        let patients: Vec<SimulatedPatient> = pending
            .into_iter()
            .map(|(patient, _, trace, event)| SimulatedPatient {
                patient,
                trace,
                event,
            })
            .collect();

        let dataset = CohortDataset::new(records, sequences, index)?;
        let log = GenerationLog {
            n_patients: patients.len(),
            positive_class_count: dataset.positive_count(),
            positives_without_event,
            seed: cfg.seed,
            sequence_length: length,
            event_threshold: cfg.event_threshold,
            generated_at: chrono::Utc::now().to_rfc3339(),
        };

        log::info!(
            "Cohort ready: {} rows, {} positive, {} positives without event",
            dataset.len(),
            log.positive_class_count,
            positives_without_event
        );

        Ok(Cohort {
            patients,
            dataset,
            log,
        })
    }

    fn draw_patient<R: Rng + ?Sized>(&self, rng: &mut R, id: String, positive: bool) -> Patient {
        let cfg = &self.config;
        let days = rng.gen_range(cfg.min_days..=cfg.max_days);
        let (label, baseline_mean) = if positive {
            (EventLabel::Positive, cfg.positive_baseline)
        } else {
            (EventLabel::Negative, cfg.negative_baseline)
        };
        Patient {
            id,
            days,
            label,
            baseline_mean,
            high_variability: positive,
        }
    }

    /// Inject a precursor ramp and an acute hyperglycemic event into `trace`.
    ///
    /// The event start is drawn from `[L, len - tail]` where `L` is the
    /// sequence length, so a full precursor window always precedes it.
    /// Returns `None` (trace untouched) when `len <= L + tail`.
    ///
    /// Missing precursor samples stay missing; missing event samples are set
    /// to `threshold + margin`.
    pub fn inject_event<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        trace: &mut Trace,
    ) -> Option<InjectedEvent> {
        let cfg = &self.config;
        let window = self.extractor.length();

        let positions: Vec<usize> = trace
            .samples()
            .iter()
            .enumerate()
            .filter(|(_, s)| s.code == GLUCOSE_CODE)
            .map(|(i, _)| i)
            .collect();
        let len = positions.len();
        if len <= window + cfg.event_tail {
            return None;
        }

        let start = rng.gen_range(window..=len - cfg.event_tail);
        let precursor_start = start - window;
        let samples = trace.samples_mut();

        let magnitude = rng.gen_range(cfg.precursor_drift[0]..=cfg.precursor_drift[1]);
        for (k, &pos) in positions[precursor_start..start].iter().enumerate() {
            let ramp = if window > 1 {
                magnitude * k as f64 / (window - 1) as f64
            } else {
                0.0
            };
            let noise = normal(rng, 0.0, cfg.precursor_noise_sd);
            if let Some(v) = samples[pos].value.as_mut() {
                *v += ramp + noise;
            }
        }

        let duration = rng.gen_range(cfg.event_duration[0]..=cfg.event_duration[1]);
        let floor = cfg.event_threshold + cfg.event_floor_margin;
        for &pos in positions.iter().skip(start).take(duration) {
            let jump = rng.gen_range(cfg.event_jump[0]..=cfg.event_jump[1]);
            let value = samples[pos].value.map_or(floor, |v| (v + jump).max(floor));
            samples[pos].value = Some(value);
        }

        Some(InjectedEvent {
            precursor_start,
            start,
            duration,
        })
    }
}

/// Reject aggregates that would write NaN or infinity into the feature table.
fn ensure_finite_features(patient_id: &str, features: &GlycemicFeatures) -> Result<()> {
    let report = check_features(features);
    if report.has_failures() {
        return Err(PipelineError::Numerical(format!(
            "patient {patient_id} has non-finite features: {}",
            report.failures().join("; ")
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_builder(n_patients: usize) -> CohortBuilder {
        let config = CohortConfig {
            n_patients,
            min_days: 2,
            max_days: 3,
            ..Default::default()
        };
        CohortBuilder::new(
            config,
            SimulationConfig::default(),
            FeatureConfig::default(),
            SequenceConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_balanced_labels_and_index() {
        let cohort = small_builder(10).build_seeded().unwrap();
        assert_eq!(cohort.dataset.len(), 10);
        assert_eq!(cohort.dataset.positive_count(), 5);
        assert_eq!(cohort.dataset.index().len(), 10);
        assert_eq!(cohort.dataset.sequences().dim(), (10, 96));
        assert!(cohort.dataset.aligned_sequences().is_ok());
    }

    #[test]
    fn test_positive_patients_have_events() {
        let cohort = small_builder(8).build_seeded().unwrap();
        for p in &cohort.patients {
            let len = p.trace.len();
            assert_eq!(len, p.patient.days * 96);
            match (&p.patient.label, &p.event) {
                (EventLabel::Positive, Some(event)) => {
                    assert!(event.start >= 96 && event.start <= len - 12);
                    let values = p.trace.values();
                    for v in &values[event.start..event.end(len)] {
                        assert!(v.unwrap() >= 195.0);
                    }
                }
                (EventLabel::Negative, None) => {}
                other => panic!("unexpected label/event pair {other:?}"),
            }
        }
    }

    #[test]
    fn test_sequence_excludes_event() {
        let cohort = small_builder(6).build_seeded().unwrap();
        for p in cohort.patients.iter().filter(|p| p.event.is_some()) {
            let seq = cohort.dataset.sequence_for(&p.patient.id).unwrap();
            let event = p.event.unwrap();
            let filled = p.trace.filled_values().unwrap();
            assert_eq!(seq[95], filled[event.start - 1] as f32);
        }
    }

    #[test]
    fn test_same_seed_same_cohort() {
        let builder = small_builder(6);
        let a = builder.build_seeded().unwrap();
        let b = builder.build_seeded().unwrap();
        assert_eq!(a.dataset, b.dataset);
    }

    #[test]
    fn test_short_trace_skips_injection() {
        let builder = small_builder(2);
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let times = builder.simulator.timeline().timestamps(1);
        let mut trace = Trace::from_glucose(&times, &vec![Some(110.0); times.len()]);
        let before = trace.clone();
        assert!(builder.inject_event(&mut rng, &mut trace).is_none());
        assert_eq!(trace, before);
    }

    #[test]
    fn test_missing_event_sample_set_to_floor() {
        let builder = small_builder(2);
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let times = builder.simulator.timeline().timestamps(3);
        let mut trace = Trace::from_glucose(&times, &vec![None; times.len()]);
        let event = builder.inject_event(&mut rng, &mut trace).unwrap();
        let values = trace.values();
        assert_eq!(values[event.start], Some(195.0));
        assert_eq!(values[event.precursor_start], None);
    }

    #[test]
    fn test_non_finite_features_stop_the_record() {
        assert!(ensure_finite_features("synt_0001", &GlycemicFeatures::default()).is_ok());

        let features = GlycemicFeatures {
            kurtosis: f64::NAN,
            ..GlycemicFeatures::default()
        };
        match ensure_finite_features("synt_0001", &features) {
            Err(PipelineError::Numerical(msg)) => {
                assert!(msg.contains("synt_0001"));
                assert!(msg.contains("kurtosis"));
            }
            other => panic!("expected a numerical error, got {other:?}"),
        }
    }

    #[test]
    fn test_generated_traces_pass_validation() {
        let builder = small_builder(2);
        let mut rng = ChaCha20Rng::seed_from_u64(11);
        let days = 2;
        let trace = builder.simulator.simulate(&mut rng, days, 120.0, false);
        let report = builder.validator.validate_trace(&trace, Some(days));
        assert!(!report.has_failures(), "{report}");

        let report = builder.validator.validate_trace(&trace, Some(days + 1));
        assert!(report.failures().iter().any(|f| f.starts_with("trace_length")));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = CohortConfig {
            min_days: 4,
            max_days: 2,
            ..Default::default()
        };
        let result = CohortBuilder::new(
            config,
            SimulationConfig::default(),
            FeatureConfig::default(),
            SequenceConfig::default(),
        );
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }
}
