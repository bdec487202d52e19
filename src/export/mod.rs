//! Cohort Dataset Export Module
//!
//! Persists a generated cohort for the trainer and reloads it.
//!
//! # Layout
//!
//! ```text
//! <dir>/
//! ├── features.csv          patient_id, 14 features (canonical order), label
//! ├── sequences.npy         [N_patients, L] float32, generation order
//! ├── seq_index.json        { "synt_0001": row, ... }
//! ├── generation_log.json   counts, seed, threshold, timestamp
//! └── raw/<patient_id>.csv  timestamp, code, value (empty = missing)
//! ```
//!
//! The feature table is written in shuffled order; the sequence tensor is in
//! generation order. `seq_index.json` is the only link between the two.
//!
//! # Example
//!
//! ```ignore
//! use cgm_risk::export::CohortDataset;
//!
//! let dataset = CohortDataset::load("data/synthetic")?;
//! let aligned = dataset.aligned_sequences()?; // rows follow the feature table
//! ```

use crate::error::{PipelineError, Result};
use crate::features::{FeatureRecord, GlycemicFeatures, FEATURE_COUNT};
use crate::trace::Trace;
use ndarray::{Array2, ArrayView1};
use ndarray_npy::{ReadNpyExt, WriteNpyExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Feature table file name.
pub const FEATURES_FILE: &str = "features.csv";

/// Sequence tensor file name.
pub const SEQUENCES_FILE: &str = "sequences.npy";

/// Patient id → sequence row mapping file name.
pub const SEQUENCE_INDEX_FILE: &str = "seq_index.json";

/// Generation summary file name.
pub const GENERATION_LOG_FILE: &str = "generation_log.json";

/// Per-patient raw trace directory.
pub const RAW_DIR: &str = "raw";

/// Feature table, sequence tensor and the index linking them.
#[derive(Debug, Clone, PartialEq)]
pub struct CohortDataset {
    records: Vec<FeatureRecord>,
    sequences: Array2<f32>,
    index: BTreeMap<String, usize>,
}

impl CohortDataset {
    /// Assemble a dataset.
    ///
    /// Every index entry must point at an existing sequence row.
    pub fn new(
        records: Vec<FeatureRecord>,
        sequences: Array2<f32>,
        index: BTreeMap<String, usize>,
    ) -> Result<Self> {
        let rows = sequences.nrows();
        if let Some((id, &row)) = index.iter().find(|(_, row)| **row >= rows) {
            return Err(PipelineError::InvalidInput(format!(
                "sequence index maps '{id}' to row {row} but the tensor has {rows} rows"
            )));
        }
        Ok(Self {
            records,
            sequences,
            index,
        })
    }

    /// Feature rows in table order.
    pub fn records(&self) -> &[FeatureRecord] {
        &self.records
    }

    /// Sequence tensor in generation order.
    pub fn sequences(&self) -> &Array2<f32> {
        &self.sequences
    }

    /// Patient id → sequence row.
    pub fn index(&self) -> &BTreeMap<String, usize> {
        &self.index
    }

    /// Number of feature rows.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the feature table is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Samples per sequence.
    pub fn sequence_length(&self) -> usize {
        self.sequences.ncols()
    }

    /// Number of event-positive rows.
    pub fn positive_count(&self) -> usize {
        self.records.iter().filter(|r| r.label == 1).count()
    }

    /// Labels in table order.
    pub fn labels(&self) -> Vec<u8> {
        self.records.iter().map(|r| r.label).collect()
    }

    /// `[N, 14]` feature matrix in table order.
    pub fn feature_matrix(&self) -> Array2<f64> {
        let mut matrix = Array2::zeros((self.records.len(), FEATURE_COUNT));
        for (mut row, record) in matrix.rows_mut().into_iter().zip(&self.records) {
            for (dst, src) in row.iter_mut().zip(record.features.to_array()) {
                *dst = src;
            }
        }
        matrix
    }

    /// Sequence row for one patient.
    pub fn sequence_for(&self, patient_id: &str) -> Result<ArrayView1<'_, f32>> {
        self.index
            .get(patient_id)
            .map(|&row| self.sequences.row(row))
            .ok_or_else(|| PipelineError::MissingSequence(patient_id.to_string()))
    }

    /// `[N, L]` sequences reordered to follow the feature table.
    ///
    /// Fails with [`PipelineError::MissingSequence`] for the first record
    /// whose patient id has no index entry.
    pub fn aligned_sequences(&self) -> Result<Array2<f32>> {
        let mut aligned = Array2::zeros((self.records.len(), self.sequence_length()));
        for (mut dst, record) in aligned.rows_mut().into_iter().zip(&self.records) {
            dst.assign(&self.sequence_for(&record.patient_id)?);
        }
        Ok(aligned)
    }

    /// Write `features.csv`, `sequences.npy` and `seq_index.json` into `dir`.
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        write_feature_table(&dir.join(FEATURES_FILE), &self.records)?;

        let mut npy = BufWriter::new(File::create(dir.join(SEQUENCES_FILE))?);
        self.sequences.write_npy(&mut npy)?;

        let index_file = BufWriter::new(File::create(dir.join(SEQUENCE_INDEX_FILE))?);
        serde_json::to_writer_pretty(index_file, &self.index)?;

        log::info!(
            "Exported cohort dataset to {}: {} rows, sequences {:?}",
            dir.display(),
            self.records.len(),
            self.sequences.dim()
        );
        Ok(())
    }

    /// Load a dataset written by [`CohortDataset::save`].
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let records = read_feature_table(&dir.join(FEATURES_FILE))?;

        let npy = BufReader::new(File::open(dir.join(SEQUENCES_FILE))?);
        let sequences = Array2::<f32>::read_npy(npy)?;

        let index_file = BufReader::new(File::open(dir.join(SEQUENCE_INDEX_FILE))?);
        let index: BTreeMap<String, usize> = serde_json::from_reader(index_file)?;

        Self::new(records, sequences, index)
    }
}

fn write_feature_table(path: &Path, records: &[FeatureRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(FeatureRecord::header())?;

    for record in records {
        let f = &record.features;
        let mut row = Vec::with_capacity(FEATURE_COUNT + 2);
        row.push(record.patient_id.clone());
        // Counts are written as integers, the rest in shortest round-trip form.
        row.extend(f.to_array()[..FEATURE_COUNT - 2].iter().map(|v| v.to_string()));
        row.push(f.short_spikes.to_string());
        row.push(f.sustained_spikes.to_string());
        row.push(record.label.to_string());
        writer.write_record(&row)?;
    }

    writer.flush()?;
    Ok(())
}

fn read_feature_table(path: &Path) -> Result<Vec<FeatureRecord>> {
    let mut reader = csv::Reader::from_path(path)?;

    let expected = FeatureRecord::header();
    let found: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if found != expected {
        return Err(PipelineError::SchemaMismatch { expected, found });
    }

    let mut records = Vec::new();
    for (row, result) in reader.records().enumerate() {
        let fields = result?;
        let parse_err = |column: usize, value: &str| {
            PipelineError::InvalidInput(format!(
                "{}: row {row}, column '{}': cannot parse '{value}'",
                path.display(),
                expected[column]
            ))
        };

        let mut values = [0.0_f64; FEATURE_COUNT];
        for (i, slot) in values.iter_mut().enumerate() {
            let raw = &fields[i + 1];
            *slot = raw.parse().map_err(|_| parse_err(i + 1, raw))?;
        }
        let raw_label = &fields[FEATURE_COUNT + 1];
        let label: u8 = raw_label
            .parse()
            .map_err(|_| parse_err(FEATURE_COUNT + 1, raw_label))?;

        records.push(FeatureRecord {
            patient_id: fields[0].to_string(),
            features: GlycemicFeatures::from_array(&values),
            label,
        });
    }

    Ok(records)
}

/// Write one `raw/<patient_id>.csv` per trace under `dir`.
///
/// Returns the number of files written.
pub fn write_raw_traces<'a, P, I>(dir: P, traces: I) -> Result<usize>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = (&'a str, &'a Trace)>,
{
    let raw_dir = dir.as_ref().join(RAW_DIR);
    fs::create_dir_all(&raw_dir)?;

    let mut written = 0;
    for (patient_id, trace) in traces {
        trace.write_csv(raw_dir.join(format!("{patient_id}.csv")))?;
        written += 1;
    }
    Ok(written)
}

/// Summary of one generation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationLog {
    /// Patients generated
    pub n_patients: usize,

    /// Event-positive patients
    pub positive_class_count: usize,

    /// Patients labeled positive whose trace was too short for an event
    pub positives_without_event: usize,

    /// RNG seed
    pub seed: u64,

    /// Samples per sequence
    pub sequence_length: usize,

    /// Hyperglycemia threshold used for event injection (mg/dL)
    pub event_threshold: f64,

    /// Generation time (RFC 3339)
    pub generated_at: String,
}

impl GenerationLog {
    /// Write as pretty JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    /// Read a log written by [`GenerationLog::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(file)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::TempDir;

    fn record(id: &str, mean: f64, label: u8) -> FeatureRecord {
        FeatureRecord {
            patient_id: id.to_string(),
            features: GlycemicFeatures {
                mean_glucose: mean,
                cov: 0.1 / 3.0,
                short_spikes: 3,
                ..Default::default()
            },
            label,
        }
    }

    fn sample_dataset() -> CohortDataset {
        let records = vec![record("synt_0002", 118.4, 1), record("synt_0001", 111.0, 0)];
        let sequences = array![[1.0_f32, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let index = BTreeMap::from([("synt_0001".to_string(), 0), ("synt_0002".to_string(), 1)]);
        CohortDataset::new(records, sequences, index).unwrap()
    }

    #[test]
    fn test_aligned_sequences_follow_table_order() {
        let dataset = sample_dataset();
        let aligned = dataset.aligned_sequences().unwrap();
        assert_eq!(aligned.row(0).to_vec(), vec![4.0, 5.0, 6.0]);
        assert_eq!(aligned.row(1).to_vec(), vec![1.0, 2.0, 3.0]);
        assert_eq!(dataset.labels(), vec![1, 0]);
        assert_eq!(dataset.feature_matrix()[[0, 0]], 118.4);
    }

    #[test]
    fn test_missing_index_entry_is_error() {
        let records = vec![record("synt_0003", 100.0, 0)];
        let dataset = CohortDataset::new(records, array![[1.0_f32]], BTreeMap::new()).unwrap();
        assert!(matches!(
            dataset.aligned_sequences(),
            Err(PipelineError::MissingSequence(id)) if id == "synt_0003"
        ));
    }

    #[test]
    fn test_index_out_of_range_rejected() {
        let index = BTreeMap::from([("a".to_string(), 5)]);
        assert!(CohortDataset::new(Vec::new(), array![[1.0_f32]], index).is_err());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let dataset = sample_dataset();
        dataset.save(dir.path()).unwrap();

        let loaded = CohortDataset::load(dir.path()).unwrap();
        assert_eq!(loaded, dataset);
    }

    #[test]
    fn test_header_mismatch_detected() {
        let dir = TempDir::new().unwrap();
        sample_dataset().save(dir.path()).unwrap();
        fs::write(dir.path().join(FEATURES_FILE), "patient_id,mean,label\nx,1,0\n").unwrap();

        let err = CohortDataset::load(dir.path()).unwrap_err();
        assert!(matches!(err, PipelineError::SchemaMismatch { .. }));
    }
}
