//! Single-layer LSTM sequence classifier.
//!
//! ```text
//! x_t (standardized glucose) ──► LSTM(H) ──► h_T ──► dropout ──► Dense(D, ReLU)
//!                                                             ──► dropout ──► Dense(1, sigmoid)
//! ```
//!
//! Trained with binary cross-entropy, Adam and full backpropagation through
//! time. Gradients of a mini-batch are accumulated in parallel across
//! samples; dropout masks are drawn up front from the seeded RNG so results
//! do not depend on thread scheduling.
//!
//! Early stopping holds out `validation_fraction` of the rows passed to
//! [`LstmClassifier::fit_sequences`], stops after `patience` epochs without a
//! validation-loss improvement and restores the best weights.
//!
//! Gate layout of the fused kernel (rows of `w`, `4H × (1 + H)`):
//!
//! | Rows | Gate | Activation |
//! |------|------|------------|
//! | `0..H` | input | sigmoid |
//! | `H..2H` | forget | sigmoid (bias initialised to 1) |
//! | `2H..3H` | candidate | tanh |
//! | `3H..4H` | output | sigmoid |

use super::{sigmoid, Learner, PatientInput, RiskModel, TrainingSet};
use crate::error::{PipelineError, Result};
use crate::preprocessing::SequenceStandardizer;
use ndarray::{ArrayView1, ArrayView2, Axis};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

const PROBABILITY_CLIP: f64 = 1e-7;

/// LSTM architecture and training settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LstmConfig {
    /// LSTM hidden units (H)
    pub hidden_units: usize,

    /// Units of the ReLU dense layer (D)
    pub dense_units: usize,

    /// Dropout rate applied to the final hidden state
    pub hidden_dropout: f64,

    /// Dropout rate applied to the dense activations
    pub dense_dropout: f64,

    /// Adam learning rate
    pub learning_rate: f64,

    /// Mini-batch size
    pub batch_size: usize,

    /// Maximum training epochs
    pub max_epochs: usize,

    /// Epochs without validation improvement before stopping
    pub patience: usize,

    /// Fraction of the fit rows held out for early stopping (0 disables it)
    pub validation_fraction: f64,

    /// Global gradient-norm clip
    pub clip_norm: f64,
}

impl Default for LstmConfig {
    fn default() -> Self {
        Self {
            hidden_units: 48,
            dense_units: 24,
            hidden_dropout: 0.25,
            dense_dropout: 0.2,
            learning_rate: 1e-3,
            batch_size: 32,
            max_epochs: 60,
            patience: 6,
            validation_fraction: 0.12,
            clip_norm: 5.0,
        }
    }
}

impl LstmConfig {
    /// Smaller network used for the out-of-fold base models.
    pub fn fold() -> Self {
        Self {
            hidden_units: 32,
            dense_units: 16,
            max_epochs: 40,
            patience: 8,
            ..Self::default()
        }
    }

    /// Validate configuration.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.hidden_units == 0 || self.dense_units == 0 {
            return Err("LSTM layer sizes must be > 0".to_string());
        }
        for (name, rate) in [
            ("hidden_dropout", self.hidden_dropout),
            ("dense_dropout", self.dense_dropout),
        ] {
            if !(0.0..1.0).contains(&rate) {
                return Err(format!("{name} must be in [0, 1)"));
            }
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err("learning_rate must be finite and > 0".to_string());
        }
        if self.batch_size == 0 || self.max_epochs == 0 {
            return Err("batch_size and max_epochs must be > 0".to_string());
        }
        if !(0.0..1.0).contains(&self.validation_fraction) {
            return Err("validation_fraction must be in [0, 1)".to_string());
        }
        if self.clip_norm.is_nan() || self.clip_norm <= 0.0 {
            return Err("clip_norm must be > 0".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// Parameters
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Params {
    hidden: usize,
    dense: usize,
    /// Fused LSTM kernel `[4H, 1 + H]`: input weight then recurrent weights
    w: Vec<f64>,
    b: Vec<f64>,
    /// Dense kernel `[D, H]`
    wd: Vec<f64>,
    bd: Vec<f64>,
    wo: Vec<f64>,
    bo: Vec<f64>,
}

impl Params {
    fn zeros(hidden: usize, dense: usize) -> Self {
        Self {
            hidden,
            dense,
            w: vec![0.0; 4 * hidden * (1 + hidden)],
            b: vec![0.0; 4 * hidden],
            wd: vec![0.0; dense * hidden],
            bd: vec![0.0; dense],
            wo: vec![0.0; dense],
            bo: vec![0.0; 1],
        }
    }

    /// Glorot-uniform kernels, zero biases, forget bias 1.
    fn init<R: Rng + ?Sized>(hidden: usize, dense: usize, rng: &mut R) -> Self {
        let mut params = Self::zeros(hidden, dense);
        let glorot = |fan_in: usize, fan_out: usize| (6.0 / (fan_in + fan_out) as f64).sqrt();

        let limit = glorot(1 + hidden, 4 * hidden);
        params.w.iter_mut().for_each(|v| *v = rng.gen_range(-limit..=limit));
        params.b[hidden..2 * hidden].iter_mut().for_each(|v| *v = 1.0);

        let limit = glorot(hidden, dense);
        params.wd.iter_mut().for_each(|v| *v = rng.gen_range(-limit..=limit));

        let limit = glorot(dense, 1);
        params.wo.iter_mut().for_each(|v| *v = rng.gen_range(-limit..=limit));
        params
    }

    fn tensors(&self) -> [&[f64]; 6] {
        [&self.w, &self.b, &self.wd, &self.bd, &self.wo, &self.bo]
    }

    fn tensors_mut(&mut self) -> [&mut [f64]; 6] {
        [
            &mut self.w,
            &mut self.b,
            &mut self.wd,
            &mut self.bd,
            &mut self.wo,
            &mut self.bo,
        ]
    }

    fn add_assign(&mut self, other: &Params) {
        for (dst, src) in self.tensors_mut().into_iter().zip(other.tensors()) {
            dst.iter_mut().zip(src).for_each(|(a, b)| *a += b);
        }
    }

    fn scale(&mut self, factor: f64) {
        for tensor in self.tensors_mut() {
            tensor.iter_mut().for_each(|v| *v *= factor);
        }
    }

    fn norm(&self) -> f64 {
        self.tensors()
            .iter()
            .flat_map(|t| t.iter())
            .map(|v| v * v)
            .sum::<f64>()
            .sqrt()
    }

    fn forward(&self, inputs: &[f64], masks: &Masks) -> Forward {
        let h = self.hidden;
        let d = self.dense;
        let stride = 1 + h;
        let steps = inputs.len();

        let mut gates = vec![0.0; steps * 4 * h];
        let mut cells = vec![0.0; steps * h];
        let mut tanh_cells = vec![0.0; steps * h];
        let mut hiddens = vec![0.0; steps * h];
        let mut h_prev = vec![0.0; h];
        let mut c_prev = vec![0.0; h];

        for (t, &x) in inputs.iter().enumerate() {
            let g = &mut gates[t * 4 * h..(t + 1) * 4 * h];
            for (r, gate) in g.iter_mut().enumerate() {
                let row = &self.w[r * stride..(r + 1) * stride];
                let z = self.b[r] + row[0] * x + dot(&row[1..], &h_prev);
                *gate = if r / h == 2 { z.tanh() } else { sigmoid(z) };
            }
            for k in 0..h {
                let (i, f, cand, o) = (g[k], g[h + k], g[2 * h + k], g[3 * h + k]);
                let c = f * c_prev[k] + i * cand;
                let tc = c.tanh();
                cells[t * h + k] = c;
                tanh_cells[t * h + k] = tc;
                hiddens[t * h + k] = o * tc;
            }
            h_prev.copy_from_slice(&hiddens[t * h..(t + 1) * h]);
            c_prev.copy_from_slice(&cells[t * h..(t + 1) * h]);
        }

        let hd: Vec<f64> = h_prev.iter().zip(&masks.hidden).map(|(v, m)| v * m).collect();
        let pre: Vec<f64> = (0..d)
            .map(|j| self.bd[j] + dot(&self.wd[j * h..(j + 1) * h], &hd))
            .collect();
        let rd: Vec<f64> = pre
            .iter()
            .zip(&masks.dense)
            .map(|(v, m)| v.max(0.0) * m)
            .collect();
        let probability = sigmoid(self.bo[0] + dot(&self.wo, &rd));

        Forward {
            gates,
            cells,
            tanh_cells,
            hiddens,
            hd,
            pre,
            rd,
            probability,
        }
    }

    /// Accumulate d(BCE)/dθ for one sample into `grad`.
    fn backward(&self, inputs: &[f64], label: f64, masks: &Masks, fw: &Forward, grad: &mut Params) {
        let h = self.hidden;
        let d = self.dense;
        let stride = 1 + h;

        let dlogit = fw.probability - label;
        grad.bo[0] += dlogit;

        let mut d_hd = vec![0.0; h];
        for j in 0..d {
            grad.wo[j] += dlogit * fw.rd[j];
            if fw.pre[j] <= 0.0 {
                continue;
            }
            let d_pre = dlogit * self.wo[j] * masks.dense[j];
            grad.bd[j] += d_pre;
            for k in 0..h {
                grad.wd[j * h + k] += d_pre * fw.hd[k];
                d_hd[k] += d_pre * self.wd[j * h + k];
            }
        }

        let mut dh: Vec<f64> = d_hd.iter().zip(&masks.hidden).map(|(g, m)| g * m).collect();
        let mut dc = vec![0.0; h];
        let mut dz = vec![0.0; 4 * h];
        let zeros = vec![0.0; h];

        for t in (0..inputs.len()).rev() {
            let g = &fw.gates[t * 4 * h..(t + 1) * 4 * h];
            let tc = &fw.tanh_cells[t * h..(t + 1) * h];
            let (c_prev, h_prev) = if t > 0 {
                (&fw.cells[(t - 1) * h..t * h], &fw.hiddens[(t - 1) * h..t * h])
            } else {
                (&zeros[..], &zeros[..])
            };

            for k in 0..h {
                let (i, f, cand, o) = (g[k], g[h + k], g[2 * h + k], g[3 * h + k]);
                dc[k] += dh[k] * o * (1.0 - tc[k] * tc[k]);
                dz[k] = dc[k] * cand * i * (1.0 - i);
                dz[h + k] = dc[k] * c_prev[k] * f * (1.0 - f);
                dz[2 * h + k] = dc[k] * i * (1.0 - cand * cand);
                dz[3 * h + k] = dh[k] * tc[k] * o * (1.0 - o);
                dc[k] *= f;
            }

            let x = inputs[t];
            dh.iter_mut().for_each(|v| *v = 0.0);
            for (r, &dzr) in dz.iter().enumerate() {
                if dzr == 0.0 {
                    continue;
                }
                let base = r * stride;
                grad.b[r] += dzr;
                grad.w[base] += dzr * x;
                for k in 0..h {
                    grad.w[base + 1 + k] += dzr * h_prev[k];
                    dh[k] += dzr * self.w[base + 1 + k];
                }
            }
        }
    }
}

struct Forward {
    gates: Vec<f64>,
    cells: Vec<f64>,
    tanh_cells: Vec<f64>,
    hiddens: Vec<f64>,
    hd: Vec<f64>,
    pre: Vec<f64>,
    rd: Vec<f64>,
    probability: f64,
}

/// Inverted-dropout multipliers.
struct Masks {
    hidden: Vec<f64>,
    dense: Vec<f64>,
}

impl Masks {
    fn identity(hidden: usize, dense: usize) -> Self {
        Self {
            hidden: vec![1.0; hidden],
            dense: vec![1.0; dense],
        }
    }

    fn draw<R: Rng + ?Sized>(rng: &mut R, config: &LstmConfig) -> Self {
        Self {
            hidden: dropout_mask(rng, config.hidden_units, config.hidden_dropout),
            dense: dropout_mask(rng, config.dense_units, config.dense_dropout),
        }
    }
}

fn dropout_mask<R: Rng + ?Sized>(rng: &mut R, len: usize, rate: f64) -> Vec<f64> {
    if rate <= 0.0 {
        return vec![1.0; len];
    }
    let keep = 1.0 - rate;
    (0..len)
        .map(|_| if rng.gen::<f64>() < keep { 1.0 / keep } else { 0.0 })
        .collect()
}

#[inline]
fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn binary_cross_entropy(probability: f64, label: f64) -> f64 {
    let p = probability.clamp(PROBABILITY_CLIP, 1.0 - PROBABILITY_CLIP);
    -(label * p.ln() + (1.0 - label) * (1.0 - p).ln())
}

// ============================================================================
// Optimizer
// ============================================================================

struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    step: i32,
    m: Params,
    v: Params,
}

impl Adam {
    fn new(learning_rate: f64, hidden: usize, dense: usize) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            step: 0,
            m: Params::zeros(hidden, dense),
            v: Params::zeros(hidden, dense),
        }
    }

    fn update(&mut self, params: &mut Params, grad: &Params) {
        self.step += 1;
        let (b1, b2, eps) = (self.beta1, self.beta2, self.epsilon);
        let lr = self.learning_rate * (1.0 - b2.powi(self.step)).sqrt() / (1.0 - b1.powi(self.step));

        let moments = self.m.tensors_mut().into_iter().zip(self.v.tensors_mut());
        for ((p, g), (m, v)) in params.tensors_mut().into_iter().zip(grad.tensors()).zip(moments) {
            for i in 0..p.len() {
                m[i] = b1 * m[i] + (1.0 - b1) * g[i];
                v[i] = b2 * v[i] + (1.0 - b2) * g[i] * g[i];
                p[i] -= lr * m[i] / (v[i].sqrt() + eps);
            }
        }
    }
}

// ============================================================================
// Classifier
// ============================================================================

/// Fitted LSTM classifier with its input standardization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmClassifier {
    sequence_length: usize,
    standardizer: SequenceStandardizer,
    params: Params,
    epochs_trained: usize,
    best_validation_loss: Option<f64>,
}

impl LstmClassifier {
    /// Fit on `[n, L]` sequences and binary labels.
    pub fn fit_sequences(
        sequences: ArrayView2<'_, f32>,
        labels: &[u8],
        config: &LstmConfig,
        seed: u64,
    ) -> Result<Self> {
        config.validate().map_err(PipelineError::InvalidConfig)?;
        let n = sequences.nrows();
        if n != labels.len() {
            return Err(PipelineError::InvalidInput(format!(
                "LSTM: {n} sequences but {} labels",
                labels.len()
            )));
        }
        if n == 0 {
            return Err(PipelineError::InsufficientData(
                "LSTM needs at least one sequence".to_string(),
            ));
        }

        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let mut rows: Vec<usize> = (0..n).collect();
        rows.shuffle(&mut rng);
        let n_val = (n as f64 * config.validation_fraction).round() as usize;
        let n_val = if n_val >= n { 0 } else { n_val };
        let (val_rows, fit_rows) = rows.split_at(n_val);
        let val_rows = val_rows.to_vec();
        let mut fit_rows = fit_rows.to_vec();

        let standardizer = SequenceStandardizer::fit(sequences.select(Axis(0), &fit_rows).view());
        let inputs: Vec<Vec<f64>> = sequences
            .rows()
            .into_iter()
            .map(|row| standardize(&standardizer, row))
            .collect();
        let targets: Vec<f64> = labels.iter().map(|&y| f64::from(y)).collect();

        let (h, d) = (config.hidden_units, config.dense_units);
        let mut params = Params::init(h, d, &mut rng);
        let mut adam = Adam::new(config.learning_rate, h, d);
        let identity = Masks::identity(h, d);

        let mut best: Option<(f64, Params, usize)> = None;
        let mut stale = 0usize;
        let mut epochs_trained = 0usize;

        for epoch in 0..config.max_epochs {
            epochs_trained = epoch + 1;
            fit_rows.shuffle(&mut rng);
            let mut epoch_loss = 0.0;

            for batch in fit_rows.chunks(config.batch_size) {
                let masks: Vec<Masks> = batch.iter().map(|_| Masks::draw(&mut rng, config)).collect();
                // Per-sample gradients in parallel, summed in batch order.
                let per_sample: Vec<(Params, f64)> = batch
                    .par_iter()
                    .zip(masks.par_iter())
                    .map(|(&row, mask)| {
                        let mut grad = Params::zeros(h, d);
                        let fw = params.forward(&inputs[row], mask);
                        params.backward(&inputs[row], targets[row], mask, &fw, &mut grad);
                        (grad, binary_cross_entropy(fw.probability, targets[row]))
                    })
                    .collect();
                let mut grad = Params::zeros(h, d);
                let mut loss = 0.0;
                for (sample_grad, sample_loss) in &per_sample {
                    grad.add_assign(sample_grad);
                    loss += sample_loss;
                }

                grad.scale(1.0 / batch.len() as f64);
                let norm = grad.norm();
                if !norm.is_finite() {
                    return Err(PipelineError::Numerical(format!(
                        "non-finite LSTM gradient at epoch {epochs_trained}"
                    )));
                }
                if norm > config.clip_norm {
                    grad.scale(config.clip_norm / norm);
                }
                adam.update(&mut params, &grad);
                epoch_loss += loss;
            }
            let train_loss = epoch_loss / fit_rows.len().max(1) as f64;

            if val_rows.is_empty() {
                log::debug!("LSTM epoch {epochs_trained}: loss {train_loss:.4}");
                continue;
            }

            let val_losses: Vec<f64> = val_rows
                .par_iter()
                .map(|&row| {
                    binary_cross_entropy(params.forward(&inputs[row], &identity).probability, targets[row])
                })
                .collect();
            let val_loss = val_losses.iter().sum::<f64>() / val_rows.len() as f64;
            log::debug!("LSTM epoch {epochs_trained}: loss {train_loss:.4}, val_loss {val_loss:.4}");

            let improved = best
                .as_ref()
                .map_or(true, |(best_loss, _, _)| val_loss < *best_loss);
            if improved {
                best = Some((val_loss, params.clone(), epochs_trained));
                stale = 0;
            } else {
                stale += 1;
                if stale >= config.patience {
                    log::debug!("LSTM early stop at epoch {epochs_trained}");
                    break;
                }
            }
        }

        let best_validation_loss = match best {
            Some((loss, best_params, epoch)) => {
                log::debug!("LSTM restored weights from epoch {epoch} (val_loss {loss:.4})");
                params = best_params;
                Some(loss)
            }
            None => None,
        };

        Ok(Self {
            sequence_length: sequences.ncols(),
            standardizer,
            params,
            epochs_trained,
            best_validation_loss,
        })
    }

    /// Positive-class probability for one raw sequence.
    pub fn predict_sequence(&self, sequence: ArrayView1<'_, f32>) -> f64 {
        let inputs = standardize(&self.standardizer, sequence);
        let identity = Masks::identity(self.params.hidden, self.params.dense);
        self.params.forward(&inputs, &identity).probability
    }

    /// Probabilities for `[n, L]` raw sequences.
    pub fn predict_proba(&self, sequences: ArrayView2<'_, f32>) -> Vec<f64> {
        (0..sequences.nrows())
            .into_par_iter()
            .map(|i| self.predict_sequence(sequences.row(i)))
            .collect()
    }

    /// Sequence length seen during training.
    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    /// LSTM hidden units.
    pub fn hidden_units(&self) -> usize {
        self.params.hidden
    }

    /// Epochs run before stopping.
    pub fn epochs_trained(&self) -> usize {
        self.epochs_trained
    }

    /// Best validation loss, when early stopping was active.
    pub fn best_validation_loss(&self) -> Option<f64> {
        self.best_validation_loss
    }

    /// Save as JSON.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = BufWriter::new(File::create(path)?);
        serde_json::to_writer(file, self)?;
        Ok(())
    }

    /// Load from JSON written by [`LstmClassifier::save_json`].
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(file)?)
    }
}

fn standardize(standardizer: &SequenceStandardizer, sequence: ArrayView1<'_, f32>) -> Vec<f64> {
    sequence
        .iter()
        .map(|&v| f64::from(standardizer.apply(v)))
        .collect()
}

impl RiskModel for LstmClassifier {
    fn name(&self) -> &'static str {
        "lstm"
    }

    fn predict_probability(&self, input: &PatientInput<'_>) -> f64 {
        self.predict_sequence(input.sequence)
    }
}

impl Learner for LstmConfig {
    type Model = LstmClassifier;

    fn fit(&self, data: &TrainingSet, seed: u64) -> Result<LstmClassifier> {
        LstmClassifier::fit_sequences(data.sequences.view(), &data.labels, self, seed)
    }
}
