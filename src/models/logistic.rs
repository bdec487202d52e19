//! L2-regularized logistic regression fitted by Newton's method.
//!
//! Minimizes
//!
//! ```text
//! ½‖w‖² + C · Σᵢ sᵢ · [−yᵢ log pᵢ − (1−yᵢ) log(1−pᵢ)],   pᵢ = σ(w·xᵢ + b)
//! ```
//!
//! with an unpenalized intercept `b` and per-sample weights `sᵢ`. With
//! [`ClassWeight::Balanced`], `sᵢ = n / (2 · n_{yᵢ})`, so both classes carry
//! equal total weight.
//!
//! Each iteration solves the full Newton system by Gaussian elimination with
//! partial pivoting and halves the step until the objective decreases.

use super::{class_counts, sigmoid, Learner, PatientInput, RiskModel, TrainingSet};
use crate::error::{PipelineError, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

const MAX_STEP_HALVINGS: usize = 30;
const HESSIAN_JITTER: f64 = 1e-10;

/// Per-sample weighting scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassWeight {
    /// Every sample weighs 1
    Uniform,
    /// Inverse class frequency
    Balanced,
}

/// Logistic regression settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticConfig {
    /// Inverse regularization strength
    pub c: f64,

    /// Maximum Newton iterations
    pub max_iter: usize,

    /// Convergence threshold on the gradient's max-norm
    pub tolerance: f64,

    /// Sample weighting
    pub class_weight: ClassWeight,
}

impl Default for LogisticConfig {
    fn default() -> Self {
        Self {
            c: 1.0,
            max_iter: 2000,
            tolerance: 1e-6,
            class_weight: ClassWeight::Balanced,
        }
    }
}

impl LogisticConfig {
    /// Validate configuration.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !self.c.is_finite() || self.c <= 0.0 {
            return Err("logistic c must be finite and > 0".to_string());
        }
        if self.max_iter == 0 {
            return Err("logistic max_iter must be > 0".to_string());
        }
        if self.tolerance.is_nan() || self.tolerance <= 0.0 {
            return Err("logistic tolerance must be > 0".to_string());
        }
        Ok(())
    }
}

/// Fitted binary logistic regression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    coefficients: Vec<f64>,
    intercept: f64,
    iterations: usize,
}

impl LogisticRegression {
    /// Build from known parameters.
    pub fn from_parameters(coefficients: Vec<f64>, intercept: f64) -> Self {
        Self {
            coefficients,
            intercept,
            iterations: 0,
        }
    }

    /// Fit on `[n, d]` inputs and binary labels.
    pub fn fit_matrix(x: ArrayView2<'_, f64>, y: &[u8], config: &LogisticConfig) -> Result<Self> {
        let (n, d) = x.dim();
        if n != y.len() {
            return Err(PipelineError::InvalidInput(format!(
                "logistic regression: {n} rows but {} labels",
                y.len()
            )));
        }
        let (neg, pos) = class_counts(y);
        if neg == 0 || pos == 0 {
            return Err(PipelineError::InsufficientData(
                "logistic regression needs both classes".to_string(),
            ));
        }

        let weights: Vec<f64> = y
            .iter()
            .map(|&label| match config.class_weight {
                ClassWeight::Uniform => 1.0,
                ClassWeight::Balanced => {
                    let count = if label == 1 { pos } else { neg };
                    n as f64 / (2.0 * count as f64)
                }
            })
            .collect();
        let targets: Vec<f64> = y.iter().map(|&label| f64::from(label)).collect();

        let problem = Problem {
            x: x.view(),
            targets: &targets,
            weights: &weights,
            c: config.c,
        };

        // theta = [w_0 .. w_{d-1}, b]
        let mut theta = vec![0.0; d + 1];
        let mut objective = problem.objective(&theta);
        let mut iterations = 0;

        for iter in 0..config.max_iter {
            iterations = iter + 1;
            let (gradient, hessian) = problem.gradient_hessian(&theta);
            let max_grad = gradient.iter().fold(0.0_f64, |m, g| m.max(g.abs()));
            if max_grad < config.tolerance {
                break;
            }

            let step = solve(hessian, gradient).ok_or_else(|| {
                PipelineError::Numerical("singular Newton system in logistic regression".to_string())
            })?;

            let mut scale = 1.0;
            let mut accepted = false;
            for _ in 0..MAX_STEP_HALVINGS {
                let candidate: Vec<f64> = theta
                    .iter()
                    .zip(&step)
                    .map(|(t, s)| t - scale * s)
                    .collect();
                let candidate_objective = problem.objective(&candidate);
                if candidate_objective.is_finite() && candidate_objective <= objective {
                    theta = candidate;
                    objective = candidate_objective;
                    accepted = true;
                    break;
                }
                scale *= 0.5;
            }
            if !accepted {
                break;
            }
        }

        if theta.iter().any(|t| !t.is_finite()) {
            return Err(PipelineError::Numerical(
                "logistic regression diverged".to_string(),
            ));
        }
        if iterations == config.max_iter {
            log::warn!("Logistic regression reached max_iter={}", config.max_iter);
        }

        let intercept = theta[d];
        theta.truncate(d);
        Ok(Self {
            coefficients: theta,
            intercept,
            iterations,
        })
    }

    /// Feature coefficients.
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// Intercept.
    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Newton iterations used by the fit.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Number of input features.
    pub fn n_features(&self) -> usize {
        self.coefficients.len()
    }

    /// Linear score `w·x + b`.
    pub fn decision_function(&self, row: ArrayView1<'_, f64>) -> f64 {
        row.iter()
            .zip(&self.coefficients)
            .map(|(x, w)| x * w)
            .sum::<f64>()
            + self.intercept
    }

    /// Positive-class probability for one row.
    pub fn predict_proba_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        sigmoid(self.decision_function(row))
    }

    /// Positive-class probabilities for `[n, d]` inputs.
    pub fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Vec<f64> {
        x.rows()
            .into_iter()
            .map(|row| self.predict_proba_row(row))
            .collect()
    }
}

impl RiskModel for LogisticRegression {
    fn name(&self) -> &'static str {
        "logistic"
    }

    fn predict_probability(&self, input: &PatientInput<'_>) -> f64 {
        self.predict_proba_row(input.tabular)
    }
}

impl Learner for LogisticConfig {
    type Model = LogisticRegression;

    fn fit(&self, data: &TrainingSet, _seed: u64) -> Result<LogisticRegression> {
        LogisticRegression::fit_matrix(data.tabular.view(), &data.labels, self)
    }
}

struct Problem<'a> {
    x: ArrayView2<'a, f64>,
    targets: &'a [f64],
    weights: &'a [f64],
    c: f64,
}

impl Problem<'_> {
    fn score(&self, theta: &[f64], row: ArrayView1<'_, f64>) -> f64 {
        let d = theta.len() - 1;
        row.iter().zip(&theta[..d]).map(|(x, w)| x * w).sum::<f64>() + theta[d]
    }

    fn objective(&self, theta: &[f64]) -> f64 {
        let d = theta.len() - 1;
        let penalty = 0.5 * theta[..d].iter().map(|w| w * w).sum::<f64>();
        let loss: f64 = self
            .x
            .rows()
            .into_iter()
            .zip(self.targets.iter().zip(self.weights))
            .map(|(row, (&y, &s))| {
                let z = self.score(theta, row);
                // log(1 + e^z) - y z, stable for large |z|
                let softplus = if z > 0.0 {
                    z + (-z).exp().ln_1p()
                } else {
                    z.exp().ln_1p()
                };
                s * (softplus - y * z)
            })
            .sum();
        penalty + self.c * loss
    }

    fn gradient_hessian(&self, theta: &[f64]) -> (Array1<f64>, Array2<f64>) {
        let d = theta.len() - 1;
        let mut gradient = Array1::<f64>::zeros(d + 1);
        let mut hessian = Array2::<f64>::zeros((d + 1, d + 1));

        for (row, (&y, &s)) in self
            .x
            .rows()
            .into_iter()
            .zip(self.targets.iter().zip(self.weights))
        {
            let p = sigmoid(self.score(theta, row));
            let residual = self.c * s * (p - y);
            let curvature = self.c * s * p * (1.0 - p);

            for j in 0..=d {
                let xj = if j < d { row[j] } else { 1.0 };
                gradient[j] += residual * xj;
                for k in j..=d {
                    let xk = if k < d { row[k] } else { 1.0 };
                    hessian[[j, k]] += curvature * xj * xk;
                }
            }
        }

        for j in 0..=d {
            if j < d {
                gradient[j] += theta[j];
                hessian[[j, j]] += 1.0;
            }
            hessian[[j, j]] += HESSIAN_JITTER;
            for k in 0..j {
                hessian[[j, k]] = hessian[[k, j]];
            }
        }

        (gradient, hessian)
    }
}

/// Solve `a · x = b` by Gaussian elimination with partial pivoting.
fn solve(mut a: Array2<f64>, mut b: Array1<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[[i, col]].abs().total_cmp(&a[[j, col]].abs()))?;
        if a[[pivot, col]].abs() < 1e-300 {
            return None;
        }
        if pivot != col {
            for k in 0..n {
                a.swap([col, k], [pivot, k]);
            }
            b.swap(col, pivot);
        }
        for row in col + 1..n {
            let factor = a[[row, col]] / a[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[[row, k]] * x[k]).sum();
        x[row] = (b[row] - tail) / a[[row, row]];
    }
    Some(x)
}
