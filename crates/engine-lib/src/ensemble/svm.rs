//! One-vs-rest RBF support vector machine
//!
//! Each binary machine is trained with kernelized Pegasos sub-gradient steps.
//! Decision values are calibrated into probabilities with Platt's sigmoid,
//! and the per-class probabilities are normalized to sum to one.

use super::{normalize, Classifier, ModelKind};
use crate::error::{EngineError, EngineResult};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SvmParams {
    /// Inverse regularization strength
    pub c: f64,
    /// RBF width; `1 / (n_features * variance)` when unset
    pub gamma: Option<f64>,
    /// Passes over the training rows per binary machine
    pub epochs: usize,
    /// Rows beyond this are subsampled before fitting
    pub max_train_samples: usize,
    pub seed: u64,
}

impl Default for SvmParams {
    fn default() -> Self {
        Self {
            c: 1.0,
            gamma: None,
            epochs: 20,
            max_train_samples: 2000,
            seed: 42,
        }
    }
}

/// Platt sigmoid `1 / (1 + exp(a * f + b))`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct Sigmoid {
    a: f64,
    b: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelSvm {
    params: SvmParams,
    gamma: f64,
    support: Vec<Vec<f64>>,
    /// Signed dual weight per class per support row
    coefficients: Vec<Vec<f64>>,
    calibration: Vec<Sigmoid>,
}

impl KernelSvm {
    pub fn new(params: SvmParams) -> Self {
        Self {
            params,
            gamma: 0.0,
            support: Vec::new(),
            coefficients: Vec::new(),
            calibration: Vec::new(),
        }
    }

    fn kernel(&self, a: &[f64], b: &[f64]) -> f64 {
        rbf(self.gamma, a, b)
    }

    fn decision(&self, class: usize, row: &[f64]) -> f64 {
        self.support
            .iter()
            .zip(&self.coefficients[class])
            .map(|(sv, w)| w * self.kernel(sv, row))
            .sum()
    }
}

/// RBF kernel with a constant offset standing in for the bias term
fn rbf(gamma: f64, a: &[f64], b: &[f64]) -> f64 {
    let dist: f64 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
    (-gamma * dist).exp() + 1.0
}

fn scale_gamma(features: &[Vec<f64>]) -> f64 {
    let n_features = features.first().map(|r| r.len()).unwrap_or(1).max(1);
    let count = (features.len() * n_features) as f64;
    let mean = features.iter().flatten().sum::<f64>() / count;
    let variance = features.iter().flatten().map(|v| (v - mean).powi(2)).sum::<f64>() / count;
    if variance > f64::EPSILON {
        1.0 / (n_features as f64 * variance)
    } else {
        1.0 / n_features as f64
    }
}

/// Pegasos on a precomputed kernel matrix; returns the signed dual weights
fn pegasos(gram: &[Vec<f64>], targets: &[f64], lambda: f64, iterations: usize, rng: &mut StdRng) -> Vec<f64> {
    let n = targets.len();
    let mut alpha = vec![0u32; n];
    for t in 1..=iterations {
        let i = rng.gen_range(0..n);
        let margin: f64 = (0..n)
            .filter(|&j| alpha[j] > 0)
            .map(|j| alpha[j] as f64 * targets[j] * gram[i][j])
            .sum::<f64>()
            / (lambda * t as f64);
        if targets[i] * margin < 1.0 {
            alpha[i] += 1;
        }
    }
    let scale = lambda * iterations.max(1) as f64;
    alpha
        .iter()
        .zip(targets)
        .map(|(a, y)| *a as f64 * y / scale)
        .collect()
}

/// Fit Platt's sigmoid by Newton's method with backtracking
fn fit_sigmoid(decisions: &[f64], positive: &[bool]) -> Sigmoid {
    let prior1 = positive.iter().filter(|p| **p).count() as f64;
    let prior0 = positive.len() as f64 - prior1;
    let hi = (prior1 + 1.0) / (prior1 + 2.0);
    let lo = 1.0 / (prior0 + 2.0);
    let targets: Vec<f64> = positive.iter().map(|p| if *p { hi } else { lo }).collect();

    let objective = |a: f64, b: f64| -> f64 {
        decisions
            .iter()
            .zip(&targets)
            .map(|(f, t)| {
                let z = f * a + b;
                if z >= 0.0 {
                    t * z + (-z).exp().ln_1p()
                } else {
                    (t - 1.0) * z + z.exp().ln_1p()
                }
            })
            .sum()
    };

    let mut a = 0.0;
    let mut b = ((prior0 + 1.0) / (prior1 + 1.0)).ln();
    let mut value = objective(a, b);

    for _ in 0..100 {
        let (mut h11, mut h22, mut h21, mut g1, mut g2) = (1e-12, 1e-12, 0.0, 0.0, 0.0);
        for (f, t) in decisions.iter().zip(&targets) {
            let z = f * a + b;
            let (p, q) = if z >= 0.0 {
                let e = (-z).exp();
                (e / (1.0 + e), 1.0 / (1.0 + e))
            } else {
                let e = z.exp();
                (1.0 / (1.0 + e), e / (1.0 + e))
            };
            let d2 = p * q;
            h11 += f * f * d2;
            h22 += d2;
            h21 += f * d2;
            let d1 = t - p;
            g1 += f * d1;
            g2 += d1;
        }
        if g1.abs() < 1e-5 && g2.abs() < 1e-5 {
            break;
        }

        let det = h11 * h22 - h21 * h21;
        let da = -(h22 * g1 - h21 * g2) / det;
        let db = -(-h21 * g1 + h11 * g2) / det;
        let gd = g1 * da + g2 * db;

        let mut step = 1.0;
        while step >= 1e-10 {
            let (na, nb) = (a + step * da, b + step * db);
            let candidate = objective(na, nb);
            if candidate < value + 1e-4 * step * gd {
                a = na;
                b = nb;
                value = candidate;
                break;
            }
            step /= 2.0;
        }
        if step < 1e-10 {
            break;
        }
    }
    Sigmoid { a, b }
}

impl Sigmoid {
    fn probability(&self, decision: f64) -> f64 {
        let z = self.a * decision + self.b;
        if z >= 0.0 {
            let e = (-z).exp();
            e / (1.0 + e)
        } else {
            1.0 / (1.0 + z.exp())
        }
    }
}

impl Classifier for KernelSvm {
    fn kind(&self) -> ModelKind {
        ModelKind::Svm
    }

    fn fit(&mut self, features: &[Vec<f64>], labels: &[usize], n_classes: usize) -> EngineResult<()> {
        if features.is_empty() || features.len() != labels.len() {
            return Err(EngineError::TrainingAborted(format!(
                "svm needs matching rows and labels, got {} and {}",
                features.len(),
                labels.len()
            )));
        }

        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let mut rows: Vec<usize> = (0..features.len()).collect();
        if rows.len() > self.params.max_train_samples.max(1) {
            rows.shuffle(&mut rng);
            rows.truncate(self.params.max_train_samples.max(1));
            rows.sort_unstable();
        }
        let x: Vec<Vec<f64>> = rows.iter().map(|&i| features[i].clone()).collect();
        let y: Vec<usize> = rows.iter().map(|&i| labels[i]).collect();
        let n = x.len();

        let gamma = self.params.gamma.unwrap_or_else(|| scale_gamma(&x));
        let gram: Vec<Vec<f64>> = x.iter().map(|a| x.iter().map(|b| rbf(gamma, a, b)).collect()).collect();
        let lambda = 1.0 / (self.params.c.max(f64::EPSILON) * n as f64);
        let iterations = self.params.epochs.max(1) * n;

        let mut coefficients = Vec::with_capacity(n_classes);
        let mut calibration = Vec::with_capacity(n_classes);
        for class in 0..n_classes {
            let positive: Vec<bool> = y.iter().map(|&l| l == class).collect();
            let targets: Vec<f64> = positive.iter().map(|p| if *p { 1.0 } else { -1.0 }).collect();
            let weights = pegasos(&gram, &targets, lambda, iterations, &mut rng);
            let decisions: Vec<f64> = gram
                .iter()
                .map(|row| row.iter().zip(&weights).map(|(k, w)| k * w).sum())
                .collect();
            calibration.push(fit_sigmoid(&decisions, &positive));
            coefficients.push(weights);
        }

        // Keep only rows that carry weight for some class
        let keep: Vec<usize> = (0..n)
            .filter(|&i| coefficients.iter().any(|w: &Vec<f64>| w[i] != 0.0))
            .collect();
        self.support = keep.iter().map(|&i| x[i].clone()).collect();
        self.coefficients = coefficients
            .iter()
            .map(|w| keep.iter().map(|&i| w[i]).collect())
            .collect();
        self.calibration = calibration;
        self.gamma = gamma;
        Ok(())
    }

    fn predict_proba(&self, features: &[f64]) -> Vec<f64> {
        if self.calibration.is_empty() {
            return Vec::new();
        }
        let mut proba: Vec<f64> = self
            .calibration
            .iter()
            .enumerate()
            .map(|(class, sigmoid)| sigmoid.probability(self.decision(class, features)))
            .collect();
        if proba.iter().sum::<f64>() <= f64::EPSILON {
            let uniform = 1.0 / proba.len() as f64;
            proba.iter_mut().for_each(|p| *p = uniform);
        }
        normalize(&mut proba);
        proba
    }
}
