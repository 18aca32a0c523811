//! Per-feature standardization fitted once per training run

use crate::models::{FeatureVector, FEATURE_COUNT};
use serde::{Deserialize, Serialize};

/// Mean/standard-deviation scaler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl Scaler {
    /// Fit population mean and standard deviation per column.
    /// Zero-variance columns get a unit scale.
    pub fn fit(rows: &[FeatureVector]) -> Self {
        let mut mean = vec![0.0; FEATURE_COUNT];
        let mut scale = vec![1.0; FEATURE_COUNT];
        if rows.is_empty() {
            return Self { mean, scale };
        }

        let n = rows.len() as f64;
        for row in rows {
            for (m, v) in mean.iter_mut().zip(row.iter()) {
                *m += sanitize(*v);
            }
        }
        for m in mean.iter_mut() {
            *m /= n;
        }

        for (j, s) in scale.iter_mut().enumerate() {
            let var = rows
                .iter()
                .map(|row| (sanitize(row[j]) - mean[j]).powi(2))
                .sum::<f64>()
                / n;
            let std = var.sqrt();
            *s = if std > f64::EPSILON { std } else { 1.0 };
        }

        Self { mean, scale }
    }

    /// Standardize one vector; non-finite inputs are treated as zero
    pub fn transform(&self, row: &FeatureVector) -> Vec<f64> {
        row.iter()
            .enumerate()
            .map(|(j, v)| (sanitize(*v) - self.mean[j]) / self.scale[j])
            .collect()
    }

    /// Standardize one vector, placing the listed columns at the fitted
    /// mean (zero in scaled space)
    pub fn transform_with_missing(&self, row: &FeatureVector, missing: &[usize]) -> Vec<f64> {
        let mut scaled = self.transform(row);
        for &j in missing {
            if let Some(v) = scaled.get_mut(j) {
                *v = 0.0;
            }
        }
        scaled
    }

    pub fn transform_all(&self, rows: &[FeatureVector]) -> Vec<Vec<f64>> {
        rows.iter().map(|row| self.transform(row)).collect()
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }
}

fn sanitize(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}
