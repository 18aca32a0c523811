//! Multiclass gradient boosting on softmax deviance
//!
//! Each round fits one regression tree per class to the negative gradient
//! and replaces its leaf values with a one-step Newton estimate.

use super::tree::{DecisionTree, Targets, TreeParams};
use super::{normalize, softmax, Classifier, ModelKind};
use crate::error::{EngineError, EngineResult};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const MIN_PRIOR: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 6,
            learning_rate: 0.1,
            min_samples_split: 2,
            min_samples_leaf: 1,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoosting {
    params: BoostingParams,
    initial: Vec<f64>,
    /// One tree per class per round
    rounds: Vec<Vec<DecisionTree>>,
    importance: Vec<f64>,
}

impl GradientBoosting {
    pub fn new(params: BoostingParams) -> Self {
        Self {
            params,
            initial: Vec::new(),
            rounds: Vec::new(),
            importance: Vec::new(),
        }
    }

    fn raw_scores(&self, row: &[f64]) -> Vec<f64> {
        let mut scores = self.initial.clone();
        for round in &self.rounds {
            for (k, tree) in round.iter().enumerate() {
                scores[k] += self.params.learning_rate * tree.predict(row).first().copied().unwrap_or(0.0);
            }
        }
        scores
    }
}

impl Classifier for GradientBoosting {
    fn kind(&self) -> ModelKind {
        ModelKind::GradientBoosting
    }

    fn fit(&mut self, features: &[Vec<f64>], labels: &[usize], n_classes: usize) -> EngineResult<()> {
        if features.is_empty() || features.len() != labels.len() || n_classes < 2 {
            return Err(EngineError::TrainingAborted(format!(
                "gradient boosting needs matching rows and labels over at least two classes, got {} rows, {} labels, {} classes",
                features.len(),
                labels.len(),
                n_classes
            )));
        }

        let n = features.len();
        let n_features = features[0].len();
        let k_classes = n_classes as f64;
        let tree_params = TreeParams {
            max_depth: self.params.max_depth,
            min_samples_split: self.params.min_samples_split,
            min_samples_leaf: self.params.min_samples_leaf,
            max_features: None,
        };

        let mut prior = vec![0.0; n_classes];
        for &label in labels {
            prior[label] += 1.0;
        }
        let initial: Vec<f64> = prior.iter().map(|c| (c / n as f64).max(MIN_PRIOR).ln()).collect();

        let mut scores: Vec<Vec<f64>> = vec![initial.clone(); n];
        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let mut rounds = Vec::with_capacity(self.params.n_estimators);
        let mut importance = vec![0.0; n_features];
        let all: Vec<usize> = (0..n).collect();

        for _ in 0..self.params.n_estimators {
            let probabilities: Vec<Vec<f64>> = scores.iter().map(|s| softmax(s)).collect();
            let mut round = Vec::with_capacity(n_classes);

            for k in 0..n_classes {
                let residuals: Vec<f64> = (0..n)
                    .map(|i| if labels[i] == k { 1.0 } else { 0.0 } - probabilities[i][k])
                    .collect();

                let (mut tree, tree_importance) =
                    DecisionTree::fit(features, Targets::Values(&residuals), &all, &tree_params, &mut rng);
                for (total, v) in importance.iter_mut().zip(&tree_importance) {
                    *total += v;
                }

                let mut leaves: HashMap<usize, (f64, f64)> = HashMap::new();
                let assignment: Vec<usize> = features.iter().map(|row| tree.leaf_index(row)).collect();
                for (i, &leaf) in assignment.iter().enumerate() {
                    let r = residuals[i];
                    let entry = leaves.entry(leaf).or_insert((0.0, 0.0));
                    entry.0 += r;
                    entry.1 += r.abs() * (1.0 - r.abs());
                }
                for (&leaf, &(numerator, denominator)) in &leaves {
                    let gamma = if denominator.abs() < 1e-12 {
                        0.0
                    } else {
                        (k_classes - 1.0) / k_classes * numerator / denominator
                    };
                    tree.set_leaf_value(leaf, vec![gamma]);
                }

                for (i, row) in features.iter().enumerate() {
                    scores[i][k] += self.params.learning_rate * tree.predict(row).first().copied().unwrap_or(0.0);
                }
                round.push(tree);
            }
            rounds.push(round);
        }
        normalize(&mut importance);

        self.initial = initial;
        self.rounds = rounds;
        self.importance = importance;
        Ok(())
    }

    fn predict_proba(&self, features: &[f64]) -> Vec<f64> {
        if self.initial.is_empty() {
            return Vec::new();
        }
        softmax(&self.raw_scores(features))
    }

    fn feature_importance(&self) -> Option<Vec<f64>> {
        if self.importance.iter().any(|v| *v > 0.0) {
            Some(self.importance.clone())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{accuracy, three_blobs};
    use super::*;

    fn small() -> BoostingParams {
        BoostingParams {
            n_estimators: 20,
            max_depth: 3,
            ..BoostingParams::default()
        }
    }

    #[test]
    fn test_boosting_learns_separable_blobs() {
        let (x, y) = three_blobs();
        let mut model = GradientBoosting::new(small());
        model.fit(&x, &y, 3).unwrap();
        assert!(accuracy(&model, &x, &y) > 0.95);
    }

    #[test]
    fn test_confidence_grows_with_rounds() {
        let (x, y) = three_blobs();
        let mut short = GradientBoosting::new(BoostingParams {
            n_estimators: 2,
            ..small()
        });
        let mut long = GradientBoosting::new(small());
        short.fit(&x, &y, 3).unwrap();
        long.fit(&x, &y, 3).unwrap();
        assert!(long.predict_proba(&x[0])[0] > short.predict_proba(&x[0])[0]);
    }

    #[test]
    fn test_absent_class_keeps_finite_scores() {
        let (x, y) = three_blobs();
        // class 3 never occurs in the labels
        let mut model = GradientBoosting::new(small());
        model.fit(&x, &y, 4).unwrap();
        let p = model.predict_proba(&x[1]);
        assert_eq!(p.len(), 4);
        assert!(p.iter().all(|v| v.is_finite()));
        assert!(p[3] < 0.01);
        assert!(serde_json::to_string(&model).is_ok());
    }

    #[test]
    fn test_single_class_is_rejected() {
        let mut model = GradientBoosting::new(small());
        assert!(model.fit(&[vec![0.0]], &[0], 1).is_err());
    }
}
