//! Ensemble model bank
//!
//! Four independently parameterized classifiers share one capability
//! contract, [`Classifier`]. [`EnsembleMember`] is the closed set of those
//! strategies and is what a bundle persists per model.

mod boosting;
mod forest;
mod mlp;
mod svm;
mod tree;

pub use boosting::{BoostingParams, GradientBoosting};
pub use forest::{ForestParams, RandomForest};
pub use mlp::{NetworkParams, NeuralNetwork};
pub use svm::{KernelSvm, SvmParams};
pub use tree::{DecisionTree, Targets, TreeParams};

use crate::error::EngineResult;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Capability contract shared by every ensemble member
pub trait Classifier: Send + Sync {
    fn kind(&self) -> ModelKind;

    /// Fit on scaled feature rows and encoded labels in `0..n_classes`
    fn fit(&mut self, features: &[Vec<f64>], labels: &[usize], n_classes: usize) -> EngineResult<()>;

    /// Per-class probabilities summing to one; empty before fitting
    fn predict_proba(&self, features: &[f64]) -> Vec<f64>;

    /// Most probable class together with the full distribution
    fn predict_with_confidence(&self, features: &[f64]) -> (usize, Vec<f64>) {
        let proba = self.predict_proba(features);
        (argmax(&proba), proba)
    }

    /// Normalized impurity-based importance per feature, when available
    fn feature_importance(&self) -> Option<Vec<f64>> {
        None
    }
}

/// The four model kinds of the ensemble
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    RandomForest,
    GradientBoosting,
    Svm,
    NeuralNetwork,
}

impl ModelKind {
    pub const ALL: [ModelKind; 4] = [
        ModelKind::RandomForest,
        ModelKind::GradientBoosting,
        ModelKind::Svm,
        ModelKind::NeuralNetwork,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::RandomForest => "random_forest",
            ModelKind::GradientBoosting => "gradient_boosting",
            ModelKind::Svm => "svm",
            ModelKind::NeuralNetwork => "neural_network",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hyperparameters for every member of the ensemble
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleParams {
    pub forest: ForestParams,
    pub boosting: BoostingParams,
    pub svm: SvmParams,
    pub network: NetworkParams,
}

impl Default for EnsembleParams {
    fn default() -> Self {
        Self {
            forest: ForestParams::default(),
            boosting: BoostingParams::default(),
            svm: SvmParams::default(),
            network: NetworkParams::default(),
        }
    }
}

impl EnsembleParams {
    /// Smaller ensemble for small corpora and constrained hosts
    pub fn compact() -> Self {
        Self {
            forest: ForestParams {
                n_estimators: 25,
                max_depth: 6,
                ..ForestParams::default()
            },
            boosting: BoostingParams {
                n_estimators: 20,
                max_depth: 3,
                ..BoostingParams::default()
            },
            svm: SvmParams {
                epochs: 5,
                ..SvmParams::default()
            },
            network: NetworkParams {
                hidden_layers: vec![32, 16],
                learning_rate: 0.01,
                max_iter: 200,
                ..NetworkParams::default()
            },
        }
    }
}

/// A persisted, possibly fitted, ensemble member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsembleMember {
    RandomForest(RandomForest),
    GradientBoosting(GradientBoosting),
    Svm(KernelSvm),
    NeuralNetwork(NeuralNetwork),
}

impl EnsembleMember {
    /// Unfitted member of the given kind
    pub fn new(kind: ModelKind, params: &EnsembleParams) -> Self {
        match kind {
            ModelKind::RandomForest => EnsembleMember::RandomForest(RandomForest::new(params.forest.clone())),
            ModelKind::GradientBoosting => {
                EnsembleMember::GradientBoosting(GradientBoosting::new(params.boosting.clone()))
            }
            ModelKind::Svm => EnsembleMember::Svm(KernelSvm::new(params.svm.clone())),
            ModelKind::NeuralNetwork => EnsembleMember::NeuralNetwork(NeuralNetwork::new(params.network.clone())),
        }
    }

    fn as_classifier(&self) -> &dyn Classifier {
        match self {
            EnsembleMember::RandomForest(m) => m,
            EnsembleMember::GradientBoosting(m) => m,
            EnsembleMember::Svm(m) => m,
            EnsembleMember::NeuralNetwork(m) => m,
        }
    }

    fn as_classifier_mut(&mut self) -> &mut dyn Classifier {
        match self {
            EnsembleMember::RandomForest(m) => m,
            EnsembleMember::GradientBoosting(m) => m,
            EnsembleMember::Svm(m) => m,
            EnsembleMember::NeuralNetwork(m) => m,
        }
    }
}

impl Classifier for EnsembleMember {
    fn kind(&self) -> ModelKind {
        self.as_classifier().kind()
    }

    fn fit(&mut self, features: &[Vec<f64>], labels: &[usize], n_classes: usize) -> EngineResult<()> {
        self.as_classifier_mut().fit(features, labels, n_classes)
    }

    fn predict_proba(&self, features: &[f64]) -> Vec<f64> {
        self.as_classifier().predict_proba(features)
    }

    fn feature_importance(&self) -> Option<Vec<f64>> {
        self.as_classifier().feature_importance()
    }
}

/// Index of the largest value; the first one wins ties
pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

pub(crate) fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|z| (z - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    if sum > 0.0 && sum.is_finite() {
        exps.iter().map(|e| e / sum).collect()
    } else {
        vec![1.0 / logits.len().max(1) as f64; logits.len()]
    }
}

pub(crate) fn normalize(values: &mut [f64]) {
    let sum: f64 = values.iter().sum();
    if sum > f64::EPSILON {
        for v in values.iter_mut() {
            *v /= sum;
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argmax_prefers_first_on_ties() {
        assert_eq!(argmax(&[0.2, 0.5, 0.5]), 1);
        assert_eq!(argmax(&[]), 0);
    }

    #[test]
    fn test_softmax_is_stable() {
        let p = softmax(&[1000.0, 1000.0]);
        assert!((p[0] - 0.5).abs() < 1e-12);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_every_member_fits_through_the_contract() {
        let (x, y) = test_support::three_blobs();
        let params = EnsembleParams::compact();
        for kind in ModelKind::ALL {
            let mut member = EnsembleMember::new(kind, &params);
            assert_eq!(member.kind(), kind);
            member.fit(&x, &y, 3).unwrap();
            let (label, proba) = member.predict_with_confidence(&x[0]);
            assert_eq!(proba.len(), 3, "{}", kind);
            assert!((proba.iter().sum::<f64>() - 1.0).abs() < 1e-6, "{}", kind);
            assert_eq!(label, 0, "{}", kind);
        }
    }

    #[test]
    fn test_member_serde_preserves_predictions() {
        let (x, y) = test_support::three_blobs();
        let mut member = EnsembleMember::new(ModelKind::GradientBoosting, &EnsembleParams::compact());
        member.fit(&x, &y, 3).unwrap();
        let json = serde_json::to_string(&member).unwrap();
        let restored: EnsembleMember = serde_json::from_str(&json).unwrap();
        assert_eq!(member.predict_proba(&x[5]), restored.predict_proba(&x[5]));
    }
}
