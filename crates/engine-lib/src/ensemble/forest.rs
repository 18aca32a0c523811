//! Bagged ensemble of gini decision trees

use super::tree::{DecisionTree, Targets, TreeParams};
use super::{normalize, Classifier, ModelKind};
use crate::error::{EngineError, EngineResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features tried per split; square root of the feature count when unset
    pub max_features: Option<usize>,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 10,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    params: ForestParams,
    trees: Vec<DecisionTree>,
    n_classes: usize,
    importance: Vec<f64>,
}

impl RandomForest {
    pub fn new(params: ForestParams) -> Self {
        Self {
            params,
            trees: Vec::new(),
            n_classes: 0,
            importance: Vec::new(),
        }
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }
}

impl Classifier for RandomForest {
    fn kind(&self) -> ModelKind {
        ModelKind::RandomForest
    }

    fn fit(&mut self, features: &[Vec<f64>], labels: &[usize], n_classes: usize) -> EngineResult<()> {
        if features.is_empty() || features.len() != labels.len() {
            return Err(EngineError::TrainingAborted(format!(
                "random forest needs matching rows and labels, got {} and {}",
                features.len(),
                labels.len()
            )));
        }

        let n = features.len();
        let n_features = features[0].len();
        let tree_params = TreeParams {
            max_depth: self.params.max_depth,
            min_samples_split: self.params.min_samples_split,
            min_samples_leaf: self.params.min_samples_leaf,
            max_features: Some(
                self.params
                    .max_features
                    .unwrap_or_else(|| (n_features as f64).sqrt().round() as usize)
                    .max(1),
            ),
        };

        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let mut trees = Vec::with_capacity(self.params.n_estimators);
        let mut importance = vec![0.0; n_features];
        let targets = Targets::Classes { labels, n_classes };

        for _ in 0..self.params.n_estimators.max(1) {
            let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let (tree, mut tree_importance) = DecisionTree::fit(features, targets, &bootstrap, &tree_params, &mut rng);
            normalize(&mut tree_importance);
            for (total, v) in importance.iter_mut().zip(&tree_importance) {
                *total += v;
            }
            trees.push(tree);
        }
        normalize(&mut importance);

        self.trees = trees;
        self.n_classes = n_classes;
        self.importance = importance;
        Ok(())
    }

    /// Share of trees voting for each class
    fn predict_proba(&self, features: &[f64]) -> Vec<f64> {
        if self.trees.is_empty() {
            return Vec::new();
        }
        let mut votes = vec![0.0; self.n_classes];
        for tree in &self.trees {
            let leaf = tree.predict(features);
            if leaf.is_empty() {
                continue;
            }
            let class = super::argmax(leaf);
            if class < votes.len() {
                votes[class] += 1.0;
            }
        }
        normalize(&mut votes);
        votes
    }

    fn feature_importance(&self) -> Option<Vec<f64>> {
        if self.importance.is_empty() {
            None
        } else {
            Some(self.importance.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{accuracy, three_blobs};
    use super::*;

    fn small() -> ForestParams {
        ForestParams {
            n_estimators: 15,
            ..ForestParams::default()
        }
    }

    #[test]
    fn test_forest_learns_separable_blobs() {
        let (x, y) = three_blobs();
        let mut forest = RandomForest::new(small());
        forest.fit(&x, &y, 3).unwrap();
        assert!(accuracy(&forest, &x, &y) > 0.95);
    }

    #[test]
    fn test_probabilities_are_vote_shares() {
        let (x, y) = three_blobs();
        let mut forest = RandomForest::new(small());
        forest.fit(&x, &y, 3).unwrap();
        let p = forest.predict_proba(&x[0]);
        for share in &p {
            let votes = share * 15.0;
            assert!((votes - votes.round()).abs() < 1e-9);
        }
    }

    #[test]
    fn test_same_seed_same_forest() {
        let (x, y) = three_blobs();
        let mut a = RandomForest::new(small());
        let mut b = RandomForest::new(small());
        a.fit(&x, &y, 3).unwrap();
        b.fit(&x, &y, 3).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_importance_ignores_noise_feature() {
        let (x, y) = three_blobs();
        let mut forest = RandomForest::new(small());
        forest.fit(&x, &y, 3).unwrap();
        let importance = forest.feature_importance().unwrap();
        assert!((importance.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(importance[0] + importance[1] > importance[2]);
    }

    #[test]
    fn test_unfitted_forest_predicts_nothing() {
        let forest = RandomForest::new(ForestParams::default());
        assert!(forest.predict_proba(&[0.0, 0.0, 0.0]).is_empty());
        assert!(forest.feature_importance().is_none());
    }

    #[test]
    fn test_mismatched_input_is_rejected() {
        let mut forest = RandomForest::new(small());
        assert!(forest.fit(&[vec![1.0]], &[0, 1], 2).is_err());
    }
}
