//! CART decision tree shared by the forest and the boosting models

use rand::rngs::StdRng;
use rand::seq::index::sample;
use serde::{Deserialize, Serialize};

const MIN_IMPURITY_DECREASE: f64 = 1e-12;

/// Structural limits of a single tree
#[derive(Debug, Clone, PartialEq)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features considered per split; all when `None`
    pub max_features: Option<usize>,
}

/// What a tree is fitted against
#[derive(Debug, Clone, Copy)]
pub enum Targets<'a> {
    /// Class indices, split on gini impurity; leaves hold class distributions
    Classes { labels: &'a [usize], n_classes: usize },
    /// Real values, split on variance; leaves hold a single value
    Values(&'a [f64]),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Node {
    Leaf {
        value: Vec<f64>,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

struct Split {
    feature: usize,
    threshold: f64,
    decrease: f64,
}

struct Builder<'a> {
    features: &'a [Vec<f64>],
    targets: Targets<'a>,
    params: &'a TreeParams,
    n_features: usize,
    rng: &'a mut StdRng,
    nodes: Vec<Node>,
    importance: Vec<f64>,
}

impl DecisionTree {
    /// Grow a tree on the rows named by `indices` (duplicates allowed).
    /// Returns the tree and its unnormalized impurity decrease per feature.
    pub fn fit(
        features: &[Vec<f64>],
        targets: Targets<'_>,
        indices: &[usize],
        params: &TreeParams,
        rng: &mut StdRng,
    ) -> (Self, Vec<f64>) {
        let n_features = features.first().map(|r| r.len()).unwrap_or(0);
        let mut builder = Builder {
            features,
            targets,
            params,
            n_features,
            rng,
            nodes: Vec::new(),
            importance: vec![0.0; n_features],
        };
        builder.grow(indices.to_vec(), 0);
        (
            Self {
                nodes: builder.nodes,
            },
            builder.importance,
        )
    }

    /// Index of the leaf a row falls into
    pub fn leaf_index(&self, row: &[f64]) -> usize {
        let mut id = 0;
        loop {
            match self.nodes.get(id) {
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let v = row.get(*feature).copied().unwrap_or(0.0);
                    id = if v <= *threshold { *left } else { *right };
                }
                _ => return id,
            }
        }
    }

    /// Leaf value for a row; empty for an empty tree
    pub fn predict(&self, row: &[f64]) -> &[f64] {
        match self.nodes.get(self.leaf_index(row)) {
            Some(Node::Leaf { value }) => value,
            _ => &[],
        }
    }

    /// Replace the value stored in a leaf
    pub fn set_leaf_value(&mut self, leaf: usize, value: Vec<f64>) {
        if let Some(Node::Leaf { value: slot }) = self.nodes.get_mut(leaf) {
            *slot = value;
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], id: usize) -> usize {
            match nodes.get(id) {
                Some(Node::Split { left, right, .. }) => 1 + walk(nodes, *left).max(walk(nodes, *right)),
                _ => 0,
            }
        }
        walk(&self.nodes, 0)
    }
}

impl Builder<'_> {
    fn grow(&mut self, indices: Vec<usize>, depth: usize) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { value: Vec::new() });

        let impurity = self.impurity(&indices);
        let splittable = depth < self.params.max_depth
            && indices.len() >= self.params.min_samples_split.max(2)
            && impurity > MIN_IMPURITY_DECREASE;

        if splittable {
            if let Some(split) = self.best_split(&indices) {
                let (left, right): (Vec<usize>, Vec<usize>) = indices
                    .iter()
                    .partition(|&&i| self.features[i][split.feature] <= split.threshold);
                self.importance[split.feature] += split.decrease;
                let left_id = self.grow(left, depth + 1);
                let right_id = self.grow(right, depth + 1);
                self.nodes[id] = Node::Split {
                    feature: split.feature,
                    threshold: split.threshold,
                    left: left_id,
                    right: right_id,
                };
                return id;
            }
        }

        self.nodes[id] = Node::Leaf {
            value: self.leaf_value(&indices),
        };
        id
    }

    fn candidate_features(&mut self) -> Vec<usize> {
        match self.params.max_features {
            Some(k) if k > 0 && k < self.n_features => sample(&mut *self.rng, self.n_features, k).into_vec(),
            _ => (0..self.n_features).collect(),
        }
    }

    fn best_split(&mut self, indices: &[usize]) -> Option<Split> {
        let n = indices.len();
        if n < 2 {
            return None;
        }
        let parent = self.impurity(indices) * n as f64;
        let min_leaf = self.params.min_samples_leaf.max(1);
        let mut best: Option<Split> = None;

        for feature in self.candidate_features() {
            let mut sorted = indices.to_vec();
            sorted.sort_by(|&a, &b| {
                self.features[a][feature]
                    .partial_cmp(&self.features[b][feature])
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            let mut left = Accumulator::new(self.targets);
            let mut right = Accumulator::new(self.targets);
            for &i in &sorted {
                right.add(self.targets, i);
            }

            for pos in 0..n - 1 {
                let i = sorted[pos];
                left.add(self.targets, i);
                right.remove(self.targets, i);

                let here = self.features[i][feature];
                let next = self.features[sorted[pos + 1]][feature];
                if here >= next || pos + 1 < min_leaf || n - pos - 1 < min_leaf {
                    continue;
                }

                let children = left.weighted_impurity() + right.weighted_impurity();
                let decrease = parent - children;
                if decrease <= MIN_IMPURITY_DECREASE {
                    continue;
                }
                if best.as_ref().map_or(true, |b| decrease > b.decrease) {
                    let mut threshold = here + (next - here) / 2.0;
                    if threshold >= next {
                        threshold = here;
                    }
                    best = Some(Split {
                        feature,
                        threshold,
                        decrease,
                    });
                }
            }
        }
        best
    }

    fn impurity(&self, indices: &[usize]) -> f64 {
        let mut acc = Accumulator::new(self.targets);
        for &i in indices {
            acc.add(self.targets, i);
        }
        acc.impurity()
    }

    fn leaf_value(&self, indices: &[usize]) -> Vec<f64> {
        match self.targets {
            Targets::Classes { labels, n_classes } => {
                let mut dist = vec![0.0; n_classes];
                for &i in indices {
                    dist[labels[i]] += 1.0;
                }
                super::normalize(&mut dist);
                dist
            }
            Targets::Values(values) => {
                if indices.is_empty() {
                    return vec![0.0];
                }
                let sum: f64 = indices.iter().map(|&i| values[i]).sum();
                vec![sum / indices.len() as f64]
            }
        }
    }
}

/// Running split statistics for one side of a candidate split
enum Accumulator {
    Classes { counts: Vec<f64>, n: f64 },
    Values { sum: f64, sum_sq: f64, n: f64 },
}

impl Accumulator {
    fn new(targets: Targets<'_>) -> Self {
        match targets {
            Targets::Classes { n_classes, .. } => Accumulator::Classes {
                counts: vec![0.0; n_classes],
                n: 0.0,
            },
            Targets::Values(_) => Accumulator::Values {
                sum: 0.0,
                sum_sq: 0.0,
                n: 0.0,
            },
        }
    }

    fn add(&mut self, targets: Targets<'_>, i: usize) {
        self.shift(targets, i, 1.0);
    }

    fn remove(&mut self, targets: Targets<'_>, i: usize) {
        self.shift(targets, i, -1.0);
    }

    fn shift(&mut self, targets: Targets<'_>, i: usize, sign: f64) {
        match (self, targets) {
            (Accumulator::Classes { counts, n }, Targets::Classes { labels, .. }) => {
                counts[labels[i]] += sign;
                *n += sign;
            }
            (Accumulator::Values { sum, sum_sq, n }, Targets::Values(values)) => {
                *sum += sign * values[i];
                *sum_sq += sign * values[i] * values[i];
                *n += sign;
            }
            _ => {}
        }
    }

    fn impurity(&self) -> f64 {
        match self {
            Accumulator::Classes { counts, n } => {
                if *n <= 0.0 {
                    return 0.0;
                }
                1.0 - counts.iter().map(|c| (c / n).powi(2)).sum::<f64>()
            }
            Accumulator::Values { sum, sum_sq, n } => {
                if *n <= 0.0 {
                    return 0.0;
                }
                let mean = sum / n;
                (sum_sq / n - mean * mean).max(0.0)
            }
        }
    }

    fn weighted_impurity(&self) -> f64 {
        let n = match self {
            Accumulator::Classes { n, .. } | Accumulator::Values { n, .. } => *n,
        };
        self.impurity() * n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn params(max_depth: usize) -> TreeParams {
        TreeParams {
            max_depth,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
        }
    }

    #[test]
    fn test_classification_tree_separates_classes() {
        let x = vec![vec![0.0, 5.0], vec![1.0, 5.0], vec![10.0, 5.0], vec![11.0, 5.0]];
        let y = vec![0, 0, 1, 1];
        let mut rng = StdRng::seed_from_u64(1);
        let (tree, importance) = DecisionTree::fit(
            &x,
            Targets::Classes {
                labels: &y,
                n_classes: 2,
            },
            &[0, 1, 2, 3],
            &params(4),
            &mut rng,
        );
        assert_eq!(tree.predict(&[0.5, 5.0]), &[1.0, 0.0]);
        assert_eq!(tree.predict(&[10.5, 5.0]), &[0.0, 1.0]);
        assert!(importance[0] > 0.0);
        assert_eq!(importance[1], 0.0);
        assert_eq!(tree.depth(), 1);
    }

    #[test]
    fn test_regression_tree_leaves_hold_means() {
        let x = vec![vec![0.0], vec![1.0], vec![2.0], vec![3.0]];
        let v = vec![1.0, 1.0, 5.0, 7.0];
        let mut rng = StdRng::seed_from_u64(1);
        let (mut tree, _) = DecisionTree::fit(&x, Targets::Values(&v), &[0, 1, 2, 3], &params(1), &mut rng);
        assert_eq!(tree.predict(&[0.0]), &[1.0]);
        assert_eq!(tree.predict(&[3.0]), &[6.0]);

        let leaf = tree.leaf_index(&[3.0]);
        tree.set_leaf_value(leaf, vec![-2.0]);
        assert_eq!(tree.predict(&[2.5]), &[-2.0]);
    }

    #[test]
    fn test_depth_limit_is_respected() {
        let x: Vec<Vec<f64>> = (0..32).map(|i| vec![i as f64]).collect();
        let y: Vec<usize> = (0..32).map(|i| i % 2).collect();
        let idx: Vec<usize> = (0..32).collect();
        let mut rng = StdRng::seed_from_u64(7);
        let targets = Targets::Classes {
            labels: &y,
            n_classes: 2,
        };
        let (tree, _) = DecisionTree::fit(&x, targets, &idx, &params(3), &mut rng);
        assert!(tree.depth() <= 3);
    }

    #[test]
    fn test_constant_features_yield_single_leaf() {
        let x = vec![vec![1.0], vec![1.0], vec![1.0]];
        let y = vec![0, 1, 1];
        let mut rng = StdRng::seed_from_u64(3);
        let targets = Targets::Classes {
            labels: &y,
            n_classes: 2,
        };
        let (tree, _) = DecisionTree::fit(&x, targets, &[0, 1, 2], &params(5), &mut rng);
        assert_eq!(tree.depth(), 0);
        let p = tree.predict(&[1.0]);
        assert!((p[1] - 2.0 / 3.0).abs() < 1e-12);
    }
}
