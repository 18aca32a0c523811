//! Grid search over per-model hyperparameters
//!
//! Candidates are scored by stratified cross-validated accuracy in the
//! feature space of an existing bundle, so its scaler, vocabulary and label
//! encoder stay frozen. The best candidate per model kind is returned as a
//! complete [`EnsembleParams`] for the next training run.

use super::split::smallest_class;
use super::trainer::{cross_validate, project};
use crate::bundle::Bundle;
use crate::ensemble::{
    BoostingParams, EnsembleMember, EnsembleParams, ForestParams, ModelKind, NetworkParams, SvmParams,
};
use crate::error::{EngineError, EngineResult};
use crate::models::InteractionRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Discrete values tried for each model kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchGrid {
    pub forest_estimators: Vec<usize>,
    pub forest_depths: Vec<usize>,
    pub boosting_estimators: Vec<usize>,
    pub boosting_learning_rates: Vec<f64>,
    pub svm_c: Vec<f64>,
    pub network_layers: Vec<Vec<usize>>,
    pub network_learning_rates: Vec<f64>,
    pub folds: usize,
    pub min_samples: usize,
    pub seed: u64,
}

impl Default for SearchGrid {
    fn default() -> Self {
        Self {
            forest_estimators: vec![50, 100, 200],
            forest_depths: vec![5, 10, 20],
            boosting_estimators: vec![50, 100],
            boosting_learning_rates: vec![0.05, 0.1, 0.2],
            svm_c: vec![0.1, 1.0, 10.0],
            network_layers: vec![vec![50, 25], vec![100, 50]],
            network_learning_rates: vec![0.001, 0.01],
            folds: 3,
            min_samples: 50,
            seed: 42,
        }
    }
}

impl SearchGrid {
    fn candidates(&self, kind: ModelKind, base: &EnsembleParams) -> Vec<EnsembleParams> {
        let mut out = Vec::new();
        match kind {
            ModelKind::RandomForest => {
                for &n_estimators in &self.forest_estimators {
                    for &max_depth in &self.forest_depths {
                        let mut p = base.clone();
                        p.forest = ForestParams {
                            n_estimators,
                            max_depth,
                            ..base.forest.clone()
                        };
                        out.push(p);
                    }
                }
            }
            ModelKind::GradientBoosting => {
                for &n_estimators in &self.boosting_estimators {
                    for &learning_rate in &self.boosting_learning_rates {
                        let mut p = base.clone();
                        p.boosting = BoostingParams {
                            n_estimators,
                            learning_rate,
                            ..base.boosting.clone()
                        };
                        out.push(p);
                    }
                }
            }
            ModelKind::Svm => {
                for &c in &self.svm_c {
                    let mut p = base.clone();
                    p.svm = SvmParams {
                        c,
                        ..base.svm.clone()
                    };
                    out.push(p);
                }
            }
            ModelKind::NeuralNetwork => {
                for layers in &self.network_layers {
                    for &learning_rate in &self.network_learning_rates {
                        let mut p = base.clone();
                        p.network = NetworkParams {
                            hidden_layers: layers.clone(),
                            learning_rate,
                            ..base.network.clone()
                        };
                        out.push(p);
                    }
                }
            }
        }
        out
    }
}

/// Winning parameters and their cross-validated accuracy per model kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub params: EnsembleParams,
    pub scores: BTreeMap<ModelKind, f64>,
    pub candidates_evaluated: usize,
}

/// Run the grid against `records` in the feature space of `bundle`
pub fn search(
    bundle: &Bundle,
    records: &[InteractionRecord],
    base: &EnsembleParams,
    grid: &SearchGrid,
) -> EngineResult<SearchOutcome> {
    if records.len() < grid.min_samples {
        return Err(EngineError::DataInsufficient {
            available: records.len(),
            required: grid.min_samples,
        });
    }

    let data = project(bundle, records)?;
    let folds = grid.folds.clamp(2, smallest_class(&data.labels).max(2));
    let rows: Vec<usize> = (0..data.labels.len()).collect();

    let mut best_params = base.clone();
    let mut scores = BTreeMap::new();
    let mut evaluated = 0;

    for kind in ModelKind::ALL {
        let mut best: Option<(f64, EnsembleParams)> = None;
        for candidate in grid.candidates(kind, base) {
            let template = EnsembleMember::new(kind, &candidate);
            let fold_scores = cross_validate(&template, &data, &rows, folds, grid.seed)?;
            let mean = fold_scores.iter().sum::<f64>() / fold_scores.len().max(1) as f64;
            evaluated += 1;
            if best.as_ref().map_or(true, |(score, _)| mean > *score) {
                best = Some((mean, candidate));
            }
        }

        if let Some((score, params)) = best {
            info!(model = %kind, cv_accuracy = score, "Best hyperparameters selected");
            match kind {
                ModelKind::RandomForest => best_params.forest = params.forest,
                ModelKind::GradientBoosting => best_params.boosting = params.boosting,
                ModelKind::Svm => best_params.svm = params.svm,
                ModelKind::NeuralNetwork => best_params.network = params.network,
            }
            scores.insert(kind, score);
        }
    }

    Ok(SearchOutcome {
        params: best_params,
        scores,
        candidates_evaluated: evaluated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BundleVersion;
    use crate::training::{Trainer, TrainerConfig};

    fn corpus(n: usize) -> Vec<InteractionRecord> {
        (0..n)
            .map(|i| {
                if i % 3 == 0 {
                    InteractionRecord::new(format!("draft memo {}", i), "no", false)
                } else {
                    InteractionRecord::new(format!("scan 10.0.0.{}", i), "22/tcp open", true).with_tools(["nmap"])
                }
            })
            .collect()
    }

    fn tiny_grid() -> SearchGrid {
        SearchGrid {
            forest_estimators: vec![5, 10],
            forest_depths: vec![3],
            boosting_estimators: vec![5],
            boosting_learning_rates: vec![0.1],
            svm_c: vec![1.0],
            network_layers: vec![vec![8, 4]],
            network_learning_rates: vec![0.01],
            min_samples: 20,
            ..SearchGrid::default()
        }
    }

    #[test]
    fn test_search_returns_params_for_every_kind() {
        let records = corpus(30);
        let params = EnsembleParams::compact();
        let bundle = Trainer::new(TrainerConfig::default(), params.clone())
            .train(&records, BundleVersion::INITIAL)
            .unwrap();

        let outcome = search(&bundle, &records, &params, &tiny_grid()).unwrap();
        assert_eq!(outcome.scores.len(), 4);
        assert_eq!(outcome.candidates_evaluated, 5);
        assert!([5, 10].contains(&outcome.params.forest.n_estimators));
        assert_eq!(outcome.params.network.hidden_layers, vec![8, 4]);
    }

    #[test]
    fn test_search_needs_enough_samples() {
        let records = corpus(30);
        let params = EnsembleParams::compact();
        let bundle = Trainer::new(TrainerConfig::default(), params.clone())
            .train(&records, BundleVersion::INITIAL)
            .unwrap();
        let err = search(&bundle, &records[..12], &params, &SearchGrid::default()).unwrap_err();
        assert!(matches!(err, EngineError::DataInsufficient { required: 50, .. }));
    }

    #[test]
    fn test_unseen_label_is_stale() {
        let records = corpus(30);
        let params = EnsembleParams::compact();
        let bundle = Trainer::new(TrainerConfig::default(), params.clone())
            .train(&records, BundleVersion::INITIAL)
            .unwrap();

        let mut grown = records.clone();
        grown.push(InteractionRecord::new("dump table", "rows", true).with_tools(["sqlmap"]));
        let err = search(&bundle, &grown, &params, &tiny_grid()).unwrap_err();
        assert!(matches!(err, EngineError::StaleLabelSet { .. }));
    }
}
