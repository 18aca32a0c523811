//! Full training run over the interaction corpus

use super::encoder::LabelEncoder;
use super::split::{smallest_class, stratified_folds, train_test_split};
use crate::bundle::{Bundle, ModelArtifact, ModelMetrics, TrainingMetadata};
use crate::ensemble::{Classifier, EnsembleMember, EnsembleParams, ModelKind};
use crate::error::{EngineError, EngineResult};
use crate::features::{derive_label, FeatureExtractor, Scaler, TextVectorizer, FEATURE_NAMES, OUTCOME_FEATURES};
use crate::models::{BundleVersion, FeatureVector, InteractionRecord, Label, FEATURE_COUNT};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info};

/// How cross-validation adapts to small classes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossValidationPolicy {
    pub folds: usize,
    /// Shrink the fold count to the smallest class (minimum 2) instead of
    /// skipping cross-validation when a class is smaller than `folds`
    pub adapt_to_smallest_class: bool,
}

impl Default for CrossValidationPolicy {
    fn default() -> Self {
        Self {
            folds: 5,
            adapt_to_smallest_class: false,
        }
    }
}

impl CrossValidationPolicy {
    /// Folds to use given the smallest class size, or `None` to skip
    pub fn folds_for(&self, smallest_class: usize) -> Option<usize> {
        if self.folds < 2 {
            return None;
        }
        if smallest_class >= self.folds {
            Some(self.folds)
        } else if self.adapt_to_smallest_class && smallest_class >= 2 {
            Some(smallest_class)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Corpus size below which training is refused
    pub min_samples: usize,
    pub test_fraction: f64,
    pub cross_validation: CrossValidationPolicy,
    pub seed: u64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            min_samples: 10,
            test_fraction: 0.2,
            cross_validation: CrossValidationPolicy::default(),
            seed: 42,
        }
    }
}

/// Labelled corpus projected into one bundle's feature space
pub(crate) struct Dataset {
    pub features: Vec<Vec<f64>>,
    pub labels: Vec<usize>,
    pub n_classes: usize,
}

impl Dataset {
    fn rows(&self, indices: &[usize]) -> (Vec<Vec<f64>>, Vec<usize>) {
        (
            indices.iter().map(|&i| self.features[i].clone()).collect(),
            indices.iter().map(|&i| self.labels[i]).collect(),
        )
    }
}

/// Zero the outcome columns, which are unknown when predicting
pub(crate) fn mask_outcome(mut row: FeatureVector) -> FeatureVector {
    for j in OUTCOME_FEATURES {
        row[j] = 0.0;
    }
    row
}

/// Fraction of rows a fitted member classifies correctly
pub(crate) fn accuracy(model: &EnsembleMember, features: &[Vec<f64>], labels: &[usize]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let correct = features
        .iter()
        .zip(labels)
        .filter(|(row, label)| model.predict_with_confidence(row).0 == **label)
        .count();
    correct as f64 / labels.len() as f64
}

/// Accuracy of a fresh copy of `template` on each held-out fold
pub(crate) fn cross_validate(
    template: &EnsembleMember,
    data: &Dataset,
    rows: &[usize],
    folds: usize,
    seed: u64,
) -> EngineResult<Vec<f64>> {
    let fold_labels: Vec<usize> = rows.iter().map(|&i| data.labels[i]).collect();
    let held_out = stratified_folds(&fold_labels, folds, seed);

    let mut scores = Vec::with_capacity(held_out.len());
    for fold in &held_out {
        let test: Vec<usize> = fold.iter().map(|&p| rows[p]).collect();
        let train: Vec<usize> = (0..rows.len())
            .filter(|p| fold.binary_search(p).is_err())
            .map(|p| rows[p])
            .collect();
        let (train_x, train_y) = data.rows(&train);
        let (test_x, test_y) = data.rows(&test);

        let mut model = template.clone();
        model.fit(&train_x, &train_y, data.n_classes)?;
        scores.push(accuracy(&model, &test_x, &test_y));
    }
    Ok(scores)
}

fn mean_std(scores: &[f64]) -> (f64, f64) {
    let n = scores.len().max(1) as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let var = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Fits every transform and model of a bundle from the full corpus
#[derive(Debug, Clone)]
pub struct Trainer {
    config: TrainerConfig,
    params: EnsembleParams,
}

impl Trainer {
    pub fn new(config: TrainerConfig, params: EnsembleParams) -> Self {
        Self { config, params }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn params(&self) -> &EnsembleParams {
        &self.params
    }

    /// Train a complete bundle tagged `version`.
    ///
    /// Fails with [`EngineError::DataInsufficient`] below the minimum sample
    /// count and [`EngineError::DegenerateLabels`] when the corpus holds a
    /// single label. Nothing is written to disk here.
    pub fn train(&self, records: &[InteractionRecord], version: BundleVersion) -> EngineResult<Bundle> {
        let started = Instant::now();
        let n = records.len();
        if n < self.config.min_samples {
            return Err(EngineError::DataInsufficient {
                available: n,
                required: self.config.min_samples,
            });
        }

        let labels: Vec<Label> = records.iter().map(derive_label).collect();
        let encoder = LabelEncoder::fit(&labels);
        if encoder.len() < 2 {
            return Err(EngineError::DegenerateLabels {
                distinct: encoder.len(),
            });
        }
        let encoded = encoder.encode_all(&labels)?;

        let documents: Vec<String> = records.iter().map(InteractionRecord::combined_text).collect();
        let vectorizer = TextVectorizer::fit(&documents);
        let raw: Vec<FeatureVector> = FeatureExtractor::new(&vectorizer)
            .extract_all(records)
            .into_iter()
            .map(mask_outcome)
            .collect();
        let scaler = Scaler::fit(&raw);

        let data = Dataset {
            features: scaler.transform_all(&raw),
            labels: encoded,
            n_classes: encoder.len(),
        };

        let (split, degenerate) = train_test_split(&data.labels, self.config.test_fraction, self.config.seed);
        if let Some((class, count)) = degenerate {
            let label = encoder.decode(class).map(|l| l.to_string()).unwrap_or_default();
            let reason = EngineError::DegenerateSplit { label, count };
            debug!(reason = %reason, "Falling back to non-stratified split");
        }
        let (train_x, train_y) = data.rows(&split.train);
        let (test_x, test_y) = data.rows(&split.test);

        let cv_folds = self
            .config
            .cross_validation
            .folds_for(smallest_class(&train_y));

        let trained_at = Utc::now();
        let mut models = Vec::with_capacity(ModelKind::ALL.len());
        let mut metrics = BTreeMap::new();

        for kind in ModelKind::ALL {
            let template = EnsembleMember::new(kind, &self.params);

            let (cv_mean, cv_std) = match cv_folds {
                Some(folds) => {
                    let scores = cross_validate(&template, &data, &split.train, folds, self.config.seed)?;
                    let (mean, std) = mean_std(&scores);
                    (Some(mean), Some(std))
                }
                None => (None, None),
            };

            let mut model = template;
            model.fit(&train_x, &train_y, data.n_classes)?;
            let held_out = accuracy(&model, &test_x, &test_y);

            info!(
                model = %kind,
                version = %version,
                accuracy = held_out,
                cv_mean = ?cv_mean,
                "Model trained"
            );

            metrics.insert(
                kind,
                ModelMetrics {
                    accuracy: held_out,
                    cv_mean,
                    cv_std,
                    cv_folds: cv_folds.filter(|_| cv_mean.is_some()),
                },
            );
            models.push(ModelArtifact {
                model_kind: kind,
                version,
                trained_at,
                training_sample_count: split.train.len(),
                parameters: model,
            });
        }

        let mut label_distribution = BTreeMap::new();
        for label in &labels {
            *label_distribution.entry(*label).or_insert(0) += 1;
        }

        let metadata = TrainingMetadata {
            version,
            feature_count: FEATURE_COUNT,
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            trained_at,
            sample_count: n,
            train_samples: split.train.len(),
            test_samples: split.test.len(),
            stratified: split.stratified,
            label_distribution,
            models: metrics,
            params: self.params.clone(),
            duration_secs: started.elapsed().as_secs_f64(),
            checksums: BTreeMap::new(),
        };

        Ok(Bundle {
            metadata,
            scaler,
            vectorizer,
            encoder,
            models,
        })
    }
}

/// Project a corpus into an existing bundle's feature space
pub(crate) fn project(bundle: &Bundle, records: &[InteractionRecord]) -> EngineResult<Dataset> {
    let labels: Vec<Label> = records.iter().map(derive_label).collect();
    let encoded = bundle.encoder.encode_all(&labels)?;
    let raw: Vec<FeatureVector> = FeatureExtractor::new(&bundle.vectorizer)
        .extract_all(records)
        .into_iter()
        .map(mask_outcome)
        .collect();
    Ok(Dataset {
        features: bundle.scaler.transform_all(&raw),
        labels: encoded,
        n_classes: bundle.encoder.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus(successes: usize, failures: usize) -> Vec<InteractionRecord> {
        let mut records = Vec::new();
        for i in 0..successes {
            records.push(
                InteractionRecord::new(
                    format!("scan host 10.0.0.{} with nmap", i),
                    "Nmap scan report: 22/tcp open ssh",
                    true,
                )
                .with_tools(["nmap"]),
            );
        }
        for i in 0..failures {
            records.push(InteractionRecord::new(format!("draft memo number {}", i), "nothing happened", false));
        }
        records
    }

    fn trainer() -> Trainer {
        Trainer::new(TrainerConfig::default(), EnsembleParams::compact())
    }

    #[test]
    fn test_cv_policy() {
        let fixed = CrossValidationPolicy::default();
        assert_eq!(fixed.folds_for(7), Some(5));
        assert_eq!(fixed.folds_for(3), None);

        let adaptive = CrossValidationPolicy {
            adapt_to_smallest_class: true,
            ..CrossValidationPolicy::default()
        };
        assert_eq!(adaptive.folds_for(3), Some(3));
        assert_eq!(adaptive.folds_for(1), None);
    }

    #[test]
    fn test_refuses_small_corpus() {
        let err = trainer().train(&corpus(5, 4), BundleVersion::INITIAL).unwrap_err();
        assert!(matches!(err, EngineError::DataInsufficient { available: 9, required: 10 }));
    }

    #[test]
    fn test_refuses_single_label() {
        let err = trainer().train(&corpus(12, 0), BundleVersion::INITIAL).unwrap_err();
        assert!(matches!(err, EngineError::DegenerateLabels { distinct: 1 }));
    }

    #[test]
    fn test_bundle_is_complete_and_versioned() {
        let bundle = trainer().train(&corpus(8, 4), BundleVersion::INITIAL).unwrap();
        assert_eq!(bundle.version(), BundleVersion::INITIAL);
        assert_eq!(bundle.models.len(), 4);
        assert!(bundle.models.iter().all(|m| m.version == BundleVersion::INITIAL));
        assert_eq!(bundle.metadata.feature_count, FEATURE_COUNT);
        assert_eq!(bundle.metadata.feature_names.len(), FEATURE_COUNT);
        assert_eq!(bundle.metadata.sample_count, 12);
        assert_eq!(bundle.metadata.train_samples + bundle.metadata.test_samples, 12);
        assert_eq!(bundle.metadata.label_distribution[&Label::Failure], 4);
        assert_eq!(bundle.encoder.len(), 2);
    }

    #[test]
    fn test_cross_validation_runs_when_classes_allow() {
        let config = TrainerConfig {
            cross_validation: CrossValidationPolicy {
                folds: 3,
                adapt_to_smallest_class: false,
            },
            ..TrainerConfig::default()
        };
        let bundle = Trainer::new(config, EnsembleParams::compact())
            .train(&corpus(12, 8), BundleVersion::INITIAL)
            .unwrap();
        for metrics in bundle.metadata.models.values() {
            assert_eq!(metrics.cv_folds, Some(3));
            let mean = metrics.cv_mean.unwrap();
            assert!((0.0..=1.0).contains(&mean));
        }
    }

    #[test]
    fn test_outcome_columns_are_masked() {
        let bundle = trainer().train(&corpus(8, 4), BundleVersion::INITIAL).unwrap();
        for j in OUTCOME_FEATURES {
            assert_eq!(bundle.scaler.mean()[j], 0.0);
        }
    }

    #[test]
    fn test_training_is_deterministic() {
        let records = corpus(8, 4);
        let a = trainer().train(&records, BundleVersion::INITIAL).unwrap();
        let b = trainer().train(&records, BundleVersion::INITIAL).unwrap();
        assert_eq!(a.models[0].parameters, b.models[0].parameters);
        assert_eq!(a.scaler, b.scaler);
    }
}
