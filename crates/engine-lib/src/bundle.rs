//! Trained bundle: frozen transforms, label encoder and the four models

use crate::ensemble::{EnsembleMember, EnsembleParams, ModelKind};
use crate::features::{FeatureExtractor, Scaler, TextVectorizer};
use crate::models::{BundleVersion, InteractionRecord, Label};
use crate::training::LabelEncoder;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Evaluation of one model from the run that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    /// Accuracy on the held-out split
    pub accuracy: f64,
    pub cv_mean: Option<f64>,
    pub cv_std: Option<f64>,
    pub cv_folds: Option<usize>,
}

/// Record describing how a bundle was trained
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetadata {
    pub version: BundleVersion,
    pub feature_count: usize,
    pub feature_names: Vec<String>,
    pub trained_at: DateTime<Utc>,
    /// Corpus size consumed by the run
    pub sample_count: usize,
    pub train_samples: usize,
    pub test_samples: usize,
    pub stratified: bool,
    pub label_distribution: BTreeMap<Label, usize>,
    pub models: BTreeMap<ModelKind, ModelMetrics>,
    pub params: EnsembleParams,
    pub duration_secs: f64,
    /// SHA-256 of every artifact file, filled in when the bundle is written
    #[serde(default)]
    pub checksums: BTreeMap<String, String>,
}

impl TrainingMetadata {
    /// Model with the best held-out accuracy; earlier kinds win ties
    pub fn best_model(&self) -> Option<(ModelKind, f64)> {
        let mut best: Option<(ModelKind, f64)> = None;
        for (kind, metrics) in &self.models {
            if best.map_or(true, |(_, acc)| metrics.accuracy > acc) {
                best = Some((*kind, metrics.accuracy));
            }
        }
        best
    }
}

/// One fitted ensemble member as persisted in a bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub model_kind: ModelKind,
    pub version: BundleVersion,
    pub trained_at: DateTime<Utc>,
    pub training_sample_count: usize,
    pub parameters: EnsembleMember,
}

/// Immutable unit of serving; every part carries the same version
#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    pub metadata: TrainingMetadata,
    pub scaler: Scaler,
    pub vectorizer: TextVectorizer,
    pub encoder: LabelEncoder,
    pub models: Vec<ModelArtifact>,
}

impl Bundle {
    pub fn version(&self) -> BundleVersion {
        self.metadata.version
    }

    pub fn model(&self, kind: ModelKind) -> Option<&ModelArtifact> {
        self.models.iter().find(|m| m.model_kind == kind)
    }

    /// Scaled features of a record under this bundle's frozen transforms;
    /// `missing` columns are placed at the training mean
    pub fn scaled_features(&self, record: &InteractionRecord, missing: &[usize]) -> Vec<f64> {
        let raw = FeatureExtractor::new(&self.vectorizer).extract(record);
        self.scaler.transform_with_missing(&raw, missing)
    }
}

/// Shared pointer to the bundle currently being served.
///
/// Readers take an `Arc` snapshot and keep using it for the whole call, so a
/// concurrent publish never changes a prediction already in flight.
#[derive(Debug, Clone, Default)]
pub struct BundleHandle {
    current: Arc<RwLock<Option<Arc<Bundle>>>>,
}

impl BundleHandle {
    pub fn snapshot(&self) -> Option<Arc<Bundle>> {
        self.current.read().clone()
    }

    /// Atomically replace the served bundle
    pub fn publish(&self, bundle: Arc<Bundle>) {
        *self.current.write() = Some(bundle);
    }

    pub fn version(&self) -> Option<BundleVersion> {
        self.current.read().as_ref().map(|b| b.version())
    }
}
