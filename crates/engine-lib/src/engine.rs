//! Learning engine facade
//!
//! [`LearningEngine`] owns the corpus, the registry and the served bundle.
//! Predictions read an immutable bundle snapshot; training builds a new
//! bundle off to the side and publishes it atomically when it is persisted.

use crate::bundle::{Bundle, BundleHandle, ModelMetrics, TrainingMetadata};
use crate::config::EngineConfig;
use crate::corpus::InteractionCorpus;
use crate::ensemble::{Classifier, EnsembleParams, ModelKind};
use crate::error::{EngineError, EngineResult};
use crate::features::assess_success;
use crate::health::{Component, HealthRegistry};
use crate::models::{BundleVersion, InteractionRecord, Label, FEATURE_COUNT};
use crate::observability::{EngineMetrics, StructuredLogger};
use crate::predictor::{AdviceFormatter, Prediction, PredictionService};
use crate::registry::ModelRegistry;
use crate::scheduler::{TriggerInput, TriggerReason};
use crate::training::{search, SearchOutcome, Trainer};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Handle to a running training job
pub type TrainingHandle = JoinHandle<EngineResult<TrainingReport>>;

/// Lifecycle of the served bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    Untrained,
    Training,
    Ready,
    Retraining,
}

/// Interaction as reported by a collaborator; missing outcome fields are
/// assessed from the output text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewInteraction {
    pub user_input: String,
    pub tools_used: Vec<String>,
    pub output_text: String,
    pub success: Option<bool>,
    pub execution_time: f64,
    pub error_occurred: Option<bool>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl NewInteraction {
    pub fn into_record(self) -> InteractionRecord {
        let success = self.success.unwrap_or_else(|| assess_success(&self.output_text));
        let error_occurred = self
            .error_occurred
            .unwrap_or_else(|| self.output_text.to_lowercase().contains("error"));
        let record = InteractionRecord::new(self.user_input, self.output_text, success)
            .with_tools(self.tools_used)
            .with_execution_time(self.execution_time)
            .with_error(error_occurred);
        match self.timestamp {
            Some(at) => record.with_timestamp(at),
            None => record,
        }
    }
}

/// Result of recording an interaction
#[derive(Debug)]
pub struct RecordOutcome {
    pub id: String,
    pub total_samples: usize,
    /// Training started because of this record
    pub triggered: Option<TriggerReason>,
    pub training: Option<TrainingHandle>,
}

/// Summary of a successful training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub trained: bool,
    pub version: BundleVersion,
    pub reason: TriggerReason,
    pub sample_count: usize,
    pub train_samples: usize,
    pub test_samples: usize,
    pub stratified: bool,
    pub models: BTreeMap<ModelKind, ModelMetrics>,
    pub duration_secs: f64,
}

impl TrainingReport {
    fn new(metadata: &TrainingMetadata, reason: TriggerReason) -> Self {
        Self {
            trained: true,
            version: metadata.version,
            reason,
            sample_count: metadata.sample_count,
            train_samples: metadata.train_samples,
            test_samples: metadata.test_samples,
            stratified: metadata.stratified,
            models: metadata.models.clone(),
            duration_secs: metadata.duration_secs,
        }
    }
}

/// Outcome feedback on past predictions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackStats {
    pub predictions_made: u64,
    pub correct_predictions: u64,
}

impl FeedbackStats {
    pub fn accuracy(&self) -> Option<f64> {
        if self.predictions_made == 0 {
            None
        } else {
            Some(self.correct_predictions as f64 / self.predictions_made as f64)
        }
    }
}

/// Snapshot of the engine for status queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub trained: bool,
    pub state: ModelState,
    pub version: Option<BundleVersion>,
    pub sample_count: usize,
    pub samples_since_training: usize,
    pub feature_count: usize,
    pub model_accuracy: BTreeMap<ModelKind, f64>,
    pub label_distribution: BTreeMap<Label, usize>,
    pub last_trained_at: Option<DateTime<Utc>>,
    pub learning_enabled: bool,
    pub training_in_progress: bool,
    /// A label outside the active encoder was seen; next run refits fully
    pub stale_labels: bool,
    pub last_error: Option<String>,
    pub feedback: FeedbackStats,
    pub prediction_accuracy: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScore {
    pub name: String,
    pub importance: f64,
}

/// What the active bundle has learned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insights {
    pub version: BundleVersion,
    /// Highest averaged importance first
    pub top_features: Vec<FeatureScore>,
    pub best_model: Option<ModelKind>,
    pub best_accuracy: Option<f64>,
    pub label_distribution: BTreeMap<Label, usize>,
}

/// Number of features reported by [`LearningEngine::insights`]
pub const TOP_FEATURES: usize = 5;

struct Lifecycle {
    state: ModelState,
    last_failure_samples: Option<usize>,
    stale_labels: bool,
    last_error: Option<String>,
}

struct Inner {
    config: EngineConfig,
    corpus: Mutex<InteractionCorpus>,
    registry: ModelRegistry,
    bundle: BundleHandle,
    predictor: PredictionService,
    params: RwLock<EnsembleParams>,
    lifecycle: Mutex<Lifecycle>,
    training: Arc<tokio::sync::Mutex<()>>,
    learning_enabled: AtomicBool,
    feedback: Mutex<FeedbackStats>,
    metrics: EngineMetrics,
    logger: StructuredLogger,
    health: HealthRegistry,
}

/// Shared handle to the learning engine; clones refer to the same engine
#[derive(Clone)]
pub struct LearningEngine {
    inner: Arc<Inner>,
}

impl LearningEngine {
    /// Open the data directory, load the corpus and serve the newest
    /// complete bundle if one exists
    pub async fn open(config: EngineConfig) -> EngineResult<Self> {
        let health = HealthRegistry::new();

        let corpus = match InteractionCorpus::open(config.corpus_path()) {
            Ok(c) => c,
            Err(e) => {
                health.io_failed(Component::Corpus, &e);
                return Err(e);
            }
        };
        let registry = ModelRegistry::open(config.models_dir())?;

        let bundle = BundleHandle::default();
        let metrics = EngineMetrics::new();
        match registry.load_latest() {
            Ok(Some(loaded)) => {
                metrics.set_bundle_version(loaded.version());
                bundle.publish(Arc::new(loaded));
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Failed to load bundle, starting untrained");
                health.registry_degraded(&e);
            }
        }
        health.observe_bundle(bundle.version());
        metrics.set_corpus_samples(corpus.len());

        let state = if bundle.snapshot().is_some() {
            ModelState::Ready
        } else {
            ModelState::Untrained
        };
        let logger = StructuredLogger::new(config.instance_name.clone());
        logger.log_startup(env!("CARGO_PKG_VERSION"), bundle.version(), corpus.len());

        let engine = Self {
            inner: Arc::new(Inner {
                predictor: PredictionService::new(AdviceFormatter::new(config.advice.clone())),
                params: RwLock::new(config.models.clone()),
                learning_enabled: AtomicBool::new(config.learning_enabled),
                config,
                corpus: Mutex::new(corpus),
                registry,
                bundle,
                lifecycle: Mutex::new(Lifecycle {
                    state,
                    last_failure_samples: None,
                    stale_labels: false,
                    last_error: None,
                }),
                training: Arc::new(tokio::sync::Mutex::new(())),
                feedback: Mutex::new(FeedbackStats::default()),
                metrics,
                logger,
                health,
            }),
        };
        engine.inner.health.set_accepting(true);
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.inner.health
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.inner.metrics
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.inner.logger
    }

    /// Handle to the served bundle; snapshots taken from it are unaffected
    /// by later publishes
    pub fn bundle(&self) -> &BundleHandle {
        &self.inner.bundle
    }

    /// Parameters used by the next training run
    pub fn params(&self) -> EnsembleParams {
        self.inner.params.read().clone()
    }

    pub fn state(&self) -> ModelState {
        self.inner.lifecycle.lock().state
    }

    /// Persist an interaction and start training if a trigger fires
    pub async fn record(&self, record: InteractionRecord) -> EngineResult<RecordOutcome> {
        let id = record.id.clone();
        let appended = {
            let mut corpus = self.inner.corpus.lock();
            corpus.append(record).map(|_| corpus.len())
        };
        let total_samples = match appended {
            Ok(total) => total,
            Err(e) => {
                self.inner.health.io_failed(Component::Corpus, &e);
                return Err(e);
            }
        };
        self.inner.metrics.set_corpus_samples(total_samples);

        let (triggered, training) = match self.maybe_retrain() {
            Some((reason, handle)) => (Some(reason), Some(handle)),
            None => (None, None),
        };
        Ok(RecordOutcome {
            id,
            total_samples,
            triggered,
            training,
        })
    }

    /// Record an interaction whose outcome may still need assessing
    pub async fn record_interaction(&self, interaction: NewInteraction) -> EngineResult<RecordOutcome> {
        self.record(interaction.into_record()).await
    }

    /// Counters the retrain policy is evaluated against
    pub fn trigger_input(&self) -> TriggerInput {
        let total_samples = self.inner.corpus.lock().len();
        let trained_samples = self.inner.bundle.snapshot().map(|b| b.metadata.sample_count);
        let lifecycle = self.inner.lifecycle.lock();
        TriggerInput {
            total_samples,
            trained_samples,
            last_failure_samples: lifecycle.last_failure_samples,
            stale_labels: lifecycle.stale_labels,
            learning_enabled: self.learning_enabled(),
        }
    }

    /// Start training when the retrain policy says a run is due.
    ///
    /// Returns `None` when nothing is due or a run is already in progress.
    pub fn maybe_retrain(&self) -> Option<(TriggerReason, TrainingHandle)> {
        let input = self.trigger_input();
        let reason = self.inner.config.retrain.evaluate(&input)?;
        match self.start_training(reason) {
            Ok(handle) => Some((reason, handle)),
            Err(EngineError::TrainingInProgress) => None,
            Err(e) => {
                warn!(reason = %reason, error = %e, "Failed to start training");
                None
            }
        }
    }

    /// Train a new bundle from the whole corpus.
    ///
    /// Fails immediately with [`EngineError::TrainingInProgress`] if another
    /// run holds the training slot, or [`EngineError::DataInsufficient`]
    /// below the trainer's minimum. Serving continues from the current
    /// bundle until the new one is persisted.
    pub fn train(&self) -> EngineResult<TrainingHandle> {
        self.start_training(TriggerReason::Manual)
    }

    fn start_training(&self, reason: TriggerReason) -> EngineResult<TrainingHandle> {
        let guard = self
            .inner
            .training
            .clone()
            .try_lock_owned()
            .map_err(|_| EngineError::TrainingInProgress)?;

        let records = self.inner.corpus.lock().records().to_vec();
        let required = self.inner.config.trainer.min_samples;
        if records.len() < required {
            return Err(EngineError::DataInsufficient {
                available: records.len(),
                required,
            });
        }
        let version = self.inner.registry.next_version()?;
        let previous = {
            let mut lifecycle = self.inner.lifecycle.lock();
            let previous = lifecycle.state;
            lifecycle.state = if self.inner.bundle.snapshot().is_some() {
                ModelState::Retraining
            } else {
                ModelState::Training
            };
            previous
        };

        let engine = self.clone();
        Ok(tokio::spawn(async move {
            let _slot = guard;
            engine.run_training(records, version, previous, reason).await
        }))
    }

    async fn run_training(
        &self,
        records: Vec<InteractionRecord>,
        version: BundleVersion,
        previous: ModelState,
        reason: TriggerReason,
    ) -> EngineResult<TrainingReport> {
        let sample_count = records.len();
        self.inner
            .logger
            .log_training_started(version, sample_count, &reason.to_string());

        let started = Instant::now();
        let trainer = Trainer::new(self.inner.config.trainer.clone(), self.params());
        let registry = self.inner.registry.clone();
        let result = tokio::task::spawn_blocking(move || -> EngineResult<Bundle> {
            let mut bundle = trainer.train(&records, version)?;
            registry.save(&mut bundle)?;
            Ok(bundle)
        })
        .await
        .map_err(|e| EngineError::TrainingAborted(e.to_string()))
        .and_then(|r| r);
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(bundle) => {
                let report = TrainingReport::new(&bundle.metadata, reason);
                let best = bundle.metadata.best_model();
                let old_version = self.inner.bundle.version();
                self.inner.bundle.publish(Arc::new(bundle));
                {
                    let mut lifecycle = self.inner.lifecycle.lock();
                    lifecycle.state = ModelState::Ready;
                    lifecycle.last_failure_samples = None;
                    lifecycle.stale_labels = false;
                    lifecycle.last_error = None;
                }

                self.inner.metrics.observe_training(elapsed, true);
                self.inner.metrics.set_bundle_version(version);
                self.inner
                    .logger
                    .log_training_completed(version, sample_count, best, elapsed);
                self.inner.logger.log_model_published(old_version, version);
                self.inner.health.observe_training(Ok(version));
                Ok(report)
            }
            Err(e) => {
                {
                    let mut lifecycle = self.inner.lifecycle.lock();
                    lifecycle.state = previous;
                    // Manual runs never hold back the automatic schedule
                    if reason != TriggerReason::Manual {
                        lifecycle.last_failure_samples = Some(sample_count);
                    }
                    lifecycle.last_error = Some(e.to_string());
                }
                self.inner.metrics.observe_training(elapsed, false);
                self.inner
                    .logger
                    .log_training_failed(version, sample_count, e.kind(), &e.to_string());
                self.inner.health.observe_training(Err(&e));
                Err(e)
            }
        }
    }

    /// Wait until no training run holds the training slot
    pub async fn wait_for_training(&self) {
        let _slot = self.inner.training.lock().await;
    }

    pub fn predict(&self, text: &str, tools: Option<&[String]>) -> Prediction {
        self.predict_at(text, tools, Utc::now())
    }

    /// Predict as if the operation were proposed at `at`
    pub fn predict_at(&self, text: &str, tools: Option<&[String]>, at: DateTime<Utc>) -> Prediction {
        if !self.learning_enabled() {
            return Prediction::learning_disabled();
        }
        let Some(bundle) = self.inner.bundle.snapshot() else {
            return Prediction::untrained();
        };

        let started = Instant::now();
        let prediction = self.inner.predictor.predict(&bundle, text, tools, at);
        self.inner
            .metrics
            .observe_prediction_latency(started.elapsed().as_secs_f64());
        self.inner
            .logger
            .log_prediction(prediction.label, prediction.confidence, prediction.version);
        prediction
    }

    pub fn status(&self) -> EngineStatus {
        let bundle = self.inner.bundle.snapshot();
        let sample_count = self.inner.corpus.lock().len();
        let lifecycle = self.inner.lifecycle.lock();
        let feedback = *self.inner.feedback.lock();
        let metadata = bundle.as_ref().map(|b| &b.metadata);

        EngineStatus {
            trained: bundle.is_some(),
            state: lifecycle.state,
            version: metadata.map(|m| m.version),
            sample_count,
            samples_since_training: sample_count.saturating_sub(metadata.map_or(0, |m| m.sample_count)),
            feature_count: metadata.map_or(FEATURE_COUNT, |m| m.feature_count),
            model_accuracy: metadata
                .map(|m| m.models.iter().map(|(k, v)| (*k, v.accuracy)).collect())
                .unwrap_or_default(),
            label_distribution: metadata.map(|m| m.label_distribution.clone()).unwrap_or_default(),
            last_trained_at: metadata.map(|m| m.trained_at),
            learning_enabled: self.learning_enabled(),
            training_in_progress: self.inner.training.try_lock().is_err(),
            stale_labels: lifecycle.stale_labels,
            last_error: lifecycle.last_error.clone(),
            feedback,
            prediction_accuracy: feedback.accuracy(),
        }
    }

    /// Grid-search hyperparameters against the active bundle's feature
    /// space; the winners are used by subsequent training runs
    pub async fn optimize_hyperparameters(&self) -> EngineResult<SearchOutcome> {
        let grid = self.inner.config.search.clone();
        let records = self.inner.corpus.lock().records().to_vec();
        if records.len() < grid.min_samples {
            return Err(EngineError::DataInsufficient {
                available: records.len(),
                required: grid.min_samples,
            });
        }
        let bundle = self.inner.bundle.snapshot().ok_or(EngineError::NotTrained)?;
        let base = self.params();

        let result = tokio::task::spawn_blocking(move || search(&bundle, &records, &base, &grid))
            .await
            .map_err(|e| EngineError::TrainingAborted(e.to_string()))?;

        match result {
            Ok(outcome) => {
                *self.inner.params.write() = outcome.params.clone();
                info!(
                    candidates = outcome.candidates_evaluated,
                    scores = ?outcome.scores,
                    "Hyperparameters updated for subsequent training runs"
                );
                Ok(outcome)
            }
            Err(e @ EngineError::StaleLabelSet { .. }) => {
                self.inner.lifecycle.lock().stale_labels = true;
                warn!(error = %e, "Label set changed since the active bundle, full refit scheduled");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Per-model feature importance keyed by feature name, for the models
    /// that expose one
    pub fn feature_importance(&self) -> Option<BTreeMap<ModelKind, BTreeMap<String, f64>>> {
        let bundle = self.inner.bundle.snapshot()?;
        let names = &bundle.metadata.feature_names;
        let importance = bundle
            .models
            .iter()
            .filter_map(|artifact| {
                let values = artifact.parameters.feature_importance()?;
                Some((artifact.model_kind, names.iter().cloned().zip(values).collect()))
            })
            .collect();
        Some(importance)
    }

    pub fn insights(&self) -> Option<Insights> {
        let bundle = self.inner.bundle.snapshot()?;
        let per_model = self.feature_importance()?;

        let mut averaged: BTreeMap<String, f64> = BTreeMap::new();
        for scores in per_model.values() {
            for (name, value) in scores {
                *averaged.entry(name.clone()).or_insert(0.0) += value / per_model.len() as f64;
            }
        }
        let mut top_features: Vec<FeatureScore> = averaged
            .into_iter()
            .map(|(name, importance)| FeatureScore { name, importance })
            .collect();
        top_features.sort_by(|a, b| b.importance.total_cmp(&a.importance).then_with(|| a.name.cmp(&b.name)));
        top_features.truncate(TOP_FEATURES);

        let best = bundle.metadata.best_model();
        Some(Insights {
            version: bundle.version(),
            top_features,
            best_model: best.map(|(kind, _)| kind),
            best_accuracy: best.map(|(_, acc)| acc),
            label_distribution: bundle.metadata.label_distribution.clone(),
        })
    }

    /// Track whether a past prediction matched the real outcome
    pub fn record_feedback(&self, predicted_success: bool, actual_success: bool) -> FeedbackStats {
        let mut feedback = self.inner.feedback.lock();
        feedback.predictions_made += 1;
        if predicted_success == actual_success {
            feedback.correct_predictions += 1;
        }
        *feedback
    }

    pub fn learning_enabled(&self) -> bool {
        self.inner.learning_enabled.load(Ordering::SeqCst)
    }

    /// Switch learning on or off; records are kept either way
    pub fn set_learning_enabled(&self, enabled: bool) {
        let was = self.inner.learning_enabled.swap(enabled, Ordering::SeqCst);
        if was != enabled {
            info!(enabled = enabled, "Learning toggled");
        }
    }

    /// Wait for in-flight training and log shutdown
    pub async fn shutdown(&self, reason: &str) {
        self.wait_for_training().await;
        self.inner.health.set_accepting(false);
        self.inner.logger.log_shutdown(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ComponentStatus;
    use crate::predictor::PredictionStatus;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> EngineConfig {
        EngineConfig {
            models: EnsembleParams::compact(),
            ..EngineConfig::with_data_dir(dir.path())
        }
    }

    fn interaction(i: usize) -> InteractionRecord {
        if i % 3 == 0 {
            InteractionRecord::new(format!("write report section {}", i), "could not finish", false)
        } else {
            InteractionRecord::new("scan target for open ports", "Nmap scan report: 22/tcp open ssh", true)
                .with_tools(["nmap"])
        }
    }

    #[tokio::test]
    async fn test_untrained_engine_predicts_explicitly() {
        let dir = TempDir::new().unwrap();
        let engine = LearningEngine::open(config(&dir)).await.unwrap();

        let prediction = engine.predict("scan target", None);
        assert_eq!(prediction.status, PredictionStatus::Untrained);

        let status = engine.status();
        assert!(!status.trained);
        assert_eq!(status.state, ModelState::Untrained);
        assert_eq!(status.sample_count, 0);
        assert_eq!(status.feature_count, FEATURE_COUNT);
    }

    #[tokio::test]
    async fn test_tenth_record_triggers_initial_training() {
        let dir = TempDir::new().unwrap();
        let engine = LearningEngine::open(config(&dir)).await.unwrap();

        for i in 0..9 {
            let outcome = engine.record(interaction(i)).await.unwrap();
            assert!(outcome.triggered.is_none());
        }
        let outcome = engine.record(interaction(9)).await.unwrap();
        assert_eq!(outcome.triggered, Some(TriggerReason::Initial));

        let report = outcome.training.unwrap().await.unwrap().unwrap();
        assert_eq!(report.version, BundleVersion::INITIAL);
        assert_eq!(report.models.len(), 4);

        let status = engine.status();
        assert!(status.trained);
        assert_eq!(status.state, ModelState::Ready);
        assert_eq!(status.samples_since_training, 0);
        assert_eq!(status.model_accuracy.len(), 4);
    }

    #[tokio::test]
    async fn test_manual_train_below_minimum_does_not_delay_first_bundle() {
        let dir = TempDir::new().unwrap();
        let engine = LearningEngine::open(config(&dir)).await.unwrap();
        for i in 0..5 {
            engine.record(interaction(i)).await.unwrap();
        }

        let err = engine.train().unwrap_err();
        assert!(matches!(err, EngineError::DataInsufficient { available: 5, required: 10 }));
        assert_eq!(engine.state(), ModelState::Untrained);
        assert!(!engine.status().training_in_progress);
        assert_eq!(engine.trigger_input().last_failure_samples, None);
        assert!(engine.inner.registry.versions().unwrap().is_empty());

        for i in 5..9 {
            assert!(engine.record(interaction(i)).await.unwrap().triggered.is_none());
        }
        let outcome = engine.record(interaction(9)).await.unwrap();
        assert_eq!(outcome.triggered, Some(TriggerReason::Initial));
        outcome.training.unwrap().await.unwrap().unwrap();
        assert_eq!(engine.state(), ModelState::Ready);
    }

    #[tokio::test]
    async fn test_failed_retrain_keeps_serving_previous_bundle() {
        let dir = TempDir::new().unwrap();
        let engine = LearningEngine::open(config(&dir)).await.unwrap();
        engine.set_learning_enabled(false);
        for i in 0..12 {
            engine.record(interaction(i)).await.unwrap();
        }
        engine.train().unwrap().await.unwrap().unwrap();
        engine.set_learning_enabled(true);
        assert_eq!(engine.state(), ModelState::Ready);

        // A plain file where the next version directory belongs makes the save fail
        let blocked = engine.inner.registry.version_dir(BundleVersion::INITIAL.next_minor());
        std::fs::write(&blocked, b"").unwrap();
        engine.record(interaction(12)).await.unwrap();

        let handle = engine.train().unwrap();
        assert_eq!(engine.state(), ModelState::Retraining);
        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), "io");

        assert_eq!(engine.state(), ModelState::Ready);
        assert_eq!(engine.bundle().version(), Some(BundleVersion::INITIAL));
        let status = engine.status();
        assert!(status.trained);
        assert!(status.last_error.is_some());
        assert_eq!(engine.trigger_input().last_failure_samples, None);

        let prediction = engine.predict("scan target for open ports", None);
        assert_eq!(prediction.status, PredictionStatus::Predicted);
        assert_eq!(prediction.version, Some(BundleVersion::INITIAL));

        let health = engine.health().health();
        assert_eq!(health.serving, Some(BundleVersion::INITIAL));
        assert_eq!(health.components[&Component::Trainer].status, ComponentStatus::Degraded);
        assert_eq!(health.components[&Component::Predictor].status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_second_train_while_running_is_rejected() {
        let dir = TempDir::new().unwrap();
        let engine = LearningEngine::open(config(&dir)).await.unwrap();
        engine.set_learning_enabled(false);
        for i in 0..12 {
            engine.record(interaction(i)).await.unwrap();
        }

        let first = engine.train().unwrap();
        assert!(matches!(engine.train(), Err(EngineError::TrainingInProgress)));
        first.await.unwrap().unwrap();
        assert!(engine.train().is_ok());
        engine.wait_for_training().await;
    }

    #[tokio::test]
    async fn test_disabled_learning_keeps_records_without_training() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.learning_enabled = false;
        let engine = LearningEngine::open(cfg).await.unwrap();

        for i in 0..12 {
            let outcome = engine.record(interaction(i)).await.unwrap();
            assert!(outcome.training.is_none());
        }
        assert_eq!(engine.status().sample_count, 12);
        assert_eq!(engine.predict("scan", None).status, PredictionStatus::LearningDisabled);

        engine.set_learning_enabled(true);
        let (reason, handle) = engine.maybe_retrain().unwrap();
        assert_eq!(reason, TriggerReason::Initial);
        handle.await.unwrap().unwrap();
        assert_eq!(engine.predict("scan", None).status, PredictionStatus::Predicted);
    }

    #[tokio::test]
    async fn test_feedback_accuracy() {
        let dir = TempDir::new().unwrap();
        let engine = LearningEngine::open(config(&dir)).await.unwrap();
        assert_eq!(engine.status().prediction_accuracy, None);

        engine.record_feedback(true, true);
        engine.record_feedback(true, false);
        engine.record_feedback(false, false);
        let stats = engine.record_feedback(false, true);

        assert_eq!(stats.predictions_made, 4);
        assert_eq!(stats.correct_predictions, 2);
        assert_eq!(engine.status().prediction_accuracy, Some(0.5));
    }

    #[tokio::test]
    async fn test_insights_after_training() {
        let dir = TempDir::new().unwrap();
        let engine = LearningEngine::open(config(&dir)).await.unwrap();
        assert!(engine.insights().is_none());
        for i in 0..10 {
            if let Some(handle) = engine.record(interaction(i)).await.unwrap().training {
                handle.await.unwrap().unwrap();
            }
        }

        let insights = engine.insights().unwrap();
        assert!(insights.top_features.len() <= TOP_FEATURES);
        assert!(insights.best_model.is_some());
        let importance = engine.feature_importance().unwrap();
        assert!(importance.contains_key(&ModelKind::RandomForest));
        assert_eq!(importance[&ModelKind::RandomForest].len(), FEATURE_COUNT);
    }

    #[tokio::test]
    async fn test_optimize_requires_enough_samples() {
        let dir = TempDir::new().unwrap();
        let engine = LearningEngine::open(config(&dir)).await.unwrap();
        let err = engine.optimize_hyperparameters().await.unwrap_err();
        assert!(matches!(err, EngineError::DataInsufficient { required: 50, .. }));
    }

    #[test]
    fn test_new_interaction_assesses_missing_outcome() {
        let record = NewInteraction {
            user_input: "exploit target".to_string(),
            output_text: "Error: connection refused".to_string(),
            ..NewInteraction::default()
        }
        .into_record();
        assert!(!record.success);
        assert!(record.error_occurred);

        let record = NewInteraction {
            user_input: "scan".to_string(),
            output_text: "Host discovered, 3 ports found open successfully".to_string(),
            ..NewInteraction::default()
        }
        .into_record();
        assert!(record.success);
        assert!(!record.error_occurred);

        let explicit = NewInteraction {
            output_text: "error".to_string(),
            success: Some(true),
            error_occurred: Some(false),
            ..NewInteraction::default()
        }
        .into_record();
        assert!(explicit.success);
        assert!(!explicit.error_occurred);
    }
}
