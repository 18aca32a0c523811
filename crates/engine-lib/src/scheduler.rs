//! Retrain triggering
//!
//! [`RetrainPolicy::evaluate`] decides from corpus counters whether a run is
//! due. [`RetrainScheduler`] re-checks periodically so that triggers missed
//! on the record path (learning re-enabled, failure backoff elapsed) still
//! fire.

use crate::engine::LearningEngine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Thresholds that decide when training runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrainPolicy {
    /// Samples needed for the first bundle
    pub min_initial_samples: usize,
    /// Corpus size needed before any retrain
    pub min_retrain_samples: usize,
    /// New samples since the last bundle needed for a retrain
    pub retrain_interval: usize,
    /// New samples required before retrying after a failed run
    pub failure_backoff_samples: usize,
    pub check_interval_secs: u64,
}

impl Default for RetrainPolicy {
    fn default() -> Self {
        Self {
            min_initial_samples: 10,
            min_retrain_samples: 100,
            retrain_interval: 50,
            failure_backoff_samples: 10,
            check_interval_secs: 30,
        }
    }
}

/// Counters the policy is evaluated against
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TriggerInput {
    pub total_samples: usize,
    /// Corpus size consumed by the active bundle, if any
    pub trained_samples: Option<usize>,
    /// Corpus size at the last failed run
    pub last_failure_samples: Option<usize>,
    /// The active encoder has seen a label set that is now stale
    pub stale_labels: bool,
    pub learning_enabled: bool,
}

impl TriggerInput {
    pub fn samples_since_training(&self) -> usize {
        self.total_samples.saturating_sub(self.trained_samples.unwrap_or(0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    /// No bundle yet and enough samples for the first one
    Initial,
    /// Enough new samples since the active bundle
    Growth,
    /// Label set changed and needs a full refit
    StaleLabelSet,
    /// Requested explicitly
    Manual,
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TriggerReason::Initial => "initial",
            TriggerReason::Growth => "growth",
            TriggerReason::StaleLabelSet => "stale_label_set",
            TriggerReason::Manual => "manual",
        })
    }
}

impl RetrainPolicy {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.max(1))
    }

    /// Whether a training run is due
    pub fn evaluate(&self, input: &TriggerInput) -> Option<TriggerReason> {
        if !input.learning_enabled {
            return None;
        }
        if let Some(failed_at) = input.last_failure_samples {
            if input.total_samples < failed_at + self.failure_backoff_samples {
                return None;
            }
        }

        match input.trained_samples {
            None if input.total_samples >= self.min_initial_samples => Some(TriggerReason::Initial),
            None => None,
            Some(_) if input.stale_labels && input.total_samples >= self.min_initial_samples => {
                Some(TriggerReason::StaleLabelSet)
            }
            Some(_)
                if input.total_samples >= self.min_retrain_samples
                    && input.samples_since_training() >= self.retrain_interval =>
            {
                Some(TriggerReason::Growth)
            }
            Some(_) => None,
        }
    }
}

/// Periodic retrain check against a running engine
pub struct RetrainScheduler {
    engine: LearningEngine,
    check_interval: Duration,
}

impl RetrainScheduler {
    pub fn new(engine: LearningEngine) -> Self {
        let check_interval = engine.config().retrain.check_interval();
        Self { engine, check_interval }
    }

    /// Run until a shutdown signal is received
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(interval_secs = self.check_interval.as_secs(), "Starting retrain scheduler");

        let mut ticker = interval(self.check_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down retrain scheduler");
                    break;
                }
            }
        }
    }

    async fn check(&self) {
        let Some((reason, handle)) = self.engine.maybe_retrain() else {
            debug!("No retrain due");
            return;
        };
        match handle.await {
            Ok(Ok(report)) => {
                debug!(reason = %reason, version = %report.version, "Scheduled training finished");
            }
            Ok(Err(e)) => {
                debug!(reason = %reason, error = %e, "Scheduled training failed");
            }
            Err(e) => {
                warn!(reason = %reason, error = %e, "Training task panicked or was cancelled");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::ensemble::EnsembleParams;
    use crate::models::{BundleVersion, InteractionRecord};
    use tempfile::TempDir;

    fn input(total: usize, trained: Option<usize>) -> TriggerInput {
        TriggerInput {
            total_samples: total,
            trained_samples: trained,
            learning_enabled: true,
            ..TriggerInput::default()
        }
    }

    #[test]
    fn test_initial_trigger_at_threshold() {
        let policy = RetrainPolicy::default();
        assert_eq!(policy.evaluate(&input(9, None)), None);
        assert_eq!(policy.evaluate(&input(10, None)), Some(TriggerReason::Initial));
    }

    #[test]
    fn test_growth_trigger_needs_total_and_interval() {
        let policy = RetrainPolicy::default();
        // Below the retrain floor even with many new samples
        assert_eq!(policy.evaluate(&input(99, Some(10))), None);
        assert_eq!(policy.evaluate(&input(100, Some(10))), Some(TriggerReason::Growth));
        assert_eq!(policy.evaluate(&input(149, Some(100))), None);
        assert_eq!(policy.evaluate(&input(150, Some(100))), Some(TriggerReason::Growth));
    }

    #[test]
    fn test_disabled_learning_never_triggers() {
        let policy = RetrainPolicy::default();
        let mut i = input(500, None);
        i.learning_enabled = false;
        assert_eq!(policy.evaluate(&i), None);
    }

    #[test]
    fn test_failure_backoff() {
        let policy = RetrainPolicy::default();
        let mut i = input(12, None);
        i.last_failure_samples = Some(10);
        assert_eq!(policy.evaluate(&i), None);
        i.total_samples = 20;
        assert_eq!(policy.evaluate(&i), Some(TriggerReason::Initial));
    }

    #[test]
    fn test_stale_labels_trigger_refit() {
        let policy = RetrainPolicy::default();
        let mut i = input(60, Some(55));
        assert_eq!(policy.evaluate(&i), None);
        i.stale_labels = true;
        assert_eq!(policy.evaluate(&i), Some(TriggerReason::StaleLabelSet));
    }

    #[test]
    fn test_samples_since_training() {
        assert_eq!(input(150, Some(100)).samples_since_training(), 50);
        assert_eq!(input(7, None).samples_since_training(), 7);
    }

    #[tokio::test]
    async fn test_scheduler_trains_when_due_and_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig {
            learning_enabled: false,
            models: EnsembleParams::compact(),
            ..EngineConfig::with_data_dir(dir.path())
        };
        let engine = LearningEngine::open(config).await.unwrap();
        for i in 0..12 {
            let record = if i % 3 == 0 {
                InteractionRecord::new("write report section", "could not finish", false)
            } else {
                InteractionRecord::new("scan target for open ports", "open ports on target", true).with_tools(["nmap"])
            };
            engine.record(record).await.unwrap();
        }

        // Re-enabling learning does not train on its own; the next tick does
        engine.set_learning_enabled(true);
        assert!(!engine.status().trained);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let scheduler = tokio::spawn(RetrainScheduler::new(engine.clone()).run(shutdown_rx));

        tokio::time::timeout(Duration::from_secs(60), async {
            while !engine.status().trained {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("scheduler did not train");
        assert_eq!(engine.status().version, Some(BundleVersion::INITIAL));

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(10), scheduler)
            .await
            .expect("scheduler did not stop")
            .unwrap();
        assert_eq!(std::fs::read_dir(engine.config().models_dir()).unwrap().count(), 1);
    }
}
