//! Component health and readiness
//!
//! Predictor and trainer health follow the model lifecycle: the predictor is
//! degraded until a bundle is served, and the trainer is degraded after a run
//! fails for a reason more data will not fix. Corpus and registry health are
//! reported by the I/O paths that touch them.

use crate::error::EngineError;
use crate::models::BundleVersion;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Corpus,
    Registry,
    Trainer,
    Predictor,
}

impl Component {
    pub const ALL: [Component; 4] = [
        Component::Corpus,
        Component::Registry,
        Component::Trainer,
        Component::Predictor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Corpus => "corpus",
            Component::Registry => "registry",
            Component::Trainer => "trainer",
            Component::Predictor => "predictor",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered best to worst; the overall status is the worst component's
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    /// Still able to serve, possibly with reduced function
    pub fn is_operational(&self) -> bool {
        *self != ComponentStatus::Unhealthy
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the component entered its current status
    pub since: DateTime<Utc>,
}

impl ComponentHealth {
    fn healthy() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            since: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    /// Bundle currently answering predictions
    pub serving: Option<BundleVersion>,
    pub components: BTreeMap<Component, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug)]
struct HealthState {
    components: BTreeMap<Component, ComponentHealth>,
    serving: Option<BundleVersion>,
    accepting: bool,
}

/// Shared view of engine health; clones observe the same state
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    state: Arc<RwLock<HealthState>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    /// Every component healthy, no bundle served, not yet accepting requests
    pub fn new() -> Self {
        let components = Component::ALL
            .iter()
            .map(|c| (*c, ComponentHealth::healthy()))
            .collect();
        Self {
            state: Arc::new(RwLock::new(HealthState {
                components,
                serving: None,
                accepting: false,
            })),
        }
    }

    /// Set a component's status; `since` only moves when the status changes
    fn set(&self, component: Component, status: ComponentStatus, message: Option<String>) {
        let mut state = self.state.write();
        let entry = state
            .components
            .entry(component)
            .or_insert_with(ComponentHealth::healthy);
        if entry.status != status {
            entry.since = Utc::now();
        }
        entry.status = status;
        entry.message = message;
    }

    /// An I/O path on `component` failed
    pub fn io_failed(&self, component: Component, error: &EngineError) {
        self.set(component, ComponentStatus::Unhealthy, Some(error.to_string()));
    }

    /// A bundle on disk could not be used; serving continues without it
    pub fn registry_degraded(&self, error: &EngineError) {
        self.set(Component::Registry, ComponentStatus::Degraded, Some(error.to_string()));
    }

    /// The served bundle changed
    pub fn observe_bundle(&self, version: Option<BundleVersion>) {
        match version {
            Some(v) => self.set(
                Component::Predictor,
                ComponentStatus::Healthy,
                Some(format!("serving bundle {}", v)),
            ),
            None => self.set(
                Component::Predictor,
                ComponentStatus::Degraded,
                Some("No bundle trained yet".to_string()),
            ),
        }
        self.state.write().serving = version;
    }

    /// A training run finished
    pub fn observe_training(&self, outcome: Result<BundleVersion, &EngineError>) {
        match outcome {
            Ok(version) => {
                self.set(Component::Trainer, ComponentStatus::Healthy, None);
                self.set(Component::Registry, ComponentStatus::Healthy, None);
                self.observe_bundle(Some(version));
            }
            Err(e) if e.is_retryable() => {}
            Err(e) => {
                self.set(Component::Trainer, ComponentStatus::Degraded, Some(e.to_string()));
                if matches!(e, EngineError::Io(_) | EngineError::Serialization(_)) {
                    self.registry_degraded(e);
                }
            }
        }
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.state.write().accepting = accepting;
    }

    pub fn component(&self, component: Component) -> Option<ComponentHealth> {
        self.state.read().components.get(&component).cloned()
    }

    pub fn health(&self) -> HealthResponse {
        let state = self.state.read();
        let status = state
            .components
            .values()
            .map(|h| h.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        HealthResponse {
            status,
            serving: state.serving,
            components: state.components.clone(),
        }
    }

    /// Ready once the engine accepts requests and no component is unhealthy.
    /// An untrained engine is ready: it answers predictions explicitly.
    pub fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read();
        if !state.accepting {
            return ReadinessResponse {
                ready: false,
                reason: Some("Engine not accepting requests".to_string()),
            };
        }
        let failing: Vec<String> = state
            .components
            .iter()
            .filter(|(_, h)| !h.status.is_operational())
            .map(|(c, h)| match &h.message {
                Some(m) => format!("{} unhealthy: {}", c, m),
                None => format!("{} unhealthy", c),
            })
            .collect();
        if failing.is_empty() {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        } else {
            ReadinessResponse {
                ready: false,
                reason: Some(failing.join("; ")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn io_error() -> EngineError {
        EngineError::Io(anyhow::anyhow!("disk full"))
    }

    #[test]
    fn test_untrained_engine_is_degraded_but_ready() {
        let health = HealthRegistry::new();
        health.observe_bundle(None);
        health.set_accepting(true);

        let report = health.health();
        assert_eq!(report.status, ComponentStatus::Degraded);
        assert_eq!(report.serving, None);
        assert_eq!(report.components.len(), 4);
        assert_eq!(
            report.components[&Component::Predictor].message.as_deref(),
            Some("No bundle trained yet")
        );
        assert!(health.readiness().ready);
    }

    #[test]
    fn test_successful_training_restores_trainer_and_predictor() {
        let health = HealthRegistry::new();
        health.observe_bundle(None);
        health.observe_training(Err(&io_error()));
        assert_eq!(health.component(Component::Trainer).unwrap().status, ComponentStatus::Degraded);
        assert_eq!(health.component(Component::Registry).unwrap().status, ComponentStatus::Degraded);

        health.observe_training(Ok(BundleVersion::INITIAL));
        let report = health.health();
        assert_eq!(report.status, ComponentStatus::Healthy);
        assert_eq!(report.serving, Some(BundleVersion::INITIAL));
    }

    #[test]
    fn test_retryable_training_failure_leaves_trainer_healthy() {
        let health = HealthRegistry::new();
        health.observe_training(Err(&EngineError::DegenerateLabels { distinct: 1 }));
        assert_eq!(health.component(Component::Trainer).unwrap().status, ComponentStatus::Healthy);
    }

    #[test]
    fn test_unhealthy_corpus_blocks_readiness() {
        let health = HealthRegistry::new();
        health.set_accepting(true);
        health.io_failed(Component::Corpus, &io_error());

        let readiness = health.readiness();
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("corpus unhealthy: disk full"));
        assert_eq!(health.health().status, ComponentStatus::Unhealthy);
    }

    #[test]
    fn test_not_ready_until_accepting() {
        let health = HealthRegistry::new();
        assert!(!health.readiness().ready);
        health.set_accepting(true);
        assert!(health.readiness().ready);
        health.set_accepting(false);
        assert!(!health.readiness().ready);
    }

    #[test]
    fn test_since_only_moves_on_status_change() {
        let health = HealthRegistry::new();
        health.observe_bundle(None);
        let first = health.component(Component::Predictor).unwrap().since;
        health.observe_bundle(None);
        assert_eq!(health.component(Component::Predictor).unwrap().since, first);
    }

    #[test]
    fn test_health_serializes_component_names() {
        let health = HealthRegistry::new();
        let json = serde_json::to_value(health.health()).unwrap();
        assert!(json["components"]["corpus"].is_object());
        assert_eq!(json["status"], "healthy");
    }
}
