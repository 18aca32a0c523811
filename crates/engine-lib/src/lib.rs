//! Operation outcome learning engine
//!
//! This crate provides the core functionality for:
//! - Feature extraction and outcome labelling of security interactions
//! - Training a four-model ensemble and persisting versioned bundles
//! - Voting predictions with confidence-banded advice
//! - Retrain scheduling as the interaction corpus grows
//! - Health checks and observability

pub mod bundle;
pub mod config;
pub mod corpus;
pub mod engine;
pub mod ensemble;
pub mod error;
pub mod features;
pub mod health;
pub mod models;
pub mod observability;
pub mod predictor;
pub mod registry;
pub mod scheduler;
pub mod training;

pub use bundle::{Bundle, BundleHandle, ModelArtifact, ModelMetrics, TrainingMetadata};
pub use config::EngineConfig;
pub use corpus::InteractionCorpus;
pub use engine::{
    EngineStatus, FeedbackStats, Insights, LearningEngine, ModelState, NewInteraction, RecordOutcome,
    TrainingHandle, TrainingReport,
};
pub use error::{EngineError, EngineResult};
pub use health::{Component, ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse};
pub use models::*;
pub use observability::{EngineMetrics, StructuredLogger};
pub use predictor::{Prediction, PredictionService, PredictionStatus};
pub use registry::ModelRegistry;
pub use scheduler::{RetrainPolicy, RetrainScheduler, TriggerReason};
