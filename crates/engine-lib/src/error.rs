//! Error taxonomy for training, persistence and serving

use crate::models::BundleVersion;
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Fewer labeled samples than the training threshold
    #[error("insufficient training data: {available} samples, need {required}")]
    DataInsufficient { available: usize, required: usize },

    /// A label has fewer than two samples; callers fall back to a
    /// non-stratified split instead of failing
    #[error("label {label} has {count} sample(s), stratified split impossible")]
    DegenerateSplit { label: String, count: usize },

    /// Fewer than two distinct labels in the corpus
    #[error("corpus contains {distinct} distinct label(s), need at least 2")]
    DegenerateLabels { distinct: usize },

    /// A label the active encoder has never seen
    #[error("label {label} unknown to the active label encoder, full refit required")]
    StaleLabelSet { label: String },

    /// A bundle directory is incomplete or corrupt
    #[error("bundle {version} is missing artifact {artifact}")]
    ArtifactMissing {
        version: BundleVersion,
        artifact: String,
    },

    /// The operation needs a trained bundle and none is active
    #[error("no trained bundle is active")]
    NotTrained,

    #[error("a training job is already running")]
    TrainingInProgress,

    #[error("training job aborted: {0}")]
    TrainingAborted(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

impl EngineError {
    /// Errors the retrain scheduler may retry once more data accumulates
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::DataInsufficient { .. }
                | EngineError::DegenerateLabels { .. }
                | EngineError::StaleLabelSet { .. }
                | EngineError::TrainingInProgress
        )
    }

    /// Short machine-readable tag for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::DataInsufficient { .. } => "data_insufficient",
            EngineError::DegenerateSplit { .. } => "degenerate_split",
            EngineError::DegenerateLabels { .. } => "degenerate_labels",
            EngineError::StaleLabelSet { .. } => "stale_label_set",
            EngineError::ArtifactMissing { .. } => "artifact_missing",
            EngineError::NotTrained => "not_trained",
            EngineError::TrainingInProgress => "training_in_progress",
            EngineError::TrainingAborted(_) => "training_aborted",
            EngineError::Serialization(_) => "serialization",
            EngineError::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_insufficient_message() {
        let err = EngineError::DataInsufficient {
            available: 5,
            required: 10,
        };
        assert_eq!(err.to_string(), "insufficient training data: 5 samples, need 10");
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "data_insufficient");
    }

    #[test]
    fn test_artifact_missing_is_not_retryable() {
        let err = EngineError::ArtifactMissing {
            version: BundleVersion::INITIAL,
            artifact: "scaler.json".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("1.0.0"));
    }
}
