//! Engine configuration

use crate::ensemble::EnsembleParams;
use crate::predictor::AdviceConfig;
use crate::scheduler::RetrainPolicy;
use crate::training::{SearchGrid, TrainerConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Sub-directory of the data directory holding versioned bundles
pub const MODELS_DIR: &str = "models";

/// Everything the learning engine needs to start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Name attached to every lifecycle log event
    pub instance_name: String,
    /// Root of the corpus file and the model registry
    pub data_dir: PathBuf,
    /// Start with learning switched on
    pub learning_enabled: bool,
    pub trainer: TrainerConfig,
    pub retrain: RetrainPolicy,
    pub models: EnsembleParams,
    pub advice: AdviceConfig,
    pub search: SearchGrid,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            instance_name: "outcome-engine".to_string(),
            data_dir: PathBuf::from("data"),
            learning_enabled: true,
            trainer: TrainerConfig::default(),
            retrain: RetrainPolicy::default(),
            models: EnsembleParams::default(),
            advice: AdviceConfig::default(),
            search: SearchGrid::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults rooted at `data_dir`
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn models_dir(&self) -> PathBuf {
        self.data_dir.join(MODELS_DIR)
    }

    pub fn corpus_path(&self) -> PathBuf {
        self.data_dir.join(crate::corpus::CORPUS_FILE)
    }
}
