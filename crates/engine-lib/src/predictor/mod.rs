//! Ensemble prediction and advice

mod advice;
mod service;

pub use advice::{
    label_advice, AdviceConfig, AdviceFormatter, ConfidenceBand, DISABLED_ADVICE, HIGH_CONFIDENCE,
    MODERATE_CONFIDENCE, UNTRAINED_ADVICE,
};
pub use service::{ModelVote, Prediction, PredictionService, PredictionStatus};
