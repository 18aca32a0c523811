//! Ensemble prediction over a bundle snapshot

use super::advice::{AdviceFormatter, ConfidenceBand, DISABLED_ADVICE, UNTRAINED_ADVICE};
use crate::bundle::Bundle;
use crate::ensemble::{argmax, Classifier, ModelKind};
use crate::features::{OUTPUT_FEATURES, TOOL_FEATURES};
use crate::models::{BundleVersion, InteractionRecord, Label};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Why a prediction does or does not carry a label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionStatus {
    Predicted,
    Untrained,
    LearningDisabled,
}

/// One model's view of the operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVote {
    pub model: ModelKind,
    pub label: Label,
    pub confidence: f64,
    pub probabilities: BTreeMap<Label, f64>,
}

/// Ensemble outcome for a proposed operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub status: PredictionStatus,
    pub label: Option<Label>,
    pub confidence: f64,
    pub band: Option<ConfidenceBand>,
    pub advice: String,
    /// Bundle the prediction was computed with
    pub version: Option<BundleVersion>,
    pub votes: Vec<ModelVote>,
}

impl Prediction {
    fn without_model(status: PredictionStatus, advice: &str) -> Self {
        Self {
            status,
            label: None,
            confidence: 0.0,
            band: None,
            advice: advice.to_string(),
            version: None,
            votes: Vec::new(),
        }
    }

    /// Explicit result when no bundle exists yet
    pub fn untrained() -> Self {
        Self::without_model(PredictionStatus::Untrained, UNTRAINED_ADVICE)
    }

    /// Explicit result while learning is switched off
    pub fn learning_disabled() -> Self {
        Self::without_model(PredictionStatus::LearningDisabled, DISABLED_ADVICE)
    }
}

/// Aggregates the votes of a bundle's four models
#[derive(Debug, Clone, Default)]
pub struct PredictionService {
    advice: AdviceFormatter,
}

impl PredictionService {
    pub fn new(advice: AdviceFormatter) -> Self {
        Self { advice }
    }

    /// Synthetic record for an operation that has not run yet
    pub fn proposed_operation(text: &str, tools: Option<&[String]>, at: DateTime<Utc>) -> InteractionRecord {
        InteractionRecord {
            id: String::new(),
            timestamp: Some(at),
            user_input: text.to_string(),
            tools_used: tools.map(|t| t.iter().cloned().collect()).unwrap_or_else(BTreeSet::new),
            output_text: String::new(),
            success: false,
            execution_time: 0.0,
            error_occurred: false,
        }
    }

    /// Predict with one bundle snapshot.
    ///
    /// Output-derived features are always unknown before the operation runs
    /// and tool features are unknown when no tool list is given; both are
    /// placed at the training mean. Each model casts one vote; ties go to
    /// the label with the highest mean probability.
    pub fn predict(&self, bundle: &Bundle, text: &str, tools: Option<&[String]>, at: DateTime<Utc>) -> Prediction {
        let record = Self::proposed_operation(text, tools, at);
        let mut missing: Vec<usize> = OUTPUT_FEATURES.to_vec();
        if tools.is_none() {
            missing.extend_from_slice(&TOOL_FEATURES);
        }
        let features = bundle.scaled_features(&record, &missing);

        let n_classes = bundle.encoder.len();
        let mut tally = vec![0.0; n_classes];
        let mut mean_proba = vec![0.0; n_classes];
        let mut votes = Vec::with_capacity(bundle.models.len());

        for artifact in &bundle.models {
            let proba = artifact.parameters.predict_proba(&features);
            if proba.len() != n_classes {
                continue;
            }
            let class = argmax(&proba);
            tally[class] += 1.0;
            for (m, p) in mean_proba.iter_mut().zip(&proba) {
                *m += p;
            }

            let probabilities = proba
                .iter()
                .enumerate()
                .filter_map(|(i, p)| bundle.encoder.decode(i).map(|l| (l, *p)))
                .collect();
            if let Some(label) = bundle.encoder.decode(class) {
                votes.push(ModelVote {
                    model: artifact.model_kind,
                    label,
                    confidence: proba[class],
                    probabilities,
                });
            }
        }

        if votes.is_empty() {
            return Prediction::untrained();
        }
        let voters = votes.len() as f64;
        for m in mean_proba.iter_mut() {
            *m /= voters;
        }

        let mut winner = 0;
        for class in 1..n_classes {
            let more_votes = tally[class] > tally[winner];
            let tie_break = tally[class] == tally[winner] && mean_proba[class] > mean_proba[winner];
            if more_votes || tie_break {
                winner = class;
            }
        }

        let confidence = mean_proba[winner];
        let label = bundle.encoder.decode(winner);
        Prediction {
            status: PredictionStatus::Predicted,
            label,
            confidence,
            band: Some(self.advice.band(confidence)),
            advice: label
                .map(|l| self.advice.advise(l, confidence))
                .unwrap_or_else(|| UNTRAINED_ADVICE.to_string()),
            version: Some(bundle.version()),
            votes,
        }
    }
}
