//! Mapping between outcome labels and dense class indices

use crate::error::{EngineError, EngineResult};
use crate::models::Label;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Sorted set of the labels seen at training time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEncoder {
    classes: Vec<Label>,
}

impl LabelEncoder {
    pub fn fit<'a>(labels: impl IntoIterator<Item = &'a Label>) -> Self {
        let classes: BTreeSet<Label> = labels.into_iter().copied().collect();
        Self {
            classes: classes.into_iter().collect(),
        }
    }

    pub fn encode(&self, label: Label) -> EngineResult<usize> {
        self.classes
            .binary_search(&label)
            .map_err(|_| EngineError::StaleLabelSet {
                label: label.to_string(),
            })
    }

    pub fn encode_all(&self, labels: &[Label]) -> EngineResult<Vec<usize>> {
        labels.iter().map(|l| self.encode(*l)).collect()
    }

    pub fn decode(&self, index: usize) -> Option<Label> {
        self.classes.get(index).copied()
    }

    pub fn classes(&self) -> &[Label] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
