//! Advice text for ensemble predictions
//!
//! Combines the confidence band of a prediction with guidance specific to
//! the predicted outcome.

use crate::models::Label;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default lower bound of the high-confidence band
pub const HIGH_CONFIDENCE: f64 = 0.8;

/// Default lower bound of the moderate-confidence band
pub const MODERATE_CONFIDENCE: f64 = 0.5;

/// Advice returned when no bundle has been trained
pub const UNTRAINED_ADVICE: &str = "ML models not trained yet";

/// Advice returned while learning is switched off
pub const DISABLED_ADVICE: &str = "Learning is disabled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBand {
    High,
    Moderate,
    Low,
}

impl fmt::Display for ConfidenceBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConfidenceBand::High => "HIGH",
            ConfidenceBand::Moderate => "MODERATE",
            ConfidenceBand::Low => "LOW",
        })
    }
}

/// Confidence band thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdviceConfig {
    pub high_threshold: f64,
    pub moderate_threshold: f64,
}

impl Default for AdviceConfig {
    fn default() -> Self {
        Self {
            high_threshold: HIGH_CONFIDENCE,
            moderate_threshold: MODERATE_CONFIDENCE,
        }
    }
}

/// Guidance for a predicted outcome
pub fn label_advice(label: Label) -> &'static str {
    match label {
        Label::SuccessfulNmapRecon => {
            "High success probability for nmap reconnaissance. Consider comprehensive port scanning."
        }
        Label::SuccessfulDiscovery => "Discovery operation likely to succeed. Focus on thorough enumeration.",
        Label::SuccessfulPrivilegeEscalation => {
            "Privilege escalation has good chance of success. Check for common vulnerabilities."
        }
        Label::SuccessfulAccess => "System access likely achievable. Prepare post-exploitation strategies.",
        Label::SuccessfulExploit => {
            "Exploitation attempt has high success probability. Ensure you have proper authorization."
        }
        Label::SuccessfulSqlTool => "SQL injection tools likely to be effective. Try different payloads systematically.",
        Label::SuccessfulMetasploit => {
            "Metasploit modules should work well in this scenario. Check module options carefully."
        }
        Label::SuccessfulGeneral => "Standard security assessment recommended.",
        Label::Failure => {
            "Operation likely to fail. Consider alternative approaches or gather more intelligence first."
        }
    }
}

/// Turns a winning label and its confidence into advice text
#[derive(Debug, Clone, Default)]
pub struct AdviceFormatter {
    config: AdviceConfig,
}

impl AdviceFormatter {
    pub fn new(config: AdviceConfig) -> Self {
        Self { config }
    }

    pub fn band(&self, confidence: f64) -> ConfidenceBand {
        if confidence >= self.config.high_threshold {
            ConfidenceBand::High
        } else if confidence >= self.config.moderate_threshold {
            ConfidenceBand::Moderate
        } else {
            ConfidenceBand::Low
        }
    }

    pub fn advise(&self, label: Label, confidence: f64) -> String {
        let band = self.band(confidence);
        let base = label_advice(label);
        match band {
            ConfidenceBand::Low => format!("{} CONFIDENCE: {} Verify assumptions before proceeding.", band, base),
            _ => format!("{} CONFIDENCE: {}", band, base),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_boundaries() {
        let formatter = AdviceFormatter::default();
        assert_eq!(formatter.band(0.8), ConfidenceBand::High);
        assert_eq!(formatter.band(0.79), ConfidenceBand::Moderate);
        assert_eq!(formatter.band(0.5), ConfidenceBand::Moderate);
        assert_eq!(formatter.band(0.49), ConfidenceBand::Low);
    }

    #[test]
    fn test_advice_combines_band_and_label() {
        let formatter = AdviceFormatter::default();
        let advice = formatter.advise(Label::SuccessfulNmapRecon, 0.9);
        assert!(advice.starts_with("HIGH CONFIDENCE:"));
        assert!(advice.contains("nmap reconnaissance"));

        let low = formatter.advise(Label::Failure, 0.3);
        assert!(low.starts_with("LOW CONFIDENCE:"));
        assert!(low.contains("Verify assumptions"));
    }

    #[test]
    fn test_custom_thresholds() {
        let formatter = AdviceFormatter::new(AdviceConfig {
            high_threshold: 0.95,
            moderate_threshold: 0.6,
        });
        assert_eq!(formatter.band(0.9), ConfidenceBand::Moderate);
        assert_eq!(formatter.band(0.55), ConfidenceBand::Low);
    }

    #[test]
    fn test_every_label_has_advice() {
        for label in Label::ALL {
            assert!(!label_advice(label).is_empty());
        }
    }
}
