//! Core data models for the learning engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Number of features produced for every interaction
pub const FEATURE_COUNT: usize = 43;

/// Fixed-length numeric encoding of an interaction
pub type FeatureVector = [f64; FEATURE_COUNT];

/// One recorded security operation and its outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user_input: String,
    #[serde(default)]
    pub tools_used: BTreeSet<String>,
    #[serde(default)]
    pub output_text: String,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub execution_time: f64,
    #[serde(default)]
    pub error_occurred: bool,
}

impl InteractionRecord {
    /// Create a record stamped with a fresh id and the current time
    pub fn new(user_input: impl Into<String>, output_text: impl Into<String>, success: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Some(Utc::now()),
            user_input: user_input.into(),
            tools_used: BTreeSet::new(),
            output_text: output_text.into(),
            success,
            execution_time: 0.0,
            error_occurred: false,
        }
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools_used = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_execution_time(mut self, seconds: f64) -> Self {
        self.execution_time = seconds;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_error(mut self, error_occurred: bool) -> Self {
        self.error_occurred = error_occurred;
        self
    }

    /// Lowercased input and output joined by a single space
    pub fn combined_text(&self) -> String {
        format!("{} {}", self.user_input, self.output_text).to_lowercase()
    }
}

/// Categorical outcome of an interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    SuccessfulNmapRecon,
    SuccessfulDiscovery,
    SuccessfulExploit,
    SuccessfulAccess,
    SuccessfulPrivilegeEscalation,
    SuccessfulSqlTool,
    SuccessfulMetasploit,
    SuccessfulGeneral,
    Failure,
}

impl Label {
    pub const ALL: [Label; 9] = [
        Label::SuccessfulNmapRecon,
        Label::SuccessfulDiscovery,
        Label::SuccessfulExploit,
        Label::SuccessfulAccess,
        Label::SuccessfulPrivilegeEscalation,
        Label::SuccessfulSqlTool,
        Label::SuccessfulMetasploit,
        Label::SuccessfulGeneral,
        Label::Failure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::SuccessfulNmapRecon => "successful_nmap_recon",
            Label::SuccessfulDiscovery => "successful_discovery",
            Label::SuccessfulExploit => "successful_exploit",
            Label::SuccessfulAccess => "successful_access",
            Label::SuccessfulPrivilegeEscalation => "successful_privilege_escalation",
            Label::SuccessfulSqlTool => "successful_sql_tool",
            Label::SuccessfulMetasploit => "successful_metasploit",
            Label::SuccessfulGeneral => "successful_general",
            Label::Failure => "failure",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Label::ALL
            .iter()
            .copied()
            .find(|label| label.as_str() == s)
            .ok_or_else(|| format!("unknown label: {}", s))
    }
}

/// Semantic version of a trained bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BundleVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl BundleVersion {
    pub const INITIAL: BundleVersion = BundleVersion {
        major: 1,
        minor: 0,
        patch: 0,
    };

    /// Next version after a successful retrain
    pub fn next_minor(&self) -> Self {
        Self {
            major: self.major,
            minor: self.minor + 1,
            patch: 0,
        }
    }
}

impl fmt::Display for BundleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for BundleVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix('v').unwrap_or(s);
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 3 {
            return Err(format!("invalid version: {}", s));
        }
        let parse = |p: &str| p.parse::<u32>().map_err(|_| format!("invalid version: {}", s));
        Ok(Self {
            major: parse(parts[0])?,
            minor: parse(parts[1])?,
            patch: parse(parts[2])?,
        })
    }
}

impl Serialize for BundleVersion {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BundleVersion {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_round_trips_through_str() {
        for label in Label::ALL {
            assert_eq!(label.as_str().parse::<Label>().unwrap(), label);
        }
        assert!("successful_recon".parse::<Label>().is_err());
    }

    #[test]
    fn test_label_serde_uses_snake_case() {
        let json = serde_json::to_string(&Label::SuccessfulSqlTool).unwrap();
        assert_eq!(json, "\"successful_sql_tool\"");
    }

    #[test]
    fn test_version_ordering_and_bump() {
        let v1: BundleVersion = "1.0.0".parse().unwrap();
        let v2 = v1.next_minor();
        assert_eq!(v2.to_string(), "1.1.0");
        assert!(v2 > v1);
        assert!("1.10.0".parse::<BundleVersion>().unwrap() > "1.9.0".parse().unwrap());
        assert_eq!("v2.3.4".parse::<BundleVersion>().unwrap().to_string(), "2.3.4");
        assert!("1.0".parse::<BundleVersion>().is_err());
    }

    #[test]
    fn test_record_defaults_from_sparse_json() {
        let record: InteractionRecord = serde_json::from_str(r#"{"user_input": "scan"}"#).unwrap();
        assert!(record.tools_used.is_empty());
        assert!(record.timestamp.is_none());
        assert_eq!(record.execution_time, 0.0);
    }
}
