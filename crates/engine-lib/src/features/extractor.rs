//! Feature extraction for model training and inference
//!
//! Extracts temporal, outcome, tool usage, complexity, keyword, network
//! pattern and text-similarity features from a single interaction record.
//! Extraction never fails: absent or malformed fields contribute zeros.

use super::text::TextVectorizer;
use super::{detectors::TEXT_DETECTORS, DETECTORS_START, TEXT_START};
use super::{
    DAY_OF_WEEK, ERROR_OCCURRED, EXECUTION_TIME, HOUR_OF_DAY, INPUT_LENGTH, INPUT_WORDS,
    NUM_TOOLS, OUTPUT_LENGTH, OUTPUT_WORDS, SUCCESS, USED_EXPLOIT, USED_METASPLOIT, USED_NMAP,
    USED_SQLMAP,
};
use crate::models::{FeatureVector, InteractionRecord, FEATURE_COUNT};
use chrono::{Datelike, Timelike};

/// Tool-name fragments identifying an exploit framework
const EXPLOIT_FRAMEWORKS: &[&str] = &["exploit", "metasploit", "msfconsole", "msfvenom", "searchsploit"];

/// Extracts the fixed-length feature vector from interaction records
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureExtractor<'v> {
    vectorizer: Option<&'v TextVectorizer>,
}

impl<'v> FeatureExtractor<'v> {
    /// Extractor projecting text onto a frozen vocabulary
    pub fn new(vectorizer: &'v TextVectorizer) -> Self {
        Self {
            vectorizer: Some(vectorizer),
        }
    }

    /// Extractor with no vocabulary; the text-similarity block stays zero
    pub fn without_vocabulary() -> Self {
        Self { vectorizer: None }
    }

    pub fn extract(&self, record: &InteractionRecord) -> FeatureVector {
        let mut f = [0.0; FEATURE_COUNT];

        f[EXECUTION_TIME] = non_negative(record.execution_time);
        if let Some(ts) = record.timestamp {
            f[HOUR_OF_DAY] = ts.hour() as f64;
            f[DAY_OF_WEEK] = ts.weekday().num_days_from_monday() as f64;
        }

        f[SUCCESS] = flag(record.success);
        f[ERROR_OCCURRED] = flag(record.error_occurred);

        let tools: Vec<String> = record.tools_used.iter().map(|t| t.to_lowercase()).collect();
        f[NUM_TOOLS] = tools.len() as f64;
        f[USED_NMAP] = flag(uses_tool(&tools, &["nmap"]));
        f[USED_METASPLOIT] = flag(uses_tool(&tools, &["metasploit"]));
        f[USED_SQLMAP] = flag(uses_tool(&tools, &["sqlmap"]));
        f[USED_EXPLOIT] = flag(uses_tool(&tools, EXPLOIT_FRAMEWORKS));

        f[INPUT_LENGTH] = record.user_input.chars().count() as f64;
        f[OUTPUT_LENGTH] = record.output_text.chars().count() as f64;
        f[INPUT_WORDS] = record.user_input.split_whitespace().count() as f64;
        f[OUTPUT_WORDS] = record.output_text.split_whitespace().count() as f64;

        let text = record.combined_text();
        for (offset, detector) in TEXT_DETECTORS.iter().enumerate() {
            f[DETECTORS_START + offset] = flag((detector.predicate)(&text));
        }

        if let Some(vectorizer) = self.vectorizer {
            let similarity = vectorizer.transform(&text);
            f[TEXT_START..].copy_from_slice(&similarity);
        }

        f
    }

    pub fn extract_all(&self, records: &[InteractionRecord]) -> Vec<FeatureVector> {
        records.iter().map(|r| self.extract(r)).collect()
    }
}

/// Case-insensitive substring match of any fragment against lowercased tools
pub(crate) fn uses_tool(tools: &[String], fragments: &[&str]) -> bool {
    tools.iter().any(|t| fragments.iter().any(|f| t.contains(f)))
}

fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn non_negative(v: f64) -> f64 {
    if v.is_finite() && v > 0.0 {
        v
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record() -> InteractionRecord {
        InteractionRecord::new(
            "Scan 10.0.0.5 for open ports",
            "22/tcp open ssh\n80/tcp open http",
            true,
        )
        .with_tools(["Nmap", "curl"])
        .with_execution_time(4.5)
        .with_timestamp(Utc.with_ymd_and_hms(2024, 3, 6, 14, 30, 0).unwrap())
    }

    #[test]
    fn test_default_record_has_full_length() {
        let empty: InteractionRecord = serde_json::from_str("{}").unwrap();
        let f = FeatureExtractor::without_vocabulary().extract(&empty);
        assert_eq!(f.len(), FEATURE_COUNT);
        assert!(f.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_temporal_and_outcome_features() {
        let f = FeatureExtractor::without_vocabulary().extract(&record());
        assert_eq!(f[EXECUTION_TIME], 4.5);
        assert_eq!(f[HOUR_OF_DAY], 14.0);
        // 2024-03-06 was a Wednesday
        assert_eq!(f[DAY_OF_WEEK], 2.0);
        assert_eq!(f[SUCCESS], 1.0);
        assert_eq!(f[ERROR_OCCURRED], 0.0);
    }

    #[test]
    fn test_tool_features_are_case_insensitive() {
        let f = FeatureExtractor::without_vocabulary().extract(&record());
        assert_eq!(f[NUM_TOOLS], 2.0);
        assert_eq!(f[USED_NMAP], 1.0);
        assert_eq!(f[USED_SQLMAP], 0.0);
        assert_eq!(f[USED_METASPLOIT], 0.0);
    }

    #[test]
    fn test_metasploit_counts_as_exploit_framework() {
        let r = InteractionRecord::new("run module", "", true).with_tools(["Metasploit"]);
        let f = FeatureExtractor::without_vocabulary().extract(&r);
        assert_eq!(f[USED_METASPLOIT], 1.0);
        assert_eq!(f[USED_EXPLOIT], 1.0);
    }

    #[test]
    fn test_complexity_and_detectors() {
        let f = FeatureExtractor::without_vocabulary().extract(&record());
        assert_eq!(f[INPUT_WORDS], 5.0);
        assert_eq!(f[INPUT_LENGTH], "Scan 10.0.0.5 for open ports".len() as f64);
        // reconnaissance, network, web, ip and port detectors fire
        assert_eq!(f[DETECTORS_START + 1], 1.0);
        assert_eq!(f[DETECTORS_START + 2], 1.0);
        assert_eq!(f[DETECTORS_START + 4], 1.0);
        assert_eq!(f[DETECTORS_START + 7], 1.0);
        assert_eq!(f[DETECTORS_START + 8], 1.0);
    }

    #[test]
    fn test_negative_execution_time_defaults_to_zero() {
        let r = InteractionRecord::new("x", "y", false).with_execution_time(-3.0);
        assert_eq!(FeatureExtractor::without_vocabulary().extract(&r)[EXECUTION_TIME], 0.0);
    }

    #[test]
    fn test_vocabulary_fills_text_block() {
        let vectorizer = TextVectorizer::fit(&["scan open ports", "dump database"]);
        let f = FeatureExtractor::new(&vectorizer).extract(&record());
        assert!(f[TEXT_START..].iter().any(|v| *v > 0.0));
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let extractor = FeatureExtractor::without_vocabulary();
        assert_eq!(extractor.extract(&record()), extractor.extract(&record()));
    }
}
