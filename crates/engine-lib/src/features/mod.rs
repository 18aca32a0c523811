//! Deterministic feature engineering over interaction records
//!
//! Every record maps to exactly [`FEATURE_COUNT`] values. The position of each
//! value is fixed by the layout constants below and recorded by name in every
//! trained bundle, so a bundle is only ever served with the layout it was
//! trained on.

mod detectors;
mod extractor;
mod labels;
mod scaler;
mod text;

pub use detectors::{
    contains_any, has_ip_address, has_port_number, TextDetector, ACCESS_KEYWORDS,
    DISCOVERY_KEYWORDS, EXPLOIT_KEYWORDS, PRIVILEGE_KEYWORDS, TEXT_DETECTORS,
};
pub use extractor::FeatureExtractor;
pub use labels::{assess_success, derive_label};
pub use scaler::Scaler;
pub use text::{tokenize, TextVectorizer, TEXT_FEATURES};

use crate::models::FEATURE_COUNT;

pub const EXECUTION_TIME: usize = 0;
pub const HOUR_OF_DAY: usize = 1;
pub const DAY_OF_WEEK: usize = 2;
pub const SUCCESS: usize = 3;
pub const ERROR_OCCURRED: usize = 4;
pub const NUM_TOOLS: usize = 5;
pub const USED_NMAP: usize = 6;
pub const USED_METASPLOIT: usize = 7;
pub const USED_SQLMAP: usize = 8;
pub const USED_EXPLOIT: usize = 9;
pub const INPUT_LENGTH: usize = 10;
pub const OUTPUT_LENGTH: usize = 11;
pub const INPUT_WORDS: usize = 12;
pub const OUTPUT_WORDS: usize = 13;
/// First of the keyword and network-pattern detector columns
pub const DETECTORS_START: usize = 14;
/// First of the TF-IDF columns
pub const TEXT_START: usize = 23;

/// Columns describing the outcome of an operation, which is unknown when
/// predicting and therefore held at zero while fitting models
pub const OUTCOME_FEATURES: [usize; 3] = [EXECUTION_TIME, SUCCESS, ERROR_OCCURRED];

/// Columns derived from `tools_used`
pub const TOOL_FEATURES: [usize; 5] = [NUM_TOOLS, USED_NMAP, USED_METASPLOIT, USED_SQLMAP, USED_EXPLOIT];

/// Columns derived from `output_text` alone
pub const OUTPUT_FEATURES: [usize; 2] = [OUTPUT_LENGTH, OUTPUT_WORDS];

/// Feature names in vector order
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "execution_time",
    "hour_of_day",
    "day_of_week",
    "success",
    "error_occurred",
    "num_tools",
    "used_nmap",
    "used_metasploit",
    "used_sqlmap",
    "used_exploit",
    "input_length",
    "output_length",
    "input_words",
    "output_words",
    "has_vulnerability",
    "has_reconnaissance",
    "has_network",
    "has_database",
    "has_web",
    "has_privilege",
    "has_password",
    "has_ip_addresses",
    "has_port_numbers",
    "tfidf_0",
    "tfidf_1",
    "tfidf_2",
    "tfidf_3",
    "tfidf_4",
    "tfidf_5",
    "tfidf_6",
    "tfidf_7",
    "tfidf_8",
    "tfidf_9",
    "tfidf_10",
    "tfidf_11",
    "tfidf_12",
    "tfidf_13",
    "tfidf_14",
    "tfidf_15",
    "tfidf_16",
    "tfidf_17",
    "tfidf_18",
    "tfidf_19",
];
