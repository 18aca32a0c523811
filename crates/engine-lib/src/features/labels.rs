//! Outcome labelling of interaction records

use super::detectors::{
    contains_any, ACCESS_KEYWORDS, DISCOVERY_KEYWORDS, EXPLOIT_KEYWORDS, PRIVILEGE_KEYWORDS,
};
use super::extractor::uses_tool;
use crate::models::{InteractionRecord, Label};

const SUCCESS_INDICATORS: &[&str] = &[
    "successfully",
    "completed",
    "found",
    "discovered",
    "identified",
    "access granted",
    "vulnerability",
    "exploit",
    "shell",
    "root",
    "admin",
    "password",
    "credential",
    "compromised",
];

const FAILURE_INDICATORS: &[&str] = &[
    "failed",
    "error",
    "unable",
    "cannot",
    "denied",
    "blocked",
    "not found",
    "no results",
    "timeout",
    "connection refused",
];

/// Minimum trimmed output length treated as a substantive answer
const SUBSTANTIVE_OUTPUT_CHARS: usize = 20;

/// Derive the outcome label of a record.
///
/// Failed operations are always [`Label::Failure`]. Successful ones take the
/// first match in this order: nmap tool, sqlmap tool, metasploit tool, exploit
/// keyword, privilege keyword, access keyword, discovery keyword, and finally
/// [`Label::SuccessfulGeneral`].
pub fn derive_label(record: &InteractionRecord) -> Label {
    if !record.success {
        return Label::Failure;
    }

    let tools: Vec<String> = record.tools_used.iter().map(|t| t.to_lowercase()).collect();
    let text = record.combined_text();

    if uses_tool(&tools, &["nmap"]) {
        Label::SuccessfulNmapRecon
    } else if uses_tool(&tools, &["sqlmap"]) {
        Label::SuccessfulSqlTool
    } else if uses_tool(&tools, &["metasploit", "msfconsole"]) {
        Label::SuccessfulMetasploit
    } else if contains_any(&text, EXPLOIT_KEYWORDS) {
        Label::SuccessfulExploit
    } else if contains_any(&text, PRIVILEGE_KEYWORDS) {
        Label::SuccessfulPrivilegeEscalation
    } else if contains_any(&text, ACCESS_KEYWORDS) {
        Label::SuccessfulAccess
    } else if contains_any(&text, DISCOVERY_KEYWORDS) {
        Label::SuccessfulDiscovery
    } else {
        Label::SuccessfulGeneral
    }
}

/// Heuristic outcome for interactions recorded without an explicit result.
///
/// Counts success indicators against failure indicators in the output; on a
/// tie the output must be substantive to count as a success.
pub fn assess_success(output_text: &str) -> bool {
    let output = output_text.to_lowercase();
    let success_score = SUCCESS_INDICATORS.iter().filter(|kw| output.contains(*kw)).count();
    let failure_score = FAILURE_INDICATORS.iter().filter(|kw| output.contains(*kw)).count();

    match success_score.cmp(&failure_score) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => output_text.trim().chars().count() > SUBSTANTIVE_OUTPUT_CHARS,
    }
}
