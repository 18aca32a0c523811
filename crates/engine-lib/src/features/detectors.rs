//! Binary text detectors
//!
//! Each detector is one row of [`TEXT_DETECTORS`]; adding a feature means
//! adding a row here and a name to the layout, never touching the extraction
//! loop.

use regex::Regex;
use std::sync::OnceLock;

/// A named binary predicate over lowercased input+output text
pub struct TextDetector {
    pub name: &'static str,
    pub predicate: fn(&str) -> bool,
}

pub const VULNERABILITY_KEYWORDS: &[&str] = &["vuln", "vulnerability", "cve", "exploit"];
pub const RECONNAISSANCE_KEYWORDS: &[&str] = &["scan", "recon", "enumerate", "discover"];
pub const NETWORK_KEYWORDS: &[&str] = &["port", "tcp", "udp", "ip", "domain"];
pub const DATABASE_KEYWORDS: &[&str] = &["sql", "mysql", "postgres", "database", "db"];
pub const WEB_KEYWORDS: &[&str] = &["http", "https", "web", "url", "website"];
pub const PRIVILEGE_KEYWORDS: &[&str] = &["root", "admin", "privilege", "escalat", "sudo"];
pub const PASSWORD_KEYWORDS: &[&str] = &["password", "passwd", "login", "auth", "credential"];

/// Keywords marking a successful exploitation
pub const EXPLOIT_KEYWORDS: &[&str] = &["exploit", "payload", "cve-"];
/// Keywords marking obtained access
pub const ACCESS_KEYWORDS: &[&str] = &["access", "shell", "session opened", "logged in"];
/// Keywords marking reconnaissance or discovery
pub const DISCOVERY_KEYWORDS: &[&str] = &["discover", "found", "enumerat", "recon", "scan"];

/// Detector table in feature-vector order
pub const TEXT_DETECTORS: [TextDetector; 9] = [
    TextDetector { name: "has_vulnerability", predicate: has_vulnerability },
    TextDetector { name: "has_reconnaissance", predicate: has_reconnaissance },
    TextDetector { name: "has_network", predicate: has_network },
    TextDetector { name: "has_database", predicate: has_database },
    TextDetector { name: "has_web", predicate: has_web },
    TextDetector { name: "has_privilege", predicate: has_privilege },
    TextDetector { name: "has_password", predicate: has_password },
    TextDetector { name: "has_ip_addresses", predicate: has_ip_address },
    TextDetector { name: "has_port_numbers", predicate: has_port_number },
];

const IP_PATTERN: &str = r"\b(?:[0-9]{1,3}\.){3}[0-9]{1,3}\b";
const PORT_PATTERN: &str = r"\b(?:port|tcp|udp)[\s:]*\d{1,5}\b|\b\d{1,5}/(?:tcp|udp)\b";

static IP_REGEX: OnceLock<Option<Regex>> = OnceLock::new();
static PORT_REGEX: OnceLock<Option<Regex>> = OnceLock::new();

pub fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|kw| text.contains(kw))
}

fn has_vulnerability(text: &str) -> bool {
    contains_any(text, VULNERABILITY_KEYWORDS)
}

fn has_reconnaissance(text: &str) -> bool {
    contains_any(text, RECONNAISSANCE_KEYWORDS)
}

fn has_network(text: &str) -> bool {
    contains_any(text, NETWORK_KEYWORDS)
}

fn has_database(text: &str) -> bool {
    contains_any(text, DATABASE_KEYWORDS)
}

fn has_web(text: &str) -> bool {
    contains_any(text, WEB_KEYWORDS)
}

fn has_privilege(text: &str) -> bool {
    contains_any(text, PRIVILEGE_KEYWORDS)
}

fn has_password(text: &str) -> bool {
    contains_any(text, PASSWORD_KEYWORDS)
}

pub fn has_ip_address(text: &str) -> bool {
    matches_pattern(&IP_REGEX, IP_PATTERN, text)
}

pub fn has_port_number(text: &str) -> bool {
    matches_pattern(&PORT_REGEX, PORT_PATTERN, text)
}

// An uncompilable pattern never matches rather than failing extraction.
fn matches_pattern(cell: &OnceLock<Option<Regex>>, pattern: &str, text: &str) -> bool {
    cell.get_or_init(|| Regex::new(pattern).ok())
        .as_ref()
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}
