//! Heuristic 0..=100 risk score for a prospective tool call.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::context::{permissions, ExecutionContext, SecurityLevel};
use super::definition::ToolDefinition;
use super::validation::PATH_KEYS;

const MAX_SCORE: u32 = 100;

const SENSITIVE_FILES: &[&str] = &[
    "package.json",
    "package-lock.json",
    "Cargo.toml",
    "Cargo.lock",
    ".env",
    ".git",
    ".gitignore",
    ".ssh",
    "node_modules",
    "id_rsa",
    ".npmrc",
];

const URL_SHORTENERS: &[&str] = &[
    "bit.ly",
    "tinyurl.com",
    "t.co",
    "goo.gl",
    "ow.ly",
    "is.gd",
    "buff.ly",
    "rebrand.ly",
];

const URL_KEYS: &[&str] = &["url", "uri", "endpoint", "href"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub score: u8,
    pub warnings: Vec<String>,
    pub factors: Vec<String>,
}

impl RiskAssessment {
    pub fn is_high_risk(&self, threshold: u8) -> bool {
        self.score >= threshold
    }
}

struct RiskPattern {
    factor: &'static str,
    warning: &'static str,
    points: u32,
    regex: Regex,
}

fn risk_patterns() -> &'static [RiskPattern] {
    static PATTERNS: OnceLock<Vec<RiskPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let table: [(&str, &str, u32, &str); 6] = [
            (
                "destructive_operation",
                "Parameters contain a destructive file operation",
                30,
                r"(?i)\brm\s+-[a-z]*[rf]|\brmdir\b|\bdel\s+/[a-z]|\bshred\b|\bmkfs\b|\bdd\s+if=|\btruncate\b|>\s*/dev/sd|\bdrop\s+(table|database)\b",
            ),
            (
                "system_control",
                "Parameters contain a system control command",
                25,
                r"(?i)\b(shutdown|reboot|halt|poweroff|systemctl|launchctl|pkill|killall|sudo|chown)\b|\bkill\s+-\d+|\bchmod\s+[0-7]{3,4}\b",
            ),
            (
                "code_execution",
                "Parameters contain a code execution pattern",
                20,
                r"(?i)\beval\s*\(|\bexec\s*\(|new\s+Function\s*\(|child_process|os\.system|subprocess|\b(curl|wget)\b[^|]*\|\s*(sh|bash|zsh)\b|\b(python3?|node|ruby|perl)\s+-(c|e)\b|\b(ba)?sh\s+-c\b",
            ),
            (
                "path_traversal",
                "Parameters contain a path traversal sequence",
                15,
                r"\.\./|\.\.\\",
            ),
            (
                "secret_material",
                "Parameters look like they contain secrets",
                10,
                r"(?i)(api[_-]?key|secret|passw(or)?d|access[_-]?token|private[_-]?key|BEGIN\s+[A-Z ]*PRIVATE KEY)|\bsk-[A-Za-z0-9]{16,}|\bghp_[A-Za-z0-9]{20,}",
            ),
            (
                "local_network",
                "Parameters reference a local network address",
                5,
                r"(?i)\blocalhost\b|\b127\.0\.0\.1\b|\b0\.0\.0\.0\b|\b192\.168\.\d{1,3}\.\d{1,3}\b|\b10\.\d{1,3}\.\d{1,3}\.\d{1,3}\b|\b172\.(1[6-9]|2\d|3[01])\.\d{1,3}\.\d{1,3}\b",
            ),
        ];

        table
            .into_iter()
            .filter_map(|(factor, warning, points, pattern)| {
                Regex::new(pattern).ok().map(|regex| RiskPattern {
                    factor,
                    warning,
                    points,
                    regex,
                })
            })
            .collect()
    })
}

/// Scores tool calls. Stateless; the pattern table is compiled once.
#[derive(Debug, Default, Clone, Copy)]
pub struct RiskAssessor;

impl RiskAssessor {
    pub fn assess_tool_risk(
        &self,
        tool: &ToolDefinition,
        params: &Value,
        context: &ExecutionContext,
    ) -> RiskAssessment {
        let mut score = tool.security.risk_level.base_score();
        let mut warnings = Vec::new();
        let mut factors = vec![format!("base_risk:{}", tool.security.risk_level.as_str())];

        let mut strings = Vec::new();
        collect_strings(params, &mut strings);

        for pattern in risk_patterns() {
            if strings.iter().any(|s| pattern.regex.is_match(s)) {
                score += pattern.points;
                factors.push(pattern.factor.to_string());
                warnings.push(pattern.warning.to_string());
            }
        }

        let paths = keyed_strings(params, PATH_KEYS);
        if paths.iter().any(|p| is_absolute_path(p)) {
            score += 15;
            factors.push("absolute_path".to_string());
            warnings.push("Operation uses an absolute file path".to_string());
        }
        if let Some(sensitive) = paths.iter().find_map(|p| touches_sensitive_file(p)) {
            score += 10;
            factors.push("sensitive_file".to_string());
            warnings.push(format!("Operation touches sensitive file {sensitive}"));
        }

        let url_points = assess_urls(params, &strings, &mut factors, &mut warnings);
        score += url_points;

        if context.security.level == SecurityLevel::Restricted {
            score += 10;
            factors.push("restricted_context".to_string());
            warnings.push("Caller runs at RESTRICTED security level".to_string());
        }

        if tool
            .security
            .permissions
            .iter()
            .any(|p| permissions::is_high_risk(p))
        {
            score += 10;
            factors.push("high_risk_permissions".to_string());
        }

        RiskAssessment {
            score: score.min(MAX_SCORE) as u8,
            warnings,
            factors,
        }
    }
}

fn collect_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|item| collect_strings(item, out)),
        Value::Object(map) => map.values().for_each(|item| collect_strings(item, out)),
        _ => {}
    }
}

fn keyed_strings<'a>(params: &'a Value, keys: &[&str]) -> Vec<&'a str> {
    let Some(object) = params.as_object() else {
        return Vec::new();
    };
    keys.iter()
        .filter_map(|key| object.get(*key).and_then(Value::as_str))
        .collect()
}

fn is_absolute_path(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    let windows_drive =
        bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && matches!(bytes[2], b'\\' | b'/');
    raw.starts_with('/') || raw.starts_with("\\\\") || windows_drive || Path::new(raw).is_absolute()
}

fn touches_sensitive_file(raw: &str) -> Option<&'static str> {
    raw.split(['/', '\\'])
        .find_map(|segment| SENSITIVE_FILES.iter().copied().find(|name| *name == segment))
}

fn assess_urls(
    params: &Value,
    strings: &[&str],
    factors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) -> u32 {
    let mut candidates: Vec<&str> = strings
        .iter()
        .copied()
        .filter(|s| s.contains("://"))
        .collect();
    for keyed in keyed_strings(params, URL_KEYS) {
        if !candidates.contains(&keyed) {
            candidates.push(keyed);
        }
    }

    let mut insecure = false;
    let mut shortened = false;
    let mut invalid = false;

    for candidate in candidates {
        match Url::parse(candidate.trim()) {
            Ok(url) => {
                if url.scheme() != "https" {
                    insecure = true;
                }
                if url
                    .host_str()
                    .is_some_and(|host| URL_SHORTENERS.contains(&host.trim_start_matches("www.")))
                {
                    shortened = true;
                }
            }
            Err(_) => invalid = true,
        }
    }

    let mut points = 0;
    if insecure {
        points += 10;
        factors.push("insecure_url".to_string());
        warnings.push("URL does not use HTTPS".to_string());
    }
    if shortened {
        points += 15;
        factors.push("url_shortener".to_string());
        warnings.push("URL uses a link shortener".to_string());
    }
    if invalid {
        points += 5;
        factors.push("invalid_url".to_string());
        warnings.push("Parameters contain an invalid URL".to_string());
    }
    points
}
