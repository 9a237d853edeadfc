//! Bounded audit and approval logs.

use std::collections::VecDeque;

use agentflow_core::ErrorCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::approval::ApprovalDecision;
use super::risk::RiskAssessment;

pub const DEFAULT_LOG_CAPACITY: usize = 1000;
const ARGS_PREVIEW_LEN: usize = 200;

/// FIFO log that drops its oldest entries once over capacity.
#[derive(Debug, Clone)]
pub struct BoundedLog<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedLog<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, entry: T) {
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    pub fn retain(&mut self, keep: impl FnMut(&T) -> bool) {
        self.entries.retain(keep);
    }
}

impl<T: Clone> BoundedLog<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }
}

impl<T> Default for BoundedLog<T> {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Denied => "denied",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub session_id: Uuid,
    pub agent_id: String,
    pub tool: String,
    pub outcome: AuditOutcome,
    pub duration_ms: u64,
    pub args_preview: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalLogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub session_id: Uuid,
    pub tool: String,
    pub decision: ApprovalDecision,
    pub approved: bool,
    pub risk: RiskAssessment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high_risk_confirmed: Option<bool>,
}

/// Aggregate view over the approval log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApprovalReport {
    pub total: usize,
    pub approved: usize,
    pub denied: usize,
    pub approval_rate: f64,
    pub average_risk: f64,
    pub high_risk_count: usize,
}

impl ApprovalReport {
    pub fn from_entries<'a>(
        entries: impl IntoIterator<Item = &'a ApprovalLogEntry>,
        high_risk_threshold: u8,
    ) -> Self {
        let mut report = Self::default();
        let mut risk_sum = 0u64;

        for entry in entries {
            report.total += 1;
            if entry.approved {
                report.approved += 1;
            } else {
                report.denied += 1;
            }
            if entry.risk.score >= high_risk_threshold {
                report.high_risk_count += 1;
            }
            risk_sum += u64::from(entry.risk.score);
        }

        if report.total > 0 {
            report.approval_rate = report.approved as f64 / report.total as f64;
            report.average_risk = risk_sum as f64 / report.total as f64;
        }
        report
    }
}

/// Compact rendering of tool arguments for logs.
pub fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > ARGS_PREVIEW_LEN {
        format!("{}...", s.chars().take(ARGS_PREVIEW_LEN).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn approval(approved: bool, score: u8) -> ApprovalLogEntry {
        ApprovalLogEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            session_id: Uuid::new_v4(),
            tool: "write_file".to_string(),
            decision: if approved {
                ApprovalDecision::Allow
            } else {
                ApprovalDecision::Deny
            },
            approved,
            risk: RiskAssessment {
                score,
                ..Default::default()
            },
            high_risk_confirmed: None,
        }
    }

    #[test]
    fn test_bounded_log_evicts_oldest() {
        let mut log = BoundedLog::new(3);
        for i in 0..5 {
            log.push(i);
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.to_vec(), vec![2, 3, 4]);
    }

    #[test]
    fn test_default_capacity() {
        let mut log = BoundedLog::default();
        for i in 0..1500 {
            log.push(i);
        }
        assert_eq!(log.len(), DEFAULT_LOG_CAPACITY);
        assert_eq!(log.iter().next(), Some(&500));
    }

    #[test]
    fn test_approval_report() {
        let entries = vec![approval(true, 40), approval(true, 80), approval(false, 90)];
        let report = ApprovalReport::from_entries(&entries, 70);

        assert_eq!(report.total, 3);
        assert_eq!(report.approved, 2);
        assert_eq!(report.denied, 1);
        assert!((report.approval_rate - 2.0 / 3.0).abs() < f64::EPSILON);
        assert!((report.average_risk - 70.0).abs() < f64::EPSILON);
        assert_eq!(report.high_risk_count, 2);
    }

    #[test]
    fn test_empty_report() {
        let entries: Vec<ApprovalLogEntry> = Vec::new();
        let report = ApprovalReport::from_entries(&entries, 70);
        assert_eq!(report, ApprovalReport::default());
    }

    #[test]
    fn test_args_preview_truncates() {
        let long = json!({ "content": "x".repeat(500) });
        let preview = args_preview(&long);
        assert_eq!(preview.chars().count(), ARGS_PREVIEW_LEN + 3);
        assert!(preview.ends_with("..."));

        assert_eq!(args_preview(&json!({ "a": 1 })), r#"{"a":1}"#);
    }
}
