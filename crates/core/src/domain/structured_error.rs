use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Machine-readable failure codes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    #[serde(rename = "VALIDATION_ERROR")]
    Validation,
    #[serde(rename = "INVALID_PARAMETERS")]
    InvalidParameters,
    #[serde(rename = "SECURITY_VIOLATION")]
    SecurityViolation,
    #[serde(rename = "TOOL_NOT_FOUND")]
    ToolNotFound,
    #[serde(rename = "USER_DENIED")]
    UserDenied,
    #[serde(rename = "EXECUTION_ERROR")]
    Execution,
    #[serde(rename = "NETWORK_ERROR")]
    Network,
    #[serde(rename = "AUTH_ERROR")]
    Auth,
    #[serde(rename = "RATE_LIMIT_ERROR")]
    RateLimit,
    #[serde(rename = "TIMEOUT")]
    Timeout,
    #[serde(rename = "CANCELLED")]
    Cancelled,
    #[serde(rename = "RECOVERY_EXHAUSTED")]
    RecoveryExhausted,
    #[serde(rename = "INVALID_TRANSITION")]
    InvalidTransition,
    #[serde(rename = "INTERNAL_ERROR")]
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::InvalidParameters => "INVALID_PARAMETERS",
            Self::SecurityViolation => "SECURITY_VIOLATION",
            Self::ToolNotFound => "TOOL_NOT_FOUND",
            Self::UserDenied => "USER_DENIED",
            Self::Execution => "EXECUTION_ERROR",
            Self::Network => "NETWORK_ERROR",
            Self::Auth => "AUTH_ERROR",
            Self::RateLimit => "RATE_LIMIT_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::RecoveryExhausted => "RECOVERY_EXHAUSTED",
            Self::InvalidTransition => "INVALID_TRANSITION",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    /// Whether a failure with this code is worth retrying by default.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Validation
                | Self::InvalidParameters
                | Self::Execution
                | Self::Network
                | Self::RateLimit
                | Self::Timeout
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure reported to hosts and users. Built once, never mutated after
/// it leaves the builder methods.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[error("{code}: {message}")]
#[serde(rename_all = "camelCase")]
pub struct StructuredError {
    pub code: ErrorCode,
    pub message: String,
    pub recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl StructuredError {
    pub fn new(code: ErrorCode, message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            code,
            message: message.into(),
            recoverable,
            suggested_fix: None,
            configuration_link: None,
            context: None,
        }
    }

    pub fn recoverable(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code, message, true)
    }

    pub fn fatal(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code, message, false)
    }

    pub fn with_suggested_fix(mut self, fix: impl Into<String>) -> Self {
        self.suggested_fix = Some(fix.into());
        self
    }

    pub fn with_configuration_link(mut self, link: impl Into<String>) -> Self {
        self.configuration_link = Some(link.into());
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }
}
