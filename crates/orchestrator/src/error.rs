use agentflow_core::{CoreError, ErrorCode, StructuredError};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid parameters for {tool}: {}", .errors.join("; "))]
    InvalidParameters { tool: String, errors: Vec<String> },

    #[error("Security violation for {tool}: {}", .errors.join("; "))]
    SecurityViolation { tool: String, errors: Vec<String> },

    #[error("User denied execution of {0}")]
    UserDenied(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("{operation} timed out after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    #[error("{0}")]
    Cancelled(String),

    #[error("Recovery exhausted after {attempts} attempts")]
    RecoveryExhausted { attempts: u32 },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Path escapes the workspace: {0}")]
    PathEscape(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// A failure that already carries its structured description.
    #[error(transparent)]
    Structured(StructuredError),
}

impl OrchestratorError {
    /// Create a timeout error for the named operation.
    pub fn timeout(operation: impl Into<String>, duration: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms: duration.as_millis() as u64,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) | Self::Core(CoreError::Validation(_)) => ErrorCode::Validation,
            Self::ToolNotFound(_) => ErrorCode::ToolNotFound,
            Self::InvalidParameters { .. } => ErrorCode::InvalidParameters,
            Self::SecurityViolation { .. } | Self::PathEscape(_) => ErrorCode::SecurityViolation,
            Self::UserDenied(_) => ErrorCode::UserDenied,
            Self::ExecutionFailed(_) | Self::Io(_) => ErrorCode::Execution,
            Self::Network(_) => ErrorCode::Network,
            Self::Auth(_) => ErrorCode::Auth,
            Self::RateLimited(_) => ErrorCode::RateLimit,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Cancelled(_) => ErrorCode::Cancelled,
            Self::RecoveryExhausted { .. } => ErrorCode::RecoveryExhausted,
            Self::InvalidTransition { .. } | Self::Core(CoreError::InvalidActionTransition { .. }) => {
                ErrorCode::InvalidTransition
            }
            Self::Serialization(_) | Self::Core(CoreError::UnknownState(_)) => ErrorCode::Internal,
            Self::Structured(err) => err.code,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Structured(err) => err.recoverable,
            other => other.code().is_recoverable(),
        }
    }

    /// Convert into the structured shape reported to hosts.
    pub fn to_structured(&self) -> StructuredError {
        if let Self::Structured(err) = self {
            return err.clone();
        }

        let error = StructuredError::new(self.code(), self.to_string(), self.is_recoverable());
        match self {
            Self::InvalidParameters { tool, errors } | Self::SecurityViolation { tool, errors } => {
                error.with_context(json!({ "tool": tool, "errors": errors }))
            }
            Self::Timeout {
                operation,
                duration_ms,
            } => error.with_context(json!({ "operation": operation, "durationMs": duration_ms })),
            Self::RecoveryExhausted { attempts } => {
                error.with_context(json!({ "attempts": attempts }))
            }
            _ => error,
        }
    }
}

impl From<StructuredError> for OrchestratorError {
    fn from(err: StructuredError) -> Self {
        Self::Structured(err)
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
