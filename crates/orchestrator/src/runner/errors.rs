use agentflow_core::{ErrorCode, StructuredError};

/// A failure the host may retry.
pub fn create_recoverable_error(code: ErrorCode, message: impl Into<String>) -> StructuredError {
    StructuredError::recoverable(code, message)
}

/// A failure that aborts the phase.
pub fn create_fatal_error(code: ErrorCode, message: impl Into<String>) -> StructuredError {
    StructuredError::fatal(code, message)
}

pub(crate) const NETWORK_FIX: &str =
    "Check your network connection and that the agent endpoint is reachable, then retry.";
pub(crate) const AUTH_FIX: &str =
    "Verify the API key configured for the agent and that it has not expired.";
pub(crate) const AUTH_LINK: &str = "agentflow.toml#agent.api_key_env";
pub(crate) const RATE_LIMIT_FIX: &str =
    "The agent provider is rate limiting requests. Wait a moment before retrying.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factories_set_recoverability() {
        let recoverable = create_recoverable_error(ErrorCode::Network, "connection reset");
        assert!(recoverable.recoverable);

        let fatal = create_fatal_error(ErrorCode::SecurityViolation, "path escapes workspace")
            .with_suggested_fix("Use a path inside the workspace");
        assert!(!fatal.recoverable);
        assert_eq!(
            fatal.suggested_fix.as_deref(),
            Some("Use a path inside the workspace")
        );
    }
}
