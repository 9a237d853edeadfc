//! Template-method wrapper every phase runner executes through.

mod errors;
mod harness;

use std::time::Duration;

use agentflow_core::StructuredError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

pub use errors::{create_fatal_error, create_recoverable_error};
pub use harness::RunnerHarness;

/// What the host decided to do after a runner failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryChoice {
    Retry,
    Reconfigure,
    Skip,
    Abort,
}

impl RecoveryChoice {
    pub const ALL: [RecoveryChoice; 4] = [Self::Retry, Self::Reconfigure, Self::Skip, Self::Abort];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::Reconfigure => "reconfigure",
            Self::Skip => "skip",
            Self::Abort => "abort",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|choice| choice.as_str() == s)
    }
}

/// Uniform outcome of a phase execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunnerResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StructuredError>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl RunnerResult {
    pub fn success(data: Option<Value>) -> Self {
        Self {
            success: true,
            data,
            ..Default::default()
        }
    }

    pub fn failure(error: StructuredError) -> Self {
        Self {
            success: false,
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }

    pub fn recovery_choice(&self) -> Option<RecoveryChoice> {
        self.metadata
            .get("recovery_choice")
            .and_then(Value::as_str)
            .and_then(RecoveryChoice::parse)
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.metadata.get("duration_ms").and_then(Value::as_u64)
    }
}

/// Optional timer raced against a runner's execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutOptions {
    pub duration: Duration,
    /// Offer one extra window of the same length before failing
    pub allow_extension: bool,
}

impl TimeoutOptions {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            allow_extension: false,
        }
    }

    pub fn extendable(duration: Duration) -> Self {
        Self {
            duration,
            allow_extension: true,
        }
    }
}

/// Phase-specific logic run by [`RunnerHarness::run`].
#[async_trait]
pub trait PhaseRunner: Send + Sync {
    fn runner_name(&self) -> &str;

    fn validate_inputs(&self) -> bool {
        true
    }

    /// Run the phase. Long-running implementations call
    /// [`RunnerHarness::check_cancellation`] between steps.
    async fn execute(&self, harness: &RunnerHarness) -> Result<RunnerResult>;

    async fn handle_error(&self, harness: &RunnerHarness, error: &StructuredError) -> RecoveryChoice {
        harness.dispatch_error(self.runner_name(), error).await
    }
}
