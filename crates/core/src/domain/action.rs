use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// Outcome attached to an action once it leaves `Pending`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
}

/// One step of an execution sequence.
///
/// Status only moves `Pending -> InProgress -> {Completed, Failed}` or
/// `Pending -> Skipped`. The one exception is the recovery mutation, which
/// re-labels a `Failed` action as `Skipped` through [`ActionUnit::skip_failed`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionUnit {
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ActionResult>,
}

impl ActionUnit {
    pub fn new(
        id: impl Into<String>,
        action_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            action_type: action_type.into(),
            description: description.into(),
            parameters: Value::Object(Default::default()),
            dependencies: Vec::new(),
            status: ActionStatus::Pending,
            result: None,
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == ActionStatus::Pending
    }

    pub fn start(&mut self) -> Result<(), CoreError> {
        self.transition(ActionStatus::Pending, ActionStatus::InProgress)
    }

    pub fn complete(&mut self, output: Option<Value>, duration_ms: u64) -> Result<(), CoreError> {
        self.transition(ActionStatus::InProgress, ActionStatus::Completed)?;
        self.result = Some(ActionResult {
            success: true,
            output,
            duration_ms,
            ..Default::default()
        });
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>, duration_ms: u64) -> Result<(), CoreError> {
        self.transition(ActionStatus::InProgress, ActionStatus::Failed)?;
        self.result = Some(ActionResult {
            success: false,
            error: Some(error.into()),
            duration_ms,
            ..Default::default()
        });
        Ok(())
    }

    pub fn skip(&mut self, reason: impl Into<String>) -> Result<(), CoreError> {
        self.transition(ActionStatus::Pending, ActionStatus::Skipped)?;
        self.result = Some(ActionResult {
            success: false,
            skip_reason: Some(reason.into()),
            ..Default::default()
        });
        Ok(())
    }

    /// Re-label a failed action as skipped, keeping its original error.
    pub fn skip_failed(&mut self, reason: impl Into<String>) -> Result<(), CoreError> {
        self.transition(ActionStatus::Failed, ActionStatus::Skipped)?;
        let result = self.result.get_or_insert_with(ActionResult::default);
        result.skip_reason = Some(reason.into());
        Ok(())
    }

    pub fn error_message(&self) -> Option<&str> {
        self.result.as_ref().and_then(|r| r.error.as_deref())
    }

    fn transition(&mut self, expected: ActionStatus, to: ActionStatus) -> Result<(), CoreError> {
        if self.status != expected {
            return Err(CoreError::InvalidActionTransition {
                id: self.id.clone(),
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        self.status = to;
        Ok(())
    }
}
