use std::collections::HashMap;
use std::sync::Arc;

use agentflow_core::ActionUnit;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::session::SessionStateMachine;
use crate::tools::{ExecutionContext, ToolManager};

/// Carries out a single action. Errors become the action's failure.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute_action(
        &self,
        action: &ActionUnit,
        session: &SessionStateMachine,
    ) -> Result<Option<Value>>;
}

const DEFAULT_ALIASES: &[(&str, &str)] = &[
    ("create_file", "write_file"),
    ("modify_file", "write_file"),
    ("update_file", "write_file"),
    ("command", "run_command"),
    ("shell", "run_command"),
    ("install_dependency", "run_command"),
    ("mkdir", "create_directory"),
];

/// Runs actions through the tool pipeline, so every action is validated,
/// approved and audited like any other tool call.
pub struct ToolActionHandler {
    tools: Arc<ToolManager>,
    context: ExecutionContext,
    aliases: HashMap<String, String>,
}

impl ToolActionHandler {
    pub fn new(tools: Arc<ToolManager>, context: ExecutionContext) -> Self {
        let aliases = DEFAULT_ALIASES
            .iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect();
        Self {
            tools,
            context,
            aliases,
        }
    }

    /// Route actions of `action_type` to `tool`.
    pub fn with_alias(mut self, action_type: impl Into<String>, tool: impl Into<String>) -> Self {
        self.aliases.insert(action_type.into(), tool.into());
        self
    }

    pub fn tool_for<'a>(&'a self, action_type: &'a str) -> &'a str {
        self.aliases
            .get(action_type)
            .map(String::as_str)
            .unwrap_or(action_type)
    }
}

#[async_trait]
impl ActionHandler for ToolActionHandler {
    async fn execute_action(
        &self,
        action: &ActionUnit,
        session: &SessionStateMachine,
    ) -> Result<Option<Value>> {
        session.check_cancellation()?;

        let tool = self.tool_for(&action.action_type);
        debug!(session_id = %session.id(), action_id = %action.id, tool, "Executing action");

        let output = self
            .tools
            .execute_tool(tool, action.parameters.clone(), &self.context)
            .await?;
        Ok(Some(output))
    }
}
