//! Planning phase: turn the requirement into an ordered action list.

use std::collections::HashSet;
use std::sync::Arc;

use agentflow_core::{ActionStatus, ActionUnit, ErrorCode, Requirement, WorkflowPhase};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::prompts::PhasePrompts;
use super::{artifacts, extract_json_from_response};
use crate::error::{OrchestratorError, Result};
use crate::runner::{create_fatal_error, PhaseRunner, RunnerHarness, RunnerResult};
use crate::services::{write_json, AgentChatClient, ChatMessage, ChatOptions, FileStore};

#[derive(Deserialize)]
#[serde(untagged)]
enum PlanDocument {
    List(Vec<ActionUnit>),
    Wrapped { actions: Vec<ActionUnit> },
}

/// Parse and validate an agent's action list.
///
/// Every action starts `PENDING`; ids must be unique and dependencies must
/// name an earlier action.
pub fn parse_action_plan(content: &str) -> Result<Vec<ActionUnit>> {
    let json_str = extract_json_from_response(content);
    let document: PlanDocument = serde_json::from_str(&json_str)
        .map_err(|e| OrchestratorError::Validation(format!("Plan is not a valid action list: {e}")))?;
    let mut actions = match document {
        PlanDocument::List(actions) | PlanDocument::Wrapped { actions } => actions,
    };

    if actions.is_empty() {
        return Err(OrchestratorError::Validation("Plan contains no actions".to_string()));
    }

    let mut seen: HashSet<String> = HashSet::new();
    for action in &mut actions {
        if action.id.trim().is_empty() {
            return Err(OrchestratorError::Validation("Action without an id".to_string()));
        }
        for dep in &action.dependencies {
            if !seen.contains(dep.as_str()) {
                return Err(OrchestratorError::Validation(format!(
                    "Action {} depends on unknown or later action {}",
                    action.id, dep
                )));
            }
        }
        if !seen.insert(action.id.clone()) {
            return Err(OrchestratorError::Validation(format!("Duplicate action id: {}", action.id)));
        }
        action.status = ActionStatus::Pending;
        action.result = None;
    }

    Ok(actions)
}

pub struct PlanningRunner {
    client: Arc<dyn AgentChatClient>,
    files: Arc<dyn FileStore>,
    requirement: Requirement,
    action_types: Vec<String>,
    options: ChatOptions,
}

impl PlanningRunner {
    pub fn new(client: Arc<dyn AgentChatClient>, files: Arc<dyn FileStore>, requirement: Requirement) -> Self {
        Self {
            client,
            files,
            requirement,
            action_types: Vec::new(),
            options: ChatOptions::default(),
        }
    }

    /// Action types offered to the agent, usually the registered tool names.
    pub fn with_action_types(mut self, types: Vec<String>) -> Self {
        self.action_types = types;
        self
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    async fn read_context(&self) -> Result<Option<String>> {
        if self.files.exists(artifacts::CONTEXT).await? {
            Ok(Some(self.files.read(artifacts::CONTEXT).await?))
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl PhaseRunner for PlanningRunner {
    fn runner_name(&self) -> &str {
        "Planning"
    }

    fn validate_inputs(&self) -> bool {
        !self.requirement.is_empty()
    }

    async fn execute(&self, harness: &RunnerHarness) -> Result<RunnerResult> {
        let session = harness.session();
        let Some(agent) = session.agent_for(WorkflowPhase::Planning) else {
            return Ok(RunnerResult::failure(
                create_fatal_error(ErrorCode::Validation, "No agent assigned to the planning phase")
                    .with_suggested_fix("Set a default agent or assign one to the planning phase"),
            ));
        };

        let context = self.read_context().await?;
        let prompt = PhasePrompts::planning(&self.requirement, context.as_deref(), &self.action_types);
        debug!(
            session_id = %session.id(),
            agent = %agent,
            prompt_length = prompt.len(),
            has_context = context.is_some(),
            "Requesting plan"
        );

        harness.check_cancellation()?;
        let messages = [
            ChatMessage::system("You are a senior engineer planning code changes."),
            ChatMessage::user(prompt),
        ];
        let response = self.client.send_message(&agent, &messages, &self.options).await?;
        harness.check_cancellation()?;

        let actions = parse_action_plan(&response.content)?;
        write_json(self.files.as_ref(), artifacts::ACTIONS, &actions).await?;
        session.set_metadata("plannedActions", json!(actions.len()));

        info!(session_id = %session.id(), actions = actions.len(), "Plan saved");

        Ok(RunnerResult::success(Some(json!({
            "summary": format!("Planned {} actions", actions.len()),
            "actionsPath": artifacts::ACTIONS,
            "actions": actions,
        }))))
    }
}
