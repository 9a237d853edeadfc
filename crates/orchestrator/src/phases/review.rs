//! Plan review: a second agent vets the action list before it runs.

use std::sync::Arc;

use agentflow_core::{ErrorCode, Requirement, WorkflowPhase};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use super::prompts::PhasePrompts;
use super::{artifacts, extract_json_from_response};
use crate::error::Result;
use crate::runner::{create_fatal_error, create_recoverable_error, PhaseRunner, RunnerHarness, RunnerResult};
use crate::services::{AgentChatClient, ChatMessage, ChatOptions, FileStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub approved: bool,
    #[serde(default)]
    pub summary: String,
}

const REJECTION_MARKERS: &[&str] = &["CHANGES_REQUESTED", "CHANGES REQUESTED", "REJECTED"];

/// Read the verdict block; without one, the review passes unless it
/// carries an explicit rejection marker.
pub fn parse_review_verdict(content: &str) -> ReviewVerdict {
    let json_str = extract_json_from_response(content);
    if let Ok(verdict) = serde_json::from_str::<ReviewVerdict>(&json_str) {
        return verdict;
    }

    let upper = content.to_uppercase();
    let rejected = REJECTION_MARKERS.iter().any(|m| upper.contains(m));
    let summary = content.lines().find(|l| !l.trim().is_empty()).unwrap_or_default();
    ReviewVerdict {
        approved: !rejected,
        summary: summary.trim().to_string(),
    }
}

pub struct ReviewRunner {
    client: Arc<dyn AgentChatClient>,
    files: Arc<dyn FileStore>,
    requirement: Requirement,
    options: ChatOptions,
}

impl ReviewRunner {
    pub fn new(client: Arc<dyn AgentChatClient>, files: Arc<dyn FileStore>, requirement: Requirement) -> Self {
        Self {
            client,
            files,
            requirement,
            options: ChatOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }
}

#[async_trait]
impl PhaseRunner for ReviewRunner {
    fn runner_name(&self) -> &str {
        "Plan review"
    }

    async fn execute(&self, harness: &RunnerHarness) -> Result<RunnerResult> {
        let session = harness.session();
        let Some(agent) = session.agent_for(WorkflowPhase::Review) else {
            return Ok(RunnerResult::failure(create_fatal_error(
                ErrorCode::Validation,
                "No agent assigned to the review phase",
            )));
        };

        if !self.files.exists(artifacts::ACTIONS).await? {
            return Ok(RunnerResult::failure(
                create_recoverable_error(ErrorCode::Validation, "No plan to review")
                    .with_suggested_fix("Run the planning phase first"),
            ));
        }
        let plan = self.files.read(artifacts::ACTIONS).await?;

        harness.check_cancellation()?;
        let messages = [
            ChatMessage::system("You are a meticulous reviewer of code change plans."),
            ChatMessage::user(PhasePrompts::review(&self.requirement, &plan)),
        ];
        let response = self.client.send_message(&agent, &messages, &self.options).await?;
        harness.check_cancellation()?;

        self.files.write(artifacts::PLAN_REVIEW, &response.content).await?;
        let verdict = parse_review_verdict(&response.content);

        if !verdict.approved {
            warn!(session_id = %session.id(), summary = %verdict.summary, "Plan review requested changes");
            return Ok(RunnerResult::failure(
                create_recoverable_error(
                    ErrorCode::Validation,
                    format!("Plan review requested changes: {}", verdict.summary),
                )
                .with_context(json!({ "reviewPath": artifacts::PLAN_REVIEW })),
            ));
        }

        info!(session_id = %session.id(), "Plan review approved");
        Ok(RunnerResult::success(Some(json!({
            "summary": verdict.summary,
            "reviewPath": artifacts::PLAN_REVIEW,
        }))))
    }
}
