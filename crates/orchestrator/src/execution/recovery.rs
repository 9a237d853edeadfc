//! Bounded, plan-assisted remediation of failed actions.

use std::sync::Arc;

use agentflow_core::{ActionStatus, ActionUnit, SessionState, WorkflowPhase};
use async_trait::async_trait;
use events::Event;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{OrchestratorError, Result};
use crate::services::{AgentChatClient, ChatMessage, ChatOptions};
use crate::session::SessionStateMachine;

pub const DEFAULT_MAX_RECOVERY_ATTEMPTS: u32 = 2;
pub const DEFAULT_PENDING_PREVIEW_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedAction {
    pub id: String,
    pub description: String,
    pub error: String,
}

/// The execution state handed to the recovery strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverySnapshot {
    pub attempt: u32,
    pub max_attempts: u32,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
    pub failures: Vec<FailedAction>,
    /// Upcoming pending actions, in execution order
    pub upcoming: Vec<String>,
}

impl RecoverySnapshot {
    pub fn capture(actions: &[ActionUnit], attempt: u32, max_attempts: u32, preview_limit: usize) -> Self {
        let count = |status: ActionStatus| actions.iter().filter(|a| a.status == status).count();

        let failures = actions
            .iter()
            .filter(|a| a.status == ActionStatus::Failed)
            .map(|a| FailedAction {
                id: a.id.clone(),
                description: a.description.clone(),
                error: a.error_message().unwrap_or("unknown error").to_string(),
            })
            .collect();

        let upcoming = actions
            .iter()
            .filter(|a| a.is_pending())
            .take(preview_limit)
            .map(|a| format!("{}: {}", a.id, a.description))
            .collect();

        Self {
            attempt,
            max_attempts,
            completed: count(ActionStatus::Completed),
            failed: count(ActionStatus::Failed),
            pending: count(ActionStatus::Pending),
            failures,
            upcoming,
        }
    }

    pub fn to_prompt(&self) -> String {
        let mut prompt = format!(
            "Execution hit a failure (recovery attempt {} of {}).\n\
             Completed: {}, failed: {}, pending: {}.\n\nFailures:\n",
            self.attempt, self.max_attempts, self.completed, self.failed, self.pending
        );
        for failure in &self.failures {
            prompt.push_str(&format!("- {} ({}): {}\n", failure.id, failure.description, failure.error));
        }
        if !self.upcoming.is_empty() {
            prompt.push_str("\nUpcoming actions:\n");
            for action in &self.upcoming {
                prompt.push_str(&format!("- {action}\n"));
            }
        }
        prompt.push_str("\nSuggest a short recovery plan.");
        prompt
    }
}

/// Source of natural-language recovery plans.
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    async fn request_plan(&self, snapshot: &RecoverySnapshot, session: &SessionStateMachine) -> Result<String>;
}

/// Asks the agent assigned to the recovery phase for a plan.
pub struct AgentRecoveryStrategy {
    client: Arc<dyn AgentChatClient>,
    options: ChatOptions,
}

impl AgentRecoveryStrategy {
    pub fn new(client: Arc<dyn AgentChatClient>) -> Self {
        Self {
            client,
            options: ChatOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }
}

#[async_trait]
impl RecoveryStrategy for AgentRecoveryStrategy {
    async fn request_plan(&self, snapshot: &RecoverySnapshot, session: &SessionStateMachine) -> Result<String> {
        let agent = session.agent_for(WorkflowPhase::Recovery).ok_or_else(|| {
            OrchestratorError::Validation("No agent assigned to the recovery phase".to_string())
        })?;

        let messages = [
            ChatMessage::system("You help a coding workflow recover from failed steps."),
            ChatMessage::user(snapshot.to_prompt()),
        ];
        let response = self.client.send_message(&agent, &messages, &self.options).await?;
        Ok(response.content)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryOutcome {
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    pub skipped: Vec<String>,
}

/// Counts attempts and applies the fallback mutation: every failed action is
/// re-labelled as skipped. The plan is kept for reporting only.
pub struct RecoveryController {
    max_attempts: u32,
    attempts: u32,
    preview_limit: usize,
    strategy: Option<Arc<dyn RecoveryStrategy>>,
    plans: Vec<String>,
}

impl RecoveryController {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            attempts: 0,
            preview_limit: DEFAULT_PENDING_PREVIEW_LIMIT,
            strategy: None,
            plans: Vec::new(),
        }
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn RecoveryStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_preview_limit(mut self, limit: usize) -> Self {
        self.preview_limit = limit;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn plans(&self) -> &[String] {
        &self.plans
    }

    pub fn can_attempt(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub async fn attempt(
        &mut self,
        actions: &mut [ActionUnit],
        session: &SessionStateMachine,
    ) -> Result<RecoveryOutcome> {
        if !self.can_attempt() {
            return Err(OrchestratorError::RecoveryExhausted {
                attempts: self.attempts,
            });
        }
        self.attempts += 1;
        let attempt = self.attempts;

        info!(session_id = %session.id(), attempt, max_attempts = self.max_attempts, "Recovery attempt");
        session.set_state(SessionState::Recovery, Some(&format!("Recovery attempt {attempt}")))?;
        session.publish(Event::RecoveryAttempted {
            session_id: session.id(),
            attempt,
            max_attempts: self.max_attempts,
        });

        let snapshot = RecoverySnapshot::capture(actions, attempt, self.max_attempts, self.preview_limit);

        let plan = match &self.strategy {
            Some(strategy) => match strategy.request_plan(&snapshot, session).await {
                Ok(plan) => {
                    self.plans.push(plan.clone());
                    Some(plan)
                }
                Err(e) => {
                    warn!(session_id = %session.id(), attempt, error = %e, "Recovery plan request failed");
                    None
                }
            },
            None => None,
        };

        let mut skipped = Vec::new();
        for action in actions.iter_mut().filter(|a| a.status == ActionStatus::Failed) {
            let reason = format!(
                "Skipped after recovery attempt {}: {}",
                attempt,
                action.error_message().unwrap_or("unknown error")
            );
            action.skip_failed(reason)?;
            session.publish(Event::ActionStatusChanged {
                session_id: session.id(),
                action_id: action.id.clone(),
                status: ActionStatus::Skipped,
            });
            skipped.push(action.id.clone());
        }

        session.set_state(SessionState::Execution, Some("Resuming execution"))?;
        Ok(RecoveryOutcome {
            attempt,
            plan,
            skipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ScriptedAgentClient;
    use crate::session::Session;
    use agentflow_core::{PhaseAssignments, Requirement, WorkflowMode};

    fn failed(id: &str, error: &str) -> ActionUnit {
        let mut action = ActionUnit::new(id, "write_file", format!("Step {id}"));
        action.start().unwrap();
        action.fail(error, 3).unwrap();
        action
    }

    fn session() -> SessionStateMachine {
        let session = Session::new(Requirement::new("Fix", "Fix the build"), WorkflowMode::Speed)
            .with_assignments(PhaseAssignments::new("claude"));
        let machine = SessionStateMachine::new(session);
        machine.set_state(SessionState::Execution, None).unwrap();
        machine
    }

    #[test]
    fn test_snapshot_counts_and_preview() {
        let mut done = ActionUnit::new("a", "write_file", "Step a");
        done.start().unwrap();
        done.complete(None, 1).unwrap();
        let actions = vec![
            done,
            failed("b", "disk full"),
            ActionUnit::new("c", "write_file", "Step c"),
            ActionUnit::new("d", "write_file", "Step d"),
        ];

        let snapshot = RecoverySnapshot::capture(&actions, 1, 2, 1);

        assert_eq!((snapshot.completed, snapshot.failed, snapshot.pending), (1, 1, 2));
        assert_eq!(snapshot.failures[0].error, "disk full");
        assert_eq!(snapshot.upcoming, vec!["c: Step c"]);
        assert!(snapshot.to_prompt().contains("disk full"));
    }

    #[tokio::test]
    async fn test_attempt_skips_failed_actions() {
        let session = session();
        let mut actions = vec![failed("a", "boom"), ActionUnit::new("b", "write_file", "Step b")];
        let mut controller = RecoveryController::new(2);

        let outcome = controller.attempt(&mut actions, &session).await.unwrap();

        assert_eq!(outcome.attempt, 1);
        assert_eq!(outcome.skipped, vec!["a"]);
        assert_eq!(actions[0].status, ActionStatus::Skipped);
        assert_eq!(actions[0].error_message(), Some("boom"));
        assert_eq!(
            actions[0].result.as_ref().unwrap().skip_reason.as_deref(),
            Some("Skipped after recovery attempt 1: boom")
        );
        assert!(actions[1].is_pending());
        assert_eq!(session.state(), SessionState::Execution);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let session = session();
        let mut controller = RecoveryController::new(2);

        for _ in 0..2 {
            let mut actions = vec![failed("a", "boom")];
            controller.attempt(&mut actions, &session).await.unwrap();
        }

        assert!(!controller.can_attempt());
        let mut actions = vec![failed("a", "boom")];
        let err = controller.attempt(&mut actions, &session).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::RecoveryExhausted { attempts: 2 }));
        assert_eq!(actions[0].status, ActionStatus::Failed);
    }

    #[tokio::test]
    async fn test_agent_strategy_uses_recovery_agent() {
        let session = session();
        session.assign_agent(WorkflowPhase::Recovery, "fixer");
        let client = Arc::new(ScriptedAgentClient::new().with_response("Retry with a smaller diff"));
        let mut controller =
            RecoveryController::new(2).with_strategy(Arc::new(AgentRecoveryStrategy::new(client.clone())));

        let mut actions = vec![failed("a", "boom")];
        let outcome = controller.attempt(&mut actions, &session).await.unwrap();

        assert_eq!(outcome.plan.as_deref(), Some("Retry with a smaller diff"));
        assert_eq!(controller.plans().len(), 1);
        let requests = client.requests();
        assert_eq!(requests[0].agent, "fixer");
        assert!(requests[0].messages[1].content.contains("boom"));
    }

    #[tokio::test]
    async fn test_plan_failure_still_applies_fallback() {
        let session = session();
        let client = Arc::new(ScriptedAgentClient::new());
        let mut controller =
            RecoveryController::new(1).with_strategy(Arc::new(AgentRecoveryStrategy::new(client)));

        let mut actions = vec![failed("a", "boom")];
        let outcome = controller.attempt(&mut actions, &session).await.unwrap();

        assert!(outcome.plan.is_none());
        assert_eq!(actions[0].status, ActionStatus::Skipped);
    }
}
