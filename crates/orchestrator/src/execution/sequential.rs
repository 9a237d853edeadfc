//! Strictly ordered execution of action units with dependency checks and
//! bounded recovery.

use std::sync::Arc;
use std::time::Instant;

use agentflow_core::{ActionStatus, ActionUnit};
use events::Event;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::handler::ActionHandler;
use super::recovery::{
    RecoveryController, RecoveryStrategy, DEFAULT_MAX_RECOVERY_ATTEMPTS, DEFAULT_PENDING_PREVIEW_LIMIT,
};
use crate::config::RecoveryConfig;
use crate::error::{OrchestratorError, Result};
use crate::session::{ProgressOptions, SessionStateMachine};

pub const DEPENDENCIES_NOT_SATISFIED: &str = "Dependencies not satisfied";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequentialOptions {
    pub continue_on_error: bool,
    pub enable_recovery: bool,
    pub max_recovery_attempts: u32,
    pub pending_preview_limit: usize,
}

impl Default for SequentialOptions {
    fn default() -> Self {
        Self {
            continue_on_error: true,
            enable_recovery: false,
            max_recovery_attempts: DEFAULT_MAX_RECOVERY_ATTEMPTS,
            pending_preview_limit: DEFAULT_PENDING_PREVIEW_LIMIT,
        }
    }
}

impl From<&RecoveryConfig> for SequentialOptions {
    fn from(config: &RecoveryConfig) -> Self {
        Self {
            continue_on_error: config.continue_on_error,
            enable_recovery: config.enabled,
            max_recovery_attempts: config.max_attempts,
            pending_preview_limit: config.pending_preview_limit,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub total_actions: usize,
    pub completed_actions: usize,
    pub failed_actions: usize,
    pub skipped_actions: usize,
    pub pending_actions: usize,
    pub recovery_attempts: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recovery_plans: Vec<String>,
    pub success: bool,
    pub duration_ms: u64,
    pub actions: Vec<ActionUnit>,
}

impl ExecutionSummary {
    fn from_actions(actions: &[ActionUnit], recovery: &RecoveryController, duration_ms: u64) -> Self {
        let count = |status: ActionStatus| actions.iter().filter(|a| a.status == status).count();
        let failed_actions = count(ActionStatus::Failed);
        let pending_actions = count(ActionStatus::Pending);
        Self {
            total_actions: actions.len(),
            completed_actions: count(ActionStatus::Completed),
            failed_actions,
            skipped_actions: count(ActionStatus::Skipped),
            pending_actions,
            recovery_attempts: recovery.attempts(),
            recovery_plans: recovery.plans().to_vec(),
            success: failed_actions == 0 && pending_actions == 0,
            duration_ms,
            actions: actions.to_vec(),
        }
    }
}

/// True when every dependency names a completed action. An empty dependency
/// list is always satisfied; unknown ids never are.
pub fn are_dependencies_satisfied(action: &ActionUnit, actions: &[ActionUnit]) -> bool {
    action.dependencies.iter().all(|dep| {
        actions
            .iter()
            .any(|a| &a.id == dep && a.status == ActionStatus::Completed)
    })
}

pub struct SequentialExecutor {
    actions: Vec<ActionUnit>,
    handler: Arc<dyn ActionHandler>,
    options: SequentialOptions,
    recovery: RecoveryController,
    summary: Option<ExecutionSummary>,
}

impl SequentialExecutor {
    pub fn new(actions: Vec<ActionUnit>, handler: Arc<dyn ActionHandler>, options: SequentialOptions) -> Self {
        let recovery = RecoveryController::new(options.max_recovery_attempts)
            .with_preview_limit(options.pending_preview_limit);
        Self {
            actions,
            handler,
            options,
            recovery,
            summary: None,
        }
    }

    pub fn with_recovery_strategy(mut self, strategy: Arc<dyn RecoveryStrategy>) -> Self {
        self.recovery = self.recovery.with_strategy(strategy);
        self
    }

    pub fn actions(&self) -> &[ActionUnit] {
        &self.actions
    }

    /// Summary of the last run, also available after an error.
    pub fn summary(&self) -> Option<&ExecutionSummary> {
        self.summary.as_ref()
    }

    pub fn recovery_attempts(&self) -> u32 {
        self.recovery.attempts()
    }

    /// Run every pending action in list order.
    ///
    /// Per-action failures are recorded on the action. The run itself fails
    /// only on cancellation or when a failure arrives after the recovery
    /// budget is spent.
    pub async fn execute(&mut self, session: &SessionStateMachine) -> Result<ExecutionSummary> {
        let started = Instant::now();
        let result = self.run_actions(session).await;

        let summary = ExecutionSummary::from_actions(
            &self.actions,
            &self.recovery,
            started.elapsed().as_millis() as u64,
        );
        info!(
            session_id = %session.id(),
            total = summary.total_actions,
            completed = summary.completed_actions,
            failed = summary.failed_actions,
            skipped = summary.skipped_actions,
            recovery_attempts = summary.recovery_attempts,
            "Sequential execution finished"
        );
        self.summary = Some(summary.clone());

        result.map(|_| summary)
    }

    async fn run_actions(&mut self, session: &SessionStateMachine) -> Result<()> {
        let total = self.actions.len();
        let step = if total == 0 { 0.0 } else { 100.0 / total as f64 };

        for index in 0..total {
            session.check_cancellation()?;

            if !self.actions[index].is_pending() {
                continue;
            }

            if !are_dependencies_satisfied(&self.actions[index], &self.actions) {
                let action = &mut self.actions[index];
                debug!(session_id = %session.id(), action_id = %action.id, "Dependencies not satisfied, skipping");
                action.skip(DEPENDENCIES_NOT_SATISFIED)?;
                publish_status(session, action);
                continue;
            }

            let succeeded = self.run_action(index, session).await?;
            session.report_progress(
                format!("{}/{}: {}", index + 1, total, self.actions[index].description),
                Some(step),
                ProgressOptions::default(),
            );

            if succeeded {
                continue;
            }

            if self.options.enable_recovery {
                if !self.recovery.can_attempt() {
                    warn!(
                        session_id = %session.id(),
                        attempts = self.recovery.attempts(),
                        "Recovery budget exhausted"
                    );
                    return Err(OrchestratorError::RecoveryExhausted {
                        attempts: self.recovery.attempts(),
                    });
                }
                self.recovery.attempt(&mut self.actions, session).await?;
            } else if !self.options.continue_on_error {
                info!(session_id = %session.id(), "Stopping after failed action");
                break;
            }
        }
        Ok(())
    }

    /// Execute one action. Returns whether it completed.
    async fn run_action(&mut self, index: usize, session: &SessionStateMachine) -> Result<bool> {
        self.actions[index].start()?;
        publish_status(session, &self.actions[index]);

        let handler = self.handler.clone();
        let token = session.cancellation_token();
        let started = Instant::now();
        let outcome = tokio::select! {
            result = handler.execute_action(&self.actions[index], session) => result,
            _ = token.cancelled() => Err(OrchestratorError::Cancelled("Action cancelled".to_string())),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let action = &mut self.actions[index];
        let succeeded = match outcome {
            Ok(output) => {
                action.complete(output, duration_ms)?;
                true
            }
            Err(e) => {
                warn!(session_id = %session.id(), action_id = %action.id, error = %e, "Action failed");
                action.fail(e.to_string(), duration_ms)?;
                if matches!(e, OrchestratorError::Cancelled(_)) {
                    publish_status(session, action);
                    return Err(e);
                }
                false
            }
        };
        publish_status(session, action);
        Ok(succeeded)
    }
}

fn publish_status(session: &SessionStateMachine, action: &ActionUnit) {
    session.publish(Event::ActionStatusChanged {
        session_id: session.id(),
        action_id: action.id.clone(),
        status: action.status,
    });
}
