//! Execution phase: run the planned actions in order.

use std::sync::Arc;

use agentflow_core::{ActionUnit, ErrorCode};
use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use super::artifacts;
use crate::error::{OrchestratorError, Result};
use crate::execution::{ActionHandler, ExecutionSummary, RecoveryStrategy, SequentialExecutor, SequentialOptions};
use crate::runner::{create_recoverable_error, PhaseRunner, RunnerHarness, RunnerResult};
use crate::services::{read_json, write_json, FileStore};

pub struct ExecutionRunner {
    files: Arc<dyn FileStore>,
    handler: Arc<dyn ActionHandler>,
    options: SequentialOptions,
    recovery_strategy: Option<Arc<dyn RecoveryStrategy>>,
    actions_path: String,
}

impl ExecutionRunner {
    pub fn new(files: Arc<dyn FileStore>, handler: Arc<dyn ActionHandler>) -> Self {
        Self {
            files,
            handler,
            options: SequentialOptions::default(),
            recovery_strategy: None,
            actions_path: artifacts::ACTIONS.to_string(),
        }
    }

    pub fn with_options(mut self, options: SequentialOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_recovery_strategy(mut self, strategy: Arc<dyn RecoveryStrategy>) -> Self {
        self.recovery_strategy = Some(strategy);
        self
    }

    /// Read the action list from `path` instead of the planning artifact.
    pub fn with_actions_path(mut self, path: impl Into<String>) -> Self {
        self.actions_path = path.into();
        self
    }

    async fn write_report(&self, summary: &ExecutionSummary) {
        if let Err(e) = write_json(self.files.as_ref(), artifacts::EXECUTION_REPORT, summary).await {
            warn!(error = %e, "Failed to write execution report");
        }
    }
}

#[async_trait]
impl PhaseRunner for ExecutionRunner {
    fn runner_name(&self) -> &str {
        "Execution"
    }

    async fn execute(&self, harness: &RunnerHarness) -> Result<RunnerResult> {
        let session = harness.session();
        let actions: Vec<ActionUnit> = read_json(self.files.as_ref(), &self.actions_path)
            .await
            .map_err(|e| OrchestratorError::Validation(format!("Cannot load actions from {}: {e}", self.actions_path)))?;

        if actions.is_empty() {
            return Ok(RunnerResult::success(Some(json!({ "summary": "No actions to execute" }))));
        }

        let mut executor = SequentialExecutor::new(actions, self.handler.clone(), self.options);
        if let Some(strategy) = &self.recovery_strategy {
            executor = executor.with_recovery_strategy(strategy.clone());
        }

        let outcome = executor.execute(session).await;
        if let Some(summary) = executor.summary() {
            self.write_report(summary).await;
        }
        let summary = outcome?;

        let data = json!({
            "summary": format!(
                "{} of {} actions completed, {} skipped",
                summary.completed_actions, summary.total_actions, summary.skipped_actions
            ),
            "reportPath": artifacts::EXECUTION_REPORT,
            "execution": summary,
        });

        if summary.failed_actions > 0 {
            let error = create_recoverable_error(
                ErrorCode::Execution,
                format!("{} of {} actions failed", summary.failed_actions, summary.total_actions),
            )
            .with_context(json!({ "reportPath": artifacts::EXECUTION_REPORT }));
            return Ok(RunnerResult {
                data: Some(data),
                ..RunnerResult::failure(error)
            });
        }

        info!(
            session_id = %session.id(),
            completed = summary.completed_actions,
            skipped = summary.skipped_actions,
            "Execution phase finished"
        );
        Ok(RunnerResult::success(Some(data)))
    }
}
