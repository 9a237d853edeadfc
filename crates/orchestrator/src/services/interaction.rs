//! Human-in-the-loop decisions requested by the harness and the workflow.

use std::collections::VecDeque;
use std::time::Duration;

use agentflow_core::{StructuredError, WorkflowPhase};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::runner::RecoveryChoice;

#[async_trait]
pub trait InteractionHandler: Send + Sync {
    /// Whether to give `runner` one more window of `window` after a timeout.
    async fn confirm_extension(&self, runner: &str, window: Duration) -> bool;

    async fn choose_recovery(&self, runner: &str, error: &StructuredError) -> RecoveryChoice;

    /// Gate between phases of a structured workflow.
    async fn approve_phase(&self, phase: WorkflowPhase, summary: &str) -> bool;
}

/// Never prompts: refuses extensions, aborts on errors, approves gates.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessInteraction;

#[async_trait]
impl InteractionHandler for HeadlessInteraction {
    async fn confirm_extension(&self, runner: &str, _window: Duration) -> bool {
        debug!(runner, "Headless mode, refusing timeout extension");
        false
    }

    async fn choose_recovery(&self, runner: &str, _error: &StructuredError) -> RecoveryChoice {
        debug!(runner, "Headless mode, aborting");
        RecoveryChoice::Abort
    }

    async fn approve_phase(&self, _phase: WorkflowPhase, _summary: &str) -> bool {
        true
    }
}

/// Replays queued answers, falling back to headless behaviour once a queue
/// runs dry. Records every phase summary it was asked to approve.
#[derive(Debug, Default)]
pub struct ScriptedInteraction {
    extensions: Mutex<VecDeque<bool>>,
    choices: Mutex<VecDeque<RecoveryChoice>>,
    approvals: Mutex<VecDeque<bool>>,
    asked: Mutex<Vec<WorkflowPhase>>,
}

impl ScriptedInteraction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extension(self, answer: bool) -> Self {
        self.extensions.lock().push_back(answer);
        self
    }

    pub fn with_choice(self, choice: RecoveryChoice) -> Self {
        self.choices.lock().push_back(choice);
        self
    }

    pub fn with_approval(self, approved: bool) -> Self {
        self.approvals.lock().push_back(approved);
        self
    }

    pub fn approvals_requested(&self) -> Vec<WorkflowPhase> {
        self.asked.lock().clone()
    }
}

#[async_trait]
impl InteractionHandler for ScriptedInteraction {
    async fn confirm_extension(&self, _runner: &str, _window: Duration) -> bool {
        self.extensions.lock().pop_front().unwrap_or(false)
    }

    async fn choose_recovery(&self, _runner: &str, _error: &StructuredError) -> RecoveryChoice {
        self.choices
            .lock()
            .pop_front()
            .unwrap_or(RecoveryChoice::Abort)
    }

    async fn approve_phase(&self, phase: WorkflowPhase, _summary: &str) -> bool {
        self.asked.lock().push(phase);
        self.approvals.lock().pop_front().unwrap_or(true)
    }
}
