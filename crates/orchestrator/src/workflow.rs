//! Drives a session through the phases of its workflow mode.

use std::collections::HashMap;
use std::sync::Arc;

use agentflow_core::{SessionState, StructuredError, WorkflowPhase};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{OrchestratorConfig, PhaseTimeouts};
use crate::runner::{PhaseRunner, RecoveryChoice, RunnerHarness, RunnerResult};
use crate::session::SessionStateMachine;
use crate::tools::ToolManager;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkflowOutcome {
    Completed,
    Cancelled,
    Aborted { phase: WorkflowPhase },
    /// A phase gate was refused
    Rejected { phase: WorkflowPhase },
    NeedsReconfiguration { phase: WorkflowPhase },
}

impl WorkflowOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseReport {
    pub phase: WorkflowPhase,
    pub success: bool,
    pub skipped: bool,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StructuredError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl PhaseReport {
    fn from_result(phase: WorkflowPhase, attempts: u32, result: &RunnerResult, skipped: bool) -> Self {
        Self {
            phase,
            success: result.success,
            skipped,
            attempts,
            error: result.error.clone(),
            data: result.data.clone(),
            duration_ms: result.duration_ms(),
        }
    }

    fn summary(&self) -> String {
        self.data
            .as_ref()
            .and_then(|d| d.get("summary"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} finished", self.phase))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowReport {
    pub session_id: Uuid,
    pub outcome: WorkflowOutcome,
    pub final_state: SessionState,
    pub phases: Vec<PhaseReport>,
}

enum PhaseStep {
    Continue,
    Stop(WorkflowOutcome),
}

pub struct Workflow {
    harness: RunnerHarness,
    runners: HashMap<WorkflowPhase, Arc<dyn PhaseRunner>>,
    timeouts: PhaseTimeouts,
    max_phase_retries: u32,
}

impl Workflow {
    pub fn new(harness: RunnerHarness) -> Self {
        Self {
            harness,
            runners: HashMap::new(),
            timeouts: PhaseTimeouts::default(),
            max_phase_retries: 1,
        }
    }

    /// Apply the timeouts and retry budget from `config`.
    pub fn configure(mut self, config: &OrchestratorConfig) -> Self {
        self.timeouts = config.timeouts.clone();
        self.max_phase_retries = config.max_phase_retries;
        self
    }

    pub fn with_runner(mut self, phase: WorkflowPhase, runner: Arc<dyn PhaseRunner>) -> Self {
        self.runners.insert(phase, runner);
        self
    }

    /// Pipeline whose per-session state is released when the session is disposed.
    pub fn with_tools(self, tools: Arc<ToolManager>) -> Self {
        tools.attach_session(self.session());
        self
    }

    pub fn with_timeouts(mut self, timeouts: PhaseTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_max_phase_retries(mut self, retries: u32) -> Self {
        self.max_phase_retries = retries;
        self
    }

    pub fn session(&self) -> &Arc<SessionStateMachine> {
        self.harness.session()
    }

    pub fn harness(&self) -> &RunnerHarness {
        &self.harness
    }

    /// Run every phase with a registered runner, in mode order.
    pub async fn run(&self) -> WorkflowReport {
        let session = self.session().clone();
        let mode = session.session().mode;
        info!(session_id = %session.id(), mode = mode.as_str(), "Workflow started");

        let mut phases = Vec::new();
        let outcome = self.run_phases(&mut phases).await;

        match &outcome {
            WorkflowOutcome::Completed => {
                if let Err(e) = session.complete() {
                    warn!(session_id = %session.id(), error = %e, "Could not complete session");
                    session.error(format!("Could not complete session: {e}"), None);
                }
            }
            WorkflowOutcome::Rejected { phase } => {
                session.error(format!("{phase} was not approved"), None);
            }
            WorkflowOutcome::Aborted { phase } | WorkflowOutcome::NeedsReconfiguration { phase } => {
                if session.state() != SessionState::Error {
                    session.error(format!("{phase} aborted"), None);
                }
            }
            WorkflowOutcome::Cancelled => {}
        }

        let final_state = session.state();
        info!(session_id = %session.id(), outcome = ?outcome, state = %final_state, "Workflow finished");

        session.dispose();

        WorkflowReport {
            session_id: session.id(),
            outcome,
            final_state,
            phases,
        }
    }

    async fn run_phases(&self, reports: &mut Vec<PhaseReport>) -> WorkflowOutcome {
        let session = self.session();
        let mode = session.session().mode;

        for &phase in mode.phases() {
            let Some(runner) = self.runners.get(&phase).cloned() else {
                debug!(session_id = %session.id(), phase = %phase, "No runner registered, skipping phase");
                continue;
            };

            match self.run_phase(phase, runner.as_ref(), reports).await {
                PhaseStep::Continue => {}
                PhaseStep::Stop(outcome) => return outcome,
            }
        }

        WorkflowOutcome::Completed
    }

    async fn run_phase(
        &self,
        phase: WorkflowPhase,
        runner: &dyn PhaseRunner,
        reports: &mut Vec<PhaseReport>,
    ) -> PhaseStep {
        let session = self.session();
        let mut attempts = 0;

        let report = loop {
            if session.is_cancelled() {
                return PhaseStep::Stop(WorkflowOutcome::Cancelled);
            }

            attempts += 1;
            session.set_phase(phase);
            let message = if attempts == 1 {
                format!("Running {phase}")
            } else {
                format!("Retrying {phase} (attempt {attempts})")
            };
            if let Err(e) = session.set_state(phase.active_state(), Some(&message)) {
                session.error(e.to_string(), None);
                return PhaseStep::Stop(WorkflowOutcome::Aborted { phase });
            }

            let result = self.harness.run(runner, self.timeouts.for_phase(phase)).await;
            if result.success {
                break PhaseReport::from_result(phase, attempts, &result, false);
            }
            if session.is_cancelled() {
                reports.push(PhaseReport::from_result(phase, attempts, &result, false));
                return PhaseStep::Stop(WorkflowOutcome::Cancelled);
            }

            let choice = result.recovery_choice().unwrap_or(RecoveryChoice::Abort);
            info!(session_id = %session.id(), phase = %phase, choice = choice.as_str(), attempts, "Phase failed");
            match choice {
                RecoveryChoice::Retry if attempts <= self.max_phase_retries => {
                    session.clear_error();
                    continue;
                }
                RecoveryChoice::Retry => {
                    warn!(session_id = %session.id(), phase = %phase, attempts, "Retry budget exhausted");
                    reports.push(PhaseReport::from_result(phase, attempts, &result, false));
                    return PhaseStep::Stop(WorkflowOutcome::Aborted { phase });
                }
                RecoveryChoice::Skip => {
                    session.clear_error();
                    reports.push(PhaseReport::from_result(phase, attempts, &result, true));
                    return PhaseStep::Continue;
                }
                RecoveryChoice::Reconfigure => {
                    reports.push(PhaseReport::from_result(phase, attempts, &result, false));
                    return PhaseStep::Stop(WorkflowOutcome::NeedsReconfiguration { phase });
                }
                RecoveryChoice::Abort => {
                    reports.push(PhaseReport::from_result(phase, attempts, &result, false));
                    return PhaseStep::Stop(WorkflowOutcome::Aborted { phase });
                }
            }
        };

        let summary = report.summary();
        reports.push(report);
        self.gate(phase, &summary).await
    }

    /// Park in the phase's approval state until the operator decides.
    async fn gate(&self, phase: WorkflowPhase, summary: &str) -> PhaseStep {
        let session = self.session();
        let mode = session.session().mode;
        let Some(approval_state) = phase.approval_state().filter(|_| mode.gates_phases()) else {
            return PhaseStep::Continue;
        };

        if let Err(e) = session.set_state(approval_state, Some(&format!("Awaiting approval: {summary}"))) {
            session.error(e.to_string(), None);
            return PhaseStep::Stop(WorkflowOutcome::Aborted { phase });
        }

        let approved = self.harness.interaction().approve_phase(phase, summary).await;
        if session.is_cancelled() {
            return PhaseStep::Stop(WorkflowOutcome::Cancelled);
        }
        if !approved {
            info!(session_id = %session.id(), phase = %phase, "Phase result rejected");
            return PhaseStep::Stop(WorkflowOutcome::Rejected { phase });
        }
        PhaseStep::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{OrchestratorError, Result};
    use crate::services::ScriptedInteraction;
    use crate::session::{Session, TransitionPolicy};
    use agentflow_core::{Requirement, WorkflowMode};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;

    /// Replays a queue of outcomes; succeeds once the queue is empty.
    struct QueuedRunner {
        name: &'static str,
        outcomes: Mutex<VecDeque<bool>>,
        runs: Mutex<u32>,
    }

    impl QueuedRunner {
        fn new(name: &'static str, outcomes: &[bool]) -> Arc<Self> {
            Arc::new(Self {
                name,
                outcomes: Mutex::new(outcomes.iter().copied().collect()),
                runs: Mutex::new(0),
            })
        }

        fn runs(&self) -> u32 {
            *self.runs.lock()
        }
    }

    #[async_trait]
    impl PhaseRunner for QueuedRunner {
        fn runner_name(&self) -> &str {
            self.name
        }

        async fn execute(&self, _harness: &RunnerHarness) -> Result<RunnerResult> {
            *self.runs.lock() += 1;
            let ok = self.outcomes.lock().pop_front().unwrap_or(true);
            if ok {
                Ok(RunnerResult::success(Some(json!({ "summary": format!("{} done", self.name) }))))
            } else {
                Err(OrchestratorError::ExecutionFailed(format!("{} broke", self.name)))
            }
        }
    }

    fn session(mode: WorkflowMode) -> Arc<SessionStateMachine> {
        Arc::new(
            SessionStateMachine::new(Session::new(Requirement::new("Feature", "Build it"), mode))
                .with_policy(TransitionPolicy::Strict),
        )
    }

    #[tokio::test]
    async fn test_speed_mode_runs_phases_in_order() {
        let session = session(WorkflowMode::Speed);
        let planning = QueuedRunner::new("Planning", &[]);
        let execution = QueuedRunner::new("Execution", &[]);
        let review = QueuedRunner::new("Review", &[]);

        let workflow = Workflow::new(RunnerHarness::headless(session.clone()))
            .with_runner(WorkflowPhase::Execution, execution.clone())
            .with_runner(WorkflowPhase::Planning, planning.clone())
            .with_runner(WorkflowPhase::Review, review.clone());

        let report = workflow.run().await;

        assert_eq!(report.outcome, WorkflowOutcome::Completed);
        assert_eq!(report.final_state, SessionState::Completed);
        let phases: Vec<WorkflowPhase> = report.phases.iter().map(|p| p.phase).collect();
        assert_eq!(phases, vec![WorkflowPhase::Planning, WorkflowPhase::Execution]);
        assert_eq!(review.runs(), 0);
        assert!(session.is_disposed());
    }

    #[tokio::test]
    async fn test_structured_mode_gates_each_phase() {
        let session = session(WorkflowMode::Structured);
        let interaction = Arc::new(ScriptedInteraction::new());
        let harness = RunnerHarness::new(session.clone(), interaction.clone());

        let workflow = Workflow::new(harness)
            .with_runner(WorkflowPhase::Planning, QueuedRunner::new("Planning", &[]))
            .with_runner(WorkflowPhase::Review, QueuedRunner::new("Review", &[]))
            .with_runner(WorkflowPhase::Execution, QueuedRunner::new("Execution", &[]));

        let report = workflow.run().await;

        assert!(report.outcome.is_completed());
        assert_eq!(
            interaction.approvals_requested(),
            vec![WorkflowPhase::Planning, WorkflowPhase::Review, WorkflowPhase::Execution]
        );
    }

    #[tokio::test]
    async fn test_rejected_gate_stops_workflow() {
        let session = session(WorkflowMode::Structured);
        let interaction = Arc::new(ScriptedInteraction::new().with_approval(false));
        let execution = QueuedRunner::new("Execution", &[]);

        let workflow = Workflow::new(RunnerHarness::new(session.clone(), interaction))
            .with_runner(WorkflowPhase::Planning, QueuedRunner::new("Planning", &[]))
            .with_runner(WorkflowPhase::Execution, execution.clone());

        let report = workflow.run().await;

        assert_eq!(report.outcome, WorkflowOutcome::Rejected { phase: WorkflowPhase::Planning });
        assert_eq!(report.final_state, SessionState::Error);
        assert_eq!(execution.runs(), 0);
    }

    #[tokio::test]
    async fn test_retry_is_bounded() {
        let session = session(WorkflowMode::Speed);
        let interaction = Arc::new(
            ScriptedInteraction::new()
                .with_choice(RecoveryChoice::Retry)
                .with_choice(RecoveryChoice::Retry),
        );
        let planning = QueuedRunner::new("Planning", &[false, false, false]);

        let workflow = Workflow::new(RunnerHarness::new(session.clone(), interaction))
            .with_runner(WorkflowPhase::Planning, planning.clone())
            .with_max_phase_retries(1);

        let report = workflow.run().await;

        assert_eq!(report.outcome, WorkflowOutcome::Aborted { phase: WorkflowPhase::Planning });
        assert_eq!(planning.runs(), 2);
        assert_eq!(report.phases[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let session = session(WorkflowMode::Speed);
        let interaction = Arc::new(ScriptedInteraction::new().with_choice(RecoveryChoice::Retry));
        let planning = QueuedRunner::new("Planning", &[false]);

        let workflow = Workflow::new(RunnerHarness::new(session.clone(), interaction))
            .with_runner(WorkflowPhase::Planning, planning.clone())
            .with_runner(WorkflowPhase::Execution, QueuedRunner::new("Execution", &[]));

        let report = workflow.run().await;

        assert!(report.outcome.is_completed());
        assert_eq!(report.final_state, SessionState::Completed);
        assert_eq!(planning.runs(), 2);
        assert!(session.last_error().is_none());
    }

    #[tokio::test]
    async fn test_skip_moves_to_next_phase() {
        let session = session(WorkflowMode::Speed);
        let interaction = Arc::new(ScriptedInteraction::new().with_choice(RecoveryChoice::Skip));
        let execution = QueuedRunner::new("Execution", &[]);

        let workflow = Workflow::new(RunnerHarness::new(session.clone(), interaction))
            .with_runner(WorkflowPhase::Planning, QueuedRunner::new("Planning", &[false]))
            .with_runner(WorkflowPhase::Execution, execution.clone());

        let report = workflow.run().await;

        assert!(report.outcome.is_completed());
        assert!(report.phases[0].skipped);
        assert_eq!(execution.runs(), 1);
    }

    #[tokio::test]
    async fn test_headless_failure_aborts() {
        let session = session(WorkflowMode::Speed);
        let workflow = Workflow::new(RunnerHarness::headless(session.clone()))
            .with_runner(WorkflowPhase::Planning, QueuedRunner::new("Planning", &[false]));

        let report = workflow.run().await;

        assert_eq!(report.outcome, WorkflowOutcome::Aborted { phase: WorkflowPhase::Planning });
        assert_eq!(report.final_state, SessionState::Error);
        assert!(session.last_error().unwrap().message.contains("Planning broke"));
    }

    #[tokio::test]
    async fn test_reconfigure_choice() {
        let session = session(WorkflowMode::Speed);
        let interaction = Arc::new(ScriptedInteraction::new().with_choice(RecoveryChoice::Reconfigure));
        let workflow = Workflow::new(RunnerHarness::new(session, interaction))
            .with_runner(WorkflowPhase::Planning, QueuedRunner::new("Planning", &[false]));

        let report = workflow.run().await;
        assert_eq!(
            report.outcome,
            WorkflowOutcome::NeedsReconfiguration { phase: WorkflowPhase::Planning }
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_run() {
        let session = session(WorkflowMode::Speed);
        session.cancel();
        let planning = QueuedRunner::new("Planning", &[]);
        let workflow = Workflow::new(RunnerHarness::headless(session))
            .with_runner(WorkflowPhase::Planning, planning.clone());

        let report = workflow.run().await;

        assert_eq!(report.outcome, WorkflowOutcome::Cancelled);
        assert_eq!(report.final_state, SessionState::Cancelled);
        assert_eq!(planning.runs(), 0);
    }

    #[test]
    fn test_outcome_serialization() {
        let value = serde_json::to_value(WorkflowOutcome::Aborted { phase: WorkflowPhase::Execution }).unwrap();
        assert_eq!(value, json!({ "status": "aborted", "phase": "execution" }));
    }
}
