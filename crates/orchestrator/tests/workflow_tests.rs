use std::sync::Arc;
use std::time::Duration;

use agentflow_core::{
    ActionStatus, ActionUnit, ErrorCode, PhaseAssignments, Requirement, SessionState, WorkflowMode,
    WorkflowPhase,
};
use async_trait::async_trait;
use events::{Event, EventBus};
use orchestrator::execution::{ActionHandler, RecoverySnapshot, RecoveryStrategy, ToolActionHandler};
use orchestrator::phases::{artifacts, ExecutionRunner, PlanningRunner, ReviewRunner};
use orchestrator::services::{write_json, MemoryFileStore, ScriptedAgentClient, ScriptedInteraction};
use orchestrator::tools::{
    ApprovalDecision, ParameterSchema, ParameterType, RiskAssessor, RiskLevel, StaticApprovalPrompt,
    ToolSecurity,
};
use orchestrator::{
    are_dependencies_satisfied, ExecutionContext, OrchestratorError, PhaseRunner, Result, RunnerHarness,
    RunnerResult, SequentialExecutor, SequentialOptions, Session, SessionStateMachine, TimeoutOptions,
    ToolDefinition, ToolManager, ToolRegistry, TransitionPolicy, Workflow, WorkflowOutcome,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use uuid::Uuid;

fn session(mode: WorkflowMode) -> Arc<SessionStateMachine> {
    let session = Session::new(Requirement::new("Greeting", "Add a hello module"), mode)
        .with_assignments(PhaseAssignments::new("agent"));
    Arc::new(SessionStateMachine::new(session))
}

async fn echo(params: Value) -> Result<Value> {
    Ok(params)
}

fn gated_tool() -> ToolDefinition {
    ToolDefinition::new("touch", "Touch a file", |p, _c| echo(p))
        .with_parameters(ParameterSchema::new().required("path", ParameterType::String, "Path"))
        .with_security(ToolSecurity::new(RiskLevel::Medium).requires_approval())
}

#[tokio::test]
async fn audit_log_never_exceeds_capacity() {
    let mut registry = ToolRegistry::new();
    registry.register_tool(ToolDefinition::new("echo", "Echo", |p, _c| echo(p)));
    let manager = ToolManager::new(registry, Arc::new(StaticApprovalPrompt::allow())).with_log_capacity(3);
    let context = ExecutionContext::new("agent", Uuid::new_v4());

    for i in 0..5 {
        manager
            .execute_tool("echo", json!({ "n": i }), &context)
            .await
            .unwrap();
    }

    let log = manager.audit_log();
    assert_eq!(log.len(), 3);
    assert!(log[0].args_preview.contains('2'));
    assert!(log[2].args_preview.contains('4'));
}

#[tokio::test]
async fn always_allow_skips_prompt_for_rest_of_session() {
    let mut registry = ToolRegistry::new();
    registry.register_tool(gated_tool());
    let prompt = Arc::new(StaticApprovalPrompt::new(ApprovalDecision::AlwaysAllow));
    let manager = ToolManager::new(registry, prompt.clone());
    let context = ExecutionContext::new("agent", Uuid::new_v4());

    for _ in 0..3 {
        manager
            .execute_tool("touch", json!({ "path": "a.txt" }), &context)
            .await
            .unwrap();
    }
    assert_eq!(prompt.ask_count(), 1);

    let other_session = ExecutionContext::new("agent", Uuid::new_v4());
    manager
        .execute_tool("touch", json!({ "path": "a.txt" }), &other_session)
        .await
        .unwrap();
    assert_eq!(prompt.ask_count(), 2);

    manager.dispose_session(context.session_id);
    manager
        .execute_tool("touch", json!({ "path": "a.txt" }), &context)
        .await
        .unwrap();
    assert_eq!(prompt.ask_count(), 3);
}

#[test]
fn dependencies_satisfied_only_by_completed_units() {
    let mut a = ActionUnit::new("A", "touch", "First");
    let b = ActionUnit::new("B", "touch", "Second").depends_on("A");

    assert!(are_dependencies_satisfied(&a, &[a.clone(), b.clone()]));
    assert!(!are_dependencies_satisfied(&b, &[a.clone(), b.clone()]));

    a.start().unwrap();
    a.complete(None, 0).unwrap();
    assert!(are_dependencies_satisfied(&b, &[a, b.clone()]));
}

#[test]
fn risk_score_bounds() {
    let assessor = RiskAssessor;
    let context = ExecutionContext::new("agent", Uuid::new_v4());

    let low = ToolDefinition::new("look", "Look", |p, _c| echo(p))
        .with_security(ToolSecurity::new(RiskLevel::Low));
    assert_eq!(assessor.assess_tool_risk(&low, &json!({ "query": "hello" }), &context).score, 10);

    let high = ToolDefinition::new("shell", "Shell", |p, _c| echo(p))
        .with_security(ToolSecurity::new(RiskLevel::High));
    let risk = assessor.assess_tool_risk(&high, &json!({ "command": "rm -rf build" }), &context);
    assert_eq!(risk.score, 100);
    assert!(risk.factors.contains(&"destructive_operation".to_string()));
}

struct SlowRunner {
    delay: Duration,
}

#[async_trait]
impl PhaseRunner for SlowRunner {
    fn runner_name(&self) -> &str {
        "Slow"
    }

    async fn execute(&self, _harness: &RunnerHarness) -> Result<RunnerResult> {
        tokio::time::sleep(self.delay).await;
        Ok(RunnerResult::success(None))
    }
}

#[tokio::test(start_paused = true)]
async fn timeout_without_extension_fails() {
    let harness = RunnerHarness::headless(session(WorkflowMode::Speed));
    let runner = SlowRunner {
        delay: Duration::from_secs(10),
    };

    let result = harness
        .run(&runner, Some(TimeoutOptions::new(Duration::from_secs(1))))
        .await;

    assert!(!result.success);
    assert!(result.error_message().unwrap().contains("timed out"));
}

struct CancellingRunner;

#[async_trait]
impl PhaseRunner for CancellingRunner {
    fn runner_name(&self) -> &str {
        "Cancelling"
    }

    async fn execute(&self, harness: &RunnerHarness) -> Result<RunnerResult> {
        harness.session().cancel();
        Ok(RunnerResult::success(Some(json!("would have worked"))))
    }
}

#[tokio::test]
async fn cancellation_wins_over_success() {
    let session = session(WorkflowMode::Speed);
    let harness = RunnerHarness::headless(session.clone());

    let result = harness.run(&CancellingRunner, None).await;
    assert!(!result.success);
    assert!(result.error_message().unwrap().contains("cancelled during execution"));

    let result = harness.run(&CancellingRunner, None).await;
    assert!(result.error_message().unwrap().contains("cancelled before execution"));
    assert_eq!(session.state(), SessionState::Cancelled);
}

struct FailIds(&'static [&'static str]);

#[async_trait]
impl ActionHandler for FailIds {
    async fn execute_action(&self, action: &ActionUnit, _session: &SessionStateMachine) -> Result<Option<Value>> {
        if self.0.contains(&action.id.as_str()) {
            Err(OrchestratorError::ExecutionFailed(format!("{} failed", action.id)))
        } else {
            Ok(None)
        }
    }
}

#[tokio::test]
async fn failed_root_skips_dependent_chain() {
    let actions = vec![
        ActionUnit::new("A", "touch", "First"),
        ActionUnit::new("B", "touch", "Second").depends_on("A"),
        ActionUnit::new("C", "touch", "Third").depends_on("B"),
    ];
    let mut executor = SequentialExecutor::new(actions, Arc::new(FailIds(&["A"])), SequentialOptions::default());

    let summary = executor.execute(&session(WorkflowMode::Speed)).await.unwrap();

    assert_eq!(summary.failed_actions, 1);
    assert_eq!(summary.skipped_actions, 2);
    assert_eq!(summary.completed_actions, 0);
    assert_eq!(summary.actions[2].status, ActionStatus::Skipped);
}

#[tokio::test]
async fn strict_policy_runs_prepared_action_list() {
    let files = Arc::new(MemoryFileStore::new());
    let plan = vec![
        ActionUnit::new("A", "touch", "First"),
        ActionUnit::new("B", "touch", "Second").depends_on("A"),
    ];
    write_json(files.as_ref(), artifacts::ACTIONS, &plan).await.unwrap();

    let session = Session::new(Requirement::new("Prepared", "Run a saved plan"), WorkflowMode::Structured)
        .with_assignments(PhaseAssignments::new("agent"));
    let session = Arc::new(SessionStateMachine::new(session).with_policy(TransitionPolicy::Strict));

    let workflow = Workflow::new(RunnerHarness::headless(session.clone())).with_runner(
        WorkflowPhase::Execution,
        Arc::new(ExecutionRunner::new(files, Arc::new(FailIds(&[])))),
    );

    let report = workflow.run().await;

    assert_eq!(report.outcome, WorkflowOutcome::Completed);
    assert_eq!(report.final_state, SessionState::Completed);
    assert_eq!(report.phases.len(), 1);
    assert_eq!(report.phases[0].data.as_ref().unwrap()["execution"]["completedActions"], 2);
}

#[derive(Default)]
struct RecordingStrategy {
    attempts: Mutex<Vec<u32>>,
}

#[async_trait]
impl RecoveryStrategy for RecordingStrategy {
    async fn request_plan(&self, snapshot: &RecoverySnapshot, _session: &SessionStateMachine) -> Result<String> {
        self.attempts.lock().push(snapshot.attempt);
        Ok("skip it".to_string())
    }
}

#[tokio::test]
async fn third_failure_escalates_to_default_handler() {
    let files = Arc::new(MemoryFileStore::new());
    let plan: Vec<ActionUnit> = ["A", "B", "C", "D"]
        .iter()
        .map(|id| ActionUnit::new(*id, "touch", format!("Step {id}")))
        .collect();
    write_json(files.as_ref(), artifacts::ACTIONS, &plan).await.unwrap();

    let strategy = Arc::new(RecordingStrategy::default());
    let options = SequentialOptions {
        enable_recovery: true,
        max_recovery_attempts: 2,
        ..Default::default()
    };
    let runner = ExecutionRunner::new(files, Arc::new(FailIds(&["A", "B", "C"])))
        .with_options(options)
        .with_recovery_strategy(strategy.clone());

    let bus = EventBus::new();
    let mut events = bus.subscribe();
    let session = Session::new(Requirement::new("Greeting", "Add a hello module"), WorkflowMode::Speed);
    let session = Arc::new(SessionStateMachine::new(session).with_event_bus(bus));
    let harness = RunnerHarness::headless(session.clone());

    let result = harness.run(&runner, None).await;

    assert_eq!(*strategy.attempts.lock(), vec![1, 2]);
    assert_eq!(result.error.as_ref().unwrap().code, ErrorCode::RecoveryExhausted);
    assert_eq!(session.state(), SessionState::Error);
    assert!(session.last_error().unwrap().message.contains("Recovery exhausted"));

    let mut recovery_events = 0;
    while let Ok(envelope) = events.try_recv() {
        if matches!(envelope.event, Event::RecoveryAttempted { .. }) {
            recovery_events += 1;
        }
    }
    assert_eq!(recovery_events, 2);
}

const PLAN: &str = r#"```json
[
  {"id": "mod", "type": "create_file", "description": "Add module", "parameters": {"path": "src/hello.rs", "content": "pub fn hello() {}"}},
  {"id": "lib", "type": "write_file", "description": "Export module", "parameters": {"path": "src/lib.rs", "content": "pub mod hello;"}, "dependencies": ["mod"]}
]
```"#;

#[tokio::test]
async fn structured_workflow_plans_reviews_and_executes() {
    let files = Arc::new(MemoryFileStore::new());
    let client = Arc::new(
        ScriptedAgentClient::new()
            .with_response(PLAN)
            .with_response("Fine.\n```json\n{\"approved\": true, \"summary\": \"Small and safe\"}\n```"),
    );

    let mut registry = ToolRegistry::new();
    orchestrator::tools::register_builtin_tools(&mut registry, files.clone(), Arc::new(NoProcesses));
    let tools = Arc::new(ToolManager::new(registry, Arc::new(StaticApprovalPrompt::allow())));

    let session = session(WorkflowMode::Structured);
    let requirement = session.session().requirement.clone();
    let context = ExecutionContext::new("agent", session.id()).with_all_permissions();
    let interaction = Arc::new(ScriptedInteraction::new());
    let harness = RunnerHarness::new(session.clone(), interaction.clone());

    let workflow = Workflow::new(harness)
        .with_tools(tools.clone())
        .with_runner(
            WorkflowPhase::Planning,
            Arc::new(
                PlanningRunner::new(client.clone(), files.clone(), requirement.clone())
                    .with_action_types(tools.tool_names()),
            ),
        )
        .with_runner(
            WorkflowPhase::Review,
            Arc::new(ReviewRunner::new(client.clone(), files.clone(), requirement)),
        )
        .with_runner(
            WorkflowPhase::Execution,
            Arc::new(ExecutionRunner::new(
                files.clone(),
                Arc::new(ToolActionHandler::new(tools.clone(), context)),
            )),
        );

    let report = workflow.run().await;

    assert_eq!(report.outcome, WorkflowOutcome::Completed);
    assert_eq!(report.final_state, SessionState::Completed);
    assert_eq!(files.get("src/hello.rs").as_deref(), Some("pub fn hello() {}"));
    assert_eq!(files.get("src/lib.rs").as_deref(), Some("pub mod hello;"));
    assert!(files.get(artifacts::PLAN_REVIEW).is_some());
    assert!(files.get(artifacts::EXECUTION_REPORT).is_some());
    assert_eq!(
        interaction.approvals_requested(),
        vec![WorkflowPhase::Planning, WorkflowPhase::Review, WorkflowPhase::Execution]
    );

    // pipeline state for the session is released once the workflow ends
    assert!(tools.session_audit_log(session.id()).is_empty());
    assert_eq!(tools.statistics(session.id()).total_executions, 0);
    assert!(session.is_disposed());
}

#[tokio::test]
async fn headless_workflow_aborts_on_denied_tool() {
    let files = Arc::new(MemoryFileStore::new());
    let client = Arc::new(ScriptedAgentClient::new().with_response(PLAN));

    let mut registry = ToolRegistry::new();
    orchestrator::tools::register_builtin_tools(&mut registry, files.clone(), Arc::new(NoProcesses));
    let tools = Arc::new(ToolManager::new(registry, Arc::new(StaticApprovalPrompt::deny())));

    let session = session(WorkflowMode::Speed);
    let requirement = session.session().requirement.clone();
    let context = ExecutionContext::new("agent", session.id()).with_all_permissions();

    let workflow = Workflow::new(RunnerHarness::headless(session.clone()))
        .with_tools(tools.clone())
        .with_runner(
            WorkflowPhase::Planning,
            Arc::new(PlanningRunner::new(client, files.clone(), requirement)),
        )
        .with_runner(
            WorkflowPhase::Execution,
            Arc::new(ExecutionRunner::new(
                files.clone(),
                Arc::new(ToolActionHandler::new(tools.clone(), context)),
            )),
        );

    let report = workflow.run().await;

    assert_eq!(report.outcome, WorkflowOutcome::Aborted { phase: WorkflowPhase::Execution });
    assert_eq!(report.final_state, SessionState::Error);
    assert!(files.get("src/hello.rs").is_none());
    let execution = report.phases.last().unwrap();
    assert_eq!(execution.data.as_ref().unwrap()["execution"]["failedActions"], 1);
    assert_eq!(execution.data.as_ref().unwrap()["execution"]["skippedActions"], 1);
}

struct NoProcesses;

#[async_trait]
impl orchestrator::services::ProcessRunner for NoProcesses {
    async fn run(
        &self,
        command: &str,
        _cwd: Option<&std::path::Path>,
    ) -> Result<orchestrator::services::CommandOutput> {
        Err(OrchestratorError::ExecutionFailed(format!("processes disabled: {command}")))
    }
}
