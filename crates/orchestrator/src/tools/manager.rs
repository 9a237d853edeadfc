//! The tool execution pipeline: validate, score, approve, execute, audit.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use agentflow_core::StructuredError;
use chrono::{DateTime, Utc};
use events::{Event, EventBus};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::approval::{ApprovalDecision, ApprovalFlow, ApprovalPrompt};
use super::audit::{
    args_preview, ApprovalLogEntry, ApprovalReport, AuditLogEntry, AuditOutcome, BoundedLog,
    DEFAULT_LOG_CAPACITY,
};
use super::context::ExecutionContext;
use super::definition::{ToolCall, ToolDefinition, ToolSpec};
use super::registry::ToolRegistry;
use super::risk::{RiskAssessment, RiskAssessor};
use super::validation::{ParameterValidator, SecurityValidator};
use crate::error::{OrchestratorError, Result};
use crate::session::SessionStateMachine;

const DEFAULT_HIGH_RISK_THRESHOLD: u8 = 70;

/// Running per-session execution statistics. Every call counts, including
/// ones rejected before the handler ran; durations cover the whole pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolStatistics {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub tool_usage: HashMap<String, u64>,
    pub average_duration_ms: f64,
    pub last_execution: Option<DateTime<Utc>>,
}

impl ToolStatistics {
    fn record(&mut self, tool: &str, success: bool, duration_ms: u64) {
        self.total_executions += 1;
        if success {
            self.successful_executions += 1;
        } else {
            self.failed_executions += 1;
        }
        *self.tool_usage.entry(tool.to_string()).or_insert(0) += 1;

        let n = self.total_executions as f64;
        self.average_duration_ms += (duration_ms as f64 - self.average_duration_ms) / n;
        self.last_execution = Some(Utc::now());
    }
}

/// Result of one call in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallOutcome {
    pub tool: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StructuredError>,
}

struct PipelineState {
    always_allowed: HashSet<(Uuid, String)>,
    statistics: HashMap<Uuid, ToolStatistics>,
    audit_log: BoundedLog<AuditLogEntry>,
    approval_log: BoundedLog<ApprovalLogEntry>,
}

/// Owns the registry and every piece of mutable pipeline state. One
/// instance is constructed by the host and shared by all runners.
pub struct ToolManager {
    registry: RwLock<ToolRegistry>,
    parameter_validator: ParameterValidator,
    security_validator: SecurityValidator,
    risk_assessor: RiskAssessor,
    approval_prompt: Arc<dyn ApprovalPrompt>,
    high_risk_threshold: u8,
    state: Mutex<PipelineState>,
    events: Option<EventBus>,
}

impl ToolManager {
    pub fn new(registry: ToolRegistry, approval_prompt: Arc<dyn ApprovalPrompt>) -> Self {
        let security_validator = SecurityValidator::new(registry.environment());
        Self {
            registry: RwLock::new(registry),
            parameter_validator: ParameterValidator,
            security_validator,
            risk_assessor: RiskAssessor,
            approval_prompt,
            high_risk_threshold: DEFAULT_HIGH_RISK_THRESHOLD,
            state: Mutex::new(PipelineState {
                always_allowed: HashSet::new(),
                statistics: HashMap::new(),
                audit_log: BoundedLog::new(DEFAULT_LOG_CAPACITY),
                approval_log: BoundedLog::new(DEFAULT_LOG_CAPACITY),
            }),
            events: None,
        }
    }

    pub fn with_high_risk_threshold(mut self, threshold: u8) -> Self {
        self.high_risk_threshold = threshold;
        self
    }

    /// Resize both logs. Existing entries are dropped.
    pub fn with_log_capacity(self, capacity: usize) -> Self {
        {
            let mut state = self.state.lock();
            state.audit_log = BoundedLog::new(capacity);
            state.approval_log = BoundedLog::new(capacity);
        }
        self
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn register_tool(&self, tool: ToolDefinition) {
        debug!(tool = %tool.name, "Registering tool");
        self.registry.write().register_tool(tool);
    }

    pub fn get_tool(&self, name: &str) -> Option<ToolDefinition> {
        self.registry.read().get(name).cloned()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.read().tool_names()
    }

    pub fn available_tools(&self, context: &ExecutionContext) -> Vec<ToolDefinition> {
        self.registry
            .read()
            .get_available_tools(context)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn tool_specs(&self, context: &ExecutionContext) -> Vec<ToolSpec> {
        self.registry.read().tool_specs(context)
    }

    /// Risk score for a prospective call, without executing it.
    pub fn assess(&self, name: &str, params: &Value, context: &ExecutionContext) -> Result<RiskAssessment> {
        let tool = self
            .get_tool(name)
            .ok_or_else(|| OrchestratorError::ToolNotFound(name.to_string()))?;
        Ok(self.risk_assessor.assess_tool_risk(&tool, params, context))
    }

    /// Run one tool call through the whole pipeline.
    pub async fn execute_tool(&self, name: &str, params: Value, context: &ExecutionContext) -> Result<Value> {
        let started = Instant::now();
        let preview = args_preview(&params);

        let result = self.run_pipeline(name, params, context).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        self.state
            .lock()
            .statistics
            .entry(context.session_id)
            .or_default()
            .record(name, result.is_ok(), duration_ms);
        self.audit(name, context, &result, duration_ms, preview);
        result
    }

    async fn run_pipeline(&self, name: &str, params: Value, context: &ExecutionContext) -> Result<Value> {
        let tool = self
            .get_tool(name)
            .ok_or_else(|| OrchestratorError::ToolNotFound(name.to_string()))?;

        let validation = self.parameter_validator.validate(&params, &tool.parameters);
        if !validation.valid {
            return Err(OrchestratorError::InvalidParameters {
                tool: tool.name.clone(),
                errors: validation.errors,
            });
        }
        for warning in &validation.warnings {
            debug!(tool = %tool.name, warning = %warning, "Parameter warning");
        }

        let security = self
            .security_validator
            .validate_execution(&tool, &params, context);
        if !security.valid {
            warn!(tool = %tool.name, errors = ?security.errors, "Security validation failed");
            return Err(OrchestratorError::SecurityViolation {
                tool: tool.name.clone(),
                errors: security.errors,
            });
        }

        if tool.security.requires_approval {
            self.ensure_approved(&tool, &params, context).await?;
        }

        let started = Instant::now();
        let result = tool.handler.call(params, context.clone()).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        self.publish(Event::ToolExecuted {
            session_id: context.session_id,
            tool: tool.name.clone(),
            success: result.is_ok(),
            duration_ms,
        });

        result
    }

    async fn ensure_approved(
        &self,
        tool: &ToolDefinition,
        params: &Value,
        context: &ExecutionContext,
    ) -> Result<()> {
        let key = (context.session_id, tool.name.clone());
        if self.state.lock().always_allowed.contains(&key) {
            debug!(session_id = %context.session_id, tool = %tool.name, "Tool pre-approved for session");
            return Ok(());
        }

        let risk = self.risk_assessor.assess_tool_risk(tool, params, context);
        let outcome = ApprovalFlow::new(self.high_risk_threshold)
            .run(self.approval_prompt.as_ref(), tool, params, context, &risk)
            .await;
        let approved = outcome.decision.is_approved();

        info!(
            session_id = %context.session_id,
            tool = %tool.name,
            decision = outcome.decision.as_str(),
            score = risk.score,
            "Approval decision"
        );

        self.publish(Event::ApprovalDecided {
            session_id: context.session_id,
            tool: tool.name.clone(),
            approved,
            risk_score: risk.score,
        });

        {
            let mut state = self.state.lock();
            state.approval_log.push(ApprovalLogEntry {
                id: Uuid::new_v4(),
                timestamp: Utc::now(),
                session_id: context.session_id,
                tool: tool.name.clone(),
                decision: outcome.decision,
                approved,
                risk,
                high_risk_confirmed: outcome.high_risk_confirmed,
            });
            if outcome.decision == ApprovalDecision::AlwaysAllow {
                state.always_allowed.insert(key);
            }
        }

        if approved {
            Ok(())
        } else {
            Err(OrchestratorError::UserDenied(tool.name.clone()))
        }
    }

    fn audit(
        &self,
        name: &str,
        context: &ExecutionContext,
        result: &Result<Value>,
        duration_ms: u64,
        args_preview: String,
    ) {
        let (outcome, error_code, error) = match result {
            Ok(_) => (AuditOutcome::Success, None, None),
            Err(e @ OrchestratorError::UserDenied(_)) => {
                (AuditOutcome::Denied, Some(e.code()), Some(e.to_string()))
            }
            Err(e) => (AuditOutcome::Failure, Some(e.code()), Some(e.to_string())),
        };

        let audit = json!({
            "event": "tool_audit",
            "session_id": context.session_id,
            "tool": name,
            "ok": result.is_ok(),
            "outcome": outcome.as_str(),
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        info!(audit = %audit, "tool");

        self.state.lock().audit_log.push(AuditLogEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            session_id: context.session_id,
            agent_id: context.agent_id.clone(),
            tool: name.to_string(),
            outcome,
            duration_ms,
            args_preview,
            error_code,
            error,
        });
    }

    /// Run calls in order. Failures become outcomes; with
    /// `continue_on_error` unset the batch stops after the first one.
    pub async fn execute_tools(
        &self,
        calls: Vec<ToolCall>,
        context: &ExecutionContext,
        continue_on_error: bool,
    ) -> Vec<ToolCallOutcome> {
        let mut outcomes = Vec::with_capacity(calls.len());

        for call in calls {
            let outcome = match self.execute_tool(&call.name, call.params, context).await {
                Ok(output) => ToolCallOutcome {
                    tool: call.name,
                    success: true,
                    output: Some(output),
                    error: None,
                },
                Err(e) => ToolCallOutcome {
                    tool: call.name,
                    success: false,
                    output: None,
                    error: Some(e.to_structured()),
                },
            };

            let failed = !outcome.success;
            outcomes.push(outcome);
            if failed && !continue_on_error {
                break;
            }
        }

        outcomes
    }

    pub fn grant_session_approval(&self, session_id: Uuid, tool: &str) {
        self.state
            .lock()
            .always_allowed
            .insert((session_id, tool.to_string()));
    }

    pub fn is_pre_approved(&self, session_id: Uuid, tool: &str) -> bool {
        self.state
            .lock()
            .always_allowed
            .contains(&(session_id, tool.to_string()))
    }

    pub fn clear_session_approvals(&self, session_id: Uuid) {
        self.state
            .lock()
            .always_allowed
            .retain(|(id, _)| *id != session_id);
    }

    pub fn statistics(&self, session_id: Uuid) -> ToolStatistics {
        self.state
            .lock()
            .statistics
            .get(&session_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn audit_log(&self) -> Vec<AuditLogEntry> {
        self.state.lock().audit_log.to_vec()
    }

    pub fn session_audit_log(&self, session_id: Uuid) -> Vec<AuditLogEntry> {
        self.state
            .lock()
            .audit_log
            .iter()
            .filter(|entry| entry.session_id == session_id)
            .cloned()
            .collect()
    }

    pub fn approval_log(&self) -> Vec<ApprovalLogEntry> {
        self.state.lock().approval_log.to_vec()
    }

    pub fn approval_report(&self) -> ApprovalReport {
        let state = self.state.lock();
        ApprovalReport::from_entries(state.approval_log.iter(), self.high_risk_threshold)
    }

    /// Release the session's pipeline state when `session` is disposed.
    pub fn attach_session(self: &Arc<Self>, session: &SessionStateMachine) {
        let manager = Arc::downgrade(self);
        session.on_dispose(move |session_id| {
            if let Some(manager) = manager.upgrade() {
                manager.dispose_session(session_id);
            }
        });
    }

    /// Forget everything the pipeline holds for a session.
    pub fn dispose_session(&self, session_id: Uuid) {
        let mut state = self.state.lock();
        state.always_allowed.retain(|(id, _)| *id != session_id);
        state.statistics.remove(&session_id);
        state.audit_log.retain(|entry| entry.session_id != session_id);
        state.approval_log.retain(|entry| entry.session_id != session_id);
        debug!(session_id = %session_id, "Disposed tool pipeline state for session");
    }

    fn publish(&self, event: Event) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::approval::StaticApprovalPrompt;
    use crate::tools::context::permissions;
    use crate::tools::definition::{ParameterSchema, ParameterType, RiskLevel, ToolSecurity};
    use crate::session::Session;
    use agentflow_core::{ErrorCode, Requirement, WorkflowMode};

    async fn echo(params: Value) -> Result<Value> {
        Ok(json!({ "echo": params["message"] }))
    }

    async fn explode(_params: Value) -> Result<Value> {
        Err(OrchestratorError::ExecutionFailed("exploded".to_string()))
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register_tool(
            ToolDefinition::new("echo", "Echo", |p, _c| echo(p)).with_parameters(
                ParameterSchema::new().required("message", ParameterType::String, "Text"),
            ),
        );
        registry.register_tool(
            ToolDefinition::new("write_file", "Write", |p, _c| echo(p)).with_security(
                ToolSecurity::new(RiskLevel::Medium)
                    .requires_approval()
                    .with_permission(permissions::FILESYSTEM_WRITE),
            ),
        );
        registry.register_tool(ToolDefinition::new("explode", "Fails", |p, _c| explode(p)));
        registry
    }

    fn manager(prompt: Arc<StaticApprovalPrompt>) -> ToolManager {
        ToolManager::new(registry(), prompt)
    }

    fn context() -> ExecutionContext {
        ExecutionContext::new("agent", Uuid::new_v4()).with_all_permissions()
    }

    #[tokio::test]
    async fn test_execute_tool_success_updates_statistics() {
        let manager = manager(Arc::new(StaticApprovalPrompt::allow()));
        let context = context();

        let output = manager
            .execute_tool("echo", json!({ "message": "hi" }), &context)
            .await
            .unwrap();

        assert_eq!(output["echo"], "hi");
        let stats = manager.statistics(context.session_id);
        assert_eq!(stats.total_executions, 1);
        assert_eq!(stats.successful_executions, 1);
        assert_eq!(stats.tool_usage["echo"], 1);
        assert!(stats.last_execution.is_some());
        assert_eq!(manager.audit_log()[0].outcome, AuditOutcome::Success);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let manager = manager(Arc::new(StaticApprovalPrompt::allow()));
        let err = manager
            .execute_tool("missing", json!({}), &context())
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::ToolNotFound);
        assert_eq!(manager.audit_log()[0].error_code, Some(ErrorCode::ToolNotFound));
    }

    #[tokio::test]
    async fn test_invalid_parameters() {
        let manager = manager(Arc::new(StaticApprovalPrompt::allow()));
        let err = manager
            .execute_tool("echo", json!({}), &context())
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::InvalidParameters);
        assert!(err.to_string().contains("Missing required parameter: message"));
    }

    #[tokio::test]
    async fn test_security_violation() {
        let manager = manager(Arc::new(StaticApprovalPrompt::allow()));
        let context = ExecutionContext::new("agent", Uuid::new_v4());

        let err = manager
            .execute_tool("write_file", json!({}), &context)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::SecurityViolation);
    }

    #[tokio::test]
    async fn test_denied_call_is_audited() {
        let prompt = Arc::new(StaticApprovalPrompt::deny());
        let manager = manager(prompt.clone());

        let err = manager
            .execute_tool("write_file", json!({ "message": "x" }), &context())
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::UserDenied);
        assert_eq!(prompt.ask_count(), 1);
        assert_eq!(manager.audit_log()[0].outcome, AuditOutcome::Denied);
        assert!(!manager.approval_log()[0].approved);
    }

    #[tokio::test]
    async fn test_always_allow_skips_later_prompts() {
        let prompt = Arc::new(StaticApprovalPrompt::new(ApprovalDecision::AlwaysAllow));
        let manager = manager(prompt.clone());
        let context = context();

        for _ in 0..3 {
            manager
                .execute_tool("write_file", json!({ "message": "x" }), &context)
                .await
                .unwrap();
        }

        assert_eq!(prompt.ask_count(), 1);
        assert!(manager.is_pre_approved(context.session_id, "write_file"));
        assert_eq!(manager.approval_log().len(), 1);

        let other_session = ExecutionContext::new("agent", Uuid::new_v4()).with_all_permissions();
        manager
            .execute_tool("write_file", json!({ "message": "x" }), &other_session)
            .await
            .unwrap();
        assert_eq!(prompt.ask_count(), 2);
    }

    #[tokio::test]
    async fn test_handler_failure_counts_as_failed() {
        let manager = manager(Arc::new(StaticApprovalPrompt::allow()));
        let context = context();

        let err = manager.execute_tool("explode", json!({}), &context).await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::Execution);
        assert_eq!(manager.statistics(context.session_id).failed_executions, 1);
    }

    #[tokio::test]
    async fn test_rejected_calls_count_as_failed() {
        let manager = manager(Arc::new(StaticApprovalPrompt::deny()));
        let context = context();

        let _ = manager.execute_tool("missing", json!({}), &context).await;
        let _ = manager.execute_tool("echo", json!({}), &context).await;
        let _ = manager
            .execute_tool("write_file", json!({ "message": "x" }), &context)
            .await;

        let stats = manager.statistics(context.session_id);
        assert_eq!(stats.total_executions, 3);
        assert_eq!(stats.failed_executions, 3);
        assert_eq!(stats.successful_executions, 0);
        assert_eq!(stats.tool_usage["missing"], 1);
    }

    #[tokio::test]
    async fn test_session_dispose_clears_always_allow() {
        let prompt = Arc::new(StaticApprovalPrompt::new(ApprovalDecision::AlwaysAllow));
        let manager = Arc::new(manager(prompt.clone()));
        let session = SessionStateMachine::new(Session::new(
            Requirement::new("Notes", "Write notes"),
            WorkflowMode::Speed,
        ));
        manager.attach_session(&session);
        let context = ExecutionContext::new("agent", session.id()).with_all_permissions();

        manager
            .execute_tool("write_file", json!({ "message": "x" }), &context)
            .await
            .unwrap();
        assert!(manager.is_pre_approved(session.id(), "write_file"));

        session.dispose();

        assert!(!manager.is_pre_approved(session.id(), "write_file"));
        assert!(manager.session_audit_log(session.id()).is_empty());
    }

    #[tokio::test]
    async fn test_execute_tools_batch() {
        let manager = manager(Arc::new(StaticApprovalPrompt::allow()));
        let context = context();
        let calls = vec![
            ToolCall::new("echo", json!({ "message": "a" })),
            ToolCall::new("explode", json!({})),
            ToolCall::new("echo", json!({ "message": "b" })),
        ];

        let all = manager.execute_tools(calls.clone(), &context, true).await;
        assert_eq!(all.len(), 3);
        assert!(all[0].success);
        assert!(!all[1].success);
        assert_eq!(all[1].error.as_ref().unwrap().code, ErrorCode::Execution);
        assert!(all[2].success);

        let stopped = manager.execute_tools(calls, &context, false).await;
        assert_eq!(stopped.len(), 2);
    }

    #[tokio::test]
    async fn test_audit_log_is_bounded() {
        let manager = manager(Arc::new(StaticApprovalPrompt::allow())).with_log_capacity(5);
        let context = context();

        for i in 0..8 {
            manager
                .execute_tool("echo", json!({ "message": i.to_string() }), &context)
                .await
                .unwrap();
        }

        let log = manager.audit_log();
        assert_eq!(log.len(), 5);
        assert!(log[0].args_preview.contains("\"3\""));
    }

    #[tokio::test]
    async fn test_dispose_session_clears_state() {
        let prompt = Arc::new(StaticApprovalPrompt::new(ApprovalDecision::AlwaysAllow));
        let manager = manager(prompt.clone());
        let context = context();

        manager
            .execute_tool("write_file", json!({ "message": "x" }), &context)
            .await
            .unwrap();
        manager.dispose_session(context.session_id);

        assert!(!manager.is_pre_approved(context.session_id, "write_file"));
        assert_eq!(manager.statistics(context.session_id), ToolStatistics::default());
        assert!(manager.session_audit_log(context.session_id).is_empty());
        assert!(manager.approval_log().is_empty());

        manager
            .execute_tool("write_file", json!({ "message": "x" }), &context)
            .await
            .unwrap();
        assert_eq!(prompt.ask_count(), 2);
    }

    #[tokio::test]
    async fn test_approval_report() {
        let manager = manager(Arc::new(StaticApprovalPrompt::allow()));
        manager
            .execute_tool("write_file", json!({ "message": "x" }), &context())
            .await
            .unwrap();

        let report = manager.approval_report();
        assert_eq!(report.total, 1);
        assert_eq!(report.approval_rate, 1.0);
        assert_eq!(report.high_risk_count, 0);
    }

    #[tokio::test]
    async fn test_events_published() {
        let bus = EventBus::new();
        let manager = manager(Arc::new(StaticApprovalPrompt::allow())).with_event_bus(bus.clone());
        let mut rx = bus.subscribe();

        manager
            .execute_tool("echo", json!({ "message": "hi" }), &context())
            .await
            .unwrap();

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.event.kind(), "tool.executed");
    }
}
