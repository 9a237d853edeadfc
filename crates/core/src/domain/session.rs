use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a workflow session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    #[default]
    Idle,
    AgentAssignment,
    ContextGeneration,
    Planning,
    AwaitingPlanApproval,
    PlanReview,
    AwaitingReviewApproval,
    Execution,
    AwaitingExecutionApproval,
    Recovery,
    AwaitingRecoveryDecision,
    Completed,
    Error,
    Cancelled,
}

impl SessionState {
    pub const ALL: [SessionState; 14] = [
        Self::Idle,
        Self::AgentAssignment,
        Self::ContextGeneration,
        Self::Planning,
        Self::AwaitingPlanApproval,
        Self::PlanReview,
        Self::AwaitingReviewApproval,
        Self::Execution,
        Self::AwaitingExecutionApproval,
        Self::Recovery,
        Self::AwaitingRecoveryDecision,
        Self::Completed,
        Self::Error,
        Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::AgentAssignment => "AGENT_ASSIGNMENT",
            Self::ContextGeneration => "CONTEXT_GENERATION",
            Self::Planning => "PLANNING",
            Self::AwaitingPlanApproval => "AWAITING_PLAN_APPROVAL",
            Self::PlanReview => "PLAN_REVIEW",
            Self::AwaitingReviewApproval => "AWAITING_REVIEW_APPROVAL",
            Self::Execution => "EXECUTION",
            Self::AwaitingExecutionApproval => "AWAITING_EXECUTION_APPROVAL",
            Self::Recovery => "RECOVERY",
            Self::AwaitingRecoveryDecision => "AWAITING_RECOVERY_DECISION",
            Self::Completed => "COMPLETED",
            Self::Error => "ERROR",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.as_str() == s)
    }

    /// Terminal for the current run; a new run starts again from `Idle`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }

    /// States in which the session is blocked on a human decision.
    pub fn is_awaiting_decision(&self) -> bool {
        matches!(
            self,
            Self::AwaitingPlanApproval
                | Self::AwaitingReviewApproval
                | Self::AwaitingExecutionApproval
                | Self::AwaitingRecoveryDecision
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A workflow phase that can be assigned to an agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    ContextGeneration,
    Planning,
    Review,
    Execution,
    Recovery,
}

impl WorkflowPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContextGeneration => "context_generation",
            Self::Planning => "planning",
            Self::Review => "review",
            Self::Execution => "execution",
            Self::Recovery => "recovery",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "context_generation" => Some(Self::ContextGeneration),
            "planning" => Some(Self::Planning),
            "review" => Some(Self::Review),
            "execution" => Some(Self::Execution),
            "recovery" => Some(Self::Recovery),
            _ => None,
        }
    }

    /// The session state that represents this phase while it runs.
    pub fn active_state(&self) -> SessionState {
        match self {
            Self::ContextGeneration => SessionState::ContextGeneration,
            Self::Planning => SessionState::Planning,
            Self::Review => SessionState::PlanReview,
            Self::Execution => SessionState::Execution,
            Self::Recovery => SessionState::Recovery,
        }
    }

    /// The state a structured workflow parks in while the phase result
    /// waits for a human decision.
    pub fn approval_state(&self) -> Option<SessionState> {
        match self {
            Self::Planning => Some(SessionState::AwaitingPlanApproval),
            Self::Review => Some(SessionState::AwaitingReviewApproval),
            Self::Execution => Some(SessionState::AwaitingExecutionApproval),
            Self::Recovery => Some(SessionState::AwaitingRecoveryDecision),
            Self::ContextGeneration => None,
        }
    }
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowMode {
    /// Skips the plan review phase and every approval gate.
    Speed,
    #[default]
    Structured,
}

impl WorkflowMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Speed => "speed",
            Self::Structured => "structured",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "speed" => Some(Self::Speed),
            "structured" => Some(Self::Structured),
            _ => None,
        }
    }

    /// Phases run by a workflow in this mode, in order.
    pub fn phases(&self) -> &'static [WorkflowPhase] {
        match self {
            Self::Speed => &[
                WorkflowPhase::ContextGeneration,
                WorkflowPhase::Planning,
                WorkflowPhase::Execution,
            ],
            Self::Structured => &[
                WorkflowPhase::ContextGeneration,
                WorkflowPhase::Planning,
                WorkflowPhase::Review,
                WorkflowPhase::Execution,
            ],
        }
    }

    pub fn gates_phases(&self) -> bool {
        matches!(self, Self::Structured)
    }
}

/// What the user asked the workflow to build.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Requirement {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
}

impl Requirement {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            acceptance_criteria: Vec::new(),
        }
    }

    pub fn with_criterion(mut self, criterion: impl Into<String>) -> Self {
        self.acceptance_criteria.push(criterion.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.title.trim().is_empty() && self.description.trim().is_empty()
    }
}

/// Phase → agent id map. Phases without an explicit entry resolve to the
/// default agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhaseAssignments {
    #[serde(default)]
    pub default_agent: Option<String>,
    #[serde(default)]
    pub agents: HashMap<WorkflowPhase, String>,
}

impl PhaseAssignments {
    pub fn new(default_agent: impl Into<String>) -> Self {
        Self {
            default_agent: Some(default_agent.into()),
            agents: HashMap::new(),
        }
    }

    pub fn assign(&mut self, phase: WorkflowPhase, agent: impl Into<String>) {
        self.agents.insert(phase, agent.into());
    }

    pub fn with(mut self, phase: WorkflowPhase, agent: impl Into<String>) -> Self {
        self.assign(phase, agent);
        self
    }

    pub fn agent_for(&self, phase: WorkflowPhase) -> Option<&str> {
        self.agents
            .get(&phase)
            .or(self.default_agent.as_ref())
            .map(String::as_str)
    }
}
