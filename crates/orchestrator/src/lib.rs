//! Orchestration and safety engine for agent-assisted coding workflows.
//!
//! A host builds one [`ToolManager`], creates a [`SessionStateMachine`] per
//! run, wraps it in a [`RunnerHarness`] and hands both to a [`Workflow`]
//! together with the phase runners it wants to execute.

pub mod config;
pub mod error;
pub mod execution;
pub mod phases;
pub mod runner;
pub mod services;
pub mod session;
pub mod tools;
pub mod workflow;

pub use config::OrchestratorConfig;
pub use error::{OrchestratorError, Result};
pub use execution::{
    are_dependencies_satisfied, ExecutionSummary, RecoveryController, SequentialExecutor,
    SequentialOptions,
};
pub use runner::{
    create_fatal_error, create_recoverable_error, PhaseRunner, RecoveryChoice, RunnerHarness,
    RunnerResult, TimeoutOptions,
};
pub use session::{Session, SessionStateMachine, TransitionPolicy};
pub use tools::{ExecutionContext, ToolDefinition, ToolManager, ToolRegistry};
pub use workflow::{Workflow, WorkflowOutcome, WorkflowReport};
