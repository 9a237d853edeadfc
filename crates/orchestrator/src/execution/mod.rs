//! Sequential action execution and recovery.

pub mod handler;
pub mod recovery;
pub mod sequential;

pub use handler::{ActionHandler, ToolActionHandler};
pub use recovery::{
    AgentRecoveryStrategy, FailedAction, RecoveryController, RecoveryOutcome, RecoverySnapshot,
    RecoveryStrategy, DEFAULT_MAX_RECOVERY_ATTEMPTS,
};
pub use sequential::{
    are_dependencies_satisfied, ExecutionSummary, SequentialExecutor, SequentialOptions,
    DEPENDENCIES_NOT_SATISFIED,
};
