mod action;
mod session;
mod structured_error;

pub use action::{ActionResult, ActionStatus, ActionUnit};
pub use session::{PhaseAssignments, Requirement, SessionState, WorkflowMode, WorkflowPhase};
pub use structured_error::{ErrorCode, StructuredError};
