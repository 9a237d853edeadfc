//! Session lifecycle: state, phase, cancellation, errors and progress.

mod progress;
mod state_machine;
mod transitions;

use std::path::PathBuf;

use agentflow_core::{PhaseAssignments, Requirement, WorkflowMode};
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use progress::{
    MemoryProgressSink, ProgressOptions, ProgressSink, ProgressUpdate, TracingProgressSink,
};
pub use state_machine::{SessionError, SessionStateMachine};
pub use transitions::{SessionTransitions, TransitionPolicy};

/// Immutable description of one workflow run.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub workspace: Option<PathBuf>,
    pub requirement: Requirement,
    pub mode: WorkflowMode,
    pub assignments: PhaseAssignments,
    pub started_at: DateTime<Utc>,
}

impl Session {
    pub fn new(requirement: Requirement, mode: WorkflowMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            workspace: None,
            requirement,
            mode,
            assignments: PhaseAssignments::default(),
            started_at: Utc::now(),
        }
    }

    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn with_assignments(mut self, assignments: PhaseAssignments) -> Self {
        self.assignments = assignments;
        self
    }
}
