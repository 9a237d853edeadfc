//! Event types for the agentflow event system

use agentflow_core::{ActionStatus, SessionState, WorkflowPhase};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all events with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,
    /// Position in the publishing bus's stream, starting at 1
    pub sequence: u64,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// The actual event
    pub event: Event,
}

impl EventEnvelope {
    pub fn new(sequence: u64, event: Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence,
            timestamp: Utc::now(),
            event,
        }
    }
}

/// All possible events in the system
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    // Session events
    #[serde(rename = "session.state_changed")]
    SessionStateChanged {
        session_id: Uuid,
        from: SessionState,
        to: SessionState,
        message: Option<String>,
    },

    #[serde(rename = "session.phase_started")]
    PhaseStarted {
        session_id: Uuid,
        phase: WorkflowPhase,
    },

    #[serde(rename = "session.progress")]
    Progress {
        session_id: Uuid,
        message: String,
        increment: Option<f64>,
    },

    #[serde(rename = "session.error")]
    SessionError { session_id: Uuid, message: String },

    #[serde(rename = "session.cancelled")]
    SessionCancelled { session_id: Uuid },

    /// Session released its listeners and pipeline state
    #[serde(rename = "session.disposed")]
    SessionDisposed { session_id: Uuid },

    // Tool pipeline events
    #[serde(rename = "tool.executed")]
    ToolExecuted {
        session_id: Uuid,
        tool: String,
        success: bool,
        duration_ms: u64,
    },

    #[serde(rename = "tool.approval")]
    ApprovalDecided {
        session_id: Uuid,
        tool: String,
        approved: bool,
        risk_score: u8,
    },

    // Sequential execution events
    #[serde(rename = "action.status_changed")]
    ActionStatusChanged {
        session_id: Uuid,
        action_id: String,
        status: ActionStatus,
    },

    #[serde(rename = "recovery.attempted")]
    RecoveryAttempted {
        session_id: Uuid,
        attempt: u32,
        max_attempts: u32,
    },
}

impl Event {
    /// Get the session ID associated with this event
    pub fn session_id(&self) -> Uuid {
        match self {
            Event::SessionStateChanged { session_id, .. }
            | Event::PhaseStarted { session_id, .. }
            | Event::Progress { session_id, .. }
            | Event::SessionError { session_id, .. }
            | Event::SessionCancelled { session_id }
            | Event::SessionDisposed { session_id }
            | Event::ToolExecuted { session_id, .. }
            | Event::ApprovalDecided { session_id, .. }
            | Event::ActionStatusChanged { session_id, .. }
            | Event::RecoveryAttempted { session_id, .. } => *session_id,
        }
    }

    /// The wire name of the event, as used in the serialized `type` tag
    pub fn kind(&self) -> &'static str {
        match self {
            Event::SessionStateChanged { .. } => "session.state_changed",
            Event::PhaseStarted { .. } => "session.phase_started",
            Event::Progress { .. } => "session.progress",
            Event::SessionError { .. } => "session.error",
            Event::SessionCancelled { .. } => "session.cancelled",
            Event::SessionDisposed { .. } => "session.disposed",
            Event::ToolExecuted { .. } => "tool.executed",
            Event::ApprovalDecided { .. } => "tool.approval",
            Event::ActionStatusChanged { .. } => "action.status_changed",
            Event::RecoveryAttempted { .. } => "recovery.attempted",
        }
    }
}
