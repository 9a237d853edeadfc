use std::collections::HashMap;
use std::sync::Arc;

use agentflow_core::{PhaseAssignments, SessionState, WorkflowPhase};
use chrono::{DateTime, Utc};
use events::{Event, EventBus};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::progress::{ProgressOptions, ProgressSink, ProgressUpdate};
use super::transitions::{SessionTransitions, TransitionPolicy};
use super::Session;
use crate::error::{OrchestratorError, Result};

/// The most recent failure recorded on a session.
#[derive(Debug, Clone)]
pub struct SessionError {
    pub message: String,
    pub details: Option<Value>,
    pub at: DateTime<Utc>,
}

struct SessionInner {
    state: SessionState,
    current_phase: Option<WorkflowPhase>,
    assignments: PhaseAssignments,
    last_error: Option<SessionError>,
    metadata: HashMap<String, Value>,
    disposed: bool,
}

type DisposeHook = Box<dyn FnOnce(Uuid) + Send>;

/// Tracks state, phase, cancellation and errors of one session.
///
/// Shared behind an `Arc` between the host, the harness and the runners;
/// every operation takes `&self`.
pub struct SessionStateMachine {
    session: Session,
    inner: RwLock<SessionInner>,
    cancellation: CancellationToken,
    progress: RwLock<Option<Arc<dyn ProgressSink>>>,
    policy: TransitionPolicy,
    events: Option<EventBus>,
    dispose_hooks: Mutex<Vec<DisposeHook>>,
}

impl SessionStateMachine {
    pub fn new(session: Session) -> Self {
        let assignments = session.assignments.clone();
        Self {
            session,
            inner: RwLock::new(SessionInner {
                state: SessionState::Idle,
                current_phase: None,
                assignments,
                last_error: None,
                metadata: HashMap::new(),
                disposed: false,
            }),
            cancellation: CancellationToken::new(),
            progress: RwLock::new(None),
            policy: TransitionPolicy::default(),
            events: None,
            dispose_hooks: Mutex::new(Vec::new()),
        }
    }

    pub fn with_progress_sink(self, sink: Arc<dyn ProgressSink>) -> Self {
        *self.progress.write() = Some(sink);
        self
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn with_policy(mut self, policy: TransitionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn id(&self) -> Uuid {
        self.session.id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.inner.read().state
    }

    pub fn current_phase(&self) -> Option<WorkflowPhase> {
        self.inner.read().current_phase
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.read().disposed
    }

    /// Move to `state` and report it as progress.
    ///
    /// Transitions outside the phase graph are only rejected under
    /// [`TransitionPolicy::Strict`]. Setting the current state is a no-op.
    pub fn set_state(&self, state: SessionState, message: Option<&str>) -> Result<()> {
        let from = self.state();
        if from == state {
            return Ok(());
        }

        if let Err(e) = SessionTransitions::validate_transition(&from, &state) {
            match self.policy {
                TransitionPolicy::Strict => {
                    warn!(session_id = %self.id(), from = %from, to = %state, "Rejected state transition");
                    return Err(e);
                }
                TransitionPolicy::Permissive => {
                    warn!(session_id = %self.id(), from = %from, to = %state, "State transition outside the phase graph");
                }
            }
        }

        self.apply_state(state, message);
        Ok(())
    }

    fn apply_state(&self, state: SessionState, message: Option<&str>) {
        let from = {
            let mut inner = self.inner.write();
            std::mem::replace(&mut inner.state, state)
        };

        info!(session_id = %self.id(), from = %from, to = %state, "Session state changed");
        self.publish(Event::SessionStateChanged {
            session_id: self.id(),
            from,
            to: state,
            message: message.map(str::to_string),
        });

        let text = message
            .map(str::to_string)
            .unwrap_or_else(|| format!("State: {state}"));
        self.report_progress(text, None, ProgressOptions::status_bar());
    }

    /// Record the active phase and announce it. The state is left unchanged.
    pub fn set_phase(&self, phase: WorkflowPhase) {
        self.inner.write().current_phase = Some(phase);

        debug!(session_id = %self.id(), phase = %phase, "Phase started");
        self.publish(Event::PhaseStarted {
            session_id: self.id(),
            phase,
        });
        self.report_progress(
            format!("Starting phase: {phase}"),
            None,
            ProgressOptions::status_bar(),
        );
    }

    /// Cancel the session. Calling it again has no further effect.
    pub fn cancel(&self) {
        if self.cancellation.is_cancelled() {
            return;
        }
        self.cancellation.cancel();

        info!(session_id = %self.id(), "Session cancelled");
        self.apply_state(SessionState::Cancelled, Some("Workflow cancelled"));
        self.publish(Event::SessionCancelled {
            session_id: self.id(),
        });
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Fail immediately when the session has been cancelled.
    pub fn check_cancellation(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(OrchestratorError::Cancelled("Operation cancelled".to_string()))
        } else {
            Ok(())
        }
    }

    /// Token for `select!`-style cooperative cancellation.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn report_progress(
        &self,
        message: impl Into<String>,
        increment_pct: Option<f64>,
        options: ProgressOptions,
    ) {
        let update = ProgressUpdate::new(message, increment_pct, options);

        self.publish(Event::Progress {
            session_id: self.id(),
            message: update.message.clone(),
            increment: increment_pct,
        });

        let sink = self.progress.read().clone();
        if let Some(sink) = sink {
            sink.report(update);
        }
    }

    /// Move to `ERROR` and remember the failure.
    pub fn error(&self, message: impl Into<String>, details: Option<Value>) {
        let message = message.into();
        error!(session_id = %self.id(), error = %message, "Session error");

        self.inner.write().last_error = Some(SessionError {
            message: message.clone(),
            details,
            at: Utc::now(),
        });
        self.publish(Event::SessionError {
            session_id: self.id(),
            message: message.clone(),
        });

        if self.state() != SessionState::Error {
            self.apply_state(SessionState::Error, Some(&format!("Error: {message}")));
        }
    }

    pub fn last_error(&self) -> Option<SessionError> {
        self.inner.read().last_error.clone()
    }

    pub fn clear_error(&self) {
        self.inner.write().last_error = None;
    }

    pub fn complete(&self) -> Result<()> {
        self.set_state(SessionState::Completed, Some("Workflow completed"))
    }

    /// Drop the progress sink and mark the session disposed.
    /// Run `hook` once with the session id when the session is disposed.
    /// Runs immediately if it already was.
    pub fn on_dispose(&self, hook: impl FnOnce(Uuid) + Send + 'static) {
        let mut hooks = self.dispose_hooks.lock();
        if self.is_disposed() {
            drop(hooks);
            hook(self.id());
            return;
        }
        hooks.push(Box::new(hook));
    }

    pub fn dispose(&self) {
        {
            let mut inner = self.inner.write();
            if inner.disposed {
                return;
            }
            inner.disposed = true;
        }
        self.progress.write().take();

        let hooks = std::mem::take(&mut *self.dispose_hooks.lock());
        for hook in hooks {
            hook(self.id());
        }

        debug!(session_id = %self.id(), "Session disposed");
        self.publish(Event::SessionDisposed {
            session_id: self.id(),
        });
    }

    pub fn assign_agent(&self, phase: WorkflowPhase, agent: impl Into<String>) {
        let agent = agent.into();
        debug!(session_id = %self.id(), phase = %phase, agent = %agent, "Agent assigned");
        self.inner.write().assignments.assign(phase, agent);
    }

    pub fn agent_for(&self, phase: WorkflowPhase) -> Option<String> {
        self.inner
            .read()
            .assignments
            .agent_for(phase)
            .map(str::to_string)
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: Value) {
        self.inner.write().metadata.insert(key.into(), value);
    }

    pub fn metadata(&self, key: &str) -> Option<Value> {
        self.inner.read().metadata.get(key).cloned()
    }

    pub(crate) fn publish(&self, event: Event) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}

impl std::fmt::Debug for SessionStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStateMachine")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("current_phase", &self.current_phase())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
