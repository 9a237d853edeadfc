use agentflow_core::SessionState;
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};

/// How the session reacts to a transition outside the phase graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPolicy {
    /// Apply the transition anyway and log a warning
    #[default]
    Permissive,
    /// Reject the transition with `InvalidTransition`
    Strict,
}

pub struct SessionTransitions;

impl SessionTransitions {
    pub fn validate_transition(from: &SessionState, to: &SessionState) -> Result<()> {
        if from == to || Self::allowed_transitions(from).contains(to) {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }

    fn allowed_transitions(from: &SessionState) -> Vec<SessionState> {
        use SessionState::*;

        let mut allowed = match from {
            // a prepared action list runs without planning
            Idle => vec![AgentAssignment, ContextGeneration, Planning, Execution],
            AgentAssignment => vec![ContextGeneration, Planning, Execution],
            ContextGeneration => vec![Planning, Execution],
            Planning => vec![AwaitingPlanApproval, PlanReview, Execution],
            AwaitingPlanApproval => vec![PlanReview, Planning, Execution],
            PlanReview => vec![AwaitingReviewApproval, Planning, Execution],
            AwaitingReviewApproval => vec![Execution, Planning, PlanReview],
            Execution => vec![AwaitingExecutionApproval, Recovery, Completed],
            AwaitingExecutionApproval => vec![Execution, Completed],
            Recovery => vec![AwaitingRecoveryDecision, Execution],
            AwaitingRecoveryDecision => vec![Recovery, Execution],
            Error => {
                return vec![Idle, ContextGeneration, Planning, PlanReview, Execution, Recovery]
            }
            Completed | Cancelled => return vec![Idle],
        };

        allowed.extend([Error, Cancelled]);
        allowed
    }

    pub fn can_transition(from: &SessionState, to: &SessionState) -> bool {
        Self::validate_transition(from, to).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(SessionTransitions::can_transition(
            &SessionState::Idle,
            &SessionState::ContextGeneration
        ));
        assert!(SessionTransitions::can_transition(
            &SessionState::Planning,
            &SessionState::AwaitingPlanApproval
        ));
        assert!(SessionTransitions::can_transition(
            &SessionState::Execution,
            &SessionState::Recovery
        ));
        assert!(SessionTransitions::can_transition(
            &SessionState::Recovery,
            &SessionState::Execution
        ));
    }

    #[test]
    fn test_execution_reachable_without_planning() {
        for from in [
            SessionState::Idle,
            SessionState::AgentAssignment,
            SessionState::ContextGeneration,
        ] {
            assert!(SessionTransitions::can_transition(&from, &SessionState::Execution));
        }
        assert!(!SessionTransitions::can_transition(
            &SessionState::Idle,
            &SessionState::Recovery
        ));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!SessionTransitions::can_transition(
            &SessionState::Idle,
            &SessionState::Completed
        ));
        assert!(!SessionTransitions::can_transition(
            &SessionState::Planning,
            &SessionState::Completed
        ));
        assert!(!SessionTransitions::can_transition(
            &SessionState::Completed,
            &SessionState::Planning
        ));
    }

    #[test]
    fn test_error_and_cancel_reachable_from_active_states() {
        for state in SessionState::ALL.iter().filter(|s| !s.is_terminal()) {
            assert!(SessionTransitions::can_transition(state, &SessionState::Error));
            assert!(SessionTransitions::can_transition(state, &SessionState::Cancelled));
        }
    }

    #[test]
    fn test_terminal_states_restart_from_idle() {
        for state in [SessionState::Completed, SessionState::Error, SessionState::Cancelled] {
            assert!(SessionTransitions::can_transition(&state, &SessionState::Idle));
            assert!(!SessionTransitions::can_transition(&state, &SessionState::Completed));
        }
    }

    #[test]
    fn test_error_allows_retrying_a_phase() {
        assert!(SessionTransitions::can_transition(
            &SessionState::Error,
            &SessionState::Execution
        ));
        assert!(!SessionTransitions::can_transition(
            &SessionState::Cancelled,
            &SessionState::Execution
        ));
    }

    #[test]
    fn test_self_transition_is_allowed() {
        assert!(SessionTransitions::can_transition(
            &SessionState::Execution,
            &SessionState::Execution
        ));
    }

    #[test]
    fn test_invalid_transition_error() {
        let err = SessionTransitions::validate_transition(&SessionState::Idle, &SessionState::Completed)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid state transition from IDLE to COMPLETED"
        );
    }
}
