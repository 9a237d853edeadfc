//! Phase runners executed through the [`RunnerHarness`](crate::runner::RunnerHarness).
//!
//! - [`PlanningRunner`] - asks the planning agent for an action list
//! - [`ReviewRunner`] - has the review agent vet the plan
//! - [`ExecutionRunner`] - runs the action list sequentially with recovery

mod execution;
mod planning;
mod prompts;
mod review;

pub use execution::ExecutionRunner;
pub use planning::{parse_action_plan, PlanningRunner};
pub use prompts::PhasePrompts;
pub use review::{parse_review_verdict, ReviewRunner, ReviewVerdict};

/// Workspace-relative locations of the artifacts phases hand to each other.
pub mod artifacts {
    pub const CONTEXT: &str = ".agentflow/context.json";
    pub const ACTIONS: &str = ".agentflow/actions.json";
    pub const PLAN_REVIEW: &str = ".agentflow/plan-review.md";
    pub const EXECUTION_REPORT: &str = ".agentflow/execution-report.json";
}

/// Pull a JSON document out of an agent reply, preferring a fenced
/// ```json block over the bare text.
pub fn extract_json_from_response(content: &str) -> String {
    if let Some(start) = content.find("```json") {
        let body = &content[start + 7..];
        if let Some(end) = body.find("```") {
            return body[..end].trim().to_string();
        }
    }

    let open = content.find(['[', '{']);
    let close = content.rfind([']', '}']);
    match (open, close) {
        (Some(open), Some(close)) if close > open => content[open..=close].trim().to_string(),
        _ => content.trim().to_string(),
    }
}
