//! Risk-scored approval of security-gated tool calls.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::context::ExecutionContext;
use super::definition::ToolDefinition;
use super::risk::RiskAssessment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalDecision {
    Allow,
    Deny,
    /// Allow, and skip the prompt for this tool for the rest of the session
    AlwaysAllow,
}

impl ApprovalDecision {
    pub fn is_approved(&self) -> bool {
        !matches!(self, Self::Deny)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::AlwaysAllow => "always-allow",
        }
    }
}

/// The operator answering approval requests.
#[async_trait]
pub trait ApprovalPrompt: Send + Sync {
    async fn ask(
        &self,
        tool: &ToolDefinition,
        params: &Value,
        context: &ExecutionContext,
        risk: &RiskAssessment,
    ) -> ApprovalDecision;

    /// Second, explicit confirmation required for high-risk calls.
    async fn confirm_high_risk(&self, tool: &ToolDefinition, risk: &RiskAssessment) -> bool;
}

/// Answers every request with the same decision.
#[derive(Debug)]
pub struct StaticApprovalPrompt {
    decision: ApprovalDecision,
    asked: AtomicUsize,
}

impl StaticApprovalPrompt {
    pub fn new(decision: ApprovalDecision) -> Self {
        Self {
            decision,
            asked: AtomicUsize::new(0),
        }
    }

    pub fn allow() -> Self {
        Self::new(ApprovalDecision::Allow)
    }

    pub fn deny() -> Self {
        Self::new(ApprovalDecision::Deny)
    }

    /// How many times `ask` was called.
    pub fn ask_count(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ApprovalPrompt for StaticApprovalPrompt {
    async fn ask(
        &self,
        _tool: &ToolDefinition,
        _params: &Value,
        _context: &ExecutionContext,
        _risk: &RiskAssessment,
    ) -> ApprovalDecision {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.decision
    }

    async fn confirm_high_risk(&self, _tool: &ToolDefinition, _risk: &RiskAssessment) -> bool {
        self.decision.is_approved()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalStage {
    Prompted,
    ConfirmedHighRisk { pending: ApprovalDecision },
    Decided(ApprovalDecision),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalOutcome {
    pub decision: ApprovalDecision,
    /// `Some` when the score required the second confirmation step
    pub high_risk_confirmed: Option<bool>,
    pub stages: Vec<ApprovalStage>,
}

/// `PROMPTED -> CONFIRMED_HIGH_RISK -> DECIDED`. The middle stage only
/// runs when the first answer approved a call scoring at or above the
/// threshold; a refused confirmation turns the decision into `Deny`.
pub struct ApprovalFlow {
    high_risk_threshold: u8,
}

impl ApprovalFlow {
    pub fn new(high_risk_threshold: u8) -> Self {
        Self {
            high_risk_threshold,
        }
    }

    pub async fn run(
        &self,
        prompt: &dyn ApprovalPrompt,
        tool: &ToolDefinition,
        params: &Value,
        context: &ExecutionContext,
        risk: &RiskAssessment,
    ) -> ApprovalOutcome {
        let mut stage = ApprovalStage::Prompted;
        let mut stages = vec![stage];
        let mut high_risk_confirmed = None;

        loop {
            stage = match stage {
                ApprovalStage::Prompted => {
                    let answer = prompt.ask(tool, params, context, risk).await;
                    if answer.is_approved() && risk.is_high_risk(self.high_risk_threshold) {
                        ApprovalStage::ConfirmedHighRisk { pending: answer }
                    } else {
                        ApprovalStage::Decided(answer)
                    }
                }
                ApprovalStage::ConfirmedHighRisk { pending } => {
                    let confirmed = prompt.confirm_high_risk(tool, risk).await;
                    high_risk_confirmed = Some(confirmed);
                    if confirmed {
                        ApprovalStage::Decided(pending)
                    } else {
                        ApprovalStage::Decided(ApprovalDecision::Deny)
                    }
                }
                ApprovalStage::Decided(decision) => {
                    debug!(tool = %tool.name, decision = decision.as_str(), score = risk.score, "Approval decided");
                    return ApprovalOutcome {
                        decision,
                        high_risk_confirmed,
                        stages,
                    };
                }
            };
            stages.push(stage);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use serde_json::json;
    use std::sync::atomic::AtomicBool;
    use uuid::Uuid;

    async fn noop(_params: Value) -> Result<Value> {
        Ok(Value::Null)
    }

    struct Operator {
        answer: ApprovalDecision,
        confirm: bool,
        confirm_asked: AtomicBool,
    }

    #[async_trait]
    impl ApprovalPrompt for Operator {
        async fn ask(
            &self,
            _tool: &ToolDefinition,
            _params: &Value,
            _context: &ExecutionContext,
            _risk: &RiskAssessment,
        ) -> ApprovalDecision {
            self.answer
        }

        async fn confirm_high_risk(&self, _tool: &ToolDefinition, _risk: &RiskAssessment) -> bool {
            self.confirm_asked.store(true, Ordering::SeqCst);
            self.confirm
        }
    }

    fn operator(answer: ApprovalDecision, confirm: bool) -> Operator {
        Operator {
            answer,
            confirm,
            confirm_asked: AtomicBool::new(false),
        }
    }

    async fn decide(operator: &Operator, score: u8) -> ApprovalOutcome {
        let tool = ToolDefinition::new("write_file", "Write", |p, _c| noop(p));
        let context = ExecutionContext::new("agent", Uuid::new_v4());
        let risk = RiskAssessment {
            score,
            ..Default::default()
        };
        ApprovalFlow::new(70)
            .run(operator, &tool, &json!({}), &context, &risk)
            .await
    }

    #[tokio::test]
    async fn test_low_risk_skips_confirmation() {
        let operator = operator(ApprovalDecision::Allow, false);
        let outcome = decide(&operator, 40).await;

        assert_eq!(outcome.decision, ApprovalDecision::Allow);
        assert_eq!(outcome.high_risk_confirmed, None);
        assert!(!operator.confirm_asked.load(Ordering::SeqCst));
        assert_eq!(
            outcome.stages,
            vec![
                ApprovalStage::Prompted,
                ApprovalStage::Decided(ApprovalDecision::Allow)
            ]
        );
    }

    #[tokio::test]
    async fn test_high_risk_requires_confirmation() {
        let operator = operator(ApprovalDecision::AlwaysAllow, true);
        let outcome = decide(&operator, 85).await;

        assert_eq!(outcome.decision, ApprovalDecision::AlwaysAllow);
        assert_eq!(outcome.high_risk_confirmed, Some(true));
        assert_eq!(outcome.stages.len(), 3);
    }

    #[tokio::test]
    async fn test_refused_confirmation_denies() {
        let operator = operator(ApprovalDecision::Allow, false);
        let outcome = decide(&operator, 70).await;

        assert_eq!(outcome.decision, ApprovalDecision::Deny);
        assert_eq!(outcome.high_risk_confirmed, Some(false));
    }

    #[tokio::test]
    async fn test_denial_never_asks_for_confirmation() {
        let operator = operator(ApprovalDecision::Deny, true);
        let outcome = decide(&operator, 95).await;

        assert_eq!(outcome.decision, ApprovalDecision::Deny);
        assert!(!operator.confirm_asked.load(Ordering::SeqCst));
    }

    #[test]
    fn test_decision_serialization() {
        assert_eq!(
            serde_json::to_value(ApprovalDecision::AlwaysAllow).unwrap(),
            json!("always-allow")
        );
    }
}
