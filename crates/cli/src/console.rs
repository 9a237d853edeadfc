//! Terminal implementations of the orchestrator's human-in-the-loop seams.

use std::time::Duration;

use agentflow_core::{StructuredError, WorkflowPhase};
use async_trait::async_trait;
use colored::Colorize;
use console::Term;
use indicatif::{ProgressBar, ProgressStyle};
use orchestrator::services::InteractionHandler;
use orchestrator::session::{ProgressSink, ProgressUpdate};
use orchestrator::tools::{ApprovalDecision, ApprovalPrompt, RiskAssessment};
use orchestrator::{ExecutionContext, RecoveryChoice, ToolDefinition};
use serde_json::Value;

/// Read one trimmed, lowercased line from the terminal without blocking
/// the runtime. EOF or a terminal error reads as an empty answer.
async fn read_answer(question: String) -> String {
    let answer = tokio::task::spawn_blocking(move || {
        let term = Term::stderr();
        term.write_str(&question).ok()?;
        term.read_line().ok()
    })
    .await
    .ok()
    .flatten();
    answer.unwrap_or_default().trim().to_lowercase()
}

fn yes(answer: &str) -> bool {
    matches!(answer, "y" | "yes")
}

/// Asks on the terminal for every gated tool call.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleApprovalPrompt;

#[async_trait]
impl ApprovalPrompt for ConsoleApprovalPrompt {
    async fn ask(
        &self,
        tool: &ToolDefinition,
        params: &Value,
        context: &ExecutionContext,
        risk: &RiskAssessment,
    ) -> ApprovalDecision {
        eprintln!();
        eprintln!(
            "{} {} wants to run {} (risk {})",
            "?".yellow().bold(),
            context.agent_id,
            tool.name.bold(),
            risk.score
        );
        eprintln!("  {}", params.to_string().dimmed());
        for warning in &risk.warnings {
            eprintln!("  {} {}", "!".red(), warning);
        }

        match read_answer("  Allow? [y]es / [n]o / [a]lways: ".to_string())
            .await
            .as_str()
        {
            "a" | "always" => ApprovalDecision::AlwaysAllow,
            answer if yes(answer) => ApprovalDecision::Allow,
            _ => ApprovalDecision::Deny,
        }
    }

    async fn confirm_high_risk(&self, tool: &ToolDefinition, risk: &RiskAssessment) -> bool {
        eprintln!(
            "{} {} scores {} and is high risk",
            "!".red().bold(),
            tool.name.bold(),
            risk.score.to_string().red()
        );
        yes(&read_answer("  Type 'yes' to confirm: ".to_string()).await)
    }
}

/// Phase gates, timeout extensions and recovery choices on the terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleInteraction {
    /// Approve phase gates without asking
    pub auto_approve: bool,
}

#[async_trait]
impl InteractionHandler for ConsoleInteraction {
    async fn confirm_extension(&self, runner: &str, window: Duration) -> bool {
        let question = format!(
            "{} {runner} timed out after {}s. Wait another {}s? [y/N]: ",
            "?".yellow().bold(),
            window.as_secs(),
            window.as_secs()
        );
        yes(&read_answer(question).await)
    }

    async fn choose_recovery(&self, runner: &str, error: &StructuredError) -> RecoveryChoice {
        eprintln!();
        eprintln!("{} {runner} failed: {}", "x".red().bold(), error.message);
        if let Some(fix) = &error.suggested_fix {
            eprintln!("  {} {fix}", "hint:".cyan());
        }
        if let Some(link) = &error.configuration_link {
            eprintln!("  {} {link}", "see:".cyan());
        }

        let question = "  [r]etry / [s]kip / [c]onfigure / [a]bort: ".to_string();
        match read_answer(question).await.as_str() {
            "r" | "retry" => RecoveryChoice::Retry,
            "s" | "skip" => RecoveryChoice::Skip,
            "c" | "configure" | "reconfigure" => RecoveryChoice::Reconfigure,
            _ => RecoveryChoice::Abort,
        }
    }

    async fn approve_phase(&self, phase: WorkflowPhase, summary: &str) -> bool {
        eprintln!();
        eprintln!("{} {phase}: {summary}", "✓".green().bold());
        if self.auto_approve {
            return true;
        }
        let answer = read_answer("  Continue? [Y/n]: ".to_string()).await;
        answer.is_empty() || yes(&answer)
    }
}

/// Spinner whose message follows the session's progress updates.
pub struct IndicatifProgressSink {
    bar: ProgressBar,
}

impl IndicatifProgressSink {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressSink for IndicatifProgressSink {
    fn report(&self, update: ProgressUpdate) {
        if update.increment_pct.is_some_and(|pct| pct >= 100.0) {
            self.bar
                .println(format!("{} {}", "✓".green(), update.message));
        }
        self.bar.set_message(update.message);
    }
}
