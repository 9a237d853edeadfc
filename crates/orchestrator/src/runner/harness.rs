use std::sync::Arc;
use std::time::Instant;

use agentflow_core::{ErrorCode, StructuredError};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use super::errors::{
    create_fatal_error, create_recoverable_error, AUTH_FIX, AUTH_LINK, NETWORK_FIX, RATE_LIMIT_FIX,
};
use super::{PhaseRunner, RecoveryChoice, RunnerResult, TimeoutOptions};
use crate::error::{OrchestratorError, Result};
use crate::services::{HeadlessInteraction, InteractionHandler};
use crate::session::{ProgressOptions, SessionStateMachine};

/// Wraps every phase runner with validation, a timeout race, cancellation
/// checks and structured error handling.
pub struct RunnerHarness {
    session: Arc<SessionStateMachine>,
    interaction: Arc<dyn InteractionHandler>,
    interactive: bool,
}

impl RunnerHarness {
    pub fn new(session: Arc<SessionStateMachine>, interaction: Arc<dyn InteractionHandler>) -> Self {
        Self {
            session,
            interaction,
            interactive: true,
        }
    }

    /// A harness that never prompts and aborts on every failure.
    pub fn headless(session: Arc<SessionStateMachine>) -> Self {
        Self {
            session,
            interaction: Arc::new(HeadlessInteraction),
            interactive: false,
        }
    }

    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn session(&self) -> &Arc<SessionStateMachine> {
        &self.session
    }

    pub fn interaction(&self) -> &Arc<dyn InteractionHandler> {
        &self.interaction
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn check_cancellation(&self) -> Result<()> {
        self.session.check_cancellation()
    }

    /// Execute `runner` and always resolve to a [`RunnerResult`].
    pub async fn run<R>(&self, runner: &R, timeout: Option<TimeoutOptions>) -> RunnerResult
    where
        R: PhaseRunner + ?Sized,
    {
        let name = runner.runner_name().to_string();

        if self.session.is_cancelled() {
            debug!(runner = %name, "Session already cancelled, not starting runner");
            return RunnerResult::failure(create_fatal_error(
                ErrorCode::Cancelled,
                format!("{name} cancelled before execution"),
            ));
        }

        if !runner.validate_inputs() {
            let error = create_recoverable_error(
                ErrorCode::Validation,
                format!("Input validation failed for {name}"),
            )
            .with_suggested_fix("Check the requirement and the workflow configuration");
            let choice = runner.handle_error(self, &error).await;
            return RunnerResult::failure(error).with_metadata("recovery_choice", json!(choice));
        }

        self.session.report_progress(
            format!("Starting {name}"),
            None,
            ProgressOptions::status_bar(),
        );
        info!(session_id = %self.session.id(), runner = %name, "Runner started");

        let started = Instant::now();
        let outcome = self.execute_with_timeout(runner, &name, timeout).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        if self.session.is_cancelled() {
            info!(session_id = %self.session.id(), runner = %name, "Runner cancelled during execution");
            return RunnerResult::failure(create_fatal_error(
                ErrorCode::Cancelled,
                format!("{name} cancelled during execution"),
            ))
            .with_metadata("duration_ms", json!(duration_ms));
        }

        match outcome {
            Ok(result) if result.success => {
                self.session.report_progress(
                    format!("Completed {name}"),
                    Some(100.0),
                    ProgressOptions::status_bar(),
                );
                info!(session_id = %self.session.id(), runner = %name, duration_ms, "Runner completed");
                result.with_metadata("duration_ms", json!(duration_ms))
            }
            Ok(result) => {
                let error = result.error.clone().unwrap_or_else(|| {
                    create_recoverable_error(ErrorCode::Execution, format!("{name} reported failure"))
                });
                let choice = runner.handle_error(self, &error).await;
                RunnerResult {
                    error: Some(error),
                    ..result
                }
                .with_metadata("recovery_choice", json!(choice))
                .with_metadata("duration_ms", json!(duration_ms))
            }
            Err(err) => {
                let error = err.to_structured();
                let choice = runner.handle_error(self, &error).await;
                RunnerResult::failure(error)
                    .with_metadata("recovery_choice", json!(choice))
                    .with_metadata("duration_ms", json!(duration_ms))
            }
        }
    }

    /// Run `runner` under `timeout`. The runner keeps executing while an
    /// extension prompt is open and its result wins if it finishes first.
    async fn execute_with_timeout<R>(
        &self,
        runner: &R,
        name: &str,
        timeout: Option<TimeoutOptions>,
    ) -> Result<RunnerResult>
    where
        R: PhaseRunner + ?Sized,
    {
        let mut execution = runner.execute(self);

        let Some(options) = timeout else {
            return execution.await;
        };

        if let Ok(result) = tokio::time::timeout(options.duration, &mut execution).await {
            return result;
        }

        if !options.allow_extension {
            warn!(runner = name, duration_ms = options.duration.as_millis() as u64, "Runner timed out");
            return Err(OrchestratorError::timeout(name, options.duration));
        }

        // The runner keeps going while the user decides.
        let extend = tokio::select! {
            result = &mut execution => return result,
            extend = self.interaction.confirm_extension(name, options.duration) => extend,
        };
        if !extend {
            warn!(runner = name, "Timeout extension refused");
            return Err(OrchestratorError::timeout(name, options.duration));
        }

        info!(runner = name, "Timeout extended by one window");
        match tokio::time::timeout(options.duration, &mut execution).await {
            Ok(result) => result,
            Err(_) => {
                warn!(runner = name, "Runner timed out after extension");
                Err(OrchestratorError::timeout(name, options.duration * 2))
            }
        }
    }

    /// Route a failure to the specialised handler for its code.
    pub async fn dispatch_error(&self, runner: &str, error: &StructuredError) -> RecoveryChoice {
        match error.code {
            ErrorCode::Network => self.handle_network_error(runner, error).await,
            ErrorCode::Auth => self.handle_auth_error(runner, error).await,
            ErrorCode::RateLimit => self.handle_rate_limit_error(runner, error).await,
            _ => self.default_error_handler(runner, error).await,
        }
    }

    /// Log the failure, put the session into `ERROR` and ask for a choice.
    ///
    /// Headless harnesses abort without prompting.
    pub async fn default_error_handler(&self, runner: &str, error: &StructuredError) -> RecoveryChoice {
        error!(
            session_id = %self.session.id(),
            runner,
            code = %error.code,
            recoverable = error.recoverable,
            "{}",
            error.message
        );

        let details = serde_json::to_value(error).unwrap_or(Value::Null);
        self.session
            .error(format!("{runner} failed: {}", error.message), Some(details));

        if !self.interactive {
            return RecoveryChoice::Abort;
        }

        let choice = self.interaction.choose_recovery(runner, error).await;
        info!(session_id = %self.session.id(), runner, choice = choice.as_str(), "Recovery choice");
        choice
    }

    pub async fn handle_network_error(&self, runner: &str, error: &StructuredError) -> RecoveryChoice {
        let error = with_default_fix(error, NETWORK_FIX, None);
        self.default_error_handler(runner, &error).await
    }

    pub async fn handle_auth_error(&self, runner: &str, error: &StructuredError) -> RecoveryChoice {
        let error = with_default_fix(error, AUTH_FIX, Some(AUTH_LINK));
        self.default_error_handler(runner, &error).await
    }

    pub async fn handle_rate_limit_error(&self, runner: &str, error: &StructuredError) -> RecoveryChoice {
        let error = with_default_fix(error, RATE_LIMIT_FIX, None);
        self.default_error_handler(runner, &error).await
    }
}

fn with_default_fix(error: &StructuredError, fix: &str, link: Option<&str>) -> StructuredError {
    let mut error = error.clone();
    if error.suggested_fix.is_none() {
        error.suggested_fix = Some(fix.to_string());
    }
    if error.configuration_link.is_none() {
        error.configuration_link = link.map(str::to_string);
    }
    error
}
