use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use super::file_store::resolve_within;
use crate::error::{OrchestratorError, Result};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `command` through the shell. A relative `cwd` is resolved
    /// against the runner's root; a `cwd` outside the root is refused.
    async fn run(&self, command: &str, cwd: Option<&Path>) -> Result<CommandOutput>;
}

/// Runs commands with `sh -c` (or `cmd /C` on Windows).
#[derive(Debug, Clone)]
pub struct ShellProcessRunner {
    root: PathBuf,
    timeout: Duration,
}

impl ShellProcessRunner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn shell(command: &str) -> Command {
        if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        }
    }
}

#[async_trait]
impl ProcessRunner for ShellProcessRunner {
    async fn run(&self, command: &str, cwd: Option<&Path>) -> Result<CommandOutput> {
        let dir = match cwd {
            Some(dir) => resolve_within(&self.root, dir)
                .ok_or_else(|| OrchestratorError::PathEscape(dir.display().to_string()))?,
            None => self.root.clone(),
        };
        debug!(command, cwd = %dir.display(), "Running command");

        let mut cmd = Self::shell(command);
        cmd.current_dir(&dir).kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                warn!(command, timeout_secs = self.timeout.as_secs(), "Command timed out");
                OrchestratorError::timeout(format!("Command '{command}'"), self.timeout)
            })??;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
