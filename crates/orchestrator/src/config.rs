//! Orchestrator configuration stored in `.agentflow/config.json`.

use std::path::Path;
use std::time::Duration;

use agentflow_core::{PhaseAssignments, WorkflowMode, WorkflowPhase};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use crate::tools::DEFAULT_LOG_CAPACITY;
use crate::runner::TimeoutOptions;
use crate::services::DEFAULT_COMMAND_TIMEOUT;
use crate::session::TransitionPolicy;
use crate::tools::ToolEnvironment;

pub const CONFIG_DIR: &str = ".agentflow";
const CONFIG_FILE: &str = "config.json";

/// Bounded recovery settings for sequential execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecoveryConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub continue_on_error: bool,
    /// How many upcoming pending actions the recovery snapshot previews
    pub pending_preview_limit: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 2,
            continue_on_error: true,
            pending_preview_limit: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuditConfig {
    pub max_entries: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_LOG_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Risk scores at or above this need a second confirmation
    pub high_risk_threshold: u8,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            high_risk_threshold: 70,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProcessConfig {
    pub timeout_secs: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_COMMAND_TIMEOUT.as_secs(),
        }
    }
}

/// Per-phase runner timeouts. `None` runs the phase without a timer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PhaseTimeouts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_generation_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planning_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_secs: Option<u64>,
    pub allow_extension: bool,
}

impl PhaseTimeouts {
    pub fn for_phase(&self, phase: WorkflowPhase) -> Option<TimeoutOptions> {
        let secs = match phase {
            WorkflowPhase::ContextGeneration => self.context_generation_secs,
            WorkflowPhase::Planning => self.planning_secs,
            WorkflowPhase::Review => self.review_secs,
            WorkflowPhase::Execution | WorkflowPhase::Recovery => self.execution_secs,
        }?;
        Some(TimeoutOptions {
            duration: Duration::from_secs(secs),
            allow_extension: self.allow_extension,
        })
    }
}

/// Project-level configuration for the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub mode: WorkflowMode,
    /// Prompt a human on runner failures; headless hosts abort instead
    pub interactive: bool,
    pub transition_policy: TransitionPolicy,
    pub environment: ToolEnvironment,
    pub max_phase_retries: u32,
    pub agents: PhaseAssignments,
    pub recovery: RecoveryConfig,
    pub audit: AuditConfig,
    pub approval: ApprovalConfig,
    pub process: ProcessConfig,
    pub timeouts: PhaseTimeouts,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            mode: WorkflowMode::default(),
            interactive: true,
            transition_policy: TransitionPolicy::default(),
            environment: ToolEnvironment::default(),
            max_phase_retries: 1,
            agents: PhaseAssignments::default(),
            recovery: RecoveryConfig::default(),
            audit: AuditConfig::default(),
            approval: ApprovalConfig::default(),
            process: ProcessConfig::default(),
            timeouts: PhaseTimeouts::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Read config from project directory, falling back to defaults
    pub async fn read(project_path: &Path) -> Self {
        let config_path = project_path.join(CONFIG_DIR).join(CONFIG_FILE);

        if !config_path.exists() {
            debug!(path = %config_path.display(), "Config file does not exist, using defaults");
            return Self::default();
        }

        match fs::read_to_string(&config_path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => {
                    debug!(path = %config_path.display(), "Config loaded successfully");
                    config
                }
                Err(e) => {
                    warn!(path = %config_path.display(), error = %e, "Failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(e) => {
                warn!(path = %config_path.display(), error = %e, "Failed to read config file, using defaults");
                Self::default()
            }
        }
    }

    /// Write config to project directory
    pub async fn write(&self, project_path: &Path) -> std::io::Result<()> {
        let config_dir = project_path.join(CONFIG_DIR);
        let config_path = config_dir.join(CONFIG_FILE);

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir).await?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        fs::write(&config_path, content).await?;
        debug!(path = %config_path.display(), "Config saved successfully");

        Ok(())
    }

    pub fn with_mode(mut self, mode: WorkflowMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn with_transition_policy(mut self, policy: TransitionPolicy) -> Self {
        self.transition_policy = policy;
        self
    }

    pub fn with_recovery(mut self, enabled: bool, max_attempts: u32) -> Self {
        self.recovery.enabled = enabled;
        self.recovery.max_attempts = max_attempts;
        self
    }

    pub fn with_default_agent(mut self, agent: impl Into<String>) -> Self {
        self.agents.default_agent = Some(agent.into());
        self
    }

    pub fn process_timeout(&self) -> Duration {
        Duration::from_secs(self.process.timeout_secs)
    }
}
