//! `agentflow.toml`: host settings that live next to the project.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub const SETTINGS_FILE: &str = "agentflow.toml";
pub const API_KEY_ENV: &str = "AGENTFLOW_API_KEY";
const DEFAULT_API_URL: &str = "http://localhost:11434/v1";
const DEFAULT_MODEL: &str = "llama3.1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub project: ProjectSettings,
    pub agent: AgentSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSettings {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    pub api_url: String,
    pub model: String,
    /// Environment variable holding the bearer token
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_api_key_env() -> String {
    API_KEY_ENV.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            project: ProjectSettings {
                name: "my-project".to_string(),
            },
            agent: AgentSettings {
                api_url: DEFAULT_API_URL.to_string(),
                model: DEFAULT_MODEL.to_string(),
                api_key_env: default_api_key_env(),
            },
        }
    }
}

impl Settings {
    /// Project settings first, then the user-wide file, then defaults.
    pub async fn load(project_dir: &Path) -> Result<Self> {
        for path in std::iter::once(project_dir.join(SETTINGS_FILE)).chain(global_settings_path()) {
            if tokio::fs::try_exists(&path).await? {
                let content = tokio::fs::read_to_string(&path).await?;
                tracing::debug!(path = %path.display(), "Loaded settings");
                return Ok(toml::from_str(&content)?);
            }
        }
        Ok(Self::default())
    }

    pub async fn write(&self, project_dir: &Path) -> Result<PathBuf> {
        let path = project_dir.join(SETTINGS_FILE);
        tokio::fs::write(&path, toml::to_string_pretty(self)?).await?;
        Ok(path)
    }

    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.agent.api_key_env)
            .ok()
            .filter(|key| !key.is_empty())
    }
}

fn global_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("agentflow").join(SETTINGS_FILE))
}
