use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Well-known permission names declared by tools and granted to users.
pub mod permissions {
    pub const FILESYSTEM_READ: &str = "filesystem.read";
    pub const FILESYSTEM_WRITE: &str = "filesystem.write";
    pub const SYSTEM_EXECUTE: &str = "system.execute";
    pub const NETWORK_REQUEST: &str = "network.request";

    /// Permissions that raise the risk score and are withheld at `RESTRICTED`.
    pub const HIGH_RISK: [&str; 3] = [FILESYSTEM_WRITE, SYSTEM_EXECUTE, NETWORK_REQUEST];

    pub fn is_high_risk(permission: &str) -> bool {
        HIGH_RISK.contains(&permission)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityLevel {
    Restricted,
    #[default]
    Normal,
    Elevated,
}

impl SecurityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Restricted => "RESTRICTED",
            Self::Normal => "NORMAL",
            Self::Elevated => "ELEVATED",
        }
    }
}

/// Where the pipeline runs. Tools not allowed in web are hidden there.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolEnvironment {
    #[default]
    Desktop,
    Web,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub id: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityContext {
    pub level: SecurityLevel,
    #[serde(default)]
    pub allow_dangerous: bool,
}

/// Who is calling a tool, on behalf of which session, and with what rights.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub agent_id: String,
    pub session_id: Uuid,
    pub user: UserContext,
    pub security: SecurityContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,
}

impl ExecutionContext {
    pub fn new(agent_id: impl Into<String>, session_id: Uuid) -> Self {
        Self {
            agent_id: agent_id.into(),
            session_id,
            user: UserContext::default(),
            security: SecurityContext::default(),
            workspace: None,
        }
    }

    pub fn with_user(mut self, id: impl Into<String>) -> Self {
        self.user.id = id.into();
        self
    }

    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.user.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    /// Grant every well-known permission.
    pub fn with_all_permissions(self) -> Self {
        self.with_permissions([
            permissions::FILESYSTEM_READ,
            permissions::FILESYSTEM_WRITE,
            permissions::SYSTEM_EXECUTE,
            permissions::NETWORK_REQUEST,
        ])
    }

    pub fn with_security_level(mut self, level: SecurityLevel) -> Self {
        self.security.level = level;
        self
    }

    pub fn allow_dangerous(mut self, allow: bool) -> Self {
        self.security.allow_dangerous = allow;
        self
    }

    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.user.permissions.iter().any(|p| p == permission)
    }

    /// Declared permissions the user does not hold.
    pub fn missing_permissions<'a>(&self, required: &'a [String]) -> Vec<&'a str> {
        required
            .iter()
            .filter(|p| !self.has_permission(p))
            .map(String::as_str)
            .collect()
    }
}
