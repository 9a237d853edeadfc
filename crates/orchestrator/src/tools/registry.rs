use std::collections::HashMap;

use tracing::debug;

use super::context::{permissions, ExecutionContext, SecurityLevel, ToolEnvironment};
use super::definition::{RiskLevel, ToolDefinition, ToolSpec};

/// Tool definitions keyed by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDefinition>,
    environment: ToolEnvironment,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_environment(mut self, environment: ToolEnvironment) -> Self {
        self.environment = environment;
        self
    }

    pub fn environment(&self) -> ToolEnvironment {
        self.environment
    }

    /// Register a tool. A later registration under the same name replaces
    /// the earlier one, which is returned.
    pub fn register_tool(&mut self, tool: ToolDefinition) -> Option<ToolDefinition> {
        let previous = self.tools.insert(tool.name.clone(), tool);
        if let Some(previous) = &previous {
            debug!(tool = %previous.name, "Replaced tool registration");
        }
        previous
    }

    pub fn unregister_tool(&mut self, name: &str) -> Option<ToolDefinition> {
        self.tools.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// All tools, sorted by name.
    pub fn tools(&self) -> Vec<&ToolDefinition> {
        let mut tools: Vec<_> = self.tools.values().collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools().into_iter().map(|t| t.name.clone()).collect()
    }

    /// Tools the caller may use in the current environment, sorted by name.
    pub fn get_available_tools(&self, context: &ExecutionContext) -> Vec<&ToolDefinition> {
        self.tools()
            .into_iter()
            .filter(|tool| self.is_available(tool, context))
            .collect()
    }

    pub fn tool_specs(&self, context: &ExecutionContext) -> Vec<ToolSpec> {
        self.get_available_tools(context)
            .into_iter()
            .map(ToolDefinition::to_spec)
            .collect()
    }

    fn is_available(&self, tool: &ToolDefinition, context: &ExecutionContext) -> bool {
        if self.environment == ToolEnvironment::Web && !tool.security.allowed_in_web {
            return false;
        }

        if !context.missing_permissions(&tool.security.permissions).is_empty() {
            return false;
        }

        if context.security.level == SecurityLevel::Restricted {
            let elevated = tool.security.risk_level == RiskLevel::High
                || tool
                    .security
                    .permissions
                    .iter()
                    .any(|p| permissions::is_high_risk(p));
            if elevated {
                return false;
            }
        }

        true
    }
}
