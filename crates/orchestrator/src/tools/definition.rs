use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::context::ExecutionContext;
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Starting point of the risk score before pattern checks.
    pub fn base_score(&self) -> u32 {
        match self {
            Self::Low => 10,
            Self::Medium => 40,
            Self::High => 70,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSecurity {
    pub requires_approval: bool,
    pub allowed_in_web: bool,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl ToolSecurity {
    pub fn new(risk_level: RiskLevel) -> Self {
        Self {
            requires_approval: false,
            allowed_in_web: true,
            risk_level,
            permissions: Vec::new(),
        }
    }

    pub fn requires_approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }

    pub fn desktop_only(mut self) -> Self {
        self.allowed_in_web = false;
        self
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.push(permission.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl ParameterType {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
}

/// Declared parameters of a tool, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    pub parameters: Vec<ParameterSpec>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(self, name: &str, param_type: ParameterType, description: &str) -> Self {
        self.push(name, param_type, description, true)
    }

    pub fn optional(self, name: &str, param_type: ParameterType, description: &str) -> Self {
        self.push(name, param_type, description, false)
    }

    /// Restrict the most recently added parameter to `values`.
    pub fn one_of<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        if let Some(last) = self.parameters.last_mut() {
            last.enum_values = Some(values.into_iter().map(Into::into).collect());
        }
        self
    }

    fn push(mut self, name: &str, param_type: ParameterType, description: &str, required: bool) -> Self {
        self.parameters.push(ParameterSpec {
            name: name.to_string(),
            param_type,
            description: description.to_string(),
            required,
            enum_values: None,
        });
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// JSON Schema object describing the parameters.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.parameters {
            let mut property = json!({
                "type": param.param_type.as_str(),
                "description": param.description,
            });
            if let Some(values) = &param.enum_values {
                property["enum"] = Value::Array(values.clone());
            }
            properties.insert(param.name.clone(), property);
        }

        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// Executes a tool call.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, params: Value, context: ExecutionContext) -> Result<Value>;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(Value, ExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    async fn call(&self, params: Value, context: ExecutionContext) -> Result<Value> {
        (self)(params, context).await
    }
}

#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub category: String,
    pub parameters: ParameterSchema,
    pub security: ToolSecurity,
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolDefinition {
    /// Define a tool backed by an async closure.
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value, ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self::from_handler(name, description, Arc::new(handler))
    }

    pub fn from_handler(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            category: "general".to_string(),
            parameters: ParameterSchema::default(),
            security: ToolSecurity::default(),
            handler,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_parameters(mut self, parameters: ParameterSchema) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_security(mut self, security: ToolSecurity) -> Self {
        self.security = security;
        self
    }

    /// Agent-facing description of the tool.
    pub fn to_spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.to_json_schema(),
        }
    }
}

impl fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("security", &self.security)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A requested tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub params: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, params: Value) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}
