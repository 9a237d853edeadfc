//! Structural and policy checks run before a tool executes.

use std::path::Path;

use serde::Serialize;
use serde_json::Value;

use super::context::{ExecutionContext, SecurityLevel, ToolEnvironment};
use super::definition::{ParameterSchema, RiskLevel, ToolDefinition};
use crate::services::file_store::resolve_within;

/// Parameters interpreted as filesystem paths.
pub(crate) const PATH_KEYS: &[&str] = &[
    "path",
    "file",
    "file_path",
    "filePath",
    "source",
    "destination",
    "target",
    "directory",
    "cwd",
];

/// Command fragments that are refused unless the context allows dangerous
/// operations.
const FORBIDDEN_COMMANDS: &[&str] = &[
    "rm -rf /",
    "rm -fr /",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    "chmod 777 /",
    ":(){ :|:& };:",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    fn from_parts(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ParameterValidator;

impl ParameterValidator {
    /// Check required fields, primitive types and enum membership.
    pub fn validate(&self, params: &Value, schema: &ParameterSchema) -> ValidationResult {
        let empty = serde_json::Map::new();
        let object = match params {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => {
                return ValidationResult::from_parts(
                    vec!["Parameters must be a JSON object".to_string()],
                    Vec::new(),
                )
            }
        };

        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for spec in &schema.parameters {
            let value = object.get(&spec.name).filter(|v| !v.is_null());
            let Some(value) = value else {
                if spec.required {
                    errors.push(format!("Missing required parameter: {}", spec.name));
                }
                continue;
            };

            if !spec.param_type.matches(value) {
                errors.push(format!(
                    "Parameter '{}' must be of type {}",
                    spec.name, spec.param_type
                ));
                continue;
            }

            if let Some(allowed) = &spec.enum_values {
                if !allowed.contains(value) {
                    let options: Vec<String> = allowed.iter().map(display_value).collect();
                    errors.push(format!(
                        "Parameter '{}' must be one of: {}",
                        spec.name,
                        options.join(", ")
                    ));
                }
            }
        }

        for key in object.keys() {
            if schema.get(key).is_none() {
                warnings.push(format!("Unknown parameter: {key}"));
            }
        }

        ValidationResult::from_parts(errors, warnings)
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Permission, environment and workspace policy checks.
#[derive(Debug, Default, Clone, Copy)]
pub struct SecurityValidator {
    environment: ToolEnvironment,
}

impl SecurityValidator {
    pub fn new(environment: ToolEnvironment) -> Self {
        Self { environment }
    }

    pub fn validate_execution(
        &self,
        tool: &ToolDefinition,
        params: &Value,
        context: &ExecutionContext,
    ) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for permission in context.missing_permissions(&tool.security.permissions) {
            errors.push(format!("Missing permission: {permission}"));
        }

        if self.environment == ToolEnvironment::Web && !tool.security.allowed_in_web {
            errors.push(format!(
                "Tool {} is not available in the web environment",
                tool.name
            ));
        }

        if tool.security.risk_level == RiskLevel::High {
            match context.security.level {
                SecurityLevel::Restricted => errors.push(format!(
                    "High-risk tool {} is not allowed at RESTRICTED security level",
                    tool.name
                )),
                SecurityLevel::Normal if !context.security.allow_dangerous => {
                    warnings.push(format!("{} is a high-risk tool", tool.name))
                }
                _ => {}
            }
        }

        if !context.security.allow_dangerous {
            self.check_paths(params, context, &mut errors);
            self.check_command(params, &mut errors);
        }

        ValidationResult::from_parts(errors, warnings)
    }

    fn check_paths(&self, params: &Value, context: &ExecutionContext, errors: &mut Vec<String>) {
        let Some(object) = params.as_object() else {
            return;
        };

        for key in PATH_KEYS {
            let Some(raw) = object.get(*key).and_then(Value::as_str) else {
                continue;
            };
            if escapes_workspace(Path::new(raw), context.workspace.as_deref()) {
                errors.push(format!("Path escapes the workspace: {raw}"));
            }
        }
    }

    fn check_command(&self, params: &Value, errors: &mut Vec<String>) {
        let Some(command) = params.get("command").and_then(Value::as_str) else {
            return;
        };
        let lowered = command.to_lowercase();
        if let Some(forbidden) = FORBIDDEN_COMMANDS.iter().find(|f| lowered.contains(*f)) {
            errors.push(format!("Forbidden command pattern: {forbidden}"));
        }
    }
}

/// Whether `path` resolves outside `workspace`. Both relative and absolute
/// paths are folded lexically before the check.
pub(crate) fn escapes_workspace(path: &Path, workspace: Option<&Path>) -> bool {
    match workspace {
        Some(root) => resolve_within(root, path).is_none(),
        None if path.is_absolute() => false,
        None => resolve_within(Path::new(""), path).is_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::tools::context::permissions;
    use crate::tools::definition::{ParameterType, ToolSecurity};
    use serde_json::json;
    use uuid::Uuid;

    async fn noop(_params: Value) -> Result<Value> {
        Ok(Value::Null)
    }

    fn schema() -> ParameterSchema {
        ParameterSchema::new()
            .required("path", ParameterType::String, "Target file")
            .optional("mode", ParameterType::String, "Write mode")
            .one_of(["overwrite", "append"])
            .optional("retries", ParameterType::Integer, "Retry count")
    }

    fn command_tool() -> ToolDefinition {
        ToolDefinition::new("run_command", "Run a shell command", |p, _c| noop(p)).with_security(
            ToolSecurity::new(RiskLevel::High)
                .desktop_only()
                .with_permission(permissions::SYSTEM_EXECUTE),
        )
    }

    #[test]
    fn test_valid_parameters() {
        let result = ParameterValidator.validate(
            &json!({ "path": "src/lib.rs", "mode": "append", "retries": 2 }),
            &schema(),
        );
        assert!(result.valid);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_missing_required_parameter() {
        let result = ParameterValidator.validate(&json!({}), &schema());
        assert!(!result.valid);
        assert_eq!(result.errors, vec!["Missing required parameter: path"]);
    }

    #[test]
    fn test_type_and_enum_errors() {
        let result = ParameterValidator.validate(
            &json!({ "path": 5, "mode": "truncate", "retries": "two" }),
            &schema(),
        );
        assert_eq!(result.errors.len(), 3);
        assert!(result.errors[0].contains("must be of type string"));
        assert!(result.errors[1].contains("must be one of: overwrite, append"));
        assert!(result.errors[2].contains("must be of type integer"));
    }

    #[test]
    fn test_non_object_parameters() {
        let result = ParameterValidator.validate(&json!("src"), &schema());
        assert!(!result.valid);
    }

    #[test]
    fn test_unknown_parameter_is_warning() {
        let result = ParameterValidator.validate(&json!({ "path": "a", "force": true }), &schema());
        assert!(result.valid);
        assert_eq!(result.warnings, vec!["Unknown parameter: force"]);
    }

    #[test]
    fn test_security_missing_permission() {
        let context = ExecutionContext::new("agent", Uuid::new_v4());
        let result = SecurityValidator::default().validate_execution(
            &command_tool(),
            &json!({ "command": "ls" }),
            &context,
        );
        assert!(!result.valid);
        assert_eq!(result.errors, vec!["Missing permission: system.execute"]);
    }

    #[test]
    fn test_security_web_environment() {
        let context = ExecutionContext::new("agent", Uuid::new_v4()).with_all_permissions();
        let result = SecurityValidator::new(ToolEnvironment::Web).validate_execution(
            &command_tool(),
            &json!({ "command": "ls" }),
            &context,
        );
        assert!(!result.valid);
        assert!(result.errors[0].contains("web environment"));
    }

    #[test]
    fn test_security_restricted_level() {
        let context = ExecutionContext::new("agent", Uuid::new_v4())
            .with_all_permissions()
            .with_security_level(SecurityLevel::Restricted);
        let result = SecurityValidator::default().validate_execution(
            &command_tool(),
            &json!({ "command": "ls" }),
            &context,
        );
        assert!(!result.valid);
    }

    #[test]
    fn test_security_forbidden_command() {
        let context = ExecutionContext::new("agent", Uuid::new_v4()).with_all_permissions();
        let result = SecurityValidator::default().validate_execution(
            &command_tool(),
            &json!({ "command": "sudo rm -rf / --no-preserve-root" }),
            &context,
        );
        assert!(!result.valid);
        assert!(result.warnings[0].contains("high-risk"));

        let dangerous = context.allow_dangerous(true);
        let result = SecurityValidator::default().validate_execution(
            &command_tool(),
            &json!({ "command": "sudo rm -rf / --no-preserve-root" }),
            &dangerous,
        );
        assert!(result.valid);
    }

    #[test]
    fn test_security_path_escape() {
        let context = ExecutionContext::new("agent", Uuid::new_v4())
            .with_all_permissions()
            .with_workspace("/work/project");
        let tool = ToolDefinition::new("write_file", "Write", |p, _c| noop(p));

        let escaped = SecurityValidator::default().validate_execution(
            &tool,
            &json!({ "path": "../../etc/passwd" }),
            &context,
        );
        assert_eq!(escaped.errors, vec!["Path escapes the workspace: ../../etc/passwd"]);

        let inside = SecurityValidator::default().validate_execution(
            &tool,
            &json!({ "path": "src/../README.md" }),
            &context,
        );
        assert!(inside.valid);
    }

    #[test]
    fn test_escapes_workspace() {
        let root = Path::new("/work/project");
        assert!(escapes_workspace(Path::new("/etc/hosts"), Some(root)));
        assert!(!escapes_workspace(Path::new("/work/project/src"), Some(root)));
        assert!(escapes_workspace(Path::new("a/../../b"), Some(root)));
        assert!(!escapes_workspace(Path::new("./a/b/../c"), Some(root)));
        assert!(escapes_workspace(Path::new("/work/project/../../etc"), Some(root)));
        assert!(escapes_workspace(Path::new("/work/project/src/../../other"), Some(root)));
        assert!(!escapes_workspace(Path::new("/work/project/src/../lib"), Some(root)));
        assert!(escapes_workspace(Path::new("../sibling"), None));
    }

    #[test]
    fn test_security_absolute_cwd_with_parent_dirs() {
        let context = ExecutionContext::new("agent", Uuid::new_v4())
            .with_all_permissions()
            .allow_dangerous(false)
            .with_workspace("/work/project");
        let result = SecurityValidator::default().validate_execution(
            &command_tool(),
            &json!({ "command": "ls", "cwd": "/work/project/../../etc" }),
            &context,
        );
        assert!(!result.valid);
        assert_eq!(
            result.errors,
            vec!["Path escapes the workspace: /work/project/../../etc"]
        );
    }
}
