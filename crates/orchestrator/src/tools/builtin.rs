//! Filesystem and process tools available to every session.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};

use super::context::permissions;
use super::definition::{ParameterSchema, ParameterType, RiskLevel, ToolDefinition, ToolSecurity};
use super::registry::ToolRegistry;
use crate::error::{OrchestratorError, Result};
use crate::services::{FileStore, ProcessRunner};

fn string_param(params: &Value, name: &str) -> Result<String> {
    params
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| OrchestratorError::Validation(format!("Missing required parameter: {name}")))
}

async fn read_file(files: Arc<dyn FileStore>, params: Value) -> Result<Value> {
    let path = string_param(&params, "path")?;
    let content = files.read(&path).await?;
    Ok(json!({ "path": path, "content": content }))
}

async fn file_exists(files: Arc<dyn FileStore>, params: Value) -> Result<Value> {
    let path = string_param(&params, "path")?;
    let exists = files.exists(&path).await?;
    Ok(json!({ "path": path, "exists": exists }))
}

async fn write_file(files: Arc<dyn FileStore>, params: Value) -> Result<Value> {
    let path = string_param(&params, "path")?;
    let content = string_param(&params, "content")?;
    files.write(&path, &content).await?;
    Ok(json!({ "path": path, "bytes": content.len() }))
}

async fn create_directory(files: Arc<dyn FileStore>, params: Value) -> Result<Value> {
    let path = string_param(&params, "path")?;
    files.create_directory(&path).await?;
    Ok(json!({ "path": path, "created": true }))
}

async fn run_command(processes: Arc<dyn ProcessRunner>, params: Value) -> Result<Value> {
    let command = string_param(&params, "command")?;
    let cwd = params.get("cwd").and_then(Value::as_str).map(PathBuf::from);

    let output = processes.run(&command, cwd.as_deref()).await?;
    if !output.success() {
        return Err(OrchestratorError::ExecutionFailed(format!(
            "Command '{}' exited with code {}: {}",
            command,
            output.exit_code,
            output.stderr.trim()
        )));
    }
    Ok(json!({
        "exitCode": output.exit_code,
        "stdout": output.stdout,
        "stderr": output.stderr,
    }))
}

/// The built-in tool set, bound to the given adapters.
pub fn builtin_tools(files: Arc<dyn FileStore>, processes: Arc<dyn ProcessRunner>) -> Vec<ToolDefinition> {
    let path_only = ParameterSchema::new().required("path", ParameterType::String, "Workspace-relative path");

    let read = {
        let files = files.clone();
        ToolDefinition::new("read_file", "Read a text file from the workspace", move |p, _c| {
            read_file(files.clone(), p)
        })
        .with_category("filesystem")
        .with_parameters(path_only.clone())
        .with_security(ToolSecurity::new(RiskLevel::Low).with_permission(permissions::FILESYSTEM_READ))
    };

    let exists = {
        let files = files.clone();
        ToolDefinition::new("file_exists", "Check whether a path exists", move |p, _c| {
            file_exists(files.clone(), p)
        })
        .with_category("filesystem")
        .with_parameters(path_only.clone())
        .with_security(ToolSecurity::new(RiskLevel::Low).with_permission(permissions::FILESYSTEM_READ))
    };

    let write = {
        let files = files.clone();
        ToolDefinition::new("write_file", "Write a text file, creating parent directories", move |p, _c| {
            write_file(files.clone(), p)
        })
        .with_category("filesystem")
        .with_parameters(
            ParameterSchema::new()
                .required("path", ParameterType::String, "Workspace-relative path")
                .required("content", ParameterType::String, "Full file content"),
        )
        .with_security(
            ToolSecurity::new(RiskLevel::Medium)
                .requires_approval()
                .with_permission(permissions::FILESYSTEM_WRITE),
        )
    };

    let mkdir = ToolDefinition::new("create_directory", "Create a directory and its parents", move |p, _c| {
        create_directory(files.clone(), p)
    })
    .with_category("filesystem")
    .with_parameters(path_only)
    .with_security(
        ToolSecurity::new(RiskLevel::Medium)
            .requires_approval()
            .with_permission(permissions::FILESYSTEM_WRITE),
    );

    let command = ToolDefinition::new("run_command", "Run a shell command in the workspace", move |p, _c| {
        run_command(processes.clone(), p)
    })
    .with_category("process")
    .with_parameters(
        ParameterSchema::new()
            .required("command", ParameterType::String, "Shell command line")
            .optional("cwd", ParameterType::String, "Working directory relative to the workspace"),
    )
    .with_security(
        ToolSecurity::new(RiskLevel::High)
            .requires_approval()
            .desktop_only()
            .with_permission(permissions::SYSTEM_EXECUTE),
    );

    vec![read, exists, write, mkdir, command]
}

pub fn register_builtin_tools(
    registry: &mut ToolRegistry,
    files: Arc<dyn FileStore>,
    processes: Arc<dyn ProcessRunner>,
) {
    for tool in builtin_tools(files, processes) {
        registry.register_tool(tool);
    }
}
