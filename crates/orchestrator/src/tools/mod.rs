//! Tool registry and the execution pipeline that gates every tool call.

pub mod approval;
pub mod audit;
pub mod builtin;
pub mod context;
pub mod definition;
pub mod manager;
pub mod registry;
pub mod risk;
pub mod validation;

pub use approval::{
    ApprovalDecision, ApprovalFlow, ApprovalOutcome, ApprovalPrompt, ApprovalStage,
    StaticApprovalPrompt,
};
pub use audit::{
    args_preview, ApprovalLogEntry, ApprovalReport, AuditLogEntry, AuditOutcome, BoundedLog,
    DEFAULT_LOG_CAPACITY,
};
pub use builtin::{builtin_tools, register_builtin_tools};
pub use context::{
    permissions, ExecutionContext, SecurityContext, SecurityLevel, ToolEnvironment, UserContext,
};
pub use definition::{
    ParameterSchema, ParameterSpec, ParameterType, RiskLevel, ToolCall, ToolDefinition,
    ToolHandler, ToolSecurity, ToolSpec,
};
pub use manager::{ToolCallOutcome, ToolManager, ToolStatistics};
pub use registry::ToolRegistry;
pub use risk::{RiskAssessment, RiskAssessor};
pub use validation::{ParameterValidator, SecurityValidator, ValidationResult};
