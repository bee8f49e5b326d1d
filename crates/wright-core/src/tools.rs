use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::ids::{TaskId, ToolCallId};
use crate::stream::ToolParams;

/// Context available to tools during execution.
#[derive(Clone, Debug)]
pub struct ToolContext {
    pub task_id: TaskId,
    pub working_directory: PathBuf,
    pub abort_signal: CancellationToken,
}

/// Trait implemented by each tool in the catalog.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Wire name, lowercase and hyphenated (`read-file`).
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    /// Parameters that must be present and non-empty.
    fn required_params(&self) -> &[&'static str];

    /// Parameters holding workspace paths; these must be relative.
    fn path_params(&self) -> &[&'static str] {
        &[]
    }

    async fn execute(&self, params: &ToolParams, ctx: &ToolContext) -> Result<String, ToolError>;
}

/// A tool invocation produced by the parser once its closing tag is seen.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub name: String,
    pub params: ToolParams,
    pub tool_id: ToolCallId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolResultStatus {
    Success,
    Failed,
}

/// Outcome of one tool call as recorded in the task's tool state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool: String,
    pub tool_id: ToolCallId,
    pub status: ToolResultStatus,
    pub params: ToolParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

impl ToolResult {
    pub fn is_success(&self) -> bool {
        self.status == ToolResultStatus::Success
    }
}

/// Stable failure codes surfaced to the model alongside the message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolErrorCode {
    UnknownTool,
    MissingParam,
    InvalidParam,
    InvalidPath,
    FileNotFound,
    ReadError,
    WriteError,
    MergeFailed,
    DiffError,
    DeleteError,
    SourceNotFound,
    DestinationExists,
    RenameError,
    DependencyError,
    PathNotFound,
    SearchError,
    ListError,
    ExecutionError,
}

impl ToolErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownTool => "UNKNOWN_TOOL",
            Self::MissingParam => "MISSING_PARAM",
            Self::InvalidParam => "INVALID_PARAM",
            Self::InvalidPath => "INVALID_PATH",
            Self::FileNotFound => "FILE_NOT_FOUND",
            Self::ReadError => "READ_ERROR",
            Self::WriteError => "WRITE_ERROR",
            Self::MergeFailed => "MERGE_FAILED",
            Self::DiffError => "DIFF_ERROR",
            Self::DeleteError => "DELETE_ERROR",
            Self::SourceNotFound => "SOURCE_NOT_FOUND",
            Self::DestinationExists => "DESTINATION_EXISTS",
            Self::RenameError => "RENAME_ERROR",
            Self::DependencyError => "DEPENDENCY_ERROR",
            Self::PathNotFound => "PATH_NOT_FOUND",
            Self::SearchError => "SEARCH_ERROR",
            Self::ListError => "LIST_ERROR",
            Self::ExecutionError => "EXECUTION_ERROR",
        }
    }
}

impl fmt::Display for ToolErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ToolError {
    pub tool_name: String,
    pub code: ToolErrorCode,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ToolError {
    pub fn new(tool_name: impl Into<String>, code: ToolErrorCode, message: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn missing_param(tool_name: &str, param: &str) -> Self {
        Self::new(
            tool_name,
            ToolErrorCode::MissingParam,
            format!(
                "Error executing {tool_name}:\n<error-details>\nMissing required parameter '{param}'. \
                 Provide the parameter and retry.\n</error-details>"
            ),
        )
        .with_details(serde_json::json!({ "param": param }))
    }

    pub fn invalid_param(tool_name: &str, code: ToolErrorCode, param: &str, reason: &str) -> Self {
        Self::new(
            tool_name,
            code,
            format!("Error executing {tool_name}:\n<error-details>\nInvalid value for '{param}': {reason}\n</error-details>"),
        )
        .with_details(serde_json::json!({ "param": param }))
    }

    pub fn unknown_tool(tool_name: &str) -> Self {
        Self::invalid_param(tool_name, ToolErrorCode::UnknownTool, "tool_name", "Unsupported tool")
    }

    /// Message reported to the model and to clients on failure.
    pub fn report(&self) -> String {
        format!("{} (Error code: {})", self.message, self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_serializes_screaming() {
        let json = serde_json::to_string(&ToolErrorCode::DestinationExists).unwrap();
        assert_eq!(json, r#""DESTINATION_EXISTS""#);
        assert_eq!(ToolErrorCode::DestinationExists.as_str(), "DESTINATION_EXISTS");
    }

    #[test]
    fn missing_param_message() {
        let err = ToolError::missing_param("read-file", "path");
        assert_eq!(err.code, ToolErrorCode::MissingParam);
        assert!(err.message.contains("Missing required parameter 'path'"));
        assert!(err.report().ends_with("(Error code: MISSING_PARAM)"));
    }

    #[test]
    fn unknown_tool_message() {
        let err = ToolError::unknown_tool("kb-search");
        assert_eq!(err.code, ToolErrorCode::UnknownTool);
        assert!(err.message.contains("Invalid value for 'tool_name': Unsupported tool"));
    }

    #[test]
    fn tool_result_skips_absent_fields() {
        let result = ToolResult {
            tool: "read-file".into(),
            tool_id: ToolCallId::from_raw("tool_1"),
            status: ToolResultStatus::Success,
            params: ToolParams::new(),
            result: Some("1 | hi".into()),
            error: None,
            extra: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "success");
        assert!(json.get("error").is_none());
        assert!(result.is_success());
    }
}
