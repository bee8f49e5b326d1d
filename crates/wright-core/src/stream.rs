use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::ToolCallId;

/// Parameter map of a tool invocation, keyed by wire parameter name.
pub type ToolParams = BTreeMap<String, String>;

/// Lifecycle position of a tool as reported to clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Started,
    Partial,
    Executing,
    Completed,
    Failed,
}

/// Client-facing events. Each one serializes to a single JSON object so the
/// transport can forward them line by line as they are produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Text {
        text: String,
    },
    Thinking {
        text: String,
    },
    Tool {
        tool_name: String,
        tool_id: ToolCallId,
        status: ToolStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<ToolParams>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        extra: Option<serde_json::Value>,
    },
    Usage {
        input_tokens: u64,
        output_tokens: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_write_tokens: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_read_tokens: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_cost: Option<f64>,
    },
}

impl StreamEvent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn thinking(text: impl Into<String>) -> Self {
        Self::Thinking { text: text.into() }
    }

    /// A tool lifecycle event carrying only a status and optional params.
    pub fn tool(
        tool_name: impl Into<String>,
        tool_id: ToolCallId,
        status: ToolStatus,
        params: Option<ToolParams>,
    ) -> Self {
        Self::Tool {
            tool_name: tool_name.into(),
            tool_id,
            status,
            params,
            result: None,
            error: None,
            extra: None,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Thinking { .. } => "thinking",
            Self::Tool { .. } => "tool",
            Self::Usage { .. } => "usage",
        }
    }

    /// Text payload of Text and Thinking events.
    pub fn text_content(&self) -> Option<&str> {
        match self {
            Self::Text { text } | Self::Thinking { text } => Some(text),
            _ => None,
        }
    }

    pub fn tool_status(&self) -> Option<ToolStatus> {
        match self {
            Self::Tool { status, .. } => Some(*status),
            _ => None,
        }
    }
}
