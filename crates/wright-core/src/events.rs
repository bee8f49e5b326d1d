use serde::{Deserialize, Serialize};

use crate::ids::{TaskId, ToolCallId, TurnId};
use crate::stream::ToolParams;

/// Routing key for the in-process event bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    TaskAborted,
    TaskTimeout,
    ToolRequested,
    ToolExecuting,
    ToolCompleted,
    ToolFailed,
    TurnStarted,
    TurnCompleted,
    TurnDiscarded,
    FileRead,
    FileWritten,
    FileDeleted,
    FileRenamed,
    FileDiffApplied,
    DependencyAdded,
    StreamStarted,
    StreamEnded,
    ThinkingStarted,
    ThinkingEnded,
    MemoryCompactRequested,
    HookFailed,
    UsageUpdated,
    MigrationFailed,
}

/// Internal domain events. Unlike [`crate::stream::StreamEvent`] these never
/// leave the process; they decouple the engine's components from each other.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DomainEvent {
    TaskStarted {
        task_id: TaskId,
    },
    TaskCompleted {
        task_id: TaskId,
    },
    TaskFailed {
        task_id: TaskId,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    TaskAborted {
        task_id: TaskId,
    },
    TaskTimeout {
        task_id: TaskId,
    },
    ToolRequested {
        name: String,
        id: ToolCallId,
        params: ToolParams,
    },
    ToolExecuting {
        name: String,
        params: ToolParams,
    },
    ToolCompleted {
        name: String,
        id: ToolCallId,
        params: ToolParams,
        result: String,
    },
    ToolFailed {
        name: String,
        id: ToolCallId,
        params: ToolParams,
        error: String,
    },
    TurnStarted {
        turn_id: TurnId,
    },
    TurnCompleted {
        turn_id: TurnId,
    },
    TurnDiscarded {
        turn_id: TurnId,
    },
    FileRead {
        path: String,
    },
    FileWritten {
        path: String,
        metadata: serde_json::Map<String, serde_json::Value>,
    },
    FileDeleted {
        path: String,
        metadata: serde_json::Map<String, serde_json::Value>,
    },
    FileRenamed {
        source_path: String,
        destination_path: String,
        metadata: serde_json::Map<String, serde_json::Value>,
    },
    FileDiffApplied {
        path: String,
    },
    DependencyAdded {
        dependency: String,
        metadata: serde_json::Map<String, serde_json::Value>,
    },
    StreamStarted,
    StreamEnded,
    ThinkingStarted,
    ThinkingEnded,
    MemoryCompactRequested {
        reason: String,
    },
    HookFailed {
        hook_name: String,
        error: String,
    },
    UsageUpdated {
        input_tokens: u64,
        output_tokens: u64,
    },
    MigrationFailed {
        migration_name: String,
        error: String,
        path: String,
    },
}

impl DomainEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::TaskStarted { .. } => EventType::TaskStarted,
            Self::TaskCompleted { .. } => EventType::TaskCompleted,
            Self::TaskFailed { .. } => EventType::TaskFailed,
            Self::TaskAborted { .. } => EventType::TaskAborted,
            Self::TaskTimeout { .. } => EventType::TaskTimeout,
            Self::ToolRequested { .. } => EventType::ToolRequested,
            Self::ToolExecuting { .. } => EventType::ToolExecuting,
            Self::ToolCompleted { .. } => EventType::ToolCompleted,
            Self::ToolFailed { .. } => EventType::ToolFailed,
            Self::TurnStarted { .. } => EventType::TurnStarted,
            Self::TurnCompleted { .. } => EventType::TurnCompleted,
            Self::TurnDiscarded { .. } => EventType::TurnDiscarded,
            Self::FileRead { .. } => EventType::FileRead,
            Self::FileWritten { .. } => EventType::FileWritten,
            Self::FileDeleted { .. } => EventType::FileDeleted,
            Self::FileRenamed { .. } => EventType::FileRenamed,
            Self::FileDiffApplied { .. } => EventType::FileDiffApplied,
            Self::DependencyAdded { .. } => EventType::DependencyAdded,
            Self::StreamStarted => EventType::StreamStarted,
            Self::StreamEnded => EventType::StreamEnded,
            Self::ThinkingStarted => EventType::ThinkingStarted,
            Self::ThinkingEnded => EventType::ThinkingEnded,
            Self::MemoryCompactRequested { .. } => EventType::MemoryCompactRequested,
            Self::HookFailed { .. } => EventType::HookFailed,
            Self::UsageUpdated { .. } => EventType::UsageUpdated,
            Self::MigrationFailed { .. } => EventType::MigrationFailed,
        }
    }
}
