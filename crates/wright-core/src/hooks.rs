use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::HookError;
use crate::ids::TurnId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Write,
    Delete,
    Rename,
    AddDependency,
}

/// One staged mutation of the workspace. For renames `content` holds the
/// destination path; for dependency adds it holds the package name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub change_type: ChangeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl FileChange {
    pub fn new(path: impl Into<String>, change_type: ChangeType, content: Option<String>) -> Self {
        Self {
            path: path.into(),
            change_type,
            content,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookStatus {
    Pending,
    Success,
    Failed,
    Aborted,
}

/// Outcome of one hook run, handed to its callback and recorded in the turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HookContext {
    pub hook_name: String,
    pub status: HookStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HookContext {
    pub fn pending(hook_name: impl Into<String>) -> Self {
        Self {
            hook_name: hook_name.into(),
            status: HookStatus::Pending,
            result: None,
            error: None,
        }
    }

    pub fn succeeded(hook_name: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            hook_name: hook_name.into(),
            status: HookStatus::Success,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(hook_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            hook_name: hook_name.into(),
            status: HookStatus::Failed,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == HookStatus::Success
    }
}

/// The live transaction of one agent step. Non-blocking hooks receive a
/// clone, so nothing they record reaches the live turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WriteTurn {
    pub turn_id: TurnId,
    pub cwd: PathBuf,
    pub changes: Vec<FileChange>,
    pub hook_results: HashMap<String, HookContext>,
}

impl WriteTurn {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            turn_id: TurnId::new(),
            cwd: cwd.into(),
            changes: Vec::new(),
            hook_results: HashMap::new(),
        }
    }

    pub fn hook_result(&self, name: &str) -> Option<&HookContext> {
        self.hook_results.get(name)
    }
}

/// A function run against a turn, before or after its changes are applied.
#[async_trait]
pub trait TurnHook: Send + Sync {
    async fn run(&self, turn: &WriteTurn) -> Result<serde_json::Value, HookError>;
}

/// Invoked with the hook's outcome, whether it succeeded or failed.
#[async_trait]
pub trait HookCallback: Send + Sync {
    async fn on_complete(&self, ctx: &HookContext) -> Result<(), HookError>;
}
