//! The standard post-commit hook pipeline: code check, git snapshot and
//! project backup.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use wright_core::errors::HookError;
use wright_core::events::DomainEvent;
use wright_core::hooks::{HookCallback, HookContext, TurnHook, WriteTurn};
use wright_core::services::{BackupService, RunnerClient, Snapshotter};

use crate::event_bus::EventBus;
use crate::file_ops::FileOperationManager;
use crate::tools::add_dependency::project_id;

pub const CODE_CHECK: &str = "code_check";
pub const GIT_SNAPSHOT: &str = "git_snapshot";
pub const PROJECT_BACKUP: &str = "project_backup";

/// Result recorded by the code-check hook.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeCheckOutcome {
    pub passed: bool,
    pub messages: Vec<String>,
}

impl CodeCheckOutcome {
    /// Decode the value a code-check hook recorded in its context.
    pub fn from_context(ctx: &HookContext) -> Option<Self> {
        ctx.result
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Build check, then lint unless `skip_lint`.
pub async fn perform_code_checks(
    project_id: &str,
    runner: &dyn RunnerClient,
    skip_lint: bool,
) -> Result<CodeCheckOutcome, HookError> {
    let mut outcome = CodeCheckOutcome {
        passed: true,
        messages: Vec::new(),
    };

    let build = runner.check_errors(project_id).await?;
    if build.build_errors {
        outcome.passed = false;
    }
    outcome.messages.push(format!(
        "[Build Error Check]\n{}",
        build.message.as_deref().unwrap_or("No errors found")
    ));

    if !skip_lint {
        let lint = runner.lint_project(project_id).await?;
        if lint.lint_errors {
            outcome.passed = false;
        }
        outcome.messages.push(format!(
            "[Linting Result]\n{}",
            lint.message.as_deref().unwrap_or("No linting issues found")
        ));
    }

    info!(project_id, passed = outcome.passed, "code checks finished");
    Ok(outcome)
}

pub struct CodeCheckHook {
    runner: Arc<dyn RunnerClient>,
    skip_lint: bool,
}

impl CodeCheckHook {
    pub fn new(runner: Arc<dyn RunnerClient>, skip_lint: bool) -> Self {
        Self { runner, skip_lint }
    }
}

#[async_trait]
impl TurnHook for CodeCheckHook {
    async fn run(&self, turn: &WriteTurn) -> Result<Value, HookError> {
        let outcome = perform_code_checks(&project_id(&turn.cwd), self.runner.as_ref(), self.skip_lint).await?;
        serde_json::to_value(outcome).map_err(|e| HookError::Failed(e.to_string()))
    }
}

/// Why a follow-up hook should not run, if it should not.
fn skip_reason(turn: &WriteTurn) -> Option<&'static str> {
    if turn.changes.is_empty() {
        return Some("no changes");
    }
    let Some(ctx) = turn.hook_result(CODE_CHECK) else {
        return Some("code check did not run");
    };
    if !ctx.is_success() {
        return Some("code check failed");
    }
    match CodeCheckOutcome::from_context(ctx) {
        Some(outcome) if outcome.passed => None,
        Some(_) => Some("code check reported errors"),
        None => Some("code check result missing"),
    }
}

pub struct GitSnapshotHook {
    snapshotter: Arc<dyn Snapshotter>,
}

impl GitSnapshotHook {
    pub fn new(snapshotter: Arc<dyn Snapshotter>) -> Self {
        Self { snapshotter }
    }
}

#[async_trait]
impl TurnHook for GitSnapshotHook {
    async fn run(&self, turn: &WriteTurn) -> Result<Value, HookError> {
        if let Some(reason) = skip_reason(turn) {
            info!(turn_id = %turn.turn_id, reason, "skipping git snapshot");
            return Ok(Value::Null);
        }
        let message = self.snapshotter.snapshot(&turn.cwd, None).await?;
        Ok(Value::String(message))
    }
}

pub struct ProjectBackupHook {
    backup: Arc<dyn BackupService>,
}

impl ProjectBackupHook {
    pub fn new(backup: Arc<dyn BackupService>) -> Self {
        Self { backup }
    }
}

#[async_trait]
impl TurnHook for ProjectBackupHook {
    async fn run(&self, turn: &WriteTurn) -> Result<Value, HookError> {
        if let Some(reason) = skip_reason(turn) {
            info!(turn_id = %turn.turn_id, reason, "skipping project backup");
            return Ok(Value::Null);
        }
        let dest = self.backup.backup(&turn.cwd).await?;
        Ok(Value::String(dest))
    }
}

/// Publishes `HookFailed` when the hook it is attached to fails.
pub struct HookFailedCallback {
    bus: Arc<EventBus>,
}

impl HookFailedCallback {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl HookCallback for HookFailedCallback {
    async fn on_complete(&self, ctx: &HookContext) -> Result<(), HookError> {
        if !ctx.is_success() {
            let error = ctx.error.clone().unwrap_or_else(|| "unknown error".to_string());
            warn!(hook = %ctx.hook_name, error = %error, "hook failed");
            self.bus.publish(DomainEvent::HookFailed {
                hook_name: ctx.hook_name.clone(),
                error,
            });
        }
        Ok(())
    }
}

/// Registers the standard hooks on a file operation manager.
pub struct HookManager {
    files: Arc<FileOperationManager>,
    bus: Arc<EventBus>,
    runner: Arc<dyn RunnerClient>,
    snapshotter: Arc<dyn Snapshotter>,
    backup: Arc<dyn BackupService>,
    skip_lint: bool,
}

impl HookManager {
    pub fn new(
        files: Arc<FileOperationManager>,
        bus: Arc<EventBus>,
        runner: Arc<dyn RunnerClient>,
        snapshotter: Arc<dyn Snapshotter>,
        backup: Arc<dyn BackupService>,
        skip_lint: bool,
    ) -> Self {
        Self {
            files,
            bus,
            runner,
            snapshotter,
            backup,
            skip_lint,
        }
    }

    /// Code check goes first: snapshot and backup read its result.
    pub fn register_all_hooks(&self, code_check_callback: Option<Arc<dyn HookCallback>>) {
        self.files.add_post_commit_hook(
            CODE_CHECK,
            Arc::new(CodeCheckHook::new(self.runner.clone(), self.skip_lint)),
            code_check_callback,
            true,
        );
        let failed: Arc<dyn HookCallback> = Arc::new(HookFailedCallback::new(self.bus.clone()));
        self.files.add_post_commit_hook(
            GIT_SNAPSHOT,
            Arc::new(GitSnapshotHook::new(self.snapshotter.clone())),
            Some(failed.clone()),
            false,
        );
        self.files.add_post_commit_hook(
            PROJECT_BACKUP,
            Arc::new(ProjectBackupHook::new(self.backup.clone())),
            Some(failed),
            false,
        );
        info!("registered post-commit hooks");
    }
}
