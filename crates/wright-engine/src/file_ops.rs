use std::io::Write;
use std::panic::AssertUnwindSafe;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tracing::{debug, error, info, instrument, warn};
use wright_core::errors::HookError;
use wright_core::events::DomainEvent;
use wright_core::hooks::{ChangeType, FileChange, HookCallback, HookContext, TurnHook, WriteTurn};
use wright_core::ids::TurnId;

use crate::config::AgentConfig;
use crate::error::FileOpError;
use crate::event_bus::{panic_message, EventBus};

#[derive(Clone)]
struct RegisteredHook {
    name: String,
    hook: Arc<dyn TurnHook>,
    callback: Option<Arc<dyn HookCallback>>,
    blocking: bool,
}

/// Stages file-system changes for the current turn and applies them on
/// commit, running the registered hooks around the application.
///
/// Changes are applied in log order with no rollback: if one fails, the
/// earlier ones stay on disk and the error is returned.
pub struct FileOperationManager {
    cwd: PathBuf,
    bus: Arc<EventBus>,
    protected_dirs: Vec<String>,
    protected_files: Vec<String>,
    hook_timeout: Duration,
    turn: Mutex<Option<WriteTurn>>,
    write_hooks: RwLock<Vec<RegisteredHook>>,
    post_commit_hooks: RwLock<Vec<RegisteredHook>>,
}

impl FileOperationManager {
    pub fn new(cwd: impl Into<PathBuf>, bus: Arc<EventBus>, config: &AgentConfig) -> Self {
        Self {
            cwd: cwd.into(),
            bus,
            protected_dirs: config.protected_dirs.clone(),
            protected_files: config.protected_files.clone(),
            hook_timeout: config.hook_timeout,
            turn: Mutex::new(None),
            write_hooks: RwLock::new(Vec::new()),
            post_commit_hooks: RwLock::new(Vec::new()),
        }
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Absolute, lexically normalized form of a workspace path.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            normalize(path)
        } else {
            normalize(&self.cwd.join(path))
        }
    }

    fn resolve(&self, path: &str) -> String {
        self.resolve_path(path).to_string_lossy().into_owned()
    }

    /// Exact protected file, or any component naming a protected directory.
    pub fn is_protected(&self, relative: &str) -> bool {
        let normalized = normalize(Path::new(relative));
        let as_str = normalized.to_string_lossy();
        if self.protected_files.iter().any(|f| *f == as_str) {
            return true;
        }
        normalized.components().any(|c| match c {
            Component::Normal(part) => self.protected_dirs.iter().any(|d| part == d.as_str()),
            _ => false,
        })
    }

    pub fn has_active_turn(&self) -> bool {
        self.turn.lock().is_some()
    }

    pub fn begin_turn(&self) -> Result<TurnId, FileOpError> {
        let turn_id = {
            let mut slot = self.turn.lock();
            if let Some(active) = slot.as_ref() {
                warn!(turn_id = %active.turn_id, "turn already active");
                return Err(FileOpError::TurnActive(active.turn_id.clone()));
            }
            let turn = WriteTurn::new(self.cwd.clone());
            let id = turn.turn_id.clone();
            *slot = Some(turn);
            id
        };
        debug!(turn_id = %turn_id, "turn started");
        self.bus.publish(DomainEvent::TurnStarted {
            turn_id: turn_id.clone(),
        });
        Ok(turn_id)
    }

    /// Drop the active turn and its staged changes, if any.
    pub fn discard_turn(&self) {
        let discarded = self.turn.lock().take();
        if let Some(turn) = discarded {
            debug!(turn_id = %turn.turn_id, changes = turn.changes.len(), "turn discarded");
            self.bus.publish(DomainEvent::TurnDiscarded {
                turn_id: turn.turn_id,
            });
        }
    }

    fn push_change(&self, change: FileChange) -> Result<(), FileOpError> {
        let mut slot = self.turn.lock();
        let turn = slot.as_mut().ok_or(FileOpError::NoActiveTurn)?;
        turn.changes.push(change);
        Ok(())
    }

    pub fn write_file(
        &self,
        path: &str,
        content: impl Into<String>,
        metadata: Option<Map<String, Value>>,
    ) -> Result<(), FileOpError> {
        if self.is_protected(path) {
            return Err(FileOpError::ProtectedWrite(path.to_string()));
        }
        let change = FileChange::new(self.resolve(path), ChangeType::Write, Some(content.into()))
            .with_metadata(metadata.unwrap_or_default());
        self.push_change(change)
    }

    /// A write carrying the pre-merge content, published as
    /// `FILE_DIFF_APPLIED` once staged.
    pub fn apply_diff(&self, path: &str, merged: impl Into<String>, original: &str) -> Result<(), FileOpError> {
        let mut metadata = Map::new();
        metadata.insert("type".into(), Value::from("diff"));
        metadata.insert("original".into(), Value::from(original));
        self.write_file(path, merged, Some(metadata))?;
        self.bus.publish(DomainEvent::FileDiffApplied {
            path: self.resolve(path),
        });
        Ok(())
    }

    pub fn delete_file(&self, path: &str, metadata: Option<Map<String, Value>>) -> Result<(), FileOpError> {
        if self.is_protected(path) {
            return Err(FileOpError::ProtectedDelete(path.to_string()));
        }
        if !self.has_active_turn() {
            return Err(FileOpError::NoActiveTurn);
        }
        let abs = self.resolve_path(path);
        if !abs.exists() {
            return Err(FileOpError::NotFound(abs.to_string_lossy().into_owned()));
        }
        let change = FileChange::new(abs.to_string_lossy(), ChangeType::Delete, None)
            .with_metadata(metadata.unwrap_or_default());
        self.push_change(change)
    }

    pub fn rename_file(
        &self,
        source: &str,
        destination: &str,
        metadata: Option<Map<String, Value>>,
    ) -> Result<(), FileOpError> {
        if self.is_protected(source) {
            return Err(FileOpError::ProtectedSource(source.to_string()));
        }
        if self.is_protected(destination) {
            return Err(FileOpError::ProtectedDestination(destination.to_string()));
        }
        if !self.has_active_turn() {
            return Err(FileOpError::NoActiveTurn);
        }
        let abs_source = self.resolve_path(source);
        let abs_destination = self.resolve(destination);
        if !abs_source.exists() {
            return Err(FileOpError::SourceNotFound(abs_source.to_string_lossy().into_owned()));
        }
        if Path::new(&abs_destination).exists() {
            return Err(FileOpError::DestinationExists(abs_destination));
        }
        let metadata = metadata.unwrap_or_else(|| {
            let mut m = Map::new();
            m.insert("destination".into(), Value::from(abs_destination.clone()));
            m
        });
        let change = FileChange::new(abs_source.to_string_lossy(), ChangeType::Rename, Some(abs_destination))
            .with_metadata(metadata);
        self.push_change(change)
    }

    /// Project-level change: the path is empty and the content is the
    /// package name.
    pub fn add_dependency(&self, name: &str, metadata: Option<Map<String, Value>>) -> Result<(), FileOpError> {
        let metadata = metadata.unwrap_or_else(|| {
            let mut m = Map::new();
            m.insert("dependency_name".into(), Value::from(name));
            m
        });
        let change = FileChange::new("", ChangeType::AddDependency, Some(name.to_string())).with_metadata(metadata);
        self.push_change(change)
    }

    pub fn pending_changes(&self) -> Vec<FileChange> {
        self.turn
            .lock()
            .as_ref()
            .map(|t| t.changes.clone())
            .unwrap_or_default()
    }

    /// Most recent staged write for `path` (relative or absolute).
    pub fn pending_file_change(&self, path: &str) -> Option<FileChange> {
        let abs = self.resolve(path);
        let slot = self.turn.lock();
        slot.as_ref()?
            .changes
            .iter()
            .rev()
            .find(|c| c.change_type == ChangeType::Write && c.path == abs)
            .cloned()
    }

    /// Register a hook that runs before changes are applied.
    pub fn add_write_hook(
        &self,
        name: impl Into<String>,
        hook: Arc<dyn TurnHook>,
        callback: Option<Arc<dyn HookCallback>>,
    ) {
        self.write_hooks.write().push(RegisteredHook {
            name: name.into(),
            hook,
            callback,
            blocking: true,
        });
    }

    /// Register a hook that runs after changes are applied. Non-blocking
    /// hooks run concurrently on private copies of the turn.
    pub fn add_post_commit_hook(
        &self,
        name: impl Into<String>,
        hook: Arc<dyn TurnHook>,
        callback: Option<Arc<dyn HookCallback>>,
        blocking: bool,
    ) {
        self.post_commit_hooks.write().push(RegisteredHook {
            name: name.into(),
            hook,
            callback,
            blocking,
        });
    }

    /// Apply the active turn. Returns the finished turn with its hook
    /// results, or `None` if no turn was active. The turn is cleared even
    /// when applying a change fails.
    #[instrument(skip(self))]
    pub async fn commit_turn(&self) -> Result<Option<WriteTurn>, FileOpError> {
        let taken = self.turn.lock().take();
        let Some(mut turn) = taken else {
            return Ok(None);
        };
        info!(turn_id = %turn.turn_id, changes = turn.changes.len(), "committing turn");

        let write_hooks = self.write_hooks.read().clone();
        for hook in &write_hooks {
            let ctx = self.run_hook(hook, &turn).await;
            turn.hook_results.insert(hook.name.clone(), ctx.clone());
            notify(hook, &ctx).await;
        }

        if turn.changes.is_empty() {
            info!(turn_id = %turn.turn_id, "no changes to commit, skipping post-commit hooks");
        } else {
            for change in turn.changes.clone() {
                self.apply_change(change).await?;
            }

            let post_hooks = self.post_commit_hooks.read().clone();
            for hook in post_hooks.iter().filter(|h| h.blocking) {
                let ctx = self.run_hook(hook, &turn).await;
                turn.hook_results.insert(hook.name.clone(), ctx.clone());
                notify(hook, &ctx).await;
            }

            let concurrent: Vec<_> = post_hooks
                .iter()
                .filter(|h| !h.blocking)
                .map(|hook| {
                    let copy = turn.clone();
                    async move {
                        debug!(hook = %hook.name, "running non-blocking hook");
                        let ctx = self.run_hook(hook, &copy).await;
                        notify(hook, &ctx).await;
                    }
                })
                .collect();
            if !concurrent.is_empty() {
                info!(count = concurrent.len(), "running non-blocking hooks");
                futures::future::join_all(concurrent).await;
            }
        }

        self.bus.publish(DomainEvent::TurnCompleted {
            turn_id: turn.turn_id.clone(),
        });
        Ok(Some(turn))
    }

    async fn run_hook(&self, hook: &RegisteredHook, turn: &WriteTurn) -> HookContext {
        let fut = AssertUnwindSafe(hook.hook.run(turn)).catch_unwind();
        let outcome = match tokio::time::timeout(self.hook_timeout, fut).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(HookError::Panicked(panic_message(&panic))),
            Err(_) => Err(HookError::Timeout(self.hook_timeout)),
        };
        match outcome {
            Ok(value) => HookContext::succeeded(&hook.name, value),
            Err(e) => {
                error!(hook = %hook.name, error = %e, "hook failed");
                HookContext::failed(&hook.name, e.to_string())
            }
        }
    }

    async fn apply_change(&self, change: FileChange) -> Result<(), FileOpError> {
        match change.change_type {
            ChangeType::Write => {
                let Some(content) = change.content else {
                    error!(path = %change.path, "write change missing content");
                    return Ok(());
                };
                let path = PathBuf::from(&change.path);
                let written = tokio::task::spawn_blocking(move || write_and_sync(&path, &content))
                    .await
                    .map_err(|e| std::io::Error::other(e.to_string()))
                    .and_then(|r| r);
                written.map_err(|source| FileOpError::Apply {
                    path: change.path.clone(),
                    source,
                })?;
                debug!(path = %change.path, "file written");
                self.bus.publish(DomainEvent::FileWritten {
                    path: change.path,
                    metadata: change.metadata,
                });
            }
            ChangeType::Delete => {
                let path = Path::new(&change.path);
                if !path.exists() {
                    warn!(path = %change.path, "file to delete not found");
                    return Ok(());
                }
                tokio::fs::remove_file(path)
                    .await
                    .map_err(|source| FileOpError::Apply {
                        path: change.path.clone(),
                        source,
                    })?;
                self.bus.publish(DomainEvent::FileDeleted {
                    path: change.path,
                    metadata: change.metadata,
                });
            }
            ChangeType::Rename => {
                let Some(destination) = change.content else {
                    error!(path = %change.path, "rename change missing destination");
                    return Ok(());
                };
                let source = Path::new(&change.path);
                if !source.exists() {
                    warn!(path = %change.path, "file to rename not found");
                    return Ok(());
                }
                let apply = |source_err: std::io::Error| FileOpError::Apply {
                    path: change.path.clone(),
                    source: source_err,
                };
                if let Some(parent) = Path::new(&destination).parent() {
                    tokio::fs::create_dir_all(parent).await.map_err(apply)?;
                }
                tokio::fs::rename(source, &destination).await.map_err(apply)?;
                self.bus.publish(DomainEvent::FileRenamed {
                    source_path: change.path,
                    destination_path: destination,
                    metadata: change.metadata,
                });
            }
            ChangeType::AddDependency => {
                let dependency = change.content.unwrap_or_default();
                info!(dependency = %dependency, "recorded dependency addition");
                self.bus.publish(DomainEvent::DependencyAdded {
                    dependency,
                    metadata: change.metadata,
                });
            }
        }
        Ok(())
    }
}

async fn notify(hook: &RegisteredHook, ctx: &HookContext) {
    let Some(callback) = &hook.callback else {
        return;
    };
    if let Err(e) = callback.on_complete(ctx).await {
        error!(hook = %hook.name, error = %e, "hook callback failed");
    }
}

fn write_and_sync(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::File::create(path)?;
    file.write_all(content.as_bytes())?;
    file.flush()?;
    file.sync_all()
}

/// Lexical normalization: drops `.` and folds `..` without touching the
/// file system.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
