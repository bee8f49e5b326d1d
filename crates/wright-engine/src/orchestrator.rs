//! The agent loop: one model call per step, tools in parallel with the
//! stream, then the turn commit and the next step while tools keep
//! producing results.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use wright_core::errors::{HookError, ProviderError};
use wright_core::events::{DomainEvent, EventType};
use wright_core::hooks::{HookCallback, HookContext};
use wright_core::ids::TaskId;
use wright_core::messages::{ContentPart, MessageContent, Role};
use wright_core::provider::{ModelProvider, ModelRequest, ModelStream};
use wright_core::services::{BackupService, DiffMerger, RunnerClient, Snapshotter};
use wright_core::stream::{StreamEvent, ToolStatus};
use wright_core::tools::{ToolContext, ToolResult, ToolResultStatus};
use wright_store::{CharEstimator, CompactingListStore, CompactionStats, ListStore, StoreError};

use crate::config::AgentConfig;
use crate::coordinator::{tool_queue, ToolCoordinator};
use crate::error::EngineError;
use crate::event_bus::{EventBus, SubscriptionId};
use crate::file_ops::FileOperationManager;
use crate::hooks::{CodeCheckOutcome, HookManager};
use crate::memory::MessageManager;
use crate::registry::ToolExecutor;
use crate::state::{StateManager, StateSnapshot, TaskStatus};
use crate::stream_processor::{EventSink, StreamProcessor};
use crate::tools::ask_followup::ASK_FOLLOWUP;
use crate::tools::list_files::{format_files_list, list_paths};
use crate::tools::{create_default_registry, ToolDeps};

const BREAKER_MESSAGE: &str = "Assistant has made too many consecutive mistakes. This may indicate a failure in the \
thought process or inability to use tools properly. Consider providing guidance on breaking down the task into \
smaller steps.";

/// Tools whose results carry the file content before and after the change.
const FILE_EDIT_TOOLS: &[&str] = &["write-to-file", "apply-diff"];

/// External services the orchestrator is built on.
pub struct Collaborators {
    pub provider: Arc<dyn ModelProvider>,
    pub runner: Arc<dyn RunnerClient>,
    pub snapshotter: Arc<dyn Snapshotter>,
    pub backup: Arc<dyn BackupService>,
    pub merger: Arc<dyn DiffMerger>,
    pub store: Arc<dyn ListStore>,
}

enum Step {
    Continue,
    Done,
}

/// Builds the `<environment-details>` block sent with user content.
struct Environment {
    cwd: PathBuf,
    preview_path: RwLock<String>,
    list_limit: usize,
}

impl Environment {
    async fn details(&self) -> String {
        let now = chrono::Utc::now();
        let files = {
            let cwd = self.cwd.clone();
            let limit = self.list_limit;
            match tokio::task::spawn_blocking(move || list_paths(&cwd, true, limit)).await {
                Ok(Ok((files, reached))) => format_files_list(&files, reached),
                Ok(Err(e)) => format!("Error listing files: {e}"),
                Err(e) => format!("Error listing files: {e}"),
            }
        };

        let sections = [
            format!("# Current Working Directory\n{}", self.cwd.display()),
            format!("\n# User is currently viewing the page at: {}", self.preview_path.read()),
            format!("# Current Time\n{} (UTC, UTC+00:00)", now.format("%Y-%m-%d %I:%M:%S %p")),
            format!("\n# Files in {}", self.cwd.display()),
            if files.is_empty() { "(No files found)".to_string() } else { files },
        ];
        format!("<environment-details>\n{}\n</environment-details>", sections.join("\n\n"))
    }
}

/// Tracks build/lint streaks and feeds check output back into memory.
struct CodeCheckCallback {
    state: Arc<StateManager>,
    memory: Arc<MessageManager>,
    environment: Arc<Environment>,
}

#[async_trait]
impl HookCallback for CodeCheckCallback {
    async fn on_complete(&self, ctx: &HookContext) -> Result<(), HookError> {
        if !ctx.is_success() {
            error!(error = ?ctx.error, "code checks failed to execute");
            self.state.record_code_check(false);
            return Ok(());
        }
        let Some(outcome) = CodeCheckOutcome::from_context(ctx) else {
            error!("code checks did not return a result");
            self.state.record_code_check(false);
            return Ok(());
        };

        self.state.record_code_check(outcome.passed);
        info!(passed = outcome.passed, checks = outcome.messages.len(), "code checks completed");

        if !outcome.messages.is_empty() {
            let details = self.environment.details().await;
            let content = MessageContent::Parts(vec![
                ContentPart::text(details),
                ContentPart::text(outcome.messages.join("\n\n")),
            ]);
            self.memory
                .add_memory_item(content, Role::User)
                .map_err(|e| HookError::Failed(e.to_string()))?;
        }
        Ok(())
    }
}

pub struct Orchestrator {
    config: AgentConfig,
    bus: Arc<EventBus>,
    state: Arc<StateManager>,
    files: Arc<FileOperationManager>,
    memory: Arc<MessageManager>,
    executor: Arc<ToolExecutor>,
    provider: Arc<dyn ModelProvider>,
    stream_processor: StreamProcessor,
    coordinator: ToolCoordinator,
    environment: Arc<Environment>,
    cancel: Mutex<CancellationToken>,
    subscriptions: Vec<SubscriptionId>,
}

impl Orchestrator {
    pub fn new(cwd: impl Into<PathBuf>, config: AgentConfig, collaborators: Collaborators) -> Self {
        let cwd = cwd.into();
        let bus = Arc::new(EventBus::new());
        let state = Arc::new(StateManager::new(config.max_consecutive_failures));
        let files = Arc::new(FileOperationManager::new(&cwd, bus.clone(), &config));

        let store = CompactingListStore::new(collaborators.store, Arc::new(CharEstimator), config.store_config());
        let memory = Arc::new(MessageManager::new(
            Arc::new(store),
            config.enable_prompt_cache,
            config.max_prompt_cache_checkpoints,
        ));

        let registry = create_default_registry(&ToolDeps {
            files: files.clone(),
            runner: collaborators.runner.clone(),
            merger: collaborators.merger,
            bus: bus.clone(),
            list_files_limit: config.list_files_limit,
            search_max_results: config.search_max_results,
        });
        let executor = Arc::new(ToolExecutor::new(Arc::new(registry), bus.clone(), config.tool_timeout));
        let coordinator = ToolCoordinator::new(executor.clone(), state.clone(), bus.clone(), config.tool_poll_interval);

        let environment = Arc::new(Environment {
            cwd,
            preview_path: RwLock::new("/".to_string()),
            list_limit: config.list_files_limit,
        });

        HookManager::new(
            files.clone(),
            bus.clone(),
            collaborators.runner,
            collaborators.snapshotter,
            collaborators.backup,
            config.skip_lint,
        )
        .register_all_hooks(Some(Arc::new(CodeCheckCallback {
            state: state.clone(),
            memory: memory.clone(),
            environment: environment.clone(),
        })));

        let mut orchestrator = Self {
            stream_processor: StreamProcessor::new(state.clone(), bus.clone()),
            config,
            bus,
            state,
            files,
            memory,
            executor,
            provider: collaborators.provider,
            coordinator,
            environment,
            cancel: Mutex::new(CancellationToken::new()),
            subscriptions: Vec::new(),
        };
        orchestrator.subscribe_events();
        orchestrator
    }

    fn subscribe_events(&mut self) {
        for event_type in [EventType::ToolCompleted, EventType::ToolFailed] {
            let state = self.state.clone();
            let files = self.files.clone();
            let id = self.bus.subscribe_async(event_type, move |event| {
                let state = state.clone();
                let files = files.clone();
                async move {
                    record_tool_result(&state, &files, event).await;
                    Ok(())
                }
            });
            self.subscriptions.push(id);
        }

        self.subscriptions.push(self.bus.subscribe(EventType::HookFailed, |event| {
            if let DomainEvent::HookFailed { hook_name, error } = event {
                warn!(hook = %hook_name, error = %error, "background hook failed");
            }
            Ok(())
        }));

        self.subscriptions.push(self.bus.subscribe(EventType::UsageUpdated, |event| {
            if let DomainEvent::UsageUpdated {
                input_tokens,
                output_tokens,
            } = event
            {
                debug!(input_tokens, output_tokens, "usage updated");
            }
            Ok(())
        }));

        let memory = self.memory.clone();
        self.subscriptions
            .push(self.bus.subscribe(EventType::MemoryCompactRequested, move |event| {
                if let DomainEvent::MemoryCompactRequested { reason } = event {
                    info!(reason = %reason, "memory compaction requested");
                    if let Err(e) = memory.compact_memory() {
                        error!(error = %e, "memory compaction failed");
                    }
                }
                Ok(())
            }));

        let memory = self.memory.clone();
        self.subscriptions
            .push(self.bus.subscribe(EventType::MigrationFailed, move |event| {
                if let DomainEvent::MigrationFailed {
                    migration_name,
                    error,
                    path,
                } = event
                {
                    warn!(migration = %migration_name, error = %error, "migration failed");
                    let report = format!(
                        "[Migration Failure]\nMigration Name: {migration_name}\nFile Path: {path}\nError: {error}"
                    );
                    if let Err(e) = memory.add_memory_item(MessageContent::Text(report), Role::User) {
                        error!(error = %e, "failed to record migration failure");
                    }
                }
                Ok(())
            }));
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn files(&self) -> &Arc<FileOperationManager> {
        &self.files
    }

    pub fn memory(&self) -> &Arc<MessageManager> {
        &self.memory
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// `(name, description)` of every registered tool.
    pub fn tool_catalog(&self) -> Vec<(String, String)> {
        self.executor.registry().catalog()
    }

    pub fn set_preview_path(&self, path: impl Into<String>) {
        *self.environment.preview_path.write() = path.into();
    }

    pub fn state_snapshot(&self) -> StateSnapshot {
        self.state.snapshot()
    }

    pub async fn environment_details(&self) -> String {
        self.environment.details().await
    }

    pub fn force_compact_memory(&self) -> Result<CompactionStats, StoreError> {
        self.memory.compact_memory()
    }

    /// Start a new task with `content` and drive it to a terminal state.
    #[instrument(skip_all)]
    pub async fn run(&self, content: &str, sink: &EventSink) -> TaskId {
        let task_id = self.start_task(TaskId::new());
        let details = self.environment.details().await;
        let message = MessageContent::Parts(vec![ContentPart::text(content), ContentPart::text(details)]);

        if let Err(e) = self.memory.add_memory_item(message, Role::User) {
            self.fail_task(sink, format!("Error in task {task_id}: {e}"), false);
            return task_id;
        }
        self.process(sink).await;
        task_id
    }

    /// Continue from stored memory: the most recent user message is replayed
    /// with fresh environment details.
    #[instrument(skip_all, fields(task_id = %task_id))]
    pub async fn resume(&self, task_id: TaskId, sink: &EventSink) {
        self.start_task(task_id.clone());
        self.files.discard_turn();

        let last_user = match self.memory.messages() {
            Ok(messages) => messages.into_iter().rev().find(|m| m.role == Role::User),
            Err(e) => {
                self.fail_task(sink, format!("Error resuming task {task_id}: {e}"), false);
                return;
            }
        };
        let Some(last_user) = last_user else {
            self.fail_task(
                sink,
                format!("Error resuming task {task_id}: No task history found"),
                false,
            );
            return;
        };

        let mut parts: Vec<ContentPart> = match last_user.content {
            MessageContent::Text(text) => vec![ContentPart::text(text)],
            MessageContent::Parts(parts) => parts
                .into_iter()
                .filter(|p| !p.as_text().contains("<environment-details>"))
                .collect(),
        };
        parts.push(ContentPart::text(self.environment.details().await));

        if let Err(e) = self.memory.add_memory_item(MessageContent::Parts(parts), Role::User) {
            self.fail_task(sink, format!("Error resuming task {task_id}: {e}"), false);
            return;
        }
        self.process(sink).await;
    }

    /// Mark the task aborted and cancel the stream and in-flight tools.
    pub fn abort(&self) {
        if self.state.abort() {
            if let Some(task_id) = self.state.task_id() {
                info!(task_id = %task_id, "task aborted");
                self.bus.publish(DomainEvent::TaskAborted { task_id });
            }
        }
        self.cancel.lock().cancel();
    }

    fn start_task(&self, task_id: TaskId) -> TaskId {
        self.state.reset_for_new_task(task_id.clone());
        *self.cancel.lock() = CancellationToken::new();
        info!(task_id = %task_id, "task started");
        self.bus.publish(DomainEvent::TaskStarted {
            task_id: task_id.clone(),
        });
        task_id
    }

    async fn process(&self, sink: &EventSink) {
        let mut step = 0u32;
        loop {
            step += 1;
            match self.process_step(step, sink).await {
                Step::Continue => continue,
                Step::Done => break,
            }
        }
        if self.state.task_status() == TaskStatus::Aborted {
            self.files.discard_turn();
        }
    }

    #[instrument(skip_all, fields(step = step))]
    async fn process_step(&self, step: u32, sink: &EventSink) -> Step {
        if self.state.is_aborted() {
            return Step::Done;
        }

        // 1. Fresh turn and result list
        self.files.discard_turn();
        if let Err(e) = self.files.begin_turn() {
            self.step_failed(sink, e.into());
            return Step::Done;
        }
        self.state.clear_results();

        // 2. Circuit breaker
        if self.state.breaker_tripped() {
            warn!("consecutive failure limit reached");
            emit(sink, StreamEvent::text(BREAKER_MESSAGE));
            self.state.fail();
            self.publish_terminal(Some(BREAKER_MESSAGE.to_string()));
            self.state.reset_failure_counters();
            return Step::Done;
        }

        // 3. Open the model stream
        let stream = match self.open_stream().await {
            Ok(stream) => stream,
            Err(e) => {
                self.step_failed(sink, e);
                return Step::Done;
            }
        };

        // 4. Stream and run tools side by side
        let cancel = self.cancel.lock().clone();
        let ctx = ToolContext {
            task_id: self.state.task_id().unwrap_or_default(),
            working_directory: self.files.cwd().to_path_buf(),
            abort_signal: cancel.clone(),
        };
        let (queue, requests) = tool_queue();
        let produce = async {
            self.stream_processor.process(stream, &queue, sink, &cancel).await;
            let _ = queue.send(None);
        };
        tokio::join!(produce, self.coordinator.run(requests, ctx));

        if self.state.is_aborted() {
            info!("task aborted during step");
            return Step::Done;
        }

        // 5. Remember what the assistant said
        let message = self.state.current_message();
        if !message.is_empty() {
            if let Err(e) = self.memory.add_assistant_message(message) {
                error!(error = %e, "failed to store assistant message");
            }
        }

        let results = self.state.tool_results();
        if results.is_empty() {
            self.complete_task();
            return Step::Done;
        }

        // 6. A follow-up question ends the task and hands control back
        if let Some(question) = results.iter().find(|r| r.tool == ASK_FOLLOWUP && r.is_success()) {
            emit(sink, StreamEvent::text(question.result.clone().unwrap_or_default()));
            self.files.discard_turn();
            self.complete_task();
            return Step::Done;
        }

        // 7. Results into memory, then commit
        let summary = format_tool_results(&results);
        if let Err(e) = self.memory.add_memory_item(MessageContent::Text(summary), Role::User) {
            error!(error = %e, "failed to store tool results");
        }
        match self.files.commit_turn().await {
            Ok(Some(turn)) => debug!(turn_id = %turn.turn_id, changes = turn.changes.len(), "turn committed"),
            Ok(None) => {}
            Err(e) => error!(error = %e, "post-edit checks failed"),
        }

        for result in results {
            emit(sink, tool_event(result));
        }
        self.state.clear_results();
        Step::Continue
    }

    async fn open_stream(&self) -> Result<ModelStream, EngineError> {
        let request = ModelRequest {
            system_prompt: self.config.system_prompt.clone(),
            messages: self.memory.messages()?,
        };
        debug!(messages = request.messages.len(), "requesting model response");
        let stream = tokio::time::timeout(self.config.model_timeout, self.provider.stream(&request))
            .await
            .map_err(|_| EngineError::ModelTimeout(self.config.model_timeout))??;
        Ok(stream)
    }

    /// Terminal handling for an error that ends the step.
    fn step_failed(&self, sink: &EventSink, e: EngineError) {
        match e {
            EngineError::ModelTimeout(timeout) => {
                error!(timeout_secs = timeout.as_secs(), "model response timed out");
                emit(
                    sink,
                    StreamEvent::text(format!("Assistant response timed out after {}", describe_duration(timeout))),
                );
                if self.state.time_out() {
                    self.publish_terminal(None);
                }
            }
            EngineError::Aborted => info!("step aborted"),
            EngineError::Provider(ProviderError::BadRequest(detail)) => {
                self.fail_task(sink, format!("Bad request error: {detail}"), true);
            }
            EngineError::Provider(e) => {
                error!(kind = e.error_kind(), "model request failed");
                self.fail_task(sink, format!("Task failed: {e}"), true);
            }
            other => self.fail_task(sink, format!("Task failed: {other}"), true),
        }
    }

    /// Emit `message`, optionally remember it as the assistant's reply, and
    /// fail the task.
    fn fail_task(&self, sink: &EventSink, message: String, remember: bool) {
        error!(error = %message, "task failed");
        if remember {
            if let Err(e) = self.memory.add_assistant_message(message.clone()) {
                error!(error = %e, "failed to store failure message");
            }
        }
        emit(sink, StreamEvent::text(&message));
        if self.state.fail() {
            self.publish_terminal(Some(message));
        }
    }

    fn complete_task(&self) {
        if self.state.complete() {
            self.publish_terminal(None);
        }
    }

    fn publish_terminal(&self, reason: Option<String>) {
        let Some(task_id) = self.state.task_id() else {
            return;
        };
        let event = match self.state.task_status() {
            TaskStatus::Completed => DomainEvent::TaskCompleted { task_id },
            TaskStatus::Failed => DomainEvent::TaskFailed { task_id, reason },
            TaskStatus::Timeout => DomainEvent::TaskTimeout { task_id },
            TaskStatus::Aborted => DomainEvent::TaskAborted { task_id },
            TaskStatus::Idle | TaskStatus::Running => return,
        };
        info!(status = ?self.state.task_status(), "task finished");
        self.bus.publish(event);
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        for id in self.subscriptions.drain(..) {
            self.bus.unsubscribe(id);
        }
    }
}

fn emit(sink: &EventSink, event: StreamEvent) {
    if sink.send(event).is_err() {
        debug!("event sink closed");
    }
}

fn describe_duration(d: Duration) -> String {
    let secs = d.as_secs();
    match secs {
        60 => "1 minute".to_string(),
        s if s > 0 && s % 60 == 0 => format!("{} minutes", s / 60),
        1 => "1 second".to_string(),
        s => format!("{s} seconds"),
    }
}

/// Bus handler for `ToolCompleted`/`ToolFailed`: records the result in the
/// tool state, with before/after content for file edits. Published through
/// `publish_async` by the coordinator.
async fn record_tool_result(state: &StateManager, files: &FileOperationManager, event: DomainEvent) {
    let (tool, tool_id, params, result, error) = match event {
        DomainEvent::ToolCompleted {
            name,
            id,
            params,
            result,
        } => (name, id, params, Some(result), None),
        DomainEvent::ToolFailed { name, id, params, error } => (name, id, params, None, Some(error)),
        _ => return,
    };
    let succeeded = error.is_none();

    let extra = if FILE_EDIT_TOOLS.contains(&tool.as_str()) {
        let path = params.get("path").map(String::as_str);
        let old_content = match path {
            Some(p) => read_existing(files.cwd(), p).await,
            None => None,
        };
        let new_content = if succeeded {
            path.and_then(|p| files.pending_file_change(p)).and_then(|c| c.content)
        } else {
            None
        };
        Some(json!({ "old_content": old_content, "new_content": new_content }))
    } else {
        None
    };

    let record = ToolResult {
        tool,
        tool_id,
        status: if succeeded {
            ToolResultStatus::Success
        } else {
            ToolResultStatus::Failed
        },
        params,
        result,
        error,
        extra,
    };
    if succeeded {
        state.record_success(record);
    } else {
        state.record_failure(record);
    }
}

async fn read_existing(cwd: &Path, relative: &str) -> Option<String> {
    let path = cwd.join(relative);
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return None;
    }
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => Some(content),
        Err(e) => {
            error!(path = %path.display(), error = %e, "error reading original file content");
            None
        }
    }
}

/// The user message that reports a step's tool results to the model.
pub fn format_tool_results(results: &[ToolResult]) -> String {
    results
        .iter()
        .map(|r| {
            let target = r.params.get("path").map(|p| format!(" for {p}")).unwrap_or_default();
            let (label, body) = if r.is_success() {
                ("Success", r.result.as_deref())
            } else {
                ("Error", r.error.as_deref())
            };
            format!("[{}{target} {label}]\n{}", r.tool, body.unwrap_or_default())
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn tool_event(result: ToolResult) -> StreamEvent {
    StreamEvent::Tool {
        status: if result.is_success() {
            ToolStatus::Completed
        } else {
            ToolStatus::Failed
        },
        tool_name: result.tool,
        tool_id: result.tool_id,
        params: Some(result.params),
        result: result.result,
        error: result.error,
        extra: result.extra.filter(|v| *v != Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use wright_core::errors::ServiceError;
    use wright_core::ids::ToolCallId;
    use wright_core::stream::ToolParams;
    use wright_llm::{MockProvider, MockResponse};
    use wright_store::MemoryListStore;

    use crate::services::SearchReplaceMerger;
    use crate::tools::testutil::{temp_dir, FakeRunner};

    struct NoSnapshot;

    #[async_trait]
    impl Snapshotter for NoSnapshot {
        async fn snapshot(&self, _path: &Path, _message: Option<&str>) -> Result<String, ServiceError> {
            Ok("snapshot".into())
        }
    }

    struct NoBackup;

    #[async_trait]
    impl BackupService for NoBackup {
        async fn backup(&self, _path: &Path) -> Result<String, ServiceError> {
            Ok("backup".into())
        }
    }

    fn orchestrator(dir: &Path, provider: Arc<MockProvider>) -> Orchestrator {
        let config = AgentConfig {
            tool_poll_interval: Duration::from_millis(10),
            ..AgentConfig::default()
        };
        Orchestrator::new(
            dir,
            config,
            Collaborators {
                provider,
                runner: Arc::new(FakeRunner::default()),
                snapshotter: Arc::new(NoSnapshot),
                backup: Arc::new(NoBackup),
                merger: Arc::new(SearchReplaceMerger),
                store: Arc::new(MemoryListStore::new()),
            },
        )
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    fn last_text(events: &[StreamEvent]) -> Option<String> {
        events
            .iter()
            .rev()
            .find_map(|e| match e {
                StreamEvent::Text { text } => Some(text.clone()),
                _ => None,
            })
    }

    #[tokio::test]
    async fn edit_results_carry_content_before_and_after() {
        let dir = temp_dir("orch_edit");
        std::fs::write(dir.join("page.html"), "<p>old</p>").unwrap();
        let provider = Arc::new(MockProvider::new(vec![
            MockResponse::stream_text(
                "<write-to-file><path>page.html</path><content><p>new</p></content></write-to-file>",
            ),
            MockResponse::stream_text("Done."),
        ]));
        let orch = orchestrator(&dir, provider);
        let (sink, mut rx) = mpsc::unbounded_channel();

        orch.run("Update the page", &sink).await;

        let extra = drain(&mut rx)
            .into_iter()
            .find_map(|e| match e {
                StreamEvent::Tool {
                    status: ToolStatus::Completed,
                    extra,
                    ..
                } => extra,
                _ => None,
            })
            .unwrap();
        assert_eq!(extra["old_content"], "<p>old</p>");
        assert_eq!(extra["new_content"], "<p>new</p>");
        assert_eq!(std::fs::read_to_string(dir.join("page.html")).unwrap(), "<p>new</p>");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn writes_file_and_continues_until_done() {
        let dir = temp_dir("orch_write");
        let provider = Arc::new(MockProvider::new(vec![
            MockResponse::stream_text(
                "Creating it.<write-to-file><path>index.html</path><content><h1>Hi</h1></content></write-to-file>",
            ),
            MockResponse::stream_text("All done."),
        ]));
        let orch = orchestrator(&dir, provider.clone());
        let (sink, mut rx) = mpsc::unbounded_channel();

        orch.run("Make a page", &sink).await;

        assert_eq!(std::fs::read_to_string(dir.join("index.html")).unwrap(), "<h1>Hi</h1>");
        assert_eq!(provider.call_count(), 2);
        assert_eq!(orch.state_snapshot().status, TaskStatus::Completed);

        let events = drain(&mut rx);
        let statuses: Vec<ToolStatus> = events.iter().filter_map(StreamEvent::tool_status).collect();
        let executing = statuses.iter().position(|s| *s == ToolStatus::Executing).unwrap();
        let completed = statuses.iter().position(|s| *s == ToolStatus::Completed).unwrap();
        assert!(executing < completed);

        let extra = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::Tool {
                    status: ToolStatus::Completed,
                    extra,
                    ..
                } => extra.clone(),
                _ => None,
            })
            .unwrap();
        assert_eq!(extra["old_content"], Value::Null);
        assert_eq!(extra["new_content"], "<h1>Hi</h1>");

        let second = &provider.requests()[1];
        assert!(second
            .messages
            .iter()
            .any(|m| m.contains("[write-to-file for index.html Success]\nResult:\nSuccessfully wrote content to index.html")));
        assert!(orch
            .memory()
            .messages()
            .unwrap()
            .iter()
            .any(|m| m.contains("[Build Error Check]")));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn followup_question_ends_task_and_drops_siblings() {
        let dir = temp_dir("orch_followup");
        let provider = Arc::new(MockProvider::new(vec![MockResponse::stream_text(
            "<write-to-file><path>a.txt</path><content>x</content></write-to-file>\
             <ask-followup-question><question>Which color?</question></ask-followup-question>",
        )]));
        let orch = orchestrator(&dir, provider.clone());
        let (sink, mut rx) = mpsc::unbounded_channel();

        orch.run("Style it", &sink).await;

        let events = drain(&mut rx);
        assert_eq!(last_text(&events).as_deref(), Some("Which color?"));
        assert!(!events
            .iter()
            .any(|e| e.tool_status() == Some(ToolStatus::Completed)));
        assert!(!dir.join("a.txt").exists());
        assert_eq!(provider.call_count(), 1);
        assert_eq!(orch.state_snapshot().status, TaskStatus::Completed);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn repeated_failures_trip_breaker() {
        let dir = temp_dir("orch_breaker");
        let reads: String = (0..4)
            .map(|i| format!("<read-file><path>missing{i}.ts</path></read-file>"))
            .collect();
        let provider = Arc::new(MockProvider::new(vec![MockResponse::stream_text(&reads)]));
        let orch = orchestrator(&dir, provider.clone());
        let (sink, mut rx) = mpsc::unbounded_channel();

        orch.run("Read things", &sink).await;

        let events = drain(&mut rx);
        assert_eq!(last_text(&events).as_deref(), Some(BREAKER_MESSAGE));
        assert_eq!(provider.call_count(), 1);
        let snapshot = orch.state_snapshot();
        assert_eq!(snapshot.status, TaskStatus::Failed);
        assert_eq!(snapshot.consecutive_tool_failures, 0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn model_timeout_ends_task() {
        let dir = temp_dir("orch_timeout");
        let provider = Arc::new(MockProvider::new(vec![MockResponse::Hang]));
        let orch = orchestrator(&dir, provider);
        let (sink, mut rx) = mpsc::unbounded_channel();

        orch.run("Hello", &sink).await;

        let events = drain(&mut rx);
        assert_eq!(
            last_text(&events).as_deref(),
            Some("Assistant response timed out after 1 minute")
        );
        assert_eq!(orch.state_snapshot().status, TaskStatus::Timeout);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn bad_request_is_reported_and_remembered() {
        let dir = temp_dir("orch_bad");
        let provider = Arc::new(MockProvider::new(vec![MockResponse::Error(ProviderError::BadRequest(
            "context too long".into(),
        ))]));
        let orch = orchestrator(&dir, provider);
        let (sink, mut rx) = mpsc::unbounded_channel();

        let task_id = orch.run("Hello", &sink).await;

        let events = drain(&mut rx);
        assert_eq!(last_text(&events).as_deref(), Some("Bad request error: context too long"));
        let snapshot = orch.state_snapshot();
        assert_eq!(snapshot.status, TaskStatus::Failed);
        assert_eq!(snapshot.task_id, Some(task_id));
        let last = orch.memory().messages().unwrap().pop().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.text(), "Bad request error: context too long");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn resume_without_history_fails() {
        let dir = temp_dir("orch_resume");
        let orch = orchestrator(&dir, Arc::new(MockProvider::new(vec![])));
        let (sink, mut rx) = mpsc::unbounded_channel();
        let task_id = TaskId::from_raw("task_1");

        orch.resume(task_id, &sink).await;

        let events = drain(&mut rx);
        assert_eq!(
            last_text(&events).as_deref(),
            Some("Error resuming task task_1: No task history found")
        );
        assert_eq!(orch.state_snapshot().status, TaskStatus::Failed);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn resume_replays_last_user_message() {
        let dir = temp_dir("orch_resume_ok");
        let provider = Arc::new(MockProvider::new(vec![
            MockResponse::stream_text("First answer."),
            MockResponse::stream_text("Second answer."),
        ]));
        let orch = orchestrator(&dir, provider.clone());
        let (sink, _rx) = mpsc::unbounded_channel();

        let task_id = orch.run("Build a todo app", &sink).await;
        orch.resume(task_id, &sink).await;

        assert_eq!(provider.call_count(), 2);
        let last_request = provider.requests().pop().unwrap();
        let replayed = last_request.messages.last().unwrap();
        assert_eq!(replayed.role, Role::User);
        assert!(replayed.contains("Build a todo app"));
        assert!(replayed.contains("<environment-details>"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn abort_stops_streaming() {
        let dir = temp_dir("orch_abort");
        let chunks = (0..50)
            .map(|i| wright_core::provider::ModelChunk::Delta(format!("word{i} ")))
            .collect();
        let provider = Arc::new(MockProvider::new(vec![MockResponse::Slow(chunks, Duration::from_millis(100))]));
        let orch = orchestrator(&dir, provider);
        let (sink, mut rx) = mpsc::unbounded_channel();

        tokio::join!(orch.run("Talk", &sink), async {
            tokio::time::sleep(Duration::from_millis(350)).await;
            orch.abort();
        });

        assert_eq!(orch.state_snapshot().status, TaskStatus::Aborted);
        let words = drain(&mut rx)
            .iter()
            .filter(|e| e.event_type() == "text")
            .count();
        assert!(words < 50);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn migration_failure_is_remembered() {
        let dir = temp_dir("orch_migration");
        let orch = orchestrator(&dir, Arc::new(MockProvider::new(vec![])));
        orch.bus().publish(DomainEvent::MigrationFailed {
            migration_name: "001_init".into(),
            error: "syntax error".into(),
            path: "supabase/migrations/001_init.sql".into(),
        });
        let last = orch.memory().messages().unwrap().pop().unwrap();
        assert_eq!(
            last.text(),
            "[Migration Failure]\nMigration Name: 001_init\nFile Path: supabase/migrations/001_init.sql\nError: syntax error"
        );
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn tool_results_format() {
        let mut params = ToolParams::new();
        params.insert("path".into(), "src/a.ts".into());
        let results = vec![
            ToolResult {
                tool: "read-file".into(),
                tool_id: ToolCallId::new(),
                status: ToolResultStatus::Success,
                params,
                result: Some("Result:\n1 | x".into()),
                error: None,
                extra: None,
            },
            ToolResult {
                tool: "add-dependency".into(),
                tool_id: ToolCallId::new(),
                status: ToolResultStatus::Failed,
                params: ToolParams::new(),
                result: None,
                error: Some("boom (Error code: DEPENDENCY_ERROR)".into()),
                extra: None,
            },
        ];
        assert_eq!(
            format_tool_results(&results),
            "[read-file for src/a.ts Success]\nResult:\n1 | x\n\n[add-dependency Error]\nboom (Error code: DEPENDENCY_ERROR)"
        );
    }

    #[test]
    fn durations_read_naturally() {
        assert_eq!(describe_duration(Duration::from_secs(60)), "1 minute");
        assert_eq!(describe_duration(Duration::from_secs(120)), "2 minutes");
        assert_eq!(describe_duration(Duration::from_secs(45)), "45 seconds");
    }
}
