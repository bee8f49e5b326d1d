use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, instrument, warn};
use wright_core::events::DomainEvent;
use wright_core::tools::{ToolContext, ToolError, ToolErrorCode, ToolRequest};

use crate::event_bus::EventBus;
use crate::registry::ToolExecutor;
use crate::state::StateManager;
use crate::tools::ask_followup::ASK_FOLLOWUP;

/// Producer side of the tool queue. `None` marks the end of intake.
pub type ToolQueue = mpsc::UnboundedSender<Option<ToolRequest>>;
pub type ToolQueueReceiver = mpsc::UnboundedReceiver<Option<ToolRequest>>;

pub fn tool_queue() -> (ToolQueue, ToolQueueReceiver) {
    mpsc::unbounded_channel()
}

type Finished = (ToolRequest, Result<String, ToolError>);

/// Runs queued tool requests concurrently and publishes each outcome as
/// `TOOL_COMPLETED` or `TOOL_FAILED` on the bus.
pub struct ToolCoordinator {
    executor: Arc<ToolExecutor>,
    state: Arc<StateManager>,
    bus: Arc<EventBus>,
    poll_interval: Duration,
}

impl ToolCoordinator {
    pub fn new(
        executor: Arc<ToolExecutor>,
        state: Arc<StateManager>,
        bus: Arc<EventBus>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            executor,
            state,
            bus,
            poll_interval,
        }
    }

    /// Consume `queue` until the sentinel arrives or the channel closes, then
    /// wait for in-flight tools. Cancelling `ctx.abort_signal` aborts every
    /// in-flight tool, drops queued requests and returns without waiting.
    #[instrument(skip_all, fields(task_id = %ctx.task_id))]
    pub async fn run(&self, mut queue: ToolQueueReceiver, ctx: ToolContext) {
        let mut in_flight: JoinSet<Finished> = JoinSet::new();

        loop {
            if self.aborted(&ctx) {
                self.abort(&mut in_flight, &mut queue).await;
                return;
            }

            if !in_flight.is_empty() {
                if let Ok(Some(joined)) = tokio::time::timeout(self.poll_interval, in_flight.join_next()).await {
                    self.handle_joined(joined).await;
                }
            }

            match tokio::time::timeout(self.poll_interval, queue.recv()).await {
                Ok(Some(Some(request))) => self.dispatch(&mut in_flight, request, &ctx).await,
                Ok(Some(None)) | Ok(None) => break,
                Err(_) => continue,
            }
        }

        debug!(remaining = in_flight.len(), "intake closed, draining tools");
        loop {
            tokio::select! {
                biased;
                () = ctx.abort_signal.cancelled() => {
                    self.abort(&mut in_flight, &mut queue).await;
                    return;
                }
                joined = in_flight.join_next() => match joined {
                    Some(joined) => self.handle_joined(joined).await,
                    None => break,
                },
            }
        }
    }

    fn aborted(&self, ctx: &ToolContext) -> bool {
        ctx.abort_signal.is_cancelled() || self.state.is_aborted()
    }

    async fn abort(&self, in_flight: &mut JoinSet<Finished>, queue: &mut ToolQueueReceiver) {
        info!(in_flight = in_flight.len(), "aborting tool execution");
        in_flight.abort_all();
        while queue.try_recv().is_ok() {}
        while let Some(joined) = in_flight.try_join_next() {
            self.handle_joined(joined).await;
        }
    }

    async fn dispatch(&self, in_flight: &mut JoinSet<Finished>, request: ToolRequest, ctx: &ToolContext) {
        if self.state.breaker_tripped() {
            warn!(tool = %request.name, "too many consecutive failures, not dispatching");
            let refused = ToolError::new(
                &request.name,
                ToolErrorCode::ExecutionError,
                format!("Tool {} was not run after too many consecutive failures", request.name),
            );
            self.resolve(request, Err(refused)).await;
            return;
        }

        debug!(tool = %request.name, tool_id = %request.tool_id, "dispatching tool");
        let executor = self.executor.clone();
        let ctx = ctx.clone();
        in_flight.spawn(async move {
            let result = executor.execute(&request, &ctx).await;
            (request, result)
        });
    }

    async fn handle_joined(&self, joined: Result<Finished, JoinError>) {
        match joined {
            Ok((request, result)) => self.resolve(request, result).await,
            Err(e) if e.is_cancelled() => debug!("tool cancelled"),
            Err(e) => warn!(error = %e, "tool task failed to join"),
        }
    }

    async fn resolve(&self, request: ToolRequest, result: Result<String, ToolError>) {
        let ToolRequest { name, params, tool_id } = request;
        match result {
            Ok(output) => {
                let result = if name == ASK_FOLLOWUP {
                    self.state.append_question(&output);
                    output
                } else {
                    format!("Result:\n{output}")
                };
                self.bus
                    .publish_async(DomainEvent::ToolCompleted {
                        name,
                        id: tool_id,
                        params,
                        result,
                    })
                    .await;
            }
            Err(e) => {
                debug!(tool = %name, code = %e.code, "tool failed");
                self.bus
                    .publish_async(DomainEvent::ToolFailed {
                        name,
                        id: tool_id,
                        params,
                        error: e.report(),
                    })
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio_util::sync::CancellationToken;
    use wright_core::events::EventType;
    use wright_core::ids::{TaskId, ToolCallId};
    use wright_core::stream::ToolParams;
    use wright_core::tools::{Tool, ToolResult, ToolResultStatus};

    use crate::registry::ToolRegistry;
    use crate::tools::ask_followup::AskFollowupTool;

    struct SleepTool;

    #[async_trait]
    impl Tool for SleepTool {
        fn name(&self) -> &str {
            "sleep"
        }
        fn description(&self) -> &str {
            "sleeps for `ms` milliseconds"
        }
        fn required_params(&self) -> &[&'static str] {
            &["ms"]
        }
        async fn execute(&self, params: &ToolParams, _ctx: &ToolContext) -> Result<String, ToolError> {
            let ms: u64 = params["ms"].parse().unwrap();
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(format!("slept {ms}"))
        }
    }

    struct Harness {
        coordinator: ToolCoordinator,
        state: Arc<StateManager>,
        events: Arc<Mutex<Vec<(String, bool)>>>,
    }

    fn harness() -> Harness {
        let bus = Arc::new(EventBus::new());
        let state = Arc::new(StateManager::new(4));
        state.reset_for_new_task(TaskId::new());

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SleepTool));
        registry.register(Arc::new(AskFollowupTool));
        let executor = Arc::new(ToolExecutor::new(Arc::new(registry), bus.clone(), Duration::from_secs(60)));

        let events = Arc::new(Mutex::new(Vec::new()));
        for ty in [EventType::ToolCompleted, EventType::ToolFailed] {
            let state = state.clone();
            let events = events.clone();
            bus.subscribe(ty, move |event| {
                let (name, id, params, result, error) = match event.clone() {
                    DomainEvent::ToolCompleted { name, id, params, result } => (name, id, params, Some(result), None),
                    DomainEvent::ToolFailed { name, id, params, error } => (name, id, params, None, Some(error)),
                    _ => return Ok(()),
                };
                let ok = error.is_none();
                events.lock().push((name.clone(), ok));
                let record = ToolResult {
                    tool: name,
                    tool_id: id,
                    status: if ok { ToolResultStatus::Success } else { ToolResultStatus::Failed },
                    params,
                    result,
                    error,
                    extra: None,
                };
                if ok {
                    state.record_success(record);
                } else {
                    state.record_failure(record);
                }
                Ok(())
            });
        }

        Harness {
            coordinator: ToolCoordinator::new(executor, state.clone(), bus, Duration::from_millis(10)),
            state,
            events,
        }
    }

    fn request(name: &str, pairs: &[(&str, &str)]) -> ToolRequest {
        ToolRequest {
            name: name.into(),
            params: pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            tool_id: ToolCallId::new(),
        }
    }

    fn ctx(token: CancellationToken) -> ToolContext {
        ToolContext {
            task_id: TaskId::new(),
            working_directory: std::env::temp_dir(),
            abort_signal: token,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn runs_tools_concurrently_and_drains_after_sentinel() {
        let h = harness();
        let (tx, rx) = tool_queue();
        tx.send(Some(request("sleep", &[("ms", "300")]))).unwrap();
        tx.send(Some(request("sleep", &[("ms", "50")]))).unwrap();
        tx.send(None).unwrap();

        h.coordinator.run(rx, ctx(CancellationToken::new())).await;

        let results = h.state.tool_results();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].result.as_deref(), Some("Result:\nslept 50"));
        assert_eq!(results[1].result.as_deref(), Some("Result:\nslept 300"));
    }

    #[tokio::test]
    async fn closed_channel_ends_intake() {
        let h = harness();
        let (tx, rx) = tool_queue();
        tx.send(Some(request("sleep", &[("ms", "1")]))).unwrap();
        drop(tx);
        h.coordinator.run(rx, ctx(CancellationToken::new())).await;
        assert_eq!(h.state.tool_results().len(), 1);
    }

    #[tokio::test]
    async fn failures_are_published_with_error_code() {
        let h = harness();
        let (tx, rx) = tool_queue();
        tx.send(Some(request("kb-search", &[("query", "x")]))).unwrap();
        tx.send(Some(request("sleep", &[]))).unwrap();
        tx.send(None).unwrap();
        h.coordinator.run(rx, ctx(CancellationToken::new())).await;

        let results = h.state.tool_results();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.is_success()));
        let errors: Vec<_> = results.iter().filter_map(|r| r.error.clone()).collect();
        assert!(errors.iter().any(|e| e.ends_with("(Error code: UNKNOWN_TOOL)")));
        assert!(errors.iter().any(|e| e.ends_with("(Error code: MISSING_PARAM)")));
    }

    #[tokio::test]
    async fn followup_question_goes_to_message_buffer() {
        let h = harness();
        h.state.append_message("Before I start:");
        let (tx, rx) = tool_queue();
        tx.send(Some(request(ASK_FOLLOWUP, &[("question", "Which framework?")]))).unwrap();
        tx.send(None).unwrap();
        h.coordinator.run(rx, ctx(CancellationToken::new())).await;

        assert_eq!(h.state.current_message(), "Before I start:\n\nWhich framework?");
        assert_eq!(h.state.tool_results()[0].result.as_deref(), Some("Which framework?"));
    }

    #[tokio::test]
    async fn tripped_breaker_refuses_dispatch() {
        let h = harness();
        let (tx, rx) = tool_queue();
        for _ in 0..4 {
            tx.send(Some(request("sleep", &[]))).unwrap();
        }
        tx.send(None).unwrap();
        h.coordinator.run(rx, ctx(CancellationToken::new())).await;
        assert!(h.state.breaker_tripped());

        let (tx, rx) = tool_queue();
        tx.send(Some(request("sleep", &[("ms", "1")]))).unwrap();
        tx.send(None).unwrap();
        h.coordinator.run(rx, ctx(CancellationToken::new())).await;
        let last = h.state.tool_results().pop().unwrap();
        assert!(!last.is_success());
        assert!(last.error.unwrap().contains("was not run"));

        h.state.reset_failure_counters();
        let (tx, rx) = tool_queue();
        tx.send(Some(request("sleep", &[("ms", "1")]))).unwrap();
        tx.send(None).unwrap();
        h.coordinator.run(rx, ctx(CancellationToken::new())).await;
        assert!(h.state.tool_results().pop().unwrap().is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn abort_cancels_in_flight_tools() {
        let h = harness();
        let (tx, rx) = tool_queue();
        tx.send(Some(request("sleep", &[("ms", "60000")]))).unwrap();
        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });

        h.coordinator.run(rx, ctx(token)).await;
        assert!(h.events.lock().is_empty());
        assert!(tx.send(Some(request("sleep", &[("ms", "1")]))).is_err());
    }
}
