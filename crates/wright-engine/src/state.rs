use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use wright_core::ids::TaskId;
use wright_core::tools::ToolResult;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Aborted,
    Timeout,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Aborted | Self::Timeout
        )
    }
}

#[derive(Clone, Debug, Default)]
pub struct TaskState {
    pub id: Option<TaskId>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: TaskStatus,
}

impl TaskState {
    fn start(&mut self, id: TaskId) {
        *self = Self {
            id: Some(id),
            start_time: Some(Utc::now()),
            end_time: None,
            status: TaskStatus::Running,
        };
    }

    /// Move a running task to `status`. Anything else is ignored.
    fn finish(&mut self, status: TaskStatus) -> bool {
        if self.status != TaskStatus::Running {
            debug!(from = ?self.status, to = ?status, "ignoring task transition");
            return false;
        }
        self.status = status;
        self.end_time = Some(Utc::now());
        true
    }
}

#[derive(Clone, Debug, Default)]
pub struct ToolState {
    pub consecutive_tool_failures: u32,
    pub consecutive_code_failures: u32,
    pub tool_results: Vec<ToolResult>,
    pub completed_tools: BTreeSet<String>,
    pub failed_tools: BTreeSet<String>,
}

#[derive(Clone, Debug, Default)]
pub struct StreamingState {
    pub is_active: bool,
    pub current_message: String,
}

#[derive(Clone, Debug, Default)]
pub struct AgentState {
    pub task: TaskState,
    pub tool: ToolState,
    pub streaming: StreamingState,
}

/// Serializable view of the agent state for clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub task_id: Option<TaskId>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub completed_tools: Vec<String>,
    pub failed_tools: Vec<String>,
    pub tool_results: Vec<ToolResult>,
    pub consecutive_tool_failures: u32,
    pub consecutive_code_failures: u32,
}

/// Task, tool and streaming state behind one lock.
pub struct StateManager {
    inner: Mutex<AgentState>,
    max_failures: u32,
}

impl StateManager {
    pub fn new(max_failures: u32) -> Self {
        Self {
            inner: Mutex::new(AgentState::default()),
            max_failures,
        }
    }

    /// Replace all three sub-states and mark the task running.
    pub fn reset_for_new_task(&self, id: TaskId) {
        let mut state = self.inner.lock();
        *state = AgentState::default();
        state.task.start(id);
    }

    pub fn task_id(&self) -> Option<TaskId> {
        self.inner.lock().task.id.clone()
    }

    pub fn task_status(&self) -> TaskStatus {
        self.inner.lock().task.status
    }

    pub fn is_aborted(&self) -> bool {
        self.task_status() == TaskStatus::Aborted
    }

    pub fn complete(&self) -> bool {
        self.inner.lock().task.finish(TaskStatus::Completed)
    }

    pub fn fail(&self) -> bool {
        self.inner.lock().task.finish(TaskStatus::Failed)
    }

    pub fn abort(&self) -> bool {
        self.inner.lock().task.finish(TaskStatus::Aborted)
    }

    pub fn time_out(&self) -> bool {
        self.inner.lock().task.finish(TaskStatus::Timeout)
    }

    pub fn record_success(&self, result: ToolResult) {
        let mut state = self.inner.lock();
        state.tool.completed_tools.insert(result.tool.clone());
        state.tool.consecutive_tool_failures = 0;
        state.tool.tool_results.push(result);
    }

    pub fn record_failure(&self, result: ToolResult) {
        let mut state = self.inner.lock();
        state.tool.failed_tools.insert(result.tool.clone());
        state.tool.consecutive_tool_failures += 1;
        state.tool.tool_results.push(result);
    }

    pub fn record_code_check(&self, passed: bool) {
        let mut state = self.inner.lock();
        if passed {
            state.tool.consecutive_code_failures = 0;
        } else {
            state.tool.consecutive_code_failures += 1;
        }
    }

    /// Either failure streak has reached the limit.
    pub fn breaker_tripped(&self) -> bool {
        let state = self.inner.lock();
        state.tool.consecutive_tool_failures >= self.max_failures
            || state.tool.consecutive_code_failures >= self.max_failures
    }

    pub fn reset_failure_counters(&self) {
        let mut state = self.inner.lock();
        state.tool.consecutive_tool_failures = 0;
        state.tool.consecutive_code_failures = 0;
    }

    pub fn tool_results(&self) -> Vec<ToolResult> {
        self.inner.lock().tool.tool_results.clone()
    }

    pub fn clear_results(&self) {
        self.inner.lock().tool.tool_results.clear();
    }

    pub fn begin_streaming(&self) {
        let mut state = self.inner.lock();
        state.streaming.is_active = true;
        state.streaming.current_message.clear();
    }

    pub fn end_streaming(&self) {
        self.inner.lock().streaming.is_active = false;
    }

    pub fn is_streaming(&self) -> bool {
        self.inner.lock().streaming.is_active
    }

    pub fn append_message(&self, text: &str) {
        self.inner.lock().streaming.current_message.push_str(text);
    }

    pub fn current_message(&self) -> String {
        self.inner.lock().streaming.current_message.clone()
    }

    /// Add a follow-up question to the assistant message, separated by a
    /// blank line when the message already has content.
    pub fn append_question(&self, question: &str) {
        let mut state = self.inner.lock();
        let message = &mut state.streaming.current_message;
        if message.is_empty() {
            message.push_str(question);
        } else {
            message.push_str("\n\n");
            message.push_str(question);
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let state = self.inner.lock();
        StateSnapshot {
            task_id: state.task.id.clone(),
            start_time: state.task.start_time,
            end_time: state.task.end_time,
            status: state.task.status,
            completed_tools: state.tool.completed_tools.iter().cloned().collect(),
            failed_tools: state.tool.failed_tools.iter().cloned().collect(),
            tool_results: state.tool.tool_results.clone(),
            consecutive_tool_failures: state.tool.consecutive_tool_failures,
            consecutive_code_failures: state.tool.consecutive_code_failures,
        }
    }
}
