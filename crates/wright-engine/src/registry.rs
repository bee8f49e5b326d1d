use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Component, Path};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{debug, error, instrument};
use wright_core::events::DomainEvent;
use wright_core::tools::{Tool, ToolContext, ToolError, ToolErrorCode, ToolRequest};

use crate::event_bus::{panic_message, EventBus};

/// Registry of available tools, keyed by wire name.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool, replacing any previous tool of the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(Arc::clone)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// `(name, description)` pairs, sorted by name.
    pub fn catalog(&self) -> Vec<(String, String)> {
        self.names()
            .into_iter()
            .filter_map(|name| {
                let description = self.tools.get(&name)?.description().to_string();
                Some((name, description))
            })
            .collect()
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Validates requests against the registry and runs them with a timeout,
/// turning panics and timeouts into `EXECUTION_ERROR`.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    bus: Arc<EventBus>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, bus: Arc<EventBus>, timeout: Duration) -> Self {
        Self {
            registry,
            bus,
            timeout,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Publishes `TOOL_EXECUTING` first, so even invalid requests are seen.
    #[instrument(skip_all, fields(tool = %request.name, tool_id = %request.tool_id))]
    pub async fn execute(&self, request: &ToolRequest, ctx: &ToolContext) -> Result<String, ToolError> {
        self.bus.publish(DomainEvent::ToolExecuting {
            name: request.name.clone(),
            params: request.params.clone(),
        });

        let tool = self.validate(request)?;
        debug!("tool validated, executing");

        let fut = AssertUnwindSafe(tool.execute(&request.params, ctx)).catch_unwind();
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => {
                let message = panic_message(&panic);
                error!(panic = %message, "tool panicked");
                Err(ToolError::new(&request.name, ToolErrorCode::ExecutionError, message))
            }
            Err(_) => {
                error!(timeout_secs = self.timeout.as_secs(), "tool timed out");
                Err(ToolError::new(
                    &request.name,
                    ToolErrorCode::ExecutionError,
                    format!("Tool {} timed out after {}s", request.name, self.timeout.as_secs()),
                ))
            }
        }
    }

    fn validate(&self, request: &ToolRequest) -> Result<Arc<dyn Tool>, ToolError> {
        let name = request.name.as_str();
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| ToolError::unknown_tool(name))?;

        for &param in tool.required_params() {
            let Some(value) = request.params.get(param) else {
                return Err(ToolError::missing_param(name, param));
            };
            if value.trim().is_empty() {
                return Err(ToolError::invalid_param(
                    name,
                    ToolErrorCode::InvalidParam,
                    param,
                    "Parameter cannot be empty",
                ));
            }
        }

        for &param in tool.path_params() {
            let Some(value) = request.params.get(param) else {
                continue;
            };
            let path = Path::new(value);
            if path.is_absolute() {
                return Err(ToolError::invalid_param(
                    name,
                    ToolErrorCode::InvalidPath,
                    param,
                    "Path must be relative to working directory",
                ));
            }
            if escapes_root(path) {
                return Err(ToolError::invalid_param(
                    name,
                    ToolErrorCode::InvalidPath,
                    param,
                    "Path must stay inside the working directory",
                ));
            }
        }

        Ok(tool)
    }
}

/// True if `..` components climb above the starting directory.
fn escapes_root(path: &Path) -> bool {
    let mut depth: usize = 0;
    for component in path.components() {
        match component {
            Component::ParentDir => {
                let Some(d) = depth.checked_sub(1) else {
                    return true;
                };
                depth = d;
            }
            Component::Normal(_) => depth += 1,
            _ => {}
        }
    }
    false
}
