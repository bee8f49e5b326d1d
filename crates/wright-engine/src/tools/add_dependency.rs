use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};
use wright_core::errors::ServiceError;
use wright_core::services::RunnerClient;
use wright_core::stream::ToolParams;
use wright_core::tools::{Tool, ToolContext, ToolError, ToolErrorCode};

use super::param;
use crate::file_ops::FileOperationManager;

const MAX_ATTEMPTS: u32 = 3;
const MIN_BACKOFF: Duration = Duration::from_secs(4);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Records the dependency in the turn and installs it through the runner.
pub struct AddDependencyTool {
    files: Arc<FileOperationManager>,
    runner: Arc<dyn RunnerClient>,
}

impl AddDependencyTool {
    pub fn new(files: Arc<FileOperationManager>, runner: Arc<dyn RunnerClient>) -> Self {
        Self { files, runner }
    }

    fn dependency_error(&self, e: impl std::fmt::Display) -> ToolError {
        ToolError::new(
            self.name(),
            ToolErrorCode::DependencyError,
            format!("Error adding dependency: {e}"),
        )
    }

    async fn install(&self, project_root: &Path, name: &str) -> Result<(), ServiceError> {
        let project_id = project_id(project_root);
        info!(dependency = name, project_id = %project_id, "adding dependency");

        let mut attempt = 1;
        loop {
            match self.runner.add_package(&project_id, name, true).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < MAX_ATTEMPTS => {
                    let delay = backoff(attempt);
                    warn!(
                        dependency = name,
                        attempt,
                        delay_secs = delay.as_secs(),
                        error = %e,
                        "package install failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Exponential backoff clamped to `[MIN_BACKOFF, MAX_BACKOFF]`.
fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt)).clamp(MIN_BACKOFF, MAX_BACKOFF)
}

/// The runner knows projects by their directory name.
pub(crate) fn project_id(root: &Path) -> String {
    root.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[async_trait]
impl Tool for AddDependencyTool {
    fn name(&self) -> &str {
        "add-dependency"
    }

    fn description(&self) -> &str {
        "Install a package into the project"
    }

    fn required_params(&self) -> &[&'static str] {
        &["name"]
    }

    async fn execute(&self, params: &ToolParams, ctx: &ToolContext) -> Result<String, ToolError> {
        let name = param(params, "name");
        self.files
            .add_dependency(name, None)
            .map_err(|e| self.dependency_error(e))?;
        let root = &ctx.working_directory;
        if !root.join("package.json").exists() && !root.join("pyproject.toml").exists() {
            return Err(self.dependency_error("No package.json or pyproject.toml found in the project"));
        }
        self.install(&ctx.working_directory, name)
            .await
            .map_err(|e| self.dependency_error(e))?;
        Ok(format!("Successfully added {name} using runner client"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testutil::{ctx, files, params, temp_dir, FakeRunner};

    #[test]
    fn backoff_is_clamped() {
        assert_eq!(backoff(1), Duration::from_secs(4));
        assert_eq!(backoff(3), Duration::from_secs(8));
        assert_eq!(backoff(6), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn installs_after_retries() {
        let dir = temp_dir("dep");
        std::fs::write(dir.join("package.json"), "{}").unwrap();
        let runner = Arc::new(FakeRunner::default());
        *runner.fail_installs.lock() = 2;
        let fom = files(&dir);
        let tool = AddDependencyTool::new(fom.clone(), runner.clone());

        let out = tool.execute(&params(&[("name", "zod")]), &ctx(&dir)).await.unwrap();
        assert_eq!(out, "Successfully added zod using runner client");
        let installs = runner.installs.lock().clone();
        assert_eq!(installs.len(), 1);
        assert_eq!(installs[0].0, project_id(&dir));
        assert_eq!(installs[0].1, "zod");
        assert!(installs[0].2);
        assert_eq!(fom.pending_changes()[0].content.as_deref(), Some("zod"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_three_attempts() {
        let dir = temp_dir("dep");
        std::fs::write(dir.join("pyproject.toml"), "").unwrap();
        let runner = Arc::new(FakeRunner::default());
        *runner.fail_installs.lock() = 3;
        let tool = AddDependencyTool::new(files(&dir), runner.clone());

        let err = tool.execute(&params(&[("name", "httpx")]), &ctx(&dir)).await.unwrap_err();
        assert_eq!(err.code, ToolErrorCode::DependencyError);
        assert!(runner.installs.lock().is_empty());
        assert_eq!(*runner.fail_installs.lock(), 0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn requires_a_manifest() {
        let dir = temp_dir("dep");
        let tool = AddDependencyTool::new(files(&dir), Arc::new(FakeRunner::default()));
        let err = tool.execute(&params(&[("name", "zod")]), &ctx(&dir)).await.unwrap_err();
        assert_eq!(err.code, ToolErrorCode::DependencyError);
        assert_eq!(
            err.message,
            "Error adding dependency: No package.json or pyproject.toml found in the project"
        );
        std::fs::remove_dir_all(&dir).ok();
    }
}
