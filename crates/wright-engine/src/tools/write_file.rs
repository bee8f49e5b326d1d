use std::sync::Arc;

use async_trait::async_trait;
use wright_core::stream::ToolParams;
use wright_core::tools::{Tool, ToolContext, ToolError, ToolErrorCode};

use super::param;
use crate::file_ops::FileOperationManager;

/// Stages a whole-file write in the current turn.
pub struct WriteFileTool {
    files: Arc<FileOperationManager>,
}

impl WriteFileTool {
    pub fn new(files: Arc<FileOperationManager>) -> Self {
        Self { files }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write-to-file"
    }

    fn description(&self) -> &str {
        "Write the complete content of a file, creating it if needed"
    }

    fn required_params(&self) -> &[&'static str] {
        &["path", "content"]
    }

    fn path_params(&self) -> &[&'static str] {
        &["path"]
    }

    async fn execute(&self, params: &ToolParams, _ctx: &ToolContext) -> Result<String, ToolError> {
        let path = param(params, "path");
        let content = param(params, "content");
        self.files.write_file(path, content, None).map_err(|e| {
            ToolError::new(self.name(), ToolErrorCode::WriteError, format!("Error writing to file: {e}"))
        })?;
        Ok(format!("Successfully wrote content to {path}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testutil::{ctx, files, params, temp_dir};

    #[tokio::test]
    async fn stages_without_touching_disk() {
        let dir = temp_dir("write");
        let fom = files(&dir);
        let tool = WriteFileTool::new(fom.clone());
        let out = tool
            .execute(&params(&[("path", "src/app.ts"), ("content", "let x = 1;")]), &ctx(&dir))
            .await
            .unwrap();
        assert_eq!(out, "Successfully wrote content to src/app.ts");
        assert!(!dir.join("src/app.ts").exists());
        let change = fom.pending_file_change("src/app.ts").unwrap();
        assert_eq!(change.content.as_deref(), Some("let x = 1;"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn protected_path_is_write_error() {
        let dir = temp_dir("write");
        let tool = WriteFileTool::new(files(&dir));
        let err = tool
            .execute(&params(&[("path", ".lovable/cfg"), ("content", "x")]), &ctx(&dir))
            .await
            .unwrap_err();
        assert_eq!(err.code, ToolErrorCode::WriteError);
        assert_eq!(
            err.message,
            "Error writing to file: Cannot write to protected file/path: .lovable/cfg"
        );
        std::fs::remove_dir_all(&dir).ok();
    }
}
