use std::sync::Arc;

use async_trait::async_trait;
use wright_core::stream::ToolParams;
use wright_core::tools::{Tool, ToolContext, ToolError, ToolErrorCode};

use super::{param, resolve};
use crate::file_ops::FileOperationManager;

pub struct DeleteFileTool {
    files: Arc<FileOperationManager>,
}

impl DeleteFileTool {
    pub fn new(files: Arc<FileOperationManager>) -> Self {
        Self { files }
    }
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete-file"
    }

    fn description(&self) -> &str {
        "Delete a file when the turn is committed"
    }

    fn required_params(&self) -> &[&'static str] {
        &["path"]
    }

    fn path_params(&self) -> &[&'static str] {
        &["path"]
    }

    async fn execute(&self, params: &ToolParams, ctx: &ToolContext) -> Result<String, ToolError> {
        let path = param(params, "path");
        if !resolve(&ctx.working_directory, path).exists() {
            return Err(ToolError::new(
                self.name(),
                ToolErrorCode::FileNotFound,
                format!("File not found: {path}"),
            ));
        }
        self.files.delete_file(path, None).map_err(|e| {
            ToolError::new(self.name(), ToolErrorCode::DeleteError, format!("Error deleting file: {e}"))
        })?;
        Ok(format!("Successfully marked {path} for deletion"))
    }
}
