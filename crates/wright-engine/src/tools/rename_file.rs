use std::sync::Arc;

use async_trait::async_trait;
use wright_core::stream::ToolParams;
use wright_core::tools::{Tool, ToolContext, ToolError, ToolErrorCode};

use super::{param, resolve};
use crate::file_ops::FileOperationManager;

pub struct RenameFileTool {
    files: Arc<FileOperationManager>,
}

impl RenameFileTool {
    pub fn new(files: Arc<FileOperationManager>) -> Self {
        Self { files }
    }
}

#[async_trait]
impl Tool for RenameFileTool {
    fn name(&self) -> &str {
        "rename-file"
    }

    fn description(&self) -> &str {
        "Move or rename a file when the turn is committed"
    }

    fn required_params(&self) -> &[&'static str] {
        &["source", "destination"]
    }

    fn path_params(&self) -> &[&'static str] {
        &["source", "destination"]
    }

    async fn execute(&self, params: &ToolParams, ctx: &ToolContext) -> Result<String, ToolError> {
        let source = param(params, "source");
        let destination = param(params, "destination");

        if !resolve(&ctx.working_directory, source).exists() {
            return Err(ToolError::new(
                self.name(),
                ToolErrorCode::SourceNotFound,
                format!("Source file not found: {source}"),
            ));
        }
        if resolve(&ctx.working_directory, destination).exists() {
            return Err(ToolError::new(
                self.name(),
                ToolErrorCode::DestinationExists,
                format!("Destination file already exists: {destination}"),
            ));
        }

        self.files.rename_file(source, destination, None).map_err(|e| {
            ToolError::new(self.name(), ToolErrorCode::RenameError, format!("Error renaming file: {e}"))
        })?;
        Ok(format!("Successfully renamed {source} to {destination}"))
    }
}
