use std::sync::Arc;

use async_trait::async_trait;
use wright_core::errors::ServiceError;
use wright_core::services::DiffMerger;
use wright_core::stream::ToolParams;
use wright_core::tools::{Tool, ToolContext, ToolError, ToolErrorCode};

use super::{param, resolve};
use crate::file_ops::FileOperationManager;

/// Merges an edit into the file's on-disk content and stages the result.
pub struct ApplyDiffTool {
    files: Arc<FileOperationManager>,
    merger: Arc<dyn DiffMerger>,
}

impl ApplyDiffTool {
    pub fn new(files: Arc<FileOperationManager>, merger: Arc<dyn DiffMerger>) -> Self {
        Self { files, merger }
    }

    fn diff_error(&self, e: impl std::fmt::Display) -> ToolError {
        ToolError::new(self.name(), ToolErrorCode::DiffError, format!("Error applying diff: {e}"))
    }
}

#[async_trait]
impl Tool for ApplyDiffTool {
    fn name(&self) -> &str {
        "apply-diff"
    }

    fn description(&self) -> &str {
        "Apply SEARCH/REPLACE blocks to an existing file"
    }

    fn required_params(&self) -> &[&'static str] {
        &["path", "diff"]
    }

    fn path_params(&self) -> &[&'static str] {
        &["path"]
    }

    async fn execute(&self, params: &ToolParams, ctx: &ToolContext) -> Result<String, ToolError> {
        let path = param(params, "path");
        let diff = param(params, "diff");
        let full = resolve(&ctx.working_directory, path);

        if !full.exists() {
            return Err(ToolError::new(
                self.name(),
                ToolErrorCode::FileNotFound,
                format!("File not found: {path}"),
            ));
        }

        let original = tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| self.diff_error(e))?;

        let merged = match self.merger.merge(&original, diff).await {
            Ok(merged) => merged,
            Err(ServiceError::Merge(reason)) => {
                tracing::debug!(path, reason = %reason, "diff did not merge");
                return Err(ToolError::new(
                    self.name(),
                    ToolErrorCode::MergeFailed,
                    "Failed to merge diff with original code",
                )
                .with_details(serde_json::json!({ "reason": reason })));
            }
            Err(e) => return Err(self.diff_error(e)),
        };

        self.files
            .apply_diff(path, merged, &original)
            .map_err(|e| self.diff_error(e))?;
        Ok(format!("Successfully applied diff to {path}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::merge::SearchReplaceMerger;
    use crate::tools::testutil::{ctx, files, params, temp_dir};
    use wright_core::hooks::ChangeType;

    const DIFF: &str = "<<<<<<< SEARCH\nconst a = 1;\n=======\nconst a = 2;\n>>>>>>> REPLACE";

    #[tokio::test]
    async fn stages_merged_content_with_original() {
        let dir = temp_dir("diff");
        std::fs::write(dir.join("a.ts"), "const a = 1;\n").unwrap();
        let fom = files(&dir);
        let tool = ApplyDiffTool::new(fom.clone(), Arc::new(SearchReplaceMerger));

        let out = tool
            .execute(&params(&[("path", "a.ts"), ("diff", DIFF)]), &ctx(&dir))
            .await
            .unwrap();
        assert_eq!(out, "Successfully applied diff to a.ts");

        let change = fom.pending_file_change("a.ts").unwrap();
        assert_eq!(change.change_type, ChangeType::Write);
        assert_eq!(change.content.as_deref(), Some("const a = 2;\n"));
        assert_eq!(change.metadata["type"], "diff");
        assert_eq!(change.metadata["original"], "const a = 1;\n");
        assert_eq!(std::fs::read_to_string(dir.join("a.ts")).unwrap(), "const a = 1;\n");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn unmatched_search_is_merge_failed() {
        let dir = temp_dir("diff");
        std::fs::write(dir.join("a.ts"), "const b = 1;\n").unwrap();
        let fom = files(&dir);
        let tool = ApplyDiffTool::new(fom.clone(), Arc::new(SearchReplaceMerger));
        let err = tool
            .execute(&params(&[("path", "a.ts"), ("diff", DIFF)]), &ctx(&dir))
            .await
            .unwrap_err();
        assert_eq!(err.code, ToolErrorCode::MergeFailed);
        assert_eq!(err.message, "Failed to merge diff with original code");
        assert!(fom.pending_changes().is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn missing_file_is_file_not_found() {
        let dir = temp_dir("diff");
        let tool = ApplyDiffTool::new(files(&dir), Arc::new(SearchReplaceMerger));
        let err = tool
            .execute(&params(&[("path", "gone.ts"), ("diff", DIFF)]), &ctx(&dir))
            .await
            .unwrap_err();
        assert_eq!(err.code, ToolErrorCode::FileNotFound);
        std::fs::remove_dir_all(&dir).ok();
    }
}
