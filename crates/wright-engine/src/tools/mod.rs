pub mod add_dependency;
pub mod apply_diff;
pub mod ask_followup;
pub mod delete_file;
pub mod list_files;
pub mod read_file;
pub mod rename_file;
pub mod search_files;
pub mod write_file;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use wright_core::services::{DiffMerger, RunnerClient};
use wright_core::stream::ToolParams;

use crate::event_bus::EventBus;
use crate::file_ops::FileOperationManager;
use crate::registry::ToolRegistry;

/// Collaborators shared by the built-in tools.
#[derive(Clone)]
pub struct ToolDeps {
    pub files: Arc<FileOperationManager>,
    pub runner: Arc<dyn RunnerClient>,
    pub merger: Arc<dyn DiffMerger>,
    pub bus: Arc<EventBus>,
    pub list_files_limit: usize,
    pub search_max_results: usize,
}

/// Create a ToolRegistry with all built-in tools.
pub fn create_default_registry(deps: &ToolDeps) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    // Reading
    registry.register(Arc::new(read_file::ReadFileTool::new(deps.bus.clone())));
    registry.register(Arc::new(search_files::SearchFilesTool::new(deps.search_max_results)));
    registry.register(Arc::new(list_files::ListFilesTool::new(deps.list_files_limit)));

    // Staged changes
    registry.register(Arc::new(write_file::WriteFileTool::new(deps.files.clone())));
    registry.register(Arc::new(apply_diff::ApplyDiffTool::new(
        deps.files.clone(),
        deps.merger.clone(),
    )));
    registry.register(Arc::new(delete_file::DeleteFileTool::new(deps.files.clone())));
    registry.register(Arc::new(rename_file::RenameFileTool::new(deps.files.clone())));
    registry.register(Arc::new(add_dependency::AddDependencyTool::new(
        deps.files.clone(),
        deps.runner.clone(),
    )));

    // User interaction
    registry.register(Arc::new(ask_followup::AskFollowupTool));

    registry
}

/// Value of a parameter the executor has already validated as present.
pub(crate) fn param<'a>(params: &'a ToolParams, name: &str) -> &'a str {
    params.get(name).map(String::as_str).unwrap_or_default()
}

pub(crate) fn resolve(working_directory: &Path, relative: &str) -> PathBuf {
    working_directory.join(relative)
}
