//! Collaborators the engine reaches outside the process for. Each has a
//! concrete implementation in `wright-engine::services`; tests substitute
//! their own.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildCheck {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub build_errors: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintCheck {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub lint_errors: bool,
}

/// The project runner: builds, lints and installs packages for a project.
#[async_trait]
pub trait RunnerClient: Send + Sync {
    async fn check_errors(&self, project_id: &str) -> Result<BuildCheck, ServiceError>;
    async fn lint_project(&self, project_id: &str) -> Result<LintCheck, ServiceError>;
    async fn add_package(
        &self,
        project_id: &str,
        package_name: &str,
        restart_server: bool,
    ) -> Result<(), ServiceError>;
    async fn restart_project(&self, project_id: &str) -> Result<(), ServiceError>;
}

/// Records the working tree state, returning the commit message used.
#[async_trait]
pub trait Snapshotter: Send + Sync {
    async fn snapshot(&self, path: &Path, message: Option<&str>) -> Result<String, ServiceError>;
}

/// Copies the project somewhere safe, returning a description of the backup.
#[async_trait]
pub trait BackupService: Send + Sync {
    async fn backup(&self, path: &Path) -> Result<String, ServiceError>;
}

/// Merges an edit description into the original text.
/// `ServiceError::Merge` means the diff did not apply.
#[async_trait]
pub trait DiffMerger: Send + Sync {
    async fn merge(&self, original: &str, diff: &str) -> Result<String, ServiceError>;
}
