use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;
use wright_core::errors::ServiceError;
use wright_core::services::BackupService;

use crate::ignore_rules::IgnoreRules;

/// Copies the project into `{root}/{project}/{timestamp}`, skipping the
/// built-in ignored directories.
#[derive(Debug, Clone)]
pub struct DirectoryBackup {
    root: PathBuf,
}

impl DirectoryBackup {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl BackupService for DirectoryBackup {
    async fn backup(&self, path: &Path) -> Result<String, ServiceError> {
        let project = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_string());
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string();
        let dest = self.root.join(project).join(stamp);

        let source = path.to_path_buf();
        let target = dest.clone();
        let copied = tokio::task::spawn_blocking(move || {
            let rules = IgnoreRules::builtin(&source);
            copy_tree(&source, &source, &target, &rules)
        })
        .await
        .map_err(|e| ServiceError::Io(e.to_string()))??;

        info!(source = %path.display(), dest = %dest.display(), files = copied, "project backed up");
        Ok(dest.display().to_string())
    }
}

fn copy_tree(base: &Path, dir: &Path, dest: &Path, rules: &IgnoreRules) -> io::Result<usize> {
    std::fs::create_dir_all(dest)?;
    let mut copied = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_dir = entry.file_type()?.is_dir();
        let rel = path.strip_prefix(base).unwrap_or(&path);
        if rules.is_ignored(rel, is_dir) {
            continue;
        }
        let target = dest.join(entry.file_name());
        if is_dir {
            copied += copy_tree(base, &path, &target, rules)?;
        } else {
            std::fs::copy(&path, &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}
