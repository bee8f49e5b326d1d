use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, info};
use wright_core::errors::ServiceError;
use wright_core::services::Snapshotter;

pub const NO_CHANGES: &str = "No changes detected";

/// Stages and commits the working tree with the `git` binary.
#[derive(Debug, Default, Clone)]
pub struct GitSnapshotter;

async fn git(dir: &Path, args: &[&str]) -> Result<String, ServiceError> {
    let command = format!("git {}", args.join(" "));
    debug!(command = %command, dir = %dir.display(), "running git");
    let output = tokio::process::Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .await
        .map_err(|e| ServiceError::Command {
            command: command.clone(),
            stderr: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(ServiceError::Command {
            command,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Summary line for a set of staged paths.
fn commit_message(files: &[&str]) -> String {
    match files {
        [] => "Update project".to_string(),
        [one] => format!("Update {one}"),
        [a, b] => format!("Update {a} and {b}"),
        [a, b, rest @ ..] => format!("Update {a}, {b} and {} more", rest.len()),
    }
}

#[async_trait]
impl Snapshotter for GitSnapshotter {
    async fn snapshot(&self, path: &Path, message: Option<&str>) -> Result<String, ServiceError> {
        let status = git(path, &["status", "--porcelain"]).await?;
        if status.trim().is_empty() {
            return Ok(NO_CHANGES.to_string());
        }

        git(path, &["add", "-A"]).await?;
        let message = match message {
            Some(m) => m.to_string(),
            None => {
                let staged = git(path, &["diff", "--cached", "--name-only"]).await?;
                let files: Vec<&str> = staged.lines().filter(|l| !l.is_empty()).collect();
                commit_message(&files)
            }
        };
        git(path, &["commit", "-m", &message]).await?;
        info!(path = %path.display(), message = %message, "created git snapshot");
        Ok(message)
    }
}
