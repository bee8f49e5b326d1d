use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::warn;
use wright_core::stream::ToolParams;
use wright_core::tools::{Tool, ToolContext, ToolError, ToolErrorCode};

use super::{param, resolve};
use crate::ignore_rules::IgnoreRules;

const RECURSIVE_TIMEOUT: Duration = Duration::from_secs(10);
const TRUNCATION_NOTICE: &str =
    "(File list truncated. Use list_files on specific subdirectories if you need to explore further.)";

pub struct ListFilesTool {
    limit: usize,
}

impl ListFilesTool {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list-files"
    }

    fn description(&self) -> &str {
        "List the files in a directory, optionally recursively"
    }

    fn required_params(&self) -> &[&'static str] {
        &["path"]
    }

    fn path_params(&self) -> &[&'static str] {
        &["path"]
    }

    async fn execute(&self, params: &ToolParams, ctx: &ToolContext) -> Result<String, ToolError> {
        let path = param(params, "path");
        let recursive = params
            .get("recursive")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));
        let dir = resolve(&ctx.working_directory, path);
        if !dir.exists() {
            return Err(ToolError::new(
                self.name(),
                ToolErrorCode::PathNotFound,
                format!("Path not found: {path}"),
            ));
        }

        let limit = self.limit;
        let listed = tokio::task::spawn_blocking(move || list_paths(&dir, recursive, limit))
            .await
            .map_err(io::Error::other)
            .and_then(|r| r);
        match listed {
            Ok((files, reached)) => Ok(format_files_list(&files, reached)),
            Err(e) => Err(ToolError::new(
                self.name(),
                ToolErrorCode::ListError,
                format!("Error listing files: {e}"),
            )),
        }
    }
}

/// Paths under `dir`, relative to it, with directories suffixed by `/`.
/// The flag reports whether `limit` was reached. The filesystem root and the
/// home directory are never enumerated; each yields itself.
pub fn list_paths(dir: &Path, recursive: bool, limit: usize) -> io::Result<(Vec<String>, bool)> {
    let absolute = std::path::absolute(dir)?;
    let normalized: PathBuf = absolute.components().collect();
    if normalized == Path::new("/") || home_dir().is_some_and(|h| h == normalized) {
        return Ok((vec![normalized.to_string_lossy().into_owned()], false));
    }
    if recursive {
        list_recursive(&normalized, limit)
    } else {
        list_single_level(&normalized, limit)
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(|h| PathBuf::from(h).components().collect())
}

fn list_single_level(dir: &Path, limit: usize) -> io::Result<(Vec<String>, bool)> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_dir() {
            paths.push(format!("{name}/"));
        } else {
            paths.push(name);
        }
    }
    let reached = paths.len() >= limit;
    paths.truncate(limit);
    Ok((paths, reached))
}

/// Breadth-first walk. Each directory contributes its own `rel/` entry, then
/// its files in name order, before any of its subdirectories are visited.
fn list_recursive(base: &Path, limit: usize) -> io::Result<(Vec<String>, bool)> {
    let rules = IgnoreRules::with_gitignore(base);
    let started = Instant::now();
    let mut results: Vec<String> = Vec::new();
    let mut queue: VecDeque<(PathBuf, String)> = VecDeque::from([(base.to_path_buf(), String::new())]);

    while let Some((current, rel)) = queue.pop_front() {
        if results.len() >= limit {
            break;
        }
        if started.elapsed() > RECURSIVE_TIMEOUT {
            warn!(path = %base.display(), "file listing timed out, returning partial results");
            return Ok((results, true));
        }

        let entries = match std::fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %current.display(), error = %e, "error reading directory");
                continue;
            }
        };
        if !rel.is_empty() {
            results.push(format!("{rel}/"));
        }

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let child_rel = if rel.is_empty() { name } else { format!("{rel}/{name}") };
            let is_dir = entry.file_type().is_ok_and(|t| t.is_dir());
            if rules.is_ignored(Path::new(&child_rel), is_dir) {
                continue;
            }
            if is_dir {
                dirs.push((entry.path(), child_rel));
            } else {
                files.push(child_rel);
            }
        }
        dirs.sort_by(|a, b| a.1.cmp(&b.1));
        files.sort();

        for file in files {
            if results.len() >= limit {
                break;
            }
            results.push(file);
        }
        queue.extend(dirs);
    }

    let reached = results.len() >= limit;
    results.truncate(limit);
    results.sort();
    Ok((results, reached))
}

/// Renders a listing with directories ahead of the files beside them.
pub fn format_files_list(files: &[String], hit_limit: bool) -> String {
    if files.iter().all(|f| f.is_empty()) {
        return "No files found.".to_string();
    }
    let mut sorted: Vec<&String> = files.iter().collect();
    sorted.sort_by_cached_key(|p| sort_key(p));
    let list = sorted.iter().map(|s| s.as_str()).collect::<Vec<_>>().join("\n");
    if hit_limit {
        format!("{list}\n\n{TRUNCATION_NOTICE}")
    } else {
        list
    }
}

/// Per component: `(is_file, lowercase name)`. A directory entry's own
/// trailing slash is dropped so it sorts ahead of its contents.
fn sort_key(path: &str) -> Vec<(bool, String)> {
    let is_dir = path.ends_with('/');
    let parts: Vec<&str> = path.trim_end_matches('/').split('/').collect();
    let last = parts.len() - 1;
    parts
        .iter()
        .enumerate()
        .map(|(i, part)| (i == last && !is_dir, part.to_lowercase()))
        .collect()
}
