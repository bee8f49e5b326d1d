use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;
use wright_core::stream::ToolParams;
use wright_core::tools::{Tool, ToolContext, ToolError, ToolErrorCode};

use super::{param, resolve};
use crate::ignore_rules::IgnoreRules;

/// Regex search across the files under a directory, one line of context
/// either side of each match.
pub struct SearchFilesTool {
    max_results: usize,
}

impl SearchFilesTool {
    pub fn new(max_results: usize) -> Self {
        Self { max_results }
    }

    fn search_error(&self, e: impl std::fmt::Display) -> ToolError {
        ToolError::new(self.name(), ToolErrorCode::SearchError, format!("Error searching files: {e}"))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct SearchMatch {
    file: String,
    before: String,
    line: String,
    after: String,
}

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        "search-files"
    }

    fn description(&self) -> &str {
        "Search files under a directory with a regular expression"
    }

    fn required_params(&self) -> &[&'static str] {
        &["path", "regex"]
    }

    fn path_params(&self) -> &[&'static str] {
        &["path"]
    }

    async fn execute(&self, params: &ToolParams, ctx: &ToolContext) -> Result<String, ToolError> {
        let path = param(params, "path");
        let root = resolve(&ctx.working_directory, path);
        if !root.exists() {
            return Err(ToolError::new(
                self.name(),
                ToolErrorCode::PathNotFound,
                format!("Path not found: {path}"),
            ));
        }

        let regex = Regex::new(param(params, "regex")).map_err(|e| self.search_error(e))?;
        let file_pattern = match params.get("file-pattern").map(|p| p.trim()) {
            Some(p) if !p.is_empty() => Some(glob::Pattern::new(p).map_err(|e| self.search_error(e))?),
            _ => None,
        };

        let max = self.max_results;
        let cwd = ctx.working_directory.clone();
        let matches = tokio::task::spawn_blocking(move || {
            search(&root, &cwd, &regex, file_pattern.as_ref(), max)
        })
        .await
        .map_err(|e| self.search_error(e))?;

        Ok(format_results(&matches, max))
    }
}

fn search(
    root: &Path,
    cwd: &Path,
    regex: &Regex,
    file_pattern: Option<&glob::Pattern>,
    max: usize,
) -> Vec<SearchMatch> {
    let mut results = Vec::new();
    for file in collect_files(root, cwd) {
        if results.len() >= max {
            break;
        }
        if let Some(pattern) = file_pattern {
            let name = file.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
            if !pattern.matches(&name) {
                continue;
            }
        }
        let Ok(content) = std::fs::read_to_string(&file) else {
            continue;
        };
        let rel = file
            .strip_prefix(cwd)
            .unwrap_or(&file)
            .to_string_lossy()
            .into_owned();
        let lines: Vec<&str> = content.lines().collect();
        for (i, line) in lines.iter().enumerate() {
            if !regex.is_match(line) {
                continue;
            }
            let context = |idx: Option<usize>| {
                idx.and_then(|j| lines.get(j))
                    .map(|l| l.trim_end().to_string())
                    .unwrap_or_default()
            };
            results.push(SearchMatch {
                file: rel.clone(),
                before: context(i.checked_sub(1)),
                line: line.trim_end().to_string(),
                after: context(Some(i + 1)),
            });
            if results.len() >= max {
                break;
            }
        }
    }
    results
}

/// Files under `root` in a stable order, skipping ignored directories.
fn collect_files(root: &Path, cwd: &Path) -> Vec<PathBuf> {
    if root.is_file() {
        return vec![root.to_path_buf()];
    }
    let rules = IgnoreRules::with_gitignore(cwd);
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        let mut entries: Vec<_> = entries.flatten().map(|e| e.path()).collect();
        entries.sort();
        let mut subdirs = Vec::new();
        for entry in entries {
            let is_dir = entry.is_dir();
            let rel = entry.strip_prefix(cwd).unwrap_or(&entry);
            if rules.is_ignored(rel, is_dir) {
                continue;
            }
            if is_dir {
                subdirs.push(entry);
            } else {
                files.push(entry);
            }
        }
        pending.extend(subdirs.into_iter().rev());
    }
    files
}

fn format_results(matches: &[SearchMatch], max: usize) -> String {
    let mut out = Vec::new();
    if matches.len() >= max {
        out.push(format!(
            "Showing first {max} of {max}+ results. Use a more specific search if necessary.\n"
        ));
    } else if matches.len() == 1 {
        out.push("Found 1 result.\n".to_string());
    } else {
        out.push(format!("Found {} results.\n", matches.len()));
    }

    let mut current: Option<&str> = None;
    for m in matches {
        if current != Some(m.file.as_str()) {
            if current.is_some() {
                out.push(String::new());
            }
            out.push(m.file.clone());
            out.push("│----".to_string());
            current = Some(m.file.as_str());
        }
        if !m.before.is_empty() {
            out.push(format!("│{}", m.before));
        }
        out.push(format!("│{}", m.line));
        if !m.after.is_empty() {
            out.push(format!("│{}", m.after));
        }
        out.push("│----".to_string());
    }
    out.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testutil::{ctx, params, temp_dir};

    fn fixture() -> PathBuf {
        let dir = temp_dir("search");
        std::fs::create_dir_all(dir.join("src/components")).unwrap();
        std::fs::create_dir_all(dir.join("node_modules/pkg")).unwrap();
        std::fs::write(dir.join("src/app.ts"), "import x\nconst port = 3000;\nexport {}\n").unwrap();
        std::fs::write(dir.join("src/components/Nav.tsx"), "const port = 8080;\n").unwrap();
        std::fs::write(dir.join("node_modules/pkg/index.js"), "const port = 1;\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn finds_matches_with_context() {
        let dir = fixture();
        let out = SearchFilesTool::new(300)
            .execute(&params(&[("path", "src"), ("regex", r"port = \d+")]), &ctx(&dir))
            .await
            .unwrap();
        let expected = "Found 2 results.\n\n\
                        src/app.ts\n│----\n│import x\n│const port = 3000;\n│export {}\n│----\n\n\
                        src/components/Nav.tsx\n│----\n│const port = 8080;\n│----";
        assert_eq!(out, expected);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn file_pattern_and_ignored_dirs() {
        let dir = fixture();
        let out = SearchFilesTool::new(300)
            .execute(
                &params(&[("path", "."), ("regex", "port"), ("file-pattern", "*.tsx")]),
                &ctx(&dir),
            )
            .await
            .unwrap();
        assert!(out.starts_with("Found 1 result.\n"));
        assert!(out.contains("Nav.tsx"));
        assert!(!out.contains("node_modules"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn caps_results() {
        let dir = fixture();
        let out = SearchFilesTool::new(1)
            .execute(&params(&[("path", "src"), ("regex", "port")]), &ctx(&dir))
            .await
            .unwrap();
        assert!(out.starts_with("Showing first 1 of 1+ results."));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn errors() {
        let dir = fixture();
        let tool = SearchFilesTool::new(300);
        let err = tool
            .execute(&params(&[("path", "missing"), ("regex", "x")]), &ctx(&dir))
            .await
            .unwrap_err();
        assert_eq!(err.code, ToolErrorCode::PathNotFound);
        assert_eq!(err.message, "Path not found: missing");

        let err = tool
            .execute(&params(&[("path", "src"), ("regex", "(")]), &ctx(&dir))
            .await
            .unwrap_err();
        assert_eq!(err.code, ToolErrorCode::SearchError);
        assert!(err.message.starts_with("Error searching files: "));
        std::fs::remove_dir_all(&dir).ok();
    }
}
