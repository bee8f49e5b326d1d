use std::path::Path;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use tracing::warn;

/// Directories never worth listing or backing up. Hidden directories are
/// covered by the trailing `.*/` rule.
pub const IGNORED_DIRS: &[&str] = &[
    "node_modules/",
    "__pycache__/",
    "env/",
    "venv/",
    "target/dependency/",
    "build/dependencies/",
    "dist/",
    "out/",
    "bundle/",
    "vendor/",
    "tmp/",
    "temp/",
    "deps/",
    "pkg/",
    "Pods/",
    ".*/",
];

/// Gitignore-style matcher rooted at a project directory.
pub struct IgnoreRules {
    matcher: Gitignore,
}

impl IgnoreRules {
    /// Built-in directory rules only.
    pub fn builtin(root: &Path) -> Self {
        Self::build(root, false)
    }

    /// Built-in rules plus the root `.gitignore`, when present.
    pub fn with_gitignore(root: &Path) -> Self {
        Self::build(root, true)
    }

    fn build(root: &Path, include_gitignore: bool) -> Self {
        let mut builder = GitignoreBuilder::new(root);
        for line in IGNORED_DIRS {
            if let Err(e) = builder.add_line(None, line) {
                warn!(pattern = *line, error = %e, "invalid ignore pattern");
            }
        }
        if include_gitignore {
            let gitignore = root.join(".gitignore");
            if gitignore.is_file() {
                if let Some(e) = builder.add(&gitignore) {
                    warn!(path = %gitignore.display(), error = %e, "error reading .gitignore");
                }
            }
        }
        let matcher = builder.build().unwrap_or_else(|e| {
            warn!(error = %e, "failed to build ignore rules, ignoring nothing");
            Gitignore::empty()
        });
        Self { matcher }
    }

    /// `relative` is relative to the root the rules were built for.
    pub fn is_ignored(&self, relative: &Path, is_dir: bool) -> bool {
        self.matcher.matched(relative, is_dir).is_ignore()
    }
}
