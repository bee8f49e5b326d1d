use async_trait::async_trait;
use wright_core::errors::ServiceError;
use wright_core::services::DiffMerger;

const SEARCH_MARKER: &str = "<<<<<<< SEARCH";
const DIVIDER: &str = "=======";
const REPLACE_MARKER: &str = ">>>>>>> REPLACE";

/// Applies `SEARCH/REPLACE` blocks in order:
///
/// ```text
/// <<<<<<< SEARCH
/// old lines
/// =======
/// new lines
/// >>>>>>> REPLACE
/// ```
///
/// Each search block is located line by line, first exactly, then ignoring
/// trailing whitespace, then ignoring surrounding whitespace.
pub struct SearchReplaceMerger;

#[derive(Debug, PartialEq)]
struct Block {
    search: Vec<String>,
    replace: Vec<String>,
}

#[async_trait]
impl DiffMerger for SearchReplaceMerger {
    async fn merge(&self, original: &str, diff: &str) -> Result<String, ServiceError> {
        merge_blocks(original, diff)
    }
}

fn merge_blocks(original: &str, diff: &str) -> Result<String, ServiceError> {
    let blocks = parse_blocks(diff)?;
    if blocks.is_empty() {
        return Err(ServiceError::Merge("no SEARCH/REPLACE blocks found".into()));
    }

    let trailing_newline = original.ends_with('\n');
    let mut lines: Vec<String> = original.lines().map(str::to_string).collect();

    for (n, block) in blocks.iter().enumerate() {
        if block.search.is_empty() {
            return Err(ServiceError::Merge(format!("block {} has an empty SEARCH section", n + 1)));
        }
        let at = seek(&lines, &block.search)
            .ok_or_else(|| ServiceError::Merge(format!("block {} not found in original", n + 1)))?;
        lines.splice(at..at + block.search.len(), block.replace.iter().cloned());
    }

    let mut merged = lines.join("\n");
    if trailing_newline && !merged.is_empty() {
        merged.push('\n');
    }
    Ok(merged)
}

fn parse_blocks(diff: &str) -> Result<Vec<Block>, ServiceError> {
    enum State {
        Outside,
        Search(Vec<String>),
        Replace(Vec<String>, Vec<String>),
    }

    let mut blocks = Vec::new();
    let mut state = State::Outside;
    for line in diff.lines() {
        let marker = line.trim_end();
        state = match state {
            State::Outside if marker == SEARCH_MARKER => State::Search(Vec::new()),
            State::Outside => State::Outside,
            State::Search(search) if marker == DIVIDER => State::Replace(search, Vec::new()),
            State::Search(mut search) => {
                search.push(line.to_string());
                State::Search(search)
            }
            State::Replace(search, replace) if marker == REPLACE_MARKER => {
                blocks.push(Block { search, replace });
                State::Outside
            }
            State::Replace(search, mut replace) => {
                replace.push(line.to_string());
                State::Replace(search, replace)
            }
        };
    }

    match state {
        State::Outside => Ok(blocks),
        _ => Err(ServiceError::Merge("unterminated SEARCH/REPLACE block".into())),
    }
}

fn seek(lines: &[String], pattern: &[String]) -> Option<usize> {
    if pattern.len() > lines.len() {
        return None;
    }
    let last = lines.len() - pattern.len();
    let passes: [fn(&str) -> &str; 3] = [exact, str::trim_end, str::trim];
    passes.iter().find_map(|norm| {
        (0..=last).find(|&i| {
            pattern
                .iter()
                .zip(&lines[i..i + pattern.len()])
                .all(|(p, l)| norm(p) == norm(l))
        })
    })
}

fn exact(s: &str) -> &str {
    s
}
