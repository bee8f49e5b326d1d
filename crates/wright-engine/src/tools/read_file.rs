use std::sync::Arc;

use async_trait::async_trait;
use wright_core::events::DomainEvent;
use wright_core::stream::ToolParams;
use wright_core::tools::{Tool, ToolContext, ToolError, ToolErrorCode};

use super::{param, resolve};
use crate::event_bus::EventBus;

pub struct ReadFileTool {
    bus: Arc<EventBus>,
}

impl ReadFileTool {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read-file"
    }

    fn description(&self) -> &str {
        "Read a file, prefixing each line with its number"
    }

    fn required_params(&self) -> &[&'static str] {
        &["path"]
    }

    fn path_params(&self) -> &[&'static str] {
        &["path"]
    }

    async fn execute(&self, params: &ToolParams, ctx: &ToolContext) -> Result<String, ToolError> {
        let path = param(params, "path");
        let full = resolve(&ctx.working_directory, path);

        if !full.exists() {
            return Err(ToolError::new(
                self.name(),
                ToolErrorCode::FileNotFound,
                format!("File not found: {path}"),
            ));
        }

        let bytes = tokio::fs::read(&full).await.map_err(|e| {
            ToolError::new(self.name(), ToolErrorCode::ReadError, format!("Error reading file: {e}"))
        })?;

        let Ok(content) = String::from_utf8(bytes) else {
            return Ok(format!("Error: File {path} appears to be a binary file"));
        };

        self.bus.publish(DomainEvent::FileRead {
            path: full.to_string_lossy().into_owned(),
        });
        Ok(number_lines(&content))
    }
}

/// `N | line` for every line, keeping the original line endings.
fn number_lines(content: &str) -> String {
    content
        .split_inclusive('\n')
        .enumerate()
        .map(|(i, line)| format!("{} | {line}", i + 1))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testutil::{ctx, params, temp_dir};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wright_core::events::EventType;

    #[test]
    fn numbering_keeps_line_endings() {
        assert_eq!(number_lines("a\nb\n"), "1 | a\n2 | b\n");
        assert_eq!(number_lines("a\r\nb"), "1 | a\r\n2 | b");
        assert_eq!(number_lines(""), "");
    }

    #[tokio::test]
    async fn reads_with_line_numbers_and_publishes() {
        let dir = temp_dir("read");
        std::fs::write(dir.join("notes.md"), "first\nsecond\n").unwrap();
        let bus = Arc::new(EventBus::new());
        let reads = Arc::new(AtomicUsize::new(0));
        let r = reads.clone();
        bus.subscribe(EventType::FileRead, move |_| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let tool = ReadFileTool::new(bus);
        let out = tool.execute(&params(&[("path", "notes.md")]), &ctx(&dir)).await.unwrap();
        assert_eq!(out, "1 | first\n2 | second\n");
        assert_eq!(reads.load(Ordering::SeqCst), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn missing_file_is_file_not_found() {
        let dir = temp_dir("read");
        let tool = ReadFileTool::new(Arc::new(EventBus::new()));
        let err = tool
            .execute(&params(&[("path", "nope.txt")]), &ctx(&dir))
            .await
            .unwrap_err();
        assert_eq!(err.code, ToolErrorCode::FileNotFound);
        assert_eq!(err.message, "File not found: nope.txt");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn binary_file_yields_explanation() {
        let dir = temp_dir("read");
        std::fs::write(dir.join("logo.png"), [0x89, 0x50, 0xff, 0xfe, 0x00]).unwrap();
        let tool = ReadFileTool::new(Arc::new(EventBus::new()));
        let out = tool.execute(&params(&[("path", "logo.png")]), &ctx(&dir)).await.unwrap();
        assert_eq!(out, "Error: File logo.png appears to be a binary file");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn directory_is_read_error() {
        let dir = temp_dir("read");
        std::fs::create_dir_all(dir.join("src")).unwrap();
        let tool = ReadFileTool::new(Arc::new(EventBus::new()));
        let err = tool.execute(&params(&[("path", "src")]), &ctx(&dir)).await.unwrap_err();
        assert_eq!(err.code, ToolErrorCode::ReadError);
        assert!(err.message.starts_with("Error reading file: "));
        std::fs::remove_dir_all(&dir).ok();
    }
}
