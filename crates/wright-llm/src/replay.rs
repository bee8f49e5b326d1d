use std::collections::VecDeque;
use std::path::Path;

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::debug;

use wright_core::errors::ProviderError;
use wright_core::provider::{ModelChunk, ModelProvider, ModelRequest, ModelStream};
use wright_core::tokens::TokenUsage;

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("failed to read script: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid script: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One recorded response. A bare string is shorthand for `{"text": ...}`.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum ReplayEntry {
    Text(String),
    Full {
        text: String,
        #[serde(default)]
        usage: Option<TokenUsage>,
    },
}

/// Streams recorded responses from a JSON script, one per model call,
/// split into fixed-size chunks to exercise incremental parsing.
pub struct ReplayProvider {
    entries: Mutex<VecDeque<ReplayEntry>>,
    chunk_chars: usize,
}

impl ReplayProvider {
    pub fn from_json(json: &str, chunk_chars: usize) -> Result<Self, ReplayError> {
        let entries: Vec<ReplayEntry> = serde_json::from_str(json)?;
        Ok(Self {
            entries: Mutex::new(entries.into()),
            chunk_chars: chunk_chars.max(1),
        })
    }

    pub fn from_file(path: &Path, chunk_chars: usize) -> Result<Self, ReplayError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json, chunk_chars)
    }

    pub fn remaining(&self) -> usize {
        self.entries.lock().len()
    }
}

#[async_trait]
impl ModelProvider for ReplayProvider {
    fn name(&self) -> &str {
        "replay"
    }

    async fn stream(&self, request: &ModelRequest) -> Result<ModelStream, ProviderError> {
        let entry = self
            .entries
            .lock()
            .pop_front()
            .ok_or_else(|| ProviderError::BadRequest("replay script exhausted".into()))?;
        debug!(messages = request.messages.len(), "replaying scripted response");

        let (text, usage) = match entry {
            ReplayEntry::Text(text) => (text, None),
            ReplayEntry::Full { text, usage } => (text, usage),
        };
        let mut chunks: Vec<ModelChunk> = chunk_text(&text, self.chunk_chars)
            .into_iter()
            .map(ModelChunk::Delta)
            .collect();
        if let Some(usage) = usage {
            chunks.push(ModelChunk::Usage(usage));
        }
        Ok(Box::pin(stream::iter(chunks.into_iter().map(Ok))))
    }
}

/// Split on character boundaries into pieces of at most `size` chars.
pub fn chunk_text(text: &str, size: usize) -> Vec<String> {
    let size = size.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn chunk_text_respects_char_boundaries() {
        assert_eq!(chunk_text("héllo", 2), vec!["hé", "ll", "o"]);
        assert!(chunk_text("", 3).is_empty());
        assert_eq!(chunk_text("abc", 0), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn replays_entries_in_order() {
        let provider = ReplayProvider::from_json(
            r#"["first", {"text": "second", "usage": {"input_tokens": 1, "output_tokens": 2}}]"#,
            4,
        )
        .unwrap();
        assert_eq!(provider.remaining(), 2);

        let mut s = provider.stream(&ModelRequest::default()).await.unwrap();
        let mut text = String::new();
        while let Some(Ok(ModelChunk::Delta(d))) = s.next().await {
            text.push_str(&d);
        }
        assert_eq!(text, "first");

        let s = provider.stream(&ModelRequest::default()).await.unwrap();
        let items: Vec<_> = s.collect().await;
        assert!(matches!(items.last(), Some(Ok(ModelChunk::Usage(u))) if u.output_tokens == 2));

        assert!(provider.stream(&ModelRequest::default()).await.is_err());
    }

    #[test]
    fn from_file_reads_script() {
        let path = std::env::temp_dir().join(format!("wright_replay_{}.json", uuid::Uuid::now_v7()));
        std::fs::write(&path, r#"["only"]"#).unwrap();
        let provider = ReplayProvider::from_file(&path, 8).unwrap();
        assert_eq!(provider.remaining(), 1);
        let _ = std::fs::remove_file(&path);

        assert!(matches!(
            ReplayProvider::from_json("{not json", 8),
            Err(ReplayError::Parse(_))
        ));
    }
}
