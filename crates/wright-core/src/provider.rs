use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::errors::ProviderError;
use crate::messages::Message;
use crate::tokens::TokenUsage;

/// One model call: a system prompt plus the conversation so far.
#[derive(Clone, Debug, Default)]
pub struct ModelRequest {
    pub system_prompt: String,
    pub messages: Vec<Message>,
}

/// Pieces of an incremental model response.
#[derive(Clone, Debug, PartialEq)]
pub enum ModelChunk {
    Delta(String),
    Usage(TokenUsage),
}

pub type ModelStream = Pin<Box<dyn Stream<Item = Result<ModelChunk, ProviderError>> + Send>>;

/// Streaming completion. The runtime never inspects how the response is
/// produced; it only consumes the chunk stream.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn stream(&self, request: &ModelRequest) -> Result<ModelStream, ProviderError>;
}
