use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use parking_lot::Mutex;

use wright_core::errors::ProviderError;
use wright_core::provider::{ModelChunk, ModelProvider, ModelRequest, ModelStream};
use wright_core::tokens::TokenUsage;

/// Pre-programmed responses for deterministic testing without a model.
pub enum MockResponse {
    /// Yield these chunks, then end.
    Stream(Vec<ModelChunk>),
    /// Yield these chunks with a pause before each one.
    Slow(Vec<ModelChunk>, Duration),
    /// Yield these chunks, then fail mid-stream.
    StreamThenError(Vec<ModelChunk>, ProviderError),
    /// Fail the `stream()` call itself.
    Error(ProviderError),
    /// Wait a duration, then resolve the inner response.
    Delay(Duration, Box<MockResponse>),
    /// Never open the stream.
    Hang,
}

impl MockResponse {
    /// A single-delta response.
    pub fn stream_text(text: &str) -> Self {
        Self::Stream(vec![ModelChunk::Delta(text.to_string())])
    }

    /// A response delivered in fixed-size character chunks, followed by usage.
    pub fn chunked(text: &str, chunk_chars: usize, usage: TokenUsage) -> Self {
        let mut chunks: Vec<ModelChunk> = crate::replay::chunk_text(text, chunk_chars)
            .into_iter()
            .map(ModelChunk::Delta)
            .collect();
        chunks.push(ModelChunk::Usage(usage));
        Self::Stream(chunks)
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock provider that hands out its responses in order, one per call.
pub struct MockProvider {
    responses: Mutex<VecDeque<MockResponse>>,
    requests: Mutex<Vec<ModelRequest>>,
    call_count: AtomicUsize,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Every request received so far, in call order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn stream(&self, request: &ModelRequest) -> Result<ModelStream, ProviderError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(request.clone());

        let Some(mut current) = self.responses.lock().pop_front() else {
            return Err(ProviderError::BadRequest(format!(
                "MockProvider: no response configured for call {idx}"
            )));
        };

        // Unroll nested delays iteratively.
        loop {
            match current {
                MockResponse::Stream(chunks) => {
                    return Ok(Box::pin(stream::iter(chunks.into_iter().map(Ok))));
                }
                MockResponse::Slow(chunks, pause) => {
                    let s = stream::iter(chunks).then(move |chunk| async move {
                        tokio::time::sleep(pause).await;
                        Ok(chunk)
                    });
                    return Ok(Box::pin(s));
                }
                MockResponse::StreamThenError(chunks, error) => {
                    let items = chunks.into_iter().map(Ok).chain(std::iter::once(Err(error)));
                    return Ok(Box::pin(stream::iter(items)));
                }
                MockResponse::Error(e) => return Err(e),
                MockResponse::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    current = *inner;
                }
                MockResponse::Hang => {
                    futures::future::pending::<()>().await;
                    return Err(ProviderError::Cancelled);
                }
            }
        }
    }
}
