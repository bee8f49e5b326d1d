use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use wright_core::events::DomainEvent;
use wright_core::provider::{ModelChunk, ModelStream};
use wright_core::stream::{StreamEvent, ToolStatus};
use wright_core::tools::ToolRequest;

use crate::coordinator::ToolQueue;
use crate::event_bus::EventBus;
use crate::parser::MessageParser;
use crate::state::StateManager;

/// Where client-facing events go. A dropped receiver is not an error; the
/// agent keeps working and its events are discarded.
pub type EventSink = mpsc::UnboundedSender<StreamEvent>;

/// Feeds model output through the parser, forwards the resulting events to
/// the client and queues each finished tool call for execution.
pub struct StreamProcessor {
    state: Arc<StateManager>,
    bus: Arc<EventBus>,
}

impl StreamProcessor {
    pub fn new(state: Arc<StateManager>, bus: Arc<EventBus>) -> Self {
        Self { state, bus }
    }

    /// Consume `stream` to the end, or until `cancel` fires. A provider error
    /// mid-stream is reported to the client as text and ends consumption;
    /// tools already queued still run.
    pub async fn process(&self, mut stream: ModelStream, queue: &ToolQueue, sink: &EventSink, cancel: &CancellationToken) {
        self.state.begin_streaming();
        self.bus.publish(DomainEvent::StreamStarted);

        let mut parser = MessageParser::new();
        let mut thinking = false;
        let mut interrupted = false;

        loop {
            let chunk = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    interrupted = true;
                    break;
                }
                chunk = stream.next() => chunk,
            };

            match chunk {
                None => break,
                Some(Ok(ModelChunk::Delta(text))) => {
                    if self.state.is_aborted() {
                        interrupted = true;
                        break;
                    }
                    self.state.append_message(&text);
                    for event in parser.feed(&text) {
                        self.forward(event, &mut thinking, queue, sink);
                    }
                }
                Some(Ok(ModelChunk::Usage(usage))) => {
                    self.bus.publish(DomainEvent::UsageUpdated {
                        input_tokens: usage.input_tokens,
                        output_tokens: usage.output_tokens,
                    });
                    let _ = sink.send(StreamEvent::Usage {
                        input_tokens: usage.input_tokens,
                        output_tokens: usage.output_tokens,
                        cache_write_tokens: usage.cache_write_tokens,
                        cache_read_tokens: usage.cache_read_tokens,
                        total_cost: usage.total_cost,
                    });
                }
                Some(Err(e)) => {
                    error!(error = %e, "error processing stream");
                    let _ = sink.send(StreamEvent::text(format!("Error processing assistant response: {e}")));
                    interrupted = true;
                    break;
                }
            }
        }

        if interrupted {
            info!("stream processing stopped early");
        } else {
            for event in parser.finish() {
                self.forward(event, &mut thinking, queue, sink);
            }
            if parser.in_tool() {
                debug!("discarding unterminated tool block");
            }
        }
        if thinking {
            self.bus.publish(DomainEvent::ThinkingEnded);
        }
        self.bus.publish(DomainEvent::StreamEnded);
        self.state.end_streaming();
    }

    fn forward(&self, event: StreamEvent, thinking: &mut bool, queue: &ToolQueue, sink: &EventSink) {
        let is_thinking = matches!(event, StreamEvent::Thinking { .. });
        if is_thinking != *thinking {
            *thinking = is_thinking;
            self.bus.publish(if is_thinking {
                DomainEvent::ThinkingStarted
            } else {
                DomainEvent::ThinkingEnded
            });
        }

        let request = match &event {
            StreamEvent::Tool {
                tool_name,
                tool_id,
                status: ToolStatus::Executing,
                params,
                ..
            } => Some(ToolRequest {
                name: tool_name.clone(),
                params: params.clone().unwrap_or_default(),
                tool_id: tool_id.clone(),
            }),
            _ => None,
        };

        let _ = sink.send(event);

        if let Some(request) = request {
            debug!(tool = %request.name, tool_id = %request.tool_id, "tool requested");
            self.bus.publish(DomainEvent::ToolRequested {
                name: request.name.clone(),
                id: request.tool_id.clone(),
                params: request.params.clone(),
            });
            if queue.send(Some(request)).is_err() {
                error!("tool queue closed, dropping request");
            }
        }
    }
}
