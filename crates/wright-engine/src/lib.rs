//! # wright-engine
//!
//! The agent runtime.
//!
//! - **Parser**: model text fragments -> text, thinking and tool events
//! - **Event bus**: typed pub/sub between components
//! - **Coordinator**: runs parsed tool calls concurrently while the stream continues
//! - **File operations**: turn-scoped change log with pre- and post-commit hooks
//! - **Memory**: conversation history on a token budget
//! - **Orchestrator**: model call -> tools -> commit -> next step

#![deny(unsafe_code)]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod event_bus;
pub mod file_ops;
pub mod hooks;
pub mod ignore_rules;
pub mod memory;
pub mod orchestrator;
pub mod parser;
pub mod registry;
pub mod services;
pub mod state;
pub mod stream_processor;
pub mod tools;

pub use config::AgentConfig;
pub use error::{ConfigError, EngineError, FileOpError};
pub use event_bus::EventBus;
pub use orchestrator::{Collaborators, Orchestrator};
pub use parser::MessageParser;
pub use stream_processor::EventSink;
