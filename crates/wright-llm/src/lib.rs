//! Model providers that need no network: a scripted mock for tests and a
//! replay provider that streams recorded responses from disk.

pub mod mock;
pub mod replay;

pub use mock::{MockProvider, MockResponse};
pub use replay::{chunk_text, ReplayError, ReplayProvider};
