//! Concrete collaborators behind the `wright_core::services` traits.

pub mod backup;
pub mod merge;
pub mod runner;
pub mod snapshot;

pub use backup::DirectoryBackup;
pub use merge::SearchReplaceMerger;
pub use runner::{HttpRunnerClient, LoggingRunner};
pub use snapshot::GitSnapshotter;
