pub mod compacting;
pub mod error;
pub mod file;
pub mod list;
pub mod memory;
pub mod tokens;

pub use compacting::{CompactingListStore, CompactionStats, StoreConfig, PRIMABLE_TAGS};
pub use error::StoreError;
pub use file::FileListStore;
pub use list::ListStore;
pub use memory::MemoryListStore;
pub use tokens::{CharEstimator, TokenCounter};
