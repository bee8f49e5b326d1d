use wright_core::errors::ProviderError;
use wright_core::ids::TurnId;
use wright_core::tools::ToolError;
use wright_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Rejections and failures of the file operation manager. Display strings
/// are reported to the model verbatim through the tool error message.
#[derive(Debug, thiserror::Error)]
pub enum FileOpError {
    #[error("No active turn")]
    NoActiveTurn,

    #[error("Turn {0} is still active")]
    TurnActive(TurnId),

    #[error("Cannot write to protected file/path: {0}")]
    ProtectedWrite(String),

    #[error("Cannot delete protected file/path: {0}")]
    ProtectedDelete(String),

    #[error("Cannot rename protected source file/path: {0}")]
    ProtectedSource(String),

    #[error("Cannot rename to protected destination file/path: {0}")]
    ProtectedDestination(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Source file not found: {0}")]
    SourceNotFound(String),

    #[error("Destination file already exists: {0}")]
    DestinationExists(String),

    #[error("failed to apply change to {path}: {source}")]
    Apply {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl FileOpError {
    pub fn is_protected(&self) -> bool {
        matches!(
            self,
            Self::ProtectedWrite(_)
                | Self::ProtectedDelete(_)
                | Self::ProtectedSource(_)
                | Self::ProtectedDestination(_)
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("file operation error: {0}")]
    FileOp(#[from] FileOpError),

    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("model response timed out after {0:?}")]
    ModelTimeout(std::time::Duration),

    #[error("agent aborted")]
    Aborted,

    #[error("{0}")]
    Internal(String),
}
