use std::time::Duration;

/// Failures raised by a model provider while opening or reading a stream.
/// Classified so the orchestrator can choose between timeout, bad-request and
/// generic failure handling.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ProviderError {
    // Caller mistakes
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("bad request: {0}")]
    BadRequest(String),

    // Retryable
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),

    // Operational
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::ServerError { .. }
                | Self::NetworkError(_)
                | Self::StreamInterrupted(_)
        )
    }

    pub fn is_bad_request(&self) -> bool {
        matches!(self, Self::BadRequest(_))
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::BadRequest(_) => "bad_request",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::NetworkError(_) => "network_error",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
            Self::Other(_) => "other",
        }
    }

    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            400 | 413 | 422 => Self::BadRequest(body),
            429 => Self::RateLimited { retry_after: None },
            500..=599 => Self::ServerError { status, body },
            _ => Self::Other(format!("unexpected status {status}: {body}")),
        }
    }
}

/// Raised by a post-commit or pre-commit hook function.
#[derive(Clone, Debug, thiserror::Error)]
pub enum HookError {
    #[error("{0}")]
    Failed(String),
    #[error("hook timed out after {0:?}")]
    Timeout(Duration),
    #[error("hook panicked: {0}")]
    Panicked(String),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Raised by the external collaborators (runner, git, backup, merger).
#[derive(Clone, Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("http error: {0}")]
    Http(String),
    #[error("runner returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("command `{command}` failed: {stderr}")]
    Command { command: String, stderr: String },
    #[error("io error: {0}")]
    Io(String),
    #[error("merge failed: {0}")]
    Merge(String),
}

impl From<std::io::Error> for ServiceError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ProviderError::RateLimited { retry_after: None }.is_retryable());
        assert!(ProviderError::ServerError { status: 503, body: "x".into() }.is_retryable());
        assert!(!ProviderError::BadRequest("x".into()).is_retryable());
        assert!(!ProviderError::Timeout(Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn from_status_mapping() {
        assert!(ProviderError::from_status(400, "bad".into()).is_bad_request());
        assert_eq!(ProviderError::from_status(401, "no".into()).error_kind(), "authentication_failed");
        assert_eq!(ProviderError::from_status(429, String::new()).error_kind(), "rate_limited");
        assert_eq!(ProviderError::from_status(502, "gw".into()).error_kind(), "server_error");
        assert_eq!(ProviderError::from_status(302, "moved".into()).error_kind(), "other");
    }

    #[test]
    fn hook_error_wraps_service_error() {
        let err: HookError = ServiceError::Command {
            command: "git commit".into(),
            stderr: "nothing to commit".into(),
        }
        .into();
        assert_eq!(err.to_string(), "command `git commit` failed: nothing to commit");
    }
}
