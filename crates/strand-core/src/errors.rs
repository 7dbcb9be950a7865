use std::time::Duration;

/// Errors surfaced by a [`Model`](crate::model::Model).
/// Retryable variants are reported by [`ModelError::is_retryable`].
#[derive(Clone, Debug, thiserror::Error)]
pub enum ModelError {
    // Fatal, never retried
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("context window exceeded: {actual} > {limit}")]
    ContextWindowExceeded { limit: usize, actual: usize },
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // Retryable
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("provider overloaded")]
    ProviderOverloaded,
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // Operational
    #[error("cancelled")]
    Cancelled,
}

impl ModelError {
    /// Rate-limit, transient API and timeout categories.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::ServerError { .. }
                | Self::ProviderOverloaded
                | Self::NetworkError(_)
                | Self::StreamInterrupted(_)
                | Self::Timeout(_)
        )
    }

    pub fn suggested_delay(&self) -> Option<Duration> {
        if let Self::RateLimited { retry_after } = self {
            *retry_after
        } else {
            None
        }
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::ContextWindowExceeded { .. } => "context_window_exceeded",
            Self::InvalidRequest(_) => "invalid_request",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::ProviderOverloaded => "provider_overloaded",
            Self::NetworkError(_) => "network_error",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Failure of a single tool execution. Never fatal to the run: the invoker
/// folds it into a [`ToolResult`](crate::messages::ToolResult) error.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
}

/// Why a [`RunContext`](crate::context::RunContext) is done.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("context cancelled")]
    Cancelled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("memory store unavailable: {0}")]
    Unavailable(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint not found: {0}")]
    NotFound(String),
    #[error("invalid checkpoint: {0}")]
    Invalid(String),
    #[error("checkpoint storage error: {0}")]
    Storage(String),
}

impl From<serde_json::Error> for CheckpointError {
    fn from(e: serde_json::Error) -> Self {
        CheckpointError::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ModelError::RateLimited { retry_after: None }.is_retryable());
        assert!(ModelError::ServerError { status: 500, body: "err".into() }.is_retryable());
        assert!(ModelError::ProviderOverloaded.is_retryable());
        assert!(ModelError::NetworkError("tcp".into()).is_retryable());
        assert!(ModelError::StreamInterrupted("eof".into()).is_retryable());
        assert!(ModelError::Timeout(Duration::from_secs(30)).is_retryable());
    }

    #[test]
    fn request_and_auth_errors_are_not_retried() {
        assert!(!ModelError::AuthenticationFailed("bad key".into()).is_retryable());
        assert!(!ModelError::ContextWindowExceeded { limit: 200_000, actual: 250_000 }.is_retryable());
        assert!(!ModelError::InvalidRequest("bad".into()).is_retryable());
        assert!(!ModelError::Cancelled.is_retryable());
    }

    #[test]
    fn suggested_delay_only_for_rate_limit() {
        let rl = ModelError::RateLimited {
            retry_after: Some(Duration::from_secs(5)),
        };
        assert_eq!(rl.suggested_delay(), Some(Duration::from_secs(5)));
        let se = ModelError::ServerError { status: 500, body: "err".into() };
        assert_eq!(se.suggested_delay(), None);
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(ModelError::Cancelled.error_kind(), "cancelled");
        assert_eq!(ModelError::Timeout(Duration::ZERO).error_kind(), "timeout");
        assert_eq!(
            ModelError::RateLimited { retry_after: None }.error_kind(),
            "rate_limited"
        );
    }
}
