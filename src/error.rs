//! Error types for the Conclave orchestrator.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Unified error type covering configuration, admission, provider-call, and
/// pipeline failures.
///
/// Variants are intentionally coarse-grained so that callers can match on
/// error *category* (e.g. retryable vs permanent) rather than on
/// provider-specific details.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Invalid or missing configuration (bad model catalog entry, unknown
    /// provider, malformed config file, etc.).
    #[error("Configuration error: {0}")]
    Config(String),

    /// The request failed admission checks (prompt too long, missing fields,
    /// tier concurrency exceeded at the boundary).
    #[error("Validation error: {0}")]
    Validation(String),

    /// The requested model ID is not present in the provider registry.
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// The remote API returned HTTP 429 (too many requests), or a tier
    /// admission semaphore rejected the request.
    #[error("Rate limited")]
    RateLimited,

    /// The remote API returned HTTP 401/403 (bad or missing credentials).
    #[error("Unauthorized")]
    Unauthorized,

    /// The operation exceeded its configured deadline.
    #[error("Timeout")]
    Timeout,

    /// The circuit breaker for the target model is open; the call was
    /// short-circuited without touching the network.
    #[error("Circuit open")]
    CircuitOpen,

    /// An HTTP or connection-level failure, including 5xx responses.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The provider answered 2xx but the body could not be interpreted
    /// (missing content, unparseable JSON, empty completion).
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// A bug or unexpected condition inside the pipeline itself.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Returns `true` for transient errors that may succeed on retry:
    /// [`RateLimited`](Self::RateLimited) and [`Timeout`](Self::Timeout).
    ///
    /// [`InvalidResponse`](Self::InvalidResponse) is deliberately not
    /// retryable: a provider that returns garbage once will usually return
    /// the same garbage again, and the dispatcher's alternate-family
    /// fallback is the right recovery path.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Timeout)
    }

    /// Stable category label used for metrics and the boundary error
    /// envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Validation(_) => "validation",
            Self::ModelNotFound(_) => "model_not_found",
            Self::RateLimited => "rate_limited",
            Self::Unauthorized => "unauthorized",
            Self::Timeout => "timeout",
            Self::CircuitOpen => "circuit_open",
            Self::Transport(_) => "transport",
            Self::InvalidResponse(_) => "invalid_response",
            Self::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_covers_rate_limit_and_timeout_only() {
        assert!(OrchestratorError::RateLimited.is_retryable());
        assert!(OrchestratorError::Timeout.is_retryable());
        assert!(!OrchestratorError::CircuitOpen.is_retryable());
        assert!(!OrchestratorError::Transport("boom".into()).is_retryable());
        assert!(!OrchestratorError::InvalidResponse("empty".into()).is_retryable());
        assert!(!OrchestratorError::Validation("too long".into()).is_retryable());
    }

    #[test]
    fn kind_labels_are_stable() {
        assert_eq!(OrchestratorError::RateLimited.kind(), "rate_limited");
        assert_eq!(OrchestratorError::CircuitOpen.kind(), "circuit_open");
        assert_eq!(OrchestratorError::Validation("x".into()).kind(), "validation");
    }
}
