//! Unified error types for dgm

use std::time::Duration;
use thiserror::Error;

/// Unified error type for all dgm operations
#[derive(Error, Debug)]
pub enum DgmError {
    // Archive errors
    #[error("Invalid lineage: {0}")]
    InvalidLineage(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Duplicate code: {0}")]
    DuplicateCode(String),

    // Run setup errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    // Oracle errors
    #[error("Oracle unavailable: {0}")]
    OracleUnavailable(String),

    #[error("Oracle returned malformed response: {0}")]
    OracleMalformedResponse(String),

    // Agent runner errors
    #[error("Agent runner error: {0}")]
    Runner(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("API rate limit: {message}")]
    ApiLimit {
        message: String,
        /// Wait requested by the server, if it sent one
        retry_after: Option<Duration>,
    },

    #[error("Authentication error: {0}")]
    Auth(String),

    // Persistence errors
    #[error("Persistence error: {0}")]
    Persistence(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl DgmError {
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::ApiLimit {
            message: message.into(),
            retry_after,
        }
    }

    /// Server-requested delay before retrying, only set for rate limits
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::ApiLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Whether this error must abort the run.
    ///
    /// Everything else is recovered locally: the iteration is skipped or the
    /// example is counted as incorrect.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidLineage(_)
                | Self::DuplicateCode(_)
                | Self::Config(_)
                | Self::Dataset(_)
                | Self::Auth(_)
        )
    }

    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::OracleUnavailable(_) | Self::Timeout(_) | Self::ApiLimit { .. } | Self::Io(_)
        )
    }
}

/// Result type alias using DgmError
pub type Result<T> = std::result::Result<T, DgmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(DgmError::InvalidLineage("v9".into()).is_fatal());
        assert!(DgmError::Config("bad".into()).is_fatal());
        assert!(!DgmError::OracleUnavailable("down".into()).is_fatal());
        assert!(!DgmError::Runner("crash".into()).is_fatal());
    }

    #[test]
    fn test_transient_classification() {
        assert!(DgmError::Timeout("slow".into()).is_transient());
        assert!(DgmError::rate_limited("429", None).is_transient());
        assert!(!DgmError::OracleMalformedResponse("empty".into()).is_transient());
        assert!(!DgmError::Runner("exit 1".into()).is_transient());
    }

    #[test]
    fn test_retry_after_only_on_rate_limit() {
        let limited = DgmError::rate_limited("429", Some(Duration::from_secs(3)));
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(DgmError::Timeout("slow".into()).retry_after(), None);
    }
}
