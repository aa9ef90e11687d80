//! Error types for ReviewRelay.
//!
//! Library crates use [`ReviewRelayError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all ReviewRelay operations.
#[derive(Debug, thiserror::Error)]
pub enum ReviewRelayError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transient network failure (connect error, timeout, upstream 5xx).
    #[error("network error: {0}")]
    Network(String),

    /// The remote side asked us to slow down.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Non-success HTTP response that is not worth retrying.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// A recognised "nothing there" condition (unknown user, missing page).
    #[error("not found: {0}")]
    NotFound(String),

    /// Persisted state disagrees with freshly fetched data.
    #[error("data integrity: {0}")]
    DataIntegrity(String),

    /// Outbound message could not be delivered to one destination.
    #[error("send to channel {channel} failed: {message}")]
    Send { channel: String, message: String },

    /// HTML or JSON parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Input validation error (bad username, bad channel id, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ReviewRelayError>;

impl ReviewRelayError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a send failure for a specific channel.
    pub fn send(channel: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Send {
            channel: channel.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a retry loop may try again after this error.
    ///
    /// Only transient network failures qualify. Rate limiting is deliberately
    /// excluded: callers space their requests instead of hammering a service
    /// that already said no.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Whether this error is a rate-limit response.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = ReviewRelayError::config("missing token");
        assert_eq!(err.to_string(), "config error: missing token");

        let err = ReviewRelayError::send("123", "HTTP 403");
        assert_eq!(err.to_string(), "send to channel 123 failed: HTTP 403");

        let err = ReviewRelayError::Http {
            status: 400,
            message: "bad query".into(),
        };
        assert!(err.to_string().contains("400"));
    }

    #[test]
    fn only_network_errors_are_transient() {
        assert!(ReviewRelayError::Network("timed out".into()).is_transient());
        assert!(!ReviewRelayError::RateLimited("429".into()).is_transient());
        assert!(ReviewRelayError::RateLimited("429".into()).is_rate_limited());
        assert!(
            !ReviewRelayError::Http {
                status: 404,
                message: String::new()
            }
            .is_transient()
        );
        assert!(!ReviewRelayError::parse("bad json").is_transient());
    }
}
