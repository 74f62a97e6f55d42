// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the failover group.
//!
//! Errors are categorized by their source and include context to help with
//! debugging. Delegate errors (a candidate outbound failing to dial) are
//! surfaced to callers unwrapped so they can still match on the original
//! failure.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Connection` | Yes | A candidate outbound failed to dial or listen |
//! | `Probe` | Yes | Recovery probe round-trip failed |
//! | `Interrupted` | Yes | Connection evicted by a switch or recovery event |
//! | `Config` | No | Configuration invalid |
//! | `OutboundNotFound` | No | Unknown tag at start |
//! | `NoAvailableOutbound` | No | Dial/listen before start or after close |
//! | `InvalidState` | No | Group lifecycle violation |
//! | `Canceled` | No | The per-call context was canceled |
//! | `Internal` | No | Unexpected internal error |
//!
//! # Retry Behavior
//!
//! Use [`FailoverError::is_retryable()`] to determine if an operation should
//! be retried. Retryable errors indicate transient network issues; the group
//! itself already retries at most once after a switch, so callers should not
//! stack additional retries on top of a single `dial`.

use thiserror::Error;

/// Result type alias for failover operations.
pub type Result<T> = std::result::Result<T, FailoverError>;

/// Errors that can occur while dispatching through the failover group.
#[derive(Error, Debug)]
pub enum FailoverError {
    /// Invalid or missing configuration.
    ///
    /// Occurs during group construction if the config is malformed.
    /// Not retryable - fix the configuration and restart.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A configured tag did not resolve to a live outbound at start.
    #[error("outbound {index} not found: {tag}")]
    OutboundNotFound { index: usize, tag: String },

    /// No candidate is selectable.
    ///
    /// Returned when dial/listen is attempted before `start()` completed,
    /// after `close()`, or when the selection index is out of range.
    #[error("no available outbound")]
    NoAvailableOutbound,

    /// Group lifecycle violation.
    ///
    /// Occurs when an operation is attempted in the wrong state
    /// (e.g., calling `start()` on an already-running group).
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// The per-call context was canceled while the operation was in flight.
    ///
    /// Cancellation still counts toward the selected candidate's
    /// consecutive-failure budget.
    #[error("operation canceled")]
    Canceled,

    /// A live connection was forcibly closed by a switch or recovery event.
    #[error("connection interrupted by failover")]
    Interrupted,

    /// A candidate outbound failed to establish a connection.
    ///
    /// These are typically retryable (network timeouts, refused connections).
    #[error("Connection error ({tag}): {message}")]
    Connection {
        tag: String,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Recovery probe round-trip failed.
    ///
    /// Swallowed by the recovery loop (logged at debug); selection unchanged.
    #[error("Probe error: {0}")]
    Probe(String),

    /// Unexpected internal error.
    ///
    /// Catch-all for errors that shouldn't happen.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FailoverError {
    /// Create a connection error from an I/O error.
    pub fn connection(tag: impl Into<String>, source: std::io::Error) -> Self {
        Self::Connection {
            tag: tag.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a connection error without an I/O source.
    pub fn connection_msg(tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            tag: tag.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } => true,
            Self::Probe(_) => true,
            Self::Interrupted => true,
            Self::Config(_) => false,
            Self::OutboundNotFound { .. } => false,
            Self::NoAvailableOutbound => false,
            Self::InvalidState { .. } => false,
            Self::Canceled => false,
            Self::Internal(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message_includes_index_and_tag() {
        let err = FailoverError::OutboundNotFound {
            index: 2,
            tag: "proxy-b".to_string(),
        };
        assert_eq!(err.to_string(), "outbound 2 not found: proxy-b");
    }

    #[test]
    fn test_no_available_outbound_message() {
        let err = FailoverError::NoAvailableOutbound;
        assert_eq!(err.to_string(), "no available outbound");
    }

    #[test]
    fn test_is_retryable_connection() {
        let err = FailoverError::connection_msg("proxy-a", "connection refused");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("proxy-a"));
    }

    #[test]
    fn test_is_retryable_probe() {
        let err = FailoverError::Probe("timed out".to_string());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_not_retryable_config() {
        let err = FailoverError::Config("missing outbounds".to_string());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_not_retryable_canceled() {
        assert!(!FailoverError::Canceled.is_retryable());
    }

    #[test]
    fn test_connection_error_preserves_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = FailoverError::connection("proxy-a", io);
        match err {
            FailoverError::Connection { tag, source, .. } => {
                assert_eq!(tag, "proxy-a");
                assert!(source.is_some());
            }
            other => panic!("expected Connection error, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_state_formatting() {
        let err = FailoverError::InvalidState {
            expected: "Created".to_string(),
            actual: "Running".to_string(),
        };
        assert!(err.to_string().contains("Created"));
        assert!(err.to_string().contains("Running"));
    }
}
