//! Error
//!
//! This module provides the errors returned by [`crate::MutexClient`]
//! with [`thiserror`]
//!
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result use the [`MutexError`] as error.
pub type Result<T> = std::result::Result<T, MutexError>;

/// MutexError is the specific error for [`crate::MutexClient`]
#[derive(Error, Debug)]
pub enum MutexError {
    #[error("io error {0}")]
    /// IO relevant errors
    Io(#[from] io::Error),
    #[error("serde error {0}")]
    /// Serialized or Deserialized errors
    Serde(#[from] serde_json::Error),

    /// The endpoint string is not `host:port`.
    #[error("invalid address {0:?}, expected host:port")]
    InvalidAddress(String),

    /// The liveness probe at construction could not reach the server.
    #[error("unable to reach {endpoint}: {source}")]
    Unreachable {
        /// Endpoint that was probed.
        endpoint: String,
        /// Underlying connect failure.
        #[source]
        source: io::Error,
    },

    /// A configuration value is out of range or unknown.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The request can never be encoded, e.g. an empty or over-long key.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The action has no encoding in the configured protocol version.
    #[error("action {action} is not supported by protocol {version}")]
    Unsupported {
        /// Action name.
        action: &'static str,
        /// Protocol version name.
        version: &'static str,
    },

    /// The server answered with something other than `+`.
    #[error("server rejected the request")]
    Rejected,

    /// The retry policy ran out of attempts.
    #[error("gave up after {attempts} attempts, last error: {last}")]
    Exhausted {
        /// Attempts performed.
        attempts: u32,
        /// Description of the last failure.
        last: String,
    },

    /// The retry policy deadline passed.
    #[error("timed out after {attempts} attempts ({elapsed:?})")]
    TimedOut {
        /// Attempts performed.
        attempts: u32,
        /// Time spent in the operation.
        elapsed: Duration,
    },

    /// The operation was cancelled through its [`crate::CancelToken`].
    #[error("cancelled after {attempts} attempts")]
    Cancelled {
        /// Attempts performed.
        attempts: u32,
    },
}

impl MutexError {
    /// Whether another attempt could change the outcome.
    ///
    /// Network failures and negative acknowledgments are transient; a request
    /// that cannot be encoded stays invalid forever.
    pub fn is_transient(&self) -> bool {
        matches!(self, MutexError::Io(_) | MutexError::Rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_transient_errors() {
        assert!(MutexError::Rejected.is_transient());
        assert!(MutexError::Io(io::Error::from(io::ErrorKind::ConnectionReset)).is_transient());
        assert!(!MutexError::InvalidRequest("empty key".into()).is_transient());
        assert!(!MutexError::InvalidConfig("multiplier".into()).is_transient());
        assert!(
            !MutexError::Unsupported {
                action: "ResetBySource",
                version: "legacy"
            }
            .is_transient()
        );
    }
}
