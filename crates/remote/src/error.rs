//! Error types for remote cache operations.

use std::fmt;

use buildcache_common::Digest;
use thiserror::Error;

/// Errors that can occur during a single cache transfer.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Digest absent from the remote store. Never retried at this layer.
    #[error("Blob not found remotely: {digest}")]
    NotFound {
        /// The digest that was requested.
        digest: Digest,
    },

    /// Network/transport failure. The transport below this layer retries
    /// with bounded attempts and backoff; by the time this surfaces, the
    /// call has a final outcome.
    #[error("Transport error: {message}")]
    Transport {
        /// Human-readable failure description.
        message: String,
        /// Whether the transport classified the failure as transient.
        retryable: bool,
    },

    /// Local disk write/symlink failure. Surfaced immediately, never
    /// retried.
    #[error("I/O error at {path}: {message}")]
    LocalIo {
        /// Path where the error occurred.
        path: String,
        /// Error message.
        message: String,
    },

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// What was wrong.
        message: String,
    },
}

impl CacheError {
    /// Create a LocalIo error from std::io::Error.
    ///
    /// # Arguments
    /// * `path` - Path where the error occurred
    /// * `err` - The underlying IO error
    pub fn local_io(path: impl Into<String>, err: std::io::Error) -> Self {
        Self::LocalIo {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Check if this error is retryable by the transport layer.
    pub fn is_retryable(&self) -> bool {
        match self {
            CacheError::Transport { retryable, .. } => *retryable,
            CacheError::NotFound { .. } => false,
            CacheError::LocalIo { .. } => false,
            CacheError::InvalidConfig { .. } => false,
        }
    }
}

/// One failed transfer within a bulk operation.
#[derive(Debug, Clone)]
pub struct TransferFailure {
    /// Name of the transfer that failed (output path, stream name, or
    /// digest).
    pub name: String,
    /// The error that occurred.
    pub error: CacheError,
}

impl TransferFailure {
    /// Create a new transfer failure.
    pub fn new(name: impl Into<String>, error: CacheError) -> Self {
        Self {
            name: name.into(),
            error,
        }
    }
}

/// Aggregate failure raised by a bulk wait.
///
/// Collects every individual failure observed while waiting, so a caller
/// learns which named transfers failed and why rather than a bare
/// "transfer failed".
#[derive(Debug, Clone)]
pub struct BulkTransferError {
    /// The failures observed, in completion order.
    pub failures: Vec<TransferFailure>,
}

impl BulkTransferError {
    /// Wrap a single failure (the fail-fast case).
    pub fn single(name: impl Into<String>, error: CacheError) -> Self {
        Self {
            failures: vec![TransferFailure::new(name, error)],
        }
    }
}

impl fmt::Display for BulkTransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} transfer(s) failed:", self.failures.len())?;
        for failure in &self.failures {
            write!(f, " [{}: {}]", failure.name, failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for BulkTransferError {}
