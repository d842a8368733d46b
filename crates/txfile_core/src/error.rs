//! Error types for the transactional file core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in transactional file operations.
///
/// Programming errors, such as writing through a read-only transaction,
/// are not represented here. They panic.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Byte store error, propagated unchanged.
    #[error("storage error: {0}")]
    Storage(#[from] txfile_storage::StorageError),

    /// The WAL holds corrupt or unrecoverable state.
    ///
    /// The file must be considered unusable.
    #[error("WAL error: {message}")]
    WalCorrupted {
        /// Description of the corruption.
        message: String,
    },

    /// The WAL has no room for the record, even after compaction.
    ///
    /// The write may be retried once other transactions leave the log.
    #[error("WAL full: {message}")]
    WalFull {
        /// Description of what ran out.
        message: String,
    },

    /// The owning commit manager was torn down mid-operation.
    #[error("database has shut down")]
    GoneAway,

    /// A persisted header does not have the expected layout.
    #[error("invalid format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// The commit id space of the current generation is used up.
    #[error("too many transactions without vacuuming")]
    TooManyTransactions,

    /// An argument is out of range.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the bad argument.
        message: String,
    },

    /// Commit validation rejected the transaction.
    #[error("transaction failed: {message}")]
    TransactionFailed {
        /// Reason given by the validator.
        message: String,
    },
}

impl CoreError {
    /// Creates a WAL corruption error.
    pub fn wal_corrupted(message: impl Into<String>) -> Self {
        Self::WalCorrupted {
            message: message.into(),
        }
    }

    /// Creates a WAL full error.
    pub fn wal_full(message: impl Into<String>) -> Self {
        Self::WalFull {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a validation failure.
    pub fn transaction_failed(message: impl Into<String>) -> Self {
        Self::TransactionFailed {
            message: message.into(),
        }
    }

    /// Returns true if the file must no longer be used.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::WalCorrupted { .. })
    }

    /// Returns true if retrying with a fresh transaction may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WalFull { .. } | Self::TransactionFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_wal_corruption_is_fatal() {
        assert!(CoreError::wal_corrupted("bad tag").is_fatal());
        assert!(!CoreError::wal_full("no space in WAL").is_fatal());
        assert!(!CoreError::GoneAway.is_fatal());
    }

    #[test]
    fn wal_full_is_retryable() {
        assert!(CoreError::wal_full("no space in WAL").is_retryable());
        assert!(!CoreError::TooManyTransactions.is_retryable());
    }

    #[test]
    fn messages_render() {
        assert_eq!(
            CoreError::GoneAway.to_string(),
            "database has shut down"
        );
        assert_eq!(
            CoreError::wal_full("ran out of WAL transaction ids").to_string(),
            "WAL full: ran out of WAL transaction ids"
        );
    }

    #[test]
    fn storage_errors_convert() {
        let err: CoreError = txfile_storage::StorageError::Closed.into();
        assert!(matches!(err, CoreError::Storage(_)));
    }
}
