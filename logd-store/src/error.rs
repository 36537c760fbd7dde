//! Store error types.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the partition store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The offset is below the oldest readable offset, beyond the head, or
    /// not a batch boundary.
    #[error("offset {0} not found")]
    NotFound(u64),

    /// An I/O operation failed.
    #[error("I/O error: {operation}: {message}")]
    Io {
        /// What operation was being performed.
        operation: &'static str,
        /// Error message.
        message: String,
    },

    /// Stored data failed framing or CRC validation.
    #[error("corrupt log data: {reason}")]
    Corrupt {
        /// What was wrong.
        reason: String,
    },
}

impl StoreError {
    /// Creates an I/O error.
    pub fn io(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Io {
            operation,
            message: err.to_string(),
        }
    }

    /// Creates a corruption error.
    pub fn corrupt(reason: impl Into<String>) -> Self {
        Self::Corrupt {
            reason: reason.into(),
        }
    }

    /// Returns true when the error is a missing-offset lookup failure,
    /// which maps to `CLIENT_ERR` rather than `ERR`.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Maps a protocol failure hit while reading stored bytes: I/O passes
    /// through, anything else means the log is corrupt.
    pub(crate) fn from_stored(err: logd_protocol::ProtocolError) -> Self {
        match err {
            logd_protocol::ProtocolError::Io(e) => Self::io("read", e),
            other => Self::corrupt(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(StoreError::NotFound(42).is_not_found());
        assert!(!StoreError::io("append", "disk full").is_not_found());
    }

    #[test]
    fn test_from_stored_maps_corruption() {
        let err = StoreError::from_stored(logd_protocol::ProtocolError::CrcMismatch {
            declared: 1,
            computed: 2,
        });
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }
}
