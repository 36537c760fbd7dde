//! Protocol error types.
//!
//! Every inbound validation failure maps to a `CLIENT_ERR` response; only
//! I/O failures are fatal to the connection. [`InvalidFirstByte`] while
//! scanning outbound chunks is fatal to the reader.
//!
//! [`InvalidFirstByte`]: ProtocolError::InvalidFirstByte

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors produced while parsing or framing protocol data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A request or log line did not match the grammar.
    #[error("invalid protocol line")]
    InvalidProtocolLine,

    /// A batch body was shorter or longer than its declared length.
    #[error("invalid body length {0}")]
    InvalidBodyLength(u64),

    /// The declared CRC does not match the body bytes.
    #[error("crc checksum mismatch: declared {declared}, computed {computed}")]
    CrcMismatch {
        /// CRC carried on the wire.
        declared: u32,
        /// CRC computed over the received body.
        computed: u32,
    },

    /// A chunk envelope did not start with the `+` sigil.
    #[error("invalid first byte {found:#04x}, expected '+'")]
    InvalidFirstByte {
        /// The byte found instead.
        found: u8,
    },

    /// Wrong arity, malformed integer, or inconsistent counts.
    #[error("invalid format: {0}")]
    InvalidFormat(&'static str),

    /// The command name is not part of the grammar.
    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    /// A batch contained a zero-length message.
    #[error("empty message in batch")]
    EmptyMessage,

    /// The topic name is empty, too long, or has illegal characters.
    #[error("invalid topic name {0:?}")]
    InvalidTopic(String),

    /// A declared size exceeds the protocol limit.
    #[error("request too large: {size} bytes (max {max})")]
    TooLarge {
        /// The declared size.
        size: u64,
        /// The maximum allowed.
        max: u64,
    },

    /// An I/O error from the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns true if this failure should be reported as `CLIENT_ERR`
    /// rather than tearing down the connection.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        !matches!(self, Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(ProtocolError::EmptyMessage.is_client_error());
        assert!(ProtocolError::CrcMismatch {
            declared: 1,
            computed: 2
        }
        .is_client_error());
        assert!(!ProtocolError::Io(std::io::Error::other("boom")).is_client_error());
    }

    #[test]
    fn test_display_names_values() {
        let err = ProtocolError::CrcMismatch {
            declared: 10,
            computed: 20,
        };
        let msg = err.to_string();
        assert!(msg.contains("10"));
        assert!(msg.contains("20"));
    }
}
