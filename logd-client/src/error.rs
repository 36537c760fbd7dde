//! Client error types.

use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced to client callers.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A socket-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The server's bytes did not parse, or a request failed local
    /// validation before sending.
    #[error("protocol error: {0}")]
    Protocol(#[from] logd_protocol::ProtocolError),

    /// The server answered `CLIENT_ERR`.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The server answered `ERR`.
    #[error("server error")]
    Server,
}
