//! Logd wire protocol.
//!
//! The same framing is used on the socket and on disk, so a partition file is
//! a plain concatenation of batch wire bytes.
//!
//! # Wire Format
//!
//! ```text
//! BATCH <topic> <messages> <crc32> <body_length>\r\n
//! MSG <length>\r\n<bytes>\r\n      ]
//! MSG <length>\r\n<bytes>\r\n      ]  <body_length> bytes
//! \r\n
//! ```
//!
//! The CRC-32 (IEEE) covers the body bytes only and is written as unsigned
//! decimal, matching every other integer token in the grammar. The trailing
//! `\r\n` after the body is not counted in `<body_length>`.
//!
//! Responses are `OK [args]\r\n`, `ERR\r\n`, `CLIENT_ERR <reason>\r\n`, or
//! `+EOF\r\n`. Streamed log data is framed in chunks: `+<N>\r\n` followed by
//! exactly `N` raw stored bytes.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]

mod batch;
mod error;
mod line;
mod request;
mod response;
mod scanner;

pub use batch::{message_frame_len, Batch, BatchHeader, Message};
pub use error::{ProtocolError, ProtocolResult};
pub use request::Request;
pub use response::{encode_envelope, ClientResponse, Response, Status, EOF_ENVELOPE};
pub use scanner::BatchScanner;

/// Maximum topic name length in bytes.
pub const MAX_TOPIC_BYTES: usize = 255;

/// Maximum batch body size in bytes.
pub const MAX_BODY_BYTES: u64 = 16 * 1024 * 1024;

/// Maximum number of messages in a single batch.
pub const MAX_MESSAGES_PER_BATCH: u64 = 10_000;

/// Returns true if `name` is a legal topic name: `[a-zA-Z0-9_-]+`, at most
/// [`MAX_TOPIC_BYTES`] bytes.
#[must_use]
pub fn valid_topic(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_TOPIC_BYTES
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_topic() {
        assert!(valid_topic("events"));
        assert!(valid_topic("a-b_C9"));
        assert!(!valid_topic(""));
        assert!(!valid_topic("bad topic"));
        assert!(!valid_topic("dot.dot"));
        assert!(!valid_topic(&"x".repeat(256)));
        assert!(valid_topic(&"x".repeat(255)));
    }
}
