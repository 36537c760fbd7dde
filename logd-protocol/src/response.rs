//! Response framing.
//!
//! Status lines cover every command; streamed log data rides behind the
//! status line in `+<N>` chunks terminated by `+EOF`.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::AsyncBufRead;

use crate::error::{ProtocolError, ProtocolResult};
use crate::line::{parse_uint, read_body, read_line};

/// Terminator written after the last chunk of a finite read.
pub const EOF_ENVELOPE: &[u8] = b"+EOF\r\n";

/// Response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The request succeeded.
    Ok,
    /// The server failed to process the request.
    Err,
    /// The request was malformed or semantically invalid.
    ClientErr,
    /// End of a chunk stream.
    Eof,
}

/// A server response.
#[derive(Debug, Clone)]
pub struct Response {
    status: Status,
    offset: Option<u64>,
    batches: Option<u64>,
    body: Option<Bytes>,
    reason: Option<String>,
}

impl Response {
    /// A bare `OK`.
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            status: Status::Ok,
            offset: None,
            batches: None,
            body: None,
            reason: None,
        }
    }

    /// An `OK <offset> <batches>`.
    #[must_use]
    pub const fn ok_offset(offset: u64, batches: u64) -> Self {
        Self {
            status: Status::Ok,
            offset: Some(offset),
            batches: Some(batches),
            body: None,
            reason: None,
        }
    }

    /// An `OK <len>` carrying a body, as used by `STATS`.
    #[must_use]
    pub const fn ok_body(body: Bytes) -> Self {
        Self {
            status: Status::Ok,
            offset: None,
            batches: None,
            body: Some(body),
            reason: None,
        }
    }

    /// An `ERR`.
    #[must_use]
    pub const fn err() -> Self {
        Self {
            status: Status::Err,
            offset: None,
            batches: None,
            body: None,
            reason: None,
        }
    }

    /// A `CLIENT_ERR <reason>`.
    #[must_use]
    pub fn client_err(reason: impl Into<String>) -> Self {
        Self {
            status: Status::ClientErr,
            offset: None,
            batches: None,
            body: None,
            reason: Some(reason.into()),
        }
    }

    /// A `+EOF`.
    #[must_use]
    pub const fn eof() -> Self {
        Self {
            status: Status::Eof,
            offset: None,
            batches: None,
            body: None,
            reason: None,
        }
    }

    /// Returns the status.
    #[must_use]
    pub const fn status(&self) -> Status {
        self.status
    }

    /// Returns true for `OK` responses.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self.status, Status::Ok)
    }

    /// Returns the offset argument, if present.
    #[must_use]
    pub const fn offset(&self) -> Option<u64> {
        self.offset
    }

    /// Encodes the response, status line plus optional body.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(32);
        match self.status {
            Status::Ok => {
                if let Some(offset) = self.offset {
                    let batches = self.batches.unwrap_or(0);
                    buf.put_slice(format!("OK {offset} {batches}\r\n").as_bytes());
                } else if let Some(body) = &self.body {
                    buf.put_slice(format!("OK {}\r\n", body.len()).as_bytes());
                    buf.put_slice(body);
                    buf.put_slice(b"\r\n");
                } else {
                    buf.put_slice(b"OK\r\n");
                }
            }
            Status::Err => buf.put_slice(b"ERR\r\n"),
            Status::ClientErr => {
                let reason = self.reason.as_deref().unwrap_or("invalid request");
                buf.put_slice(format!("CLIENT_ERR {reason}\r\n").as_bytes());
            }
            Status::Eof => buf.put_slice(EOF_ENVELOPE),
        }
        buf.freeze()
    }
}

/// Encodes a chunk envelope `+<len>\r\n`.
#[must_use]
pub fn encode_envelope(len: u64) -> Bytes {
    Bytes::from(format!("+{len}\r\n"))
}

/// A response as parsed by a client.
#[derive(Debug, Clone)]
pub struct ClientResponse {
    status: Status,
    offset: Option<u64>,
    batches: Option<u64>,
    body: Option<Bytes>,
    reason: Option<String>,
}

impl ClientResponse {
    /// Reads one status line (and body, for `OK <len>` forms).
    ///
    /// # Errors
    /// Fails on end of stream or a line outside the response grammar.
    pub async fn read_from<R: AsyncBufRead + Unpin>(reader: &mut R) -> ProtocolResult<Self> {
        let line = read_line(reader).await?.ok_or_else(|| {
            ProtocolError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed before response",
            ))
        })?;

        if let Some(rest) = strip_cmd(&line, b"OK") {
            let args: Vec<&[u8]> = if rest.is_empty() {
                Vec::new()
            } else {
                rest.split(|&b| b == b' ').collect()
            };
            return match args.as_slice() {
                [] => Ok(Self::with_status(Status::Ok)),
                [len] => {
                    let len = parse_uint(len)?;
                    if len > crate::MAX_BODY_BYTES {
                        return Err(ProtocolError::TooLarge {
                            size: len,
                            max: crate::MAX_BODY_BYTES,
                        });
                    }
                    let body = Bytes::from(read_body(reader, len).await?);
                    Ok(Self {
                        body: Some(body),
                        ..Self::with_status(Status::Ok)
                    })
                }
                [offset, batches] => Ok(Self {
                    offset: Some(parse_uint(offset)?),
                    batches: Some(parse_uint(batches)?),
                    ..Self::with_status(Status::Ok)
                }),
                _ => Err(ProtocolError::InvalidProtocolLine),
            };
        }

        if line == b"ERR" {
            return Ok(Self::with_status(Status::Err));
        }
        if line == b"+EOF" {
            return Ok(Self::with_status(Status::Eof));
        }
        if let Some(reason) = strip_cmd(&line, b"CLIENT_ERR") {
            return Ok(Self {
                reason: Some(String::from_utf8_lossy(reason).into_owned()),
                ..Self::with_status(Status::ClientErr)
            });
        }

        Err(ProtocolError::InvalidProtocolLine)
    }

    const fn with_status(status: Status) -> Self {
        Self {
            status,
            offset: None,
            batches: None,
            body: None,
            reason: None,
        }
    }

    /// Returns the status.
    #[must_use]
    pub const fn status(&self) -> Status {
        self.status
    }

    /// Returns true for `OK` responses.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self.status, Status::Ok)
    }

    /// Returns the offset argument, defaulting to 0.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        match self.offset {
            Some(v) => v,
            None => 0,
        }
    }

    /// Returns the batches argument, defaulting to 0.
    #[must_use]
    pub const fn batches(&self) -> u64 {
        match self.batches {
            Some(v) => v,
            None => 0,
        }
    }

    /// Returns the response body, if any.
    #[must_use]
    pub const fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Returns the `CLIENT_ERR` reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

/// Strips a leading command token, returning the rest after its space (or
/// the empty slice when the line is exactly the token).
fn strip_cmd<'a>(line: &'a [u8], cmd: &[u8]) -> Option<&'a [u8]> {
    let rest = line.strip_prefix(cmd)?;
    if rest.is_empty() {
        Some(rest)
    } else {
        rest.strip_prefix(b" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn parse(input: &[u8]) -> ProtocolResult<ClientResponse> {
        let mut reader = input;
        ClientResponse::read_from(&mut reader).await
    }

    #[test]
    fn test_encode_forms() {
        assert_eq!(&Response::ok().encode()[..], b"OK\r\n");
        assert_eq!(&Response::ok_offset(128, 1).encode()[..], b"OK 128 1\r\n");
        assert_eq!(&Response::err().encode()[..], b"ERR\r\n");
        assert_eq!(
            &Response::client_err("empty message in batch").encode()[..],
            b"CLIENT_ERR empty message in batch\r\n"
        );
        assert_eq!(&Response::eof().encode()[..], b"+EOF\r\n");
        assert_eq!(
            &Response::ok_body(Bytes::from_static(b"a: 1\n")).encode()[..],
            b"OK 5\r\na: 1\n\r\n"
        );
    }

    #[test]
    fn test_encode_envelope() {
        assert_eq!(&encode_envelope(41)[..], b"+41\r\n");
    }

    #[tokio::test]
    async fn test_parse_ok_offset() {
        let resp = parse(b"OK 128 2\r\n").await.unwrap();
        assert!(resp.is_ok());
        assert_eq!(resp.offset(), 128);
        assert_eq!(resp.batches(), 2);
    }

    #[tokio::test]
    async fn test_parse_ok_body() {
        let resp = parse(b"OK 5\r\nhello\r\n").await.unwrap();
        assert!(resp.is_ok());
        assert_eq!(resp.body().unwrap(), &Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_parse_client_err() {
        let resp = parse(b"CLIENT_ERR crc checksum mismatch\r\n").await.unwrap();
        assert_eq!(resp.status(), Status::ClientErr);
        assert_eq!(resp.reason(), Some("crc checksum mismatch"));
    }

    #[tokio::test]
    async fn test_parse_err_and_eof() {
        assert_eq!(parse(b"ERR\r\n").await.unwrap().status(), Status::Err);
        assert_eq!(parse(b"+EOF\r\n").await.unwrap().status(), Status::Eof);
    }

    #[tokio::test]
    async fn test_parse_garbage() {
        assert!(matches!(
            parse(b"WHAT 1 2\r\n").await,
            Err(ProtocolError::InvalidProtocolLine)
        ));
    }

    #[tokio::test]
    async fn test_roundtrip_through_encode() {
        for resp in [
            Response::ok(),
            Response::ok_offset(7, 3),
            Response::err(),
            Response::client_err("nope"),
        ] {
            let encoded = resp.encode();
            let parsed = parse(&encoded).await.unwrap();
            assert_eq!(parsed.status(), resp.status());
        }
    }
}
