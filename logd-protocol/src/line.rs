//! Line reading and integer token parsing.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::{ProtocolError, ProtocolResult};

/// Longest accepted protocol line, covering a maximal `BATCH` header.
pub(crate) const MAX_LINE_BYTES: usize = 8 * 1024;

/// Reads one `\r\n`-terminated line, returning it without the terminator.
///
/// Returns `Ok(None)` on a clean end of stream before any byte of a line.
/// A line that hits the length cap or ends mid-terminator is an
/// `InvalidProtocolLine`.
pub(crate) async fn read_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> ProtocolResult<Option<Vec<u8>>> {
    let mut buf = Vec::with_capacity(64);
    let mut limited = reader.take((MAX_LINE_BYTES + 1) as u64);
    let n = limited.read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    if buf.len() > MAX_LINE_BYTES || !buf.ends_with(b"\r\n") {
        return Err(ProtocolError::InvalidProtocolLine);
    }
    buf.truncate(buf.len() - 2);
    Ok(Some(buf))
}

/// Reads exactly `len` body bytes plus the literal `\r\n` terminator.
pub(crate) async fn read_body<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    len: u64,
) -> ProtocolResult<Vec<u8>> {
    // Safe cast: len is bounded by MAX_BODY_BYTES before this is called.
    #[allow(clippy::cast_possible_truncation)]
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;

    let mut term = [0u8; 2];
    reader.read_exact(&mut term).await?;
    if &term != b"\r\n" {
        return Err(ProtocolError::InvalidBodyLength(len));
    }
    Ok(body)
}

/// Parses an unsigned decimal ASCII token. Signs, leading `+`, and empty
/// tokens are rejected.
pub(crate) fn parse_uint(token: &[u8]) -> ProtocolResult<u64> {
    if token.is_empty() || !token.iter().all(u8::is_ascii_digit) {
        return Err(ProtocolError::InvalidFormat("malformed integer"));
    }
    let s = std::str::from_utf8(token).map_err(|_| ProtocolError::InvalidFormat("malformed integer"))?;
    s.parse()
        .map_err(|_| ProtocolError::InvalidFormat("integer out of range"))
}

/// Parses a CRC token, which must fit in 32 bits.
pub(crate) fn parse_crc(token: &[u8]) -> ProtocolResult<u32> {
    let v = parse_uint(token)?;
    u32::try_from(v).map_err(|_| ProtocolError::InvalidFormat("crc out of range"))
}
