//! Chunk-stream scanner.
//!
//! Readers drain a chunk stream after `READ` and `TAIL`: each chunk is
//! `+<N>\r\n` followed by `N` raw stored bytes holding whole batches, and a
//! finite stream ends with `+EOF\r\n`. The scanner iterates batches across
//! chunk boundaries.

use tokio::io::{AsyncBufRead, AsyncReadExt};

use crate::batch::Batch;
use crate::error::{ProtocolError, ProtocolResult};
use crate::line::{parse_uint, read_line};

/// Iterates batches out of a chunk stream.
#[derive(Debug, Default)]
pub struct BatchScanner {
    /// Bytes remaining in the current chunk.
    chunk_remaining: u64,
    /// Set once `+EOF` has been scanned.
    finished: bool,
}

impl BatchScanner {
    /// Creates a scanner positioned before the first envelope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the scanner for a new stream.
    pub fn reset(&mut self) {
        self.chunk_remaining = 0;
        self.finished = false;
    }

    /// Returns the next batch, or `None` once `+EOF` is reached.
    ///
    /// # Errors
    /// Fails when an envelope is missing its `+` sigil
    /// ([`ProtocolError::InvalidFirstByte`], fatal to the reader) or a batch
    /// fails validation.
    pub async fn next<R: AsyncBufRead + Unpin>(
        &mut self,
        reader: &mut R,
    ) -> ProtocolResult<Option<Batch>> {
        if self.finished {
            return Ok(None);
        }

        if self.chunk_remaining == 0 {
            match read_envelope(reader).await? {
                None => {
                    self.finished = true;
                    return Ok(None);
                }
                Some(len) => self.chunk_remaining = len,
            }
        }

        let batch = Batch::read_from(reader).await?.ok_or_else(|| {
            ProtocolError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "stream ended inside a chunk",
            ))
        })?;
        self.chunk_remaining = self.chunk_remaining.saturating_sub(batch.wire_len());
        Ok(Some(batch))
    }
}

/// Reads a `+<N>` envelope; `+EOF` yields `None`.
async fn read_envelope<R: AsyncBufRead + Unpin>(reader: &mut R) -> ProtocolResult<Option<u64>> {
    let mut sigil = [0u8; 1];
    reader.read_exact(&mut sigil).await?;
    if sigil[0] != b'+' {
        return Err(ProtocolError::InvalidFirstByte { found: sigil[0] });
    }

    let line = read_line(reader)
        .await?
        .ok_or(ProtocolError::InvalidProtocolLine)?;
    if line == b"EOF" {
        return Ok(None);
    }
    parse_uint(&line).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn batch(msgs: &[&[u8]]) -> Batch {
        let mut b = Batch::new("events").unwrap();
        for m in msgs {
            b.append(m.to_vec()).unwrap();
        }
        b
    }

    fn chunk_stream(batches: &[Batch], eof: bool) -> Vec<u8> {
        let mut out = BytesMut::new();
        for b in batches {
            let wire = b.encode();
            out.extend_from_slice(format!("+{}\r\n", wire.len()).as_bytes());
            out.extend_from_slice(&wire);
        }
        if eof {
            out.extend_from_slice(b"+EOF\r\n");
        }
        out.to_vec()
    }

    #[tokio::test]
    async fn test_scan_single_chunk() {
        let stream = chunk_stream(&[batch(&[b"hello"])], true);
        let mut reader: &[u8] = &stream;
        let mut scanner = BatchScanner::new();

        let first = scanner.next(&mut reader).await.unwrap().unwrap();
        assert_eq!(first.messages()[0].body, &b"hello"[..]);
        assert!(scanner.next(&mut reader).await.unwrap().is_none());
        // EOF is sticky.
        assert!(scanner.next(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scan_multiple_batches_in_one_chunk() {
        let b1 = batch(&[b"one"]);
        let b2 = batch(&[b"two"]);
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&b1.encode());
        wire.extend_from_slice(&b2.encode());

        let mut stream = format!("+{}\r\n", wire.len()).into_bytes();
        stream.extend_from_slice(&wire);
        stream.extend_from_slice(b"+EOF\r\n");

        let mut reader: &[u8] = &stream;
        let mut scanner = BatchScanner::new();
        assert_eq!(
            scanner.next(&mut reader).await.unwrap().unwrap().messages()[0].body,
            &b"one"[..]
        );
        assert_eq!(
            scanner.next(&mut reader).await.unwrap().unwrap().messages()[0].body,
            &b"two"[..]
        );
        assert!(scanner.next(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_sigil_is_fatal() {
        let b = batch(&[b"hello"]);
        let stream = b.encode();
        let mut reader: &[u8] = &stream;
        let mut scanner = BatchScanner::new();
        assert!(matches!(
            scanner.next(&mut reader).await,
            Err(ProtocolError::InvalidFirstByte { found: b'B' })
        ));
    }

    #[tokio::test]
    async fn test_scan_across_chunks() {
        let stream = chunk_stream(&[batch(&[b"one"]), batch(&[b"two", b"three"])], true);
        let mut reader: &[u8] = &stream;
        let mut scanner = BatchScanner::new();

        let mut bodies = Vec::new();
        while let Some(b) = scanner.next(&mut reader).await.unwrap() {
            for m in b.messages() {
                bodies.push(m.body.clone());
            }
        }
        assert_eq!(bodies, vec![&b"one"[..], &b"two"[..], &b"three"[..]]);
    }
}
