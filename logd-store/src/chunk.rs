//! Length-limited read handoff.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

/// A readable span of stored log data.
///
/// Disk-backed chunks wrap a file handle positioned at a batch boundary and
/// limited to the span's length; ownership passes to the connection task
/// that drains the stream, which closes the handle after the copy.
#[derive(Debug)]
pub struct LogChunk {
    len: u64,
    source: ChunkSource,
}

#[derive(Debug)]
enum ChunkSource {
    File(tokio::fs::File),
    Bytes(Bytes),
}

impl LogChunk {
    /// Wraps a file handle already positioned at the span start.
    #[must_use]
    pub const fn from_file(file: tokio::fs::File, len: u64) -> Self {
        Self {
            len,
            source: ChunkSource::File(file),
        }
    }

    /// Wraps in-memory batch bytes.
    #[must_use]
    pub fn from_bytes(bytes: Bytes) -> Self {
        Self {
            len: bytes.len() as u64,
            source: ChunkSource::Bytes(bytes),
        }
    }

    /// Returns the span length in bytes.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    /// Returns true for a zero-length span.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Consumes the chunk into a length-limited async reader.
    #[must_use]
    pub fn into_reader(self) -> Box<dyn AsyncRead + Send + Unpin> {
        match self.source {
            ChunkSource::File(file) => Box::new(file.take(self.len)),
            ChunkSource::Bytes(bytes) => Box::new(std::io::Cursor::new(bytes)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bytes_chunk_reads_back() {
        let chunk = LogChunk::from_bytes(Bytes::from_static(b"hello"));
        assert_eq!(chunk.len(), 5);

        let mut out = Vec::new();
        chunk.into_reader().read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn test_file_chunk_respects_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        tokio::fs::write(&path, b"0123456789").await.unwrap();

        let file = tokio::fs::File::open(&path).await.unwrap();
        let chunk = LogChunk::from_file(file, 4);

        let mut out = Vec::new();
        chunk.into_reader().read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"0123");
    }
}
