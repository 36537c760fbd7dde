//! In-memory store, used as a test double for the event queue.

use bytes::Bytes;

use logd_protocol::BatchHeader;

use crate::error::{StoreError, StoreResult};
use crate::{LogChunk, ScanInfo, Store, StoreConfig};

struct MemBatch {
    offset: u64,
    messages: u64,
    wire: Bytes,
}

/// A store keeping every batch in memory. Retention and partition sizing
/// are not simulated; offsets and framing behave like [`crate::DiskStore`].
#[derive(Default)]
pub struct MemoryStore {
    batches: Vec<MemBatch>,
    head: u64,
}

impl MemoryStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an in-memory store, ignoring the disk-oriented settings.
    #[must_use]
    pub fn with_config(_conf: &StoreConfig) -> Self {
        Self::default()
    }

    fn find(&self, offset: u64) -> StoreResult<usize> {
        self.batches
            .binary_search_by_key(&offset, |b| b.offset)
            .map_err(|_| StoreError::NotFound(offset))
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn setup(&mut self) -> StoreResult<()> {
        Ok(())
    }

    async fn append(&mut self, batch: &[u8]) -> StoreResult<u64> {
        let line_end = batch
            .windows(2)
            .position(|w| w == b"\r\n")
            .ok_or_else(|| StoreError::corrupt("batch without header line"))?;
        let header =
            BatchHeader::parse(&batch[..line_end]).map_err(StoreError::from_stored)?;

        let offset = self.head;
        self.head += batch.len() as u64;
        self.batches.push(MemBatch {
            offset,
            messages: header.messages,
            wire: Bytes::copy_from_slice(batch),
        });
        Ok(offset)
    }

    fn head(&self) -> u64 {
        self.head
    }

    fn oldest_offset(&self) -> u64 {
        self.batches.first().map_or(self.head, |b| b.offset)
    }

    async fn seek(&mut self, offset: u64) -> StoreResult<(u64, u64)> {
        if offset == self.head {
            return Ok((offset, 0));
        }
        self.find(offset)?;
        Ok((offset, 0))
    }

    async fn range(&mut self, start: u64, end: u64) -> StoreResult<Vec<LogChunk>> {
        let end = if end == 0 { self.head } else { end.min(self.head) };
        if start >= end {
            return Ok(Vec::new());
        }
        let first = self.find(start)?;
        Ok(self.batches[first..]
            .iter()
            .take_while(|b| b.offset < end)
            .map(|b| LogChunk::from_bytes(b.wire.clone()))
            .collect())
    }

    async fn scan(&mut self, start: u64, limit: u64) -> StoreResult<ScanInfo> {
        if start == self.head {
            return Ok(ScanInfo {
                end: start,
                batches: 0,
            });
        }
        let first = self.find(start)?;

        let mut end = start;
        let mut batches = 0u64;
        let mut messages = 0u64;
        for b in &self.batches[first..] {
            batches += 1;
            messages += b.messages;
            end = b.offset + b.wire.len() as u64;
            if limit > 0 && messages >= limit {
                break;
            }
        }
        Ok(ScanInfo { end, batches })
    }

    async fn flush(&mut self) -> StoreResult<()> {
        Ok(())
    }

    async fn shutdown(&mut self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logd_protocol::Batch;
    use tokio::io::AsyncReadExt;

    fn wire(msg: &str) -> Bytes {
        let mut batch = Batch::new("t").unwrap();
        batch.append(msg.as_bytes().to_vec()).unwrap();
        batch.encode()
    }

    #[tokio::test]
    async fn test_append_and_range() {
        let mut store = MemoryStore::new();
        let b1 = wire("one");
        let b2 = wire("two");

        assert_eq!(store.append(&b1).await.unwrap(), 0);
        assert_eq!(store.append(&b2).await.unwrap(), b1.len() as u64);
        assert_eq!(store.head(), (b1.len() + b2.len()) as u64);

        let chunks = store.range(0, 0).await.unwrap();
        let mut out = Vec::new();
        for c in chunks {
            c.into_reader().read_to_end(&mut out).await.unwrap();
        }
        let mut expected = b1.to_vec();
        expected.extend_from_slice(&b2);
        assert_eq!(out, expected);
    }

    #[tokio::test]
    async fn test_seek_and_scan() {
        let mut store = MemoryStore::new();
        let b1 = wire("one");
        store.append(&b1).await.unwrap();
        let o2 = store.append(&wire("two")).await.unwrap();

        assert!(store.seek(o2).await.is_ok());
        assert!(matches!(store.seek(1).await, Err(StoreError::NotFound(1))));

        let info = store.scan(0, 1).await.unwrap();
        assert_eq!(info.batches, 1);
        assert_eq!(info.end, o2);
    }
}
