//! Discarding store, a sink for write benchmarks.

use crate::error::{StoreError, StoreResult};
use crate::{LogChunk, ScanInfo, Store};

/// A store that accounts offsets but keeps nothing. Reads always miss.
#[derive(Debug, Default)]
pub struct DiscardStore {
    head: u64,
}

impl DiscardStore {
    /// Creates a discarding store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Store for DiscardStore {
    async fn setup(&mut self) -> StoreResult<()> {
        Ok(())
    }

    async fn append(&mut self, batch: &[u8]) -> StoreResult<u64> {
        let offset = self.head;
        self.head += batch.len() as u64;
        Ok(offset)
    }

    fn head(&self) -> u64 {
        self.head
    }

    fn oldest_offset(&self) -> u64 {
        self.head
    }

    async fn seek(&mut self, offset: u64) -> StoreResult<(u64, u64)> {
        Err(StoreError::NotFound(offset))
    }

    async fn range(&mut self, _start: u64, _end: u64) -> StoreResult<Vec<LogChunk>> {
        Ok(Vec::new())
    }

    async fn scan(&mut self, start: u64, _limit: u64) -> StoreResult<ScanInfo> {
        Err(StoreError::NotFound(start))
    }

    async fn flush(&mut self) -> StoreResult<()> {
        Ok(())
    }

    async fn shutdown(&mut self) -> StoreResult<()> {
        Ok(())
    }
}
