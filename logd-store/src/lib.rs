//! Logd partition store.
//!
//! A topic's log is a directory of fixed-maximum-size partition files, each
//! named by the byte offset its first batch occupies in the topic's logical
//! stream, with a sparse sibling index for offset lookups:
//!
//! ```text
//! /data/events/
//!   events.0            batches starting at offset 0
//!   events.0.index      sparse index: `<offset> <position>` lines
//!   events.4096
//!   events.4096.index
//! ```
//!
//! Partition files hold raw batch wire bytes, so reads hand file ranges to
//! the connection without re-framing. Appends are O(1); offset lookup is a
//! binary search over partitions, then over the partition's index, then a
//! short forward scan.
//!
//! The [`Store`] trait is an explicit capability set with three
//! implementations: [`DiskStore`] for production, [`MemoryStore`] as a test
//! double, and [`DiscardStore`] as a benchmark sink.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]

mod chunk;
mod discard;
mod disk;
mod error;
mod index;
mod mem;
mod partition;

use async_trait::async_trait;

pub use chunk::LogChunk;
pub use discard::DiscardStore;
pub use disk::DiskStore;
pub use error::{StoreError, StoreResult};
pub use mem::MemoryStore;

/// Configuration for one topic's store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding this topic's partition files.
    pub dir: std::path::PathBuf,
    /// Topic name, used as the partition file prefix.
    pub name: String,
    /// Maximum partition file size in bytes. A batch that would cross this
    /// boundary starts a new partition; a single oversized batch still gets
    /// a partition of its own.
    pub partition_size: u64,
    /// Number of partitions retained before the oldest is unlinked.
    pub max_partitions: u32,
    /// Batches between sparse index entries.
    pub index_cursor_size: u64,
    /// Whether to fsync a partition before rotating away from it.
    pub sync_on_rotate: bool,
}

impl StoreConfig {
    /// Creates a store configuration with default sizing.
    #[must_use]
    pub fn new(dir: impl Into<std::path::PathBuf>, name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
            partition_size: 1024 * 1024,
            max_partitions: 8,
            index_cursor_size: 100,
            sync_on_rotate: true,
        }
    }

    /// Sets the partition size in bytes.
    #[must_use]
    pub const fn with_partition_size(mut self, size: u64) -> Self {
        self.partition_size = size;
        self
    }

    /// Sets the number of retained partitions.
    #[must_use]
    pub const fn with_max_partitions(mut self, n: u32) -> Self {
        self.max_partitions = n;
        self
    }

    /// Sets the sparse index interval in batches.
    #[must_use]
    pub const fn with_index_cursor_size(mut self, n: u64) -> Self {
        self.index_cursor_size = n;
        self
    }
}

/// Result of walking batch headers from an offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanInfo {
    /// Exclusive end offset of the covered range.
    pub end: u64,
    /// Number of whole batches in the range.
    pub batches: u64,
}

/// Durable ordered byte log for one topic.
///
/// All mutation goes through the owning event queue, so implementations
/// need no interior locking.
#[async_trait]
pub trait Store: Send {
    /// Prepares the store, recovering any existing log data.
    async fn setup(&mut self) -> StoreResult<()>;

    /// Appends one framed batch, returning its starting offset (the topic
    /// size before the append).
    async fn append(&mut self, batch: &[u8]) -> StoreResult<u64>;

    /// Returns the head offset: total bytes committed, exclusive upper
    /// bound of readable data.
    fn head(&self) -> u64;

    /// Returns the oldest readable offset, advanced by retention.
    fn oldest_offset(&self) -> u64;

    /// Locates the batch starting exactly at `offset`, returning the
    /// containing partition's starting offset and the file position.
    ///
    /// # Errors
    /// `StoreError::NotFound` when `offset` is outside the readable range
    /// or is not a batch boundary.
    async fn seek(&mut self, offset: u64) -> StoreResult<(u64, u64)>;

    /// Returns length-limited readers covering `[start, end)`, positioned
    /// at batch boundaries. `end == 0` means "to head".
    async fn range(&mut self, start: u64, end: u64) -> StoreResult<Vec<LogChunk>>;

    /// Walks batch headers from `start`, covering at most `limit` messages
    /// (`limit == 0` walks to head).
    async fn scan(&mut self, start: u64, limit: u64) -> StoreResult<ScanInfo>;

    /// Flushes buffered writes to durable storage.
    async fn flush(&mut self) -> StoreResult<()>;

    /// Flushes and releases resources. The store must not be used after.
    async fn shutdown(&mut self) -> StoreResult<()>;
}
