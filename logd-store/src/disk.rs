//! Disk-backed partition store.
//!
//! The write path keeps one append handle on the current partition and
//! tracks sizes in memory; the read path opens fresh handles so streaming
//! never contends with appends.
//!
//! # Recovery
//!
//! On setup the directory is enumerated, partitions are sorted by starting
//! offset, and each sparse index is validated (entry offsets must equal
//! partition start plus position, strictly increasing, in bounds). An index
//! that fails validation is rebuilt by replaying the partition. The last
//! partition is always replayed so a torn write at the tail is detected and
//! truncated. Batch framing plus the codec CRC is the only integrity gate;
//! replay failures truncate the topic to the last valid batch.

use std::io::SeekFrom;
use std::path::PathBuf;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use logd_protocol::BatchHeader;

use crate::error::{StoreError, StoreResult};
use crate::index::{Index, IndexEntry};
use crate::partition::{self, Partition};
use crate::{LogChunk, ScanInfo, Store, StoreConfig};

/// Segmented on-disk log for one topic.
pub struct DiskStore {
    conf: StoreConfig,
    /// Partitions sorted by starting offset; the last one is writable.
    partitions: Vec<Partition>,
    /// Append handle for the last partition, opened lazily.
    current: Option<File>,
    /// In-memory mirror of the last partition's sparse index.
    index: Index,
    /// Batches appended since the last index entry.
    batches_since_cursor: u64,
    /// Total bytes committed to the topic.
    head: u64,
}

impl DiskStore {
    /// Creates a store for a topic. No I/O happens until [`Store::setup`].
    #[must_use]
    pub fn new(conf: StoreConfig) -> Self {
        let index = Index::empty(partition::index_path(&conf.dir, &conf.name, 0));
        Self {
            conf,
            partitions: Vec::new(),
            current: None,
            index,
            batches_since_cursor: 0,
            head: 0,
        }
    }

    fn partition_path(&self, start: u64) -> PathBuf {
        partition::partition_path(&self.conf.dir, &self.conf.name, start)
    }

    fn index_path(&self, start: u64) -> PathBuf {
        partition::index_path(&self.conf.dir, &self.conf.name, start)
    }

    /// Enumerates partition files, sorted by starting offset.
    async fn enumerate_partitions(&self) -> StoreResult<Vec<Partition>> {
        let mut dir = tokio::fs::read_dir(&self.conf.dir)
            .await
            .map_err(|e| StoreError::io("read data dir", e))?;

        let mut parts = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| StoreError::io("read data dir", e))?
        {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some(start) = partition::parse_start(&self.conf.name, name) else {
                continue;
            };
            let meta = entry
                .metadata()
                .await
                .map_err(|e| StoreError::io("stat partition", e))?;
            parts.push(Partition {
                start,
                size: meta.len(),
            });
        }
        parts.sort_by_key(|p| p.start);
        Ok(parts)
    }

    /// Replays a partition's batches, producing fresh index entries, the
    /// length of the valid prefix, and the batch count since the last
    /// index entry.
    async fn replay_partition(&self, part: Partition) -> StoreResult<Replay> {
        let file = File::open(self.partition_path(part.start))
            .await
            .map_err(|e| StoreError::io("open partition", e))?;
        let mut reader = BufReader::new(file);

        let mut entries = Vec::new();
        let mut pos = 0u64;
        let mut since_cursor = 0u64;
        let mut corrupt = None;

        loop {
            let header = match BatchHeader::read_from(&mut reader).await {
                Ok(None) => break,
                Ok(Some(h)) => h,
                Err(e) => {
                    corrupt = Some(e.to_string());
                    break;
                }
            };
            if header.body_len > logd_protocol::MAX_BODY_BYTES {
                corrupt = Some(format!("batch body of {} bytes", header.body_len));
                break;
            }

            // Safe cast: bounded by MAX_BODY_BYTES above.
            #[allow(clippy::cast_possible_truncation)]
            let mut body = vec![0u8; header.body_len as usize];
            if reader.read_exact(&mut body).await.is_err() {
                corrupt = Some("truncated batch body".to_string());
                break;
            }
            let mut term = [0u8; 2];
            if reader.read_exact(&mut term).await.is_err() || &term != b"\r\n" {
                corrupt = Some("missing batch terminator".to_string());
                break;
            }
            let computed = crc32fast::hash(&body);
            if computed != header.crc {
                corrupt = Some(format!(
                    "crc mismatch: declared {}, computed {computed}",
                    header.crc
                ));
                break;
            }

            since_cursor += 1;
            if since_cursor >= self.conf.index_cursor_size {
                entries.push(IndexEntry {
                    offset: part.start + pos,
                    position: pos,
                });
                since_cursor = 0;
            }
            pos += header.wire_len();
        }

        Ok(Replay {
            entries,
            valid_len: pos,
            since_cursor,
            corrupt,
        })
    }

    /// Unlinks partitions from position `i` to the end of the list.
    async fn remove_partitions_from(&mut self, i: usize) {
        while self.partitions.len() > i {
            let part = self
                .partitions
                .pop()
                .expect("partition list shrank during removal");
            remove_quietly(&self.partition_path(part.start)).await;
            remove_quietly(&self.index_path(part.start)).await;
            warn!(
                topic = %self.conf.name,
                start = part.start,
                "dropped partition during recovery"
            );
        }
    }

    /// Opens the append handle for the last partition.
    async fn open_current(&mut self) -> StoreResult<()> {
        let part = self
            .partitions
            .last()
            .expect("open_current requires a partition");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.partition_path(part.start))
            .await
            .map_err(|e| StoreError::io("open partition", e))?;
        self.current = Some(file);
        Ok(())
    }

    /// Makes sure the current partition can take `len` more bytes, rotating
    /// to a new partition when the batch would cross the size boundary. An
    /// oversized batch still gets an empty partition to itself; batches are
    /// never split.
    async fn ensure_current(&mut self, len: u64) -> StoreResult<()> {
        let needs_new = match self.partitions.last() {
            None => true,
            Some(p) => p.size > 0 && p.size + len > self.conf.partition_size,
        };
        if !needs_new {
            if self.current.is_none() {
                self.open_current().await?;
            }
            return Ok(());
        }
        self.rotate().await
    }

    /// Rotates to a new partition starting at the head offset, then applies
    /// retention.
    async fn rotate(&mut self) -> StoreResult<()> {
        if let Some(file) = self.current.as_mut() {
            file.flush()
                .await
                .map_err(|e| StoreError::io("flush partition", e))?;
            if self.conf.sync_on_rotate {
                file.sync_data()
                    .await
                    .map_err(|e| StoreError::io("sync partition", e))?;
            }
        }
        self.current = None;

        let start = self.head;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.partition_path(start))
            .await
            .map_err(|e| StoreError::io("create partition", e))?;

        self.partitions.push(Partition { start, size: 0 });
        self.current = Some(file);
        self.index = Index::empty(self.index_path(start));
        self.batches_since_cursor = 0;
        info!(topic = %self.conf.name, start, "created partition");

        self.retain().await;
        Ok(())
    }

    /// Unlinks the lowest-offset partitions until the retention bound
    /// holds. The current write partition is never evicted.
    async fn retain(&mut self) {
        while self.partitions.len() as u64 > u64::from(self.conf.max_partitions)
            && self.partitions.len() > 1
        {
            let old = self.partitions.remove(0);
            remove_quietly(&self.partition_path(old.start)).await;
            remove_quietly(&self.index_path(old.start)).await;
            debug!(topic = %self.conf.name, start = old.start, "evicted partition");
        }
    }

    /// Returns the list position of the partition containing `offset`.
    fn partition_for(&self, offset: u64) -> Option<usize> {
        let idx = self.partitions.partition_point(|p| p.start <= offset);
        idx.checked_sub(1)
    }

    /// Loads the sparse index for a partition, falling back to the
    /// in-memory mirror for the current one.
    async fn index_for(&self, i: usize) -> StoreResult<Index> {
        if i + 1 == self.partitions.len() {
            return Ok(self.index.clone());
        }
        let start = self.partitions[i].start;
        match Index::load(self.index_path(start)).await {
            Ok(index) if index.validate(&self.partitions[i]) => Ok(index),
            // A bad index only costs a longer forward scan here; recovery
            // rewrites it on the next setup.
            Ok(_) | Err(StoreError::Corrupt { .. }) => {
                warn!(topic = %self.conf.name, start, "ignoring invalid index");
                Ok(Index::empty(self.index_path(start)))
            }
            Err(e) => Err(e),
        }
    }
}

struct Replay {
    entries: Vec<IndexEntry>,
    valid_len: u64,
    since_cursor: u64,
    corrupt: Option<String>,
}

#[async_trait::async_trait]
impl Store for DiskStore {
    async fn setup(&mut self) -> StoreResult<()> {
        tokio::fs::create_dir_all(&self.conf.dir)
            .await
            .map_err(|e| StoreError::io("create data dir", e))?;

        self.partitions = self.enumerate_partitions().await?;

        let mut i = 0;
        while i < self.partitions.len() {
            let part = self.partitions[i];

            if i > 0 && part.start != self.partitions[i - 1].end() {
                warn!(
                    topic = %self.conf.name,
                    expected = self.partitions[i - 1].end(),
                    found = part.start,
                    "partition chain broken"
                );
                self.remove_partitions_from(i).await;
                break;
            }

            // The last partition is always replayed so a torn tail write is
            // caught; earlier ones are replayed only when their index fails
            // validation.
            let is_last = i + 1 == self.partitions.len();
            let index_path = self.index_path(part.start);
            let mut need_replay = is_last;
            match Index::load(index_path.clone()).await {
                Ok(index) => {
                    if !index.validate(&part) {
                        warn!(topic = %self.conf.name, start = part.start, "invalid index");
                        need_replay = true;
                    }
                }
                Err(StoreError::Corrupt { reason }) => {
                    warn!(topic = %self.conf.name, start = part.start, %reason, "corrupt index");
                    need_replay = true;
                }
                Err(e) => return Err(e),
            }

            if need_replay {
                let replay = self.replay_partition(part).await?;
                if replay.valid_len != part.size {
                    warn!(
                        topic = %self.conf.name,
                        start = part.start,
                        valid = replay.valid_len,
                        size = part.size,
                        "truncating partition to last valid batch"
                    );
                    truncate_file(&self.partition_path(part.start), replay.valid_len).await?;
                    self.partitions[i].size = replay.valid_len;
                }

                let index = Index::from_entries(index_path, replay.entries);
                index.rewrite().await?;

                if replay.corrupt.is_some() {
                    // The topic ends at the last valid batch; anything after
                    // the corruption is unrecoverable.
                    self.remove_partitions_from(i + 1).await;
                    self.index = index;
                    self.batches_since_cursor = replay.since_cursor;
                    break;
                }
                if is_last {
                    self.index = index;
                    self.batches_since_cursor = replay.since_cursor;
                }
            }
            i += 1;
        }

        self.head = self.partitions.last().map_or(0, Partition::end);
        info!(
            topic = %self.conf.name,
            partitions = self.partitions.len(),
            head = self.head,
            "store recovery complete"
        );
        Ok(())
    }

    async fn append(&mut self, batch: &[u8]) -> StoreResult<u64> {
        let len = batch.len() as u64;
        self.ensure_current(len).await?;

        let prev_size = self
            .partitions
            .last()
            .expect("current partition exists after ensure_current")
            .size;
        let file = self
            .current
            .as_mut()
            .expect("append handle exists after ensure_current");

        if let Err(e) = file.write_all(batch).await {
            // Roll the partial write back before surfacing the error so the
            // partition never ends mid-batch.
            if let Err(te) = file.set_len(prev_size).await {
                warn!(error = %te, "failed to truncate partition after failed append");
            }
            return Err(StoreError::io("append", e));
        }

        let offset = self.head;
        let part = self
            .partitions
            .last_mut()
            .expect("current partition exists after ensure_current");
        let position = part.size;
        part.size += len;
        self.head += len;

        self.batches_since_cursor += 1;
        if self.batches_since_cursor >= self.conf.index_cursor_size {
            self.index.append(offset, position).await?;
            self.batches_since_cursor = 0;
        }

        debug!(topic = %self.conf.name, offset, bytes = len, "appended batch");
        Ok(offset)
    }

    fn head(&self) -> u64 {
        self.head
    }

    fn oldest_offset(&self) -> u64 {
        self.partitions.first().map_or(self.head, |p| p.start)
    }

    async fn seek(&mut self, offset: u64) -> StoreResult<(u64, u64)> {
        if offset == self.head {
            let (start, pos) = self
                .partitions
                .last()
                .map_or((self.head, 0), |p| (p.start, p.size));
            return Ok((start, pos));
        }
        if offset > self.head || offset < self.oldest_offset() {
            return Err(StoreError::NotFound(offset));
        }

        let i = self
            .partition_for(offset)
            .ok_or(StoreError::NotFound(offset))?;
        let part = self.partitions[i];
        let index = self.index_for(i).await?;
        let (mut cur, mut pos) = index
            .lookup(offset)
            .map_or((part.start, 0), |e| (e.offset, e.position));

        let mut file = File::open(self.partition_path(part.start))
            .await
            .map_err(|e| StoreError::io("open partition", e))?;
        file.seek(SeekFrom::Start(pos))
            .await
            .map_err(|e| StoreError::io("seek partition", e))?;
        let mut reader = BufReader::new(file);

        while cur < offset {
            let header = BatchHeader::read_from(&mut reader)
                .await
                .map_err(StoreError::from_stored)?
                .ok_or(StoreError::NotFound(offset))?;
            discard(&mut reader, header.body_len + 2).await?;
            cur += header.wire_len();
            pos += header.wire_len();
        }
        if cur != offset {
            // Landed past the target: not a batch boundary.
            return Err(StoreError::NotFound(offset));
        }
        Ok((part.start, pos))
    }

    async fn range(&mut self, start: u64, end: u64) -> StoreResult<Vec<LogChunk>> {
        let end = if end == 0 { self.head } else { end.min(self.head) };
        if start >= end {
            return Ok(Vec::new());
        }

        let (part_start, first_pos) = self.seek(start).await?;
        let mut chunks = Vec::new();
        for part in &self.partitions {
            if part.start >= end || part.end() <= start {
                continue;
            }
            let from = if part.start == part_start { first_pos } else { 0 };
            let to = end.min(part.end()) - part.start;
            if to <= from {
                continue;
            }
            let mut file = File::open(self.partition_path(part.start))
                .await
                .map_err(|e| StoreError::io("open partition", e))?;
            if from > 0 {
                file.seek(SeekFrom::Start(from))
                    .await
                    .map_err(|e| StoreError::io("seek partition", e))?;
            }
            chunks.push(LogChunk::from_file(file, to - from));
        }
        Ok(chunks)
    }

    async fn scan(&mut self, start: u64, limit: u64) -> StoreResult<ScanInfo> {
        if start == self.head {
            return Ok(ScanInfo {
                end: start,
                batches: 0,
            });
        }

        let (part_start, mut pos) = self.seek(start).await?;
        let mut i = self
            .partition_for(part_start)
            .ok_or(StoreError::NotFound(start))?;
        let mut cur = start;
        let mut batches = 0u64;
        let mut messages = 0u64;

        'partitions: while i < self.partitions.len() {
            let part = self.partitions[i];
            let mut file = File::open(self.partition_path(part.start))
                .await
                .map_err(|e| StoreError::io("open partition", e))?;
            if pos > 0 {
                file.seek(SeekFrom::Start(pos))
                    .await
                    .map_err(|e| StoreError::io("seek partition", e))?;
            }
            let mut reader = BufReader::new(file);

            while cur < part.end() {
                let Some(header) = BatchHeader::read_from(&mut reader)
                    .await
                    .map_err(StoreError::from_stored)?
                else {
                    break;
                };
                discard(&mut reader, header.body_len + 2).await?;
                batches += 1;
                messages += header.messages;
                cur += header.wire_len();
                if limit > 0 && messages >= limit {
                    break 'partitions;
                }
            }

            i += 1;
            pos = 0;
        }

        Ok(ScanInfo { end: cur, batches })
    }

    async fn flush(&mut self) -> StoreResult<()> {
        if let Some(file) = self.current.as_mut() {
            file.flush()
                .await
                .map_err(|e| StoreError::io("flush partition", e))?;
            file.sync_data()
                .await
                .map_err(|e| StoreError::io("sync partition", e))?;
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> StoreResult<()> {
        self.flush().await?;
        self.current = None;
        Ok(())
    }
}

/// Removes a file, logging anything other than it already being gone.
async fn remove_quietly(path: &std::path::Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(?path, error = %e, "failed to remove file"),
    }
}

async fn truncate_file(path: &std::path::Path, len: u64) -> StoreResult<()> {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .map_err(|e| StoreError::io("open partition", e))?;
    file.set_len(len)
        .await
        .map_err(|e| StoreError::io("truncate partition", e))
}

/// Skips `n` bytes of an async reader.
async fn discard<R: AsyncBufRead + Unpin>(reader: &mut R, mut n: u64) -> StoreResult<()> {
    let mut buf = [0u8; 4096];
    while n > 0 {
        // Safe cast: bounded by the buffer size.
        #[allow(clippy::cast_possible_truncation)]
        let want = n.min(buf.len() as u64) as usize;
        let got = reader
            .read(&mut buf[..want])
            .await
            .map_err(|e| StoreError::io("read partition", e))?;
        if got == 0 {
            return Err(StoreError::corrupt("partition ends mid-batch"));
        }
        n -= got as u64;
    }
    Ok(())
}
