//! Sparse offset index.
//!
//! Each partition has a sibling index file of `<offset> <position>` lines,
//! one entry every `index_cursor_size` batches. An entry's offset always
//! equals the partition's starting offset plus the file position; both are
//! stored so the file is self-describing.

use std::path::PathBuf;

use tokio::io::AsyncWriteExt;

use crate::error::{StoreError, StoreResult};
use crate::partition::Partition;

/// One `(batch_offset, file_position)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IndexEntry {
    pub offset: u64,
    pub position: u64,
}

/// A partition's sparse index, mirrored in memory.
#[derive(Debug, Clone)]
pub(crate) struct Index {
    path: PathBuf,
    entries: Vec<IndexEntry>,
}

impl Index {
    /// Creates an empty index backed by `path`.
    pub fn empty(path: PathBuf) -> Self {
        Self {
            path,
            entries: Vec::new(),
        }
    }

    /// Creates an index from already-scanned entries.
    pub fn from_entries(path: PathBuf, entries: Vec<IndexEntry>) -> Self {
        Self { path, entries }
    }

    /// Loads an index file. A missing file yields an empty index; an
    /// unparseable line yields `StoreError::Corrupt` so the caller can
    /// rebuild.
    pub async fn load(path: PathBuf) -> StoreResult<Self> {
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::empty(path));
            }
            Err(e) => return Err(StoreError::io("read index", e)),
        };

        let mut entries = Vec::new();
        for line in raw.lines() {
            let mut parts = line.split_ascii_whitespace();
            let (Some(offset), Some(position), None) = (parts.next(), parts.next(), parts.next())
            else {
                return Err(StoreError::corrupt(format!("bad index line {line:?}")));
            };
            let offset = offset
                .parse()
                .map_err(|_| StoreError::corrupt(format!("bad index offset {offset:?}")))?;
            let position = position
                .parse()
                .map_err(|_| StoreError::corrupt(format!("bad index position {position:?}")))?;
            entries.push(IndexEntry { offset, position });
        }
        Ok(Self { path, entries })
    }

    /// Checks the entries against their partition: strictly increasing,
    /// in bounds, and each offset equal to partition start plus position.
    pub fn validate(&self, partition: &Partition) -> bool {
        let mut prev: Option<&IndexEntry> = None;
        for entry in &self.entries {
            if entry.offset != partition.start + entry.position {
                return false;
            }
            if entry.position >= partition.size {
                return false;
            }
            if let Some(p) = prev {
                if entry.offset <= p.offset {
                    return false;
                }
            }
            prev = Some(entry);
        }
        true
    }

    /// Appends one entry to the file and the in-memory mirror.
    pub async fn append(&mut self, offset: u64, position: u64) -> StoreResult<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| StoreError::io("open index", e))?;
        file.write_all(format!("{offset} {position}\n").as_bytes())
            .await
            .map_err(|e| StoreError::io("append index", e))?;
        self.entries.push(IndexEntry { offset, position });
        Ok(())
    }

    /// Rewrites the index file from the in-memory entries.
    pub async fn rewrite(&self) -> StoreResult<()> {
        let mut out = String::with_capacity(self.entries.len() * 16);
        for entry in &self.entries {
            out.push_str(&format!("{} {}\n", entry.offset, entry.position));
        }
        tokio::fs::write(&self.path, out)
            .await
            .map_err(|e| StoreError::io("write index", e))
    }

    /// Returns the entry with the largest offset not exceeding `offset`.
    pub fn lookup(&self, offset: u64) -> Option<IndexEntry> {
        let idx = self.entries.partition_point(|e| e.offset <= offset);
        idx.checked_sub(1).map(|i| self.entries[i])
    }

    /// Number of entries.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.0.index");

        let mut index = Index::empty(path.clone());
        index.append(100, 100).await.unwrap();
        index.append(250, 250).await.unwrap();

        let loaded = Index::load(path).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(
            loaded.lookup(260),
            Some(IndexEntry {
                offset: 250,
                position: 250
            })
        );
    }

    #[tokio::test]
    async fn test_load_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let index = Index::load(dir.path().join("absent.index")).await.unwrap();
        assert_eq!(index.len(), 0);
        assert_eq!(index.lookup(10), None);
    }

    #[tokio::test]
    async fn test_load_garbage_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.0.index");
        tokio::fs::write(&path, "12 not-a-number\n").await.unwrap();
        assert!(matches!(
            Index::load(path).await,
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_lookup_floors() {
        let entries = vec![
            IndexEntry {
                offset: 10,
                position: 10,
            },
            IndexEntry {
                offset: 30,
                position: 30,
            },
        ];
        let index = Index::from_entries(PathBuf::from("x"), entries);
        assert_eq!(index.lookup(5), None);
        assert_eq!(index.lookup(10).unwrap().offset, 10);
        assert_eq!(index.lookup(29).unwrap().offset, 10);
        assert_eq!(index.lookup(30).unwrap().offset, 30);
        assert_eq!(index.lookup(1000).unwrap().offset, 30);
    }

    #[test]
    fn test_validate_rejects_non_monotonic() {
        let part = Partition {
            start: 0,
            size: 100,
        };
        let good = Index::from_entries(
            PathBuf::from("x"),
            vec![
                IndexEntry {
                    offset: 10,
                    position: 10,
                },
                IndexEntry {
                    offset: 20,
                    position: 20,
                },
            ],
        );
        assert!(good.validate(&part));

        let skewed = Index::from_entries(
            PathBuf::from("x"),
            vec![IndexEntry {
                offset: 15,
                position: 10,
            }],
        );
        assert!(!skewed.validate(&part));

        let out_of_bounds = Index::from_entries(
            PathBuf::from("x"),
            vec![IndexEntry {
                offset: 120,
                position: 120,
            }],
        );
        assert!(!out_of_bounds.validate(&part));
    }
}
