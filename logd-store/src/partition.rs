//! Partition metadata and file naming.

use std::path::{Path, PathBuf};

/// One partition: a file holding a contiguous range of whole batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Partition {
    /// Offset of the first batch in this partition.
    pub start: u64,
    /// Bytes currently stored in the partition file.
    pub size: u64,
}

impl Partition {
    /// Exclusive end offset of this partition.
    pub const fn end(&self) -> u64 {
        self.start + self.size
    }
}

/// Returns the path of a partition file: `<dir>/<name>.<start>`.
pub(crate) fn partition_path(dir: &Path, name: &str, start: u64) -> PathBuf {
    dir.join(format!("{name}.{start}"))
}

/// Returns the path of a partition's index file: `<dir>/<name>.<start>.index`.
pub(crate) fn index_path(dir: &Path, name: &str, start: u64) -> PathBuf {
    dir.join(format!("{name}.{start}.index"))
}

/// Parses a partition starting offset out of a file name, ignoring index
/// files and anything not belonging to `name`.
pub(crate) fn parse_start(name: &str, file_name: &str) -> Option<u64> {
    let rest = file_name.strip_prefix(name)?.strip_prefix('.')?;
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}
