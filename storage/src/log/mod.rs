//! An append-only key/value log that commits batches atomically.
//!
//! [Log] keeps every live key in an in-memory ordered index pointing at the location of its
//! value in the active blob. Values are read from the blob on demand.
//!
//! # Format
//!
//! Data is stored in either a "left" or a "right" blob. The active blob starts with a header
//! followed by a sequence of records, each holding one [Batch]:
//!
//! ```text
//! +---+---+---+---+---+---+---+---+---+---+---+---+
//! |        Version (u64)          |  CRC32(u32)   |
//! +---+---+---+---+---+---+---+---+---+---+---+---+
//!
//! +---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+
//! |  Len(P) (u32) |   Payload (Count (u32) | Op1 | Op2 | ...)  |  CRC32(P) (u32)   |
//! +---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+
//!
//! Op = Tag (u8) | Len(K) (u32) | Key | [Len(V) (u32) | Value]
//! ```
//!
//! # Crash Consistency
//!
//! A batch is applied to the index only after its record has been written and synced. On
//! startup, records are replayed in order and replay stops at the first record that is
//! incomplete or fails its checksum; the blob is truncated to the end of the last valid record.
//! A crash in the middle of a write therefore loses at most that batch, never part of it.
//!
//! # Compaction
//!
//! Overwritten and deleted values leave dead bytes behind. Once dead bytes exceed both the
//! configured threshold and the live bytes, live entries are rewritten into the inactive blob.
//! Records are synced first and the header (with the next version) is written last, so a crash
//! during compaction leaves the previous blob authoritative.

mod storage;
pub use storage::Log;

use bytes::Bytes;

/// Configuration for [Log] storage.
#[derive(Clone, Debug)]
pub struct Config {
    /// The [crate::Storage] partition to use for the log's blobs.
    pub partition: String,

    /// Minimum number of dead bytes before compaction is considered.
    pub compaction_threshold: u64,
}

pub(crate) enum Op {
    Put(Vec<u8>, Bytes),
    Delete(Vec<u8>),
}

/// A set of operations committed atomically by [Log::write].
///
/// Operations are applied in insertion order.
#[derive(Default)]
pub struct Batch {
    pub(crate) ops: Vec<Op>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Bytes>) {
        self.ops.push(Op::Put(key.into(), value.into()));
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(Op::Delete(key.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}
