//! Persist recovered signatures and votes in a crash-consistent store.
//!
//! The crate is layered:
//! - [storage] abstracts the byte-level backend ([Storage] partitions of [Blob]s) with an
//!   in-memory implementation for tests and a file-backed implementation for nodes
//! - [log] is an append-only key/value log that commits batches atomically and compacts itself
//! - [store] is the recovered-signature store: a fixed key layout over [log::Log] fronted by
//!   bounded existence caches

pub mod log;
pub mod storage;
pub use storage::{Blob, Storage};
pub mod store;
pub use store::{Record, Store, Tombstone};

use thiserror::Error;

/// Errors that can occur when interacting with storage.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] llmq_codec::Error),
    #[error("partition name invalid: {0}")]
    PartitionNameInvalid(String),
    #[error("partition missing: {0}")]
    PartitionMissing(String),
    #[error("blob missing: {0}/{1}")]
    BlobMissing(String, String),
    #[error("blob insufficient length")]
    BlobInsufficientLength,
    #[error("offset overflow")]
    OffsetOverflow,
    #[error("record too large: {0}")]
    RecordTooLarge(usize),
    #[error("index entry points outside of blob: {0}")]
    Corrupt(String),
}
