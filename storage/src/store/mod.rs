//! Durable store of recovered signatures and votes.
//!
//! [Store] persists every recovered signature under its `(quorum type, session id)` with
//! secondary indices by exact message, by sign hash, by content hash and by insertion time. Votes
//! are kept alongside, at most one per `(quorum type, session id)`.
//!
//! # Existence Caches
//!
//! Three bounded LRU caches (by session id, by sign hash and by content hash) answer the hot
//! existence queries without consulting the log. Entries are only inserted after a confirmed
//! write or a confirmed hit in the log, and are evicted whenever the underlying key is removed
//! (by [Store::truncate] or [Store::cleanup]), so a cache never reports a signature the log does
//! not hold. A miss always falls back to the log.
//!
//! # Truncation
//!
//! [Store::truncate] replaces a record with a [Tombstone] holding only its content hash. The
//! signature can no longer be retrieved or matched by message or sign hash, but existence by
//! session id and by content hash is preserved so duplicates are still recognized.
//!
//! # Example
//!
//! ```rust
//! use bytes::Bytes;
//! use llmq_storage::{storage::memory::Storage, store::{Config, Store}};
//! use llmq_types::{QuorumType, RecoveredSignature};
//! use llmq_utils::{hash, NZUsize};
//! use prometheus_client::registry::Registry;
//! use std::time::SystemTime;
//!
//! let cfg = Config {
//!     partition: "recovered".into(),
//!     cache_size: NZUsize!(30_000),
//!     compaction_threshold: 1 << 20,
//! };
//! let store = Store::init(Storage::default(), cfg, &mut Registry::default()).unwrap();
//!
//! let sig = RecoveredSignature {
//!     quorum_type: QuorumType::Test,
//!     quorum_hash: hash(b"quorum"),
//!     id: hash(b"id"),
//!     msg_hash: hash(b"msg"),
//!     signature: Bytes::from_static(b"signature"),
//! };
//! assert!(store.write(&sig, SystemTime::now()).unwrap());
//! assert!(store.has_recovered_signature_for_id(sig.quorum_type, &sig.id));
//! ```

mod keys;
mod storage;
pub use storage::Store;

use bytes::{Buf, BufMut};
use llmq_codec::{EncodeSize, Error as CodecError, Read, Write};
use llmq_types::{QuorumType, RecoveredSignature};
use llmq_utils::Digest;
use std::num::NonZeroUsize;

/// Configuration for [Store].
#[derive(Clone, Debug)]
pub struct Config {
    /// The [crate::Storage] partition to use.
    pub partition: String,

    /// Maximum number of entries in each existence cache.
    pub cache_size: NonZeroUsize,

    /// Minimum number of dead bytes before the underlying log compacts.
    pub compaction_threshold: u64,
}

/// What remains of a recovered signature after truncation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tombstone {
    pub quorum_type: QuorumType,
    pub id: Digest,
    pub content_hash: Digest,
}

/// A stored recovered signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Record {
    Full(RecoveredSignature),
    Tombstone(Tombstone),
}

impl Record {
    pub fn quorum_type(&self) -> QuorumType {
        match self {
            Record::Full(sig) => sig.quorum_type,
            Record::Tombstone(tombstone) => tombstone.quorum_type,
        }
    }

    pub fn id(&self) -> Digest {
        match self {
            Record::Full(sig) => sig.id,
            Record::Tombstone(tombstone) => tombstone.id,
        }
    }

    pub fn content_hash(&self) -> Digest {
        match self {
            Record::Full(sig) => sig.hash(),
            Record::Tombstone(tombstone) => tombstone.content_hash,
        }
    }

    /// Returns the full signature, if it has not been truncated.
    pub fn signature(&self) -> Option<&RecoveredSignature> {
        match self {
            Record::Full(sig) => Some(sig),
            Record::Tombstone(_) => None,
        }
    }

    pub fn into_signature(self) -> Option<RecoveredSignature> {
        match self {
            Record::Full(sig) => Some(sig),
            Record::Tombstone(_) => None,
        }
    }
}

impl Write for Record {
    fn write(&self, buf: &mut impl BufMut) {
        match self {
            Record::Full(sig) => {
                0u8.write(buf);
                sig.write(buf);
            }
            Record::Tombstone(tombstone) => {
                1u8.write(buf);
                tombstone.quorum_type.write(buf);
                tombstone.id.write(buf);
                tombstone.content_hash.write(buf);
            }
        }
    }
}

impl Read for Record {
    fn read(buf: &mut impl Buf) -> Result<Self, CodecError> {
        match u8::read(buf)? {
            0 => Ok(Record::Full(RecoveredSignature::read(buf)?)),
            1 => Ok(Record::Tombstone(Tombstone {
                quorum_type: QuorumType::read(buf)?,
                id: Digest::read(buf)?,
                content_hash: Digest::read(buf)?,
            })),
            tag => Err(CodecError::UnknownTag("Record", tag)),
        }
    }
}

impl EncodeSize for Record {
    fn encode_size(&self) -> usize {
        1 + match self {
            Record::Full(sig) => sig.encode_size(),
            Record::Tombstone(_) => 1 + 32 + 32,
        }
    }
}
