//! Byte-level storage backends.
//!
//! A [Storage] groups named [Blob]s into partitions. Writes to a blob are not durable until
//! [Blob::sync] returns.

use crate::Error;

pub mod disk;
pub mod memory;

/// Interface to open, remove and list blobs.
pub trait Storage: Clone + Send + Sync + 'static {
    /// The readable/writeable buffer opened by this storage.
    type Blob: Blob;

    /// Open an existing blob in a given partition or create a new one, returning
    /// the blob and its length.
    fn open(&self, partition: &str, name: &[u8]) -> Result<(Self::Blob, u64), Error>;

    /// Remove a blob from a given partition.
    ///
    /// If no `name` is provided, the entire partition is removed.
    fn remove(&self, partition: &str, name: Option<&[u8]>) -> Result<(), Error>;

    /// Return all blobs in a given partition.
    fn scan(&self, partition: &str) -> Result<Vec<Vec<u8>>, Error>;
}

/// Interface to read and write to a blob.
///
/// When a blob is dropped, any unsynced changes may be discarded.
pub trait Blob: Send + Sync + 'static {
    /// Fill `buf` with the bytes starting at `offset`.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<(), Error>;

    /// Write `buf` at `offset`, extending the blob if needed.
    fn write_at(&self, buf: &[u8], offset: u64) -> Result<(), Error>;

    /// Set the length of the blob, truncating or zero-extending it.
    fn resize(&self, len: u64) -> Result<(), Error>;

    /// Durably persist all prior writes.
    fn sync(&self) -> Result<(), Error>;
}

/// Partition names are restricted to ASCII alphanumerics, `-` and `_`.
pub(crate) fn validate_partition_name(partition: &str) -> Result<(), Error> {
    if partition.is_empty()
        || partition
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || ['_', '-'].contains(&c)))
    {
        return Err(Error::PartitionNameInvalid(partition.into()));
    }
    Ok(())
}
