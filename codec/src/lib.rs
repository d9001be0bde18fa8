//! Serialize quorum and recovered-signature records.
//!
//! Everything the quorum crates persist or hash is a flat record: a fixed sequence of integers,
//! digests and at most a few opaque blobs (signatures). This crate captures exactly that shape:
//! - Integers are big-endian, so keys built from them sort numerically in the store
//! - Fixed byte strings (digests) are written as-is
//! - Blobs carry a `u16` length prefix and are bounded by the reader (see [field])
//!
//! Two nodes encoding the same record always produce the same bytes, which is what makes the
//! content hash of a recovered signature usable as an inventory key.
//!
//! # Example
//!
//! ```
//! use bytes::{Buf, BufMut};
//! use llmq_codec::{Decode, Encode, Error, FixedSize, Read, Write};
//!
//! #[derive(Debug, PartialEq)]
//! struct Checkpoint {
//!     height: u64,
//!     hash: [u8; 32],
//! }
//!
//! impl Write for Checkpoint {
//!     fn write(&self, buf: &mut impl BufMut) {
//!         self.height.write(buf);
//!         self.hash.write(buf);
//!     }
//! }
//!
//! impl Read for Checkpoint {
//!     fn read(buf: &mut impl Buf) -> Result<Self, Error> {
//!         Ok(Self {
//!             height: u64::read(buf)?,
//!             hash: <[u8; 32]>::read(buf)?,
//!         })
//!     }
//! }
//!
//! impl FixedSize for Checkpoint {
//!     const SIZE: usize = u64::SIZE + 32;
//! }
//!
//! let checkpoint = Checkpoint { height: 7, hash: [1; 32] };
//! assert_eq!(Checkpoint::decode(checkpoint.encode()).unwrap(), checkpoint);
//! ```

use bytes::{Buf, BufMut, BytesMut};

mod error;
pub use error::Error;
pub mod field;

/// A record that can be appended to a buffer.
pub trait Write {
    /// Append the encoding of `self` to `buf`.
    fn write(&self, buf: &mut impl BufMut);
}

/// A record that can be parsed from untrusted input.
pub trait Read: Sized {
    /// Parse a record from the front of `buf`, consuming exactly its encoding.
    fn read(buf: &mut impl Buf) -> Result<Self, Error>;
}

/// A record that knows the length of its encoding.
pub trait EncodeSize {
    /// Must equal the number of bytes [Write::write] appends.
    fn encode_size(&self) -> usize;
}

/// A record whose encoding always has the same length.
pub trait FixedSize {
    const SIZE: usize;
}

impl<T: FixedSize> EncodeSize for T {
    fn encode_size(&self) -> usize {
        T::SIZE
    }
}

/// Encode a record into a buffer of exactly the right size.
pub trait Encode: Write + EncodeSize {
    fn encode(&self) -> BytesMut {
        let size = self.encode_size();
        let mut buf = BytesMut::with_capacity(size);
        self.write(&mut buf);
        assert_eq!(buf.len(), size, "encode_size does not match write");
        buf
    }
}

impl<T: Write + EncodeSize> Encode for T {}

/// Parse a record that must span the whole input.
pub trait Decode: Read {
    fn decode(mut buf: impl Buf) -> Result<Self, Error> {
        let record = Self::read(&mut buf)?;
        match buf.remaining() {
            0 => Ok(record),
            trailing => Err(Error::Trailing(trailing)),
        }
    }
}

impl<T: Read> Decode for T {}

/// Fail unless `buf` holds at least `needed` more bytes.
pub(crate) fn need(buf: &impl Buf, needed: usize) -> Result<(), Error> {
    let remaining = buf.remaining();
    if remaining < needed {
        return Err(Error::Truncated { needed, remaining });
    }
    Ok(())
}
