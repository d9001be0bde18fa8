//! Field encodings shared by every record.

use crate::{need, Error, FixedSize, Read, Write};
use bytes::{Buf, BufMut, Bytes};

macro_rules! big_endian {
    ($($type:ty => $get:ident, $put:ident;)+) => {$(
        impl Write for $type {
            fn write(&self, buf: &mut impl BufMut) {
                buf.$put(*self);
            }
        }

        impl Read for $type {
            fn read(buf: &mut impl Buf) -> Result<Self, Error> {
                need(buf, <$type>::SIZE)?;
                Ok(buf.$get())
            }
        }

        impl FixedSize for $type {
            const SIZE: usize = std::mem::size_of::<$type>();
        }
    )+};
}

big_endian! {
    u8 => get_u8, put_u8;
    u32 => get_u32, put_u32;
    u64 => get_u64, put_u64;
}

impl<const N: usize> Write for [u8; N] {
    fn write(&self, buf: &mut impl BufMut) {
        buf.put_slice(self);
    }
}

impl<const N: usize> Read for [u8; N] {
    fn read(buf: &mut impl Buf) -> Result<Self, Error> {
        need(buf, N)?;
        let mut out = [0u8; N];
        buf.copy_to_slice(&mut out);
        Ok(out)
    }
}

impl<const N: usize> FixedSize for [u8; N] {
    const SIZE: usize = N;
}

/// Length of the prefix in front of every blob.
pub const BLOB_PREFIX: usize = std::mem::size_of::<u16>();

/// Encoded size of a blob of `len` bytes.
pub fn blob_size(len: usize) -> usize {
    BLOB_PREFIX + len
}

/// Append `blob` with its length prefix.
///
/// Panics if `blob` is longer than `u16::MAX` bytes.
pub fn write_blob(blob: &[u8], buf: &mut impl BufMut) {
    assert!(blob.len() <= u16::MAX as usize, "blob too long");
    buf.put_u16(blob.len() as u16);
    buf.put_slice(blob);
}

/// Read a length-prefixed blob of at most `max` bytes.
pub fn read_blob(buf: &mut impl Buf, max: usize) -> Result<Bytes, Error> {
    need(buf, BLOB_PREFIX)?;
    let len = buf.get_u16() as usize;
    if len > max {
        return Err(Error::InvalidLength(len));
    }
    need(buf, len)?;
    Ok(buf.copy_to_bytes(len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Decode, Encode};

    #[test]
    fn test_integers_sort_numerically() {
        let heights = [0u64, 1, 255, 256, 1 << 40];
        let encoded: Vec<_> = heights.iter().map(|height| height.encode()).collect();
        assert!(encoded.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(0x0102_0304_u32.encode().as_ref(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_truncated_and_trailing() {
        assert_eq!(
            u64::decode(Bytes::from_static(&[0; 5])),
            Err(Error::Truncated {
                needed: 8,
                remaining: 5
            })
        );
        assert_eq!(u8::decode(Bytes::from_static(&[1, 2])), Err(Error::Trailing(1)));
        assert_eq!(
            <[u8; 4]>::decode(Bytes::from_static(&[9, 9, 9, 9])).unwrap(),
            [9; 4]
        );
    }

    #[test]
    fn test_blob() {
        let signature = [7u8; 96];
        let mut buf = Vec::new();
        write_blob(&signature, &mut buf);
        assert_eq!(buf.len(), blob_size(96));

        // Accepted up to the bound
        let decoded = read_blob(&mut buf.as_slice(), 96).unwrap();
        assert_eq!(decoded.as_ref(), signature.as_slice());

        // Rejected above it, before reading the body
        assert_eq!(read_blob(&mut buf.as_slice(), 95), Err(Error::InvalidLength(96)));

        // Body shorter than the prefix claims
        assert_eq!(
            read_blob(&mut &buf[..50], 96),
            Err(Error::Truncated {
                needed: 96,
                remaining: 48
            })
        );
    }
}
