//! SHA-256 hashing and the 256-bit [Digest] used for every quorum, session and content hash.
//!
//! # Example
//! ```rust
//! use llmq_utils::Sha256;
//!
//! let mut hasher = Sha256::new();
//! hasher.update(b"hello,");
//! hasher.update(b"world!");
//! let digest = hasher.finalize();
//! println!("digest: {}", digest);
//! ```

use crate::hex;
use bytes::{Buf, BufMut};
use llmq_codec::{Error as CodecError, FixedSize, Read, Write};
use rand::{CryptoRng, Rng};
use sha2::{Digest as _, Sha256 as ISha256};
use std::{
    fmt::{Debug, Display},
    ops::Deref,
};

const DIGEST_LENGTH: usize = 32;

/// Generate a SHA-256 digest from a message.
pub fn hash(message: &[u8]) -> Digest {
    let array: [u8; DIGEST_LENGTH] = ISha256::digest(message).into();
    Digest::from(array)
}

/// SHA-256 hasher.
#[derive(Debug, Default)]
pub struct Sha256 {
    hasher: ISha256,
}

impl Sha256 {
    /// Create a new hasher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append message to previously recorded data.
    pub fn update(&mut self, message: &[u8]) -> &mut Self {
        self.hasher.update(message);
        self
    }

    /// Hash all recorded data and reset the hasher to the initial state.
    pub fn finalize(&mut self) -> Digest {
        let array: [u8; DIGEST_LENGTH] = self.hasher.finalize_reset().into();
        Digest::from(array)
    }
}

/// A 256-bit digest.
#[derive(Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct Digest([u8; DIGEST_LENGTH]);

impl Digest {
    /// Generate a random digest (useful for tests and process-lifetime seeds).
    pub fn random<R: Rng + CryptoRng>(rng: &mut R) -> Self {
        let mut digest = [0u8; DIGEST_LENGTH];
        rng.fill_bytes(&mut digest);
        Self(digest)
    }

    /// Returns the last 8 bytes interpreted as a little-endian integer (the most significant
    /// 64-bit word when the digest is read as a little-endian 256-bit number).
    pub fn high_u64(&self) -> u64 {
        let mut word = [0u8; 8];
        word.copy_from_slice(&self.0[DIGEST_LENGTH - 8..]);
        u64::from_le_bytes(word)
    }

    /// Returns the first 8 bytes interpreted as a little-endian integer.
    pub fn low_u64(&self) -> u64 {
        let mut word = [0u8; 8];
        word.copy_from_slice(&self.0[..8]);
        u64::from_le_bytes(word)
    }
}

impl Write for Digest {
    fn write(&self, buf: &mut impl BufMut) {
        self.0.write(buf);
    }
}

impl Read for Digest {
    fn read(buf: &mut impl Buf) -> Result<Self, CodecError> {
        <[u8; DIGEST_LENGTH]>::read(buf).map(Self)
    }
}

impl FixedSize for Digest {
    const SIZE: usize = DIGEST_LENGTH;
}

impl From<[u8; DIGEST_LENGTH]> for Digest {
    fn from(value: [u8; DIGEST_LENGTH]) -> Self {
        Self(value)
    }
}

impl TryFrom<&[u8]> for Digest {
    type Error = CodecError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let array: [u8; DIGEST_LENGTH] = value
            .try_into()
            .map_err(|_| CodecError::InvalidLength(value.len()))?;
        Ok(Self(array))
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Deref for Digest {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex(&self.0))
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex(&self.0))
    }
}
