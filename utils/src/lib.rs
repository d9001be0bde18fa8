//! Leverage common functionality across the quorum crates.

pub mod lru;
pub use lru::LruSet;
pub mod sha256;
pub use sha256::{hash, Digest, Sha256};
mod time;
pub use time::{Clock, ManualClock, SystemClock, SystemTimeExt};

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Lowercase hexadecimal rendering of `bytes` (digests in logs, blob names on disk).
pub fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .flat_map(|byte| [byte >> 4, byte & 0x0f])
        .map(|nibble| HEX_DIGITS[nibble as usize] as char)
        .collect()
}

/// Parses the output of [hex] (either case), returning `None` on any other input.
pub fn from_hex(hex: &str) -> Option<Vec<u8>> {
    let digits = hex.as_bytes();
    if digits.len() % 2 != 0 {
        return None;
    }
    let nibble = |digit: u8| (digit as char).to_digit(16).map(|value| value as u8);
    digits
        .chunks_exact(2)
        .map(|pair| Some(nibble(pair[0])? << 4 | nibble(pair[1])?))
        .collect()
}

/// Returns the base-2 logarithm of `n`, rounded down (`0` for `n <= 1`).
pub fn log2_floor(n: usize) -> u32 {
    if n <= 1 {
        return 0;
    }
    usize::BITS - 1 - n.leading_zeros()
}

/// A macro to create a `NonZeroUsize` from a value, panicking if the value is zero.
#[macro_export]
macro_rules! NZUsize {
    ($val:expr) => {
        // This will panic at runtime if $val is zero.
        // For literals, the compiler *might* optimize this.
        std::num::NonZeroUsize::new($val).expect("value must be non-zero")
    };
}
