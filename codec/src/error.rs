use thiserror::Error;

/// Errors that can occur while parsing a record.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("record truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("{0} trailing bytes after record")]
    Trailing(usize),
    #[error("invalid length: {0}")]
    InvalidLength(usize),
    #[error("unknown {0} tag: {1}")]
    UnknownTag(&'static str, u8),
}
