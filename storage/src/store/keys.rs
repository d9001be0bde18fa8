//! Key layout of the recovered-signature store.
//!
//! All integers are big-endian so that time-indexed keys sort chronologically.
//!
//! | Prefix | Key                        | Value                        |
//! |--------|----------------------------|------------------------------|
//! | `r`    | type, id                   | time, [crate::Record]        |
//! | `m`    | type, id, msg hash         | -                            |
//! | `s`    | sign hash                  | -                            |
//! | `h`    | content hash               | type, id                     |
//! | `t`    | time, type, id             | -                            |
//! | `v`    | type, id                   | msg hash, time               |
//! | `w`    | time, type, id             | -                            |

use llmq_types::QuorumType;
use llmq_utils::Digest;

pub const RECORD: u8 = b'r';
pub const MESSAGE: u8 = b'm';
pub const SESSION: u8 = b's';
pub const CONTENT: u8 = b'h';
pub const RECORD_TIME: u8 = b't';
pub const VOTE: u8 = b'v';
pub const VOTE_TIME: u8 = b'w';

/// Length of a `(type, id)` suffix.
pub const SESSION_KEY_LEN: usize = 1 + 32;

pub fn record(quorum_type: QuorumType, id: &Digest) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + SESSION_KEY_LEN);
    key.push(RECORD);
    key.push(quorum_type as u8);
    key.extend_from_slice(id);
    key
}

pub fn message(quorum_type: QuorumType, id: &Digest, msg_hash: &Digest) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + SESSION_KEY_LEN + 32);
    key.push(MESSAGE);
    key.push(quorum_type as u8);
    key.extend_from_slice(id);
    key.extend_from_slice(msg_hash);
    key
}

pub fn session(sign_hash: &Digest) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 32);
    key.push(SESSION);
    key.extend_from_slice(sign_hash);
    key
}

pub fn content(content_hash: &Digest) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 32);
    key.push(CONTENT);
    key.extend_from_slice(content_hash);
    key
}

fn timed(prefix: u8, time: u64, quorum_type: QuorumType, id: &Digest) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 8 + SESSION_KEY_LEN);
    key.push(prefix);
    key.extend_from_slice(&time.to_be_bytes());
    key.push(quorum_type as u8);
    key.extend_from_slice(id);
    key
}

pub fn record_time(time: u64, quorum_type: QuorumType, id: &Digest) -> Vec<u8> {
    timed(RECORD_TIME, time, quorum_type, id)
}

pub fn vote(quorum_type: QuorumType, id: &Digest) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + SESSION_KEY_LEN);
    key.push(VOTE);
    key.push(quorum_type as u8);
    key.extend_from_slice(id);
    key
}

pub fn vote_time(time: u64, quorum_type: QuorumType, id: &Digest) -> Vec<u8> {
    timed(VOTE_TIME, time, quorum_type, id)
}

/// Returns the smallest timed key with `prefix` at or after `time`.
pub fn time_bound(prefix: u8, time: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 8);
    key.push(prefix);
    key.extend_from_slice(&time.to_be_bytes());
    key
}

/// Splits a timed key into `(time, type, id)`.
pub fn parse_timed(key: &[u8]) -> Option<(u64, u8, Digest)> {
    if key.len() != 1 + 8 + SESSION_KEY_LEN {
        return None;
    }
    let time = u64::from_be_bytes(key[1..9].try_into().ok()?);
    let quorum_type = key[9];
    let id = Digest::try_from(&key[10..]).ok()?;
    Some((time, quorum_type, id))
}
