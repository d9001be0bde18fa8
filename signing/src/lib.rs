//! Recover, verify and persist quorum threshold signatures.
//!
//! # Overview
//!
//! The core of the crate is the [Engine], a single long-lived actor that owns every write to the
//! recovered-signature [Store]. Callers talk to it through a [Mailbox]:
//! - Candidate signatures received from peers are queued per peer and verified in batches
//! - Signatures reconstructed from already-trusted structures skip verification
//! - Signing requests record a vote, select the signing quorum and hand off to the share layer
//!
//! Once a candidate is accepted it is persisted (superseding any local vote for the session) and
//! every registered [Listener] is notified in registration order.
//!
//! # Collaborators
//!
//! The engine does not know how quorums are formed, how shares are produced or how signatures are
//! checked. It consumes those through narrow traits:
//! - [Directory] exposes the quorums known at the current tip
//! - [Verifier] checks aggregated signatures, optionally in batches
//! - [Signer] produces (or re-announces) the local share for a session
//! - [Scorer] receives peers whose candidates failed verification
//!
//! # Ordering
//!
//! The first candidate for a session that passes verification wins. Later candidates with the
//! same sign hash are ignored and candidates with a different message hash are rejected as
//! conflicting, never replacing the stored signature.
//!
//! [Store]: llmq_storage::Store

use bytes::Bytes;
use llmq_types::{QuorumType, Quorum, RecoveredSignature};
use llmq_utils::Digest;
use std::{fmt::Debug, hash::Hash, sync::Arc};
use thiserror::Error;

mod config;
pub use config::{
    Config, DEFAULT_CLEANUP_INTERVAL, DEFAULT_IDLE_INTERVAL, DEFAULT_MAX_AGE,
    DEFAULT_MAX_BATCH_SESSIONS, DEFAULT_SIGN_HEIGHT_OFFSET,
};
mod engine;
pub use engine::Engine;
mod ingress;
pub use ingress::{Mailbox, SignOutcome, SignRequest};
mod listeners;
pub use listeners::{ListenerId, Listeners};
mod metrics;
mod pending;
mod selection;
pub use selection::{is_quorum_active, select_quorum, verify_recovered_signature, VerifyResult};

#[cfg(test)]
pub mod mocks;

/// Errors that can occur while handling recovered signatures.
#[derive(Debug, Error)]
pub enum Error {
    #[error("quorum type not enabled: {0}")]
    QuorumTypeDisabled(QuorumType),
    #[error("unknown quorum: {0}")]
    UnknownQuorum(Digest),
    #[error("inactive quorum: {0}")]
    InactiveQuorum(Digest),
    #[error("signature too large: {0}")]
    SignatureTooLarge(usize),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("mailbox closed")]
    MailboxClosed,
    #[error("storage error: {0}")]
    Storage(#[from] llmq_storage::Error),
    #[error("verifier failed: {0}")]
    Verifier(#[from] tokio::task::JoinError),
}

impl Error {
    /// Returns whether the error can only be caused by a misbehaving sender.
    ///
    /// Unknown and inactive quorums are not attributable: the local node may simply be behind.
    pub fn attributable(&self) -> bool {
        matches!(
            self,
            Error::QuorumTypeDisabled(_) | Error::SignatureTooLarge(_) | Error::InvalidSignature
        )
    }
}

/// Identity of a peer that delivers candidate signatures.
pub trait Peer: Clone + Debug + Eq + Hash + Send + Sync + 'static {}

impl<T: Clone + Debug + Eq + Hash + Send + Sync + 'static> Peer for T {}

/// Read-only view of published quorums.
///
/// Implementations return shared snapshots that are never mutated after publication.
pub trait Directory: Clone + Send + Sync + 'static {
    /// Height of the current chain tip.
    fn tip(&self) -> u64;

    /// Returns up to `count` of the most recent quorums of `quorum_type` mined at or below
    /// `height`, newest first.
    fn scan(&self, quorum_type: QuorumType, height: u64, count: usize) -> Vec<Arc<Quorum>>;

    /// Returns the quorum of `quorum_type` with the given hash.
    fn get(&self, quorum_type: QuorumType, quorum_hash: &Digest) -> Option<Arc<Quorum>>;
}

/// One entry of a batch handed to [Verifier::verify_batch].
#[derive(Clone, Debug)]
pub struct Item {
    pub public_key: Bytes,
    pub sign_hash: Digest,
    pub signature: Bytes,
}

/// Checks aggregated threshold signatures.
pub trait Verifier: Clone + Send + 'static {
    /// Returns whether `signature` is valid for `sign_hash` under `public_key`.
    fn verify(&self, public_key: &[u8], sign_hash: &Digest, signature: &[u8]) -> bool;

    /// Verify a batch of signatures, returning the validity of each item in order.
    ///
    /// Implementations can amortize the cost of verification across the batch.
    /// Batches are verified on a blocking thread.
    fn verify_batch(&self, items: &[Item]) -> Vec<bool> {
        items
            .iter()
            .map(|item| self.verify(&item.public_key, &item.sign_hash, &item.signature))
            .collect()
    }
}

/// Produces signature shares for the local member.
///
/// Calls are fire-and-forget: the result becomes visible once the recovered signature reaches
/// the engine.
pub trait Signer: Clone + Send + 'static {
    /// Produce and broadcast the local share for `(quorum, id, msg_hash)`.
    fn sign(&mut self, quorum: Arc<Quorum>, id: Digest, msg_hash: Digest);

    /// Re-announce any shares already known for `(quorum, id, msg_hash)`.
    fn reannounce(&mut self, quorum: Arc<Quorum>, id: Digest, msg_hash: Digest);
}

/// Receives peers that sent provably invalid data.
pub trait Scorer: Clone + Send + 'static {
    type Peer: Peer;

    /// Penalize `peer` for `error`.
    fn penalize(&mut self, peer: Self::Peer, error: &Error);
}

/// Result reported by a [Listener].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The listener acted on the signature.
    Accepted,
    /// The signature was of no interest to the listener.
    Ignored,
}

/// Consumer of newly recovered signatures.
///
/// Listeners are invoked on the engine's task and must return quickly. They must not wait on the
/// [Mailbox] from within the callback.
pub trait Listener: Send + Sync + 'static {
    fn on_recovered_signature(&self, signature: &RecoveredSignature) -> Outcome;
}
