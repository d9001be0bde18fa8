//! Quorum parameters, members and recovered-signature records.
//!
//! Every other crate in the workspace speaks in terms of the types defined here:
//! - [QuorumType] and its immutable [Params] table
//! - [Consensus] network settings (which quorum type serves which feature, activation heights)
//! - [Member] and the shared, read-only [Quorum] snapshot
//! - [RecoveredSignature] and [Vote], the records persisted by the signature store
//! - [sign_hash], the domain-separated digest actually signed by share holders

use thiserror::Error;

mod consensus;
pub use consensus::{Consensus, Network};
mod params;
pub use params::{Params, QuorumType};
mod quorum;
pub use quorum::{Member, Quorum};
mod signature;
pub use signature::{sign_hash, RecoveredSignature, Vote, MAX_SIGNATURE_LENGTH};

/// Errors that can occur when interpreting quorum types.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("unknown quorum type: {0}")]
    UnknownQuorumType(u8),
}
