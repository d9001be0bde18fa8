//! Deterministic choice of the quorum responsible for a signing session.
//!
//! Every honest node must pick the same quorum for a session without communicating, so selection
//! only depends on the session's selection hash and the quorums mined at a height slightly below
//! the tip (which all nodes agree on even while the tip itself is contested).

use crate::{Directory, Verifier};
use llmq_topology::is_quorum_rotation_enabled;
use llmq_types::{sign_hash, Consensus, Quorum, QuorumType};
use llmq_utils::{log2_floor, Digest, Sha256};
use std::sync::Arc;
use tracing::trace;

/// Returns whether `quorum_hash` is among the quorums of `quorum_type` peers are still expected
/// to serve.
pub fn is_quorum_active<D: Directory>(
    directory: &D,
    quorum_type: QuorumType,
    quorum_hash: &Digest,
) -> bool {
    let count = quorum_type.params().keep_old_connections;
    directory
        .scan(quorum_type, directory.tip(), count)
        .iter()
        .any(|quorum| quorum.quorum_hash == *quorum_hash)
}

/// Select the quorum of `quorum_type` responsible for `selection_hash`.
///
/// Quorums are taken as of `sign_height - offset` (the tip when `sign_height` is `None`).
/// Returns `None` if that height is not yet known or no quorum matches.
pub fn select_quorum<D: Directory>(
    directory: &D,
    consensus: &Consensus,
    quorum_type: QuorumType,
    selection_hash: &Digest,
    sign_height: Option<u64>,
    offset: u64,
) -> Option<Arc<Quorum>> {
    let tip = directory.tip();
    let start = sign_height.unwrap_or(tip).checked_sub(offset)?;
    if start > tip {
        return None;
    }
    let params = quorum_type.params();
    let quorums = directory.scan(quorum_type, start, params.signing_active_quorum_count);

    if is_quorum_rotation_enabled(consensus, quorum_type, start) {
        // The high bits of the selection hash pick the quorum index within the cycle
        let n = log2_floor(params.signing_active_quorum_count);
        let signer = ((1u64 << n) - 1) & (selection_hash.high_u64() >> (64 - n - 1));
        if signer > quorums.len() as u64 {
            return None;
        }
        let selected = quorums
            .into_iter()
            .find(|quorum| u64::from(quorum.quorum_index) == signer);
        trace!(%quorum_type, signer, found = selected.is_some(), "selected rotating quorum");
        return selected;
    }

    quorums.into_iter().min_by_key(|quorum| {
        Sha256::new()
            .update(&[quorum_type as u8])
            .update(&quorum.quorum_hash)
            .update(selection_hash)
            .finalize()
    })
}

/// Result of [verify_recovered_signature].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyResult {
    Valid,
    Invalid,
    /// No quorum could be selected for the session at the given height.
    NoQuorum,
}

/// Verify a recovered signature embedded in another structure without consulting the store.
///
/// The quorum is selected the same way signers select it, using `id` as the selection hash.
#[allow(clippy::too_many_arguments)]
pub fn verify_recovered_signature<D: Directory, V: Verifier>(
    directory: &D,
    consensus: &Consensus,
    verifier: &V,
    quorum_type: QuorumType,
    signed_at_height: Option<u64>,
    id: &Digest,
    msg_hash: &Digest,
    signature: &[u8],
    offset: u64,
) -> VerifyResult {
    let selected = select_quorum(
        directory,
        consensus,
        quorum_type,
        id,
        signed_at_height,
        offset,
    );
    let Some(quorum) = selected else {
        return VerifyResult::NoQuorum;
    };
    let sign_hash = sign_hash(quorum_type, &quorum.quorum_hash, id, msg_hash);
    if verifier.verify(&quorum.public_key, &sign_hash, signature) {
        VerifyResult::Valid
    } else {
        VerifyResult::Invalid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{self, Directory as MockDirectory, Verifier as MockVerifier};
    use llmq_utils::hash;
    use std::collections::HashSet;
    use test_case::test_case;

    #[test]
    fn test_active_window() {
        let directory = MockDirectory::default();
        let quorums: Vec<_> = (0..4)
            .map(|i| mocks::quorum(QuorumType::Test, 24 * (i + 1), 0, 3))
            .collect();
        for quorum in &quorums {
            directory.publish(quorum.clone());
        }
        directory.set_tip(100);

        // Test quorums keep connections to the 3 most recent
        let keep = QuorumType::Test.params().keep_old_connections;
        assert_eq!(keep, 3);
        assert!(!is_quorum_active(&directory, QuorumType::Test, &quorums[0].quorum_hash));
        for quorum in &quorums[1..] {
            assert!(is_quorum_active(&directory, QuorumType::Test, &quorum.quorum_hash));
        }
        assert!(!is_quorum_active(&directory, QuorumType::Test, &hash(b"unknown")));
    }

    #[test]
    fn test_select_deterministic() {
        let directory = MockDirectory::default();
        for i in 0..4 {
            directory.publish(mocks::quorum(QuorumType::Test, 24 * (i + 1), 0, 3));
        }
        directory.set_tip(110);
        let consensus = Consensus::regtest();

        let mut chosen = HashSet::new();
        for i in 0..64u8 {
            let id = hash(&[i]);
            let first = select_quorum(&directory, &consensus, QuorumType::Test, &id, None, 8)
                .unwrap();
            let second = select_quorum(&directory, &consensus, QuorumType::Test, &id, None, 8)
                .unwrap();
            assert_eq!(first.quorum_hash, second.quorum_hash);
            chosen.insert(first.quorum_hash);
        }

        // Only the signing-active quorums (as of tip - 8 = 102) are ever chosen
        let active = QuorumType::Test.params().signing_active_quorum_count;
        let expected: HashSet<_> = directory
            .scan(QuorumType::Test, 102, active)
            .iter()
            .map(|quorum| quorum.quorum_hash)
            .collect();
        assert_eq!(chosen, expected);
    }

    #[test_case(30, None => false; "quorum mined above tip minus offset")]
    #[test_case(32, None => true; "quorum mined at tip minus offset")]
    #[test_case(30, Some(4) => false; "signing height below offset")]
    #[test_case(30, Some(100) => false; "signing height above tip")]
    #[test_case(40, Some(32) => true; "historical signing height")]
    #[test_case(40, Some(31) => false; "historical height before quorum")]
    fn test_select_height_bounds(tip: u64, sign_height: Option<u64>) -> bool {
        let directory = MockDirectory::default();
        directory.publish(mocks::quorum(QuorumType::Test, 24, 0, 3));
        directory.set_tip(tip);
        let consensus = Consensus::regtest();
        select_quorum(
            &directory,
            &consensus,
            QuorumType::Test,
            &hash(b"id"),
            sign_height,
            8,
        )
        .is_some()
    }

    #[test]
    fn test_select_rotating() {
        // Regtest rotation is active well before height 1_200
        let consensus = Consensus::regtest();
        let quorum_type = QuorumType::TestDip0024;
        let directory = MockDirectory::default();
        let cycle = 1_152;
        for index in 0..2 {
            directory.publish(mocks::quorum(quorum_type, cycle + index as u64, index, 4));
        }
        directory.set_tip(1_200);
        assert!(is_quorum_rotation_enabled(&consensus, quorum_type, 1_192));

        // n = log2(2) = 1, so bit 62 of the last word selects the index
        let mut seen = HashSet::new();
        for i in 0..32u8 {
            let id = hash(&[i]);
            let expected = ((id.high_u64() >> 62) & 1) as u32;
            let quorum =
                select_quorum(&directory, &consensus, quorum_type, &id, None, 8).unwrap();
            assert_eq!(quorum.quorum_index, expected);
            seen.insert(expected);
        }
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_verify_recovered_signature() {
        let directory = MockDirectory::default();
        let quorum = mocks::quorum(QuorumType::Test, 24, 0, 3);
        directory.publish(quorum.clone());
        directory.set_tip(40);
        let consensus = Consensus::regtest();
        let verifier = MockVerifier::default();
        let id = hash(b"id");
        let msg_hash = hash(b"msg");

        let signature = mocks::sign(&quorum, &id, &msg_hash);
        let verify = |signature: &[u8], height| {
            verify_recovered_signature(
                &directory,
                &consensus,
                &verifier,
                QuorumType::Test,
                height,
                &id,
                &msg_hash,
                signature,
                8,
            )
        };
        assert_eq!(verify(&signature, None), VerifyResult::Valid);
        assert_eq!(verify(b"forged", None), VerifyResult::Invalid);
        assert_eq!(verify(&signature, Some(20)), VerifyResult::NoQuorum);
    }
}
