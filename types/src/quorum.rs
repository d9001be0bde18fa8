use crate::QuorumType;
use bytes::Bytes;
use llmq_utils::Digest;
use std::net::SocketAddr;

/// One deterministic-masternode-list entry eligible for a quorum.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Member {
    /// Stable participant identifier (the registration transaction hash).
    pub id: Digest,
    pub address: SocketAddr,
}

/// A published quorum.
///
/// Quorums are shared between components as `Arc<Quorum>` and never mutated after
/// publication. The order of `members` is canonical: it is inherited from the masternode list at
/// the quorum's base block and identical on every node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Quorum {
    pub quorum_type: QuorumType,
    pub quorum_hash: Digest,

    /// Position of this quorum within its rotation cycle (always `0` for non-rotating types).
    pub quorum_index: u32,

    /// Height of the quorum's base block.
    pub height: u64,

    /// Aggregated public key of the quorum.
    pub public_key: Bytes,

    pub members: Vec<Member>,

    /// Whether each member (by position) completed the key generation successfully.
    pub valid_members: Vec<bool>,
}

impl Quorum {
    /// Returns the position of `id` in the canonical member list.
    pub fn member_index(&self, id: &Digest) -> Option<usize> {
        self.members.iter().position(|member| member.id == *id)
    }

    pub fn is_member(&self, id: &Digest) -> bool {
        self.member_index(id).is_some()
    }

    /// Returns whether `id` is a member that holds a valid key share.
    pub fn is_valid_member(&self, id: &Digest) -> bool {
        self.member_index(id)
            .and_then(|index| self.valid_members.get(index).copied())
            .unwrap_or(false)
    }

    /// Returns the member identifiers in canonical order.
    pub fn member_ids(&self) -> Vec<Digest> {
        self.members.iter().map(|member| member.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmq_utils::hash;

    fn member(i: u8) -> Member {
        Member {
            id: hash(&[i]),
            address: SocketAddr::from(([127, 0, 0, 1], 9999 + i as u16)),
        }
    }

    #[test]
    fn test_membership() {
        let quorum = Quorum {
            quorum_type: QuorumType::Test,
            quorum_hash: hash(b"quorum"),
            quorum_index: 0,
            height: 24,
            public_key: Bytes::from_static(b"pk"),
            members: vec![member(0), member(1), member(2)],
            valid_members: vec![true, false, true],
        };

        assert_eq!(quorum.member_index(&member(2).id), Some(2));
        assert!(quorum.is_member(&member(1).id));
        assert!(!quorum.is_valid_member(&member(1).id));
        assert!(quorum.is_valid_member(&member(0).id));
        assert!(!quorum.is_member(&member(3).id));
        assert!(!quorum.is_valid_member(&member(3).id));
        assert_eq!(quorum.member_ids().len(), 3);
    }
}
