use crate::{quorum_connections, relay_members, Sporks};
use llmq_types::{Quorum, QuorumType};
use llmq_utils::{Digest, Sha256};
use rand::{CryptoRng, Rng};
use std::{collections::BTreeSet, time::Duration};
use tracing::debug;

/// Minimum time since the last successful outbound connection before a member is probed again.
pub const PROBE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// The connections a node should maintain for one quorum.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionPlan {
    /// Whether the local node is a member of the quorum (otherwise it is a watcher).
    pub is_member: bool,

    /// Members to dial.
    pub connections: BTreeSet<Digest>,

    /// Members to relay signature shares to.
    pub relay_members: BTreeSet<Digest>,
}

/// Topology state owned by one node.
///
/// The only state is the seed used to sample watch connections: it is generated once per
/// process so repeated queries for the same quorum are stable while different processes
/// spread their watch connections over different members.
#[derive(Clone, Debug)]
pub struct Topology {
    watch_seed: Digest,
}

impl Topology {
    pub fn new(watch_seed: Digest) -> Self {
        Self { watch_seed }
    }

    /// Create a topology with a freshly generated watch seed.
    pub fn random<R: Rng + CryptoRng>(rng: &mut R) -> Self {
        Self::new(Digest::random(rng))
    }

    /// Deterministically samples up to `connection_count` distinct member indices for a watcher.
    ///
    /// Each step hashes the previous value with `(quorum_type, quorum_hash)`; collisions are not
    /// retried, so fewer than `connection_count` indices may be returned.
    pub fn watch_connections(
        &self,
        quorum_type: QuorumType,
        quorum_hash: &Digest,
        member_count: usize,
        connection_count: usize,
    ) -> BTreeSet<usize> {
        let mut result = BTreeSet::new();
        if member_count == 0 {
            return result;
        }
        let mut rnd = self.watch_seed;
        let mut hasher = Sha256::new();
        for _ in 0..connection_count {
            rnd = hasher
                .update(&rnd)
                .update(&[quorum_type as u8])
                .update(quorum_hash)
                .finalize();
            result.insert((rnd.low_u64() % member_count as u64) as usize);
        }
        result
    }

    /// Computes the connections `local` should maintain for `quorum`.
    ///
    /// Members dial their outbound quorum connections and relay to their outbound relay members.
    /// Non-members (only when `watch_quorums` is set) keep a single watch connection that
    /// doubles as their relay member. Returns `None` when no connections are needed.
    pub fn ensure_connections(
        &self,
        quorum: &Quorum,
        local: Option<&Digest>,
        watch_quorums: bool,
        sporks: &Sporks,
    ) -> Option<ConnectionPlan> {
        if local.is_none() && !watch_quorums {
            return None;
        }
        if quorum.members.is_empty() {
            return None;
        }
        let members = quorum.member_ids();
        let is_member = local.is_some_and(|id| members.contains(id));
        if !is_member && !watch_quorums {
            return None;
        }
        debug!(
            quorum_type = %quorum.quorum_type,
            quorum_hash = %quorum.quorum_hash,
            is_member,
            "ensuring quorum connections"
        );

        let plan = match local {
            Some(id) if is_member => ConnectionPlan {
                is_member,
                connections: quorum_connections(
                    &members,
                    id,
                    true,
                    sporks.is_all_members_connected_enabled(quorum.quorum_type),
                ),
                relay_members: relay_members(&members, id, true),
            },
            _ => {
                let connections: BTreeSet<Digest> = self
                    .watch_connections(quorum.quorum_type, &quorum.quorum_hash, members.len(), 1)
                    .into_iter()
                    .map(|index| members[index])
                    .collect();
                ConnectionPlan {
                    is_member,
                    relay_members: connections.clone(),
                    connections,
                }
            }
        };
        Some(plan)
    }
}

/// Returns the members of `quorum` that `local` should probe for proof-of-service.
///
/// `last_outbound_success` reports when the last successful outbound connection to a member
/// happened (`None` if never). Members contacted within [PROBE_INTERVAL] are skipped.
pub fn probe_connections(
    quorum: &Quorum,
    local: &Digest,
    sporks: &Sporks,
    now: Duration,
    last_outbound_success: impl Fn(&Digest) -> Option<Duration>,
) -> BTreeSet<Digest> {
    if !sporks.is_pose_enabled(quorum.quorum_type) {
        return BTreeSet::new();
    }
    let probes: BTreeSet<Digest> = quorum
        .members
        .iter()
        .map(|member| member.id)
        .filter(|id| id != local)
        .filter(|id| {
            let last = last_outbound_success(id).unwrap_or_default();
            now.saturating_sub(last) >= PROBE_INTERVAL
        })
        .collect();
    if !probes.is_empty() {
        debug!(
            quorum_hash = %quorum.quorum_hash,
            probes = probes.len(),
            "adding quorum probe connections"
        );
    }
    probes
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use llmq_types::Member;
    use llmq_utils::hash;
    use std::net::SocketAddr;

    fn quorum(n: u8) -> Quorum {
        let members: Vec<Member> = (0..n)
            .map(|i| Member {
                id: hash(&[i]),
                address: SocketAddr::from(([10, 0, 0, i], 9999)),
            })
            .collect();
        Quorum {
            quorum_type: QuorumType::Llmq50_60,
            quorum_hash: hash(b"base block"),
            quorum_index: 0,
            height: 48,
            public_key: Bytes::from_static(b"public key"),
            valid_members: vec![true; members.len()],
            members,
        }
    }

    #[test]
    fn test_watch_connections_stable() {
        let topology = Topology::new(hash(b"seed"));
        let quorum_hash = hash(b"quorum");
        let first = topology.watch_connections(QuorumType::Llmq50_60, &quorum_hash, 50, 8);
        let second = topology.watch_connections(QuorumType::Llmq50_60, &quorum_hash, 50, 8);
        assert_eq!(first, second);
        assert!(!first.is_empty() && first.len() <= 8);
        assert!(first.iter().all(|index| *index < 50));

        // A prefix of the sequence is stable as well
        let one = topology.watch_connections(QuorumType::Llmq50_60, &quorum_hash, 50, 1);
        assert!(first.is_superset(&one));
    }

    #[test]
    fn test_watch_connections_diverge() {
        let quorum_hash = hash(b"quorum");
        let a = Topology::new(hash(b"seed a"));
        let b = Topology::new(hash(b"seed b"));
        let a_set = a.watch_connections(QuorumType::Llmq400_60, &quorum_hash, 400, 16);
        let b_set = b.watch_connections(QuorumType::Llmq400_60, &quorum_hash, 400, 16);
        assert_ne!(a_set, b_set);

        // Different quorums from the same process also diverge
        let other = a.watch_connections(QuorumType::Llmq400_60, &hash(b"other"), 400, 16);
        assert_ne!(a_set, other);
    }

    #[test]
    fn test_watch_connections_empty() {
        let topology = Topology::new(hash(b"seed"));
        assert!(topology
            .watch_connections(QuorumType::Test, &hash(b"q"), 0, 4)
            .is_empty());
        assert!(topology
            .watch_connections(QuorumType::Test, &hash(b"q"), 5, 0)
            .is_empty());
    }

    #[test]
    fn test_ensure_connections_member() {
        let topology = Topology::new(hash(b"seed"));
        let quorum = quorum(5);
        let local = quorum.members[0].id;
        let plan = topology
            .ensure_connections(&quorum, Some(&local), false, &Sporks::default())
            .unwrap();
        assert!(plan.is_member);
        let expected: BTreeSet<_> = [
            quorum.members[1].id,
            quorum.members[2].id,
            quorum.members[4].id,
        ]
        .into();
        assert_eq!(plan.connections, expected);
        assert_eq!(plan.relay_members, expected);
    }

    #[test]
    fn test_ensure_connections_all_connected() {
        let topology = Topology::new(hash(b"seed"));
        let quorum = quorum(6);
        let sporks = Sporks {
            quorum_all_connected: 0,
            ..Default::default()
        };
        let mut dials = 0;
        for member in &quorum.members {
            let plan = topology
                .ensure_connections(&quorum, Some(&member.id), false, &sporks)
                .unwrap();
            dials += plan.connections.len();
            assert_eq!(plan.relay_members, relay_members(&quorum.member_ids(), &member.id, true));
        }
        assert_eq!(dials, 15);
    }

    #[test]
    fn test_ensure_connections_watcher() {
        let topology = Topology::new(hash(b"seed"));
        let quorum = quorum(5);
        let outsider = hash(b"outsider");

        // Non-members without watching need nothing
        assert!(topology
            .ensure_connections(&quorum, Some(&outsider), false, &Sporks::default())
            .is_none());
        assert!(topology
            .ensure_connections(&quorum, None, false, &Sporks::default())
            .is_none());

        // Watchers get one connection which is also their relay member
        let plan = topology
            .ensure_connections(&quorum, None, true, &Sporks::default())
            .unwrap();
        assert!(!plan.is_member);
        assert_eq!(plan.connections.len(), 1);
        assert_eq!(plan.connections, plan.relay_members);
    }

    #[test]
    fn test_ensure_connections_empty_quorum() {
        let topology = Topology::new(hash(b"seed"));
        let quorum = quorum(0);
        assert!(topology
            .ensure_connections(&quorum, None, true, &Sporks::default())
            .is_none());
    }

    #[test]
    fn test_probe_connections() {
        let quorum = quorum(4);
        let local = quorum.members[0].id;
        let recent = quorum.members[1].id;
        let stale = quorum.members[2].id;
        let now = Duration::from_secs(1_000_000);
        let last = |id: &Digest| {
            if *id == recent {
                Some(now - Duration::from_secs(60))
            } else if *id == stale {
                Some(now - PROBE_INTERVAL)
            } else {
                None
            }
        };

        // Disabled by default
        assert!(probe_connections(&quorum, &local, &Sporks::default(), now, last).is_empty());

        let sporks = Sporks {
            quorum_pose: 0,
            ..Default::default()
        };
        let probes = probe_connections(&quorum, &local, &sporks, now, last);
        let expected: BTreeSet<_> = [stale, quorum.members[3].id].into();
        assert_eq!(probes, expected);
    }
}
