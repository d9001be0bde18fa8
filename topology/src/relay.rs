use llmq_utils::{log2_floor, Digest, Sha256};
use std::collections::BTreeSet;

/// Returns the indices member `index` relays to in a quorum of `n` members.
///
/// Neighbors sit at offsets `2^k` for `k` in `0..=max(1, floor(log2(n - 1)))`, so the largest
/// offset reaches at least half way round the ring: 5 members relay to offsets {1, 2, 4} and
/// 10 members to {1, 2, 4, 8}. Stopping one doubling earlier would keep the fan-out a
/// connection smaller but leaves 5 members at {1, 2}, two hops away from half of the ring.
///
/// The result never contains `index` itself, so a single-member quorum yields an empty set.
pub fn relay_neighbors(index: usize, n: usize) -> BTreeSet<usize> {
    let mut neighbors = BTreeSet::new();
    if n <= 1 {
        return neighbors;
    }
    let max_k = log2_floor(n - 1).max(1);
    for k in 0..=max_k {
        let neighbor = (index + (1usize << k)) % n;
        if neighbor != index {
            neighbors.insert(neighbor);
        }
    }
    neighbors
}

/// Returns which of `a` and `b` initiates the connection between them.
///
/// Picking `min(a, b)` would bias dialing towards numerically small identifiers. Instead, both
/// sides are scored by `H(min(a, b), max(a, b), x)` and the side with the smaller score dials.
pub fn responsible_initiator(a: &Digest, b: &Digest) -> Digest {
    let (low, high) = if a < b { (a, b) } else { (b, a) };
    let score = |x: &Digest| {
        Sha256::new()
            .update(low)
            .update(high)
            .update(x)
            .finalize()
    };
    if score(a) < score(b) {
        *a
    } else {
        *b
    }
}

fn outbound(members: &[Digest], index: usize) -> impl Iterator<Item = Digest> + '_ {
    let id = members[index];
    relay_neighbors(index, members.len())
        .into_iter()
        .map(move |neighbor| members[neighbor])
        .filter(move |neighbor| *neighbor != id)
}

/// Returns the relay-ring members `for_member` keeps connections with.
///
/// With `only_outbound`, only the members `for_member` relays to are returned. Otherwise the set
/// also includes every member that relays to `for_member`.
pub fn relay_members(
    members: &[Digest],
    for_member: &Digest,
    only_outbound: bool,
) -> BTreeSet<Digest> {
    let mut result = BTreeSet::new();
    for (index, id) in members.iter().enumerate() {
        if id == for_member {
            result.extend(outbound(members, index));
        } else if !only_outbound && outbound(members, index).any(|peer| peer == *for_member) {
            result.insert(*id);
        }
    }
    result
}

/// Returns the members `for_member` should be connected to.
///
/// When `all_connected` is set every other member is returned (filtered to those `for_member`
/// must dial if `only_outbound`). Otherwise this is [relay_members].
pub fn quorum_connections(
    members: &[Digest],
    for_member: &Digest,
    only_outbound: bool,
    all_connected: bool,
) -> BTreeSet<Digest> {
    if !all_connected {
        return relay_members(members, for_member, only_outbound);
    }
    members
        .iter()
        .filter(|id| *id != for_member)
        .filter(|id| !only_outbound || responsible_initiator(for_member, id) == **id)
        .copied()
        .collect()
}
