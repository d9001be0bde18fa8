//! Derive deterministic quorum connection topologies.
//!
//! Every function in this crate is pure over its inputs: given the same canonical member list
//! (and, for watch connections, the same process seed) every node computes the same result
//! without any coordination. Nothing here is cached, so callers can safely re-evaluate after a
//! reorganization changes the chain tip.
//!
//! # Relay Ring
//!
//! Member `i` of an `n`-member quorum relays to the members at `(i + 2^k) mod n` for
//! `k = 0..=max(1, floor(log2(n - 1)))`, which yields logarithmic fan-out while keeping the ring
//! connected when individual links fail. Connections are bidirectional: a member also keeps the
//! members that relay to it.
//!
//! # Outbound Responsibility
//!
//! For any pair of members exactly one side dials the other (see [responsible_initiator]).
//!
//! # Watch Connections
//!
//! Nodes that observe a quorum without being a member connect to a reproducible random sample of
//! its members, derived from a seed owned by a [Topology] instance.

mod connections;
pub use connections::{probe_connections, ConnectionPlan, Topology, PROBE_INTERVAL};
mod enablement;
pub use enablement::{
    enabled_quorum_types, is_quorum_rotation_enabled, is_quorum_type_enabled, ChainTip, Sporks,
    SPORK_DISABLED,
};
mod relay;
pub use relay::{quorum_connections, relay_members, relay_neighbors, responsible_initiator};
