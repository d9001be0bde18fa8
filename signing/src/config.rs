use llmq_storage::{Storage, Store};
use llmq_types::Consensus;
use llmq_utils::Digest;
use std::{sync::Arc, time::Duration};

/// Default retention of recovered signatures and votes (one week).
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(60 * 60 * 24 * 7);

/// Default number of distinct sessions verified per batch.
pub const DEFAULT_MAX_BATCH_SESSIONS: usize = 32;

/// Default interval between cleanups.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5);

/// Default delay between the first queued candidate and its batch.
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_millis(100);

/// Default number of blocks below the signing height quorums are selected at.
pub const DEFAULT_SIGN_HEIGHT_OFFSET: u64 = 8;

/// Configuration for the [Engine](super::Engine).
pub struct Config<S: Storage, D, V, G, R, C> {
    /// Member identifier of the local node, if it operates a masternode.
    pub identity: Option<Digest>,

    /// Network settings (enabled quorum types, activation heights).
    pub consensus: Consensus,

    pub directory: D,
    pub verifier: V,
    pub signer: G,
    pub scorer: R,
    pub clock: C,

    /// Store shared with readers holding a [Mailbox](super::Mailbox).
    pub store: Arc<Store<S>>,

    /// The maximum size of the mailbox backlog.
    pub mailbox_size: usize,

    /// Maximum number of distinct `(peer, session)` pairs collected into one batch.
    pub max_batch_sessions: usize,

    /// Age after which recovered signatures, votes and pending candidates are dropped.
    pub max_age: Duration,

    pub cleanup_interval: Duration,

    /// Delay between the first queued candidate and verification of its batch.
    pub idle_interval: Duration,

    /// Number of blocks below the signing height at which the signing quorum is selected.
    pub sign_height_offset: u64,
}
