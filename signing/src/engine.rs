use crate::{
    config::Config,
    ingress::{Mailbox, Message, SignOutcome, SignRequest},
    is_quorum_active,
    listeners::Listeners,
    metrics::Metrics,
    pending::{Candidate, Pending},
    select_quorum, Directory, Error, Item, Outcome, Scorer, Signer, Verifier,
};
use futures::{channel::mpsc, StreamExt};
use llmq_storage::{Record, Storage, Store};
use llmq_types::{Consensus, Quorum, QuorumType, RecoveredSignature, Vote, MAX_SIGNATURE_LENGTH};
use llmq_utils::{Clock, Digest};
use prometheus_client::registry::Registry;
use rand::{rngs::StdRng, SeedableRng};
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::{Duration, UNIX_EPOCH},
};
use tokio::{
    select,
    task::{spawn_blocking, JoinHandle},
    time::{sleep_until, Instant},
};
use tracing::{debug, error, trace, warn};

/// Instance of the signing coordinator.
///
/// It is responsible for:
/// - Verifying candidate signatures received from peers in batches
/// - Persisting accepted signatures and notifying listeners
/// - Deciding whether (and with which quorum) the local node signs a session
/// - Expiring old signatures, votes and pending candidates
pub struct Engine<S: Storage, D: Directory, V: Verifier, G: Signer, R: Scorer, C: Clock> {
    ////////////////////////////////////////
    // Interfaces
    ////////////////////////////////////////
    directory: D,
    verifier: V,
    signer: G,
    scorer: R,
    clock: C,
    store: Arc<Store<S>>,

    ////////////////////////////////////////
    // Configuration
    ////////////////////////////////////////
    identity: Option<Digest>,
    consensus: Consensus,
    max_batch_sessions: usize,
    max_age: Duration,
    cleanup_interval: Duration,
    idle_interval: Duration,
    sign_height_offset: u64,

    ////////////////////////////////////////
    // Messaging
    ////////////////////////////////////////
    mailbox_receiver: mpsc::Receiver<Message<R::Peer>>,
    listeners: Listeners,

    ////////////////////////////////////////
    // State
    ////////////////////////////////////////
    /// Candidates from peers awaiting verification.
    pending: Pending<R::Peer>,

    /// Content hashes of reconstructed signatures queued in the mailbox.
    reconstructed: Arc<Mutex<HashSet<Digest>>>,

    rng: StdRng,

    ////////////////////////////////////////
    // Metrics
    ////////////////////////////////////////
    metrics: Metrics,
}

impl<S, D, V, G, R, C> Engine<S, D, V, G, R, C>
where
    S: Storage,
    D: Directory,
    V: Verifier,
    G: Signer,
    R: Scorer,
    C: Clock,
{
    /// Creates a new engine with the given configuration.
    /// Returns the engine and a mailbox for sending messages to the engine.
    pub fn new(
        cfg: Config<S, D, V, G, R, C>,
        registry: &mut Registry,
    ) -> (Self, Mailbox<S, D, R::Peer>) {
        assert!(cfg.max_batch_sessions > 0, "max_batch_sessions must be positive");
        assert!(!cfg.cleanup_interval.is_zero(), "cleanup_interval must be positive");

        let (mailbox_sender, mailbox_receiver) = mpsc::channel(cfg.mailbox_size);
        let listeners = Listeners::default();
        let reconstructed = Arc::new(Mutex::new(HashSet::new()));
        let mailbox = Mailbox::new(
            mailbox_sender,
            cfg.store.clone(),
            cfg.directory.clone(),
            listeners.clone(),
            reconstructed.clone(),
        );
        let metrics = Metrics::init(registry);

        let engine = Self {
            directory: cfg.directory,
            verifier: cfg.verifier,
            signer: cfg.signer,
            scorer: cfg.scorer,
            clock: cfg.clock,
            store: cfg.store,
            identity: cfg.identity,
            consensus: cfg.consensus,
            max_batch_sessions: cfg.max_batch_sessions,
            max_age: cfg.max_age,
            cleanup_interval: cfg.cleanup_interval,
            idle_interval: cfg.idle_interval,
            sign_height_offset: cfg.sign_height_offset,
            mailbox_receiver,
            listeners,
            pending: Pending::default(),
            reconstructed,
            rng: StdRng::from_entropy(),
            metrics,
        };
        (engine, mailbox)
    }

    /// Starts the engine on the current runtime.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Inner run loop called by `start`.
    async fn run(mut self) {
        let mut next_cleanup = Instant::now() + self.cleanup_interval;
        let mut process_at: Option<Instant> = None;
        loop {
            self.metrics.pending.set(self.pending.len() as i64);
            let deadline = process_at.map_or(next_cleanup, |at| at.min(next_cleanup));

            select! {
                biased;

                // Verify pending candidates and run periodic cleanup
                _ = sleep_until(deadline) => {
                    let now = Instant::now();
                    if process_at.is_some_and(|at| at <= now) {
                        process_at = None;
                        let retry = match self.process_pending().await {
                            Ok(()) => now,
                            Err(err) => {
                                error!(?err, "failed to process pending signatures");
                                now + self.idle_interval
                            }
                        };
                        if !self.pending.is_empty() {
                            process_at = Some(retry);
                        }
                    }
                    if next_cleanup <= now {
                        if let Err(err) = self.cleanup() {
                            error!(?err, "cleanup failed");
                        }
                        next_cleanup = now + self.cleanup_interval;
                    }
                },

                // Handle mailbox messages
                mail = self.mailbox_receiver.next() => {
                    let Some(message) = mail else {
                        debug!("mailbox closed");
                        break;
                    };
                    match message {
                        Message::Receive { peer, signature } => {
                            trace!(?peer, "mailbox: receive");
                            self.handle_receive(peer, signature);
                            if process_at.is_none() && !self.pending.is_empty() {
                                process_at = Some(Instant::now() + self.idle_interval);
                            }
                        }
                        Message::Reconstructed { signature } => {
                            trace!("mailbox: reconstructed");
                            if let Err(err) = self.process_recovered(&signature) {
                                error!(?err, "failed to process reconstructed signature");
                            }
                        }
                        Message::Sign { request, responder } => {
                            trace!("mailbox: sign");
                            match self.sign_if_member(&request) {
                                Ok(outcome) => {
                                    self.metrics.sign_request(outcome);
                                    let _ = responder.send(outcome);
                                }
                                Err(err) => error!(?err, "failed to handle sign request"),
                            }
                        }
                        Message::Truncate { quorum_type, id } => {
                            trace!("mailbox: truncate");
                            if let Err(err) = self.store.truncate(quorum_type, &id) {
                                error!(?err, %quorum_type, %id, "failed to truncate");
                            }
                        }
                        Message::Disconnected { peer } => {
                            let dropped = self.pending.remove_peer(&peer);
                            debug!(?peer, dropped, "peer disconnected");
                        }
                        Message::Stop { responder } => {
                            debug!("stopping");
                            let _ = responder.send(());
                            break;
                        }
                    }
                },
            }
        }
    }

    ////////////////////////////////////////
    // Ingress
    ////////////////////////////////////////

    /// Checks that can be performed before verification.
    fn pre_verify(&self, signature: &RecoveredSignature) -> Result<(), Error> {
        let quorum_type = signature.quorum_type;
        if !self.consensus.llmqs.contains(&quorum_type) {
            return Err(Error::QuorumTypeDisabled(quorum_type));
        }
        if signature.signature.len() > MAX_SIGNATURE_LENGTH {
            return Err(Error::SignatureTooLarge(signature.signature.len()));
        }
        if self
            .directory
            .get(quorum_type, &signature.quorum_hash)
            .is_none()
        {
            return Err(Error::UnknownQuorum(signature.quorum_hash));
        }
        if !is_quorum_active(&self.directory, quorum_type, &signature.quorum_hash) {
            return Err(Error::InactiveQuorum(signature.quorum_hash));
        }
        Ok(())
    }

    fn handle_receive(&mut self, peer: R::Peer, signature: RecoveredSignature) {
        self.metrics.received.inc();
        if let Err(err) = self.pre_verify(&signature) {
            if err.attributable() {
                warn!(?peer, ?err, "invalid recovered signature");
                self.metrics.invalid.inc();
                self.scorer.penalize(peer, &err);
            } else {
                debug!(?peer, ?err, "dropping recovered signature");
            }
            return;
        }

        let candidate = Candidate::new(signature, self.clock.current());
        if self.reconstructed.lock().unwrap().contains(&candidate.hash)
            || self
                .store
                .has_recovered_signature_for_hash(&candidate.hash)
        {
            trace!(?peer, hash = %candidate.hash, "already have recovered signature");
            self.metrics.duplicates.inc();
            return;
        }
        self.pending.push(peer, candidate);
    }

    ////////////////////////////////////////
    // Verification
    ////////////////////////////////////////

    /// Verify one batch of pending candidates and process those that pass.
    async fn process_pending(&mut self) -> Result<(), Error> {
        let store = self.store.clone();
        let batch = self
            .pending
            .collect(self.max_batch_sessions, &mut self.rng, |candidate| {
                store.has_recovered_signature_for_hash(&candidate.hash)
            });

        // Resolve each quorum once per batch, dropping candidates of unknown or inactive quorums
        let mut quorums: HashMap<(QuorumType, Digest), Option<Arc<Quorum>>> = HashMap::new();
        let mut items = Vec::new();
        let mut owners = Vec::new();
        for (peer, candidates) in batch {
            for candidate in candidates {
                let signature = &candidate.signature;
                let (quorum_type, quorum_hash) = (signature.quorum_type, signature.quorum_hash);
                let quorum = quorums
                    .entry((quorum_type, quorum_hash))
                    .or_insert_with(|| {
                        self.directory
                            .get(quorum_type, &quorum_hash)
                            .filter(|_| {
                                is_quorum_active(&self.directory, quorum_type, &quorum_hash)
                            })
                    });
                let Some(quorum) = quorum else {
                    debug!(?peer, %quorum_hash, "quorum no longer active, dropping signature");
                    continue;
                };
                items.push(Item {
                    public_key: quorum.public_key.clone(),
                    sign_hash: signature.sign_hash(),
                    signature: signature.signature.clone(),
                });
                owners.push((peer.clone(), candidate));
            }
        }
        if items.is_empty() {
            return Ok(());
        }

        self.metrics.batch_size.observe(items.len() as f64);
        let start = std::time::Instant::now();
        let count = items.len();
        let verifier = self.verifier.clone();
        let results = match spawn_blocking(move || verifier.verify_batch(&items)).await {
            Ok(results) => results,
            Err(err) => {
                for (peer, candidate) in owners {
                    self.pending.push(peer, candidate);
                }
                return Err(Error::Verifier(err));
            }
        };
        self.metrics
            .verify_latency
            .observe(start.elapsed().as_secs_f64());
        debug_assert_eq!(results.len(), count);

        // A peer that sent any invalid candidate has its whole contribution discarded
        let mut bad = HashSet::new();
        for (index, (peer, candidate)) in owners.iter().enumerate() {
            if !results.get(index).copied().unwrap_or(false) {
                warn!(?peer, hash = %candidate.hash, "invalid recovered signature");
                self.metrics.invalid.inc();
                bad.insert(peer.clone());
            }
        }
        for peer in &bad {
            self.scorer.penalize(peer.clone(), &Error::InvalidSignature);
        }

        // Candidates that could not be persisted are queued again rather than dropped
        let mut processed = HashSet::new();
        let mut failure = None;
        for (peer, candidate) in owners {
            if bad.contains(&peer) {
                continue;
            }
            self.metrics.verified.inc();
            if !processed.insert(candidate.hash) {
                continue;
            }
            if let Err(err) = self.process_recovered(&candidate.signature) {
                warn!(?peer, hash = %candidate.hash, ?err, "failed to persist recovered signature");
                self.pending.push(peer, candidate);
                failure.get_or_insert(err);
            }
        }
        failure.map_or(Ok(()), Err)
    }

    ////////////////////////////////////////
    // Acceptance
    ////////////////////////////////////////

    /// Persist a verified signature and notify listeners, unless it duplicates or conflicts
    /// with one already recovered.
    fn process_recovered(&mut self, signature: &RecoveredSignature) -> Result<(), Error> {
        let hash = signature.hash();
        let result = self.accept(signature, &hash);
        self.reconstructed.lock().unwrap().remove(&hash);
        result
    }

    fn accept(&mut self, signature: &RecoveredSignature, hash: &Digest) -> Result<(), Error> {
        let (quorum_type, id) = (signature.quorum_type, signature.id);
        if self.store.has_recovered_signature_for_hash(hash) {
            trace!(%hash, "recovered signature already stored");
            self.metrics.duplicates.inc();
            return Ok(());
        }
        if self.store.has_recovered_signature_for_id(quorum_type, &id) {
            match self.store.get_by_id(quorum_type, &id)? {
                Some(Record::Full(stored)) if stored.sign_hash() == signature.sign_hash() => {
                    debug!(%quorum_type, %id, "already recovered session");
                    self.metrics.duplicates.inc();
                    return Ok(());
                }
                Some(Record::Full(stored)) => {
                    warn!(
                        %quorum_type,
                        %id,
                        stored = %stored.msg_hash,
                        received = %signature.msg_hash,
                        "conflicting recovered signature"
                    );
                    self.metrics.conflicts.inc();
                    return Ok(());
                }
                Some(Record::Tombstone(_)) => {
                    debug!(%quorum_type, %id, "session already recovered and truncated");
                    self.metrics.duplicates.inc();
                    return Ok(());
                }
                None => {}
            }
        }

        self.store.write(signature, self.clock.current())?;
        self.metrics.recovered.inc();
        let outcomes = self.listeners.notify(signature);
        let accepted = outcomes
            .iter()
            .filter(|outcome| **outcome == Outcome::Accepted)
            .count();
        debug!(%quorum_type, %id, %hash, accepted, "recovered signature");
        Ok(())
    }

    ////////////////////////////////////////
    // Signing
    ////////////////////////////////////////

    fn sign_if_member(&mut self, request: &SignRequest) -> Result<SignOutcome, Error> {
        let Some(identity) = self.identity else {
            return Ok(SignOutcome::NoIdentity);
        };
        let SignRequest {
            quorum_type,
            id,
            msg_hash,
            quorum_hash,
            allow_re_sign,
            allow_diff_msg_hash_signing,
        } = *request;
        let vote = Vote {
            quorum_type,
            id,
            msg_hash,
        };

        // A vote is never silently replaced
        let record_vote = match self.store.get_vote_for_id(quorum_type, &id)? {
            Some(previous) if previous != msg_hash => {
                if !allow_diff_msg_hash_signing {
                    warn!(%quorum_type, %id, %previous, %msg_hash, "voted for other message");
                    return Ok(SignOutcome::ConflictingVote);
                }
                warn!(
                    %quorum_type,
                    %id,
                    %previous,
                    %msg_hash,
                    "already voted for a different message, signing anyway"
                );
                true
            }
            Some(_) => {
                if !allow_re_sign {
                    debug!(%quorum_type, %id, "already voted");
                    return Ok(SignOutcome::AlreadyVoted);
                }
                debug!(%quorum_type, %id, "already voted, signing again");
                false
            }
            None => true,
        };

        if self.store.has_recovered_signature_for_id(quorum_type, &id) {
            debug!(%quorum_type, %id, "already recovered");
            return Ok(SignOutcome::AlreadyRecovered);
        }

        // Nothing is recorded until the local node is known to sign, so a request made before
        // the quorum is available can be retried
        let quorum = match quorum_hash {
            Some(quorum_hash) => self.directory.get(quorum_type, &quorum_hash),
            None => select_quorum(
                &self.directory,
                &self.consensus,
                quorum_type,
                &id,
                None,
                self.sign_height_offset,
            ),
        };
        let Some(quorum) = quorum else {
            debug!(%quorum_type, %id, "failed to select quorum");
            return Ok(SignOutcome::NoQuorum);
        };
        if !quorum.is_valid_member(&identity) {
            trace!(%quorum_type, %id, quorum = %quorum.quorum_hash, "not a valid member");
            return Ok(SignOutcome::NotMember);
        }
        if record_vote {
            self.store.write_vote(&vote, self.clock.current())?;
        }

        if allow_re_sign {
            self.signer.reannounce(quorum.clone(), id, msg_hash);
        }
        debug!(%quorum_type, %id, quorum = %quorum.quorum_hash, "signing");
        self.signer.sign(quorum, id, msg_hash);
        Ok(SignOutcome::Signing)
    }

    ////////////////////////////////////////
    // Cleanup
    ////////////////////////////////////////

    fn cleanup(&mut self) -> Result<(), Error> {
        let now = self.clock.current();
        let removed = self.store.cleanup(self.max_age, now)?;
        let cutoff = now.checked_sub(self.max_age).unwrap_or(UNIX_EPOCH);
        let dropped = self.pending.remove_older_than(cutoff);
        if removed > 0 || dropped > 0 {
            debug!(removed, dropped, "cleaned up");
        }
        Ok(())
    }
}
