//! Candidates received from peers that have not been verified yet.

use crate::Peer;
use llmq_types::RecoveredSignature;
use llmq_utils::Digest;
use rand::{seq::SliceRandom, Rng};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
    time::SystemTime,
};

/// A candidate signature awaiting verification.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub signature: Arc<RecoveredSignature>,

    /// Content hash of `signature`.
    pub hash: Digest,
    pub received: SystemTime,
}

impl Candidate {
    pub fn new(signature: RecoveredSignature, received: SystemTime) -> Self {
        let hash = signature.hash();
        Self {
            signature: Arc::new(signature),
            hash,
            received,
        }
    }
}

/// Per-peer FIFO queues of [Candidate]s.
pub struct Pending<P: Peer> {
    queues: HashMap<P, VecDeque<Candidate>>,
    len: usize,
}

impl<P: Peer> Default for Pending<P> {
    fn default() -> Self {
        Self {
            queues: HashMap::new(),
            len: 0,
        }
    }
}

impl<P: Peer> Pending<P> {
    pub fn push(&mut self, peer: P, candidate: Candidate) {
        self.queues.entry(peer).or_default().push_back(candidate);
        self.len += 1;
    }

    /// Drop every candidate queued by `peer`, returning how many were dropped.
    pub fn remove_peer(&mut self, peer: &P) -> usize {
        let removed = self.queues.remove(peer).map_or(0, |queue| queue.len());
        self.len -= removed;
        removed
    }

    /// Drop every candidate received before `cutoff`, returning how many were dropped.
    pub fn remove_older_than(&mut self, cutoff: SystemTime) -> usize {
        let before = self.len;
        self.queues.retain(|_, queue| {
            queue.retain(|candidate| candidate.received >= cutoff);
            !queue.is_empty()
        });
        self.len = self.queues.values().map(VecDeque::len).sum();
        before - self.len
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Take candidates for one verification batch.
    ///
    /// Peers are visited round-robin in random order, taking the oldest candidate of each peer
    /// per visit, until `max_sessions` distinct `(peer, sign hash)` pairs are collected or every
    /// queue is drained. Candidates for which `known` returns `true` are dropped without counting
    /// towards the limit.
    pub fn collect<R: Rng>(
        &mut self,
        max_sessions: usize,
        rng: &mut R,
        mut known: impl FnMut(&Candidate) -> bool,
    ) -> HashMap<P, Vec<Candidate>> {
        let mut peers: Vec<P> = self.queues.keys().cloned().collect();
        peers.shuffle(rng);

        let mut sessions = HashSet::new();
        let mut collected: HashMap<P, Vec<Candidate>> = HashMap::new();
        let mut index = 0;
        while !peers.is_empty() && sessions.len() < max_sessions {
            let peer = &peers[index];
            let queue = self.queues.get_mut(peer);
            let Some(candidate) = queue.and_then(|queue| queue.pop_front()) else {
                peers.remove(index);
                if peers.is_empty() {
                    break;
                }
                index %= peers.len();
                continue;
            };
            self.len -= 1;
            if !known(&candidate) {
                sessions.insert((peer.clone(), candidate.signature.sign_hash()));
                collected.entry(peer.clone()).or_default().push(candidate);
            }
            index = (index + 1) % peers.len();
        }

        self.queues.retain(|_, queue| !queue.is_empty());
        collected
    }
}
