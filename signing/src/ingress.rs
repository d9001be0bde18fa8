use crate::{is_quorum_active, Directory, Error, Listener, ListenerId, Listeners, Peer};
use futures::{
    channel::{mpsc, oneshot},
    SinkExt,
};
use llmq_storage::{Record, Storage, Store};
use llmq_types::{QuorumType, RecoveredSignature};
use llmq_utils::Digest;
use prometheus_client::encoding::EncodeLabelValue;
use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

/// A request to sign a message in a session, if the local node is a member of the responsible
/// quorum.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignRequest {
    pub quorum_type: QuorumType,
    pub id: Digest,
    pub msg_hash: Digest,

    /// Sign with this quorum instead of selecting one.
    pub quorum_hash: Option<Digest>,

    /// Sign again even if a vote for the same message exists (and re-announce known shares).
    pub allow_re_sign: bool,

    /// Sign even if a vote for a different message exists.
    pub allow_diff_msg_hash_signing: bool,
}

impl SignRequest {
    pub fn new(quorum_type: QuorumType, id: Digest, msg_hash: Digest) -> Self {
        Self {
            quorum_type,
            id,
            msg_hash,
            quorum_hash: None,
            allow_re_sign: false,
            allow_diff_msg_hash_signing: false,
        }
    }
}

/// Decision taken for a [SignRequest].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EncodeLabelValue)]
pub enum SignOutcome {
    /// The share layer was asked to sign.
    Signing,
    /// A recovered signature already exists for the session.
    AlreadyRecovered,
    /// The local node already voted for the same message.
    AlreadyVoted,
    /// The local node already voted for a different message.
    ConflictingVote,
    /// The local node has no member identity.
    NoIdentity,
    /// No quorum could be selected (or the requested quorum is unknown).
    NoQuorum,
    /// The local node is not a valid member of the selected quorum.
    NotMember,
}

/// Message types that can be sent to the [Mailbox].
pub enum Message<P> {
    /// A candidate signature received from a peer.
    Receive {
        peer: P,
        signature: RecoveredSignature,
    },

    /// A signature extracted from an already-verified structure.
    Reconstructed { signature: RecoveredSignature },

    Sign {
        request: SignRequest,
        responder: oneshot::Sender<SignOutcome>,
    },

    /// Strip a recovered signature down to its tombstone.
    Truncate { quorum_type: QuorumType, id: Digest },

    /// Drop every pending candidate from a peer.
    Disconnected { peer: P },

    /// Stop after the current batch.
    Stop { responder: oneshot::Sender<()> },
}

/// Ingress mailbox for [Engine](super::Engine).
///
/// Writes are queued for the engine. Reads are answered directly from the shared store.
#[derive(Clone)]
pub struct Mailbox<S: Storage, D: Directory, P: Peer> {
    sender: mpsc::Sender<Message<P>>,
    store: Arc<Store<S>>,
    directory: D,
    listeners: Listeners,

    /// Content hashes of reconstructed signatures queued but not yet processed.
    reconstructed: Arc<Mutex<HashSet<Digest>>>,
}

impl<S: Storage, D: Directory, P: Peer> Mailbox<S, D, P> {
    pub(super) fn new(
        sender: mpsc::Sender<Message<P>>,
        store: Arc<Store<S>>,
        directory: D,
        listeners: Listeners,
        reconstructed: Arc<Mutex<HashSet<Digest>>>,
    ) -> Self {
        Self {
            sender,
            store,
            directory,
            listeners,
            reconstructed,
        }
    }

    async fn send(&mut self, message: Message<P>) -> Result<(), Error> {
        self.sender
            .send(message)
            .await
            .map_err(|_| Error::MailboxClosed)
    }

    /// Queue a candidate signature received from `peer` for verification.
    pub async fn receive(&mut self, peer: P, signature: RecoveredSignature) -> Result<(), Error> {
        self.send(Message::Receive { peer, signature }).await
    }

    /// Queue a signature that is already known to be valid.
    ///
    /// It bypasses verification but is still checked for duplicates and conflicts.
    pub async fn push_reconstructed(&mut self, signature: RecoveredSignature) -> Result<(), Error> {
        let hash = signature.hash();
        self.reconstructed.lock().unwrap().insert(hash);
        let result = self.send(Message::Reconstructed { signature }).await;
        if result.is_err() {
            self.reconstructed.lock().unwrap().remove(&hash);
        }
        result
    }

    /// Ask the engine to sign `request` if the local node is a member of the responsible quorum.
    ///
    /// Returns once the request is queued. The receiver resolves with the engine's decision and
    /// may be dropped by callers that do not care.
    pub async fn sign_if_member(
        &mut self,
        request: SignRequest,
    ) -> Result<oneshot::Receiver<SignOutcome>, Error> {
        let (responder, receiver) = oneshot::channel();
        self.send(Message::Sign { request, responder }).await?;
        Ok(receiver)
    }

    /// Replace the recovered signature for `(quorum_type, id)` with its tombstone.
    ///
    /// Only safe once another mechanism guarantees no conflicting signature can matter.
    pub async fn truncate(&mut self, quorum_type: QuorumType, id: Digest) -> Result<(), Error> {
        self.send(Message::Truncate { quorum_type, id }).await
    }

    /// Drop all pending candidates from `peer`.
    pub async fn disconnected(&mut self, peer: P) -> Result<(), Error> {
        self.send(Message::Disconnected { peer }).await
    }

    /// Stop the engine once its current batch completes.
    pub async fn stop(&mut self) -> Result<(), Error> {
        let (responder, receiver) = oneshot::channel();
        self.send(Message::Stop { responder }).await?;
        receiver.await.map_err(|_| Error::MailboxClosed)
    }

    pub fn register_listener(&self, listener: Arc<dyn Listener>) -> ListenerId {
        self.listeners.register(listener)
    }

    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        self.listeners.unregister(id)
    }

    pub fn has_recovered_signature(
        &self,
        quorum_type: QuorumType,
        id: &Digest,
        msg_hash: &Digest,
    ) -> bool {
        self.store.has_recovered_signature(quorum_type, id, msg_hash)
    }

    pub fn has_recovered_signature_for_id(&self, quorum_type: QuorumType, id: &Digest) -> bool {
        self.store.has_recovered_signature_for_id(quorum_type, id)
    }

    pub fn has_recovered_signature_for_session(&self, sign_hash: &Digest) -> bool {
        self.store.has_recovered_signature_for_session(sign_hash)
    }

    /// Returns the recovered signature for `(quorum_type, id)`, unless absent or truncated.
    pub fn get_recovered_signature(
        &self,
        quorum_type: QuorumType,
        id: &Digest,
    ) -> Result<Option<RecoveredSignature>, Error> {
        Ok(self
            .store
            .get_by_id(quorum_type, id)?
            .and_then(Record::into_signature))
    }

    /// Returns whether a signature was recovered for `(quorum_type, id)` over a message other
    /// than `msg_hash`.
    ///
    /// Truncated sessions never conflict: truncation is only requested once the session is
    /// final.
    pub fn is_conflicting(
        &self,
        quorum_type: QuorumType,
        id: &Digest,
        msg_hash: &Digest,
    ) -> Result<bool, Error> {
        if !self.store.has_recovered_signature_for_id(quorum_type, id) {
            return Ok(false);
        }
        Ok(match self.store.get_by_id(quorum_type, id)? {
            Some(Record::Full(signature)) => signature.msg_hash != *msg_hash,
            Some(Record::Tombstone(_)) | None => false,
        })
    }

    /// Returns the message the local node voted for in `(quorum_type, id)`.
    pub fn get_vote_for_id(
        &self,
        quorum_type: QuorumType,
        id: &Digest,
    ) -> Result<Option<Digest>, Error> {
        Ok(self.store.get_vote_for_id(quorum_type, id)?)
    }

    /// Returns whether the signature with `content_hash` is stored or queued for processing.
    pub fn already_have(&self, content_hash: &Digest) -> bool {
        self.reconstructed.lock().unwrap().contains(content_hash)
            || self.store.has_recovered_signature_for_hash(content_hash)
    }

    /// Returns the stored signature with `content_hash` if it may still be relayed to peers.
    pub fn get_for_relay(
        &self,
        content_hash: &Digest,
    ) -> Result<Option<RecoveredSignature>, Error> {
        let Some(signature) = self
            .store
            .get_by_hash(content_hash)?
            .and_then(Record::into_signature)
        else {
            return Ok(None);
        };

        // Peers would reject signatures of quorums that rotated out
        if !is_quorum_active(&self.directory, signature.quorum_type, &signature.quorum_hash) {
            return Ok(None);
        }
        Ok(Some(signature))
    }
}
