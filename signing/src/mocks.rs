//! In-memory collaborators for exercising the [Engine](crate::Engine).

use crate::{Item, Listener, Outcome, Peer};
use bytes::Bytes;
use llmq_storage::{storage::memory, Blob as _, Error as StorageError, Storage as _};
use llmq_types::{sign_hash, Member, Quorum, QuorumType, RecoveredSignature};
use llmq_utils::{hash, Digest, Sha256};
use std::{
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

/// Identifier of the `i`-th masternode.
pub fn member_id(i: usize) -> Digest {
    Sha256::new().update(b"member").update(&(i as u64).to_be_bytes()).finalize()
}

/// Build a quorum of `size` members (`member_id(0..size)`), all valid.
pub fn quorum(
    quorum_type: QuorumType,
    height: u64,
    quorum_index: u32,
    size: usize,
) -> Arc<Quorum> {
    let quorum_hash = Sha256::new()
        .update(&[quorum_type as u8])
        .update(&height.to_be_bytes())
        .update(&quorum_index.to_be_bytes())
        .finalize();
    let members = (0..size)
        .map(|i| Member {
            id: member_id(i),
            address: SocketAddr::from(([127, 0, 0, 1], 10_000 + i as u16)),
        })
        .collect();
    Arc::new(Quorum {
        quorum_type,
        quorum_hash,
        quorum_index,
        height,
        public_key: Bytes::from(hash(&[b"public".as_slice(), &quorum_hash[..]].concat()).to_vec()),
        members,
        valid_members: vec![true; size],
    })
}

fn signature_for(public_key: &[u8], sign_hash: &Digest) -> Bytes {
    Bytes::from(Sha256::new().update(public_key).update(sign_hash).finalize().to_vec())
}

/// Produce the signature [Verifier] accepts for `(quorum, id, msg_hash)`.
pub fn sign(quorum: &Quorum, id: &Digest, msg_hash: &Digest) -> Bytes {
    let sign_hash = sign_hash(quorum.quorum_type, &quorum.quorum_hash, id, msg_hash);
    signature_for(&quorum.public_key, &sign_hash)
}

/// Produce a valid recovered signature for `(quorum, id, msg_hash)`.
pub fn recovered(quorum: &Quorum, id: &Digest, msg_hash: &Digest) -> RecoveredSignature {
    RecoveredSignature {
        quorum_type: quorum.quorum_type,
        quorum_hash: quorum.quorum_hash,
        id: *id,
        msg_hash: *msg_hash,
        signature: sign(quorum, id, msg_hash),
    }
}

#[derive(Default)]
struct DirectoryState {
    tip: u64,
    quorums: Vec<Arc<Quorum>>,
}

/// A [crate::Directory] whose quorums and tip are set by the test.
#[derive(Clone, Default)]
pub struct Directory {
    state: Arc<Mutex<DirectoryState>>,
}

impl Directory {
    pub fn publish(&self, quorum: Arc<Quorum>) {
        self.state.lock().unwrap().quorums.push(quorum);
    }

    pub fn set_tip(&self, tip: u64) {
        self.state.lock().unwrap().tip = tip;
    }
}

impl crate::Directory for Directory {
    fn tip(&self) -> u64 {
        self.state.lock().unwrap().tip
    }

    fn scan(&self, quorum_type: QuorumType, height: u64, count: usize) -> Vec<Arc<Quorum>> {
        let state = self.state.lock().unwrap();
        let mut quorums: Vec<_> = state
            .quorums
            .iter()
            .filter(|quorum| quorum.quorum_type == quorum_type && quorum.height <= height)
            .cloned()
            .collect();
        quorums.sort_by(|a, b| b.height.cmp(&a.height));
        quorums.truncate(count);
        quorums
    }

    fn get(&self, quorum_type: QuorumType, quorum_hash: &Digest) -> Option<Arc<Quorum>> {
        let state = self.state.lock().unwrap();
        state
            .quorums
            .iter()
            .find(|quorum| quorum.quorum_type == quorum_type && quorum.quorum_hash == *quorum_hash)
            .cloned()
    }
}

/// A [crate::Verifier] accepting `SHA-256(public key || sign hash)` as the signature.
#[derive(Clone, Default)]
pub struct Verifier {
    batches: Arc<Mutex<Vec<usize>>>,
    panicking: Arc<AtomicBool>,
}

impl Verifier {
    /// Sizes of the batches verified so far.
    pub fn batches(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }

    /// Make every following batch panic after being recorded.
    pub fn panic(&self, panicking: bool) {
        self.panicking.store(panicking, Ordering::SeqCst);
    }
}

impl crate::Verifier for Verifier {
    fn verify(&self, public_key: &[u8], sign_hash: &Digest, signature: &[u8]) -> bool {
        signature_for(public_key, sign_hash).as_ref() == signature
    }

    fn verify_batch(&self, items: &[Item]) -> Vec<bool> {
        self.batches.lock().unwrap().push(items.len());
        assert!(!self.panicking.load(Ordering::SeqCst), "verifier crashed");
        items
            .iter()
            .map(|item| self.verify(&item.public_key, &item.sign_hash, &item.signature))
            .collect()
    }
}

/// A share request recorded by [Signer].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub quorum_hash: Digest,
    pub id: Digest,
    pub msg_hash: Digest,
}

/// A [crate::Signer] that records requests.
#[derive(Clone, Default)]
pub struct Signer {
    signed: Arc<Mutex<Vec<Request>>>,
    reannounced: Arc<Mutex<Vec<Request>>>,
}

impl Signer {
    pub fn signed(&self) -> Vec<Request> {
        self.signed.lock().unwrap().clone()
    }

    pub fn reannounced(&self) -> Vec<Request> {
        self.reannounced.lock().unwrap().clone()
    }
}

impl crate::Signer for Signer {
    fn sign(&mut self, quorum: Arc<Quorum>, id: Digest, msg_hash: Digest) {
        self.signed.lock().unwrap().push(Request {
            quorum_hash: quorum.quorum_hash,
            id,
            msg_hash,
        });
    }

    fn reannounce(&mut self, quorum: Arc<Quorum>, id: Digest, msg_hash: Digest) {
        self.reannounced.lock().unwrap().push(Request {
            quorum_hash: quorum.quorum_hash,
            id,
            msg_hash,
        });
    }
}

/// A [crate::Scorer] that records penalized peers.
#[derive(Clone)]
pub struct Scorer<P: Peer> {
    penalized: Arc<Mutex<Vec<P>>>,
}

impl<P: Peer> Default for Scorer<P> {
    fn default() -> Self {
        Self {
            penalized: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<P: Peer> Scorer<P> {
    pub fn penalized(&self) -> Vec<P> {
        self.penalized.lock().unwrap().clone()
    }
}

impl<P: Peer> crate::Scorer for Scorer<P> {
    type Peer = P;

    fn penalize(&mut self, peer: P, _: &crate::Error) {
        self.penalized.lock().unwrap().push(peer);
    }
}

/// A [Listener] that collects every notification.
#[derive(Default)]
pub struct Collector {
    received: Mutex<Vec<RecoveredSignature>>,
}

impl Collector {
    pub fn received(&self) -> Vec<RecoveredSignature> {
        self.received.lock().unwrap().clone()
    }
}

impl Listener for Collector {
    fn on_recovered_signature(&self, signature: &RecoveredSignature) -> Outcome {
        self.received.lock().unwrap().push(signature.clone());
        Outcome::Accepted
    }
}

/// In-memory storage whose blob writes fail while [Storage::fail] is set.
#[derive(Clone, Default)]
pub struct Storage {
    inner: memory::Storage,
    failing: Arc<AtomicBool>,
}

impl Storage {
    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl llmq_storage::Storage for Storage {
    type Blob = Blob;

    fn open(&self, partition: &str, name: &[u8]) -> Result<(Blob, u64), StorageError> {
        let (inner, len) = self.inner.open(partition, name)?;
        let blob = Blob {
            inner,
            failing: self.failing.clone(),
        };
        Ok((blob, len))
    }

    fn remove(&self, partition: &str, name: Option<&[u8]>) -> Result<(), StorageError> {
        self.inner.remove(partition, name)
    }

    fn scan(&self, partition: &str) -> Result<Vec<Vec<u8>>, StorageError> {
        self.inner.scan(partition)
    }
}

pub struct Blob {
    inner: memory::Blob,
    failing: Arc<AtomicBool>,
}

impl Blob {
    fn check(&self) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(io::Error::other("write failed").into());
        }
        Ok(())
    }
}

impl llmq_storage::Blob for Blob {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<(), StorageError> {
        self.inner.read_at(buf, offset)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> Result<(), StorageError> {
        self.check()?;
        self.inner.write_at(buf, offset)
    }

    fn resize(&self, len: u64) -> Result<(), StorageError> {
        self.check()?;
        self.inner.resize(len)
    }

    fn sync(&self) -> Result<(), StorageError> {
        self.check()?;
        self.inner.sync()
    }
}
