use super::{keys, Config, Record, Tombstone};
use crate::{
    log::{self, Batch, Log},
    Error, Storage,
};
use bytes::{Buf, BufMut, Bytes};
use llmq_codec::{Decode, Encode, EncodeSize, Error as CodecError, FixedSize, Read, Write};
use llmq_types::{QuorumType, RecoveredSignature, Vote};
use llmq_utils::{Digest, LruSet, SystemTimeExt};
use prometheus_client::{metrics::counter::Counter, registry::Registry};
use std::{
    sync::{Mutex, RwLock},
    time::{Duration, SystemTime},
};
use tracing::{debug, warn};

/// Value stored under a record key.
struct Entry {
    time: u64,
    record: Record,
}

impl Write for Entry {
    fn write(&self, buf: &mut impl BufMut) {
        self.time.write(buf);
        self.record.write(buf);
    }
}

impl Read for Entry {
    fn read(buf: &mut impl Buf) -> Result<Self, CodecError> {
        let time = u64::read(buf)?;
        let record = Record::read(buf)?;
        Ok(Self { time, record })
    }
}

impl EncodeSize for Entry {
    fn encode_size(&self) -> usize {
        u64::SIZE + self.record.encode_size()
    }
}

/// Value stored under a vote key.
struct VoteEntry {
    msg_hash: Digest,
    time: u64,
}

impl Write for VoteEntry {
    fn write(&self, buf: &mut impl BufMut) {
        self.msg_hash.write(buf);
        self.time.write(buf);
    }
}

impl Read for VoteEntry {
    fn read(buf: &mut impl Buf) -> Result<Self, CodecError> {
        let msg_hash = Digest::read(buf)?;
        let time = u64::read(buf)?;
        Ok(Self { msg_hash, time })
    }
}

impl FixedSize for VoteEntry {
    const SIZE: usize = Digest::SIZE + u64::SIZE;
}

struct Caches {
    ids: LruSet<(QuorumType, Digest)>,
    sessions: LruSet<Digest>,
    contents: LruSet<Digest>,
}

impl Caches {
    fn insert(&mut self, sig: &RecoveredSignature) {
        self.ids.insert((sig.quorum_type, sig.id));
        self.sessions.insert(sig.sign_hash());
        self.contents.insert(sig.hash());
    }

    fn evict(&mut self, record: &Record) {
        self.ids.remove(&(record.quorum_type(), record.id()));
        self.contents.remove(&record.content_hash());
        if let Record::Full(sig) = record {
            self.sessions.remove(&sig.sign_hash());
        }
    }
}

/// Recovered-signature store backed by a [Log].
///
/// All methods take `&self` and may be called concurrently. Reads share the log, writes are
/// serialized. The log lock is always acquired before the cache lock.
pub struct Store<S: Storage> {
    log: RwLock<Log<S>>,
    caches: Mutex<Caches>,

    cache_hits: Counter,
    cache_misses: Counter,
    writes: Counter,
}

impl<S: Storage> Store<S> {
    /// Open the store, replaying any previously persisted state.
    pub fn init(storage: S, cfg: Config, registry: &mut Registry) -> Result<Self, Error> {
        let log = Log::init(
            storage,
            log::Config {
                partition: cfg.partition,
                compaction_threshold: cfg.compaction_threshold,
            },
        )?;
        debug!(keys = log.len(), version = log.version(), "store initialized");

        let cache_hits = Counter::default();
        let cache_misses = Counter::default();
        let writes = Counter::default();
        registry.register(
            "cache_hits",
            "Existence queries answered by a cache",
            cache_hits.clone(),
        );
        registry.register(
            "cache_misses",
            "Existence queries that consulted the log",
            cache_misses.clone(),
        );
        registry.register("writes", "Recovered signatures written", writes.clone());

        Ok(Self {
            log: RwLock::new(log),
            caches: Mutex::new(Caches {
                ids: LruSet::new(cfg.cache_size),
                sessions: LruSet::new(cfg.cache_size),
                contents: LruSet::new(cfg.cache_size),
            }),
            cache_hits,
            cache_misses,
            writes,
        })
    }

    fn read_entry(log: &Log<S>, key: &[u8]) -> Result<Option<Entry>, Error> {
        let Some(value) = log.get(key)? else {
            return Ok(None);
        };
        Ok(Some(Entry::decode(value)?))
    }

    fn read_vote(
        log: &Log<S>,
        quorum_type: QuorumType,
        id: &Digest,
    ) -> Result<Option<VoteEntry>, Error> {
        let Some(value) = log.get(&keys::vote(quorum_type, id))? else {
            return Ok(None);
        };
        Ok(Some(VoteEntry::decode(value)?))
    }

    /// Check the cache, then the log, remembering a hit found in the log.
    fn exists(
        &self,
        cached: impl Fn(&mut Caches) -> bool,
        remember: impl FnOnce(&mut Caches),
        key: Vec<u8>,
    ) -> bool {
        if cached(&mut self.caches.lock().unwrap()) {
            self.cache_hits.inc();
            return true;
        }
        self.cache_misses.inc();

        // Hold the read lock while caching so a concurrent removal cannot be undone
        let log = self.log.read().unwrap();
        if !log.contains(&key) {
            return false;
        }
        remember(&mut self.caches.lock().unwrap());
        true
    }

    /// Returns whether a recovered signature for exactly `(quorum_type, id, msg_hash)` exists.
    pub fn has_recovered_signature(
        &self,
        quorum_type: QuorumType,
        id: &Digest,
        msg_hash: &Digest,
    ) -> bool {
        self.log
            .read()
            .unwrap()
            .contains(&keys::message(quorum_type, id, msg_hash))
    }

    /// Returns whether any recovered signature (or tombstone) exists for `(quorum_type, id)`.
    pub fn has_recovered_signature_for_id(&self, quorum_type: QuorumType, id: &Digest) -> bool {
        let key = (quorum_type, *id);
        self.exists(
            |caches| caches.ids.contains(&key),
            |caches| caches.ids.insert(key),
            keys::record(quorum_type, id),
        )
    }

    /// Returns whether a recovered signature with the given sign hash exists.
    pub fn has_recovered_signature_for_session(&self, sign_hash: &Digest) -> bool {
        self.exists(
            |caches| caches.sessions.contains(sign_hash),
            |caches| caches.sessions.insert(*sign_hash),
            keys::session(sign_hash),
        )
    }

    /// Returns whether a recovered signature with the given content hash exists.
    pub fn has_recovered_signature_for_hash(&self, content_hash: &Digest) -> bool {
        self.exists(
            |caches| caches.contents.contains(content_hash),
            |caches| caches.contents.insert(*content_hash),
            keys::content(content_hash),
        )
    }

    /// Fetch the record stored for `(quorum_type, id)`.
    pub fn get_by_id(&self, quorum_type: QuorumType, id: &Digest) -> Result<Option<Record>, Error> {
        let log = self.log.read().unwrap();
        Ok(Self::read_entry(&log, &keys::record(quorum_type, id))?.map(|entry| entry.record))
    }

    /// Fetch the record with the given content hash.
    pub fn get_by_hash(&self, content_hash: &Digest) -> Result<Option<Record>, Error> {
        let log = self.log.read().unwrap();
        let Some(mut value) = log.get(&keys::content(content_hash))? else {
            return Ok(None);
        };
        let quorum_type = QuorumType::read(&mut value)?;
        let id = Digest::read(&mut value)?;
        Ok(Self::read_entry(&log, &keys::record(quorum_type, &id))?.map(|entry| entry.record))
    }

    /// Queue the removal of every key belonging to `entry` (except the record key itself).
    fn remove_secondary(batch: &mut Batch, entry: &Entry) {
        let record = &entry.record;
        let (quorum_type, id) = (record.quorum_type(), record.id());
        batch.delete(keys::content(&record.content_hash()));
        batch.delete(keys::record_time(entry.time, quorum_type, &id));
        if let Record::Full(sig) = record {
            batch.delete(keys::message(quorum_type, &id, &sig.msg_hash));
            batch.delete(keys::session(&sig.sign_hash()));
        }
    }

    /// Persist a recovered signature, superseding any vote for its session.
    ///
    /// Returns `false` if a signature with the same content hash is already stored. A different
    /// signature for the same `(quorum_type, id)` replaces the previous one.
    pub fn write(&self, sig: &RecoveredSignature, now: SystemTime) -> Result<bool, Error> {
        let content_hash = sig.hash();
        let mut log = self.log.write().unwrap();
        if log.contains(&keys::content(&content_hash)) {
            return Ok(false);
        }

        let (quorum_type, id) = (sig.quorum_type, sig.id);
        let time = now.epoch_secs();
        let mut batch = Batch::new();
        let previous = Self::read_entry(&log, &keys::record(quorum_type, &id))?;
        if let Some(previous) = &previous {
            warn!(%quorum_type, %id, "replacing stored recovered signature");
            Self::remove_secondary(&mut batch, previous);
        }

        let entry = Entry {
            time,
            record: Record::Full(sig.clone()),
        };
        batch.put(keys::record(quorum_type, &id), entry.encode().freeze());
        batch.put(keys::message(quorum_type, &id, &sig.msg_hash), Bytes::new());
        batch.put(keys::session(&sig.sign_hash()), Bytes::new());
        let mut session = Vec::with_capacity(keys::SESSION_KEY_LEN);
        quorum_type.write(&mut session);
        id.write(&mut session);
        batch.put(keys::content(&content_hash), session);
        batch.put(keys::record_time(time, quorum_type, &id), Bytes::new());

        if let Some(vote) = Self::read_vote(&log, quorum_type, &id)? {
            batch.delete(keys::vote(quorum_type, &id));
            batch.delete(keys::vote_time(vote.time, quorum_type, &id));
        }
        log.write(batch)?;

        let mut caches = self.caches.lock().unwrap();
        if let Some(previous) = previous {
            caches.evict(&previous.record);
        }
        caches.insert(sig);
        self.writes.inc();
        Ok(true)
    }

    /// Replace the signature stored for `(quorum_type, id)` with a [Tombstone].
    ///
    /// Returns `false` if nothing (or only a tombstone) was stored.
    pub fn truncate(&self, quorum_type: QuorumType, id: &Digest) -> Result<bool, Error> {
        let mut log = self.log.write().unwrap();
        let record_key = keys::record(quorum_type, id);
        let Some(entry) = Self::read_entry(&log, &record_key)? else {
            return Ok(false);
        };
        let Record::Full(sig) = entry.record else {
            return Ok(false);
        };

        let tombstone = Entry {
            time: entry.time,
            record: Record::Tombstone(Tombstone {
                quorum_type,
                id: *id,
                content_hash: sig.hash(),
            }),
        };
        let mut batch = Batch::new();
        batch.put(record_key, tombstone.encode().freeze());
        batch.delete(keys::message(quorum_type, id, &sig.msg_hash));
        batch.delete(keys::session(&sig.sign_hash()));
        log.write(batch)?;

        self.caches
            .lock()
            .unwrap()
            .sessions
            .remove(&sig.sign_hash());
        Ok(true)
    }

    /// Remove signatures and votes written before `now - max_age`.
    ///
    /// Returns the number of signatures and votes removed.
    pub fn cleanup(&self, max_age: Duration, now: SystemTime) -> Result<usize, Error> {
        let cutoff = now.epoch_secs().saturating_sub(max_age.as_secs());
        let mut log = self.log.write().unwrap();

        let collect = |log: &Log<S>, prefix: u8| -> Vec<(Vec<u8>, u64, u8, Digest)> {
            let start = keys::time_bound(prefix, 0);
            let end = keys::time_bound(prefix, cutoff);
            log.keys_in_range(&start, &end)
                .filter_map(|key| {
                    let (time, raw, id) = keys::parse_timed(key)?;
                    Some((key.to_vec(), time, raw, id))
                })
                .collect()
        };
        let expired_records = collect(&log, keys::RECORD_TIME);
        let expired_votes = collect(&log, keys::VOTE_TIME);
        if expired_records.is_empty() && expired_votes.is_empty() {
            return Ok(0);
        }

        let mut batch = Batch::new();
        let mut evicted = Vec::with_capacity(expired_records.len());
        for (key, time, raw, id) in expired_records {
            batch.delete(key);
            let Ok(quorum_type) = QuorumType::try_from(raw) else {
                continue;
            };
            let record_key = keys::record(quorum_type, &id);
            match Self::read_entry(&log, &record_key)? {
                Some(entry) if entry.time == time => {
                    Self::remove_secondary(&mut batch, &entry);
                    batch.delete(record_key);
                    evicted.push(entry.record);
                }
                _ => {}
            }
        }
        let mut removed = evicted.len();
        for (key, time, raw, id) in expired_votes {
            batch.delete(key);
            let Ok(quorum_type) = QuorumType::try_from(raw) else {
                continue;
            };
            if matches!(Self::read_vote(&log, quorum_type, &id)?, Some(vote) if vote.time == time) {
                batch.delete(keys::vote(quorum_type, &id));
                removed += 1;
            }
        }
        log.write(batch)?;

        let mut caches = self.caches.lock().unwrap();
        for record in &evicted {
            caches.evict(record);
        }
        debug!(removed, cutoff, "cleaned up store");
        Ok(removed)
    }

    /// Record that the local node signed `vote.msg_hash` for its session.
    ///
    /// Replaces any previous vote for the same `(quorum_type, id)`.
    pub fn write_vote(&self, vote: &Vote, now: SystemTime) -> Result<(), Error> {
        let mut log = self.log.write().unwrap();
        let (quorum_type, id) = (vote.quorum_type, vote.id);
        let mut batch = Batch::new();
        if let Some(previous) = Self::read_vote(&log, quorum_type, &id)? {
            batch.delete(keys::vote_time(previous.time, quorum_type, &id));
        }
        let entry = VoteEntry {
            msg_hash: vote.msg_hash,
            time: now.epoch_secs(),
        };
        batch.put(keys::vote(quorum_type, &id), entry.encode().freeze());
        batch.put(keys::vote_time(entry.time, quorum_type, &id), Bytes::new());
        log.write(batch)
    }

    /// Returns whether the local node voted for `(quorum_type, id)`.
    pub fn has_voted(&self, quorum_type: QuorumType, id: &Digest) -> bool {
        self.log
            .read()
            .unwrap()
            .contains(&keys::vote(quorum_type, id))
    }

    /// Returns the message hash the local node voted for in `(quorum_type, id)`.
    pub fn get_vote_for_id(
        &self,
        quorum_type: QuorumType,
        id: &Digest,
    ) -> Result<Option<Digest>, Error> {
        let log = self.log.read().unwrap();
        Ok(Self::read_vote(&log, quorum_type, id)?.map(|vote| vote.msg_hash))
    }

    /// Forget the local vote for `(quorum_type, id)`.
    pub fn remove_vote(&self, quorum_type: QuorumType, id: &Digest) -> Result<(), Error> {
        let mut log = self.log.write().unwrap();
        let Some(vote) = Self::read_vote(&log, quorum_type, id)? else {
            return Ok(());
        };
        let mut batch = Batch::new();
        batch.delete(keys::vote(quorum_type, id));
        batch.delete(keys::vote_time(vote.time, quorum_type, id));
        log.write(batch)
    }
}
