use super::{Batch, Config, Op};
use crate::{Blob, Error, Storage};
use bytes::{Buf, BufMut, Bytes};
use std::{collections::BTreeMap, ops::Bound};
use tracing::{debug, warn};

const BLOB_NAMES: [&[u8]; 2] = [b"left", b"right"];

/// Version (u64) followed by its checksum (u32).
const HEADER_SIZE: u64 = 12;

/// Length prefix (u32) and trailing checksum (u32) around every record.
const RECORD_OVERHEAD: usize = 8;

/// Maximum payload written in a single record during compaction.
const COMPACTION_RECORD_SIZE: usize = 1 << 20;

const TAG_PUT: u8 = 0;
const TAG_DELETE: u8 = 1;

#[derive(Clone, Copy)]
struct Location {
    offset: u64,
    len: u32,
}

/// Encoded size of a put operation.
fn put_size(key: &[u8], value_len: usize) -> u64 {
    (1 + 4 + key.len() + 4 + value_len) as u64
}

fn encode_header(version: u64) -> [u8; HEADER_SIZE as usize] {
    let mut header = [0u8; HEADER_SIZE as usize];
    header[..8].copy_from_slice(&version.to_be_bytes());
    let checksum = crc32fast::hash(&header[..8]);
    header[8..].copy_from_slice(&checksum.to_be_bytes());
    header
}

fn encode_record<'a>(
    ops: impl ExactSizeIterator<Item = (&'a [u8], Option<&'a [u8]>)>,
) -> Result<Vec<u8>, Error> {
    let mut payload = Vec::new();
    payload.put_u32(ops.len() as u32);
    for (key, value) in ops {
        match value {
            Some(value) => {
                payload.put_u8(TAG_PUT);
                payload.put_u32(key.len() as u32);
                payload.put_slice(key);
                payload.put_u32(value.len() as u32);
                payload.put_slice(value);
            }
            None => {
                payload.put_u8(TAG_DELETE);
                payload.put_u32(key.len() as u32);
                payload.put_slice(key);
            }
        }
    }
    let len = u32::try_from(payload.len()).map_err(|_| Error::RecordTooLarge(payload.len()))?;
    let mut record = Vec::with_capacity(payload.len() + RECORD_OVERHEAD);
    record.put_u32(len);
    record.put_slice(&payload);
    record.put_u32(crc32fast::hash(&payload));
    Ok(record)
}

/// Operations decoded from a record payload. Values are referenced by their offset within the
/// payload.
enum Decoded {
    Put(Vec<u8>, usize, u32),
    Delete(Vec<u8>),
}

fn decode_payload(payload: &[u8]) -> Option<Vec<Decoded>> {
    let mut buf = payload;
    if buf.remaining() < 4 {
        return None;
    }
    let count = buf.get_u32();
    let mut ops = Vec::new();
    for _ in 0..count {
        if buf.remaining() < 5 {
            return None;
        }
        let tag = buf.get_u8();
        let key_len = buf.get_u32() as usize;
        if buf.remaining() < key_len {
            return None;
        }
        let key = buf[..key_len].to_vec();
        buf.advance(key_len);
        match tag {
            TAG_PUT => {
                if buf.remaining() < 4 {
                    return None;
                }
                let value_len = buf.get_u32();
                if buf.remaining() < value_len as usize {
                    return None;
                }
                let offset = payload.len() - buf.remaining();
                buf.advance(value_len as usize);
                ops.push(Decoded::Put(key, offset, value_len));
            }
            TAG_DELETE => ops.push(Decoded::Delete(key)),
            _ => return None,
        }
    }
    if buf.has_remaining() {
        return None;
    }
    Some(ops)
}

/// An append-only key/value log (see the [module documentation](super)).
pub struct Log<S: Storage> {
    cfg: Config,

    cursor: usize,
    blobs: [S::Blob; 2],
    version: u64,

    /// Length of the active blob.
    size: u64,

    /// Encoded size of all live operations.
    live: u64,
    index: BTreeMap<Vec<u8>, Location>,
}

impl<S: Storage> Log<S> {
    /// Returns the version stored in the blob's header, if valid.
    fn header(blob: &S::Blob, len: u64) -> Result<Option<u64>, Error> {
        if len < HEADER_SIZE {
            return Ok(None);
        }
        let mut header = [0u8; HEADER_SIZE as usize];
        blob.read_at(&mut header, 0)?;
        let version = header[..8].try_into().map_err(|_| Error::OffsetOverflow)?;
        let version = u64::from_be_bytes(version);
        if encode_header(version) != header {
            debug!(len, "invalid header");
            return Ok(None);
        }
        Ok(Some(version))
    }

    /// Open the log stored in `cfg.partition`, replaying all valid records.
    pub fn init(storage: S, cfg: Config) -> Result<Self, Error> {
        let (left, left_len) = storage.open(&cfg.partition, BLOB_NAMES[0])?;
        let (right, right_len) = storage.open(&cfg.partition, BLOB_NAMES[1])?;

        // Choose the blob with the highest valid version
        let left_version = Self::header(&left, left_len)?;
        let right_version = Self::header(&right, right_len)?;
        let (cursor, version) = match (left_version, right_version) {
            (Some(left), Some(right)) if right > left => (1, Some(right)),
            (Some(left), _) => (0, Some(left)),
            (None, Some(right)) => (1, Some(right)),
            (None, None) => (0, None),
        };
        let lens = [left_len, right_len];
        let blobs = [left, right];

        // Discard anything left in the inactive blob (e.g. an interrupted compaction)
        let inactive = &blobs[1 - cursor];
        if lens[1 - cursor] > 0 {
            debug!(blob = 1 - cursor, "clearing inactive blob");
            inactive.resize(0)?;
            inactive.sync()?;
        }

        let mut log = Self {
            cfg,
            cursor,
            blobs,
            version: version.unwrap_or_default(),
            size: HEADER_SIZE,
            live: 0,
            index: BTreeMap::new(),
        };
        match version {
            Some(_) => log.replay(lens[cursor])?,
            None => {
                let blob = &log.blobs[cursor];
                blob.resize(0)?;
                blob.write_at(&encode_header(0), 0)?;
                blob.sync()?;
            }
        }
        debug!(
            version = log.version,
            keys = log.index.len(),
            size = log.size,
            "initialized log"
        );
        Ok(log)
    }

    fn replay(&mut self, len: u64) -> Result<(), Error> {
        let blob = &self.blobs[self.cursor];
        let data_len: usize = (len - HEADER_SIZE)
            .try_into()
            .map_err(|_| Error::OffsetOverflow)?;
        let mut data = vec![0u8; data_len];
        blob.read_at(&mut data, HEADER_SIZE)?;

        let mut pos = 0usize;
        while data.len() - pos >= RECORD_OVERHEAD {
            let mut prefix = &data[pos..pos + 4];
            let payload_len = prefix.get_u32() as usize;
            let end = pos + 4 + payload_len + 4;
            if end > data.len() {
                break;
            }
            let payload = &data[pos + 4..pos + 4 + payload_len];
            let mut checksum = &data[pos + 4 + payload_len..end];
            if checksum.get_u32() != crc32fast::hash(payload) {
                break;
            }
            let Some(ops) = decode_payload(payload) else {
                break;
            };
            self.apply(ops, HEADER_SIZE + (pos + 4) as u64);
            pos = end;
        }
        self.size = HEADER_SIZE + pos as u64;

        if pos < data.len() {
            warn!(
                valid = self.size,
                len, "invalid record found: truncating"
            );
            let blob = &self.blobs[self.cursor];
            blob.resize(self.size)?;
            blob.sync()?;
        }
        Ok(())
    }

    fn apply(&mut self, ops: Vec<Decoded>, payload_offset: u64) {
        for op in ops {
            match op {
                Decoded::Put(key, offset, len) => {
                    self.live += put_size(&key, len as usize);
                    let location = Location {
                        offset: payload_offset + offset as u64,
                        len,
                    };
                    if let Some(old) = self.index.get(&key) {
                        self.live -= put_size(&key, old.len as usize);
                    }
                    self.index.insert(key, location);
                }
                Decoded::Delete(key) => {
                    if let Some(old) = self.index.remove(&key) {
                        self.live -= put_size(&key, old.len as usize);
                    }
                }
            }
        }
    }

    /// Atomically and durably apply a batch of operations.
    pub fn write(&mut self, batch: Batch) -> Result<(), Error> {
        if batch.is_empty() {
            return Ok(());
        }
        let record = encode_record(batch.ops.iter().map(|op| match op {
            Op::Put(key, value) => (key.as_slice(), Some(value.as_ref())),
            Op::Delete(key) => (key.as_slice(), None),
        }))?;

        // Persist before touching the index
        let blob = &self.blobs[self.cursor];
        blob.write_at(&record, self.size)?;
        blob.sync()?;

        let payload = &record[4..record.len() - 4];
        let ops = decode_payload(payload).ok_or_else(|| Error::Corrupt("encoded batch".into()))?;
        self.apply(ops, self.size + 4);
        self.size += record.len() as u64;

        if self.should_compact() {
            self.compact()?;
        }
        Ok(())
    }

    fn dead(&self) -> u64 {
        self.size.saturating_sub(HEADER_SIZE + self.live)
    }

    fn should_compact(&self) -> bool {
        let dead = self.dead();
        dead >= self.cfg.compaction_threshold && dead > self.live
    }

    /// Rewrite all live entries into the inactive blob and switch to it.
    pub fn compact(&mut self) -> Result<(), Error> {
        let target = 1 - self.cursor;
        let version = self.version + 1;
        let dead = self.dead();

        // Read all live entries
        let mut entries = Vec::with_capacity(self.index.len());
        for key in self.index.keys() {
            let value = self
                .get(key)?
                .ok_or_else(|| Error::Corrupt("live key missing".into()))?;
            entries.push((key.clone(), value));
        }

        // Write records first
        let blob = &self.blobs[target];
        blob.resize(0)?;
        let mut size = HEADER_SIZE;
        let mut index = BTreeMap::new();
        let mut live = 0;
        let mut start = 0;
        while start < entries.len() {
            let mut end = start;
            let mut payload = 0;
            while end < entries.len() && (end == start || payload < COMPACTION_RECORD_SIZE) {
                payload += put_size(&entries[end].0, entries[end].1.len()) as usize;
                end += 1;
            }
            let chunk = &entries[start..end];
            let record = encode_record(
                chunk
                    .iter()
                    .map(|(key, value)| (key.as_slice(), Some(value.as_ref()))),
            )?;
            blob.write_at(&record, size)?;

            // Track locations as they will be replayed
            let payload = &record[4..record.len() - 4];
            for op in decode_payload(payload).ok_or_else(|| Error::Corrupt("compaction".into()))? {
                if let Decoded::Put(key, offset, len) = op {
                    live += put_size(&key, len as usize);
                    index.insert(
                        key,
                        Location {
                            offset: size + 4 + offset as u64,
                            len,
                        },
                    );
                }
            }
            size += record.len() as u64;
            start = end;
        }
        blob.sync()?;

        // Commit by writing the header last
        blob.write_at(&encode_header(version), 0)?;
        blob.sync()?;

        // Release the previous blob
        let previous = &self.blobs[self.cursor];
        previous.resize(0)?;
        previous.sync()?;

        debug!(
            version,
            reclaimed = dead,
            keys = index.len(),
            "compacted log"
        );
        self.cursor = target;
        self.version = version;
        self.size = size;
        self.live = live;
        self.index = index;
        Ok(())
    }

    /// Get the value of `key`, if present.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>, Error> {
        let Some(location) = self.index.get(key) else {
            return Ok(None);
        };
        let mut value = vec![0u8; location.len as usize];
        self.blobs[self.cursor].read_at(&mut value, location.offset)?;
        Ok(Some(Bytes::from(value)))
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.index.contains_key(key)
    }

    /// Iterate over all keys in `[start, end)`, in order.
    pub fn keys_in_range<'a>(
        &'a self,
        start: &'a [u8],
        end: &'a [u8],
    ) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.index
            .range::<[u8], _>((Bound::Included(start), Bound::Excluded(end)))
            .map(|(key, _)| key.as_slice())
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of compactions applied since the log was created.
    pub fn version(&self) -> u64 {
        self.version
    }
}
