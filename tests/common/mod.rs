//! Shared test utilities for ferrite-import integration tests.
//!
//! Import via `mod common;` in integration test files:
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use ferrite_import::migration::store::StoreResult;
use ferrite_import::migration::{
    KeyValueStore, RestoreCommand, ServerInfo, StoreError, WriteStrategy,
};
use ferrite_import::pattern::glob_match;
use ferrite_import::rdb::{crc64, lzf_decompress, DUMP_PAYLOAD_VERSION};

// ============================================================================
// Snapshot building
// ============================================================================

pub const TYPE_STRING: u8 = 0;
pub const TYPE_LIST: u8 = 1;
pub const TYPE_SET: u8 = 2;
pub const TYPE_ZSET: u8 = 3;
pub const TYPE_HASH: u8 = 4;
pub const TYPE_ZSET_2: u8 = 5;
pub const TYPE_HASH_ZIPMAP: u8 = 9;
pub const TYPE_LIST_ZIPLIST: u8 = 10;
pub const TYPE_SET_INTSET: u8 = 11;
pub const TYPE_ZSET_ZIPLIST: u8 = 12;
pub const TYPE_HASH_ZIPLIST: u8 = 13;
pub const TYPE_LIST_QUICKLIST: u8 = 14;

/// Encode a length the way snapshots do.
pub fn encode_length(len: u64) -> Vec<u8> {
    if len < 1 << 6 {
        vec![len as u8]
    } else if len < 1 << 14 {
        vec![0x40 | (len >> 8) as u8, len as u8]
    } else if len <= u32::MAX as u64 {
        let mut out = vec![0x80];
        out.extend_from_slice(&(len as u32).to_be_bytes());
        out
    } else {
        let mut out = vec![0x81];
        out.extend_from_slice(&len.to_be_bytes());
        out
    }
}

/// Plain length-prefixed string.
pub fn encode_string(s: &[u8]) -> Vec<u8> {
    let mut out = encode_length(s.len() as u64);
    out.extend_from_slice(s);
    out
}

/// 8-bit integer-encoded string.
pub fn encode_int8(v: i8) -> Vec<u8> {
    vec![0xC0, v as u8]
}

/// 16-bit integer-encoded string.
pub fn encode_int16(v: i16) -> Vec<u8> {
    let mut out = vec![0xC1];
    out.extend_from_slice(&v.to_le_bytes());
    out
}

/// 32-bit integer-encoded string.
pub fn encode_int32(v: i32) -> Vec<u8> {
    let mut out = vec![0xC2];
    out.extend_from_slice(&v.to_le_bytes());
    out
}

/// LZF-encoded string made of a single literal run (at most 32 bytes).
pub fn encode_lzf_literal(s: &[u8]) -> Vec<u8> {
    assert!(!s.is_empty() && s.len() <= 32);
    let mut compressed = vec![(s.len() - 1) as u8];
    compressed.extend_from_slice(s);
    encode_lzf_block(&compressed, s.len())
}

/// LZF-encoded string from an already compressed block.
pub fn encode_lzf_block(compressed: &[u8], uncompressed_len: usize) -> Vec<u8> {
    let mut out = vec![0xC3];
    out.extend(encode_length(compressed.len() as u64));
    out.extend(encode_length(uncompressed_len as u64));
    out.extend_from_slice(compressed);
    out
}

/// Append the version footer and checksum a `DUMP` reply carries.
pub fn seal_payload(body: &[u8]) -> Bytes {
    let mut out = body.to_vec();
    out.extend_from_slice(&DUMP_PAYLOAD_VERSION.to_le_bytes());
    let crc = crc64(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    Bytes::from(out)
}

/// What `DUMP` returns for a plain string value.
pub fn string_payload(value: &[u8]) -> Bytes {
    let mut body = vec![TYPE_STRING];
    body.extend(encode_string(value));
    seal_payload(&body)
}

/// Builds snapshot files opcode by opcode.
pub struct RdbBuilder {
    buf: Vec<u8>,
}

impl RdbBuilder {
    pub fn new(version: u32) -> Self {
        let mut buf = b"REDIS".to_vec();
        buf.extend_from_slice(format!("{:04}", version).as_bytes());
        Self { buf }
    }

    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn aux(self, field: &str, value: &str) -> Self {
        let mut op = vec![0xFA];
        op.extend(encode_string(field.as_bytes()));
        op.extend(encode_string(value.as_bytes()));
        self.raw(&op)
    }

    pub fn select_db(self, db: u64) -> Self {
        let mut op = vec![0xFE];
        op.extend(encode_length(db));
        self.raw(&op)
    }

    pub fn resize_db(self, size: u64, expires: u64) -> Self {
        let mut op = vec![0xFB];
        op.extend(encode_length(size));
        op.extend(encode_length(expires));
        self.raw(&op)
    }

    pub fn expire_ms(self, at_ms: u64) -> Self {
        let mut op = vec![0xFC];
        op.extend_from_slice(&at_ms.to_le_bytes());
        self.raw(&op)
    }

    pub fn expire_secs(self, at_secs: u32) -> Self {
        let mut op = vec![0xFD];
        op.extend_from_slice(&at_secs.to_le_bytes());
        self.raw(&op)
    }

    /// A type byte, key, and pre-encoded body.
    pub fn object(self, value_type: u8, key: &[u8], body: &[u8]) -> Self {
        let mut op = vec![value_type];
        op.extend(encode_string(key));
        op.extend_from_slice(body);
        self.raw(&op)
    }

    pub fn string(self, key: &[u8], value: &[u8]) -> Self {
        self.object(TYPE_STRING, key, &encode_string(value))
    }

    /// Snapshot bytes with the end-of-stream opcode appended.
    pub fn finish(self) -> Vec<u8> {
        let mut buf = self.buf;
        buf.push(0xFF);
        buf
    }

    /// Finish and write to `name` inside `dir`.
    pub fn write_to(self, dir: &tempfile::TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, self.finish()).unwrap();
        path
    }
}

// ============================================================================
// Conformant restore
// ============================================================================

/// A value as a destination would materialize it from a payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RestoredValue {
    String(Vec<u8>),
    List(Vec<Vec<u8>>),
    Set(Vec<Vec<u8>>),
    SortedSet(Vec<(Vec<u8>, f64)>),
    Hash(Vec<(Vec<u8>, Vec<u8>)>),
    /// Compact encodings, left as their serialized blobs.
    Encoded(u8, Vec<Vec<u8>>),
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], String> {
        let end = self.pos.checked_add(n).ok_or("overflow")?;
        let slice = self.data.get(self.pos..end).ok_or("payload truncated")?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, String> {
        Ok(self.take(1)?[0])
    }

    /// Returns the length, or the encoding id for special strings.
    fn length(&mut self) -> Result<(u64, bool), String> {
        let first = self.u8()?;
        match first >> 6 {
            0 => Ok(((first & 0x3F) as u64, false)),
            1 => Ok(((((first & 0x3F) as u64) << 8) | self.u8()? as u64, false)),
            2 if first == 0x80 => {
                let b = self.take(4)?;
                Ok((u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as u64, false))
            }
            2 if first == 0x81 => {
                let b = self.take(8)?;
                let mut arr = [0u8; 8];
                arr.copy_from_slice(b);
                Ok((u64::from_be_bytes(arr), false))
            }
            3 => Ok(((first & 0x3F) as u64, true)),
            _ => Err(format!("bad length prefix {first:#x}")),
        }
    }

    fn plain_length(&mut self) -> Result<u64, String> {
        match self.length()? {
            (len, false) => Ok(len),
            (_, true) => Err("unexpected encoded length".into()),
        }
    }

    fn string(&mut self) -> Result<Vec<u8>, String> {
        match self.length()? {
            (len, false) => Ok(self.take(len as usize)?.to_vec()),
            (0, true) => Ok((self.u8()? as i8).to_string().into_bytes()),
            (1, true) => {
                let b = self.take(2)?;
                Ok(i16::from_le_bytes([b[0], b[1]]).to_string().into_bytes())
            }
            (2, true) => {
                let b = self.take(4)?;
                Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]])
                    .to_string()
                    .into_bytes())
            }
            (3, true) => {
                let clen = self.plain_length()? as usize;
                let ulen = self.plain_length()? as usize;
                let block = self.take(clen)?;
                lzf_decompress(block, ulen).map_err(|e| e.to_string())
            }
            (other, true) => Err(format!("unknown string encoding {other}")),
        }
    }

    fn text_double(&mut self) -> Result<f64, String> {
        match self.u8()? {
            253 => Ok(f64::NAN),
            254 => Ok(f64::INFINITY),
            255 => Ok(f64::NEG_INFINITY),
            len => {
                let text = self.take(len as usize)?;
                std::str::from_utf8(text)
                    .map_err(|e| e.to_string())?
                    .parse()
                    .map_err(|e: std::num::ParseFloatError| e.to_string())
            }
        }
    }

    fn binary_double(&mut self) -> Result<f64, String> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(f64::from_le_bytes(arr))
    }
}

/// Validate a `DUMP` payload and materialize its value, as `RESTORE` does.
pub fn verify_payload(payload: &[u8]) -> Result<RestoredValue, String> {
    if payload.len() < 10 {
        return Err("payload too short".into());
    }
    let (content, trailer) = payload.split_at(payload.len() - 8);
    let mut crc = [0u8; 8];
    crc.copy_from_slice(trailer);
    if crc64(content) != u64::from_le_bytes(crc) {
        return Err("DUMP payload version or checksum are wrong".into());
    }
    let (body, footer) = content.split_at(content.len() - 2);
    let version = u16::from_le_bytes([footer[0], footer[1]]);
    if version > DUMP_PAYLOAD_VERSION {
        return Err(format!("unsupported payload version {version}"));
    }

    let mut cur = Cursor { data: body, pos: 0 };
    let value_type = cur.u8()?;
    let value = match value_type {
        TYPE_STRING => RestoredValue::String(cur.string()?),
        TYPE_LIST | TYPE_SET => {
            let len = cur.plain_length()?;
            let items = (0..len).map(|_| cur.string()).collect::<Result<_, _>>()?;
            if value_type == TYPE_LIST {
                RestoredValue::List(items)
            } else {
                RestoredValue::Set(items)
            }
        }
        TYPE_ZSET | TYPE_ZSET_2 => {
            let len = cur.plain_length()?;
            let mut members = Vec::new();
            for _ in 0..len {
                let member = cur.string()?;
                let score = if value_type == TYPE_ZSET {
                    cur.text_double()?
                } else {
                    cur.binary_double()?
                };
                members.push((member, score));
            }
            RestoredValue::SortedSet(members)
        }
        TYPE_HASH => {
            let len = cur.plain_length()?;
            let mut fields = Vec::new();
            for _ in 0..len {
                fields.push((cur.string()?, cur.string()?));
            }
            RestoredValue::Hash(fields)
        }
        TYPE_HASH_ZIPMAP | TYPE_LIST_ZIPLIST | TYPE_SET_INTSET | TYPE_ZSET_ZIPLIST
        | TYPE_HASH_ZIPLIST => RestoredValue::Encoded(value_type, vec![cur.string()?]),
        TYPE_LIST_QUICKLIST => {
            let len = cur.plain_length()?;
            let blobs = (0..len).map(|_| cur.string()).collect::<Result<_, _>>()?;
            RestoredValue::Encoded(value_type, blobs)
        }
        other => return Err(format!("bad value type {other}")),
    };

    if cur.pos != body.len() {
        return Err(format!("{} trailing bytes in payload", body.len() - cur.pos));
    }
    Ok(value)
}

// ============================================================================
// In-memory store
// ============================================================================

/// A key as held by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stored {
    pub payload: Bytes,
    pub ttl_ms: u64,
}

#[derive(Default)]
struct Inner {
    entries: BTreeMap<Bytes, Stored>,
    info: ServerInfo,
    busy: HashSet<Bytes>,
    failing: HashSet<Bytes>,
    vanished: HashSet<Bytes>,
    writes: Vec<(Bytes, WriteStrategy)>,
    dumped: Vec<Bytes>,
    restore_calls: usize,
    info_calls: usize,
}

/// A [`KeyValueStore`] holding payloads in memory, with `RESTORE`
/// semantics checked through [`verify_payload`].
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new(version: &str, cluster_enabled: bool) -> Self {
        let store = Self::default();
        store.inner.lock().info = ServerInfo {
            version: version.to_string(),
            cluster_enabled,
        };
        store
    }

    /// Add a string key with no expiry.
    pub fn with_string(self, key: &str, value: &str) -> Self {
        self.insert(key.as_bytes(), string_payload(value.as_bytes()), 0);
        self
    }

    pub fn insert(&self, key: &[u8], payload: Bytes, ttl_ms: u64) {
        self.inner.lock().entries.insert(
            Bytes::copy_from_slice(key),
            Stored { payload, ttl_ms },
        );
    }

    pub fn get(&self, key: &str) -> Option<Stored> {
        self.inner.lock().entries.get(key.as_bytes()).cloned()
    }

    /// Materialized value of `key`.
    pub fn value(&self, key: &str) -> Option<RestoredValue> {
        self.get(key).map(|s| verify_payload(&s.payload).unwrap())
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner
            .lock()
            .entries
            .keys()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .collect()
    }

    /// Report `LOADING` for writes to `key`.
    pub fn mark_busy(&self, key: &str) {
        self.inner.lock().busy.insert(Bytes::copy_from_slice(key.as_bytes()));
    }

    /// Reject writes to `key` with a generic error.
    pub fn fail_on(&self, key: &str) {
        self.inner.lock().failing.insert(Bytes::copy_from_slice(key.as_bytes()));
    }

    /// Make `DUMP` report `key` as gone while `SCAN` still lists it.
    pub fn vanish(&self, key: &str) {
        self.inner.lock().vanished.insert(Bytes::copy_from_slice(key.as_bytes()));
    }

    /// Every write attempted, in order.
    pub fn writes(&self) -> Vec<(String, WriteStrategy)> {
        self.inner
            .lock()
            .writes
            .iter()
            .map(|(k, s)| (String::from_utf8_lossy(k).into_owned(), *s))
            .collect()
    }

    /// Keys whose values were read with `DUMP`.
    pub fn dumped(&self) -> Vec<String> {
        self.inner
            .lock()
            .dumped
            .iter()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .collect()
    }

    /// Number of grouped restore calls received.
    pub fn restore_calls(&self) -> usize {
        self.inner.lock().restore_calls
    }

    /// Number of `INFO` queries received.
    pub fn info_calls(&self) -> usize {
        self.inner.lock().info_calls
    }

    /// Change the version reported by later `INFO` queries.
    pub fn set_version(&self, version: &str) {
        self.inner.lock().info.version = version.to_string();
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn scan(
        &self,
        cursor: u64,
        count: usize,
        pattern: Option<&str>,
    ) -> StoreResult<(u64, Vec<Bytes>)> {
        let inner = self.inner.lock();
        let start = cursor as usize;
        let end = (start + count).min(inner.entries.len());
        let keys = inner
            .entries
            .keys()
            .skip(start)
            .take(end.saturating_sub(start))
            .filter(|k| pattern.map_or(true, |p| glob_match(p.as_bytes(), k)))
            .cloned()
            .collect();
        let next = if end >= inner.entries.len() { 0 } else { end as u64 };
        Ok((next, keys))
    }

    async fn dump_with_ttl(&self, keys: &[Bytes]) -> StoreResult<Vec<Option<(Bytes, i64)>>> {
        let mut inner = self.inner.lock();
        inner.dumped.extend(keys.iter().cloned());
        Ok(keys
            .iter()
            .map(|k| {
                if inner.vanished.contains(k) {
                    return None;
                }
                inner.entries.get(k).map(|s| {
                    let ttl = if s.ttl_ms == 0 { -1 } else { s.ttl_ms as i64 };
                    (s.payload.clone(), ttl)
                })
            })
            .collect())
    }

    async fn exists(&self, keys: &[Bytes]) -> StoreResult<Vec<bool>> {
        let inner = self.inner.lock();
        Ok(keys.iter().map(|k| inner.entries.contains_key(k)).collect())
    }

    async fn restore(&self, commands: &[RestoreCommand]) -> StoreResult<Vec<StoreResult<()>>> {
        let mut inner = self.inner.lock();
        inner.restore_calls += 1;
        let mut results = Vec::with_capacity(commands.len());
        for cmd in commands {
            inner.writes.push((cmd.key.clone(), cmd.strategy));
            if inner.busy.contains(&cmd.key) {
                results.push(Err(StoreError::Busy(
                    "LOADING Redis is loading the dataset in memory".into(),
                )));
                continue;
            }
            if inner.failing.contains(&cmd.key) {
                results.push(Err(StoreError::Command("ERR injected failure".into())));
                continue;
            }
            if let Err(e) = verify_payload(&cmd.payload) {
                results.push(Err(StoreError::Command(format!("ERR {e}"))));
                continue;
            }
            match cmd.strategy {
                WriteStrategy::IfAbsent if inner.entries.contains_key(&cmd.key) => {
                    results.push(Err(StoreError::Busy(
                        "BUSYKEY Target key name already exists.".into(),
                    )));
                    continue;
                }
                WriteStrategy::DeleteThenRestore => {
                    inner.entries.remove(&cmd.key);
                }
                WriteStrategy::Replace | WriteStrategy::IfAbsent => {}
            }
            inner.entries.insert(
                cmd.key.clone(),
                Stored {
                    payload: cmd.payload.clone(),
                    ttl_ms: cmd.ttl_ms,
                },
            );
            results.push(Ok(()));
        }
        Ok(results)
    }

    async fn info(&self) -> StoreResult<ServerInfo> {
        let mut inner = self.inner.lock();
        inner.info_calls += 1;
        Ok(inner.info.clone())
    }
}
