//! Streaming snapshot decoder.
//!
//! [`DumpDecoder`] walks an RDB file one opcode at a time and yields an
//! [`Entry`] per key whose payload is byte-identical to what `DUMP` on a
//! live server would return: type byte, encoded body copied verbatim, a
//! 2-byte format version footer, and a little-endian CRC64 trailer.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tracing::{debug, trace};

use super::crc64::crc64;
use super::reader::RdbReader;
use super::*;

/// Predicate over raw key bytes deciding which entries are emitted.
pub type KeyFilter = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// A key ready to be restored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Raw key bytes.
    pub key: Bytes,
    /// `RESTORE`-ready serialized value.
    pub payload: Bytes,
    /// Remaining time to live in milliseconds; `0` means no expiry.
    pub ttl_ms: u64,
}

/// Counters kept while decoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Keys fully decoded.
    pub keys_decoded: u64,
    /// Keys yielded to the caller.
    pub keys_emitted: u64,
    /// Keys dropped because their expiry had already passed.
    pub keys_expired: u64,
    /// Keys dropped by the key filter.
    pub keys_filtered: u64,
}

/// Forward-only decoder over an RDB byte stream.
pub struct DumpDecoder<R> {
    reader: RdbReader<R>,
    version: u32,
    payload_version: u16,
    now_ms: u64,
    filter: Option<KeyFilter>,
    stats: DecodeStats,
    finished: bool,
}

impl<R> fmt::Debug for DumpDecoder<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DumpDecoder")
            .field("version", &self.version)
            .field("payload_version", &self.payload_version)
            .field("filter", &self.filter.as_ref().map(|_| "<filter>"))
            .field("stats", &self.stats)
            .field("finished", &self.finished)
            .finish()
    }
}

impl DumpDecoder<BufReader<File>> {
    /// Open a snapshot file and validate its header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref()).map_err(RdbError::Io)?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read> DumpDecoder<R> {
    /// Wrap a byte source and validate the 9-byte header.
    pub fn new(source: R) -> Result<Self> {
        let mut reader = RdbReader::new(source);
        let version = read_header(&mut reader)?;
        debug!(version, "RDB header accepted");

        Ok(Self {
            reader,
            version,
            payload_version: DUMP_PAYLOAD_VERSION,
            now_ms: unix_now_ms(),
            filter: None,
            stats: DecodeStats::default(),
            finished: false,
        })
    }

    /// Only emit keys accepted by `filter`.
    pub fn with_filter(mut self, filter: KeyFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Override the format version written into payload footers.
    pub fn with_payload_version(mut self, version: u16) -> Self {
        self.payload_version = version;
        self
    }

    /// Override the clock used to turn absolute expiries into TTLs.
    pub fn with_now_ms(mut self, now_ms: u64) -> Self {
        self.now_ms = now_ms;
        self
    }

    /// Format version declared in the header.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Counters so far.
    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    /// Bytes consumed from the source, header included.
    pub fn bytes_read(&self) -> u64 {
        self.reader.offset()
    }

    fn next_entry(&mut self) -> Result<Option<Entry>> {
        loop {
            // An expiry applies to the very next key only.
            let mut expire_at_ms: Option<u64> = None;
            let mut opcode = self.reader.read_u8()?;

            match opcode {
                RDB_OPCODE_EXPIRETIME_MS => {
                    expire_at_ms = Some(self.reader.read_u64_le()?);
                    opcode = self.reader.read_u8()?;
                }
                RDB_OPCODE_EXPIRETIME => {
                    expire_at_ms = Some(self.reader.read_u32_le()? as u64 * 1000);
                    opcode = self.reader.read_u8()?;
                }
                _ => {}
            }

            match opcode {
                RDB_OPCODE_SELECTDB => {
                    let db = self.reader.read_length()?;
                    debug!(db, "selecting database");
                }
                RDB_OPCODE_RESIZEDB => {
                    let db_size = self.reader.read_length()?;
                    let expires_size = self.reader.read_length()?;
                    trace!(db_size, expires_size, "resize hint");
                }
                RDB_OPCODE_AUX => {
                    let field = self.reader.read_string(true)?;
                    let value = self.reader.read_string(true)?;
                    debug!(
                        field = %String::from_utf8_lossy(&field),
                        value = %String::from_utf8_lossy(&value),
                        "aux field"
                    );
                }
                RDB_OPCODE_EOF => return Ok(None),
                value_type => {
                    let key = self.reader.read_string(true)?;
                    let payload = self
                        .read_object(value_type)
                        .map_err(|e| e.with_key(&key))?;
                    self.stats.keys_decoded += 1;

                    let ttl_ms = match expire_at_ms {
                        None => 0,
                        Some(at) if at > self.now_ms => at - self.now_ms,
                        Some(_) => {
                            trace!(key = %String::from_utf8_lossy(&key), "skipping expired key");
                            self.stats.keys_expired += 1;
                            continue;
                        }
                    };

                    if let Some(filter) = &self.filter {
                        if !filter(&key) {
                            self.stats.keys_filtered += 1;
                            continue;
                        }
                    }

                    self.stats.keys_emitted += 1;
                    return Ok(Some(Entry {
                        key: Bytes::from(key),
                        payload: Bytes::from(payload),
                        ttl_ms,
                    }));
                }
            }
        }
    }

    /// Capture one object verbatim and seal it into a `DUMP` payload.
    fn read_object(&mut self, value_type: u8) -> Result<Vec<u8>> {
        self.reader.begin_capture(&[value_type]);
        let body = self.skip_body(value_type);
        let mut payload = self.reader.take_capture();
        body?;

        payload.extend_from_slice(&self.payload_version.to_le_bytes());
        let checksum = crc64(&payload);
        payload.extend_from_slice(&checksum.to_le_bytes());
        Ok(payload)
    }

    fn skip_body(&mut self, value_type: u8) -> Result<()> {
        match value_type {
            RDB_TYPE_STRING
            | RDB_TYPE_HASH_ZIPMAP
            | RDB_TYPE_LIST_ZIPLIST
            | RDB_TYPE_SET_INTSET
            | RDB_TYPE_ZSET_ZIPLIST
            | RDB_TYPE_HASH_ZIPLIST => self.skip_strings(1),
            RDB_TYPE_LIST | RDB_TYPE_SET | RDB_TYPE_LIST_QUICKLIST => {
                let len = self.reader.read_length()?;
                self.skip_strings(len)
            }
            RDB_TYPE_HASH => {
                let len = self.reader.read_length()?;
                for _ in 0..len {
                    self.skip_strings(2)?;
                }
                Ok(())
            }
            RDB_TYPE_ZSET => {
                let len = self.reader.read_length()?;
                for _ in 0..len {
                    self.reader.read_string(false)?;
                    self.skip_text_double()?;
                }
                Ok(())
            }
            RDB_TYPE_ZSET_2 => {
                let len = self.reader.read_length()?;
                for _ in 0..len {
                    self.reader.read_string(false)?;
                    self.reader.read_bytes(8)?;
                }
                Ok(())
            }
            other => Err(RdbError::decode(format!("invalid object type {}", other))),
        }
    }

    fn skip_strings(&mut self, count: u64) -> Result<()> {
        for _ in 0..count {
            self.reader.read_string(false)?;
        }
        Ok(())
    }

    /// Old sorted-set scores: a length byte then ASCII, or 253..=255 for
    /// NaN / +inf / -inf with no body.
    fn skip_text_double(&mut self) -> Result<()> {
        let len = self.reader.read_u8()?;
        if len < 253 {
            self.reader.read_bytes(len as u64)?;
        }
        Ok(())
    }
}

impl<R: Read> Iterator for DumpDecoder<R> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// Validate the magic marker and 4-digit version.
fn read_header<R: Read>(reader: &mut RdbReader<R>) -> Result<u32> {
    let magic = reader.read_bytes(RDB_MAGIC.len() as u64).map_err(|_| RdbError::Header)?;
    if magic != RDB_MAGIC {
        return Err(RdbError::Header);
    }

    let digits = reader
        .read_bytes(4)
        .map_err(|_| RdbError::Version("truncated".to_string()))?;
    let text = String::from_utf8_lossy(&digits).into_owned();
    if !digits.iter().all(u8::is_ascii_digit) {
        return Err(RdbError::Version(text));
    }
    let version: u32 = text.parse().map_err(|_| RdbError::Version(text.clone()))?;
    if !(MIN_RDB_VERSION..=MAX_RDB_VERSION).contains(&version) {
        return Err(RdbError::Version(text));
    }
    Ok(version)
}

fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
