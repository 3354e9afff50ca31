//! Redis RDB snapshot decoding
//!
//! Streams a persisted RDB file and re-encodes every key as the exact
//! payload a live server would return from `DUMP`, so it can be replayed
//! with `RESTORE` on any compatible destination.
//!
//! RDB format: [REDIS magic] [4-digit version] [opcode stream] [EOF]

pub mod crc64;
pub mod decoder;
pub mod lzf;
pub mod reader;

pub use crc64::crc64;
pub use decoder::{DumpDecoder, Entry};
pub use lzf::lzf_decompress;

use std::io;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic marker every snapshot starts with.
pub const RDB_MAGIC: &[u8] = b"REDIS";

/// Oldest snapshot format version accepted.
pub const MIN_RDB_VERSION: u32 = 1;

/// Newest snapshot format version accepted.
pub const MAX_RDB_VERSION: u32 = 8;

/// Format version written into the footer of reconstructed payloads.
pub const DUMP_PAYLOAD_VERSION: u16 = 6;

pub(crate) const RDB_OPCODE_AUX: u8 = 0xFA;
pub(crate) const RDB_OPCODE_RESIZEDB: u8 = 0xFB;
pub(crate) const RDB_OPCODE_EXPIRETIME_MS: u8 = 0xFC;
pub(crate) const RDB_OPCODE_EXPIRETIME: u8 = 0xFD;
pub(crate) const RDB_OPCODE_SELECTDB: u8 = 0xFE;
pub(crate) const RDB_OPCODE_EOF: u8 = 0xFF;

pub(crate) const RDB_TYPE_STRING: u8 = 0;
pub(crate) const RDB_TYPE_LIST: u8 = 1;
pub(crate) const RDB_TYPE_SET: u8 = 2;
pub(crate) const RDB_TYPE_ZSET: u8 = 3;
pub(crate) const RDB_TYPE_HASH: u8 = 4;
pub(crate) const RDB_TYPE_ZSET_2: u8 = 5;
pub(crate) const RDB_TYPE_HASH_ZIPMAP: u8 = 9;
pub(crate) const RDB_TYPE_LIST_ZIPLIST: u8 = 10;
pub(crate) const RDB_TYPE_SET_INTSET: u8 = 11;
pub(crate) const RDB_TYPE_ZSET_ZIPLIST: u8 = 12;
pub(crate) const RDB_TYPE_HASH_ZIPLIST: u8 = 13;
pub(crate) const RDB_TYPE_LIST_QUICKLIST: u8 = 14;

// Length encoding
pub(crate) const RDB_6BITLEN: u8 = 0;
pub(crate) const RDB_14BITLEN: u8 = 1;
pub(crate) const RDB_32BITLEN: u8 = 0x80;
pub(crate) const RDB_64BITLEN: u8 = 0x81;
pub(crate) const RDB_ENCVAL: u8 = 3;
pub(crate) const RDB_ENC_INT8: u8 = 0;
pub(crate) const RDB_ENC_INT16: u8 = 1;
pub(crate) const RDB_ENC_INT32: u8 = 2;
pub(crate) const RDB_ENC_LZF: u8 = 3;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur while decoding a snapshot.
///
/// Every variant is fatal for the snapshot being read; none of them aborts
/// other sources in a multi-source run.
#[derive(Debug, thiserror::Error)]
pub enum RdbError {
    /// The file does not start with the `REDIS` magic marker.
    #[error("invalid magic: expected REDIS header")]
    Header,

    /// The declared format version is outside the supported range.
    #[error("unsupported RDB version: {0}")]
    Version(String),

    /// Unknown object type, bad length encoding, or a truncated stream.
    #[error("decode error{}: {reason}", key.as_deref().map(|k| format!(" at key {k:?}")).unwrap_or_default())]
    Decode {
        /// Key being decoded when the failure happened, if one was read.
        key: Option<String>,
        /// What went wrong.
        reason: String,
    },

    /// A compressed block could not be expanded.
    #[error("LZF decompression error: {0}")]
    Compression(String),

    /// Underlying I/O failure other than a short read.
    #[error("I/O error: {0}")]
    Io(#[source] io::Error),
}

impl RdbError {
    pub(crate) fn decode(reason: impl Into<String>) -> Self {
        RdbError::Decode {
            key: None,
            reason: reason.into(),
        }
    }

    /// Attach the key being decoded, keeping any key already recorded.
    pub(crate) fn with_key(self, key: &[u8]) -> Self {
        match self {
            RdbError::Decode { key: None, reason } => RdbError::Decode {
                key: Some(String::from_utf8_lossy(key).into_owned()),
                reason,
            },
            other => other,
        }
    }
}

impl From<io::Error> for RdbError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            RdbError::decode("unexpected end of stream")
        } else {
            RdbError::Io(e)
        }
    }
}

/// Result type for snapshot operations.
pub type Result<T> = std::result::Result<T, RdbError>;
