//! The store capability migration needs from a live instance.
//!
//! Every method is one grouped round trip: the engine never issues
//! per-key network calls on its own.

use async_trait::async_trait;
use bytes::Bytes;

/// Error type for store operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Transient condition: the server is loading, or the key appeared
    /// concurrently (`LOADING`, `BUSYKEY`).
    #[error("busy: {0}")]
    Busy(String),
    /// The server rejected the command.
    #[error("command error: {0}")]
    Command(String),
    /// Transport failure.
    #[error("connection error: {0}")]
    Connection(String),
}

impl StoreError {
    /// Whether this is the benign busy class.
    pub fn is_busy(&self) -> bool {
        matches!(self, StoreError::Busy(_))
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Capability metadata reported by a server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    /// Server version string, e.g. `"7.2.4"`.
    pub version: String,
    /// Whether the server is part of a sharded cluster.
    pub cluster_enabled: bool,
}

/// How one key is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStrategy {
    /// `RESTORE ... REPLACE`
    Replace,
    /// `DEL` then plain `RESTORE`
    DeleteThenRestore,
    /// Plain `RESTORE`, failing if the key exists.
    IfAbsent,
}

/// One queued write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreCommand {
    /// Target key.
    pub key: Bytes,
    /// TTL in milliseconds, `0` for none.
    pub ttl_ms: u64,
    /// `DUMP`-format payload.
    pub payload: Bytes,
    /// Write semantics.
    pub strategy: WriteStrategy,
}

/// A key-value server reachable for migration.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// One `SCAN` step. A returned cursor of `0` ends the iteration.
    async fn scan(
        &self,
        cursor: u64,
        count: usize,
        pattern: Option<&str>,
    ) -> StoreResult<(u64, Vec<Bytes>)>;

    /// `DUMP` + `PTTL` for each key, in order. `None` means the key vanished;
    /// the TTL is as reported (negative for none).
    async fn dump_with_ttl(&self, keys: &[Bytes]) -> StoreResult<Vec<Option<(Bytes, i64)>>>;

    /// `EXISTS` for each key, in order.
    async fn exists(&self, keys: &[Bytes]) -> StoreResult<Vec<bool>>;

    /// Submit all writes together. The outer error means the group could
    /// not be sent; the inner results are per command, in order.
    async fn restore(&self, commands: &[RestoreCommand]) -> StoreResult<Vec<StoreResult<()>>>;

    /// Version and topology.
    async fn info(&self) -> StoreResult<ServerInfo>;
}
