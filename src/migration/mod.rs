//! Key migration
//!
//! Copies keys from live instances or RDB snapshots into a destination using
//! `DUMP`/`RESTORE` payloads, so values of every type move without being
//! interpreted.
//!
//! # Example
//!
//! ```ignore
//! use ferrite_import::migration::{CopyMode, MigrationOptions, Migrator, RedisStore, Source};
//! use ferrite_import::pattern::KeyPattern;
//!
//! let dst = RedisStore::connect_destination("redis://127.0.0.1:6380").await?;
//! let pattern = KeyPattern::parse(Some("user:*"))?;
//! let source = Source::snapshot("/var/lib/redis/dump.rdb");
//! let options = MigrationOptions::default();
//!
//! let mut migrator = Migrator::new(source, Some(&dst), pattern, CopyMode::Mirror, &options)?;
//! while let Some(keys) = migrator.next_batch().await? {
//!     println!("copied {} keys", keys.len());
//! }
//! ```

pub mod engine;
pub mod multi;
pub mod redis_store;
pub mod source;
pub mod store;
pub mod strategy;

pub use engine::{resolve_strategy, MigrationOptions, Migrator};
pub use multi::{run_sources, RunSummary, SourceOutcome};
pub use redis_store::RedisStore;
pub use source::{Source, SourceDescriptor};
pub use store::{KeyValueStore, RestoreCommand, ServerInfo, StoreError, WriteStrategy};
pub use strategy::{compare_versions, RestoreStrategy};

use crate::rdb::RdbError;

/// Keys per grouped read and grouped write.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Largest accepted batch size.
pub const MAX_BATCH_SIZE: usize = 100_000;

/// First destination version whose `RESTORE` accepts `REPLACE`.
pub const MIN_REPLACE_VERSION: &str = "3.0";

/// Migration error
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// The snapshot being read is malformed or unsupported.
    #[error(transparent)]
    Rdb(#[from] RdbError),

    /// Reading from a live source failed.
    #[error("source error: {0}")]
    Source(#[source] StoreError),

    /// A grouped call against the destination failed as a whole.
    #[error("destination error: {0}")]
    Destination(#[source] StoreError),

    /// A single key could not be restored.
    #[error("restore of key {key:?} failed: {message}")]
    Restore {
        /// Key that failed.
        key: String,
        /// Whether the destination reported a transient busy condition.
        busy: bool,
        /// Destination-reported reason.
        message: String,
    },

    /// Invalid configuration or arguments.
    #[error("configuration error: {0}")]
    Config(String),
}

impl MigrationError {
    /// Whether this error ends the whole run rather than just one source.
    pub fn aborts_run(&self) -> bool {
        !matches!(self, MigrationError::Rdb(_) | MigrationError::Source(_))
    }
}

/// Migration result type
pub type Result<T> = std::result::Result<T, MigrationError>;

/// How keys are written into the destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CopyMode {
    /// Overwrite every matching key.
    Mirror,
    /// Only write keys the destination does not already hold.
    Backfill,
    /// Enumerate matching keys without writing anything.
    DryRun,
}

impl CopyMode {
    /// Pick the mode from the CLI-style flags.
    pub fn from_flags(dry_run: bool, backfill: bool) -> Self {
        if dry_run {
            CopyMode::DryRun
        } else if backfill {
            CopyMode::Backfill
        } else {
            CopyMode::Mirror
        }
    }
}
