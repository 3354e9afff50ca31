//! Batch-at-a-time key migration.
//!
//! A [`Migrator`] reads one batch of matching keys from its source, writes
//! it to the destination as one grouped call, and hands back the keys it
//! processed. Nothing runs between calls to [`Migrator::next_batch`], so
//! dropping the migrator at a batch boundary abandons the rest cleanly.

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use super::source::Source;
use super::store::{KeyValueStore, RestoreCommand, StoreError, WriteStrategy};
use super::strategy::RestoreStrategy;
use super::{
    CopyMode, MigrationError, Result, DEFAULT_BATCH_SIZE, MAX_BATCH_SIZE, MIN_REPLACE_VERSION,
};
use crate::pattern::KeyPattern;
use crate::rdb::{DumpDecoder, DUMP_PAYLOAD_VERSION};

/// Tunables for a migration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOptions {
    /// Keys per grouped read and write.
    pub batch_size: usize,
    /// Destination version from which `RESTORE ... REPLACE` is used.
    pub min_replace_version: String,
    /// Footer version for payloads rebuilt from snapshots.
    pub payload_version: u16,
    /// Clock override for snapshot expiries, in Unix milliseconds.
    pub now_ms: Option<u64>,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            min_replace_version: MIN_REPLACE_VERSION.to_string(),
            payload_version: DUMP_PAYLOAD_VERSION,
            now_ms: None,
        }
    }
}

/// Query the destination once and pick its overwrite strategy.
pub async fn resolve_strategy(
    dst: &dyn KeyValueStore,
    min_replace_version: &str,
) -> Result<RestoreStrategy> {
    let info = dst.info().await.map_err(MigrationError::Destination)?;
    let strategy = RestoreStrategy::select(&info, min_replace_version);
    debug!(
        version = %info.version,
        cluster = info.cluster_enabled,
        ?strategy,
        "restore strategy selected"
    );
    Ok(strategy)
}

/// A key read from a source, with its value once known.
struct Candidate {
    key: Bytes,
    value: Option<(Bytes, u64)>,
}

enum BatchReader {
    Live {
        store: Arc<dyn KeyValueStore>,
        cursor: u64,
        exhausted: bool,
    },
    Snapshot(DumpDecoder<BufReader<File>>),
}

/// Migrates keys from one source, one batch per call.
pub struct Migrator<'a> {
    reader: BatchReader,
    dst: Option<&'a dyn KeyValueStore>,
    pattern: KeyPattern,
    mode: CopyMode,
    strategy: Option<RestoreStrategy>,
    batch_size: usize,
    min_replace_version: String,
    pending_error: Option<MigrationError>,
    finished: bool,
    processed: u64,
}

impl fmt::Debug for Migrator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migrator")
            .field("pattern", &self.pattern)
            .field("mode", &self.mode)
            .field("strategy", &self.strategy)
            .field("batch_size", &self.batch_size)
            .field("processed", &self.processed)
            .field("finished", &self.finished)
            .finish()
    }
}

impl<'a> Migrator<'a> {
    /// Prepare a migration from `source`.
    ///
    /// Without a destination the run is a dry run whatever `mode` says.
    /// Snapshot headers are validated here.
    pub fn new(
        source: Source,
        dst: Option<&'a dyn KeyValueStore>,
        pattern: KeyPattern,
        mode: CopyMode,
        options: &MigrationOptions,
    ) -> Result<Self> {
        if options.batch_size == 0 {
            return Err(MigrationError::Config("batch size must be positive".into()));
        }
        if options.batch_size > MAX_BATCH_SIZE {
            return Err(MigrationError::Config(format!(
                "batch size {} exceeds the maximum of {MAX_BATCH_SIZE}",
                options.batch_size
            )));
        }

        let reader = match source {
            Source::Live { store, .. } => BatchReader::Live {
                store,
                cursor: 0,
                exhausted: false,
            },
            Source::Snapshot(path) => {
                let mut decoder = DumpDecoder::open(&path)?
                    .with_filter(pattern.predicate())
                    .with_payload_version(options.payload_version);
                if let Some(now_ms) = options.now_ms {
                    decoder = decoder.with_now_ms(now_ms);
                }
                BatchReader::Snapshot(decoder)
            }
        };

        let mode = if dst.is_none() { CopyMode::DryRun } else { mode };

        Ok(Self {
            reader,
            dst,
            pattern,
            mode,
            strategy: None,
            batch_size: options.batch_size,
            min_replace_version: options.min_replace_version.clone(),
            pending_error: None,
            finished: false,
            processed: 0,
        })
    }

    /// Use an already resolved strategy instead of querying the destination.
    pub fn with_strategy(mut self, strategy: RestoreStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Effective copy mode.
    pub fn mode(&self) -> CopyMode {
        self.mode
    }

    /// Keys processed so far.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Process the next batch and return the keys it covered.
    ///
    /// `Ok(None)` means the source is exhausted. When a write fails fatally,
    /// the keys already confirmed in that batch are returned first and the
    /// error on the following call.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<Bytes>>> {
        if let Some(err) = self.pending_error.take() {
            self.finished = true;
            return Err(err);
        }
        if self.finished {
            return Ok(None);
        }

        let result = self.step().await;
        match &result {
            Ok(Some(keys)) => self.processed += keys.len() as u64,
            Ok(None) | Err(_) => self.finished = true,
        }
        result
    }

    /// Drain the source, counting processed keys.
    pub async fn run(&mut self) -> Result<u64> {
        while self.next_batch().await?.is_some() {}
        Ok(self.processed)
    }

    async fn step(&mut self) -> Result<Option<Vec<Bytes>>> {
        // Filtering can empty a batch; keep going until something survives.
        loop {
            let Some(batch) = self.read_batch().await? else {
                return Ok(None);
            };

            let keys = match (self.mode, self.dst) {
                (CopyMode::DryRun, _) | (_, None) => {
                    batch.into_iter().map(|c| c.key).collect()
                }
                (CopyMode::Backfill, Some(dst)) => self.backfill(dst, batch).await?,
                (CopyMode::Mirror, Some(dst)) => self.mirror(dst, batch).await?,
            };

            if !keys.is_empty() || self.pending_error.is_some() {
                return Ok(Some(keys));
            }
        }
    }

    /// One batch of filtered candidates, or `None` once the source is done.
    async fn read_batch(&mut self) -> Result<Option<Vec<Candidate>>> {
        match &mut self.reader {
            BatchReader::Live {
                store,
                cursor,
                exhausted,
            } => {
                if *exhausted {
                    return Ok(None);
                }
                let (next, keys) = store
                    .scan(*cursor, self.batch_size, self.pattern.scan_match())
                    .await
                    .map_err(MigrationError::Source)?;
                *cursor = next;
                *exhausted = next == 0;

                let candidates: Vec<Candidate> = keys
                    .into_iter()
                    .filter(|key| self.pattern.matches(key))
                    .map(|key| Candidate { key, value: None })
                    .collect();
                debug!(keys = candidates.len(), cursor = next, "scanned batch");
                Ok(Some(candidates))
            }
            BatchReader::Snapshot(decoder) => {
                let mut candidates = Vec::with_capacity(self.batch_size.min(DEFAULT_BATCH_SIZE));
                for entry in decoder.by_ref().take(self.batch_size) {
                    let entry = entry?;
                    candidates.push(Candidate {
                        key: entry.key,
                        value: Some((entry.payload, entry.ttl_ms)),
                    });
                }
                if candidates.is_empty() {
                    debug!(stats = ?decoder.stats(), "snapshot exhausted");
                    return Ok(None);
                }
                debug!(keys = candidates.len(), offset = decoder.bytes_read(), "decoded batch");
                Ok(Some(candidates))
            }
        }
    }

    /// Fill in values for candidates read from a live source, dropping keys
    /// that vanished since the scan.
    async fn fetch_values(&self, batch: Vec<Candidate>) -> Result<Vec<(Bytes, Bytes, u64)>> {
        let (known, missing): (Vec<Candidate>, Vec<Candidate>) =
            batch.into_iter().partition(|c| c.value.is_some());

        let mut out: Vec<(Bytes, Bytes, u64)> = known
            .into_iter()
            .filter_map(|c| c.value.map(|(payload, ttl)| (c.key, payload, ttl)))
            .collect();
        if missing.is_empty() {
            return Ok(out);
        }

        let BatchReader::Live { store, .. } = &self.reader else {
            return Ok(out);
        };
        let keys: Vec<Bytes> = missing.into_iter().map(|c| c.key).collect();
        let dumps = store
            .dump_with_ttl(&keys)
            .await
            .map_err(MigrationError::Source)?;

        for (key, dump) in keys.into_iter().zip(dumps) {
            match dump {
                Some((payload, pttl)) => {
                    let ttl = if pttl < 1 { 0 } else { pttl as u64 };
                    out.push((key, payload, ttl));
                }
                None => debug!(key = %String::from_utf8_lossy(&key), "key vanished before dump"),
            }
        }
        Ok(out)
    }

    async fn backfill(
        &mut self,
        dst: &dyn KeyValueStore,
        batch: Vec<Candidate>,
    ) -> Result<Vec<Bytes>> {
        let keys: Vec<Bytes> = batch.iter().map(|c| c.key.clone()).collect();
        let present = dst.exists(&keys).await.map_err(MigrationError::Destination)?;

        let absent: Vec<Candidate> = batch
            .into_iter()
            .zip(present)
            .filter_map(|(candidate, exists)| (!exists).then_some(candidate))
            .collect();
        if absent.is_empty() {
            return Ok(Vec::new());
        }

        let values = self.fetch_values(absent).await?;
        self.write(dst, values, WriteStrategy::IfAbsent, true).await
    }

    async fn mirror(&mut self, dst: &dyn KeyValueStore, batch: Vec<Candidate>) -> Result<Vec<Bytes>> {
        let strategy = match self.strategy {
            Some(strategy) => strategy,
            None => {
                let strategy = resolve_strategy(dst, &self.min_replace_version).await?;
                self.strategy = Some(strategy);
                strategy
            }
        };

        let values = self.fetch_values(batch).await?;
        self.write(dst, values, strategy.write_strategy(), false).await
    }

    /// Flush one grouped write and sort out the per-key results.
    async fn write(
        &mut self,
        dst: &dyn KeyValueStore,
        values: Vec<(Bytes, Bytes, u64)>,
        strategy: WriteStrategy,
        skip_busy: bool,
    ) -> Result<Vec<Bytes>> {
        if values.is_empty() {
            return Ok(Vec::new());
        }

        let commands: Vec<RestoreCommand> = values
            .into_iter()
            .map(|(key, payload, ttl_ms)| RestoreCommand {
                key,
                ttl_ms,
                payload,
                strategy,
            })
            .collect();
        let results = dst
            .restore(&commands)
            .await
            .map_err(MigrationError::Destination)?;

        let mut written = Vec::with_capacity(commands.len());
        for (command, result) in commands.into_iter().zip(results) {
            match result {
                Ok(()) => written.push(command.key),
                Err(err) if skip_busy && err.is_busy() => {
                    warn!(key = %String::from_utf8_lossy(&command.key), %err, "destination busy, skipping key");
                }
                Err(err) => {
                    if self.pending_error.is_none() {
                        self.pending_error = Some(restore_error(&command.key, err));
                    }
                }
            }
        }
        debug!(written = written.len(), ?strategy, "batch flushed");
        Ok(written)
    }
}

fn restore_error(key: &[u8], err: StoreError) -> MigrationError {
    MigrationError::Restore {
        key: String::from_utf8_lossy(key).into_owned(),
        busy: err.is_busy(),
        message: err.to_string(),
    }
}
