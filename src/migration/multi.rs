//! Running several sources into one destination.

use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tracing::{info, warn};

use super::engine::{resolve_strategy, MigrationOptions, Migrator};
use super::source::Source;
use super::store::KeyValueStore;
use super::{CopyMode, Result};
use crate::pattern::KeyPattern;

/// How one source went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceOutcome {
    /// Source label.
    pub source: String,
    /// Keys processed from this source.
    pub keys: u64,
    /// Why the source was abandoned, if it was.
    pub error: Option<String>,
}

/// Result of a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Keys processed across all sources.
    pub processed: u64,
    /// One entry per source that was started.
    pub sources: Vec<SourceOutcome>,
    /// Whether a stop was requested before every source finished.
    pub interrupted: bool,
}

impl RunSummary {
    /// Sources abandoned because of an error.
    pub fn failed(&self) -> impl Iterator<Item = &SourceOutcome> {
        self.sources.iter().filter(|s| s.error.is_some())
    }

    /// Every source ran to completion.
    pub fn is_success(&self) -> bool {
        !self.interrupted && self.failed().next().is_none()
    }
}

/// Migrate every source in order into `dst`.
///
/// Sources run one after another. A source that fails to decode or read is
/// recorded and the next one starts; any other error ends the run. `stop`
/// is checked before each batch, and `on_key` sees every processed key with
/// the running total.
pub async fn run_sources<F>(
    sources: Vec<Source>,
    dst: Option<&dyn KeyValueStore>,
    pattern: &KeyPattern,
    mode: CopyMode,
    options: &MigrationOptions,
    stop: &AtomicBool,
    mut on_key: F,
) -> Result<RunSummary>
where
    F: FnMut(&Bytes, u64),
{
    let strategy = match (mode, dst) {
        (CopyMode::Mirror, Some(dst)) => {
            Some(resolve_strategy(dst, &options.min_replace_version).await?)
        }
        _ => None,
    };

    let mut summary = RunSummary::default();

    for source in sources {
        if stop.load(Ordering::SeqCst) {
            summary.interrupted = true;
            break;
        }

        let label = source.label();
        info!(source = %label, ?mode, "migrating source");

        let mut outcome = SourceOutcome {
            source: label.clone(),
            keys: 0,
            error: None,
        };

        let migrator = Migrator::new(source, dst, pattern.clone(), mode, options)
            .map(|m| match strategy {
                Some(strategy) => m.with_strategy(strategy),
                None => m,
            });
        let mut migrator = match migrator {
            Ok(migrator) => migrator,
            Err(err) if !err.aborts_run() => {
                warn!(source = %label, %err, "source abandoned");
                outcome.error = Some(err.to_string());
                summary.sources.push(outcome);
                continue;
            }
            Err(err) => return Err(err),
        };

        loop {
            if stop.load(Ordering::SeqCst) {
                summary.interrupted = true;
                break;
            }
            match migrator.next_batch().await {
                Ok(Some(keys)) => {
                    for key in &keys {
                        summary.processed += 1;
                        on_key(key, summary.processed);
                    }
                    outcome.keys += keys.len() as u64;
                }
                Ok(None) => break,
                Err(err) if !err.aborts_run() => {
                    warn!(source = %label, %err, "source abandoned");
                    outcome.error = Some(err.to_string());
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        info!(source = %label, keys = outcome.keys, "source finished");
        summary.sources.push(outcome);
        if summary.interrupted {
            break;
        }
    }

    Ok(summary)
}
