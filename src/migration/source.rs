//! Where keys come from.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::redis_store::RedisStore;
use super::store::KeyValueStore;
use super::{MigrationError, Result};

/// Scheme marking a snapshot file descriptor.
const RDB_SCHEME: &str = "rdb://";

/// An opened migration source.
#[derive(Clone)]
pub enum Source {
    /// A running instance, enumerated with `SCAN`.
    Live {
        /// Name used in logs and summaries.
        label: String,
        /// Connection to read from.
        store: Arc<dyn KeyValueStore>,
    },
    /// An RDB snapshot on disk.
    Snapshot(PathBuf),
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Live { label, .. } => f.debug_tuple("Live").field(label).finish(),
            Source::Snapshot(path) => f.debug_tuple("Snapshot").field(path).finish(),
        }
    }
}

impl Source {
    /// A snapshot file source.
    pub fn snapshot(path: impl Into<PathBuf>) -> Self {
        Source::Snapshot(path.into())
    }

    /// A live source over any store.
    pub fn live(label: impl Into<String>, store: Arc<dyn KeyValueStore>) -> Self {
        Source::Live {
            label: label.into(),
            store,
        }
    }

    /// Human-readable name.
    pub fn label(&self) -> String {
        match self {
            Source::Live { label, .. } => label.clone(),
            Source::Snapshot(path) => path.display().to_string(),
        }
    }
}

/// A parsed but not yet opened source or destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDescriptor {
    /// Connection URL of a running instance.
    Live(String),
    /// Path to a snapshot file.
    Snapshot(PathBuf),
}

impl SourceDescriptor {
    /// Parse one descriptor.
    ///
    /// `rdb://path` and anything without a `:` name a snapshot file;
    /// `redis://`, `rediss://` and `unix://` URLs are used as given, and a
    /// bare `host:port` becomes `redis://host:port`.
    pub fn parse(descriptor: &str) -> Result<Self> {
        let descriptor = descriptor.trim();
        if descriptor.is_empty() {
            return Err(MigrationError::Config("empty source descriptor".into()));
        }

        if let Some(path) = descriptor.strip_prefix(RDB_SCHEME) {
            if path.is_empty() {
                return Err(MigrationError::Config(format!(
                    "snapshot descriptor {descriptor:?} has no path"
                )));
            }
            return Ok(SourceDescriptor::Snapshot(PathBuf::from(path)));
        }

        if !descriptor.contains(':') {
            return Ok(SourceDescriptor::Snapshot(PathBuf::from(descriptor)));
        }

        Ok(SourceDescriptor::Live(endpoint_url(descriptor)?))
    }

    /// Parse a comma-separated list, ignoring blank entries.
    pub fn parse_list(descriptors: &str) -> Result<Vec<Self>> {
        let parsed: Vec<Self> = descriptors
            .split(',')
            .filter(|d| !d.trim().is_empty())
            .map(Self::parse)
            .collect::<Result<_>>()?;
        if parsed.is_empty() {
            return Err(MigrationError::Config("no sources given".into()));
        }
        Ok(parsed)
    }

    /// Connect to or locate the source.
    pub async fn open(&self) -> Result<Source> {
        match self {
            SourceDescriptor::Live(url) => {
                let store = RedisStore::connect(url)
                    .await
                    .map_err(MigrationError::Source)?;
                Ok(Source::live(url.clone(), Arc::new(store)))
            }
            SourceDescriptor::Snapshot(path) => Ok(Source::snapshot(path.clone())),
        }
    }

    /// Snapshot path, if this names one.
    pub fn snapshot_path(&self) -> Option<&Path> {
        match self {
            SourceDescriptor::Snapshot(path) => Some(path),
            SourceDescriptor::Live(_) => None,
        }
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceDescriptor::Live(url) => f.write_str(url),
            SourceDescriptor::Snapshot(path) => write!(f, "{}{}", RDB_SCHEME, path.display()),
        }
    }
}

/// Normalise a live endpoint descriptor into a connection URL.
pub fn endpoint_url(descriptor: &str) -> Result<String> {
    let descriptor = descriptor.trim();
    if let Some((scheme, rest)) = descriptor.split_once("://") {
        return match scheme {
            "redis" | "rediss" | "unix" if !rest.is_empty() => Ok(descriptor.to_string()),
            "redis" | "rediss" | "unix" => Err(MigrationError::Config(format!(
                "endpoint {descriptor:?} has no address"
            ))),
            other => Err(MigrationError::Config(format!(
                "unsupported endpoint scheme {other:?} in {descriptor:?}"
            ))),
        };
    }

    match descriptor.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
            Ok(format!("redis://{descriptor}"))
        }
        _ => Err(MigrationError::Config(format!(
            "endpoint {descriptor:?} is not host:port or a URL"
        ))),
    }
}
