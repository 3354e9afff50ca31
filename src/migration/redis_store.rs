//! [`KeyValueStore`] over a Redis-protocol connection.
//!
//! Grouped calls are issued as concurrent requests on one multiplexed
//! connection, which writes them to the socket back to back and reads the
//! replies in order: one round trip per group, with a separate result for
//! every command. Cluster destinations use a cluster connection that routes
//! each request to the node owning its key.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use redis::aio::MultiplexedConnection;
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::{Cmd, ErrorKind, FromRedisValue, Pipeline, RedisError, RedisResult};
use tracing::{debug, info};

use super::store::{
    KeyValueStore, RestoreCommand, ServerInfo, StoreError, StoreResult, WriteStrategy,
};

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        let busy = err.kind() == ErrorKind::BusyLoadingError
            || matches!(err.code(), Some("BUSYKEY") | Some("LOADING"));
        if busy {
            StoreError::Busy(err.to_string())
        } else if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

#[derive(Clone)]
enum Connection {
    Single(MultiplexedConnection),
    Cluster(ClusterConnection),
}

impl Connection {
    async fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> RedisResult<T> {
        match self {
            Connection::Single(conn) => cmd.query_async(&mut conn.clone()).await,
            Connection::Cluster(conn) => cmd.query_async(&mut conn.clone()).await,
        }
    }

    async fn query_pipeline<T: FromRedisValue>(&self, pipe: &Pipeline) -> RedisResult<T> {
        match self {
            Connection::Single(conn) => pipe.query_async(&mut conn.clone()).await,
            Connection::Cluster(conn) => pipe.query_async(&mut conn.clone()).await,
        }
    }
}

/// A live Redis or Ferrite instance.
#[derive(Clone)]
pub struct RedisStore {
    url: String,
    conn: Connection,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("url", &self.url)
            .field("cluster", &matches!(self.conn, Connection::Cluster(_)))
            .finish()
    }
}

impl RedisStore {
    /// Connect to a standalone endpoint.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        debug!(url, "connecting");
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            url: url.to_string(),
            conn: Connection::Single(conn),
        })
    }

    /// Connect to a destination, switching to a cluster connection when the
    /// endpoint reports `cluster_enabled:1`.
    pub async fn connect_destination(url: &str) -> StoreResult<Self> {
        let store = Self::connect(url).await?;
        if !store.info().await?.cluster_enabled {
            return Ok(store);
        }

        info!(url, "destination is a cluster");
        let client = ClusterClient::new(vec![url.to_string()])?;
        let conn = client.get_async_connection().await?;
        Ok(Self {
            url: url.to_string(),
            conn: Connection::Cluster(conn),
        })
    }

    /// Endpoint this store talks to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether this is a cluster connection.
    pub fn is_cluster(&self) -> bool {
        matches!(self.conn, Connection::Cluster(_))
    }

    async fn info_section(&self, section: &str) -> StoreResult<String> {
        Ok(self.conn.query(redis::cmd("INFO").arg(section)).await?)
    }
}

fn restore_pipeline(command: &RestoreCommand) -> Pipeline {
    let mut pipe = redis::pipe();
    if command.strategy == WriteStrategy::DeleteThenRestore {
        pipe.cmd("DEL").arg(command.key.as_ref()).ignore();
    }
    pipe.cmd("RESTORE")
        .arg(command.key.as_ref())
        .arg(command.ttl_ms)
        .arg(command.payload.as_ref());
    if command.strategy == WriteStrategy::Replace {
        pipe.arg("REPLACE");
    }
    pipe
}

/// Value of `field` in an `INFO` reply.
fn info_field<'a>(info: &'a str, field: &str) -> Option<&'a str> {
    info.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        (name == field).then(|| value.trim())
    })
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn scan(
        &self,
        cursor: u64,
        count: usize,
        pattern: Option<&str>,
    ) -> StoreResult<(u64, Vec<Bytes>)> {
        let mut cmd = redis::cmd("SCAN");
        cmd.arg(cursor).arg("COUNT").arg(count);
        if let Some(pattern) = pattern {
            cmd.arg("MATCH").arg(pattern);
        }
        let (next, keys): (u64, Vec<Vec<u8>>) = self.conn.query(&cmd).await?;
        Ok((next, keys.into_iter().map(Bytes::from).collect()))
    }

    async fn dump_with_ttl(&self, keys: &[Bytes]) -> StoreResult<Vec<Option<(Bytes, i64)>>> {
        let requests = keys.iter().map(|key| async move {
            let mut pipe = redis::pipe();
            pipe.cmd("DUMP").arg(key.as_ref()).cmd("PTTL").arg(key.as_ref());
            self.conn
                .query_pipeline::<(Option<Vec<u8>>, i64)>(&pipe)
                .await
        });

        let mut out = Vec::with_capacity(keys.len());
        for reply in join_all(requests).await {
            let (payload, pttl) = reply?;
            out.push(payload.map(|p| (Bytes::from(p), pttl)));
        }
        Ok(out)
    }

    async fn exists(&self, keys: &[Bytes]) -> StoreResult<Vec<bool>> {
        let requests = keys.iter().map(|key| async move {
            self.conn
                .query::<bool>(redis::cmd("EXISTS").arg(key.as_ref()))
                .await
        });
        join_all(requests)
            .await
            .into_iter()
            .map(|r| r.map_err(StoreError::from))
            .collect()
    }

    async fn restore(&self, commands: &[RestoreCommand]) -> StoreResult<Vec<StoreResult<()>>> {
        let requests = commands.iter().map(|command| async move {
            self.conn
                .query_pipeline::<()>(&restore_pipeline(command))
                .await
                .map_err(StoreError::from)
        });
        let results = join_all(requests).await;

        // A dropped transport fails every command; report it for the group.
        if let Some(Err(StoreError::Connection(msg))) = results
            .iter()
            .find(|r| matches!(r, Err(StoreError::Connection(_))))
        {
            if results.iter().all(|r| r.is_err()) {
                return Err(StoreError::Connection(msg.clone()));
            }
        }
        Ok(results)
    }

    async fn info(&self) -> StoreResult<ServerInfo> {
        let server = self.info_section("server").await?;
        let cluster = self.info_section("cluster").await?;
        Ok(ServerInfo {
            version: info_field(&server, "redis_version")
                .unwrap_or("unknown")
                .to_string(),
            cluster_enabled: info_field(&cluster, "cluster_enabled") == Some("1"),
        })
    }
}
