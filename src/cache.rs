//! The Redis-compatible cache that holds precomputed aggregate results.
//!
//! The batch job writes one JSON array per (node, metric, timeframe) and the
//! lookup API reads them back. Nothing here is transactional: plain SET, GET
//! and SCAN.

use async_trait::async_trait;
use lambda_runtime::tracing;
use redis::{aio::MultiplexedConnection, AsyncCommands, RedisError, RedisResult};
use std::future::Future;
use tokio::sync::Mutex;

use crate::{error::Result, timeframe::Timeframe};

/// How many keys we ask for per SCAN round trip.
const SCAN_COUNT: usize = 100;

pub fn cache_key(node_id: &str, metric_id: &str, timeframe: Timeframe) -> String {
    format!("athena_data_{node_id}_{metric_id}_{timeframe}")
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// One SCAN step. A returned cursor of zero means the iteration is done.
    async fn scan(&self, cursor: u64) -> Result<(Vec<String>, u64)>;
}

/// Walk the whole keyspace.
pub async fn list_all_keys(store: &dyn CacheStore) -> Result<Vec<String>> {
    let mut keys = Vec::new();
    let mut cursor = 0;

    loop {
        let (mut batch, next) = store.scan(cursor).await?;
        keys.append(&mut batch);

        if next == 0 {
            break;
        }

        cursor = next;
    }

    Ok(keys)
}

/// A lazily opened, shareable connection that can be thrown away and
/// reopened after it breaks.
///
/// Callers hold the lock while connecting, so concurrent first users all wait
/// on the same connection attempt. Every successful connect bumps a
/// generation number; `invalidate` only clears the slot if it still holds the
/// connection of the given generation, so that a caller reporting a stale
/// failure can't throw away a connection somebody else just reopened.
pub struct LazyConnection<C> {
    slot: Mutex<Slot<C>>,
}

struct Slot<C> {
    generation: u64,
    conn: Option<C>,
}

impl<C> Default for LazyConnection<C> {
    fn default() -> Self {
        LazyConnection {
            slot: Mutex::new(Slot {
                generation: 0,
                conn: None,
            }),
        }
    }
}

impl<C: Clone> LazyConnection<C> {
    /// Get the current connection and its generation, connecting if needed.
    pub async fn get<E, F, Fut>(&self, connect: F) -> std::result::Result<(u64, C), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<C, E>>,
    {
        let mut slot = self.slot.lock().await;

        if let Some(conn) = &slot.conn {
            return Ok((slot.generation, conn.clone()));
        }

        let conn = connect().await?;
        slot.generation += 1;
        slot.conn = Some(conn.clone());
        Ok((slot.generation, conn))
    }

    pub async fn invalidate(&self, generation: u64) {
        let mut slot = self.slot.lock().await;

        if slot.generation == generation {
            slot.conn = None;
        }
    }

    /// Run `op` on the connection. If it fails in a way that `broken` says
    /// means the connection is gone, reconnect and try once more.
    pub async fn run<T, E, F, Fut, O, OFut, B>(
        &self,
        connect: F,
        op: O,
        broken: B,
    ) -> std::result::Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<C, E>>,
        O: Fn(C) -> OFut,
        OFut: Future<Output = std::result::Result<T, E>>,
        B: Fn(&E) -> bool,
    {
        let (generation, conn) = self.get(&connect).await?;

        match op(conn).await {
            Err(e) if broken(&e) => {
                tracing::warn!("cache connection lost; reconnecting");
                self.invalidate(generation).await;
                let (_, conn) = self.get(&connect).await?;
                op(conn).await
            }

            other => other,
        }
    }
}

/// Redis access through one process-wide multiplexed connection.
///
/// The connection is opened on first use rather than at startup, so that
/// Lambda functions that never touch the cache never pay for the TLS
/// handshake. A warm Lambda container can outlive its connection (idle
/// timeouts, failovers); when a command fails because the connection went
/// away we reconnect and retry it once.
pub struct RedisCache {
    client: redis::Client,
    conn: LazyConnection<MultiplexedConnection>,
}

fn connection_broken(e: &RedisError) -> bool {
    e.is_connection_dropped() || e.is_io_error()
}

impl RedisCache {
    /// Parse the URL; doesn't connect.
    pub fn new(url: &str) -> Result<Self> {
        Ok(RedisCache {
            client: redis::Client::open(url)?,
            conn: LazyConnection::default(),
        })
    }

    async fn connect(&self) -> RedisResult<MultiplexedConnection> {
        tracing::info!("connecting to Redis ...");
        let c = self.client.get_multiplexed_async_connection().await?;
        tracing::info!("connected to Redis");
        Ok(c)
    }

    async fn with_connection<T, O, OFut>(&self, op: O) -> Result<T>
    where
        O: Fn(MultiplexedConnection) -> OFut,
        OFut: Future<Output = RedisResult<T>>,
    {
        Ok(self
            .conn
            .run(|| self.connect(), op, connection_broken)
            .await?)
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.with_connection(|mut conn| async move {
            let _: () = conn.set(key, value).await?;
            RedisResult::Ok(())
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_connection(|mut conn| async move { conn.get(key).await })
            .await
    }

    async fn scan(&self, cursor: u64) -> Result<(Vec<String>, u64)> {
        let (next, keys): (u64, Vec<String>) = self
            .with_connection(|mut conn| async move {
                redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg("*")
                    .arg("COUNT")
                    .arg(SCAN_COUNT)
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok((keys, next))
    }
}
