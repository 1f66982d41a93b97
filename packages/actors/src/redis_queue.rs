//! Redis list-backed queue shared by several worker processes.
//!
//! Producers `RPUSH` JSON-encoded hints onto one list and consumers
//! `BLPOP` from its head, so every process pointed at the same key pulls
//! from one FIFO.

use std::time::Duration;

use dispatch_core::QueueItem;
use futures_util::future::BoxFuture;
use redis::aio::MultiplexedConnection;
use tokio::sync::{Mutex, OnceCell};

use crate::queue::{JobQueue, QueueError};

/// List key used when none is configured.
pub const DEFAULT_QUEUE_KEY: &str = "dispatch:jobs";

pub struct RedisQueue {
    client: redis::Client,
    key: String,
    /// Shared connection for non-blocking commands.
    shared: OnceCell<MultiplexedConnection>,
    /// Idle connections for blocking pops. A `BLPOP` stalls every other
    /// command on its connection, so each consumer borrows one of these.
    blocking: Mutex<Vec<MultiplexedConnection>>,
}

impl RedisQueue {
    /// Create a queue on `key` at `redis_url` (e.g. "redis://localhost:6379").
    ///
    /// Connections are opened on first use.
    pub fn new(redis_url: &str, key: impl Into<String>) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::Unavailable(format!("Invalid Redis URL: {}", e)))?;
        Ok(Self {
            client,
            key: key.into(),
            shared: OnceCell::new(),
            blocking: Mutex::new(Vec::new()),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    async fn shared(&self) -> Result<MultiplexedConnection, QueueError> {
        let conn = self
            .shared
            .get_or_try_init(|| async {
                self.client
                    .get_multiplexed_async_connection()
                    .await
                    .map_err(unavailable)
            })
            .await?;
        Ok(conn.clone())
    }

    async fn checkout(&self) -> Result<MultiplexedConnection, QueueError> {
        if let Some(conn) = self.blocking.lock().await.pop() {
            return Ok(conn);
        }
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(unavailable)
    }

    async fn push(&self, item: QueueItem) -> Result<(), QueueError> {
        let entry = encode(&item)?;
        let mut conn = self.shared().await?;
        redis::cmd("RPUSH")
            .arg(&self.key)
            .arg(entry)
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(|e| QueueError::Unavailable(format!("RPUSH failed: {}", e)))?;
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<QueueItem>, QueueError> {
        let entry = if timeout.is_zero() {
            let mut conn = self.shared().await?;
            redis::cmd("LPOP")
                .arg(&self.key)
                .query_async::<_, Option<String>>(&mut conn)
                .await
                .map_err(|e| QueueError::Unavailable(format!("LPOP failed: {}", e)))?
        } else {
            let mut conn = self.checkout().await?;
            // a zero BLPOP timeout would block forever
            let secs = timeout.as_secs_f64().max(0.01);
            let popped = redis::cmd("BLPOP")
                .arg(&self.key)
                .arg(secs)
                .query_async::<_, Option<(String, String)>>(&mut conn)
                .await
                .map_err(|e| QueueError::Unavailable(format!("BLPOP failed: {}", e)))?;
            self.blocking.lock().await.push(conn);
            popped.map(|(_, entry)| entry)
        };

        entry.map(|entry| decode(&entry)).transpose()
    }

    async fn length(&self) -> Result<usize, QueueError> {
        let mut conn = self.shared().await?;
        redis::cmd("LLEN")
            .arg(&self.key)
            .query_async::<_, usize>(&mut conn)
            .await
            .map_err(|e| QueueError::Unavailable(format!("LLEN failed: {}", e)))
    }
}

impl std::fmt::Debug for RedisQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisQueue").field("key", &self.key).finish_non_exhaustive()
    }
}

impl JobQueue for RedisQueue {
    fn enqueue(&self, item: QueueItem) -> BoxFuture<'_, Result<(), QueueError>> {
        Box::pin(self.push(item))
    }

    fn dequeue(&self, timeout: Duration) -> BoxFuture<'_, Result<Option<QueueItem>, QueueError>> {
        Box::pin(self.pop(timeout))
    }

    fn len(&self) -> BoxFuture<'_, Result<usize, QueueError>> {
        Box::pin(self.length())
    }
}

fn unavailable(err: redis::RedisError) -> QueueError {
    QueueError::Unavailable(format!("Redis connection error: {}", err))
}

fn encode(item: &QueueItem) -> Result<String, QueueError> {
    serde_json::to_string(item).map_err(|e| QueueError::Malformed(e.to_string()))
}

fn decode(entry: &str) -> Result<QueueItem, QueueError> {
    serde_json::from_str(entry).map_err(|e| {
        tracing::warn!(error = %e, "Dropping malformed queue entry");
        QueueError::Malformed(e.to_string())
    })
}
