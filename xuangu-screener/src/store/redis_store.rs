//! Redis-backed [`KvStore`].
//!
//! Uses a `ConnectionManager` (multiplexed, reconnects automatically). Each
//! operation clones the manager, so no connection is held between calls, and
//! every round trip is bounded by the configured timeout.

use super::{BatchReplies, KvStore, ReadBatch, StoreError, StoreResult, WriteBatch, WriteOp};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;
use xuangu_common::RedisConfig;

/// Redis store over a single logical database.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
    timeout: Duration,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect using the given configuration.
    pub async fn connect(config: &RedisConfig) -> StoreResult<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let url = config
            .connection_url()
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let client = redis::Client::open(url).map_err(|e| StoreError::Connection(e.to_string()))?;

        let manager = tokio::time::timeout(timeout, client.get_connection_manager())
            .await
            .map_err(|_| StoreError::Timeout("connect".into()))?
            .map_err(map_redis_error)?;

        tracing::info!(url = %config.url, db = config.db, "Connected to Redis");

        Ok(Self { manager, timeout })
    }

    /// Run one round trip against a fresh handle, bounded by the timeout.
    async fn run<T, F, Fut>(&self, op: &'static str, f: F) -> StoreResult<T>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        let conn = self.manager.clone();
        match tokio::time::timeout(self.timeout, f(conn)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::debug!(op, error = %e, "Redis command failed");
                Err(map_redis_error(e))
            }
            Err(_) => {
                tracing::debug!(op, timeout_ms = self.timeout.as_millis() as u64, "Redis command timed out");
                Err(StoreError::Timeout(op.to_string()))
            }
        }
    }
}

fn map_redis_error(e: redis::RedisError) -> StoreError {
    if e.is_timeout() {
        StoreError::Timeout(e.to_string())
    } else if e.is_connection_refusal() || e.is_connection_dropped() || e.is_io_error() {
        StoreError::Connection(e.to_string())
    } else {
        StoreError::Command(e.to_string())
    }
}

#[async_trait]
impl KvStore for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn ping(&self) -> StoreResult<()> {
        let reply = self
            .run("PING", |mut conn| async move {
                redis::cmd("PING").query_async::<String>(&mut conn).await
            })
            .await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Reply(format!("PING returned {reply}")))
        }
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let count = self
            .run("EXISTS", |mut conn| async move {
                redis::cmd("EXISTS").arg(key).query_async::<i64>(&mut conn).await
            })
            .await?;
        Ok(count > 0)
    }

    async fn members(&self, key: &str) -> StoreResult<HashSet<String>> {
        self.run("SMEMBERS", |mut conn| async move {
            redis::cmd("SMEMBERS")
                .arg(key)
                .query_async::<HashSet<String>>(&mut conn)
                .await
        })
        .await
    }

    async fn intersect(&self, keys: &[String]) -> StoreResult<HashSet<String>> {
        if keys.is_empty() {
            return Ok(HashSet::new());
        }
        self.run("SINTER", |mut conn| async move {
            redis::cmd("SINTER")
                .arg(keys)
                .query_async::<HashSet<String>>(&mut conn)
                .await
        })
        .await
    }

    async fn batch(&self, batch: &ReadBatch) -> StoreResult<BatchReplies> {
        if batch.is_empty() {
            return Ok(BatchReplies::default());
        }

        let mut pipe = redis::pipe();
        for request in batch.requests() {
            pipe.cmd("HMGET").arg(&request.key).arg(&request.fields);
        }

        let replies = self
            .run("HMGET pipeline", |mut conn| async move {
                pipe.query_async::<Vec<Vec<Option<String>>>>(&mut conn).await
            })
            .await?;

        if replies.len() != batch.len() {
            return Err(StoreError::Reply(format!(
                "pipeline returned {} replies for {} requests",
                replies.len(),
                batch.len()
            )));
        }
        Ok(BatchReplies::new(replies))
    }

    async fn scan(
        &self,
        pattern: &str,
        cursor: u64,
        count: usize,
    ) -> StoreResult<(u64, Vec<String>)> {
        self.run("SCAN", |mut conn| async move {
            redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(count)
                .query_async::<(u64, Vec<String>)>(&mut conn)
                .await
        })
        .await
    }

    async fn hash_all(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        self.run("HGETALL", |mut conn| async move {
            redis::cmd("HGETALL")
                .arg(key)
                .query_async::<HashMap<String, String>>(&mut conn)
                .await
        })
        .await
    }

    async fn hash_set_if_absent(&self, key: &str, field: &str, value: &str) -> StoreResult<bool> {
        let written = self
            .run("HSETNX", |mut conn| async move {
                redis::cmd("HSETNX")
                    .arg(key)
                    .arg(field)
                    .arg(value)
                    .query_async::<i64>(&mut conn)
                    .await
            })
            .await?;
        Ok(written == 1)
    }

    async fn apply(&self, batch: &WriteBatch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in batch.ops() {
            match op {
                WriteOp::AddMembers { key, members } => {
                    pipe.cmd("SADD").arg(key).arg(members).ignore();
                }
                WriteOp::HashSet { key, fields } => {
                    let cmd = pipe.cmd("HSET").arg(key);
                    for (field, value) in fields {
                        cmd.arg(field).arg(value);
                    }
                    cmd.ignore();
                }
                WriteOp::Delete { keys } => {
                    pipe.cmd("DEL").arg(keys).ignore();
                }
            }
        }

        self.run("MULTI/EXEC", |mut conn| async move {
            pipe.query_async::<()>(&mut conn).await
        })
        .await
    }
}
