//! Key-value store abstraction for the inverted indexes.
//!
//! Defines the `KvStore` trait that every backing store implements, the
//! pipelined read batch used by the query engine, and the write batch used
//! by the index writer.
//!
//! # Backends
//! - **Redis** (production): native `SINTER`, pipelined `HMGET`, incremental `SCAN`
//! - **In-memory** (tests, local development): same semantics, computed in-process

mod memory;
mod redis_store;

pub use memory::InMemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

/// Errors raised by a backing store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Could not open or keep a connection
    #[error("Connection error: {0}")]
    Connection(String),

    /// A round trip exceeded the configured bound
    #[error("Store operation timed out: {0}")]
    Timeout(String),

    /// The store rejected or failed a command
    #[error("Command error: {0}")]
    Command(String),

    /// Reply did not have the expected shape
    #[error("Unexpected reply: {0}")]
    Reply(String),
}

impl StoreError {
    /// Check if the error is a connectivity problem (refused, dropped, timed out)
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

// ============================================================================
// Pipelined reads
// ============================================================================

/// A single "get named fields of a hash" request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashRead {
    pub key: String,
    pub fields: Vec<String>,
}

/// Accumulates hash reads and executes them as one pipelined unit.
///
/// Replies are positional: reply `i` answers request `i`, and each reply holds
/// one slot per requested field (`None` when the field or hash is missing).
#[derive(Debug, Clone, Default)]
pub struct ReadBatch {
    requests: Vec<HashRead>,
}

impl ReadBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `HMGET key fields...` and return the reply slot it will occupy.
    pub fn hash_fields<I, S>(&mut self, key: impl Into<String>, fields: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        debug_assert!(!fields.is_empty(), "HMGET needs at least one field");
        self.requests.push(HashRead {
            key: key.into(),
            fields,
        });
        self.requests.len() - 1
    }

    /// Queue a read of a single hash field.
    pub fn hash_field(&mut self, key: impl Into<String>, field: impl Into<String>) -> usize {
        self.hash_fields(key, [field.into()])
    }

    pub fn requests(&self) -> &[HashRead] {
        &self.requests
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// Positional replies of a [`ReadBatch`].
#[derive(Debug, Clone, Default)]
pub struct BatchReplies {
    replies: Vec<Vec<Option<String>>>,
}

impl BatchReplies {
    pub fn new(replies: Vec<Vec<Option<String>>>) -> Self {
        Self { replies }
    }

    /// Value of field `index` in reply `slot`; `None` when missing.
    pub fn field(&self, slot: usize, index: usize) -> Option<&str> {
        self.replies
            .get(slot)
            .and_then(|reply| reply.get(index))
            .and_then(|value| value.as_deref())
    }

    /// All field values of reply `slot`.
    pub fn reply(&self, slot: usize) -> &[Option<String>] {
        self.replies.get(slot).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.replies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replies.is_empty()
    }
}

// ============================================================================
// Writes
// ============================================================================

/// A write command applied as part of a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// `SADD key members...`
    AddMembers { key: String, members: Vec<String> },
    /// `HSET key field value ...`
    HashSet {
        key: String,
        fields: Vec<(String, String)>,
    },
    /// `DEL keys...`
    Delete { keys: Vec<String> },
}

/// Write commands applied together as one unit (MULTI/EXEC on Redis).
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_members<I, S>(&mut self, key: impl Into<String>, members: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let members: Vec<String> = members.into_iter().map(Into::into).collect();
        if !members.is_empty() {
            self.ops.push(WriteOp::AddMembers {
                key: key.into(),
                members,
            });
        }
        self
    }

    pub fn hash_set<I, K, V>(&mut self, key: impl Into<String>, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let fields: Vec<(String, String)> = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        if !fields.is_empty() {
            self.ops.push(WriteOp::HashSet {
                key: key.into(),
                fields,
            });
        }
        self
    }

    pub fn delete<I, S>(&mut self, keys: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        if !keys.is_empty() {
            self.ops.push(WriteOp::Delete { keys });
        }
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

// ============================================================================
// Store trait
// ============================================================================

/// Trait for the key-value store holding buckets, themes and attribute hashes.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Backend name for logs (e.g., "redis", "memory")
    fn name(&self) -> &'static str;

    /// Lightweight liveness check.
    async fn ping(&self) -> StoreResult<()>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Members of the set at `key`; empty when the key does not exist.
    async fn members(&self, key: &str) -> StoreResult<HashSet<String>>;

    /// Intersection of the sets at `keys`.
    ///
    /// An empty key list yields an empty set.
    async fn intersect(&self, keys: &[String]) -> StoreResult<HashSet<String>>;

    /// Execute every read of `batch` in one round trip.
    async fn batch(&self, batch: &ReadBatch) -> StoreResult<BatchReplies>;

    /// One step of forward-only key iteration.
    ///
    /// Start with cursor 0; iteration is complete when the returned cursor is 0.
    async fn scan(&self, pattern: &str, cursor: u64, count: usize)
        -> StoreResult<(u64, Vec<String>)>;

    /// All fields of the hash at `key`; empty when the key does not exist.
    async fn hash_all(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    /// Set `field` only when it is not already present. Returns whether it was written.
    async fn hash_set_if_absent(&self, key: &str, field: &str, value: &str) -> StoreResult<bool>;

    /// Apply every op of `batch` as one unit.
    async fn apply(&self, batch: &WriteBatch) -> StoreResult<()>;
}
