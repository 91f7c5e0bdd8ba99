//! In-process store with Redis set/hash semantics.
//!
//! Used by tests and local development. Supports failure injection and
//! counts round trips and open connections so callers can assert on both.

use super::{BatchReplies, KvStore, ReadBatch, StoreError, StoreResult, WriteBatch, WriteOp};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
struct Data {
    sets: HashMap<String, HashSet<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
}

impl Data {
    fn sorted_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .sets
            .keys()
            .chain(self.hashes.keys())
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

#[derive(Debug, Default)]
struct Counters {
    round_trips: AtomicUsize,
    open_connections: AtomicUsize,
}

/// Marks a connection as checked out for the lifetime of one operation.
struct ConnectionGuard {
    counters: Arc<Counters>,
}

impl ConnectionGuard {
    fn acquire(counters: &Arc<Counters>) -> Self {
        counters.round_trips.fetch_add(1, Ordering::SeqCst);
        counters.open_connections.fetch_add(1, Ordering::SeqCst);
        Self {
            counters: Arc::clone(counters),
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counters.open_connections.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory [`KvStore`].
#[derive(Debug, Default)]
pub struct InMemoryStore {
    data: RwLock<Data>,
    failure: RwLock<Option<StoreError>>,
    batch_failure: RwLock<Option<StoreError>>,
    repeat_scan_keys: AtomicBool,
    counters: Arc<Counters>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add members to a set (fixture helper, not counted as a round trip).
    pub fn seed_set<I, S>(&self, key: &str, members: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Ok(mut data) = self.data.write() {
            data.sets
                .entry(key.to_string())
                .or_default()
                .extend(members.into_iter().map(Into::into));
        }
    }

    /// Set hash fields (fixture helper, not counted as a round trip).
    pub fn seed_hash<I, K, V>(&self, key: &str, fields: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        if let Ok(mut data) = self.data.write() {
            data.hashes
                .entry(key.to_string())
                .or_default()
                .extend(fields.into_iter().map(|(k, v)| (k.into(), v.into())));
        }
    }

    /// Make every subsequent operation fail with `error`.
    pub fn fail_with(&self, error: StoreError) {
        if let Ok(mut failure) = self.failure.write() {
            *failure = Some(error);
        }
    }

    /// Make only pipelined read batches fail with `error`.
    pub fn fail_batches_with(&self, error: StoreError) {
        if let Ok(mut failure) = self.batch_failure.write() {
            *failure = Some(error);
        }
    }

    /// Stop injecting failures.
    pub fn recover(&self) {
        for slot in [&self.failure, &self.batch_failure] {
            if let Ok(mut failure) = slot.write() {
                *failure = None;
            }
        }
    }

    /// Start every continued `SCAN` page with the last key of the previous
    /// page, as Redis may return a key more than once during iteration.
    pub fn repeat_scan_keys(&self, enabled: bool) {
        self.repeat_scan_keys.store(enabled, Ordering::SeqCst);
    }

    /// Number of operations issued so far (one per pipelined batch).
    pub fn round_trips(&self) -> usize {
        self.counters.round_trips.load(Ordering::SeqCst)
    }

    pub fn reset_round_trips(&self) {
        self.counters.round_trips.store(0, Ordering::SeqCst);
    }

    /// Connections currently checked out; zero whenever no operation is running.
    pub fn open_connections(&self) -> usize {
        self.counters.open_connections.load(Ordering::SeqCst)
    }

    /// Check out a connection and surface any injected failure.
    fn connect(&self) -> StoreResult<ConnectionGuard> {
        let guard = ConnectionGuard::acquire(&self.counters);
        let failure = self
            .failure
            .read()
            .map_err(|_| StoreError::Connection("store lock poisoned".into()))?
            .clone();
        match failure {
            Some(err) => Err(err),
            None => Ok(guard),
        }
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, Data>> {
        self.data
            .read()
            .map_err(|_| StoreError::Connection("store lock poisoned".into()))
    }

    fn write(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, Data>> {
        self.data
            .write()
            .map_err(|_| StoreError::Connection("store lock poisoned".into()))
    }
}

#[async_trait]
impl KvStore for InMemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> StoreResult<()> {
        let _conn = self.connect()?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let _conn = self.connect()?;
        let data = self.read()?;
        Ok(data.sets.contains_key(key) || data.hashes.contains_key(key))
    }

    async fn members(&self, key: &str) -> StoreResult<HashSet<String>> {
        let _conn = self.connect()?;
        let data = self.read()?;
        Ok(data.sets.get(key).cloned().unwrap_or_default())
    }

    async fn intersect(&self, keys: &[String]) -> StoreResult<HashSet<String>> {
        let _conn = self.connect()?;
        let data = self.read()?;

        let Some((first, rest)) = keys.split_first() else {
            return Ok(HashSet::new());
        };
        let mut result = data.sets.get(first).cloned().unwrap_or_default();
        for key in rest {
            if result.is_empty() {
                break;
            }
            match data.sets.get(key) {
                Some(set) => result.retain(|member| set.contains(member)),
                None => result.clear(),
            }
        }
        Ok(result)
    }

    async fn batch(&self, batch: &ReadBatch) -> StoreResult<BatchReplies> {
        if batch.is_empty() {
            return Ok(BatchReplies::default());
        }
        let _conn = self.connect()?;
        if let Some(err) = self
            .batch_failure
            .read()
            .map_err(|_| StoreError::Connection("store lock poisoned".into()))?
            .clone()
        {
            return Err(err);
        }
        let data = self.read()?;

        let replies = batch
            .requests()
            .iter()
            .map(|request| {
                let hash = data.hashes.get(&request.key);
                request
                    .fields
                    .iter()
                    .map(|field| hash.and_then(|h| h.get(field)).cloned())
                    .collect()
            })
            .collect();
        Ok(BatchReplies::new(replies))
    }

    async fn scan(
        &self,
        pattern: &str,
        cursor: u64,
        count: usize,
    ) -> StoreResult<(u64, Vec<String>)> {
        let _conn = self.connect()?;
        let data = self.read()?;

        let keys = data.sorted_keys();
        let start = usize::try_from(cursor).unwrap_or(usize::MAX).min(keys.len());
        let end = start.saturating_add(count.max(1)).min(keys.len());
        let from = if start > 0 && self.repeat_scan_keys.load(Ordering::SeqCst) {
            start - 1
        } else {
            start
        };
        let page = keys[from..end]
            .iter()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();
        let next = if end >= keys.len() { 0 } else { end as u64 };
        Ok((next, page))
    }

    async fn hash_all(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let _conn = self.connect()?;
        let data = self.read()?;
        Ok(data.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn hash_set_if_absent(&self, key: &str, field: &str, value: &str) -> StoreResult<bool> {
        let _conn = self.connect()?;
        let mut data = self.write()?;
        let hash = data.hashes.entry(key.to_string()).or_default();
        if hash.contains_key(field) {
            return Ok(false);
        }
        hash.insert(field.to_string(), value.to_string());
        Ok(true)
    }

    async fn apply(&self, batch: &WriteBatch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let _conn = self.connect()?;
        let mut data = self.write()?;

        for op in batch.ops() {
            match op {
                WriteOp::AddMembers { key, members } => {
                    data.sets
                        .entry(key.clone())
                        .or_default()
                        .extend(members.iter().cloned());
                }
                WriteOp::HashSet { key, fields } => {
                    data.hashes
                        .entry(key.clone())
                        .or_default()
                        .extend(fields.iter().cloned());
                }
                WriteOp::Delete { keys } => {
                    for key in keys {
                        data.sets.remove(key);
                        data.hashes.remove(key);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Redis-style glob match supporting `*` and `?`.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((star_pi, star_ti)) = star {
            pi = star_pi + 1;
            ti = star_ti + 1;
            star = Some((star_pi, star_ti + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}
