//! Theme directory with a time-bounded snapshot.
//!
//! The directory aggregates every `theme:detail:{name}:{id}` hash into one row
//! per theme. Building it walks the whole keyspace with `SCAN`, so the result
//! is cached for a configurable window and rebuilt on the first request after
//! it expires. Readers only ever see whole snapshots.

use crate::keys;
use crate::store::{KvStore, ReadBatch, StoreResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Aggregated popularity of one theme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeStats {
    pub name: String,
    pub stock_count: u64,
    pub max_hot_num: i64,
    pub total_hot_num: i64,
}

impl ThemeStats {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            stock_count: 0,
            max_hot_num: 0,
            total_hot_num: 0,
        }
    }

    fn record(&mut self, hot_num: i64) {
        self.stock_count += 1;
        self.max_hot_num = self.max_hot_num.max(hot_num);
        self.total_hot_num = self.total_hot_num.saturating_add(hot_num);
    }
}

#[derive(Debug)]
struct Snapshot {
    themes: Vec<ThemeStats>,
    built_at: Instant,
}

/// Cached theme directory.
pub struct ThemeDirectory {
    store: Arc<dyn KvStore>,
    ttl: Duration,
    scan_count: usize,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
    /// Serializes rebuilds so concurrent expired reads scan once.
    rebuilding: Mutex<()>,
}

impl ThemeDirectory {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration, scan_count: usize) -> Self {
        Self {
            store,
            ttl,
            scan_count: scan_count.max(1),
            snapshot: RwLock::new(None),
            rebuilding: Mutex::new(()),
        }
    }

    /// Themes sorted by popularity, served from the snapshot while it is fresh.
    ///
    /// A failed rebuild is logged and yields an empty list; the previous
    /// snapshot is left in place and not refreshed.
    pub async fn list_themes(&self) -> Vec<ThemeStats> {
        if let Some(snapshot) = self.fresh_snapshot() {
            return snapshot.themes.clone();
        }

        let _guard = self.rebuilding.lock().await;
        if let Some(snapshot) = self.fresh_snapshot() {
            return snapshot.themes.clone();
        }

        match self.rebuild().await {
            Ok(themes) => {
                let snapshot = Arc::new(Snapshot {
                    themes,
                    built_at: Instant::now(),
                });
                self.publish(Arc::clone(&snapshot));
                snapshot.themes.clone()
            }
            Err(e) => {
                warn!(error = %e, "Failed to rebuild theme directory");
                Vec::new()
            }
        }
    }

    /// Drop the snapshot so the next read rebuilds.
    pub fn invalidate(&self) {
        if let Ok(mut slot) = self.snapshot.write() {
            *slot = None;
        }
    }

    /// Age of the current snapshot, if any.
    pub fn snapshot_age(&self) -> Option<Duration> {
        let slot = self.snapshot.read().ok()?;
        slot.as_ref().map(|s| s.built_at.elapsed())
    }

    fn fresh_snapshot(&self) -> Option<Arc<Snapshot>> {
        let slot = self.snapshot.read().ok()?;
        slot.as_ref()
            .filter(|s| s.built_at.elapsed() < self.ttl)
            .cloned()
    }

    fn publish(&self, snapshot: Arc<Snapshot>) {
        if let Ok(mut slot) = self.snapshot.write() {
            *slot = Some(snapshot);
        }
    }

    async fn rebuild(&self) -> StoreResult<Vec<ThemeStats>> {
        let started = Instant::now();
        let mut stats: HashMap<String, ThemeStats> = HashMap::new();
        // SCAN may return a key more than once.
        let mut seen: HashSet<String> = HashSet::new();
        let mut cursor = 0u64;
        let mut pages = 0usize;

        loop {
            let (next, page) = self
                .store
                .scan(keys::THEME_DETAIL_PATTERN, cursor, self.scan_count)
                .await?;
            pages += 1;

            let page: Vec<String> = page
                .into_iter()
                .filter(|key| seen.insert(key.clone()))
                .collect();
            if !page.is_empty() {
                let mut batch = ReadBatch::new();
                for key in &page {
                    batch.hash_field(key.as_str(), "hot_num");
                }
                let replies = self.store.batch(&batch).await?;

                for (slot, key) in page.iter().enumerate() {
                    let Some(name) = keys::theme_name_of_detail(key) else {
                        debug!(key = %key, "Skipping malformed theme detail key");
                        continue;
                    };
                    let hot_num = parse_hot_num(replies.field(slot, 0));
                    stats
                        .entry(name.to_string())
                        .or_insert_with(|| ThemeStats::new(name))
                        .record(hot_num);
                }
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        let themes = sort_themes(stats.into_values().collect());
        info!(
            themes = themes.len(),
            pages,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Theme directory rebuilt"
        );
        Ok(themes)
    }
}

/// Descending by (max, total, count), then by name.
fn sort_themes(mut themes: Vec<ThemeStats>) -> Vec<ThemeStats> {
    themes.sort_by(|a, b| {
        (b.max_hot_num, b.total_hot_num, b.stock_count)
            .cmp(&(a.max_hot_num, a.total_hot_num, a.stock_count))
            .then_with(|| a.name.cmp(&b.name))
    });
    themes
}

/// Integer popularity; decimals truncate, anything else counts as 0.
fn parse_hot_num(raw: Option<&str>) -> i64 {
    let Some(raw) = raw.map(str::trim) else {
        return 0;
    };
    if let Ok(value) = raw.parse::<i64>() {
        return value;
    }
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => value.trunc() as i64,
        _ => 0,
    }
}
