//! Index writer: the write side of the inverted indexes.
//!
//! Bucket families are refreshed by clearing every key of the family and
//! rebuilding it. Attribute hashes are write-once per field: a field already
//! present is kept, so the first source to report a metric wins.

use crate::keys;
use crate::store::{KvStore, StoreError, StoreResult, WriteBatch};
use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Maximum keys per `DEL` when clearing a family.
const DELETE_CHUNK: usize = 500;

/// Family of membership buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketKind {
    Factor,
    Indicator,
    Theme,
}

impl BucketKind {
    pub fn key(self, name: &str) -> String {
        match self {
            BucketKind::Factor => keys::factor(name),
            BucketKind::Indicator => keys::indicator(name),
            BucketKind::Theme => keys::theme(name),
        }
    }

    /// Pattern matching every key of the family, including per-entity hashes.
    pub fn pattern(self) -> &'static str {
        match self {
            BucketKind::Factor => "factor:*",
            BucketKind::Indicator => "zhibiao:*",
            BucketKind::Theme => "theme:*",
        }
    }
}

impl std::fmt::Display for BucketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BucketKind::Factor => write!(f, "factor"),
            BucketKind::Indicator => write!(f, "indicator"),
            BucketKind::Theme => write!(f, "theme"),
        }
    }
}

/// One constituent of a theme with its detail fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeMember {
    pub theme: String,
    pub code: String,
    pub name: String,
    pub desc: String,
    pub trade_date: String,
    #[serde(default)]
    pub con_code: String,
    #[serde(default)]
    pub hot_num: Option<i64>,
}

/// Writes buckets, attributes and theme details.
pub struct IndexWriter {
    store: Arc<dyn KvStore>,
    scan_count: usize,
}

impl IndexWriter {
    pub fn new(store: Arc<dyn KvStore>, scan_count: usize) -> Self {
        Self {
            store,
            scan_count: scan_count.max(1),
        }
    }

    /// Delete every key matching `pattern`. Returns the number of keys deleted.
    pub async fn clear_prefix(&self, pattern: &str) -> StoreResult<usize> {
        let mut matched = Vec::new();
        let mut cursor = 0u64;
        loop {
            let (next, page) = self.store.scan(pattern, cursor, self.scan_count).await?;
            matched.extend(page);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        matched.sort();
        matched.dedup();

        for chunk in matched.chunks(DELETE_CHUNK) {
            let mut batch = WriteBatch::new();
            batch.delete(chunk.iter().cloned());
            self.store.apply(&batch).await?;
        }

        info!(pattern = %pattern, deleted = matched.len(), "Cleared keys");
        Ok(matched.len())
    }

    /// Add `ids` to the bucket `name` of `kind`.
    pub async fn write_bucket<S: AsRef<str>>(
        &self,
        kind: BucketKind,
        name: &str,
        ids: &[S],
    ) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.add_members(kind.key(name), ids.iter().map(|id| id.as_ref().to_string()));
        self.store.apply(&batch).await
    }

    /// Write attribute fields of `id`, keeping any field already present.
    /// Returns how many fields were written.
    pub async fn write_attributes<K, V>(&self, id: &str, fields: &[(K, V)]) -> StoreResult<usize>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let key = keys::code(id);
        let writes = fields.iter().map(|(field, value)| {
            self.store
                .hash_set_if_absent(&key, field.as_ref(), value.as_ref())
        });
        let written = try_join_all(writes).await?;
        Ok(written.into_iter().filter(|w| *w).count())
    }

    /// Write theme membership and the detail hash together.
    pub async fn write_theme_member(&self, member: &ThemeMember) -> StoreResult<()> {
        let mut fields = vec![
            ("code", member.code.clone()),
            ("name", member.name.clone()),
            ("theme", member.theme.clone()),
            ("desc", member.desc.clone()),
            ("trade_date", member.trade_date.clone()),
        ];
        if !member.con_code.is_empty() {
            fields.push(("con_code", member.con_code.clone()));
        }
        if let Some(hot_num) = member.hot_num {
            fields.push(("hot_num", hot_num.to_string()));
        }

        let mut batch = WriteBatch::new();
        batch
            .add_members(keys::theme(&member.theme), [member.code.as_str()])
            .hash_set(keys::theme_detail(&member.theme, &member.code), fields);
        self.store.apply(&batch).await
    }

    /// Replace every bucket of `kind` with `buckets`. Returns the number of buckets written.
    ///
    /// Themes are rejected: clearing `theme:*` also drops the detail hashes,
    /// so they are refreshed through [`IndexWriter::refresh_themes`].
    pub async fn refresh_buckets(
        &self,
        kind: BucketKind,
        buckets: &BTreeMap<String, Vec<String>>,
    ) -> StoreResult<usize> {
        if kind == BucketKind::Theme {
            return Err(StoreError::Command(
                "theme buckets are refreshed with their details".into(),
            ));
        }
        self.clear_prefix(kind.pattern()).await?;

        let writes = buckets
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(name, ids)| self.write_bucket(kind, name, ids.as_slice()));
        let written = try_join_all(writes).await?.len();

        info!(kind = %kind, buckets = written, "Buckets refreshed");
        Ok(written)
    }

    /// Replace every theme set and detail hash with `members`.
    /// Returns the number of members written.
    pub async fn refresh_themes(&self, members: &[ThemeMember]) -> StoreResult<usize> {
        self.clear_prefix(BucketKind::Theme.pattern()).await?;

        let writes = members.iter().map(|member| self.write_theme_member(member));
        let written = try_join_all(writes).await?.len();

        info!(members = written, "Themes refreshed");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn writer() -> (Arc<InMemoryStore>, IndexWriter) {
        let store = Arc::new(InMemoryStore::new());
        let writer = IndexWriter::new(store.clone(), 3);
        (store, writer)
    }

    #[tokio::test]
    async fn test_write_attributes_is_write_once() {
        let (store, writer) = writer();
        let written = writer
            .write_attributes("000001", &[("股票简称", "平安银行"), ("ROE", "8.1")])
            .await
            .unwrap();
        assert_eq!(written, 2);

        let written = writer
            .write_attributes("000001", &[("ROE", "9.9"), ("市盈率", "5.2")])
            .await
            .unwrap();
        assert_eq!(written, 1);

        let hash = store.hash_all("code:000001").await.unwrap();
        assert_eq!(hash["ROE"], "8.1");
        assert_eq!(hash["市盈率"], "5.2");
    }

    #[tokio::test]
    async fn test_clear_prefix_only_touches_family() {
        let (store, writer) = writer();
        for i in 0..10 {
            store.seed_set(&format!("factor:f{i}"), ["000001"]);
        }
        store.seed_set("zhibiao:龙头", ["000001"]);

        assert_eq!(writer.clear_prefix("factor:*").await.unwrap(), 10);
        assert!(store.exists("zhibiao:龙头").await.unwrap());
        assert!(!store.exists("factor:f0").await.unwrap());
    }

    #[tokio::test]
    async fn test_refresh_replaces_family() {
        let (store, writer) = writer();
        store.seed_set("factor:stale", ["000009"]);

        let buckets = BTreeMap::from([
            ("ROE_大于20".to_string(), vec!["000001".to_string(), "000002".to_string()]),
            ("市盈率_小于10".to_string(), vec!["000002".to_string()]),
            ("空".to_string(), vec![]),
        ]);
        let written = writer.refresh_buckets(BucketKind::Factor, &buckets).await.unwrap();

        assert_eq!(written, 2);
        assert!(!store.exists("factor:stale").await.unwrap());
        assert!(!store.exists("factor:空").await.unwrap());
        assert_eq!(store.members("factor:ROE_大于20").await.unwrap().len(), 2);
    }

    fn member(theme: &str, code: &str, hot_num: i64) -> ThemeMember {
        ThemeMember {
            theme: theme.into(),
            code: code.into(),
            name: "平安银行".into(),
            desc: "减速器".into(),
            trade_date: "20240510".into(),
            con_code: format!("{code}.SZ"),
            hot_num: Some(hot_num),
        }
    }

    #[tokio::test]
    async fn test_write_theme_member() {
        let (store, writer) = writer();
        writer
            .write_theme_member(&member("机器人", "000001", 88))
            .await
            .unwrap();
        assert_eq!(store.round_trips(), 1);

        assert!(store.members("theme:机器人").await.unwrap().contains("000001"));
        let detail = store.hash_all("theme:detail:机器人:000001").await.unwrap();
        assert_eq!(detail["hot_num"], "88");
        assert_eq!(detail["con_code"], "000001.SZ");
    }

    #[tokio::test]
    async fn test_theme_refresh_keeps_details() {
        let (store, writer) = writer();
        writer
            .write_theme_member(&member("机器人", "000001", 88))
            .await
            .unwrap();
        store.seed_set("theme:旧题材", ["000009"]);
        store.seed_hash("theme:detail:旧题材:000009", [("hot_num", "1")]);

        let bare = BTreeMap::from([("机器人".to_string(), vec!["000001".to_string()])]);
        assert!(writer.refresh_buckets(BucketKind::Theme, &bare).await.is_err());
        assert!(store.exists("theme:detail:机器人:000001").await.unwrap());

        let written = writer
            .refresh_themes(&[member("机器人", "000001", 90), member("机器人", "000002", 10)])
            .await
            .unwrap();
        assert_eq!(written, 2);
        assert!(!store.exists("theme:旧题材").await.unwrap());
        assert!(!store.exists("theme:detail:旧题材:000009").await.unwrap());

        let members = store.members("theme:机器人").await.unwrap();
        assert_eq!(members.len(), 2);
        for code in &members {
            let detail = store
                .hash_all(&format!("theme:detail:机器人:{code}"))
                .await
                .unwrap();
            assert_eq!(detail["desc"], "减速器");
        }
    }
}
