//! Inverted-index query engine.
//!
//! Every screen follows the same plan:
//!
//! 1. Resolve the selection to bucket keys (`factor:*`, `theme:*`, `zhibiao:*`).
//! 2. Compute the matching entity set: one `SMEMBERS` for a single key, one
//!    `SINTER` for several.
//! 3. Read every per-entity field for the whole result in one pipelined batch.
//! 4. Normalize attribute values and assemble one record per entity.
//!
//! A query therefore costs two round trips regardless of result size.
//!
//! The `try_*` methods surface [`StoreError`]; the plain methods log the
//! failure and return an empty result, so callers never see a partial set.

use crate::keys;
use crate::normalize::normalize;
use crate::resolver::Resolver;
use crate::store::{BatchReplies, KvStore, ReadBatch, StoreError, StoreResult};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info_span, warn, Instrument};

/// One entity's attributes, keyed by display field name.
pub type Record = serde_json::Map<String, Value>;

/// Result of a screen: entity id to record.
pub type RecordSet = BTreeMap<String, Record>;

/// Query engine over a [`KvStore`].
pub struct QueryEngine {
    store: Arc<dyn KvStore>,
    resolver: Resolver,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self::with_resolver(store, Resolver::default())
    }

    pub fn with_resolver(store: Arc<dyn KvStore>, resolver: Resolver) -> Self {
        Self { store, resolver }
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    // ------------------------------------------------------------------------
    // Public operations (failures collapse to an empty result)
    // ------------------------------------------------------------------------

    /// Entities in every selected factor bucket.
    pub async fn query_by_factors(&self, factors: &[String]) -> RecordSet {
        let span = info_span!("screen", op = "factors", ?factors);
        collapse("factors", self.try_query_by_factors(factors).instrument(span).await)
    }

    /// Entities in every selected theme, with theme details.
    pub async fn query_by_themes(&self, themes: &[String]) -> RecordSet {
        let span = info_span!("screen", op = "themes", ?themes);
        collapse("themes", self.try_query_by_themes(themes).instrument(span).await)
    }

    /// Entities in every selected theme and factor bucket.
    pub async fn query_by_themes_and_factors(
        &self,
        themes: &[String],
        factors: &[String],
    ) -> RecordSet {
        let span = info_span!("screen", op = "themes_and_factors", ?themes, ?factors);
        collapse(
            "themes_and_factors",
            self.try_query_by_themes_and_factors(themes, factors)
                .instrument(span)
                .await,
        )
    }

    /// Entities flagged by `indicator`, narrowed by themes and factors when given.
    pub async fn query_by_indicator_themes_factors(
        &self,
        indicator: &str,
        themes: &[String],
        factors: &[String],
    ) -> RecordSet {
        let span = info_span!("screen", op = "indicator_themes_factors", indicator, ?themes, ?factors);
        collapse(
            "indicator_themes_factors",
            self.try_query_by_indicator_themes_factors(indicator, themes, factors)
                .instrument(span)
                .await,
        )
    }

    /// Entities flagged by `indicator`.
    pub async fn query_indicator_only(&self, indicator: &str) -> RecordSet {
        let span = info_span!("screen", op = "indicator", indicator);
        collapse("indicator", self.try_query_indicator_only(indicator).instrument(span).await)
    }

    // ------------------------------------------------------------------------
    // Fallible operations
    // ------------------------------------------------------------------------

    pub async fn try_query_by_factors(&self, factors: &[String]) -> StoreResult<RecordSet> {
        let labels = distinct(factors);
        if labels.is_empty() {
            return Ok(RecordSet::new());
        }

        let bucket_keys: BTreeSet<String> = labels.iter().map(|l| keys::factor(l)).collect();
        let codes = self.entity_set(bucket_keys).await?;
        if codes.is_empty() {
            return Ok(RecordSet::new());
        }

        let attributes = self.resolver.attribute_keys(&labels);
        let technical = self.resolver.technical_metadata(&labels);

        let mut batch = ReadBatch::new();
        let slots: Vec<(usize, Option<usize>)> = codes
            .iter()
            .map(|code| {
                let name = batch.hash_field(keys::code(code), keys::CODE_NAME_FIELD);
                let attrs = queue_attributes(&mut batch, code, &attributes);
                (name, attrs)
            })
            .collect();
        let replies = self.store.batch(&batch).await?;

        let mut records = RecordSet::new();
        for (code, (name, attrs)) in codes.into_iter().zip(slots) {
            let mut record = Record::new();
            insert_name(&mut record, &replies, name);
            insert_attributes(&mut record, &replies, attrs, &attributes);
            insert_technical(&mut record, &technical);
            records.insert(code, record);
        }
        Ok(records)
    }

    pub async fn try_query_by_themes(&self, themes: &[String]) -> StoreResult<RecordSet> {
        let themes = distinct(themes);
        if themes.is_empty() {
            return Ok(RecordSet::new());
        }

        let bucket_keys: BTreeSet<String> = themes.iter().map(|t| keys::theme(t)).collect();
        let codes = self.entity_set(bucket_keys).await?;
        if codes.is_empty() {
            return Ok(RecordSet::new());
        }

        let mut batch = ReadBatch::new();
        let slots: Vec<Vec<usize>> = codes
            .iter()
            .map(|code| {
                themes
                    .iter()
                    .map(|theme| {
                        batch.hash_fields(keys::theme_detail(theme, code), keys::THEME_DETAIL_FIELDS)
                    })
                    .collect()
            })
            .collect();
        let replies = self.store.batch(&batch).await?;

        let mut records = RecordSet::new();
        for (code, theme_slots) in codes.into_iter().zip(slots) {
            let matched: Vec<ThemeDetail<'_>> = themes
                .iter()
                .zip(theme_slots)
                .filter_map(|(theme, slot)| ThemeDetail::from_reply(theme, &replies, slot))
                .collect();
            records.insert(code, theme_record(&matched));
        }
        Ok(records)
    }

    pub async fn try_query_by_themes_and_factors(
        &self,
        themes: &[String],
        factors: &[String],
    ) -> StoreResult<RecordSet> {
        let themes = distinct(themes);
        let labels = distinct(factors);
        if themes.is_empty() || labels.is_empty() {
            return Ok(RecordSet::new());
        }

        let attributes = self.resolver.preprocess_keys(&labels);
        if attributes.is_empty() {
            debug!("No selected factor resolves to an attribute");
            return Ok(RecordSet::new());
        }

        let bucket_keys: BTreeSet<String> = themes
            .iter()
            .map(|t| keys::theme(t))
            .chain(labels.iter().map(|l| keys::factor(l)))
            .collect();
        let codes = self.entity_set(bucket_keys).await?;
        if codes.is_empty() {
            return Ok(RecordSet::new());
        }

        let technical = self.resolver.technical_metadata(&labels);
        let first_theme = themes[0];

        let mut batch = ReadBatch::new();
        let slots: Vec<(usize, usize, Option<usize>)> = codes
            .iter()
            .map(|code| {
                let name = batch.hash_field(keys::code(code), keys::CODE_NAME_FIELD);
                let detail = batch.hash_fields(keys::theme_detail(first_theme, code), ["desc", "theme"]);
                let attrs = queue_attributes(&mut batch, code, &attributes);
                (name, detail, attrs)
            })
            .collect();
        let replies = self.store.batch(&batch).await?;

        let mut records = RecordSet::new();
        for (code, (name, detail, attrs)) in codes.into_iter().zip(slots) {
            let mut record = Record::new();
            insert_name(&mut record, &replies, name);
            insert_string(&mut record, "题材描述", replies.field(detail, 0));
            insert_string(&mut record, "主题", replies.field(detail, 1));
            insert_attributes(&mut record, &replies, attrs, &attributes);
            insert_technical(&mut record, &technical);
            records.insert(code, record);
        }
        Ok(records)
    }

    pub async fn try_query_by_indicator_themes_factors(
        &self,
        indicator: &str,
        themes: &[String],
        factors: &[String],
    ) -> StoreResult<RecordSet> {
        let themes = distinct(themes);
        let labels = distinct(factors);

        let bucket_keys: BTreeSet<String> = std::iter::once(keys::indicator(indicator))
            .chain(themes.iter().map(|t| keys::theme(t)))
            .chain(labels.iter().map(|l| keys::factor(l)))
            .collect();
        let codes = self.entity_set(bucket_keys).await?;
        if codes.is_empty() {
            return Ok(RecordSet::new());
        }

        let attributes = self.resolver.preprocess_keys(&labels);
        let technical = self.resolver.technical_metadata(&labels);
        let first_theme = themes.first().copied();

        let mut batch = ReadBatch::new();
        let slots: Vec<(usize, Option<usize>, usize, Option<usize>)> = codes
            .iter()
            .map(|code| {
                let name = batch.hash_field(keys::code(code), keys::CODE_NAME_FIELD);
                let detail = first_theme.map(|theme| {
                    batch.hash_fields(keys::theme_detail(theme, code), ["desc", "theme"])
                });
                let heat = batch.hash_field(
                    keys::indicator_heat(indicator, code),
                    keys::INDICATOR_HEAT_FIELD,
                );
                let attrs = queue_attributes(&mut batch, code, &attributes);
                (name, detail, heat, attrs)
            })
            .collect();
        let replies = self.store.batch(&batch).await?;

        let mut records = RecordSet::new();
        for (code, (name, detail, heat, attrs)) in codes.into_iter().zip(slots) {
            let mut record = Record::new();
            insert_name(&mut record, &replies, name);
            if let Some(detail) = detail {
                insert_string(&mut record, "题材描述", replies.field(detail, 0));
                insert_string(&mut record, "题材", replies.field(detail, 1));
            }
            record.insert("特色指标".into(), Value::from(indicator));
            insert_string(&mut record, keys::INDICATOR_HEAT_FIELD, replies.field(heat, 0));
            insert_attributes(&mut record, &replies, attrs, &attributes);
            insert_technical(&mut record, &technical);
            records.insert(code, record);
        }
        Ok(records)
    }

    pub async fn try_query_indicator_only(&self, indicator: &str) -> StoreResult<RecordSet> {
        let codes = sorted(self.store.members(&keys::indicator(indicator)).await?);
        if codes.is_empty() {
            return Ok(RecordSet::new());
        }

        let mut batch = ReadBatch::new();
        let slots: Vec<usize> = codes
            .iter()
            .map(|code| batch.hash_field(keys::code(code), keys::CODE_NAME_FIELD))
            .collect();
        let replies = self.store.batch(&batch).await?;

        let mut records = RecordSet::new();
        for (code, name) in codes.into_iter().zip(slots) {
            let mut record = Record::new();
            insert_name(&mut record, &replies, name);
            record.insert("股票代码".into(), Value::from(code.as_str()));
            record.insert("特色指标".into(), Value::from(indicator));
            records.insert(code, record);
        }
        Ok(records)
    }

    /// Entity ids in every bucket of `bucket_keys`, sorted.
    async fn entity_set(&self, bucket_keys: BTreeSet<String>) -> StoreResult<Vec<String>> {
        let bucket_keys: Vec<String> = bucket_keys.into_iter().collect();
        let codes = match bucket_keys.as_slice() {
            [] => HashSet::new(),
            [single] => self.store.members(single).await?,
            _ => self.store.intersect(&bucket_keys).await?,
        };
        debug!(buckets = bucket_keys.len(), matched = codes.len(), "Resolved entity set");
        Ok(sorted(codes))
    }
}

fn collapse(op: &'static str, result: Result<RecordSet, StoreError>) -> RecordSet {
    match result {
        Ok(records) => {
            debug!(op, count = records.len(), "Screen complete");
            records
        }
        Err(e) => {
            warn!(op, error = %e, "Screen failed, returning empty result");
            RecordSet::new()
        }
    }
}

/// Distinct labels in first-seen order.
fn distinct(labels: &[String]) -> Vec<&str> {
    let mut seen = HashSet::new();
    labels
        .iter()
        .map(String::as_str)
        .filter(|label| seen.insert(*label))
        .collect()
}

fn sorted(codes: HashSet<String>) -> Vec<String> {
    let mut codes: Vec<String> = codes.into_iter().collect();
    codes.sort();
    codes
}

fn queue_attributes(batch: &mut ReadBatch, code: &str, attributes: &[&str]) -> Option<usize> {
    (!attributes.is_empty()).then(|| batch.hash_fields(keys::code(code), attributes.iter().copied()))
}

fn insert_string(record: &mut Record, field: &str, value: Option<&str>) {
    if let Some(value) = value {
        record.insert(field.to_string(), Value::from(value));
    }
}

fn insert_name(record: &mut Record, replies: &BatchReplies, slot: usize) {
    if let Some(name) = replies.field(slot, 0).filter(|n| !n.is_empty()) {
        record.insert(keys::CODE_NAME_FIELD.to_string(), Value::from(name));
    }
}

fn insert_attributes(
    record: &mut Record,
    replies: &BatchReplies,
    slot: Option<usize>,
    attributes: &[&str],
) {
    let Some(slot) = slot else {
        return;
    };
    for (index, attribute) in attributes.iter().enumerate() {
        if let Some(raw) = replies.field(slot, index) {
            record.insert(attribute.to_string(), Value::from(normalize(attribute, Some(raw))));
        }
    }
}

fn insert_technical(record: &mut Record, technical: &[(&str, &str)]) {
    for (family, label) in technical {
        record.insert(family.to_string(), Value::from(*label));
    }
}

/// A theme whose detail hash exists for an entity.
struct ThemeDetail<'a> {
    theme: &'a str,
    desc: &'a str,
    name: Option<&'a str>,
    hot_num: Option<&'a str>,
    trade_date: Option<&'a str>,
}

impl<'a> ThemeDetail<'a> {
    /// `None` when the detail hash is missing or has no description.
    fn from_reply(theme: &'a str, replies: &'a BatchReplies, slot: usize) -> Option<Self> {
        let desc = replies.field(slot, 0).filter(|d| !d.is_empty())?;
        Some(Self {
            theme,
            desc,
            name: replies.field(slot, 2),
            hot_num: replies.field(slot, 3),
            trade_date: replies.field(slot, 4),
        })
    }
}

/// Record for the theme screen. Entities with no matched detail get an empty record.
fn theme_record(matched: &[ThemeDetail<'_>]) -> Record {
    let mut record = Record::new();
    let Some(first) = matched.first() else {
        return record;
    };

    if matched.len() > 1 {
        let names: Vec<&str> = matched.iter().map(|d| d.theme).collect();
        let descs: Vec<String> = matched
            .iter()
            .map(|d| format!("{}:{}", d.theme, d.desc))
            .collect();
        record.insert("题材".into(), Value::from(names.join("、")));
        record.insert("题材描述".into(), Value::from(descs.join("；")));
    } else {
        record.insert("题材".into(), Value::from(first.theme));
        record.insert("题材描述".into(), Value::from(first.desc));
    }

    insert_string(&mut record, keys::CODE_NAME_FIELD, first.name);
    insert_string(&mut record, "热度值", first.hot_num);
    insert_string(&mut record, "交易日期", first.trade_date);
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distinct_keeps_first_seen_order() {
        let labels = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        assert_eq!(distinct(&labels), vec!["b", "a"]);
    }

    #[test]
    fn test_theme_record_single_and_multi() {
        let a = ThemeDetail {
            theme: "A",
            desc: "d1",
            name: Some("平安银行"),
            hot_num: Some("120"),
            trade_date: Some("2024-05-10"),
        };
        let b = ThemeDetail {
            theme: "B",
            desc: "d2",
            name: Some("ignored"),
            hot_num: Some("1"),
            trade_date: None,
        };

        let single = theme_record(std::slice::from_ref(&a));
        assert_eq!(single["题材"], "A");
        assert_eq!(single["题材描述"], "d1");
        assert_eq!(single["热度值"], "120");

        let multi = theme_record(&[a, b]);
        assert_eq!(multi["题材"], "A、B");
        assert_eq!(multi["题材描述"], "A:d1；B:d2");
        assert_eq!(multi["股票简称"], "平安银行");
        assert_eq!(multi["交易日期"], "2024-05-10");

        assert!(theme_record(&[]).is_empty());
    }

    #[test]
    fn test_insert_attributes_skips_missing_and_normalizes() {
        let replies = BatchReplies::new(vec![vec![Some("1500000000".into()), None]]);
        let mut record = Record::new();
        insert_attributes(&mut record, &replies, Some(0), &["营业收入", "市盈率"]);
        assert_eq!(record["营业收入"], 15.0);
        assert!(!record.contains_key("市盈率"));
    }
}
