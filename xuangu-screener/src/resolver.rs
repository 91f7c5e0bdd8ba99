//! Bucket key resolver.
//!
//! Maps screening labels (e.g. `营业收入_5~10亿`, `MACD_金叉`) onto the
//! attribute field that stores the underlying metric, or onto the technical
//! indicator family the label belongs to.
//!
//! # Domains
//!
//! | Domain       | Resolves to                                   |
//! |--------------|-----------------------------------------------|
//! | Fundamental  | attribute field in `code:{id}` (e.g. `市盈率`) |
//! | Capital flow | attribute field in `code:{id}` (e.g. `大单净额`) |
//! | Technical    | indicator family (e.g. `MACD`)                |
//!
//! Unknown labels resolve to nothing and are never an error.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Label domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Fundamental,
    Capital,
    Technical,
}

impl Domain {
    /// Order in which a label is classified.
    pub const ALL: [Domain; 3] = [Domain::Fundamental, Domain::Capital, Domain::Technical];

    fn groups(self) -> &'static [LabelGroup] {
        match self {
            Domain::Fundamental => FUNDAMENTAL,
            Domain::Capital => CAPITAL,
            Domain::Technical => TECHNICAL,
        }
    }
}

/// Labels sharing one resolved key.
#[derive(Debug)]
pub struct LabelGroup {
    pub key: &'static str,
    pub labels: &'static [&'static str],
}

const FUNDAMENTAL: &[LabelGroup] = &[
    LabelGroup {
        key: "营业收入",
        labels: &[
            "营业收入_小于5亿",
            "营业收入_5~10亿",
            "营业收入_10~20亿",
            "营业收入_20~50亿",
            "营业收入_大于50亿",
        ],
    },
    LabelGroup {
        key: "市盈率",
        labels: &["市盈率_小于10", "市盈率_10~20", "市盈率_20~30", "市盈率_30~40", "市盈率_大于40"],
    },
    LabelGroup {
        key: "销售毛利率",
        labels: &[
            "销售毛利率_小于5",
            "销售毛利率_5~20",
            "销售毛利率_20~35",
            "销售毛利率_35~40",
            "销售毛利率_大于40",
        ],
    },
    LabelGroup {
        key: "ROE",
        labels: &["ROE_小于5", "ROE_5~10", "ROE_10~20", "ROE_大于20"],
    },
    LabelGroup {
        key: "净利润",
        labels: &["净利润_亏损", "净利润_0~1亿", "净利润_1~3亿", "净利润_3~5亿", "净利润_大于5亿"],
    },
    LabelGroup {
        key: "市净率",
        labels: &["市净率_小于1", "市净率_1~1.5", "市净率_1.5~2", "市净率_2~3", "市净率_大于3"],
    },
    LabelGroup {
        key: "资产负债率",
        labels: &[
            "资产负债率_小于10",
            "资产负债率_10~15",
            "资产负债率_15~30",
            "资产负债率_大于30",
        ],
    },
];

const CAPITAL: &[LabelGroup] = &[
    LabelGroup {
        key: "陆股通净流入",
        labels: &[
            "陆股通净流入_小于0",
            "陆股通净流入_0~1000万",
            "陆股通净流入_1000~5000万",
            "陆股通净流入_5000~10000万",
            "陆股通净流入_大于10000万",
        ],
    },
    LabelGroup {
        key: "大单净额",
        labels: &[
            "大单净额_小于0",
            "大单净额_0~1000万",
            "大单净额_1000~5000万",
            "大单净额_大于5000万",
        ],
    },
    LabelGroup {
        key: "大单净量",
        labels: &["大单净量_小于0", "大单净量_0~1", "大单净量_1~3", "大单净量_大于3"],
    },
];

const TECHNICAL: &[LabelGroup] = &[
    LabelGroup {
        key: "MACD",
        labels: &["MACD_金叉", "MACD_底背离", "MACD_拐头向上", "MACD_0轴金叉"],
    },
    LabelGroup {
        key: "KDJ",
        labels: &["KDJ_金叉", "KDJ_底背离", "KDJ_拐头向上"],
    },
    LabelGroup {
        key: "BOLL",
        labels: &["BOLL_突破上轨", "BOLL_突破下轨", "BOLL_突破中轨", "BOLL_开口向上"],
    },
    LabelGroup {
        key: "单k组合",
        labels: &[
            "单k组合_大阳线",
            "单k组合_小阳星",
            "单k组合_向上跳空缺口",
            "单k组合_向下跳空",
            "单k组合_长下影线",
            "单k组合_长上影线",
        ],
    },
    LabelGroup {
        key: "均线",
        labels: &["均线_多头排列", "均线_粘合", "股价站上5日线", "均线_股价站上60日线"],
    },
];

/// How a label is tested against the groups of a domain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Every group is consulted.
    #[default]
    Exhaustive,
    /// Only the first group of a domain is consulted, so labels of any later
    /// group resolve to nothing. A synthetic mode for regression tests that
    /// pin what exhaustive matching recovers.
    Legacy,
}

/// Label classifier built once from the static tables.
#[derive(Debug, Clone)]
pub struct Resolver {
    mode: MatchMode,
    index: HashMap<&'static str, (Domain, &'static str)>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(MatchMode::Exhaustive)
    }
}

impl Resolver {
    pub fn new(mode: MatchMode) -> Self {
        let mut index = HashMap::new();
        for domain in Domain::ALL {
            for group in domain.groups() {
                for label in group.labels {
                    index.insert(*label, (domain, group.key));
                }
            }
        }
        Self { mode, index }
    }

    /// Key of `label` within `domain`, if any.
    pub fn classify(&self, domain: Domain, label: &str) -> Option<&'static str> {
        match self.mode {
            MatchMode::Exhaustive => self
                .index
                .get(label)
                .filter(|(d, _)| *d == domain)
                .map(|(_, key)| *key),
            MatchMode::Legacy => domain
                .groups()
                .first()
                .filter(|group| group.labels.contains(&label))
                .map(|group| group.key),
        }
    }

    /// Keys of `labels` within one domain, deduplicated in first-seen order.
    pub fn domain_keys<S: AsRef<str>>(&self, domain: Domain, labels: &[S]) -> Vec<&'static str> {
        let mut keys = Vec::new();
        for label in labels {
            if let Some(key) = self.classify(domain, label.as_ref()) {
                push_unique(&mut keys, key);
            }
        }
        keys
    }

    /// Attribute fields for fundamental and capital-flow labels: every
    /// fundamental key first, then every capital-flow key.
    pub fn attribute_keys<S: AsRef<str>>(&self, labels: &[S]) -> Vec<&'static str> {
        let mut keys = self.domain_keys(Domain::Fundamental, labels);
        for key in self.domain_keys(Domain::Capital, labels) {
            push_unique(&mut keys, key);
        }
        keys
    }

    /// Per-label keys across all domains (first matching domain wins),
    /// deduplicated in first-seen order. Technical labels yield their family.
    pub fn preprocess_keys<S: AsRef<str>>(&self, labels: &[S]) -> Vec<&'static str> {
        let mut keys = Vec::new();
        for label in labels {
            let label = label.as_ref();
            if let Some(key) = Domain::ALL
                .iter()
                .find_map(|domain| self.classify(*domain, label))
            {
                push_unique(&mut keys, key);
            }
        }
        keys
    }

    /// `(family, label)` display pairs for the technical labels in `labels`.
    ///
    /// One entry per family, in first-seen family order; a later label of the
    /// same family replaces the earlier one.
    pub fn technical_metadata<'a, S: AsRef<str>>(
        &self,
        labels: &'a [S],
    ) -> Vec<(&'static str, &'a str)> {
        let mut pairs: Vec<(&'static str, &'a str)> = Vec::new();
        for label in labels {
            let label = label.as_ref();
            let Some(family) = self.classify(Domain::Technical, label) else {
                continue;
            };
            match pairs.iter_mut().find(|(f, _)| *f == family) {
                Some(pair) => pair.1 = label,
                None => pairs.push((family, label)),
            }
        }
        pairs
    }

    /// All labels known to the resolver, grouped by domain and key.
    pub fn vocabulary(domain: Domain) -> &'static [LabelGroup] {
        domain.groups()
    }
}

fn push_unique(keys: &mut Vec<&'static str>, key: &'static str) {
    if !keys.contains(&key) {
        keys.push(key);
    }
}
