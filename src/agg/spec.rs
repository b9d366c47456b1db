use crate::plan::query::QueryNode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_terms_size() -> usize {
    10
}

fn default_percents() -> Vec<f64> {
    vec![1.0, 5.0, 25.0, 50.0, 75.0, 95.0, 99.0]
}

/// One aggregation request: a kind plus optional nested sub-aggregations
/// (bucket kinds only; sub-aggs under a metric kind are rejected at
/// collector build time).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggSpec {
    #[serde(flatten)]
    pub kind: AggKind,
    #[serde(default, rename = "aggs", skip_serializing_if = "BTreeMap::is_empty")]
    pub sub: BTreeMap<String, AggSpec>,
}

impl AggSpec {
    pub fn of(kind: AggKind) -> Self {
        AggSpec {
            kind,
            sub: BTreeMap::new(),
        }
    }

    pub fn with_sub(mut self, name: &str, sub: AggSpec) -> Self {
        self.sub.insert(name.to_string(), sub);
        self
    }

    pub fn is_bucketing(&self) -> bool {
        matches!(
            self.kind,
            AggKind::Terms { .. }
                | AggKind::Histogram { .. }
                | AggKind::DateHistogram { .. }
                | AggKind::Range { .. }
                | AggKind::Filters { .. }
        )
    }
}

/// The supported aggregation surface, mirroring the conventional options of
/// each kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggKind {
    Terms {
        field: String,
        #[serde(default = "default_terms_size")]
        size: usize,
        /// Per-shard overfetch; defaults to `size * 2` to soften the global
        /// truncation error.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        shard_size: Option<usize>,
    },
    Histogram {
        field: String,
        interval: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        extended_bounds: Option<ExtendedBounds>,
    },
    DateHistogram {
        field: String,
        interval_ms: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        extended_bounds: Option<ExtendedBounds>,
    },
    Range {
        field: String,
        ranges: Vec<RangeBucketSpec>,
    },
    Filters {
        filters: BTreeMap<String, QueryNode>,
    },
    Stats {
        field: String,
    },
    ExtendedStats {
        field: String,
    },
    Avg {
        field: String,
    },
    Min {
        field: String,
    },
    Max {
        field: String,
    },
    Sum {
        field: String,
    },
    ValueCount {
        field: String,
    },
    Percentiles {
        field: String,
        #[serde(default = "default_percents")]
        percents: Vec<f64>,
    },
    Cardinality {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        precision_threshold: Option<usize>,
    },
}

/// Half-open `[from, to)` bucket; either side may be unbounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeBucketSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<f64>,
}

impl RangeBucketSpec {
    pub fn label(&self) -> String {
        if let Some(key) = &self.key {
            return key.clone();
        }
        let from = self.from.map(|v| v.to_string()).unwrap_or_else(|| "*".into());
        let to = self.to.map(|v| v.to_string()).unwrap_or_else(|| "*".into());
        format!("{}-{}", from, to)
    }

    pub fn contains(&self, value: f64) -> bool {
        self.from.map(|f| value >= f).unwrap_or(true) && self.to.map(|t| value < t).unwrap_or(true)
    }
}

/// Histogram bounds used to materialize empty buckets at merge time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtendedBounds {
    pub min: f64,
    pub max: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_opensearch_shaped_spec() {
        let spec: AggSpec = serde_json::from_value(json!({
            "terms": {"field": "category", "size": 5},
            "aggs": {
                "avg_price": {"avg": {"field": "price"}}
            }
        }))
        .unwrap();
        assert!(spec.is_bucketing());
        assert_eq!(spec.sub.len(), 1);
        match spec.kind {
            AggKind::Terms { field, size, .. } => {
                assert_eq!(field, "category");
                assert_eq!(size, 5);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn range_bucket_membership_is_half_open() {
        let bucket = RangeBucketSpec {
            key: None,
            from: Some(10.0),
            to: Some(20.0),
        };
        assert!(bucket.contains(10.0));
        assert!(bucket.contains(19.9));
        assert!(!bucket.contains(20.0));
        assert_eq!(bucket.label(), "10-20");
    }
}
