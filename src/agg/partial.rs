use crate::agg::hll::CardinalitySketch;
use crate::agg::spec::{AggKind, AggSpec};
use crate::agg::tdigest::TDigest;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Shard-local aggregation state as it travels over the wire. Exact kinds
/// merge exactly; sketch kinds merge in their sketch domain. Merging is
/// associative: folding N partials in any grouping yields the same state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PartialAgg {
    Terms {
        buckets: BTreeMap<String, BucketPartial>,
    },
    Histogram {
        buckets: BTreeMap<i64, BucketPartial>,
    },
    DateHistogram {
        buckets: BTreeMap<i64, BucketPartial>,
    },
    Range {
        buckets: Vec<BucketPartial>,
    },
    Filters {
        buckets: BTreeMap<String, BucketPartial>,
    },
    Stats {
        count: u64,
        sum: f64,
        min: f64,
        max: f64,
    },
    ExtendedStats {
        count: u64,
        sum: f64,
        sum_of_squares: f64,
        min: f64,
        max: f64,
    },
    Avg {
        sum: f64,
        count: u64,
    },
    Min(Option<f64>),
    Max(Option<f64>),
    Sum(f64),
    ValueCount(u64),
    Percentiles(TDigest),
    Cardinality(CardinalitySketch),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BucketPartial {
    pub doc_count: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sub: BTreeMap<String, PartialAgg>,
}

impl BucketPartial {
    fn merge(&mut self, other: BucketPartial) {
        self.doc_count += other.doc_count;
        for (name, partial) in other.sub {
            match self.sub.get_mut(&name) {
                Some(mine) => mine.merge(partial),
                None => {
                    self.sub.insert(name, partial);
                }
            }
        }
    }
}

fn merge_keyed<K: Ord>(
    mine: &mut BTreeMap<K, BucketPartial>,
    theirs: BTreeMap<K, BucketPartial>,
) {
    for (key, bucket) in theirs {
        match mine.get_mut(&key) {
            Some(existing) => existing.merge(bucket),
            None => {
                mine.insert(key, bucket);
            }
        }
    }
}

impl PartialAgg {
    pub fn merge(&mut self, other: PartialAgg) {
        match (self, other) {
            (PartialAgg::Terms { buckets: a }, PartialAgg::Terms { buckets: b }) => {
                merge_keyed(a, b)
            }
            (PartialAgg::Histogram { buckets: a }, PartialAgg::Histogram { buckets: b }) => {
                merge_keyed(a, b)
            }
            (
                PartialAgg::DateHistogram { buckets: a },
                PartialAgg::DateHistogram { buckets: b },
            ) => merge_keyed(a, b),
            (PartialAgg::Range { buckets: a }, PartialAgg::Range { buckets: b }) => {
                // Fixed bucket count in query order; element-wise.
                for (mine, theirs) in a.iter_mut().zip(b) {
                    mine.merge(theirs);
                }
            }
            (PartialAgg::Filters { buckets: a }, PartialAgg::Filters { buckets: b }) => {
                merge_keyed(a, b)
            }
            (
                PartialAgg::Stats {
                    count: ac,
                    sum: asum,
                    min: amin,
                    max: amax,
                },
                PartialAgg::Stats {
                    count: bc,
                    sum: bsum,
                    min: bmin,
                    max: bmax,
                },
            ) => {
                *ac += bc;
                *asum += bsum;
                *amin = amin.min(bmin);
                *amax = amax.max(bmax);
            }
            (
                PartialAgg::ExtendedStats {
                    count: ac,
                    sum: asum,
                    sum_of_squares: asq,
                    min: amin,
                    max: amax,
                },
                PartialAgg::ExtendedStats {
                    count: bc,
                    sum: bsum,
                    sum_of_squares: bsq,
                    min: bmin,
                    max: bmax,
                },
            ) => {
                *ac += bc;
                *asum += bsum;
                *asq += bsq;
                *amin = amin.min(bmin);
                *amax = amax.max(bmax);
            }
            (PartialAgg::Avg { sum: asum, count: ac }, PartialAgg::Avg { sum, count }) => {
                // The exact form: carry sum and count, divide once at the end.
                *asum += sum;
                *ac += count;
            }
            (PartialAgg::Min(a), PartialAgg::Min(b)) => {
                *a = match (*a, b) {
                    (Some(x), Some(y)) => Some(x.min(y)),
                    (x, y) => x.or(y),
                }
            }
            (PartialAgg::Max(a), PartialAgg::Max(b)) => {
                *a = match (*a, b) {
                    (Some(x), Some(y)) => Some(x.max(y)),
                    (x, y) => x.or(y),
                }
            }
            (PartialAgg::Sum(a), PartialAgg::Sum(b)) => *a += b,
            (PartialAgg::ValueCount(a), PartialAgg::ValueCount(b)) => *a += b,
            (PartialAgg::Percentiles(a), PartialAgg::Percentiles(b)) => a.merge(&b),
            (PartialAgg::Cardinality(a), PartialAgg::Cardinality(b)) => a.merge(&b),
            (mine, theirs) => {
                // Shards computed from the same spec; mismatched kinds mean a
                // coordinator-side bug, not user input.
                panic!(
                    "aggregation partial kind mismatch: {:?} vs {:?}",
                    std::mem::discriminant(mine),
                    std::mem::discriminant(&theirs)
                );
            }
        }
    }
}

/// Bucket key in the final response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BucketKey {
    Str(String),
    Long(i64),
    Double(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketResult {
    pub key: BucketKey,
    pub doc_count: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub aggregations: BTreeMap<String, AggResult>,
}

/// Final, client-facing aggregation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggResult {
    Buckets {
        buckets: Vec<BucketResult>,
    },
    Stats {
        count: u64,
        sum: f64,
        min: Option<f64>,
        max: Option<f64>,
        avg: Option<f64>,
    },
    ExtendedStats {
        count: u64,
        sum: f64,
        sum_of_squares: f64,
        min: Option<f64>,
        max: Option<f64>,
        avg: Option<f64>,
        variance: Option<f64>,
        std_deviation: Option<f64>,
    },
    Value {
        value: Option<f64>,
    },
    Percentiles {
        values: BTreeMap<String, f64>,
    },
}

fn finalize_buckets(
    spec: &AggSpec,
    buckets: impl IntoIterator<Item = (BucketKey, BucketPartial)>,
) -> Vec<BucketResult> {
    buckets
        .into_iter()
        .map(|(key, bucket)| BucketResult {
            key,
            doc_count: bucket.doc_count,
            aggregations: bucket
                .sub
                .into_iter()
                .filter_map(|(name, partial)| {
                    spec.sub
                        .get(&name)
                        .map(|sub_spec| (name, finalize(sub_spec, partial)))
                })
                .collect(),
        })
        .collect()
}

/// Reduce a fully merged partial state into the response shape, applying the
/// per-kind ordering contracts: terms re-sort by count, histograms order by
/// key, range and filters keep query-defined order.
pub fn finalize(spec: &AggSpec, partial: PartialAgg) -> AggResult {
    match (&spec.kind, partial) {
        (AggKind::Terms { size, .. }, PartialAgg::Terms { buckets }) => {
            let mut out = finalize_buckets(
                spec,
                buckets
                    .into_iter()
                    .map(|(key, bucket)| (BucketKey::Str(key), bucket)),
            );
            out.sort_by(|a, b| {
                b.doc_count
                    .cmp(&a.doc_count)
                    .then_with(|| key_string(&a.key).cmp(&key_string(&b.key)))
            });
            out.truncate(*size);
            AggResult::Buckets { buckets: out }
        }
        (
            AggKind::Histogram {
                interval,
                extended_bounds,
                ..
            },
            PartialAgg::Histogram { mut buckets },
        ) => {
            if let Some(bounds) = extended_bounds {
                let lo = (bounds.min / interval).floor() as i64;
                let hi = (bounds.max / interval).floor() as i64;
                for idx in lo..=hi {
                    buckets.entry(idx).or_default();
                }
            }
            let interval = *interval;
            AggResult::Buckets {
                buckets: finalize_buckets(
                    spec,
                    buckets
                        .into_iter()
                        .map(move |(idx, bucket)| {
                            (BucketKey::Double(idx as f64 * interval), bucket)
                        }),
                ),
            }
        }
        (
            AggKind::DateHistogram {
                interval_ms,
                extended_bounds,
                ..
            },
            PartialAgg::DateHistogram { mut buckets },
        ) => {
            if let Some(bounds) = extended_bounds {
                let lo = (bounds.min as i64).div_euclid(*interval_ms);
                let hi = (bounds.max as i64).div_euclid(*interval_ms);
                for idx in lo..=hi {
                    buckets.entry(idx * interval_ms).or_default();
                }
            }
            AggResult::Buckets {
                buckets: finalize_buckets(
                    spec,
                    buckets
                        .into_iter()
                        .map(|(key_ms, bucket)| (BucketKey::Long(key_ms), bucket)),
                ),
            }
        }
        (AggKind::Range { ranges, .. }, PartialAgg::Range { buckets }) => AggResult::Buckets {
            buckets: finalize_buckets(
                spec,
                ranges
                    .iter()
                    .zip(buckets)
                    .map(|(range, bucket)| (BucketKey::Str(range.label()), bucket)),
            ),
        },
        (AggKind::Filters { .. }, PartialAgg::Filters { buckets }) => AggResult::Buckets {
            buckets: finalize_buckets(
                spec,
                buckets
                    .into_iter()
                    .map(|(name, bucket)| (BucketKey::Str(name), bucket)),
            ),
        },
        (AggKind::Stats { .. }, PartialAgg::Stats { count, sum, min, max }) => AggResult::Stats {
            count,
            sum,
            min: (count > 0).then_some(min),
            max: (count > 0).then_some(max),
            avg: (count > 0).then(|| sum / count as f64),
        },
        (
            AggKind::ExtendedStats { .. },
            PartialAgg::ExtendedStats {
                count,
                sum,
                sum_of_squares,
                min,
                max,
            },
        ) => {
            let avg = (count > 0).then(|| sum / count as f64);
            let variance = (count > 0).then(|| {
                let mean = sum / count as f64;
                (sum_of_squares / count as f64 - mean * mean).max(0.0)
            });
            AggResult::ExtendedStats {
                count,
                sum,
                sum_of_squares,
                min: (count > 0).then_some(min),
                max: (count > 0).then_some(max),
                avg,
                variance,
                std_deviation: variance.map(f64::sqrt),
            }
        }
        (AggKind::Avg { .. }, PartialAgg::Avg { sum, count }) => AggResult::Value {
            value: (count > 0).then(|| sum / count as f64),
        },
        (AggKind::Min { .. }, PartialAgg::Min(value)) => AggResult::Value { value },
        (AggKind::Max { .. }, PartialAgg::Max(value)) => AggResult::Value { value },
        (AggKind::Sum { .. }, PartialAgg::Sum(sum)) => AggResult::Value { value: Some(sum) },
        (AggKind::ValueCount { .. }, PartialAgg::ValueCount(count)) => AggResult::Value {
            value: Some(count as f64),
        },
        (AggKind::Percentiles { percents, .. }, PartialAgg::Percentiles(mut digest)) => {
            let mut values = BTreeMap::new();
            for &p in percents {
                if let Some(v) = digest.quantile(p / 100.0) {
                    values.insert(format!("{}", p), v);
                }
            }
            AggResult::Percentiles { values }
        }
        (AggKind::Cardinality { .. }, PartialAgg::Cardinality(sketch)) => AggResult::Value {
            value: Some(sketch.estimate() as f64),
        },
        (kind, partial) => panic!(
            "aggregation spec/partial mismatch: {:?} vs {:?}",
            kind,
            std::mem::discriminant(&partial)
        ),
    }
}

fn key_string(key: &BucketKey) -> String {
    match key {
        BucketKey::Str(s) => s.clone(),
        BucketKey::Long(v) => v.to_string(),
        BucketKey::Double(v) => v.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agg::spec::ExtendedBounds;

    fn bucket(count: u64) -> BucketPartial {
        BucketPartial {
            doc_count: count,
            sub: BTreeMap::new(),
        }
    }

    #[test]
    fn terms_merge_sums_and_truncates() {
        let mut a = PartialAgg::Terms {
            buckets: BTreeMap::from([("x".into(), bucket(5)), ("y".into(), bucket(2))]),
        };
        let b = PartialAgg::Terms {
            buckets: BTreeMap::from([("y".into(), bucket(4)), ("z".into(), bucket(1))]),
        };
        a.merge(b);

        let spec = AggSpec::of(AggKind::Terms {
            field: "f".into(),
            size: 2,
            shard_size: None,
        });
        let AggResult::Buckets { buckets } = finalize(&spec, a) else {
            panic!("expected buckets");
        };
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].key, BucketKey::Str("y".into()));
        assert_eq!(buckets[0].doc_count, 6);
        assert_eq!(buckets[1].doc_count, 5);
    }

    #[test]
    fn avg_merges_exactly_not_mean_of_means() {
        // shard A: values [1, 2] -> sum 3 count 2; shard B: [30] -> sum 30 count 1
        let mut a = PartialAgg::Avg { sum: 3.0, count: 2 };
        a.merge(PartialAgg::Avg { sum: 30.0, count: 1 });
        let spec = AggSpec::of(AggKind::Avg { field: "f".into() });
        let AggResult::Value { value } = finalize(&spec, a) else {
            panic!("expected value");
        };
        assert_eq!(value, Some(11.0)); // 33 / 3, not (1.5 + 30) / 2
    }

    #[test]
    fn merge_is_associative_for_stats() {
        let parts = [
            PartialAgg::Stats { count: 2, sum: 10.0, min: 1.0, max: 9.0 },
            PartialAgg::Stats { count: 1, sum: 5.0, min: 5.0, max: 5.0 },
            PartialAgg::Stats { count: 3, sum: -3.0, min: -4.0, max: 2.0 },
        ];
        // ((a ⊕ b) ⊕ c)
        let mut left = parts[0].clone();
        left.merge(parts[1].clone());
        left.merge(parts[2].clone());
        // (a ⊕ (b ⊕ c))
        let mut right_tail = parts[1].clone();
        right_tail.merge(parts[2].clone());
        let mut right = parts[0].clone();
        right.merge(right_tail);
        assert_eq!(left, right);
    }

    #[test]
    fn histogram_fills_extended_bounds() {
        let spec = AggSpec::of(AggKind::Histogram {
            field: "f".into(),
            interval: 10.0,
            extended_bounds: Some(ExtendedBounds { min: 0.0, max: 40.0 }),
        });
        let partial = PartialAgg::Histogram {
            buckets: BTreeMap::from([(1, bucket(3))]),
        };
        let AggResult::Buckets { buckets } = finalize(&spec, partial) else {
            panic!("expected buckets");
        };
        assert_eq!(buckets.len(), 5); // keys 0,10,20,30,40
        assert_eq!(buckets[1].doc_count, 3);
        assert_eq!(buckets[0].doc_count, 0);
    }

    #[test]
    fn range_merge_is_element_wise_in_order() {
        let mut a = PartialAgg::Range {
            buckets: vec![bucket(1), bucket(2)],
        };
        a.merge(PartialAgg::Range {
            buckets: vec![bucket(10), bucket(20)],
        });
        match a {
            PartialAgg::Range { buckets } => {
                assert_eq!(buckets[0].doc_count, 11);
                assert_eq!(buckets[1].doc_count, 22);
            }
            _ => unreachable!(),
        }
    }
}
