use crate::agg::hll::{self, CardinalitySketch, DEFAULT_EXACT_THRESHOLD};
use crate::agg::partial::{BucketPartial, PartialAgg};
use crate::agg::spec::{AggKind, AggSpec};
use crate::agg::tdigest::TDigest;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{DocOrd, NO_MORE_DOCS};
use crate::schema::mapping::{FieldType, Mapping};
use crate::scorer::bm25::{DEFAULT_B, DEFAULT_K1};
use crate::scorer::compile::ScorerCompiler;
use crate::scorer::DocIterator;
use crate::segment::segment::Segment;
use roaring::RoaringBitmap;
use std::collections::BTreeMap;

const TDIGEST_COMPRESSION: f64 = 100.0;

/// Shard-side collector for one named aggregation. Bound to a segment via
/// `set_segment` (which rebuilds any per-segment state such as the filters
/// bitsets) and fed matching ordinals; `into_partial` emits the wire state.
#[derive(Debug)]
pub struct AggCollector {
    spec: AggSpec,
    state: CollectorState,
}

#[derive(Debug)]
struct BucketState {
    doc_count: u64,
    sub: Vec<(String, AggCollector)>,
}

impl BucketState {
    fn into_partial(self) -> BucketPartial {
        BucketPartial {
            doc_count: self.doc_count,
            sub: self
                .sub
                .into_iter()
                .map(|(name, child)| (name, child.into_partial()))
                .collect(),
        }
    }
}

#[derive(Debug)]
enum CollectorState {
    Terms(BTreeMap<String, BucketState>),
    Histogram(BTreeMap<i64, BucketState>),
    DateHistogram(BTreeMap<i64, BucketState>),
    Range(Vec<BucketState>),
    Filters {
        bitsets: Vec<(String, RoaringBitmap)>,
        buckets: BTreeMap<String, BucketState>,
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

fn require_numeric(mapping: &Mapping, field: &str) -> Result<()> {
    let info = mapping.require_field(field)?;
    if info.field_type.is_numeric() {
        Ok(())
    } else {
        Err(Error::type_mismatch(
            field,
            "a numeric field",
            info.field_type.name(),
        ))
    }
}

fn require_docvalues(mapping: &Mapping, field: &str) -> Result<()> {
    let info = mapping.require_field(field)?;
    if info.doc_values {
        Ok(())
    } else {
        Err(Error::type_mismatch(
            field,
            "a doc-values field",
            info.field_type.name(),
        ))
    }
}

/// f64 view of a doc's cell, honoring the field type. NaN doubles are
/// treated as absent.
fn numeric_value(segment: &Segment, mapping: &Mapping, field: &str, doc: DocOrd) -> Option<f64> {
    let field_type = mapping.field_type(field)?;
    let column = segment.numeric_values(field)?;
    match field_type {
        FieldType::Double => column.get_double(doc).filter(|v| !v.is_nan()),
        _ => column.get(doc).map(|v| v as f64),
    }
}

fn long_value(segment: &Segment, field: &str, doc: DocOrd) -> Option<i64> {
    segment.numeric_values(field)?.get(doc)
}

/// Terms key for a doc: keyword term, or the numeric cell rendered as text.
fn key_value(segment: &Segment, mapping: &Mapping, field: &str, doc: DocOrd) -> Option<String> {
    match mapping.field_type(field)? {
        FieldType::Keyword => segment
            .keyword_values(field)?
            .term_for_doc(doc)
            .map(str::to_string),
        FieldType::Double => segment
            .numeric_values(field)?
            .get_double(doc)
            .map(|v| v.to_string()),
        _ => segment.numeric_values(field)?.get(doc).map(|v| v.to_string()),
    }
}

fn hash_value(segment: &Segment, mapping: &Mapping, field: &str, doc: DocOrd) -> Option<u64> {
    match mapping.field_type(field)? {
        FieldType::Keyword => segment
            .keyword_values(field)?
            .term_for_doc(doc)
            .map(|term| hll::hash_bytes(term.as_bytes())),
        _ => segment.numeric_values(field)?.get(doc).map(hll::hash_i64),
    }
}

fn has_value(segment: &Segment, field: &str, doc: DocOrd) -> bool {
    segment
        .doc_values(field)
        .map(|values| values.has_value(doc))
        .unwrap_or(false)
}

/// Instantiate sub-collectors for a freshly opened bucket, bound to the
/// segment currently being collected.
fn make_children(
    sub: &BTreeMap<String, AggSpec>,
    segment: &Segment,
    mapping: &Mapping,
) -> Result<Vec<(String, AggCollector)>> {
    let mut children = Vec::with_capacity(sub.len());
    for (name, spec) in sub {
        let mut child = AggCollector::create(spec, mapping)?;
        child.set_segment(segment, mapping)?;
        children.push((name.clone(), child));
    }
    Ok(children)
}

impl AggCollector {
    pub fn create(spec: &AggSpec, mapping: &Mapping) -> Result<Self> {
        if !spec.sub.is_empty() && !spec.is_bucketing() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "sub-aggregations require a bucketing parent",
            ));
        }
        let state = match &spec.kind {
            AggKind::Terms { field, .. } => {
                require_docvalues(mapping, field)?;
                CollectorState::Terms(BTreeMap::new())
            }
            AggKind::Histogram { field, interval, .. } => {
                require_numeric(mapping, field)?;
                if *interval <= 0.0 {
                    return Err(Error::new(
                        ErrorKind::InvalidArgument,
                        "histogram interval must be positive",
                    ));
                }
                CollectorState::Histogram(BTreeMap::new())
            }
            AggKind::DateHistogram { field, interval_ms, .. } => {
                require_numeric(mapping, field)?;
                if *interval_ms <= 0 {
                    return Err(Error::new(
                        ErrorKind::InvalidArgument,
                        "date_histogram interval must be positive",
                    ));
                }
                CollectorState::DateHistogram(BTreeMap::new())
            }
            AggKind::Range { field, ranges } => {
                require_numeric(mapping, field)?;
                if ranges.is_empty() {
                    return Err(Error::new(
                        ErrorKind::InvalidArgument,
                        "range aggregation needs at least one range",
                    ));
                }
                CollectorState::Range(
                    ranges
                        .iter()
                        .map(|_| BucketState {
                            doc_count: 0,
                            sub: Vec::new(),
                        })
                        .collect(),
                )
            }
            AggKind::Filters { .. } => CollectorState::Filters {
                bitsets: Vec::new(),
                buckets: BTreeMap::new(),
            },
            AggKind::Stats { field } => {
                require_numeric(mapping, field)?;
                CollectorState::Stats {
                    count: 0,
                    sum: 0.0,
                    min: f64::INFINITY,
                    max: f64::NEG_INFINITY,
                }
            }
            AggKind::ExtendedStats { field } => {
                require_numeric(mapping, field)?;
                CollectorState::ExtendedStats {
                    count: 0,
                    sum: 0.0,
                    sum_of_squares: 0.0,
                    min: f64::INFINITY,
                    max: f64::NEG_INFINITY,
                }
            }
            AggKind::Avg { field } => {
                require_numeric(mapping, field)?;
                CollectorState::Avg { sum: 0.0, count: 0 }
            }
            AggKind::Min { field } => {
                require_numeric(mapping, field)?;
                CollectorState::Min(None)
            }
            AggKind::Max { field } => {
                require_numeric(mapping, field)?;
                CollectorState::Max(None)
            }
            AggKind::Sum { field } => {
                require_numeric(mapping, field)?;
                CollectorState::Sum(0.0)
            }
            AggKind::ValueCount { field } => {
                require_docvalues(mapping, field)?;
                CollectorState::ValueCount(0)
            }
            AggKind::Percentiles { field, .. } => {
                require_numeric(mapping, field)?;
                CollectorState::Percentiles(TDigest::new(TDIGEST_COMPRESSION))
            }
            AggKind::Cardinality {
                field,
                precision_threshold,
            } => {
                require_docvalues(mapping, field)?;
                CollectorState::Cardinality(CardinalitySketch::new(
                    precision_threshold.unwrap_or(DEFAULT_EXACT_THRESHOLD),
                ))
            }
        };
        Ok(AggCollector {
            spec: spec.clone(),
            state,
        })
    }

    /// Rebind to a segment: filters recompute their match bitsets, bucket
    /// collectors cascade to the children created so far.
    pub fn set_segment(&mut self, segment: &Segment, mapping: &Mapping) -> Result<()> {
        fn rebind<'a>(
            children: impl Iterator<Item = &'a mut BucketState>,
            segment: &Segment,
            mapping: &Mapping,
        ) -> Result<()> {
            for bucket in children {
                for (_, child) in &mut bucket.sub {
                    child.set_segment(segment, mapping)?;
                }
            }
            Ok(())
        }

        match &mut self.state {
            CollectorState::Filters { bitsets, buckets } => {
                let AggKind::Filters { filters } = &self.spec.kind else {
                    unreachable!("filters state always pairs with a filters spec")
                };
                let compiler = ScorerCompiler::new(mapping, DEFAULT_K1, DEFAULT_B);
                bitsets.clear();
                for (name, query) in filters {
                    let mut scorer = compiler.compile(query, segment)?;
                    let mut matches = RoaringBitmap::new();
                    loop {
                        let doc = scorer.next();
                        if doc == NO_MORE_DOCS {
                            break;
                        }
                        matches.insert(doc as u32);
                    }
                    bitsets.push((name.clone(), matches));
                }
                rebind(buckets.values_mut(), segment, mapping)
            }
            CollectorState::Terms(buckets) => rebind(buckets.values_mut(), segment, mapping),
            CollectorState::Histogram(buckets) => rebind(buckets.values_mut(), segment, mapping),
            CollectorState::DateHistogram(buckets) => {
                rebind(buckets.values_mut(), segment, mapping)
            }
            CollectorState::Range(buckets) => rebind(buckets.iter_mut(), segment, mapping),
            _ => Ok(()),
        }
    }

    pub fn collect(&mut self, doc: DocOrd, segment: &Segment, mapping: &Mapping) -> Result<()> {
        let sub = &self.spec.sub;
        match (&self.spec.kind, &mut self.state) {
            (
                AggKind::Terms {
                    field,
                    size,
                    shard_size,
                },
                CollectorState::Terms(buckets),
            ) => {
                if let Some(key) = key_value(segment, mapping, field, doc) {
                    if !buckets.contains_key(&key) {
                        let children = make_children(sub, segment, mapping)?;
                        buckets.insert(
                            key.clone(),
                            BucketState {
                                doc_count: 0,
                                sub: children,
                            },
                        );
                    }
                    let bucket = buckets.get_mut(&key).expect("bucket just ensured");
                    bucket.doc_count += 1;
                    for (_, child) in &mut bucket.sub {
                        child.collect(doc, segment, mapping)?;
                    }
                    // Per-shard candidate cap: overfetch beyond `size` to
                    // soften the global truncation error, but never grow
                    // unbounded on high-cardinality fields.
                    let cap = shard_size
                        .unwrap_or_else(|| size.saturating_mul(2))
                        .max(*size)
                        .max(1);
                    if buckets.len() > cap {
                        let evict = buckets
                            .iter()
                            .min_by(|(ka, a), (kb, b)| {
                                a.doc_count
                                    .cmp(&b.doc_count)
                                    .then_with(|| kb.cmp(ka))
                            })
                            .map(|(k, _)| k.clone());
                        if let Some(evict) = evict {
                            buckets.remove(&evict);
                        }
                    }
                }
            }
            (AggKind::Histogram { field, interval, .. }, CollectorState::Histogram(buckets)) => {
                if let Some(value) = numeric_value(segment, mapping, field, doc) {
                    let idx = (value / interval).floor() as i64;
                    if !buckets.contains_key(&idx) {
                        let children = make_children(sub, segment, mapping)?;
                        buckets.insert(
                            idx,
                            BucketState {
                                doc_count: 0,
                                sub: children,
                            },
                        );
                    }
                    let bucket = buckets.get_mut(&idx).expect("bucket just ensured");
                    bucket.doc_count += 1;
                    for (_, child) in &mut bucket.sub {
                        child.collect(doc, segment, mapping)?;
                    }
                }
            }
            (
                AggKind::DateHistogram { field, interval_ms, .. },
                CollectorState::DateHistogram(buckets),
            ) => {
                if let Some(value) = long_value(segment, field, doc) {
                    let key = value.div_euclid(*interval_ms) * interval_ms;
                    if !buckets.contains_key(&key) {
                        let children = make_children(sub, segment, mapping)?;
                        buckets.insert(
                            key,
                            BucketState {
                                doc_count: 0,
                                sub: children,
                            },
                        );
                    }
                    let bucket = buckets.get_mut(&key).expect("bucket just ensured");
                    bucket.doc_count += 1;
                    for (_, child) in &mut bucket.sub {
                        child.collect(doc, segment, mapping)?;
                    }
                }
            }
            (AggKind::Range { field, ranges }, CollectorState::Range(buckets)) => {
                if let Some(value) = numeric_value(segment, mapping, field, doc) {
                    for (range, bucket) in ranges.iter().zip(buckets.iter_mut()) {
                        if range.contains(value) {
                            if bucket.doc_count == 0 && bucket.sub.is_empty() && !sub.is_empty() {
                                bucket.sub = make_children(sub, segment, mapping)?;
                            }
                            bucket.doc_count += 1;
                            for (_, child) in &mut bucket.sub {
                                child.collect(doc, segment, mapping)?;
                            }
                        }
                    }
                }
            }
            (AggKind::Filters { .. }, CollectorState::Filters { bitsets, buckets }) => {
                for (name, matches) in bitsets.iter() {
                    if matches.contains(doc as u32) {
                        if !buckets.contains_key(name) {
                            let children = make_children(sub, segment, mapping)?;
                            buckets.insert(
                                name.clone(),
                                BucketState {
                                    doc_count: 0,
                                    sub: children,
                                },
                            );
                        }
                        let bucket = buckets.get_mut(name).expect("bucket just ensured");
                        bucket.doc_count += 1;
                        for (_, child) in &mut bucket.sub {
                            child.collect(doc, segment, mapping)?;
                        }
                    }
                }
            }
            (AggKind::Stats { field }, CollectorState::Stats { count, sum, min, max }) => {
                if let Some(value) = numeric_value(segment, mapping, field, doc) {
                    *count += 1;
                    *sum += value;
                    *min = min.min(value);
                    *max = max.max(value);
                }
            }
            (
                AggKind::ExtendedStats { field },
                CollectorState::ExtendedStats {
                    count,
                    sum,
                    sum_of_squares,
                    min,
                    max,
                },
            ) => {
                if let Some(value) = numeric_value(segment, mapping, field, doc) {
                    *count += 1;
                    *sum += value;
                    *sum_of_squares += value * value;
                    *min = min.min(value);
                    *max = max.max(value);
                }
            }
            (AggKind::Avg { field }, CollectorState::Avg { sum, count }) => {
                if let Some(value) = numeric_value(segment, mapping, field, doc) {
                    *sum += value;
                    *count += 1;
                }
            }
            (AggKind::Min { field }, CollectorState::Min(current)) => {
                if let Some(value) = numeric_value(segment, mapping, field, doc) {
                    *current = Some(current.map_or(value, |c| c.min(value)));
                }
            }
            (AggKind::Max { field }, CollectorState::Max(current)) => {
                if let Some(value) = numeric_value(segment, mapping, field, doc) {
                    *current = Some(current.map_or(value, |c| c.max(value)));
                }
            }
            (AggKind::Sum { field }, CollectorState::Sum(total)) => {
                if let Some(value) = numeric_value(segment, mapping, field, doc) {
                    *total += value;
                }
            }
            (AggKind::ValueCount { field }, CollectorState::ValueCount(count)) => {
                if has_value(segment, field, doc) {
                    *count += 1;
                }
            }
            (AggKind::Percentiles { field, .. }, CollectorState::Percentiles(digest)) => {
                if let Some(value) = numeric_value(segment, mapping, field, doc) {
                    digest.add(value);
                }
            }
            (AggKind::Cardinality { field, .. }, CollectorState::Cardinality(sketch)) => {
                if let Some(hash) = hash_value(segment, mapping, field, doc) {
                    sketch.add_hash(hash);
                }
            }
            _ => unreachable!("collector state always pairs with its spec kind"),
        }
        Ok(())
    }

    pub fn into_partial(self) -> PartialAgg {
        match self.state {
            CollectorState::Terms(buckets) => PartialAgg::Terms {
                buckets: buckets
                    .into_iter()
                    .map(|(k, b)| (k, b.into_partial()))
                    .collect(),
            },
            CollectorState::Histogram(buckets) => PartialAgg::Histogram {
                buckets: buckets
                    .into_iter()
                    .map(|(k, b)| (k, b.into_partial()))
                    .collect(),
            },
            CollectorState::DateHistogram(buckets) => PartialAgg::DateHistogram {
                buckets: buckets
                    .into_iter()
                    .map(|(k, b)| (k, b.into_partial()))
                    .collect(),
            },
            CollectorState::Range(buckets) => PartialAgg::Range {
                buckets: buckets.into_iter().map(BucketState::into_partial).collect(),
            },
            CollectorState::Filters { buckets, .. } => PartialAgg::Filters {
                buckets: buckets
                    .into_iter()
                    .map(|(k, b)| (k, b.into_partial()))
                    .collect(),
            },
            CollectorState::Stats { count, sum, min, max } => PartialAgg::Stats {
                count,
                sum,
                min,
                max,
            },
            CollectorState::ExtendedStats {
                count,
                sum,
                sum_of_squares,
                min,
                max,
            } => PartialAgg::ExtendedStats {
                count,
                sum,
                sum_of_squares,
                min,
                max,
            },
            CollectorState::Avg { sum, count } => PartialAgg::Avg { sum, count },
            CollectorState::Min(v) => PartialAgg::Min(v),
            CollectorState::Max(v) => PartialAgg::Max(v),
            CollectorState::Sum(v) => PartialAgg::Sum(v),
            CollectorState::ValueCount(v) => PartialAgg::ValueCount(v),
            CollectorState::Percentiles(d) => PartialAgg::Percentiles(d),
            CollectorState::Cardinality(s) => PartialAgg::Cardinality(s),
        }
    }
}
