use crate::agg::collect::AggCollector;
use crate::agg::partial::PartialAgg;
use crate::core::cancel::Deadline;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{f64_to_sortable_i64, DocOrd, ShardId, NO_MORE_DOCS};
use crate::expr::ast::type_check;
use crate::expr::eval::evaluate;
use crate::plan::physical::ShardPlan;
use crate::plan::query::{SortOrder, SortSpec};
use crate::schema::mapping::{FieldType, Mapping};
use crate::scorer::compile::ScorerCompiler;
use crate::scorer::DocIterator;
use crate::segment::segment::Segment;
use crate::shard::collector::{Hit, RankKey, RankedDoc, TopKCollector};
use crate::shard::reader::ShardReader;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What one shard hands back: its local top `from + size`, the live match
/// count, and per-aggregation partial state. `partial` marks results that
/// cover only a subset of the snapshot's segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardResult {
    pub shard_id: ShardId,
    pub hits: Vec<Hit>,
    pub total: u64,
    pub max_score: Option<f32>,
    pub aggregations: BTreeMap<String, PartialAgg>,
    pub partial: bool,
}

impl ShardResult {
    pub fn empty_partial(shard_id: ShardId) -> Self {
        ShardResult {
            shard_id,
            hits: Vec::new(),
            total: 0,
            max_score: None,
            aggregations: BTreeMap::new(),
            partial: true,
        }
    }
}

/// Single-threaded execution of one shard plan over a reader snapshot.
/// Parallelism lives above this, at the coordinator's fan-out.
pub struct ShardExecutor {
    pub k1: f32,
    pub b: f32,
}

impl ShardExecutor {
    pub fn new(k1: f32, b: f32) -> Self {
        ShardExecutor { k1, b }
    }
}

impl Default for ShardExecutor {
    fn default() -> Self {
        ShardExecutor::new(
            crate::scorer::bm25::DEFAULT_K1,
            crate::scorer::bm25::DEFAULT_B,
        )
    }
}

impl ShardExecutor {
    pub fn execute(
        &self,
        reader: &ShardReader,
        shard_id: ShardId,
        plan: &ShardPlan,
        deadline: &Deadline,
    ) -> Result<ShardResult> {
        let mapping = reader.mapping.as_ref();
        if let Some(filter) = &plan.post_filter {
            type_check(filter, mapping)?;
        }
        if let Some(sort) = &plan.sort {
            check_sortable(sort, mapping)?;
        }

        let mut collectors: Vec<(String, AggCollector)> = Vec::with_capacity(plan.aggs.len());
        for (name, spec) in &plan.aggs {
            collectors.push((name.clone(), AggCollector::create(spec, mapping)?));
        }

        let capacity = plan.from.saturating_add(plan.size) as usize;
        let mut topk = TopKCollector::new(capacity);
        let compiler = ScorerCompiler::new(mapping, self.k1, self.b);
        let mut partial = false;

        for (seg_idx, segment) in reader.segments.iter().enumerate() {
            // Cancellation and deadline are only honored between segments,
            // never mid-scorer-step.
            if deadline.expired() {
                log::warn!("shard {} cancelled at segment boundary", shard_id.0);
                return Ok(ShardResult::empty_partial(shard_id));
            }

            let outcome = self.run_segment(
                &compiler,
                segment,
                seg_idx as u32,
                plan,
                mapping,
                &mut topk,
                &mut collectors,
            );
            if let Err(err) = outcome {
                if err.kind == ErrorKind::SegmentCorrupt {
                    log::warn!(
                        "shard {} segment {} failed, returning partial: {}",
                        shard_id.0,
                        seg_idx,
                        err
                    );
                    partial = true;
                    break;
                }
                return Err(err);
            }
        }

        let total = topk.total();
        let max_score = topk.max_score();
        let hits = topk
            .into_sorted()
            .into_iter()
            .map(|doc| {
                let segment = &reader.segments[doc.seg_idx as usize];
                Hit {
                    id: segment
                        .external_id(doc.ord)
                        .unwrap_or_default()
                        .to_string(),
                    score: doc.score,
                    sort_key: match doc.key {
                        RankKey::Field(key) => key,
                        RankKey::Score(_) => None,
                    },
                }
            })
            .collect();

        let aggregations = collectors
            .into_iter()
            .map(|(name, collector)| (name, collector.into_partial()))
            .collect();

        Ok(ShardResult {
            shard_id,
            hits,
            total,
            max_score,
            aggregations,
            partial,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn run_segment(
        &self,
        compiler: &ScorerCompiler,
        segment: &Segment,
        seg_idx: u32,
        plan: &ShardPlan,
        mapping: &Mapping,
        topk: &mut TopKCollector,
        collectors: &mut [(String, AggCollector)],
    ) -> Result<()> {
        // Leaf scorers rebind to this segment's readers with fresh
        // iterators; nothing survives from the previous segment.
        let mut scorer = compiler.compile(&plan.query, segment)?;
        for (_, collector) in collectors.iter_mut() {
            collector.set_segment(segment, mapping)?;
        }

        loop {
            let doc = scorer.next();
            if doc == NO_MORE_DOCS {
                return Ok(());
            }
            if !segment.is_live(doc) {
                continue;
            }
            if let Some(filter) = &plan.post_filter {
                if !evaluate(filter, mapping, segment, doc).truthy() {
                    continue;
                }
            }
            let score = scorer.score();
            let key = match &plan.sort {
                Some(sort) => RankKey::Field(sort_key(segment, mapping, sort, doc)),
                None => RankKey::Score(score),
            };
            topk.collect(RankedDoc {
                key,
                seg_idx,
                ord: doc,
                score,
            });
            for (_, collector) in collectors.iter_mut() {
                collector.collect(doc, segment, mapping)?;
            }
        }
    }
}

fn check_sortable(sort: &SortSpec, mapping: &Mapping) -> Result<()> {
    let info = mapping.require_field(&sort.field)?;
    if info.field_type.is_numeric() {
        Ok(())
    } else {
        Err(Error::type_mismatch(
            &sort.field,
            "a numeric sort field",
            info.field_type.name(),
        ))
    }
}

/// Direction-normalized sort key: greater always ranks first. Ascending
/// sorts use bitwise complement, which reverses i64 order without overflow.
fn sort_key(segment: &Segment, mapping: &Mapping, sort: &SortSpec, doc: DocOrd) -> Option<i64> {
    let field_type = mapping.field_type(&sort.field)?;
    let cell = segment.numeric_values(&sort.field)?.get(doc)?;
    let ordered = match field_type {
        FieldType::Double => f64_to_sortable_i64(f64::from_bits(cell as u64)),
        _ => cell,
    };
    Some(match sort.order {
        SortOrder::Desc => ordered,
        SortOrder::Asc => !ordered,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agg::spec::{AggKind, AggSpec};
    use crate::core::types::{Document, FieldValue, ShardId};
    use crate::plan::query::QueryNode;
    use crate::shard::shard::Shard;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn shard() -> Shard {
        let mapping = Arc::new(
            Mapping::new()
                .with_field("body", crate::schema::mapping::FieldType::Text)
                .with_field("price", crate::schema::mapping::FieldType::Double)
                .with_field("qty", crate::schema::mapping::FieldType::Long),
        );
        let shard = Shard::new(ShardId(0), mapping);
        let rows = [
            ("a", "red apples fresh", 50.0, 1),
            ("b", "green apples", 100.0, 2),
            ("c", "red grapes", 150.0, 3),
            ("d", "yellow bananas", 200.0, 4),
        ];
        for (i, (id, body, price, qty)) in rows.iter().enumerate() {
            shard
                .index(
                    &Document::new(*id)
                        .with_field("body", FieldValue::Text((*body).into()))
                        .with_field("price", FieldValue::Double(*price))
                        .with_field("qty", FieldValue::Long(*qty)),
                )
                .unwrap();
            // Two segments: split after the second doc.
            if i == 1 {
                shard.refresh().unwrap();
            }
        }
        shard.refresh().unwrap();
        shard
    }

    fn plan(query: serde_json::Value) -> ShardPlan {
        ShardPlan {
            query: QueryNode::from_json(&query).unwrap(),
            post_filter: None,
            aggs: BTreeMap::new(),
            from: 0,
            size: 10,
            sort: None,
        }
    }

    fn deadline() -> Deadline {
        Deadline::within(Duration::from_secs(5))
    }

    #[test]
    fn searches_across_segments() {
        let shard = shard();
        let reader = shard.reader();
        let result = ShardExecutor::default()
            .execute(
                &reader,
                shard.id,
                &plan(json!({"match": {"field": "body", "query": "apples"}})),
                &deadline(),
            )
            .unwrap();
        assert_eq!(result.total, 2);
        assert!(!result.partial);
        let ids: Vec<&str> = result.hits.iter().map(|h| h.id.as_str()).collect();
        assert!(ids.contains(&"a") && ids.contains(&"b"));
    }

    #[test]
    fn repeat_execution_is_stable() {
        // The iterator-reuse failure mode: the same range query twice, then
        // an unmatchable range twice, with no panics and no drift.
        let shard = shard();
        let reader = shard.reader();
        let executor = ShardExecutor::default();
        let range = plan(json!({"range": {"field": "price", "gte": 100, "lte": 150}}));
        for _ in 0..2 {
            let result = executor
                .execute(&reader, shard.id, &range, &deadline())
                .unwrap();
            let mut ids: Vec<&str> = result.hits.iter().map(|h| h.id.as_str()).collect();
            ids.sort();
            assert_eq!(ids, vec!["b", "c"]);
        }
        let empty = plan(json!({"range": {"field": "price", "gte": 400}}));
        for _ in 0..2 {
            let result = executor
                .execute(&reader, shard.id, &empty, &deadline())
                .unwrap();
            assert_eq!(result.total, 0);
        }
    }

    #[test]
    fn tombstoned_docs_are_skipped() {
        let shard = shard();
        shard.delete("a");
        let reader = shard.reader();
        let result = ShardExecutor::default()
            .execute(
                &reader,
                shard.id,
                &plan(json!({"match": {"field": "body", "query": "apples"}})),
                &deadline(),
            )
            .unwrap();
        assert_eq!(result.total, 1);
        assert_eq!(result.hits[0].id, "b");
    }

    #[test]
    fn post_filter_gates_hits_and_aggs() {
        let shard = shard();
        let reader = shard.reader();
        let mut p = plan(json!({"match_all": {}}));
        p.post_filter = Some(crate::expr::ast::Expr::binop(
            crate::expr::ast::BinOp::Ge,
            crate::expr::ast::Expr::field("qty"),
            crate::expr::ast::Expr::Const(crate::expr::ast::Value::Long(3)),
        ));
        p.aggs.insert(
            "total_qty".into(),
            AggSpec::of(AggKind::Sum { field: "qty".into() }),
        );
        let result = ShardExecutor::default()
            .execute(&reader, shard.id, &p, &deadline())
            .unwrap();
        assert_eq!(result.total, 2); // qty 3 and 4
        match &result.aggregations["total_qty"] {
            PartialAgg::Sum(sum) => assert_eq!(*sum, 7.0),
            other => panic!("unexpected partial {:?}", other),
        }
    }

    #[test]
    fn field_sort_orders_hits() {
        let shard = shard();
        let reader = shard.reader();
        let mut p = plan(json!({"match_all": {}}));
        p.sort = Some(SortSpec {
            field: "price".into(),
            order: SortOrder::Asc,
        });
        let result = ShardExecutor::default()
            .execute(&reader, shard.id, &p, &deadline())
            .unwrap();
        let ids: Vec<&str> = result.hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn pagination_keeps_local_top_from_plus_size() {
        let shard = shard();
        let reader = shard.reader();
        let mut p = plan(json!({"match_all": {}}));
        p.from = 1;
        p.size = 2;
        let result = ShardExecutor::default()
            .execute(&reader, shard.id, &p, &deadline())
            .unwrap();
        // Shard keeps from+size hits; the coordinator slices.
        assert_eq!(result.hits.len(), 3);
        assert_eq!(result.total, 4);
    }

    #[test]
    fn cancelled_executor_returns_empty_partial() {
        let shard = shard();
        let reader = shard.reader();
        let deadline = Deadline::within(Duration::from_secs(5));
        deadline.cancel.cancel();
        let result = ShardExecutor::default()
            .execute(
                &reader,
                shard.id,
                &plan(json!({"match_all": {}})),
                &deadline,
            )
            .unwrap();
        assert!(result.partial);
        assert!(result.hits.is_empty());
    }
}
