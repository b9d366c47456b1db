use crate::agg::spec::AggSpec;
use crate::core::error::{Error, ErrorKind, Result};
use crate::expr::ast::Expr;
use crate::plan::cost::{self, Statistics};
use crate::plan::logical::LogicalPlan;
use crate::plan::query::{QueryNode, SortSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Physical operators. Mirrors the logical tree; the only operator with two
/// implementations today is Aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PhysicalPlan {
    SegmentScan {
        index: String,
        query: QueryNode,
    },
    FilterExec {
        predicate: Expr,
        input: Box<PhysicalPlan>,
    },
    ProjectExec {
        fields: Vec<String>,
        input: Box<PhysicalPlan>,
    },
    HashAggregate {
        aggs: BTreeMap<String, AggSpec>,
        input: Box<PhysicalPlan>,
    },
    StreamingAggregate {
        aggs: BTreeMap<String, AggSpec>,
        input: Box<PhysicalPlan>,
    },
    TopNExec {
        from: u32,
        size: u32,
        sort: Option<SortSpec>,
        input: Box<PhysicalPlan>,
    },
}

/// Operator selection. Structure follows the logical plan; where an
/// operator has more than one implementation (Aggregate, today), both
/// candidates are built and the cheaper weighted cost vector wins.
pub fn select_physical(plan: &LogicalPlan, stats: &Statistics) -> PhysicalPlan {
    match plan {
        LogicalPlan::Scan { index, query } => PhysicalPlan::SegmentScan {
            index: index.clone(),
            query: query.clone(),
        },
        LogicalPlan::Filter { predicate, input } => PhysicalPlan::FilterExec {
            predicate: predicate.clone(),
            input: Box::new(select_physical(input, stats)),
        },
        LogicalPlan::Project { fields, input } => PhysicalPlan::ProjectExec {
            fields: fields.clone(),
            input: Box::new(select_physical(input, stats)),
        },
        LogicalPlan::Aggregate { aggs, input } => {
            let input = Box::new(select_physical(input, stats));
            let hash = PhysicalPlan::HashAggregate {
                aggs: aggs.clone(),
                input: input.clone(),
            };
            let streaming = PhysicalPlan::StreamingAggregate {
                aggs: aggs.clone(),
                input,
            };
            if cost::estimate(&hash, stats).weighted()
                <= cost::estimate(&streaming, stats).weighted()
            {
                hash
            } else {
                streaming
            }
        }
        LogicalPlan::Sort { sort, input } => {
            // A bare Sort survives only when the rules were bypassed; lower
            // it as an unbounded TopN.
            PhysicalPlan::TopNExec {
                from: 0,
                size: u32::MAX,
                sort: Some(sort.clone()),
                input: Box::new(select_physical(input, stats)),
            }
        }
        LogicalPlan::Limit { from, size, input } => PhysicalPlan::TopNExec {
            from: *from,
            size: *size,
            sort: None,
            input: Box::new(select_physical(input, stats)),
        },
        LogicalPlan::TopN {
            from,
            size,
            sort,
            input,
        } => PhysicalPlan::TopNExec {
            from: *from,
            size: *size,
            sort: sort.clone(),
            input: Box::new(select_physical(input, stats)),
        },
    }
}

/// The per-shard slice of a physical plan: what actually rides the wire to
/// a shard executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardPlan {
    pub query: QueryNode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_filter: Option<Expr>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub aggs: BTreeMap<String, AggSpec>,
    pub from: u32,
    pub size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortSpec>,
}

/// Flatten a physical plan into its shard-executable parts.
pub fn to_shard_plan(plan: &PhysicalPlan) -> Result<ShardPlan> {
    let mut query = None;
    let mut post_filter = None;
    let mut aggs = BTreeMap::new();
    let mut pagination = (0u32, 10u32);
    let mut pagination_set = false;
    let mut sort = None;

    let mut node = plan;
    loop {
        match node {
            PhysicalPlan::SegmentScan { query: q, .. } => {
                query = Some(q.clone());
                break;
            }
            PhysicalPlan::FilterExec { predicate, input } => {
                post_filter = Some(match post_filter.take() {
                    None => predicate.clone(),
                    Some(existing) => Expr::binop(
                        crate::expr::ast::BinOp::And,
                        existing,
                        predicate.clone(),
                    ),
                });
                node = input;
            }
            PhysicalPlan::ProjectExec { input, .. } => node = input,
            PhysicalPlan::HashAggregate { aggs: a, input }
            | PhysicalPlan::StreamingAggregate { aggs: a, input } => {
                aggs.extend(a.clone());
                node = input;
            }
            PhysicalPlan::TopNExec {
                from,
                size,
                sort: s,
                input,
            } => {
                // With stacked TopN operators (an unfused Limit over Sort),
                // the outermost window wins; the sort comes from whichever
                // level carries one.
                if !pagination_set {
                    pagination = (*from, *size);
                    pagination_set = true;
                }
                if sort.is_none() {
                    sort = s.clone();
                }
                node = input;
            }
        }
    }

    let query = query.ok_or_else(|| {
        Error::new(ErrorKind::Internal, "physical plan has no scan operator")
    })?;
    Ok(ShardPlan {
        query,
        post_filter,
        aggs,
        from: pagination.0,
        size: pagination.1,
        sort,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agg::spec::AggKind;

    fn aggs(field: &str) -> BTreeMap<String, AggSpec> {
        BTreeMap::from([(
            "by".to_string(),
            AggSpec::of(AggKind::Terms {
                field: field.into(),
                size: 10,
                shard_size: None,
            }),
        )])
    }

    #[test]
    fn aggregate_implementation_selected_by_cost() {
        let plan = LogicalPlan::Aggregate {
            aggs: aggs("tag"),
            input: Box::new(LogicalPlan::Scan {
                index: "i".into(),
                query: QueryNode::match_all(),
            }),
        };

        let mut low = Statistics::with_total_docs(1_000_000);
        low.set_cardinality("tag", 50);
        assert!(matches!(
            select_physical(&plan, &low),
            PhysicalPlan::HashAggregate { .. }
        ));

        let mut high = Statistics::with_total_docs(100_000_000);
        high.set_cardinality("tag", 50_000_000);
        assert!(matches!(
            select_physical(&plan, &high),
            PhysicalPlan::StreamingAggregate { .. }
        ));
    }

    #[test]
    fn shard_plan_flattens_the_tree() {
        let logical = LogicalPlan::build(
            "i",
            QueryNode::match_all(),
            None,
            aggs("tag"),
            5,
            20,
            None,
        );
        let optimized = crate::plan::rules::Optimizer::new().optimize(logical);
        let physical = select_physical(&optimized, &Statistics::default());
        let shard_plan = to_shard_plan(&physical).unwrap();
        assert!(shard_plan.query.is_match_all());
        assert_eq!((shard_plan.from, shard_plan.size), (5, 20));
        assert_eq!(shard_plan.aggs.len(), 1);
    }
}
