use crate::expr::ast::{BinOp, Expr, Value};
use crate::plan::logical::LogicalPlan;
use crate::plan::query::{Literal, QueryNode};

/// Upper bound on rewrite passes; rules are individually stable, the bound
/// is a backstop against a cycle introduced by a future rule.
const MAX_PASSES: usize = 10;

/// A rewrite rule. `apply` returns `None` when the node (and, transitively,
/// its inputs) is already in normal form for this rule; the driver uses
/// that to detect the fixpoint.
pub trait RewriteRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, plan: &LogicalPlan) -> Option<LogicalPlan>;
}

/// Applies the rule at the root, then recursively over inputs.
fn rewrite_node(rule: &dyn RewriteRule, plan: &LogicalPlan) -> Option<LogicalPlan> {
    if let Some(rewritten) = rule.apply(plan) {
        return Some(rewritten);
    }
    let rebuild = |input: &LogicalPlan| rewrite_node(rule, input).map(Box::new);
    match plan {
        LogicalPlan::Scan { .. } => None,
        LogicalPlan::Filter { predicate, input } => rebuild(input).map(|input| {
            LogicalPlan::Filter {
                predicate: predicate.clone(),
                input,
            }
        }),
        LogicalPlan::Project { fields, input } => rebuild(input).map(|input| {
            LogicalPlan::Project {
                fields: fields.clone(),
                input,
            }
        }),
        LogicalPlan::Aggregate { aggs, input } => rebuild(input).map(|input| {
            LogicalPlan::Aggregate {
                aggs: aggs.clone(),
                input,
            }
        }),
        LogicalPlan::Sort { sort, input } => rebuild(input).map(|input| LogicalPlan::Sort {
            sort: sort.clone(),
            input,
        }),
        LogicalPlan::Limit { from, size, input } => {
            rebuild(input).map(|input| LogicalPlan::Limit {
                from: *from,
                size: *size,
                input,
            })
        }
        LogicalPlan::TopN {
            from,
            size,
            sort,
            input,
        } => rebuild(input).map(|input| LogicalPlan::TopN {
            from: *from,
            size: *size,
            sort: sort.clone(),
            input,
        }),
    }
}

/// The optimizer: rules in priority order, re-applied until a full pass
/// changes nothing or the pass bound is hit.
pub struct Optimizer {
    rules: Vec<Box<dyn RewriteRule>>,
}

impl Optimizer {
    pub fn new() -> Self {
        Optimizer {
            rules: vec![
                Box::new(PushFilterIntoScan),
                Box::new(FuseTopN),
                Box::new(DropTrivialFilter),
                Box::new(PushFilterThroughAggregate),
                Box::new(MergeProjections),
            ],
        }
    }

    pub fn optimize(&self, plan: LogicalPlan) -> LogicalPlan {
        let mut current = plan;
        for _ in 0..MAX_PASSES {
            let mut changed = false;
            for rule in &self.rules {
                if let Some(rewritten) = rewrite_node(rule.as_ref(), &current) {
                    log::trace!("rewrite rule {} fired", rule.name());
                    current = rewritten;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        current
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert a post-filter expression into an equivalent query node where
/// possible. Conversions are conservative: only comparisons between a field
/// and a constant (plus and/or/not combinations of those) qualify.
fn expr_to_query(expr: &Expr) -> Option<QueryNode> {
    match expr {
        Expr::Binop { op, lhs, rhs } => {
            if let (Expr::Field(field), Expr::Const(value)) = (lhs.as_ref(), rhs.as_ref()) {
                return comparison_to_query(*op, field, value);
            }
            match op {
                BinOp::And => Some(QueryNode::Bool {
                    must: vec![],
                    should: vec![],
                    filter: vec![expr_to_query(lhs)?, expr_to_query(rhs)?],
                    must_not: vec![],
                    minimum_should_match: None,
                }),
                BinOp::Or => Some(QueryNode::Bool {
                    must: vec![],
                    should: vec![expr_to_query(lhs)?, expr_to_query(rhs)?],
                    filter: vec![],
                    must_not: vec![],
                    minimum_should_match: Some(1),
                }),
                _ => None,
            }
        }
        Expr::Unop {
            op: crate::expr::ast::UnOp::Not,
            expr,
        } => Some(QueryNode::Bool {
            must: vec![],
            should: vec![],
            filter: vec![],
            must_not: vec![expr_to_query(expr)?],
            minimum_should_match: None,
        }),
        _ => None,
    }
}

fn value_to_literal(value: &Value) -> Option<Literal> {
    match value {
        Value::Long(v) => Some(Literal::Long(*v)),
        Value::Double(v) => Some(Literal::Double(*v)),
        Value::Bool(b) => Some(Literal::Bool(*b)),
        Value::Str(s) => Some(Literal::Str(s.clone())),
        Value::Null => None,
    }
}

fn comparison_to_query(op: BinOp, field: &str, value: &Value) -> Option<QueryNode> {
    let literal = value_to_literal(value)?;
    let range = |gt, gte, lt, lte| QueryNode::Range {
        field: field.to_string(),
        gt,
        gte,
        lt,
        lte,
    };
    match op {
        BinOp::Eq => Some(QueryNode::term(field, literal)),
        BinOp::Gt => Some(range(Some(literal), None, None, None)),
        BinOp::Ge => Some(range(None, Some(literal), None, None)),
        BinOp::Lt => Some(range(None, None, Some(literal), None)),
        BinOp::Le => Some(range(None, None, None, Some(literal))),
        _ => None,
    }
}

/// Split a conjunction into a scorer-expressible query part and the residual
/// expression that still needs per-doc evaluation.
fn split_convertible(expr: &Expr) -> (Option<QueryNode>, Option<Expr>) {
    if let Some(query) = expr_to_query(expr) {
        return (Some(query), None);
    }
    if let Expr::Binop {
        op: BinOp::And,
        lhs,
        rhs,
    } = expr
    {
        let (lq, lr) = split_convertible(lhs);
        let (rq, rr) = split_convertible(rhs);
        if lq.is_none() && rq.is_none() {
            return (None, Some(expr.clone()));
        }
        let query = match (lq, rq) {
            (Some(a), Some(b)) => Some(QueryNode::Bool {
                must: vec![],
                should: vec![],
                filter: vec![a, b],
                must_not: vec![],
                minimum_should_match: None,
            }),
            (q, None) | (None, q) => q,
        };
        let residual = match (lr, rr) {
            (Some(a), Some(b)) => Some(Expr::binop(BinOp::And, a, b)),
            (r, None) | (None, r) => r,
        };
        return (query, residual);
    }
    (None, Some(expr.clone()))
}

/// Rule 1: absorb scorer-expressible filters into the Scan's query, cutting
/// candidate cardinality before scoring starts.
struct PushFilterIntoScan;

impl RewriteRule for PushFilterIntoScan {
    fn name(&self) -> &'static str {
        "push_filter_into_scan"
    }

    fn apply(&self, plan: &LogicalPlan) -> Option<LogicalPlan> {
        let LogicalPlan::Filter { predicate, input } = plan else {
            return None;
        };
        let LogicalPlan::Scan { index, query } = input.as_ref() else {
            return None;
        };
        let (converted, residual) = split_convertible(predicate);
        let converted = converted?;
        let scan = LogicalPlan::Scan {
            index: index.clone(),
            query: QueryNode::Bool {
                must: vec![query.clone()],
                should: vec![],
                filter: vec![converted],
                must_not: vec![],
                minimum_should_match: None,
            },
        };
        Some(match residual {
            Some(residual) => LogicalPlan::Filter {
                predicate: residual,
                input: Box::new(scan),
            },
            None => scan,
        })
    }
}

/// Rule 2: fuse Sort + Limit (either way the builder stacked them) into a
/// single heap-based TopN.
struct FuseTopN;

impl RewriteRule for FuseTopN {
    fn name(&self) -> &'static str {
        "fuse_top_n"
    }

    fn apply(&self, plan: &LogicalPlan) -> Option<LogicalPlan> {
        let LogicalPlan::Limit { from, size, input } = plan else {
            return None;
        };
        match input.as_ref() {
            LogicalPlan::Sort { sort, input } => Some(LogicalPlan::TopN {
                from: *from,
                size: *size,
                sort: Some(sort.clone()),
                input: input.clone(),
            }),
            _ => Some(LogicalPlan::TopN {
                from: *from,
                size: *size,
                sort: None,
                input: input.clone(),
            }),
        }
    }
}

/// Rule 3: drop filters that cannot reject anything.
struct DropTrivialFilter;

impl RewriteRule for DropTrivialFilter {
    fn name(&self) -> &'static str {
        "drop_trivial_filter"
    }

    fn apply(&self, plan: &LogicalPlan) -> Option<LogicalPlan> {
        match plan {
            LogicalPlan::Filter { predicate, input }
                if *predicate == Expr::Const(Value::Bool(true)) =>
            {
                Some(input.as_ref().clone())
            }
            LogicalPlan::Scan { index, query } => {
                let simplified = drop_match_all_clauses(query)?;
                Some(LogicalPlan::Scan {
                    index: index.clone(),
                    query: simplified,
                })
            }
            _ => None,
        }
    }
}

/// Remove match_all entries from bool filter clauses; `None` when nothing
/// changes so the driver can detect the fixpoint.
fn drop_match_all_clauses(query: &QueryNode) -> Option<QueryNode> {
    let QueryNode::Bool {
        must,
        should,
        filter,
        must_not,
        minimum_should_match,
    } = query
    else {
        return None;
    };
    if !filter.iter().any(QueryNode::is_match_all) {
        return None;
    }
    let filtered: Vec<QueryNode> = filter
        .iter()
        .filter(|q| !q.is_match_all())
        .cloned()
        .collect();
    if must.is_empty() && should.is_empty() && must_not.is_empty() && filtered.is_empty() {
        return Some(QueryNode::match_all());
    }
    Some(QueryNode::Bool {
        must: must.clone(),
        should: should.clone(),
        filter: filtered,
        must_not: must_not.clone(),
        minimum_should_match: *minimum_should_match,
    })
}

/// Rule 4: a filter over grouping keys commutes with Aggregate; pushing it
/// below shrinks the aggregated set.
struct PushFilterThroughAggregate;

impl RewriteRule for PushFilterThroughAggregate {
    fn name(&self) -> &'static str {
        "push_filter_through_aggregate"
    }

    fn apply(&self, plan: &LogicalPlan) -> Option<LogicalPlan> {
        let LogicalPlan::Filter { predicate, input } = plan else {
            return None;
        };
        let LogicalPlan::Aggregate { aggs, input } = input.as_ref() else {
            return None;
        };
        let grouping: Vec<&str> = aggs
            .values()
            .filter_map(|spec| match &spec.kind {
                crate::agg::spec::AggKind::Terms { field, .. }
                | crate::agg::spec::AggKind::Histogram { field, .. }
                | crate::agg::spec::AggKind::DateHistogram { field, .. }
                | crate::agg::spec::AggKind::Range { field, .. } => Some(field.as_str()),
                _ => None,
            })
            .collect();
        let mut referenced = Vec::new();
        predicate.referenced_fields(&mut referenced);
        if referenced.is_empty() || !referenced.iter().all(|f| grouping.contains(&f.as_str())) {
            return None;
        }
        Some(LogicalPlan::Aggregate {
            aggs: aggs.clone(),
            input: Box::new(LogicalPlan::Filter {
                predicate: predicate.clone(),
                input: input.clone(),
            }),
        })
    }
}

/// Rule 5: fuse consecutive projections.
struct MergeProjections;

impl RewriteRule for MergeProjections {
    fn name(&self) -> &'static str {
        "merge_projections"
    }

    fn apply(&self, plan: &LogicalPlan) -> Option<LogicalPlan> {
        let LogicalPlan::Project { fields, input } = plan else {
            return None;
        };
        let LogicalPlan::Project {
            fields: inner_fields,
            input: inner,
        } = input.as_ref()
        else {
            return None;
        };
        let merged: Vec<String> = fields
            .iter()
            .filter(|f| inner_fields.contains(f))
            .cloned()
            .collect();
        Some(LogicalPlan::Project {
            fields: merged,
            input: inner.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::query::{SortOrder, SortSpec};
    use std::collections::BTreeMap;

    fn scan() -> LogicalPlan {
        LogicalPlan::Scan {
            index: "idx".into(),
            query: QueryNode::match_all(),
        }
    }

    #[test]
    fn optimizer_reaches_fixpoint() {
        let plan = LogicalPlan::build(
            "idx",
            QueryNode::match_all(),
            None,
            BTreeMap::new(),
            0,
            10,
            Some(SortSpec {
                field: "price".into(),
                order: SortOrder::Desc,
            }),
        );
        let optimizer = Optimizer::new();
        let optimized = optimizer.optimize(plan);
        // Sort+Limit fused
        assert!(matches!(optimized, LogicalPlan::TopN { sort: Some(_), .. }));
        // Re-optimizing an optimized plan changes nothing.
        let again = optimizer.optimize(optimized.clone());
        assert_eq!(again, optimized);
    }

    #[test]
    fn filter_absorbed_into_scan() {
        // qty >= 3 is fully convertible
        let predicate = Expr::binop(
            BinOp::Ge,
            Expr::field("qty"),
            Expr::Const(Value::Long(3)),
        );
        let plan = LogicalPlan::Filter {
            predicate,
            input: Box::new(scan()),
        };
        let rewritten = PushFilterIntoScan.apply(&plan).unwrap();
        match rewritten {
            LogicalPlan::Scan { query, .. } => match query {
                QueryNode::Bool { filter, .. } => {
                    assert!(matches!(filter[0], QueryNode::Range { .. }))
                }
                other => panic!("unexpected query {:?}", other),
            },
            other => panic!("expected bare scan, got {:?}", other),
        }
    }

    #[test]
    fn partially_convertible_filter_splits() {
        // (qty >= 3) && (sqrt(price) > 2): left absorbs, right stays
        let convertible = Expr::binop(
            BinOp::Ge,
            Expr::field("qty"),
            Expr::Const(Value::Long(3)),
        );
        let residual = Expr::binop(
            BinOp::Gt,
            Expr::Call {
                func: crate::expr::ast::Func::Sqrt,
                args: vec![Expr::field("price")],
            },
            Expr::Const(Value::Double(2.0)),
        );
        let plan = LogicalPlan::Filter {
            predicate: Expr::binop(BinOp::And, convertible, residual.clone()),
            input: Box::new(scan()),
        };
        let rewritten = PushFilterIntoScan.apply(&plan).unwrap();
        match rewritten {
            LogicalPlan::Filter { predicate, input } => {
                assert_eq!(predicate, residual);
                assert!(matches!(*input, LogicalPlan::Scan { .. }));
            }
            other => panic!("expected residual filter, got {:?}", other),
        }
    }

    #[test]
    fn trivial_filter_removed() {
        let plan = LogicalPlan::Filter {
            predicate: Expr::Const(Value::Bool(true)),
            input: Box::new(scan()),
        };
        assert_eq!(DropTrivialFilter.apply(&plan).unwrap(), scan());
    }

    #[test]
    fn grouping_key_filter_pushes_below_aggregate() {
        let aggs = BTreeMap::from([(
            "by_cat".to_string(),
            crate::agg::spec::AggSpec::of(crate::agg::spec::AggKind::Terms {
                field: "qty".into(),
                size: 10,
                shard_size: None,
            }),
        )]);
        let plan = LogicalPlan::Filter {
            predicate: Expr::binop(
                BinOp::Gt,
                Expr::field("qty"),
                Expr::Const(Value::Long(0)),
            ),
            input: Box::new(LogicalPlan::Aggregate {
                aggs,
                input: Box::new(scan()),
            }),
        };
        let rewritten = PushFilterThroughAggregate.apply(&plan).unwrap();
        match rewritten {
            LogicalPlan::Aggregate { input, .. } => {
                assert!(matches!(*input, LogicalPlan::Filter { .. }))
            }
            other => panic!("expected aggregate on top, got {:?}", other),
        }
    }

    #[test]
    fn consecutive_projections_merge() {
        let plan = LogicalPlan::Project {
            fields: vec!["a".into(), "c".into()],
            input: Box::new(LogicalPlan::Project {
                fields: vec!["a".into(), "b".into()],
                input: Box::new(scan()),
            }),
        };
        match MergeProjections.apply(&plan).unwrap() {
            LogicalPlan::Project { fields, input } => {
                assert_eq!(fields, vec!["a".to_string()]);
                assert!(matches!(*input, LogicalPlan::Scan { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
