use crate::agg::spec::AggSpec;
use crate::expr::ast::Expr;
use crate::plan::query::{QueryNode, SortSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Logical operators. Built syntax-directed from a search request, then
/// rewritten to fixpoint by the rule driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogicalPlan {
    Scan {
        index: String,
        query: QueryNode,
    },
    Filter {
        predicate: Expr,
        input: Box<LogicalPlan>,
    },
    Project {
        fields: Vec<String>,
        input: Box<LogicalPlan>,
    },
    Aggregate {
        aggs: BTreeMap<String, AggSpec>,
        input: Box<LogicalPlan>,
    },
    Sort {
        sort: SortSpec,
        input: Box<LogicalPlan>,
    },
    Limit {
        from: u32,
        size: u32,
        input: Box<LogicalPlan>,
    },
    /// Sort and Limit fused into one heap pass. `sort: None` means score
    /// descending.
    TopN {
        from: u32,
        size: u32,
        sort: Option<SortSpec>,
        input: Box<LogicalPlan>,
    },
}

impl LogicalPlan {
    /// Syntax-directed construction: scan, optional post-filter, optional
    /// aggregate, then sort + limit for the rules to fuse.
    pub fn build(
        index: &str,
        query: QueryNode,
        post_filter: Option<Expr>,
        aggs: BTreeMap<String, AggSpec>,
        from: u32,
        size: u32,
        sort: Option<SortSpec>,
    ) -> LogicalPlan {
        let mut plan = LogicalPlan::Scan {
            index: index.to_string(),
            query,
        };
        if let Some(predicate) = post_filter {
            plan = LogicalPlan::Filter {
                predicate,
                input: Box::new(plan),
            };
        }
        if !aggs.is_empty() {
            plan = LogicalPlan::Aggregate {
                aggs,
                input: Box::new(plan),
            };
        }
        if let Some(sort) = sort {
            plan = LogicalPlan::Sort {
                sort,
                input: Box::new(plan),
            };
        }
        LogicalPlan::Limit {
            from,
            size,
            input: Box::new(plan),
        }
    }

    pub fn input(&self) -> Option<&LogicalPlan> {
        match self {
            LogicalPlan::Scan { .. } => None,
            LogicalPlan::Filter { input, .. }
            | LogicalPlan::Project { input, .. }
            | LogicalPlan::Aggregate { input, .. }
            | LogicalPlan::Sort { input, .. }
            | LogicalPlan::Limit { input, .. }
            | LogicalPlan::TopN { input, .. } => Some(input),
        }
    }

    /// Canonical text form: the physical-plan cache key.
    pub fn canonical(&self) -> String {
        match self {
            LogicalPlan::Scan { index, query } => {
                format!("scan({},{})", index, query.canonical())
            }
            LogicalPlan::Filter { predicate, input } => {
                format!("filter({:?},{})", predicate, input.canonical())
            }
            LogicalPlan::Project { fields, input } => {
                format!("project({:?},{})", fields, input.canonical())
            }
            LogicalPlan::Aggregate { aggs, input } => {
                let names: Vec<&str> = aggs.keys().map(String::as_str).collect();
                format!("aggregate({:?},{})", names, input.canonical())
            }
            LogicalPlan::Sort { sort, input } => {
                format!("sort({}:{:?},{})", sort.field, sort.order, input.canonical())
            }
            LogicalPlan::Limit { from, size, input } => {
                format!("limit({},{},{})", from, size, input.canonical())
            }
            LogicalPlan::TopN {
                from,
                size,
                sort,
                input,
            } => {
                let sort = sort
                    .as_ref()
                    .map(|s| format!("{}:{:?}", s.field, s.order))
                    .unwrap_or_else(|| "_score".into());
                format!("topn({},{},{},{})", from, size, sort, input.canonical())
            }
        }
    }
}
