use crate::agg::spec::{AggKind, AggSpec};
use crate::plan::physical::PhysicalPlan;
use std::collections::{BTreeMap, HashMap};

/// Four-dimensional cost vector. Weights are fixed: a byte on the network
/// dwarfs a byte from disk, which beats resident memory, which beats cpu.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CostVector {
    pub cpu: f64,
    pub io: f64,
    pub network: f64,
    pub memory: f64,
}

const WEIGHT_CPU: f64 = 1.0;
const WEIGHT_MEMORY: f64 = 4.0;
const WEIGHT_IO: f64 = 20.0;
const WEIGHT_NETWORK: f64 = 400.0;

impl CostVector {
    pub fn weighted(&self) -> f64 {
        self.cpu * WEIGHT_CPU
            + self.memory * WEIGHT_MEMORY
            + self.io * WEIGHT_IO
            + self.network * WEIGHT_NETWORK
    }

    pub fn add(&self, other: &CostVector) -> CostVector {
        CostVector {
            cpu: self.cpu + other.cpu,
            io: self.io + other.io,
            network: self.network + other.network,
            memory: self.memory + other.memory,
        }
    }
}

/// Planner-visible statistics. Cardinalities are estimates; absent entries
/// fall back to a pessimistic default.
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    pub total_docs: u64,
    pub field_cardinality: HashMap<String, u64>,
}

impl Statistics {
    pub fn with_total_docs(total_docs: u64) -> Self {
        Statistics {
            total_docs,
            field_cardinality: HashMap::new(),
        }
    }

    pub fn set_cardinality(&mut self, field: &str, distinct: u64) {
        self.field_cardinality.insert(field.to_string(), distinct);
    }

    pub fn cardinality(&self, field: &str) -> u64 {
        self.field_cardinality
            .get(field)
            .copied()
            .unwrap_or_else(|| (self.total_docs / 2).max(1))
    }
}

/// Estimated distinct cardinality of an aggregation set's grouping keys.
pub fn grouping_cardinality(aggs: &BTreeMap<String, AggSpec>, stats: &Statistics) -> u64 {
    aggs.values()
        .map(|spec| match &spec.kind {
            AggKind::Terms { field, .. } => stats.cardinality(field),
            _ => 64,
        })
        .max()
        .unwrap_or(0)
}

/// Recursive cost estimate for a physical plan. This is what operator
/// selection compares: candidates are built, estimated, and the cheapest
/// weighted vector wins.
pub fn estimate(plan: &PhysicalPlan, stats: &Statistics) -> CostVector {
    let n = stats.total_docs.max(1) as f64;
    match plan {
        PhysicalPlan::SegmentScan { .. } => CostVector {
            cpu: n,
            io: n * 0.1,
            network: 0.0,
            memory: 0.0,
        },
        PhysicalPlan::FilterExec { input, .. } => {
            let inner = estimate(input, stats);
            inner.add(&CostVector {
                cpu: n * 0.5,
                ..Default::default()
            })
        }
        PhysicalPlan::ProjectExec { input, .. } => {
            let inner = estimate(input, stats);
            inner.add(&CostVector {
                cpu: n * 0.1,
                ..Default::default()
            })
        }
        PhysicalPlan::HashAggregate { aggs, input } => {
            // One pass; the whole group table stays resident.
            let inner = estimate(input, stats);
            let groups = grouping_cardinality(aggs, stats) as f64;
            inner.add(&CostVector {
                cpu: n,
                memory: groups,
                ..Default::default()
            })
        }
        PhysicalPlan::StreamingAggregate { input, .. } => {
            // An extra ordering pass over the input, bounded buffers.
            let inner = estimate(input, stats);
            inner.add(&CostVector {
                cpu: n * 2.0,
                memory: 64.0,
                ..Default::default()
            })
        }
        PhysicalPlan::TopNExec { from, size, input, .. } => {
            let k = (*from as u64 + *size as u64).max(1) as f64;
            let inner = estimate(input, stats);
            inner.add(&CostVector {
                cpu: n * k.log2().max(1.0),
                memory: k,
                ..Default::default()
            })
        }
    }
}
