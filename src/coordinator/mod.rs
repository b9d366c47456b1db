pub mod fanout;
pub mod merge;

use crate::agg::partial::AggResult;
use crate::agg::spec::AggSpec;
use crate::cluster::view::{ClusterStateSource, RoutingCache};
use crate::core::cancel::Deadline;
use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::expr::ast::{type_check, Expr};
use crate::plan::cache::{hash_shard_set, LogicalKey, PlanCache};
use crate::plan::cost::Statistics;
use crate::plan::logical::LogicalPlan;
use crate::plan::physical::{select_physical, to_shard_plan};
use crate::plan::query::{QueryNode, SortSpec};
use crate::plan::rules::Optimizer;
use crate::rpc::wire::{ShardSearchRequest, ShardTransport};
use crate::schema::mapping::Mapping;
use crate::shard::collector::Hit;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A pre-parsed search request, as handed over by the HTTP layer.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub index: String,
    pub query: QueryNode,
    pub post_filter: Option<Expr>,
    pub aggregations: BTreeMap<String, AggSpec>,
    pub from: u32,
    pub size: u32,
    pub sort: Option<SortSpec>,
    pub timeout_ms: u32,
    pub allow_partial: bool,
}

impl SearchRequest {
    pub fn new(index: &str, query: QueryNode) -> Self {
        SearchRequest {
            index: index.to_string(),
            query,
            post_filter: None,
            aggregations: BTreeMap::new(),
            from: 0,
            size: 10,
            sort: None,
            timeout_ms: 30_000,
            allow_partial: false,
        }
    }

    pub fn with_agg(mut self, name: &str, spec: AggSpec) -> Self {
        self.aggregations.insert(name.to_string(), spec);
        self
    }

    pub fn paginated(mut self, from: u32, size: u32) -> Self {
        self.from = from;
        self.size = size;
        self
    }

    pub fn partial_ok(mut self) -> Self {
        self.allow_partial = true;
        self
    }

    /// Cache identity of everything that shapes the logical plan.
    fn canonical(&self) -> String {
        let agg_part: Vec<String> = self
            .aggregations
            .iter()
            .map(|(name, spec)| format!("{}:{:?}", name, spec))
            .collect();
        format!(
            "q={};filter={:?};aggs=[{}];from={};size={};sort={:?}",
            self.query.canonical(),
            self.post_filter,
            agg_part.join(","),
            self.from,
            self.size,
            self.sort
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HitsSection {
    pub total: u64,
    pub max_score: Option<f32>,
    pub hits: Vec<Hit>,
}

#[derive(Debug, Clone)]
pub struct SearchResponse {
    pub took_ms: u32,
    pub total_shards: u32,
    pub successful_shards: u32,
    pub failed_shards: u32,
    pub hits: HitsSection,
    pub aggregations: BTreeMap<String, AggResult>,
}

/// The read-path coordinator: plans (with caching), fans out, merges, and
/// applies the partial-results policy. Process-wide caches live here and die
/// with it.
pub struct Coordinator {
    config: Config,
    routing: RoutingCache,
    transport: Arc<dyn ShardTransport>,
    plan_cache: PlanCache,
    optimizer: Optimizer,
    mappings: RwLock<HashMap<String, Arc<Mapping>>>,
    statistics: RwLock<HashMap<String, Statistics>>,
}

impl Coordinator {
    pub fn new(
        config: Config,
        source: Arc<dyn ClusterStateSource>,
        transport: Arc<dyn ShardTransport>,
    ) -> Result<Self> {
        let routing = RoutingCache::new(source, config.routing_refresh_interval)?;
        let plan_cache = PlanCache::new(
            config.plan_cache_capacity,
            config.plan_cache_shards,
            config.plan_cache_ttl,
        );
        Ok(Coordinator {
            config,
            routing,
            transport,
            plan_cache,
            optimizer: Optimizer::new(),
            mappings: RwLock::new(HashMap::new()),
            statistics: RwLock::new(HashMap::new()),
        })
    }

    /// Register or replace an index mapping. A replacement bumps nothing by
    /// itself; the caller bumps the mapping version on real changes, which
    /// orphans cached plans, and we drop the index's entries eagerly too.
    pub fn register_mapping(&self, index: &str, mapping: Arc<Mapping>) {
        let replaced = self
            .mappings
            .write()
            .insert(index.to_string(), mapping)
            .is_some();
        if replaced {
            self.plan_cache.invalidate_index(index);
        }
    }

    pub fn set_statistics(&self, index: &str, stats: Statistics) {
        self.statistics.write().insert(index.to_string(), stats);
    }

    pub fn plan_cache_stats(&self) -> crate::plan::cache::PlanCacheStats {
        self.plan_cache.stats()
    }

    fn mapping(&self, index: &str) -> Result<Arc<Mapping>> {
        self.mappings.read().get(index).cloned().ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidArgument,
                format!("unknown index '{}'", index),
            )
        })
    }

    pub fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        let started = Instant::now();

        let window = request.from as u64 + request.size as u64;
        if window > self.config.max_result_window as u64 {
            return Err(Error::new(
                ErrorKind::OutOfRange,
                format!(
                    "from + size = {} exceeds the result window limit {}",
                    window, self.config.max_result_window
                ),
            ));
        }

        let mapping = self.mapping(&request.index)?;
        if let Some(filter) = &request.post_filter {
            type_check(filter, &mapping)?;
        }

        self.routing.maybe_refresh();
        let routes = self.routing.view().shards_for(&request.index);
        if routes.is_empty() {
            return Err(Error::new(
                ErrorKind::ShardUnreachable,
                format!("no routable shards for index '{}'", request.index),
            ));
        }
        let shard_ids: Vec<u32> = routes.iter().map(|(id, _)| id.0).collect();

        // Two-level plan lookup: request identity -> logical, canonical
        // logical form -> physical.
        let logical_key = LogicalKey {
            index: request.index.clone(),
            query_canonical: request.canonical(),
            shard_set_hash: hash_shard_set(&shard_ids),
            mapping_version: mapping.version,
        };
        let logical = match self.plan_cache.get_logical(&logical_key) {
            Some(plan) => plan,
            None => {
                let built = LogicalPlan::build(
                    &request.index,
                    request.query.clone(),
                    request.post_filter.clone(),
                    request.aggregations.clone(),
                    request.from,
                    request.size,
                    request.sort.clone(),
                );
                let optimized = Arc::new(self.optimizer.optimize(built));
                self.plan_cache
                    .put_logical(logical_key, optimized.clone());
                optimized
            }
        };

        let canonical = logical.canonical();
        let physical = match self.plan_cache.get_physical(&canonical) {
            Some(plan) => plan,
            None => {
                let stats = self
                    .statistics
                    .read()
                    .get(&request.index)
                    .cloned()
                    .unwrap_or_default();
                let selected = Arc::new(select_physical(&logical, &stats));
                self.plan_cache.put_physical(canonical, selected.clone());
                selected
            }
        };
        let shard_plan = to_shard_plan(&physical)?;

        // Fan out under the aggregate deadline; each shard call also runs
        // under the per-shard timeout.
        let timeout = Duration::from_millis(request.timeout_ms as u64)
            .min(self.config.shard_timeout);
        let deadline = Deadline::within(timeout);
        let template = ShardSearchRequest {
            index: request.index.clone(),
            shard_id: crate::core::types::ShardId(0),
            plan: shard_plan,
            timeout_ms: timeout.as_millis() as u64,
        };
        log::debug!(
            "fan-out: index={} shards={:?} timeout={:?}",
            request.index,
            shard_ids,
            timeout
        );
        let outcome = fanout::scatter(
            self.transport.clone(),
            routes.clone(),
            &request.index,
            &template,
            &deadline,
        );

        let total_shards = routes.len() as u32;
        let partial_results = outcome.results.iter().filter(|r| r.partial).count();
        let failed_shards = (outcome.failures.len() + partial_results) as u32;
        let successful_shards = total_shards - failed_shards;

        if failed_shards > 0 {
            for failure in &outcome.failures {
                if failure.error.kind == ErrorKind::ShardUnreachable {
                    self.routing.prune_shard(&request.index, failure.shard_id);
                }
            }
            if !request.allow_partial {
                return Err(outcome
                    .failures
                    .into_iter()
                    .next()
                    .map(|f| f.error)
                    .unwrap_or_else(|| {
                        Error::new(ErrorKind::ShardTimeout, "shard returned partial data")
                    }));
            }
        }

        // Partial shard results still contribute what they saw.
        let merged = merge::merge_hits(&outcome.results, request.from, request.size);
        let aggregations = merge::merge_aggregations(
            &request.aggregations,
            outcome
                .results
                .into_iter()
                .map(|r| r.aggregations)
                .collect(),
        );

        Ok(SearchResponse {
            took_ms: started.elapsed().as_millis() as u32,
            total_shards,
            successful_shards,
            failed_shards,
            hits: HitsSection {
                total: merged.total,
                max_score: merged.max_score,
                hits: merged.hits,
            },
            aggregations,
        })
    }
}
