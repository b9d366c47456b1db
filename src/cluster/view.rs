use crate::core::error::Result;
use crate::core::types::ShardId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddr(pub String);

impl NodeAddr {
    pub fn new(addr: impl Into<String>) -> Self {
        NodeAddr(addr.into())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardRoute {
    pub index: String,
    pub shard_id: ShardId,
    pub primary: NodeAddr,
    pub replicas: Vec<NodeAddr>,
}

/// Read-only snapshot of cluster topology, produced elsewhere. A view with
/// a higher version supersedes the current one atomically; the coordinator
/// never proposes changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterView {
    pub nodes: Vec<NodeAddr>,
    pub shards: Vec<ShardRoute>,
    pub version: u64,
}

impl ClusterView {
    pub fn empty() -> Self {
        ClusterView {
            nodes: Vec::new(),
            shards: Vec::new(),
            version: 0,
        }
    }

    pub fn shards_for(&self, index: &str) -> Vec<(ShardId, NodeAddr)> {
        self.shards
            .iter()
            .filter(|route| route.index == index)
            .map(|route| (route.shard_id, route.primary.clone()))
            .collect()
    }
}

/// Where fresh cluster views come from (the cluster controller, externally).
pub trait ClusterStateSource: Send + Sync {
    fn fetch(&self) -> Result<ClusterView>;
}

/// Copy-on-refresh routing table. Readers grab the current `Arc` under a
/// short read lock; refreshes swap the whole view in one store. Pruning a
/// failed shard replaces the view immediately without waiting for the next
/// poll.
pub struct RoutingCache {
    current: RwLock<Arc<ClusterView>>,
    source: Arc<dyn ClusterStateSource>,
    refresh_interval: Duration,
    last_refresh: RwLock<Instant>,
}

impl RoutingCache {
    pub fn new(source: Arc<dyn ClusterStateSource>, refresh_interval: Duration) -> Result<Self> {
        let initial = source.fetch()?;
        Ok(RoutingCache {
            current: RwLock::new(Arc::new(initial)),
            source,
            refresh_interval,
            last_refresh: RwLock::new(Instant::now()),
        })
    }

    pub fn view(&self) -> Arc<ClusterView> {
        self.current.read().clone()
    }

    /// Poll the source if the refresh interval has elapsed. A view with an
    /// older or equal version is ignored.
    pub fn maybe_refresh(&self) {
        let due = self.last_refresh.read().elapsed() >= self.refresh_interval;
        if !due {
            return;
        }
        *self.last_refresh.write() = Instant::now();
        match self.source.fetch() {
            Ok(fresh) => {
                let mut current = self.current.write();
                if fresh.version > current.version {
                    log::info!(
                        "routing table refreshed: version {} -> {}",
                        current.version,
                        fresh.version
                    );
                    *current = Arc::new(fresh);
                }
            }
            Err(err) => log::warn!("routing refresh failed: {}", err),
        }
    }

    /// Drop a shard route after a hard failure; the next successful poll
    /// restores it if the controller still advertises it.
    pub fn prune_shard(&self, index: &str, shard_id: ShardId) {
        let mut current = self.current.write();
        let mut pruned = (**current).clone();
        pruned
            .shards
            .retain(|route| !(route.index == index && route.shard_id == shard_id));
        *current = Arc::new(pruned);
    }
}

/// A fixed, programmatic cluster view; the state source used by tests and
/// single-process deployments.
pub struct StaticClusterSource {
    view: RwLock<ClusterView>,
}

impl StaticClusterSource {
    pub fn new(view: ClusterView) -> Self {
        StaticClusterSource {
            view: RwLock::new(view),
        }
    }

    pub fn single_node(index: &str, num_shards: u32) -> Self {
        let node = NodeAddr::new("local");
        Self::new(ClusterView {
            nodes: vec![node.clone()],
            shards: (0..num_shards)
                .map(|i| ShardRoute {
                    index: index.to_string(),
                    shard_id: ShardId(i),
                    primary: node.clone(),
                    replicas: Vec::new(),
                })
                .collect(),
            version: 1,
        })
    }

    pub fn publish(&self, view: ClusterView) {
        *self.view.write() = view;
    }
}

impl ClusterStateSource for StaticClusterSource {
    fn fetch(&self) -> Result<ClusterView> {
        Ok(self.view.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_version_supersedes() {
        let source = Arc::new(StaticClusterSource::single_node("idx", 2));
        let cache = RoutingCache::new(source.clone(), Duration::from_millis(0)).unwrap();
        assert_eq!(cache.view().shards_for("idx").len(), 2);

        let mut next = (*cache.view()).clone();
        next.version = 2;
        next.shards.pop();
        source.publish(next);
        cache.maybe_refresh();
        assert_eq!(cache.view().shards_for("idx").len(), 1);

        // A stale lower-version view is ignored.
        let mut stale = (*cache.view()).clone();
        stale.version = 1;
        stale.shards.clear();
        source.publish(stale);
        cache.maybe_refresh();
        assert_eq!(cache.view().shards_for("idx").len(), 1);
    }

    #[test]
    fn prune_removes_route_immediately() {
        let source = Arc::new(StaticClusterSource::single_node("idx", 3));
        let cache = RoutingCache::new(source, Duration::from_secs(3600)).unwrap();
        cache.prune_shard("idx", ShardId(1));
        let remaining: Vec<u32> = cache
            .view()
            .shards_for("idx")
            .iter()
            .map(|(id, _)| id.0)
            .collect();
        assert_eq!(remaining, vec![0, 2]);
    }
}
