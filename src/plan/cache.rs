use crate::plan::logical::LogicalPlan;
use crate::plan::physical::PhysicalPlan;
use lru::LruCache;
use parking_lot::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Key of the logical level: the request identity. The mapping version is
/// part of the key, so a mapping change orphans old entries without a
/// coordinated flush (refreshes alone never bump it).
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct LogicalKey {
    pub index: String,
    pub query_canonical: String,
    pub shard_set_hash: u64,
    pub mapping_version: u64,
}

pub fn hash_shard_set(shards: &[u32]) -> u64 {
    let mut sorted: Vec<u32> = shards.to_vec();
    sorted.sort_unstable();
    let mut hasher = DefaultHasher::new();
    sorted.hash(&mut hasher);
    hasher.finish()
}

struct CacheShard<K: Hash + Eq, V> {
    entries: RwLock<LruCache<K, (V, Instant)>>,
}

/// Sharded LRU with per-entry TTL. Lock contention spreads over the shards;
/// each lookup touches exactly one shard lock.
struct ShardedCache<K: Hash + Eq, V: Clone> {
    shards: Vec<CacheShard<K, V>>,
    ttl: Duration,
}

impl<K: Hash + Eq, V: Clone> ShardedCache<K, V> {
    fn new(capacity: usize, num_shards: usize, ttl: Duration) -> Self {
        let num_shards = num_shards.max(1);
        let per_shard = NonZeroUsize::new((capacity / num_shards).max(1)).expect("nonzero");
        ShardedCache {
            shards: (0..num_shards)
                .map(|_| CacheShard {
                    entries: RwLock::new(LruCache::new(per_shard)),
                })
                .collect(),
            ttl,
        }
    }

    fn shard_for(&self, key: &K) -> &CacheShard<K, V> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    fn get(&self, key: &K) -> Option<V> {
        let shard = self.shard_for(key);
        let mut entries = shard.entries.write();
        match entries.get(key) {
            Some((value, inserted_at)) => {
                if inserted_at.elapsed() > self.ttl {
                    entries.pop(key);
                    None
                } else {
                    Some(value.clone())
                }
            }
            None => None,
        }
    }

    fn put(&self, key: K, value: V) {
        let shard = self.shard_for(&key);
        shard.entries.write().put(key, (value, Instant::now()));
    }

    fn retain<F: Fn(&K) -> bool>(&self, keep: F)
    where
        K: Clone,
    {
        for shard in &self.shards {
            let mut entries = shard.entries.write();
            let doomed: Vec<K> = entries
                .iter()
                .filter(|(k, _)| !keep(k))
                .map(|(k, _)| k.clone())
                .collect();
            for key in doomed {
                entries.pop(&key);
            }
        }
    }

    fn len(&self) -> usize {
        self.shards.iter().map(|s| s.entries.read().len()).sum()
    }
}

/// Two-level plan cache: request identity → logical plan, canonical logical
/// form → physical plan. Process-wide, created at coordinator init with
/// bounded size and TTL.
pub struct PlanCache {
    logical: ShardedCache<LogicalKey, Arc<LogicalPlan>>,
    physical: ShardedCache<String, Arc<PhysicalPlan>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl PlanCache {
    pub fn new(capacity: usize, num_shards: usize, ttl: Duration) -> Self {
        PlanCache {
            logical: ShardedCache::new(capacity, num_shards, ttl),
            physical: ShardedCache::new(capacity, num_shards, ttl),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    pub fn get_logical(&self, key: &LogicalKey) -> Option<Arc<LogicalPlan>> {
        let found = self.logical.get(key);
        match &found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    pub fn put_logical(&self, key: LogicalKey, plan: Arc<LogicalPlan>) {
        self.logical.put(key, plan);
    }

    pub fn get_physical(&self, canonical: &str) -> Option<Arc<PhysicalPlan>> {
        self.physical.get(&canonical.to_string())
    }

    pub fn put_physical(&self, canonical: String, plan: Arc<PhysicalPlan>) {
        self.physical.put(canonical, plan);
    }

    /// Drop every logical entry for an index. Called on mapping-version
    /// bumps; physical entries keyed by canonical form expire via TTL.
    pub fn invalidate_index(&self, index: &str) {
        log::debug!("invalidating plan cache for index {}", index);
        self.logical.retain(|key| key.index != index);
    }

    pub fn stats(&self) -> PlanCacheStats {
        PlanCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            logical_entries: self.logical.len(),
            physical_entries: self.physical.len(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlanCacheStats {
    pub hits: usize,
    pub misses: usize,
    pub logical_entries: usize,
    pub physical_entries: usize,
}
