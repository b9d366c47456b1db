use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub shard_timeout: Duration,
    pub routing_refresh_interval: Duration,

    // Result window
    pub max_result_window: u32,

    // Plan cache
    pub plan_cache_capacity: usize,
    pub plan_cache_shards: usize,
    pub plan_cache_ttl: Duration,

    // BM25
    pub bm25_k1: f32,
    pub bm25_b: f32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            shard_timeout: Duration::from_secs(30),
            routing_refresh_interval: Duration::from_secs(30),
            max_result_window: 10_000,
            plan_cache_capacity: 1024, // per cache level, entries
            plan_cache_shards: 16,
            plan_cache_ttl: Duration::from_secs(300),
            bm25_k1: 1.2,
            bm25_b: 0.75,
        }
    }
}
