pub mod core;
pub mod analysis;
pub mod schema;
pub mod compression;
pub mod segment;
pub mod scorer;
pub mod expr;
pub mod agg;
pub mod shard;
pub mod plan;
pub mod cluster;
pub mod rpc;
pub mod coordinator;

/*
┌──────────────────────────────────────────────────────────────────────────┐
│                         SQUALL READ-PATH LAYOUT                          │
└──────────────────────────────────────────────────────────────────────────┘

  parsed request
       │
       ▼
  coordinator::Coordinator ──► plan::{logical, rules, physical, cache}
       │                              (build → rewrite → select → memoise)
       │ fan-out (one task per shard, crossbeam join w/ deadline)
       ▼
  rpc::ShardTransport ──wire──► shard::ShardExecutor
                                      │  per segment: rebind scorers,
                                      │  post-filter, top-K, aggregators
                                      ▼
                               scorer::Scorer tree ──► segment::Segment
                                                        (postings, doc
                                                         values, norms,
                                                         live docs)
       ▲
       │ merge: k-way hits (score desc, shard asc, id asc)
       │        + agg::partial merge algebra
  coordinator::merge

  Write path: shard::Shard owns sealed segments + one SegmentBuilder;
  refresh() seals and publishes, commit() also persists via
  segment::format (magic QDSG\x01, little-endian, CRC32 per file).
*/
