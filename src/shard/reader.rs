use crate::schema::mapping::Mapping;
use crate::segment::segment::Segment;
use std::sync::Arc;

/// Point-in-time view of a shard: the segment list as it stood when the
/// query started. Segments are immutable and shared; a refresh that lands
/// mid-query publishes a new list without touching this one, and the borrow
/// ends when the reader drops.
pub struct ShardReader {
    pub segments: Vec<Arc<Segment>>,
    pub mapping: Arc<Mapping>,
}

impl ShardReader {
    pub fn num_docs(&self) -> u64 {
        self.segments.iter().map(|s| s.num_live_docs()).sum()
    }

    pub fn max_doc_total(&self) -> u64 {
        self.segments.iter().map(|s| s.max_doc as u64).sum()
    }
}
