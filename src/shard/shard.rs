use crate::core::error::Result;
use crate::core::types::{Document, ShardId};
use crate::schema::mapping::Mapping;
use crate::segment::builder::SegmentBuilder;
use crate::segment::format;
use crate::segment::segment::Segment;
use crate::shard::reader::ShardReader;
use parking_lot::RwLock;
use std::fs;
use std::path::Path;
use std::sync::Arc;

struct ShardInner {
    segments: Vec<Arc<Segment>>,
    builder: SegmentBuilder,
}

/// One index partition: an ordered list of sealed segments plus the
/// in-flight builder. A single writer lock covers both; queries only hold
/// it long enough to clone the segment-list snapshot.
pub struct Shard {
    pub id: ShardId,
    mapping: Arc<Mapping>,
    inner: RwLock<ShardInner>,
}

impl Shard {
    pub fn new(id: ShardId, mapping: Arc<Mapping>) -> Self {
        Shard {
            inner: RwLock::new(ShardInner {
                segments: Vec::new(),
                builder: SegmentBuilder::new(mapping.clone()),
            }),
            id,
            mapping,
        }
    }

    pub fn mapping(&self) -> &Arc<Mapping> {
        &self.mapping
    }

    pub fn index(&self, doc: &Document) -> Result<()> {
        let mut inner = self.inner.write();
        inner.builder.add_document(doc)?;
        Ok(())
    }

    /// Tombstone a doc wherever it lives: sealed segments or the builder.
    pub fn delete(&self, doc_id: &str) -> bool {
        let mut inner = self.inner.write();
        let mut found = inner.builder.delete(doc_id);
        for segment in &inner.segments {
            if let Some(ord) = segment.ord_of(doc_id) {
                segment.delete(ord);
                found = true;
            }
        }
        found
    }

    /// Seal the builder into a new segment and make it visible to queries
    /// started after this call. Readers holding older snapshots are
    /// unaffected.
    pub fn refresh(&self) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.builder.is_empty() {
            return Ok(());
        }
        let full = std::mem::replace(&mut inner.builder, SegmentBuilder::new(self.mapping.clone()));
        let segment = Arc::new(full.seal()?);
        log::debug!(
            "shard {} refresh: sealed segment {:?} with {} docs",
            self.id.0,
            segment.id.0,
            segment.max_doc
        );
        inner.segments.push(segment);
        Ok(())
    }

    /// Refresh plus durable persistence of every segment directory.
    pub fn commit(&self, dir: &Path) -> Result<()> {
        self.refresh()?;
        fs::create_dir_all(dir)?;
        let segments = self.inner.read().segments.clone();
        for segment in &segments {
            let seg_dir = dir.join(segment.id.0.to_string());
            if !seg_dir.exists() {
                format::write_segment(segment, &seg_dir)?;
            }
        }
        Ok(())
    }

    /// Load a shard from a directory of committed segment directories.
    pub fn open(id: ShardId, mapping: Arc<Mapping>, dir: &Path) -> Result<Self> {
        let shard = Shard::new(id, mapping);
        let mut loaded = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                loaded.push(Arc::new(format::open_segment(&entry.path())?));
            }
        }
        // Deterministic segment order across restarts.
        loaded.sort_by_key(|s: &Arc<Segment>| (s.sealed_at, s.id.0));
        shard.inner.write().segments = loaded;
        Ok(shard)
    }

    /// Point-in-time snapshot for one query. The clone happens under the
    /// read lock; iteration afterwards touches no shard state.
    pub fn reader(&self) -> ShardReader {
        let inner = self.inner.read();
        ShardReader {
            segments: inner.segments.clone(),
            mapping: self.mapping.clone(),
        }
    }

    pub fn num_docs(&self) -> u64 {
        let inner = self.inner.read();
        let sealed: u64 = inner.segments.iter().map(|s| s.num_live_docs()).sum();
        sealed + inner.builder.num_docs() as u64
    }

    pub fn num_segments(&self) -> usize {
        self.inner.read().segments.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::FieldValue;
    use crate::schema::mapping::FieldType;

    fn mapping() -> Arc<Mapping> {
        Arc::new(
            Mapping::new()
                .with_field("body", FieldType::Text)
                .with_field("qty", FieldType::Long),
        )
    }

    fn doc(id: &str, qty: i64) -> Document {
        Document::new(id)
            .with_field("body", FieldValue::Text("hello world".into()))
            .with_field("qty", FieldValue::Long(qty))
    }

    #[test]
    fn refresh_publishes_new_segment() {
        let shard = Shard::new(ShardId(0), mapping());
        shard.index(&doc("a", 1)).unwrap();
        assert_eq!(shard.num_segments(), 0);
        shard.refresh().unwrap();
        assert_eq!(shard.num_segments(), 1);
        // Empty builder: refresh is a no-op.
        shard.refresh().unwrap();
        assert_eq!(shard.num_segments(), 1);
    }

    #[test]
    fn readers_keep_their_snapshot() {
        let shard = Shard::new(ShardId(0), mapping());
        shard.index(&doc("a", 1)).unwrap();
        shard.refresh().unwrap();

        let before = shard.reader();
        shard.index(&doc("b", 2)).unwrap();
        shard.refresh().unwrap();
        let after = shard.reader();

        assert_eq!(before.segments.len(), 1);
        assert_eq!(after.segments.len(), 2);
    }

    #[test]
    fn delete_marks_tombstone() {
        let shard = Shard::new(ShardId(0), mapping());
        shard.index(&doc("a", 1)).unwrap();
        shard.index(&doc("b", 2)).unwrap();
        shard.refresh().unwrap();
        assert_eq!(shard.num_docs(), 2);
        assert!(shard.delete("a"));
        assert!(!shard.delete("missing"));
        assert_eq!(shard.num_docs(), 1);
    }

    #[test]
    fn commit_then_open_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let shard = Shard::new(ShardId(0), mapping());
        shard.index(&doc("a", 1)).unwrap();
        shard.index(&doc("b", 2)).unwrap();
        shard.commit(dir.path()).unwrap();

        let reopened = Shard::open(ShardId(0), mapping(), dir.path()).unwrap();
        assert_eq!(reopened.num_docs(), 2);
        let reader = reopened.reader();
        assert!(reader.segments[0].ord_of("a").is_some());
    }
}
