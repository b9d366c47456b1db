use crate::core::types::DocOrd;
use crate::segment::docvalues::{DocValues, KeywordColumn, NumericColumn};
use crate::segment::postings::{PostingList, PostingsIterator};
use crate::segment::terms::TermsEnum;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use roaring::RoaringBitmap;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentId(pub Uuid);

impl SegmentId {
    pub fn new() -> Self {
        SegmentId(Uuid::new_v4())
    }
}

impl Default for SegmentId {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-text-field length statistics used by BM25.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextFieldStats {
    pub sum_len: u64,
    pub docs_with_field: u32,
}

/// One immutable unit of index data. Everything except the tombstone bitset
/// is frozen at seal time; tombstones only ever gain bits.
#[derive(Debug)]
pub struct Segment {
    pub id: SegmentId,
    pub max_doc: DocOrd,
    pub sealed_at: DateTime<Utc>,

    doc_ids: Vec<String>,
    id_to_ord: HashMap<String, DocOrd>,

    postings: BTreeMap<String, BTreeMap<Vec<u8>, PostingList>>,
    doc_values: BTreeMap<String, DocValues>,
    norms: BTreeMap<String, Vec<u8>>,
    text_stats: BTreeMap<String, TextFieldStats>,

    deleted: RwLock<RoaringBitmap>,
}

impl Segment {
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: SegmentId,
        sealed_at: DateTime<Utc>,
        doc_ids: Vec<String>,
        postings: BTreeMap<String, BTreeMap<Vec<u8>, PostingList>>,
        doc_values: BTreeMap<String, DocValues>,
        norms: BTreeMap<String, Vec<u8>>,
        text_stats: BTreeMap<String, TextFieldStats>,
        deleted: RoaringBitmap,
    ) -> Self {
        let id_to_ord = doc_ids
            .iter()
            .enumerate()
            .map(|(ord, doc_id)| (doc_id.clone(), ord as DocOrd))
            .collect();
        Segment {
            id,
            max_doc: doc_ids.len() as DocOrd,
            sealed_at,
            doc_ids,
            id_to_ord,
            postings,
            doc_values,
            norms,
            text_stats,
            deleted: RwLock::new(deleted),
        }
    }

    /// Sorted term cursor for a field, if the field has postings here.
    pub fn terms(&self, field: &str) -> Option<TermsEnum<'_>> {
        self.postings.get(field).map(TermsEnum::new)
    }

    /// Fresh postings iterator for an exact (field, term).
    pub fn postings(&self, field: &str, term: &[u8]) -> Option<crate::core::error::Result<PostingsIterator>> {
        self.postings
            .get(field)
            .and_then(|terms| terms.get(term))
            .map(PostingList::iterator)
    }

    pub fn posting_list(&self, field: &str, term: &[u8]) -> Option<&PostingList> {
        self.postings.get(field).and_then(|terms| terms.get(term))
    }

    pub fn doc_freq(&self, field: &str, term: &[u8]) -> u32 {
        self.posting_list(field, term)
            .map(|p| p.doc_freq())
            .unwrap_or(0)
    }

    pub fn doc_values(&self, field: &str) -> Option<&DocValues> {
        self.doc_values.get(field)
    }

    pub fn numeric_values(&self, field: &str) -> Option<&NumericColumn> {
        self.doc_values.get(field).and_then(DocValues::as_numeric)
    }

    pub fn keyword_values(&self, field: &str) -> Option<&KeywordColumn> {
        self.doc_values.get(field).and_then(DocValues::as_keyword)
    }

    /// BM25 norm byte for a (text field, doc). Zero means no value indexed.
    pub fn norm(&self, field: &str, doc: DocOrd) -> u8 {
        self.norms
            .get(field)
            .and_then(|bytes| bytes.get(doc as usize).copied())
            .unwrap_or(0)
    }

    pub fn avg_field_len(&self, field: &str) -> f32 {
        match self.text_stats.get(field) {
            Some(stats) if stats.docs_with_field > 0 => {
                stats.sum_len as f32 / stats.docs_with_field as f32
            }
            _ => 0.0,
        }
    }

    pub fn is_live(&self, doc: DocOrd) -> bool {
        !self.deleted.read().contains(doc as u32)
    }

    /// Live-docs bitset snapshot.
    pub fn live_docs(&self) -> RoaringBitmap {
        let deleted = self.deleted.read();
        let mut live = RoaringBitmap::new();
        live.insert_range(0..self.max_doc as u32);
        live - &*deleted
    }

    pub fn deleted_docs(&self) -> RoaringBitmap {
        self.deleted.read().clone()
    }

    /// Tombstone a doc. The ordinal stays allocated forever.
    pub fn delete(&self, doc: DocOrd) {
        self.deleted.write().insert(doc as u32);
    }

    pub fn num_live_docs(&self) -> u64 {
        self.max_doc as u64 - self.deleted.read().len()
    }

    pub fn external_id(&self, doc: DocOrd) -> Option<&str> {
        self.doc_ids.get(doc as usize).map(String::as_str)
    }

    pub fn ord_of(&self, doc_id: &str) -> Option<DocOrd> {
        self.id_to_ord.get(doc_id).copied()
    }

    pub fn doc_ids(&self) -> &[String] {
        &self.doc_ids
    }

    pub fn posting_fields(&self) -> impl Iterator<Item = &String> {
        self.postings.keys()
    }

    pub fn docvalue_fields(&self) -> impl Iterator<Item = &String> {
        self.doc_values.keys()
    }

    pub fn norm_fields(&self) -> impl Iterator<Item = &String> {
        self.norms.keys()
    }

    pub fn field_postings(&self, field: &str) -> Option<&BTreeMap<Vec<u8>, PostingList>> {
        self.postings.get(field)
    }

    pub fn field_norms(&self, field: &str) -> Option<&[u8]> {
        self.norms.get(field).map(Vec::as_slice)
    }

    pub fn text_stats(&self, field: &str) -> Option<TextFieldStats> {
        self.text_stats.get(field).copied()
    }
}

/// Doc length → norm byte. Rounded square root clamped to u8; decode squares
/// it back. Good to ~65k tokens, which BM25's saturation tolerates.
pub fn encode_norm(field_len: u32) -> u8 {
    if field_len == 0 {
        return 0;
    }
    ((field_len as f32).sqrt().round() as u32).clamp(1, 255) as u8
}

pub fn decode_norm(norm: u8) -> u32 {
    (norm as u32) * (norm as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn norm_codec_is_monotonic_and_close() {
        assert_eq!(encode_norm(0), 0);
        assert_eq!(decode_norm(encode_norm(1)), 1);
        assert_eq!(decode_norm(encode_norm(4)), 4);
        let approx = decode_norm(encode_norm(1000)) as f32;
        assert!((approx - 1000.0).abs() / 1000.0 < 0.1);
        assert!(encode_norm(10) <= encode_norm(100));
        assert!(encode_norm(100) <= encode_norm(100_000));
    }
}
