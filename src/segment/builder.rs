use crate::analysis::tokenizer::StandardTokenizer;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{DocOrd, Document, FieldValue};
use crate::schema::mapping::{FieldType, Mapping};
use crate::segment::docvalues::{DocValues, KeywordColumn, NumericColumn, MISSING_KEYWORD_ORD, MISSING_LONG};
use crate::segment::postings::PostingList;
use crate::segment::segment::{encode_norm, Segment, SegmentId, TextFieldStats};
use chrono::Utc;
use roaring::RoaringBitmap;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Accumulates documents for the next segment. `seal()` freezes the
/// collected state into an immutable `Segment`.
pub struct SegmentBuilder {
    mapping: Arc<Mapping>,
    tokenizer: StandardTokenizer,

    doc_ids: Vec<String>,
    id_to_ord: HashMap<String, DocOrd>,

    // field -> term -> ascending (ord, positions)
    postings: BTreeMap<String, BTreeMap<Vec<u8>, Vec<(u32, Vec<u32>)>>>,
    // field -> sparse (ord -> cell)
    numeric: BTreeMap<String, HashMap<DocOrd, i64>>,
    keyword: BTreeMap<String, HashMap<DocOrd, String>>,
    norms: BTreeMap<String, HashMap<DocOrd, u8>>,
    text_stats: BTreeMap<String, TextFieldStats>,

    deleted: RoaringBitmap,
}

impl SegmentBuilder {
    pub fn new(mapping: Arc<Mapping>) -> Self {
        SegmentBuilder {
            mapping,
            tokenizer: StandardTokenizer::default(),
            doc_ids: Vec::new(),
            id_to_ord: HashMap::new(),
            postings: BTreeMap::new(),
            numeric: BTreeMap::new(),
            keyword: BTreeMap::new(),
            norms: BTreeMap::new(),
            text_stats: BTreeMap::new(),
            deleted: RoaringBitmap::new(),
        }
    }

    pub fn num_docs(&self) -> usize {
        self.doc_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_ids.is_empty()
    }

    pub fn contains(&self, doc_id: &str) -> bool {
        self.id_to_ord.contains_key(doc_id)
    }

    /// Tombstone an uncommitted doc; carried into the sealed segment.
    pub fn delete(&mut self, doc_id: &str) -> bool {
        match self.id_to_ord.get(doc_id) {
            Some(&ord) => {
                self.deleted.insert(ord as u32);
                true
            }
            None => false,
        }
    }

    pub fn add_document(&mut self, doc: &Document) -> Result<DocOrd> {
        if self.id_to_ord.contains_key(&doc.id) {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("duplicate doc id '{}'", doc.id),
            ));
        }
        for (field, value) in &doc.fields {
            self.mapping.check_value(field, value)?;
        }

        let ord = self.doc_ids.len() as DocOrd;
        self.doc_ids.push(doc.id.clone());
        self.id_to_ord.insert(doc.id.clone(), ord);

        for (field, value) in &doc.fields {
            match value {
                FieldValue::Text(text) => self.index_text(field, ord, text),
                FieldValue::Keyword(kw) => {
                    self.push_posting(field, kw.as_bytes(), ord, Vec::new());
                    self.keyword
                        .entry(field.clone())
                        .or_default()
                        .insert(ord, kw.clone());
                }
                other => {
                    // long / double / bool / date all land in an i64 cell
                    if let Some(cell) = other.as_docvalue() {
                        self.numeric
                            .entry(field.clone())
                            .or_default()
                            .insert(ord, cell);
                    }
                }
            }
        }

        Ok(ord)
    }

    fn index_text(&mut self, field: &str, ord: DocOrd, text: &str) {
        let tokens = self.tokenizer.tokenize(text);
        let stats = self.text_stats.entry(field.to_string()).or_default();
        stats.sum_len += tokens.len() as u64;
        stats.docs_with_field += 1;
        self.norms
            .entry(field.to_string())
            .or_default()
            .insert(ord, encode_norm(tokens.len() as u32));

        let mut term_positions: BTreeMap<Vec<u8>, Vec<u32>> = BTreeMap::new();
        for token in tokens {
            term_positions
                .entry(token.text.into_bytes())
                .or_default()
                .push(token.position);
        }
        for (term, positions) in term_positions {
            self.push_posting(field, &term, ord, positions);
        }
    }

    fn push_posting(&mut self, field: &str, term: &[u8], ord: DocOrd, positions: Vec<u32>) {
        self.postings
            .entry(field.to_string())
            .or_default()
            .entry(term.to_vec())
            .or_default()
            .push((ord as u32, positions));
    }

    /// Freeze into an immutable segment. The builder is consumed; ordinals
    /// stay dense `[0, max_doc)` with tombstones carried over.
    pub fn seal(self) -> Result<Segment> {
        let max_doc = self.doc_ids.len();

        let mut postings = BTreeMap::new();
        for (field, terms) in self.postings {
            let mut encoded = BTreeMap::new();
            for (term, docs) in terms {
                // add_document assigns ascending ords, so docs are sorted
                encoded.insert(term, PostingList::from_postings(&docs));
            }
            postings.insert(field, encoded);
        }

        let mut doc_values = BTreeMap::new();
        for (field, cells) in self.numeric {
            let mut column = vec![MISSING_LONG; max_doc];
            for (ord, cell) in cells {
                column[ord as usize] = cell;
            }
            doc_values.insert(field, DocValues::Numeric(NumericColumn::new(column)));
        }
        for (field, cells) in self.keyword {
            let mut dict: Vec<String> = cells.values().cloned().collect();
            dict.sort();
            dict.dedup();
            let ord_of: HashMap<&str, u32> = dict
                .iter()
                .enumerate()
                .map(|(i, term)| (term.as_str(), i as u32 + 1))
                .collect();
            let mut ords = vec![MISSING_KEYWORD_ORD; max_doc];
            for (doc, term) in &cells {
                ords[*doc as usize] = ord_of[term.as_str()];
            }
            doc_values.insert(field, DocValues::Keyword(KeywordColumn::new(ords, dict)));
        }

        let mut norms = BTreeMap::new();
        for (field, cells) in self.norms {
            let mut column = vec![0u8; max_doc];
            for (ord, norm) in cells {
                column[ord as usize] = norm;
            }
            norms.insert(field, column);
        }

        Ok(Segment::from_parts(
            SegmentId::new(),
            Utc::now(),
            self.doc_ids,
            postings,
            doc_values,
            norms,
            self.text_stats,
            self.deleted,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::NO_MORE_DOCS;

    fn mapping() -> Arc<Mapping> {
        Arc::new(
            Mapping::new()
                .with_field("title", FieldType::Text)
                .with_field("category", FieldType::Keyword)
                .with_field("price", FieldType::Double)
                .with_field("count", FieldType::Long),
        )
    }

    #[test]
    fn index_then_term_roundtrip() {
        let mut builder = SegmentBuilder::new(mapping());
        builder
            .add_document(
                &Document::new("a")
                    .with_field("title", FieldValue::Text("rust search engine".into()))
                    .with_field("category", FieldValue::Keyword("tools".into()))
                    .with_field("count", FieldValue::Long(7)),
            )
            .unwrap();
        builder
            .add_document(
                &Document::new("b")
                    .with_field("title", FieldValue::Text("search again".into())),
            )
            .unwrap();
        let segment = builder.seal().unwrap();

        assert_eq!(segment.max_doc, 2);
        let mut it = segment.postings("title", b"search").unwrap().unwrap();
        assert_eq!(it.next_doc(), 0);
        assert_eq!(it.next_doc(), 1);
        assert_eq!(it.next_doc(), NO_MORE_DOCS);

        let mut kw = segment.postings("category", b"tools").unwrap().unwrap();
        assert_eq!(kw.next_doc(), 0);
        assert_eq!(kw.next_doc(), NO_MORE_DOCS);

        assert_eq!(segment.numeric_values("count").unwrap().get(0), Some(7));
        assert_eq!(segment.numeric_values("count").unwrap().get(1), None);
        assert_eq!(segment.external_id(1), Some("b"));
        assert_eq!(segment.ord_of("a"), Some(0));
    }

    #[test]
    fn double_cells_keep_bit_pattern() {
        let mut builder = SegmentBuilder::new(mapping());
        builder
            .add_document(&Document::new("a").with_field("price", FieldValue::Double(99.99)))
            .unwrap();
        let segment = builder.seal().unwrap();
        let col = segment.numeric_values("price").unwrap();
        assert_eq!(col.get_double(0), Some(99.99));
        // The raw cell is the bit pattern, not a truncated integer.
        assert_ne!(col.get(0), Some(99));
    }

    #[test]
    fn unmapped_field_rejected() {
        let mut builder = SegmentBuilder::new(mapping());
        let err = builder
            .add_document(&Document::new("a").with_field("nope", FieldValue::Long(1)))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeMismatch);
    }
}
