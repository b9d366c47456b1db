use crate::core::error::Result;
use crate::core::types::DocOrd;
use crate::scorer::bm25::Bm25Weight;
use crate::scorer::DocIterator;
use crate::segment::postings::PostingsIterator;
use crate::segment::segment::{decode_norm, Segment};

/// Leaf scorer over one (field, term) posting list, BM25 scored.
#[derive(Debug)]
pub struct TermScorer<'s> {
    postings: PostingsIterator,
    norms: Option<&'s [u8]>,
    weight: Bm25Weight,
}

impl<'s> TermScorer<'s> {
    /// `None` when the segment has no postings for the term.
    pub fn create(
        segment: &'s Segment,
        field: &str,
        term: &[u8],
        k1: f32,
        b: f32,
    ) -> Result<Option<Self>> {
        let Some(postings) = segment.postings(field, term) else {
            return Ok(None);
        };
        Ok(Some(TermScorer {
            postings: postings?,
            norms: segment.field_norms(field),
            weight: Bm25Weight::for_term(segment, field, term, k1, b),
        }))
    }

    /// Postings-only scorer with a neutral weight, for combinator tests.
    #[cfg(test)]
    pub(crate) fn from_parts(postings: PostingsIterator) -> TermScorer<'static> {
        TermScorer {
            postings,
            norms: None,
            weight: Bm25Weight {
                idf: 1.0,
                k1: 1.2,
                b: 0.75,
                avg_doc_len: 0.0,
            },
        }
    }

    pub fn score(&mut self) -> f32 {
        let doc = self.postings.doc_id();
        let doc_len = self
            .norms
            .and_then(|n| n.get(doc as usize).copied())
            .map(|norm| decode_norm(norm) as f32)
            .unwrap_or(1.0);
        self.weight.score(self.postings.freq() as f32, doc_len)
    }

    pub fn freq(&self) -> u32 {
        self.postings.freq()
    }
}

impl<'s> DocIterator for TermScorer<'s> {
    fn doc_id(&self) -> DocOrd {
        self.postings.doc_id()
    }

    fn next(&mut self) -> DocOrd {
        self.postings.next_doc()
    }

    fn advance(&mut self, target: DocOrd) -> DocOrd {
        self.postings.advance(target)
    }

    fn cost(&self) -> u64 {
        self.postings.cost()
    }
}
