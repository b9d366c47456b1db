pub mod bm25;
pub mod boolean;
pub mod compile;
pub mod multi_term;
pub mod phrase;
pub mod range;
pub mod term;

use crate::core::types::{DocOrd, NO_MORE_DOCS};

pub use boolean::{ConjunctionScorer, DisjunctionScorer, ReqExclScorer, ReqOptScorer};
pub use phrase::PhraseScorer;
pub use range::{DoubleRangeScorer, NumericRangeScorer};
pub use term::TermScorer;

/// Iteration over a non-decreasing set of doc ordinals.
///
/// Contract:
/// * `doc_id()` is `-1` before the first positioning call and `NO_MORE_DOCS`
///   once exhausted.
/// * After returning `NO_MORE_DOCS`, every further `next`/`advance` call
///   returns `NO_MORE_DOCS` without any state change.
/// * `advance(target)` with `target <= doc_id()` is a programming defect and
///   panics.
pub trait DocIterator {
    fn doc_id(&self) -> DocOrd;
    fn next(&mut self) -> DocOrd;
    fn advance(&mut self, target: DocOrd) -> DocOrd;

    /// Estimated number of docs this iterator may still emit.
    fn cost(&self) -> u64;
}

/// The scorer tree. A closed set of variants dispatched by match keeps the
/// hot path monomorphic and makes a missing case a compile error.
#[derive(Debug)]
pub enum Scorer<'s> {
    Empty(EmptyScorer),
    MatchAll(MatchAllScorer),
    Term(TermScorer<'s>),
    Phrase(PhraseScorer<'s>),
    LongRange(NumericRangeScorer<'s>),
    DoubleRange(DoubleRangeScorer<'s>),
    Conjunction(ConjunctionScorer<'s>),
    Disjunction(DisjunctionScorer<'s>),
    ReqExcl(Box<ReqExclScorer<'s>>),
    ReqOpt(Box<ReqOptScorer<'s>>),
    Exists(ExistsScorer<'s>),
}

impl<'s> Scorer<'s> {
    /// Score of the current document. Only valid while positioned on a real
    /// doc (not `-1`, not `NO_MORE_DOCS`).
    pub fn score(&mut self) -> f32 {
        match self {
            Scorer::Empty(_) => 0.0,
            Scorer::MatchAll(_) => 1.0,
            Scorer::Term(s) => s.score(),
            Scorer::Phrase(s) => s.score(),
            Scorer::LongRange(_) | Scorer::DoubleRange(_) | Scorer::Exists(_) => 1.0,
            Scorer::Conjunction(s) => s.score(),
            Scorer::Disjunction(s) => s.score(),
            Scorer::ReqExcl(s) => s.score(),
            Scorer::ReqOpt(s) => s.score(),
        }
    }
}

impl<'s> DocIterator for Scorer<'s> {
    fn doc_id(&self) -> DocOrd {
        match self {
            Scorer::Empty(s) => s.doc_id(),
            Scorer::MatchAll(s) => s.doc_id(),
            Scorer::Term(s) => s.doc_id(),
            Scorer::Phrase(s) => s.doc_id(),
            Scorer::LongRange(s) => s.doc_id(),
            Scorer::DoubleRange(s) => s.doc_id(),
            Scorer::Conjunction(s) => s.doc_id(),
            Scorer::Disjunction(s) => s.doc_id(),
            Scorer::ReqExcl(s) => s.doc_id(),
            Scorer::ReqOpt(s) => s.doc_id(),
            Scorer::Exists(s) => s.doc_id(),
        }
    }

    fn next(&mut self) -> DocOrd {
        match self {
            Scorer::Empty(s) => s.next(),
            Scorer::MatchAll(s) => s.next(),
            Scorer::Term(s) => s.next(),
            Scorer::Phrase(s) => s.next(),
            Scorer::LongRange(s) => s.next(),
            Scorer::DoubleRange(s) => s.next(),
            Scorer::Conjunction(s) => s.next(),
            Scorer::Disjunction(s) => s.next(),
            Scorer::ReqExcl(s) => s.next(),
            Scorer::ReqOpt(s) => s.next(),
            Scorer::Exists(s) => s.next(),
        }
    }

    fn advance(&mut self, target: DocOrd) -> DocOrd {
        match self {
            Scorer::Empty(s) => s.advance(target),
            Scorer::MatchAll(s) => s.advance(target),
            Scorer::Term(s) => s.advance(target),
            Scorer::Phrase(s) => s.advance(target),
            Scorer::LongRange(s) => s.advance(target),
            Scorer::DoubleRange(s) => s.advance(target),
            Scorer::Conjunction(s) => s.advance(target),
            Scorer::Disjunction(s) => s.advance(target),
            Scorer::ReqExcl(s) => s.advance(target),
            Scorer::ReqOpt(s) => s.advance(target),
            Scorer::Exists(s) => s.advance(target),
        }
    }

    fn cost(&self) -> u64 {
        match self {
            Scorer::Empty(s) => s.cost(),
            Scorer::MatchAll(s) => s.cost(),
            Scorer::Term(s) => s.cost(),
            Scorer::Phrase(s) => s.cost(),
            Scorer::LongRange(s) => s.cost(),
            Scorer::DoubleRange(s) => s.cost(),
            Scorer::Conjunction(s) => s.cost(),
            Scorer::Disjunction(s) => s.cost(),
            Scorer::ReqExcl(s) => s.cost(),
            Scorer::ReqOpt(s) => s.cost(),
            Scorer::Exists(s) => s.cost(),
        }
    }
}

/// Matches docs where a field has a value: a non-sentinel doc-values cell,
/// or a non-zero norm for text fields. Constant score 1.0.
#[derive(Debug)]
pub struct ExistsScorer<'s> {
    probe: ExistsProbe<'s>,
    max_doc: DocOrd,
    doc: DocOrd,
}

#[derive(Debug)]
enum ExistsProbe<'s> {
    Values(&'s crate::segment::docvalues::DocValues),
    Norms(&'s [u8]),
}

impl<'s> ExistsScorer<'s> {
    pub fn over_values(values: &'s crate::segment::docvalues::DocValues, max_doc: DocOrd) -> Self {
        ExistsScorer {
            probe: ExistsProbe::Values(values),
            max_doc,
            doc: -1,
        }
    }

    pub fn over_norms(norms: &'s [u8], max_doc: DocOrd) -> Self {
        ExistsScorer {
            probe: ExistsProbe::Norms(norms),
            max_doc,
            doc: -1,
        }
    }

    fn matches(&self, doc: DocOrd) -> bool {
        match &self.probe {
            ExistsProbe::Values(values) => values.has_value(doc),
            ExistsProbe::Norms(norms) => norms.get(doc as usize).is_some_and(|&n| n != 0),
        }
    }

    fn scan_from(&mut self, start: DocOrd) -> DocOrd {
        let mut doc = start;
        while doc < self.max_doc {
            if self.matches(doc) {
                self.doc = doc;
                return doc;
            }
            doc += 1;
        }
        self.doc = NO_MORE_DOCS;
        NO_MORE_DOCS
    }
}

impl<'s> DocIterator for ExistsScorer<'s> {
    fn doc_id(&self) -> DocOrd {
        self.doc
    }

    fn next(&mut self) -> DocOrd {
        if self.doc == NO_MORE_DOCS {
            return NO_MORE_DOCS;
        }
        self.scan_from(self.doc + 1)
    }

    fn advance(&mut self, target: DocOrd) -> DocOrd {
        if self.doc == NO_MORE_DOCS {
            return NO_MORE_DOCS;
        }
        assert!(
            target > self.doc,
            "advance target {} not beyond current doc {}",
            target,
            self.doc
        );
        self.scan_from(target)
    }

    fn cost(&self) -> u64 {
        self.max_doc as u64
    }
}

/// Matches nothing.
#[derive(Debug, Default)]
pub struct EmptyScorer {
    exhausted: bool,
}

impl EmptyScorer {
    pub fn new() -> Self {
        EmptyScorer { exhausted: false }
    }
}

impl DocIterator for EmptyScorer {
    fn doc_id(&self) -> DocOrd {
        if self.exhausted { NO_MORE_DOCS } else { -1 }
    }

    fn next(&mut self) -> DocOrd {
        self.exhausted = true;
        NO_MORE_DOCS
    }

    fn advance(&mut self, _target: DocOrd) -> DocOrd {
        self.exhausted = true;
        NO_MORE_DOCS
    }

    fn cost(&self) -> u64 {
        0
    }
}

/// Matches every ordinal in `[0, max_doc)` with constant score 1.0.
#[derive(Debug)]
pub struct MatchAllScorer {
    max_doc: DocOrd,
    doc: DocOrd,
}

impl MatchAllScorer {
    pub fn new(max_doc: DocOrd) -> Self {
        MatchAllScorer { max_doc, doc: -1 }
    }
}

impl DocIterator for MatchAllScorer {
    fn doc_id(&self) -> DocOrd {
        self.doc
    }

    fn next(&mut self) -> DocOrd {
        if self.doc == NO_MORE_DOCS {
            return NO_MORE_DOCS;
        }
        self.doc = if self.doc + 1 < self.max_doc {
            self.doc + 1
        } else {
            NO_MORE_DOCS
        };
        self.doc
    }

    fn advance(&mut self, target: DocOrd) -> DocOrd {
        if self.doc == NO_MORE_DOCS {
            return NO_MORE_DOCS;
        }
        assert!(
            target > self.doc,
            "advance target {} not beyond current doc {}",
            target,
            self.doc
        );
        self.doc = if target < self.max_doc {
            target
        } else {
            NO_MORE_DOCS
        };
        self.doc
    }

    fn cost(&self) -> u64 {
        self.max_doc as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_scorer_is_idempotent() {
        let mut s = EmptyScorer::new();
        assert_eq!(s.doc_id(), -1);
        assert_eq!(s.next(), NO_MORE_DOCS);
        assert_eq!(s.next(), NO_MORE_DOCS);
        assert_eq!(s.advance(100), NO_MORE_DOCS);
        assert_eq!(s.doc_id(), NO_MORE_DOCS);
    }

    #[test]
    fn match_all_walks_range() {
        let mut s = MatchAllScorer::new(3);
        assert_eq!(s.next(), 0);
        assert_eq!(s.advance(2), 2);
        assert_eq!(s.next(), NO_MORE_DOCS);
        assert_eq!(s.next(), NO_MORE_DOCS);
    }
}
