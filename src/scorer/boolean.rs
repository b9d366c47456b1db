use crate::core::types::{DocOrd, NO_MORE_DOCS};
use crate::scorer::{DocIterator, Scorer};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// A conjunction input. `scoring` marks `must` legs; `filter` legs match but
/// contribute nothing to the score.
#[derive(Debug)]
pub struct ConjunctionLeg<'s> {
    pub scorer: Scorer<'s>,
    pub scoring: bool,
}

/// Intersection of sorted iterators. Inputs are ordered by ascending cost so
/// the rarest iterator drives the leapfrog.
#[derive(Debug)]
pub struct ConjunctionScorer<'s> {
    legs: Vec<ConjunctionLeg<'s>>,
    doc: DocOrd,
}

impl<'s> ConjunctionScorer<'s> {
    pub fn new(mut legs: Vec<ConjunctionLeg<'s>>) -> Self {
        debug_assert!(!legs.is_empty());
        legs.sort_by_key(|leg| leg.scorer.cost());
        ConjunctionScorer { legs, doc: -1 }
    }

    fn align(&mut self, mut candidate: DocOrd) -> DocOrd {
        'outer: loop {
            if candidate == NO_MORE_DOCS {
                self.doc = NO_MORE_DOCS;
                return NO_MORE_DOCS;
            }
            for i in 1..self.legs.len() {
                let mut d = self.legs[i].scorer.doc_id();
                if d < candidate {
                    d = self.legs[i].scorer.advance(candidate);
                }
                if d > candidate {
                    candidate = self.legs[0].scorer.advance(d);
                    continue 'outer;
                }
            }
            self.doc = candidate;
            return candidate;
        }
    }

    pub fn score(&mut self) -> f32 {
        self.legs
            .iter_mut()
            .filter(|leg| leg.scoring)
            .map(|leg| leg.scorer.score())
            .sum()
    }
}

impl<'s> DocIterator for ConjunctionScorer<'s> {
    fn doc_id(&self) -> DocOrd {
        self.doc
    }

    fn next(&mut self) -> DocOrd {
        if self.doc == NO_MORE_DOCS {
            return NO_MORE_DOCS;
        }
        let candidate = self.legs[0].scorer.next();
        self.align(candidate)
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
        let candidate = if self.legs[0].scorer.doc_id() >= target {
            self.legs[0].scorer.doc_id()
        } else {
            self.legs[0].scorer.advance(target)
        };
        self.align(candidate)
    }

    fn cost(&self) -> u64 {
        self.legs.first().map(|leg| leg.scorer.cost()).unwrap_or(0)
    }
}

/// K-way union driven by a min-heap keyed on (doc, child index). Emits docs
/// matched by at least `min_match` children; the children currently sitting
/// on the emitted doc are kept aside in `matched` until the next step.
#[derive(Debug)]
pub struct DisjunctionScorer<'s> {
    children: Vec<Scorer<'s>>,
    heap: BinaryHeap<Reverse<(DocOrd, usize)>>,
    matched: Vec<usize>,
    min_match: usize,
    doc: DocOrd,
    initialized: bool,
}

impl<'s> DisjunctionScorer<'s> {
    pub fn new(children: Vec<Scorer<'s>>, min_match: usize) -> Self {
        DisjunctionScorer {
            children,
            heap: BinaryHeap::new(),
            matched: Vec::new(),
            min_match: min_match.max(1),
            doc: -1,
            initialized: false,
        }
    }

    fn init(&mut self) {
        for (i, child) in self.children.iter_mut().enumerate() {
            let d = child.next();
            if d != NO_MORE_DOCS {
                self.heap.push(Reverse((d, i)));
            }
        }
        self.initialized = true;
    }

    /// Re-enter the matched children, stepping each past the current doc.
    fn reheap_matched(&mut self) {
        for i in std::mem::take(&mut self.matched) {
            let d = self.children[i].next();
            if d != NO_MORE_DOCS {
                self.heap.push(Reverse((d, i)));
            }
        }
    }

    /// Pop the minimum doc and everything equal to it, then emit if enough
    /// children agree.
    fn settle(&mut self) -> DocOrd {
        loop {
            let Some(&Reverse((min_doc, _))) = self.heap.peek() else {
                self.doc = NO_MORE_DOCS;
                return NO_MORE_DOCS;
            };
            while let Some(&Reverse((d, i))) = self.heap.peek() {
                if d != min_doc {
                    break;
                }
                self.heap.pop();
                self.matched.push(i);
            }
            if self.matched.len() >= self.min_match {
                self.doc = min_doc;
                return min_doc;
            }
            self.reheap_matched();
        }
    }

    /// Number of children on the current doc.
    pub fn match_count(&self) -> usize {
        self.matched.len()
    }

    pub fn score(&mut self) -> f32 {
        let matched = self.matched.clone();
        matched
            .into_iter()
            .map(|i| self.children[i].score())
            .sum()
    }
}

impl<'s> DocIterator for DisjunctionScorer<'s> {
    fn doc_id(&self) -> DocOrd {
        self.doc
    }

    fn next(&mut self) -> DocOrd {
        if self.doc == NO_MORE_DOCS {
            return NO_MORE_DOCS;
        }
        if !self.initialized {
            self.init();
        } else {
            self.reheap_matched();
        }
        self.settle()
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
        if !self.initialized {
            self.init();
        } else {
            self.reheap_matched();
        }
        // Drag every child below the target forward before settling.
        let mut behind = Vec::new();
        while let Some(&Reverse((d, i))) = self.heap.peek() {
            if d >= target {
                break;
            }
            self.heap.pop();
            behind.push(i);
        }
        for i in behind {
            let d = self.children[i].advance(target);
            if d != NO_MORE_DOCS {
                self.heap.push(Reverse((d, i)));
            }
        }
        self.settle()
    }

    fn cost(&self) -> u64 {
        self.children.iter().map(|child| child.cost()).sum()
    }
}

/// Emits docs from `req` that are absent from `excl`. The exclusion side is
/// never scored.
#[derive(Debug)]
pub struct ReqExclScorer<'s> {
    pub req: Scorer<'s>,
    pub excl: Scorer<'s>,
}

impl<'s> ReqExclScorer<'s> {
    pub fn new(req: Scorer<'s>, excl: Scorer<'s>) -> Self {
        ReqExclScorer { req, excl }
    }

    fn skip_excluded(&mut self) -> DocOrd {
        loop {
            let doc = self.req.doc_id();
            if doc == NO_MORE_DOCS {
                return NO_MORE_DOCS;
            }
            if self.excl.doc_id() < doc {
                self.excl.advance(doc);
            }
            if self.excl.doc_id() != doc {
                return doc;
            }
            if self.req.next() == NO_MORE_DOCS {
                return NO_MORE_DOCS;
            }
        }
    }

    pub fn score(&mut self) -> f32 {
        self.req.score()
    }
}

impl<'s> DocIterator for ReqExclScorer<'s> {
    fn doc_id(&self) -> DocOrd {
        self.req.doc_id()
    }

    fn next(&mut self) -> DocOrd {
        if self.req.doc_id() == NO_MORE_DOCS {
            return NO_MORE_DOCS;
        }
        if self.req.next() == NO_MORE_DOCS {
            return NO_MORE_DOCS;
        }
        self.skip_excluded()
    }

    fn advance(&mut self, target: DocOrd) -> DocOrd {
        if self.req.doc_id() == NO_MORE_DOCS {
            return NO_MORE_DOCS;
        }
        if self.req.advance(target) == NO_MORE_DOCS {
            return NO_MORE_DOCS;
        }
        self.skip_excluded()
    }

    fn cost(&self) -> u64 {
        self.req.cost()
    }
}

/// Required side drives iteration; the optional side adds to the score when
/// it lands on the same doc. This is `bool { must/filter, should }` with a
/// zero minimum-should-match.
#[derive(Debug)]
pub struct ReqOptScorer<'s> {
    pub req: Scorer<'s>,
    pub opt: Scorer<'s>,
}

impl<'s> ReqOptScorer<'s> {
    pub fn new(req: Scorer<'s>, opt: Scorer<'s>) -> Self {
        ReqOptScorer { req, opt }
    }

    pub fn score(&mut self) -> f32 {
        let doc = self.req.doc_id();
        let mut score = self.req.score();
        if self.opt.doc_id() == doc {
            score += self.opt.score();
        }
        score
    }

    fn pull_optional(&mut self) {
        let doc = self.req.doc_id();
        if doc != NO_MORE_DOCS && self.opt.doc_id() < doc {
            self.opt.advance(doc);
        }
    }
}

impl<'s> DocIterator for ReqOptScorer<'s> {
    fn doc_id(&self) -> DocOrd {
        self.req.doc_id()
    }

    fn next(&mut self) -> DocOrd {
        if self.req.doc_id() == NO_MORE_DOCS {
            return NO_MORE_DOCS;
        }
        let doc = self.req.next();
        self.pull_optional();
        doc
    }

    fn advance(&mut self, target: DocOrd) -> DocOrd {
        if self.req.doc_id() == NO_MORE_DOCS {
            return NO_MORE_DOCS;
        }
        let doc = self.req.advance(target);
        self.pull_optional();
        doc
    }

    fn cost(&self) -> u64 {
        self.req.cost()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorer::{MatchAllScorer, Scorer};
    use crate::segment::postings::PostingList;

    // A tiny postings-backed scorer stand-in is overkill here; MatchAll plus
    // range-limited fixtures built from posting lists cover the combinators.
    fn fixed(docs: &[u32]) -> Scorer<'static> {
        let postings: Vec<(u32, Vec<u32>)> = docs.iter().map(|&d| (d, vec![0])).collect();
        let list = Box::leak(Box::new(PostingList::from_postings(&postings)));
        let it = list.iterator().unwrap();
        Scorer::Term(crate::scorer::term::TermScorer::from_parts(it))
    }

    fn collect(mut s: impl DocIterator) -> Vec<DocOrd> {
        let mut out = Vec::new();
        loop {
            let d = s.next();
            if d == NO_MORE_DOCS {
                break;
            }
            out.push(d);
        }
        out
    }

    #[test]
    fn conjunction_is_sorted_intersection() {
        let legs = vec![
            ConjunctionLeg {
                scorer: fixed(&[1, 3, 5, 7, 9]),
                scoring: true,
            },
            ConjunctionLeg {
                scorer: fixed(&[2, 3, 5, 8, 9, 12]),
                scoring: true,
            },
        ];
        assert_eq!(collect(ConjunctionScorer::new(legs)), vec![3, 5, 9]);
    }

    #[test]
    fn disjunction_is_sorted_union() {
        let children = vec![fixed(&[1, 4]), fixed(&[2, 4, 9]), fixed(&[4, 30])];
        assert_eq!(
            collect(DisjunctionScorer::new(children, 1)),
            vec![1, 2, 4, 9, 30]
        );
    }

    #[test]
    fn disjunction_minimum_should_match() {
        let children = vec![fixed(&[1, 4, 9]), fixed(&[2, 4, 9]), fixed(&[4, 10])];
        assert_eq!(collect(DisjunctionScorer::new(children, 2)), vec![4, 9]);
    }

    #[test]
    fn disjunction_advance_skips() {
        let children = vec![fixed(&[1, 5, 20]), fixed(&[3, 18])];
        let mut d = DisjunctionScorer::new(children, 1);
        assert_eq!(d.advance(4), 5);
        assert_eq!(d.next(), 18);
        assert_eq!(d.next(), 20);
        assert_eq!(d.next(), NO_MORE_DOCS);
        assert_eq!(d.advance(99), NO_MORE_DOCS);
    }

    #[test]
    fn req_excl_drops_excluded_docs() {
        let s = ReqExclScorer::new(fixed(&[1, 2, 3, 4]), fixed(&[2, 4]));
        assert_eq!(collect(s), vec![1, 3]);
    }

    #[test]
    fn req_opt_iterates_like_required_side() {
        let s = ReqOptScorer::new(fixed(&[1, 3]), fixed(&[2, 3]));
        assert_eq!(collect(s), vec![1, 3]);
    }

    #[test]
    fn randomized_combinators_match_set_algebra() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..25 {
            let sample = |rng: &mut StdRng, p: f64| -> Vec<u32> {
                (0u32..200).filter(|_| rng.gen_bool(p)).collect()
            };
            let a = sample(&mut rng, 0.3);
            let b = sample(&mut rng, 0.5);
            if a.is_empty() || b.is_empty() {
                continue;
            }

            let intersection: Vec<DocOrd> = a
                .iter()
                .filter(|d| b.contains(d))
                .map(|&d| d as DocOrd)
                .collect();
            let mut union: Vec<u32> = a.iter().chain(b.iter()).copied().collect();
            union.sort_unstable();
            union.dedup();
            let union: Vec<DocOrd> = union.into_iter().map(|d| d as DocOrd).collect();

            let conj = ConjunctionScorer::new(vec![
                ConjunctionLeg {
                    scorer: fixed(&a),
                    scoring: true,
                },
                ConjunctionLeg {
                    scorer: fixed(&b),
                    scoring: true,
                },
            ]);
            assert_eq!(collect(conj), intersection);

            let disj = DisjunctionScorer::new(vec![fixed(&a), fixed(&b)], 1);
            assert_eq!(collect(disj), union);
        }
    }

    #[test]
    fn exhaustion_is_idempotent_for_combinators() {
        let legs = vec![
            ConjunctionLeg {
                scorer: fixed(&[1]),
                scoring: true,
            },
            ConjunctionLeg {
                scorer: fixed(&[2]),
                scoring: false,
            },
        ];
        let mut c = ConjunctionScorer::new(legs);
        assert_eq!(c.next(), NO_MORE_DOCS);
        assert_eq!(c.next(), NO_MORE_DOCS);
        assert_eq!(c.doc_id(), NO_MORE_DOCS);

        let mut m = MatchAllScorer::new(0);
        assert_eq!(m.next(), NO_MORE_DOCS);
        assert_eq!(m.next(), NO_MORE_DOCS);
    }
}
