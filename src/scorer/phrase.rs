use crate::core::error::Result;
use crate::core::types::{DocOrd, NO_MORE_DOCS};
use crate::scorer::bm25::Bm25Weight;
use crate::scorer::DocIterator;
use crate::segment::segment::{decode_norm, Segment};

/// Fully decoded postings for one phrase term. Positions are materialized at
/// construction so iteration stays infallible; a decode failure surfaces as
/// `SegmentCorrupt` from `PhraseScorer::create`.
#[derive(Debug)]
struct PhraseLeg {
    ords: Vec<u32>,
    positions: Vec<Vec<u32>>,
    cursor: i64,
}

impl PhraseLeg {
    fn doc_id(&self) -> DocOrd {
        if self.cursor < 0 {
            -1
        } else if self.cursor as usize >= self.ords.len() {
            NO_MORE_DOCS
        } else {
            self.ords[self.cursor as usize] as DocOrd
        }
    }

    fn next(&mut self) -> DocOrd {
        if self.cursor >= self.ords.len() as i64 {
            return NO_MORE_DOCS;
        }
        self.cursor += 1;
        self.doc_id()
    }

    fn advance(&mut self, target: DocOrd) -> DocOrd {
        if self.doc_id() == NO_MORE_DOCS {
            return NO_MORE_DOCS;
        }
        let start = (self.cursor + 1).max(0) as usize;
        let offset = self.ords[start..].partition_point(|&ord| (ord as DocOrd) < target);
        self.cursor = (start + offset) as i64;
        self.doc_id()
    }

    fn current_positions(&self) -> &[u32] {
        &self.positions[self.cursor as usize]
    }
}

/// Intersects N term posting lists and verifies positional adjacency:
/// term i must occur at `start + i` for some start position. The score is
/// the sum of the member BM25 weights applied to the phrase frequency.
#[derive(Debug)]
pub struct PhraseScorer<'s> {
    legs: Vec<PhraseLeg>,
    weights: Vec<Bm25Weight>,
    norms: Option<&'s [u8]>,
    doc: DocOrd,
    phrase_freq: u32,
}

impl<'s> PhraseScorer<'s> {
    /// `None` when any phrase term is absent from the segment (the phrase
    /// cannot match).
    pub fn create(
        segment: &'s Segment,
        field: &str,
        terms: &[Vec<u8>],
        k1: f32,
        b: f32,
    ) -> Result<Option<Self>> {
        debug_assert!(terms.len() >= 2);
        let mut legs = Vec::with_capacity(terms.len());
        let mut weights = Vec::with_capacity(terms.len());
        for term in terms {
            let Some(postings) = segment.postings(field, term) else {
                return Ok(None);
            };
            let mut it = postings?;
            let mut ords = Vec::new();
            let mut positions = Vec::new();
            while it.next_doc() != NO_MORE_DOCS {
                ords.push(it.doc_id() as u32);
                positions.push(it.positions()?);
            }
            legs.push(PhraseLeg {
                ords,
                positions,
                cursor: -1,
            });
            weights.push(Bm25Weight::for_term(segment, field, term, k1, b));
        }
        Ok(Some(PhraseScorer {
            legs,
            weights,
            norms: segment.field_norms(field),
            doc: -1,
            phrase_freq: 0,
        }))
    }

    /// Count start positions where every term lines up adjacently.
    fn count_phrase_matches(&self) -> u32 {
        let mut matches = 0;
        for &start in self.legs[0].current_positions() {
            let aligned = self.legs[1..].iter().enumerate().all(|(i, leg)| {
                let want = start + i as u32 + 1;
                leg.current_positions().binary_search(&want).is_ok()
            });
            if aligned {
                matches += 1;
            }
        }
        matches
    }

    /// Leapfrog the legs to the next doc >= `candidate` containing all terms
    /// with adjacent positions.
    fn align(&mut self, mut candidate: DocOrd) -> DocOrd {
        'outer: loop {
            if candidate == NO_MORE_DOCS {
                self.doc = NO_MORE_DOCS;
                return NO_MORE_DOCS;
            }
            for i in 1..self.legs.len() {
                let mut d = self.legs[i].doc_id();
                if d < candidate {
                    d = self.legs[i].advance(candidate);
                }
                if d > candidate {
                    candidate = self.legs[0].advance(d);
                    continue 'outer;
                }
            }
            let freq = self.count_phrase_matches();
            if freq > 0 {
                self.doc = candidate;
                self.phrase_freq = freq;
                return candidate;
            }
            candidate = self.legs[0].next();
        }
    }

    pub fn score(&mut self) -> f32 {
        let doc_len = self
            .norms
            .and_then(|n| n.get(self.doc as usize).copied())
            .map(|norm| decode_norm(norm) as f32)
            .unwrap_or(1.0);
        let freq = self.phrase_freq as f32;
        self.weights.iter().map(|w| w.score(freq, doc_len)).sum()
    }
}

impl<'s> DocIterator for PhraseScorer<'s> {
    fn doc_id(&self) -> DocOrd {
        self.doc
    }

    fn next(&mut self) -> DocOrd {
        if self.doc == NO_MORE_DOCS {
            return NO_MORE_DOCS;
        }
        let candidate = self.legs[0].next();
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
        let candidate = self.legs[0].advance(target);
        self.align(candidate)
    }

    fn cost(&self) -> u64 {
        self.legs.iter().map(|l| l.ords.len() as u64).min().unwrap_or(0)
    }
}
