use crate::segment::segment::Segment;

pub const DEFAULT_K1: f32 = 1.2;
pub const DEFAULT_B: f32 = 0.75;

/// Per-(segment, field, term) BM25 weight. Collection statistics are
/// segment-local; the idf follows the Okapi form with the +1 shift so it
/// stays positive for very common terms.
#[derive(Debug, Clone, Copy)]
pub struct Bm25Weight {
    pub idf: f32,
    pub k1: f32,
    pub b: f32,
    pub avg_doc_len: f32,
}

impl Bm25Weight {
    pub fn for_term(segment: &Segment, field: &str, term: &[u8], k1: f32, b: f32) -> Self {
        let num_docs = segment.max_doc.max(1) as f32;
        let doc_freq = segment.doc_freq(field, term) as f32;
        let idf = (1.0 + (num_docs - doc_freq + 0.5) / (doc_freq + 0.5)).ln();
        let avg_doc_len = segment.avg_field_len(field);
        Bm25Weight {
            idf,
            k1,
            b,
            avg_doc_len,
        }
    }

    pub fn score(&self, term_freq: f32, doc_len: f32) -> f32 {
        // Fields without norms (keyword) score with neutral length.
        let (doc_len, avg) = if self.avg_doc_len > 0.0 {
            (doc_len, self.avg_doc_len)
        } else {
            (1.0, 1.0)
        };
        let norm = self.k1 * (1.0 - self.b + self.b * doc_len / avg);
        self.idf * term_freq * (self.k1 + 1.0) / (term_freq + norm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rarer_terms_score_higher() {
        let common = Bm25Weight {
            idf: (1.0f32 + (100.0 - 90.0 + 0.5) / (90.0 + 0.5)).ln(),
            k1: DEFAULT_K1,
            b: DEFAULT_B,
            avg_doc_len: 10.0,
        };
        let rare = Bm25Weight {
            idf: (1.0f32 + (100.0 - 2.0 + 0.5) / (2.0 + 0.5)).ln(),
            k1: DEFAULT_K1,
            b: DEFAULT_B,
            avg_doc_len: 10.0,
        };
        assert!(rare.score(1.0, 10.0) > common.score(1.0, 10.0));
    }

    #[test]
    fn term_frequency_saturates() {
        let w = Bm25Weight {
            idf: 1.0,
            k1: DEFAULT_K1,
            b: DEFAULT_B,
            avg_doc_len: 10.0,
        };
        let s1 = w.score(1.0, 10.0);
        let s2 = w.score(2.0, 10.0);
        let s100 = w.score(100.0, 10.0);
        assert!(s2 > s1);
        // Doubling tf far less than doubles the score at high tf.
        assert!(s100 < s1 * (DEFAULT_K1 + 1.0) + 0.01);
    }
}
