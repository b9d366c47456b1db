use crate::compression::vbyte;
use crate::core::error::Result;
use crate::core::types::{DocOrd, NO_MORE_DOCS};

/// Posting list for one (field, term) pair. Doc ordinals are stored
/// delta+vbyte compressed; the struct is immutable once built and shared by
/// every query that touches the term. Iteration state lives only in
/// `PostingsIterator` instances, constructed fresh per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingList {
    encoded_ords: Vec<u8>,
    encoded_freqs: Vec<u8>,
    encoded_positions: Vec<Vec<u8>>, // per-doc position deltas
    doc_freq: u32,
    total_freq: u64,
}

impl PostingList {
    /// Build from `(doc_ord, positions)` pairs, strictly ascending by ord.
    pub fn from_postings(postings: &[(u32, Vec<u32>)]) -> Self {
        debug_assert!(postings.windows(2).all(|w| w[0].0 < w[1].0));

        let ords: Vec<u32> = postings.iter().map(|(ord, _)| *ord).collect();
        let freqs: Vec<u32> = postings
            .iter()
            .map(|(_, positions)| positions.len().max(1) as u32)
            .collect();
        let encoded_positions = postings
            .iter()
            .map(|(_, positions)| vbyte::encode_deltas(positions))
            .collect();

        PostingList {
            encoded_ords: vbyte::encode_deltas(&ords),
            encoded_freqs: vbyte::encode_u32_list(&freqs),
            encoded_positions,
            doc_freq: postings.len() as u32,
            total_freq: freqs.iter().map(|&f| f as u64).sum(),
        }
    }

    pub fn from_parts(
        encoded_ords: Vec<u8>,
        encoded_freqs: Vec<u8>,
        encoded_positions: Vec<Vec<u8>>,
        doc_freq: u32,
        total_freq: u64,
    ) -> Self {
        PostingList {
            encoded_ords,
            encoded_freqs,
            encoded_positions,
            doc_freq,
            total_freq,
        }
    }

    /// Number of documents containing the term.
    pub fn doc_freq(&self) -> u32 {
        self.doc_freq
    }

    /// Total occurrences across all documents.
    pub fn total_freq(&self) -> u64 {
        self.total_freq
    }

    pub fn encoded_parts(&self) -> (&[u8], &[u8], &[Vec<u8>]) {
        (
            &self.encoded_ords,
            &self.encoded_freqs,
            &self.encoded_positions,
        )
    }

    /// Decode into a fresh cursor. Never cached: every query, and every
    /// per-segment rebind within a query, gets its own iterator.
    pub fn iterator(&self) -> Result<PostingsIterator> {
        let ords = vbyte::decode_deltas(&self.encoded_ords)?;
        let freqs = vbyte::decode_u32_list(&self.encoded_freqs)?;
        Ok(PostingsIterator {
            ords,
            freqs,
            encoded_positions: self.encoded_positions.clone(),
            cursor: -1,
        })
    }
}

/// Cursor over a decoded posting list. Starts before the first doc; after
/// exhaustion every call keeps returning `NO_MORE_DOCS` without touching the
/// cursor arithmetic again.
#[derive(Debug)]
pub struct PostingsIterator {
    ords: Vec<u32>,
    freqs: Vec<u32>,
    encoded_positions: Vec<Vec<u8>>,
    cursor: i64, // -1 before first next(); ords.len() once exhausted
}

impl PostingsIterator {
    pub fn doc_id(&self) -> DocOrd {
        if self.cursor < 0 {
            -1
        } else if self.cursor as usize >= self.ords.len() {
            NO_MORE_DOCS
        } else {
            self.ords[self.cursor as usize] as DocOrd
        }
    }

    pub fn next_doc(&mut self) -> DocOrd {
        if self.cursor >= self.ords.len() as i64 {
            return NO_MORE_DOCS;
        }
        self.cursor += 1;
        self.doc_id()
    }

    pub fn advance(&mut self, target: DocOrd) -> DocOrd {
        let current = self.doc_id();
        if current == NO_MORE_DOCS {
            return NO_MORE_DOCS;
        }
        assert!(
            target > current,
            "advance target {} not beyond current doc {}",
            target,
            current
        );
        // Binary search over the remainder.
        let start = (self.cursor + 1).max(0) as usize;
        let offset = self.ords[start..].partition_point(|&ord| (ord as DocOrd) < target);
        self.cursor = (start + offset) as i64;
        self.doc_id()
    }

    pub fn freq(&self) -> u32 {
        let idx = self.cursor as usize;
        if self.cursor < 0 || idx >= self.freqs.len() {
            0
        } else {
            self.freqs[idx]
        }
    }

    /// Positions for the current document, decoded on demand.
    pub fn positions(&self) -> Result<Vec<u32>> {
        let idx = self.cursor as usize;
        if self.cursor < 0 || idx >= self.encoded_positions.len() {
            return Ok(Vec::new());
        }
        vbyte::decode_deltas(&self.encoded_positions[idx])
    }

    pub fn cost(&self) -> u64 {
        self.ords.len() as u64
    }
}
