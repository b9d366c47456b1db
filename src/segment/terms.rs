use crate::core::error::Result;
use crate::segment::postings::{PostingList, PostingsIterator};
use std::collections::BTreeMap;

/// Sorted cursor over one field's term dictionary. Borrows the segment's
/// immutable postings map; every `postings()` call hands out a fresh
/// iterator.
pub struct TermsEnum<'a> {
    entries: Vec<(&'a [u8], &'a PostingList)>,
    pos: Option<usize>, // None before the first positioning call
}

impl<'a> TermsEnum<'a> {
    pub fn new(terms: &'a BTreeMap<Vec<u8>, PostingList>) -> Self {
        TermsEnum {
            entries: terms.iter().map(|(t, p)| (t.as_slice(), p)).collect(),
            pos: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Position on `term` exactly; returns false (and leaves the cursor
    /// unpositioned) when absent.
    pub fn seek_exact(&mut self, term: &[u8]) -> bool {
        match self.entries.binary_search_by(|(t, _)| (*t).cmp(term)) {
            Ok(idx) => {
                self.pos = Some(idx);
                true
            }
            Err(_) => {
                self.pos = None;
                false
            }
        }
    }

    /// Position on the first term >= `term`; returns false when every term
    /// is smaller.
    pub fn seek_ceil(&mut self, term: &[u8]) -> bool {
        let idx = self
            .entries
            .partition_point(|(t, _)| (*t).cmp(term) == std::cmp::Ordering::Less);
        if idx < self.entries.len() {
            self.pos = Some(idx);
            true
        } else {
            self.pos = None;
            false
        }
    }

    /// Step forward; positions on the first term when unpositioned.
    pub fn next(&mut self) -> Option<&'a [u8]> {
        let next = match self.pos {
            None => 0,
            Some(p) => p + 1,
        };
        if next < self.entries.len() {
            self.pos = Some(next);
            Some(self.entries[next].0)
        } else {
            self.pos = None;
            None
        }
    }

    pub fn term(&self) -> Option<&'a [u8]> {
        self.pos.map(|p| self.entries[p].0)
    }

    pub fn doc_freq(&self) -> u32 {
        self.pos.map(|p| self.entries[p].1.doc_freq()).unwrap_or(0)
    }

    /// Fresh postings cursor for the current term.
    pub fn postings(&self) -> Option<Result<PostingsIterator>> {
        self.pos.map(|p| self.entries[p].1.iterator())
    }

    /// All terms starting with `prefix`, in dictionary order.
    pub fn terms_with_prefix(&self, prefix: &[u8]) -> Vec<&'a [u8]> {
        let start = self
            .entries
            .partition_point(|(t, _)| (*t).cmp(prefix) == std::cmp::Ordering::Less);
        self.entries[start..]
            .iter()
            .take_while(|(t, _)| t.starts_with(prefix))
            .map(|(t, _)| *t)
            .collect()
    }

    /// Every term in the dictionary, for wildcard walks.
    pub fn all_terms(&self) -> impl Iterator<Item = &'a [u8]> + '_ {
        self.entries.iter().map(|(t, _)| *t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::postings::PostingList;

    fn dict() -> BTreeMap<Vec<u8>, PostingList> {
        let mut terms = BTreeMap::new();
        for t in ["apple", "apply", "banana", "band"] {
            terms.insert(
                t.as_bytes().to_vec(),
                PostingList::from_postings(&[(1, vec![0])]),
            );
        }
        terms
    }

    #[test]
    fn seek_and_iterate() {
        let dict = dict();
        let mut cursor = TermsEnum::new(&dict);
        assert!(cursor.seek_exact(b"banana"));
        assert_eq!(cursor.term(), Some(b"banana".as_slice()));
        assert!(!cursor.seek_exact(b"missing"));

        assert!(cursor.seek_ceil(b"appz"));
        assert_eq!(cursor.term(), Some(b"banana".as_slice()));
        assert_eq!(cursor.next(), Some(b"band".as_slice()));
        assert_eq!(cursor.next(), None);
        assert!(!cursor.seek_ceil(b"zebra"));
    }

    #[test]
    fn prefix_scan() {
        let dict = dict();
        let cursor = TermsEnum::new(&dict);
        let hits = cursor.terms_with_prefix(b"app");
        assert_eq!(hits, vec![b"apple".as_slice(), b"apply".as_slice()]);
        assert!(cursor.terms_with_prefix(b"zz").is_empty());
    }
}
