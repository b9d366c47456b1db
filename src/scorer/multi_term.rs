use crate::core::error::{Error, ErrorKind, Result};
use crate::scorer::term::TermScorer;
use crate::scorer::{DisjunctionScorer, EmptyScorer, Scorer};
use crate::segment::segment::Segment;
use regex::Regex;

/// Cap on dictionary expansion; beyond this the query is rejected rather
/// than silently truncated.
pub const MAX_EXPANSIONS: usize = 1024;

/// Union of the posting lists of every term starting with `prefix`.
pub fn prefix_scorer<'s>(
    segment: &'s Segment,
    field: &str,
    prefix: &str,
    k1: f32,
    b: f32,
) -> Result<Scorer<'s>> {
    let Some(cursor) = segment.terms(field) else {
        return Ok(Scorer::Empty(EmptyScorer::new()));
    };
    let terms: Vec<Vec<u8>> = cursor
        .terms_with_prefix(prefix.as_bytes())
        .into_iter()
        .map(<[u8]>::to_vec)
        .collect();
    union_of_terms(segment, field, &terms, k1, b)
}

/// Union of the posting lists of every dictionary term matching the wildcard
/// pattern (`*` = any run, `?` = any single char, everything else literal).
pub fn wildcard_scorer<'s>(
    segment: &'s Segment,
    field: &str,
    pattern: &str,
    k1: f32,
    b: f32,
) -> Result<Scorer<'s>> {
    let regex = wildcard_to_regex(pattern)?;
    let Some(cursor) = segment.terms(field) else {
        return Ok(Scorer::Empty(EmptyScorer::new()));
    };
    let mut terms = Vec::new();
    for term in cursor.all_terms() {
        if let Ok(text) = std::str::from_utf8(term) {
            if regex.is_match(text) {
                terms.push(term.to_vec());
            }
        }
    }
    union_of_terms(segment, field, &terms, k1, b)
}

pub fn wildcard_to_regex(pattern: &str) -> Result<Regex> {
    let mut translated = String::with_capacity(pattern.len() + 8);
    translated.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => translated.push_str(".*"),
            '?' => translated.push('.'),
            other => translated.push_str(&regex::escape(&other.to_string())),
        }
    }
    translated.push('$');
    Regex::new(&translated)
        .map_err(|e| Error::new(ErrorKind::InvalidArgument, format!("bad wildcard: {}", e)))
}

fn union_of_terms<'s>(
    segment: &'s Segment,
    field: &str,
    terms: &[Vec<u8>],
    k1: f32,
    b: f32,
) -> Result<Scorer<'s>> {
    if terms.len() > MAX_EXPANSIONS {
        return Err(Error::new(
            ErrorKind::InvalidArgument,
            format!(
                "pattern expands to {} terms, limit is {}",
                terms.len(),
                MAX_EXPANSIONS
            ),
        ));
    }
    let mut children = Vec::with_capacity(terms.len());
    for term in terms {
        if let Some(scorer) = TermScorer::create(segment, field, term, k1, b)? {
            children.push(Scorer::Term(scorer));
        }
    }
    Ok(match children.len() {
        0 => Scorer::Empty(EmptyScorer::new()),
        1 => children.pop().expect("one child"),
        _ => Scorer::Disjunction(DisjunctionScorer::new(children, 1)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Document, FieldValue, NO_MORE_DOCS};
    use crate::schema::mapping::{FieldType, Mapping};
    use crate::scorer::DocIterator;
    use crate::segment::builder::SegmentBuilder;
    use std::sync::Arc;

    fn segment() -> Segment {
        let mapping = Arc::new(Mapping::new().with_field("name", FieldType::Keyword));
        let mut builder = SegmentBuilder::new(mapping);
        for (i, name) in ["server-1", "server-2", "worker-1", "severe"].iter().enumerate() {
            builder
                .add_document(
                    &Document::new(format!("doc-{}", i))
                        .with_field("name", FieldValue::Keyword((*name).into())),
                )
                .unwrap();
        }
        builder.seal().unwrap()
    }

    fn docs(mut s: Scorer) -> Vec<i32> {
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
    fn prefix_unions_matching_terms() {
        let seg = segment();
        let s = prefix_scorer(&seg, "name", "server-", 1.2, 0.75).unwrap();
        assert_eq!(docs(s), vec![0, 1]);
    }

    #[test]
    fn wildcard_translates_metacharacters() {
        let seg = segment();
        let s = wildcard_scorer(&seg, "name", "se*e?-1", 1.2, 0.75).unwrap();
        assert_eq!(docs(s), vec![0]);

        // '?' matches exactly one character
        let s = wildcard_scorer(&seg, "name", "server-?", 1.2, 0.75).unwrap();
        assert_eq!(docs(s), vec![0, 1]);

        // dots are literal, not regex metacharacters
        let s = wildcard_scorer(&seg, "name", "server.1", 1.2, 0.75).unwrap();
        assert!(docs(s).is_empty());
    }

    #[test]
    fn no_matches_is_an_empty_scorer() {
        let seg = segment();
        let s = prefix_scorer(&seg, "name", "zzz", 1.2, 0.75).unwrap();
        assert!(docs(s).is_empty());
    }
}
