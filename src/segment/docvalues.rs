use crate::core::types::DocOrd;

/// Sentinel stored in a numeric doc-values cell when the field is absent.
pub const MISSING_LONG: i64 = i64::MIN;

/// Keyword ordinal 0 is reserved for "field absent".
pub const MISSING_KEYWORD_ORD: u32 = 0;

/// Dense per-ordinal i64 column. Doubles keep their IEEE-754 bit pattern;
/// dates are unix millis; bools are 0/1. The column itself is immutable and
/// freely shared; there is no cursor to cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumericColumn {
    values: Vec<i64>,
}

impl NumericColumn {
    pub fn new(values: Vec<i64>) -> Self {
        NumericColumn { values }
    }

    pub fn get(&self, ord: DocOrd) -> Option<i64> {
        let raw = *self.values.get(ord as usize)?;
        if raw == MISSING_LONG { None } else { Some(raw) }
    }

    pub fn get_double(&self, ord: DocOrd) -> Option<f64> {
        self.get(ord).map(|bits| f64::from_bits(bits as u64))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn raw(&self) -> &[i64] {
        &self.values
    }
}

/// Keyword column: one ordinal per doc plus a sorted term dictionary.
/// Real ordinals start at 1; `dict[ord - 1]` is the term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordColumn {
    ords: Vec<u32>,
    dict: Vec<String>,
}

impl KeywordColumn {
    pub fn new(ords: Vec<u32>, dict: Vec<String>) -> Self {
        debug_assert!(dict.windows(2).all(|w| w[0] < w[1]));
        KeywordColumn { ords, dict }
    }

    pub fn ord(&self, doc: DocOrd) -> Option<u32> {
        let ord = *self.ords.get(doc as usize)?;
        if ord == MISSING_KEYWORD_ORD {
            None
        } else {
            Some(ord)
        }
    }

    pub fn term(&self, ord: u32) -> Option<&str> {
        if ord == MISSING_KEYWORD_ORD {
            return None;
        }
        self.dict.get(ord as usize - 1).map(String::as_str)
    }

    pub fn term_for_doc(&self, doc: DocOrd) -> Option<&str> {
        self.ord(doc).and_then(|ord| self.term(ord))
    }

    pub fn num_docs(&self) -> usize {
        self.ords.len()
    }

    pub fn dict(&self) -> &[String] {
        &self.dict
    }

    pub fn raw_ords(&self) -> &[u32] {
        &self.ords
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DocValues {
    Numeric(NumericColumn),
    Keyword(KeywordColumn),
}

impl DocValues {
    pub fn as_numeric(&self) -> Option<&NumericColumn> {
        match self {
            DocValues::Numeric(col) => Some(col),
            DocValues::Keyword(_) => None,
        }
    }

    pub fn as_keyword(&self) -> Option<&KeywordColumn> {
        match self {
            DocValues::Keyword(col) => Some(col),
            DocValues::Numeric(_) => None,
        }
    }

    /// Whether the field is present for the given doc.
    pub fn has_value(&self, doc: DocOrd) -> bool {
        match self {
            DocValues::Numeric(col) => col.get(doc).is_some(),
            DocValues::Keyword(col) => col.ord(doc).is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_missing_sentinel() {
        let col = NumericColumn::new(vec![10, MISSING_LONG, 30]);
        assert_eq!(col.get(0), Some(10));
        assert_eq!(col.get(1), None);
        assert_eq!(col.get(2), Some(30));
        assert_eq!(col.get(3), None);
    }

    #[test]
    fn keyword_reserved_ordinal() {
        let col = KeywordColumn::new(vec![1, 0, 2], vec!["apple".into(), "pear".into()]);
        assert_eq!(col.term_for_doc(0), Some("apple"));
        assert_eq!(col.term_for_doc(1), None);
        assert_eq!(col.term_for_doc(2), Some("pear"));
    }
}
