use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Dense per-segment document ordinal, `[0, max_doc)`.
pub type DocOrd = i32;

/// Sentinel returned by doc iterators once exhausted. Iterators must never
/// advance past this value; incrementing it overflows.
pub const NO_MORE_DOCS: DocOrd = i32::MAX;

/// Typed field value as carried by documents and query literals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Text(String),
    Keyword(String),
    Long(i64),
    Double(f64),
    Bool(bool),
    Date(DateTime<Utc>),
}

impl FieldValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Text(_) => "text",
            FieldValue::Keyword(_) => "keyword",
            FieldValue::Long(_) => "long",
            FieldValue::Double(_) => "double",
            FieldValue::Bool(_) => "bool",
            FieldValue::Date(_) => "date",
        }
    }

    /// Doc-values representation: every non-text value maps onto an i64 cell.
    /// Doubles keep their IEEE-754 bit pattern.
    pub fn as_docvalue(&self) -> Option<i64> {
        match self {
            FieldValue::Text(_) => None,
            FieldValue::Keyword(_) => None,
            FieldValue::Long(v) => Some(*v),
            FieldValue::Double(v) => Some(v.to_bits() as i64),
            FieldValue::Bool(b) => Some(i64::from(*b)),
            FieldValue::Date(d) => Some(d.timestamp_millis()),
        }
    }
}

/// A document: external string id plus typed fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub fields: HashMap<String, FieldValue>,
}

impl Document {
    pub fn new(id: impl Into<String>) -> Self {
        Document {
            id: id.into(),
            fields: HashMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: FieldValue) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}

/// Shard identifier within an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShardId(pub u32);

impl ShardId {
    pub fn new(id: u32) -> Self {
        ShardId(id)
    }
}

/// Maps an f64 onto an i64 whose signed order matches the double order.
/// Used for sort keys over double fields; NaN sorts above everything.
pub fn f64_to_sortable_i64(value: f64) -> i64 {
    let bits = value.to_bits() as i64;
    bits ^ ((bits >> 63) & 0x7fff_ffff_ffff_ffff)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn docvalue_encoding() {
        assert_eq!(FieldValue::Long(42).as_docvalue(), Some(42));
        assert_eq!(FieldValue::Bool(true).as_docvalue(), Some(1));
        let bits = FieldValue::Double(99.99).as_docvalue().unwrap();
        assert_eq!(f64::from_bits(bits as u64), 99.99);
        assert_eq!(FieldValue::Text("x".into()).as_docvalue(), None);
    }

    #[test]
    fn sortable_double_order() {
        // Inputs ascend as doubles, so the mapped keys must ascend as i64s.
        let keys: Vec<i64> = [-1e300, -10.5, -0.0, 0.0, 1.0, 2.5, 1e300]
            .iter()
            .map(|v| f64_to_sortable_i64(*v))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert!(f64_to_sortable_i64(-1.0) < f64_to_sortable_i64(1.0));
        assert!(f64_to_sortable_i64(-10.5) < f64_to_sortable_i64(-1.0));
    }
}
