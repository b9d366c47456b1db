use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// A query literal as it appears in the DSL JSON. The shape of the literal
/// never drives scorer selection; the mapping's field type does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Long(i64),
    Double(f64),
    Str(String),
}

impl Literal {
    pub fn type_name(&self) -> &'static str {
        match self {
            Literal::Bool(_) => "bool",
            Literal::Long(_) => "long",
            Literal::Double(_) => "double",
            Literal::Str(_) => "string",
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Literal::Long(v) => Some(*v),
            Literal::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Literal::Double(v) => Some(*v),
            Literal::Long(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Literal::Str(s) => Some(s),
            _ => None,
        }
    }

    fn canonical(&self) -> String {
        match self {
            Literal::Bool(b) => b.to_string(),
            Literal::Long(v) => v.to_string(),
            Literal::Double(v) => format!("d{}", v.to_bits()),
            Literal::Str(s) => format!("s{:?}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum MatchOperator {
    #[default]
    Or,
    And,
}

/// The accepted query DSL surface. Anything outside this set is rejected at
/// ingestion with `UnsupportedQuery`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryNode {
    MatchAll {},
    Term {
        field: String,
        value: Literal,
    },
    Terms {
        field: String,
        values: Vec<Literal>,
    },
    Match {
        field: String,
        query: String,
        #[serde(default)]
        operator: MatchOperator,
    },
    MatchPhrase {
        field: String,
        query: String,
    },
    Range {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gt: Option<Literal>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gte: Option<Literal>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lt: Option<Literal>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lte: Option<Literal>,
    },
    Bool {
        #[serde(default)]
        must: Vec<QueryNode>,
        #[serde(default)]
        should: Vec<QueryNode>,
        #[serde(default)]
        filter: Vec<QueryNode>,
        #[serde(default)]
        must_not: Vec<QueryNode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        minimum_should_match: Option<u32>,
    },
    Prefix {
        field: String,
        value: String,
    },
    Wildcard {
        field: String,
        value: String,
    },
    Exists {
        field: String,
    },
}

impl QueryNode {
    pub fn match_all() -> Self {
        QueryNode::MatchAll {}
    }

    pub fn term(field: &str, value: Literal) -> Self {
        QueryNode::Term {
            field: field.to_string(),
            value,
        }
    }

    pub fn is_match_all(&self) -> bool {
        matches!(self, QueryNode::MatchAll {})
    }

    /// Parse a canonical-JSON query body. Unknown node kinds surface as
    /// `UnsupportedQuery` (a percentage minimum_should_match lands here too:
    /// only integers are admitted).
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| Error::unsupported_query(format!("unrecognized query node: {}", e)))
    }

    /// Deterministic rendering used as a cache-key component. Commutative
    /// bool clause lists are sorted so formatting and clause order do not
    /// fragment the cache.
    pub fn canonical(&self) -> String {
        match self {
            QueryNode::MatchAll {} => "match_all".to_string(),
            QueryNode::Term { field, value } => {
                format!("term({},{})", field, value.canonical())
            }
            QueryNode::Terms { field, values } => {
                let mut parts: Vec<String> = values.iter().map(Literal::canonical).collect();
                parts.sort();
                format!("terms({},[{}])", field, parts.join(","))
            }
            QueryNode::Match {
                field,
                query,
                operator,
            } => format!("match({},{:?},{:?})", field, query, operator),
            QueryNode::MatchPhrase { field, query } => {
                format!("match_phrase({},{:?})", field, query)
            }
            QueryNode::Range {
                field,
                gt,
                gte,
                lt,
                lte,
            } => {
                let bound = |b: &Option<Literal>| {
                    b.as_ref().map(Literal::canonical).unwrap_or_default()
                };
                format!(
                    "range({},gt={},gte={},lt={},lte={})",
                    field,
                    bound(gt),
                    bound(gte),
                    bound(lt),
                    bound(lte)
                )
            }
            QueryNode::Bool {
                must,
                should,
                filter,
                must_not,
                minimum_should_match,
            } => {
                let join = |clauses: &[QueryNode]| {
                    let mut parts: Vec<String> = clauses.iter().map(QueryNode::canonical).collect();
                    parts.sort();
                    parts.join(",")
                };
                format!(
                    "bool(must=[{}],should=[{}],filter=[{}],must_not=[{}],msm={:?})",
                    join(must),
                    join(should),
                    join(filter),
                    join(must_not),
                    minimum_should_match
                )
            }
            QueryNode::Prefix { field, value } => format!("prefix({},{:?})", field, value),
            QueryNode::Wildcard { field, value } => format!("wildcard({},{:?})", field, value),
            QueryNode::Exists { field } => format!("exists({})", field),
        }
    }
}

/// Sort direction for field sorts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Optional sort on a doc-values field; default ordering is score desc.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub order: SortOrder,
}
