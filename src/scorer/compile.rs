use crate::analysis::tokenizer::StandardTokenizer;
use crate::core::error::{Error, Result};
use crate::plan::query::{Literal, MatchOperator, QueryNode};
use crate::schema::mapping::{FieldType, Mapping};
use crate::scorer::boolean::{ConjunctionLeg, ConjunctionScorer, DisjunctionScorer, ReqExclScorer, ReqOptScorer};
use crate::scorer::multi_term;
use crate::scorer::phrase::PhraseScorer;
use crate::scorer::range::{DoubleRangeScorer, NumericRangeScorer};
use crate::scorer::term::TermScorer;
use crate::scorer::{EmptyScorer, ExistsScorer, MatchAllScorer, Scorer};
use crate::segment::segment::Segment;

/// Compiles a query node against one segment. Called once per (query,
/// segment) pair so every leaf gets fresh iterators; instantiated scorers
/// are never shared between segments or queries.
pub struct ScorerCompiler<'m> {
    mapping: &'m Mapping,
    tokenizer: StandardTokenizer,
    k1: f32,
    b: f32,
}

impl<'m> ScorerCompiler<'m> {
    pub fn new(mapping: &'m Mapping, k1: f32, b: f32) -> Self {
        ScorerCompiler {
            mapping,
            tokenizer: StandardTokenizer::default(),
            k1,
            b,
        }
    }

    pub fn compile<'s>(&self, query: &QueryNode, segment: &'s Segment) -> Result<Scorer<'s>> {
        match query {
            QueryNode::MatchAll {} => Ok(Scorer::MatchAll(MatchAllScorer::new(segment.max_doc))),
            QueryNode::Term { field, value } => self.compile_term(field, value, segment),
            QueryNode::Terms { field, values } => {
                let mut children = Vec::with_capacity(values.len());
                for value in values {
                    children.push(self.compile_term(field, value, segment)?);
                }
                Ok(disjunction_of(children, 1))
            }
            QueryNode::Match {
                field,
                query,
                operator,
            } => self.compile_match(field, query, *operator, segment),
            QueryNode::MatchPhrase { field, query } => {
                self.compile_phrase(field, query, segment)
            }
            QueryNode::Range {
                field,
                gt,
                gte,
                lt,
                lte,
            } => self.compile_range(field, gt, gte, lt, lte, segment),
            QueryNode::Bool {
                must,
                should,
                filter,
                must_not,
                minimum_should_match,
            } => self.compile_bool(
                must,
                should,
                filter,
                must_not,
                *minimum_should_match,
                segment,
            ),
            QueryNode::Prefix { field, value } => {
                self.require_string_field(field)?;
                multi_term::prefix_scorer(segment, field, value, self.k1, self.b)
            }
            QueryNode::Wildcard { field, value } => {
                self.require_string_field(field)?;
                multi_term::wildcard_scorer(segment, field, value, self.k1, self.b)
            }
            QueryNode::Exists { field } => self.compile_exists(field, segment),
        }
    }

    fn field_type(&self, field: &str) -> Result<FieldType> {
        Ok(self.mapping.require_field(field)?.field_type)
    }

    fn require_string_field(&self, field: &str) -> Result<FieldType> {
        let ft = self.field_type(field)?;
        if matches!(ft, FieldType::Text | FieldType::Keyword) {
            Ok(ft)
        } else {
            Err(Error::type_mismatch(field, "text or keyword", ft.name()))
        }
    }

    fn compile_term<'s>(
        &self,
        field: &str,
        value: &Literal,
        segment: &'s Segment,
    ) -> Result<Scorer<'s>> {
        match self.field_type(field)? {
            FieldType::Text | FieldType::Keyword => {
                let term = value.as_str().ok_or_else(|| {
                    Error::type_mismatch(field, "a string literal", value.type_name())
                })?;
                Ok(term_or_empty(TermScorer::create(
                    segment,
                    field,
                    term.as_bytes(),
                    self.k1,
                    self.b,
                )?))
            }
            FieldType::Long | FieldType::Date | FieldType::Bool => {
                let v = value.as_long().ok_or_else(|| {
                    Error::type_mismatch(field, "an integer literal", value.type_name())
                })?;
                Ok(numeric_range(segment, field, v, v))
            }
            FieldType::Double => {
                let v = value.as_double().ok_or_else(|| {
                    Error::type_mismatch(field, "a numeric literal", value.type_name())
                })?;
                Ok(double_range(segment, field, v, v, true, true))
            }
        }
    }

    fn compile_match<'s>(
        &self,
        field: &str,
        query: &str,
        operator: MatchOperator,
        segment: &'s Segment,
    ) -> Result<Scorer<'s>> {
        self.require_string_field(field)?;
        let tokens = self.tokenizer.tokenize(query);
        if tokens.is_empty() {
            return Ok(Scorer::Empty(EmptyScorer::new()));
        }
        let mut children = Vec::with_capacity(tokens.len());
        for token in &tokens {
            children.push(term_or_empty(TermScorer::create(
                segment,
                field,
                token.text.as_bytes(),
                self.k1,
                self.b,
            )?));
        }
        match operator {
            MatchOperator::Or => Ok(disjunction_of(children, 1)),
            MatchOperator::And => Ok(conjunction_of(
                children
                    .into_iter()
                    .map(|scorer| ConjunctionLeg {
                        scorer,
                        scoring: true,
                    })
                    .collect(),
            )),
        }
    }

    fn compile_phrase<'s>(
        &self,
        field: &str,
        query: &str,
        segment: &'s Segment,
    ) -> Result<Scorer<'s>> {
        let ft = self.field_type(field)?;
        if ft != FieldType::Text {
            return Err(Error::type_mismatch(field, "text", ft.name()));
        }
        let tokens = self.tokenizer.tokenize(query);
        match tokens.len() {
            0 => Ok(Scorer::Empty(EmptyScorer::new())),
            1 => Ok(term_or_empty(TermScorer::create(
                segment,
                field,
                tokens[0].text.as_bytes(),
                self.k1,
                self.b,
            )?)),
            _ => {
                let terms: Vec<Vec<u8>> = tokens
                    .into_iter()
                    .map(|t| t.text.into_bytes())
                    .collect();
                match PhraseScorer::create(segment, field, &terms, self.k1, self.b)? {
                    Some(scorer) => Ok(Scorer::Phrase(scorer)),
                    None => Ok(Scorer::Empty(EmptyScorer::new())),
                }
            }
        }
    }

    fn compile_range<'s>(
        &self,
        field: &str,
        gt: &Option<Literal>,
        gte: &Option<Literal>,
        lt: &Option<Literal>,
        lte: &Option<Literal>,
        segment: &'s Segment,
    ) -> Result<Scorer<'s>> {
        match self.field_type(field)? {
            FieldType::Long | FieldType::Date | FieldType::Bool => {
                let as_long = |bound: &Option<Literal>| -> Result<Option<i64>> {
                    bound
                        .as_ref()
                        .map(|lit| {
                            lit.as_long().ok_or_else(|| {
                                Error::type_mismatch(field, "an integer bound", lit.type_name())
                            })
                        })
                        .transpose()
                };
                // Exclusive bounds tighten by one; an overflowing tighten
                // cannot match anything.
                let lo = match (as_long(gte)?, as_long(gt)?) {
                    (Some(v), _) => v,
                    (None, Some(v)) => match v.checked_add(1) {
                        Some(v) => v,
                        None => return Ok(Scorer::Empty(EmptyScorer::new())),
                    },
                    (None, None) => i64::MIN,
                };
                let hi = match (as_long(lte)?, as_long(lt)?) {
                    (Some(v), _) => v,
                    (None, Some(v)) => match v.checked_sub(1) {
                        Some(v) => v,
                        None => return Ok(Scorer::Empty(EmptyScorer::new())),
                    },
                    (None, None) => i64::MAX,
                };
                Ok(numeric_range(segment, field, lo, hi))
            }
            FieldType::Double => {
                let as_double = |bound: &Option<Literal>| -> Result<Option<f64>> {
                    bound
                        .as_ref()
                        .map(|lit| {
                            lit.as_double().ok_or_else(|| {
                                Error::type_mismatch(field, "a numeric bound", lit.type_name())
                            })
                        })
                        .transpose()
                };
                let (lo, lo_inclusive) = match (as_double(gte)?, as_double(gt)?) {
                    (Some(v), _) => (v, true),
                    (None, Some(v)) => (v, false),
                    (None, None) => (f64::NEG_INFINITY, true),
                };
                let (hi, hi_inclusive) = match (as_double(lte)?, as_double(lt)?) {
                    (Some(v), _) => (v, true),
                    (None, Some(v)) => (v, false),
                    (None, None) => (f64::INFINITY, true),
                };
                if lo.is_nan() || hi.is_nan() {
                    return Ok(Scorer::Empty(EmptyScorer::new()));
                }
                Ok(double_range(segment, field, lo, hi, lo_inclusive, hi_inclusive))
            }
            ft => Err(Error::type_mismatch(field, "a numeric field", ft.name())),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn compile_bool<'s>(
        &self,
        must: &[QueryNode],
        should: &[QueryNode],
        filter: &[QueryNode],
        must_not: &[QueryNode],
        minimum_should_match: Option<u32>,
        segment: &'s Segment,
    ) -> Result<Scorer<'s>> {
        if must.is_empty() && should.is_empty() && filter.is_empty() && must_not.is_empty() {
            return Ok(Scorer::Empty(EmptyScorer::new()));
        }

        // minimum_should_match defaults to 1 only when should stands alone.
        let msm_default = if must.is_empty() && filter.is_empty() { 1 } else { 0 };
        let msm = minimum_should_match.unwrap_or(msm_default) as usize;

        let mut required = Vec::with_capacity(must.len() + filter.len() + 1);
        for clause in must {
            required.push(ConjunctionLeg {
                scorer: self.compile(clause, segment)?,
                scoring: true,
            });
        }
        for clause in filter {
            required.push(ConjunctionLeg {
                scorer: self.compile(clause, segment)?,
                scoring: false,
            });
        }

        let mut should_scorers = Vec::with_capacity(should.len());
        for clause in should {
            should_scorers.push(self.compile(clause, segment)?);
        }
        if msm > should_scorers.len() && !should_scorers.is_empty() {
            return Ok(Scorer::Empty(EmptyScorer::new()));
        }

        let positive = if !required.is_empty() {
            if should_scorers.is_empty() {
                conjunction_of(required)
            } else if msm == 0 {
                let req = conjunction_of(required);
                let opt = disjunction_of(should_scorers, 1);
                Scorer::ReqOpt(Box::new(ReqOptScorer::new(req, opt)))
            } else {
                required.push(ConjunctionLeg {
                    scorer: disjunction_of(should_scorers, msm),
                    scoring: true,
                });
                conjunction_of(required)
            }
        } else if !should_scorers.is_empty() {
            disjunction_of(should_scorers, msm.max(1))
        } else {
            // Only must_not: everything matches, nothing scores.
            Scorer::MatchAll(MatchAllScorer::new(segment.max_doc))
        };

        if must_not.is_empty() {
            return Ok(positive);
        }
        let mut excluded = Vec::with_capacity(must_not.len());
        for clause in must_not {
            excluded.push(self.compile(clause, segment)?);
        }
        let excl = disjunction_of(excluded, 1);
        Ok(Scorer::ReqExcl(Box::new(ReqExclScorer::new(positive, excl))))
    }

    fn compile_exists<'s>(&self, field: &str, segment: &'s Segment) -> Result<Scorer<'s>> {
        let info = self.mapping.require_field(field)?;
        if let Some(values) = segment.doc_values(field) {
            return Ok(Scorer::Exists(ExistsScorer::over_values(
                values,
                segment.max_doc,
            )));
        }
        if info.field_type == FieldType::Text {
            if let Some(norms) = segment.field_norms(field) {
                return Ok(Scorer::Exists(ExistsScorer::over_norms(
                    norms,
                    segment.max_doc,
                )));
            }
        }
        Ok(Scorer::Empty(EmptyScorer::new()))
    }
}

fn term_or_empty(scorer: Option<TermScorer<'_>>) -> Scorer<'_> {
    match scorer {
        Some(s) => Scorer::Term(s),
        None => Scorer::Empty(EmptyScorer::new()),
    }
}

fn numeric_range<'s>(segment: &'s Segment, field: &str, lo: i64, hi: i64) -> Scorer<'s> {
    match segment.numeric_values(field) {
        Some(values) => Scorer::LongRange(NumericRangeScorer::new(values, lo, hi)),
        None => Scorer::Empty(EmptyScorer::new()),
    }
}

fn double_range<'s>(
    segment: &'s Segment,
    field: &str,
    lo: f64,
    hi: f64,
    lo_inclusive: bool,
    hi_inclusive: bool,
) -> Scorer<'s> {
    match segment.numeric_values(field) {
        Some(values) => Scorer::DoubleRange(DoubleRangeScorer::new(
            values,
            lo,
            hi,
            lo_inclusive,
            hi_inclusive,
        )),
        None => Scorer::Empty(EmptyScorer::new()),
    }
}

fn conjunction_of(legs: Vec<ConjunctionLeg<'_>>) -> Scorer<'_> {
    debug_assert!(!legs.is_empty());
    Scorer::Conjunction(ConjunctionScorer::new(legs))
}

fn disjunction_of(mut children: Vec<Scorer<'_>>, min_match: usize) -> Scorer<'_> {
    if children.len() == 1 && min_match <= 1 {
        return children.pop().expect("one child");
    }
    Scorer::Disjunction(DisjunctionScorer::new(children, min_match))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Document, FieldValue, NO_MORE_DOCS};
    use crate::scorer::DocIterator;
    use crate::segment::builder::SegmentBuilder;
    use serde_json::json;
    use std::sync::Arc;

    fn mapping() -> Mapping {
        Mapping::new()
            .with_field("cat", FieldType::Keyword)
            .with_field("stock", FieldType::Bool)
            .with_field("refurb", FieldType::Bool)
            .with_field("price", FieldType::Double)
            .with_field("qty", FieldType::Long)
            .with_field("body", FieldType::Text)
    }

    fn segment(mapping: &Mapping) -> Segment {
        let mut builder = SegmentBuilder::new(Arc::new(mapping.clone()));
        let docs = [
            ("d0", "A", true, false, 50.0, 1, "rust engine"),
            ("d1", "A", false, false, 100.0, 2, "rust search"),
            ("d2", "B", true, false, 150.0, 3, "search engine"),
            ("d3", "B", true, true, 200.0, 4, "plain text"),
        ];
        for (id, cat, stock, refurb, price, qty, body) in docs {
            builder
                .add_document(
                    &Document::new(id)
                        .with_field("cat", FieldValue::Keyword(cat.into()))
                        .with_field("stock", FieldValue::Bool(stock))
                        .with_field("refurb", FieldValue::Bool(refurb))
                        .with_field("price", FieldValue::Double(price))
                        .with_field("qty", FieldValue::Long(qty))
                        .with_field("body", FieldValue::Text(body.into())),
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

    fn compile<'s>(m: &Mapping, seg: &'s Segment, q: serde_json::Value) -> Scorer<'s> {
        let node = QueryNode::from_json(&q).unwrap();
        ScorerCompiler::new(m, 1.2, 0.75).compile(&node, seg).unwrap()
    }

    #[test]
    fn range_dispatches_on_field_type_not_literal_shape() {
        let m = mapping();
        let seg = segment(&m);
        // Integral-looking literals against a double field still use the
        // double scorer, so 99.99-style cells stay visible.
        let s = compile(&m, &seg, json!({"range": {"field": "price", "gte": 100, "lte": 150}}));
        assert!(matches!(&s, Scorer::DoubleRange(_)));
        assert_eq!(docs(s), vec![1, 2]);

        let s = compile(&m, &seg, json!({"range": {"field": "qty", "gte": 2, "lt": 4}}));
        assert!(matches!(&s, Scorer::LongRange(_)));
        assert_eq!(docs(s), vec![1, 2]);
    }

    #[test]
    fn repeated_range_queries_see_fresh_iterators() {
        let m = mapping();
        let seg = segment(&m);
        let q = json!({"range": {"field": "price", "gte": 100, "lte": 150}});
        assert_eq!(docs(compile(&m, &seg, q.clone())), vec![1, 2]);
        assert_eq!(docs(compile(&m, &seg, q)), vec![1, 2]);
        // An unmatchable range stays quiet on the second run too.
        let q = json!({"range": {"field": "price", "gte": 400}});
        assert!(docs(compile(&m, &seg, q.clone())).is_empty());
        assert!(docs(compile(&m, &seg, q)).is_empty());
    }

    #[test]
    fn bool_filter_does_not_score() {
        let m = mapping();
        let seg = segment(&m);
        let with_filter = json!({"bool": {
            "must": [{"term": {"field": "cat", "value": "A"}}],
            "filter": [{"term": {"field": "stock", "value": true}}],
            "must_not": [{"term": {"field": "refurb", "value": true}}]
        }});
        let mut s = compile(&m, &seg, with_filter);
        assert_eq!(s.next(), 0);
        let filtered_score = s.score();
        assert_eq!(s.next(), NO_MORE_DOCS);

        let must_only = json!({"bool": {
            "must": [{"term": {"field": "cat", "value": "A"}}]
        }});
        let mut s = compile(&m, &seg, must_only);
        assert_eq!(s.next(), 0);
        let bare_score = s.score();
        assert!((filtered_score - bare_score).abs() < 1e-6);
    }

    #[test]
    fn empty_bool_matches_nothing() {
        let m = mapping();
        let seg = segment(&m);
        assert!(docs(compile(&m, &seg, json!({"bool": {}}))).is_empty());
    }

    #[test]
    fn must_not_alone_excludes_from_all_docs() {
        let m = mapping();
        let seg = segment(&m);
        let q = json!({"bool": {"must_not": [{"term": {"field": "cat", "value": "A"}}]}});
        assert_eq!(docs(compile(&m, &seg, q)), vec![2, 3]);
    }

    #[test]
    fn minimum_should_match_applies() {
        let m = mapping();
        let seg = segment(&m);
        let q = json!({"bool": {
            "should": [
                {"term": {"field": "cat", "value": "B"}},
                {"term": {"field": "stock", "value": true}},
                {"term": {"field": "qty", "value": 3}}
            ],
            "minimum_should_match": 2
        }});
        // d2 matches all three, d3 matches cat+stock, d0 matches only stock.
        assert_eq!(docs(compile(&m, &seg, q)), vec![2, 3]);
    }

    #[test]
    fn match_query_or_and_semantics() {
        let m = mapping();
        let seg = segment(&m);
        let or_q = json!({"match": {"field": "body", "query": "rust engine"}});
        assert_eq!(docs(compile(&m, &seg, or_q)), vec![0, 1, 2]);
        let and_q =
            json!({"match": {"field": "body", "query": "rust engine", "operator": "AND"}});
        assert_eq!(docs(compile(&m, &seg, and_q)), vec![0]);
    }

    #[test]
    fn exists_query_checks_docvalues() {
        let m = mapping();
        let mut builder = SegmentBuilder::new(Arc::new(m.clone()));
        builder
            .add_document(&Document::new("a").with_field("qty", FieldValue::Long(1)))
            .unwrap();
        builder
            .add_document(&Document::new("b").with_field("body", FieldValue::Text("x".into())))
            .unwrap();
        let seg = builder.seal().unwrap();
        assert_eq!(docs(compile(&m, &seg, json!({"exists": {"field": "qty"}}))), vec![0]);
        assert_eq!(docs(compile(&m, &seg, json!({"exists": {"field": "body"}}))), vec![1]);
    }

    #[test]
    fn range_on_text_field_is_a_type_error() {
        let m = mapping();
        let seg = segment(&m);
        let node =
            QueryNode::from_json(&json!({"range": {"field": "body", "gte": 1}})).unwrap();
        let err = ScorerCompiler::new(&m, 1.2, 0.75)
            .compile(&node, &seg)
            .unwrap_err();
        assert_eq!(err.kind, crate::core::error::ErrorKind::TypeMismatch);
    }
}
