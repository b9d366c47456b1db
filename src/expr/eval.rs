use crate::core::types::DocOrd;
use crate::expr::ast::{BinOp, Expr, Func, UnOp, Value};
use crate::schema::mapping::{FieldType, Mapping};
use crate::segment::segment::Segment;

/// Total evaluation of a post-filter expression against one document's
/// doc-values. Missing fields become `Null`; every operator propagates
/// `Null`; nothing here can fail at runtime.
pub fn evaluate(expr: &Expr, mapping: &Mapping, segment: &Segment, doc: DocOrd) -> Value {
    match expr {
        Expr::Const(value) => value.clone(),
        Expr::Field(name) => read_field(name, mapping, segment, doc),
        Expr::Binop { op, lhs, rhs } => {
            let l = evaluate(lhs, mapping, segment, doc);
            let r = evaluate(rhs, mapping, segment, doc);
            apply_binop(*op, l, r)
        }
        Expr::Unop { op, expr } => {
            let v = evaluate(expr, mapping, segment, doc);
            apply_unop(*op, v)
        }
        Expr::Call { func, args } => {
            let values: Vec<Value> = args
                .iter()
                .map(|a| evaluate(a, mapping, segment, doc))
                .collect();
            apply_call(*func, &values)
        }
    }
}

fn read_field(name: &str, mapping: &Mapping, segment: &Segment, doc: DocOrd) -> Value {
    let Some(field_type) = mapping.field_type(name) else {
        return Value::Null;
    };
    match field_type {
        FieldType::Keyword => segment
            .keyword_values(name)
            .and_then(|col| col.term_for_doc(doc))
            .map(|term| Value::Str(term.to_string()))
            .unwrap_or(Value::Null),
        FieldType::Long | FieldType::Date => segment
            .numeric_values(name)
            .and_then(|col| col.get(doc))
            .map(Value::Long)
            .unwrap_or(Value::Null),
        FieldType::Double => segment
            .numeric_values(name)
            .and_then(|col| col.get_double(doc))
            .map(Value::Double)
            .unwrap_or(Value::Null),
        FieldType::Bool => segment
            .numeric_values(name)
            .and_then(|col| col.get(doc))
            .map(|v| Value::Bool(v != 0))
            .unwrap_or(Value::Null),
        FieldType::Text => Value::Null,
    }
}

fn numeric_pair(l: &Value, r: &Value) -> Option<(f64, f64, bool)> {
    // (lhs, rhs, both_long)
    match (l, r) {
        (Value::Long(a), Value::Long(b)) => Some((*a as f64, *b as f64, true)),
        (Value::Long(a), Value::Double(b)) => Some((*a as f64, *b, false)),
        (Value::Double(a), Value::Long(b)) => Some((*a, *b as f64, false)),
        (Value::Double(a), Value::Double(b)) => Some((*a, *b, false)),
        _ => None,
    }
}

fn apply_binop(op: BinOp, l: Value, r: Value) -> Value {
    if l.is_null() || r.is_null() {
        return Value::Null;
    }
    if op.is_arithmetic() {
        return match (op, &l, &r) {
            (BinOp::Add, Value::Long(a), Value::Long(b)) => {
                a.checked_add(*b).map(Value::Long).unwrap_or(Value::Null)
            }
            (BinOp::Sub, Value::Long(a), Value::Long(b)) => {
                a.checked_sub(*b).map(Value::Long).unwrap_or(Value::Null)
            }
            (BinOp::Mul, Value::Long(a), Value::Long(b)) => {
                a.checked_mul(*b).map(Value::Long).unwrap_or(Value::Null)
            }
            (BinOp::Div, Value::Long(a), Value::Long(b)) => {
                a.checked_div(*b).map(Value::Long).unwrap_or(Value::Null)
            }
            _ => match numeric_pair(&l, &r) {
                Some((a, b, _)) => {
                    let out = match op {
                        BinOp::Add => a + b,
                        BinOp::Sub => a - b,
                        BinOp::Mul => a * b,
                        BinOp::Div => a / b,
                        _ => unreachable!(),
                    };
                    if out.is_finite() {
                        Value::Double(out)
                    } else {
                        Value::Null
                    }
                }
                None => Value::Null,
            },
        };
    }
    if op.is_comparison() {
        let ordering = match (&l, &r) {
            (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            _ => match numeric_pair(&l, &r) {
                Some((a, b, _)) => a.partial_cmp(&b),
                None => None,
            },
        };
        let Some(ordering) = ordering else {
            return Value::Null; // NaN comparisons land here
        };
        let out = match op {
            BinOp::Eq => ordering.is_eq(),
            BinOp::Ne => !ordering.is_eq(),
            BinOp::Lt => ordering.is_lt(),
            BinOp::Le => ordering.is_le(),
            BinOp::Gt => ordering.is_gt(),
            BinOp::Ge => ordering.is_ge(),
            _ => unreachable!(),
        };
        return Value::Bool(out);
    }
    match (op, l, r) {
        (BinOp::And, Value::Bool(a), Value::Bool(b)) => Value::Bool(a && b),
        (BinOp::Or, Value::Bool(a), Value::Bool(b)) => Value::Bool(a || b),
        _ => Value::Null,
    }
}

fn apply_unop(op: UnOp, v: Value) -> Value {
    match (op, v) {
        (UnOp::Not, Value::Bool(b)) => Value::Bool(!b),
        (UnOp::Neg, Value::Long(a)) => a.checked_neg().map(Value::Long).unwrap_or(Value::Null),
        (UnOp::Neg, Value::Double(a)) => Value::Double(-a),
        _ => Value::Null,
    }
}

fn apply_call(func: Func, args: &[Value]) -> Value {
    if args.iter().any(Value::is_null) {
        return Value::Null;
    }
    match func {
        Func::Abs => match &args[0] {
            Value::Long(a) => a.checked_abs().map(Value::Long).unwrap_or(Value::Null),
            Value::Double(a) => Value::Double(a.abs()),
            _ => Value::Null,
        },
        Func::Floor => match &args[0] {
            Value::Long(a) => Value::Long(*a),
            Value::Double(a) => Value::Double(a.floor()),
            _ => Value::Null,
        },
        Func::Ceil => match &args[0] {
            Value::Long(a) => Value::Long(*a),
            Value::Double(a) => Value::Double(a.ceil()),
            _ => Value::Null,
        },
        Func::Sqrt => {
            let v = match &args[0] {
                Value::Long(a) => *a as f64,
                Value::Double(a) => *a,
                _ => return Value::Null,
            };
            if v < 0.0 {
                Value::Null
            } else {
                Value::Double(v.sqrt())
            }
        }
        Func::Min | Func::Max => match numeric_pair(&args[0], &args[1]) {
            Some((a, b, both_long)) => {
                let out = if func == Func::Min { a.min(b) } else { a.max(b) };
                if both_long {
                    Value::Long(out as i64)
                } else {
                    Value::Double(out)
                }
            }
            None => Value::Null,
        },
        Func::Length => match &args[0] {
            Value::Str(s) => Value::Long(s.chars().count() as i64),
            _ => Value::Null,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Document, FieldValue};
    use crate::expr::ast::Expr;
    use std::sync::Arc;

    fn setup() -> (Mapping, Segment) {
        let mapping = Mapping::new()
            .with_field("price", FieldType::Double)
            .with_field("qty", FieldType::Long)
            .with_field("tag", FieldType::Keyword);
        let mut builder =
            crate::segment::builder::SegmentBuilder::new(Arc::new(mapping.clone()));
        builder
            .add_document(
                &Document::new("a")
                    .with_field("price", FieldValue::Double(10.0))
                    .with_field("qty", FieldValue::Long(4))
                    .with_field("tag", FieldValue::Keyword("promo".into())),
            )
            .unwrap();
        builder
            .add_document(&Document::new("b").with_field("qty", FieldValue::Long(1)))
            .unwrap();
        (mapping, builder.seal().unwrap())
    }

    #[test]
    fn reads_and_computes() {
        let (m, seg) = setup();
        // price * qty > 30
        let e = Expr::binop(
            BinOp::Gt,
            Expr::binop(BinOp::Mul, Expr::field("price"), Expr::field("qty")),
            Expr::Const(Value::Long(30)),
        );
        assert_eq!(evaluate(&e, &m, &seg, 0), Value::Bool(true));
        // doc 1 has no price: null propagates, projects false
        assert_eq!(evaluate(&e, &m, &seg, 1), Value::Null);
        assert!(!evaluate(&e, &m, &seg, 1).truthy());
    }

    #[test]
    fn string_functions() {
        let (m, seg) = setup();
        let e = Expr::binop(
            BinOp::Eq,
            Expr::Call {
                func: Func::Length,
                args: vec![Expr::field("tag")],
            },
            Expr::Const(Value::Long(5)),
        );
        assert_eq!(evaluate(&e, &m, &seg, 0), Value::Bool(true));
        assert_eq!(evaluate(&e, &m, &seg, 1), Value::Null);
    }

    #[test]
    fn division_by_zero_is_null() {
        let (m, seg) = setup();
        let e = Expr::binop(
            BinOp::Div,
            Expr::field("qty"),
            Expr::Const(Value::Long(0)),
        );
        assert_eq!(evaluate(&e, &m, &seg, 0), Value::Null);
    }

    #[test]
    fn sqrt_of_negative_is_null() {
        let v = apply_call(Func::Sqrt, &[Value::Double(-1.0)]);
        assert_eq!(v, Value::Null);
    }
}
