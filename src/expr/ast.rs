use crate::core::error::{Error, Result};
use crate::schema::mapping::{FieldType, Mapping};
use serde::{Deserialize, Serialize};

/// Runtime value of a post-filter expression. `Null` flows through every
/// operator and projects to `false` at the boolean boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Long(i64),
    Double(f64),
    Bool(bool),
    Str(String),
}

impl Value {
    pub fn truthy(&self) -> bool {
        matches!(self, Value::Bool(true))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn is_arithmetic(&self) -> bool {
        matches!(self, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div)
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    Not,
    Neg,
}

/// Whitelisted functions; anything else is rejected when the expression is
/// built from the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Func {
    Abs,
    Floor,
    Ceil,
    Sqrt,
    Min,
    Max,
    Length,
}

impl Func {
    pub fn arity(&self) -> usize {
        match self {
            Func::Min | Func::Max => 2,
            _ => 1,
        }
    }
}

/// Typed post-filter AST. This is a small expression tree handed over
/// pre-parsed, not a string language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Const(Value),
    Field(String),
    Binop {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unop {
        op: UnOp,
        expr: Box<Expr>,
    },
    Call {
        func: Func,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn field(name: &str) -> Self {
        Expr::Field(name.to_string())
    }

    pub fn binop(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binop {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Fields referenced anywhere in the tree.
    pub fn referenced_fields(&self, out: &mut Vec<String>) {
        match self {
            Expr::Const(_) => {}
            Expr::Field(name) => {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            Expr::Binop { lhs, rhs, .. } => {
                lhs.referenced_fields(out);
                rhs.referenced_fields(out);
            }
            Expr::Unop { expr, .. } => expr.referenced_fields(out),
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.referenced_fields(out);
                }
            }
        }
    }
}

/// Static type of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprType {
    Long,
    Double,
    Bool,
    Str,
    Null,
}

impl ExprType {
    fn is_numeric(&self) -> bool {
        matches!(self, ExprType::Long | ExprType::Double | ExprType::Null)
    }

    fn numeric_join(self, other: ExprType) -> ExprType {
        if self == ExprType::Double || other == ExprType::Double {
            ExprType::Double
        } else if self == ExprType::Null {
            other
        } else {
            self
        }
    }
}

/// Type-check against the mapping at plan-build time. Evaluation itself is
/// total; the check catches shape errors before any segment is touched.
pub fn type_check(expr: &Expr, mapping: &Mapping) -> Result<ExprType> {
    match expr {
        Expr::Const(value) => Ok(match value {
            Value::Null => ExprType::Null,
            Value::Long(_) => ExprType::Long,
            Value::Double(_) => ExprType::Double,
            Value::Bool(_) => ExprType::Bool,
            Value::Str(_) => ExprType::Str,
        }),
        Expr::Field(name) => {
            let info = mapping.require_field(name)?;
            match info.field_type {
                FieldType::Text => Err(Error::type_mismatch(
                    name,
                    "a doc-values field",
                    "text (no doc-values)",
                )),
                FieldType::Keyword => Ok(ExprType::Str),
                FieldType::Long | FieldType::Date => Ok(ExprType::Long),
                FieldType::Double => Ok(ExprType::Double),
                FieldType::Bool => Ok(ExprType::Bool),
            }
        }
        Expr::Binop { op, lhs, rhs } => {
            let lt = type_check(lhs, mapping)?;
            let rt = type_check(rhs, mapping)?;
            if op.is_arithmetic() {
                if lt.is_numeric() && rt.is_numeric() {
                    Ok(lt.numeric_join(rt))
                } else {
                    Err(Error::new(
                        crate::core::error::ErrorKind::TypeMismatch,
                        format!("{:?} requires numeric operands, got {:?} and {:?}", op, lt, rt),
                    ))
                }
            } else if op.is_comparison() {
                let comparable = (lt.is_numeric() && rt.is_numeric())
                    || lt == ExprType::Str && rt == ExprType::Str
                    || lt == ExprType::Bool && rt == ExprType::Bool
                    || lt == ExprType::Null
                    || rt == ExprType::Null;
                if comparable {
                    Ok(ExprType::Bool)
                } else {
                    Err(Error::new(
                        crate::core::error::ErrorKind::TypeMismatch,
                        format!("cannot compare {:?} with {:?}", lt, rt),
                    ))
                }
            } else {
                // logical
                let boolish = |t: ExprType| t == ExprType::Bool || t == ExprType::Null;
                if boolish(lt) && boolish(rt) {
                    Ok(ExprType::Bool)
                } else {
                    Err(Error::new(
                        crate::core::error::ErrorKind::TypeMismatch,
                        format!("{:?} requires bool operands, got {:?} and {:?}", op, lt, rt),
                    ))
                }
            }
        }
        Expr::Unop { op, expr } => {
            let t = type_check(expr, mapping)?;
            match op {
                UnOp::Not if t == ExprType::Bool || t == ExprType::Null => Ok(ExprType::Bool),
                UnOp::Neg if t.is_numeric() => Ok(t),
                _ => Err(Error::new(
                    crate::core::error::ErrorKind::TypeMismatch,
                    format!("{:?} cannot apply to {:?}", op, t),
                )),
            }
        }
        Expr::Call { func, args } => {
            if args.len() != func.arity() {
                return Err(Error::new(
                    crate::core::error::ErrorKind::InvalidArgument,
                    format!("{:?} takes {} argument(s)", func, func.arity()),
                ));
            }
            let types: Vec<ExprType> = args
                .iter()
                .map(|a| type_check(a, mapping))
                .collect::<Result<_>>()?;
            match func {
                Func::Length => {
                    if types[0] == ExprType::Str || types[0] == ExprType::Null {
                        Ok(ExprType::Long)
                    } else {
                        Err(Error::new(
                            crate::core::error::ErrorKind::TypeMismatch,
                            format!("length expects a string, got {:?}", types[0]),
                        ))
                    }
                }
                Func::Sqrt => {
                    if types[0].is_numeric() {
                        Ok(ExprType::Double)
                    } else {
                        Err(Error::new(
                            crate::core::error::ErrorKind::TypeMismatch,
                            format!("sqrt expects a number, got {:?}", types[0]),
                        ))
                    }
                }
                Func::Abs | Func::Floor | Func::Ceil => {
                    if types[0].is_numeric() {
                        Ok(types[0])
                    } else {
                        Err(Error::new(
                            crate::core::error::ErrorKind::TypeMismatch,
                            format!("{:?} expects a number, got {:?}", func, types[0]),
                        ))
                    }
                }
                Func::Min | Func::Max => {
                    if types[0].is_numeric() && types[1].is_numeric() {
                        Ok(types[0].numeric_join(types[1]))
                    } else {
                        Err(Error::new(
                            crate::core::error::ErrorKind::TypeMismatch,
                            format!("{:?} expects numbers, got {:?} and {:?}", func, types[0], types[1]),
                        ))
                    }
                }
            }
        }
    }
}
