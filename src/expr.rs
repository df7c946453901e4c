//! Resolution of indirect `length` and `count` attributes.
//!
//! A length/count is one of: an integer literal, the name of a previously
//! decoded scalar (searched in the current scope, then enclosing scopes,
//! then the header-info snapshot), or a single binary expression over two
//! such operands. At most one operator may appear in an expression.

use serde_json::Value as Json;

use crate::error::{CodecError, FieldPath};
use crate::value::{Scope, Value};

pub const COMPONENT_BITMAP_BIT_LENGTH: &str = "ComponentBitmapBitLength";

#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Literal(u64),
    Name(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(u64),
    Name(String),
    Binary(Op, Operand, Operand),
    /// Consume whatever bytes remain in the current bounded region (used by
    /// Vendor Defined descriptor data, whose length is never declared
    /// explicitly but falls out of the enclosing descriptor's length).
    Remaining,
}

/// Sentinel spelling recognized in a schema's `length`/`count` string.
pub const REMAINING: &str = "remaining";

/// Operator scan order matches the reference tool: the first operator
/// *type* present anywhere in the string wins the split, not the first
/// character positionally. Well-formed schemas only ever use one operator
/// per expression so this never matters in practice.
const OPERATORS: [(char, Op); 4] = [
    ('+', Op::Add),
    ('-', Op::Sub),
    ('*', Op::Mul),
    ('/', Op::Div),
];

impl Expr {
    pub fn parse(json: &Json) -> Result<Self, String> {
        match json {
            Json::Number(n) => n
                .as_u64()
                .map(Expr::Literal)
                .ok_or_else(|| format!("length/count literal out of range: {n}")),
            Json::String(s) => Ok(Self::parse_str(s)),
            other => Err(format!("length/count must be an integer or string, got {other}")),
        }
    }

    fn parse_str(s: &str) -> Self {
        if s == REMAINING {
            return Expr::Remaining;
        }
        for (ch, op) in OPERATORS {
            if let Some(idx) = s.find(ch) {
                let (left, right) = (&s[..idx], &s[idx + ch.len_utf8()..]);
                return Expr::Binary(op.clone(), parse_operand(left), parse_operand(right));
            }
        }
        Expr::Name(s.to_string())
    }

    /// True for the `remaining` sentinel, which callers must special-case
    /// against the current bounded cursor region rather than resolving here.
    pub fn is_remaining(&self) -> bool {
        matches!(self, Expr::Remaining)
    }

    /// Resolve to a byte/element count, searching `scope` (fields decoded so
    /// far at this level), then `ancestors` innermost-first, then `info`.
    pub fn resolve(
        &self,
        scope: &Scope,
        ancestors: &[&Scope],
        info: Option<&Scope>,
        path: &FieldPath,
    ) -> Result<u64, CodecError> {
        match self {
            Expr::Literal(v) => Ok(*v),
            Expr::Remaining => Err(CodecError::SchemaError {
                path: path.clone(),
                message: "`remaining` length used outside a bounded region".into(),
            }),
            Expr::Name(name) => {
                let v = resolve_name(name, scope, ancestors, info, path)?;
                if name == COMPONENT_BITMAP_BIT_LENGTH {
                    Ok(v / 8)
                } else {
                    Ok(v)
                }
            }
            Expr::Binary(op, left, right) => {
                let l = resolve_operand(left, scope, ancestors, info, path)?;
                let r = resolve_operand(right, scope, ancestors, info, path)?;
                match op {
                    Op::Add => Ok(l + r),
                    Op::Sub => Ok(l.saturating_sub(r)),
                    Op::Mul => Ok(l * r),
                    Op::Div => {
                        if r == 0 {
                            Err(CodecError::SchemaError {
                                path: path.clone(),
                                message: "division by zero in length/count expression".into(),
                            })
                        } else {
                            Ok(l / r)
                        }
                    }
                }
            }
        }
    }
}

fn parse_operand(s: &str) -> Operand {
    let s = s.trim();
    if let Ok(v) = s.parse::<u64>() {
        Operand::Literal(v)
    } else {
        Operand::Name(s.to_string())
    }
}

fn resolve_operand(
    op: &Operand,
    scope: &Scope,
    ancestors: &[&Scope],
    info: Option<&Scope>,
    path: &FieldPath,
) -> Result<u64, CodecError> {
    match op {
        Operand::Literal(v) => Ok(*v),
        Operand::Name(name) => resolve_name(name, scope, ancestors, info, path),
    }
}

pub fn resolve_name(
    name: &str,
    scope: &Scope,
    ancestors: &[&Scope],
    info: Option<&Scope>,
    path: &FieldPath,
) -> Result<u64, CodecError> {
    resolve_value(name, scope, ancestors, info)
        .and_then(|v| v.as_u64())
        .ok_or_else(|| CodecError::SchemaError {
            path: path.clone(),
            message: format!("unresolved operand `{name}`"),
        })
}

/// Resolve a name to its decoded `Value`, without coercing to an integer.
/// Used for indirect data-type lookups, which may resolve to a symbolic
/// string rather than a number.
pub fn resolve_value<'a>(
    name: &str,
    scope: &'a Scope,
    ancestors: &[&'a Scope],
    info: Option<&'a Scope>,
) -> Option<&'a Value> {
    if let Some(v) = scope.get(name) {
        return Some(v);
    }
    for anc in ancestors.iter().rev() {
        if let Some(v) = anc.get(name) {
            return Some(v);
        }
    }
    info.and_then(|i| i.get(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_literal() {
        assert_eq!(Expr::parse(&Json::from(16)).unwrap(), Expr::Literal(16));
    }

    #[test]
    fn parses_name() {
        assert_eq!(
            Expr::parse(&Json::from("FooLength")).unwrap(),
            Expr::Name("FooLength".into())
        );
    }

    #[test]
    fn parses_binary() {
        assert_eq!(
            Expr::parse(&Json::from("DescriptorCount-1")).unwrap(),
            Expr::Binary(Op::Sub, Operand::Name("DescriptorCount".into()), Operand::Literal(1))
        );
    }

    #[test]
    fn resolves_binary_division() {
        let mut scope = Scope::new();
        scope.insert("A".into(), Value::Int(10));
        let expr = Expr::parse(&Json::from("A/2")).unwrap();
        let path = FieldPath::default();
        assert_eq!(expr.resolve(&scope, &[], None, &path).unwrap(), 5);
    }

    #[test]
    fn component_bitmap_bit_length_divides_by_eight() {
        let mut info = Scope::new();
        info.insert(COMPONENT_BITMAP_BIT_LENGTH.into(), Value::Int(16));
        let expr = Expr::Name(COMPONENT_BITMAP_BIT_LENGTH.into());
        let scope = Scope::new();
        let path = FieldPath::default();
        assert_eq!(expr.resolve(&scope, &[], Some(&info), &path).unwrap(), 2);
    }
}
