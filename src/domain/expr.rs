//! Parametric integer expressions.
//!
//! Sizes and bounds in a pipeline are symbolic in the global parameters
//! (image width, height, pyramid depth). A [`ParametricExpr`] is a small
//! expression tree over integer literals and named parameters:
//! `Int | Param | Add | Sub | Mul | Div | Min | Max | Ceil`.
//!
//! Constructors fold two literal operands eagerly. No other simplification
//! is attempted, so `min(N, 0)` stays symbolic until the generated code
//! evaluates it.

use anyhow::{anyhow, Result};
use num_integer::Integer;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

/// A symbolic integer expression over named parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParametricExpr {
    /// Integer literal
    Int(i64),
    /// Named global parameter
    Param(String),
    /// `lhs + rhs`
    Add(Box<ParametricExpr>, Box<ParametricExpr>),
    /// `lhs - rhs`
    Sub(Box<ParametricExpr>, Box<ParametricExpr>),
    /// `lhs * rhs`
    Mul(Box<ParametricExpr>, Box<ParametricExpr>),
    /// Floor division, rounding toward negative infinity
    Div(Box<ParametricExpr>, Box<ParametricExpr>),
    /// `min(lhs, rhs)`
    Min(Box<ParametricExpr>, Box<ParametricExpr>),
    /// `max(lhs, rhs)`
    Max(Box<ParametricExpr>, Box<ParametricExpr>),
    /// Ceiling division
    Ceil(Box<ParametricExpr>, Box<ParametricExpr>),
}

impl ParametricExpr {
    /// Integer literal.
    pub fn int(value: i64) -> Self {
        ParametricExpr::Int(value)
    }

    /// Named parameter.
    pub fn param(name: impl Into<String>) -> Self {
        ParametricExpr::Param(name.into())
    }

    /// `a + b`, folded when both sides are literals.
    pub fn add(a: Self, b: Self) -> Self {
        match (&a, &b) {
            (ParametricExpr::Int(x), ParametricExpr::Int(y)) => ParametricExpr::Int(x + y),
            _ => ParametricExpr::Add(Box::new(a), Box::new(b)),
        }
    }

    /// `a - b`, folded when both sides are literals.
    pub fn sub(a: Self, b: Self) -> Self {
        match (&a, &b) {
            (ParametricExpr::Int(x), ParametricExpr::Int(y)) => ParametricExpr::Int(x - y),
            _ => ParametricExpr::Sub(Box::new(a), Box::new(b)),
        }
    }

    /// `a * b`, folded when both sides are literals.
    pub fn mul(a: Self, b: Self) -> Self {
        match (&a, &b) {
            (ParametricExpr::Int(x), ParametricExpr::Int(y)) => ParametricExpr::Int(x * y),
            _ => ParametricExpr::Mul(Box::new(a), Box::new(b)),
        }
    }

    /// Floor division `a / b`.
    ///
    /// # Panics
    ///
    /// Panics if `b` is the literal zero. Denominators only ever come from
    /// validated domain-function scales, so a zero here is a compiler bug.
    pub fn div(a: Self, b: Self) -> Self {
        assert!(!b.is_literal(0), "division by literal zero in parametric expression {a}");
        match (&a, &b) {
            (ParametricExpr::Int(x), ParametricExpr::Int(y)) => ParametricExpr::Int(x.div_floor(y)),
            _ => ParametricExpr::Div(Box::new(a), Box::new(b)),
        }
    }

    /// Ceiling division `ceil(a / b)`.
    ///
    /// # Panics
    ///
    /// Panics if `b` is the literal zero, for the same reason as [`Self::div`].
    pub fn ceil(a: Self, b: Self) -> Self {
        assert!(!b.is_literal(0), "ceiling division by literal zero in parametric expression {a}");
        match (&a, &b) {
            (ParametricExpr::Int(x), ParametricExpr::Int(y)) => ParametricExpr::Int(ceil_div(*x, *y)),
            _ => ParametricExpr::Ceil(Box::new(a), Box::new(b)),
        }
    }

    /// `min(a, b)`, folded only when both sides are literals.
    pub fn min(a: Self, b: Self) -> Self {
        match (&a, &b) {
            (ParametricExpr::Int(x), ParametricExpr::Int(y)) => ParametricExpr::Int(*x.min(y)),
            _ => ParametricExpr::Min(Box::new(a), Box::new(b)),
        }
    }

    /// `max(a, b)`, folded only when both sides are literals.
    pub fn max(a: Self, b: Self) -> Self {
        match (&a, &b) {
            (ParametricExpr::Int(x), ParametricExpr::Int(y)) => ParametricExpr::Int(*x.max(y)),
            _ => ParametricExpr::Max(Box::new(a), Box::new(b)),
        }
    }

    /// The literal value, if this is a literal.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParametricExpr::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Check whether this is exactly the literal `value`.
    pub fn is_literal(&self, value: i64) -> bool {
        self.as_int() == Some(value)
    }

    /// Evaluate with concrete parameter values.
    pub fn evaluate(&self, bindings: &HashMap<String, i64>) -> Result<i64> {
        let binary = |a: &Self, b: &Self| -> Result<(i64, i64)> {
            Ok((a.evaluate(bindings)?, b.evaluate(bindings)?))
        };
        match self {
            ParametricExpr::Int(v) => Ok(*v),
            ParametricExpr::Param(name) => bindings
                .get(name)
                .copied()
                .ok_or_else(|| anyhow!("unbound parameter `{}`", name)),
            ParametricExpr::Add(a, b) => binary(a, b).map(|(x, y)| x + y),
            ParametricExpr::Sub(a, b) => binary(a, b).map(|(x, y)| x - y),
            ParametricExpr::Mul(a, b) => binary(a, b).map(|(x, y)| x * y),
            ParametricExpr::Min(a, b) => binary(a, b).map(|(x, y)| x.min(y)),
            ParametricExpr::Max(a, b) => binary(a, b).map(|(x, y)| x.max(y)),
            ParametricExpr::Div(a, b) => {
                let (x, y) = binary(a, b)?;
                if y == 0 {
                    return Err(anyhow!("division by zero evaluating {}", self));
                }
                Ok(x.div_floor(&y))
            }
            ParametricExpr::Ceil(a, b) => {
                let (x, y) = binary(a, b)?;
                if y == 0 {
                    return Err(anyhow!("division by zero evaluating {}", self));
                }
                Ok(ceil_div(x, y))
            }
        }
    }

    /// Names of all parameters referenced by this expression.
    pub fn params(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_params(&mut out);
        out
    }

    fn collect_params(&self, out: &mut BTreeSet<String>) {
        match self {
            ParametricExpr::Int(_) => {}
            ParametricExpr::Param(name) => {
                out.insert(name.clone());
            }
            ParametricExpr::Add(a, b)
            | ParametricExpr::Sub(a, b)
            | ParametricExpr::Mul(a, b)
            | ParametricExpr::Div(a, b)
            | ParametricExpr::Min(a, b)
            | ParametricExpr::Max(a, b)
            | ParametricExpr::Ceil(a, b) => {
                a.collect_params(out);
                b.collect_params(out);
            }
        }
    }

    /// Render as a C expression. Min/max and the rounding divisions use the
    /// `sc_*` helpers the code generator emits in its preamble.
    pub fn to_c(&self) -> String {
        match self {
            ParametricExpr::Int(v) if *v < 0 => format!("({})", v),
            ParametricExpr::Int(v) => v.to_string(),
            ParametricExpr::Param(name) => name.clone(),
            ParametricExpr::Add(a, b) => format!("({} + {})", a.to_c(), b.to_c()),
            ParametricExpr::Sub(a, b) => format!("({} - {})", a.to_c(), b.to_c()),
            ParametricExpr::Mul(a, b) => format!("({} * {})", a.to_c(), b.to_c()),
            ParametricExpr::Div(a, b) => format!("sc_floord({}, {})", a.to_c(), b.to_c()),
            ParametricExpr::Ceil(a, b) => format!("sc_ceild({}, {})", a.to_c(), b.to_c()),
            ParametricExpr::Min(a, b) => format!("sc_min({}, {})", a.to_c(), b.to_c()),
            ParametricExpr::Max(a, b) => format!("sc_max({}, {})", a.to_c(), b.to_c()),
        }
    }
}

/// Integer ceiling division.
pub(crate) fn ceil_div(a: i64, b: i64) -> i64 {
    -((-a).div_floor(&b))
}

impl From<i64> for ParametricExpr {
    fn from(value: i64) -> Self {
        ParametricExpr::Int(value)
    }
}

impl Add for ParametricExpr {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        ParametricExpr::add(self, other)
    }
}

impl Sub for ParametricExpr {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        ParametricExpr::sub(self, other)
    }
}

impl Mul for ParametricExpr {
    type Output = Self;

    fn mul(self, other: Self) -> Self {
        ParametricExpr::mul(self, other)
    }
}

impl Neg for ParametricExpr {
    type Output = Self;

    fn neg(self) -> Self {
        ParametricExpr::sub(ParametricExpr::Int(0), self)
    }
}

impl fmt::Display for ParametricExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParametricExpr::Int(v) => write!(f, "{}", v),
            ParametricExpr::Param(name) => write!(f, "{}", name),
            ParametricExpr::Add(a, b) => write!(f, "({} + {})", a, b),
            ParametricExpr::Sub(a, b) => write!(f, "({} - {})", a, b),
            ParametricExpr::Mul(a, b) => write!(f, "({} * {})", a, b),
            ParametricExpr::Div(a, b) => write!(f, "floord({}, {})", a, b),
            ParametricExpr::Ceil(a, b) => write!(f, "ceild({}, {})", a, b),
            ParametricExpr::Min(a, b) => write!(f, "min({}, {})", a, b),
            ParametricExpr::Max(a, b) => write!(f, "max({}, {})", a, b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n() -> ParametricExpr {
        ParametricExpr::param("N")
    }

    #[test]
    fn test_literal_folding() {
        for (a, b) in [(3, 4), (-7, 2), (0, 0), (i32::MAX as i64, 1)] {
            let sum = ParametricExpr::add(a.into(), b.into());
            assert_eq!(sum, ParametricExpr::Int(a + b));
        }
        assert_eq!(ParametricExpr::mul(6.into(), 7.into()), ParametricExpr::Int(42));
        assert_eq!(ParametricExpr::min(6.into(), (-7).into()), ParametricExpr::Int(-7));
        assert_eq!(ParametricExpr::max(6.into(), (-7).into()), ParametricExpr::Int(6));
    }

    #[test]
    fn test_division_rounds_toward_negative_infinity() {
        assert_eq!(ParametricExpr::div((-3).into(), 2.into()), ParametricExpr::Int(-2));
        assert_eq!(ParametricExpr::div(3.into(), 2.into()), ParametricExpr::Int(1));
        assert_eq!(ParametricExpr::ceil((-3).into(), 2.into()), ParametricExpr::Int(-1));
        assert_eq!(ParametricExpr::ceil(3.into(), 2.into()), ParametricExpr::Int(2));
        assert_eq!(ParametricExpr::ceil(2.into(), 2.into()), ParametricExpr::Int(1));
    }

    #[test]
    fn test_symbolic_operands_are_not_simplified() {
        let e = ParametricExpr::add(n(), 0.into());
        assert!(matches!(e, ParametricExpr::Add(_, _)));
        let m = ParametricExpr::min(n(), 0.into());
        assert_eq!(m.to_string(), "min(N, 0)");
    }

    #[test]
    fn test_copy_renders_identically() {
        let e = ParametricExpr::ceil(n() - 1.into(), 2.into()) * ParametricExpr::param("W");
        let copy = e.clone();
        assert_eq!(copy.to_string(), e.to_string());
        assert_eq!(copy, e);
    }

    #[test]
    #[should_panic(expected = "division by literal zero")]
    fn test_div_by_literal_zero_panics() {
        let _ = ParametricExpr::div(n(), 0.into());
    }

    #[test]
    fn test_evaluate() {
        let e = ParametricExpr::sub(ParametricExpr::div(n(), 2.into()), 1.into());
        let bindings = HashMap::from([("N".to_string(), 9)]);
        assert_eq!(e.evaluate(&bindings).unwrap(), 3);
        assert!(e.evaluate(&HashMap::new()).is_err());
    }

    #[test]
    fn test_evaluate_runtime_zero_divisor() {
        let e = ParametricExpr::div(10.into(), n());
        let bindings = HashMap::from([("N".to_string(), 0)]);
        assert!(e.evaluate(&bindings).is_err());
    }

    #[test]
    fn test_to_c() {
        let e = ParametricExpr::max(ParametricExpr::ceil(n(), 2.into()), (-1).into());
        assert_eq!(e.to_c(), "sc_max(sc_ceild(N, 2), (-1))");
        assert_eq!(e.params().into_iter().collect::<Vec<_>>(), vec!["N".to_string()]);
    }
}
