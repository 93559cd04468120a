//! Per-dimension index ranges.
//!
//! A [`Domain`] is the box of indices over which a value is defined: one
//! [`RangeCoeff`] `[lower, upper]` (inclusive) per dimension. Bounds are
//! parametric, so combining two domains produces symbolic `min`/`max`
//! terms whenever the operands are not both literal.

use super::expr::ParametricExpr;
use super::func::DomainFn;
use crate::utils::errors::{InternalError, InternalErrorKind};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Inclusive range of one dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeCoeff {
    /// No constraint yet; the identity for intersection.
    Unconstrained,
    /// `[lower, upper]`
    Range {
        lower: ParametricExpr,
        upper: ParametricExpr,
    },
}

impl RangeCoeff {
    /// Create a range.
    pub fn new(lower: impl Into<ParametricExpr>, upper: impl Into<ParametricExpr>) -> Self {
        RangeCoeff::Range {
            lower: lower.into(),
            upper: upper.into(),
        }
    }

    /// `[0, extent - 1]`
    pub fn from_extent(extent: ParametricExpr) -> Self {
        RangeCoeff::Range {
            lower: ParametricExpr::int(0),
            upper: extent - ParametricExpr::int(1),
        }
    }

    pub fn is_unconstrained(&self) -> bool {
        matches!(self, RangeCoeff::Unconstrained)
    }

    pub fn lower(&self) -> Option<&ParametricExpr> {
        match self {
            RangeCoeff::Range { lower, .. } => Some(lower),
            RangeCoeff::Unconstrained => None,
        }
    }

    pub fn upper(&self) -> Option<&ParametricExpr> {
        match self {
            RangeCoeff::Range { upper, .. } => Some(upper),
            RangeCoeff::Unconstrained => None,
        }
    }

    /// Both bounds as literals.
    pub fn as_literal(&self) -> Option<(i64, i64)> {
        match self {
            RangeCoeff::Range { lower, upper } => Some((lower.as_int()?, upper.as_int()?)),
            RangeCoeff::Unconstrained => None,
        }
    }

    /// Number of indices, `upper - lower + 1`.
    pub fn extent(&self) -> Option<ParametricExpr> {
        match self {
            RangeCoeff::Range { lower, upper } => {
                Some(upper.clone() - lower.clone() + ParametricExpr::int(1))
            }
            RangeCoeff::Unconstrained => None,
        }
    }

    fn intersect(&self, other: &RangeCoeff) -> RangeCoeff {
        match (self, other) {
            (RangeCoeff::Unconstrained, r) | (r, RangeCoeff::Unconstrained) => r.clone(),
            (
                RangeCoeff::Range { lower: l0, upper: u0 },
                RangeCoeff::Range { lower: l1, upper: u1 },
            ) => RangeCoeff::Range {
                lower: ParametricExpr::max(l0.clone(), l1.clone()),
                upper: ParametricExpr::min(u0.clone(), u1.clone()),
            },
        }
    }

    fn union(&self, other: &RangeCoeff) -> RangeCoeff {
        match (self, other) {
            (RangeCoeff::Unconstrained, _) | (_, RangeCoeff::Unconstrained) => {
                RangeCoeff::Unconstrained
            }
            (
                RangeCoeff::Range { lower: l0, upper: u0 },
                RangeCoeff::Range { lower: l1, upper: u1 },
            ) => RangeCoeff::Range {
                lower: ParametricExpr::min(l0.clone(), l1.clone()),
                upper: ParametricExpr::max(u0.clone(), u1.clone()),
            },
        }
    }
}

impl fmt::Display for RangeCoeff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeCoeff::Unconstrained => write!(f, "[*]"),
            RangeCoeff::Range { lower, upper } => write!(f, "[{}..{}]", lower, upper),
        }
    }
}

/// Ordered per-dimension ranges.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Domain {
    pub ranges: Vec<RangeCoeff>,
}

impl Domain {
    pub fn new(ranges: Vec<RangeCoeff>) -> Self {
        Self { ranges }
    }

    /// Zero-dimensional domain of a scalar value.
    pub fn scalar() -> Self {
        Self { ranges: Vec::new() }
    }

    /// `n` unconstrained dimensions.
    pub fn unconstrained(n_dim: usize) -> Self {
        Self {
            ranges: vec![RangeCoeff::Unconstrained; n_dim],
        }
    }

    /// `[0, e - 1]` for each extent.
    pub fn from_extents(extents: impl IntoIterator<Item = ParametricExpr>) -> Self {
        Self {
            ranges: extents.into_iter().map(RangeCoeff::from_extent).collect(),
        }
    }

    /// Literal box, convenient for tests and fixed-size kernels.
    pub fn literal(bounds: &[(i64, i64)]) -> Self {
        Self {
            ranges: bounds.iter().map(|&(l, u)| RangeCoeff::new(l, u)).collect(),
        }
    }

    pub fn n_dim(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn range(&self, dim: usize) -> Option<&RangeCoeff> {
        self.ranges.get(dim)
    }

    pub fn is_fully_constrained(&self) -> bool {
        self.ranges.iter().all(|r| !r.is_unconstrained())
    }

    /// Seed this domain from another one.
    pub fn init_domain(&mut self, src: &Domain) {
        self.ranges = src.ranges.clone();
    }

    fn check_arity(&self, other: &Domain, op: &str) -> Result<(), InternalError> {
        if self.n_dim() != other.n_dim() {
            return Err(InternalError::new(
                InternalErrorKind::ArityMismatch,
                format!(
                    "{} of {}-d domain {} with {}-d domain {}",
                    op,
                    self.n_dim(),
                    self,
                    other.n_dim(),
                    other
                ),
            ));
        }
        Ok(())
    }

    /// Narrow this domain to its intersection with `other`.
    pub fn compute_intersection(&mut self, other: &Domain) -> Result<(), InternalError> {
        self.check_arity(other, "intersection")?;
        for (mine, theirs) in self.ranges.iter_mut().zip(&other.ranges) {
            *mine = mine.intersect(theirs);
        }
        Ok(())
    }

    /// Widen this domain to the bounding box of itself and `other`.
    pub fn compute_union(&mut self, other: &Domain) -> Result<(), InternalError> {
        self.check_arity(other, "union")?;
        for (mine, theirs) in self.ranges.iter_mut().zip(&other.ranges) {
            *mine = mine.union(theirs);
        }
        Ok(())
    }

    /// Re-express this domain in the index space `i` of `f`, so that
    /// `f(i)` stays inside the current ranges:
    /// `lb' = ceil((lb - offset) / scale)`, `ub' = floor((ub - offset) / scale)`.
    pub fn realign_domain(&mut self, f: &DomainFn) -> Result<(), InternalError> {
        if f.n_dim() != self.n_dim() {
            return Err(InternalError::new(
                InternalErrorKind::ArityMismatch,
                format!("realigning {}-d domain {} with {}-d function {}", self.n_dim(), self, f.n_dim(), f),
            ));
        }
        for (range, d) in self.ranges.iter_mut().zip(&f.dims) {
            if let RangeCoeff::Range { lower, upper } = range {
                let off = ParametricExpr::int(d.offset);
                let scale = ParametricExpr::int(d.scale);
                *lower = ParametricExpr::ceil(lower.clone() - off.clone(), scale.clone());
                *upper = ParametricExpr::div(upper.clone() - off, scale);
            }
        }
        Ok(())
    }

    /// Image of this domain under `f`: `[scale*lb + offset, scale*ub + offset]`.
    pub fn image(&self, f: &DomainFn) -> Result<Domain, InternalError> {
        if f.n_dim() != self.n_dim() {
            return Err(InternalError::new(
                InternalErrorKind::ArityMismatch,
                format!("image of {}-d domain {} under {}-d function {}", self.n_dim(), self, f.n_dim(), f),
            ));
        }
        let ranges = self
            .ranges
            .iter()
            .zip(&f.dims)
            .map(|(range, d)| match range {
                RangeCoeff::Range { lower, upper } => {
                    let off = ParametricExpr::int(d.offset);
                    let scale = ParametricExpr::int(d.scale);
                    RangeCoeff::Range {
                        lower: scale.clone() * lower.clone() + off.clone(),
                        upper: scale * upper.clone() + off,
                    }
                }
                RangeCoeff::Unconstrained => RangeCoeff::Unconstrained,
            })
            .collect();
        Ok(Domain { ranges })
    }

    /// Grow dimension `dim` by `neg` below and `pos` above.
    pub fn extend(&mut self, dim: usize, neg: i64, pos: i64) {
        if let Some(RangeCoeff::Range { lower, upper }) = self.ranges.get_mut(dim) {
            *lower = lower.clone() - ParametricExpr::int(neg);
            *upper = upper.clone() + ParametricExpr::int(pos);
        }
    }

    /// Number of indices in the box, `prod(ub - lb + 1)`; `1` for a scalar.
    pub fn size(&self) -> Option<ParametricExpr> {
        let mut size = ParametricExpr::int(1);
        for range in &self.ranges {
            size = size * range.extent()?;
        }
        Some(size)
    }

    /// Number of indices in the box with the parameters bound to concrete
    /// values; an empty range counts zero.
    pub fn count(&self, bindings: &HashMap<String, i64>) -> Result<i64> {
        let mut count = 1i64;
        for range in &self.ranges {
            let RangeCoeff::Range { lower, upper } = range else {
                return Err(anyhow!("unbounded domain {} has no element count", self));
            };
            let extent = upper.evaluate(bindings)? - lower.evaluate(bindings)? + 1;
            count = count.saturating_mul(extent.max(0));
        }
        Ok(count)
    }

    /// Parameters named by any bound.
    pub fn params(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for range in &self.ranges {
            if let RangeCoeff::Range { lower, upper } = range {
                out.extend(lower.params());
                out.extend(upper.params());
            }
        }
        out
    }

    /// Whether two domains share no index. `None` unless every bound on both
    /// sides is literal.
    pub fn disjoint_from(&self, other: &Domain) -> Option<bool> {
        if self.n_dim() != other.n_dim() {
            return None;
        }
        let mut disjoint = false;
        for (a, b) in self.ranges.iter().zip(&other.ranges) {
            let (al, au) = a.as_literal()?;
            let (bl, bu) = b.as_literal()?;
            if au < bl || bu < al || au < al || bu < bl {
                disjoint = true;
            }
        }
        Some(disjoint)
    }

    /// Literal containment test; `None` when any bound is symbolic.
    pub fn contains(&self, other: &Domain) -> Option<bool> {
        if self.n_dim() != other.n_dim() {
            return None;
        }
        let mut inside = true;
        for (a, b) in self.ranges.iter().zip(&other.ranges) {
            let (al, au) = a.as_literal()?;
            let (bl, bu) = b.as_literal()?;
            if bl < al || bu > au {
                inside = false;
            }
        }
        Some(inside)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ranges.is_empty() {
            return write!(f, "scalar");
        }
        let parts: Vec<String> = self.ranges.iter().map(|r| r.to_string()).collect();
        write!(f, "{}", parts.join(" x "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_intersection_literal_commutes() {
        let d1 = Domain::literal(&[(0, 9), (2, 7)]);
        let d2 = Domain::literal(&[(3, 12), (0, 5)]);

        let mut a = d1.clone();
        a.compute_intersection(&d2).unwrap();
        let mut b = d2.clone();
        b.compute_intersection(&d1).unwrap();

        assert_eq!(a, b);
        assert_eq!(a, Domain::literal(&[(3, 9), (2, 5)]));
    }

    #[test]
    fn test_intersection_idempotent() {
        let d = Domain::literal(&[(-1, 4), (0, 0)]);
        let mut x = d.clone();
        x.compute_intersection(&d).unwrap();
        assert_eq!(x, d);
    }

    #[test]
    fn test_unconstrained_is_identity() {
        let d = Domain::from_extents([ParametricExpr::param("H")]);
        let mut u = Domain::unconstrained(1);
        u.compute_intersection(&d).unwrap();
        assert_eq!(u, d);
    }

    #[test]
    fn test_symbolic_vs_literal_is_deferred_in_both_orders() {
        // lb: max(0, 1 - K) stays symbolic whichever side comes first.
        let sym = Domain::new(vec![RangeCoeff::new(
            ParametricExpr::int(1) - ParametricExpr::param("K"),
            ParametricExpr::param("N"),
        )]);
        let lit = Domain::literal(&[(0, 15)]);

        let mut a = sym.clone();
        a.compute_intersection(&lit).unwrap();
        let mut b = lit.clone();
        b.compute_intersection(&sym).unwrap();

        for (k, n) in [(0, 10), (3, 20)] {
            let env = HashMap::from([("K".to_string(), k), ("N".to_string(), n)]);
            let eval = |d: &Domain| {
                let r = d.range(0).unwrap();
                (
                    r.lower().unwrap().evaluate(&env).unwrap(),
                    r.upper().unwrap().evaluate(&env).unwrap(),
                )
            };
            assert_eq!(eval(&a), eval(&b));
            assert_eq!(eval(&a), ((1 - k).max(0), n.min(15)));
        }
        assert!(matches!(a.range(0).unwrap().lower(), Some(ParametricExpr::Max(_, _))));
    }

    #[test]
    fn test_arity_mismatch() {
        let mut a = Domain::literal(&[(0, 1)]);
        let b = Domain::literal(&[(0, 1), (0, 1)]);
        assert!(a.compute_intersection(&b).is_err());
    }

    #[test]
    fn test_realign_downsample() {
        let mut d = Domain::literal(&[(0, 9)]);
        d.realign_domain(&DomainFn::scaled(&[(0, 2)])).unwrap();
        assert_eq!(d, Domain::literal(&[(0, 4)]));

        let mut odd = Domain::literal(&[(0, 9)]);
        odd.realign_domain(&DomainFn::scaled(&[(1, 2)])).unwrap();
        assert_eq!(odd, Domain::literal(&[(0, 4)]));
    }

    #[test]
    fn test_size() {
        let d = Domain::from_extents([ParametricExpr::param("H"), ParametricExpr::param("W")]);
        let size = d.size().unwrap();
        let env = HashMap::from([("H".to_string(), 480), ("W".to_string(), 640)]);
        assert_eq!(size.evaluate(&env).unwrap(), 480 * 640);
        assert_eq!(Domain::scalar().size(), Some(ParametricExpr::int(1)));
    }

    #[test]
    fn test_count_and_params() {
        let d = Domain::new(vec![
            RangeCoeff::new(ParametricExpr::int(2), ParametricExpr::param("N")),
            RangeCoeff::new(ParametricExpr::param("M"), ParametricExpr::int(0)),
        ]);
        assert_eq!(d.params().into_iter().collect::<Vec<_>>(), vec!["M".to_string(), "N".to_string()]);
        let env = HashMap::from([("N".to_string(), 5), ("M".to_string(), -1)]);
        assert_eq!(d.count(&env).unwrap(), 4 * 2);
        // an inverted range is empty
        let env = HashMap::from([("N".to_string(), 1), ("M".to_string(), -1)]);
        assert_eq!(d.count(&env).unwrap(), 0);
        assert!(Domain::unconstrained(1).count(&HashMap::new()).is_err());
    }

    #[test]
    fn test_disjoint() {
        let a = Domain::literal(&[(0, 4), (0, 4)]);
        let b = Domain::literal(&[(5, 9), (0, 4)]);
        let c = Domain::literal(&[(4, 9), (4, 9)]);
        assert_eq!(a.disjoint_from(&b), Some(true));
        assert_eq!(a.disjoint_from(&c), Some(false));
        let sym = Domain::from_extents([ParametricExpr::param("N"), ParametricExpr::param("N")]);
        assert_eq!(a.disjoint_from(&sym), None);
    }
}
