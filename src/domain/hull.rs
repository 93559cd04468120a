//! Access patterns and offset hulls.
//!
//! An [`AccessPattern`] records, per dimension, the extreme relative offsets
//! at which a stencil function reads one of its array arguments, together
//! with the (single) scale of those reads. Normalizing it by the scale gives
//! an [`OffsetHull`] in the index space of the stencil's output.

use super::expr::{ceil_div, ParametricExpr};
use super::func::{DomainFn, DomainFnDim};
use super::range::{Domain, RangeCoeff};
use crate::utils::errors::InternalError;
use num_integer::Integer;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Extremal read offsets of one argument in one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDim {
    pub min_offset: i64,
    pub max_offset: i64,
    pub scale: i64,
}

/// Reads of one array argument, widened over every access site.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccessPattern {
    pub dims: Vec<AccessDim>,
}

/// Why an access could not be recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessConflict {
    /// Dimensionality differs from earlier reads.
    Arity { expected: usize, found: usize },
    /// Two reads disagree on the scale of one dimension.
    Scale { dim: usize, expected: i64, found: i64 },
    /// A zero or negative scale.
    BadScale { dim: usize, scale: i64 },
}

impl AccessPattern {
    /// An empty pattern; the first recorded read fixes the arity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pattern of a single read.
    pub fn from_fn(f: &DomainFn) -> Result<Self, AccessConflict> {
        let mut p = Self::new();
        p.record(f)?;
        Ok(p)
    }

    pub fn n_dim(&self) -> usize {
        self.dims.len()
    }

    /// Widen the pattern with one more read.
    pub fn record(&mut self, f: &DomainFn) -> Result<(), AccessConflict> {
        for (dim, d) in f.dims.iter().enumerate() {
            if d.scale <= 0 {
                return Err(AccessConflict::BadScale { dim, scale: d.scale });
            }
        }
        if self.dims.is_empty() {
            self.dims = f
                .dims
                .iter()
                .map(|d| AccessDim {
                    min_offset: d.offset,
                    max_offset: d.offset,
                    scale: d.scale,
                })
                .collect();
            return Ok(());
        }
        if self.dims.len() != f.n_dim() {
            return Err(AccessConflict::Arity {
                expected: self.dims.len(),
                found: f.n_dim(),
            });
        }
        for (dim, (acc, d)) in self.dims.iter_mut().zip(&f.dims).enumerate() {
            if acc.scale != d.scale {
                return Err(AccessConflict::Scale {
                    dim,
                    expected: acc.scale,
                    found: d.scale,
                });
            }
            acc.min_offset = acc.min_offset.min(d.offset);
            acc.max_offset = acc.max_offset.max(d.offset);
        }
        Ok(())
    }

    /// Offsets divided by the scale, rounded away from the origin, and
    /// clamped so the hull always contains offset zero.
    pub fn normalized(&self) -> OffsetHull {
        OffsetHull {
            dims: self
                .dims
                .iter()
                .map(|d| HullDim {
                    max_negative: d.min_offset.div_floor(&d.scale).min(0),
                    max_positive: ceil_div(d.max_offset, d.scale).max(0),
                    scale: d.scale,
                })
                .collect(),
        }
    }

    /// Output indices `i` for which every read `scale*i + offset` of an
    /// argument defined on `domain` stays in range.
    pub fn interior(&self, domain: &Domain) -> Domain {
        let ranges = domain
            .ranges
            .iter()
            .zip(&self.dims)
            .map(|(range, d)| match range {
                RangeCoeff::Range { lower, upper } => {
                    let scale = ParametricExpr::int(d.scale);
                    RangeCoeff::Range {
                        lower: ParametricExpr::ceil(
                            lower.clone() - ParametricExpr::int(d.min_offset),
                            scale.clone(),
                        ),
                        upper: ParametricExpr::div(
                            upper.clone() - ParametricExpr::int(d.max_offset),
                            scale,
                        ),
                    }
                }
                RangeCoeff::Unconstrained => RangeCoeff::Unconstrained,
            })
            .collect();
        Domain::new(ranges)
    }

    /// The argument domain re-expressed in output index space, ignoring the
    /// halo. Used for arguments whose out-of-range reads are padded.
    pub fn natural(&self, domain: &Domain) -> Result<Domain, InternalError> {
        let f = DomainFn::new(self.dims.iter().map(|d| DomainFnDim::new(0, d.scale)).collect());
        let mut out = domain.clone();
        out.realign_domain(&f)?;
        Ok(out)
    }
}

/// Halo of one dimension in the caller's index space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HullDim {
    /// Most negative relative offset (<= 0)
    pub max_negative: i64,
    /// Most positive relative offset (>= 0)
    pub max_positive: i64,
    /// Scale the offsets were normalized by
    pub scale: i64,
}

impl HullDim {
    pub fn zero() -> Self {
        Self {
            max_negative: 0,
            max_positive: 0,
            scale: 1,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.max_negative == 0 && self.max_positive == 0
    }

    /// Widen to cover `other` as well. An empty hull adopts `other`'s scale.
    pub fn widen(&mut self, other: &HullDim) {
        if self.is_zero() {
            self.scale = other.scale;
        }
        self.max_negative = self.max_negative.min(other.max_negative);
        self.max_positive = self.max_positive.max(other.max_positive);
    }

    /// Margins in the argument's own index space: `(below, above)`.
    pub fn margins(&self) -> (i64, i64) {
        (-self.max_negative * self.scale, self.max_positive * self.scale)
    }
}

/// Per-dimension halo.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OffsetHull {
    pub dims: Vec<HullDim>,
}

impl OffsetHull {
    pub fn zero(n_dim: usize) -> Self {
        Self {
            dims: vec![HullDim::zero(); n_dim],
        }
    }

    pub fn n_dim(&self) -> usize {
        self.dims.len()
    }

    pub fn is_zero(&self) -> bool {
        self.dims.iter().all(HullDim::is_zero)
    }
}

impl fmt::Display for OffsetHull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .dims
            .iter()
            .map(|d| format!("[{}, +{}]/{}", d.max_negative, d.max_positive, d.scale))
            .collect();
        write!(f, "{}", parts.join(" x "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_widens() {
        let mut p = AccessPattern::new();
        p.record(&DomainFn::offsets(&[-1, 0])).unwrap();
        p.record(&DomainFn::offsets(&[1, 2])).unwrap();
        assert_eq!(p.dims[0].min_offset, -1);
        assert_eq!(p.dims[0].max_offset, 1);
        assert_eq!(p.dims[1].min_offset, 0);
        assert_eq!(p.dims[1].max_offset, 2);
    }

    #[test]
    fn test_scale_conflict() {
        let mut p = AccessPattern::from_fn(&DomainFn::scaled(&[(0, 2)])).unwrap();
        let err = p.record(&DomainFn::scaled(&[(0, 1)])).unwrap_err();
        assert_eq!(err, AccessConflict::Scale { dim: 0, expected: 2, found: 1 });
        assert!(AccessPattern::from_fn(&DomainFn::scaled(&[(0, 0)])).is_err());
    }

    #[test]
    fn test_downsample_hull_normalizes() {
        let mut p = AccessPattern::new();
        for off in -2..=2 {
            p.record(&DomainFn::scaled(&[(off, 2)])).unwrap();
        }
        let hull = p.normalized();
        assert_eq!(hull.dims[0].max_negative, -1);
        assert_eq!(hull.dims[0].max_positive, 1);
        assert_eq!(hull.dims[0].margins(), (2, 2));
    }

    #[test]
    fn test_one_sided_hull_contains_zero() {
        let p = AccessPattern::from_fn(&DomainFn::offsets(&[2])).unwrap();
        let hull = p.normalized();
        assert_eq!(hull.dims[0].max_negative, 0);
        assert_eq!(hull.dims[0].max_positive, 2);
    }

    #[test]
    fn test_interior() {
        let mut p = AccessPattern::new();
        p.record(&DomainFn::offsets(&[-1])).unwrap();
        p.record(&DomainFn::offsets(&[1])).unwrap();
        let d = p.interior(&Domain::literal(&[(0, 9)]));
        assert_eq!(d, Domain::literal(&[(1, 8)]));

        let mut q = AccessPattern::new();
        for off in -2..=2 {
            q.record(&DomainFn::scaled(&[(off, 2)])).unwrap();
        }
        assert_eq!(q.interior(&Domain::literal(&[(0, 15)])), Domain::literal(&[(1, 6)]));
        assert_eq!(q.natural(&Domain::literal(&[(0, 15)])).unwrap(), Domain::literal(&[(0, 7)]));
    }
}
