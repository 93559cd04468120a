//! Boundary-condition lowering.
//!
//! A stencil call argument with a padding policy is replaced by an explicit
//! piecewise array covering the argument's domain grown by the call's halo:
//!
//! ```text
//! blur3(x : mirror)      x on [0..N-1], halo [-1, +1]
//!
//! compose {
//!   [0..N-1]       : x
//!   [-1..-1]       : x sampled at 1
//!   [N..N]         : x sampled at N-2
//! }
//! ```
//!
//! In more than one dimension the margin pieces are the cartesian product
//! of per-dimension {below, interior, above} slots, so corners are covered
//! exactly once. Mirror and wrap margins take one slot per index; clamped,
//! extended and constant margins take one slot per side. After lowering
//! every policy is `None`, which makes the pass idempotent.

use crate::analysis::halo::compute_hull;
use crate::analysis::infer::{annotation, sample_domain};
use crate::context::CompileContext;
use crate::domain::{Domain, OffsetHull, ParametricExpr, RangeCoeff};
use crate::ir::ast::*;
use crate::transform::Transform;
use crate::utils::errors::{InternalError, InternalErrorKind, ModelError, ModelErrorKind};
use crate::visit::{fold_walk_fn_call, Folder};
use anyhow::Result;
use log::debug;
use std::slice;

/// Pads every bounded stencil argument.
pub struct BoundaryLowering<'a> {
    ctx: &'a CompileContext,
}

impl<'a> BoundaryLowering<'a> {
    pub fn new(ctx: &'a CompileContext) -> Self {
        Self { ctx }
    }
}

impl Transform for BoundaryLowering<'_> {
    fn apply(&self, pipeline: VectorFnDefn) -> Result<VectorFnDefn> {
        let mut folder = PadFolder { ctx: self.ctx };
        folder.fold_vector(pipeline)
    }

    fn name(&self) -> &str {
        "boundary-lowering"
    }
}

/// Position of a band of margin indices relative to a dimension's range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Interior,
    /// From `near` to `far` indices below the lower bound
    Below(i64, i64),
    /// From `near` to `far` indices above the upper bound
    Above(i64, i64),
}

/// Margin slots of one dimension for `policy`.
fn margin_slots(policy: BoundaryPolicy, below: i64, above: i64) -> Vec<Slot> {
    let mut slots = vec![Slot::Interior];
    match policy {
        BoundaryPolicy::Mirror | BoundaryPolicy::Wrap => {
            slots.extend((1..=below).map(|k| Slot::Below(k, k)));
            slots.extend((1..=above).map(|k| Slot::Above(k, k)));
        }
        _ => {
            if below > 0 {
                slots.push(Slot::Below(1, below));
            }
            if above > 0 {
                slots.push(Slot::Above(1, above));
            }
        }
    }
    slots
}

fn shift(e: &ParametricExpr, delta: i64) -> ParametricExpr {
    match delta {
        0 => e.clone(),
        d if d > 0 => e.clone() + ParametricExpr::int(d),
        d => e.clone() - ParametricExpr::int(-d),
    }
}

/// Index of the argument element that supplies margin `slot`, or `None`
/// for the interior. Mirror and wrap slots are single indices.
fn source_index(policy: BoundaryPolicy, slot: Slot, lower: &ParametricExpr, upper: &ParametricExpr) -> Option<ParametricExpr> {
    match (slot, policy) {
        (Slot::Interior, _) => None,
        (Slot::Below(..), BoundaryPolicy::Clamped | BoundaryPolicy::Extend) => Some(lower.clone()),
        (Slot::Above(..), BoundaryPolicy::Clamped | BoundaryPolicy::Extend) => Some(upper.clone()),
        // lb - k + extent
        (Slot::Below(k, _), BoundaryPolicy::Wrap) => Some(shift(upper, 1 - k)),
        (Slot::Above(k, _), BoundaryPolicy::Wrap) => Some(shift(lower, k - 1)),
        (Slot::Below(k, _), BoundaryPolicy::Mirror) => Some(shift(lower, k)),
        (Slot::Above(k, _), BoundaryPolicy::Mirror) => Some(shift(upper, -k)),
        // constants never sample
        (_, BoundaryPolicy::None | BoundaryPolicy::Constant(_)) => None,
    }
}

fn slot_range(slot: Slot, lower: &ParametricExpr, upper: &ParametricExpr) -> RangeCoeff {
    match slot {
        Slot::Interior => RangeCoeff::new(lower.clone(), upper.clone()),
        Slot::Below(near, far) => RangeCoeff::new(shift(lower, -far), shift(lower, -near)),
        Slot::Above(near, far) => RangeCoeff::new(shift(upper, near), shift(upper, far)),
    }
}

struct PadFolder<'a> {
    ctx: &'a CompileContext,
}

impl PadFolder<'_> {
    /// The padding literal as a value of element type `ty`.
    fn constant_value(&self, ty: &ElemType, lit: Literal, target: &str, position: usize) -> Result<VecExpr> {
        let value = match ty {
            ElemType::Struct(name) => {
                let defn = self.ctx.find_struct(name).ok_or_else(|| {
                    InternalError::new(
                        InternalErrorKind::UnsupportedInitializer,
                        format!("argument {} of `{}` has unknown struct type `{}`", position, target, name),
                    )
                })?;
                let mut fields = Vec::with_capacity(defn.fields.len());
                for field in &defn.fields {
                    if !field.ty.is_numeric() {
                        return Err(InternalError::new(
                            InternalErrorKind::UnsupportedInitializer,
                            format!(
                                "argument {} of `{}`: no constant initializer for field `{}.{}` of type `{}`",
                                position, target, name, field.name, field.ty
                            ),
                        )
                        .into());
                    }
                    fields.push(Expr {
                        kind: ExprKind::Value(lit),
                        ty: Some(field.ty.clone()),
                    });
                }
                Expr {
                    kind: ExprKind::StructLiteral {
                        ty: name.clone(),
                        fields,
                    },
                    ty: Some(ty.clone()),
                }
            }
            _ => Expr {
                kind: ExprKind::Value(lit),
                ty: Some(ty.clone()),
            },
        };
        Ok(VecExpr::annotated(VecExprKind::Scalar(value), ty.clone(), Domain::scalar()))
    }

    fn pad_argument(
        &self,
        target: &str,
        position: usize,
        value: VecExpr,
        policy: BoundaryPolicy,
        hull: &OffsetHull,
    ) -> Result<VecExpr> {
        let (ty, domain) = annotation(&value)?;
        if domain.n_dim() != hull.n_dim() {
            return Err(InternalError::new(
                InternalErrorKind::ArityMismatch,
                format!("argument {} of `{}` on {} padded by {}-d hull {}", position, target, domain, hull.n_dim(), hull),
            )
            .into());
        }

        let mut bounds = Vec::with_capacity(domain.n_dim());
        let mut slots: Vec<Vec<Slot>> = Vec::with_capacity(domain.n_dim());
        let mut extended = domain.clone();
        for (dim, (range, h)) in domain.ranges.iter().zip(&hull.dims).enumerate() {
            let (lower, upper) = match range {
                RangeCoeff::Range { lower, upper } => (lower.clone(), upper.clone()),
                RangeCoeff::Unconstrained => {
                    return Err(InternalError::new(
                        InternalErrorKind::UnhandledVariant,
                        format!("argument {} of `{}` is unbounded in dimension {}", position, target, dim),
                    )
                    .into())
                }
            };
            let (below, above) = h.margins();
            if let Some(extent) = range.extent().and_then(|e| e.as_int()) {
                let limit = match policy {
                    BoundaryPolicy::Mirror => extent - 1,
                    BoundaryPolicy::Wrap => extent,
                    _ => i64::MAX,
                };
                if below > limit || above > limit {
                    return Err(ModelError::new(
                        ModelErrorKind::InvalidPolicy,
                        target,
                        format!(
                            "argument {} has extent {} in dimension {}, too small for a {} margin of {}",
                            position,
                            extent,
                            dim,
                            policy,
                            below.max(above)
                        ),
                    )
                    .into());
                }
            }
            slots.push(margin_slots(policy, below, above));
            bounds.push((lower, upper));
            extended.extend(dim, below, above);
        }

        let mut pieces = vec![ComposePiece {
            key: PieceKey::Region(domain.clone()),
            value: value.clone(),
        }];
        for combo in cartesian(&slots) {
            if combo.iter().all(|s| *s == Slot::Interior) {
                continue;
            }
            let region = Domain::new(
                combo
                    .iter()
                    .zip(&bounds)
                    .map(|(slot, (lower, upper))| slot_range(*slot, lower, upper))
                    .collect(),
            );
            let piece = match policy {
                BoundaryPolicy::Constant(lit) => self.constant_value(&ty, lit, target, position)?,
                _ => {
                    let at: Vec<Option<ParametricExpr>> = combo
                        .iter()
                        .zip(&bounds)
                        .map(|(slot, (lower, upper))| source_index(policy, *slot, lower, upper))
                        .collect();
                    let sampled = sample_domain(&domain, &at);
                    VecExpr::annotated(
                        VecExprKind::Sample {
                            base: Box::new(value.clone()),
                            at,
                        },
                        ty.clone(),
                        sampled,
                    )
                }
            };
            pieces.push(ComposePiece {
                key: PieceKey::Region(region),
                value: piece,
            });
        }

        debug!(
            "Padded argument {} of `{}` with {}: {} piece(s) on {}",
            position,
            target,
            policy,
            pieces.len(),
            extended
        );
        Ok(VecExpr::annotated(VecExprKind::Compose(pieces), ty, extended))
    }
}

/// Every combination of one slot per dimension, first dimension outermost.
fn cartesian(slots: &[Vec<Slot>]) -> Vec<Vec<Slot>> {
    let mut out: Vec<Vec<Slot>> = vec![Vec::new()];
    for dim_slots in slots {
        out = out
            .into_iter()
            .flat_map(|prefix| {
                dim_slots.iter().map(move |s| {
                    let mut next = prefix.clone();
                    next.push(*s);
                    next
                })
            })
            .collect();
    }
    out
}

impl Folder for PadFolder<'_> {
    type Error = anyhow::Error;

    fn fold_fn_call(&mut self, call: FnCall) -> Result<FnCall> {
        let mut call = fold_walk_fn_call(self, call)?;
        let ctx = self.ctx;
        // vector-function arguments never carry a policy
        let Some(info) = ctx.stencil(&call.target) else {
            return Ok(call);
        };

        let args = std::mem::take(&mut call.args);
        let mut lowered = Vec::with_capacity(args.len());
        for (position, a) in args.into_iter().enumerate() {
            if !a.policy.needs_padding() {
                lowered.push(a);
                continue;
            }
            let pattern = info.patterns.get(position).cloned().flatten();
            let hull = compute_hull(slice::from_ref(&a), slice::from_ref(&pattern), None, false)?;
            let value = if hull.is_zero() {
                a.value
            } else {
                self.pad_argument(&call.target, position, a.value, a.policy, &hull)?
            };
            lowered.push(CallArg {
                value,
                policy: BoundaryPolicy::None,
            });
        }
        call.args = lowered;
        Ok(call)
    }
}
