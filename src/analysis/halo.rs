//! Offset (halo) inference.
//!
//! The halo of a stencil call is the box of relative offsets, in the call's
//! own index space, that its reads can reach. Lowering uses it to size the
//! padding of bounded arguments; code generation reports it per loop nest.

use crate::context::CompileContext;
use crate::domain::{AccessPattern, DomainFn, HullDim, OffsetHull};
use crate::ir::ast::{CallArg, FnCall};
use crate::utils::errors::{InternalError, InternalErrorKind};
use num_integer::Integer;

/// Combine the access patterns of a call's array arguments into one hull.
///
/// The hull starts at zero, or at the offsets of `output_fn` when given
/// (rounded away from zero), and is widened by the normalized pattern of
/// each argument. With `exclude_bounded`, arguments whose boundary policy
/// pads out-of-range reads do not contribute.
pub fn compute_hull(
    args: &[CallArg],
    patterns: &[Option<AccessPattern>],
    output_fn: Option<&DomainFn>,
    exclude_bounded: bool,
) -> Result<OffsetHull, InternalError> {
    if args.len() != patterns.len() {
        return Err(InternalError::new(
            InternalErrorKind::ArityMismatch,
            format!("{} call argument(s) against {} access pattern(s)", args.len(), patterns.len()),
        ));
    }

    let mut hull: Option<OffsetHull> = output_fn.map(|f| OffsetHull {
        dims: f
            .dims
            .iter()
            .map(|d| HullDim {
                max_negative: d.offset.div_floor(&d.scale).min(0),
                max_positive: crate::domain::expr::ceil_div(d.offset, d.scale).max(0),
                scale: d.scale,
            })
            .collect(),
    });

    for (arg, pattern) in args.iter().zip(patterns) {
        let Some(pattern) = pattern else { continue };
        if exclude_bounded && arg.policy.needs_padding() {
            continue;
        }
        let normalized = pattern.normalized();
        let acc = hull.get_or_insert_with(|| OffsetHull::zero(normalized.n_dim()));
        if acc.n_dim() != normalized.n_dim() {
            return Err(InternalError::new(
                InternalErrorKind::ArityMismatch,
                format!("widening {}-d hull {} with {}-d pattern", acc.n_dim(), acc, normalized.n_dim()),
            ));
        }
        for (d, other) in acc.dims.iter_mut().zip(&normalized.dims) {
            d.widen(other);
        }
    }

    Ok(hull.unwrap_or_default())
}

/// Halo of a stencil call site; `None` for calls of vector functions.
pub fn call_hull(
    ctx: &CompileContext,
    call: &FnCall,
    exclude_bounded: bool,
) -> Result<Option<OffsetHull>, InternalError> {
    match ctx.stencil(&call.target) {
        Some(info) => compute_hull(&call.args, &info.patterns, None, exclude_bounded).map(Some),
        None => Ok(None),
    }
}
