//! Rewriting passes over annotated pipelines.

pub mod boundary;

pub use boundary::BoundaryLowering;

use crate::context::CompileContext;
use crate::ir::ast::VectorFnDefn;
use anyhow::Result;
use log::debug;

/// Replace every padded call argument with an explicit piecewise array.
pub fn lower_boundaries(ctx: &CompileContext, pipeline: VectorFnDefn) -> Result<VectorFnDefn> {
    run_pass(&BoundaryLowering::new(ctx), pipeline)
}

/// Transformation pass trait.
pub trait Transform {
    /// Apply the transformation, returning the rewritten pipeline.
    fn apply(&self, pipeline: VectorFnDefn) -> Result<VectorFnDefn>;

    /// Get transformation name.
    fn name(&self) -> &str;
}

fn run_pass(pass: &dyn Transform, pipeline: VectorFnDefn) -> Result<VectorFnDefn> {
    debug!("Running pass `{}` on `{}`", pass.name(), pipeline.name);
    pass.apply(pipeline)
}
