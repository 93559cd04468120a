//! # stencilc - Stencil Pipeline Compiler
//!
//! An ahead-of-time compiler for a small stencil language. Programs describe
//! per-pixel stencil kernels and whole-array pipeline stages (blur, pyramid
//! up/down-sampling, edge detection, HDR fusion, camera ISPs); the compiler
//! lowers them to flat, boundary-safe C functions:
//! - Symbolic domain inference over named size parameters
//! - Halo (offset hull) inference per call site
//! - Boundary-condition lowering into piecewise compose definitions
//! - C code generation with interior loops free of bounds checks
//!
//! ## Architecture
//!
//! ```text
//! Program → Context → Domain Inference → Boundary Lowering → CodeGen → C
//! ```
//!
//! ## Example
//!
//! ```rust
//! use stencilc::ir::builder::*;
//! use stencilc::ir::ElemType;
//! use stencilc::domain::ParametricExpr;
//!
//! let blur = stencil("blur3", vec![array_arg("x", ElemType::Float, 1)], ElemType::Float)
//!     .returns(div(add(add(read("x", &[-1]), read("x", &[0])), read("x", &[1])), float(3.0)));
//! let pipeline = vector(
//!     "pipeline",
//!     vec![sized_arg("input", ElemType::Float, vec![ParametricExpr::param("N")])],
//!     ElemType::Float,
//! )
//! .returns(call("blur3", vec![arg(vid("input"))]));
//! let program = program("pipeline").with_param("N").with_stencil(blur).with_vector(pipeline);
//!
//! let kernel = stencilc::compile(&program, &stencilc::CompileConfig::default()).unwrap();
//! assert!(kernel.source.contains("void kernel(float* input, int N, float* output)"));
//! ```

#![warn(clippy::all)]

pub mod domain;
pub mod ir;
pub mod visit;
pub mod context;
pub mod analysis;
pub mod transform;
pub mod codegen;
pub mod utils;

// Re-export commonly used types
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::domain::{
        AccessPattern, Domain, DomainFn, OffsetHull, ParametricExpr, RangeCoeff,
    };
    pub use crate::ir::ast::*;
    pub use crate::context::CompileContext;
    pub use crate::codegen::{CompiledKernel, Target};
    pub use crate::visit::{Folder, Visitor};
    pub use crate::utils::errors::*;
    pub use crate::{compile, CompileConfig};
}

use anyhow::{Context, Result};
use log::{debug, info, warn};

/// Configuration for one compilation.
#[derive(Debug, Clone)]
pub struct CompileConfig {
    /// Name of the emitted C function
    pub kernel_name: String,
    /// Name of the emitted header; the source unit includes it
    pub header_file_name: String,
    /// DOT graph output; accepted for compatibility, not produced
    pub dot_file_name: Option<String>,
    /// Code generation target
    pub target: codegen::Target,
    /// Verbosity level (0-3)
    pub verbosity: u8,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            kernel_name: "kernel".to_string(),
            header_file_name: "kernel.h".to_string(),
            dot_file_name: None,
            target: codegen::Target::C,
            verbosity: 1,
        }
    }
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Parse a program from its JSON serialization.
pub fn load_program(json: &str) -> Result<ir::Program> {
    serde_json::from_str(json).context("Failed to deserialize program")
}

/// Infer domains and lower boundary conditions, returning the annotated
/// pipeline entry point without generating code.
pub fn lower(ctx: &CompileContext) -> Result<ir::VectorFnDefn> {
    let pipeline = analysis::infer_pipeline(ctx).context("Domain inference failed")?;
    transform::lower_boundaries(ctx, pipeline).context("Boundary lowering failed")
}

/// Run the full pipeline: context, inference, lowering, code generation.
pub fn compile(program: &ir::Program, config: &CompileConfig) -> Result<codegen::CompiledKernel> {
    if let Some(ref dot) = config.dot_file_name {
        warn!("DOT export is not supported; ignoring {}", dot);
    }

    info!("Building compilation context for entry `{}`", program.entry);
    let ctx = CompileContext::new(program, config.clone())?;

    let pipeline = lower(&ctx)?;
    debug!("Lowered pipeline result domain: {:?}", pipeline.result.domain);

    info!("Generating code for `{}`", config.kernel_name);
    codegen::generate(&ctx, &pipeline)
}

pub use context::CompileContext;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_default_config() {
        let config = CompileConfig::default();
        assert_eq!(config.kernel_name, "kernel");
        assert_eq!(config.target, codegen::Target::C);
    }
}
