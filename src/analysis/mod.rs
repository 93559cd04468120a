//! Analysis passes over stencil programs.

pub mod stencil;
pub mod halo;
pub mod infer;

pub use stencil::{analyze_stencil, StencilInfo};
pub use halo::{call_hull, compute_hull};
pub use infer::{infer_pipeline, sample_domain, ValueEntry, ValueTable};
