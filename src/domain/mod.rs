//! Symbolic index-space model.
//!
//! This module provides the arithmetic every pass relies on:
//! - Parametric integer expressions over global parameters
//! - Per-dimension ranges and domains
//! - Affine domain functions (offset/scale remaps)
//! - Access patterns and offset hulls

pub mod expr;
pub mod range;
pub mod func;
pub mod hull;

pub use expr::ParametricExpr;
pub use range::{Domain, RangeCoeff};
pub use func::{DomainFn, DomainFnDim};
pub use hull::{AccessConflict, AccessDim, AccessPattern, HullDim, OffsetHull};
