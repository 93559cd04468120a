//! Utility modules for the stencil compiler.
//!
//! This module contains common utilities used throughout the codebase:
//! - Error types
//! - Pretty printing and code formatting

pub mod errors;
pub mod pretty;

// Re-exports
pub use errors::*;
pub use pretty::{CodeFormatter, PrettyPrint};
