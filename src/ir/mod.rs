//! Program representation.
//!
//! - `ast`: the node set (scalar and vector expressions, functions, program)
//! - `builder`: constructors for building programs in Rust
//! - `print`: human-readable dumps of annotated trees

pub mod ast;
pub mod builder;
pub mod print;

pub use ast::*;
