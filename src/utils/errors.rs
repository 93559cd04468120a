//! Error types for the stencil compiler.
//!
//! This module defines all error types used throughout the compiler,
//! organized by the kind of failure. Every error is fatal: an inconsistency
//! anywhere risks emitting a numerically wrong kernel.

use thiserror::Error;
use std::fmt;

/// Top-level error type for the compiler.
#[derive(Error, Debug)]
pub enum StencilError {
    /// A compiler invariant was violated
    #[error("Internal error: {0}")]
    Internal(#[from] InternalError),

    /// The input program is inconsistent
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// Error during code generation
    #[error("Code generation error: {0}")]
    Codegen(#[from] CodegenError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A compiler-invariant violation.
#[derive(Error, Debug, Clone)]
pub struct InternalError {
    /// The kind of violation
    pub kind: InternalErrorKind,
    /// The error message, naming the offending construct
    pub message: String,
}

impl InternalError {
    pub fn new(kind: InternalErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for InternalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalErrorKind {
    /// A node kind reached a pass that cannot handle it
    UnhandledVariant,
    /// Argument or domain dimensionality disagrees
    ArityMismatch,
    /// No padding value can be synthesized for an element type
    UnsupportedInitializer,
    /// A node was used before inference annotated it
    MissingAnnotation,
}

/// An inconsistency in the user's program.
#[derive(Error, Debug, Clone)]
pub struct ModelError {
    /// The kind of error
    pub kind: ModelErrorKind,
    /// The function the error was found in
    pub function: String,
    /// The error message
    pub message: String,
}

impl ModelError {
    pub fn new(kind: ModelErrorKind, function: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            function: function.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in function `{}`", self.message, self.function)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelErrorKind {
    /// Arguments or operands with inconsistent dimensionality
    DimensionMismatch,
    /// Reads of one argument disagree on scale, or use a non-positive scale
    InconsistentAccess,
    /// Reference to an undefined function
    UndefinedFunction,
    /// Reference to an undefined value or argument
    UndefinedValue,
    /// Reference to an undefined struct type or field
    UndefinedStruct,
    /// Two piecewise definitions of one value overlap
    OverlappingDefinition,
    /// Element types that cannot be combined
    TypeMismatch,
    /// Wrong number of call arguments
    ArgumentCount,
    /// The program names no usable pipeline entry point
    MissingEntryPoint,
    /// A function calls itself, directly or indirectly
    RecursiveCall,
    /// Two definitions share one name
    DuplicateDefinition,
    /// A boundary policy on an argument that cannot be padded
    InvalidPolicy,
    /// Piecewise definitions leave indices inside their bounding box unwritten
    IncompleteDefinition,
    /// A domain bound names a parameter the program does not declare
    UndefinedParameter,
}

/// Error during code generation.
#[derive(Error, Debug, Clone)]
pub struct CodegenError {
    /// The error message
    pub message: String,
    /// The kind of codegen error
    pub kind: CodegenErrorKind,
}

impl CodegenError {
    pub fn new(kind: CodegenErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodegenErrorKind {
    /// A domain bound is still unconstrained at emission time
    UnboundedDomain,
    /// A value has no resolved element type
    UnresolvedType,
    /// Boundary policy left unlowered
    UnloweredBoundary,
}

/// Result type using StencilError.
pub type StencilResult<T> = Result<T, StencilError>;
