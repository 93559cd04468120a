//! Abstract Syntax Tree (AST) for the stencil language.
//!
//! A program is a set of *stencil* functions (pointwise kernels that compute
//! one output element from a fixed neighbourhood of their array arguments)
//! and *vector* functions (pipeline stages that assemble whole arrays from
//! stencil calls and piecewise definitions). One vector function is the
//! pipeline entry point.
//!
//! Nodes are built once by the front end, annotated in place by domain
//! inference (`ty`, `domain`), and rewritten by boundary lowering.

use crate::domain::{Domain, DomainFn, ParametricExpr};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type of a scalar value or array.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElemType {
    /// 32-bit integer
    Int,
    /// 32-bit floating point
    Float,
    /// 64-bit floating point
    Double,
    /// User aggregate, by name
    Struct(String),
}

impl ElemType {
    /// Check if this is a numeric type.
    pub fn is_numeric(&self) -> bool {
        !matches!(self, ElemType::Struct(_))
    }

    /// Arithmetic promotion: `int < float < double`.
    pub fn promote(&self, other: &ElemType) -> Option<ElemType> {
        match (self, other) {
            (ElemType::Struct(a), ElemType::Struct(b)) if a == b => Some(self.clone()),
            (ElemType::Struct(_), _) | (_, ElemType::Struct(_)) => None,
            (ElemType::Double, _) | (_, ElemType::Double) => Some(ElemType::Double),
            (ElemType::Float, _) | (_, ElemType::Float) => Some(ElemType::Float),
            _ => Some(ElemType::Int),
        }
    }

    /// The C spelling of this type.
    pub fn c_name(&self) -> &str {
        match self {
            ElemType::Int => "int",
            ElemType::Float => "float",
            ElemType::Double => "double",
            ElemType::Struct(name) => name,
        }
    }
}

impl fmt::Display for ElemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.c_name())
    }
}

/// A literal value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    Float(f64),
}

impl Literal {
    pub fn is_zero(&self) -> bool {
        match self {
            Literal::Int(v) => *v == 0,
            Literal::Float(v) => *v == 0.0,
        }
    }

    pub fn elem_type(&self) -> ElemType {
        match self {
            Literal::Int(_) => ElemType::Int,
            Literal::Float(_) => ElemType::Float,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(v) => write!(f, "{}", v),
            Literal::Float(v) if v.fract() == 0.0 && v.is_finite() => write!(f, "{:.1}", v),
            Literal::Float(v) => write!(f, "{}", v),
        }
    }
}

/// A user aggregate type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructDefn {
    pub name: String,
    pub fields: Vec<StructField>,
}

impl StructDefn {
    pub fn field(&self, name: &str) -> Option<&StructField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructField {
    pub name: String,
    pub ty: ElemType,
}

/// A named integer symbol bound at the generated function boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalParam {
    pub name: String,
}

/// A complete program.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    /// Aggregate type definitions
    #[serde(default)]
    pub structs: Vec<StructDefn>,
    /// Pointwise kernels
    #[serde(default)]
    pub stencils: Vec<StencilFnDefn>,
    /// Pipeline stages
    #[serde(default)]
    pub vectors: Vec<VectorFnDefn>,
    /// Name of the vector function that is the pipeline entry point
    pub entry: String,
    /// Global parameter table
    #[serde(default)]
    pub params: Vec<GlobalParam>,
}

impl Program {
    /// Find a stencil function by name.
    pub fn find_stencil(&self, name: &str) -> Option<&StencilFnDefn> {
        self.stencils.iter().find(|f| f.name == name)
    }

    /// Find a vector function by name.
    pub fn find_vector(&self, name: &str) -> Option<&VectorFnDefn> {
        self.vectors.iter().find(|f| f.name == name)
    }

    /// Find a struct definition by name.
    pub fn find_struct(&self, name: &str) -> Option<&StructDefn> {
        self.structs.iter().find(|s| s.name == name)
    }
}

/// A formal argument of a stencil or vector function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FnArg {
    pub name: String,
    pub ty: ElemType,
    /// 0 for scalars
    pub n_dim: usize,
    /// Declared domain. Required for array arguments of the entry point;
    /// other functions take it from the call site.
    #[serde(default)]
    pub domain: Option<Domain>,
}

impl FnArg {
    pub fn is_array(&self) -> bool {
        self.n_dim > 0
    }
}

/// `let name = value;` inside a stencil body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StencilStmt {
    pub name: String,
    #[serde(default)]
    pub ty: Option<ElemType>,
    pub value: Expr,
}

/// A pointwise kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StencilFnDefn {
    pub name: String,
    pub args: Vec<FnArg>,
    pub ret: ElemType,
    #[serde(default)]
    pub body: Vec<StencilStmt>,
    pub result: Expr,
}

impl StencilFnDefn {
    pub fn arg(&self, name: &str) -> Option<(usize, &FnArg)> {
        self.args.iter().enumerate().find(|(_, a)| a.name == name)
    }
}

/// `target[region] = value;` inside a vector body. Several statements may
/// define disjoint regions of the same target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VecStmt {
    pub target: String,
    /// Sub-domain written; the whole value domain when absent
    #[serde(default)]
    pub region: Option<Domain>,
    pub value: VecExpr,
    /// Region actually written, set by inference
    #[serde(default)]
    pub domain: Option<Domain>,
}

/// A pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorFnDefn {
    pub name: String,
    pub args: Vec<FnArg>,
    pub ret: ElemType,
    #[serde(default)]
    pub body: Vec<VecStmt>,
    pub result: VecExpr,
}

impl VectorFnDefn {
    pub fn arg(&self, name: &str) -> Option<&FnArg> {
        self.args.iter().find(|a| a.name == name)
    }
}

/// A scalar expression (stencil bodies).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    /// Element type, resolved during inference
    #[serde(default)]
    pub ty: Option<ElemType>,
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Self { kind, ty: None }
    }

    /// Check if this is a literal.
    pub fn as_literal(&self) -> Option<Literal> {
        match &self.kind {
            ExprKind::Value(lit) => Some(*lit),
            _ => None,
        }
    }
}

/// The kind of a scalar expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    /// Literal
    Value(Literal),
    /// Local, scalar argument or global parameter
    Id(String),
    /// Math library call: `sqrt(x)`
    MathFn { name: String, args: Vec<Expr> },
    /// `cond ? then : otherwise`
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// `lhs op rhs`
    BinaryOp {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `-base`
    UnaryNeg(Box<Expr>),
    /// `(ty){ fields... }` in field declaration order
    StructLiteral { ty: String, fields: Vec<Expr> },
    /// Absolute read of an array argument: `lut[v]`
    ArrayAccess { name: String, indices: Vec<Expr> },
    /// Relative read of an array argument: `x@[i - 1, j]`, optionally of
    /// one struct field
    StencilAccess {
        name: String,
        access: DomainFn,
        #[serde(default)]
        field: Option<String>,
    },
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    // Logical
    And,
    Or,
}

impl BinaryOp {
    /// Check if this operator yields a truth value.
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge
                | BinaryOp::And
                | BinaryOp::Or
        )
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryOp::Add => write!(f, "+"),
            BinaryOp::Sub => write!(f, "-"),
            BinaryOp::Mul => write!(f, "*"),
            BinaryOp::Div => write!(f, "/"),
            BinaryOp::Mod => write!(f, "%"),
            BinaryOp::Eq => write!(f, "=="),
            BinaryOp::Ne => write!(f, "!="),
            BinaryOp::Lt => write!(f, "<"),
            BinaryOp::Le => write!(f, "<="),
            BinaryOp::Gt => write!(f, ">"),
            BinaryOp::Ge => write!(f, ">="),
            BinaryOp::And => write!(f, "&&"),
            BinaryOp::Or => write!(f, "||"),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Value(lit) => write!(f, "{}", lit),
            ExprKind::Id(name) => write!(f, "{}", name),
            ExprKind::MathFn { name, args } => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}({})", name, args.join(", "))
            }
            ExprKind::Ternary { cond, then, otherwise } => {
                write!(f, "({} ? {} : {})", cond, then, otherwise)
            }
            ExprKind::BinaryOp { op, lhs, rhs } => write!(f, "({} {} {})", lhs, op, rhs),
            ExprKind::UnaryNeg(base) => write!(f, "(-{})", base),
            ExprKind::StructLiteral { ty, fields } => {
                let fields: Vec<String> = fields.iter().map(|a| a.to_string()).collect();
                write!(f, "{}{{{}}}", ty, fields.join(", "))
            }
            ExprKind::ArrayAccess { name, indices } => {
                write!(f, "{}", name)?;
                for idx in indices {
                    write!(f, "[{}]", idx)?;
                }
                Ok(())
            }
            ExprKind::StencilAccess { name, access, field } => {
                write!(f, "{}{}", name, access)?;
                if let Some(field) = field {
                    write!(f, ".{}", field)?;
                }
                Ok(())
            }
        }
    }
}

/// Edge policy for reads outside an argument's domain.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum BoundaryPolicy {
    /// No padding; the call's domain shrinks by the halo
    #[default]
    None,
    /// Pad with a literal
    Constant(Literal),
    /// Repeat the nearest edge element
    Clamped,
    /// Same as `Clamped`
    Extend,
    /// Periodic
    Wrap,
    /// Reflect across the edge element (`-1 -> 1`)
    Mirror,
}

impl BoundaryPolicy {
    /// Whether lowering has anything to materialize. `Constant(0)` behaves
    /// exactly like `None`.
    pub fn needs_padding(&self) -> bool {
        match self {
            BoundaryPolicy::None => false,
            BoundaryPolicy::Constant(v) => !v.is_zero(),
            BoundaryPolicy::Clamped
            | BoundaryPolicy::Extend
            | BoundaryPolicy::Wrap
            | BoundaryPolicy::Mirror => true,
        }
    }
}

impl fmt::Display for BoundaryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundaryPolicy::None => write!(f, "none"),
            BoundaryPolicy::Constant(v) => write!(f, "constant({})", v),
            BoundaryPolicy::Clamped => write!(f, "clamped"),
            BoundaryPolicy::Extend => write!(f, "extend"),
            BoundaryPolicy::Wrap => write!(f, "wrap"),
            BoundaryPolicy::Mirror => write!(f, "mirror"),
        }
    }
}

/// A whole-array expression (vector bodies).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VecExpr {
    pub kind: VecExprKind,
    /// Element type, set by inference
    #[serde(default)]
    pub ty: Option<ElemType>,
    /// Domain over which the value is defined, set by inference
    #[serde(default)]
    pub domain: Option<Domain>,
}

impl VecExpr {
    pub fn new(kind: VecExprKind) -> Self {
        Self {
            kind,
            ty: None,
            domain: None,
        }
    }

    /// Build an already-annotated node.
    pub fn annotated(kind: VecExprKind, ty: ElemType, domain: Domain) -> Self {
        Self {
            kind,
            ty: Some(ty),
            domain: Some(domain),
        }
    }

    /// Dimensionality, once annotated.
    pub fn n_dim(&self) -> Option<usize> {
        self.domain.as_ref().map(Domain::n_dim)
    }
}

/// The kind of a vector expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VecExprKind {
    /// Reference to an argument or to the set of statements defining a value
    Id(VecId),
    /// Piecewise array assembled from disjoint pieces
    Compose(Vec<ComposePiece>),
    /// Gather through a domain function: `result[i] = base[f(i)]`
    Scale { base: Box<VecExpr>, map: DomainFn },
    /// Call of a stencil or vector function
    FnCall(FnCall),
    /// Array of structs from arrays of fields
    MakeStruct { ty: String, fields: Vec<VecExpr> },
    /// A zero-dimensional value; broadcast when used as a compose piece
    Scalar(Expr),
    /// `base` with some dimensions pinned to a fixed index
    Sample {
        base: Box<VecExpr>,
        at: Vec<Option<ParametricExpr>>,
    },
}

/// A reference to a named vector value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VecId {
    pub name: String,
    /// Statements (by index in the enclosing body) defining this value,
    /// set by inference; empty for arguments
    #[serde(default)]
    pub writers: Vec<usize>,
}

impl VecId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            writers: Vec::new(),
        }
    }
}

/// Where a compose piece lands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PieceKey {
    /// The piece defines exactly this sub-domain
    Region(Domain),
    /// The piece's element `i` lands at `f(i)`
    Map(DomainFn),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposePiece {
    pub key: PieceKey,
    pub value: VecExpr,
}

/// A call with one boundary policy per argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FnCall {
    pub target: String,
    pub args: Vec<CallArg>,
    /// Per-call-site annotated copy of a vector callee, set by inference
    #[serde(default)]
    pub instance: Option<Box<VectorFnDefn>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallArg {
    pub value: VecExpr,
    #[serde(default)]
    pub policy: BoundaryPolicy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promote() {
        assert_eq!(ElemType::Int.promote(&ElemType::Float), Some(ElemType::Float));
        assert_eq!(ElemType::Double.promote(&ElemType::Float), Some(ElemType::Double));
        assert_eq!(ElemType::Int.promote(&ElemType::Int), Some(ElemType::Int));
        let rgb = ElemType::Struct("rgb".into());
        assert_eq!(rgb.promote(&rgb), Some(rgb.clone()));
        assert_eq!(rgb.promote(&ElemType::Float), None);
    }

    #[test]
    fn test_constant_zero_needs_no_padding() {
        assert!(!BoundaryPolicy::None.needs_padding());
        assert!(!BoundaryPolicy::Constant(Literal::Int(0)).needs_padding());
        assert!(!BoundaryPolicy::Constant(Literal::Float(0.0)).needs_padding());
        assert!(BoundaryPolicy::Constant(Literal::Float(1.5)).needs_padding());
        assert!(BoundaryPolicy::Mirror.needs_padding());
    }

    #[test]
    fn test_expr_display() {
        let e = Expr::new(ExprKind::BinaryOp {
            op: BinaryOp::Add,
            lhs: Box::new(Expr::new(ExprKind::StencilAccess {
                name: "x".into(),
                access: DomainFn::offsets(&[-1]),
                field: None,
            })),
            rhs: Box::new(Expr::new(ExprKind::Value(Literal::Float(2.0)))),
        });
        assert_eq!(e.to_string(), "(x@[i - 1] + 2.0)");
    }
}
