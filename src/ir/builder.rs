//! Constructors for building programs without a parser.
//!
//! ```rust
//! use stencilc::ir::builder::*;
//! use stencilc::ir::ElemType;
//!
//! // blur3(x) = (x@[i-1] + x@[i] + x@[i+1]) / 3
//! let blur = stencil("blur3", vec![array_arg("x", ElemType::Float, 1)], ElemType::Float)
//!     .returns(div(add(add(read("x", &[-1]), read("x", &[0])), read("x", &[1])), float(3.0)));
//! assert_eq!(blur.args.len(), 1);
//! ```

use super::ast::*;
use crate::domain::{Domain, DomainFn, ParametricExpr};

// ---- scalar expressions ----

pub fn int(v: i64) -> Expr {
    Expr::new(ExprKind::Value(Literal::Int(v)))
}

pub fn float(v: f64) -> Expr {
    Expr::new(ExprKind::Value(Literal::Float(v)))
}

pub fn id(name: &str) -> Expr {
    Expr::new(ExprKind::Id(name.to_string()))
}

/// Unit-scale relative read `name@[i + o0, j + o1, ...]`.
pub fn read(name: &str, offsets: &[i64]) -> Expr {
    read_fn(name, DomainFn::offsets(offsets))
}

/// Scaled relative read `name@[s0*i + o0, ...]` from `(offset, scale)` pairs.
pub fn read_scaled(name: &str, pairs: &[(i64, i64)]) -> Expr {
    read_fn(name, DomainFn::scaled(pairs))
}

pub fn read_fn(name: &str, access: DomainFn) -> Expr {
    Expr::new(ExprKind::StencilAccess {
        name: name.to_string(),
        access,
        field: None,
    })
}

/// Relative read of one struct field.
pub fn read_field(name: &str, offsets: &[i64], field: &str) -> Expr {
    Expr::new(ExprKind::StencilAccess {
        name: name.to_string(),
        access: DomainFn::offsets(offsets),
        field: Some(field.to_string()),
    })
}

pub fn index(name: &str, indices: Vec<Expr>) -> Expr {
    Expr::new(ExprKind::ArrayAccess {
        name: name.to_string(),
        indices,
    })
}

pub fn binop(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::new(ExprKind::BinaryOp {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    })
}

pub fn add(lhs: Expr, rhs: Expr) -> Expr {
    binop(BinaryOp::Add, lhs, rhs)
}

pub fn sub(lhs: Expr, rhs: Expr) -> Expr {
    binop(BinaryOp::Sub, lhs, rhs)
}

pub fn mul(lhs: Expr, rhs: Expr) -> Expr {
    binop(BinaryOp::Mul, lhs, rhs)
}

pub fn div(lhs: Expr, rhs: Expr) -> Expr {
    binop(BinaryOp::Div, lhs, rhs)
}

pub fn neg(base: Expr) -> Expr {
    Expr::new(ExprKind::UnaryNeg(Box::new(base)))
}

pub fn math(name: &str, args: Vec<Expr>) -> Expr {
    Expr::new(ExprKind::MathFn {
        name: name.to_string(),
        args,
    })
}

pub fn ternary(cond: Expr, then: Expr, otherwise: Expr) -> Expr {
    Expr::new(ExprKind::Ternary {
        cond: Box::new(cond),
        then: Box::new(then),
        otherwise: Box::new(otherwise),
    })
}

pub fn struct_lit(ty: &str, fields: Vec<Expr>) -> Expr {
    Expr::new(ExprKind::StructLiteral {
        ty: ty.to_string(),
        fields,
    })
}

// ---- arguments ----

pub fn scalar_arg(name: &str, ty: ElemType) -> FnArg {
    FnArg {
        name: name.to_string(),
        ty,
        n_dim: 0,
        domain: None,
    }
}

pub fn array_arg(name: &str, ty: ElemType, n_dim: usize) -> FnArg {
    FnArg {
        name: name.to_string(),
        ty,
        n_dim,
        domain: None,
    }
}

/// Array argument with a declared `[0, e - 1]` domain per extent.
pub fn sized_arg(name: &str, ty: ElemType, extents: Vec<ParametricExpr>) -> FnArg {
    FnArg {
        name: name.to_string(),
        ty,
        n_dim: extents.len(),
        domain: Some(Domain::from_extents(extents)),
    }
}

// ---- functions ----

pub fn stencil(name: &str, args: Vec<FnArg>, ret: ElemType) -> StencilFnDefn {
    StencilFnDefn {
        name: name.to_string(),
        args,
        ret,
        body: Vec::new(),
        result: int(0),
    }
}

impl StencilFnDefn {
    /// Append `let name = value;`.
    pub fn with_let(mut self, name: &str, value: Expr) -> Self {
        self.body.push(StencilStmt {
            name: name.to_string(),
            ty: None,
            value,
        });
        self
    }

    pub fn returns(mut self, result: Expr) -> Self {
        self.result = result;
        self
    }
}

pub fn vector(name: &str, args: Vec<FnArg>, ret: ElemType) -> VectorFnDefn {
    VectorFnDefn {
        name: name.to_string(),
        args,
        ret,
        body: Vec::new(),
        result: vid("_"),
    }
}

impl VectorFnDefn {
    /// Append `target = value;`.
    pub fn with_stmt(mut self, target: &str, value: VecExpr) -> Self {
        self.body.push(VecStmt {
            target: target.to_string(),
            region: None,
            value,
            domain: None,
        });
        self
    }

    /// Append `target[region] = value;`.
    pub fn with_piece(mut self, target: &str, region: Domain, value: VecExpr) -> Self {
        self.body.push(VecStmt {
            target: target.to_string(),
            region: Some(region),
            value,
            domain: None,
        });
        self
    }

    pub fn returns(mut self, result: VecExpr) -> Self {
        self.result = result;
        self
    }
}

// ---- vector expressions ----

pub fn vid(name: &str) -> VecExpr {
    VecExpr::new(VecExprKind::Id(VecId::new(name)))
}

pub fn scalar(value: Expr) -> VecExpr {
    VecExpr::new(VecExprKind::Scalar(value))
}

/// Call argument without a boundary policy.
pub fn arg(value: VecExpr) -> CallArg {
    CallArg {
        value,
        policy: BoundaryPolicy::None,
    }
}

pub fn arg_with(value: VecExpr, policy: BoundaryPolicy) -> CallArg {
    CallArg { value, policy }
}

pub fn call(target: &str, args: Vec<CallArg>) -> VecExpr {
    VecExpr::new(VecExprKind::FnCall(FnCall {
        target: target.to_string(),
        args,
        instance: None,
    }))
}

pub fn scale(base: VecExpr, map: DomainFn) -> VecExpr {
    VecExpr::new(VecExprKind::Scale {
        base: Box::new(base),
        map,
    })
}

pub fn compose(pieces: Vec<(PieceKey, VecExpr)>) -> VecExpr {
    VecExpr::new(VecExprKind::Compose(
        pieces
            .into_iter()
            .map(|(key, value)| ComposePiece { key, value })
            .collect(),
    ))
}

pub fn make_struct(ty: &str, fields: Vec<VecExpr>) -> VecExpr {
    VecExpr::new(VecExprKind::MakeStruct {
        ty: ty.to_string(),
        fields,
    })
}

// ---- program ----

pub fn program(entry: &str) -> Program {
    Program {
        entry: entry.to_string(),
        ..Default::default()
    }
}

impl Program {
    pub fn with_param(mut self, name: &str) -> Self {
        self.params.push(GlobalParam {
            name: name.to_string(),
        });
        self
    }

    pub fn with_struct(mut self, name: &str, fields: &[(&str, ElemType)]) -> Self {
        self.structs.push(StructDefn {
            name: name.to_string(),
            fields: fields
                .iter()
                .map(|(n, ty)| StructField {
                    name: n.to_string(),
                    ty: ty.clone(),
                })
                .collect(),
        });
        self
    }

    pub fn with_stencil(mut self, f: StencilFnDefn) -> Self {
        self.stencils.push(f);
        self
    }

    pub fn with_vector(mut self, f: VectorFnDefn) -> Self {
        self.vectors.push(f);
        self
    }
}
