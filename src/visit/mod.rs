//! Tree traversal.
//!
//! Two traversal styles cover every pass:
//! - [`Visitor`] walks a tree by reference. Analyses (access-pattern
//!   collection, struct usage) override the hooks they need.
//! - [`Folder`] consumes a tree and returns a rebuilt one. Rewriting passes
//!   (boundary lowering, instance renaming) return new subtrees for the
//!   caller to install instead of patching nodes in place.
//!
//! Both match every node kind exhaustively, so adding a variant is a compile
//! error in each traversal rather than a silently skipped node.

use crate::ir::ast::*;
use std::collections::HashSet;

/// Read-only traversal. Every hook defaults to the matching `walk_*`.
pub trait Visitor {
    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }

    fn visit_vec_expr(&mut self, expr: &VecExpr) {
        walk_vec_expr(self, expr);
    }

    fn visit_stencil(&mut self, func: &StencilFnDefn) {
        walk_stencil(self, func);
    }

    fn visit_vector(&mut self, func: &VectorFnDefn) {
        walk_vector(self, func);
    }
}

pub fn walk_expr<V: Visitor + ?Sized>(v: &mut V, expr: &Expr) {
    match &expr.kind {
        ExprKind::Value(_) | ExprKind::Id(_) | ExprKind::StencilAccess { .. } => {}
        ExprKind::MathFn { args, .. } => {
            for a in args {
                v.visit_expr(a);
            }
        }
        ExprKind::Ternary { cond, then, otherwise } => {
            v.visit_expr(cond);
            v.visit_expr(then);
            v.visit_expr(otherwise);
        }
        ExprKind::BinaryOp { lhs, rhs, .. } => {
            v.visit_expr(lhs);
            v.visit_expr(rhs);
        }
        ExprKind::UnaryNeg(base) => v.visit_expr(base),
        ExprKind::StructLiteral { fields, .. } => {
            for f in fields {
                v.visit_expr(f);
            }
        }
        ExprKind::ArrayAccess { indices, .. } => {
            for i in indices {
                v.visit_expr(i);
            }
        }
    }
}

pub fn walk_vec_expr<V: Visitor + ?Sized>(v: &mut V, expr: &VecExpr) {
    match &expr.kind {
        VecExprKind::Id(_) => {}
        VecExprKind::Compose(pieces) => {
            for p in pieces {
                v.visit_vec_expr(&p.value);
            }
        }
        VecExprKind::Scale { base, .. } | VecExprKind::Sample { base, .. } => {
            v.visit_vec_expr(base)
        }
        VecExprKind::FnCall(call) => {
            for a in &call.args {
                v.visit_vec_expr(&a.value);
            }
            if let Some(instance) = &call.instance {
                v.visit_vector(instance);
            }
        }
        VecExprKind::MakeStruct { fields, .. } => {
            for f in fields {
                v.visit_vec_expr(f);
            }
        }
        VecExprKind::Scalar(e) => v.visit_expr(e),
    }
}

pub fn walk_stencil<V: Visitor + ?Sized>(v: &mut V, func: &StencilFnDefn) {
    for stmt in &func.body {
        v.visit_expr(&stmt.value);
    }
    v.visit_expr(&func.result);
}

pub fn walk_vector<V: Visitor + ?Sized>(v: &mut V, func: &VectorFnDefn) {
    for stmt in &func.body {
        v.visit_vec_expr(&stmt.value);
    }
    v.visit_vec_expr(&func.result);
}

/// Rewriting traversal. Each hook consumes a node and returns its
/// replacement; defaults rebuild the node from folded children.
pub trait Folder: Sized {
    type Error;

    fn fold_expr(&mut self, expr: Expr) -> Result<Expr, Self::Error> {
        fold_walk_expr(self, expr)
    }

    fn fold_vec_expr(&mut self, expr: VecExpr) -> Result<VecExpr, Self::Error> {
        fold_walk_vec_expr(self, expr)
    }

    fn fold_fn_call(&mut self, call: FnCall) -> Result<FnCall, Self::Error> {
        fold_walk_fn_call(self, call)
    }

    fn fold_vec_id(&mut self, id: VecId) -> Result<VecId, Self::Error> {
        Ok(id)
    }

    fn fold_vector(&mut self, func: VectorFnDefn) -> Result<VectorFnDefn, Self::Error> {
        fold_walk_vector(self, func)
    }
}

fn fold_box<F: Folder>(f: &mut F, expr: Box<Expr>) -> Result<Box<Expr>, F::Error> {
    Ok(Box::new(f.fold_expr(*expr)?))
}

fn fold_all<F: Folder>(f: &mut F, exprs: Vec<Expr>) -> Result<Vec<Expr>, F::Error> {
    exprs.into_iter().map(|e| f.fold_expr(e)).collect()
}

pub fn fold_walk_expr<F: Folder>(f: &mut F, expr: Expr) -> Result<Expr, F::Error> {
    let kind = match expr.kind {
        k @ (ExprKind::Value(_) | ExprKind::Id(_) | ExprKind::StencilAccess { .. }) => k,
        ExprKind::MathFn { name, args } => ExprKind::MathFn {
            name,
            args: fold_all(f, args)?,
        },
        ExprKind::Ternary { cond, then, otherwise } => ExprKind::Ternary {
            cond: fold_box(f, cond)?,
            then: fold_box(f, then)?,
            otherwise: fold_box(f, otherwise)?,
        },
        ExprKind::BinaryOp { op, lhs, rhs } => ExprKind::BinaryOp {
            op,
            lhs: fold_box(f, lhs)?,
            rhs: fold_box(f, rhs)?,
        },
        ExprKind::UnaryNeg(base) => ExprKind::UnaryNeg(fold_box(f, base)?),
        ExprKind::StructLiteral { ty, fields } => ExprKind::StructLiteral {
            ty,
            fields: fold_all(f, fields)?,
        },
        ExprKind::ArrayAccess { name, indices } => ExprKind::ArrayAccess {
            name,
            indices: fold_all(f, indices)?,
        },
    };
    Ok(Expr { kind, ty: expr.ty })
}

pub fn fold_walk_vec_expr<F: Folder>(f: &mut F, expr: VecExpr) -> Result<VecExpr, F::Error> {
    let kind = match expr.kind {
        VecExprKind::Id(id) => VecExprKind::Id(f.fold_vec_id(id)?),
        VecExprKind::Compose(pieces) => VecExprKind::Compose(
            pieces
                .into_iter()
                .map(|p| {
                    Ok(ComposePiece {
                        key: p.key,
                        value: f.fold_vec_expr(p.value)?,
                    })
                })
                .collect::<Result<_, F::Error>>()?,
        ),
        VecExprKind::Scale { base, map } => VecExprKind::Scale {
            base: Box::new(f.fold_vec_expr(*base)?),
            map,
        },
        VecExprKind::FnCall(call) => VecExprKind::FnCall(f.fold_fn_call(call)?),
        VecExprKind::MakeStruct { ty, fields } => VecExprKind::MakeStruct {
            ty,
            fields: fields
                .into_iter()
                .map(|e| f.fold_vec_expr(e))
                .collect::<Result<_, F::Error>>()?,
        },
        VecExprKind::Scalar(e) => VecExprKind::Scalar(f.fold_expr(e)?),
        VecExprKind::Sample { base, at } => VecExprKind::Sample {
            base: Box::new(f.fold_vec_expr(*base)?),
            at,
        },
    };
    Ok(VecExpr {
        kind,
        ty: expr.ty,
        domain: expr.domain,
    })
}

pub fn fold_walk_fn_call<F: Folder>(f: &mut F, call: FnCall) -> Result<FnCall, F::Error> {
    let args = call
        .args
        .into_iter()
        .map(|a| {
            Ok(CallArg {
                value: f.fold_vec_expr(a.value)?,
                policy: a.policy,
            })
        })
        .collect::<Result<_, F::Error>>()?;
    let instance = match call.instance {
        Some(inst) => Some(Box::new(f.fold_vector(*inst)?)),
        None => None,
    };
    Ok(FnCall {
        target: call.target,
        args,
        instance,
    })
}

pub fn fold_walk_vector<F: Folder>(f: &mut F, func: VectorFnDefn) -> Result<VectorFnDefn, F::Error> {
    let body = func
        .body
        .into_iter()
        .map(|s| {
            Ok(VecStmt {
                target: s.target,
                region: s.region,
                value: f.fold_vec_expr(s.value)?,
                domain: s.domain,
            })
        })
        .collect::<Result<_, F::Error>>()?;
    Ok(VectorFnDefn {
        name: func.name,
        args: func.args,
        ret: func.ret,
        body,
        result: f.fold_vec_expr(func.result)?,
    })
}

/// Prefixes every argument and local name of a vector function, so that a
/// per-call-site copy can be emitted inline without clashing with its
/// caller's names.
pub struct Renamer {
    prefix: String,
    /// Argument and local names of the function being copied
    own: HashSet<String>,
}

impl Renamer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            own: HashSet::new(),
        }
    }

    fn rename(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Copy `func` with all of its own names prefixed.
    pub fn instantiate(mut self, func: &VectorFnDefn) -> VectorFnDefn {
        self.own = func
            .args
            .iter()
            .map(|a| a.name.clone())
            .chain(func.body.iter().map(|s| s.target.clone()))
            .collect();
        let mut copy = func.clone();
        for a in &mut copy.args {
            a.name = self.rename(&a.name);
        }
        for s in &mut copy.body {
            s.target = self.rename(&s.target);
        }
        match self.fold_vector(copy) {
            Ok(renamed) => renamed,
            Err(never) => match never {},
        }
    }
}

impl Folder for Renamer {
    type Error = std::convert::Infallible;

    fn fold_vec_id(&mut self, id: VecId) -> Result<VecId, Self::Error> {
        Ok(VecId {
            name: self.rename(&id.name),
            writers: id.writers,
        })
    }

    // Scalar arguments read inside broadcast values; global parameters
    // keep their names.
    fn fold_expr(&mut self, expr: Expr) -> Result<Expr, Self::Error> {
        match expr.kind {
            ExprKind::Id(name) if self.own.contains(&name) => Ok(Expr {
                kind: ExprKind::Id(self.rename(&name)),
                ty: expr.ty,
            }),
            kind => fold_walk_expr(self, Expr { kind, ty: expr.ty }),
        }
    }

    // Nested call sites get their own instances later.
    fn fold_fn_call(&mut self, call: FnCall) -> Result<FnCall, Self::Error> {
        let args = call
            .args
            .into_iter()
            .map(|a| {
                Ok(CallArg {
                    value: self.fold_vec_expr(a.value)?,
                    policy: a.policy,
                })
            })
            .collect::<Result<_, Self::Error>>()?;
        Ok(FnCall {
            target: call.target,
            args,
            instance: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::*;

    struct CountIds(usize);

    impl Visitor for CountIds {
        fn visit_vec_expr(&mut self, expr: &VecExpr) {
            if let VecExprKind::Id(_) = expr.kind {
                self.0 += 1;
            }
            walk_vec_expr(self, expr);
        }
    }

    #[test]
    fn test_visitor_reaches_nested_args() {
        let e = call("f", vec![arg(vid("a")), arg(call("g", vec![arg(vid("b"))]))]);
        let mut v = CountIds(0);
        v.visit_vec_expr(&e);
        assert_eq!(v.0, 2);
    }

    #[test]
    fn test_renamer_prefixes_names() {
        let f = vector("stage", vec![array_arg("x", ElemType::Float, 1)], ElemType::Float)
            .with_stmt("t", call("blur", vec![arg(vid("x"))]))
            .returns(vid("t"));
        let inst = Renamer::new("stage0_").instantiate(&f);
        assert_eq!(inst.args[0].name, "stage0_x");
        assert_eq!(inst.body[0].target, "stage0_t");
        assert_eq!(inst.result, vid("stage0_t"));
        // callee names are not locals
        match &inst.body[0].value.kind {
            VecExprKind::FnCall(c) => {
                assert_eq!(c.target, "blur");
                assert_eq!(c.args[0].value, vid("stage0_x"));
            }
            other => panic!("unexpected {:?}", other),
        }
        // the template is untouched
        assert_eq!(f.args[0].name, "x");
    }

    #[test]
    fn test_renamer_skips_global_params() {
        let f = vector("fill", vec![scalar_arg("k", ElemType::Float)], ElemType::Float)
            .returns(scalar(add(id("k"), id("N"))));
        let inst = Renamer::new("fill1_").instantiate(&f);
        match &inst.result.kind {
            VecExprKind::Scalar(e) => assert_eq!(e.to_string(), "(fill1_k + N)"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
