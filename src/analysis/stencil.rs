//! Stencil function analysis.
//!
//! Resolves the element type of every scalar expression in a stencil body
//! and derives one [`AccessPattern`] per array formal from the relative
//! reads (`x@[...]`) in the body.

use crate::context::CompileContext;
use crate::domain::{AccessConflict, AccessPattern};
use crate::ir::ast::*;
use crate::utils::errors::{ModelError, ModelErrorKind};
use crate::visit::{walk_expr, Visitor};
use std::collections::HashMap;

/// A typed stencil function with its access patterns.
#[derive(Debug, Clone)]
pub struct StencilInfo {
    /// The definition, with every expression's `ty` resolved
    pub defn: StencilFnDefn,
    /// Per formal: the relative reads of that argument, if any
    pub patterns: Vec<Option<AccessPattern>>,
    /// Dimensionality of the output, shared by every relatively read formal
    pub n_dim: Option<usize>,
}

impl StencilInfo {
    pub fn name(&self) -> &str {
        &self.defn.name
    }
}

/// Math library functions: name and arity.
const MATH_FNS: &[(&str, usize)] = &[
    ("sqrt", 1),
    ("exp", 1),
    ("log", 1),
    ("sin", 1),
    ("cos", 1),
    ("tan", 1),
    ("atan", 1),
    ("floor", 1),
    ("ceil", 1),
    ("round", 1),
    ("abs", 1),
    ("pow", 2),
    ("atan2", 2),
    ("min", 2),
    ("max", 2),
];

/// What a name denotes inside an expression.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Symbol {
    Scalar(ElemType),
    Array { ty: ElemType, n_dim: usize },
}

/// Whether a value of type `from` may initialize a `to`.
pub(crate) fn assignable(to: &ElemType, from: &ElemType) -> bool {
    (to.is_numeric() && from.is_numeric()) || to == from
}

/// Resolves expression types against a symbol table.
pub(crate) struct ExprTyper<'a> {
    ctx: &'a CompileContext,
    function: &'a str,
    symbols: HashMap<String, Symbol>,
}

impl<'a> ExprTyper<'a> {
    pub(crate) fn new(ctx: &'a CompileContext, function: &'a str) -> Self {
        Self {
            ctx,
            function,
            symbols: HashMap::new(),
        }
    }

    pub(crate) fn bind(&mut self, name: &str, symbol: Symbol) {
        self.symbols.insert(name.to_string(), symbol);
    }

    fn error(&self, kind: ModelErrorKind, message: String) -> ModelError {
        ModelError::new(kind, self.function, message)
    }

    fn array(&self, name: &str) -> Result<(ElemType, usize), ModelError> {
        match self.symbols.get(name) {
            Some(Symbol::Array { ty, n_dim }) => Ok((ty.clone(), *n_dim)),
            Some(Symbol::Scalar(_)) => Err(self.error(
                ModelErrorKind::DimensionMismatch,
                format!("scalar `{}` is indexed like an array", name),
            )),
            None => Err(self.error(
                ModelErrorKind::UndefinedValue,
                format!("undefined array `{}`", name),
            )),
        }
    }

    fn numeric(&self, ty: &ElemType, what: &str) -> Result<(), ModelError> {
        if ty.is_numeric() {
            Ok(())
        } else {
            Err(self.error(
                ModelErrorKind::TypeMismatch,
                format!("{} expects a numeric operand, found `{}`", what, ty),
            ))
        }
    }

    /// Resolve and record the type of `expr` and all of its children.
    pub(crate) fn type_expr(&mut self, expr: &mut Expr) -> Result<ElemType, ModelError> {
        let ty = match &mut expr.kind {
            ExprKind::Value(lit) => lit.elem_type(),
            ExprKind::Id(name) => match self.symbols.get(name.as_str()) {
                Some(Symbol::Scalar(ty)) => ty.clone(),
                Some(Symbol::Array { .. }) => {
                    return Err(self.error(
                        ModelErrorKind::DimensionMismatch,
                        format!("array `{}` is used as a scalar", name),
                    ))
                }
                None if self.ctx.is_param(name) => ElemType::Int,
                None => {
                    return Err(self.error(
                        ModelErrorKind::UndefinedValue,
                        format!("undefined value `{}`", name),
                    ))
                }
            },
            ExprKind::MathFn { name, args } => {
                let arity = MATH_FNS
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, a)| *a)
                    .ok_or_else(|| {
                        self.error(
                            ModelErrorKind::UndefinedFunction,
                            format!("unknown math function `{}`", name),
                        )
                    })?;
                if args.len() != arity {
                    return Err(self.error(
                        ModelErrorKind::ArgumentCount,
                        format!("`{}` takes {} argument(s), {} given", name, arity, args.len()),
                    ));
                }
                let mut tys = Vec::with_capacity(args.len());
                for a in args.iter_mut() {
                    let ty = self.type_expr(a)?;
                    self.numeric(&ty, name)?;
                    tys.push(ty);
                }
                let integral = matches!(name.as_str(), "min" | "max" | "abs");
                if integral && tys.iter().all(|t| *t == ElemType::Int) {
                    ElemType::Int
                } else if tys.contains(&ElemType::Double) {
                    ElemType::Double
                } else {
                    ElemType::Float
                }
            }
            ExprKind::Ternary { cond, then, otherwise } => {
                let c = self.type_expr(cond)?;
                self.numeric(&c, "a condition")?;
                let t = self.type_expr(then)?;
                let o = self.type_expr(otherwise)?;
                t.promote(&o).ok_or_else(|| {
                    self.error(
                        ModelErrorKind::TypeMismatch,
                        format!("conditional branches have types `{}` and `{}`", t, o),
                    )
                })?
            }
            ExprKind::BinaryOp { op, lhs, rhs } => {
                let l = self.type_expr(lhs)?;
                let r = self.type_expr(rhs)?;
                let what = format!("operator `{}`", op);
                self.numeric(&l, &what)?;
                self.numeric(&r, &what)?;
                if op.is_comparison() {
                    ElemType::Int
                } else {
                    // both numeric, so promotion always succeeds
                    l.promote(&r).unwrap_or(ElemType::Double)
                }
            }
            ExprKind::UnaryNeg(base) => {
                let ty = self.type_expr(base)?;
                self.numeric(&ty, "negation")?;
                ty
            }
            ExprKind::StructLiteral { ty, fields } => {
                let defn = self.ctx.find_struct(ty).ok_or_else(|| {
                    self.error(
                        ModelErrorKind::UndefinedStruct,
                        format!("undefined struct `{}`", ty),
                    )
                })?;
                if defn.fields.len() != fields.len() {
                    return Err(self.error(
                        ModelErrorKind::ArgumentCount,
                        format!(
                            "struct `{}` has {} field(s), literal gives {}",
                            ty,
                            defn.fields.len(),
                            fields.len()
                        ),
                    ));
                }
                let defn = defn.clone();
                for (field, value) in defn.fields.iter().zip(fields.iter_mut()) {
                    let vt = self.type_expr(value)?;
                    if !assignable(&field.ty, &vt) {
                        return Err(self.error(
                            ModelErrorKind::TypeMismatch,
                            format!("field `{}.{}` is `{}`, given `{}`", ty, field.name, field.ty, vt),
                        ));
                    }
                }
                ElemType::Struct(ty.clone())
            }
            ExprKind::ArrayAccess { name, indices } => {
                let (ty, n_dim) = self.array(name)?;
                if indices.len() != n_dim {
                    return Err(self.error(
                        ModelErrorKind::DimensionMismatch,
                        format!("`{}` is {}-d but indexed with {} subscript(s)", name, n_dim, indices.len()),
                    ));
                }
                for idx in indices.iter_mut() {
                    let it = self.type_expr(idx)?;
                    if it != ElemType::Int {
                        return Err(self.error(
                            ModelErrorKind::TypeMismatch,
                            format!("subscript of `{}` has type `{}`, expected `int`", name, it),
                        ));
                    }
                }
                ty
            }
            ExprKind::StencilAccess { name, access, field } => {
                let (ty, n_dim) = self.array(name)?;
                if access.n_dim() != n_dim {
                    return Err(self.error(
                        ModelErrorKind::DimensionMismatch,
                        format!("`{}` is {}-d but read with a {}-d offset {}", name, n_dim, access.n_dim(), access),
                    ));
                }
                match field {
                    None => ty,
                    Some(field) => {
                        let defn = match &ty {
                            ElemType::Struct(s) => self.ctx.find_struct(s),
                            _ => None,
                        };
                        defn.and_then(|d| d.field(field))
                            .map(|f| f.ty.clone())
                            .ok_or_else(|| {
                                self.error(
                                    ModelErrorKind::UndefinedStruct,
                                    format!("`{}` of type `{}` has no field `{}`", name, ty, field),
                                )
                            })?
                    }
                }
            }
        };
        expr.ty = Some(ty.clone());
        Ok(ty)
    }
}

/// Collects the relative reads of every array formal.
struct AccessCollector<'a> {
    func: &'a StencilFnDefn,
    patterns: Vec<Option<AccessPattern>>,
    conflict: Option<ModelError>,
}

impl<'a> AccessCollector<'a> {
    fn new(func: &'a StencilFnDefn) -> Self {
        Self {
            func,
            patterns: vec![None; func.args.len()],
            conflict: None,
        }
    }
}

impl Visitor for AccessCollector<'_> {
    fn visit_expr(&mut self, expr: &Expr) {
        if let ExprKind::StencilAccess { name, access, .. } = &expr.kind {
            if let Some((idx, _)) = self.func.arg(name) {
                let pattern = self.patterns[idx].get_or_insert_with(AccessPattern::new);
                if let Err(conflict) = pattern.record(access) {
                    let message = match conflict {
                        AccessConflict::Arity { expected, found } => format!(
                            "`{}` is read with {}-d and {}-d offsets",
                            name, expected, found
                        ),
                        AccessConflict::Scale { dim, expected, found } => format!(
                            "`{}` is read with scales {} and {} in dimension {}",
                            name, expected, found, dim
                        ),
                        AccessConflict::BadScale { dim, scale } => format!(
                            "`{}` is read with non-positive scale {} in dimension {}",
                            name, scale, dim
                        ),
                    };
                    self.conflict.get_or_insert_with(|| {
                        ModelError::new(ModelErrorKind::InconsistentAccess, &self.func.name, message)
                    });
                }
            }
        }
        walk_expr(self, expr);
    }
}

/// Type a stencil body and derive its access patterns.
pub fn analyze_stencil(ctx: &CompileContext, func: &StencilFnDefn) -> Result<StencilInfo, ModelError> {
    let mut typed = func.clone();
    let mut typer = ExprTyper::new(ctx, &func.name);

    for (i, a) in func.args.iter().enumerate() {
        if func.args[..i].iter().any(|b| b.name == a.name) {
            return Err(ModelError::new(
                ModelErrorKind::DuplicateDefinition,
                &func.name,
                format!("argument `{}` is declared twice", a.name),
            ));
        }
        check_type_exists(ctx, &func.name, &a.ty)?;
        let symbol = if a.is_array() {
            Symbol::Array {
                ty: a.ty.clone(),
                n_dim: a.n_dim,
            }
        } else {
            Symbol::Scalar(a.ty.clone())
        };
        typer.bind(&a.name, symbol);
    }
    check_type_exists(ctx, &func.name, &func.ret)?;

    for stmt in typed.body.iter_mut() {
        let ty = typer.type_expr(&mut stmt.value)?;
        let declared = match &stmt.ty {
            Some(declared) if !assignable(declared, &ty) => {
                return Err(ModelError::new(
                    ModelErrorKind::TypeMismatch,
                    &func.name,
                    format!("`{}` is declared `{}` but initialized with `{}`", stmt.name, declared, ty),
                ))
            }
            Some(declared) => declared.clone(),
            None => ty,
        };
        typer.bind(&stmt.name, Symbol::Scalar(declared.clone()));
        stmt.ty = Some(declared);
    }

    let result_ty = typer.type_expr(&mut typed.result)?;
    if !assignable(&func.ret, &result_ty) {
        return Err(ModelError::new(
            ModelErrorKind::TypeMismatch,
            &func.name,
            format!("returns `{}` but the result has type `{}`", func.ret, result_ty),
        ));
    }

    let mut collector = AccessCollector::new(&typed);
    collector.visit_stencil(&typed);
    if let Some(err) = collector.conflict {
        return Err(err);
    }
    let patterns = collector.patterns;

    let mut n_dim = None;
    for (a, p) in typed.args.iter().zip(&patterns) {
        if p.is_none() {
            continue;
        }
        match n_dim {
            None => n_dim = Some(a.n_dim),
            Some(n) if n != a.n_dim => {
                return Err(ModelError::new(
                    ModelErrorKind::DimensionMismatch,
                    &func.name,
                    format!("relatively read arguments disagree on dimensionality ({} and {} of `{}`)", n, a.n_dim, a.name),
                ))
            }
            Some(_) => {}
        }
    }

    Ok(StencilInfo {
        defn: typed,
        patterns,
        n_dim,
    })
}

pub(crate) fn check_type_exists(ctx: &CompileContext, function: &str, ty: &ElemType) -> Result<(), ModelError> {
    match ty {
        ElemType::Struct(name) if ctx.find_struct(name).is_none() => Err(ModelError::new(
            ModelErrorKind::UndefinedStruct,
            function,
            format!("undefined struct `{}`", name),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::*;
    use crate::CompileConfig;

    fn ctx_with(stencil_fn: StencilFnDefn) -> Result<CompileContext, anyhow::Error> {
        let p = program("main")
            .with_param("N")
            .with_struct("rgb", &[("r", ElemType::Float), ("g", ElemType::Float), ("b", ElemType::Float)])
            .with_stencil(stencil_fn)
            .with_vector(vector("main", vec![], ElemType::Float).returns(scalar(float(0.0))));
        CompileContext::new(&p, CompileConfig::default())
    }

    fn model_kind(err: anyhow::Error) -> ModelErrorKind {
        err.downcast_ref::<ModelError>().unwrap().kind
    }

    #[test]
    fn test_blur_pattern() {
        let f = stencil("blur3", vec![array_arg("x", ElemType::Float, 1)], ElemType::Float)
            .returns(div(add(add(read("x", &[-1]), read("x", &[0])), read("x", &[1])), float(3.0)));
        let ctx = ctx_with(f).unwrap();
        let info = ctx.stencil("blur3").unwrap();
        let p = info.patterns[0].as_ref().unwrap();
        assert_eq!((p.dims[0].min_offset, p.dims[0].max_offset), (-1, 1));
        assert_eq!(info.n_dim, Some(1));
        assert_eq!(info.defn.result.ty, Some(ElemType::Float));
    }

    #[test]
    fn test_lets_and_promotion() {
        let f = stencil(
            "scale",
            vec![array_arg("x", ElemType::Int, 2), scalar_arg("k", ElemType::Double)],
            ElemType::Double,
        )
        .with_let("t", mul(read("x", &[0, 0]), id("k")))
        .returns(add(id("t"), id("N")));
        let ctx = ctx_with(f).unwrap();
        let info = ctx.stencil("scale").unwrap();
        assert_eq!(info.defn.body[0].ty, Some(ElemType::Double));
        assert_eq!(info.defn.result.ty, Some(ElemType::Double));
    }

    #[test]
    fn test_integral_min_stays_int() {
        let f = stencil("m", vec![array_arg("x", ElemType::Int, 1)], ElemType::Int)
            .returns(math("min", vec![read("x", &[0]), int(255)]));
        let ctx = ctx_with(f).unwrap();
        assert_eq!(ctx.stencil("m").unwrap().defn.result.ty, Some(ElemType::Int));
    }

    #[test]
    fn test_struct_field_read() {
        let f = stencil("lum", vec![array_arg("img", ElemType::Struct("rgb".into()), 2)], ElemType::Float)
            .returns(add(read_field("img", &[0, 0], "r"), read_field("img", &[0, 1], "g")));
        let ctx = ctx_with(f).unwrap();
        let p = ctx.stencil("lum").unwrap().patterns[0].as_ref().unwrap();
        assert_eq!(p.dims[1].max_offset, 1);

        let bad = stencil("bad", vec![array_arg("img", ElemType::Struct("rgb".into()), 2)], ElemType::Float)
            .returns(read_field("img", &[0, 0], "alpha"));
        assert_eq!(model_kind(ctx_with(bad).unwrap_err()), ModelErrorKind::UndefinedStruct);
    }

    #[test]
    fn test_inconsistent_scale_names_function() {
        let f = stencil("down", vec![array_arg("x", ElemType::Float, 1)], ElemType::Float)
            .returns(add(read_scaled("x", &[(0, 2)]), read_scaled("x", &[(1, 1)])));
        let err = ctx_with(f).unwrap_err();
        let model = err.downcast_ref::<ModelError>().unwrap();
        assert_eq!(model.kind, ModelErrorKind::InconsistentAccess);
        assert_eq!(model.function, "down");
    }

    #[test]
    fn test_zero_scale_rejected() {
        let f = stencil("z", vec![array_arg("x", ElemType::Float, 1)], ElemType::Float)
            .returns(read_scaled("x", &[(0, 0)]));
        assert_eq!(model_kind(ctx_with(f).unwrap_err()), ModelErrorKind::InconsistentAccess);
    }

    #[test]
    fn test_undefined_value() {
        let f = stencil("u", vec![array_arg("x", ElemType::Float, 1)], ElemType::Float)
            .returns(add(read("x", &[0]), id("missing")));
        assert_eq!(model_kind(ctx_with(f).unwrap_err()), ModelErrorKind::UndefinedValue);
    }

    #[test]
    fn test_mixed_dimensionality_rejected() {
        let f = stencil(
            "mix",
            vec![array_arg("a", ElemType::Float, 1), array_arg("b", ElemType::Float, 2)],
            ElemType::Float,
        )
        .returns(add(read("a", &[0]), read("b", &[0, 0])));
        assert_eq!(model_kind(ctx_with(f).unwrap_err()), ModelErrorKind::DimensionMismatch);
    }

    #[test]
    fn test_absolute_read_has_no_pattern() {
        let f = stencil(
            "lut",
            vec![array_arg("x", ElemType::Int, 1), array_arg("table", ElemType::Float, 1)],
            ElemType::Float,
        )
        .returns(index("table", vec![read("x", &[0])]));
        let ctx = ctx_with(f).unwrap();
        let info = ctx.stencil("lut").unwrap();
        assert!(info.patterns[0].is_some());
        assert!(info.patterns[1].is_none());
    }

    #[test]
    fn test_float_subscript_rejected() {
        let f = stencil("lut", vec![array_arg("table", ElemType::Float, 1)], ElemType::Float)
            .returns(index("table", vec![float(1.5)]));
        assert_eq!(model_kind(ctx_with(f).unwrap_err()), ModelErrorKind::TypeMismatch);
    }
}
