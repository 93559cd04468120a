//! C code generation.
//!
//! Every array lives in a flat row-major buffer described by its name plus
//! one `const int <name>_lb<d>` / `<name>_ext<d>` pair per dimension, so
//! element `(i0, i1)` of `t` is `t[(i0 - t_lb0) * t_ext1 + (i1 - t_lb1)]`.
//! Locals and temporaries are heap-allocated at the start of their block
//! and freed at its end.
//!
//! Stencil functions become `static inline` helpers that take the output
//! index, then each array formal with its bounds, then scalar formals and
//! global parameters. Vector function calls are emitted inline as nested
//! blocks over their per-call-site instance. After boundary lowering no
//! loop performs a bounds check: every padded read has been rewritten into
//! a piece that addresses a valid index.

use super::{kernel_signature, output_size, Usage};
use crate::analysis::halo::call_hull;
use crate::analysis::infer::annotation;
use crate::analysis::stencil::StencilInfo;
use crate::context::CompileContext;
use crate::domain::{Domain, DomainFnDim, RangeCoeff};
use crate::ir::ast::*;
use crate::utils::errors::{CodegenError, CodegenErrorKind, InternalError, InternalErrorKind};
use crate::utils::pretty::CodeFormatter;
use anyhow::Result;
use log::{debug, trace};
use std::collections::HashMap;

/// Integer helpers referenced by rendered parametric bounds.
const PREAMBLE: &[&str] = &[
    "static inline int sc_min(int a, int b) { return a < b ? a : b; }",
    "static inline int sc_max(int a, int b) { return a > b ? a : b; }",
    "static inline int sc_floord(int n, int d) { return n >= 0 ? n / d : -((-n + d - 1) / d); }",
    "static inline int sc_ceild(int n, int d) { return n >= 0 ? (n + d - 1) / d : -((-n) / d); }",
];

/// C code generator.
pub struct CCodeGen<'a> {
    ctx: &'a CompileContext,
    /// Enable OpenMP pragmas
    openmp: bool,
}

impl<'a> CCodeGen<'a> {
    pub fn new(ctx: &'a CompileContext, openmp: bool) -> Self {
        Self { ctx, openmp }
    }

    /// Generate the source unit for a lowered pipeline.
    pub(crate) fn generate(&self, pipeline: &VectorFnDefn, usage: &Usage) -> Result<String> {
        let mut e = Emitter {
            ctx: self.ctx,
            openmp: self.openmp,
            f: CodeFormatter::new("    "),
            temps: 0,
        };

        e.f.writeln(&format!("#include \"{}\"", self.ctx.config.header_file_name));
        e.f.writeln("#include <math.h>");
        e.f.writeln("#include <stdlib.h>");
        if self.openmp {
            e.f.writeln("#include <omp.h>");
        }
        e.f.newline();
        for line in PREAMBLE {
            e.f.writeln(line);
        }
        e.f.newline();

        for name in &usage.stencils {
            let info = self.ctx.stencil(name).ok_or_else(|| {
                InternalError::new(
                    InternalErrorKind::UnhandledVariant,
                    format!("stencil `{}` is referenced but not registered", name),
                )
            })?;
            e.emit_stencil(info)?;
            e.f.newline();
        }

        e.emit_kernel(pipeline)?;
        debug!("Emitted {} temporary buffer(s)", e.temps);
        Ok(e.f.finish())
    }
}

/// A flat array visible in the current block.
#[derive(Debug, Clone)]
struct Buffer {
    name: String,
    ty: ElemType,
    n_dim: usize,
}

impl Buffer {
    fn new(name: impl Into<String>, ty: ElemType, n_dim: usize) -> Self {
        Self {
            name: name.into(),
            ty,
            n_dim,
        }
    }

    fn lb(&self, dim: usize) -> String {
        format!("{}_lb{}", self.name, dim)
    }

    fn ext(&self, dim: usize) -> String {
        format!("{}_ext{}", self.name, dim)
    }

    /// The element at `index`; a zero-dimensional buffer ignores it.
    fn at(&self, index: &[String]) -> String {
        if self.n_dim == 0 {
            return format!("{}[0]", self.name);
        }
        format!("{}[{}]", self.name, flat_index(&self.name, index))
    }
}

/// Row-major offset of `index` into the buffer `name`.
fn flat_index(name: &str, index: &[String]) -> String {
    let mut terms = index
        .iter()
        .enumerate()
        .map(|(d, i)| format!("{} - {}_lb{}", paren(i), name, d));
    let Some(first) = terms.next() else {
        return "0".to_string();
    };
    let mut acc = first;
    for (d, term) in terms.enumerate() {
        acc = format!("({}) * {}_ext{} + ({})", acc, name, d + 1, term);
    }
    acc
}

fn paren(s: &str) -> String {
    if s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') || s.starts_with('(') && s.ends_with(')') {
        s.to_string()
    } else {
        format!("({})", s)
    }
}

/// `scale * var + offset`, simplified.
fn affine(var: &str, dim: &DomainFnDim) -> String {
    let scaled = if dim.scale == 1 {
        var.to_string()
    } else {
        format!("{} * {}", dim.scale, var)
    };
    match dim.offset {
        0 => scaled,
        o if o > 0 => format!("{} + {}", scaled, o),
        o => format!("{} - {}", scaled, -o),
    }
}

fn loop_var(dim: usize) -> String {
    format!("_i{}", dim)
}

/// Global parameters passed to a stencil helper, minus those its own
/// formals shadow.
fn stencil_params<'c>(ctx: &'c CompileContext, defn: &StencilFnDefn) -> Vec<&'c String> {
    ctx.params()
        .iter()
        .filter(|p| defn.args.iter().all(|a| &a.name != *p))
        .collect()
}

fn c_literal(lit: Literal, ty: &ElemType) -> Result<String> {
    let text = match (ty, lit) {
        (ElemType::Int, Literal::Int(v)) => v.to_string(),
        (ElemType::Int, Literal::Float(_)) => {
            return Err(CodegenError::new(
                CodegenErrorKind::UnresolvedType,
                format!("float literal {} cannot be written to an `int`", lit),
            )
            .into())
        }
        (ElemType::Float, Literal::Int(v)) => format!("{}.0f", v),
        (ElemType::Float, Literal::Float(v)) => format!("{:?}f", v),
        (ElemType::Double, Literal::Int(v)) => format!("{}.0", v),
        (ElemType::Double, Literal::Float(v)) => format!("{:?}", v),
        (ElemType::Struct(name), _) => {
            return Err(CodegenError::new(
                CodegenErrorKind::UnresolvedType,
                format!("literal {} cannot have struct type `{}`", lit, name),
            )
            .into())
        }
    };
    if text.starts_with('-') {
        Ok(format!("({})", text))
    } else {
        Ok(text)
    }
}

/// C library spelling of a math function for a result type.
fn math_name(name: &str, ty: &ElemType) -> String {
    match (ty, name) {
        (ElemType::Int, "min") => "sc_min".to_string(),
        (ElemType::Int, "max") => "sc_max".to_string(),
        (ElemType::Int, "abs") => "abs".to_string(),
        (ElemType::Double, "abs") => "fabs".to_string(),
        (ElemType::Double, "min") => "fmin".to_string(),
        (ElemType::Double, "max") => "fmax".to_string(),
        (ElemType::Double, other) => other.to_string(),
        (_, "abs") => "fabsf".to_string(),
        (_, "min") => "fminf".to_string(),
        (_, "max") => "fmaxf".to_string(),
        (_, other) => format!("{}f", other),
    }
}

fn unresolved(what: impl std::fmt::Display) -> CodegenError {
    CodegenError::new(
        CodegenErrorKind::UnresolvedType,
        format!("{} has no resolved element type", what),
    )
}

/// Values visible in one C block.
#[derive(Debug, Default)]
struct Frame {
    buffers: HashMap<String, Buffer>,
    scalars: HashMap<String, ElemType>,
    /// Sub-expressions already computed into a temporary in this block
    memo: Vec<(VecExpr, Buffer)>,
    /// Buffers allocated in this block
    owned: Vec<String>,
}

struct Emitter<'a> {
    ctx: &'a CompileContext,
    openmp: bool,
    f: CodeFormatter,
    temps: usize,
}

impl Emitter<'_> {
    fn emit_stencil(&mut self, info: &StencilInfo) -> Result<()> {
        let func = &info.defn;
        let mut params: Vec<String> = (0..info.n_dim.unwrap_or(0))
            .map(|d| format!("int {}", loop_var(d)))
            .collect();
        for a in &func.args {
            if a.is_array() {
                params.push(format!("const {}* {}", a.ty.c_name(), a.name));
                for d in 0..a.n_dim {
                    params.push(format!("int {}_lb{}", a.name, d));
                    params.push(format!("int {}_ext{}", a.name, d));
                }
            } else {
                params.push(format!("{} {}", a.ty.c_name(), a.name));
            }
        }
        for p in stencil_params(self.ctx, func) {
            params.push(format!("int {}", p));
        }

        trace!("Emitting stencil helper `{}`", func.name);
        self.f.open(&format!(
            "static inline {} {}({})",
            func.ret.c_name(),
            func.name,
            params.join(", ")
        ));
        for stmt in &func.body {
            let ty = stmt.ty.as_ref().ok_or_else(|| unresolved(format!("`{}`", stmt.name)))?;
            let value = self.scalar_expr(&stmt.value, true)?;
            self.f.writeln(&format!("{} {} = {};", ty.c_name(), stmt.name, value));
        }
        let result = self.scalar_expr(&func.result, true)?;
        self.f.writeln(&format!("return {};", result));
        self.f.close("");
        Ok(())
    }

    /// Render a scalar expression. Relative reads are only meaningful
    /// inside a stencil helper, where `_i<d>` is the output index.
    fn scalar_expr(&self, expr: &Expr, in_stencil: bool) -> Result<String> {
        let ty = expr.ty.as_ref().ok_or_else(|| unresolved(expr))?;
        let text = match &expr.kind {
            ExprKind::Value(lit) => c_literal(*lit, ty)?,
            ExprKind::Id(name) => name.clone(),
            ExprKind::MathFn { name, args } => {
                let args = args
                    .iter()
                    .map(|a| self.scalar_expr(a, in_stencil))
                    .collect::<Result<Vec<_>>>()?;
                format!("{}({})", math_name(name, ty), args.join(", "))
            }
            ExprKind::Ternary { cond, then, otherwise } => format!(
                "({} ? {} : {})",
                self.scalar_expr(cond, in_stencil)?,
                self.scalar_expr(then, in_stencil)?,
                self.scalar_expr(otherwise, in_stencil)?
            ),
            ExprKind::BinaryOp { op: BinaryOp::Mod, lhs, rhs } if *ty != ElemType::Int => {
                let name = if *ty == ElemType::Double { "fmod" } else { "fmodf" };
                format!(
                    "{}({}, {})",
                    name,
                    self.scalar_expr(lhs, in_stencil)?,
                    self.scalar_expr(rhs, in_stencil)?
                )
            }
            ExprKind::BinaryOp { op, lhs, rhs } => format!(
                "({} {} {})",
                self.scalar_expr(lhs, in_stencil)?,
                op,
                self.scalar_expr(rhs, in_stencil)?
            ),
            ExprKind::UnaryNeg(base) => format!("(-{})", self.scalar_expr(base, in_stencil)?),
            ExprKind::StructLiteral { ty: name, fields } => {
                let fields = fields
                    .iter()
                    .map(|a| self.scalar_expr(a, in_stencil))
                    .collect::<Result<Vec<_>>>()?;
                format!("(({}){{{}}})", name, fields.join(", "))
            }
            ExprKind::ArrayAccess { name, indices } => {
                let index = indices
                    .iter()
                    .map(|i| self.scalar_expr(i, in_stencil))
                    .collect::<Result<Vec<_>>>()?;
                format!("{}[{}]", name, flat_index(name, &index))
            }
            ExprKind::StencilAccess { name, access, field } => {
                if !in_stencil {
                    return Err(InternalError::new(
                        InternalErrorKind::UnhandledVariant,
                        format!("relative read {} outside a stencil function", expr),
                    )
                    .into());
                }
                let index: Vec<String> = access
                    .dims
                    .iter()
                    .enumerate()
                    .map(|(d, dim)| affine(&loop_var(d), dim))
                    .collect();
                let read = format!("{}[{}]", name, flat_index(name, &index));
                match field {
                    Some(field) => format!("{}.{}", read, field),
                    None => read,
                }
            }
        };
        Ok(text)
    }

    fn emit_kernel(&mut self, pipeline: &VectorFnDefn) -> Result<()> {
        let (_, result_domain) = annotation(&pipeline.result)?;
        let size = output_size(pipeline)?;

        self.f.writeln(&format!("/* output element count: {} */", size));
        self.f.open(&kernel_signature(self.ctx, pipeline));

        let mut frame = Frame::default();
        for a in &pipeline.args {
            if a.is_array() {
                let domain = a.domain.as_ref().ok_or_else(|| {
                    CodegenError::new(
                        CodegenErrorKind::UnboundedDomain,
                        format!("entry argument `{}` has no declared domain", a.name),
                    )
                })?;
                let buf = Buffer::new(&a.name, a.ty.clone(), a.n_dim);
                self.declare_bounds(&buf, domain)?;
                frame.buffers.insert(a.name.clone(), buf);
            } else {
                frame.scalars.insert(a.name.clone(), a.ty.clone());
            }
        }

        let output = Buffer::new("output", pipeline.ret.clone(), result_domain.n_dim());
        self.declare_bounds(&output, &result_domain)?;
        self.emit_body(pipeline, &mut frame, &output, &result_domain)?;
        self.f.close("");
        Ok(())
    }

    /// `const int <name>_lb<d> = ...;` and `<name>_ext<d>` per dimension.
    fn declare_bounds(&mut self, buf: &Buffer, domain: &Domain) -> Result<()> {
        for (d, range) in domain.ranges.iter().enumerate() {
            let RangeCoeff::Range { lower, .. } = range else {
                return Err(unbounded(&buf.name, domain).into());
            };
            let extent = range.extent().ok_or_else(|| unbounded(&buf.name, domain))?;
            self.f.writeln(&format!("const int {} = {};", buf.lb(d), lower.to_c()));
            self.f.writeln(&format!("const int {} = {};", buf.ext(d), extent.to_c()));
        }
        Ok(())
    }

    fn allocate(&mut self, buf: &Buffer, domain: &Domain, frame: &mut Frame) -> Result<()> {
        self.declare_bounds(buf, domain)?;
        let count = if buf.n_dim == 0 {
            "1".to_string()
        } else {
            (0..buf.n_dim).map(|d| buf.ext(d)).collect::<Vec<_>>().join(" * ")
        };
        let ty = buf.ty.c_name();
        self.f.writeln(&format!(
            "{}* {} = ({}*)malloc(sizeof({}) * ({}));",
            ty, buf.name, ty, ty, count
        ));
        frame.owned.push(buf.name.clone());
        Ok(())
    }

    /// Emit the statements and result of `func` with the result written to
    /// `dest` over `region`, then release the block's allocations.
    fn emit_body(
        &mut self,
        func: &VectorFnDefn,
        frame: &mut Frame,
        dest: &Buffer,
        region: &Domain,
    ) -> Result<()> {
        let mut locals: Vec<(String, ElemType, Domain)> = Vec::new();
        for stmt in &func.body {
            let (ty, _) = annotation(&stmt.value)?;
            let written = written_region(stmt)?;
            match locals.iter_mut().find(|(name, _, _)| *name == stmt.target) {
                Some((_, _, domain)) => domain.compute_union(&written)?,
                None => locals.push((stmt.target.clone(), ty, written)),
            }
        }
        for (name, ty, domain) in &locals {
            let buf = Buffer::new(name, ty.clone(), domain.n_dim());
            self.allocate(&buf, domain, frame)?;
            frame.buffers.insert(name.clone(), buf);
        }

        for stmt in &func.body {
            let written = written_region(stmt)?;
            let target = frame.buffers.get(&stmt.target).cloned().ok_or_else(|| {
                InternalError::new(
                    InternalErrorKind::MissingAnnotation,
                    format!("local `{}` was not allocated", stmt.target),
                )
            })?;
            self.f.writeln(&format!("/* {} on {} */", stmt.target, written));
            self.emit_into(&stmt.value, &target, &written, frame)?;
        }
        self.emit_into(&func.result, dest, region, frame)?;

        for name in frame.owned.drain(..) {
            self.f.writeln(&format!("free({});", name));
        }
        Ok(())
    }

    /// Open one loop per dimension of `region`, write the statement built
    /// from the loop variables, and close the nest.
    fn emit_loop<F>(&mut self, region: &Domain, body: F) -> Result<()>
    where
        F: FnOnce(&[String]) -> Result<String>,
    {
        let vars: Vec<String> = (0..region.n_dim()).map(loop_var).collect();
        for (d, range) in region.ranges.iter().enumerate() {
            let RangeCoeff::Range { lower, upper } = range else {
                return Err(unbounded("loop", region).into());
            };
            if d == 0 && self.openmp {
                self.f.writeln("#pragma omp parallel for");
            }
            self.f.open(&format!(
                "for (int {v} = {}; {v} <= {}; {v}++)",
                lower.to_c(),
                upper.to_c(),
                v = vars[d]
            ));
        }
        let stmt = body(&vars)?;
        self.f.writeln(&stmt);
        for _ in 0..region.n_dim() {
            self.f.close("");
        }
        Ok(())
    }

    fn copy(&mut self, src: &Buffer, dest: &Buffer, region: &Domain) -> Result<()> {
        self.emit_loop(region, |vars| Ok(format!("{} = {};", dest.at(vars), src.at(vars))))
    }

    fn broadcast(&mut self, value: &str, dest: &Buffer, region: &Domain) -> Result<()> {
        self.emit_loop(region, |vars| Ok(format!("{} = {};", dest.at(vars), value)))
    }

    /// Compute `expr` into a buffer of its own domain, reusing a buffer
    /// already holding the same value in this block.
    fn materialize(&mut self, expr: &VecExpr, frame: &mut Frame) -> Result<Buffer> {
        if let VecExprKind::Id(id) = &expr.kind {
            if let Some(buf) = frame.buffers.get(&id.name) {
                return Ok(buf.clone());
            }
        }
        if let Some((_, buf)) = frame.memo.iter().find(|(e, _)| e == expr) {
            return Ok(buf.clone());
        }

        let (ty, domain) = annotation(expr)?;
        let buf = Buffer::new(format!("_t{}", self.temps), ty, domain.n_dim());
        self.temps += 1;
        self.allocate(&buf, &domain, frame)?;
        self.emit_into(expr, &buf, &domain, frame)?;
        frame.memo.push((expr.clone(), buf.clone()));
        Ok(buf)
    }

    /// A C expression for a zero-dimensional value.
    fn scalar_value(&mut self, expr: &VecExpr, frame: &mut Frame) -> Result<String> {
        match &expr.kind {
            VecExprKind::Scalar(e) => self.scalar_expr(e, false),
            VecExprKind::Id(id) if frame.scalars.contains_key(&id.name) => Ok(id.name.clone()),
            _ => {
                let (_, domain) = annotation(expr)?;
                if !domain.is_scalar() {
                    return Err(InternalError::new(
                        InternalErrorKind::ArityMismatch,
                        format!("{}-d value passed where a scalar is expected", domain.n_dim()),
                    )
                    .into());
                }
                let buf = self.materialize(expr, frame)?;
                Ok(buf.at(&[]))
            }
        }
    }

    /// Write `expr` into `dest` for every index of `region`.
    fn emit_into(&mut self, expr: &VecExpr, dest: &Buffer, region: &Domain, frame: &mut Frame) -> Result<()> {
        if expr.ty.is_none() {
            return Err(unresolved(format!("{:?}", expr.kind)).into());
        }
        match &expr.kind {
            VecExprKind::Id(id) => {
                if let Some(src) = frame.buffers.get(&id.name).cloned() {
                    self.copy(&src, dest, region)
                } else if frame.scalars.contains_key(&id.name) {
                    self.broadcast(&id.name.clone(), dest, region)
                } else {
                    Err(InternalError::new(
                        InternalErrorKind::MissingAnnotation,
                        format!("value `{}` is not visible at code generation", id.name),
                    )
                    .into())
                }
            }
            VecExprKind::Scalar(e) => {
                let value = self.scalar_expr(e, false)?;
                self.broadcast(&value, dest, region)
            }
            VecExprKind::FnCall(call) => {
                let ctx = self.ctx;
                match ctx.stencil(&call.target) {
                    Some(info) => self.emit_stencil_call(info, call, dest, region, frame),
                    None => self.emit_instance(call, dest, region, frame),
                }
            }
            VecExprKind::Compose(pieces) => {
                if expr.domain.as_ref() != Some(region) {
                    let src = self.materialize(expr, frame)?;
                    return self.copy(&src, dest, region);
                }
                self.emit_compose(pieces, dest, frame)
            }
            VecExprKind::Scale { base, map } => {
                let src = self.materialize(base, frame)?;
                self.emit_loop(region, |vars| {
                    let index: Vec<String> =
                        map.dims.iter().zip(vars).map(|(d, v)| affine(v, d)).collect();
                    Ok(format!("{} = {};", dest.at(vars), src.at(&index)))
                })
            }
            VecExprKind::MakeStruct { ty, fields } => {
                let mut parts = Vec::new();
                for field in fields {
                    let (_, domain) = annotation(field)?;
                    if domain.is_scalar() {
                        parts.push(FieldSource::Value(self.scalar_value(field, frame)?));
                    } else {
                        parts.push(FieldSource::Buffer(self.materialize(field, frame)?));
                    }
                }
                self.emit_loop(region, |vars| {
                    let values: Vec<String> = parts
                        .iter()
                        .map(|p| match p {
                            FieldSource::Value(v) => v.clone(),
                            FieldSource::Buffer(b) => b.at(vars),
                        })
                        .collect();
                    Ok(format!("{} = (({}){{{}}});", dest.at(vars), ty, values.join(", ")))
                })
            }
            VecExprKind::Sample { base, at } => {
                let src = self.materialize(base, frame)?;
                self.emit_loop(region, |vars| {
                    let index: Vec<String> = at
                        .iter()
                        .zip(vars)
                        .map(|(pin, v)| match pin {
                            Some(p) => p.to_c(),
                            None => v.clone(),
                        })
                        .collect();
                    Ok(format!("{} = {};", dest.at(vars), src.at(&index)))
                })
            }
        }
    }

    /// Emit every piece of a compose whose domain is exactly the region
    /// being written.
    fn emit_compose(&mut self, pieces: &[ComposePiece], dest: &Buffer, frame: &mut Frame) -> Result<()> {
        // Values that boundary pieces sample are computed once and copied.
        let sampled: Vec<&VecExpr> = pieces
            .iter()
            .filter_map(|p| match &p.value.kind {
                VecExprKind::Sample { base, .. } => Some(&**base),
                _ => None,
            })
            .collect();

        for piece in pieces {
            match &piece.key {
                PieceKey::Region(region) => {
                    let shared = !matches!(piece.value.kind, VecExprKind::Id(_))
                        && sampled.iter().any(|b| **b == piece.value);
                    if shared {
                        let src = self.materialize(&piece.value, frame)?;
                        self.copy(&src, dest, region)?;
                    } else {
                        self.emit_into(&piece.value, dest, region, frame)?;
                    }
                }
                PieceKey::Map(map) => {
                    let src = self.materialize(&piece.value, frame)?;
                    let (_, domain) = annotation(&piece.value)?;
                    self.emit_loop(&domain, |vars| {
                        let index: Vec<String> =
                            map.dims.iter().zip(vars).map(|(d, v)| affine(v, d)).collect();
                        Ok(format!("{} = {};", dest.at(&index), src.at(vars)))
                    })?;
                }
            }
        }
        Ok(())
    }

    fn emit_stencil_call(
        &mut self,
        info: &StencilInfo,
        call: &FnCall,
        dest: &Buffer,
        region: &Domain,
        frame: &mut Frame,
    ) -> Result<()> {
        let mut args = Vec::new();
        for (pos, (formal, actual)) in info.defn.args.iter().zip(&call.args).enumerate() {
            if actual.policy.needs_padding() {
                return Err(CodegenError::new(
                    CodegenErrorKind::UnloweredBoundary,
                    format!(
                        "argument {} of `{}` still carries boundary policy {}",
                        pos, call.target, actual.policy
                    ),
                )
                .into());
            }
            if formal.is_array() {
                let buf = self.materialize(&actual.value, frame)?;
                args.push(buf.name.clone());
                for d in 0..buf.n_dim {
                    args.push(buf.lb(d));
                    args.push(buf.ext(d));
                }
            } else {
                args.push(self.scalar_value(&actual.value, frame)?);
            }
        }
        args.extend(stencil_params(self.ctx, &info.defn).into_iter().cloned());

        match call_hull(self.ctx, call, true)? {
            Some(hull) => self.f.writeln(&format!("/* {} on {}, halo {} */", call.target, region, hull)),
            None => self.f.writeln(&format!("/* {} on {} */", call.target, region)),
        }
        self.emit_loop(region, |vars| {
            let mut call_args = vars.to_vec();
            call_args.extend(args);
            Ok(format!("{} = {}({});", dest.at(vars), call.target, call_args.join(", ")))
        })
    }

    /// Inline a vector function call as a nested block over its instance.
    fn emit_instance(&mut self, call: &FnCall, dest: &Buffer, region: &Domain, frame: &mut Frame) -> Result<()> {
        let instance = call.instance.as_deref().ok_or_else(|| {
            InternalError::new(
                InternalErrorKind::MissingAnnotation,
                format!("call of `{}` was not instantiated", call.target),
            )
        })?;

        // Actuals are evaluated in the caller's block.
        let mut bindings = Vec::new();
        for (formal, actual) in instance.args.iter().zip(&call.args) {
            if formal.is_array() {
                let buf = self.materialize(&actual.value, frame)?;
                bindings.push((formal, FieldSource::Buffer(buf)));
            } else {
                let value = self.scalar_value(&actual.value, frame)?;
                bindings.push((formal, FieldSource::Value(value)));
            }
        }

        self.f.writeln(&format!("/* {} */", call.target));
        self.f.open("");
        let mut inner = Frame::default();
        for (formal, source) in bindings {
            let ty = formal.ty.c_name();
            match source {
                FieldSource::Buffer(buf) => {
                    self.f.writeln(&format!("{}* {} = {};", ty, formal.name, buf.name));
                    let alias = Buffer::new(&formal.name, formal.ty.clone(), buf.n_dim);
                    for d in 0..buf.n_dim {
                        self.f.writeln(&format!("const int {} = {};", alias.lb(d), buf.lb(d)));
                        self.f.writeln(&format!("const int {} = {};", alias.ext(d), buf.ext(d)));
                    }
                    inner.buffers.insert(formal.name.clone(), alias);
                }
                FieldSource::Value(value) => {
                    self.f.writeln(&format!("{} {} = {};", ty, formal.name, value));
                    inner.scalars.insert(formal.name.clone(), formal.ty.clone());
                }
            }
        }
        self.emit_body(instance, &mut inner, dest, region)?;
        self.f.close("");
        Ok(())
    }
}

/// Where one field of a struct (or one bound argument) comes from.
enum FieldSource {
    Value(String),
    Buffer(Buffer),
}

fn written_region(stmt: &VecStmt) -> Result<Domain, InternalError> {
    stmt.domain.clone().ok_or_else(|| {
        InternalError::new(
            InternalErrorKind::MissingAnnotation,
            format!("statement defining `{}` has no inferred region", stmt.target),
        )
    })
}

fn unbounded(what: &str, domain: &Domain) -> CodegenError {
    CodegenError::new(
        CodegenErrorKind::UnboundedDomain,
        format!("`{}` has unbounded domain {}", what, domain),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ParametricExpr;
    use crate::ir::builder::*;
    use crate::CompileConfig;

    fn compile(p: &Program, target: crate::codegen::Target) -> String {
        let config = CompileConfig {
            target,
            ..CompileConfig::default()
        };
        crate::compile(p, &config).unwrap().source
    }

    fn blur_program(policy: BoundaryPolicy) -> Program {
        let blur = stencil("blur3", vec![array_arg("x", ElemType::Float, 1)], ElemType::Float)
            .returns(div(add(add(read("x", &[-1]), read("x", &[0])), read("x", &[1])), float(3.0)));
        let pipeline = vector(
            "main",
            vec![sized_arg("input", ElemType::Float, vec![ParametricExpr::int(16)])],
            ElemType::Float,
        )
        .returns(call("blur3", vec![arg_with(vid("input"), policy)]));
        program("main").with_stencil(blur).with_vector(pipeline)
    }

    #[test]
    fn test_flat_index() {
        assert_eq!(flat_index("x", &[]), "0");
        assert_eq!(flat_index("x", &["_i0".into()]), "_i0 - x_lb0");
        assert_eq!(
            flat_index("t", &["_i0".into(), "_i1 + 1".into()]),
            "(_i0 - t_lb0) * t_ext1 + ((_i1 + 1) - t_lb1)"
        );
    }

    #[test]
    fn test_affine() {
        assert_eq!(affine("_i0", &DomainFnDim::new(0, 1)), "_i0");
        assert_eq!(affine("_i0", &DomainFnDim::new(1, 2)), "2 * _i0 + 1");
        assert_eq!(affine("_i1", &DomainFnDim::new(-1, 1)), "_i1 - 1");
    }

    #[test]
    fn test_literals() {
        assert_eq!(c_literal(Literal::Float(3.0), &ElemType::Float).unwrap(), "3.0f");
        assert_eq!(c_literal(Literal::Int(2), &ElemType::Double).unwrap(), "2.0");
        assert_eq!(c_literal(Literal::Int(-4), &ElemType::Int).unwrap(), "(-4)");
        assert!(c_literal(Literal::Int(0), &ElemType::Struct("rgb".into())).is_err());
        assert!(c_literal(Literal::Float(2.5), &ElemType::Int).is_err());
    }

    #[test]
    fn test_math_names() {
        assert_eq!(math_name("sqrt", &ElemType::Float), "sqrtf");
        assert_eq!(math_name("sqrt", &ElemType::Double), "sqrt");
        assert_eq!(math_name("abs", &ElemType::Float), "fabsf");
        assert_eq!(math_name("max", &ElemType::Int), "sc_max");
    }

    #[test]
    fn test_interior_only_blur() {
        let source = compile(&blur_program(BoundaryPolicy::None), crate::codegen::Target::C);
        assert!(source.contains("static inline float blur3(int _i0, const float* x, int x_lb0, int x_ext0)"));
        assert!(source.contains("return (((x[(_i0 - 1) - x_lb0] + x[_i0 - x_lb0]) + x[(_i0 + 1) - x_lb0]) / 3.0f);"));
        assert!(source.contains("for (int _i0 = 1; _i0 <= 14; _i0++)"));
        assert!(source.contains("output[_i0 - output_lb0] = blur3(_i0, input, input_lb0, input_ext0);"));
        assert!(!source.contains("malloc"));
        assert!(!source.contains("#pragma omp"));
    }

    #[test]
    fn test_mirror_blur_covers_edges() {
        let source = compile(&blur_program(BoundaryPolicy::Mirror), crate::codegen::Target::C);
        assert!(source.contains("const int output_lb0 = 0;"));
        assert!(source.contains("const int output_ext0 = 16;"));
        // the padded argument is materialized once over [-1..16]
        assert!(source.contains("const int _t0_lb0 = (-1);"));
        assert!(source.contains("const int _t0_ext0 = 18;"));
        assert!(source.contains("free(_t0);"));
    }

    #[test]
    fn test_openmp_pragma() {
        let source = compile(&blur_program(BoundaryPolicy::None), crate::codegen::Target::OpenMP);
        assert!(source.contains("#include <omp.h>"));
        assert!(source.contains("#pragma omp parallel for\n    for (int _i0"));
    }

    #[test]
    fn test_vector_call_inlined() {
        let blur = stencil("blur3", vec![array_arg("x", ElemType::Float, 1)], ElemType::Float)
            .returns(add(read("x", &[-1]), read("x", &[1])));
        let stage = vector("stage", vec![array_arg("a", ElemType::Float, 1)], ElemType::Float)
            .returns(call("blur3", vec![arg(vid("a"))]));
        let pipeline = vector(
            "main",
            vec![sized_arg("input", ElemType::Float, vec![ParametricExpr::int(16)])],
            ElemType::Float,
        )
        .returns(call("stage", vec![arg(vid("input"))]));
        let p = program("main").with_stencil(blur).with_vector(stage).with_vector(pipeline);
        let source = compile(&p, crate::codegen::Target::C);
        assert!(source.contains("/* stage */"));
        assert!(source.contains("float* stage0_a = input;"));
        assert!(source.contains("const int stage0_a_lb0 = input_lb0;"));
    }
}
