//! Domain inference.
//!
//! One bottom-up sweep over the pipeline annotates every vector expression
//! with its element type and the domain it is defined on:
//! - arguments of the entry point carry declared domains;
//! - a stencil call is defined where every relative read of an unpadded
//!   argument stays in range, and on the argument's own index space for a
//!   padded one;
//! - a vector-function call gets its own renamed copy of the callee,
//!   inferred against the actual argument domains;
//! - a value written by several statements, and a compose, is defined on
//!   the bounding box of its pieces, which must not overlap and must leave
//!   no index of the box unwritten.

use crate::analysis::stencil::{assignable, check_type_exists, ExprTyper, Symbol, StencilInfo};
use crate::context::CompileContext;
use crate::domain::{Domain, DomainFn, ParametricExpr, RangeCoeff};
use crate::ir::ast::*;
use crate::utils::errors::{InternalError, InternalErrorKind, ModelError, ModelErrorKind};
use crate::visit::Renamer;
use anyhow::Result;
use log::{debug, info, trace};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Statements defining one value, each with the region it writes.
#[derive(Debug, Clone)]
pub struct ValueEntry {
    pub ty: ElemType,
    pub writers: Vec<(usize, Domain)>,
}

impl ValueEntry {
    /// Bounding box of every written region.
    pub fn domain(&self) -> Result<Domain, InternalError> {
        let mut regions = self.writers.iter().map(|(_, d)| d);
        let mut domain = match regions.next() {
            Some(first) => first.clone(),
            None => return Ok(Domain::scalar()),
        };
        for region in regions {
            domain.compute_union(region)?;
        }
        Ok(domain)
    }

    /// Bounding box of every written region, rejecting a box the regions
    /// do not fill.
    pub fn covered_domain(&self, function: &str, name: &str) -> Result<Domain> {
        let domain = self.domain()?;
        if self.writers.len() > 1 {
            let parts: Vec<&Domain> = self.writers.iter().map(|(_, d)| d).collect();
            check_coverage(function, &format!("the statements writing `{}`", name), &domain, &parts)?;
        }
        Ok(domain)
    }

    pub fn writer_indices(&self) -> Vec<usize> {
        self.writers.iter().map(|(idx, _)| *idx).collect()
    }
}

/// Piecewise-defined values of one function body.
#[derive(Debug, Default)]
pub struct ValueTable {
    entries: HashMap<String, ValueEntry>,
}

impl ValueTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&ValueEntry> {
        self.entries.get(name)
    }

    /// Record that statement `stmt` writes `region` of `name`.
    pub fn define(
        &mut self,
        function: &str,
        name: &str,
        stmt: usize,
        ty: ElemType,
        region: Domain,
    ) -> Result<(), ModelError> {
        let entry = match self.entries.entry(name.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(ValueEntry {
                    ty,
                    writers: vec![(stmt, region)],
                });
                return Ok(());
            }
            Entry::Occupied(slot) => slot.into_mut(),
        };

        if entry.ty != ty {
            return Err(ModelError::new(
                ModelErrorKind::TypeMismatch,
                function,
                format!("`{}` is written with types `{}` and `{}`", name, entry.ty, ty),
            ));
        }
        for (other, written) in &entry.writers {
            if written.n_dim() != region.n_dim() {
                return Err(ModelError::new(
                    ModelErrorKind::DimensionMismatch,
                    function,
                    format!(
                        "`{}` is written as {}-d by statement {} and {}-d by statement {}",
                        name,
                        written.n_dim(),
                        other,
                        region.n_dim(),
                        stmt
                    ),
                ));
            }
            if *written == region || written.disjoint_from(&region) == Some(false) {
                return Err(ModelError::new(
                    ModelErrorKind::OverlappingDefinition,
                    function,
                    format!(
                        "statements {} and {} both write `{}` ({} and {})",
                        other, stmt, name, written, region
                    ),
                ));
            }
        }
        entry.writers.push((stmt, region));
        Ok(())
    }
}

/// Names visible inside one vector function body.
struct Scope {
    function: String,
    args: HashMap<String, (ElemType, Domain)>,
    values: ValueTable,
}

impl Scope {
    fn error(&self, kind: ModelErrorKind, message: String) -> ModelError {
        ModelError::new(kind, &self.function, message)
    }

    fn lookup(&self, name: &str) -> Result<(ElemType, Domain, Vec<usize>)> {
        if let Some((ty, domain)) = self.args.get(name) {
            return Ok((ty.clone(), domain.clone(), Vec::new()));
        }
        if let Some(entry) = self.values.get(name) {
            let domain = entry.covered_domain(&self.function, name)?;
            return Ok((entry.ty.clone(), domain, entry.writer_indices()));
        }
        Err(self
            .error(ModelErrorKind::UndefinedValue, format!("undefined value `{}`", name))
            .into())
    }
}

/// Domain of `base` with the pinned dimensions left open.
pub fn sample_domain(base: &Domain, at: &[Option<ParametricExpr>]) -> Domain {
    Domain::new(
        base.ranges
            .iter()
            .zip(at)
            .map(|(range, pin)| match pin {
                Some(_) => RangeCoeff::Unconstrained,
                None => range.clone(),
            })
            .collect(),
    )
}

/// Element type and domain of an inferred node.
pub(crate) fn annotation(expr: &VecExpr) -> Result<(ElemType, Domain), InternalError> {
    match (&expr.ty, &expr.domain) {
        (Some(ty), Some(domain)) => Ok((ty.clone(), domain.clone())),
        _ => Err(InternalError::new(
            InternalErrorKind::MissingAnnotation,
            format!("vector expression {:?} has not been inferred", expr.kind),
        )),
    }
}

/// Parameter values at which symbolic pieces are counted.
const COVERAGE_SAMPLES: [i64; 3] = [16, 37, 64];

/// Check that disjoint `parts`, given by their element counts, fill every
/// index of `bounds`.
///
/// Literal pieces are counted exactly. Symbolic pieces are counted with
/// the parameters bound to a few sample values; a shortfall at any sample
/// is a gap. Unbounded pieces are not checked.
fn check_coverage(function: &str, what: &str, bounds: &Domain, parts: &[&Domain]) -> Result<()> {
    let mut params = bounds.params();
    for part in parts {
        params.extend(part.params());
    }
    let samples: Vec<HashMap<String, i64>> = if params.is_empty() {
        vec![HashMap::new()]
    } else {
        COVERAGE_SAMPLES
            .iter()
            .map(|base| {
                params
                    .iter()
                    .enumerate()
                    .map(|(k, p)| (p.clone(), base + 3 * k as i64))
                    .collect()
            })
            .collect()
    };

    for bindings in &samples {
        let Ok(total) = bounds.count(bindings) else {
            trace!("{}: {} on unbounded {}, not checked", function, what, bounds);
            return Ok(());
        };
        let mut written = 0i64;
        for part in parts {
            let Ok(count) = part.count(bindings) else {
                trace!("{}: {} include unbounded {}, not checked", function, what, part);
                return Ok(());
            };
            written = written.saturating_add(count);
        }
        if written < total {
            let mut at: Vec<String> = bindings.iter().map(|(p, v)| format!("{} = {}", p, v)).collect();
            at.sort();
            let at = if at.is_empty() {
                String::new()
            } else {
                format!(" with {}", at.join(", "))
            };
            return Err(ModelError::new(
                ModelErrorKind::IncompleteDefinition,
                function,
                format!(
                    "{} leave {} of the {} indices of {} unwritten{}",
                    what,
                    total - written,
                    total,
                    bounds,
                    at
                ),
            )
            .into());
        }
    }
    Ok(())
}

fn check_map(function: &str, map: &DomainFn) -> Result<(), ModelError> {
    for (dim, d) in map.dims.iter().enumerate() {
        if d.scale <= 0 {
            return Err(ModelError::new(
                ModelErrorKind::InconsistentAccess,
                function,
                format!("non-positive scale {} in dimension {} of {}", d.scale, dim, map),
            ));
        }
    }
    Ok(())
}

/// Where a compose piece lands, for the overlap and coverage checks.
struct PieceRegion {
    bounds: Domain,
    map: Option<DomainFn>,
    /// Box with as many indices as the piece writes
    written: Domain,
}

impl PieceRegion {
    /// `Some(true)` when provably disjoint, `Some(false)` when provably
    /// overlapping, `None` when the bounds are symbolic.
    fn disjoint_from(&self, other: &PieceRegion) -> Option<bool> {
        if let (Some(a), Some(b)) = (&self.map, &other.map) {
            let strided_apart = a.dims.iter().zip(&b.dims).any(|(x, y)| {
                x.scale == y.scale && x.scale > 1 && (x.offset - y.offset).rem_euclid(x.scale) != 0
            });
            if strided_apart {
                return Some(true);
            }
        }
        if self.bounds == other.bounds {
            return Some(false);
        }
        self.bounds.disjoint_from(&other.bounds)
    }
}

struct DomainInference<'a> {
    ctx: &'a CompileContext,
    /// Vector functions being inferred, outermost first
    stack: Vec<String>,
    /// Instances created so far, for unique prefixes
    instances: usize,
}

impl<'a> DomainInference<'a> {
    fn new(ctx: &'a CompileContext) -> Self {
        Self {
            ctx,
            stack: Vec::new(),
            instances: 0,
        }
    }

    fn infer_vector(&mut self, func: &mut VectorFnDefn) -> Result<()> {
        let name = func.name.clone();
        let mut scope = Scope {
            function: name.clone(),
            args: HashMap::new(),
            values: ValueTable::new(),
        };

        for a in &func.args {
            if scope.args.contains_key(&a.name) {
                return Err(scope
                    .error(
                        ModelErrorKind::DuplicateDefinition,
                        format!("argument `{}` is declared twice", a.name),
                    )
                    .into());
            }
            check_type_exists(self.ctx, &name, &a.ty)?;
            let domain = if a.is_array() {
                let domain = a.domain.clone().ok_or_else(|| {
                    scope.error(
                        ModelErrorKind::DimensionMismatch,
                        format!("array argument `{}` has no declared domain", a.name),
                    )
                })?;
                if domain.n_dim() != a.n_dim {
                    return Err(scope
                        .error(
                            ModelErrorKind::DimensionMismatch,
                            format!("argument `{}` is {}-d but declares domain {}", a.name, a.n_dim, domain),
                        )
                        .into());
                }
                domain
            } else {
                Domain::scalar()
            };
            trace!("{}: argument `{}` on {}", name, a.name, domain);
            scope.args.insert(a.name.clone(), (a.ty.clone(), domain));
        }
        check_type_exists(self.ctx, &name, &func.ret)?;

        for (idx, stmt) in func.body.iter_mut().enumerate() {
            if scope.args.contains_key(&stmt.target) {
                return Err(scope
                    .error(
                        ModelErrorKind::DuplicateDefinition,
                        format!("statement {} assigns to argument `{}`", idx, stmt.target),
                    )
                    .into());
            }
            self.infer_vec_expr(&mut stmt.value, &scope)?;
            let (ty, value_domain) = annotation(&stmt.value)?;

            let written = match &stmt.region {
                None => value_domain,
                Some(region) => {
                    if !region.is_fully_constrained() {
                        return Err(scope
                            .error(
                                ModelErrorKind::DimensionMismatch,
                                format!("statement {} writes an unbounded region of `{}`", idx, stmt.target),
                            )
                            .into());
                    }
                    if !value_domain.is_scalar() {
                        if region.n_dim() != value_domain.n_dim() {
                            return Err(scope
                                .error(
                                    ModelErrorKind::DimensionMismatch,
                                    format!(
                                        "{}-d region of `{}` assigned a {}-d value",
                                        region.n_dim(),
                                        stmt.target,
                                        value_domain.n_dim()
                                    ),
                                )
                                .into());
                        }
                        if value_domain.contains(region) == Some(false) {
                            return Err(scope
                                .error(
                                    ModelErrorKind::DimensionMismatch,
                                    format!(
                                        "region {} of `{}` exceeds the value domain {}",
                                        region, stmt.target, value_domain
                                    ),
                                )
                                .into());
                        }
                    }
                    region.clone()
                }
            };
            debug!("{}: statement {} writes `{}` on {}", name, idx, stmt.target, written);
            scope.values.define(&name, &stmt.target, idx, ty, written.clone())?;
            stmt.domain = Some(written);
        }

        self.infer_vec_expr(&mut func.result, &scope)?;
        let (ty, _) = annotation(&func.result)?;
        if !assignable(&func.ret, &ty) {
            return Err(scope
                .error(
                    ModelErrorKind::TypeMismatch,
                    format!("returns `{}` but the result has type `{}`", func.ret, ty),
                )
                .into());
        }
        Ok(())
    }

    fn infer_vec_expr(&mut self, expr: &mut VecExpr, scope: &Scope) -> Result<()> {
        let (ty, domain) = match &mut expr.kind {
            VecExprKind::Id(id) => {
                let (ty, domain, writers) = scope.lookup(&id.name)?;
                id.writers = writers;
                (ty, domain)
            }
            VecExprKind::Scalar(value) => {
                let mut typer = ExprTyper::new(self.ctx, &scope.function);
                for (name, (ty, domain)) in &scope.args {
                    if domain.is_scalar() {
                        typer.bind(name, Symbol::Scalar(ty.clone()));
                    }
                }
                (typer.type_expr(value)?, Domain::scalar())
            }
            VecExprKind::Scale { base, map } => {
                self.infer_vec_expr(base, scope)?;
                let (ty, mut domain) = annotation(base)?;
                if domain.n_dim() != map.n_dim() {
                    return Err(scope
                        .error(
                            ModelErrorKind::DimensionMismatch,
                            format!("{}-d value scaled by {}-d map {}", domain.n_dim(), map.n_dim(), map),
                        )
                        .into());
                }
                check_map(&scope.function, map)?;
                domain.realign_domain(map)?;
                (ty, domain)
            }
            VecExprKind::Compose(pieces) => self.infer_compose(pieces, scope)?,
            VecExprKind::FnCall(call) => self.infer_call(call, scope)?,
            VecExprKind::MakeStruct { ty, fields } => {
                let ctx = self.ctx;
                let defn = ctx.find_struct(ty).ok_or_else(|| {
                    scope.error(ModelErrorKind::UndefinedStruct, format!("undefined struct `{}`", ty))
                })?;
                if defn.fields.len() != fields.len() {
                    return Err(scope
                        .error(
                            ModelErrorKind::ArgumentCount,
                            format!("struct `{}` has {} field(s), {} given", ty, defn.fields.len(), fields.len()),
                        )
                        .into());
                }
                let mut domain: Option<Domain> = None;
                for (field, value) in defn.fields.iter().zip(fields.iter_mut()) {
                    self.infer_vec_expr(value, scope)?;
                    let (vt, vd) = annotation(value)?;
                    if !assignable(&field.ty, &vt) {
                        return Err(scope
                            .error(
                                ModelErrorKind::TypeMismatch,
                                format!("field `{}.{}` is `{}`, given `{}`", ty, field.name, field.ty, vt),
                            )
                            .into());
                    }
                    if vd.is_scalar() {
                        continue;
                    }
                    domain = Some(match domain.take() {
                        None => vd,
                        Some(mut d) => {
                            if d.n_dim() != vd.n_dim() {
                                return Err(scope
                                    .error(
                                        ModelErrorKind::DimensionMismatch,
                                        format!("fields of `{}` have different dimensionality", ty),
                                    )
                                    .into());
                            }
                            d.compute_intersection(&vd)?;
                            d
                        }
                    });
                }
                (ElemType::Struct(ty.clone()), domain.unwrap_or_else(Domain::scalar))
            }
            VecExprKind::Sample { base, at } => {
                self.infer_vec_expr(base, scope)?;
                let (ty, domain) = annotation(base)?;
                if at.len() != domain.n_dim() {
                    return Err(scope
                        .error(
                            ModelErrorKind::DimensionMismatch,
                            format!("{}-d value sampled with {} index slot(s)", domain.n_dim(), at.len()),
                        )
                        .into());
                }
                (ty, sample_domain(&domain, at))
            }
        };
        trace!("{}: {:?} on {}", scope.function, ty, domain);
        expr.ty = Some(ty);
        expr.domain = Some(domain);
        Ok(())
    }

    fn infer_compose(&mut self, pieces: &mut [ComposePiece], scope: &Scope) -> Result<(ElemType, Domain)> {
        if pieces.is_empty() {
            return Err(scope
                .error(ModelErrorKind::DimensionMismatch, "compose without pieces".to_string())
                .into());
        }

        let mut ty: Option<ElemType> = None;
        let mut regions: Vec<PieceRegion> = Vec::with_capacity(pieces.len());

        for (idx, piece) in pieces.iter_mut().enumerate() {
            self.infer_vec_expr(&mut piece.value, scope)?;
            let (vt, vd) = annotation(&piece.value)?;

            let region = match &piece.key {
                PieceKey::Region(r) => {
                    if !vd.is_scalar() {
                        if r.n_dim() != vd.n_dim() {
                            return Err(scope
                                .error(
                                    ModelErrorKind::DimensionMismatch,
                                    format!("piece {} places a {}-d value in a {}-d region", idx, vd.n_dim(), r.n_dim()),
                                )
                                .into());
                        }
                        if vd.contains(r) == Some(false) {
                            return Err(scope
                                .error(
                                    ModelErrorKind::DimensionMismatch,
                                    format!("piece {} region {} exceeds its value domain {}", idx, r, vd),
                                )
                                .into());
                        }
                    }
                    PieceRegion {
                        bounds: r.clone(),
                        map: None,
                        written: r.clone(),
                    }
                }
                PieceKey::Map(f) => {
                    if vd.is_scalar() || f.n_dim() != vd.n_dim() {
                        return Err(scope
                            .error(
                                ModelErrorKind::DimensionMismatch,
                                format!("piece {} maps a {}-d value through {}-d {}", idx, vd.n_dim(), f.n_dim(), f),
                            )
                            .into());
                    }
                    check_map(&scope.function, f)?;
                    PieceRegion {
                        bounds: vd.image(f)?,
                        map: Some(f.clone()),
                        written: vd.clone(),
                    }
                }
            };

            for (other, prev) in regions.iter().enumerate() {
                if prev.bounds.n_dim() != region.bounds.n_dim() {
                    return Err(scope
                        .error(
                            ModelErrorKind::DimensionMismatch,
                            format!("compose pieces {} and {} differ in dimensionality", other, idx),
                        )
                        .into());
                }
                if prev.disjoint_from(&region) == Some(false) {
                    return Err(scope
                        .error(
                            ModelErrorKind::OverlappingDefinition,
                            format!("compose pieces {} and {} overlap ({} and {})", other, idx, prev.bounds, region.bounds),
                        )
                        .into());
                }
            }

            ty = Some(match ty.take() {
                None => vt,
                Some(t) => t.promote(&vt).ok_or_else(|| {
                    scope.error(
                        ModelErrorKind::TypeMismatch,
                        format!("compose mixes `{}` and `{}` pieces", t, vt),
                    )
                })?,
            });
            regions.push(region);
        }

        let mut domain = regions[0].bounds.clone();
        for r in &regions[1..] {
            domain.compute_union(&r.bounds)?;
        }
        let parts: Vec<&Domain> = regions.iter().map(|r| &r.written).collect();
        check_coverage(&scope.function, "compose pieces", &domain, &parts)?;
        // non-empty: checked above
        let ty = ty.unwrap_or(ElemType::Int);
        Ok((ty, domain))
    }

    fn infer_call(&mut self, call: &mut FnCall, scope: &Scope) -> Result<(ElemType, Domain)> {
        for a in call.args.iter_mut() {
            self.infer_vec_expr(&mut a.value, scope)?;
        }
        let ctx = self.ctx;
        if let Some(info) = ctx.stencil(&call.target) {
            self.stencil_call(info, call, scope)
        } else if let Some(template) = ctx.vector(&call.target) {
            self.vector_call(template, call, scope)
        } else {
            Err(scope
                .error(
                    ModelErrorKind::UndefinedFunction,
                    format!("call of undefined function `{}`", call.target),
                )
                .into())
        }
    }

    /// Check actual arguments against the callee's formals.
    fn check_args(&self, formals: &[FnArg], call: &FnCall, scope: &Scope, policies: bool) -> Result<()> {
        if formals.len() != call.args.len() {
            return Err(scope
                .error(
                    ModelErrorKind::ArgumentCount,
                    format!("`{}` takes {} argument(s), {} given", call.target, formals.len(), call.args.len()),
                )
                .into());
        }
        for (formal, actual) in formals.iter().zip(&call.args) {
            let (ty, domain) = annotation(&actual.value)?;
            if formal.is_array() {
                if domain.n_dim() != formal.n_dim {
                    return Err(scope
                        .error(
                            ModelErrorKind::DimensionMismatch,
                            format!(
                                "argument `{}` of `{}` is {}-d but was passed a {}-d value",
                                formal.name,
                                call.target,
                                formal.n_dim,
                                domain.n_dim()
                            ),
                        )
                        .into());
                }
                if ty != formal.ty {
                    return Err(scope
                        .error(
                            ModelErrorKind::TypeMismatch,
                            format!("argument `{}` of `{}` is `{}`, given `{}`", formal.name, call.target, formal.ty, ty),
                        )
                        .into());
                }
            } else {
                if !domain.is_scalar() {
                    return Err(scope
                        .error(
                            ModelErrorKind::DimensionMismatch,
                            format!("argument `{}` of `{}` is a scalar but was passed a {}-d value", formal.name, call.target, domain.n_dim()),
                        )
                        .into());
                }
                if !assignable(&formal.ty, &ty) {
                    return Err(scope
                        .error(
                            ModelErrorKind::TypeMismatch,
                            format!("argument `{}` of `{}` is `{}`, given `{}`", formal.name, call.target, formal.ty, ty),
                        )
                        .into());
                }
            }
            if actual.policy != BoundaryPolicy::None && (!policies || !formal.is_array()) {
                return Err(scope
                    .error(
                        ModelErrorKind::InvalidPolicy,
                        format!("boundary policy {} on argument `{}` of `{}`", actual.policy, formal.name, call.target),
                    )
                    .into());
            }
            if let BoundaryPolicy::Constant(lit) = actual.policy {
                if let Some(field) = self.truncating_field(&formal.ty, lit) {
                    return Err(scope
                        .error(
                            ModelErrorKind::InvalidPolicy,
                            format!(
                                "constant {} cannot pad `{}` argument `{}` of `{}`: {} is `int`",
                                lit, formal.ty, formal.name, call.target, field
                            ),
                        )
                        .into());
                }
            }
        }
        Ok(())
    }

    /// The integer element or field a float padding literal would be
    /// truncated into.
    fn truncating_field(&self, ty: &ElemType, lit: Literal) -> Option<String> {
        if !matches!(lit, Literal::Float(_)) {
            return None;
        }
        match ty {
            ElemType::Int => Some("the element type".to_string()),
            ElemType::Struct(name) => self
                .ctx
                .find_struct(name)?
                .fields
                .iter()
                .find(|f| f.ty == ElemType::Int)
                .map(|f| format!("field `{}.{}`", name, f.name)),
            _ => None,
        }
    }

    fn stencil_call(&mut self, info: &StencilInfo, call: &mut FnCall, scope: &Scope) -> Result<(ElemType, Domain)> {
        self.check_args(&info.defn.args, call, scope, true)?;

        let mut domain: Option<Domain> = None;
        for (actual, pattern) in call.args.iter().zip(&info.patterns) {
            let Some(pattern) = pattern else { continue };
            let (_, arg_domain) = annotation(&actual.value)?;
            let contribution = if actual.policy.needs_padding() {
                pattern.natural(&arg_domain)?
            } else {
                pattern.interior(&arg_domain)
            };
            domain = Some(match domain.take() {
                None => contribution,
                Some(mut d) => {
                    d.compute_intersection(&contribution)?;
                    d
                }
            });
        }

        let domain = domain.ok_or_else(|| {
            scope.error(
                ModelErrorKind::DimensionMismatch,
                format!(
                    "`{}` reads none of its array arguments at a relative offset, so its output domain is undefined",
                    call.target
                ),
            )
        })?;
        debug!("{}: call of `{}` defined on {}", scope.function, call.target, domain);
        Ok((info.defn.ret.clone(), domain))
    }

    fn vector_call(&mut self, template: &VectorFnDefn, call: &mut FnCall, scope: &Scope) -> Result<(ElemType, Domain)> {
        if self.stack.iter().any(|f| *f == call.target) {
            return Err(scope
                .error(
                    ModelErrorKind::RecursiveCall,
                    format!("`{}` is called recursively via {}", call.target, self.stack.join(" -> ")),
                )
                .into());
        }
        self.check_args(&template.args, call, scope, false)?;

        let prefix = format!("{}{}_", template.name, self.instances);
        self.instances += 1;
        let mut instance = Renamer::new(prefix).instantiate(template);
        for (formal, actual) in instance.args.iter_mut().zip(&call.args) {
            if !formal.is_array() {
                continue;
            }
            let (_, actual_domain) = annotation(&actual.value)?;
            let mut domain = Domain::default();
            domain.init_domain(&actual_domain);
            formal.domain = Some(domain);
        }

        self.stack.push(template.name.clone());
        let inferred = self.infer_vector(&mut instance);
        self.stack.pop();
        inferred?;

        let (_, domain) = annotation(&instance.result)?;
        debug!("{}: instance of `{}` defined on {}", scope.function, template.name, domain);
        call.instance = Some(Box::new(instance));
        Ok((template.ret.clone(), domain))
    }
}

/// Annotate a copy of the pipeline entry point, instantiating every vector
/// function call site along the way.
pub fn infer_pipeline(ctx: &CompileContext) -> Result<VectorFnDefn> {
    let entry = ctx.entry().ok_or_else(|| {
        ModelError::new(
            ModelErrorKind::MissingEntryPoint,
            "",
            "no pipeline entry point",
        )
    })?;
    let mut pipeline = entry.clone();
    let mut inference = DomainInference::new(ctx);
    inference.stack.push(entry.name.clone());
    inference.infer_vector(&mut pipeline)?;
    info!(
        "Inferred `{}` with {} call instance(s)",
        pipeline.name, inference.instances
    );
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::*;
    use crate::CompileConfig;

    fn n() -> ParametricExpr {
        ParametricExpr::param("N")
    }

    fn blur3() -> StencilFnDefn {
        stencil("blur3", vec![array_arg("x", ElemType::Float, 1)], ElemType::Float)
            .returns(div(add(add(read("x", &[-1]), read("x", &[0])), read("x", &[1])), float(3.0)))
    }

    fn run(p: Program) -> Result<VectorFnDefn> {
        let ctx = CompileContext::new(&p, CompileConfig::default())?;
        infer_pipeline(&ctx)
    }

    fn bounds(d: &Domain, n_val: i64) -> Vec<(i64, i64)> {
        let bindings: HashMap<String, i64> = [("N".to_string(), n_val)].into_iter().collect();
        d.ranges
            .iter()
            .map(|r| {
                (
                    r.lower().unwrap().evaluate(&bindings).unwrap(),
                    r.upper().unwrap().evaluate(&bindings).unwrap(),
                )
            })
            .collect()
    }

    fn model_kind(err: anyhow::Error) -> ModelErrorKind {
        err.downcast_ref::<ModelError>().unwrap().kind
    }

    fn blur_program(policy: BoundaryPolicy) -> Program {
        program("main")
            .with_param("N")
            .with_stencil(blur3())
            .with_vector(
                vector("main", vec![sized_arg("input", ElemType::Float, vec![n()])], ElemType::Float)
                    .returns(call("blur3", vec![arg_with(vid("input"), policy)])),
            )
    }

    #[test]
    fn test_blur_shrinks_by_halo() {
        let p = run(blur_program(BoundaryPolicy::None)).unwrap();
        let d = p.result.domain.as_ref().unwrap();
        assert_eq!(bounds(d, 16), vec![(1, 14)]);
        assert_eq!(p.result.ty, Some(ElemType::Float));
    }

    #[test]
    fn test_padded_blur_keeps_input_domain() {
        let p = run(blur_program(BoundaryPolicy::Clamped)).unwrap();
        assert_eq!(bounds(p.result.domain.as_ref().unwrap(), 16), vec![(0, 15)]);
        // zero padding behaves like no padding
        let p = run(blur_program(BoundaryPolicy::Constant(Literal::Float(0.0)))).unwrap();
        assert_eq!(bounds(p.result.domain.as_ref().unwrap(), 16), vec![(1, 14)]);
    }

    #[test]
    fn test_downsample_domain() {
        let down = stencil("down", vec![array_arg("x", ElemType::Float, 1)], ElemType::Float).returns(add(
            add(read_scaled("x", &[(-1, 2)]), read_scaled("x", &[(0, 2)])),
            read_scaled("x", &[(1, 2)]),
        ));
        let p = program("main").with_param("N").with_stencil(down).with_vector(
            vector("main", vec![sized_arg("x", ElemType::Float, vec![n()])], ElemType::Float)
                .returns(call("down", vec![arg(vid("x"))])),
        );
        let p = run(p).unwrap();
        // 2i - 1 >= 0 and 2i + 1 <= 15
        assert_eq!(bounds(p.result.domain.as_ref().unwrap(), 16), vec![(1, 7)]);
    }

    #[test]
    fn test_piecewise_value() {
        let p = program("main").with_param("N").with_vector(
            vector("main", vec![sized_arg("x", ElemType::Float, vec![n()])], ElemType::Float)
                .with_piece("t", Domain::literal(&[(0, 0)]), scalar(float(0.0)))
                .with_piece("t", Domain::literal(&[(1, 9)]), vid("x"))
                .returns(vid("t")),
        );
        let p = run(p).unwrap();
        assert_eq!(p.result.domain, Some(Domain::literal(&[(0, 9)])));
        match &p.result.kind {
            VecExprKind::Id(id) => assert_eq!(id.writers, vec![0, 1]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_overlapping_writers_rejected() {
        let p = program("main").with_vector(
            vector("main", vec![sized_arg("x", ElemType::Float, vec![ParametricExpr::int(10)])], ElemType::Float)
                .with_piece("t", Domain::literal(&[(0, 4)]), vid("x"))
                .with_piece("t", Domain::literal(&[(4, 9)]), vid("x"))
                .returns(vid("t")),
        );
        assert_eq!(model_kind(run(p).unwrap_err()), ModelErrorKind::OverlappingDefinition);
    }

    #[test]
    fn test_upsample_compose() {
        let f = DomainFn::scaled(&[(0, 2)]);
        let g = DomainFn::scaled(&[(1, 2)]);
        let p = program("main").with_vector(
            vector("main", vec![sized_arg("x", ElemType::Float, vec![ParametricExpr::int(8)])], ElemType::Float)
                .returns(compose(vec![(PieceKey::Map(f), vid("x")), (PieceKey::Map(g), vid("x"))])),
        );
        let p = run(p).unwrap();
        assert_eq!(p.result.domain, Some(Domain::literal(&[(0, 15)])));
    }

    #[test]
    fn test_compose_overlap_rejected() {
        let p = program("main").with_vector(
            vector("main", vec![sized_arg("x", ElemType::Float, vec![ParametricExpr::int(8)])], ElemType::Float)
                .returns(compose(vec![
                    (PieceKey::Region(Domain::literal(&[(0, 3)])), vid("x")),
                    (PieceKey::Region(Domain::literal(&[(3, 7)])), vid("x")),
                ])),
        );
        assert_eq!(model_kind(run(p).unwrap_err()), ModelErrorKind::OverlappingDefinition);
    }

    #[test]
    fn test_compose_gap_rejected() {
        let p = program("main").with_vector(
            vector("main", vec![sized_arg("x", ElemType::Float, vec![ParametricExpr::int(8)])], ElemType::Float)
                .returns(compose(vec![
                    (PieceKey::Region(Domain::literal(&[(0, 2)])), vid("x")),
                    (PieceKey::Region(Domain::literal(&[(5, 7)])), vid("x")),
                ])),
        );
        let err = run(p).unwrap_err();
        let model = err.downcast_ref::<ModelError>().unwrap();
        assert_eq!(model.kind, ModelErrorKind::IncompleteDefinition);
        assert!(model.message.contains("leave 2 of the 8 indices of [0..7] unwritten"));
    }

    #[test]
    fn test_symbolic_compose_coverage() {
        let tail = |lower: ParametricExpr| {
            Domain::new(vec![RangeCoeff::new(lower, n() * ParametricExpr::int(2) - ParametricExpr::int(1))])
        };
        let with_tail = |lower: ParametricExpr| {
            program("main").with_param("N").with_vector(
                vector("main", vec![sized_arg("x", ElemType::Float, vec![n()])], ElemType::Float).returns(compose(vec![
                    (PieceKey::Region(Domain::from_extents([n()])), vid("x")),
                    (PieceKey::Region(tail(lower)), scalar(float(0.0))),
                ])),
            )
        };
        let p = run(with_tail(n())).unwrap();
        assert_eq!(bounds(p.result.domain.as_ref().unwrap(), 16), vec![(0, 31)]);

        let err = run(with_tail(n() + ParametricExpr::int(1))).unwrap_err();
        assert_eq!(model_kind(err), ModelErrorKind::IncompleteDefinition);
    }

    #[test]
    fn test_piecewise_gap_rejected() {
        let p = program("main").with_vector(
            vector("main", vec![sized_arg("x", ElemType::Float, vec![ParametricExpr::int(10)])], ElemType::Float)
                .with_piece("t", Domain::literal(&[(0, 0)]), scalar(float(0.0)))
                .with_piece("t", Domain::literal(&[(2, 9)]), vid("x"))
                .returns(vid("t")),
        );
        let err = run(p).unwrap_err();
        let model = err.downcast_ref::<ModelError>().unwrap();
        assert_eq!(model.kind, ModelErrorKind::IncompleteDefinition);
        assert!(model.message.contains("the statements writing `t`"));
    }

    #[test]
    fn test_vector_call_instances() {
        let stage = vector("stage", vec![array_arg("x", ElemType::Float, 1)], ElemType::Float)
            .with_stmt("t", call("blur3", vec![arg(vid("x"))]))
            .returns(vid("t"));
        let p = program("main").with_param("N").with_stencil(blur3()).with_vector(stage).with_vector(
            vector("main", vec![sized_arg("input", ElemType::Float, vec![n()])], ElemType::Float)
                .with_stmt("a", call("stage", vec![arg(vid("input"))]))
                .returns(call("stage", vec![arg(vid("a"))])),
        );
        let p = run(p).unwrap();
        // two stacked blurs shrink by two on each side
        assert_eq!(bounds(p.result.domain.as_ref().unwrap(), 16), vec![(2, 13)]);
        let first = match &p.body[0].value.kind {
            VecExprKind::FnCall(c) => c.instance.as_ref().unwrap(),
            other => panic!("unexpected {:?}", other),
        };
        let second = match &p.result.kind {
            VecExprKind::FnCall(c) => c.instance.as_ref().unwrap(),
            other => panic!("unexpected {:?}", other),
        };
        assert_ne!(first.args[0].name, second.args[0].name);
        assert_ne!(first.args[0].domain, second.args[0].domain);
    }

    #[test]
    fn test_recursion_rejected() {
        let f = vector("f", vec![array_arg("x", ElemType::Float, 1)], ElemType::Float)
            .returns(call("f", vec![arg(vid("x"))]));
        let p = program("main").with_param("N").with_vector(f).with_vector(
            vector("main", vec![sized_arg("x", ElemType::Float, vec![n()])], ElemType::Float)
                .returns(call("f", vec![arg(vid("x"))])),
        );
        assert_eq!(model_kind(run(p).unwrap_err()), ModelErrorKind::RecursiveCall);
    }

    #[test]
    fn test_dimension_mismatch_message() {
        let p = program("main").with_param("N").with_stencil(blur3()).with_vector(
            vector("main", vec![sized_arg("img", ElemType::Float, vec![n(), n()])], ElemType::Float)
                .returns(call("blur3", vec![arg(vid("img"))])),
        );
        let err = run(p).unwrap_err();
        let model = err.downcast_ref::<ModelError>().unwrap();
        assert_eq!(model.kind, ModelErrorKind::DimensionMismatch);
        assert!(model.message.contains("1-d but was passed a 2-d value"));
        assert_eq!(model.function, "main");
    }

    #[test]
    fn test_policy_on_scalar_rejected() {
        let gain = stencil(
            "gain",
            vec![array_arg("x", ElemType::Float, 1), scalar_arg("k", ElemType::Float)],
            ElemType::Float,
        )
        .returns(mul(read("x", &[0]), id("k")));
        let p = program("main").with_param("N").with_stencil(gain).with_vector(
            vector(
                "main",
                vec![sized_arg("x", ElemType::Float, vec![n()]), scalar_arg("k", ElemType::Float)],
                ElemType::Float,
            )
            .returns(call(
                "gain",
                vec![arg(vid("x")), arg_with(vid("k"), BoundaryPolicy::Clamped)],
            )),
        );
        assert_eq!(model_kind(run(p).unwrap_err()), ModelErrorKind::InvalidPolicy);
    }

    #[test]
    fn test_float_constant_on_int_rejected() {
        let sum = stencil("sum", vec![array_arg("x", ElemType::Int, 1)], ElemType::Int)
            .returns(add(read("x", &[-1]), read("x", &[1])));
        let padded = |lit: Literal| {
            program("main").with_stencil(sum.clone()).with_vector(
                vector("main", vec![sized_arg("x", ElemType::Int, vec![ParametricExpr::int(8)])], ElemType::Int)
                    .returns(call("sum", vec![arg_with(vid("x"), BoundaryPolicy::Constant(lit))])),
            )
        };
        let err = run(padded(Literal::Float(1.5))).unwrap_err();
        let model = err.downcast_ref::<ModelError>().unwrap();
        assert_eq!(model.kind, ModelErrorKind::InvalidPolicy);
        assert!(model.message.contains("the element type is `int`"));
        assert!(run(padded(Literal::Int(3))).is_ok());
    }

    #[test]
    fn test_make_struct_intersects_fields() {
        let p = program("main")
            .with_struct("pair", &[("a", ElemType::Float), ("b", ElemType::Float)])
            .with_vector(
                vector(
                    "main",
                    vec![
                        sized_arg("x", ElemType::Float, vec![ParametricExpr::int(10)]),
                        sized_arg("y", ElemType::Float, vec![ParametricExpr::int(6)]),
                    ],
                    ElemType::Struct("pair".into()),
                )
                .returns(make_struct("pair", vec![vid("x"), vid("y")])),
            );
        let p = run(p).unwrap();
        assert_eq!(p.result.domain, Some(Domain::literal(&[(0, 5)])));
    }

    #[test]
    fn test_undefined_function() {
        let p = program("main").with_vector(
            vector("main", vec![sized_arg("x", ElemType::Float, vec![ParametricExpr::int(4)])], ElemType::Float)
                .returns(call("nope", vec![arg(vid("x"))])),
        );
        assert_eq!(model_kind(run(p).unwrap_err()), ModelErrorKind::UndefinedFunction);
    }

    #[test]
    fn test_sample_domain_opens_pinned_dims() {
        let base = Domain::literal(&[(0, 9), (0, 4)]);
        let d = sample_domain(&base, &[Some(ParametricExpr::int(0)), None]);
        assert!(d.ranges[0].is_unconstrained());
        assert_eq!(d.ranges[1], RangeCoeff::new(0, 4));
    }
}
