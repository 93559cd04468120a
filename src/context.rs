//! Compilation context.
//!
//! One [`CompileContext`] is built per compilation by the driver and passed
//! by reference to every pass. It owns the struct registry, the global
//! parameter table and the function tables, so no pass reaches for global
//! state.

use crate::analysis::stencil::{analyze_stencil, StencilInfo};
use crate::ir::ast::*;
use crate::domain::Domain;
use crate::utils::errors::{ModelError, ModelErrorKind};
use crate::visit::{walk_vec_expr, Visitor};
use crate::CompileConfig;
use anyhow::Result;
use log::debug;
use std::collections::{BTreeMap, BTreeSet};

/// Tables shared by all passes of one compilation.
#[derive(Debug)]
pub struct CompileContext {
    /// Driver configuration
    pub config: CompileConfig,
    structs: BTreeMap<String, StructDefn>,
    params: Vec<String>,
    stencils: BTreeMap<String, StencilInfo>,
    vectors: BTreeMap<String, VectorFnDefn>,
    entry: String,
}

impl CompileContext {
    /// Register every definition of `program` and analyze its stencils.
    pub fn new(program: &Program, config: CompileConfig) -> Result<Self> {
        let mut ctx = Self {
            config,
            structs: BTreeMap::new(),
            params: Vec::new(),
            stencils: BTreeMap::new(),
            vectors: BTreeMap::new(),
            entry: program.entry.clone(),
        };

        for s in &program.structs {
            if ctx.structs.insert(s.name.clone(), s.clone()).is_some() {
                return Err(duplicate(&s.name, "struct").into());
            }
        }
        for s in &program.structs {
            for field in &s.fields {
                if let ElemType::Struct(inner) = &field.ty {
                    if !ctx.structs.contains_key(inner) {
                        return Err(ModelError::new(
                            ModelErrorKind::UndefinedStruct,
                            &s.name,
                            format!("field `{}` has undefined struct type `{}`", field.name, inner),
                        )
                        .into());
                    }
                }
            }
        }

        for s in &program.structs {
            if ctx.struct_reaches(&s.name, &s.name, &mut Vec::new()) {
                return Err(ModelError::new(
                    ModelErrorKind::UndefinedStruct,
                    &s.name,
                    format!("struct `{}` contains itself", s.name),
                )
                .into());
            }
        }

        for p in &program.params {
            if ctx.params.contains(&p.name) {
                return Err(duplicate(&p.name, "parameter").into());
            }
            ctx.params.push(p.name.clone());
        }

        for f in &program.vectors {
            if ctx.vectors.insert(f.name.clone(), f.clone()).is_some() {
                return Err(duplicate(&f.name, "vector function").into());
            }
            if let Some(name) = domain_params(f).into_iter().find(|p| !ctx.is_param(p)) {
                return Err(ModelError::new(
                    ModelErrorKind::UndefinedParameter,
                    &f.name,
                    format!("domain bound names undeclared parameter `{}`", name),
                )
                .into());
            }
        }

        let mut stencils = BTreeMap::new();
        for f in &program.stencils {
            if ctx.vectors.contains_key(&f.name) || stencils.contains_key(&f.name) {
                return Err(duplicate(&f.name, "function").into());
            }
            let info = analyze_stencil(&ctx, f)?;
            debug!("Analyzed stencil `{}`", f.name);
            stencils.insert(f.name.clone(), info);
        }
        ctx.stencils = stencils;

        if !ctx.vectors.contains_key(&ctx.entry) {
            return Err(ModelError::new(
                ModelErrorKind::MissingEntryPoint,
                &ctx.entry,
                "the pipeline entry point is not a vector function",
            )
            .into());
        }

        Ok(ctx)
    }

    fn struct_reaches(&self, from: &str, target: &str, seen: &mut Vec<String>) -> bool {
        let Some(defn) = self.structs.get(from) else {
            return false;
        };
        for field in &defn.fields {
            if let ElemType::Struct(inner) = &field.ty {
                if inner == target {
                    return true;
                }
                if !seen.contains(inner) {
                    seen.push(inner.clone());
                    if self.struct_reaches(inner, target, seen) {
                        return true;
                    }
                }
            }
        }
        false
    }

    pub fn find_struct(&self, name: &str) -> Option<&StructDefn> {
        self.structs.get(name)
    }

    pub fn structs(&self) -> impl Iterator<Item = &StructDefn> {
        self.structs.values()
    }

    /// Global parameters in declaration order.
    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn is_param(&self, name: &str) -> bool {
        self.params.iter().any(|p| p == name)
    }

    pub fn stencil(&self, name: &str) -> Option<&StencilInfo> {
        self.stencils.get(name)
    }

    pub fn stencils(&self) -> impl Iterator<Item = &StencilInfo> {
        self.stencils.values()
    }

    pub fn vector(&self, name: &str) -> Option<&VectorFnDefn> {
        self.vectors.get(name)
    }

    /// The pipeline entry point.
    pub fn entry(&self) -> Option<&VectorFnDefn> {
        self.vectors.get(&self.entry)
    }
}

/// Parameters named by the declared domains, written regions, piece
/// regions and sample positions of a vector function.
fn domain_params(func: &VectorFnDefn) -> BTreeSet<String> {
    let mut collector = ParamCollector::default();
    for a in &func.args {
        if let Some(domain) = &a.domain {
            collector.note(domain);
        }
    }
    for stmt in &func.body {
        if let Some(region) = &stmt.region {
            collector.note(region);
        }
    }
    collector.visit_vector(func);
    collector.params
}

#[derive(Default)]
struct ParamCollector {
    params: BTreeSet<String>,
}

impl ParamCollector {
    fn note(&mut self, domain: &Domain) {
        self.params.extend(domain.params());
    }
}

impl Visitor for ParamCollector {
    fn visit_vec_expr(&mut self, expr: &VecExpr) {
        match &expr.kind {
            VecExprKind::Compose(pieces) => {
                for piece in pieces {
                    if let PieceKey::Region(region) = &piece.key {
                        self.note(region);
                    }
                }
            }
            VecExprKind::Sample { at, .. } => {
                for pin in at.iter().flatten() {
                    self.params.extend(pin.params());
                }
            }
            _ => {}
        }
        walk_vec_expr(self, expr);
    }
}

fn duplicate(name: &str, what: &str) -> ModelError {
    ModelError::new(
        ModelErrorKind::DuplicateDefinition,
        name,
        format!("{} `{}` is defined more than once", what, name),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::*;

    fn pipeline() -> VectorFnDefn {
        vector("main", vec![], ElemType::Float).returns(scalar(float(1.0)))
    }

    #[test]
    fn test_missing_entry() {
        let p = program("nope").with_vector(pipeline());
        let err = CompileContext::new(&p, CompileConfig::default()).unwrap_err();
        let model = err.downcast_ref::<ModelError>().unwrap();
        assert_eq!(model.kind, ModelErrorKind::MissingEntryPoint);
    }

    #[test]
    fn test_duplicate_param() {
        let p = program("main").with_param("N").with_param("N").with_vector(pipeline());
        assert!(CompileContext::new(&p, CompileConfig::default()).is_err());
    }

    #[test]
    fn test_undefined_nested_struct() {
        let p = program("main")
            .with_struct("pair", &[("a", ElemType::Struct("missing".into()))])
            .with_vector(pipeline());
        let err = CompileContext::new(&p, CompileConfig::default()).unwrap_err();
        let model = err.downcast_ref::<ModelError>().unwrap();
        assert_eq!(model.kind, ModelErrorKind::UndefinedStruct);
    }

    #[test]
    fn test_recursive_struct() {
        let p = program("main")
            .with_struct("a", &[("next", ElemType::Struct("b".into()))])
            .with_struct("b", &[("back", ElemType::Struct("a".into()))])
            .with_vector(pipeline());
        let err = CompileContext::new(&p, CompileConfig::default()).unwrap_err();
        assert!(err.to_string().contains("contains itself"));
    }

    #[test]
    fn test_undeclared_domain_param() {
        let f = vector(
            "main",
            vec![sized_arg("x", ElemType::Float, vec![crate::domain::ParametricExpr::param("M")])],
            ElemType::Float,
        )
        .returns(vid("x"));
        let err = CompileContext::new(&program("main").with_param("N").with_vector(f.clone()), CompileConfig::default())
            .unwrap_err();
        let model = err.downcast_ref::<ModelError>().unwrap();
        assert_eq!(model.kind, ModelErrorKind::UndefinedParameter);
        assert!(model.message.contains("`M`"));
        assert_eq!(model.function, "main");

        assert!(CompileContext::new(&program("main").with_param("M").with_vector(f), CompileConfig::default()).is_ok());
    }

    #[test]
    fn test_undeclared_region_param() {
        let f = vector("main", vec![], ElemType::Float)
            .with_piece(
                "t",
                Domain::from_extents([crate::domain::ParametricExpr::param("K")]),
                scalar(float(0.0)),
            )
            .returns(vid("t"));
        let err = CompileContext::new(&program("main").with_vector(f), CompileConfig::default()).unwrap_err();
        assert_eq!(err.downcast_ref::<ModelError>().unwrap().kind, ModelErrorKind::UndefinedParameter);
    }

    #[test]
    fn test_tables() {
        let p = program("main")
            .with_param("H")
            .with_param("W")
            .with_struct("rgb", &[("r", ElemType::Float), ("g", ElemType::Float)])
            .with_vector(pipeline());
        let ctx = CompileContext::new(&p, CompileConfig::default()).unwrap();
        assert_eq!(ctx.params(), &["H".to_string(), "W".to_string()]);
        assert!(ctx.is_param("W"));
        assert!(ctx.find_struct("rgb").is_some());
        assert_eq!(ctx.entry().unwrap().name, "main");
    }
}
