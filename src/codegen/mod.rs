//! Code generation from annotated, boundary-lowered pipelines.
//!
//! One compilation yields a header (struct typedefs and the kernel
//! prototype) and a source unit (stencil helpers and the kernel body).

pub mod c;
pub mod header;

pub use c::CCodeGen;
use header::generate_header;

use crate::analysis::infer::annotation;
use crate::context::CompileContext;
use crate::domain::ParametricExpr;
use crate::ir::ast::*;
use crate::utils::errors::{CodegenError, CodegenErrorKind};
use crate::visit::{walk_expr, walk_vec_expr, walk_vector, Visitor};
use anyhow::Result;
use log::debug;
use std::collections::BTreeSet;

/// Target for code generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Target {
    /// Standard C
    #[default]
    C,
    /// C with OpenMP pragmas on the outermost loop of each nest
    OpenMP,
}

/// The two emitted translation units.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledKernel {
    pub header: String,
    pub source: String,
}

/// Generate the header and source for a lowered pipeline.
pub fn generate(ctx: &CompileContext, pipeline: &VectorFnDefn) -> Result<CompiledKernel> {
    let usage = Usage::collect(ctx, pipeline);
    debug!(
        "Pipeline uses {} stencil(s) and {} struct type(s)",
        usage.stencils.len(),
        usage.structs.len()
    );

    let header = generate_header(ctx, pipeline, &usage)?;
    let source = CCodeGen::new(ctx, ctx.config.target == Target::OpenMP).generate(pipeline, &usage)?;
    Ok(CompiledKernel { header, source })
}

/// `void <kernel>(arrays..., scalars..., int params..., <ret>* output)`
pub(crate) fn kernel_signature(ctx: &CompileContext, pipeline: &VectorFnDefn) -> String {
    let mut params = Vec::new();
    for a in pipeline.args.iter().filter(|a| a.is_array()) {
        params.push(format!("{}* {}", a.ty.c_name(), a.name));
    }
    for a in pipeline.args.iter().filter(|a| !a.is_array()) {
        params.push(format!("{} {}", a.ty.c_name(), a.name));
    }
    for p in ctx.params() {
        params.push(format!("int {}", p));
    }
    params.push(format!("{}* output", pipeline.ret.c_name()));
    format!("void {}({})", ctx.config.kernel_name, params.join(", "))
}

/// Element count of the output buffer.
pub(crate) fn output_size(pipeline: &VectorFnDefn) -> Result<ParametricExpr> {
    let (_, domain) = annotation(&pipeline.result)?;
    domain.size().ok_or_else(|| {
        CodegenError::new(
            CodegenErrorKind::UnboundedDomain,
            format!("the result of `{}` has unbounded domain {}", pipeline.name, domain),
        )
        .into()
    })
}

/// Stencil functions and struct types a pipeline references.
#[derive(Debug, Default)]
pub(crate) struct Usage {
    /// Referenced stencils, by name
    pub stencils: Vec<String>,
    /// Referenced structs, each after the structs it contains
    pub structs: Vec<String>,
}

impl Usage {
    pub fn collect(ctx: &CompileContext, pipeline: &VectorFnDefn) -> Self {
        let mut collector = UsageCollector {
            ctx,
            stencils: BTreeSet::new(),
            structs: BTreeSet::new(),
        };
        collector.visit_vector(pipeline);
        for name in collector.stencils.clone() {
            if let Some(info) = ctx.stencil(&name) {
                for a in &info.defn.args {
                    collector.note_type(&a.ty);
                }
                collector.note_type(&info.defn.ret);
                collector.visit_stencil(&info.defn);
            }
        }

        let mut structs = Vec::new();
        for name in &collector.structs {
            order_struct(ctx, name, &mut structs);
        }
        Self {
            stencils: collector.stencils.into_iter().collect(),
            structs,
        }
    }
}

fn order_struct(ctx: &CompileContext, name: &str, out: &mut Vec<String>) {
    if out.iter().any(|s| s == name) {
        return;
    }
    if let Some(defn) = ctx.find_struct(name) {
        for field in &defn.fields {
            if let ElemType::Struct(inner) = &field.ty {
                order_struct(ctx, inner, out);
            }
        }
    }
    out.push(name.to_string());
}

struct UsageCollector<'a> {
    ctx: &'a CompileContext,
    stencils: BTreeSet<String>,
    structs: BTreeSet<String>,
}

impl UsageCollector<'_> {
    fn note_type(&mut self, ty: &ElemType) {
        if let ElemType::Struct(name) = ty {
            self.structs.insert(name.clone());
        }
    }
}

impl Visitor for UsageCollector<'_> {
    fn visit_expr(&mut self, expr: &Expr) {
        if let Some(ty) = &expr.ty {
            self.note_type(ty);
        }
        walk_expr(self, expr);
    }

    fn visit_vec_expr(&mut self, expr: &VecExpr) {
        if let Some(ty) = &expr.ty {
            self.note_type(ty);
        }
        if let VecExprKind::FnCall(call) = &expr.kind {
            if self.ctx.stencil(&call.target).is_some() {
                self.stencils.insert(call.target.clone());
            }
        }
        walk_vec_expr(self, expr);
    }

    fn visit_vector(&mut self, func: &VectorFnDefn) {
        for a in &func.args {
            self.note_type(&a.ty);
        }
        self.note_type(&func.ret);
        walk_vector(self, func);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ParametricExpr;
    use crate::ir::builder::*;
    use crate::CompileConfig;

    fn rgb_program() -> Program {
        let luma = stencil(
            "luma",
            vec![array_arg("img", ElemType::Struct("pixel".into()), 1)],
            ElemType::Float,
        )
        .returns(read_field("img", &[0], "g"));
        let pipeline = vector(
            "main",
            vec![sized_arg("img", ElemType::Struct("pixel".into()), vec![ParametricExpr::param("N")])],
            ElemType::Float,
        )
        .returns(call("luma", vec![arg(vid("img"))]));
        program("main")
            .with_param("N")
            .with_struct("rgb", &[("r", ElemType::Float), ("g", ElemType::Float)])
            .with_struct("pixel", &[("c", ElemType::Struct("rgb".into())), ("g", ElemType::Float)])
            .with_struct("unused", &[("u", ElemType::Int)])
            .with_stencil(luma)
            .with_vector(pipeline)
    }

    #[test]
    fn test_usage_orders_nested_structs() {
        let ctx = CompileContext::new(&rgb_program(), CompileConfig::default()).unwrap();
        let pipeline = crate::lower(&ctx).unwrap();
        let usage = Usage::collect(&ctx, &pipeline);
        assert_eq!(usage.stencils, vec!["luma".to_string()]);
        assert_eq!(usage.structs, vec!["rgb".to_string(), "pixel".to_string()]);
    }

    #[test]
    fn test_kernel_signature_order() {
        let pipeline = vector(
            "main",
            vec![
                scalar_arg("gain", ElemType::Float),
                sized_arg("a", ElemType::Int, vec![ParametricExpr::param("N")]),
            ],
            ElemType::Double,
        )
        .returns(vid("a"));
        let p = program("main").with_param("N").with_vector(pipeline.clone());
        let config = CompileConfig {
            kernel_name: "run".into(),
            ..CompileConfig::default()
        };
        let ctx = CompileContext::new(&p, config).unwrap();
        assert_eq!(
            kernel_signature(&ctx, &pipeline),
            "void run(int* a, float gain, int N, double* output)"
        );
    }
}
