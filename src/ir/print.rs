//! Human-readable rendering of programs for `--emit ast` and
//! `--emit domains`.

use super::ast::*;
use crate::utils::pretty::{CodeFormatter, PrettyPrint};
use pretty::{DocAllocator, DocBuilder};

const INDENT: isize = 4;

fn arg_doc<'a, D>(allocator: &'a D, a: &FnArg) -> DocBuilder<'a, D>
where
    D: DocAllocator<'a>,
    D::Doc: Clone,
{
    let ty = if a.is_array() {
        match &a.domain {
            Some(domain) => format!("{}[{}]", a.ty, domain),
            None => format!("{}[{}-d]", a.ty, a.n_dim),
        }
    } else {
        a.ty.to_string()
    };
    allocator.text(format!("{}: {}", a.name, ty))
}

fn signature<'a, D>(allocator: &'a D, keyword: &str, name: &str, args: &[FnArg], ret: &ElemType) -> DocBuilder<'a, D>
where
    D: DocAllocator<'a>,
    D::Doc: Clone,
{
    allocator
        .text(format!("{} {}(", keyword, name))
        .append(allocator.intersperse(args.iter().map(|a| arg_doc(allocator, a)), allocator.text(", ")))
        .append(allocator.text(format!(") -> {} {{", ret)))
}

impl PrettyPrint for StencilFnDefn {
    fn to_doc<'a, D>(&self, allocator: &'a D) -> DocBuilder<'a, D>
    where
        D: DocAllocator<'a>,
        D::Doc: Clone,
    {
        let mut body = allocator.nil();
        for stmt in &self.body {
            body = body
                .append(allocator.hardline())
                .append(allocator.text(format!("let {} = {};", stmt.name, stmt.value)));
        }
        body = body
            .append(allocator.hardline())
            .append(allocator.text(self.result.to_string()));

        signature(allocator, "stencil", &self.name, &self.args, &self.ret)
            .append(body.nest(INDENT))
            .append(allocator.hardline())
            .append(allocator.text("}"))
    }
}

impl PrettyPrint for VecExpr {
    fn to_doc<'a, D>(&self, allocator: &'a D) -> DocBuilder<'a, D>
    where
        D: DocAllocator<'a>,
        D::Doc: Clone,
    {
        match &self.kind {
            VecExprKind::Id(id) => allocator.text(id.name.clone()),
            VecExprKind::Scalar(e) => allocator.text(e.to_string()),
            VecExprKind::Compose(pieces) => {
                let mut inner = allocator.nil();
                for piece in pieces {
                    let key = match &piece.key {
                        PieceKey::Region(domain) => format!("{} => ", domain),
                        PieceKey::Map(f) => format!("@{} => ", f),
                    };
                    inner = inner
                        .append(allocator.hardline())
                        .append(allocator.text(key))
                        .append(piece.value.to_doc(allocator));
                }
                allocator
                    .text("compose {")
                    .append(inner.nest(INDENT))
                    .append(allocator.hardline())
                    .append(allocator.text("}"))
            }
            VecExprKind::Scale { base, map } => allocator
                .text("scale(")
                .append(base.to_doc(allocator))
                .append(allocator.text(format!(", {})", map))),
            VecExprKind::FnCall(call) => {
                let args = call.args.iter().map(|a| {
                    let value = a.value.to_doc(allocator);
                    if a.policy == BoundaryPolicy::None {
                        value
                    } else {
                        value.append(allocator.text(format!(" with {}", a.policy)))
                    }
                });
                allocator
                    .text(format!("{}(", call.target))
                    .append(
                        allocator
                            .intersperse(args, allocator.text(",").append(allocator.line()))
                            .nest(INDENT)
                            .group(),
                    )
                    .append(allocator.text(")"))
            }
            VecExprKind::MakeStruct { ty, fields } => allocator
                .text(format!("{}{{", ty))
                .append(allocator.intersperse(fields.iter().map(|f| f.to_doc(allocator)), allocator.text(", ")))
                .append(allocator.text("}")),
            VecExprKind::Sample { base, at } => {
                let pins: Vec<String> = at
                    .iter()
                    .map(|p| match p {
                        Some(p) => p.to_string(),
                        None => "*".to_string(),
                    })
                    .collect();
                allocator
                    .text("sample(")
                    .append(base.to_doc(allocator))
                    .append(allocator.text(format!(", [{}])", pins.join(", "))))
            }
        }
    }
}

impl PrettyPrint for VectorFnDefn {
    fn to_doc<'a, D>(&self, allocator: &'a D) -> DocBuilder<'a, D>
    where
        D: DocAllocator<'a>,
        D::Doc: Clone,
    {
        let mut body = allocator.nil();
        for stmt in &self.body {
            let region = match (&stmt.domain, &stmt.region) {
                (Some(d), _) | (None, Some(d)) => format!("[{}]", d),
                (None, None) => String::new(),
            };
            body = body
                .append(allocator.hardline())
                .append(allocator.text(format!("{}{} = ", stmt.target, region)))
                .append(stmt.value.to_doc(allocator))
                .append(allocator.text(";"));
        }
        let mut result = allocator.text("return ").append(self.result.to_doc(allocator));
        if let Some(domain) = &self.result.domain {
            result = result.append(allocator.text(format!("; // {}", domain)));
        }
        body = body.append(allocator.hardline()).append(result);

        signature(allocator, "vector", &self.name, &self.args, &self.ret)
            .append(body.nest(INDENT))
            .append(allocator.hardline())
            .append(allocator.text("}"))
    }
}

impl PrettyPrint for Program {
    fn to_doc<'a, D>(&self, allocator: &'a D) -> DocBuilder<'a, D>
    where
        D: DocAllocator<'a>,
        D::Doc: Clone,
    {
        let mut items = Vec::new();
        for p in &self.params {
            items.push(allocator.text(format!("param {};", p.name)));
        }
        for s in &self.structs {
            let fields: Vec<String> = s.fields.iter().map(|f| format!("{}: {}", f.name, f.ty)).collect();
            items.push(allocator.text(format!("struct {} {{ {} }}", s.name, fields.join(", "))));
        }
        for f in &self.stencils {
            items.push(f.to_doc(allocator));
        }
        for f in &self.vectors {
            let doc = f.to_doc(allocator);
            items.push(if f.name == self.entry {
                allocator.text("entry ").append(doc)
            } else {
                doc
            });
        }
        allocator.intersperse(items, allocator.hardline().append(allocator.hardline()))
    }
}

/// One line per statement and result with its inferred domain, descending
/// into vector call instances.
pub fn print_domains(pipeline: &VectorFnDefn) -> String {
    let mut f = CodeFormatter::new("  ");
    domains_of(&mut f, pipeline);
    f.finish()
}

fn domains_of(f: &mut CodeFormatter, func: &VectorFnDefn) {
    f.writeln(&format!("{}:", func.name));
    f.indent();
    for stmt in &func.body {
        match &stmt.domain {
            Some(d) => f.writeln(&format!("{}: {}", stmt.target, d)),
            None => f.writeln(&format!("{}: <not inferred>", stmt.target)),
        }
        instances_of(f, &stmt.value);
    }
    match &func.result.domain {
        Some(d) => f.writeln(&format!("result: {}", d)),
        None => f.writeln("result: <not inferred>"),
    }
    instances_of(f, &func.result);
    f.dedent();
}

fn instances_of(f: &mut CodeFormatter, expr: &VecExpr) {
    match &expr.kind {
        VecExprKind::FnCall(call) => {
            for a in &call.args {
                instances_of(f, &a.value);
            }
            if let Some(instance) = &call.instance {
                domains_of(f, instance);
            }
        }
        VecExprKind::Compose(pieces) => {
            for p in pieces {
                instances_of(f, &p.value);
            }
        }
        VecExprKind::Scale { base, .. } | VecExprKind::Sample { base, .. } => instances_of(f, base),
        VecExprKind::MakeStruct { fields, .. } => {
            for field in fields {
                instances_of(f, field);
            }
        }
        VecExprKind::Id(_) | VecExprKind::Scalar(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Domain, ParametricExpr};
    use crate::ir::builder::*;

    #[test]
    fn test_stencil_pretty() {
        let f = stencil("blur3", vec![array_arg("x", ElemType::Float, 1)], ElemType::Float)
            .with_let("s", add(read("x", &[-1]), read("x", &[1])))
            .returns(div(id("s"), float(2.0)));
        let text = f.pretty();
        assert!(text.starts_with("stencil blur3(x: float[1-d]) -> float {"));
        assert!(text.contains("\n    let s = (x@[i - 1] + x@[i + 1]);"));
        assert!(text.ends_with("\n}"));
    }

    #[test]
    fn test_vector_pretty() {
        let f = vector(
            "main",
            vec![sized_arg("input", ElemType::Float, vec![ParametricExpr::param("N")])],
            ElemType::Float,
        )
        .with_piece("t", Domain::literal(&[(0, 3)]), scalar(float(0.0)))
        .returns(call("blur3", vec![arg_with(vid("t"), BoundaryPolicy::Mirror)]));
        let text = f.pretty();
        assert!(text.contains("t[[0..3]] = 0.0;"));
        assert!(text.contains("return blur3(t with mirror)"));
    }

    #[test]
    fn test_print_domains_uninferred() {
        let f = vector("main", vec![], ElemType::Float).returns(scalar(float(1.0)));
        assert_eq!(print_domains(&f), "main:\n  result: <not inferred>\n");
    }
}
