//! Header generation: struct typedefs and the kernel prototype.

use super::{kernel_signature, output_size, Usage};
use crate::context::CompileContext;
use crate::ir::ast::VectorFnDefn;
use crate::utils::errors::{ModelError, ModelErrorKind};
use crate::utils::pretty::CodeFormatter;
use anyhow::Result;

/// Include guard derived from the header file name: `kernel.h` -> `KERNEL_H`.
pub fn include_guard(file_name: &str) -> String {
    let mut guard: String = file_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    if guard.starts_with(|c: char| c.is_ascii_digit()) {
        guard.insert(0, '_');
    }
    guard
}

/// Generate the header for a lowered pipeline.
pub(crate) fn generate_header(
    ctx: &CompileContext,
    pipeline: &VectorFnDefn,
    usage: &Usage,
) -> Result<String> {
    let guard = include_guard(&ctx.config.header_file_name);
    let mut f = CodeFormatter::new("    ");

    f.writeln(&format!("#ifndef {}", guard));
    f.writeln(&format!("#define {}", guard));
    f.newline();

    emit_structs(&mut f, ctx, &usage.structs)?;

    f.writeln("#ifdef __cplusplus");
    f.writeln("extern \"C\" {");
    f.writeln("#endif");
    f.newline();
    f.writeln(&format!("/* output element count: {} */", output_size(pipeline)?));
    f.writeln(&format!("{};", kernel_signature(ctx, pipeline)));
    f.newline();
    f.writeln("#ifdef __cplusplus");
    f.writeln("}");
    f.writeln("#endif");
    f.newline();
    f.writeln(&format!("#endif /* {} */", guard));

    Ok(f.finish())
}

/// One `typedef struct` per name, in the given order.
fn emit_structs(f: &mut CodeFormatter, ctx: &CompileContext, names: &[String]) -> Result<()> {
    for name in names {
        let defn = ctx.find_struct(name).ok_or_else(|| {
            ModelError::new(
                ModelErrorKind::UndefinedStruct,
                &ctx.config.kernel_name,
                format!("struct `{}` is not defined", name),
            )
        })?;
        f.open(&format!("typedef struct {}", defn.name));
        for field in &defn.fields {
            f.writeln(&format!("{} {};", field.ty.c_name(), field.name));
        }
        f.close(&format!(" {};", defn.name));
        f.newline();
    }
    Ok(())
}
