//! Pretty printing utilities for program trees and generated code.
//!
//! [`PrettyPrint`] renders annotated trees for `--emit ast`;
//! [`CodeFormatter`] tracks indentation while the code generator writes C.

use pretty::{BoxAllocator, DocAllocator, DocBuilder};

/// Default line width for pretty printing.
pub const DEFAULT_WIDTH: usize = 80;

/// A pretty-printable value.
pub trait PrettyPrint {
    /// Convert to a pretty document.
    fn to_doc<'a, D>(&self, allocator: &'a D) -> DocBuilder<'a, D>
    where
        D: DocAllocator<'a>,
        D::Doc: Clone;

    /// Pretty print to a string with the given width.
    fn pretty_print(&self, width: usize) -> String {
        let doc = self.to_doc(&BoxAllocator).into_doc();
        let mut output = String::new();
        match doc.render_fmt(width, &mut output) {
            Ok(()) => output,
            Err(_) => String::new(),
        }
    }

    /// Pretty print with default width.
    fn pretty(&self) -> String {
        self.pretty_print(DEFAULT_WIDTH)
    }
}

/// A simple code formatter for generated code.
#[derive(Debug)]
pub struct CodeFormatter {
    output: String,
    indent_level: usize,
    indent_str: String,
    at_line_start: bool,
}

impl CodeFormatter {
    /// Create a new formatter with the given indent string.
    pub fn new(indent_str: &str) -> Self {
        Self {
            output: String::new(),
            indent_level: 0,
            indent_str: indent_str.to_string(),
            at_line_start: true,
        }
    }

    /// Increase indentation level.
    pub fn indent(&mut self) {
        self.indent_level += 1;
    }

    /// Decrease indentation level.
    pub fn dedent(&mut self) {
        if self.indent_level > 0 {
            self.indent_level -= 1;
        }
    }

    /// Write text.
    pub fn write(&mut self, s: &str) {
        for c in s.chars() {
            if c == '\n' {
                self.output.push('\n');
                self.at_line_start = true;
            } else {
                if self.at_line_start {
                    for _ in 0..self.indent_level {
                        self.output.push_str(&self.indent_str);
                    }
                    self.at_line_start = false;
                }
                self.output.push(c);
            }
        }
    }

    /// Write a line.
    pub fn writeln(&mut self, s: &str) {
        self.write(s);
        self.write("\n");
    }

    /// Write an empty line.
    pub fn newline(&mut self) {
        self.write("\n");
    }

    /// Open a braced block and indent.
    pub fn open(&mut self, header: &str) {
        if header.is_empty() {
            self.writeln("{");
        } else {
            self.write(header);
            self.writeln(" {");
        }
        self.indent();
    }

    /// Dedent and close a braced block; `trailer` follows the brace.
    pub fn close(&mut self, trailer: &str) {
        self.dedent();
        self.write("}");
        self.writeln(trailer);
    }

    /// Get the formatted output.
    pub fn finish(self) -> String {
        self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_formatter() {
        let mut fmt = CodeFormatter::new("  ");
        fmt.writeln("int main() {");
        fmt.indent();
        fmt.writeln("printf(\"Hello\");");
        fmt.writeln("return 0;");
        fmt.dedent();
        fmt.writeln("}");

        let output = fmt.finish();
        assert!(output.contains("  printf"));
        assert!(output.contains("  return"));
    }

    #[test]
    fn test_close_trailer() {
        let mut fmt = CodeFormatter::new("  ");
        fmt.open("typedef struct rgb");
        fmt.writeln("float r;");
        fmt.close(" rgb;");
        assert_eq!(fmt.finish(), "typedef struct rgb {\n  float r;\n} rgb;\n");
    }
}
