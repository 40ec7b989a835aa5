//! # Quill Syntax
//!
//! Turns Quill template text into a [`SourceTree`]: a small description of the
//! generated type (namespace, imports, one class with constructors and an
//! execute method) that the compilation pipeline later serializes to Rust.
//!
//! The grammar is deliberately narrow. Markup is copied verbatim; `@` starts a
//! directive:
//!
//! | Syntax            | Meaning                                          |
//! |-------------------|--------------------------------------------------|
//! | `@@`              | a literal `@`                                    |
//! | `@* ... *@`       | comment, produces no output                      |
//! | `@using a::b`     | adds `a::b` to the generated imports             |
//! | `@a.b.c`          | writes a member path of the model or data bag    |
//! | `@(expr)`         | writes an explicit expression                    |
//! | `@Raw(expr)`      | writes a value that is already encoded           |
//! | `@Encode(expr)`   | writes a value through the HTML encoder          |
//! | `@Url("~/x")`     | writes a resolved application URL                |
//!
//! Expressions are member paths or the literals `"text"`, numbers, `true`,
//! `false` and `null`. A quoted HTML attribute whose value contains a directive
//! becomes an attribute write, so that `null`/`false` values collapse the
//! attribute and `true` renders the boolean shorthand.
//!
//! ```
//! use quill_syntax::{GeneratedClassContext, MarkupTranslator, TemplateTranslator};
//!
//! let translation = MarkupTranslator::new()
//!     .translate("<p>Hello @Name</p>", &GeneratedClassContext::default());
//! assert!(!translation.has_errors());
//! ```

mod context;
mod diagnostic;
mod parser;
mod tree;

pub use context::GeneratedClassContext;
pub use diagnostic::{Diagnostic, DiagnosticKind, Severity, SyntaxError};
pub use parser::MarkupTranslator;
pub use tree::{
    AttributeFragment, AttributeWrite, ConstructorDecl, Expr, GeneratedClass, LinePragma, Member,
    MethodDecl, Param, Positioned, SourceTree, Statement, Visibility,
};

/// The result of translating one template.
#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub tree: SourceTree,
    pub diagnostics: Vec<Diagnostic>,
}

impl Translation {
    /// True when any diagnostic has error severity.
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Returns the tree, or the error diagnostics when translation failed.
    pub fn into_result(self) -> Result<SourceTree, SyntaxError> {
        if self.has_errors() {
            Err(SyntaxError {
                diagnostics: self.diagnostics,
            })
        } else {
            Ok(self.tree)
        }
    }
}

/// Converts template text into a generated-source tree.
///
/// The compilation pipeline only depends on this trait, so alternative template
/// grammars can be plugged in without touching code generation.
pub trait TemplateTranslator: Send + Sync {
    /// Translates `template` into the class described by `names`.
    ///
    /// Never fails: problems are reported as [`Diagnostic`]s on the returned
    /// [`Translation`].
    fn translate(&self, template: &str, names: &GeneratedClassContext) -> Translation;
}

/// Converts a byte offset into a 1-based `(line, column)` pair.
///
/// Columns count characters, not bytes.
pub fn line_column(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let mut line = 1;
    let mut column = 1;
    for (idx, ch) in source.char_indices() {
        if idx >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    (line, column)
}
