//! Translation diagnostics.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warning,
}

/// What went wrong while translating a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    UnterminatedComment,
    CodeBlockUnsupported,
    EmptyExpression,
    ExpectedCloseParen,
    UnterminatedString,
    UnexpectedCharacter,
    UrlExpectsString,
}

impl DiagnosticKind {
    /// Stable diagnostic code, e.g. `QS0003`.
    pub fn code(self) -> &'static str {
        match self {
            DiagnosticKind::UnterminatedComment => "QS0001",
            DiagnosticKind::CodeBlockUnsupported => "QS0002",
            DiagnosticKind::EmptyExpression => "QS0003",
            DiagnosticKind::ExpectedCloseParen => "QS0004",
            DiagnosticKind::UnterminatedString => "QS0005",
            DiagnosticKind::UnexpectedCharacter => "QS0006",
            DiagnosticKind::UrlExpectsString => "QS0007",
        }
    }

    fn message(self) -> &'static str {
        match self {
            DiagnosticKind::UnterminatedComment => "comment is not terminated with '*@'",
            DiagnosticKind::CodeBlockUnsupported => "'@{' code blocks are not supported",
            DiagnosticKind::EmptyExpression => "expected an expression after '@'",
            DiagnosticKind::ExpectedCloseParen => "expected ')' to close the expression",
            DiagnosticKind::UnterminatedString => "string literal is not terminated",
            DiagnosticKind::UnexpectedCharacter => "unexpected character in expression",
            DiagnosticKind::UrlExpectsString => "@Url expects a string literal",
        }
    }
}

/// A single problem found in the template text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub message: String,
    /// Byte offset into the template.
    pub position: usize,
    pub line: usize,
    pub column: usize,
}

impl Diagnostic {
    pub fn new(
        kind: DiagnosticKind,
        severity: Severity,
        position: usize,
        (line, column): (usize, usize),
    ) -> Self {
        Self {
            kind,
            severity,
            message: kind.message().to_string(),
            position,
            line,
            column,
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn is_warning(&self) -> bool {
        self.severity == Severity::Warning
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}:{}): {}",
            self.code(),
            self.line,
            self.column,
            self.message
        )
    }
}

/// Error form of a failed translation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("template has {} syntax error(s)", error_count(.diagnostics))]
pub struct SyntaxError {
    pub diagnostics: Vec<Diagnostic>,
}

fn error_count(diagnostics: &[Diagnostic]) -> usize {
    diagnostics.iter().filter(|d| !d.is_warning()).count()
}
