//! Compiler diagnostics.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One error or warning reported while compiling a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerError {
    pub message: String,
    pub file_name: String,
    pub line: usize,
    pub column: usize,
    pub code: String,
    pub is_warning: bool,
}

impl CompilerError {
    pub fn new(
        message: impl Into<String>,
        file_name: impl Into<String>,
        line: usize,
        column: usize,
        code: impl Into<String>,
        is_warning: bool,
    ) -> Self {
        Self {
            message: message.into(),
            file_name: file_name.into(),
            line,
            column,
            code: code.into(),
            is_warning,
        }
    }

    /// An error without a source location.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(message, "", 0, 0, "", false)
    }
}

impl fmt::Display for CompilerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            " - {}: ({}, {}) {}",
            if self.is_warning { "warning" } else { "error" },
            self.line,
            self.column,
            self.message
        )
    }
}

#[derive(Deserialize)]
struct RustcDiagnostic {
    message: String,
    level: String,
    code: Option<RustcCode>,
    #[serde(default)]
    spans: Vec<RustcSpan>,
}

#[derive(Deserialize)]
struct RustcCode {
    code: String,
}

#[derive(Deserialize)]
struct RustcSpan {
    file_name: String,
    line_start: usize,
    column_start: usize,
    #[serde(default)]
    is_primary: bool,
}

/// Parses `rustc --error-format json` output.
///
/// Keeps errors and warnings; notes, help and lines that are not JSON are
/// skipped. Positions come from the primary span.
pub fn parse_rustc_diagnostics(stderr: &str) -> Vec<CompilerError> {
    stderr
        .lines()
        .filter(|line| line.trim_start().starts_with('{'))
        .filter_map(|line| serde_json::from_str::<RustcDiagnostic>(line).ok())
        .filter_map(|diagnostic| {
            let is_warning = if diagnostic.level.starts_with("error") {
                false
            } else if diagnostic.level.starts_with("warning") {
                true
            } else {
                return None;
            };
            let span = diagnostic
                .spans
                .iter()
                .find(|s| s.is_primary)
                .or_else(|| diagnostic.spans.first());
            let (file_name, line, column) = span
                .map(|s| (s.file_name.clone(), s.line_start, s.column_start))
                .unwrap_or_default();
            Some(CompilerError {
                message: diagnostic.message,
                file_name,
                line,
                column,
                code: diagnostic.code.map(|c| c.code).unwrap_or_default(),
                is_warning,
            })
        })
        .collect()
}
