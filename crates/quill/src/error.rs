//! Error types of the compilation pipeline.
//!
//! [`QuillError`] is what every [`Engine`](crate::Engine) operation returns.
//! Failed compilations carry a [`TemplateCompilationError`], whose `Display`
//! is a full report: diagnostics, the template, the generated source, the
//! scratch directory and the libraries the default resolver currently sees.

use std::fmt;
use std::sync::Arc;

use quill_compiler::{CompilationData, CompilerError, ReferenceError};
use quill_runtime::RenderError;
use quill_syntax::{Diagnostic, Severity};
use thiserror::Error;

use crate::context::TypeContext;
use crate::loader::LoadError;
use crate::resolver::{CurrentModulesReferenceResolver, ReferenceResolver};

#[derive(Debug, Error)]
pub enum QuillError {
    #[error("invalid type context: {0}")]
    InvalidContext(String),

    #[error(
        "anonymous model types cannot be compiled: `{0}`; \
         compile without a model type to use a dynamic model instead"
    )]
    AnonymousModelType(String),

    #[error("unsupported compiler reference: {0}")]
    UnsupportedReference(#[from] ReferenceError),

    #[error(transparent)]
    Compilation(#[from] Box<TemplateCompilationError>),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("unexpected error while {context}")]
    Unexpected {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("compiled template model type `{expected}` does not match the model type `{found}` provided")]
    ModelTypeMismatch { expected: String, found: String },

    #[error("model could not be serialized: {0}")]
    Model(#[from] serde_json::Error),

    #[error("render failed: {0}")]
    Render(#[from] RenderError),

    #[error("template failed to compile: {0}")]
    Failed(Arc<QuillError>),

    #[error("configuration error: {0}")]
    Config(String),
}

impl QuillError {
    pub fn unexpected(
        context: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        QuillError::Unexpected {
            context: context.into(),
            source: source.into(),
        }
    }

    /// The compilation report, for compilation failures.
    pub fn compilation(&self) -> Option<&TemplateCompilationError> {
        match self {
            QuillError::Compilation(err) => Some(err),
            QuillError::Failed(inner) => inner.compilation(),
            _ => None,
        }
    }
}

impl From<TemplateCompilationError> for QuillError {
    fn from(err: TemplateCompilationError) -> Self {
        QuillError::Compilation(Box::new(err))
    }
}

impl From<minijinja::Error> for QuillError {
    fn from(err: minijinja::Error) -> Self {
        QuillError::unexpected("serializing generated source", err)
    }
}

const REPORT_SEPARATOR_START: &str = "------------- START -----------";
const REPORT_SEPARATOR_END: &str = "------------- END -----------";

fn separate(text: &str) -> String {
    format!("\n{REPORT_SEPARATOR_START}\n{text}\n{REPORT_SEPARATOR_END}\n")
}

/// A template that did not translate or compile.
#[derive(Debug)]
pub struct TemplateCompilationError {
    errors: Vec<CompilerError>,
    compilation_data: Option<CompilationData>,
    template: String,
}

impl TemplateCompilationError {
    pub fn new(
        errors: Vec<CompilerError>,
        compilation_data: Option<CompilationData>,
        template: impl Into<String>,
    ) -> Self {
        Self {
            errors,
            compilation_data,
            template: template.into(),
        }
    }

    /// A failure of the template translator; nothing was compiled.
    pub fn from_diagnostics(diagnostics: &[Diagnostic], source_file: &str, template: impl Into<String>) -> Self {
        let errors = diagnostics
            .iter()
            .map(|d| {
                CompilerError::new(
                    d.message.clone(),
                    source_file,
                    d.line,
                    d.column,
                    d.code(),
                    d.severity == Severity::Warning,
                )
            })
            .collect();
        Self::new(errors, None, template)
    }

    pub fn errors(&self) -> &[CompilerError] {
        &self.errors
    }

    pub fn compilation_data(&self) -> Option<&CompilationData> {
        self.compilation_data.as_ref()
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Removes the scratch directory now instead of on drop.
    pub fn dispose(&self) {
        if let Some(data) = &self.compilation_data {
            data.dispose();
        }
    }

    /// The report; `references` lists what the default resolver sees.
    pub fn report(&self, references: &[String]) -> String {
        let errors = self
            .errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n\t");

        let mut report = String::from(
            "Errors while compiling a Template.\n\
             Please try the following to solve the situation:\n\
             \x20 * If the problem is about missing references, add them to the engine \
             configuration or install a custom ReferenceResolver.\n\
             \x20 * If the problem is about a missing crate in a `@using`, make sure an \
             rlib of that crate is among the configured references.\n\
             \x20 * Set `debug` in the engine configuration to keep the generated source \
             (`generated_template.rs`) next to the compiler output.\n\
             More details about the error:\n",
        );
        report.push('\t');
        report.push_str(&errors);
        report.push('\n');

        if let Some(folder) = self.compilation_data.as_ref().and_then(|d| d.tmp_folder()) {
            report.push_str(&format!(
                "Temporary files of the compilation can be found in (please delete the folder): {}\n",
                folder.display()
            ));
        }

        report.push_str(&format!(
            "The template we tried to compile is: {}\n",
            separate(&self.template)
        ));

        if let Some(source) = self.compilation_data.as_ref().and_then(|d| d.source_code()) {
            report.push_str(&format!(
                "The generated source code is: {}\n",
                separate(source)
            ));
        }

        report.push_str("\nList of loaded libraries:\n");
        if !references.is_empty() {
            report.push_str("\tLoaded library: ");
            report.push_str(&references.join("\n\tLoaded library: "));
        }
        report
    }
}

impl fmt::Display for TemplateCompilationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let context = TypeContext::new(self.template.as_str());
        let references: Vec<String> = CurrentModulesReferenceResolver
            .resolve(&context, Vec::new())
            .iter()
            .map(|r| match r.to_file() {
                Ok(path) => path.display().to_string(),
                Err(err) => format!("<{err}>"),
            })
            .collect();
        f.write_str(&self.report(&references))
    }
}

impl std::error::Error for TemplateCompilationError {}
