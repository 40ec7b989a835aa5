//! # Quill
//!
//! Compile `@` templates into native Rust libraries and render them.
//!
//! A template is markup with `@` expressions. The [`Engine`] translates it
//! into a Rust type wrapping a base template, compiles that with `rustc` into
//! a dynamic library, loads the library and runs the type against a model:
//!
//! ```no_run
//! use quill::{Engine, Model};
//! use serde_json::json;
//!
//! let engine = Engine::new();
//! let compiled = engine.compile("<h1>Hello @Name!</h1>", None)?;
//! let html = engine.render(&compiled, Model::Dynamic(json!({ "Name": "World" })))?;
//! assert_eq!(html, "<h1>Hello World!</h1>");
//! # Ok::<(), quill::QuillError>(())
//! ```
//!
//! ## Models
//!
//! Templates compiled without a model type accept any JSON value
//! ([`Model::Dynamic`]). Templates compiled for a [`ModelType`] only run with
//! a [`Model::Typed`] of the same type; anything else is a
//! [`QuillError::ModelTypeMismatch`]. Anonymous types (closures) cannot be
//! compiled for.
//!
//! ## Failures
//!
//! Syntax and compiler errors come back as [`QuillError::Compilation`]. The
//! boxed [`TemplateCompilationError`] keeps the diagnostics, the template,
//! the generated source and the scratch directory; its `Display` is a full
//! report.
//!
//! ## Configuration
//!
//! [`EngineConfig`] selects the translator, reference resolver, encoder and
//! compiler backend, and carries [`EngineSettings`], which load from YAML and
//! honour `QUILL_RUSTC`, `QUILL_DEBUG` and `QUILL_TEMP_DIR`.

mod base;
mod config;
mod context;
mod engine;
mod error;
mod generator;
mod loader;
mod model;
mod postprocess;
mod resolver;

pub use base::{BaseConstructor, TemplateBaseType, MODEL_MARKER};
pub use config::{
    CompilerBackendFactory, Encoding, EngineConfig, EngineSettings, EnvReader, RealEnv, RustcBackendFactory,
    ENV_DEBUG, ENV_RUSTC, ENV_TEMP_DIR,
};
pub use context::{generate_class_name, TypeContext, CLASS_NAME_PREFIX, DYNAMIC_TEMPLATE_NAMESPACE};
pub use engine::{CompiledTemplate, Engine, Model, TemplateContext};
pub use error::{QuillError, TemplateCompilationError};
pub use generator::{class_context, generate};
pub use loader::{LoadError, TemplateType, TypeLoader};
pub use model::ModelType;
pub use postprocess::{forward_constructors, strip_line_hiding, SourcePostProcessor};
pub use resolver::{latest_modules, CurrentModulesReferenceResolver, FixedReferenceResolver, ReferenceResolver};

pub use quill_compiler::{CompilationData, CompilerError, CompilerReference, ReferenceRegistry};
pub use quill_runtime::{
    EncodedString, EncodedStringFactory, HtmlEncodedStringFactory, RawStringFactory, RenderError, TemplateData,
};
pub use quill_syntax::{GeneratedClassContext, MarkupTranslator, TemplateTranslator, Translation};
