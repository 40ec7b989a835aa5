//! The compilation orchestrator.
//!
//! [`Engine::compile`] runs the whole pipeline for one template:
//!
//! 1. build and validate a [`TypeContext`]
//! 2. translate the template into a source tree
//! 3. post-process the tree and serialize it to Rust
//! 4. resolve references and compile with the configured backend
//! 5. load the library and find the generated type
//!
//! [`Engine::run`] executes a [`CompiledTemplate`] against a [`Model`].

use std::fmt;
use std::sync::Arc;

use quill_compiler::{BackendError, CompilationData, CompileRequest, CompilerBackend, ReferenceRegistry};
use quill_runtime::{RenderError, TemplateData, TemplateInstance};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::context::TypeContext;
use crate::error::{QuillError, TemplateCompilationError};
use crate::generator::generate;
use crate::loader::{TemplateType, TypeLoader};
use crate::model::ModelType;
use crate::postprocess::SourcePostProcessor;

/// File name diagnostics of the template translator are reported against.
const TEMPLATE_FILE: &str = "template";

/// The model a template runs against.
#[derive(Debug, Clone, PartialEq)]
pub enum Model {
    /// No model; `Model.*` paths fail, `TemplateData` still works.
    None,
    /// Any JSON value, for templates compiled without a model type.
    Dynamic(Value),
    /// A value of a declared model type.
    Typed { model_type: ModelType, value: Value },
}

impl Model {
    pub fn dynamic(value: impl Serialize) -> Result<Self, QuillError> {
        Ok(Model::Dynamic(serde_json::to_value(value)?))
    }

    /// `value` tagged with the Rust type `T`.
    pub fn typed<T: Serialize + 'static>(value: &T) -> Result<Self, QuillError> {
        Ok(Model::Typed {
            model_type: ModelType::of::<T>(),
            value: serde_json::to_value(value)?,
        })
    }

    /// The declared model type; `None` for untyped and dynamic models.
    pub fn model_type(&self) -> Option<&ModelType> {
        match self {
            Model::Typed { model_type, .. } if !model_type.is_dynamic() => Some(model_type),
            _ => None,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Model::None => Value::Null,
            Model::Dynamic(value) | Model::Typed { value, .. } => value,
        }
    }
}

impl From<Value> for Model {
    fn from(value: Value) -> Self {
        Model::Dynamic(value)
    }
}

/// A loaded template type and everything compiling it produced.
#[derive(Debug)]
pub struct CompiledTemplate {
    // Declared first: the library closes before the scratch directory goes.
    template_type: TemplateType,
    compilation_data: CompilationData,
    template: String,
    model_type: Option<ModelType>,
}

impl CompiledTemplate {
    pub fn template_type(&self) -> &TemplateType {
        &self.template_type
    }

    pub fn compilation_data(&self) -> &CompilationData {
        &self.compilation_data
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// The declared model type, `None` for dynamic templates.
    pub fn model_type(&self) -> Option<&ModelType> {
        self.model_type.as_ref()
    }

    /// Removes the scratch directory. Safe to call more than once.
    pub fn dispose(&self) {
        self.compilation_data.dispose();
    }
}

/// The outcome of [`Engine::try_compile`]: a compiled template or the failure.
#[derive(Debug)]
pub struct TemplateContext {
    outcome: Result<CompiledTemplate, Arc<QuillError>>,
}

impl TemplateContext {
    pub fn is_compiled(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn compiled(&self) -> Option<&CompiledTemplate> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&QuillError> {
        self.outcome.as_ref().err().map(|e| e.as_ref())
    }

    pub fn into_result(self) -> Result<CompiledTemplate, Arc<QuillError>> {
        self.outcome
    }
}

/// Compiles templates to native code and runs them.
pub struct Engine {
    config: EngineConfig,
    registry: Arc<ReferenceRegistry>,
    backend: Arc<dyn CompilerBackend>,
    post_processor: SourcePostProcessor,
    loader: TypeLoader,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("references", &self.registry.len())
            .field("loader", &self.loader)
            .finish_non_exhaustive()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// An engine with default settings and the process environment applied.
    pub fn new() -> Self {
        let mut config = EngineConfig::default();
        config.settings = config.settings.with_process_env();
        Self::with_config(config)
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let registry = Arc::new(ReferenceRegistry::new());
        let backend = config
            .backend_factory
            .create(config.compiler_settings(), Arc::clone(&registry));
        let loader = TypeLoader::new(config.settings.disable_temp_file_locking);
        Self {
            config,
            registry,
            backend,
            post_processor: SourcePostProcessor::new(),
            loader,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Every reference this engine has compiled against.
    pub fn registry(&self) -> &Arc<ReferenceRegistry> {
        &self.registry
    }

    /// Compiles `template` under a generated class name.
    pub fn compile(&self, template: &str, model_type: Option<ModelType>) -> Result<CompiledTemplate, QuillError> {
        let mut context = TypeContext::new(template);
        context.model_type = model_type;
        self.compile_context(context)
    }

    pub fn compile_named(
        &self,
        template: &str,
        class_name: &str,
        model_type: Option<ModelType>,
    ) -> Result<CompiledTemplate, QuillError> {
        let mut context = TypeContext::with_class_name(class_name, template);
        context.model_type = model_type;
        self.compile_context(context)
    }

    /// Like [`compile`](Self::compile), recording a failure instead of returning it.
    pub fn try_compile(&self, template: &str, model_type: Option<ModelType>) -> TemplateContext {
        TemplateContext {
            outcome: self.compile(template, model_type).map_err(Arc::new),
        }
    }

    pub fn compile_context(&self, mut context: TypeContext) -> Result<CompiledTemplate, QuillError> {
        if context.model_type.as_ref().is_some_and(ModelType::is_dynamic) {
            context.model_type = None;
        }
        if context.template_type.is_none() {
            context.template_type = self.config.base_template_type.clone();
        }
        let base = context.effective_template_type();
        context
            .namespaces
            .extend(self.config.settings.namespaces.iter().cloned());
        context
            .namespaces
            .extend(base.required_namespaces.iter().cloned());
        context.validate()?;

        let (translation, names) = generate(self.config.translator.as_ref(), &mut context, &base);
        if translation.has_errors() {
            debug!(class = %context.class_name, "template has syntax errors");
            return Err(TemplateCompilationError::from_diagnostics(
                &translation.diagnostics,
                TEMPLATE_FILE,
                context.template_content.clone(),
            )
            .into());
        }
        let source = self
            .post_processor
            .process(translation.tree, &context, &base, &names)?;

        let references = self
            .config
            .resolver
            .resolve(&context, self.backend.include_references());
        self.registry.extend(references.iter().cloned());

        let output = self
            .backend
            .compile(CompileRequest {
                source: &source,
                assembly_name: &context.class_name,
                namespaces: &context.namespaces,
                references: &references,
            })
            .map_err(|err| match err {
                BackendError::UnsupportedReference(reference) => QuillError::UnsupportedReference(reference),
                other => QuillError::unexpected("compiling template", other),
            })?;

        let (template_type, compilation_data) = self.loader.load(output, &context)?;
        info!(
            template = %context.full_name(),
            model = %context.effective_model_type(),
            references = references.len(),
            "template compiled"
        );
        Ok(CompiledTemplate {
            template_type,
            compilation_data,
            template: context.template_content,
            model_type: context.model_type,
        })
    }

    /// Runs `compiled` and writes its output to `out`.
    pub fn run(&self, compiled: &CompiledTemplate, out: &mut dyn fmt::Write, model: Model) -> Result<(), QuillError> {
        self.run_with_data(compiled, out, model, TemplateData::new())
    }

    /// Runs `compiled` with a side-channel data bag.
    ///
    /// Nothing is written to `out` unless the template finishes without error.
    pub fn run_with_data(
        &self,
        compiled: &CompiledTemplate,
        out: &mut dyn fmt::Write,
        model: Model,
        data: TemplateData,
    ) -> Result<(), QuillError> {
        if compiled.model_type() != model.model_type() {
            return Err(QuillError::ModelTypeMismatch {
                expected: describe(compiled.model_type()),
                found: describe(model.model_type()),
            });
        }
        let instance = TemplateInstance::new(model.into_value(), data, Arc::clone(&self.config.encoder));
        let output = compiled.template_type().run(instance)?;
        out.write_str(&output).map_err(RenderError::from)?;
        Ok(())
    }

    pub fn render(&self, compiled: &CompiledTemplate, model: Model) -> Result<String, QuillError> {
        self.render_with_data(compiled, model, TemplateData::new())
    }

    pub fn render_with_data(
        &self,
        compiled: &CompiledTemplate,
        model: Model,
        data: TemplateData,
    ) -> Result<String, QuillError> {
        let mut out = String::new();
        self.run_with_data(compiled, &mut out, model, data)?;
        Ok(out)
    }

    /// Compiles `template` for the model's type, runs it once and drops it.
    pub fn run_compile(&self, template: &str, out: &mut dyn fmt::Write, model: Model) -> Result<(), QuillError> {
        let compiled = self.compile(template, model.model_type().cloned())?;
        self.run(&compiled, out, model)
    }

    pub fn render_compile(&self, template: &str, model: Model) -> Result<String, QuillError> {
        let mut out = String::new();
        self.run_compile(template, &mut out, model)?;
        Ok(out)
    }

    /// Runs the template of `context`, or returns the failure it recorded.
    pub fn run_context(&self, context: &TemplateContext, out: &mut dyn fmt::Write, model: Model) -> Result<(), QuillError> {
        match &context.outcome {
            Ok(compiled) => self.run(compiled, out, model),
            Err(err) => Err(QuillError::Failed(Arc::clone(err))),
        }
    }
}

fn describe(model_type: Option<&ModelType>) -> String {
    model_type.map_or_else(|| ModelType::Dynamic.to_string(), ToString::to_string)
}
