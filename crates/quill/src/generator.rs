//! Drives the template translator for one [`TypeContext`].

use quill_syntax::{GeneratedClassContext, TemplateTranslator, Translation};
use tracing::debug;

use crate::base::TemplateBaseType;
use crate::context::{TypeContext, DYNAMIC_TEMPLATE_NAMESPACE};

/// The method names and imports generated code is written against.
///
/// Imports are the base type's required namespaces followed by the context's.
pub fn class_context(context: &TypeContext, base: &TemplateBaseType) -> GeneratedClassContext {
    let mut names = GeneratedClassContext::default()
        .with_class_name(context.class_name.clone())
        .with_namespace(DYNAMIC_TEMPLATE_NAMESPACE)
        .with_base_class(base.type_name());
    names
        .imports
        .extend(base.required_namespaces.iter().chain(&context.namespaces).cloned());
    names
}

/// Translates the context's template.
///
/// Imports declared by the template (`@using`) are added to
/// `context.namespaces`, so later stages see the complete set.
pub fn generate(
    translator: &dyn TemplateTranslator,
    context: &mut TypeContext,
    base: &TemplateBaseType,
) -> (Translation, GeneratedClassContext) {
    let names = class_context(context, base);
    let translation = translator.translate(&context.template_content, &names);
    context
        .namespaces
        .extend(translation.tree.imports.iter().cloned());
    debug!(
        class = %context.class_name,
        diagnostics = translation.diagnostics.len(),
        imports = context.namespaces.len(),
        "template translated"
    );
    (translation, names)
}
