//! Per-compilation description of the type to generate.

use std::collections::BTreeSet;

use uuid::Uuid;

use crate::base::TemplateBaseType;
use crate::error::QuillError;
use crate::model::ModelType;

/// Namespace every generated template type lives in.
pub const DYNAMIC_TEMPLATE_NAMESPACE: &str = "CompiledTemplates.Dynamic";

/// Prefix of generated class names.
pub const CLASS_NAME_PREFIX: &str = "QuillTemplate_";

/// A fresh class name, unique per call.
pub fn generate_class_name() -> String {
    format!("{CLASS_NAME_PREFIX}{}", Uuid::new_v4().simple())
}

/// What to generate for one compile request.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeContext {
    pub class_name: String,
    /// `use` paths for the generated source. Grows during generation.
    pub namespaces: BTreeSet<String>,
    pub template_content: String,
    pub template_type: Option<TemplateBaseType>,
    pub model_type: Option<ModelType>,
}

impl TypeContext {
    /// A context with a generated class name.
    pub fn new(template_content: impl Into<String>) -> Self {
        Self::with_class_name(generate_class_name(), template_content)
    }

    pub fn with_class_name(class_name: impl Into<String>, template_content: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            namespaces: BTreeSet::new(),
            template_content: template_content.into(),
            template_type: None,
            model_type: None,
        }
    }

    pub fn with_model_type(mut self, model_type: ModelType) -> Self {
        self.model_type = Some(model_type);
        self
    }

    pub fn with_template_type(mut self, template_type: TemplateBaseType) -> Self {
        self.template_type = Some(template_type);
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespaces.insert(namespace.into());
        self
    }

    /// `CompiledTemplates.Dynamic.<class>`.
    pub fn full_name(&self) -> String {
        format!("{DYNAMIC_TEMPLATE_NAMESPACE}.{}", self.class_name)
    }

    /// The declared base type, else the generic base for typed models, else
    /// the model-free base.
    pub fn effective_template_type(&self) -> TemplateBaseType {
        match (&self.template_type, &self.model_type) {
            (Some(base), _) => base.clone(),
            (None, Some(model)) if !model.is_dynamic() => TemplateBaseType::generic(),
            (None, _) => TemplateBaseType::model_free(),
        }
    }

    pub fn effective_model_type(&self) -> ModelType {
        self.model_type.clone().unwrap_or(ModelType::Dynamic)
    }

    /// Checks the class name and model type before anything is generated.
    pub fn validate(&self) -> Result<(), QuillError> {
        if self.class_name.is_empty() {
            return Err(QuillError::InvalidContext("class name is required".into()));
        }
        if !is_identifier(&self.class_name) {
            return Err(QuillError::InvalidContext(format!(
                "class name `{}` is not a valid identifier",
                self.class_name
            )));
        }
        if let Some(model) = &self.model_type {
            if model.is_anonymous_recursive() {
                return Err(QuillError::AnonymousModelType(model.to_string()));
            }
        }
        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    name != "_" && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_class_names_are_unique_identifiers() {
        let a = TypeContext::new("x");
        let b = TypeContext::new("x");
        assert_ne!(a.class_name, b.class_name);
        assert!(a.class_name.starts_with(CLASS_NAME_PREFIX));
        assert!(a.validate().is_ok());
    }

    #[test]
    fn full_name_uses_the_dynamic_namespace() {
        let ctx = TypeContext::with_class_name("Home", "");
        assert_eq!(ctx.full_name(), "CompiledTemplates.Dynamic.Home");
    }

    #[test]
    fn invalid_class_names_are_rejected() {
        for name in ["", "1abc", "a-b", "_", "a b"] {
            let ctx = TypeContext::with_class_name(name, "x");
            assert!(matches!(ctx.validate(), Err(QuillError::InvalidContext(_))), "{name}");
        }
    }

    #[test]
    fn anonymous_models_are_rejected() {
        let ctx = TypeContext::new("x").with_model_type(ModelType::parse("app::main::{{closure}}"));
        assert!(matches!(ctx.validate(), Err(QuillError::AnonymousModelType(_))));
    }

    #[test]
    fn template_type_defaults() {
        let ctx = TypeContext::new("x");
        assert_eq!(ctx.effective_template_type(), TemplateBaseType::model_free());
        assert_eq!(ctx.effective_model_type(), ModelType::Dynamic);

        let typed = ctx.clone().with_model_type(ModelType::of::<u32>());
        assert_eq!(typed.effective_template_type(), TemplateBaseType::generic());

        let custom = typed.with_template_type(TemplateBaseType::new("Mine"));
        assert_eq!(custom.effective_template_type().name, "Mine");
    }
}
