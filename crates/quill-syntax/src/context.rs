//! Names the translator uses when emitting the generated class.

use std::collections::BTreeSet;

/// Method, class and namespace names for the generated class.
///
/// The defaults match the method names of the runtime's generated-side base
/// template. Custom base types that rename their methods configure this to
/// match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedClassContext {
    pub execute_method_name: String,
    pub write_method_name: String,
    pub write_literal_method_name: String,
    pub write_to_method_name: String,
    pub write_literal_to_method_name: String,
    pub resolve_url_method_name: String,
    pub write_attribute_method_name: String,
    pub write_attribute_to_method_name: String,

    pub class_name: String,
    pub namespace: String,
    pub base_class: String,
    pub imports: BTreeSet<String>,
}

impl Default for GeneratedClassContext {
    fn default() -> Self {
        Self {
            execute_method_name: "execute".into(),
            write_method_name: "write".into(),
            write_literal_method_name: "write_literal".into(),
            write_to_method_name: "write_to".into(),
            write_literal_to_method_name: "write_literal_to".into(),
            resolve_url_method_name: "resolve_url".into(),
            write_attribute_method_name: "write_attribute".into(),
            write_attribute_to_method_name: "write_attribute_to".into(),
            class_name: "Template".into(),
            namespace: "CompiledTemplates.Dynamic".into(),
            base_class: "TemplateBase".into(),
            imports: BTreeSet::new(),
        }
    }
}

impl GeneratedClassContext {
    pub fn with_class_name(mut self, name: impl Into<String>) -> Self {
        self.class_name = name.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_base_class(mut self, base: impl Into<String>) -> Self {
        self.base_class = base.into();
        self
    }

    pub fn with_import(mut self, import: impl Into<String>) -> Self {
        self.imports.insert(import.into());
        self
    }

    /// Dotted full name of the generated type, e.g. `CompiledTemplates.Dynamic.Foo`.
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.class_name.clone()
        } else {
            format!("{}.{}", self.namespace, self.class_name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_name_joins_namespace() {
        let ctx = GeneratedClassContext::default().with_class_name("Foo");
        assert_eq!(ctx.full_name(), "CompiledTemplates.Dynamic.Foo");
        assert_eq!(ctx.with_namespace("").full_name(), "Foo");
    }

    #[test]
    fn imports_are_deduplicated() {
        let ctx = GeneratedClassContext::default()
            .with_import("std::fmt")
            .with_import("std::fmt");
        assert_eq!(ctx.imports.len(), 1);
    }
}
