//! Base template types generated classes wrap.

use std::collections::BTreeSet;

use quill_syntax::{Param, Visibility};

/// Name of the generated marker type describing the model.
pub const MODEL_MARKER: &str = "__QuillModel";

/// A constructor of a base template type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseConstructor {
    pub name: String,
    pub visibility: Visibility,
    pub params: Vec<Param>,
}

impl BaseConstructor {
    pub fn new(name: impl Into<String>, visibility: Visibility, params: Vec<Param>) -> Self {
        Self {
            name: name.into(),
            visibility,
            params,
        }
    }

    /// `new(writer, host)`, the constructor every compiled template is created with.
    pub fn host() -> Self {
        Self::new(
            "new",
            Visibility::Public,
            vec![
                Param::new("writer", "*mut c_void"),
                Param::new("host", "*const HostVTable"),
            ],
        )
    }
}

/// The type a generated template class derefs to.
///
/// Generated classes hold one value of the base type and forward their
/// constructors to it. `source` is extra Rust code compiled next to the
/// built-in base types; it is a MiniJinja template rendered with `names`
/// (the configured method names) and `abi_version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateBaseType {
    pub name: String,
    /// Takes the model marker as its only type argument.
    pub generic: bool,
    pub required_namespaces: BTreeSet<String>,
    pub constructors: Vec<BaseConstructor>,
    pub source: Option<String>,
}

impl TemplateBaseType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            generic: false,
            required_namespaces: BTreeSet::new(),
            constructors: vec![BaseConstructor::host()],
            source: None,
        }
    }

    /// `TemplateBase`, the base used when no model type is declared.
    pub fn model_free() -> Self {
        Self::new("TemplateBase")
    }

    /// `TemplateBaseOf<M>`, the base used for declared model types.
    pub fn generic() -> Self {
        Self::new("TemplateBaseOf").with_generic(true)
    }

    pub fn with_generic(mut self, generic: bool) -> Self {
        self.generic = generic;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.required_namespaces.insert(namespace.into());
        self
    }

    pub fn with_constructor(mut self, constructor: BaseConstructor) -> Self {
        if let Some(existing) = self
            .constructors
            .iter_mut()
            .find(|c| c.name == constructor.name)
        {
            *existing = constructor;
        } else {
            self.constructors.push(constructor);
        }
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// The base type as written in generated code.
    pub fn type_name(&self) -> String {
        if self.generic {
            format!("{}<{MODEL_MARKER}>", self.name)
        } else {
            self.name.clone()
        }
    }

    /// Constructors generated classes forward; private ones are skipped.
    pub fn forwarded_constructors(&self) -> impl Iterator<Item = &BaseConstructor> {
        self.constructors
            .iter()
            .filter(|c| c.visibility != Visibility::Private)
    }
}

impl Default for TemplateBaseType {
    fn default() -> Self {
        Self::model_free()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_bases() {
        assert_eq!(TemplateBaseType::model_free().type_name(), "TemplateBase");
        assert_eq!(
            TemplateBaseType::generic().type_name(),
            "TemplateBaseOf<__QuillModel>"
        );
        assert_eq!(TemplateBaseType::default().constructors, vec![BaseConstructor::host()]);
    }

    #[test]
    fn private_constructors_are_not_forwarded() {
        let base = TemplateBaseType::new("Custom")
            .with_constructor(BaseConstructor::new("hidden", Visibility::Private, vec![]))
            .with_constructor(BaseConstructor::new(
                "with_prefix",
                Visibility::Protected,
                vec![Param::new("prefix", "&'static str")],
            ));
        let names: Vec<&str> = base.forwarded_constructors().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["new", "with_prefix"]);
    }

    #[test]
    fn constructors_replace_by_name() {
        let base = TemplateBaseType::new("Custom").with_constructor(BaseConstructor::new(
            "new",
            Visibility::Public,
            vec![],
        ));
        assert_eq!(base.constructors.len(), 1);
        assert!(base.constructors[0].params.is_empty());
    }
}
