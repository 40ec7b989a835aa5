//! Model type descriptions.
//!
//! Rust has no runtime type objects, so a model type is described structurally
//! from [`std::any::type_name`]. The description is what a compiled template
//! records and what every render call is checked against.

use std::fmt;

/// A structural description of a model type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModelType {
    /// No declared type; the model is looked up by member name at render time.
    Dynamic,
    Named { path: String, args: Vec<ModelType> },
    Array { element: Box<ModelType>, len: String },
    Slice(Box<ModelType>),
    Tuple(Vec<ModelType>),
    Reference { mutable: bool, inner: Box<ModelType> },
    /// A compiler-synthesized type such as a closure or an async block.
    Anonymous { path: String },
}

impl ModelType {
    /// The description of `T`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::parse(std::any::type_name::<T>())
    }

    /// Parses a type name as printed by [`std::any::type_name`].
    ///
    /// Text that does not look like a path, array, slice, tuple or reference is
    /// kept verbatim as a `Named` type without arguments.
    pub fn parse(type_name: &str) -> Self {
        let text = type_name.trim();
        if text == "dynamic" {
            return ModelType::Dynamic;
        }

        if let Some(rest) = text.strip_prefix('&') {
            let rest = rest.trim_start();
            let (mutable, inner) = match rest.strip_prefix("mut ") {
                Some(inner) => (true, inner),
                None => (false, rest),
            };
            return ModelType::Reference {
                mutable,
                inner: Box::new(Self::parse(inner)),
            };
        }

        if let Some(inner) = text.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
            let parts = split_top_level(inner, ';');
            return match parts.as_slice() {
                [element, len] => ModelType::Array {
                    element: Box::new(Self::parse(element)),
                    len: len.trim().to_string(),
                },
                _ => ModelType::Slice(Box::new(Self::parse(inner))),
            };
        }

        if let Some(inner) = text.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
            let members = split_top_level(inner, ',')
                .into_iter()
                .filter(|m| !m.trim().is_empty())
                .map(Self::parse)
                .collect();
            return ModelType::Tuple(members);
        }

        let (path, args) = match generic_start(text) {
            Some(open) if text.ends_with('>') => {
                let args = split_top_level(&text[open + 1..text.len() - 1], ',')
                    .into_iter()
                    .filter(|a| !a.trim().is_empty())
                    .map(Self::parse)
                    .collect();
                (&text[..open], args)
            }
            _ => (text, Vec::new()),
        };

        if is_anonymous_path(path) {
            return ModelType::Anonymous {
                path: text.to_string(),
            };
        }
        ModelType::Named {
            path: path.to_string(),
            args,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, ModelType::Dynamic)
    }

    /// True when this type or any type it is built from is anonymous.
    pub fn is_anonymous_recursive(&self) -> bool {
        match self {
            ModelType::Anonymous { .. } => true,
            ModelType::Dynamic => false,
            ModelType::Named { args, .. } => args.iter().any(Self::is_anonymous_recursive),
            ModelType::Array { element, .. } | ModelType::Slice(element) => {
                element.is_anonymous_recursive()
            }
            ModelType::Tuple(members) => members.iter().any(Self::is_anonymous_recursive),
            ModelType::Reference { inner, .. } => inner.is_anonymous_recursive(),
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelType::Dynamic => f.write_str("dynamic"),
            ModelType::Named { path, args } => {
                f.write_str(path)?;
                if !args.is_empty() {
                    f.write_str("<")?;
                    write_list(f, args)?;
                    f.write_str(">")?;
                }
                Ok(())
            }
            ModelType::Array { element, len } => write!(f, "[{element}; {len}]"),
            ModelType::Slice(element) => write!(f, "[{element}]"),
            ModelType::Tuple(members) => {
                f.write_str("(")?;
                write_list(f, members)?;
                if members.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            ModelType::Reference { mutable, inner } => {
                write!(f, "&{}{inner}", if *mutable { "mut " } else { "" })
            }
            ModelType::Anonymous { path } => f.write_str(path),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[ModelType]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

/// Closures print as `{{closure}}`, async blocks as `{async_block#0}`.
fn is_anonymous_path(path: &str) -> bool {
    path.split("::").any(|segment| segment.trim_start().starts_with('{'))
}

/// Index of the `<` opening the generic arguments of a path.
fn generic_start(text: &str) -> Option<usize> {
    let mut depth = 0i32;
    for (i, c) in text.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            '<' if depth == 0 => return Some(i),
            _ => {}
        }
    }
    None
}

fn split_top_level(text: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' | '[' | '{' | '<' => depth += 1,
            ')' | ']' | '}' | '>' => depth -= 1,
            c if c == separator && depth == 0 => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Serialize)]
    struct Person {
        name: String,
    }

    #[test]
    fn named_types_keep_their_path() {
        let ty = ModelType::of::<Person>();
        match &ty {
            ModelType::Named { path, args } => {
                assert!(path.ends_with("model::tests::Person"), "{path}");
                assert!(args.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!ty.is_anonymous_recursive());
    }

    #[test]
    fn generic_arguments_are_parsed() {
        let ty = ModelType::parse("alloc::vec::Vec<core::option::Option<u8>>");
        assert_eq!(
            ty,
            ModelType::Named {
                path: "alloc::vec::Vec".into(),
                args: vec![ModelType::Named {
                    path: "core::option::Option".into(),
                    args: vec![ModelType::Named {
                        path: "u8".into(),
                        args: vec![],
                    }],
                }],
            }
        );
        assert_eq!(ty.to_string(), "alloc::vec::Vec<core::option::Option<u8>>");
    }

    #[test]
    fn arrays_slices_tuples_and_references() {
        assert_eq!(ModelType::of::<[u8; 4]>().to_string(), "[u8; 4]");
        assert_eq!(ModelType::of::<&[u8]>().to_string(), "&[u8]");
        assert_eq!(ModelType::of::<(i32, bool)>().to_string(), "(i32, bool)");
        assert_eq!(ModelType::of::<(i32,)>().to_string(), "(i32,)");
        assert_eq!(ModelType::of::<()>().to_string(), "()");
        assert!(matches!(
            ModelType::of::<&mut str>(),
            ModelType::Reference { mutable: true, .. }
        ));
    }

    #[test]
    fn closures_are_anonymous() {
        fn type_of<T: 'static>(_: &T) -> ModelType {
            ModelType::of::<T>()
        }
        let closure = || 1;
        let ty = type_of(&closure);
        assert!(matches!(ty, ModelType::Anonymous { .. }), "{ty:?}");
        assert!(ty.is_anonymous_recursive());
    }

    #[test]
    fn anonymous_types_are_found_recursively() {
        let nested = ModelType::parse("alloc::vec::Vec<(u8, &my::f::{{closure}})>");
        assert!(!matches!(nested, ModelType::Anonymous { .. }));
        assert!(nested.is_anonymous_recursive());

        let array = ModelType::parse("[app::main::{async_block#0}; 2]");
        assert!(array.is_anonymous_recursive());
    }

    #[test]
    fn dynamic_displays_as_dynamic() {
        assert_eq!(ModelType::Dynamic.to_string(), "dynamic");
        assert_eq!(ModelType::parse("dynamic"), ModelType::Dynamic);
        assert!(!ModelType::Dynamic.is_anonymous_recursive());
    }

    #[test]
    fn unusual_names_survive_verbatim() {
        let ty = ModelType::parse("dyn core::fmt::Debug");
        assert_eq!(ty.to_string(), "dyn core::fmt::Debug");
    }
}
