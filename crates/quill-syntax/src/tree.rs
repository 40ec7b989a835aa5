//! Generated-source tree.
//!
//! A deliberately small model of the code a template turns into. It carries
//! enough structure for the post-processor to rewrite constructors and strip
//! hidden line pragmas before the tree is serialized.

use std::collections::BTreeSet;

use crate::GeneratedClassContext;

/// A piece of text with the byte offset it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Positioned {
    pub text: String,
    pub position: usize,
}

impl Positioned {
    pub fn new(text: impl Into<String>, position: usize) -> Self {
        Self {
            text: text.into(),
            position,
        }
    }
}

/// An expression written by a `@` directive.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Dotted member path, e.g. `Model.Name`.
    Path(String),
    Str(String),
    /// Number literal, kept as written.
    Number(String),
    Bool(bool),
    Null,
    /// Value that is already encoded and must not be escaped again.
    Raw(Box<Expr>),
    /// Value that is always HTML-encoded.
    Encode(Box<Expr>),
    /// Application-relative URL resolved at render time.
    Url(String),
}

/// One fragment of a dynamic attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeFragment {
    Literal {
        prefix: Positioned,
        value: Positioned,
    },
    Dynamic {
        prefix: Positioned,
        expr: Expr,
        position: usize,
    },
}

impl AttributeFragment {
    pub fn prefix(&self) -> &Positioned {
        match self {
            AttributeFragment::Literal { prefix, .. } | AttributeFragment::Dynamic { prefix, .. } => {
                prefix
            }
        }
    }
}

/// An HTML attribute whose value contains at least one expression.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeWrite {
    pub name: String,
    /// Leading whitespace, name, `=` and opening quote.
    pub prefix: Positioned,
    /// Trailing whitespace and closing quote.
    pub suffix: Positioned,
    pub values: Vec<AttributeFragment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinePragma {
    /// Following code maps to this template line.
    Line { line: usize, file: String },
    /// Following code has no template counterpart.
    Hidden,
    /// Back to the generated file's own numbering.
    Default,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    WriteLiteral { text: String, position: usize },
    Write { expr: Expr, position: usize },
    WriteAttribute(AttributeWrite),
    LinePragma(LinePragma),
    /// Verbatim source emitted into the method body.
    Snippet(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    Public,
    Protected,
    Private,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub ty: String,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
        }
    }
}

/// A constructor of the generated class.
///
/// `base_args` are forwarded to the base type's constructor of the same name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstructorDecl {
    pub name: String,
    pub visibility: Visibility,
    pub params: Vec<Param>,
    pub base_args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDecl {
    pub name: String,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Member {
    Constructor(ConstructorDecl),
    Method(MethodDecl),
    /// Verbatim source emitted at item level.
    Snippet(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedClass {
    pub name: String,
    pub base_type: String,
    pub members: Vec<Member>,
}

impl GeneratedClass {
    pub fn constructors(&self) -> impl Iterator<Item = &ConstructorDecl> {
        self.members.iter().filter_map(|m| match m {
            Member::Constructor(c) => Some(c),
            _ => None,
        })
    }

    pub fn method(&self, name: &str) -> Option<&MethodDecl> {
        self.members.iter().find_map(|m| match m {
            Member::Method(method) if method.name == name => Some(method),
            _ => None,
        })
    }
}

/// The whole generated unit: one namespace holding one class.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceTree {
    pub namespace: String,
    pub imports: BTreeSet<String>,
    pub class: GeneratedClass,
}

impl SourceTree {
    /// A tree with the default constructor and an empty execute method.
    pub fn empty(names: &GeneratedClassContext) -> Self {
        Self {
            namespace: names.namespace.clone(),
            imports: names.imports.clone(),
            class: GeneratedClass {
                name: names.class_name.clone(),
                base_type: names.base_class.clone(),
                members: vec![
                    Member::Constructor(ConstructorDecl {
                        name: "new".into(),
                        visibility: Visibility::Public,
                        params: Vec::new(),
                        base_args: Vec::new(),
                    }),
                    Member::Method(MethodDecl {
                        name: names.execute_method_name.clone(),
                        body: Vec::new(),
                    }),
                ],
            },
        }
    }

    /// Statements of the execute method, if present.
    pub fn execute_body(&self, names: &GeneratedClassContext) -> &[Statement] {
        self.class
            .method(&names.execute_method_name)
            .map(|m| m.body.as_slice())
            .unwrap_or(&[])
    }
}
