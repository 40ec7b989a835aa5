//! Turns a translated source tree into the Rust source handed to the compiler.
//!
//! Two rewrites run on the tree before it is serialized: line-hiding pragmas
//! are removed, and the class gets one forwarding constructor per public or
//! protected constructor of its base type. Serialization renders
//! `templates/unit.rs.jinja` with MiniJinja.

use minijinja::{context, AutoEscape, Environment};
use quill_runtime::abi::{type_symbol_name, ABI_VERSION, MODULE_TYPES_SYMBOL};
use quill_runtime::TEMPLATE_BASE_SOURCE;
use quill_syntax::{
    AttributeFragment, AttributeWrite, ConstructorDecl, Expr, GeneratedClassContext, LinePragma, Member,
    SourceTree, Statement, Visibility,
};
use serde::Serialize;

use crate::base::{TemplateBaseType, MODEL_MARKER};
use crate::context::TypeContext;
use crate::error::QuillError;

const UNIT_TEMPLATE: &str = include_str!("templates/unit.rs.jinja");

/// Marker the original code generators emitted to hide lines from debuggers.
const LINE_HIDDEN: &str = "#line hidden";

/// Removes line-hiding pragmas from method bodies and snippets.
pub fn strip_line_hiding(tree: &mut SourceTree) {
    for member in &mut tree.class.members {
        match member {
            Member::Method(method) => {
                method
                    .body
                    .retain(|s| !matches!(s, Statement::LinePragma(LinePragma::Hidden)));
                for statement in &mut method.body {
                    if let Statement::Snippet(text) = statement {
                        *text = text.replace(LINE_HIDDEN, "");
                    }
                }
            }
            Member::Snippet(text) => *text = text.replace(LINE_HIDDEN, ""),
            Member::Constructor(_) => {}
        }
    }
}

/// Replaces the class constructors with one per forwarded base constructor.
///
/// Leaves the class untouched when the base has nothing to forward.
pub fn forward_constructors(tree: &mut SourceTree, base: &TemplateBaseType) {
    let mut members: Vec<Member> = base
        .forwarded_constructors()
        .map(|c| {
            Member::Constructor(ConstructorDecl {
                name: c.name.clone(),
                visibility: Visibility::Public,
                params: c.params.clone(),
                base_args: c.params.iter().map(|p| p.name.clone()).collect(),
            })
        })
        .collect();
    if members.is_empty() {
        return;
    }
    members.extend(
        tree.class
            .members
            .drain(..)
            .filter(|m| !matches!(m, Member::Constructor(_))),
    );
    tree.class.members = members;
}

/// A Rust string literal for `text`.
fn rust_str(text: &str) -> String {
    format!("{text:?}")
}

/// Renders one expression; `@Url` values are bound to locals first.
fn render_expr(expr: &Expr, names: &GeneratedClassContext, lets: &mut Vec<String>) -> String {
    match expr {
        Expr::Path(path) => format!("expr_path({})", rust_str(path)),
        Expr::Str(text) => format!("expr_str({})", rust_str(text)),
        Expr::Number(number) => format!("expr_number({})", rust_str(number)),
        Expr::Bool(value) => format!("expr_bool({value})"),
        Expr::Null => "expr_null()".to_string(),
        Expr::Raw(inner) => format!("raw({})", render_expr(inner, names, lets)),
        Expr::Encode(inner) => format!("encode({})", render_expr(inner, names, lets)),
        Expr::Url(path) => {
            let local = format!("__url{}", lets.len());
            lets.push(format!(
                "let {local} = self.{}({});",
                names.resolve_url_method_name,
                rust_str(path)
            ));
            format!("expr_str(&{local})")
        }
    }
}

fn render_attribute(write: &AttributeWrite, names: &GeneratedClassContext, lets: &mut Vec<String>) -> String {
    let values: Vec<String> = write
        .values
        .iter()
        .map(|fragment| match fragment {
            AttributeFragment::Literal { prefix, value } => format!(
                "attr_literal({}, {}, {}, {})",
                rust_str(&prefix.text),
                prefix.position,
                rust_str(&value.text),
                value.position
            ),
            AttributeFragment::Dynamic {
                prefix,
                expr,
                position,
            } => format!(
                "attr_dynamic({}, {}, {}, {})",
                rust_str(&prefix.text),
                prefix.position,
                render_expr(expr, names, lets),
                position
            ),
        })
        .collect();
    format!(
        "self.{}({}, ({}, {}), ({}, {}), &[{}]);",
        names.write_attribute_method_name,
        rust_str(&write.name),
        rust_str(&write.prefix.text),
        write.prefix.position,
        rust_str(&write.suffix.text),
        write.suffix.position,
        values.join(", ")
    )
}

/// Source lines for one statement of the execute method.
fn render_statement(statement: &Statement, names: &GeneratedClassContext, out: &mut Vec<String>) {
    let mut lets = Vec::new();
    let call = match statement {
        Statement::WriteLiteral { text, .. } => {
            format!("self.{}({});", names.write_literal_method_name, rust_str(text))
        }
        Statement::Write { expr, .. } => {
            let value = render_expr(expr, names, &mut lets);
            format!("self.{}({value});", names.write_method_name)
        }
        Statement::WriteAttribute(write) => render_attribute(write, names, &mut lets),
        Statement::LinePragma(LinePragma::Line { line, file }) => format!("// line {line} {}", rust_str(file)),
        Statement::LinePragma(LinePragma::Hidden | LinePragma::Default) => return,
        Statement::Snippet(text) => {
            out.extend(text.lines().map(str::to_string));
            return;
        }
    };

    if lets.is_empty() {
        out.push(call);
    } else {
        out.push("{".to_string());
        out.extend(lets.into_iter().map(|l| format!("    {l}")));
        out.push(format!("    {call}"));
        out.push("}".to_string());
    }
}

#[derive(Serialize)]
struct MethodNames<'a> {
    execute_method_name: &'a str,
    write_method_name: &'a str,
    write_literal_method_name: &'a str,
    write_to_method_name: &'a str,
    write_literal_to_method_name: &'a str,
    resolve_url_method_name: &'a str,
    write_attribute_method_name: &'a str,
    write_attribute_to_method_name: &'a str,
}

impl<'a> From<&'a GeneratedClassContext> for MethodNames<'a> {
    fn from(names: &'a GeneratedClassContext) -> Self {
        Self {
            execute_method_name: &names.execute_method_name,
            write_method_name: &names.write_method_name,
            write_literal_method_name: &names.write_literal_method_name,
            write_to_method_name: &names.write_to_method_name,
            write_literal_to_method_name: &names.write_literal_to_method_name,
            resolve_url_method_name: &names.resolve_url_method_name,
            write_attribute_method_name: &names.write_attribute_method_name,
            write_attribute_to_method_name: &names.write_attribute_to_method_name,
        }
    }
}

#[derive(Serialize)]
struct ConstructorView {
    name: String,
    params: String,
    args: String,
}

#[derive(Serialize)]
struct UnitView {
    full_name: String,
    full_name_literal: String,
    imports: Vec<String>,
    base_source: String,
    extra_base_source: Option<String>,
    model_marker: &'static str,
    model_type_literal: String,
    class_name: String,
    base_type: String,
    base_type_literal: String,
    constructors: Vec<ConstructorView>,
    execute_method: String,
    body: Vec<String>,
    member_snippets: Vec<String>,
    type_symbol: String,
    module_types_symbol: &'static str,
}

/// Serializes source trees to Rust.
#[derive(Debug)]
pub struct SourcePostProcessor {
    env: Environment<'static>,
}

impl Default for SourcePostProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl SourcePostProcessor {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_keep_trailing_newline(true);
        env.set_auto_escape_callback(|_| AutoEscape::None);
        Self { env }
    }

    /// Renders a base template source with the configured method names.
    pub fn render_base_source(&self, source: &str, names: &GeneratedClassContext) -> Result<String, QuillError> {
        let rendered = self.env.render_str(
            source,
            context! {
                abi_version => ABI_VERSION,
                names => MethodNames::from(names),
            },
        )?;
        Ok(rendered)
    }

    /// Applies the tree rewrites and serializes the result.
    pub fn process(
        &self,
        mut tree: SourceTree,
        context: &TypeContext,
        base: &TemplateBaseType,
        names: &GeneratedClassContext,
    ) -> Result<String, QuillError> {
        strip_line_hiding(&mut tree);
        forward_constructors(&mut tree, base);
        self.serialize(&tree, context, base, names)
    }

    fn serialize(
        &self,
        tree: &SourceTree,
        context: &TypeContext,
        base: &TemplateBaseType,
        names: &GeneratedClassContext,
    ) -> Result<String, QuillError> {
        let mut constructors = Vec::new();
        let mut body = Vec::new();
        let mut member_snippets = Vec::new();
        for member in &tree.class.members {
            match member {
                Member::Constructor(ctor) => constructors.push(ConstructorView {
                    name: ctor.name.clone(),
                    params: ctor
                        .params
                        .iter()
                        .map(|p| format!("{}: {}", p.name, p.ty))
                        .collect::<Vec<_>>()
                        .join(", "),
                    args: ctor.base_args.join(", "),
                }),
                Member::Method(method) if method.name == names.execute_method_name => {
                    for statement in &method.body {
                        render_statement(statement, names, &mut body);
                    }
                }
                Member::Method(method) => {
                    let mut lines = Vec::new();
                    for statement in &method.body {
                        render_statement(statement, names, &mut lines);
                    }
                    member_snippets.push(format!(
                        "pub fn {}(&mut self) {{\n{}\n    }}",
                        method.name,
                        lines
                            .iter()
                            .map(|l| format!("        {l}"))
                            .collect::<Vec<_>>()
                            .join("\n")
                    ));
                }
                Member::Snippet(text) => member_snippets.push(text.clone()),
            }
        }

        let full_name = format!("{}.{}", tree.namespace, tree.class.name);
        let model = context.effective_model_type().to_string();
        let view = UnitView {
            full_name_literal: rust_str(&full_name),
            type_symbol: type_symbol_name(&full_name),
            full_name,
            imports: tree.imports.iter().cloned().collect(),
            base_source: self.render_base_source(TEMPLATE_BASE_SOURCE, names)?,
            extra_base_source: base
                .source
                .as_deref()
                .map(|source| self.render_base_source(source, names))
                .transpose()?,
            model_marker: MODEL_MARKER,
            model_type_literal: rust_str(&model),
            class_name: tree.class.name.clone(),
            base_type: tree.class.base_type.clone(),
            base_type_literal: rust_str(&tree.class.base_type),
            constructors,
            execute_method: names.execute_method_name.clone(),
            body,
            member_snippets,
            module_types_symbol: MODULE_TYPES_SYMBOL,
        };
        let template = self.env.template_from_str(UNIT_TEMPLATE)?;
        Ok(template.render(&view)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::BaseConstructor;
    use quill_syntax::{MarkupTranslator, Param, Positioned, TemplateTranslator};

    fn names() -> GeneratedClassContext {
        GeneratedClassContext::default()
            .with_class_name("Home")
            .with_namespace("CompiledTemplates.Dynamic")
    }

    fn translate(template: &str) -> SourceTree {
        MarkupTranslator::new().translate(template, &names()).tree
    }

    #[test]
    fn hidden_pragmas_are_removed() {
        let mut tree = translate("<p>@x</p>");
        assert!(tree
            .execute_body(&names())
            .contains(&Statement::LinePragma(LinePragma::Hidden)));
        if let Some(Member::Method(method)) = tree.class.members.get_mut(1) {
            method.body.push(Statement::Snippet("#line hidden\nlet a = 1;".into()));
        }
        tree.class.members.push(Member::Snippet("#line hidden".into()));

        strip_line_hiding(&mut tree);
        let body = tree.execute_body(&names());
        assert!(!body.contains(&Statement::LinePragma(LinePragma::Hidden)));
        assert!(body.contains(&Statement::Snippet("\nlet a = 1;".into())));
        assert_eq!(tree.class.members.last(), Some(&Member::Snippet(String::new())));
    }

    #[test]
    fn constructors_forward_to_the_base() {
        let mut tree = translate("x");
        let base = TemplateBaseType::new("Custom")
            .with_constructor(BaseConstructor::new(
                "with_title",
                Visibility::Protected,
                vec![Param::new("title", "&'static str")],
            ))
            .with_constructor(BaseConstructor::new("secret", Visibility::Private, vec![]));
        forward_constructors(&mut tree, &base);

        let ctors: Vec<&ConstructorDecl> = tree.class.constructors().collect();
        assert_eq!(ctors.len(), 2);
        assert_eq!(ctors[0].name, "new");
        assert_eq!(ctors[0].base_args, vec!["writer", "host"]);
        assert_eq!(ctors[1].name, "with_title");
        assert_eq!(ctors[1].visibility, Visibility::Public);
        assert_eq!(ctors[1].base_args, vec!["title"]);
    }

    #[test]
    fn base_without_forwarded_constructors_keeps_the_class_ones() {
        let mut tree = translate("x");
        let mut base = TemplateBaseType::new("Custom");
        base.constructors.clear();
        forward_constructors(&mut tree, &base);
        assert_eq!(tree.class.constructors().count(), 1);
    }

    #[test]
    fn statements_render_as_calls() {
        let names = names();
        let mut out = Vec::new();
        render_statement(
            &Statement::WriteLiteral {
                text: "<p \"q\">".into(),
                position: 0,
            },
            &names,
            &mut out,
        );
        render_statement(
            &Statement::Write {
                expr: Expr::Raw(Box::new(Expr::Path("Model.name".into()))),
                position: 3,
            },
            &names,
            &mut out,
        );
        render_statement(&Statement::LinePragma(LinePragma::Hidden), &names, &mut out);
        assert_eq!(
            out,
            vec![
                r#"self.write_literal("<p \"q\">");"#.to_string(),
                r#"self.write(raw(expr_path("Model.name")));"#.to_string(),
            ]
        );
    }

    #[test]
    fn url_values_are_bound_first() {
        let mut out = Vec::new();
        render_statement(
            &Statement::Write {
                expr: Expr::Url("~/home".into()),
                position: 0,
            },
            &names(),
            &mut out,
        );
        assert_eq!(
            out,
            vec![
                "{".to_string(),
                r#"    let __url0 = self.resolve_url("~/home");"#.to_string(),
                "    self.write(expr_str(&__url0));".to_string(),
                "}".to_string(),
            ]
        );
    }

    #[test]
    fn attributes_render_fragments() {
        let write = AttributeWrite {
            name: "class".into(),
            prefix: Positioned::new(" class=\"", 2),
            suffix: Positioned::new("\"", 20),
            values: vec![
                AttributeFragment::Literal {
                    prefix: Positioned::new("", 10),
                    value: Positioned::new("foo", 10),
                },
                AttributeFragment::Dynamic {
                    prefix: Positioned::new(" ", 13),
                    expr: Expr::Null,
                    position: 14,
                },
            ],
        };
        let mut out = Vec::new();
        render_statement(&Statement::WriteAttribute(write), &names(), &mut out);
        assert_eq!(
            out,
            vec![r#"self.write_attribute("class", (" class=\"", 2), ("\"", 20), &[attr_literal("", 10, "foo", 10), attr_dynamic(" ", 13, expr_null(), 14)]);"#.to_string()]
        );
    }

    #[test]
    fn unit_contains_the_exports() {
        let processor = SourcePostProcessor::new();
        let context = TypeContext::with_class_name("Home", "<p>@Name</p>");
        let base = TemplateBaseType::model_free();
        let names = names().with_base_class(base.type_name()).with_import("std::fmt");
        let tree = MarkupTranslator::new().translate(&context.template_content, &names).tree;
        let source = processor.process(tree, &context, &base, &names).unwrap();

        assert!(source.contains("use std::fmt;\n"));
        assert!(source.contains("pub const ABI_VERSION: u32 = 1;"));
        assert!(source.contains("pub struct Home {\n    base: TemplateBase,\n}"));
        assert!(source.contains("base: <TemplateBase>::new(writer, host),"));
        assert!(source.contains("        self.write(expr_path(\"Name\"));\n"));
        assert!(source.contains("pub extern \"C\" fn quill_type__CompiledTemplates_Dynamic_Home()"));
        assert!(source.contains("pub unsafe extern \"C\" fn quill_module_types("));
        assert!(source.contains("const NAME: &'static str = \"dynamic\";"));
        assert!(source.contains("pub fn write_attribute_to("));
        assert!(!source.contains("{{"));
    }

    #[test]
    fn extra_base_source_is_rendered_with_names() {
        let processor = SourcePostProcessor::new();
        let context = TypeContext::with_class_name("Home", "x");
        let base = TemplateBaseType::new("Custom")
            .with_source("// custom base calls {{ names.write_literal_method_name }}");
        let names = names().with_base_class(base.type_name());
        let tree = MarkupTranslator::new().translate("x", &names).tree;
        let source = processor.process(tree, &context, &base, &names).unwrap();
        assert!(source.contains("// custom base calls write_literal"));
        assert!(source.contains("base: <Custom>::new(writer, host),"));
    }
}
