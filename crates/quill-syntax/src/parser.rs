//! The in-house `@` markup translator.
//!
//! A single forward scan over the template bytes. Every syntactic character is
//! ASCII, so byte offsets used for slicing always sit on character boundaries.
//! Markup between directives is accumulated as one literal run and flushed
//! whenever a directive produces a statement.

use std::collections::BTreeSet;

use crate::tree::{AttributeFragment, AttributeWrite, Expr, LinePragma, Member, Positioned, Statement};
use crate::{
    line_column, Diagnostic, DiagnosticKind, GeneratedClassContext, Severity, SourceTree,
    TemplateTranslator, Translation,
};

/// Translator for the `@` template syntax.
#[derive(Debug, Clone)]
pub struct MarkupTranslator {
    source_file: String,
}

impl Default for MarkupTranslator {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkupTranslator {
    pub fn new() -> Self {
        Self {
            source_file: "template".into(),
        }
    }

    /// File name recorded in line pragmas.
    pub fn with_source_file(mut self, name: impl Into<String>) -> Self {
        self.source_file = name.into();
        self
    }
}

impl TemplateTranslator for MarkupTranslator {
    fn translate(&self, template: &str, names: &GeneratedClassContext) -> Translation {
        let mut parser = Parser::new(template, &self.source_file);
        parser.run();

        let mut tree = SourceTree::empty(names);
        tree.imports.extend(parser.imports);
        for member in &mut tree.class.members {
            if let Member::Method(method) = member {
                if method.name == names.execute_method_name {
                    method.body = std::mem::take(&mut parser.statements);
                }
            }
        }

        Translation {
            tree,
            diagnostics: parser.diagnostics,
        }
    }
}

/// Result of scanning one quoted attribute value.
struct AttributeScan {
    fragments: Vec<AttributeFragment>,
    has_dynamic: bool,
    /// Offsets of `@@` escapes, each standing for a single `@`.
    escapes: Vec<usize>,
    suffix_start: usize,
    /// Offset of the closing quote.
    end: usize,
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    file: &'a str,
    pos: usize,
    literal_start: usize,
    statements: Vec<Statement>,
    imports: BTreeSet<String>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str, file: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            file,
            pos: 0,
            literal_start: 0,
            statements: Vec::new(),
            imports: BTreeSet::new(),
            diagnostics: Vec::new(),
        }
    }

    fn run(&mut self) {
        while self.pos < self.bytes.len() {
            match self.bytes[self.pos] {
                b'@' => self.transition(),
                b'<' if self.byte(self.pos + 1).is_some_and(|b| b.is_ascii_alphabetic()) => {
                    self.tag()
                }
                _ => self.pos += 1,
            }
        }
        self.flush_literal(self.bytes.len());
    }

    fn byte(&self, at: usize) -> Option<u8> {
        self.bytes.get(at).copied()
    }

    /// An `@` directly after an alphanumeric character is part of an email address.
    fn is_email_at(&self, at: usize) -> bool {
        at > 0 && self.bytes[at - 1].is_ascii_alphanumeric()
    }

    fn skip_ws(&self, mut p: usize) -> usize {
        while self.byte(p).is_some_and(|b| b.is_ascii_whitespace()) {
            p += 1;
        }
        p
    }

    fn error(&mut self, kind: DiagnosticKind, at: usize) {
        let position = line_column(self.src, at);
        self.diagnostics
            .push(Diagnostic::new(kind, Severity::Error, at, position));
    }

    fn flush_literal(&mut self, upto: usize) {
        if upto > self.literal_start {
            self.statements.push(Statement::WriteLiteral {
                text: self.src[self.literal_start..upto].to_string(),
                position: self.literal_start,
            });
        }
        self.literal_start = upto;
    }

    fn line_pragma(&self, at: usize) -> Statement {
        let (line, _) = line_column(self.src, at);
        Statement::LinePragma(LinePragma::Line {
            line,
            file: self.file.to_string(),
        })
    }

    fn emit(&mut self, at: usize, statement: Statement) {
        let pragma = self.line_pragma(at);
        self.statements.push(pragma);
        self.statements.push(statement);
        self.statements
            .push(Statement::LinePragma(LinePragma::Hidden));
    }

    fn transition(&mut self) {
        let at = self.pos;
        if self.is_email_at(at) {
            self.pos += 1;
            return;
        }

        match self.byte(at + 1) {
            Some(b'@') => {
                self.flush_literal(at);
                self.literal_start = at + 1;
                self.pos = at + 2;
            }
            Some(b'*') => {
                self.flush_literal(at);
                self.pos = match self.src[at + 2..].find("*@") {
                    Some(i) => at + 2 + i + 2,
                    None => {
                        self.error(DiagnosticKind::UnterminatedComment, at);
                        self.bytes.len()
                    }
                };
                self.literal_start = self.pos;
            }
            Some(b'{') => {
                self.flush_literal(at);
                self.error(DiagnosticKind::CodeBlockUnsupported, at);
                self.pos = self.skip_balanced(at + 1);
                self.literal_start = self.pos;
            }
            _ if self.src[at + 1..].starts_with("using ") => {
                self.flush_literal(at);
                self.using(at + 1 + "using ".len());
            }
            _ => match self.directive(at + 1) {
                Some((expr, end)) => {
                    self.flush_literal(at);
                    self.emit(at, Statement::Write { expr, position: at });
                    self.pos = end;
                    self.literal_start = end;
                }
                // the '@' stays in the literal run
                None => self.pos = at + 1,
            },
        }
    }

    fn skip_balanced(&self, open_at: usize) -> usize {
        let mut depth = 0usize;
        let mut p = open_at;
        while let Some(b) = self.byte(p) {
            match b {
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return p + 1;
                    }
                }
                _ => {}
            }
            p += 1;
        }
        self.bytes.len()
    }

    fn using(&mut self, start: usize) {
        let src = self.src;
        let end = src[start..]
            .find('\n')
            .map(|i| start + i)
            .unwrap_or(self.bytes.len());
        let namespace = src[start..end].trim().trim_end_matches(';').trim();
        if namespace.is_empty() {
            self.error(DiagnosticKind::EmptyExpression, start);
        } else {
            self.imports.insert(namespace.to_string());
        }
        self.pos = if end < self.bytes.len() { end + 1 } else { end };
        self.literal_start = self.pos;
    }

    /// Parses the directive following an `@` at `start - 1`.
    fn directive(&mut self, start: usize) -> Option<(Expr, usize)> {
        match self.byte(start) {
            Some(b'(') => {
                let (expr, p) = self.expression(start + 1)?;
                let end = self.close_paren(p)?;
                Some((expr, end))
            }
            Some(b) if is_ident_start(b) => self.identifier_expression(start),
            _ => {
                self.error(DiagnosticKind::EmptyExpression, start - 1);
                None
            }
        }
    }

    fn close_paren(&mut self, p: usize) -> Option<usize> {
        let p = self.skip_ws(p);
        if self.byte(p) == Some(b')') {
            Some(p + 1)
        } else {
            self.error(DiagnosticKind::ExpectedCloseParen, p);
            None
        }
    }

    fn ident(&self, start: usize) -> (&'a str, usize) {
        let src: &'a str = self.src;
        let mut end = start;
        while self.byte(end).is_some_and(is_ident_continue) {
            end += 1;
        }
        (&src[start..end], end)
    }

    fn identifier_expression(&mut self, start: usize) -> Option<(Expr, usize)> {
        let (ident, p) = self.ident(start);
        match ident {
            "true" => Some((Expr::Bool(true), p)),
            "false" => Some((Expr::Bool(false), p)),
            "null" => Some((Expr::Null, p)),
            "Raw" | "Encode" if self.byte(p) == Some(b'(') => {
                let (inner, q) = self.expression(p + 1)?;
                let end = self.close_paren(q)?;
                let wrapped = if ident == "Raw" {
                    Expr::Raw(Box::new(inner))
                } else {
                    Expr::Encode(Box::new(inner))
                };
                Some((wrapped, end))
            }
            "Url" if self.byte(p) == Some(b'(') => {
                let (inner, q) = self.expression(p + 1)?;
                let end = self.close_paren(q)?;
                match inner {
                    Expr::Str(url) => Some((Expr::Url(url), end)),
                    _ => {
                        self.error(DiagnosticKind::UrlExpectsString, p + 1);
                        None
                    }
                }
            }
            _ => {
                // a trailing '.' not followed by a name ends the path
                let mut end = p;
                while self.byte(end) == Some(b'.')
                    && self.byte(end + 1).is_some_and(is_ident_start)
                {
                    end = self.ident(end + 1).1;
                }
                Some((Expr::Path(self.src[start..end].to_string()), end))
            }
        }
    }

    fn expression(&mut self, start: usize) -> Option<(Expr, usize)> {
        let p = self.skip_ws(start);
        match self.byte(p) {
            Some(b'"') => self.string(p),
            Some(b)
                if b.is_ascii_digit()
                    || (b == b'-' && self.byte(p + 1).is_some_and(|c| c.is_ascii_digit())) =>
            {
                let mut end = p + 1;
                while let Some(c) = self.byte(end) {
                    let fraction =
                        c == b'.' && self.byte(end + 1).is_some_and(|d| d.is_ascii_digit());
                    if c.is_ascii_digit() || fraction {
                        end += 1;
                    } else {
                        break;
                    }
                }
                Some((Expr::Number(self.src[p..end].to_string()), end))
            }
            Some(b) if is_ident_start(b) => self.identifier_expression(p),
            Some(b')') | None => {
                self.error(DiagnosticKind::EmptyExpression, p);
                None
            }
            Some(_) => {
                self.error(DiagnosticKind::UnexpectedCharacter, p);
                None
            }
        }
    }

    fn string(&mut self, open: usize) -> Option<(Expr, usize)> {
        let mut out = String::new();
        let mut chars = self.src[open + 1..].char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '"' => return Some((Expr::Str(out), open + 1 + i + 1)),
                '\\' => match chars.next() {
                    Some((_, 'n')) => out.push('\n'),
                    Some((_, 't')) => out.push('\t'),
                    Some((_, 'r')) => out.push('\r'),
                    Some((_, other)) => out.push(other),
                    None => break,
                },
                c => out.push(c),
            }
        }
        self.error(DiagnosticKind::UnterminatedString, open);
        None
    }

    fn tag(&mut self) {
        let src = self.src;
        let mut p = self.pos + 1;
        while self
            .byte(p)
            .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b':')
        {
            p += 1;
        }

        loop {
            let ws_start = p;
            p = self.skip_ws(p);
            let Some(b) = self.byte(p) else {
                self.pos = p;
                return;
            };
            match b {
                b'>' => {
                    self.pos = p + 1;
                    return;
                }
                b'@' | b'<' => {
                    self.pos = p;
                    return;
                }
                b'/' | b'"' | b'\'' | b'=' => {
                    p += 1;
                    continue;
                }
                _ => {}
            }

            let name_start = p;
            while let Some(c) = self.byte(p) {
                if c.is_ascii_whitespace()
                    || matches!(c, b'=' | b'>' | b'/' | b'"' | b'\'' | b'<' | b'@')
                {
                    break;
                }
                p += 1;
            }
            let name_end = p;

            let q = self.skip_ws(p);
            if self.byte(q) != Some(b'=') {
                continue;
            }
            let q = self.skip_ws(q + 1);
            let quote = match self.byte(q) {
                Some(quote @ (b'"' | b'\'')) => quote,
                _ => {
                    p = q;
                    continue;
                }
            };

            let Some(scan) = self.attribute_value(q + 1, quote) else {
                self.pos = self.bytes.len();
                return;
            };

            if scan.has_dynamic {
                self.flush_literal(ws_start);
                let write = AttributeWrite {
                    name: src[name_start..name_end].to_string(),
                    prefix: Positioned::new(&src[ws_start..q + 1], ws_start),
                    suffix: Positioned::new(&src[scan.suffix_start..scan.end + 1], scan.suffix_start),
                    values: scan.fragments,
                };
                self.emit(name_start, Statement::WriteAttribute(write));
                self.literal_start = scan.end + 1;
            } else {
                for escape in scan.escapes {
                    self.flush_literal(escape);
                    self.literal_start = escape + 1;
                }
            }
            p = scan.end + 1;
        }
    }

    fn attribute_value(&mut self, start: usize, quote: u8) -> Option<AttributeScan> {
        let src = self.src;
        let mut fragments = Vec::new();
        let mut escapes = Vec::new();
        let mut has_dynamic = false;
        // start of the whitespace run before the next fragment
        let mut gap_start = start;
        let mut word: Option<(usize, String)> = None;
        let mut p = start;

        let literal = |gap_start: usize, (at, text): (usize, String)| AttributeFragment::Literal {
            prefix: Positioned::new(&src[gap_start..at], gap_start),
            value: Positioned::new(text, at),
        };

        loop {
            let b = self.byte(p)?;
            if b == quote {
                break;
            }
            if b.is_ascii_whitespace() {
                if let Some(w) = word.take() {
                    fragments.push(literal(gap_start, w));
                    gap_start = p;
                }
                p += 1;
                continue;
            }
            if b == b'@' {
                if self.byte(p + 1) == Some(b'@') {
                    escapes.push(p);
                    word.get_or_insert_with(|| (p, String::new())).1.push('@');
                    p += 2;
                    continue;
                }
                if !self.is_email_at(p) {
                    if let Some((expr, end)) = self.directive(p + 1) {
                        if let Some(w) = word.take() {
                            fragments.push(literal(gap_start, w));
                            gap_start = p;
                        }
                        fragments.push(AttributeFragment::Dynamic {
                            prefix: Positioned::new(&src[gap_start..p], gap_start),
                            expr,
                            position: p,
                        });
                        has_dynamic = true;
                        p = end;
                        gap_start = p;
                        continue;
                    }
                }
                word.get_or_insert_with(|| (p, String::new())).1.push('@');
                p += 1;
                continue;
            }
            let ch = src[p..].chars().next()?;
            word.get_or_insert_with(|| (p, String::new())).1.push(ch);
            p += ch.len_utf8();
        }

        if let Some(w) = word.take() {
            fragments.push(literal(gap_start, w));
            gap_start = p;
        }

        Some(AttributeScan {
            fragments,
            has_dynamic,
            escapes,
            suffix_start: gap_start,
            end: p,
        })
    }
}
