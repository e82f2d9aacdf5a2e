// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Single-pass recursive-descent parser for the IDL grammar.
//!
//! The parser produces the homogeneous AST consumed by the symbol scanner.
//! Constant expressions are evaluated here, at parse time, and stored as
//! literal values on their nodes; imports are resolved against the search
//! path list and spliced into the same tree.
//!
//! Node conventions (consumed by the scanner):
//!
//! - declaration nodes carry their keyword token; names live in the
//!   `name` attribute
//! - type references are `Ident` nodes; `list` carries a `list` marker
//!   attribute and an element child; array nodes carry the `[` token, a
//!   `count` attribute, and an element child
//! - struct members and function parameters are `Ident` nodes with a type
//!   child; annotations are `@` nodes attached as children
//! - union case nodes group label children (marked `label`) with member
//!   children

use crate::ast::{Ast, NodeId};
use crate::errors::{GenError, GenResult, Location};
use crate::lexer::Lexer;
use crate::token::{Token, TokenKind, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Parse `source` (plus anything it imports) into a fresh AST.
pub fn parse_source(
    file: impl AsRef<Path>,
    source: &str,
    search_paths: &[PathBuf],
) -> GenResult<Ast> {
    let mut ast = Ast::new();
    let mut shared = SharedState {
        consts: BTreeMap::new(),
        imported: HashSet::new(),
        search_paths: search_paths.to_vec(),
    };
    parse_unit(file.as_ref(), source, &mut ast, &mut shared)?;
    Ok(ast)
}

/// Parse the file at `path`, resolving imports relative to the search path
/// list plus the file's own directory.
pub fn parse_file(path: impl AsRef<Path>, search_paths: &[PathBuf]) -> GenResult<Ast> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path).map_err(|e| GenError::io(path, &e))?;
    let mut paths = search_paths.to_vec();
    if let Some(dir) = path.parent() {
        paths.push(dir.to_path_buf());
    }
    parse_source(path, &source, &paths)
}

struct SharedState {
    /// Constants (and enum members) usable in later constant expressions.
    consts: BTreeMap<String, Value>,
    imported: HashSet<PathBuf>,
    search_paths: Vec<PathBuf>,
}

fn parse_unit(
    file: &Path,
    source: &str,
    ast: &mut Ast,
    shared: &mut SharedState,
) -> GenResult<()> {
    let tokens = Lexer::new(file, source).tokenize()?;
    let mut parser = Parser {
        file: file.to_path_buf(),
        tokens,
        pos: 0,
        pending_gt: false,
        seen_program: false,
    };
    parser.parse_declarations(ast, shared)
}

struct Parser {
    file: PathBuf,
    tokens: Vec<Token>,
    pos: usize,
    /// Set when a `>>` token has had its first `>` consumed (nested lists).
    pending_gt: bool,
    seen_program: bool,
}

impl Parser {
    // -- token plumbing ----------------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek_at(&self, ahead: usize) -> &TokenKind {
        &self.tokens[(self.pos + ahead).min(self.tokens.len() - 1)].kind
    }

    fn location(&self) -> Location {
        self.peek().location
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek_kind() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> GenResult<Token> {
        if self.peek_kind() == &kind {
            Ok(self.advance())
        } else {
            Err(self.error(format!(
                "expected {}, found {}",
                kind.describe(),
                self.peek_kind().describe()
            )))
        }
    }

    fn expect_ident(&mut self) -> GenResult<(String, Location)> {
        let location = self.location();
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok((name, location))
            }
            other => Err(self.error(format!("expected identifier, found {}", other.describe()))),
        }
    }

    /// Close one angle bracket, splitting a `>>` into two closes.
    fn expect_gt(&mut self) -> GenResult<()> {
        if self.pending_gt {
            self.pending_gt = false;
            return Ok(());
        }
        match self.peek_kind() {
            TokenKind::Gt => {
                self.advance();
                Ok(())
            }
            TokenKind::Shr => {
                self.advance();
                self.pending_gt = true;
                Ok(())
            }
            other => Err(self.error(format!("expected '>', found {}", other.describe()))),
        }
    }

    fn error(&self, message: impl Into<String>) -> GenError {
        GenError::syntax(&self.file, self.location(), message)
    }

    fn error_at(&self, location: Location, message: impl Into<String>) -> GenError {
        GenError::syntax(&self.file, location, message)
    }

    /// True when the upcoming identifier is the given soft keyword
    /// (`case` / `default`, which are not reserved words).
    fn at_soft_keyword(&self, word: &str) -> bool {
        matches!(self.peek_kind(), TokenKind::Ident(name) if name == word)
    }

    // -- declarations ------------------------------------------------------

    fn parse_declarations(&mut self, ast: &mut Ast, shared: &mut SharedState) -> GenResult<()> {
        loop {
            // Leading annotations apply to the following declaration.
            let mut annotations = Vec::new();
            while self.peek_kind() == &TokenKind::At {
                annotations.push(self.parse_annotation(ast)?);
            }

            let node = match self.peek_kind().clone() {
                TokenKind::Eof => {
                    if !annotations.is_empty() {
                        return Err(self.error("annotations must precede a declaration"));
                    }
                    return Ok(());
                }
                TokenKind::Program => self.parse_program(ast)?,
                TokenKind::Import => {
                    self.parse_import(ast, shared)?;
                    continue;
                }
                TokenKind::Const => self.parse_const(ast, shared)?,
                TokenKind::Enum => self.parse_enum(ast, shared)?,
                TokenKind::Struct => self.parse_struct(ast)?,
                TokenKind::Union => self.parse_union_decl(ast)?,
                TokenKind::Type => self.parse_typedef(ast, shared)?,
                TokenKind::Interface => self.parse_interface(ast)?,
                other => {
                    return Err(self.error(format!(
                        "expected a declaration, found {}",
                        other.describe()
                    )))
                }
            };
            for annotation in annotations {
                ast.add_child(node, annotation);
            }
            ast.add_child(ast.root(), node);
            self.eat(&TokenKind::Semicolon);
        }
    }

    fn parse_program(&mut self, ast: &mut Ast) -> GenResult<NodeId> {
        let token = self.advance();
        if self.seen_program {
            return Err(self.error_at(token.location, "duplicate program declaration"));
        }
        self.seen_program = true;
        let (name, _) = self.expect_ident()?;
        let node = ast.new_node(token);
        ast.set_attr(node, "name", Value::String(name));
        while self.peek_kind() == &TokenKind::At {
            let annotation = self.parse_annotation(ast)?;
            ast.add_child(node, annotation);
        }
        Ok(node)
    }

    fn parse_import(&mut self, ast: &mut Ast, shared: &mut SharedState) -> GenResult<()> {
        let token = self.advance();
        let path_text = match self.advance() {
            Token {
                kind: TokenKind::StringLiteral(path),
                ..
            } => path,
            other => {
                return Err(self.error_at(
                    other.location,
                    "expected a quoted path after 'import'",
                ))
            }
        };
        self.eat(&TokenKind::Semicolon);

        let resolved = shared
            .search_paths
            .iter()
            .map(|dir| dir.join(&path_text))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| {
                self.error_at(token.location, format!("import '{}' not found", path_text))
            })?;
        let canonical = resolved.canonicalize().unwrap_or(resolved.clone());
        if !shared.imported.insert(canonical) {
            return Ok(());
        }
        let source =
            std::fs::read_to_string(&resolved).map_err(|e| GenError::io(&resolved, &e))?;
        parse_unit(&resolved, &source, ast, shared)
    }

    fn parse_const(&mut self, ast: &mut Ast, shared: &mut SharedState) -> GenResult<NodeId> {
        let token = self.advance();
        let type_node = self.parse_type_ref(ast)?;
        let (name, name_at) = self.expect_ident()?;
        self.expect(TokenKind::Assign)?;
        let value = self.parse_const_expr(shared)?;
        let node = ast.new_node(token);
        ast.set_attr(node, "name", Value::String(name.clone()));
        ast.set_attr(node, "value", value.clone());
        ast.add_child(node, type_node);
        if shared.consts.insert(name.clone(), value).is_some() {
            return Err(self.error_at(name_at, format!("duplicate constant '{}'", name)));
        }
        Ok(node)
    }

    fn parse_enum(&mut self, ast: &mut Ast, shared: &mut SharedState) -> GenResult<NodeId> {
        let token = self.advance();
        let name = match self.peek_kind() {
            TokenKind::Ident(_) => Some(self.expect_ident()?.0),
            _ => None,
        };
        let node = ast.new_node(token);
        if let Some(name) = name {
            ast.set_attr(node, "name", Value::String(name));
        }
        self.expect(TokenKind::LBrace)?;
        let mut next_value = 0i64;
        while self.peek_kind() != &TokenKind::RBrace {
            let (member_name, member_at) = self.expect_ident()?;
            let member = ast.new_node(Token::new(
                TokenKind::Ident(member_name.clone()),
                member_at,
            ));
            let value = if self.eat(&TokenKind::Assign) {
                let value = self.parse_const_expr(shared)?;
                let int = value
                    .as_int()
                    .ok_or_else(|| self.error_at(member_at, "enum value must be an integer"))?;
                ast.set_attr(member, "explicit", Value::int(1));
                int
            } else {
                next_value
            };
            next_value = value + 1;
            ast.set_attr(member, "value", Value::int(value));
            while self.peek_kind() == &TokenKind::At {
                let annotation = self.parse_annotation(ast)?;
                ast.add_child(member, annotation);
            }
            ast.add_child(node, member);
            // Enum members join the constant namespace for later expressions.
            shared.consts.insert(member_name, Value::int(value));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(node)
    }

    fn parse_struct(&mut self, ast: &mut Ast) -> GenResult<NodeId> {
        let token = self.advance();
        let (name, _) = self.expect_ident()?;
        let node = ast.new_node(token);
        ast.set_attr(node, "name", Value::String(name));

        if self.peek_kind() == &TokenKind::Semicolon {
            // Forward declaration: `struct Name;`
            ast.set_attr(node, "incomplete", Value::int(1));
            return Ok(node);
        }

        self.expect(TokenKind::LBrace)?;
        while self.peek_kind() != &TokenKind::RBrace {
            let member = self.parse_struct_member(ast)?;
            ast.add_child(node, member);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(node)
    }

    /// One struct member: a data member, or an encapsulated union
    /// (`union (disc) { ... } name;`).
    fn parse_struct_member(&mut self, ast: &mut Ast) -> GenResult<NodeId> {
        if self.peek_kind() == &TokenKind::Union {
            return self.parse_encapsulated_union(ast);
        }
        let byref = self.eat(&TokenKind::Byref);
        let type_node = self.parse_type_ref(ast)?;
        let (name, name_at) = self.expect_ident()?;
        let member = ast.new_node(Token::new(TokenKind::Ident(name), name_at));
        let type_node = self.parse_array_suffix(ast, type_node)?;
        ast.add_child(member, type_node);
        if byref {
            ast.set_attr(member, "byref", Value::int(1));
        }
        while self.peek_kind() == &TokenKind::At {
            let annotation = self.parse_annotation(ast)?;
            ast.add_child(member, annotation);
        }
        self.expect(TokenKind::Semicolon)?;
        Ok(member)
    }

    fn parse_encapsulated_union(&mut self, ast: &mut Ast) -> GenResult<NodeId> {
        let union_token = self.advance();
        self.expect(TokenKind::LParen)?;
        let (discriminator, _) = self.expect_ident()?;
        self.expect(TokenKind::RParen)?;

        let union_node = ast.new_node(union_token);
        ast.set_attr(union_node, "discriminator", Value::String(discriminator));
        self.parse_union_body(ast, union_node)?;

        let (name, name_at) = self.expect_ident()?;
        let member = ast.new_node(Token::new(TokenKind::Ident(name), name_at));
        ast.add_child(member, union_node);
        while self.peek_kind() == &TokenKind::At {
            let annotation = self.parse_annotation(ast)?;
            ast.add_child(member, annotation);
        }
        self.expect(TokenKind::Semicolon)?;
        Ok(member)
    }

    fn parse_union_decl(&mut self, ast: &mut Ast) -> GenResult<NodeId> {
        let token = self.advance();
        let (name, _) = self.expect_ident()?;
        let node = ast.new_node(token);
        ast.set_attr(node, "name", Value::String(name));
        if self.peek_kind() == &TokenKind::Semicolon {
            ast.set_attr(node, "incomplete", Value::int(1));
            return Ok(node);
        }
        self.parse_union_body(ast, node)?;
        Ok(node)
    }

    fn parse_union_body(&mut self, ast: &mut Ast, union_node: NodeId) -> GenResult<()> {
        self.expect(TokenKind::LBrace)?;
        while self.peek_kind() != &TokenKind::RBrace {
            if !self.at_soft_keyword("case") && !self.at_soft_keyword("default") {
                return Err(self.error("expected 'case' or 'default' in union body"));
            }
            let case_node = ast.new_node(self.peek().clone());

            // Collect every consecutive label sharing this member list:
            // `case a: case b:` and `case a, b:` both collapse here.
            loop {
                if self.at_soft_keyword("default") {
                    self.advance();
                    let label = ast.new_node(Token::synthetic(TokenKind::Ident("default".into())));
                    ast.set_attr(label, "label", Value::int(1));
                    ast.add_child(case_node, label);
                    self.expect(TokenKind::Colon)?;
                } else if self.at_soft_keyword("case") {
                    self.advance();
                    loop {
                        let label_token = self.advance();
                        match &label_token.kind {
                            TokenKind::Ident(_) | TokenKind::IntLiteral(_) => {}
                            other => {
                                return Err(self.error_at(
                                    label_token.location,
                                    format!("expected case label, found {}", other.describe()),
                                ))
                            }
                        }
                        let label = ast.new_node(label_token);
                        ast.set_attr(label, "label", Value::int(1));
                        ast.add_child(case_node, label);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(TokenKind::Colon)?;
                } else {
                    break;
                }
            }

            // Member declarations until the next label or the close brace.
            while self.peek_kind() != &TokenKind::RBrace
                && !self.at_soft_keyword("case")
                && !self.at_soft_keyword("default")
            {
                let member = self.parse_struct_member(ast)?;
                ast.add_child(case_node, member);
            }
            ast.add_child(union_node, case_node);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(())
    }

    fn parse_typedef(&mut self, ast: &mut Ast, shared: &mut SharedState) -> GenResult<NodeId> {
        let token = self.advance();
        let (name, _) = self.expect_ident()?;
        self.expect(TokenKind::Assign)?;

        let node = ast.new_node(token);
        ast.set_attr(node, "name", Value::String(name));

        let target = match self.peek_kind().clone() {
            // Anonymous aggregates are permitted only when typedef'd.
            TokenKind::Struct => {
                let struct_token = self.advance();
                let anon = ast.new_node(struct_token);
                self.expect(TokenKind::LBrace)?;
                while self.peek_kind() != &TokenKind::RBrace {
                    let member = self.parse_struct_member(ast)?;
                    ast.add_child(anon, member);
                }
                self.expect(TokenKind::RBrace)?;
                anon
            }
            TokenKind::Enum => self.parse_enum(ast, shared)?,
            TokenKind::Union => {
                let union_token = self.advance();
                let anon = ast.new_node(union_token);
                self.parse_union_body(ast, anon)?;
                anon
            }
            _ => {
                let base = self.parse_type_ref(ast)?;
                if self.peek_kind() == &TokenKind::LParen {
                    // Function (callback) type: `ret (params)`.
                    self.parse_function_type(ast, node)?;
                    let arrow = ast.new_node(Token::synthetic(TokenKind::Arrow));
                    ast.add_child(arrow, base);
                    arrow
                } else {
                    self.parse_array_suffix(ast, base)?
                }
            }
        };
        ast.add_child(node, target);
        while self.peek_kind() == &TokenKind::At {
            let annotation = self.parse_annotation(ast)?;
            ast.add_child(node, annotation);
        }
        Ok(node)
    }

    fn parse_function_type(&mut self, ast: &mut Ast, typedef_node: NodeId) -> GenResult<()> {
        ast.set_attr(typedef_node, "function_type", Value::int(1));
        self.expect(TokenKind::LParen)?;
        while self.peek_kind() != &TokenKind::RParen {
            let param = self.parse_param(ast)?;
            ast.add_child(typedef_node, param);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(())
    }

    fn parse_interface(&mut self, ast: &mut Ast) -> GenResult<NodeId> {
        let token = self.advance();
        let (name, _) = self.expect_ident()?;
        let node = ast.new_node(token);
        ast.set_attr(node, "name", Value::String(name));
        self.expect(TokenKind::LBrace)?;
        while self.peek_kind() != &TokenKind::RBrace {
            let function = self.parse_function(ast)?;
            ast.add_child(node, function);
            self.eat(&TokenKind::Semicolon);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(node)
    }

    /// `[oneway] name(params) [-> type]`, a concrete callback
    /// `cbType name [(params)]`, or leading annotations on either.
    fn parse_function(&mut self, ast: &mut Ast) -> GenResult<NodeId> {
        let mut annotations = Vec::new();
        while self.peek_kind() == &TokenKind::At {
            annotations.push(self.parse_annotation(ast)?);
        }
        let oneway = self.eat(&TokenKind::Oneway);
        let (first, first_at) = self.expect_ident()?;

        let node;
        if let TokenKind::Ident(_) = self.peek_kind() {
            // Two identifiers: a concrete callback of a declared type.
            let (fn_name, fn_at) = self.expect_ident()?;
            node = ast.new_node(Token::new(TokenKind::Ident(fn_name), fn_at));
            ast.set_attr(node, "callback_type", Value::String(first));
            if self.eat(&TokenKind::LParen) {
                while self.peek_kind() != &TokenKind::RParen {
                    let param = self.parse_param(ast)?;
                    ast.add_child(node, param);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RParen)?;
            }
        } else {
            node = ast.new_node(Token::new(TokenKind::Ident(first), first_at));
            self.expect(TokenKind::LParen)?;
            while self.peek_kind() != &TokenKind::RParen {
                let param = self.parse_param(ast)?;
                ast.add_child(node, param);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::RParen)?;
            if self.eat(&TokenKind::Arrow) {
                let arrow = ast.new_node(Token::synthetic(TokenKind::Arrow));
                let return_type = if self.peek_kind() == &TokenKind::Void {
                    let void_token = self.advance();
                    ast.new_node(void_token)
                } else {
                    self.parse_type_ref(ast)?
                };
                ast.add_child(arrow, return_type);
                ast.add_child(node, arrow);
            }
        }

        if oneway {
            ast.set_attr(node, "oneway", Value::int(1));
        }
        while self.peek_kind() == &TokenKind::At {
            annotations.push(self.parse_annotation(ast)?);
        }
        for annotation in annotations {
            ast.add_child(node, annotation);
        }
        Ok(node)
    }

    /// `[in|out|inout] [byref] type name [@annotations]`
    fn parse_param(&mut self, ast: &mut Ast) -> GenResult<NodeId> {
        let direction = match self.peek_kind() {
            TokenKind::In => {
                self.advance();
                Some("in")
            }
            TokenKind::Out => {
                self.advance();
                Some("out")
            }
            TokenKind::Inout => {
                self.advance();
                Some("inout")
            }
            _ => None,
        };
        let byref = self.eat(&TokenKind::Byref);
        let type_node = self.parse_type_ref(ast)?;
        let (name, name_at) = self.expect_ident()?;
        let param = ast.new_node(Token::new(TokenKind::Ident(name), name_at));
        let type_node = self.parse_array_suffix(ast, type_node)?;
        ast.add_child(param, type_node);
        if let Some(direction) = direction {
            ast.set_attr(param, "direction", Value::String(direction.into()));
        }
        if byref {
            ast.set_attr(param, "byref", Value::int(1));
        }
        while self.peek_kind() == &TokenKind::At {
            let annotation = self.parse_annotation(ast)?;
            ast.add_child(param, annotation);
        }
        Ok(param)
    }

    // -- types -------------------------------------------------------------

    /// A type reference: named type, `void`, or `list<T>`.
    fn parse_type_ref(&mut self, ast: &mut Ast) -> GenResult<NodeId> {
        if self.peek_kind() == &TokenKind::Void {
            let token = self.advance();
            return Ok(ast.new_node(token));
        }
        let (name, location) = self.expect_ident()?;
        if name == "list" && self.peek_kind() == &TokenKind::Lt {
            self.advance();
            let element = self.parse_type_ref(ast)?;
            self.expect_gt()?;
            let node = ast.new_node(Token::new(TokenKind::Ident(name), location));
            ast.set_attr(node, "list", Value::int(1));
            ast.add_child(node, element);
            return Ok(node);
        }
        Ok(ast.new_node(Token::new(TokenKind::Ident(name), location)))
    }

    /// Zero or more `[count]` suffixes; innermost dimension is rightmost.
    fn parse_array_suffix(&mut self, ast: &mut Ast, base: NodeId) -> GenResult<NodeId> {
        let mut counts = Vec::new();
        while self.peek_kind() == &TokenKind::LBracket {
            let bracket = self.advance();
            let count_at = self.location();
            let count_token = self.advance();
            let count = match &count_token.kind {
                TokenKind::IntLiteral(value) => value.clone(),
                TokenKind::Ident(name) => Value::String(name.clone()),
                other => {
                    return Err(self.error_at(
                        count_at,
                        format!("expected array size, found {}", other.describe()),
                    ))
                }
            };
            self.expect(TokenKind::RBracket)?;
            counts.push((bracket, count));
        }
        let mut node = base;
        for (bracket, count) in counts.into_iter().rev() {
            let array = ast.new_node(bracket);
            ast.set_attr(array, "count", count);
            ast.add_child(array, node);
            node = array;
        }
        Ok(node)
    }

    // -- annotations -------------------------------------------------------

    /// `@name`, `@name(value)`, `@lang:name(value)`
    fn parse_annotation(&mut self, ast: &mut Ast) -> GenResult<NodeId> {
        let at = self.expect(TokenKind::At)?;
        let (mut name, _) = self.expect_ident()?;
        let node = ast.new_node(at);
        if self.eat(&TokenKind::Colon) {
            let (real_name, _) = self.expect_ident()?;
            ast.set_attr(node, "lang", Value::String(name));
            name = real_name;
        }
        ast.set_attr(node, "name", Value::String(name));
        if self.eat(&TokenKind::LParen) {
            let value_at = self.location();
            let value = match self.advance().kind {
                TokenKind::IntLiteral(value) => value,
                TokenKind::FloatLiteral(value) => Value::Float(value),
                TokenKind::StringLiteral(value) => Value::String(value),
                TokenKind::Ident(name) => Value::String(name),
                TokenKind::True => Value::int(1),
                TokenKind::False => Value::int(0),
                other => {
                    return Err(self.error_at(
                        value_at,
                        format!("expected annotation value, found {}", other.describe()),
                    ))
                }
            };
            ast.set_attr(node, "value", value);
            self.expect(TokenKind::RParen)?;
        }
        Ok(node)
    }

    // -- constant expressions ----------------------------------------------

    fn parse_const_expr(&mut self, shared: &SharedState) -> GenResult<Value> {
        self.parse_bitor(shared)
    }

    fn parse_bitor(&mut self, shared: &SharedState) -> GenResult<Value> {
        let mut left = self.parse_bitxor(shared)?;
        while self.peek_kind() == &TokenKind::Pipe {
            let at = self.location();
            self.advance();
            let right = self.parse_bitxor(shared)?;
            left = self.apply_int_op(at, "|", left, right)?;
        }
        Ok(left)
    }

    fn parse_bitxor(&mut self, shared: &SharedState) -> GenResult<Value> {
        let mut left = self.parse_bitand(shared)?;
        while self.peek_kind() == &TokenKind::Caret {
            let at = self.location();
            self.advance();
            let right = self.parse_bitand(shared)?;
            left = self.apply_int_op(at, "^", left, right)?;
        }
        Ok(left)
    }

    fn parse_bitand(&mut self, shared: &SharedState) -> GenResult<Value> {
        let mut left = self.parse_shift(shared)?;
        while self.peek_kind() == &TokenKind::Amp {
            let at = self.location();
            self.advance();
            let right = self.parse_shift(shared)?;
            left = self.apply_int_op(at, "&", left, right)?;
        }
        Ok(left)
    }

    fn parse_shift(&mut self, shared: &SharedState) -> GenResult<Value> {
        let mut left = self.parse_additive(shared)?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Shl => "<<",
                TokenKind::Shr => ">>",
                _ => break,
            };
            let at = self.location();
            self.advance();
            let right = self.parse_additive(shared)?;
            left = self.apply_int_op(at, op, left, right)?;
        }
        Ok(left)
    }

    fn parse_additive(&mut self, shared: &SharedState) -> GenResult<Value> {
        let mut left = self.parse_multiplicative(shared)?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => "+",
                TokenKind::Minus => "-",
                _ => break,
            };
            let at = self.location();
            self.advance();
            let right = self.parse_multiplicative(shared)?;
            left = self.apply_arith_op(at, op, left, right)?;
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self, shared: &SharedState) -> GenResult<Value> {
        let mut left = self.parse_unary(shared)?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => "*",
                TokenKind::Slash => "/",
                TokenKind::Percent => "%",
                _ => break,
            };
            let at = self.location();
            self.advance();
            let right = self.parse_unary(shared)?;
            left = self.apply_arith_op(at, op, left, right)?;
        }
        Ok(left)
    }

    fn parse_unary(&mut self, shared: &SharedState) -> GenResult<Value> {
        match self.peek_kind() {
            TokenKind::Minus => {
                let at = self.location();
                self.advance();
                let value = self.parse_unary(shared)?;
                match value {
                    Value::Integer { value, .. } => Ok(Value::int(-value)),
                    Value::Float(value) => Ok(Value::Float(-value)),
                    Value::String(_) => Err(self.error_at(at, "cannot negate a string")),
                }
            }
            TokenKind::Tilde => {
                let at = self.location();
                self.advance();
                let value = self.parse_unary(shared)?;
                match value.as_int() {
                    Some(value) => Ok(Value::int(!value)),
                    None => Err(self.error_at(at, "'~' requires an integer operand")),
                }
            }
            TokenKind::Plus => {
                self.advance();
                self.parse_unary(shared)
            }
            _ => self.parse_primary(shared),
        }
    }

    fn parse_primary(&mut self, shared: &SharedState) -> GenResult<Value> {
        let location = self.location();
        match self.advance().kind {
            TokenKind::IntLiteral(value) => Ok(value),
            TokenKind::FloatLiteral(value) => Ok(Value::Float(value)),
            TokenKind::StringLiteral(value) => Ok(Value::String(value)),
            TokenKind::True => Ok(Value::int(1)),
            TokenKind::False => Ok(Value::int(0)),
            TokenKind::LParen => {
                let value = self.parse_const_expr(shared)?;
                self.expect(TokenKind::RParen)?;
                Ok(value)
            }
            TokenKind::Ident(name) => shared.consts.get(&name).cloned().ok_or_else(|| {
                self.error_at(location, format!("undefined constant '{}'", name))
            }),
            other => Err(self.error_at(
                location,
                format!("expected a constant expression, found {}", other.describe()),
            )),
        }
    }

    /// `+ - * / %` with int-to-float promotion; division by zero yields
    /// zero.
    fn apply_arith_op(
        &self,
        at: Location,
        op: &str,
        left: Value,
        right: Value,
    ) -> GenResult<Value> {
        match (&left, &right) {
            (Value::String(_), _) | (_, Value::String(_)) => {
                Err(self.error_at(at, format!("'{}' is not defined for strings", op)))
            }
            (Value::Float(_), _) | (_, Value::Float(_)) => {
                if op == "%" {
                    return Err(self.error_at(at, "'%' is not defined for float operands"));
                }
                let a = left.as_float().unwrap_or(0.0);
                let b = right.as_float().unwrap_or(0.0);
                Ok(Value::Float(match op {
                    "+" => a + b,
                    "-" => a - b,
                    "*" => a * b,
                    "/" => {
                        if b == 0.0 {
                            0.0
                        } else {
                            a / b
                        }
                    }
                    _ => unreachable!(),
                }))
            }
            _ => {
                let a = left.as_int().unwrap_or(0);
                let b = right.as_int().unwrap_or(0);
                Ok(Value::int(match op {
                    "+" => a.wrapping_add(b),
                    "-" => a.wrapping_sub(b),
                    "*" => a.wrapping_mul(b),
                    "/" => {
                        if b == 0 {
                            0
                        } else {
                            a / b
                        }
                    }
                    "%" => {
                        if b == 0 {
                            0
                        } else {
                            a % b
                        }
                    }
                    _ => unreachable!(),
                }))
            }
        }
    }

    /// Bitwise and shift operators, integers only.
    fn apply_int_op(&self, at: Location, op: &str, left: Value, right: Value) -> GenResult<Value> {
        let (a, b) = match (left.as_int(), right.as_int()) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                return Err(
                    self.error_at(at, format!("'{}' is not defined for float operands", op))
                )
            }
        };
        Ok(Value::int(match op {
            "|" => a | b,
            "^" => a ^ b,
            "&" => a & b,
            "<<" => ((a as u64) << (b as u32 & 63)) as i64,
            ">>" => ((a as u64) >> (b as u32 & 63)) as i64,
            _ => unreachable!(),
        }))
    }
}
