// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Symbol scanner: semantic analysis over the parsed AST.
//!
//! Walks the tree once, in declaration order, and produces the [`Program`]
//! the emitters consume. Responsibilities:
//!
//! - resolve every type reference to a [`TypeRef`]; unresolved names error
//! - attach computed values to constants and type-check the assignment
//! - reconcile forward declarations in place; a kind mismatch is fatal, and
//!   any name still incomplete at the end of the unit is fatal
//! - validate `@length`/`@max_length` targets and union discriminators
//! - deduplicate union case members that share name and type
//! - clear the shared marker on containers with non-shared members
//! - assign unique ids (per-interface function counters from 1, `@id`
//!   overrides) and warn on duplicates with the offending locations

use crate::ast::{Ast, NodeId};
use crate::errors::{GenError, GenResult, Location};
use crate::token::{TokenKind, Value};
use crate::types::{
    Annotated, Annotation, BuiltinKind, CaseLabel, ConstDef, DataType, Direction, EnumMember,
    EnumType, Function, FunctionType, Interface, LangFilter, Program, StructMember, StructType,
    TypeRef, TypeTable, UnionCase, UnionType,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

enum GlobalSymbol {
    Type(TypeRef),
    Const(usize),
    Interface(usize),
}

enum ForwardKind {
    Struct,
    Union,
}

/// Analyse a parsed AST into a [`Program`].
pub fn scan(file: impl AsRef<Path>, ast: &Ast) -> GenResult<Program> {
    let mut scanner = Scanner {
        file: file.as_ref().to_path_buf(),
        ast,
        types: TypeTable::new(),
        scope: BTreeMap::new(),
        forward: BTreeMap::new(),
        consts: Vec::new(),
        const_values: BTreeMap::new(),
        interfaces: Vec::new(),
        type_decls: Vec::new(),
        program_name: None,
        program_annotations: Vec::new(),
        warnings: Vec::new(),
        next_interface_id: 1,
    };
    scanner.seed_builtins();
    scanner.run()
}

struct Scanner<'a> {
    file: PathBuf,
    ast: &'a Ast,
    types: TypeTable,
    scope: BTreeMap<String, GlobalSymbol>,
    /// Outstanding forward declarations: name -> (placeholder, kind, at).
    forward: BTreeMap<String, (TypeRef, ForwardKind, Location)>,
    consts: Vec<ConstDef>,
    /// Constant and enum-member integer values for label resolution.
    const_values: BTreeMap<String, i64>,
    interfaces: Vec<Interface>,
    type_decls: Vec<TypeRef>,
    program_name: Option<String>,
    program_annotations: Vec<Annotation>,
    warnings: Vec<String>,
    next_interface_id: u32,
}

impl<'a> Scanner<'a> {
    fn seed_builtins(&mut self) {
        for &kind in BuiltinKind::all() {
            self.scope.insert(
                kind.idl_name().to_string(),
                GlobalSymbol::Type(self.types.builtin(kind)),
            );
        }
    }

    fn error(&self, at: Location, message: impl Into<String>) -> GenError {
        GenError::semantic(&self.file, at, message)
    }

    fn warn(&mut self, at: Location, message: impl std::fmt::Display) {
        self.warnings
            .push(format!("{}:{}: warning: {}", self.file.display(), at, message));
    }

    fn define(&mut self, name: &str, at: Location, symbol: GlobalSymbol) -> GenResult<()> {
        if self.scope.contains_key(name) {
            return Err(self.error(at, format!("duplicate symbol '{}'", name)));
        }
        self.scope.insert(name.to_string(), symbol);
        Ok(())
    }

    fn run(mut self) -> GenResult<Program> {
        for &decl in self.ast.children(self.ast.root()) {
            match &self.ast.node(decl).token.kind {
                TokenKind::Program => self.scan_program(decl)?,
                TokenKind::Const => self.scan_const(decl)?,
                TokenKind::Enum => {
                    let id = self.scan_enum(decl, None)?;
                    self.type_decls.push(id);
                }
                TokenKind::Struct => {
                    let id = self.scan_struct_decl(decl)?;
                    if let Some(id) = id {
                        self.type_decls.push(id);
                    }
                }
                TokenKind::Union => {
                    let id = self.scan_union_decl(decl)?;
                    if let Some(id) = id {
                        self.type_decls.push(id);
                    }
                }
                TokenKind::Type => {
                    let id = self.scan_typedef(decl)?;
                    self.type_decls.push(id);
                }
                TokenKind::Interface => self.scan_interface(decl)?,
                other => {
                    return Err(self.error(
                        self.ast.location(decl),
                        format!("unexpected {} at top level", other.describe()),
                    ))
                }
            }
        }

        // The unit is closed; every forward declaration must be resolved.
        if let Some((name, (_, _, at))) = self.forward.iter().next() {
            let (name, at) = (name.clone(), *at);
            return Err(self.error(at, format!("forward-declared type '{}' is never defined", name)));
        }

        self.propagate_shared();
        self.check_interface_ids();

        Ok(Program {
            name: self.program_name,
            annotations: self.program_annotations,
            types: self.types,
            type_decls: self.type_decls,
            consts: self.consts,
            interfaces: self.interfaces,
            warnings: self.warnings,
        })
    }

    // -- annotations -------------------------------------------------------

    fn collect_annotations(&self, node: NodeId) -> GenResult<Vec<Annotation>> {
        let mut annotations = Vec::new();
        for child in self.ast.children_of_kind(node, &TokenKind::At) {
            let at = self.ast.location(child);
            let name = self
                .ast
                .attr_str(child, "name")
                .unwrap_or_default()
                .to_string();
            let lang = match self.ast.attr_str(child, "lang") {
                Some(text) => LangFilter::parse(text)
                    .ok_or_else(|| self.error(at, format!("unknown language filter '{}'", text)))?,
                None => LangFilter::All,
            };
            annotations.push(Annotation {
                name,
                value: self.ast.attr(child, "value").cloned(),
                lang,
                location: at,
            });
        }
        Ok(annotations)
    }

    // -- program / const ---------------------------------------------------

    fn scan_program(&mut self, node: NodeId) -> GenResult<()> {
        self.program_name = self.ast.attr_str(node, "name").map(str::to_string);
        self.program_annotations = self.collect_annotations(node)?;
        Ok(())
    }

    fn scan_const(&mut self, node: NodeId) -> GenResult<()> {
        let at = self.ast.location(node);
        let name = self.ast.attr_str(node, "name").unwrap_or_default().to_string();
        let value = self
            .ast
            .attr(node, "value")
            .cloned()
            .ok_or_else(|| self.error(at, "constant without a value"))?;
        let type_node = self
            .ast
            .children(node)
            .iter()
            .copied()
            .find(|&c| self.ast.node(c).token.kind != TokenKind::At)
            .ok_or_else(|| self.error(at, "constant without a type"))?;
        let ty = self.resolve_type(type_node)?;

        // Type-check the assignment.
        let true_ty = self.types.true_type(ty);
        match (self.types.get(true_ty), &value) {
            (DataType::Builtin(k), Value::Integer { .. }) if k.is_scalar() => {}
            (DataType::Builtin(k), Value::Float(_)) if k.is_float() => {}
            (DataType::Builtin(BuiltinKind::String), Value::String(_)) => {}
            (DataType::Enum(_), Value::Integer { .. }) => {}
            _ => {
                return Err(self.error(
                    at,
                    format!(
                        "constant '{}' value does not match its declared type '{}'",
                        name,
                        self.types.describe(ty)
                    ),
                ))
            }
        }

        let annotations = self.collect_annotations(node)?;
        let index = self.consts.len();
        self.define(&name, at, GlobalSymbol::Const(index))?;
        if let Some(int) = value.as_int() {
            self.const_values.insert(name.clone(), int);
        }
        self.consts.push(ConstDef {
            name,
            ty,
            value,
            annotations,
        });
        Ok(())
    }

    // -- type declarations -------------------------------------------------

    fn scan_enum(&mut self, node: NodeId, name_override: Option<String>) -> GenResult<TypeRef> {
        let at = self.ast.location(node);
        let name = name_override
            .or_else(|| self.ast.attr_str(node, "name").map(str::to_string))
            .unwrap_or_default();
        let mut members = Vec::new();
        for child in self.ast.children(node) {
            let child = *child;
            if self.ast.node(child).token.kind == TokenKind::At {
                continue;
            }
            let member_name = match self.ast.node(child).token.ident_name() {
                Some(n) => n.to_string(),
                None => continue,
            };
            let value = self.ast.attr_int(child, "value").unwrap_or(0);
            self.const_values.insert(member_name.clone(), value);
            members.push(EnumMember {
                name: member_name,
                value,
                explicit: self.ast.has_attr(child, "explicit"),
                annotations: self.collect_annotations(child)?,
            });
        }
        let annotations = self.collect_annotations(node)?;
        let id = self.types.add(DataType::Enum(EnumType {
            name: name.clone(),
            members,
            annotations,
        }));
        if !name.is_empty() {
            self.define(&name, at, GlobalSymbol::Type(id))?;
        }
        Ok(id)
    }

    /// Top-level `struct` node: forward declaration or full definition.
    fn scan_struct_decl(&mut self, node: NodeId) -> GenResult<Option<TypeRef>> {
        let at = self.ast.location(node);
        let name = self.ast.attr_str(node, "name").unwrap_or_default().to_string();

        if self.ast.has_attr(node, "incomplete") {
            if self.scope.contains_key(&name) && !self.forward.contains_key(&name) {
                return Err(self.error(at, format!("duplicate symbol '{}'", name)));
            }
            if self.forward.contains_key(&name) {
                return Ok(None); // repeated forward declaration
            }
            let placeholder = self.types.add(DataType::Struct(StructType {
                name: name.clone(),
                members: Vec::new(),
                incomplete: true,
                shareable: false,
                annotations: Vec::new(),
            }));
            self.define(&name, at, GlobalSymbol::Type(placeholder))?;
            self.forward
                .insert(name, (placeholder, ForwardKind::Struct, at));
            return Ok(None);
        }

        let annotations = self.collect_annotations(node)?;
        let shareable = annotations.iter().any(|a| a.name == "shared");

        // A full definition may be completing an outstanding forward
        // declaration; the kinds must match.
        let slot = match self.forward.remove(&name) {
            Some((placeholder, ForwardKind::Struct, _)) => Some(placeholder),
            Some((_, ForwardKind::Union, fwd_at)) => {
                return Err(self.error(
                    at,
                    format!(
                        "'{}' was forward-declared as a union at {} but defined as a struct",
                        name, fwd_at
                    ),
                ))
            }
            None => None,
        };

        let members = self.scan_members(node, Direction::In)?;
        let struct_type = StructType {
            name: name.clone(),
            members,
            incomplete: false,
            shareable,
            annotations,
        };
        let id = match slot {
            Some(placeholder) => {
                self.types.replace(placeholder, DataType::Struct(struct_type));
                placeholder
            }
            None => {
                let id = self.types.add(DataType::Struct(struct_type));
                self.define(&name, at, GlobalSymbol::Type(id))?;
                id
            }
        };
        self.validate_struct(id, at)?;
        Ok(Some(id))
    }

    fn scan_union_decl(&mut self, node: NodeId) -> GenResult<Option<TypeRef>> {
        let at = self.ast.location(node);
        let name = self.ast.attr_str(node, "name").unwrap_or_default().to_string();

        if self.ast.has_attr(node, "incomplete") {
            if self.scope.contains_key(&name) && !self.forward.contains_key(&name) {
                return Err(self.error(at, format!("duplicate symbol '{}'", name)));
            }
            if self.forward.contains_key(&name) {
                return Ok(None);
            }
            let placeholder = self.types.add(DataType::Union(UnionType {
                name: name.clone(),
                discriminator: None,
                cases: Vec::new(),
                members: Vec::new(),
                incomplete: true,
                shareable: false,
                annotations: Vec::new(),
            }));
            self.define(&name, at, GlobalSymbol::Type(placeholder))?;
            self.forward.insert(name, (placeholder, ForwardKind::Union, at));
            return Ok(None);
        }

        let slot = match self.forward.remove(&name) {
            Some((placeholder, ForwardKind::Union, _)) => Some(placeholder),
            Some((_, ForwardKind::Struct, fwd_at)) => {
                return Err(self.error(
                    at,
                    format!(
                        "'{}' was forward-declared as a struct at {} but defined as a union",
                        name, fwd_at
                    ),
                ))
            }
            None => None,
        };

        let union_type = self.scan_union_body(node, name.clone(), None)?;
        let id = match slot {
            Some(placeholder) => {
                self.types.replace(placeholder, DataType::Union(union_type));
                placeholder
            }
            None => {
                let id = self.types.add(DataType::Union(union_type));
                self.define(&name, at, GlobalSymbol::Type(id))?;
                id
            }
        };
        Ok(Some(id))
    }

    /// Cases and deduplicated members of a union node.
    fn scan_union_body(
        &mut self,
        node: NodeId,
        name: String,
        discriminator: Option<String>,
    ) -> GenResult<UnionType> {
        let annotations = self.collect_annotations(node)?;
        let shareable = annotations.iter().any(|a| a.name == "shared");
        let mut cases = Vec::new();
        let mut members: Vec<StructMember> = Vec::new();

        for &case_node in self.ast.children(node) {
            if self.ast.node(case_node).token.kind == TokenKind::At {
                continue;
            }
            let mut labels = Vec::new();
            let mut member_names = Vec::new();
            for &child in self.ast.children(case_node) {
                if self.ast.has_attr(child, "label") {
                    let token = &self.ast.node(child).token;
                    let label = match &token.kind {
                        TokenKind::Ident(text) if text == "default" => CaseLabel::Default,
                        TokenKind::Ident(text) => {
                            // Named labels must be resolvable values.
                            match self.const_values.get(text) {
                                Some(&value) => CaseLabel::Name {
                                    name: text.clone(),
                                    value,
                                },
                                None => {
                                    return Err(self.error(
                                        token.location,
                                        format!("unknown union case label '{}'", text),
                                    ))
                                }
                            }
                        }
                        TokenKind::IntLiteral(value) => {
                            CaseLabel::Value(value.as_int().unwrap_or(0))
                        }
                        other => {
                            return Err(self.error(
                                token.location,
                                format!("invalid case label {}", other.describe()),
                            ))
                        }
                    };
                    labels.push(label);
                } else {
                    let member = self.scan_member(child, Direction::In)?;
                    // Two labels may share one declaration: same name and
                    // type collapse to a single wire member.
                    match members.iter().find(|m| m.name == member.name) {
                        Some(existing) if existing.ty == member.ty => {}
                        Some(_) => {
                            return Err(self.error(
                                member.location,
                                format!(
                                    "union member '{}' redeclared with a different type",
                                    member.name
                                ),
                            ))
                        }
                        None => members.push(member.clone()),
                    }
                    member_names.push(member.name);
                }
            }
            cases.push(UnionCase {
                labels,
                member_names,
            });
        }

        Ok(UnionType {
            name,
            discriminator,
            cases,
            members,
            incomplete: false,
            shareable,
            annotations,
        })
    }

    fn scan_typedef(&mut self, node: NodeId) -> GenResult<TypeRef> {
        let at = self.ast.location(node);
        let name = self.ast.attr_str(node, "name").unwrap_or_default().to_string();

        if self.ast.has_attr(node, "function_type") {
            return self.scan_function_type(node, name, at);
        }

        let target_node = self
            .ast
            .children(node)
            .iter()
            .copied()
            .find(|&c| self.ast.node(c).token.kind != TokenKind::At)
            .ok_or_else(|| self.error(at, "typedef without a target type"))?;

        let target = match &self.ast.node(target_node).token.kind {
            // Anonymous aggregates take shape here; the emitter later
            // collapses the alias onto them.
            TokenKind::Struct => {
                let members = self.scan_members(target_node, Direction::In)?;
                let annotations = self.collect_annotations(target_node)?;
                let id = self.types.add(DataType::Struct(StructType {
                    name: String::new(),
                    members,
                    incomplete: false,
                    shareable: false,
                    annotations,
                }));
                self.validate_struct(id, at)?;
                id
            }
            TokenKind::Enum => self.scan_enum(target_node, None)?,
            TokenKind::Union => {
                let union_type = self.scan_union_body(target_node, String::new(), None)?;
                self.types.add(DataType::Union(union_type))
            }
            _ => self.resolve_type(target_node)?,
        };

        let id = self.types.add(DataType::Alias {
            name: name.clone(),
            target,
        });
        self.define(&name, at, GlobalSymbol::Type(id))?;
        Ok(id)
    }

    fn scan_function_type(&mut self, node: NodeId, name: String, at: Location) -> GenResult<TypeRef> {
        let mut params = Vec::new();
        let mut return_type = self.types.void();
        for &child in self.ast.children(node) {
            match &self.ast.node(child).token.kind {
                TokenKind::Ident(_) => params.push(self.scan_member(child, Direction::In)?),
                TokenKind::Arrow => {
                    let ret = self.ast.children(child)[0];
                    return_type = if self.ast.node(ret).token.kind == TokenKind::Void {
                        self.types.void()
                    } else {
                        self.resolve_type(ret)?
                    };
                }
                _ => {}
            }
        }
        let id = self.types.add(DataType::FunctionType(FunctionType {
            name: name.clone(),
            params,
            return_type,
            callbacks: Vec::new(),
        }));
        self.define(&name, at, GlobalSymbol::Type(id))?;
        Ok(id)
    }

    // -- members -----------------------------------------------------------

    fn scan_members(&mut self, node: NodeId, direction: Direction) -> GenResult<Vec<StructMember>> {
        let mut members = Vec::new();
        for &child in self.ast.children(node) {
            if self.ast.node(child).token.kind == TokenKind::At {
                continue;
            }
            let member = self.scan_member(child, direction)?;
            if members.iter().any(|m: &StructMember| m.name == member.name) {
                return Err(self.error(
                    member.location,
                    format!("duplicate member '{}'", member.name),
                ));
            }
            members.push(member);
        }
        Ok(members)
    }

    fn scan_member(&mut self, node: NodeId, default_direction: Direction) -> GenResult<StructMember> {
        let at = self.ast.location(node);
        let name = self
            .ast
            .node(node)
            .token
            .ident_name()
            .unwrap_or_default()
            .to_string();
        let type_node = self
            .ast
            .children(node)
            .iter()
            .copied()
            .find(|&c| self.ast.node(c).token.kind != TokenKind::At)
            .ok_or_else(|| self.error(at, format!("member '{}' has no type", name)))?;
        let ty = self.resolve_type(type_node)?;
        let direction = match self.ast.attr_str(node, "direction") {
            Some("in") => Direction::In,
            Some("out") => Direction::Out,
            Some("inout") => Direction::Inout,
            _ => default_direction,
        };
        Ok(StructMember {
            name,
            ty,
            direction,
            byref: self.ast.has_attr(node, "byref"),
            contains_list: self.types.contains_list(ty),
            contains_string: self.types.contains_string(ty),
            annotations: self.collect_annotations(node)?,
            location: at,
        })
    }

    /// Resolve a type-reference node to a table entry.
    fn resolve_type(&mut self, node: NodeId) -> GenResult<TypeRef> {
        let token = &self.ast.node(node).token;
        match &token.kind {
            TokenKind::Void => Ok(self.types.void()),
            TokenKind::LBracket => {
                let element = self.resolve_type(self.ast.children(node)[0])?;
                let count = match self.ast.attr(node, "count") {
                    Some(Value::Integer { value, .. }) => *value,
                    Some(Value::String(name)) => {
                        *self.const_values.get(name).ok_or_else(|| {
                            self.error(
                                token.location,
                                format!("array size '{}' is not an integer constant", name),
                            )
                        })?
                    }
                    _ => return Err(self.error(token.location, "array without a size")),
                };
                if count <= 0 {
                    return Err(self.error(token.location, "array size must be positive"));
                }
                Ok(self.types.add(DataType::Array {
                    element,
                    count: count as u64,
                }))
            }
            TokenKind::Ident(_) if self.ast.has_attr(node, "list") => {
                let element = self.resolve_type(self.ast.children(node)[0])?;
                Ok(self.types.add(DataType::List { element }))
            }
            TokenKind::Struct | TokenKind::Union | TokenKind::Enum => {
                // Nested anonymous aggregate inside an encapsulated union
                // member or typedef body.
                match &token.kind {
                    TokenKind::Union => {
                        let discriminator =
                            self.ast.attr_str(node, "discriminator").map(str::to_string);
                        let union_type =
                            self.scan_union_body(node, String::new(), discriminator)?;
                        Ok(self.types.add(DataType::Union(union_type)))
                    }
                    TokenKind::Struct => {
                        let members = self.scan_members(node, Direction::In)?;
                        Ok(self.types.add(DataType::Struct(StructType {
                            name: String::new(),
                            members,
                            incomplete: false,
                            shareable: false,
                            annotations: Vec::new(),
                        })))
                    }
                    _ => self.scan_enum(node, None),
                }
            }
            TokenKind::Ident(name) => match self.scope.get(name) {
                Some(GlobalSymbol::Type(id)) => Ok(*id),
                Some(_) => Err(self.error(
                    token.location,
                    format!("'{}' is not a type", name),
                )),
                None => Err(self.error(
                    token.location,
                    format!("unresolved type '{}'", name),
                )),
            },
            other => Err(self.error(
                token.location,
                format!("expected a type, found {}", other.describe()),
            )),
        }
    }

    // -- struct validation -------------------------------------------------

    /// Annotation and discriminator rules that need the whole member list.
    fn validate_struct(&mut self, id: TypeRef, at: Location) -> GenResult<()> {
        let members = match self.types.get(id) {
            DataType::Struct(s) => s.members.clone(),
            _ => return Ok(()),
        };
        for member in &members {
            self.validate_length_annotations(member, &members)?;
            self.validate_member_union(member, &members, at)?;
        }
        Ok(())
    }

    fn validate_length_annotations(
        &self,
        member: &StructMember,
        siblings: &[StructMember],
    ) -> GenResult<()> {
        let true_ty = self.types.true_type(member.ty);
        for annotation in &member.annotations {
            match annotation.name.as_str() {
                "length" => {
                    let is_sized = matches!(
                        self.types.get(true_ty),
                        DataType::List { .. } | DataType::Builtin(BuiltinKind::Binary)
                    );
                    if !is_sized {
                        return Err(self.error(
                            annotation.location,
                            "@length applies only to list or binary members",
                        ));
                    }
                    let target = annotation.value.as_ref().and_then(Value::as_str);
                    match target {
                        Some(name) => self.check_length_target(annotation, name, siblings)?,
                        None => {
                            return Err(self
                                .error(annotation.location, "@length requires a member reference"))
                        }
                    }
                }
                "max_length" => {
                    let is_sized = matches!(
                        self.types.get(true_ty),
                        DataType::List { .. }
                            | DataType::Builtin(BuiltinKind::Binary)
                            | DataType::Builtin(BuiltinKind::String)
                            | DataType::Builtin(BuiltinKind::UString)
                    );
                    if !is_sized {
                        return Err(self.error(
                            annotation.location,
                            "@max_length applies only to list, binary, or string members",
                        ));
                    }
                    match &annotation.value {
                        Some(Value::Integer { .. }) => {}
                        Some(Value::String(name)) => {
                            self.check_length_target(annotation, name, siblings)?
                        }
                        _ => {
                            return Err(self.error(
                                annotation.location,
                                "@max_length requires a member reference or an integer",
                            ))
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// `x` in `@length(x)` must be an integer member of the same struct or
    /// a global integer constant.
    fn check_length_target(
        &self,
        annotation: &Annotation,
        name: &str,
        siblings: &[StructMember],
    ) -> GenResult<()> {
        if let Some(target) = siblings.iter().find(|m| m.name == name) {
            if self.types.is_int(target.ty) {
                return Ok(());
            }
            return Err(self.error(
                annotation.location,
                format!("@{} target '{}' is not an integer member", annotation.name, name),
            ));
        }
        match self.scope.get(name) {
            Some(GlobalSymbol::Const(index)) if self.types.is_int(self.consts[*index].ty) => Ok(()),
            _ => Err(self.error(
                annotation.location,
                format!(
                    "@{} target '{}' is neither a member of this struct nor an integer constant",
                    annotation.name, name
                ),
            )),
        }
    }

    /// Discriminator rules for union-typed members.
    fn validate_member_union(
        &mut self,
        member: &StructMember,
        siblings: &[StructMember],
        struct_at: Location,
    ) -> GenResult<()> {
        let true_ty = self.types.true_type(member.ty);
        let discriminator = match self.types.get(true_ty) {
            DataType::Union(u) => match (&u.discriminator, member.find_annotation("discriminator", LangFilter::All)) {
                (Some(name), _) => name.clone(),
                (None, Some(annotation)) => match annotation.value.as_ref().and_then(Value::as_str)
                {
                    Some(name) => name.to_string(),
                    None => {
                        return Err(self.error(
                            annotation.location,
                            "@discriminator requires a member name",
                        ))
                    }
                },
                (None, None) => {
                    return Err(self.error(
                        member.location,
                        format!(
                            "union member '{}' needs a @discriminator annotation",
                            member.name
                        ),
                    ))
                }
            },
            _ => return Ok(()),
        };

        // The discriminator lives in the same scope (or is a global const)
        // and must be enum, bool, or integer typed.
        if let Some(target) = siblings.iter().find(|m| m.name == discriminator) {
            if !self.types.is_discriminator(target.ty) {
                return Err(self.error(
                    target.location,
                    format!(
                        "discriminator '{}' must be an enum, bool, or integer",
                        discriminator
                    ),
                ));
            }
            return Ok(());
        }
        match self.scope.get(&discriminator) {
            Some(GlobalSymbol::Const(index)) if self.types.is_int(self.consts[*index].ty) => Ok(()),
            _ => Err(self.error(
                struct_at,
                format!("union discriminator '{}' not found in scope", discriminator),
            )),
        }
    }

    // -- interfaces --------------------------------------------------------

    fn scan_interface(&mut self, node: NodeId) -> GenResult<()> {
        let at = self.ast.location(node);
        let name = self.ast.attr_str(node, "name").unwrap_or_default().to_string();
        let annotations = self.collect_annotations(node)?;

        let id = match annotations.iter().find(|a| a.name == "id") {
            Some(annotation) => {
                let value = annotation
                    .value
                    .as_ref()
                    .and_then(Value::as_int)
                    .ok_or_else(|| self.error(annotation.location, "@id requires an integer"))?;
                self.next_interface_id = (value as u32).wrapping_add(1);
                value as u32
            }
            None => {
                let value = self.next_interface_id;
                self.next_interface_id += 1;
                value
            }
        };

        let mut functions = Vec::new();
        let mut next_function_id = 1u32;
        for &fn_node in self.ast.children(node) {
            if self.ast.node(fn_node).token.kind == TokenKind::At {
                continue;
            }
            let function = self.scan_function(fn_node, &mut next_function_id)?;
            if functions.iter().any(|f: &Function| f.name == function.name) {
                return Err(self.error(
                    function.location,
                    format!("duplicate function '{}'", function.name),
                ));
            }
            functions.push(function);
        }

        let index = self.interfaces.len();
        self.define(&name, at, GlobalSymbol::Interface(index))?;
        self.interfaces.push(Interface {
            name,
            id,
            functions,
            annotations,
            location: at,
        });
        Ok(())
    }

    fn scan_function(&mut self, node: NodeId, next_id: &mut u32) -> GenResult<Function> {
        let at = self.ast.location(node);
        let name = self
            .ast
            .node(node)
            .token
            .ident_name()
            .unwrap_or_default()
            .to_string();
        let annotations = self.collect_annotations(node)?;
        let oneway = self.ast.has_attr(node, "oneway");

        let id = match annotations.iter().find(|a| a.name == "id") {
            Some(annotation) => {
                let value = annotation
                    .value
                    .as_ref()
                    .and_then(Value::as_int)
                    .ok_or_else(|| self.error(annotation.location, "@id requires an integer"))?;
                *next_id = (value as u32).wrapping_add(1);
                value as u32
            }
            None => {
                let value = *next_id;
                *next_id += 1;
                value
            }
        };

        let mut params = Vec::new();
        let mut return_type = self.types.void();
        for &child in self.ast.children(node) {
            match &self.ast.node(child).token.kind {
                TokenKind::Ident(_) => {
                    let param = self.scan_member(child, Direction::In)?;
                    self.validate_param(&param, &params)?;
                    params.push(param);
                }
                TokenKind::Arrow => {
                    let ret = self.ast.children(child)[0];
                    return_type = if self.ast.node(ret).token.kind == TokenKind::Void {
                        self.types.void()
                    } else {
                        self.resolve_type(ret)?
                    };
                }
                _ => {}
            }
        }

        if oneway && !matches!(self.types.get(return_type), DataType::Void) {
            return Err(self.error(at, format!("oneway function '{}' cannot return a value", name)));
        }

        // The parameter list is a struct for annotation purposes: length
        // targets and union discriminators resolve among the parameters.
        for param in &params {
            self.validate_length_annotations(param, &params)?;
        }
        for param in params.clone() {
            self.validate_member_union(&param, &params, at)?;
        }

        // Concrete callback: inherit or match the declared function type.
        let callback_type = match self.ast.attr_str(node, "callback_type") {
            Some(type_name) => {
                let type_name = type_name.to_string();
                let ty = match self.scope.get(&type_name) {
                    Some(GlobalSymbol::Type(id)) => *id,
                    _ => {
                        return Err(self.error(
                            at,
                            format!("unresolved callback type '{}'", type_name),
                        ))
                    }
                };
                let (type_params, type_return) = match self.types.get(ty) {
                    DataType::FunctionType(f) => (f.params.clone(), f.return_type),
                    _ => {
                        return Err(self.error(
                            at,
                            format!("'{}' is not a function type", type_name),
                        ))
                    }
                };
                if params.is_empty() {
                    params = type_params;
                } else {
                    let matches = params.len() == type_params.len()
                        && params
                            .iter()
                            .zip(&type_params)
                            .all(|(a, b)| a.name == b.name);
                    if !matches {
                        return Err(self.error(
                            at,
                            format!(
                                "callback '{}' must declare no parameters or exactly those of '{}'",
                                name, type_name
                            ),
                        ));
                    }
                }
                return_type = type_return;
                if let DataType::FunctionType(f) = self.types.get_mut(ty) {
                    f.callbacks.push(name.clone());
                }
                Some(ty)
            }
            None => None,
        };

        Ok(Function {
            name,
            id,
            oneway,
            params,
            return_type,
            callback_type,
            annotations,
            location: at,
        })
    }

    fn validate_param(&mut self, param: &StructMember, siblings: &[StructMember]) -> GenResult<()> {
        if siblings.iter().any(|p| p.name == param.name) {
            return Err(self.error(
                param.location,
                format!("duplicate parameter '{}'", param.name),
            ));
        }
        Ok(())
    }

    // -- whole-program passes ----------------------------------------------

    /// Clear the shared marker on aggregates containing non-shared
    /// aggregate members.
    fn propagate_shared(&mut self) {
        // Fixed point over the (acyclic apart from forward refs) graph.
        loop {
            let mut changed = false;
            for id in 0..self.types.len() {
                let clear = match self.types.get(id) {
                    DataType::Struct(s) if s.shareable => {
                        s.members.iter().any(|m| self.member_blocks_shared(m.ty))
                    }
                    DataType::Union(u) if u.shareable => {
                        u.members.iter().any(|m| self.member_blocks_shared(m.ty))
                    }
                    _ => false,
                };
                if clear {
                    match self.types.get_mut(id) {
                        DataType::Struct(s) => s.shareable = false,
                        DataType::Union(u) => u.shareable = false,
                        _ => {}
                    }
                    changed = true;
                }
            }
            if !changed {
                return;
            }
        }
    }

    fn member_blocks_shared(&self, ty: TypeRef) -> bool {
        match self.types.get(self.types.true_container_type(ty)) {
            DataType::Struct(s) => !s.shareable,
            DataType::Union(u) => !u.shareable,
            _ => false,
        }
    }

    /// Duplicate ids are warnings, reported with literal location text.
    fn check_interface_ids(&mut self) {
        let mut seen: BTreeMap<u32, (String, Location)> = BTreeMap::new();
        let mut warnings = Vec::new();
        for interface in &self.interfaces {
            if let Some((other, other_at)) = seen.get(&interface.id) {
                warnings.push((
                    interface.location,
                    format!(
                        "duplicate interface id {} shared by '{}' (at {}) and '{}'",
                        interface.id, other, other_at, interface.name
                    ),
                ));
            } else {
                seen.insert(interface.id, (interface.name.clone(), interface.location));
            }
            let mut fn_seen: BTreeMap<u32, (String, Location)> = BTreeMap::new();
            for function in &interface.functions {
                if let Some((other, other_at)) = fn_seen.get(&function.id) {
                    warnings.push((
                        function.location,
                        format!(
                            "duplicate function id {} in interface '{}' shared by '{}' (at {}) and '{}'",
                            function.id, interface.name, other, other_at, function.name
                        ),
                    ));
                } else {
                    fn_seen.insert(function.id, (function.name.clone(), function.location));
                }
            }
        }
        for (at, message) in warnings {
            self.warn(at, message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    fn analyse(source: &str) -> Program {
        let ast = parse_source("test.erpc", source, &[]).expect("parse");
        scan("test.erpc", &ast).expect("scan")
    }

    fn analyse_err(source: &str) -> GenError {
        let ast = parse_source("test.erpc", source, &[]).expect("parse");
        scan("test.erpc", &ast).unwrap_err()
    }

    #[test]
    fn resolves_builtin_members() {
        let program = analyse("struct P { int32 x; double y; string s; }");
        let id = program.type_decls[0];
        match program.types.get(id) {
            DataType::Struct(s) => {
                assert_eq!(s.members.len(), 3);
                assert!(program.types.is_int(s.members[0].ty));
                assert!(s.members[2].contains_string);
                assert!(!s.members[0].contains_list);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unresolved_type_is_an_error() {
        let err = analyse_err("struct P { Missing m; }");
        assert!(err.to_string().contains("unresolved type 'Missing'"));
    }

    #[test]
    fn forward_declaration_resolves_in_place() {
        let program = analyse(
            "struct Node;\ntype NodeList = list<Node>\nstruct Node { int32 value; }",
        );
        let alias = program
            .type_decls
            .iter()
            .find_map(|&id| match program.types.get(id) {
                DataType::Alias { name, target } if name == "NodeList" => Some(*target),
                _ => None,
            })
            .expect("alias");
        let leaf = program.types.true_container_type(alias);
        match program.types.get(leaf) {
            DataType::Struct(s) => {
                assert_eq!(s.name, "Node");
                assert!(!s.incomplete);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unresolved_forward_declaration_names_the_type() {
        let err = analyse_err("struct Ghost;\nstruct P { int32 x; }");
        assert!(err.to_string().contains("'Ghost' is never defined"));
    }

    #[test]
    fn forward_kind_mismatch_is_fatal() {
        let err = analyse_err("struct Thing;\nunion Thing { case 0: int32 a; }");
        assert!(err.to_string().contains("forward-declared as a struct"));
    }

    #[test]
    fn length_target_must_be_integer() {
        let err = analyse_err("struct S { float n; binary data @length(n); }");
        assert!(err.to_string().contains("'n' is not an integer member"));
    }

    #[test]
    fn length_target_may_be_global_const() {
        analyse("const int32 LEN = 8\nstruct S { binary data @length(LEN); }");
    }

    #[test]
    fn max_length_accepts_strings_and_literals() {
        analyse("struct S { string name @max_length(32); }");
        let err = analyse_err("struct S { int32 n @max_length(4); }");
        assert!(err.to_string().contains("@max_length applies only"));
    }

    #[test]
    fn union_member_dedup_and_conflict() {
        let program = analyse(
            "enum fruit { apple, banana }\nunion u { case apple: int32 x; case banana: int32 x; }",
        );
        let id = program.type_decls[1];
        match program.types.get(id) {
            DataType::Union(u) => assert_eq!(u.members.len(), 1),
            other => panic!("unexpected {:?}", other),
        }

        let err = analyse_err(
            "enum fruit { apple, banana }\nunion u { case apple: int32 x; case banana: float x; }",
        );
        assert!(err.to_string().contains("redeclared with a different type"));
    }

    #[test]
    fn encapsulated_union_discriminator_checked() {
        analyse("struct S { int32 disc; union (disc) { case 0: int32 a; } u; }");
        let err = analyse_err("struct S { float disc; union (disc) { case 0: int32 a; } u; }");
        assert!(err.to_string().contains("must be an enum, bool, or integer"));
    }

    #[test]
    fn non_encapsulated_union_needs_discriminator_annotation() {
        let err = analyse_err(
            "union u { case 0: int32 a; }\nstruct S { u value; }",
        );
        assert!(err.to_string().contains("needs a @discriminator"));
        analyse("union u { case 0: int32 a; }\nstruct S { int32 d; u value @discriminator(d); }");
    }

    #[test]
    fn function_ids_count_from_one_per_interface() {
        let program = analyse(
            "interface a { f1() -> void\n f2() -> void }\ninterface b { g1() -> void }",
        );
        assert_eq!(program.interfaces[0].functions[0].id, 1);
        assert_eq!(program.interfaces[0].functions[1].id, 2);
        assert_eq!(program.interfaces[1].functions[0].id, 1);
        assert_eq!(program.interfaces[0].id, 1);
        assert_eq!(program.interfaces[1].id, 2);
    }

    #[test]
    fn id_annotation_overrides_and_continues() {
        let program = analyse("interface a { @id(10) f1() -> void\n f2() -> void }");
        assert_eq!(program.interfaces[0].functions[0].id, 10);
        assert_eq!(program.interfaces[0].functions[1].id, 11);
    }

    #[test]
    fn duplicate_function_ids_warn_with_location() {
        let program = analyse("interface a { @id(3) f1() -> void\n @id(3) f2() -> void }");
        assert_eq!(program.warnings.len(), 1);
        assert!(program.warnings[0].contains("duplicate function id 3"));
        assert!(program.warnings[0].contains("test.erpc:"));
    }

    #[test]
    fn oneway_with_return_is_an_error() {
        let err = analyse_err("interface a { oneway f(in int32 x) -> int32 }");
        assert!(err.to_string().contains("cannot return a value"));
    }

    #[test]
    fn callback_inherits_or_matches_type_params() {
        let program = analyse(
            "type cb = int32(int32 a, int32 b)\ninterface i { cb handler }",
        );
        let function = &program.interfaces[0].functions[0];
        assert_eq!(function.params.len(), 2);
        assert_eq!(function.params[1].name, "b");
        let ft = program
            .type_decls
            .iter()
            .find_map(|&id| match program.types.get(id) {
                DataType::FunctionType(f) => Some(f),
                _ => None,
            })
            .expect("function type");
        assert_eq!(ft.callbacks, vec!["handler".to_string()]);

        let err = analyse_err(
            "type cb = int32(int32 a)\ninterface i { cb handler(int32 wrong) }",
        );
        assert!(err.to_string().contains("exactly those of 'cb'"));
    }

    #[test]
    fn shared_marker_clears_on_non_shared_members() {
        let program = analyse(
            "struct Inner { int32 x; }\n@shared struct Outer { Inner inner; }",
        );
        let outer = program
            .type_decls
            .iter()
            .find_map(|&id| match program.types.get(id) {
                DataType::Struct(s) if s.name == "Outer" => Some(s),
                _ => None,
            })
            .expect("outer");
        assert!(!outer.shareable);
    }

    #[test]
    fn const_type_mismatch_is_an_error() {
        let err = analyse_err("const int32 A = \"text\"");
        assert!(err.to_string().contains("does not match its declared type"));
    }

    #[test]
    fn program_crc_annotation_is_visible() {
        let program = analyse("program calc @crc");
        assert!(program.crc_enabled());
        assert_eq!(program.name.as_deref(), Some("calc"));
    }
}
