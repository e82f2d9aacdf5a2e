// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Semantic type model produced by the symbol scanner.
//!
//! Types live in a [`TypeTable`] arena and refer to each other by
//! [`TypeRef`] index. Forward declarations occupy an arena slot that the
//! full definition later overwrites in place, so references taken before
//! the definition stay valid.

use crate::errors::Location;
use crate::token::Value;
use std::collections::BTreeMap;

pub type TypeRef = usize;

/// Builtin (leaf) type kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BuiltinKind {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    /// Null-terminated UTF-8 in C targets; length-prefixed on the wire
    String,
    /// Unspecified 16-bit unit string
    UString,
    /// Length-prefixed byte blob
    Binary,
}

impl BuiltinKind {
    /// IDL spelling of this builtin.
    pub fn idl_name(self) -> &'static str {
        match self {
            BuiltinKind::Bool => "bool",
            BuiltinKind::I8 => "int8",
            BuiltinKind::I16 => "int16",
            BuiltinKind::I32 => "int32",
            BuiltinKind::I64 => "int64",
            BuiltinKind::U8 => "uint8",
            BuiltinKind::U16 => "uint16",
            BuiltinKind::U32 => "uint32",
            BuiltinKind::U64 => "uint64",
            BuiltinKind::F32 => "float",
            BuiltinKind::F64 => "double",
            BuiltinKind::String => "string",
            BuiltinKind::UString => "ustring",
            BuiltinKind::Binary => "binary",
        }
    }

    pub fn is_int(self) -> bool {
        matches!(
            self,
            BuiltinKind::I8
                | BuiltinKind::I16
                | BuiltinKind::I32
                | BuiltinKind::I64
                | BuiltinKind::U8
                | BuiltinKind::U16
                | BuiltinKind::U32
                | BuiltinKind::U64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, BuiltinKind::F32 | BuiltinKind::F64)
    }

    pub fn is_scalar(self) -> bool {
        self.is_int() || self.is_float() || self == BuiltinKind::Bool
    }

    /// All builtins, for seeding the global scope.
    pub fn all() -> &'static [BuiltinKind] {
        &[
            BuiltinKind::Bool,
            BuiltinKind::I8,
            BuiltinKind::I16,
            BuiltinKind::I32,
            BuiltinKind::I64,
            BuiltinKind::U8,
            BuiltinKind::U16,
            BuiltinKind::U32,
            BuiltinKind::U64,
            BuiltinKind::F32,
            BuiltinKind::F64,
            BuiltinKind::String,
            BuiltinKind::UString,
            BuiltinKind::Binary,
        ]
    }
}

/// Parameter/member direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
    Inout,
    Return,
}

/// Annotation attached to a symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub name: String,
    pub value: Option<Value>,
    pub lang: LangFilter,
    pub location: Location,
}

/// Language filter on an annotation (`@c:name(...)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LangFilter {
    All,
    C,
    Py,
    Rust,
}

impl LangFilter {
    pub fn parse(text: &str) -> Option<LangFilter> {
        Some(match text {
            "all" => LangFilter::All,
            "c" => LangFilter::C,
            "py" => LangFilter::Py,
            "rust" => LangFilter::Rust,
            _ => return None,
        })
    }

    /// Whether an annotation under this filter applies to `target`.
    pub fn applies_to(self, target: LangFilter) -> bool {
        self == LangFilter::All || self == target
    }
}

/// Helpers shared by everything that carries an annotation list.
pub trait Annotated {
    fn annotations(&self) -> &[Annotation];

    fn find_annotation(&self, name: &str, lang: LangFilter) -> Option<&Annotation> {
        self.annotations()
            .iter()
            .find(|a| a.name == name && a.lang.applies_to(lang))
    }

    fn has_annotation(&self, name: &str) -> bool {
        self.annotations().iter().any(|a| a.name == name)
    }
}

/// Member of a struct, union branch, or parameter list.
#[derive(Debug, Clone)]
pub struct StructMember {
    pub name: String,
    pub ty: TypeRef,
    pub direction: Direction,
    pub byref: bool,
    pub contains_list: bool,
    pub contains_string: bool,
    pub annotations: Vec<Annotation>,
    pub location: Location,
}

impl Annotated for StructMember {
    fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }
}

#[derive(Debug, Clone)]
pub struct StructType {
    pub name: String,
    pub members: Vec<StructMember>,
    pub incomplete: bool,
    /// Cleared when any member bans shared-referencing the container.
    pub shareable: bool,
    pub annotations: Vec<Annotation>,
}

impl Annotated for StructType {
    fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }
}

/// Union case label.
#[derive(Debug, Clone, PartialEq)]
pub enum CaseLabel {
    /// Named label with its resolved discriminator value
    Name { name: String, value: i64 },
    /// Literal label value
    Value(i64),
    Default,
}

impl CaseLabel {
    /// Discriminator value this label selects (`None` for `default`).
    pub fn value(&self) -> Option<i64> {
        match self {
            CaseLabel::Name { value, .. } => Some(*value),
            CaseLabel::Value(value) => Some(*value),
            CaseLabel::Default => None,
        }
    }

    /// Identifier-shaped spelling used for generated variant names.
    pub fn ident(&self) -> String {
        match self {
            CaseLabel::Name { name, .. } => name.clone(),
            CaseLabel::Value(value) => format!("case{}", value),
            CaseLabel::Default => "default".to_string(),
        }
    }
}

/// One case: labels sharing one member set (member names index into the
/// union's deduplicated member list).
#[derive(Debug, Clone)]
pub struct UnionCase {
    pub labels: Vec<CaseLabel>,
    pub member_names: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct UnionType {
    pub name: String,
    /// Name of the discriminator member in the surrounding struct;
    /// `None` for non-encapsulated unions (`@discriminator` at use site).
    pub discriminator: Option<String>,
    pub cases: Vec<UnionCase>,
    /// Deduplicated member declarations shared by the cases.
    pub members: Vec<StructMember>,
    pub incomplete: bool,
    pub shareable: bool,
    pub annotations: Vec<Annotation>,
}

impl UnionType {
    pub fn member(&self, name: &str) -> Option<&StructMember> {
        self.members.iter().find(|m| m.name == name)
    }
}

impl Annotated for UnionType {
    fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }
}

#[derive(Debug, Clone)]
pub struct EnumMember {
    pub name: String,
    pub value: i64,
    pub explicit: bool,
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone)]
pub struct EnumType {
    pub name: String,
    pub members: Vec<EnumMember>,
    pub annotations: Vec<Annotation>,
}

impl Annotated for EnumType {
    fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }
}

/// Callback (function) type; concrete callback functions register against
/// it in declaration order, giving them their one-byte wire index.
#[derive(Debug, Clone)]
pub struct FunctionType {
    pub name: String,
    pub params: Vec<StructMember>,
    pub return_type: TypeRef,
    /// Concrete callback function names, in IDL declaration order.
    pub callbacks: Vec<String>,
}

/// One semantic data type.
#[derive(Debug, Clone)]
pub enum DataType {
    Builtin(BuiltinKind),
    Alias { name: String, target: TypeRef },
    Array { element: TypeRef, count: u64 },
    List { element: TypeRef },
    Struct(StructType),
    Union(UnionType),
    Enum(EnumType),
    FunctionType(FunctionType),
    Void,
}

impl DataType {
    pub fn name(&self) -> Option<&str> {
        match self {
            DataType::Builtin(kind) => Some(kind.idl_name()),
            DataType::Alias { name, .. } => Some(name),
            DataType::Struct(s) => Some(&s.name),
            DataType::Union(u) => Some(&u.name),
            DataType::Enum(e) => Some(&e.name),
            DataType::FunctionType(f) => Some(&f.name),
            _ => None,
        }
    }
}

/// Arena of all types in one compilation unit.
#[derive(Debug)]
pub struct TypeTable {
    entries: Vec<DataType>,
    builtins: BTreeMap<BuiltinKind, TypeRef>,
    void_ref: TypeRef,
}

impl TypeTable {
    /// Table pre-seeded with every builtin and `void`.
    pub fn new() -> Self {
        let mut table = TypeTable {
            entries: Vec::new(),
            builtins: BTreeMap::new(),
            void_ref: 0,
        };
        for &kind in BuiltinKind::all() {
            let id = table.add(DataType::Builtin(kind));
            table.builtins.insert(kind, id);
        }
        table.void_ref = table.add(DataType::Void);
        table
    }

    pub fn add(&mut self, ty: DataType) -> TypeRef {
        self.entries.push(ty);
        self.entries.len() - 1
    }

    pub fn get(&self, id: TypeRef) -> &DataType {
        &self.entries[id]
    }

    pub fn get_mut(&mut self, id: TypeRef) -> &mut DataType {
        &mut self.entries[id]
    }

    /// Overwrite a placeholder in place; references stay valid.
    pub fn replace(&mut self, id: TypeRef, ty: DataType) {
        self.entries[id] = ty;
    }

    pub fn builtin(&self, kind: BuiltinKind) -> TypeRef {
        self.builtins[&kind]
    }

    pub fn void(&self) -> TypeRef {
        self.void_ref
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TypeRef, &DataType)> {
        self.entries.iter().enumerate()
    }

    /// Follow alias chains to the true type.
    pub fn true_type(&self, mut id: TypeRef) -> TypeRef {
        loop {
            match self.get(id) {
                DataType::Alias { target, .. } => id = *target,
                _ => return id,
            }
        }
    }

    /// Follow aliases, then arrays and lists, to the element leaf type.
    pub fn true_container_type(&self, id: TypeRef) -> TypeRef {
        let mut id = self.true_type(id);
        loop {
            match self.get(id) {
                DataType::Array { element, .. } | DataType::List { element } => {
                    id = self.true_type(*element);
                }
                _ => return id,
            }
        }
    }

    pub fn is_builtin(&self, id: TypeRef, kind: BuiltinKind) -> bool {
        matches!(self.get(self.true_type(id)), DataType::Builtin(k) if *k == kind)
    }

    /// Integer-typed after alias resolution (enum does not count).
    pub fn is_int(&self, id: TypeRef) -> bool {
        matches!(self.get(self.true_type(id)), DataType::Builtin(k) if k.is_int())
    }

    /// Legal discriminator type: enum, bool, or integer.
    pub fn is_discriminator(&self, id: TypeRef) -> bool {
        match self.get(self.true_type(id)) {
            DataType::Enum(_) => true,
            DataType::Builtin(k) => k.is_int() || *k == BuiltinKind::Bool,
            _ => false,
        }
    }

    /// Recursive check used to precompute member heap-content flags.
    pub fn contains_list(&self, id: TypeRef) -> bool {
        match self.get(self.true_type(id)) {
            DataType::List { .. } => true,
            DataType::Builtin(BuiltinKind::Binary) => true,
            DataType::Array { element, .. } => self.contains_list(*element),
            DataType::Struct(s) => s.members.iter().any(|m| self.contains_list(m.ty)),
            DataType::Union(u) => u.members.iter().any(|m| self.contains_list(m.ty)),
            _ => false,
        }
    }

    pub fn contains_string(&self, id: TypeRef) -> bool {
        match self.get(self.true_type(id)) {
            DataType::Builtin(BuiltinKind::String) | DataType::Builtin(BuiltinKind::UString) => {
                true
            }
            DataType::Array { element, .. } | DataType::List { element } => {
                self.contains_string(*element)
            }
            DataType::Struct(s) => s.members.iter().any(|m| self.contains_string(m.ty)),
            DataType::Union(u) => u.members.iter().any(|m| self.contains_string(m.ty)),
            _ => false,
        }
    }

    /// Canonical text of a type reference, stable across runs; feeds the
    /// emitted IDL checksum.
    pub fn describe(&self, id: TypeRef) -> String {
        match self.get(id) {
            DataType::Builtin(kind) => kind.idl_name().to_string(),
            DataType::Alias { name, .. } => name.clone(),
            DataType::Array { element, count } => {
                format!("{}[{}]", self.describe(*element), count)
            }
            DataType::List { element } => format!("list<{}>", self.describe(*element)),
            DataType::Struct(s) => s.name.clone(),
            DataType::Union(u) => u.name.clone(),
            DataType::Enum(e) => e.name.clone(),
            DataType::FunctionType(f) => f.name.clone(),
            DataType::Void => "void".to_string(),
        }
    }
}

/// Constant definition.
#[derive(Debug, Clone)]
pub struct ConstDef {
    pub name: String,
    pub ty: TypeRef,
    pub value: Value,
    pub annotations: Vec<Annotation>,
}

impl Annotated for ConstDef {
    fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }
}

/// One RPC function.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    /// Unique id within the interface; monotonically assigned from 1
    /// unless `@id` overrides.
    pub id: u32,
    pub oneway: bool,
    pub params: Vec<StructMember>,
    pub return_type: TypeRef,
    /// Set when this function is a concrete callback of a declared
    /// function type.
    pub callback_type: Option<TypeRef>,
    pub annotations: Vec<Annotation>,
    pub location: Location,
}

impl Annotated for Function {
    fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }
}

#[derive(Debug, Clone)]
pub struct Interface {
    pub name: String,
    pub id: u32,
    pub functions: Vec<Function>,
    pub annotations: Vec<Annotation>,
    pub location: Location,
}

impl Annotated for Interface {
    fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }
}

/// Fully analysed compilation unit: the generator's input.
#[derive(Debug)]
pub struct Program {
    pub name: Option<String>,
    pub annotations: Vec<Annotation>,
    pub types: TypeTable,
    /// Named top-level types in declaration order (indexes into `types`).
    pub type_decls: Vec<TypeRef>,
    pub consts: Vec<ConstDef>,
    pub interfaces: Vec<Interface>,
    /// Warnings collected during analysis (duplicate ids).
    pub warnings: Vec<String>,
}

impl Program {
    /// `@crc` requested at program level.
    pub fn crc_enabled(&self) -> bool {
        self.annotations.iter().any(|a| a.name == "crc")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_predicates() {
        assert!(BuiltinKind::U16.is_int());
        assert!(!BuiltinKind::F32.is_int());
        assert!(BuiltinKind::F64.is_float());
        assert!(BuiltinKind::Bool.is_scalar());
        assert!(!BuiltinKind::String.is_scalar());
    }

    #[test]
    fn alias_chains_resolve_to_true_type() {
        let mut table = TypeTable::new();
        let base = table.builtin(BuiltinKind::I32);
        let a = table.add(DataType::Alias {
            name: "A".into(),
            target: base,
        });
        let b = table.add(DataType::Alias {
            name: "B".into(),
            target: a,
        });
        assert_eq!(table.true_type(b), base);
        assert!(table.is_int(b));
    }

    #[test]
    fn container_type_sees_through_lists_and_arrays() {
        let mut table = TypeTable::new();
        let elem = table.builtin(BuiltinKind::F64);
        let list = table.add(DataType::List { element: elem });
        let array = table.add(DataType::Array {
            element: list,
            count: 4,
        });
        assert_eq!(table.true_container_type(array), elem);
    }

    #[test]
    fn replace_keeps_references_valid() {
        let mut table = TypeTable::new();
        let placeholder = table.add(DataType::Struct(StructType {
            name: "Node".into(),
            members: Vec::new(),
            incomplete: true,
            shareable: true,
            annotations: Vec::new(),
        }));
        let list = table.add(DataType::List {
            element: placeholder,
        });
        table.replace(
            placeholder,
            DataType::Struct(StructType {
                name: "Node".into(),
                members: Vec::new(),
                incomplete: false,
                shareable: true,
                annotations: Vec::new(),
            }),
        );
        match table.get(table.true_container_type(list)) {
            DataType::Struct(s) => assert!(!s.incomplete),
            other => panic!("unexpected type {:?}", other),
        }
    }

    #[test]
    fn contains_flags_recurse() {
        let mut table = TypeTable::new();
        let s = table.builtin(BuiltinKind::String);
        let inner = table.add(DataType::Struct(StructType {
            name: "Inner".into(),
            members: vec![StructMember {
                name: "text".into(),
                ty: s,
                direction: Direction::In,
                byref: false,
                contains_list: false,
                contains_string: true,
                annotations: Vec::new(),
                location: Location::default(),
            }],
            incomplete: false,
            shareable: true,
            annotations: Vec::new(),
        }));
        let list = table.add(DataType::List { element: inner });
        assert!(table.contains_string(list));
        assert!(table.contains_list(list));
        assert!(!table.contains_list(inner));
    }

    #[test]
    fn discriminator_typing() {
        let mut table = TypeTable::new();
        assert!(table.is_discriminator(table.builtin(BuiltinKind::Bool)));
        assert!(table.is_discriminator(table.builtin(BuiltinKind::U8)));
        assert!(!table.is_discriminator(table.builtin(BuiltinKind::F32)));
        let e = table.add(DataType::Enum(EnumType {
            name: "fruit".into(),
            members: Vec::new(),
            annotations: Vec::new(),
        }));
        assert!(table.is_discriminator(e));
    }
}
