// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Code emission: target-independent transforms and the per-language
//! backends.
//!
//! Before any template runs, the program goes through the shared
//! pre-emission transforms:
//!
//! - a `binary` member carrying `@length` is treated as `list<uint8>` with
//!   the same length reference (marked so the backend can tell)
//! - an alias of an anonymous struct/enum/union takes the alias's name and
//!   the alias disappears
//! - every aggregate gets `containsList`/`containsString` flags by
//!   recursive inspection
//! - identifiers colliding with target reserved words get a trailing
//!   underscore; `@name` overrides win over declared names
//! - a CRC-16 of the canonical text of all definitions is computed once
//!   and emitted as a constant (and enforced at runtime under `@crc`)
//!
//! Each backend builds a data map per output file and drives the template
//! engine once per file.

pub mod c;
pub mod py;
pub mod rust;

use crate::errors::{GenError, GenResult};
use crate::template::DataMap;
use crate::token::Value;
use crate::types::{
    Annotated, Annotation, BuiltinKind, DataType, LangFilter, Program, StructMember, TypeRef,
};
use erpc::Crc16;
use std::fmt::Write as _;
use std::path::PathBuf;

/// Emission target selected with `-g`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetLang {
    C,
    Py,
    Rust,
}

impl TargetLang {
    pub fn parse(text: &str) -> Option<TargetLang> {
        Some(match text {
            "c" => TargetLang::C,
            "py" => TargetLang::Py,
            "rust" => TargetLang::Rust,
            _ => return None,
        })
    }

    fn filter(self) -> LangFilter {
        match self {
            TargetLang::C => LangFilter::C,
            TargetLang::Py => LangFilter::Py,
            TargetLang::Rust => LangFilter::Rust,
        }
    }
}

/// One generated output file.
#[derive(Debug)]
pub struct Output {
    pub path: PathBuf,
    pub content: String,
}

/// Run the shared transforms and the chosen backend.
pub fn generate(
    program: &mut Program,
    target: TargetLang,
    base_name: &str,
) -> GenResult<Vec<Output>> {
    collapse_anonymous_aliases(program);
    let idl_crc16 = Crc16::checksum(canonical_text(program).as_bytes());
    let ctx = GenContext {
        program,
        target,
        base_name: base_name.to_string(),
        idl_crc16,
    };
    match target {
        TargetLang::C => c::emit(&ctx),
        TargetLang::Py => py::emit(&ctx),
        TargetLang::Rust => rust::emit(&ctx),
    }
}

/// Everything a backend needs for one emission run.
pub struct GenContext<'a> {
    pub program: &'a Program,
    pub target: TargetLang,
    pub base_name: String,
    pub idl_crc16: u16,
}

impl<'a> GenContext<'a> {
    /// Emitted identifier: `@name` override, then reserved-word mangling.
    pub fn symbol_name(&self, declared: &str, annotated: &dyn Annotated, reserved: &[&str]) -> String {
        let name = annotated
            .find_annotation("name", self.target.filter())
            .and_then(|a| a.value.as_ref())
            .and_then(Value::as_str)
            .unwrap_or(declared);
        mangle_reserved(name, reserved)
    }

    /// `@external` types are declared elsewhere; backends skip their
    /// definitions.
    pub fn is_external(&self, annotated: &dyn Annotated) -> bool {
        annotated.has_annotation("external")
    }

    /// Member treated as `list<uint8>` because `@length` rewrote a binary.
    pub fn binary_as_list(&self, member: &StructMember) -> bool {
        self.program.types.is_builtin(member.ty, BuiltinKind::Binary)
            && member.find_annotation("length", self.target.filter()).is_some()
    }

    /// The `@length` reference for a member, if any.
    pub fn length_ref(&self, member: &StructMember) -> Option<String> {
        member
            .find_annotation("length", self.target.filter())
            .and_then(|a| a.value.as_ref())
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// The `@max_length` bound for a member, if any.
    pub fn max_length(&self, member: &StructMember) -> Option<Value> {
        member
            .find_annotation("max_length", self.target.filter())
            .and_then(|a| a.value.clone())
    }

    pub fn nullable(&self, member: &StructMember) -> bool {
        member.find_annotation("nullable", self.target.filter()).is_some()
    }
}

/// Wire order of a member list: declaration order, except that a scalar
/// referenced through `@length` moves ahead of the first member that needs
/// it; a sized member cannot be decoded before its count is known.
pub fn wire_order<'m>(ctx: &GenContext<'_>, members: &'m [StructMember]) -> Vec<&'m StructMember> {
    let mut ordered: Vec<&StructMember> = Vec::with_capacity(members.len());
    let mut emitted = vec![false; members.len()];
    for index in 0..members.len() {
        if emitted[index] {
            continue;
        }
        if let Some(target) = ctx.length_ref(&members[index]) {
            if let Some(pos) = members.iter().position(|m| m.name == target) {
                if !emitted[pos] {
                    emitted[pos] = true;
                    ordered.push(&members[pos]);
                }
            }
        }
        emitted[index] = true;
        ordered.push(&members[index]);
    }
    ordered
}

/// Trailing underscore keeps mangled names unambiguous per target.
pub fn mangle_reserved(name: &str, reserved: &[&str]) -> String {
    if reserved.contains(&name) {
        format!("{}_", name)
    } else {
        name.to_string()
    }
}

/// An alias whose target is an anonymous struct/enum/union takes the
/// alias's name; references keep working because the target slot is
/// renamed in place.
fn collapse_anonymous_aliases(program: &mut Program) {
    let mut renames = Vec::new();
    for &decl in &program.type_decls {
        if let DataType::Alias { name, target } = program.types.get(decl) {
            let target = *target;
            let anonymous = matches!(
                program.types.get(target),
                DataType::Struct(s) if s.name.is_empty()
            ) || matches!(
                program.types.get(target),
                DataType::Union(u) if u.name.is_empty()
            ) || matches!(
                program.types.get(target),
                DataType::Enum(e) if e.name.is_empty()
            ) || matches!(program.types.get(target), DataType::FunctionType(_));
            if anonymous {
                renames.push((decl, target, name.clone()));
            }
        }
    }
    for (_, target, name) in &renames {
        match program.types.get_mut(*target) {
            DataType::Struct(s) => s.name = name.clone(),
            DataType::Union(u) => u.name = name.clone(),
            DataType::Enum(e) => {
                if e.name.is_empty() {
                    e.name = name.clone();
                }
            }
            _ => {}
        }
    }
}

/// Whether a declaration slot is an alias the backends should skip
/// because the collapse pass moved its name onto the target.
pub fn is_collapsed_alias(program: &Program, decl: TypeRef) -> Option<TypeRef> {
    if let DataType::Alias { name, target } = program.types.get(decl) {
        let target_name = program.types.get(*target).name().unwrap_or_default();
        if target_name == name {
            return Some(*target);
        }
    }
    None
}

/// Canonical text of every definition, stable across runs; the CRC of
/// this text becomes the emitted IDL checksum.
pub fn canonical_text(program: &Program) -> String {
    let types = &program.types;
    let mut text = String::new();
    if let Some(name) = &program.name {
        let _ = writeln!(text, "program {}", name);
    }
    for c in &program.consts {
        let _ = writeln!(text, "const {} {} = {}", types.describe(c.ty), c.name, c.value);
    }
    for &decl in &program.type_decls {
        match types.get(decl) {
            DataType::Enum(e) => {
                let _ = writeln!(text, "enum {}", e.name);
                for m in &e.members {
                    let _ = writeln!(text, "  {} = {}", m.name, m.value);
                }
            }
            DataType::Struct(s) => {
                let _ = writeln!(text, "struct {}", s.name);
                for m in &s.members {
                    let _ = writeln!(text, "  {} {}", types.describe(m.ty), m.name);
                }
            }
            DataType::Union(u) => {
                let _ = writeln!(text, "union {}", u.name);
                for m in &u.members {
                    let _ = writeln!(text, "  {} {}", types.describe(m.ty), m.name);
                }
            }
            DataType::Alias { name, target } => {
                let _ = writeln!(text, "type {} = {}", name, types.describe(*target));
            }
            DataType::FunctionType(f) => {
                let _ = write!(text, "type {} = {}(", f.name, types.describe(f.return_type));
                for (i, p) in f.params.iter().enumerate() {
                    if i > 0 {
                        let _ = write!(text, ", ");
                    }
                    let _ = write!(text, "{} {}", types.describe(p.ty), p.name);
                }
                let _ = writeln!(text, ")");
            }
            _ => {}
        }
    }
    for interface in &program.interfaces {
        let _ = writeln!(text, "interface {} id {}", interface.name, interface.id);
        for function in &interface.functions {
            let _ = write!(text, "  {} id {} (", function.name, function.id);
            for (i, p) in function.params.iter().enumerate() {
                if i > 0 {
                    let _ = write!(text, ", ");
                }
                let _ = write!(text, "{} {}", types.describe(p.ty), p.name);
            }
            let _ = writeln!(text, ") -> {}", types.describe(function.return_type));
        }
    }
    text
}

/// Shared data-map scaffolding every backend starts from.
pub fn base_data_map(ctx: &GenContext<'_>) -> DataMap {
    let mut data = DataMap::new();
    data.set("baseName", ctx.base_name.as_str());
    data.set(
        "programName",
        ctx.program.name.clone().unwrap_or_else(|| ctx.base_name.clone()),
    );
    data.set("crc16", i64::from(ctx.idl_crc16));
    data.set("crcEnabled", ctx.program.crc_enabled());
    data
}

/// Render a template and wrap failures into generator diagnostics.
pub fn render_template(text: &str, data: &mut DataMap) -> GenResult<String> {
    crate::template::render(text, data).map_err(|e| GenError::Template {
        line: e.line,
        message: e.reason,
    })
}

/// Annotation helper shared by the backends for `@retain`/`@shared`.
pub fn has_annotation(annotations: &[Annotation], name: &str) -> bool {
    annotations.iter().any(|a| a.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;
    use crate::scanner::scan;

    fn analyse(source: &str) -> Program {
        let ast = parse_source("test.erpc", source, &[]).expect("parse");
        scan("test.erpc", &ast).expect("scan")
    }

    #[test]
    fn canonical_text_is_stable_and_order_sensitive() {
        let a = analyse("struct P { int32 x; }\ninterface i { f(in P p) -> int32 }");
        let b = analyse("struct P { int32 x; }\ninterface i { f(in P p) -> int32 }");
        assert_eq!(canonical_text(&a), canonical_text(&b));

        let c = analyse("struct P { int32 y; }\ninterface i { f(in P p) -> int32 }");
        assert_ne!(canonical_text(&a), canonical_text(&c));
    }

    #[test]
    fn crc_differs_for_different_idls() {
        let a = analyse("interface i { f() -> void }");
        let b = analyse("interface i { g() -> void }");
        assert_ne!(
            Crc16::checksum(canonical_text(&a).as_bytes()),
            Crc16::checksum(canonical_text(&b).as_bytes())
        );
    }

    #[test]
    fn anonymous_alias_collapses_onto_target() {
        let mut program = analyse("type Point = struct { int32 x; int32 y; }");
        collapse_anonymous_aliases(&mut program);
        let decl = program.type_decls[0];
        let target = is_collapsed_alias(&program, decl).expect("collapsed");
        match program.types.get(target) {
            DataType::Struct(s) => assert_eq!(s.name, "Point"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn reserved_words_get_suffixed() {
        assert_eq!(mangle_reserved("type", &["type", "match"]), "type_");
        assert_eq!(mangle_reserved("point", &["type"]), "point");
    }
}
