// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! C backend: `{base}_common.h`, `{base}_client.{c,h}`, and
//! `{base}_server.{c,h}`.
//!
//! The emitted sources target the C runtime's shim API (codec read/write
//! calls, client request lifecycle, server handler registration); only the
//! contract of that API is assumed here. Lists become synthesised
//! `list_<elem>_t` structs with an `elements`/`elementsCount` pair, a bare
//! `binary` becomes the shared `binary_t` wrapper struct, and a
//! `@length`-annotated binary shares its count with the referenced member.

use super::{base_data_map, render_template, wire_order, GenContext, Output};
use crate::errors::GenResult;
use crate::template::{DataMap, DataValue};
use crate::types::{
    BuiltinKind, DataType, Direction, Function, StructMember, StructType, TypeRef, UnionType,
};
use std::collections::BTreeSet;
use std::fmt::Write as _;

const RESERVED: &[&str] = &[
    "auto", "break", "case", "char", "const", "continue", "default", "do", "double", "else",
    "enum", "extern", "float", "for", "goto", "if", "inline", "int", "long", "register",
    "restrict", "return", "short", "signed", "sizeof", "static", "struct", "switch", "typedef",
    "union", "unsigned", "void", "volatile", "while",
];

const COMMON_TEMPLATE: &str = include_str!("../../templates/c_common.template");
const CLIENT_HEADER_TEMPLATE: &str = include_str!("../../templates/c_client_header.template");
const CLIENT_SOURCE_TEMPLATE: &str = include_str!("../../templates/c_client_source.template");
const SERVER_HEADER_TEMPLATE: &str = include_str!("../../templates/c_server_header.template");
const SERVER_SOURCE_TEMPLATE: &str = include_str!("../../templates/c_server_source.template");

pub fn emit(ctx: &GenContext<'_>) -> GenResult<Vec<Output>> {
    let mut outputs = Vec::new();
    let list_structs = collect_list_structs(ctx);

    for (template, suffix) in [
        (COMMON_TEMPLATE, "common.h"),
        (CLIENT_HEADER_TEMPLATE, "client.h"),
        (CLIENT_SOURCE_TEMPLATE, "client.c"),
        (SERVER_HEADER_TEMPLATE, "server.h"),
        (SERVER_SOURCE_TEMPLATE, "server.c"),
    ] {
        let mut data = base_data_map(ctx);
        data.set("guard", format!("_{}_{}_", ctx.base_name.to_uppercase(), suffix.replace('.', "_").to_uppercase()));
        data.set("consts", consts_data(ctx));
        data.set("enums", enums_data(ctx));
        data.set("typedefs", typedefs_data(ctx));
        data.set("listStructs", list_structs.clone());
        data.set("structs", structs_data(ctx));
        data.set("unions", unions_data(ctx));
        data.set("usesBinary", uses_bare_binary(ctx));
        data.set("interfaces", interfaces_data(ctx));
        let content = render_template(template, &mut data)?;
        outputs.push(Output {
            path: format!("{}_{}", ctx.base_name, suffix).into(),
            content,
        });
    }
    Ok(outputs)
}

// ---------------------------------------------------------------------------
// Type mapping
// ---------------------------------------------------------------------------

fn type_name(ctx: &GenContext<'_>, ty: TypeRef) -> String {
    let types = &ctx.program.types;
    match types.get(ty) {
        DataType::Builtin(kind) => match kind {
            BuiltinKind::Bool => "bool".into(),
            BuiltinKind::I8 => "int8_t".into(),
            BuiltinKind::I16 => "int16_t".into(),
            BuiltinKind::I32 => "int32_t".into(),
            BuiltinKind::I64 => "int64_t".into(),
            BuiltinKind::U8 => "uint8_t".into(),
            BuiltinKind::U16 => "uint16_t".into(),
            BuiltinKind::U32 => "uint32_t".into(),
            BuiltinKind::U64 => "uint64_t".into(),
            BuiltinKind::F32 => "float".into(),
            BuiltinKind::F64 => "double".into(),
            BuiltinKind::String => "char *".into(),
            BuiltinKind::UString => "uint16_t *".into(),
            BuiltinKind::Binary => "binary_t".into(),
        },
        DataType::Alias { name, .. } => format!("{}", super::mangle_reserved(name, RESERVED)),
        DataType::List { element } => format!("list_{}_t", flat_name(ctx, *element)),
        DataType::Array { element, .. } => type_name(ctx, *element),
        DataType::Struct(s) => super::mangle_reserved(&s.name, RESERVED),
        DataType::Union(u) => super::mangle_reserved(&u.name, RESERVED),
        DataType::Enum(e) => super::mangle_reserved(&e.name, RESERVED),
        DataType::FunctionType(_) => "uint8_t".into(),
        DataType::Void => "void".into(),
    }
}

/// Identifier-safe spelling of a type for synthesised list struct names.
fn flat_name(ctx: &GenContext<'_>, ty: TypeRef) -> String {
    let types = &ctx.program.types;
    match types.get(ty) {
        DataType::Builtin(kind) => kind.idl_name().to_string(),
        DataType::List { element } => format!("list_{}", flat_name(ctx, *element)),
        DataType::Array { element, count } => format!("{}_{}", flat_name(ctx, *element), count),
        other => other.name().unwrap_or("anon").to_string(),
    }
}

/// Array suffix (`[N][M]`) for declarations. Aliases keep their own name,
/// so only direct array types contribute dimensions.
fn array_suffix(ctx: &GenContext<'_>, mut ty: TypeRef) -> String {
    let mut out = String::new();
    while let DataType::Array { element, count } = ctx.program.types.get(ty) {
        let _ = write!(out, "[{}]", count);
        ty = *element;
    }
    out
}

/// Synthesised `list_<elem>_t` structs, one per distinct element type.
fn collect_list_structs(ctx: &GenContext<'_>) -> Vec<DataValue> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for (_, ty) in ctx.program.types.iter() {
        if let DataType::List { element } = ty {
            let name = format!("list_{}_t", flat_name(ctx, *element));
            if seen.insert(name.clone()) {
                let mut map = DataMap::new();
                map.set("name", name);
                map.set("elementType", type_name(ctx, *element));
                out.push(DataValue::Map(map));
            }
        }
    }
    out
}

fn uses_bare_binary(ctx: &GenContext<'_>) -> bool {
    let program = ctx.program;
    let member_uses = |m: &StructMember| {
        program.types.is_builtin(m.ty, BuiltinKind::Binary) && !ctx.binary_as_list(m)
    };
    program.types.iter().any(|(_, ty)| match ty {
        DataType::Struct(s) => s.members.iter().any(member_uses),
        DataType::Union(u) => u.members.iter().any(member_uses),
        _ => false,
    }) || program
        .interfaces
        .iter()
        .flat_map(|i| &i.functions)
        .any(|f| {
            f.params.iter().any(member_uses)
                || program.types.is_builtin(f.return_type, BuiltinKind::Binary)
        })
}

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

fn consts_data(ctx: &GenContext<'_>) -> Vec<DataValue> {
    ctx.program
        .consts
        .iter()
        .map(|c| {
            let mut map = DataMap::new();
            map.set("name", ctx.symbol_name(&c.name, c, RESERVED));
            map.set(
                "value",
                match &c.value {
                    crate::token::Value::String(text) => format!("{:?}", text),
                    other => other.to_string(),
                },
            );
            DataValue::Map(map)
        })
        .collect()
}

fn enums_data(ctx: &GenContext<'_>) -> Vec<DataValue> {
    let mut out = Vec::new();
    for &decl in &ctx.program.type_decls {
        let decl = super::is_collapsed_alias(ctx.program, decl).unwrap_or(decl);
        if let DataType::Enum(e) = ctx.program.types.get(decl) {
            if e.name.is_empty() || ctx.is_external(e) {
                continue;
            }
            let mut map = DataMap::new();
            map.set("name", ctx.symbol_name(&e.name, e, RESERVED));
            map.set(
                "members",
                DataValue::List(
                    e.members
                        .iter()
                        .map(|m| {
                            let mut member = DataMap::new();
                            member.set("name", m.name.as_str());
                            member.set("value", m.value);
                            DataValue::Map(member)
                        })
                        .collect(),
                ),
            );
            out.push(DataValue::Map(map));
        }
    }
    out
}

fn typedefs_data(ctx: &GenContext<'_>) -> Vec<DataValue> {
    let mut out = Vec::new();
    for &decl in &ctx.program.type_decls {
        if super::is_collapsed_alias(ctx.program, decl).is_some() {
            continue;
        }
        if let DataType::Alias { name, target } = ctx.program.types.get(decl) {
            let mut map = DataMap::new();
            map.set("name", super::mangle_reserved(name, RESERVED));
            map.set("targetType", type_name(ctx, *target));
            map.set("arraySuffix", array_suffix(ctx, *target));
            out.push(DataValue::Map(map));
        }
    }
    out
}

/// Union-branch declarations match the branch codec exactly; a binary
/// member stays a `binary_t` regardless of `@length` annotations.
fn union_member_decl(ctx: &GenContext<'_>, member: &StructMember) -> String {
    let base = type_name(ctx, member.ty);
    let name = super::mangle_reserved(&member.name, RESERVED);
    let suffix = array_suffix(ctx, member.ty);
    if base.ends_with('*') {
        format!("{}{}{}", base, name, suffix)
    } else {
        format!("{} {}{}", base, name, suffix)
    }
}

fn member_decl(ctx: &GenContext<'_>, member: &StructMember) -> String {
    let base = if ctx.binary_as_list(member) {
        "uint8_t *".to_string()
    } else {
        type_name(ctx, member.ty)
    };
    let name = super::mangle_reserved(&member.name, RESERVED);
    let suffix = array_suffix(ctx, member.ty);
    if base.ends_with('*') {
        format!("{}{}{}", base, name, suffix)
    } else {
        format!("{} {}{}", base, name, suffix)
    }
}

fn structs_data(ctx: &GenContext<'_>) -> Vec<DataValue> {
    let mut out = Vec::new();
    for &decl in &ctx.program.type_decls {
        let decl = super::is_collapsed_alias(ctx.program, decl).unwrap_or(decl);
        if let DataType::Struct(s) = ctx.program.types.get(decl) {
            if s.name.is_empty() || ctx.is_external(s) {
                continue;
            }
            let mut map = DataMap::new();
            let name = ctx.symbol_name(&s.name, s, RESERVED);
            map.set("name", name.as_str());
            map.set(
                "members",
                DataValue::List(
                    s.members
                        .iter()
                        .map(|m| {
                            let mut member = DataMap::new();
                            member.set("decl", member_decl(ctx, m));
                            DataValue::Map(member)
                        })
                        .collect(),
                ),
            );
            map.set("containsList", s.members.iter().any(|m| m.contains_list));
            map.set("containsString", s.members.iter().any(|m| m.contains_string));
            map.set("writeCode", struct_write_code(ctx, s));
            map.set("readCode", struct_read_code(ctx, s));
            out.push(DataValue::Map(map));
        }
    }
    out
}

fn unions_data(ctx: &GenContext<'_>) -> Vec<DataValue> {
    let mut out = Vec::new();
    for &decl in &ctx.program.type_decls {
        let decl = super::is_collapsed_alias(ctx.program, decl).unwrap_or(decl);
        if let DataType::Union(u) = ctx.program.types.get(decl) {
            if u.name.is_empty() || ctx.is_external(u) {
                continue;
            }
            let mut map = DataMap::new();
            map.set("name", ctx.symbol_name(&u.name, u, RESERVED));
            map.set(
                "members",
                DataValue::List(
                    u.members
                        .iter()
                        .map(|m| {
                            let mut member = DataMap::new();
                            member.set("decl", union_member_decl(ctx, m));
                            DataValue::Map(member)
                        })
                        .collect(),
                ),
            );
            map.set("writeCode", union_write_code(ctx, u));
            map.set("readCode", union_read_code(ctx, u));
            out.push(DataValue::Map(map));
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Codec snippets
// ---------------------------------------------------------------------------

fn write_stmt(ctx: &GenContext<'_>, ty: TypeRef, expr: &str, depth: usize) -> String {
    let types = &ctx.program.types;
    match types.get(ty) {
        DataType::Builtin(kind) => match kind {
            BuiltinKind::Bool => format!("erpc_codec_write_bool(codec, {});", expr),
            BuiltinKind::I8 => format!("erpc_codec_write_int8(codec, {});", expr),
            BuiltinKind::I16 => format!("erpc_codec_write_int16(codec, {});", expr),
            BuiltinKind::I32 => format!("erpc_codec_write_int32(codec, {});", expr),
            BuiltinKind::I64 => format!("erpc_codec_write_int64(codec, {});", expr),
            BuiltinKind::U8 => format!("erpc_codec_write_uint8(codec, {});", expr),
            BuiltinKind::U16 => format!("erpc_codec_write_uint16(codec, {});", expr),
            BuiltinKind::U32 => format!("erpc_codec_write_uint32(codec, {});", expr),
            BuiltinKind::U64 => format!("erpc_codec_write_uint64(codec, {});", expr),
            BuiltinKind::F32 => format!("erpc_codec_write_float(codec, {});", expr),
            BuiltinKind::F64 => format!("erpc_codec_write_double(codec, {});", expr),
            BuiltinKind::String => format!("erpc_codec_write_string(codec, {});", expr),
            BuiltinKind::UString => format!("erpc_codec_write_ustring(codec, {});", expr),
            BuiltinKind::Binary => format!(
                "erpc_codec_write_binary(codec, {expr}.data, {expr}.dataLength);",
                expr = expr
            ),
        },
        DataType::Alias { target, .. } => write_stmt(ctx, *target, expr, depth),
        DataType::Enum(_) => format!("erpc_codec_write_int32(codec, (int32_t){});", expr),
        DataType::List { element } => {
            let index = format!("i{}", depth);
            format!(
                "erpc_codec_start_write_list(codec, {expr}.elementsCount);\nfor (uint32_t {index} = 0; {index} < {expr}.elementsCount; ++{index})\n{{\n{body}\n}}",
                expr = expr,
                index = index,
                body = indent(
                    &write_stmt(ctx, *element, &format!("{}.elements[{}]", expr, index), depth + 1),
                    1
                ),
            )
        }
        DataType::Array { element, count } => {
            let index = format!("i{}", depth);
            format!(
                "for (uint32_t {index} = 0; {index} < {count}; ++{index})\n{{\n{body}\n}}",
                index = index,
                count = count,
                body = indent(
                    &write_stmt(ctx, *element, &format!("{}[{}]", expr, index), depth + 1),
                    1
                ),
            )
        }
        DataType::Struct(s) => format!("write_{}_struct(codec, &{});", s.name, expr),
        DataType::Union(u) => format!("write_{}_union(codec, &{});", u.name, expr),
        DataType::FunctionType(_) => format!("erpc_codec_write_callback(codec, {});", expr),
        DataType::Void => String::new(),
    }
}

fn read_stmt(ctx: &GenContext<'_>, ty: TypeRef, expr: &str, depth: usize) -> String {
    let types = &ctx.program.types;
    match types.get(ty) {
        DataType::Builtin(kind) => match kind {
            BuiltinKind::Bool => format!("erpc_codec_read_bool(codec, &{});", expr),
            BuiltinKind::I8 => format!("erpc_codec_read_int8(codec, &{});", expr),
            BuiltinKind::I16 => format!("erpc_codec_read_int16(codec, &{});", expr),
            BuiltinKind::I32 => format!("erpc_codec_read_int32(codec, &{});", expr),
            BuiltinKind::I64 => format!("erpc_codec_read_int64(codec, &{});", expr),
            BuiltinKind::U8 => format!("erpc_codec_read_uint8(codec, &{});", expr),
            BuiltinKind::U16 => format!("erpc_codec_read_uint16(codec, &{});", expr),
            BuiltinKind::U32 => format!("erpc_codec_read_uint32(codec, &{});", expr),
            BuiltinKind::U64 => format!("erpc_codec_read_uint64(codec, &{});", expr),
            BuiltinKind::F32 => format!("erpc_codec_read_float(codec, &{});", expr),
            BuiltinKind::F64 => format!("erpc_codec_read_double(codec, &{});", expr),
            BuiltinKind::String => format!("erpc_codec_read_string(codec, &{});", expr),
            BuiltinKind::UString => format!("erpc_codec_read_ustring(codec, &{});", expr),
            BuiltinKind::Binary => format!(
                "erpc_codec_read_binary(codec, &{expr}.data, &{expr}.dataLength);",
                expr = expr
            ),
        },
        DataType::Alias { target, .. } => read_stmt(ctx, *target, expr, depth),
        DataType::Enum(_) => format!("erpc_codec_read_int32(codec, (int32_t *)&{});", expr),
        DataType::List { element } => {
            let index = format!("i{}", depth);
            format!(
                "erpc_codec_start_read_list(codec, &{expr}.elementsCount);\n{expr}.elements = erpc_alloc({expr}.elementsCount * sizeof(*{expr}.elements));\nfor (uint32_t {index} = 0; {index} < {expr}.elementsCount; ++{index})\n{{\n{body}\n}}",
                expr = expr,
                index = index,
                body = indent(
                    &read_stmt(ctx, *element, &format!("{}.elements[{}]", expr, index), depth + 1),
                    1
                ),
            )
        }
        DataType::Array { element, count } => {
            let index = format!("i{}", depth);
            format!(
                "for (uint32_t {index} = 0; {index} < {count}; ++{index})\n{{\n{body}\n}}",
                index = index,
                count = count,
                body = indent(
                    &read_stmt(ctx, *element, &format!("{}[{}]", expr, index), depth + 1),
                    1
                ),
            )
        }
        DataType::Struct(s) => format!("read_{}_struct(codec, &{});", s.name, expr),
        DataType::Union(u) => format!("read_{}_union(codec, &{});", u.name, expr),
        DataType::FunctionType(_) => format!("erpc_codec_read_callback(codec, &{});", expr),
        DataType::Void => String::new(),
    }
}

fn member_write(ctx: &GenContext<'_>, member: &StructMember, expr: &str) -> String {
    if ctx.binary_as_list(member) {
        let length = ctx.length_ref(member).unwrap_or_default();
        return format!(
            "erpc_codec_write_bytes(codec, {}, (uint32_t)data->{});",
            expr, length
        );
    }
    if ctx.nullable(member) {
        return format!(
            "erpc_codec_write_null_flag(codec, {expr} != NULL);\nif ({expr} != NULL)\n{{\n{body}\n}}",
            expr = expr,
            body = indent(&write_stmt(ctx, member.ty, &format!("(*{})", expr), 0), 1),
        );
    }
    write_stmt(ctx, member.ty, expr, 0)
}

fn struct_write_code(ctx: &GenContext<'_>, s: &StructType) -> String {
    let mut out = String::new();
    for member in wire_order(ctx, &s.members) {
        let expr = format!("data->{}", super::mangle_reserved(&member.name, RESERVED));
        let _ = writeln!(out, "{}", member_write(ctx, member, &expr));
    }
    out.trim_end().to_string()
}

fn struct_read_code(ctx: &GenContext<'_>, s: &StructType) -> String {
    let mut out = String::new();
    for member in wire_order(ctx, &s.members) {
        let expr = format!("data->{}", super::mangle_reserved(&member.name, RESERVED));
        if ctx.binary_as_list(member) {
            let length = ctx.length_ref(member).unwrap_or_default();
            let _ = writeln!(
                out,
                "{expr} = erpc_alloc((uint32_t)data->{length});\nerpc_codec_read_bytes(codec, {expr}, (uint32_t)data->{length});",
                expr = expr,
                length = length
            );
        } else {
            let _ = writeln!(out, "{}", read_stmt(ctx, member.ty, &expr, 0));
        }
    }
    out.trim_end().to_string()
}

fn union_write_code(ctx: &GenContext<'_>, u: &UnionType) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "erpc_codec_start_write_union(codec, discriminator);");
    let _ = writeln!(out, "switch (discriminator)");
    let _ = writeln!(out, "{{");
    for case in &u.cases {
        for label in &case.labels {
            match label.value() {
                Some(value) => {
                    let _ = writeln!(out, "    case {}:", value);
                }
                None => {
                    let _ = writeln!(out, "    default:");
                }
            }
        }
        for member_name in &case.member_names {
            let member = u.member(member_name).expect("deduplicated member");
            let expr = format!("data->{}", super::mangle_reserved(member_name, RESERVED));
            // Union branches stay self-contained; binaries keep their own
            // length prefix even under a cross-scope @length.
            let _ = writeln!(out, "{}", indent(&write_stmt(ctx, member.ty, &expr, 0), 2));
        }
        let _ = writeln!(out, "        break;");
    }
    let _ = writeln!(out, "}}");
    out.trim_end().to_string()
}

fn union_read_code(ctx: &GenContext<'_>, u: &UnionType) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "erpc_codec_start_read_union(codec, discriminator);");
    let _ = writeln!(out, "switch (*discriminator)");
    let _ = writeln!(out, "{{");
    for case in &u.cases {
        for label in &case.labels {
            match label.value() {
                Some(value) => {
                    let _ = writeln!(out, "    case {}:", value);
                }
                None => {
                    let _ = writeln!(out, "    default:");
                }
            }
        }
        for member_name in &case.member_names {
            let member = u.member(member_name).expect("deduplicated member");
            let expr = format!("data->{}", super::mangle_reserved(member_name, RESERVED));
            let _ = writeln!(out, "{}", indent(&read_stmt(ctx, member.ty, &expr, 0), 2));
        }
        let _ = writeln!(out, "        break;");
    }
    let _ = writeln!(out, "}}");
    out.trim_end().to_string()
}

fn indent(text: &str, levels: usize) -> String {
    let pad = "    ".repeat(levels);
    text.lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{}{}", pad, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Interfaces
// ---------------------------------------------------------------------------

fn c_param_decl(ctx: &GenContext<'_>, param: &StructMember) -> String {
    let base = if ctx.binary_as_list(param) {
        "uint8_t *".to_string()
    } else {
        type_name(ctx, param.ty)
    };
    let name = super::mangle_reserved(&param.name, RESERVED);
    let by_pointer = matches!(param.direction, Direction::Out | Direction::Inout)
        || matches!(
            ctx.program.types.get(ctx.program.types.true_type(param.ty)),
            DataType::Struct(_) | DataType::Union(_) | DataType::List { .. }
        );
    let star = if by_pointer && !base.ends_with('*') {
        " *"
    } else if by_pointer {
        "*"
    } else if base.ends_with('*') {
        ""
    } else {
        " "
    };
    format!("{}{}{}", base, star, name)
}

fn interfaces_data(ctx: &GenContext<'_>) -> Vec<DataValue> {
    ctx.program
        .interfaces
        .iter()
        .map(|interface| {
            let mut map = DataMap::new();
            let name = ctx.symbol_name(&interface.name, interface, RESERVED);
            map.set("name", name.as_str());
            map.set("upperName", name.to_uppercase());
            map.set("id", i64::from(interface.id));
            map.set(
                "functions",
                DataValue::List(
                    interface
                        .functions
                        .iter()
                        .map(|f| function_data(ctx, f))
                        .collect(),
                ),
            );
            DataValue::Map(map)
        })
        .collect()
}

fn function_data(ctx: &GenContext<'_>, function: &Function) -> DataValue {
    let mut map = DataMap::new();
    let name = ctx.symbol_name(&function.name, function, RESERVED);
    map.set("name", name.as_str());
    map.set("upperName", name.to_uppercase());
    map.set("id", i64::from(function.id));
    map.set("oneway", function.oneway);

    let types = &ctx.program.types;
    let has_return = !matches!(types.get(function.return_type), DataType::Void);
    map.set("hasReturn", has_return);
    map.set(
        "returnType",
        if has_return {
            type_name(ctx, function.return_type)
        } else {
            "void".to_string()
        },
    );

    let params: Vec<String> = function
        .params
        .iter()
        .filter(|p| p.direction != Direction::Return)
        .map(|p| c_param_decl(ctx, p))
        .collect();
    map.set(
        "paramList",
        if params.is_empty() {
            "void".to_string()
        } else {
            params.join(", ")
        },
    );

    let sendable: Vec<&StructMember> = function
        .params
        .iter()
        .filter(|p| matches!(p.direction, Direction::In | Direction::Inout))
        .collect();
    let receivable: Vec<&StructMember> = function
        .params
        .iter()
        .filter(|p| matches!(p.direction, Direction::Inout | Direction::Out))
        .collect();

    let owned: Vec<StructMember> = sendable.iter().map(|m| (*m).clone()).collect();
    let mut encode = String::new();
    for param in wire_order(ctx, &owned) {
        let _ = writeln!(encode, "{}", param_write(ctx, param));
    }
    map.set("clientEncode", encode.trim_end().to_string());

    let mut decode = String::new();
    for param in &receivable {
        let expr = super::mangle_reserved(&param.name, RESERVED);
        let _ = writeln!(decode, "{}", read_stmt(ctx, param.ty, &format!("(*{})", expr), 0));
    }
    if has_return {
        let _ = writeln!(decode, "{}", read_stmt(ctx, function.return_type, "result", 0));
    }
    map.set("clientDecode", decode.trim_end().to_string());

    // Server side: locals, decode, invoke, encode.
    let mut server_locals = String::new();
    for param in &function.params {
        if param.direction == Direction::Return {
            continue;
        }
        let _ = writeln!(
            server_locals,
            "{} = {{0}};",
            member_decl(ctx, param)
        );
    }
    if has_return {
        let _ = writeln!(
            server_locals,
            "{} result = {{0}};",
            type_name(ctx, function.return_type)
        );
    }
    map.set("serverLocals", server_locals.trim_end().to_string());

    let mut server_decode = String::new();
    for param in wire_order(ctx, &owned) {
        let expr = super::mangle_reserved(&param.name, RESERVED);
        if ctx.binary_as_list(param) {
            let length = ctx.length_ref(param).unwrap_or_default();
            let _ = writeln!(
                server_decode,
                "{expr} = erpc_alloc((uint32_t){length});\nerpc_codec_read_bytes(codec, {expr}, (uint32_t){length});",
                expr = expr,
                length = length
            );
        } else {
            let _ = writeln!(server_decode, "{}", read_stmt(ctx, param.ty, &expr, 0));
        }
    }
    map.set("serverDecode", server_decode.trim_end().to_string());

    let call_args: Vec<String> = function
        .params
        .iter()
        .filter(|p| p.direction != Direction::Return)
        .map(|p| {
            let name = super::mangle_reserved(&p.name, RESERVED);
            match p.direction {
                Direction::Out | Direction::Inout => format!("&{}", name),
                _ => name,
            }
        })
        .collect();
    map.set("serverCallArgs", call_args.join(", "));

    let mut server_encode = String::new();
    for param in &receivable {
        let expr = super::mangle_reserved(&param.name, RESERVED);
        let _ = writeln!(server_encode, "{}", write_stmt(ctx, param.ty, &expr, 0));
    }
    if has_return {
        let _ = writeln!(
            server_encode,
            "{}",
            write_stmt(ctx, function.return_type, "result", 0)
        );
    }
    map.set("serverEncode", server_encode.trim_end().to_string());

    DataValue::Map(map)
}

/// Client-side write of one parameter (value or pointer form).
fn param_write(ctx: &GenContext<'_>, param: &StructMember) -> String {
    let name = super::mangle_reserved(&param.name, RESERVED);
    if ctx.binary_as_list(param) {
        let length = ctx.length_ref(param).unwrap_or_default();
        return format!(
            "erpc_codec_write_bytes(codec, {}, (uint32_t){});",
            name, length
        );
    }
    let by_pointer = matches!(param.direction, Direction::Out | Direction::Inout)
        || matches!(
            ctx.program.types.get(ctx.program.types.true_type(param.ty)),
            DataType::Struct(_) | DataType::Union(_) | DataType::List { .. }
        );
    let expr = if by_pointer {
        format!("(*{})", name)
    } else {
        name
    };
    write_stmt(ctx, param.ty, &expr, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gen::{generate, TargetLang};
    use crate::parser::parse_source;
    use crate::scanner::scan;

    fn emit_files(source: &str) -> Vec<Output> {
        let ast = parse_source("test.erpc", source, &[]).expect("parse");
        let mut program = scan("test.erpc", &ast).expect("scan");
        generate(&mut program, TargetLang::C, "demo").expect("emit")
    }

    fn file<'a>(outputs: &'a [Output], suffix: &str) -> &'a str {
        outputs
            .iter()
            .find(|o| o.path.to_str().unwrap_or_default().ends_with(suffix))
            .map(|o| o.content.as_str())
            .expect("output file")
    }

    #[test]
    fn emits_five_files() {
        let outputs = emit_files("interface calc { add(in int32 a, in int32 b) -> int32 }");
        let names: Vec<&str> = outputs
            .iter()
            .map(|o| o.path.to_str().unwrap_or_default())
            .collect();
        assert_eq!(
            names,
            vec![
                "demo_common.h",
                "demo_client.h",
                "demo_client.c",
                "demo_server.h",
                "demo_server.c"
            ]
        );
    }

    #[test]
    fn common_header_declares_types_and_ids() {
        let outputs = emit_files(
            "enum fruit { apple, banana }\nstruct Pair { int32 a; int32 b; }\ninterface calc { add(in Pair p) -> int32 }",
        );
        let common = file(&outputs, "common.h");
        assert!(common.contains("typedef enum fruit"));
        assert!(common.contains("typedef struct Pair"));
        assert!(common.contains("kcalc_service_id = 1"));
        assert!(common.contains("kcalc_add_id = 1"));
    }

    #[test]
    fn client_source_serialises_in_declaration_order() {
        let outputs = emit_files("interface calc { add(in int32 a, in int32 b) -> int32 }");
        let client = file(&outputs, "client.c");
        let a = client.find("erpc_codec_write_int32(codec, a);").expect("a");
        let b = client.find("erpc_codec_write_int32(codec, b);").expect("b");
        assert!(a < b);
        assert!(client.contains("erpc_codec_read_int32(codec, &result);"));
    }

    #[test]
    fn server_dispatcher_switches_on_function_id() {
        let outputs = emit_files(
            "interface io { ping() -> int32\n oneway quiet(in int32 x) }",
        );
        let server = file(&outputs, "server.c");
        assert!(server.contains("switch (function_id)"));
        assert!(server.contains("case kio_ping_id:"));
        assert!(server.contains("case kio_quiet_id:"));
    }

    #[test]
    fn list_struct_synthesised_once() {
        let outputs = emit_files(
            "struct A { list<int32> xs; }\nstruct B { list<int32> ys; }",
        );
        let common = file(&outputs, "common.h");
        assert_eq!(common.matches("typedef struct list_int32_t").count(), 1);
        assert!(common.contains("int32_t *elements;"));
        assert!(common.contains("uint32_t elementsCount;"));
    }

    #[test]
    fn bare_binary_gets_wrapper_struct() {
        let outputs = emit_files("interface io { send(in binary data) -> void }");
        let common = file(&outputs, "common.h");
        assert!(common.contains("typedef struct binary_t"));
    }
}
