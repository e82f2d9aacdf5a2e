// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Python backend: `{base}_common.py`, `{base}_interface.py`,
//! `{base}_client.py`, and `{base}_server.py`.
//!
//! The emitted modules target the Python runtime package's codec and
//! client/server classes (assumed at interface level): codec objects with
//! `write_int32`-style methods, a client manager with the
//! create/perform/release request cycle, and a `Service` base class keyed
//! by service and function ids.

use super::{base_data_map, render_template, wire_order, GenContext, Output};
use crate::errors::GenResult;
use crate::template::{DataMap, DataValue};
use crate::types::{
    BuiltinKind, DataType, Direction, Function, StructMember, StructType, TypeRef, UnionType,
};
use std::fmt::Write as _;

const RESERVED: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield",
];

const COMMON_TEMPLATE: &str = include_str!("../../templates/py_common.template");
const INTERFACE_TEMPLATE: &str = include_str!("../../templates/py_interface.template");
const CLIENT_TEMPLATE: &str = include_str!("../../templates/py_client.template");
const SERVER_TEMPLATE: &str = include_str!("../../templates/py_server.template");

pub fn emit(ctx: &GenContext<'_>) -> GenResult<Vec<Output>> {
    let mut outputs = Vec::new();
    for (template, suffix) in [
        (COMMON_TEMPLATE, "common.py"),
        (INTERFACE_TEMPLATE, "interface.py"),
        (CLIENT_TEMPLATE, "client.py"),
        (SERVER_TEMPLATE, "server.py"),
    ] {
        let mut data = base_data_map(ctx);
        data.set("consts", consts_data(ctx));
        data.set("enums", enums_data(ctx));
        data.set("structs", structs_data(ctx));
        data.set("unions", unions_data(ctx));
        data.set("interfaces", interfaces_data(ctx));
        let content = render_template(template, &mut data)?;
        outputs.push(Output {
            path: format!("{}_{}", ctx.base_name, suffix).into(),
            content,
        });
    }
    Ok(outputs)
}

/// Python default for a freshly constructed field.
fn default_value(ctx: &GenContext<'_>, ty: TypeRef) -> String {
    let types = &ctx.program.types;
    match types.get(types.true_type(ty)) {
        DataType::Builtin(kind) => match kind {
            BuiltinKind::Bool => "False".into(),
            BuiltinKind::F32 | BuiltinKind::F64 => "0.0".into(),
            BuiltinKind::String | BuiltinKind::UString => "\"\"".into(),
            BuiltinKind::Binary => "b\"\"".into(),
            _ => "0".into(),
        },
        DataType::List { .. } | DataType::Array { .. } => "None".into(),
        DataType::Struct(_) | DataType::Union(_) => "None".into(),
        DataType::Enum(_) => "0".into(),
        _ => "None".into(),
    }
}

fn write_stmt(ctx: &GenContext<'_>, ty: TypeRef, expr: &str, depth: usize) -> String {
    let types = &ctx.program.types;
    match types.get(ty) {
        DataType::Builtin(kind) => match kind {
            BuiltinKind::Bool => format!("codec.write_bool({})", expr),
            BuiltinKind::I8 => format!("codec.write_int8({})", expr),
            BuiltinKind::I16 => format!("codec.write_int16({})", expr),
            BuiltinKind::I32 => format!("codec.write_int32({})", expr),
            BuiltinKind::I64 => format!("codec.write_int64({})", expr),
            BuiltinKind::U8 => format!("codec.write_uint8({})", expr),
            BuiltinKind::U16 => format!("codec.write_uint16({})", expr),
            BuiltinKind::U32 => format!("codec.write_uint32({})", expr),
            BuiltinKind::U64 => format!("codec.write_uint64({})", expr),
            BuiltinKind::F32 => format!("codec.write_float({})", expr),
            BuiltinKind::F64 => format!("codec.write_double({})", expr),
            BuiltinKind::String => format!("codec.write_string({})", expr),
            BuiltinKind::UString => format!("codec.write_ustring({})", expr),
            BuiltinKind::Binary => format!("codec.write_binary({})", expr),
        },
        DataType::Alias { target, .. } => write_stmt(ctx, *target, expr, depth),
        DataType::Enum(_) => format!("codec.write_int32(int({}))", expr),
        DataType::List { element } | DataType::Array { element, .. } => {
            let item = format!("_i{}", depth);
            let prefix = if matches!(types.get(ty), DataType::List { .. }) {
                format!("codec.start_write_list(len({}))\n", expr)
            } else {
                String::new()
            };
            format!(
                "{prefix}for {item} in {expr}:\n{body}",
                prefix = prefix,
                item = item,
                expr = expr,
                body = indent(&write_stmt(ctx, *element, &item, depth + 1), 1),
            )
        }
        DataType::Struct(s) => format!("_write_{}(codec, {})", snake(&s.name), expr),
        DataType::Union(u) => format!("_write_{}(codec, {})", snake(&u.name), expr),
        DataType::FunctionType(_) => format!("codec.write_callback({})", expr),
        DataType::Void => String::new(),
    }
}

fn read_expr(ctx: &GenContext<'_>, ty: TypeRef, depth: usize) -> String {
    let types = &ctx.program.types;
    match types.get(ty) {
        DataType::Builtin(kind) => match kind {
            BuiltinKind::Bool => "codec.read_bool()".into(),
            BuiltinKind::I8 => "codec.read_int8()".into(),
            BuiltinKind::I16 => "codec.read_int16()".into(),
            BuiltinKind::I32 => "codec.read_int32()".into(),
            BuiltinKind::I64 => "codec.read_int64()".into(),
            BuiltinKind::U8 => "codec.read_uint8()".into(),
            BuiltinKind::U16 => "codec.read_uint16()".into(),
            BuiltinKind::U32 => "codec.read_uint32()".into(),
            BuiltinKind::U64 => "codec.read_uint64()".into(),
            BuiltinKind::F32 => "codec.read_float()".into(),
            BuiltinKind::F64 => "codec.read_double()".into(),
            BuiltinKind::String => "codec.read_string()".into(),
            BuiltinKind::UString => "codec.read_ustring()".into(),
            BuiltinKind::Binary => "codec.read_binary()".into(),
        },
        DataType::Alias { target, .. } => read_expr(ctx, *target, depth),
        DataType::Enum(_) => "codec.read_int32()".into(),
        DataType::List { element } => format!(
            "[{} for _ in range(codec.start_read_list())]",
            read_expr(ctx, *element, depth + 1)
        ),
        DataType::Array { element, count } => format!(
            "[{} for _ in range({})]",
            read_expr(ctx, *element, depth + 1),
            count
        ),
        DataType::Struct(s) => format!("_read_{}(codec)", snake(&s.name)),
        DataType::Union(u) => format!("_read_{}(codec)", snake(&u.name)),
        DataType::FunctionType(_) => "codec.read_callback()".into(),
        DataType::Void => "None".into(),
    }
}

fn member_write(ctx: &GenContext<'_>, member: &StructMember, expr: &str) -> String {
    if ctx.binary_as_list(member) {
        return format!("codec.write_bytes({})", expr);
    }
    if ctx.nullable(member) {
        return format!(
            "codec.write_null_flag({expr} is not None)\nif {expr} is not None:\n{body}",
            expr = expr,
            body = indent(&write_stmt(ctx, member.ty, expr, 0), 1),
        );
    }
    write_stmt(ctx, member.ty, expr, 0)
}

fn member_read(ctx: &GenContext<'_>, member: &StructMember, length_expr: Option<&str>) -> String {
    let inner = match (ctx.binary_as_list(member), length_expr) {
        (true, Some(length)) => format!("codec.read_bytes({})", length),
        _ => read_expr(ctx, member.ty, 0),
    };
    if ctx.nullable(member) {
        format!("({}) if codec.read_null_flag() else None", inner)
    } else {
        inner
    }
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

fn snake(name: &str) -> String {
    let mut out = String::new();
    let mut prev_lower = false;
    for ch in name.chars() {
        if ch.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
            prev_lower = false;
        } else {
            prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
            out.push(ch);
        }
    }
    out
}

fn consts_data(ctx: &GenContext<'_>) -> Vec<DataValue> {
    ctx.program
        .consts
        .iter()
        .map(|c| {
            let mut map = DataMap::new();
            map.set("name", ctx.symbol_name(&c.name, c, RESERVED).to_uppercase());
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

fn structs_data(ctx: &GenContext<'_>) -> Vec<DataValue> {
    let mut out = Vec::new();
    for &decl in &ctx.program.type_decls {
        let decl = super::is_collapsed_alias(ctx.program, decl).unwrap_or(decl);
        if let DataType::Struct(s) = ctx.program.types.get(decl) {
            if s.name.is_empty() || ctx.is_external(s) {
                continue;
            }
            out.push(struct_data(ctx, s));
        }
    }
    out
}

fn struct_data(ctx: &GenContext<'_>, s: &StructType) -> DataValue {
    let mut map = DataMap::new();
    let name = ctx.symbol_name(&s.name, s, RESERVED);
    map.set("name", name.as_str());
    map.set("snakeName", snake(&s.name));
    map.set(
        "members",
        DataValue::List(
            s.members
                .iter()
                .map(|m| {
                    let mut member = DataMap::new();
                    member.set("name", super::mangle_reserved(&m.name, RESERVED));
                    member.set("default", default_value(ctx, m.ty));
                    DataValue::Map(member)
                })
                .collect(),
        ),
    );

    let mut write = String::new();
    for member in wire_order(ctx, &s.members) {
        let expr = format!("value.{}", super::mangle_reserved(&member.name, RESERVED));
        let _ = writeln!(write, "{}", member_write(ctx, member, &expr));
    }
    map.set("writeCode", write.trim_end().to_string());

    let mut read = String::new();
    for member in wire_order(ctx, &s.members) {
        let length = ctx
            .length_ref(member)
            .map(|target| format!("value.{}", target));
        let _ = writeln!(
            read,
            "value.{} = {}",
            super::mangle_reserved(&member.name, RESERVED),
            member_read(ctx, member, length.as_deref())
        );
    }
    map.set("readCode", read.trim_end().to_string());
    DataValue::Map(map)
}

fn unions_data(ctx: &GenContext<'_>) -> Vec<DataValue> {
    let mut out = Vec::new();
    for &decl in &ctx.program.type_decls {
        let decl = super::is_collapsed_alias(ctx.program, decl).unwrap_or(decl);
        if let DataType::Union(u) = ctx.program.types.get(decl) {
            if u.name.is_empty() || ctx.is_external(u) {
                continue;
            }
            out.push(union_data(ctx, u));
        }
    }
    out
}

fn union_data(ctx: &GenContext<'_>, u: &UnionType) -> DataValue {
    let mut map = DataMap::new();
    let name = ctx.symbol_name(&u.name, u, RESERVED);
    map.set("name", name.as_str());
    map.set("snakeName", snake(&u.name));
    map.set(
        "members",
        DataValue::List(
            u.members
                .iter()
                .map(|m| {
                    let mut member = DataMap::new();
                    member.set("name", super::mangle_reserved(&m.name, RESERVED));
                    DataValue::Map(member)
                })
                .collect(),
        ),
    );

    let mut write = String::new();
    let _ = writeln!(write, "codec.start_write_union(value.discriminator)");
    for case in &u.cases {
        let values: Vec<String> = case
            .labels
            .iter()
            .filter_map(|l| l.value())
            .map(|v| v.to_string())
            .collect();
        if values.is_empty() {
            continue;
        }
        let _ = writeln!(write, "if value.discriminator in ({},):", values.join(", "));
        if case.member_names.is_empty() {
            let _ = writeln!(write, "    pass");
        }
        for member_name in &case.member_names {
            let member = u.member(member_name).expect("deduplicated member");
            let expr = format!("value.{}", super::mangle_reserved(member_name, RESERVED));
            // Union branches stay self-contained; no cross-scope @length.
            let _ = writeln!(write, "{}", indent(&write_stmt(ctx, member.ty, &expr, 0), 1));
        }
    }
    map.set("writeCode", write.trim_end().to_string());

    let mut read = String::new();
    let _ = writeln!(read, "value.discriminator = codec.start_read_union()");
    for case in &u.cases {
        let values: Vec<String> = case
            .labels
            .iter()
            .filter_map(|l| l.value())
            .map(|v| v.to_string())
            .collect();
        if values.is_empty() {
            continue;
        }
        let _ = writeln!(read, "if value.discriminator in ({},):", values.join(", "));
        if case.member_names.is_empty() {
            let _ = writeln!(read, "    pass");
        }
        for member_name in &case.member_names {
            let member = u.member(member_name).expect("deduplicated member");
            let _ = writeln!(
                read,
                "    value.{} = {}",
                super::mangle_reserved(member_name, RESERVED),
                read_expr(ctx, member.ty, 0)
            );
        }
    }
    map.set("readCode", read.trim_end().to_string());
    DataValue::Map(map)
}

fn interfaces_data(ctx: &GenContext<'_>) -> Vec<DataValue> {
    ctx.program
        .interfaces
        .iter()
        .map(|interface| {
            let mut map = DataMap::new();
            let name = ctx.symbol_name(&interface.name, interface, RESERVED);
            map.set("name", name.as_str());
            map.set("upperName", snake(&interface.name).to_uppercase());
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
    let name = snake(&ctx.symbol_name(&function.name, function, RESERVED));
    map.set("name", name.as_str());
    map.set("id", i64::from(function.id));
    map.set("oneway", function.oneway);

    let has_return = !matches!(
        ctx.program.types.get(function.return_type),
        DataType::Void
    );
    map.set("hasReturn", has_return);

    let args: Vec<String> = function
        .params
        .iter()
        .filter(|p| p.direction != Direction::Return)
        .map(|p| super::mangle_reserved(&p.name, RESERVED))
        .collect();
    let param_list = if args.is_empty() {
        String::new()
    } else {
        format!(", {}", args.join(", "))
    };
    map.set("paramList", param_list);
    map.set("callArgs", args.join(", "));

    let sendable: Vec<StructMember> = function
        .params
        .iter()
        .filter(|p| matches!(p.direction, Direction::In | Direction::Inout))
        .cloned()
        .collect();
    let mut encode = String::new();
    for param in wire_order(ctx, &sendable) {
        let expr = super::mangle_reserved(&param.name, RESERVED);
        let _ = writeln!(encode, "{}", member_write(ctx, param, &expr));
    }
    map.set("clientEncode", encode.trim_end().to_string());
    map.set("serverDecodeArgs", {
        let mut decode = String::new();
        for param in wire_order(ctx, &sendable) {
            let length = ctx.length_ref(param).map(|t| super::mangle_reserved(&t, RESERVED));
            let _ = writeln!(
                decode,
                "{} = {}",
                super::mangle_reserved(&param.name, RESERVED),
                member_read(ctx, param, length.as_deref())
            );
        }
        decode.trim_end().to_string()
    });

    if has_return {
        map.set("clientDecode", format!("_result = {}", read_expr(ctx, function.return_type, 0)));
        map.set(
            "serverEncodeResult",
            write_stmt(ctx, function.return_type, "_result", 0),
        );
    } else {
        map.set("clientDecode", "");
        map.set("serverEncodeResult", "");
    }
    DataValue::Map(map)
}
