// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Rust backend: one `{base}.rs` module per program.
//!
//! The module contains constants, type definitions, codec helpers per
//! aggregate, a trait per interface, a client struct per interface
//! implementing the trait over a `ClientManager`, and a dispatcher that
//! drives a `&dyn Trait` (wrapped into an `erpc::Service` adapter).
//!
//! Requests carry `in`/`inout` parameters; replies carry `inout`/`out`
//! parameters and the return value, in that order.

use super::{base_data_map, render_template, wire_order, GenContext, Output};
use crate::errors::GenResult;
use crate::template::{DataMap, DataValue};
use crate::types::{
    BuiltinKind, CaseLabel, DataType, Direction, EnumType, Function, StructMember, StructType,
    TypeRef, UnionType,
};
use std::fmt::Write as _;

/// Rust 2021 keywords the emitter must not collide with.
const RESERVED: &[&str] = &[
    "as", "async", "await", "break", "const", "continue", "crate", "dyn", "else", "enum",
    "extern", "false", "fn", "for", "if", "impl", "in", "let", "loop", "match", "mod", "move",
    "mut", "pub", "ref", "return", "self", "static", "struct", "super", "trait", "true", "type",
    "union", "unsafe", "use", "where", "while", "yield",
];

const MODULE_TEMPLATE: &str = include_str!("../../templates/rust.template");

pub fn emit(ctx: &GenContext<'_>) -> GenResult<Vec<Output>> {
    let mut data = base_data_map(ctx);

    data.set("consts", consts_data(ctx));
    data.set("types", types_data(ctx));
    data.set("interfaces", interfaces_data(ctx));

    let content = render_template(MODULE_TEMPLATE, &mut data)?;
    Ok(vec![Output {
        path: format!("{}.rs", ctx.base_name).into(),
        content,
    }])
}

fn name_of(ctx: &GenContext<'_>, declared: &str, annotated: &dyn crate::types::Annotated) -> String {
    ctx.symbol_name(declared, annotated, RESERVED)
}

// ---------------------------------------------------------------------------
// Type mapping
// ---------------------------------------------------------------------------

fn type_name(ctx: &GenContext<'_>, ty: TypeRef) -> String {
    let types = &ctx.program.types;
    match types.get(ty) {
        DataType::Builtin(kind) => match kind {
            BuiltinKind::Bool => "bool".into(),
            BuiltinKind::I8 => "i8".into(),
            BuiltinKind::I16 => "i16".into(),
            BuiltinKind::I32 => "i32".into(),
            BuiltinKind::I64 => "i64".into(),
            BuiltinKind::U8 => "u8".into(),
            BuiltinKind::U16 => "u16".into(),
            BuiltinKind::U32 => "u32".into(),
            BuiltinKind::U64 => "u64".into(),
            BuiltinKind::F32 => "f32".into(),
            BuiltinKind::F64 => "f64".into(),
            BuiltinKind::String => "String".into(),
            BuiltinKind::UString => "Vec<u16>".into(),
            BuiltinKind::Binary => "Vec<u8>".into(),
        },
        DataType::Alias { name, .. } => super::mangle_reserved(name, RESERVED),
        DataType::Array { element, .. } | DataType::List { element } => {
            format!("Vec<{}>", type_name(ctx, *element))
        }
        DataType::Struct(s) => super::mangle_reserved(&s.name, RESERVED),
        DataType::Union(u) => super::mangle_reserved(&u.name, RESERVED),
        DataType::Enum(e) => super::mangle_reserved(&e.name, RESERVED),
        DataType::FunctionType(_) => "u8".into(),
        DataType::Void => "()".into(),
    }
}

/// Member type with `@nullable` applied.
fn member_type(ctx: &GenContext<'_>, member: &StructMember) -> String {
    let base = if ctx.binary_as_list(member) {
        "Vec<u8>".to_string()
    } else {
        type_name(ctx, member.ty)
    };
    if ctx.nullable(member) {
        format!("Option<{}>", base)
    } else {
        base
    }
}

/// Cheap scalar types pass by value; everything else by reference in
/// parameter position.
fn is_copy_type(ctx: &GenContext<'_>, ty: TypeRef) -> bool {
    let true_ty = ctx.program.types.true_type(ty);
    matches!(
        ctx.program.types.get(true_ty),
        DataType::Builtin(kind) if kind.is_scalar()
    ) || matches!(ctx.program.types.get(true_ty), DataType::Enum(_))
        || matches!(ctx.program.types.get(true_ty), DataType::FunctionType(_))
}

// ---------------------------------------------------------------------------
// Encode / decode snippets
// ---------------------------------------------------------------------------

/// Statement(s) encoding `expr` (a place expression of the member's type)
/// into `codec`.
fn encode_stmt(ctx: &GenContext<'_>, ty: TypeRef, expr: &str, depth: usize) -> String {
    let types = &ctx.program.types;
    match types.get(ty) {
        DataType::Builtin(kind) => match kind {
            BuiltinKind::Bool => format!("codec.write_bool({})?;", expr),
            BuiltinKind::I8 => format!("codec.write_i8({})?;", expr),
            BuiltinKind::I16 => format!("codec.write_i16({})?;", expr),
            BuiltinKind::I32 => format!("codec.write_i32({})?;", expr),
            BuiltinKind::I64 => format!("codec.write_i64({})?;", expr),
            BuiltinKind::U8 => format!("codec.write_u8({})?;", expr),
            BuiltinKind::U16 => format!("codec.write_u16({})?;", expr),
            BuiltinKind::U32 => format!("codec.write_u32({})?;", expr),
            BuiltinKind::U64 => format!("codec.write_u64({})?;", expr),
            BuiltinKind::F32 => format!("codec.write_f32({})?;", expr),
            BuiltinKind::F64 => format!("codec.write_f64({})?;", expr),
            BuiltinKind::String => format!("codec.write_string(&{})?;", expr),
            BuiltinKind::UString => format!("codec.write_ustring(&{})?;", expr),
            BuiltinKind::Binary => format!("codec.write_binary(&{})?;", expr),
        },
        DataType::Alias { target, .. } => encode_stmt(ctx, *target, expr, depth),
        DataType::Enum(_) => format!("codec.write_i32({} as i32)?;", expr),
        DataType::List { element } => {
            let item = format!("item{}", depth);
            format!(
                "codec.start_write_list({expr}.len() as u32)?;\nfor {item} in &{expr} {{\n{body}\n}}",
                expr = expr,
                item = item,
                body = indent(&encode_stmt(ctx, *element, &deref(ctx, *element, &item), depth + 1), 1),
            )
        }
        DataType::Array { element, .. } => {
            let item = format!("item{}", depth);
            format!(
                "for {item} in &{expr} {{\n{body}\n}}",
                expr = expr,
                item = item,
                body = indent(&encode_stmt(ctx, *element, &deref(ctx, *element, &item), depth + 1), 1),
            )
        }
        DataType::Struct(s) => format!("write_{}(codec, &{})?;", snake(&s.name), expr),
        DataType::Union(u) => format!("write_{}(codec, &{})?;", snake(&u.name), expr),
        DataType::FunctionType(_) => format!("codec.write_callback({})?;", expr),
        DataType::Void => String::new(),
    }
}

/// Expression decoding one value of `ty` from `codec`.
fn decode_expr(ctx: &GenContext<'_>, ty: TypeRef, depth: usize) -> String {
    let types = &ctx.program.types;
    match types.get(ty) {
        DataType::Builtin(kind) => match kind {
            BuiltinKind::Bool => "codec.read_bool()?".into(),
            BuiltinKind::I8 => "codec.read_i8()?".into(),
            BuiltinKind::I16 => "codec.read_i16()?".into(),
            BuiltinKind::I32 => "codec.read_i32()?".into(),
            BuiltinKind::I64 => "codec.read_i64()?".into(),
            BuiltinKind::U8 => "codec.read_u8()?".into(),
            BuiltinKind::U16 => "codec.read_u16()?".into(),
            BuiltinKind::U32 => "codec.read_u32()?".into(),
            BuiltinKind::U64 => "codec.read_u64()?".into(),
            BuiltinKind::F32 => "codec.read_f32()?".into(),
            BuiltinKind::F64 => "codec.read_f64()?".into(),
            BuiltinKind::String => "codec.read_string()?".into(),
            BuiltinKind::UString => "codec.read_ustring()?".into(),
            BuiltinKind::Binary => "codec.read_binary()?".into(),
        },
        DataType::Alias { target, .. } => decode_expr(ctx, *target, depth),
        DataType::Enum(e) => format!(
            "{}::from_wire(codec.read_i32()?)?",
            super::mangle_reserved(&e.name, RESERVED)
        ),
        DataType::List { element } => {
            let count = format!("count{}", depth);
            let items = format!("items{}", depth);
            format!(
                "{{\n    let {count} = codec.start_read_list()? as usize;\n    let mut {items} = Vec::new();\n    for _ in 0..{count} {{\n        {items}.push({elem});\n    }}\n    {items}\n}}",
                count = count,
                items = items,
                elem = decode_expr(ctx, *element, depth + 1),
            )
        }
        DataType::Array { element, count } => {
            let items = format!("items{}", depth);
            format!(
                "{{\n    let mut {items} = Vec::new();\n    for _ in 0..{count} {{\n        {items}.push({elem});\n    }}\n    {items}\n}}",
                items = items,
                count = count,
                elem = decode_expr(ctx, *element, depth + 1),
            )
        }
        DataType::Struct(s) => format!("read_{}(codec)?", snake(&s.name)),
        DataType::Union(u) => format!("read_{}(codec)?", snake(&u.name)),
        DataType::FunctionType(_) => "codec.read_callback()?".into(),
        DataType::Void => "()".into(),
    }
}

/// Iterating `&Vec<T>` yields `&T`; the snippets expect a place
/// expression of the element type.
fn deref(_ctx: &GenContext<'_>, _element: TypeRef, item: &str) -> String {
    format!("(*{})", item)
}

/// Encode statements for one member in struct/parameter context, covering
/// `@nullable` and `@length`-rewritten binaries.
fn member_encode(ctx: &GenContext<'_>, member: &StructMember, expr: &str, depth: usize) -> String {
    if ctx.nullable(member) {
        return format!(
            "match &{expr} {{\n    Some(value) => {{\n        codec.write_null_flag(true)?;\n{body}\n    }}\n    None => codec.write_null_flag(false)?,\n}}",
            expr = expr,
            body = indent(&member_encode_inner(ctx, member, "(*value)", depth), 2),
        );
    }
    member_encode_inner(ctx, member, expr, depth)
}

fn member_encode_inner(
    ctx: &GenContext<'_>,
    member: &StructMember,
    expr: &str,
    depth: usize,
) -> String {
    if ctx.binary_as_list(member) {
        // Count travels in the referenced member; only raw bytes here.
        format!("codec.write_bytes(&{})?;", expr)
    } else {
        encode_stmt(ctx, member.ty, expr, depth)
    }
}

/// Decode expression for one member; `length_expr` carries the already
/// decoded `@length` reference when the member is a rewritten binary.
fn member_decode(
    ctx: &GenContext<'_>,
    member: &StructMember,
    length_expr: Option<&str>,
    depth: usize,
) -> String {
    let inner = match (ctx.binary_as_list(member), length_expr) {
        (true, Some(length)) => format!("codec.read_bytes({} as usize)?", length),
        _ => decode_expr(ctx, member.ty, depth),
    };
    if ctx.nullable(member) {
        format!(
            "if codec.read_null_flag()? {{\n    Some({})\n}} else {{\n    None\n}}",
            inner
        )
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
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
            prev_lower = false;
        } else {
            prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
            out.push(ch);
        }
    }
    out
}

fn camel(name: &str) -> String {
    let mut out = String::new();
    let mut upper_next = true;
    for ch in name.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Data maps
// ---------------------------------------------------------------------------

fn consts_data(ctx: &GenContext<'_>) -> Vec<DataValue> {
    ctx.program
        .consts
        .iter()
        .map(|c| {
            let mut map = DataMap::new();
            map.set("name", name_of(ctx, &c.name, c).to_uppercase());
            let (ty, value) = match &c.value {
                crate::token::Value::Integer { value, .. } => {
                    // Enum-typed constants surface as their wire integer.
                    let true_ty = ctx.program.types.true_type(c.ty);
                    let ty = if matches!(ctx.program.types.get(true_ty), DataType::Enum(_)) {
                        "i32".to_string()
                    } else {
                        type_name(ctx, c.ty)
                    };
                    (ty, value.to_string())
                }
                crate::token::Value::Float(value) => {
                    (type_name(ctx, c.ty), format!("{:?}", value))
                }
                crate::token::Value::String(value) => {
                    ("&str".to_string(), format!("{:?}", value))
                }
            };
            map.set("type", ty);
            map.set("value", value);
            DataValue::Map(map)
        })
        .collect()
}

/// Definitions plus codec helpers for every named type, in declaration
/// order.
fn types_data(ctx: &GenContext<'_>) -> Vec<DataValue> {
    let mut rendered = Vec::new();
    for &decl in &ctx.program.type_decls {
        let decl = super::is_collapsed_alias(ctx.program, decl).unwrap_or(decl);
        let code = match ctx.program.types.get(decl) {
            DataType::Enum(e) if !e.name.is_empty() => {
                if ctx.is_external(e) {
                    continue;
                }
                enum_code(ctx, e)
            }
            DataType::Struct(s) if !s.name.is_empty() => {
                if ctx.is_external(s) {
                    continue;
                }
                struct_code(ctx, s)
            }
            DataType::Union(u) if !u.name.is_empty() => {
                if ctx.is_external(u) {
                    continue;
                }
                union_code(ctx, u)
            }
            DataType::Alias { name, target } => {
                format!(
                    "pub type {} = {};\n",
                    super::mangle_reserved(name, RESERVED),
                    type_name(ctx, *target)
                )
            }
            DataType::FunctionType(f) => callback_code(ctx, f),
            _ => continue,
        };
        let mut map = DataMap::new();
        map.set("code", code);
        rendered.push(DataValue::Map(map));
    }
    rendered
}

fn enum_code(ctx: &GenContext<'_>, e: &EnumType) -> String {
    let name = name_of(ctx, &e.name, e);
    let mut out = String::new();
    let _ = writeln!(out, "#[derive(Debug, Clone, Copy, PartialEq, Eq)]");
    let _ = writeln!(out, "#[repr(i32)]");
    let _ = writeln!(out, "pub enum {} {{", name);
    for member in &e.members {
        let _ = writeln!(out, "    {} = {},", camel(&member.name), member.value);
    }
    let _ = writeln!(out, "}}");
    let _ = writeln!(out);
    let _ = writeln!(out, "impl {} {{", name);
    let _ = writeln!(out, "    pub fn from_wire(value: i32) -> ErpcResult<Self> {{");
    let _ = writeln!(out, "        match value {{");
    for member in &e.members {
        let _ = writeln!(
            out,
            "            {} => Ok({}::{}),",
            member.value,
            name,
            camel(&member.name)
        );
    }
    let _ = writeln!(out, "            _ => Err(ErpcStatus::ProtocolError),");
    let _ = writeln!(out, "        }}");
    let _ = writeln!(out, "    }}");
    let _ = writeln!(out, "}}");
    let _ = writeln!(out);
    if let Some(first) = e.members.first() {
        let _ = writeln!(out, "impl Default for {} {{", name);
        let _ = writeln!(out, "    fn default() -> Self {{");
        let _ = writeln!(out, "        {}::{}", name, camel(&first.name));
        let _ = writeln!(out, "    }}");
        let _ = writeln!(out, "}}");
    }
    out
}

fn struct_code(ctx: &GenContext<'_>, s: &StructType) -> String {
    let name = name_of(ctx, &s.name, s);
    let fn_name = snake(&s.name);
    let mut out = String::new();

    let _ = writeln!(out, "#[derive(Debug, Clone, Default, PartialEq)]");
    let _ = writeln!(out, "pub struct {} {{", name);
    for member in &s.members {
        let _ = writeln!(
            out,
            "    pub {}: {},",
            super::mangle_reserved(&member.name, RESERVED),
            member_type(ctx, member)
        );
    }
    let _ = writeln!(out, "}}");
    let _ = writeln!(out);

    let _ = writeln!(
        out,
        "pub fn write_{}(codec: &mut BasicCodec, value: &{}) -> ErpcResult<()> {{",
        fn_name, name
    );
    for member in wire_order(ctx, &s.members) {
        let field = format!(
            "value.{}",
            super::mangle_reserved(&member.name, RESERVED)
        );
        let _ = writeln!(out, "{}", indent(&member_encode(ctx, member, &field, 0), 1));
    }
    let _ = writeln!(out, "    Ok(())");
    let _ = writeln!(out, "}}");
    let _ = writeln!(out);

    let _ = writeln!(
        out,
        "pub fn read_{}(codec: &mut BasicCodec) -> ErpcResult<{}> {{",
        fn_name, name
    );
    for member in wire_order(ctx, &s.members) {
        let length = ctx
            .length_ref(member)
            .map(|target| format!("local_{}", target));
        let _ = writeln!(
            out,
            "    let local_{} = {};",
            member.name,
            member_decode(ctx, member, length.as_deref(), 0)
        );
    }
    let _ = writeln!(out, "    Ok({} {{", name);
    for member in &s.members {
        let _ = writeln!(
            out,
            "        {}: local_{},",
            super::mangle_reserved(&member.name, RESERVED),
            member.name
        );
    }
    let _ = writeln!(out, "    }})");
    let _ = writeln!(out, "}}");
    out
}

fn union_code(ctx: &GenContext<'_>, u: &UnionType) -> String {
    let name = name_of(ctx, &u.name, u);
    let fn_name = snake(&u.name);
    let mut out = String::new();

    let _ = writeln!(out, "#[derive(Debug, Clone, PartialEq)]");
    let _ = writeln!(out, "pub enum {} {{", name);
    for case in &u.cases {
        let variant = camel(&case.labels[0].ident());
        if case.member_names.is_empty() {
            let _ = writeln!(out, "    {},", variant);
        } else {
            let _ = write!(out, "    {} {{", variant);
            for member_name in &case.member_names {
                let member = u.member(member_name).expect("deduplicated member");
                let _ = write!(
                    out,
                    " {}: {},",
                    super::mangle_reserved(member_name, RESERVED),
                    member_type(ctx, member)
                );
            }
            let _ = writeln!(out, " }},");
        }
    }
    let _ = writeln!(out, "}}");
    let _ = writeln!(out);

    if let Some(first) = u.cases.first() {
        let _ = writeln!(out, "impl Default for {} {{", name);
        let _ = writeln!(out, "    fn default() -> Self {{");
        if first.member_names.is_empty() {
            let _ = writeln!(out, "        {}::{}", name, camel(&first.labels[0].ident()));
        } else {
            let _ = write!(out, "        {}::{} {{", name, camel(&first.labels[0].ident()));
            for member_name in &first.member_names {
                let _ = write!(
                    out,
                    " {}: Default::default(),",
                    super::mangle_reserved(member_name, RESERVED)
                );
            }
            let _ = writeln!(out, " }}");
        }
        let _ = writeln!(out, "    }}");
        let _ = writeln!(out, "}}");
        let _ = writeln!(out);
    }

    // Encode: discriminator byte, then the selected branch as a struct.
    let _ = writeln!(
        out,
        "pub fn write_{}(codec: &mut BasicCodec, value: &{}) -> ErpcResult<()> {{",
        fn_name, name
    );
    let _ = writeln!(out, "    match value {{");
    for case in &u.cases {
        let variant = camel(&case.labels[0].ident());
        let discriminator = case.labels[0].value();
        if case.member_names.is_empty() {
            let _ = writeln!(out, "        {}::{} => {{", name, variant);
            match discriminator {
                Some(value) => {
                    let _ = writeln!(out, "            codec.start_write_union({})?;", value);
                }
                None => {
                    // The default label encodes no payload.
                    let _ = writeln!(out, "            codec.start_write_union(255)?;");
                }
            }
            let _ = writeln!(out, "        }}");
        } else {
            let fields: Vec<String> = case
                .member_names
                .iter()
                .map(|n| super::mangle_reserved(n, RESERVED))
                .collect();
            let _ = writeln!(
                out,
                "        {}::{} {{ {} }} => {{",
                name,
                variant,
                fields.join(", ")
            );
            let _ = writeln!(
                out,
                "            codec.start_write_union({})?;",
                discriminator.unwrap_or(255)
            );
            for member_name in &case.member_names {
                let member = u.member(member_name).expect("deduplicated member");
                let field = super::mangle_reserved(member_name, RESERVED);
                // Union branches are self-contained: a binary member keeps
                // its own length prefix even under a cross-scope @length.
                let _ = writeln!(
                    out,
                    "{}",
                    indent(&encode_stmt(ctx, member.ty, &format!("(*{})", field), 0), 3)
                );
            }
            let _ = writeln!(out, "        }}");
        }
    }
    let _ = writeln!(out, "    }}");
    let _ = writeln!(out, "    Ok(())");
    let _ = writeln!(out, "}}");
    let _ = writeln!(out);

    // Decode: symmetric.
    let _ = writeln!(
        out,
        "pub fn read_{}(codec: &mut BasicCodec) -> ErpcResult<{}> {{",
        fn_name, name
    );
    let _ = writeln!(out, "    let discriminator = codec.start_read_union()?;");
    let _ = writeln!(out, "    match i64::from(discriminator) {{");
    for case in &u.cases {
        let variant = camel(&case.labels[0].ident());
        let values: Vec<String> = case
            .labels
            .iter()
            .filter_map(CaseLabel::value)
            .map(|v| v.to_string())
            .collect();
        let pattern = if values.is_empty() {
            "_".to_string()
        } else {
            values.join(" | ")
        };
        if case.member_names.is_empty() {
            let _ = writeln!(out, "        {} => Ok({}::{}),", pattern, name, variant);
        } else {
            let _ = writeln!(out, "        {} => {{", pattern);
            for member_name in &case.member_names {
                let member = u.member(member_name).expect("deduplicated member");
                let _ = writeln!(
                    out,
                    "            let {} = {};",
                    super::mangle_reserved(member_name, RESERVED),
                    decode_expr(ctx, member.ty, 0)
                );
            }
            let fields: Vec<String> = case
                .member_names
                .iter()
                .map(|n| super::mangle_reserved(n, RESERVED))
                .collect();
            let _ = writeln!(
                out,
                "            Ok({}::{} {{ {} }})",
                name,
                variant,
                fields.join(", ")
            );
            let _ = writeln!(out, "        }}");
        }
    }
    if !u.cases.iter().any(|c| c.labels.contains(&CaseLabel::Default)) {
        let _ = writeln!(out, "        _ => Err(ErpcStatus::ProtocolError),");
    }
    let _ = writeln!(out, "    }}");
    let _ = writeln!(out, "}}");
    out
}

/// Callback types surface as one-byte indexes plus named constants for
/// the registered concrete callbacks, in declaration order.
fn callback_code(_ctx: &GenContext<'_>, f: &crate::types::FunctionType) -> String {
    let name = super::mangle_reserved(&f.name, RESERVED);
    let mut out = String::new();
    let _ = writeln!(out, "pub type {} = u8;", name);
    for (index, callback) in f.callbacks.iter().enumerate() {
        let _ = writeln!(
            out,
            "pub const {}_{}: {} = {};",
            snake(&f.name).to_uppercase(),
            snake(callback).to_uppercase(),
            name,
            index
        );
    }
    out
}

// ---------------------------------------------------------------------------
// Interfaces
// ---------------------------------------------------------------------------

fn interfaces_data(ctx: &GenContext<'_>) -> Vec<DataValue> {
    ctx.program
        .interfaces
        .iter()
        .map(|interface| {
            let mut map = DataMap::new();
            let trait_name = camel(&name_of(ctx, &interface.name, interface));
            map.set("name", trait_name.as_str());
            map.set("snakeName", snake(&interface.name));
            map.set("serviceIdConst", format!("{}_SERVICE_ID", snake(&interface.name).to_uppercase()));
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
    let fn_name = snake(&name_of(ctx, &function.name, function));
    map.set("name", fn_name.as_str());
    map.set("id", i64::from(function.id));
    map.set("oneway", function.oneway);

    let types = &ctx.program.types;
    let has_return = !matches!(types.get(function.return_type), DataType::Void);
    let return_type = if has_return {
        type_name(ctx, function.return_type)
    } else {
        "()".to_string()
    };
    map.set("returnType", return_type.as_str());

    // Trait/client signature.
    let mut signature_args = Vec::new();
    for param in &function.params {
        let param_name = super::mangle_reserved(&param.name, RESERVED);
        let ty = member_type(ctx, param);
        let arg = match param.direction {
            Direction::In => {
                if is_copy_type(ctx, param.ty) && !ctx.nullable(param) {
                    format!("{}: {}", param_name, ty)
                } else {
                    format!("{}: &{}", param_name, ty)
                }
            }
            Direction::Out | Direction::Inout => format!("{}: &mut {}", param_name, ty),
            Direction::Return => continue,
        };
        signature_args.push(arg);
    }
    map.set(
        "proto",
        format!(
            "fn {}(&self{}{}) -> ErpcResult<{}>",
            fn_name,
            if signature_args.is_empty() { "" } else { ", " },
            signature_args.join(", "),
            return_type
        ),
    );
    map.set(
        "callArgs",
        function
            .params
            .iter()
            .filter(|p| p.direction != Direction::Return)
            .map(|p| {
                let name = super::mangle_reserved(&p.name, RESERVED);
                match p.direction {
                    Direction::Out | Direction::Inout => format!("&mut {}", name),
                    _ => name,
                }
            })
            .collect::<Vec<_>>()
            .join(", "),
    );

    // Client: encode in/inout, decode inout/out and the return value.
    let sendable: Vec<&StructMember> = function
        .params
        .iter()
        .filter(|p| matches!(p.direction, Direction::In | Direction::Inout))
        .collect();
    let mut encode = String::new();
    for param in ordered_refs(ctx, &sendable) {
        let name = super::mangle_reserved(&param.name, RESERVED);
        let expr = if param.direction == Direction::Inout {
            format!("(*{})", name)
        } else if is_copy_type(ctx, param.ty) && !ctx.nullable(param) {
            name.clone()
        } else {
            format!("(*{})", name)
        };
        let _ = writeln!(encode, "{}", member_encode(ctx, param, &expr, 0));
    }
    map.set("clientEncode", encode.trim_end().to_string());

    let receivable: Vec<&StructMember> = function
        .params
        .iter()
        .filter(|p| matches!(p.direction, Direction::Inout | Direction::Out))
        .collect();
    let mut decode = String::new();
    for param in ordered_refs(ctx, &receivable) {
        let name = super::mangle_reserved(&param.name, RESERVED);
        let length = ctx
            .length_ref(param)
            .map(|target| length_param_expr(ctx, function, &target));
        let _ = writeln!(
            decode,
            "*{} = {};",
            name,
            member_decode(ctx, param, length.as_deref(), 0)
        );
    }
    if has_return {
        let _ = writeln!(
            decode,
            "let _result = {};",
            decode_expr(ctx, function.return_type, 0)
        );
    }
    map.set("clientDecode", decode.trim_end().to_string());
    map.set(
        "clientResult",
        if has_return { "_result" } else { "()" }.to_string(),
    );

    // Server: decode arguments, invoke, encode the return path.
    let mut server_decode = String::new();
    for param in &function.params {
        if param.direction == Direction::Return {
            continue;
        }
        let name = super::mangle_reserved(&param.name, RESERVED);
        match param.direction {
            Direction::In | Direction::Inout => {}
            Direction::Out => {
                let _ = writeln!(
                    server_decode,
                    "let mut {}: {} = Default::default();",
                    name,
                    member_type(ctx, param)
                );
                continue;
            }
            Direction::Return => unreachable!(),
        }
    }
    for param in ordered_refs(ctx, &sendable) {
        let name = super::mangle_reserved(&param.name, RESERVED);
        let prefix = if param.direction == Direction::Inout {
            "let mut "
        } else {
            "let "
        };
        let length = ctx
            .length_ref(param)
            .map(|target| super::mangle_reserved(&target, RESERVED));
        let _ = writeln!(
            server_decode,
            "{}{} = {};",
            prefix,
            name,
            member_decode(ctx, param, length.as_deref(), 0)
        );
    }
    map.set("serverDecode", server_decode.trim_end().to_string());

    let mut server_args = Vec::new();
    for param in &function.params {
        if param.direction == Direction::Return {
            continue;
        }
        let name = super::mangle_reserved(&param.name, RESERVED);
        let arg = match param.direction {
            Direction::In => {
                if is_copy_type(ctx, param.ty) && !ctx.nullable(param) {
                    name
                } else {
                    format!("&{}", name)
                }
            }
            _ => format!("&mut {}", name),
        };
        server_args.push(arg);
    }
    map.set("serverCallArgs", server_args.join(", "));
    map.set("hasReturn", has_return);

    let mut server_encode = String::new();
    for param in ordered_refs(ctx, &receivable) {
        let name = super::mangle_reserved(&param.name, RESERVED);
        let _ = writeln!(server_encode, "{}", member_encode(ctx, param, &name, 0));
    }
    if has_return {
        // `_result` cannot collide with parameter bindings.
        let _ = writeln!(
            server_encode,
            "{}",
            encode_stmt(ctx, function.return_type, "_result", 0)
        );
    }
    map.set("serverEncode", server_encode.trim_end().to_string());

    DataValue::Map(map)
}

/// Place expression for a `@length` target inside a client reply decode:
/// out/inout parameters arrive as `&mut` bindings and need a deref.
fn length_param_expr(ctx: &GenContext<'_>, function: &Function, target: &str) -> String {
    let name = super::mangle_reserved(target, RESERVED);
    let by_ref = function.params.iter().any(|p| {
        p.name == target
            && (matches!(p.direction, Direction::Out | Direction::Inout)
                || !is_copy_type(ctx, p.ty))
    });
    if by_ref {
        format!("(*{})", name)
    } else {
        name
    }
}

/// Wire order over a borrowed parameter subset.
fn ordered_refs<'m>(
    ctx: &GenContext<'_>,
    members: &[&'m StructMember],
) -> Vec<&'m StructMember> {
    let owned: Vec<StructMember> = members.iter().map(|m| (*m).clone()).collect();
    let order: Vec<usize> = {
        let ordered = wire_order(ctx, &owned);
        ordered
            .iter()
            .map(|m| owned.iter().position(|o| o.name == m.name).unwrap_or(0))
            .collect()
    };
    order.into_iter().map(|i| members[i]).collect()
}
