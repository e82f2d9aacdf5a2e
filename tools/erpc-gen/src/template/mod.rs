// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! String-template engine driving the code emitters.
//!
//! Syntax:
//!
//! - `{$path}` interpolates a dotted lookup; `{$name(args)}` calls a
//!   subtemplate; `{$>x}` drops the following newline when the value is
//!   empty
//! - `{% if e %}...{% elif e %}...{% else %}...{% endif %}`
//! - `{% for v in seq %}...{% endfor %}` with `loop.index`, `loop.index0`,
//!   `loop.first`, `loop.last`, `loop.even`, `loop.odd`, `loop.count`
//! - `{% def name(p, q) %}...{% enddef %}` stores a subtemplate into the
//!   data map
//! - `{% set path = expr %}`
//! - `--` comments to end of line inside statement tags (never inside
//!   string literals)
//! - a trailing `>` on a tag elides the newline that follows it
//!
//! Expressions support `and`/`or`/`not`, comparisons, integer arithmetic
//! (division and modulus by zero evaluate to zero), string concatenation
//! with `&`, parentheses, literals, and the builtin calls `count`,
//! `empty`, `defined`, `upper`, `lower`, `capitalize`, `str`, `int`,
//! `addIndent`, and `dump`.

mod value;

pub use value::{DataMap, DataValue, TemplateDef};

use std::fmt;
use std::rc::Rc;

/// Template expansion failure, with the 1-based source line of the tag.
#[derive(Debug)]
pub struct TemplateError {
    pub line: usize,
    pub reason: String,
}

impl TemplateError {
    fn new(line: usize, reason: impl Into<String>) -> Self {
        TemplateError {
            line,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.reason)
    }
}

impl std::error::Error for TemplateError {}

type TplResult<T> = Result<T, TemplateError>;

/// Render `text` against `data`.
pub fn render(text: &str, data: &mut DataMap) -> TplResult<String> {
    let nodes = parse_template(text)?;
    let mut scope = Scope {
        frames: vec![std::mem::take(data)],
    };
    let result = render_nodes(&nodes, &mut scope);
    *data = scope.frames.swap_remove(0);
    result
}

/// Parse template text for storage in a data map (emitter subtemplates).
pub fn make_template(text: &str, params: &[&str]) -> TplResult<DataValue> {
    let nodes = parse_template(text)?;
    Ok(DataValue::Template(TemplateDef {
        nodes: Rc::new(nodes),
        params: params.iter().map(|p| p.to_string()).collect(),
    }))
}

// ---------------------------------------------------------------------------
// Parsed representation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Node {
    Text(String),
    Var {
        expr: Expr,
        elide_if_empty: bool,
        line: usize,
    },
    If {
        branches: Vec<(Option<Expr>, Vec<Node>)>,
    },
    For {
        var: String,
        seq: Expr,
        body: Vec<Node>,
        line: usize,
    },
    Def {
        name: String,
        params: Vec<String>,
        body: Rc<Vec<Node>>,
    },
    Set {
        path: String,
        expr: Expr,
        line: usize,
    },
}

#[derive(Debug, Clone)]
pub enum Expr {
    Int(i64),
    Str(String),
    Bool(bool),
    Path(String),
    Call { name: String, args: Vec<Expr> },
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Concat,
    Mul,
    Div,
    Mod,
}

// ---------------------------------------------------------------------------
// Tag splitting
// ---------------------------------------------------------------------------

enum Segment {
    Text(String),
    Var { content: String, line: usize },
    Stmt { content: String, line: usize },
}

/// Split raw text into literal runs and tags, quote-aware so braces inside
/// string arguments do not close a tag.
fn split_segments(text: &str) -> TplResult<Vec<Segment>> {
    let bytes = text.as_bytes();
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut line = 1usize;
    let mut i = 0usize;

    while i < bytes.len() {
        if bytes[i] == b'{' && i + 1 < bytes.len() && (bytes[i + 1] == b'$' || bytes[i + 1] == b'%')
        {
            let is_var = bytes[i + 1] == b'$';
            if !literal.is_empty() {
                segments.push(Segment::Text(std::mem::take(&mut literal)));
            }
            let tag_line = line;
            let close: &[u8] = if is_var { b"}" } else { b"%}" };
            let mut j = i + 2;
            let mut in_string: Option<u8> = None;
            let content_start = j;
            loop {
                if j >= bytes.len() {
                    return Err(TemplateError::new(tag_line, "unterminated tag"));
                }
                let b = bytes[j];
                if b == b'\n' {
                    line += 1;
                }
                match in_string {
                    Some(quote) => {
                        if b == b'\\' {
                            j += 1;
                        } else if b == quote {
                            in_string = None;
                        }
                    }
                    None => {
                        if b == b'"' || b == b'\'' {
                            in_string = Some(b);
                        } else if bytes[j..].starts_with(close) {
                            break;
                        }
                    }
                }
                j += 1;
            }
            let content = text[content_start..j].to_string();
            segments.push(if is_var {
                Segment::Var {
                    content,
                    line: tag_line,
                }
            } else {
                Segment::Stmt {
                    content,
                    line: tag_line,
                }
            });
            i = j + close.len();
        } else {
            if bytes[i] == b'\n' {
                line += 1;
            }
            literal.push(bytes[i] as char);
            i += 1;
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Text(literal));
    }
    Ok(segments)
}

/// Strip `-- ...` comments from statement content (to end of line, never
/// inside a string literal).
fn strip_comments(content: &str) -> String {
    let bytes = content.as_bytes();
    let mut out = String::new();
    let mut in_string: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match in_string {
            Some(quote) => {
                out.push(b as char);
                if b == b'\\' && i + 1 < bytes.len() {
                    out.push(bytes[i + 1] as char);
                    i += 1;
                } else if b == quote {
                    in_string = None;
                }
            }
            None => {
                if b == b'"' || b == b'\'' {
                    in_string = Some(b);
                    out.push(b as char);
                } else if b == b'-' && i + 1 < bytes.len() && bytes[i + 1] == b'-' {
                    while i < bytes.len() && bytes[i] != b'\n' {
                        i += 1;
                    }
                    continue;
                } else {
                    out.push(b as char);
                }
            }
        }
        i += 1;
    }
    out
}

// ---------------------------------------------------------------------------
// Statement parsing
// ---------------------------------------------------------------------------

fn parse_template(text: &str) -> TplResult<Vec<Node>> {
    let segments = split_segments(text)?;
    let mut stream = segments.into_iter().peekable();
    let nodes = parse_block(&mut stream, &mut Vec::new(), None)?;
    Ok(nodes)
}

/// Parse segments until one of `terminators` (an `end*`/`elif`/`else`
/// statement) or end of input. The terminating statement is pushed to
/// `terminator_out`.
fn parse_block(
    stream: &mut std::iter::Peekable<std::vec::IntoIter<Segment>>,
    terminator_out: &mut Vec<(String, usize)>,
    terminators: Option<&[&str]>,
) -> TplResult<Vec<Node>> {
    let mut nodes = Vec::new();

    while let Some(segment) = stream.next() {
        match segment {
            Segment::Text(text) => {
                if !text.is_empty() {
                    nodes.push(Node::Text(text));
                }
            }
            Segment::Var { content, line } => {
                let mut body = content.trim().to_string();
                let mut elide_if_empty = false;
                if let Some(stripped) = body.strip_prefix('>') {
                    elide_if_empty = true;
                    body = stripped.trim_start().to_string();
                }
                if let Some(stripped) = body.strip_suffix('>') {
                    // Trailing `>` is whitespace control, not comparison.
                    body = stripped.trim_end().to_string();
                    elide_next_text_newline(stream);
                }
                let expr = ExprParser::new(&body, line)?.parse_full()?;
                nodes.push(Node::Var {
                    expr,
                    elide_if_empty,
                    line,
                });
            }
            Segment::Stmt { content, line } => {
                let mut body = strip_comments(&content).trim().to_string();
                if let Some(stripped) = body.strip_suffix('>') {
                    body = stripped.trim_end().to_string();
                    // The newline to drop directly follows the opening tag,
                    // so strip it before any nested block consumes it.
                    elide_next_text_newline(stream);
                }
                let (keyword, rest) = match body.split_once(char::is_whitespace) {
                    Some((keyword, rest)) => (keyword, rest.trim()),
                    None => (body.as_str(), ""),
                };

                if let Some(terminators) = terminators {
                    if terminators.contains(&keyword) {
                        terminator_out.push((body.clone(), line));
                        return Ok(nodes);
                    }
                }

                match keyword {
                    "if" => {
                        let node = parse_if(rest, line, stream)?;
                        nodes.push(node);
                    }
                    "for" => {
                        let node = parse_for(rest, line, stream)?;
                        nodes.push(node);
                    }
                    "def" => {
                        let node = parse_def(rest, line, stream)?;
                        nodes.push(node);
                    }
                    "set" => {
                        let (path, expr) = rest.split_once('=').ok_or_else(|| {
                            TemplateError::new(line, "set requires 'path = expression'")
                        })?;
                        let expr = ExprParser::new(expr.trim(), line)?.parse_full()?;
                        nodes.push(Node::Set {
                            path: path.trim().to_string(),
                            expr,
                            line,
                        });
                    }
                    "" => {}
                    other => {
                        return Err(TemplateError::new(
                            line,
                            format!("unknown statement '{}'", other),
                        ))
                    }
                }
            }
        }
    }

    if terminators.is_some() {
        return Err(TemplateError::new(0, "unterminated block"));
    }
    Ok(nodes)
}

fn elide_next_text_newline(stream: &mut std::iter::Peekable<std::vec::IntoIter<Segment>>) {
    if let Some(Segment::Text(text)) = stream.peek_mut() {
        if let Some(stripped) = text.strip_prefix("\r\n") {
            *text = stripped.to_string();
        } else if let Some(stripped) = text.strip_prefix('\n') {
            *text = stripped.to_string();
        }
    }
}

fn parse_if(
    condition: &str,
    line: usize,
    stream: &mut std::iter::Peekable<std::vec::IntoIter<Segment>>,
) -> TplResult<Node> {
    let mut branches = Vec::new();
    let mut current_condition = Some(ExprParser::new(condition, line)?.parse_full()?);
    loop {
        let mut terminator = Vec::new();
        let body = parse_block(stream, &mut terminator, Some(&["elif", "else", "endif"]))?;
        let (term, term_line) = terminator
            .pop()
            .ok_or_else(|| TemplateError::new(line, "missing endif"))?;
        branches.push((current_condition.take(), body));
        let (keyword, rest) = term
            .split_once(char::is_whitespace)
            .map(|(k, r)| (k, r.trim()))
            .unwrap_or((term.as_str(), ""));
        match keyword {
            "endif" => return Ok(Node::If { branches }),
            "elif" => {
                current_condition = Some(ExprParser::new(rest, term_line)?.parse_full()?);
            }
            "else" => {
                current_condition = None;
            }
            _ => unreachable!(),
        }
    }
}

fn parse_for(
    header: &str,
    line: usize,
    stream: &mut std::iter::Peekable<std::vec::IntoIter<Segment>>,
) -> TplResult<Node> {
    let (var, seq) = header
        .split_once(" in ")
        .ok_or_else(|| TemplateError::new(line, "for requires 'var in sequence'"))?;
    let mut terminator = Vec::new();
    let body = parse_block(stream, &mut terminator, Some(&["endfor"]))?;
    if terminator.is_empty() {
        return Err(TemplateError::new(line, "missing endfor"));
    }
    Ok(Node::For {
        var: var.trim().to_string(),
        seq: ExprParser::new(seq.trim(), line)?.parse_full()?,
        body,
        line,
    })
}

fn parse_def(
    header: &str,
    line: usize,
    stream: &mut std::iter::Peekable<std::vec::IntoIter<Segment>>,
) -> TplResult<Node> {
    let (name, params) = match header.split_once('(') {
        Some((name, rest)) => {
            let rest = rest
                .strip_suffix(')')
                .ok_or_else(|| TemplateError::new(line, "missing ')' in def"))?;
            let params = rest
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
            (name.trim().to_string(), params)
        }
        None => (header.trim().to_string(), Vec::new()),
    };
    let mut terminator = Vec::new();
    let body = parse_block(stream, &mut terminator, Some(&["enddef"]))?;
    if terminator.is_empty() {
        return Err(TemplateError::new(line, "missing enddef"));
    }
    Ok(Node::Def {
        name,
        params,
        body: Rc::new(body),
    })
}

// ---------------------------------------------------------------------------
// Expression parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum ETok {
    Path(String),
    Int(i64),
    Str(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

struct ExprParser {
    tokens: Vec<ETok>,
    pos: usize,
    line: usize,
}

impl ExprParser {
    fn new(text: &str, line: usize) -> TplResult<Self> {
        Ok(ExprParser {
            tokens: Self::scan(text, line)?,
            pos: 0,
            line,
        })
    }

    fn scan(text: &str, line: usize) -> TplResult<Vec<ETok>> {
        let bytes = text.as_bytes();
        let mut tokens = Vec::new();
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            match b {
                b' ' | b'\t' | b'\r' | b'\n' => i += 1,
                b'(' => {
                    tokens.push(ETok::LParen);
                    i += 1;
                }
                b')' => {
                    tokens.push(ETok::RParen);
                    i += 1;
                }
                b',' => {
                    tokens.push(ETok::Comma);
                    i += 1;
                }
                b'"' | b'\'' => {
                    let quote = b;
                    let mut out = String::new();
                    i += 1;
                    loop {
                        if i >= bytes.len() {
                            return Err(TemplateError::new(line, "unterminated string"));
                        }
                        let c = bytes[i];
                        if c == quote {
                            i += 1;
                            break;
                        }
                        if c == b'\\' && i + 1 < bytes.len() {
                            out.push(match bytes[i + 1] {
                                b'n' => '\n',
                                b't' => '\t',
                                other => other as char,
                            });
                            i += 2;
                            continue;
                        }
                        out.push(c as char);
                        i += 1;
                    }
                    tokens.push(ETok::Str(out));
                }
                b'0'..=b'9' => {
                    let start = i;
                    while i < bytes.len() && bytes[i].is_ascii_digit() {
                        i += 1;
                    }
                    let value = text[start..i].parse::<i64>().map_err(|_| {
                        TemplateError::new(line, "integer literal out of range")
                    })?;
                    tokens.push(ETok::Int(value));
                }
                b'=' if i + 1 < bytes.len() && bytes[i + 1] == b'=' => {
                    tokens.push(ETok::Op("=="));
                    i += 2;
                }
                b'!' if i + 1 < bytes.len() && bytes[i + 1] == b'=' => {
                    tokens.push(ETok::Op("!="));
                    i += 2;
                }
                b'<' => {
                    if i + 1 < bytes.len() && bytes[i + 1] == b'=' {
                        tokens.push(ETok::Op("<="));
                        i += 2;
                    } else {
                        tokens.push(ETok::Op("<"));
                        i += 1;
                    }
                }
                b'>' => {
                    if i + 1 < bytes.len() && bytes[i + 1] == b'=' {
                        tokens.push(ETok::Op(">="));
                        i += 2;
                    } else {
                        tokens.push(ETok::Op(">"));
                        i += 1;
                    }
                }
                b'+' => {
                    tokens.push(ETok::Op("+"));
                    i += 1;
                }
                b'-' => {
                    tokens.push(ETok::Op("-"));
                    i += 1;
                }
                b'*' => {
                    tokens.push(ETok::Op("*"));
                    i += 1;
                }
                b'/' => {
                    tokens.push(ETok::Op("/"));
                    i += 1;
                }
                b'%' => {
                    tokens.push(ETok::Op("%"));
                    i += 1;
                }
                b'&' => {
                    tokens.push(ETok::Op("&"));
                    i += 1;
                }
                _ if b.is_ascii_alphabetic() || b == b'_' => {
                    let start = i;
                    while i < bytes.len()
                        && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'.')
                    {
                        i += 1;
                    }
                    let word = &text[start..i];
                    match word {
                        "and" => tokens.push(ETok::Op("and")),
                        "or" => tokens.push(ETok::Op("or")),
                        "not" => tokens.push(ETok::Op("not")),
                        "true" => tokens.push(ETok::Path("true".into())),
                        "false" => tokens.push(ETok::Path("false".into())),
                        _ => tokens.push(ETok::Path(word.to_string())),
                    }
                }
                other => {
                    return Err(TemplateError::new(
                        line,
                        format!("unexpected character '{}' in expression", other as char),
                    ))
                }
            }
        }
        Ok(tokens)
    }

    fn peek(&self) -> Option<&ETok> {
        self.tokens.get(self.pos)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(ETok::Op(o)) if *o == op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_full(mut self) -> TplResult<Expr> {
        if self.tokens.is_empty() {
            return Err(TemplateError::new(self.line, "empty expression"));
        }
        let expr = self.parse_or()?;
        if self.pos != self.tokens.len() {
            return Err(TemplateError::new(self.line, "trailing tokens in expression"));
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> TplResult<Expr> {
        let mut left = self.parse_and()?;
        while self.eat_op("or") {
            let right = self.parse_and()?;
            left = Expr::Binary {
                op: BinOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> TplResult<Expr> {
        let mut left = self.parse_not()?;
        while self.eat_op("and") {
            let right = self.parse_not()?;
            left = Expr::Binary {
                op: BinOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> TplResult<Expr> {
        if self.eat_op("not") {
            Ok(Expr::Not(Box::new(self.parse_not()?)))
        } else {
            self.parse_comparison()
        }
    }

    fn parse_comparison(&mut self) -> TplResult<Expr> {
        let left = self.parse_additive()?;
        for (text, op) in [
            ("==", BinOp::Eq),
            ("!=", BinOp::Ne),
            ("<=", BinOp::Le),
            (">=", BinOp::Ge),
            ("<", BinOp::Lt),
            (">", BinOp::Gt),
        ] {
            if self.eat_op(text) {
                let right = self.parse_additive()?;
                return Ok(Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                });
            }
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> TplResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = if self.eat_op("+") {
                BinOp::Add
            } else if self.eat_op("-") {
                BinOp::Sub
            } else if self.eat_op("&") {
                BinOp::Concat
            } else {
                return Ok(left);
            };
            let right = self.parse_multiplicative()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_multiplicative(&mut self) -> TplResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = if self.eat_op("*") {
                BinOp::Mul
            } else if self.eat_op("/") {
                BinOp::Div
            } else if self.eat_op("%") {
                BinOp::Mod
            } else {
                return Ok(left);
            };
            let right = self.parse_unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_unary(&mut self) -> TplResult<Expr> {
        if self.eat_op("-") {
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> TplResult<Expr> {
        match self.peek().cloned() {
            Some(ETok::Int(value)) => {
                self.pos += 1;
                Ok(Expr::Int(value))
            }
            Some(ETok::Str(value)) => {
                self.pos += 1;
                Ok(Expr::Str(value))
            }
            Some(ETok::LParen) => {
                self.pos += 1;
                let expr = self.parse_or()?;
                match self.peek() {
                    Some(ETok::RParen) => {
                        self.pos += 1;
                        Ok(expr)
                    }
                    _ => Err(TemplateError::new(self.line, "missing ')'")),
                }
            }
            Some(ETok::Path(path)) => {
                self.pos += 1;
                if path == "true" {
                    return Ok(Expr::Bool(true));
                }
                if path == "false" {
                    return Ok(Expr::Bool(false));
                }
                if matches!(self.peek(), Some(ETok::LParen)) {
                    self.pos += 1;
                    let mut args = Vec::new();
                    if !matches!(self.peek(), Some(ETok::RParen)) {
                        loop {
                            args.push(self.parse_or()?);
                            if matches!(self.peek(), Some(ETok::Comma)) {
                                self.pos += 1;
                                continue;
                            }
                            break;
                        }
                    }
                    match self.peek() {
                        Some(ETok::RParen) => self.pos += 1,
                        _ => return Err(TemplateError::new(self.line, "missing ')' in call")),
                    }
                    Ok(Expr::Call { name: path, args })
                } else {
                    Ok(Expr::Path(path))
                }
            }
            other => Err(TemplateError::new(
                self.line,
                format!("unexpected token {:?} in expression", other),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

struct Scope {
    frames: Vec<DataMap>,
}

impl Scope {
    /// Chained lookup: the head segment resolves in the innermost frame
    /// that has it, the rest of the path walks nested maps.
    fn get(&self, path: &str) -> Option<&DataValue> {
        let head = path.split('.').next()?;
        for frame in self.frames.iter().rev() {
            if frame.has(head) {
                return frame.get_path(path);
            }
        }
        None
    }

    /// Assign into the frame owning the head segment, else create in the
    /// innermost frame.
    fn set(&mut self, path: &str, value: DataValue) {
        let head = match path.split('.').next() {
            Some(head) => head,
            None => return,
        };
        let owner = (0..self.frames.len())
            .rev()
            .find(|&i| self.frames[i].has(head))
            .unwrap_or(self.frames.len() - 1);
        self.frames[owner].set_path(path, value, true);
    }
}

fn render_nodes(nodes: &[Node], scope: &mut Scope) -> TplResult<String> {
    let mut out = String::new();
    let mut pending_elide = false;

    for node in nodes {
        match node {
            Node::Text(text) => {
                if pending_elide {
                    pending_elide = false;
                    if let Some(stripped) = text.strip_prefix("\r\n") {
                        out.push_str(stripped);
                        continue;
                    }
                    if let Some(stripped) = text.strip_prefix('\n') {
                        out.push_str(stripped);
                        continue;
                    }
                }
                out.push_str(text);
            }
            Node::Var {
                expr,
                elide_if_empty,
                line,
            } => {
                pending_elide = false;
                let value = eval(expr, scope, *line)?;
                let text = match &value {
                    DataValue::Template(def) => call_template(def, &[], scope)?,
                    other => other.render(),
                };
                if *elide_if_empty && text.is_empty() {
                    pending_elide = true;
                }
                out.push_str(&text);
            }
            Node::If { branches } => {
                pending_elide = false;
                for (condition, body) in branches {
                    let taken = match condition {
                        Some(expr) => eval(expr, scope, 0)?.is_truthy(),
                        None => true,
                    };
                    if taken {
                        out.push_str(&render_nodes(body, scope)?);
                        break;
                    }
                }
            }
            Node::For {
                var,
                seq,
                body,
                line,
            } => {
                pending_elide = false;
                let items = match eval(seq, scope, *line)? {
                    DataValue::List(items) => items,
                    DataValue::Map(map) => map.iter().map(|(_, v)| v.clone()).collect(),
                    other => {
                        return Err(TemplateError::new(
                            *line,
                            format!("cannot iterate over {}", kind_name(&other)),
                        ))
                    }
                };
                let count = items.len();
                for (index, item) in items.into_iter().enumerate() {
                    let mut frame = DataMap::new();
                    frame.set(var.as_str(), item);
                    let mut loop_map = DataMap::new();
                    loop_map.set("index", (index + 1) as i64);
                    loop_map.set("index0", index as i64);
                    loop_map.set("first", index == 0);
                    loop_map.set("last", index + 1 == count);
                    loop_map.set("odd", (index + 1) % 2 == 1);
                    loop_map.set("even", (index + 1) % 2 == 0);
                    loop_map.set("count", count as i64);
                    frame.set("loop", loop_map);
                    scope.frames.push(frame);
                    let rendered = render_nodes(body, scope);
                    scope.frames.pop();
                    out.push_str(&rendered?);
                }
            }
            Node::Def { name, params, body } => {
                pending_elide = false;
                scope.set(
                    name,
                    DataValue::Template(TemplateDef {
                        nodes: body.clone(),
                        params: params.clone(),
                    }),
                );
            }
            Node::Set { path, expr, line } => {
                pending_elide = false;
                let value = eval(expr, scope, *line)?;
                scope.set(path, value);
            }
        }
    }
    Ok(out)
}

fn call_template(def: &TemplateDef, args: &[DataValue], scope: &mut Scope) -> TplResult<String> {
    let mut frame = DataMap::new();
    for (param, arg) in def.params.iter().zip(args) {
        frame.set(param.as_str(), arg.clone());
    }
    scope.frames.push(frame);
    let result = render_nodes(&def.nodes, scope);
    scope.frames.pop();
    result
}

fn kind_name(value: &DataValue) -> &'static str {
    match value {
        DataValue::Bool(_) => "a bool",
        DataValue::Int(_) => "an int",
        DataValue::Str(_) => "a string",
        DataValue::List(_) => "a list",
        DataValue::Map(_) => "a map",
        DataValue::Template(_) => "a template",
    }
}

fn eval(expr: &Expr, scope: &mut Scope, line: usize) -> TplResult<DataValue> {
    match expr {
        Expr::Int(value) => Ok(DataValue::Int(*value)),
        Expr::Str(value) => Ok(DataValue::Str(value.clone())),
        Expr::Bool(value) => Ok(DataValue::Bool(*value)),
        Expr::Path(path) => scope
            .get(path)
            .cloned()
            .ok_or_else(|| TemplateError::new(line, format!("undefined variable '{}'", path))),
        Expr::Not(inner) => Ok(DataValue::Bool(!eval(inner, scope, line)?.is_truthy())),
        Expr::Neg(inner) => {
            let value = eval(inner, scope, line)?
                .as_int()
                .ok_or_else(|| TemplateError::new(line, "cannot negate a non-integer"))?;
            Ok(DataValue::Int(-value))
        }
        Expr::Call { name, args } => eval_call(name, args, scope, line),
        Expr::Binary { op, left, right } => {
            if *op == BinOp::And {
                let lhs = eval(left, scope, line)?;
                if !lhs.is_truthy() {
                    return Ok(DataValue::Bool(false));
                }
                return Ok(DataValue::Bool(eval(right, scope, line)?.is_truthy()));
            }
            if *op == BinOp::Or {
                let lhs = eval(left, scope, line)?;
                if lhs.is_truthy() {
                    return Ok(DataValue::Bool(true));
                }
                return Ok(DataValue::Bool(eval(right, scope, line)?.is_truthy()));
            }
            let lhs = eval(left, scope, line)?;
            let rhs = eval(right, scope, line)?;
            eval_binary(*op, lhs, rhs, line)
        }
    }
}

fn eval_binary(op: BinOp, lhs: DataValue, rhs: DataValue, line: usize) -> TplResult<DataValue> {
    match op {
        BinOp::Concat => Ok(DataValue::Str(format!("{}{}", lhs.render(), rhs.render()))),
        BinOp::Eq | BinOp::Ne => {
            let equal = match (&lhs, &rhs) {
                (DataValue::Int(a), DataValue::Int(b)) => a == b,
                (DataValue::Bool(a), DataValue::Bool(b)) => a == b,
                _ => lhs.render() == rhs.render(),
            };
            Ok(DataValue::Bool(if op == BinOp::Eq { equal } else { !equal }))
        }
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = match (&lhs, &rhs) {
                (DataValue::Int(a), DataValue::Int(b)) => a.cmp(b),
                _ => lhs.render().cmp(&rhs.render()),
            };
            Ok(DataValue::Bool(match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Le => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
            let a = lhs
                .as_int()
                .ok_or_else(|| TemplateError::new(line, "arithmetic requires integers"))?;
            let b = rhs
                .as_int()
                .ok_or_else(|| TemplateError::new(line, "arithmetic requires integers"))?;
            Ok(DataValue::Int(match op {
                BinOp::Add => a.wrapping_add(b),
                BinOp::Sub => a.wrapping_sub(b),
                BinOp::Mul => a.wrapping_mul(b),
                // Division and modulus by zero evaluate to zero.
                BinOp::Div => {
                    if b == 0 {
                        0
                    } else {
                        a / b
                    }
                }
                _ => {
                    if b == 0 {
                        0
                    } else {
                        a % b
                    }
                }
            }))
        }
        BinOp::And | BinOp::Or => unreachable!("handled with short-circuit"),
    }
}

fn eval_call(name: &str, args: &[Expr], scope: &mut Scope, line: usize) -> TplResult<DataValue> {
    // defined() and empty() inspect presence, not value.
    if name == "defined" {
        return match args {
            [Expr::Path(path)] => Ok(DataValue::Bool(scope.get(path).is_some())),
            _ => Err(TemplateError::new(line, "defined() takes one variable")),
        };
    }
    if name == "empty" {
        return match args {
            [Expr::Path(path)] => Ok(DataValue::Bool(
                scope.get(path).map_or(true, |v| !v.is_truthy()),
            )),
            [expr] => Ok(DataValue::Bool(!eval(expr, scope, line)?.is_truthy())),
            _ => Err(TemplateError::new(line, "empty() takes one argument")),
        };
    }

    // A user-defined subtemplate wins over same-named builtins.
    if let Some(DataValue::Template(def)) = scope.get(name).cloned() {
        let mut values = Vec::new();
        for arg in args {
            values.push(eval(arg, scope, line)?);
        }
        return Ok(DataValue::Str(call_template(&def, &values, scope)?));
    }

    let mut values = Vec::new();
    for arg in args {
        values.push(eval(arg, scope, line)?);
    }
    let arity = |n: usize| -> TplResult<()> {
        if values.len() == n {
            Ok(())
        } else {
            Err(TemplateError::new(
                line,
                format!("{}() takes {} argument(s)", name, n),
            ))
        }
    };

    match name {
        "count" => {
            arity(1)?;
            Ok(DataValue::Int(values[0].count()))
        }
        "upper" => {
            arity(1)?;
            Ok(DataValue::Str(values[0].render().to_uppercase()))
        }
        "lower" => {
            arity(1)?;
            Ok(DataValue::Str(values[0].render().to_lowercase()))
        }
        "capitalize" => {
            arity(1)?;
            let text = values[0].render();
            let mut chars = text.chars();
            Ok(DataValue::Str(match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }))
        }
        "str" => {
            arity(1)?;
            Ok(DataValue::Str(values[0].render()))
        }
        "int" => {
            arity(1)?;
            Ok(DataValue::Int(match &values[0] {
                DataValue::Str(text) => text.trim().parse::<i64>().unwrap_or(0),
                other => other.as_int().unwrap_or(0),
            }))
        }
        "addIndent" => {
            arity(2)?;
            let indent = values[0].render();
            let body = values[1].render();
            let mut out = String::new();
            for (i, line_text) in body.split('\n').enumerate() {
                if i > 0 {
                    out.push('\n');
                }
                if !line_text.is_empty() {
                    out.push_str(&indent);
                }
                out.push_str(line_text);
            }
            Ok(DataValue::Str(out))
        }
        "dump" => {
            arity(1)?;
            Ok(DataValue::Str(values[0].dump(0)))
        }
        other => Err(TemplateError::new(
            line,
            format!("unknown function '{}'", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(text: &str, data: &mut DataMap) -> String {
        render(text, data).expect("render")
    }

    #[test]
    fn interpolates_dotted_paths() {
        let mut data = DataMap::new();
        let mut inner = DataMap::new();
        inner.set("name", "erpc");
        data.set("info", inner);
        assert_eq!(run("hello {$info.name}!", &mut data), "hello erpc!");
    }

    #[test]
    fn undefined_variable_is_an_error() {
        let mut data = DataMap::new();
        let err = render("{$missing}", &mut data).unwrap_err();
        assert!(err.reason.contains("undefined variable 'missing'"));
    }

    #[test]
    fn if_elif_else() {
        let mut data = DataMap::new();
        data.set("n", 2i64);
        let text = "{% if n == 1 %}one{% elif n == 2 %}two{% else %}many{% endif %}";
        assert_eq!(run(text, &mut data), "two");
        data.set("n", 9i64);
        assert_eq!(run(text, &mut data), "many");
    }

    #[test]
    fn for_loop_variables() {
        let mut data = DataMap::new();
        data.set(
            "items",
            vec![DataValue::from("a"), DataValue::from("b"), DataValue::from("c")],
        );
        let text = "{% for x in items %}{$loop.index0}{$x}{% if not loop.last %},{% endif %}{% endfor %}";
        assert_eq!(run(text, &mut data), "0a,1b,2c");
    }

    #[test]
    fn loop_parity_and_count() {
        let mut data = DataMap::new();
        data.set("items", vec![DataValue::Int(10), DataValue::Int(20)]);
        let text = "{% for x in items %}{% if loop.odd %}o{% else %}e{% endif %}{$loop.count}{% endfor %}";
        assert_eq!(run(text, &mut data), "o2e2");
    }

    #[test]
    fn def_and_call_with_params() {
        let mut data = DataMap::new();
        let text = "{% def greet(who) %}hi {$who}{% enddef %}{$greet(\"you\")}/{$greet(\"me\")}";
        assert_eq!(run(text, &mut data), "hi you/hi me");
    }

    #[test]
    fn set_creates_nested_paths() {
        let mut data = DataMap::new();
        let text = "{% set out.name = \"x\" & \"y\" %}{$out.name}";
        assert_eq!(run(text, &mut data), "xy");
    }

    #[test]
    fn comments_inside_statements() {
        let mut data = DataMap::new();
        data.set("v", 1i64);
        assert_eq!(
            run("{% if v == 1 -- a comment\n%}yes{% endif %}", &mut data),
            "yes"
        );
    }

    #[test]
    fn double_dash_inside_string_is_not_a_comment() {
        let mut data = DataMap::new();
        assert_eq!(run("{% set s = \"a--b\" %}{$s}", &mut data), "a--b");
    }

    #[test]
    fn trailing_gt_elides_newline() {
        let mut data = DataMap::new();
        data.set("yes", true);
        assert_eq!(
            run("{% if yes >%}\nline{% endif >%}\nend", &mut data),
            "lineend"
        );
    }

    #[test]
    fn empty_value_elides_newline_with_leading_gt() {
        let mut data = DataMap::new();
        data.set("nothing", "");
        data.set("something", "text");
        assert_eq!(run("{$>nothing}\nnext", &mut data), "next");
        assert_eq!(run("{$>something}\nnext", &mut data), "text\nnext");
    }

    #[test]
    fn arithmetic_and_division_by_zero() {
        let mut data = DataMap::new();
        data.set("n", 7i64);
        assert_eq!(run("{$n * 2 + 1}", &mut data), "15");
        assert_eq!(run("{$n / 0}", &mut data), "0");
        assert_eq!(run("{$n % 0}", &mut data), "0");
    }

    #[test]
    fn string_functions() {
        let mut data = DataMap::new();
        data.set("word", "ePRC");
        assert_eq!(run("{$upper(word)}", &mut data), "EPRC");
        assert_eq!(run("{$lower(word)}", &mut data), "eprc");
        assert_eq!(run("{$capitalize(\"list\")}", &mut data), "List");
        assert_eq!(run("{$int(\"42\") + 1}", &mut data), "43");
        assert_eq!(run("{$str(12) & \"!\"}", &mut data), "12!");
    }

    #[test]
    fn count_empty_defined() {
        let mut data = DataMap::new();
        data.set("items", vec![DataValue::Int(1), DataValue::Int(2)]);
        data.set("blank", "");
        assert_eq!(run("{$count(items)}", &mut data), "2");
        assert_eq!(
            run("{% if empty(blank) %}e{% endif %}{% if not empty(items) %}f{% endif %}", &mut data),
            "ef"
        );
        assert_eq!(
            run(
                "{% if defined(items) %}d{% endif %}{% if not defined(nope) %}n{% endif %}",
                &mut data
            ),
            "dn"
        );
    }

    #[test]
    fn add_indent_prefixes_lines() {
        let mut data = DataMap::new();
        data.set("body", "a\nb\n");
        assert_eq!(run("{$addIndent(\"  \", body)}", &mut data), "  a\n  b\n");
    }

    #[test]
    fn comparisons_and_logic() {
        let mut data = DataMap::new();
        data.set("a", 3i64);
        data.set("b", 5i64);
        assert_eq!(
            run(
                "{% if a < b and not (a == b) %}lt{% endif %}{% if a >= b or b > a %}x{% endif %}",
                &mut data
            ),
            "ltx"
        );
    }

    #[test]
    fn loops_nest_with_independent_loop_vars() {
        let mut data = DataMap::new();
        data.set("outer", vec![DataValue::Int(0), DataValue::Int(0)]);
        data.set("inner", vec![DataValue::Int(0)]);
        let text = "{% for a in outer %}{$loop.index}[{% for b in inner %}{$loop.index}{% endfor %}]{% endfor %}";
        assert_eq!(run(text, &mut data), "1[1]2[1]");
    }

    #[test]
    fn unterminated_block_is_an_error() {
        let mut data = DataMap::new();
        assert!(render("{% if true %}oops", &mut data).is_err());
    }

    #[test]
    fn set_mutates_enclosing_scope_inside_loop() {
        let mut data = DataMap::new();
        data.set("total", 0i64);
        data.set(
            "items",
            vec![DataValue::Int(1), DataValue::Int(2), DataValue::Int(3)],
        );
        let text = "{% for x in items %}{% set total = total + x %}{% endfor %}{$total}";
        assert_eq!(run(text, &mut data), "6");
    }
}
