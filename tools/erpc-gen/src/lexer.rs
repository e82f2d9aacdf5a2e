// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lexical analysis of IDL source text.
//!
//! Recognises decimal, hex (`0x`) and binary (`0b`) integer literals, float
//! literals, quoted strings with standard backslash escapes plus `\xNN`,
//! identifiers, the keyword set, and the operator/punctuation inventory.
//! `//` and `/* */` comments are skipped. Line and column are tracked
//! explicitly and attached to every token.

use crate::errors::{GenError, GenResult, Location};
use crate::token::{IntWidth, Token, TokenKind, Value};
use std::path::{Path, PathBuf};

pub struct Lexer<'a> {
    file: PathBuf,
    source: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(file: impl AsRef<Path>, source: &'a str) -> Self {
        Lexer {
            file: file.as_ref().to_path_buf(),
            source: source.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    /// Tokenise the whole input, ending with an `Eof` token.
    pub fn tokenize(mut self) -> GenResult<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn location(&self) -> Location {
        Location::new(self.line, self.column)
    }

    fn error(&self, location: Location, message: impl Into<String>) -> GenError {
        GenError::syntax(&self.file, location, message)
    }

    fn peek(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.source.get(self.pos + ahead).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        if byte == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(byte)
    }

    fn skip_trivia(&mut self) -> GenResult<()> {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') => {
                    self.bump();
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while let Some(byte) = self.peek() {
                        if byte == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    let start = self.location();
                    self.bump();
                    self.bump();
                    loop {
                        match self.peek() {
                            Some(b'*') if self.peek_at(1) == Some(b'/') => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            Some(_) => {
                                self.bump();
                            }
                            None => return Err(self.error(start, "unterminated block comment")),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn next_token(&mut self) -> GenResult<Token> {
        self.skip_trivia()?;
        let location = self.location();
        let byte = match self.peek() {
            Some(byte) => byte,
            None => return Ok(Token::new(TokenKind::Eof, location)),
        };

        if byte.is_ascii_alphabetic() || byte == b'_' {
            return Ok(self.scan_ident(location));
        }
        if byte.is_ascii_digit() {
            return self.scan_number(location);
        }
        if byte == b'"' {
            return self.scan_string(location);
        }

        self.bump();
        let kind = match byte {
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'[' => TokenKind::LBracket,
            b']' => TokenKind::RBracket,
            b',' => TokenKind::Comma,
            b';' => TokenKind::Semicolon,
            b':' => TokenKind::Colon,
            b'=' => TokenKind::Assign,
            b'@' => TokenKind::At,
            b'+' => TokenKind::Plus,
            b'-' => {
                if self.peek() == Some(b'>') {
                    self.bump();
                    TokenKind::Arrow
                } else {
                    TokenKind::Minus
                }
            }
            b'*' => TokenKind::Star,
            b'/' => TokenKind::Slash,
            b'%' => TokenKind::Percent,
            b'&' => TokenKind::Amp,
            b'|' => TokenKind::Pipe,
            b'^' => TokenKind::Caret,
            b'~' => TokenKind::Tilde,
            b'<' => {
                if self.peek() == Some(b'<') {
                    self.bump();
                    TokenKind::Shl
                } else {
                    TokenKind::Lt
                }
            }
            b'>' => {
                if self.peek() == Some(b'>') {
                    self.bump();
                    TokenKind::Shr
                } else {
                    TokenKind::Gt
                }
            }
            other => {
                return Err(self.error(
                    location,
                    format!("unexpected character '{}'", other as char),
                ))
            }
        };
        Ok(Token::new(kind, location))
    }

    fn scan_ident(&mut self, location: Location) -> Token {
        let start = self.pos;
        while let Some(byte) = self.peek() {
            if byte.is_ascii_alphanumeric() || byte == b'_' {
                self.bump();
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.source[start..self.pos]).unwrap_or_default();
        let kind = TokenKind::keyword(text).unwrap_or_else(|| TokenKind::Ident(text.to_string()));
        Token::new(kind, location)
    }

    fn scan_number(&mut self, location: Location) -> GenResult<Token> {
        let start = self.pos;

        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x') | Some(b'X')) {
            self.bump();
            self.bump();
            let digits = self.pos;
            while matches!(self.peek(), Some(byte) if byte.is_ascii_hexdigit()) {
                self.bump();
            }
            if self.pos == digits {
                return Err(self.error(location, "missing digits after '0x'"));
            }
            let text = std::str::from_utf8(&self.source[digits..self.pos]).unwrap_or_default();
            let value = u64::from_str_radix(text, 16)
                .map_err(|_| self.error(location, "hex literal out of range"))?;
            return Ok(Token::new(TokenKind::IntLiteral(unsigned_value(value)), location));
        }

        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'b') | Some(b'B')) {
            self.bump();
            self.bump();
            let digits = self.pos;
            while matches!(self.peek(), Some(b'0') | Some(b'1')) {
                self.bump();
            }
            if self.pos == digits {
                return Err(self.error(location, "missing digits after '0b'"));
            }
            let text = std::str::from_utf8(&self.source[digits..self.pos]).unwrap_or_default();
            let value = u64::from_str_radix(text, 2)
                .map_err(|_| self.error(location, "binary literal out of range"))?;
            return Ok(Token::new(TokenKind::IntLiteral(unsigned_value(value)), location));
        }

        while matches!(self.peek(), Some(byte) if byte.is_ascii_digit()) {
            self.bump();
        }
        let mut is_float = false;
        if self.peek() == Some(b'.') && matches!(self.peek_at(1), Some(byte) if byte.is_ascii_digit())
        {
            is_float = true;
            self.bump();
            while matches!(self.peek(), Some(byte) if byte.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            let mut ahead = 1;
            if matches!(self.peek_at(1), Some(b'+') | Some(b'-')) {
                ahead = 2;
            }
            if matches!(self.peek_at(ahead), Some(byte) if byte.is_ascii_digit()) {
                is_float = true;
                for _ in 0..=ahead {
                    self.bump();
                }
                while matches!(self.peek(), Some(byte) if byte.is_ascii_digit()) {
                    self.bump();
                }
            }
        }

        let text = std::str::from_utf8(&self.source[start..self.pos]).unwrap_or_default();
        if is_float {
            let value = text
                .parse::<f64>()
                .map_err(|_| self.error(location, "malformed float literal"))?;
            Ok(Token::new(TokenKind::FloatLiteral(value), location))
        } else {
            let value = text
                .parse::<i64>()
                .map_err(|_| self.error(location, "integer literal out of range"))?;
            Ok(Token::new(TokenKind::IntLiteral(Value::int(value)), location))
        }
    }

    fn scan_string(&mut self, location: Location) -> GenResult<Token> {
        self.bump(); // opening quote
        let mut text = String::new();
        loop {
            match self.bump() {
                Some(b'"') => break,
                Some(b'\\') => {
                    let escape_at = self.location();
                    match self.bump() {
                        Some(b'n') => text.push('\n'),
                        Some(b't') => text.push('\t'),
                        Some(b'r') => text.push('\r'),
                        Some(b'0') => text.push('\0'),
                        Some(b'\\') => text.push('\\'),
                        Some(b'"') => text.push('"'),
                        Some(b'x') | Some(b'X') => {
                            let hi = self.bump();
                            let lo = self.bump();
                            let byte = match (hex_digit(hi), hex_digit(lo)) {
                                (Some(hi), Some(lo)) => hi * 16 + lo,
                                _ => {
                                    return Err(self
                                        .error(escape_at, "expected two hex digits after '\\x'"))
                                }
                            };
                            text.push(byte as char);
                        }
                        _ => return Err(self.error(escape_at, "unknown escape sequence")),
                    }
                }
                Some(b'\n') | None => {
                    return Err(self.error(location, "unterminated string literal"))
                }
                Some(byte) => text.push(byte as char),
            }
        }
        Ok(Token::new(TokenKind::StringLiteral(text), location))
    }
}

fn unsigned_value(value: u64) -> Value {
    Value::Integer {
        value: value as i64,
        signed: false,
        width: if u32::try_from(value).is_ok() {
            IntWidth::Int
        } else {
            IntWidth::Long
        },
    }
}

fn hex_digit(byte: Option<u8>) -> Option<u8> {
    match byte? {
        b @ b'0'..=b'9' => Some(b - b'0'),
        b @ b'a'..=b'f' => Some(b - b'a' + 10),
        b @ b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new("test.erpc", source)
            .tokenize()
            .expect("lex")
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn keywords_and_identifiers() {
        assert_eq!(
            kinds("struct Foo oneway"),
            vec![
                TokenKind::Struct,
                TokenKind::Ident("Foo".into()),
                TokenKind::Oneway,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn integer_bases() {
        let toks = kinds("10 0x1F 0b101");
        let values: Vec<i64> = toks
            .iter()
            .filter_map(|k| match k {
                TokenKind::IntLiteral(v) => v.as_int(),
                _ => None,
            })
            .collect();
        assert_eq!(values, vec![10, 31, 5]);
    }

    #[test]
    fn float_literals() {
        assert_eq!(
            kinds("1.5 2e3"),
            vec![
                TokenKind::FloatLiteral(1.5),
                TokenKind::FloatLiteral(2000.0),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn division_is_not_float() {
        assert_eq!(
            kinds("6/2"),
            vec![
                TokenKind::IntLiteral(Value::int(6)),
                TokenKind::Slash,
                TokenKind::IntLiteral(Value::int(2)),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            kinds(r#""a\n\x41\"b""#),
            vec![TokenKind::StringLiteral("a\nA\"b".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("a // line\n /* block\n */ b"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Ident("b".into()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn locations_track_lines_and_columns() {
        let tokens = Lexer::new("t.erpc", "a\n  b").tokenize().expect("lex");
        assert_eq!(tokens[0].location, Location::new(1, 1));
        assert_eq!(tokens[1].location, Location::new(2, 3));
    }

    #[test]
    fn arrow_and_shift_disambiguation() {
        assert_eq!(
            kinds("-> - >> > <<"),
            vec![
                TokenKind::Arrow,
                TokenKind::Minus,
                TokenKind::Shr,
                TokenKind::Gt,
                TokenKind::Shl,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = Lexer::new("t.erpc", "\"abc").tokenize().unwrap_err();
        assert!(err.to_string().contains("unterminated string"));
    }

    #[test]
    fn list_angle_brackets() {
        assert_eq!(
            kinds("list<int32>"),
            vec![
                TokenKind::Ident("list".into()),
                TokenKind::Lt,
                TokenKind::Ident("int32".into()),
                TokenKind::Gt,
                TokenKind::Eof
            ]
        );
    }
}
