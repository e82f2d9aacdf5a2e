// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Diagnostics for the IDL front end.
//!
//! Parse and semantic errors carry the file, line, and column they were
//! detected at; the CLI prints them to stderr and maps them to exit code 1
//! (I/O problems map to exit code 2).

use std::fmt;
use std::path::PathBuf;

/// Result type for generator operations.
pub type GenResult<T> = Result<T, GenError>;

/// Source position, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn new(line: u32, column: u32) -> Self {
        Location { line, column }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Errors produced while compiling an IDL file.
#[derive(Debug)]
pub enum GenError {
    /// Lexical or grammatical error in the input.
    Syntax {
        file: PathBuf,
        location: Location,
        message: String,
    },

    /// The input parsed but violates a semantic rule.
    Semantic {
        file: PathBuf,
        location: Location,
        message: String,
    },

    /// Template expansion failed (an internal template is broken).
    Template { line: usize, message: String },

    /// Reading input or writing output failed.
    Io { path: PathBuf, message: String },
}

impl GenError {
    pub fn syntax(file: impl Into<PathBuf>, location: Location, message: impl Into<String>) -> Self {
        GenError::Syntax {
            file: file.into(),
            location,
            message: message.into(),
        }
    }

    pub fn semantic(
        file: impl Into<PathBuf>,
        location: Location,
        message: impl Into<String>,
    ) -> Self {
        GenError::Semantic {
            file: file.into(),
            location,
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        GenError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Process exit code the CLI reports for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            GenError::Io { .. } => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for GenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenError::Syntax {
                file,
                location,
                message,
            } => write!(f, "{}:{}: error: {}", file.display(), location, message),
            GenError::Semantic {
                file,
                location,
                message,
            } => write!(f, "{}:{}: error: {}", file.display(), location, message),
            GenError::Template { line, message } => {
                write!(f, "template error at line {}: {}", line, message)
            }
            GenError::Io { path, message } => {
                write!(f, "{}: {}", path.display(), message)
            }
        }
    }
}

impl std::error::Error for GenError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syntax_error_names_file_line_column() {
        let err = GenError::syntax("calc.erpc", Location::new(3, 14), "unexpected token");
        assert_eq!(err.to_string(), "calc.erpc:3:14: error: unexpected token");
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn io_error_maps_to_exit_code_two() {
        let err = GenError::Io {
            path: "out/".into(),
            message: "permission denied".into(),
        };
        assert_eq!(err.exit_code(), 2);
    }
}
