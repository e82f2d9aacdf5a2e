// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! IDL compiler and code generator for the RPC framework.
//!
//! The pipeline: [`lexer`] tokenises the IDL source, [`parser`] builds the
//! arena AST (evaluating constant expressions on the way), [`scanner`]
//! performs semantic analysis into a [`types::Program`], and [`gen`] runs
//! the template-driven backends (C, Python, Rust) over it. [`template`] is
//! the string-template engine the backends share.

pub mod ast;
pub mod errors;
pub mod gen;
pub mod lexer;
pub mod parser;
pub mod scanner;
pub mod template;
pub mod token;
pub mod types;

use errors::GenResult;
use gen::{Output, TargetLang};
use std::path::{Path, PathBuf};

/// Compile one IDL file end to end and return the generated outputs.
///
/// Warnings collected during analysis are passed to `warn` before
/// generation runs.
pub fn compile(
    input: &Path,
    target: TargetLang,
    search_paths: &[PathBuf],
    warn: impl FnMut(&str),
) -> GenResult<Vec<Output>> {
    let ast = parser::parse_file(input, search_paths)?;
    let mut program = scanner::scan(input, &ast)?;
    let mut warn = warn;
    for warning in &program.warnings {
        warn(warning);
    }
    let base_name = program
        .name
        .clone()
        .or_else(|| {
            input
                .file_stem()
                .and_then(|stem| stem.to_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "erpc_output".to_string());
    gen::generate(&mut program, target, &base_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn compile_uses_program_name_for_outputs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("math.erpc");
        let mut file = std::fs::File::create(&input).expect("create");
        writeln!(file, "program arith").expect("write");
        writeln!(file, "interface calc {{ add(in int32 a) -> int32 }}").expect("write");
        drop(file);

        let outputs =
            compile(&input, TargetLang::Rust, &[], |_| {}).expect("compile");
        assert_eq!(outputs[0].path.to_str(), Some("arith.rs"));
    }

    #[test]
    fn compile_falls_back_to_file_stem() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("noprog.erpc");
        std::fs::write(&input, "interface i { f() -> void }").expect("write");
        let outputs =
            compile(&input, TargetLang::Rust, &[], |_| {}).expect("compile");
        assert_eq!(outputs[0].path.to_str(), Some("noprog.rs"));
    }

    #[test]
    fn imports_resolve_through_search_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let shared = dir.path().join("shared.erpc");
        std::fs::write(&shared, "struct Common { int32 tag; }").expect("write");
        let input = dir.path().join("main.erpc");
        std::fs::write(
            &input,
            "import \"shared.erpc\";\ninterface i { f(in Common c) -> void }",
        )
        .expect("write");

        let outputs = compile(&input, TargetLang::Rust, &[dir.path().to_path_buf()], |_| {})
            .expect("compile");
        assert!(outputs[0].content.contains("pub struct Common"));
    }

    #[test]
    fn duplicate_id_warnings_are_surfaced() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("dup.erpc");
        std::fs::write(
            &input,
            "interface i { @id(2) f() -> void\n @id(2) g() -> void }",
        )
        .expect("write");
        let mut warnings = Vec::new();
        compile(&input, TargetLang::Rust, &[], |w| warnings.push(w.to_string()))
            .expect("compile");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("duplicate function id 2"));
    }
}
