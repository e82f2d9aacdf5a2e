// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use erpc_gen::errors::GenError;
use erpc_gen::gen::TargetLang;
use std::path::PathBuf;

const VERSION: &str = env!("CARGO_PKG_VERSION");

struct Options {
    input: PathBuf,
    output_dir: PathBuf,
    target: TargetLang,
    search_paths: Vec<PathBuf>,
}

fn main() {
    // Initialize tracing for diagnostics
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let options = match parse_args(&args) {
        Ok(Some(options)) => options,
        Ok(None) => return,
        Err(message) => {
            eprintln!("erpcgen: {}", message);
            print_help();
            std::process::exit(1);
        }
    };

    if let Err(code) = run(&options) {
        std::process::exit(code);
    }
}

fn run(options: &Options) -> Result<(), i32> {
    let outputs = erpc_gen::compile(
        &options.input,
        options.target,
        &options.search_paths,
        |warning| eprintln!("{}", warning),
    )
    .map_err(report)?;

    std::fs::create_dir_all(&options.output_dir)
        .map_err(|e| report(GenError::io(&options.output_dir, &e)))?;
    for output in outputs {
        let path = options.output_dir.join(&output.path);
        tracing::info!("writing {}", path.display());
        std::fs::write(&path, &output.content).map_err(|e| report(GenError::io(&path, &e)))?;
    }
    Ok(())
}

fn report(error: GenError) -> i32 {
    eprintln!("{}", error);
    error.exit_code()
}

fn parse_args(args: &[String]) -> Result<Option<Options>, String> {
    let mut input = None;
    let mut output_dir = PathBuf::from(".");
    let mut target = TargetLang::C;
    let mut search_paths = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--help" | "-h" => {
                print_help();
                return Ok(None);
            }
            "--version" => {
                println!("erpcgen {}", VERSION);
                return Ok(None);
            }
            "-o" => {
                output_dir = iter
                    .next()
                    .ok_or_else(|| "'-o' requires a directory".to_string())?
                    .into();
            }
            "-g" => {
                let name = iter
                    .next()
                    .ok_or_else(|| "'-g' requires a target language".to_string())?;
                target = TargetLang::parse(name)
                    .ok_or_else(|| format!("unknown target language '{}'", name))?;
            }
            "-I" => {
                search_paths.push(
                    iter.next()
                        .ok_or_else(|| "'-I' requires a directory".to_string())?
                        .into(),
                );
            }
            "--codec" => {
                let name = iter
                    .next()
                    .ok_or_else(|| "'--codec' requires a codec name".to_string())?;
                if name != "basic" {
                    return Err(format!("unsupported codec '{}'", name));
                }
            }
            other if other.starts_with('-') => {
                return Err(format!("unknown option '{}'", other));
            }
            other => {
                if input.replace(PathBuf::from(other)).is_some() {
                    return Err("more than one input file given".to_string());
                }
            }
        }
    }

    match input {
        Some(input) => Ok(Some(Options {
            input,
            output_dir,
            target,
            search_paths,
        })),
        None => Err("missing input file".to_string()),
    }
}

fn print_help() {
    println!("erpcgen {}", VERSION);
    println!();
    println!("USAGE:");
    println!("    erpcgen [options] <input.erpc>");
    println!();
    println!("OPTIONS:");
    println!("    -o <dir>           output directory (default: current directory)");
    println!("    -g <target>        target language: c | py | rust (default: c)");
    println!("    -I <dir>           add to import search path (repeatable)");
    println!("    --codec basic      wire codec choice");
    println!("    --help, --version  stop after emitting the message");
}
