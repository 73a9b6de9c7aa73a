//! confq CLI - resolve configuration documents to plain JSON
//!
//! Usage:
//!   confq config.json              resolve one file
//!   confq a.json b.yaml            resolve several files in order
//!   confq < config.json            resolve a JSON document from stdin

use clap::Parser;
use colored::Colorize;
use confq_core::{Processor, Value};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

/// confq - configuration preprocessor with inheritance and expressions
#[derive(Parser, Debug)]
#[command(name = "confq")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input files; reads a JSON document from stdin when omitted
    files: Vec<PathBuf>,
}

/// Run the CLI with the process arguments
pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let processor = Processor::new();

    if cli.files.is_empty() {
        let outcome = process_stdin(&processor).and_then(|value| print_value(&value));
        return match outcome {
            Ok(()) => ExitCode::SUCCESS,
            Err(message) => {
                eprintln!("{} {}", "Error processing stdin:".red(), message);
                ExitCode::FAILURE
            }
        };
    }

    for file in &cli.files {
        let outcome = processor
            .process_file(file)
            .map_err(|e| e.to_string())
            .and_then(|value| print_value(&value));
        if let Err(message) = outcome {
            eprintln!(
                "{} {}",
                format!("Error processing {}:", file.display()).red(),
                message
            );
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}

/// Pretty-print one result (two-space indent) followed by a newline
fn print_value(value: &Value) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| format!("failed to render result: {}", e))?;
    println!("{}", text);
    Ok(())
}

/// Buffer stdin to a temporary file and process it as a single JSON input
fn process_stdin(processor: &Processor) -> Result<Value, String> {
    let mut buffer = Vec::new();
    std::io::stdin()
        .read_to_end(&mut buffer)
        .map_err(|e| format!("failed to read stdin: {}", e))?;

    // No suffix: extension-less files decode as JSON
    let mut temp = tempfile::Builder::new()
        .prefix("confq-stdin-")
        .tempfile()
        .map_err(|e| format!("failed to create temporary file: {}", e))?;
    temp.write_all(&buffer)
        .map_err(|e| format!("failed to buffer stdin: {}", e))?;
    temp.flush()
        .map_err(|e| format!("failed to buffer stdin: {}", e))?;

    let abs = temp.path().to_string_lossy().to_string();
    processor.process("", &abs).map_err(|e| e.to_string())
}
