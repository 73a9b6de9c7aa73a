//! confq CLI library
//!
//! Exposes the CLI entry point so other tooling can bundle the binary.

mod cli;

pub use cli::run;
