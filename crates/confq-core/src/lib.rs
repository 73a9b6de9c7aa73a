//! confq-core: configuration preprocessing engine
//!
//! Loads a structured document (JSON or a sibling format), resolves
//! file-level inheritance (`$extends` / `$includes` / `$local`), and
//! rewrites sentinel-prefixed keys and values (`raw:` / `eval:`) through an
//! embedded jq-style expression engine until a fixpoint is reached.
//!
//! # Example
//!
//! ```rust
//! use confq_core::{eval, InvocationSpec, Value};
//!
//! let doc: Value = serde_json::from_str(r#"{"a": "Hello", "X": "eval:.a"}"#).unwrap();
//! let out = eval::process_values(&doc, 7, &InvocationSpec::empty()).unwrap();
//! assert_eq!(out.as_mapping().unwrap()["X"].as_str(), Some("Hello"));
//! ```

pub mod engine;
pub mod error;
pub mod eval;
pub mod inherit;
pub mod invocation;
pub mod loader;
pub mod path;
pub mod pool;
pub mod sentinel;
pub mod value;

mod builtins;
mod processor;

pub use error::{Error, Result};
pub use invocation::{InvocationSpec, InvocationSpecBuilder};
pub use processor::{Processor, ProcessorOptions};
pub use value::Value;
