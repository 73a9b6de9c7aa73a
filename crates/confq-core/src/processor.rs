//! Top-level processing pipeline
//!
//! Ties the stages together for one input file: create the session
//! directory, resolve inheritance through a fresh node pool, then run the
//! key-side and value-side fixpoints. The session directory is removed when
//! processing finishes, successfully or not.

use std::path::{Path as FsPath, PathBuf};

use log::debug;

use crate::error::Result;
use crate::eval;
use crate::invocation::InvocationSpec;
use crate::pool::{self, NodePool, SessionDir};
use crate::value::Value;

/// Options for a [`Processor`]
#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    /// Fixpoint passes allowed per rewrite phase
    pub ttl: i64,
    /// External search directories; None consults `JF_PATH`
    pub search_paths: Option<Vec<String>>,
    /// Session directory base; None consults `JF_SESSION_DIR_BASE`
    pub session_base: Option<PathBuf>,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            ttl: eval::DEFAULT_TTL,
            search_paths: None,
            session_base: None,
        }
    }
}

/// Loads documents and produces fully-resolved objects
#[derive(Debug, Clone, Default)]
pub struct Processor {
    options: ProcessorOptions,
}

impl Processor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ProcessorOptions) -> Self {
        Self { options }
    }

    /// Process one input file, given as a path
    pub fn process_file(&self, path: impl AsRef<FsPath>) -> Result<Value> {
        let path = path.as_ref();
        let base_dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_string_lossy().to_string(),
            _ => ".".to_string(),
        };
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.process(&base_dir, &filename)
    }

    /// Process one input file, given as a base directory and filename.
    ///
    /// An empty base directory restricts resolution of the input itself to
    /// an absolute filename (the stdin case).
    pub fn process(&self, base_dir: &str, filename: &str) -> Result<Value> {
        let session = SessionDir::create(self.options.session_base.as_deref())?;
        let search_paths = self
            .options
            .search_paths
            .clone()
            .unwrap_or_else(pool::search_paths_from_env);
        let mut node_pool = NodePool::new(base_dir, session.path(), search_paths);

        let entry = node_pool.read(base_dir, filename)?;
        debug!(
            "resolved {} with {} module(s)",
            filename,
            entry.modules.len()
        );

        let mut builder = InvocationSpec::builder();
        for module in entry.modules {
            builder = builder.add_module(module);
        }
        let spec = builder.build();

        let obj = eval::process_keys(&entry.obj, self.options.ttl, &spec)?;
        let obj = eval::process_values(&obj, self.options.ttl, &spec)?;
        Ok(obj)
        // session drops here; the scratch directory is removed either way
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn from_json(s: &str) -> Value {
        serde_json::from_str(s).unwrap()
    }

    fn write_file(dir: &FsPath, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_plain_document_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_file(dir.path(), "in.json", r#"{"a": 1, "b": 2}"#);
        let out = Processor::new().process_file(&input).unwrap();
        assert_eq!(out, from_json(r#"{"a": 1, "b": 2}"#));
    }

    #[test]
    fn test_inheritance_then_rewrites() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "base.json", r#"{"host": "localhost", "port": 80}"#);
        let input = write_file(
            dir.path(),
            "in.json",
            r#"{"$extends": ["base.json"], "port": 8080, "url": "eval:.host"}"#,
        );
        let out = Processor::new().process_file(&input).unwrap();
        assert_eq!(
            out,
            from_json(r#"{"host": "localhost", "port": 8080, "url": "localhost"}"#)
        );
    }

    #[test]
    fn test_jq_module_parent_feeds_eval() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "custom.jq",
            "def custom_func: { new_key: .store };",
        );
        let input = write_file(
            dir.path(),
            "in.json",
            r#"{"$extends": ["custom.jq"], "store": "Hello", "key": "eval:object:custom::custom_func"}"#,
        );
        let out = Processor::new().process_file(&input).unwrap();
        assert_eq!(
            out,
            from_json(r#"{"store": "Hello", "key": {"new_key": "Hello"}}"#)
        );
    }

    #[test]
    fn test_keys_processed_before_values() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_file(
            dir.path(),
            "in.json",
            r#"{"raw:msg": "eval:.src", "src": "hi"}"#,
        );
        let out = Processor::new().process_file(&input).unwrap();
        assert_eq!(out, from_json(r#"{"msg": "hi", "src": "hi"}"#));
    }

    #[test]
    fn test_absolute_input_with_empty_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_file(dir.path(), "in.json", r#"{"a": 1}"#);
        let out = Processor::new()
            .process("", input.to_str().unwrap())
            .unwrap();
        assert_eq!(out, from_json(r#"{"a": 1}"#));
    }

    #[test]
    fn test_search_path_option_overrides_env() {
        let shared = tempfile::tempdir().unwrap();
        write_file(shared.path(), "common.json", r#"{"from": "shared"}"#);
        let dir = tempfile::tempdir().unwrap();
        let input = write_file(
            dir.path(),
            "in.json",
            r#"{"$extends": ["common.json"], "a": 1}"#,
        );

        let processor = Processor::with_options(ProcessorOptions {
            search_paths: Some(vec![shared.path().to_string_lossy().to_string()]),
            ..Default::default()
        });
        let out = processor.process_file(&input).unwrap();
        assert_eq!(out, from_json(r#"{"from": "shared", "a": 1}"#));
    }

    #[test]
    fn test_missing_input_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = Processor::new()
            .process_file(dir.path().join("absent.json"))
            .unwrap_err();
        assert!(matches!(
            err.kind,
            crate::error::ErrorKind::MissingFile { .. }
        ));
    }

    #[test]
    fn test_no_sentinels_survive_in_output() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "p.json", r#"{"deep": {"raw:k": "raw:v"}}"#);
        let input = write_file(
            dir.path(),
            "in.json",
            r#"{"$extends": ["p.json"], "x": "eval:.deep | tostring"}"#,
        );
        let out = Processor::new().process_file(&input).unwrap();
        let leftovers = crate::path::collect_entries(&out, |_| true)
            .into_iter()
            .filter(|e| match &e.value {
                Value::String(s) => crate::sentinel::has_sentinel_prefix(s),
                _ => false,
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_ttl_option_respected() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_file(
            dir.path(),
            "in.json",
            r#"{"a": "eval:.b", "b": "eval:.c", "c": "v"}"#,
        );
        let strict = Processor::with_options(ProcessorOptions {
            ttl: 1,
            ..Default::default()
        });
        let err = strict.process_file(&input).unwrap_err();
        assert!(matches!(
            err.kind,
            crate::error::ErrorKind::TtlExhausted { .. }
        ));
    }
}
