//! Document loader
//!
//! Dispatches on the file extension (case-insensitive, `++` variants
//! included) to a decoder and yields the document as a [`Value`] mapping,
//! plus a [`Module`] when the file is a `.jq` definition file. The top
//! level of every document must be an object.

use std::collections::BTreeMap;
use std::path::Path as FsPath;

use crate::engine::Module;
use crate::error::{Error, Result};
use crate::value::Value;

/// The input formats the loader understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Json,
    Yaml,
    Toml,
    Json5,
    Hocon,
    Jq,
    Hcl,
}

/// Detect the format of a file from its extension.
///
/// Returns None for extensions no decoder claims.
pub fn detect_kind(path: &FsPath) -> Option<FileKind> {
    let ext = match path.extension() {
        None => return Some(FileKind::Json),
        Some(ext) => ext.to_string_lossy().to_lowercase(),
    };
    match ext.as_str() {
        "json" | "json++" => Some(FileKind::Json),
        "yaml" | "yml" | "yaml++" | "yml++" => Some(FileKind::Yaml),
        "toml" | "toml++" => Some(FileKind::Toml),
        "json5" | "json5++" => Some(FileKind::Json5),
        "conf" | "hocon" | "conf++" | "hocon++" => Some(FileKind::Hocon),
        "jq" => Some(FileKind::Jq),
        "hcl" | "hcl++" => Some(FileKind::Hcl),
        _ => None,
    }
}

/// Load a document from an absolute path.
///
/// Returns the decoded object and, for `.jq` files, the module that makes
/// the file's definitions importable.
pub fn load(abs_path: &FsPath) -> Result<(Value, Option<Module>)> {
    let display = abs_path.display().to_string();
    let kind = detect_kind(abs_path).ok_or_else(|| {
        Error::unsupported(
            abs_path
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default(),
        )
        .with_file(display.clone())
    })?;

    if kind == FileKind::Hcl {
        return Err(Error::unsupported(".hcl").with_file(display));
    }

    let content = std::fs::read_to_string(abs_path)
        .map_err(|e| Error::io(e.to_string()).with_file(display.clone()))?;

    let (value, module) = match kind {
        FileKind::Json => {
            let v: Value = serde_json::from_str(&content)
                .map_err(|e| Error::parse(e.to_string()).with_file(display.clone()))?;
            (v, None)
        }
        FileKind::Yaml => {
            let v: Value = serde_yaml::from_str(&content)
                .map_err(|e| Error::parse(e.to_string()).with_file(display.clone()))?;
            (v, None)
        }
        FileKind::Toml => {
            let table: toml::Table = toml::from_str(&content)
                .map_err(|e| Error::parse(e.to_string()).with_file(display.clone()))?;
            (from_toml(toml::Value::Table(table)), None)
        }
        FileKind::Json5 => {
            let v: Value = json5::from_str(&content)
                .map_err(|e| Error::parse(e.to_string()).with_file(display.clone()))?;
            (v, None)
        }
        FileKind::Hocon => {
            let doc = hocon::HoconLoader::new()
                .load_str(&content)
                .and_then(|l| l.hocon())
                .map_err(|e| Error::parse(e.to_string()).with_file(display.clone()))?;
            (from_hocon(doc).map_err(|e| e.with_file(display.clone()))?, None)
        }
        FileKind::Jq => {
            let stem = abs_path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            let module = Module::parse(stem, &content)
                .map_err(|e| Error::parse(e.to_string()).with_file(display.clone()))?;
            (Value::empty_mapping(), Some(module))
        }
        FileKind::Hcl => unreachable!("rejected above"),
    };

    if !value.is_mapping() {
        return Err(Error::shape(format!(
            "top level must be an object, got {}",
            value.type_name()
        ))
        .with_file(display));
    }

    Ok((value, module))
}

fn from_toml(v: toml::Value) -> Value {
    match v {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Integer(i),
        toml::Value::Float(f) => Value::Float(f),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Sequence(items.into_iter().map(from_toml).collect()),
        toml::Value::Table(table) => {
            // Re-keyed in sorted order: the decoder does not preserve source order
            let sorted: BTreeMap<String, toml::Value> = table.into_iter().collect();
            Value::Mapping(
                sorted
                    .into_iter()
                    .map(|(k, v)| (k, from_toml(v)))
                    .collect(),
            )
        }
    }
}

fn from_hocon(v: hocon::Hocon) -> Result<Value> {
    Ok(match v {
        hocon::Hocon::Null => Value::Null,
        hocon::Hocon::Boolean(b) => Value::Bool(b),
        hocon::Hocon::Integer(i) => Value::Integer(i),
        hocon::Hocon::Real(f) => Value::Float(f),
        hocon::Hocon::String(s) => Value::String(s),
        hocon::Hocon::Array(items) => Value::Sequence(
            items
                .into_iter()
                .map(from_hocon)
                .collect::<Result<Vec<_>>>()?,
        ),
        hocon::Hocon::Hash(hash) => {
            let sorted: BTreeMap<String, hocon::Hocon> = hash.into_iter().collect();
            Value::Mapping(
                sorted
                    .into_iter()
                    .map(|(k, v)| Ok((k, from_hocon(v)?)))
                    .collect::<Result<_>>()?,
            )
        }
        hocon::Hocon::BadValue(e) => return Err(Error::parse(e.to_string())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn from_json(s: &str) -> Value {
        serde_json::from_str(s).unwrap()
    }

    fn write_file(dir: &FsPath, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_detect_kind() {
        assert_eq!(detect_kind(FsPath::new("a.json")), Some(FileKind::Json));
        assert_eq!(detect_kind(FsPath::new("a.json++")), Some(FileKind::Json));
        assert_eq!(detect_kind(FsPath::new("noext")), Some(FileKind::Json));
        assert_eq!(detect_kind(FsPath::new("a.YML")), Some(FileKind::Yaml));
        assert_eq!(detect_kind(FsPath::new("a.yaml++")), Some(FileKind::Yaml));
        assert_eq!(detect_kind(FsPath::new("a.toml")), Some(FileKind::Toml));
        assert_eq!(detect_kind(FsPath::new("a.json5++")), Some(FileKind::Json5));
        assert_eq!(detect_kind(FsPath::new("a.conf")), Some(FileKind::Hocon));
        assert_eq!(detect_kind(FsPath::new("a.hocon++")), Some(FileKind::Hocon));
        assert_eq!(detect_kind(FsPath::new("a.jq")), Some(FileKind::Jq));
        assert_eq!(detect_kind(FsPath::new("a.hcl")), Some(FileKind::Hcl));
        assert_eq!(detect_kind(FsPath::new("a.xml")), None);
    }

    #[test]
    fn test_load_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "a.json", r#"{"a": 1, "b": [true, null]}"#);
        let (v, module) = load(&path).unwrap();
        assert_eq!(v, from_json(r#"{"a": 1, "b": [true, null]}"#));
        assert!(module.is_none());
    }

    #[test]
    fn test_load_json_no_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "input", r#"{"a": 1}"#);
        let (v, _) = load(&path).unwrap();
        assert_eq!(v, from_json(r#"{"a": 1}"#));
    }

    #[test]
    fn test_load_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "a.yaml", "a: 1\nb:\n  - x\n  - 2.5\n");
        let (v, _) = load(&path).unwrap();
        assert_eq!(v, from_json(r#"{"a": 1, "b": ["x", 2.5]}"#));
    }

    #[test]
    fn test_load_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "a.toml", "x = 1\n[server]\nhost = \"h\"\n");
        let (v, _) = load(&path).unwrap();
        assert_eq!(v, from_json(r#"{"server": {"host": "h"}, "x": 1}"#));
    }

    #[test]
    fn test_load_json5() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "a.json5", "{a: 1, /* c */ b: 'two'}");
        let (v, _) = load(&path).unwrap();
        let m = v.as_mapping().unwrap();
        assert_eq!(m["b"], Value::String("two".into()));
        // json5 reports numbers as floats; both kinds count as numbers
        assert!(m["a"].is_number());
    }

    #[test]
    fn test_load_hocon() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "a.conf", "a = 1\nserver { host = \"h\" }\n");
        let (v, _) = load(&path).unwrap();
        assert_eq!(v, from_json(r#"{"a": 1, "server": {"host": "h"}}"#));
    }

    #[test]
    fn test_load_jq_module() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "custom.jq",
            "def custom_func: { new_key: .store };",
        );
        let (v, module) = load(&path).unwrap();
        assert_eq!(v, Value::empty_mapping());
        assert_eq!(module.unwrap().name(), "custom");
    }

    #[test]
    fn test_load_hcl_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "a.hcl", "x = 1");
        let err = load(&path).unwrap_err();
        assert!(matches!(err.kind, crate::error::ErrorKind::Unsupported { .. }));
    }

    #[test]
    fn test_load_unknown_extension_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "a.xml", "<x/>");
        let err = load(&path).unwrap_err();
        assert!(matches!(err.kind, crate::error::ErrorKind::Unsupported { .. }));
    }

    #[test]
    fn test_load_non_object_top_level_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "a.json", "[1, 2]");
        let err = load(&path).unwrap_err();
        assert!(matches!(err.kind, crate::error::ErrorKind::Shape));
    }

    #[test]
    fn test_load_bad_json_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "a.json", "{broken");
        let err = load(&path).unwrap_err();
        assert!(matches!(err.kind, crate::error::ErrorKind::Parse));
        assert!(err.file.is_some());
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = load(FsPath::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err.kind, crate::error::ErrorKind::Io));
    }
}
