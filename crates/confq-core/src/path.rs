//! Path model
//!
//! Addresses positions inside a [`Value`] tree. A path is a sequence of
//! segments, each a mapping key or a sequence index. Paths have a textual
//! form (the path expression) used both in diagnostics and by user
//! expressions: `.key` for plain alphanumeric keys, `["quoted"]` otherwise,
//! `[n]` for indices.

use std::fmt;

use crate::error::{Error, Result};
use crate::value::Value;

/// A single step into a Value tree
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// A key in a mapping
    Key(String),
    /// An index in a sequence
    Index(usize),
}

impl Segment {
    /// Get the key name if this is a Key segment
    pub fn as_key(&self) -> Option<&str> {
        match self {
            Segment::Key(k) => Some(k),
            Segment::Index(_) => None,
        }
    }
}

impl From<&str> for Segment {
    fn from(s: &str) -> Self {
        Segment::Key(s.to_string())
    }
}

impl From<usize> for Segment {
    fn from(i: usize) -> Self {
        Segment::Index(i)
    }
}

/// An ordered sequence of segments addressing into a Value tree.
///
/// The empty path denotes the root; it is never a legal mutation target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Path {
    segments: Vec<Segment>,
}

impl Path {
    /// The root path (no segments)
    pub fn root() -> Self {
        Path { segments: vec![] }
    }

    /// Build a path from segments
    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Path { segments }
    }

    /// Number of segments
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// True for the root path
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The segments of this path
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The final segment, if any
    pub fn last(&self) -> Option<&Segment> {
        self.segments.last()
    }

    /// Append a segment, returning a new path
    pub fn child(&self, segment: Segment) -> Path {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Path { segments }
    }

    /// Drop the final `levels` segments, returning a new path
    pub fn parent(&self, levels: usize) -> Option<Path> {
        if levels > self.segments.len() {
            return None;
        }
        Some(Path {
            segments: self.segments[..self.segments.len() - levels].to_vec(),
        })
    }

    /// Replace the final segment with a mapping key, returning a new path
    pub fn with_last_key(&self, key: impl Into<String>) -> Path {
        let mut segments = self.segments.clone();
        segments.pop();
        segments.push(Segment::Key(key.into()));
        Path { segments }
    }

    /// Render this path as a path expression
    pub fn to_expression(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Key(k) => {
                    if !k.is_empty() && k.chars().all(|c| c.is_ascii_alphanumeric()) {
                        out.push('.');
                        out.push_str(k);
                    } else {
                        out.push_str("[\"");
                        for c in k.chars() {
                            match c {
                                '\\' => out.push_str("\\\\"),
                                '"' => out.push_str("\\\""),
                                _ => out.push(c),
                            }
                        }
                        out.push_str("\"]");
                    }
                }
                Segment::Index(i) => {
                    out.push('[');
                    out.push_str(&i.to_string());
                    out.push(']');
                }
            }
        }
        out
    }

    /// Parse a path expression.
    ///
    /// Inverse of [`Path::to_expression`]; additionally accepts bare
    /// identifiers with Unicode letters and underscores (`.日本語`, `._x`)
    /// and jq-style quoted keys after a dot (`."a b"`).
    pub fn parse(expr: &str) -> Result<Path> {
        let mut segments = Vec::new();
        let mut chars = expr.chars().peekable();

        loop {
            while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
                chars.next();
            }
            let Some(&c) = chars.peek() else { break };

            match c {
                '.' => {
                    chars.next();
                    match chars.peek() {
                        Some('"') => {
                            chars.next();
                            segments.push(Segment::Key(parse_quoted(&mut chars, expr)?));
                        }
                        // Bare keys: identifiers (Unicode letters and `_`)
                        // plus the plain alphanumeric keys the renderer emits
                        Some(&c0) if c0 == '_' || c0.is_alphanumeric() => {
                            let mut key = String::new();
                            while matches!(chars.peek(), Some(&c1) if c1 == '_' || c1.is_alphanumeric())
                            {
                                key.push(chars.next().unwrap());
                            }
                            segments.push(Segment::Key(key));
                        }
                        _ => {
                            return Err(Error::parse(format!(
                                "expected a key after '.' in path expression: {}",
                                expr
                            )))
                        }
                    }
                }
                '[' => {
                    chars.next();
                    match chars.peek() {
                        Some('"') => {
                            chars.next();
                            let key = parse_quoted(&mut chars, expr)?;
                            if chars.next() != Some(']') {
                                return Err(Error::parse(format!(
                                    "missing ']' in path expression: {}",
                                    expr
                                )));
                            }
                            segments.push(Segment::Key(key));
                        }
                        Some(c0) if c0.is_ascii_digit() => {
                            let mut digits = String::new();
                            while matches!(chars.peek(), Some(c1) if c1.is_ascii_digit()) {
                                digits.push(chars.next().unwrap());
                            }
                            if chars.next() != Some(']') {
                                return Err(Error::parse(format!(
                                    "missing ']' in path expression: {}",
                                    expr
                                )));
                            }
                            let index: usize = digits.parse().map_err(|_| {
                                Error::parse(format!("invalid index in path expression: {}", expr))
                            })?;
                            segments.push(Segment::Index(index));
                        }
                        _ => {
                            return Err(Error::parse(format!(
                                "expected an index or quoted key after '[' in path expression: {}",
                                expr
                            )))
                        }
                    }
                }
                _ => {
                    return Err(Error::parse(format!(
                        "unexpected character '{}' in path expression: {}",
                        c, expr
                    )))
                }
            }
        }

        Ok(Path { segments })
    }

    /// Render this path as a path array value (what user expressions see)
    pub fn to_value(&self) -> Value {
        Value::Sequence(
            self.segments
                .iter()
                .map(|s| match s {
                    Segment::Key(k) => Value::String(k.clone()),
                    Segment::Index(i) => Value::Integer(*i as i64),
                })
                .collect(),
        )
    }

    /// Interpret a path array value as a path.
    ///
    /// Strings become keys; non-negative integers (or integral floats, which
    /// is how the expression engine may represent them) become indices.
    pub fn from_value(v: &Value) -> Result<Path> {
        let Some(items) = v.as_sequence() else {
            return Err(Error::reference(format!(
                "a path must be an array of strings and indices, got {}",
                v.type_name()
            )));
        };
        let mut segments = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::String(s) => segments.push(Segment::Key(s.clone())),
                Value::Integer(i) if *i >= 0 => segments.push(Segment::Index(*i as usize)),
                Value::Float(f) if *f >= 0.0 && f.fract() == 0.0 => {
                    segments.push(Segment::Index(*f as usize))
                }
                other => {
                    return Err(Error::reference(format!(
                        "unsupported path segment: {}",
                        other
                    )))
                }
            }
        }
        Ok(Path { segments })
    }

    /// Follow this path inside `root`.
    ///
    /// Returns None if any segment meets a non-composite value, a missing
    /// key, or an out-of-range index.
    pub fn lookup<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        let mut current = root;
        for segment in &self.segments {
            current = match (segment, current) {
                (Segment::Key(k), Value::Mapping(m)) => m.get(k.as_str())?,
                (Segment::Index(i), Value::Sequence(s)) => s.get(*i)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Set `value` at this path inside `root`, creating intermediate
    /// mappings for missing keys and padding sequences with Null for
    /// indices past their end.
    pub fn put(&self, root: &mut Value, value: Value) -> Result<()> {
        let Some((last, intermediate)) = self.segments.split_last() else {
            return Err(Error::internal("cannot put at the root path"));
        };

        let mut current = root;
        for segment in intermediate {
            current = match (segment, current) {
                (Segment::Key(k), Value::Mapping(m)) => m
                    .entry(k.clone())
                    .or_insert_with(Value::empty_mapping),
                (Segment::Index(i), Value::Sequence(s)) => {
                    while s.len() <= *i {
                        s.push(Value::Null);
                    }
                    if s[*i].is_null() {
                        s[*i] = Value::empty_mapping();
                    }
                    &mut s[*i]
                }
                (segment, current) => {
                    return Err(Error::internal(format!(
                        "cannot descend {:?} into {}",
                        segment,
                        current.type_name()
                    )))
                }
            };
        }

        match (last, current) {
            (Segment::Key(k), Value::Mapping(m)) => {
                m.insert(k.clone(), value);
                Ok(())
            }
            (Segment::Index(i), Value::Sequence(s)) => {
                while s.len() <= *i {
                    s.push(Value::Null);
                }
                s[*i] = value;
                Ok(())
            }
            (segment, current) => Err(Error::internal(format!(
                "cannot put {:?} into {}",
                segment,
                current.type_name()
            ))),
        }
    }

    /// Remove the entry at this path inside `root`.
    ///
    /// A final mapping key is deleted; a final sequence index is replaced
    /// with Null so sibling indices captured earlier stay valid.
    pub fn remove(&self, root: &mut Value) -> Result<()> {
        let Some((last, intermediate)) = self.segments.split_last() else {
            return Err(Error::internal("cannot remove the root path"));
        };

        let mut current = root;
        for segment in intermediate {
            current = match (segment, current) {
                (Segment::Key(k), Value::Mapping(m)) => m
                    .get_mut(k.as_str())
                    .ok_or_else(|| Error::internal(format!("missing path: {}", self)))?,
                (Segment::Index(i), Value::Sequence(s)) => s
                    .get_mut(*i)
                    .ok_or_else(|| Error::internal(format!("missing path: {}", self)))?,
                _ => return Err(Error::internal(format!("missing path: {}", self))),
            };
        }

        match (last, current) {
            (Segment::Key(k), Value::Mapping(m)) => {
                m.shift_remove(k.as_str())
                    .ok_or_else(|| Error::internal(format!("missing path: {}", self)))?;
                Ok(())
            }
            (Segment::Index(i), Value::Sequence(s)) => {
                let slot = s
                    .get_mut(*i)
                    .ok_or_else(|| Error::internal(format!("missing path: {}", self)))?;
                *slot = Value::Null;
                Ok(())
            }
            _ => Err(Error::internal(format!("missing path: {}", self))),
        }
    }
}

/// Consume a quoted key after its opening `"`. A backslash escapes the
/// following character.
fn parse_quoted(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    expr: &str,
) -> Result<String> {
    let mut key = String::new();
    loop {
        match chars.next() {
            None => {
                return Err(Error::parse(format!(
                    "unterminated quoted key in path expression: {}",
                    expr
                )))
            }
            Some('"') => return Ok(key),
            Some('\\') => match chars.next() {
                Some(c) => key.push(c),
                None => {
                    return Err(Error::parse(format!(
                        "unterminated escape in path expression: {}",
                        expr
                    )))
                }
            },
            Some(c) => key.push(c),
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_expression())
    }
}

/// A path paired with the value found there
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub path: Path,
    pub value: Value,
}

/// Every path in `root` (interior and leaf positions) satisfying `pred`,
/// sorted ascending by path expression.
pub fn collect_paths(root: &Value, pred: impl Fn(&Path) -> bool) -> Vec<Path> {
    let mut all = Vec::new();
    walk(&Path::root(), root, &mut all);
    all.sort_by(|a, b| a.to_expression().cmp(&b.to_expression()));
    all.into_iter().filter(|p| pred(p)).collect()
}

/// Paths plus their current values
pub fn collect_entries(root: &Value, pred: impl Fn(&Path) -> bool) -> Vec<Entry> {
    collect_paths(root, pred)
        .into_iter()
        .filter_map(|path| {
            let value = path.lookup(root)?.clone();
            Some(Entry { path, value })
        })
        .collect()
}

fn walk(prefix: &Path, v: &Value, out: &mut Vec<Path>) {
    match v {
        Value::Mapping(m) => {
            for (k, child) in m {
                let p = prefix.child(Segment::Key(k.clone()));
                out.push(p.clone());
                walk(&p, child, out);
            }
        }
        Value::Sequence(s) => {
            for (i, child) in s.iter().enumerate() {
                let p = prefix.child(Segment::Index(i));
                out.push(p.clone());
                walk(&p, child, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn from_json(s: &str) -> Value {
        serde_json::from_str(s).unwrap()
    }

    fn path(segments: &[Segment]) -> Path {
        Path::from_segments(segments.to_vec())
    }

    #[test]
    fn test_expression_plain_keys() {
        let p = path(&["database".into(), "host".into()]);
        assert_eq!(p.to_expression(), ".database.host");
    }

    #[test]
    fn test_expression_quotes_non_alphanumeric_keys() {
        let p = path(&["a b".into(), "x\"y".into()]);
        assert_eq!(p.to_expression(), r#"["a b"]["x\"y"]"#);
    }

    #[test]
    fn test_expression_indices() {
        let p = path(&["servers".into(), 0.into(), "host".into()]);
        assert_eq!(p.to_expression(), ".servers[0].host");
    }

    #[test]
    fn test_parse_simple() {
        assert_eq!(
            Path::parse(".database.host").unwrap(),
            path(&["database".into(), "host".into()])
        );
    }

    #[test]
    fn test_parse_indices_and_quoted() {
        assert_eq!(
            Path::parse(r#".servers[1]["a b"]"#).unwrap(),
            path(&["servers".into(), 1.into(), "a b".into()])
        );
    }

    #[test]
    fn test_parse_jq_style_quoted_key() {
        assert_eq!(
            Path::parse(r#"."a.b".c"#).unwrap(),
            path(&["a.b".into(), "c".into()])
        );
    }

    #[test]
    fn test_parse_unicode_identifier() {
        assert_eq!(
            Path::parse(".日本語._x9").unwrap(),
            path(&["日本語".into(), "_x9".into()])
        );
    }

    #[test]
    fn test_parse_empty_is_root() {
        assert_eq!(Path::parse("").unwrap(), Path::root());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Path::parse("database").is_err());
        assert!(Path::parse(".a[").is_err());
        assert!(Path::parse(".a]").is_err());
        assert!(Path::parse("[abc]").is_err());
    }

    #[test]
    fn test_roundtrip() {
        let cases = vec![
            Path::root(),
            path(&["a".into()]),
            path(&["a".into(), 3.into(), "b c".into()]),
            path(&["we\"ird\\key".into(), 0.into()]),
            path(&["eval:array:.a".into()]),
            path(&["42".into(), "0abc".into()]),
        ];
        for p in cases {
            assert_eq!(Path::parse(&p.to_expression()).unwrap(), p);
        }
    }

    #[test]
    fn test_path_value_roundtrip() {
        let p = path(&["a".into(), 2.into(), "b".into()]);
        assert_eq!(Path::from_value(&p.to_value()).unwrap(), p);
    }

    #[test]
    fn test_from_value_rejects_bad_segments() {
        assert!(Path::from_value(&Value::String("not an array".into())).is_err());
        assert!(Path::from_value(&Value::Sequence(vec![Value::Bool(true)])).is_err());
        assert!(Path::from_value(&Value::Sequence(vec![Value::Integer(-1)])).is_err());
    }

    #[test]
    fn test_from_value_accepts_integral_floats() {
        let v = Value::Sequence(vec![Value::String("a".into()), Value::Float(2.0)]);
        assert_eq!(
            Path::from_value(&v).unwrap(),
            path(&["a".into(), 2.into()])
        );
    }

    #[test]
    fn test_lookup() {
        let root = from_json(r#"{"a": {"b": [10, 20]}}"#);
        assert_eq!(
            path(&["a".into(), "b".into(), 1.into()]).lookup(&root),
            Some(&Value::Integer(20))
        );
        assert_eq!(path(&["a".into(), "x".into()]).lookup(&root), None);
        assert_eq!(
            path(&["a".into(), "b".into(), 9.into()]).lookup(&root),
            None
        );
        assert_eq!(
            path(&["a".into(), "b".into(), 0.into(), "z".into()]).lookup(&root),
            None
        );
    }

    #[test]
    fn test_lookup_root() {
        let root = from_json(r#"{"a": 1}"#);
        assert_eq!(Path::root().lookup(&root), Some(&root));
    }

    #[test]
    fn test_put_creates_intermediate_mappings() {
        let mut root = Value::empty_mapping();
        path(&["a".into(), "b".into(), "c".into()])
            .put(&mut root, Value::Integer(42))
            .unwrap();
        assert_eq!(root, from_json(r#"{"a": {"b": {"c": 42}}}"#));
    }

    #[test]
    fn test_put_pads_sequences_with_null() {
        let mut root = from_json(r#"{"a": [1]}"#);
        path(&["a".into(), 3.into()])
            .put(&mut root, Value::Integer(9))
            .unwrap();
        assert_eq!(root, from_json(r#"{"a": [1, null, null, 9]}"#));
    }

    #[test]
    fn test_put_wrong_kind_fails() {
        let mut root = from_json(r#"{"a": [1]}"#);
        assert!(path(&["a".into(), "k".into()])
            .put(&mut root, Value::Null)
            .is_err());
        assert!(path(&[0.into()]).put(&mut root, Value::Null).is_err());
    }

    #[test]
    fn test_put_root_fails() {
        let mut root = Value::empty_mapping();
        assert!(Path::root().put(&mut root, Value::Null).is_err());
    }

    #[test]
    fn test_remove_mapping_key_deletes() {
        let mut root = from_json(r#"{"a": 1, "b": 2}"#);
        path(&["a".into()]).remove(&mut root).unwrap();
        assert_eq!(root, from_json(r#"{"b": 2}"#));
    }

    #[test]
    fn test_remove_sequence_index_nulls_in_place() {
        let mut root = from_json(r#"{"a": [1, 2, 3]}"#);
        path(&["a".into(), 1.into()]).remove(&mut root).unwrap();
        assert_eq!(root, from_json(r#"{"a": [1, null, 3]}"#));
    }

    #[test]
    fn test_remove_missing_fails() {
        let mut root = from_json(r#"{"a": 1}"#);
        assert!(path(&["x".into()]).remove(&mut root).is_err());
        assert!(Path::root().remove(&mut root).is_err());
    }

    #[test]
    fn test_collect_paths_sorted_by_expression() {
        let root = from_json(r#"{"b": {"y": 1, "x": 2}, "a": [true, false]}"#);
        let exprs: Vec<_> = collect_paths(&root, |_| true)
            .iter()
            .map(|p| p.to_expression())
            .collect();
        assert_eq!(exprs, vec![".a", ".a[0]", ".a[1]", ".b", ".b.x", ".b.y"]);
    }

    #[test]
    fn test_collect_paths_deterministic() {
        let root = from_json(r#"{"z": {"k": [1, {"q": 2}]}, "a": 1}"#);
        let first = collect_paths(&root, |_| true);
        let second = collect_paths(&root, |_| true);
        assert_eq!(first, second);
    }

    #[test]
    fn test_collect_paths_filters() {
        let root = from_json(r#"{"a": {"b": 1}, "c": 2}"#);
        let found = collect_paths(&root, |p| {
            matches!(p.last(), Some(Segment::Key(k)) if k == "b")
        });
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].to_expression(), ".a.b");
    }

    #[test]
    fn test_collect_entries() {
        let root = from_json(r#"{"a": {"b": 1}}"#);
        let entries = collect_entries(&root, |p| p.len() == 2);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path.to_expression(), ".a.b");
        assert_eq!(entries[0].value, Value::Integer(1));
    }

    #[test]
    fn test_parent_and_child() {
        let p = path(&["a".into(), "b".into(), 0.into()]);
        assert_eq!(p.parent(1).unwrap(), path(&["a".into(), "b".into()]));
        assert_eq!(p.parent(3).unwrap(), Path::root());
        assert!(p.parent(4).is_none());
        assert_eq!(
            p.parent(1).unwrap().child(Segment::Index(0)),
            path(&["a".into(), "b".into(), 0.into()])
        );
    }

    #[test]
    fn test_with_last_key() {
        let p = path(&["a".into(), "eval:.x".into()]);
        assert_eq!(p.with_last_key("y"), path(&["a".into(), "y".into()]));
    }
}
