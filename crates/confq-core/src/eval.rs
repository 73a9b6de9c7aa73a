//! Evaluator harness and fixpoint processors
//!
//! [`evaluate`] drives the expression engine for one expression: module
//! imports are composed in front of the expression, custom functions and
//! sorted variables are bound, one result is consumed and type-checked.
//!
//! [`process_keys`] and [`process_values`] scan the document for sentinel
//! keys and values, rewrite them, and recurse until nothing is left or the
//! TTL runs out. Keys are processed before values; each pass works on a
//! fresh deep copy so the paths enumerated up front stay valid.

use log::{debug, trace};

use crate::builtins;
use crate::engine::{self, Compiler};
use crate::error::{Error, Result};
use crate::invocation::InvocationSpec;
use crate::path::{self, Path, Segment};
use crate::sentinel::{self, JsonType, Sentinel};
use crate::value::Value;

/// Default number of fixpoint passes each processor may take
pub const DEFAULT_TTL: i64 = 7;

/// Variable holding the current path as a path array
pub const VAR_CURRENT_PATH: &str = "$cur";
/// Variable holding the current path expression string
pub const VAR_CURRENT_PATH_EXPR: &str = "$curexpr";

/// Evaluate one expression against `self_value` and require the result to
/// satisfy one of `expected`.
pub fn evaluate(
    self_value: &Value,
    expression: &str,
    expected: &[JsonType],
    spec: &InvocationSpec,
) -> Result<Value> {
    let source = compose_expression(expression, &spec.module_names());
    trace!("evaluating: {}", source);

    let query =
        engine::parse(&source).map_err(|e| Error::expression(&source, e.to_string()))?;

    let mut compiler = Compiler::new().with_variables(spec.variable_names());
    for module in spec.modules() {
        compiler = compiler.with_module(module.clone());
    }
    for function in spec.functions() {
        compiler = compiler.with_function(function.clone());
    }
    let code = compiler
        .compile(query)
        .map_err(|e| Error::expression(&source, e.to_string()))?;

    let result = code
        .run(self_value, &spec.variable_values())
        .next()
        .ok_or_else(|| Error::expression(&source, "no result produced"))?
        .map_err(|e| Error::expression(&source, e.to_string()))?;

    if !expected.iter().any(|t| t.matches(&result)) {
        let wanted = expected
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(" or ");
        return Err(Error::type_mismatch(wanted, result.type_name())
            .with_cause(format!("expression: {}", expression)));
    }
    Ok(result)
}

/// Prefix `import "NAME" as NAME; ` for every module, then the expression
fn compose_expression(expression: &str, module_names: &[String]) -> String {
    let mut parts: Vec<String> = module_names
        .iter()
        .map(|name| format!(r#"import "{}" as {}"#, name, name))
        .collect();
    parts.push(expression.to_string());
    parts.join("; ")
}

/// Resolve one sentinel string found at `path`: strip `raw:`, evaluate
/// `eval:` with the contextual built-ins and `$cur`/`$curexpr` bound, pass
/// anything else through.
pub(crate) fn evaluate_string(
    s: &str,
    path: &Path,
    self_value: &Value,
    base_spec: &InvocationSpec,
) -> Result<Value> {
    match sentinel::classify(s) {
        Sentinel::Raw(rest) => Ok(Value::String(rest.to_string())),
        Sentinel::Plain => Ok(Value::String(s.to_string())),
        Sentinel::Eval {
            expression,
            expected,
        } => {
            let builder = base_spec
                .to_builder()
                .add_variable(VAR_CURRENT_PATH, path.to_value())
                .add_variable(
                    VAR_CURRENT_PATH_EXPR,
                    Value::String(path.to_expression()),
                );
            let spec =
                builtins::install(builder, self_value, path, expression, base_spec).build();
            evaluate(self_value, expression, &[expected], &spec)
                .map_err(|e| e.with_path(path.to_expression()))
        }
    }
}

/// One planned key rewrite: the path whose final key changes, and the
/// replacement key names
struct KeyChange {
    path: Path,
    new_keys: Vec<String>,
}

/// Rewrite sentinel keys until none remain.
///
/// A key expansion may produce several keys (expected type array); the
/// value is duplicated under each.
pub fn process_keys(obj: &Value, ttl: i64, spec: &InvocationSpec) -> Result<Value> {
    let eligible = path::collect_paths(obj, |p| {
        matches!(p.last(), Some(Segment::Key(k)) if sentinel::has_sentinel_prefix(k))
    });
    if eligible.is_empty() {
        return Ok(obj.clone());
    }
    if ttl <= 0 {
        return Err(Error::ttl_exhausted(
            eligible.len(),
            format!("unresolved keys at: {}", join_paths(&eligible)),
        ));
    }
    debug!("key pass (ttl {}): {} sentinel keys", ttl, eligible.len());

    let mut changes = Vec::with_capacity(eligible.len());
    for p in &eligible {
        let key = p
            .last()
            .and_then(Segment::as_key)
            .ok_or_else(|| Error::internal("eligible key path without a key segment"))?;
        let new_keys = match sentinel::classify(key) {
            Sentinel::Raw(rest) => vec![rest.to_string()],
            Sentinel::Eval {
                expression,
                expected,
            } => {
                if expected != JsonType::String && expected != JsonType::Array {
                    return Err(Error::type_mismatch("string or array", expected.to_string())
                        .with_path(p.to_expression())
                        .with_cause("a key expression must produce replacement key names"));
                }
                let parent = p
                    .parent(1)
                    .ok_or_else(|| Error::internal("key path has no parent"))?;
                let key_spec = spec
                    .to_builder()
                    .add_variable(VAR_CURRENT_PATH, parent.to_value())
                    .build();
                let result = evaluate(
                    obj,
                    expression,
                    &[JsonType::String, JsonType::Array],
                    &key_spec,
                )
                .map_err(|e| e.with_path(p.to_expression()))?;
                to_key_names(&result).map_err(|e| e.with_path(p.to_expression()))?
            }
            Sentinel::Plain => {
                return Err(Error::internal("eligible key without a sentinel prefix"))
            }
        };
        changes.push(KeyChange {
            path: p.clone(),
            new_keys,
        });
    }

    let mut out = obj.clone();
    for change in &changes {
        // An earlier change in this pass may have moved this container;
        // the next pass will find the key at its new location.
        let Some(value) = change.path.lookup(&out).cloned() else {
            trace!("key at {} moved during this pass, deferring", change.path);
            continue;
        };
        change.path.remove(&mut out)?;
        for key in &change.new_keys {
            change
                .path
                .with_last_key(key.clone())
                .put(&mut out, value.clone())?;
        }
    }

    process_keys(&out, ttl - 1, spec)
}

/// A key expression result: one name or an array of names
fn to_key_names(v: &Value) -> Result<Vec<String>> {
    match v {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Sequence(items) => items
            .iter()
            .map(|item| {
                item.as_str().map(String::from).ok_or_else(|| {
                    Error::type_mismatch("string", item.type_name())
                        .with_cause("replacement key names must be strings")
                })
            })
            .collect(),
        other => Err(Error::type_mismatch("string or array", other.type_name())),
    }
}

/// Rewrite sentinel values until none remain.
pub fn process_values(obj: &Value, ttl: i64, spec: &InvocationSpec) -> Result<Value> {
    let entries: Vec<path::Entry> = path::collect_entries(obj, |_| true)
        .into_iter()
        .filter(|e| matches!(&e.value, Value::String(s) if sentinel::has_sentinel_prefix(s)))
        .collect();
    if entries.is_empty() {
        return Ok(obj.clone());
    }
    if ttl <= 0 {
        let paths: Vec<Path> = entries.iter().map(|e| e.path.clone()).collect();
        return Err(Error::ttl_exhausted(
            entries.len(),
            format!("unresolved values at: {}", join_paths(&paths)),
        ));
    }
    debug!("value pass (ttl {}): {} sentinel values", ttl, entries.len());

    let mut out = obj.clone();
    let mut replacements = Vec::with_capacity(entries.len());
    for entry in &entries {
        let s = entry
            .value
            .as_str()
            .ok_or_else(|| Error::internal("eligible value is not a string"))?;
        let replacement = evaluate_string(s, &entry.path, &out, spec)?;
        replacements.push((entry.path.clone(), replacement));
    }
    for (p, v) in replacements {
        p.put(&mut out, v)?;
    }

    process_values(&out, ttl - 1, spec)
}

fn join_paths(paths: &[Path]) -> String {
    paths
        .iter()
        .map(Path::to_expression)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn from_json(s: &str) -> Value {
        serde_json::from_str(s).unwrap()
    }

    fn keys(input: &str) -> Result<Value> {
        process_keys(&from_json(input), DEFAULT_TTL, &InvocationSpec::empty())
    }

    fn values(input: &str) -> Result<Value> {
        process_values(&from_json(input), DEFAULT_TTL, &InvocationSpec::empty())
    }

    #[test]
    fn test_evaluate_simple_navigation() {
        let out = evaluate(
            &from_json(r#"{"a": "Hello"}"#),
            ".a",
            &[JsonType::String],
            &InvocationSpec::empty(),
        )
        .unwrap();
        assert_eq!(out, Value::String("Hello".into()));
    }

    #[test]
    fn test_evaluate_type_mismatch() {
        let err = evaluate(
            &from_json(r#"{"a": [1]}"#),
            ".a",
            &[JsonType::String],
            &InvocationSpec::empty(),
        )
        .unwrap_err();
        assert!(matches!(
            err.kind,
            crate::error::ErrorKind::TypeMismatch { .. }
        ));
    }

    #[test]
    fn test_evaluate_parse_error_carries_expression() {
        let err = evaluate(
            &Value::Null,
            ".a |",
            &[JsonType::String],
            &InvocationSpec::empty(),
        )
        .unwrap_err();
        match err.kind {
            crate::error::ErrorKind::Expression { expression } => {
                assert!(expression.contains(".a |"))
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_compose_expression_imports() {
        assert_eq!(
            compose_expression(".a", &["m1".into(), "m2".into()]),
            r#"import "m1" as m1; import "m2" as m2; .a"#
        );
        assert_eq!(compose_expression(".a", &[]), ".a");
    }

    #[test]
    fn test_value_side_eval() {
        let out = values(r#"{"a": "Hello", "X": "eval:.a"}"#).unwrap();
        assert_eq!(out, from_json(r#"{"a": "Hello", "X": "Hello"}"#));
    }

    #[test]
    fn test_value_side_raw() {
        let out = values(r#"{"X": "raw:eval:.a"}"#).unwrap();
        assert_eq!(out, from_json(r#"{"X": "eval:.a"}"#));
    }

    #[test]
    fn test_value_side_typed_results() {
        let out = values(
            r#"{"n": "eval:number:.src", "b": "eval:bool:.src == 42", "src": 42}"#,
        )
        .unwrap();
        assert_eq!(
            out,
            from_json(r#"{"n": 42, "b": true, "src": 42}"#)
        );
    }

    #[test]
    fn test_value_side_object_and_array_results() {
        let out = values(r#"{"o": "eval:object:{k: .src}", "a": "eval:array:[.src]", "src": 1}"#)
            .unwrap();
        assert_eq!(
            out,
            from_json(r#"{"o": {"k": 1}, "a": [1], "src": 1}"#)
        );
    }

    #[test]
    fn test_value_side_type_enforced() {
        let err = values(r#"{"n": "eval:number:.src", "src": "not a number"}"#).unwrap_err();
        assert!(matches!(
            err.kind,
            crate::error::ErrorKind::TypeMismatch { .. }
        ));
    }

    #[test]
    fn test_value_side_curexpr_binding() {
        let out = values(r#"{"outer": {"me": "eval:$curexpr"}}"#).unwrap();
        assert_eq!(
            out,
            from_json(r#"{"outer": {"me": ".outer.me"}}"#)
        );
    }

    #[test]
    fn test_value_side_cur_binding() {
        let out = values(r#"{"outer": {"me": "eval:array:$cur"}}"#).unwrap();
        assert_eq!(
            out,
            from_json(r#"{"outer": {"me": ["outer", "me"]}}"#)
        );
    }

    #[test]
    fn test_value_side_parent_builtin() {
        let out = values(r#"{"outer": {"me": "eval:parentexpr"}}"#).unwrap();
        assert_eq!(out, from_json(r#"{"outer": {"me": ".outer"}}"#));
    }

    #[test]
    fn test_value_side_ref_builtin_resolves_sentinel_target() {
        let out = values(
            r#"{"greeting": "eval:.name", "name": "World", "msg": "eval:ref(topath(\".greeting\"))"}"#,
        )
        .unwrap();
        assert_eq!(
            out,
            from_json(r#"{"greeting": "World", "name": "World", "msg": "World"}"#)
        );
    }

    #[test]
    fn test_value_side_chains_resolve_over_passes() {
        let out = values(r#"{"a": "eval:.b", "b": "eval:.c", "c": "done"}"#).unwrap();
        assert_eq!(
            out,
            from_json(r#"{"a": "done", "b": "done", "c": "done"}"#)
        );
    }

    #[test]
    fn test_value_side_ttl_exhaustion() {
        // A chain needing eight passes fails with the default of seven
        let mut doc = String::from("{");
        for i in 0..8 {
            doc.push_str(&format!(r#""x{}": "eval:.x{}", "#, i, i + 1));
        }
        doc.push_str(r#""x8": "v"}"#);

        let err = values(&doc).unwrap_err();
        assert!(matches!(
            err.kind,
            crate::error::ErrorKind::TtlExhausted { .. }
        ));

        // One link shorter resolves
        let mut doc = String::from("{");
        for i in 0..7 {
            doc.push_str(&format!(r#""x{}": "eval:.x{}", "#, i, i + 1));
        }
        doc.push_str(r#""x7": "v"}"#);
        let out = values(&doc).unwrap();
        assert_eq!(
            out.as_mapping().unwrap()["x0"],
            Value::String("v".into())
        );
    }

    #[test]
    fn test_key_side_raw() {
        let out = keys(r#"{"raw:eval:x": 1}"#).unwrap();
        assert_eq!(out, from_json(r#"{"eval:x": 1}"#));
    }

    #[test]
    fn test_key_side_eval_string() {
        let out = keys(r#"{"name": "greeting", "eval:.name": "hi"}"#).unwrap();
        assert_eq!(
            out,
            from_json(r#"{"name": "greeting", "greeting": "hi"}"#)
        );
    }

    #[test]
    fn test_key_side_array_expansion() {
        let out = keys(r#"{"a": ["Hello", "Howdy"], "eval:array:.a": "X"}"#).unwrap();
        assert_eq!(
            out,
            from_json(r#"{"a": ["Hello", "Howdy"], "Hello": "X", "Howdy": "X"}"#)
        );
    }

    #[test]
    fn test_key_side_cur_is_parent_path() {
        let out = keys(r#"{"outer": {"eval:$cur[0]": 1}}"#).unwrap();
        assert_eq!(out, from_json(r#"{"outer": {"outer": 1}}"#));
    }

    #[test]
    fn test_key_side_rejects_non_key_type_token() {
        let err = keys(r#"{"eval:object:{}": 1}"#).unwrap_err();
        assert!(matches!(
            err.kind,
            crate::error::ErrorKind::TypeMismatch { .. }
        ));
    }

    #[test]
    fn test_key_side_rejects_non_string_elements() {
        let err = keys(r#"{"a": [1], "eval:array:.a": "X"}"#).unwrap_err();
        assert!(matches!(
            err.kind,
            crate::error::ErrorKind::TypeMismatch { .. }
        ));
    }

    #[test]
    fn test_key_side_ttl_exhaustion() {
        // Each pass peels one layer; nine layers cannot finish in seven
        let mut doc = String::from(r#"{"k0": "k1", "#);
        for i in 0..9 {
            let prefix = "raw:".repeat(9 - i);
            doc.push_str(&format!(r#""{}k{}": {}, "#, prefix, i, i));
        }
        doc.pop();
        doc.pop();
        doc.push('}');
        let err = keys(&doc).unwrap_err();
        assert!(matches!(
            err.kind,
            crate::error::ErrorKind::TtlExhausted { .. }
        ));
    }

    #[test]
    fn test_key_side_values_preserved_deeply() {
        let out = keys(r#"{"raw:k": {"nested": [1, {"deep": true}]}}"#).unwrap();
        assert_eq!(
            out,
            from_json(r#"{"k": {"nested": [1, {"deep": true}]}}"#)
        );
    }

    #[test]
    fn test_idempotence_on_resolved_documents() {
        let resolved = r#"{"a": 1, "b": {"c": ["x", null]}, "d": "plain"}"#;
        let after_keys = keys(resolved).unwrap();
        assert_eq!(after_keys, from_json(resolved));
        let after_values = values(resolved).unwrap();
        assert_eq!(after_values, from_json(resolved));
    }

    #[test]
    fn test_inputs_not_mutated() {
        let input = from_json(r#"{"X": "eval:.a", "a": "v"}"#);
        let _ = process_values(&input, DEFAULT_TTL, &InvocationSpec::empty()).unwrap();
        assert_eq!(input, from_json(r#"{"X": "eval:.a", "a": "v"}"#));
    }
}
