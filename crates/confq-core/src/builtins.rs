//! Contextual built-in functions
//!
//! The functions available to `eval:` value expressions: `parent` /
//! `parentof` and their path-expression variants, `ref` / `refexpr`, and
//! the `topath` / `topathexpr` conversion helpers. They close over the
//! document under evaluation, the current path, the expression text (for
//! diagnostics), and the base invocation spec, so they are rebuilt for
//! every evaluation rather than registered globally.

use std::cell::Cell;

use crate::engine::NativeFn;
use crate::error::Result;
use crate::eval;
use crate::invocation::{InvocationSpec, InvocationSpecBuilder};
use crate::path::Path;
use crate::value::Value;

/// `ref` re-enters string evaluation; chains deeper than this are treated
/// as unresolvable self-references.
const MAX_REF_DEPTH: usize = 64;

thread_local! {
    static REF_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Register all contextual built-ins on `builder`
pub(crate) fn install(
    builder: InvocationSpecBuilder,
    self_value: &Value,
    current_path: &Path,
    expression: &str,
    base_spec: &InvocationSpec,
) -> InvocationSpecBuilder {
    builder
        .add_function(topath_fn())
        .add_function(topathexpr_fn())
        .add_function(parentof_fn(current_path, expression))
        .add_function(parent_fn(current_path, expression))
        .add_function(parentofexpr_fn(current_path, expression))
        .add_function(parentexpr_fn(current_path, expression))
        .add_function(ref_fn(self_value, expression, base_spec))
        .add_function(refexpr_fn(self_value, expression, base_spec))
}

fn topath_fn() -> NativeFn {
    NativeFn::new("topath", 1, 1, |_input, args| {
        let expr = args[0]
            .as_str()
            .ok_or_else(|| format!("topath expects a path expression string, got {}", args[0].type_name()))?;
        let path = Path::parse(expr).map_err(|e| e.to_string())?;
        Ok(path.to_value())
    })
}

fn topathexpr_fn() -> NativeFn {
    NativeFn::new("topathexpr", 1, 1, |_input, args| {
        let path = Path::from_value(&args[0]).map_err(|e| e.to_string())?;
        Ok(Value::String(path.to_expression()))
    })
}

fn parentof_fn(current_path: &Path, expression: &str) -> NativeFn {
    let ctx = context(current_path, expression);
    NativeFn::new("parentof", 1, 2, move |_input, args| {
        drop_levels(&args[0], args.get(1), &ctx).map(|p| p.to_value())
    })
}

fn parent_fn(current_path: &Path, expression: &str) -> NativeFn {
    let ctx = context(current_path, expression);
    let cur = current_path.to_value();
    NativeFn::new("parent", 0, 1, move |_input, args| {
        drop_levels(&cur, args.first(), &ctx).map(|p| p.to_value())
    })
}

fn parentofexpr_fn(current_path: &Path, expression: &str) -> NativeFn {
    let ctx = context(current_path, expression);
    NativeFn::new("parentofexpr", 1, 2, move |_input, args| {
        drop_levels(&args[0], args.get(1), &ctx).map(|p| Value::String(p.to_expression()))
    })
}

fn parentexpr_fn(current_path: &Path, expression: &str) -> NativeFn {
    let ctx = context(current_path, expression);
    let cur = current_path.to_value();
    NativeFn::new("parentexpr", 0, 1, move |_input, args| {
        drop_levels(&cur, args.first(), &ctx).map(|p| Value::String(p.to_expression()))
    })
}

fn ref_fn(self_value: &Value, expression: &str, base_spec: &InvocationSpec) -> NativeFn {
    let self_value = self_value.clone();
    let base_spec = base_spec.clone();
    let expression = expression.to_string();
    NativeFn::new("ref", 1, 1, move |_input, args| {
        let path = Path::from_value(&args[0]).map_err(|e| e.to_string())?;
        resolve_ref(&self_value, &path, &expression, &base_spec)
    })
}

fn refexpr_fn(self_value: &Value, expression: &str, base_spec: &InvocationSpec) -> NativeFn {
    let self_value = self_value.clone();
    let base_spec = base_spec.clone();
    let expression = expression.to_string();
    NativeFn::new("refexpr", 1, 1, move |_input, args| {
        let pexp = args[0].as_str().ok_or_else(|| {
            format!(
                "refexpr expects a path expression string, got {}",
                args[0].type_name()
            )
        })?;
        let path = Path::parse(pexp).map_err(|e| e.to_string())?;
        resolve_ref(&self_value, &path, &expression, &base_spec)
    })
}

/// Look up the referent; a string value is evaluated in place with the
/// referent's own path as current path.
fn resolve_ref(
    self_value: &Value,
    path: &Path,
    expression: &str,
    base_spec: &InvocationSpec,
) -> std::result::Result<Value, String> {
    let Some(target) = path.lookup(self_value) else {
        return Err(format!(
            "expression: {}; path {} not found in document",
            expression, path
        ));
    };
    let Some(s) = target.as_str() else {
        return Ok(target.clone());
    };

    let depth = REF_DEPTH.with(|d| d.get());
    if depth >= MAX_REF_DEPTH {
        return Err(format!(
            "expression: {}; ref chain deeper than {} at {}",
            expression, MAX_REF_DEPTH, path
        ));
    }
    REF_DEPTH.with(|d| d.set(depth + 1));
    let result = string_value(s, path, self_value, base_spec);
    REF_DEPTH.with(|d| d.set(depth));
    result.map_err(|e| format!("expression: {}; ref({}) failed: {}", expression, path, e))
}

fn string_value(
    s: &str,
    path: &Path,
    self_value: &Value,
    base_spec: &InvocationSpec,
) -> Result<Value> {
    eval::evaluate_string(s, path, self_value, base_spec)
}

#[derive(Clone)]
struct Context {
    current: String,
    expression: String,
}

fn context(current_path: &Path, expression: &str) -> Context {
    Context {
        current: current_path.to_expression(),
        expression: expression.to_string(),
    }
}

/// Interpret `path_value` as a path and drop its last `level` segments
/// (one by default)
fn drop_levels(
    path_value: &Value,
    level: Option<&Value>,
    ctx: &Context,
) -> std::result::Result<Path, String> {
    let levels = match level {
        None => 1,
        Some(Value::Integer(i)) if *i >= 0 => *i as usize,
        Some(Value::Float(f)) if *f >= 0.0 && f.fract() == 0.0 => *f as usize,
        Some(other) => {
            return Err(format!(
                "expression: {} at {}: level must be a non-negative integer, got {}",
                ctx.expression,
                ctx.current,
                other.type_name()
            ))
        }
    };
    let path = Path::from_value(path_value)
        .map_err(|e| format!("expression: {} at {}: {}", ctx.expression, ctx.current, e))?;
    path.parent(levels).ok_or_else(|| {
        format!(
            "expression: {} at {}: level {} exceeds path depth {}",
            ctx.expression,
            ctx.current,
            levels,
            path.len()
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn from_json(s: &str) -> Value {
        serde_json::from_str(s).unwrap()
    }

    fn call(f: &NativeFn, args: &[Value]) -> std::result::Result<Value, String> {
        (f.f)(&Value::Null, args)
    }

    fn cur() -> Path {
        Path::parse(".a.b[0]").unwrap()
    }

    #[test]
    fn test_topath() {
        let f = topath_fn();
        assert_eq!(
            call(&f, &[Value::String(".a[1]".into())]).unwrap(),
            from_json(r#"["a", 1]"#)
        );
        assert!(call(&f, &[Value::Integer(1)]).is_err());
        assert!(call(&f, &[Value::String("garbage".into())]).is_err());
    }

    #[test]
    fn test_topathexpr() {
        let f = topathexpr_fn();
        assert_eq!(
            call(&f, &[from_json(r#"["a", 1, "b c"]"#)]).unwrap(),
            Value::String(r#".a[1]["b c"]"#.into())
        );
        assert!(call(&f, &[Value::String("not an array".into())]).is_err());
    }

    #[test]
    fn test_parent_defaults_to_one_level() {
        let f = parent_fn(&cur(), ".x");
        assert_eq!(call(&f, &[]).unwrap(), from_json(r#"["a", "b"]"#));
    }

    #[test]
    fn test_parent_with_level() {
        let f = parent_fn(&cur(), ".x");
        assert_eq!(
            call(&f, &[Value::Integer(2)]).unwrap(),
            from_json(r#"["a"]"#)
        );
        assert_eq!(call(&f, &[Value::Integer(3)]).unwrap(), from_json("[]"));
    }

    #[test]
    fn test_parent_level_too_deep() {
        let f = parent_fn(&cur(), ".x");
        let err = call(&f, &[Value::Integer(4)]).unwrap_err();
        assert!(err.contains("exceeds path depth"));
    }

    #[test]
    fn test_parent_level_must_be_integer() {
        let f = parent_fn(&cur(), ".x");
        assert!(call(&f, &[Value::String("2".into())]).is_err());
    }

    #[test]
    fn test_parentof() {
        let f = parentof_fn(&cur(), ".x");
        assert_eq!(
            call(&f, &[from_json(r#"["q", "r"]"#)]).unwrap(),
            from_json(r#"["q"]"#)
        );
        assert_eq!(
            call(&f, &[from_json(r#"["q", "r"]"#), Value::Integer(2)]).unwrap(),
            from_json("[]")
        );
        assert!(call(&f, &[Value::String("not a path".into())]).is_err());
    }

    #[test]
    fn test_parentexpr_renders_expression() {
        let f = parentexpr_fn(&cur(), ".x");
        assert_eq!(call(&f, &[]).unwrap(), Value::String(".a.b".into()));
    }

    #[test]
    fn test_parentofexpr_renders_expression() {
        let f = parentofexpr_fn(&cur(), ".x");
        assert_eq!(
            call(&f, &[from_json(r#"["servers", 0, "host"]"#)]).unwrap(),
            Value::String(".servers[0]".into())
        );
    }

    #[test]
    fn test_ref_returns_non_string_unchanged() {
        let doc = from_json(r#"{"a": {"b": [1, 2]}}"#);
        let f = ref_fn(&doc, ".x", &InvocationSpec::empty());
        assert_eq!(
            call(&f, &[from_json(r#"["a", "b"]"#)]).unwrap(),
            from_json("[1, 2]")
        );
    }

    #[test]
    fn test_ref_evaluates_string_referent() {
        let doc = from_json(r#"{"name": "eval:.greeting", "greeting": "Hello"}"#);
        let f = ref_fn(&doc, ".x", &InvocationSpec::empty());
        assert_eq!(
            call(&f, &[from_json(r#"["name"]"#)]).unwrap(),
            Value::String("Hello".into())
        );
    }

    #[test]
    fn test_ref_plain_string_passes_through() {
        let doc = from_json(r#"{"name": "plain"}"#);
        let f = ref_fn(&doc, ".x", &InvocationSpec::empty());
        assert_eq!(
            call(&f, &[from_json(r#"["name"]"#)]).unwrap(),
            Value::String("plain".into())
        );
    }

    #[test]
    fn test_ref_missing_path_errors() {
        let doc = from_json(r#"{"a": 1}"#);
        let f = ref_fn(&doc, ".x", &InvocationSpec::empty());
        let err = call(&f, &[from_json(r#"["nope"]"#)]).unwrap_err();
        assert!(err.contains("not found"));
    }

    #[test]
    fn test_ref_self_reference_reports_depth() {
        let doc = from_json(r#"{"a": "eval:ref(topath(\".a\"))"}"#);
        let f = ref_fn(&doc, ".x", &InvocationSpec::empty());
        let err = call(&f, &[from_json(r#"["a"]"#)]).unwrap_err();
        assert!(err.contains("deeper than"), "got: {}", err);
    }

    #[test]
    fn test_refexpr_takes_expression_string() {
        let doc = from_json(r#"{"a": {"b": 5}}"#);
        let f = refexpr_fn(&doc, ".x", &InvocationSpec::empty());
        assert_eq!(
            call(&f, &[Value::String(".a.b".into())]).unwrap(),
            Value::Integer(5)
        );
        assert!(call(&f, &[from_json("[1]")]).is_err());
    }
}
