//! Sentinel string classification
//!
//! Strings reachable as mapping values or mapping keys may carry a sentinel
//! prefix: `raw:` (strip the prefix, use the remainder literally) or `eval:`
//! (evaluate the remainder as an expression). The `eval:` remainder may start
//! with an expected-type token followed by `:`; without a recognized token
//! the expected type defaults to string.

use std::fmt;

use crate::value::Value;

/// Prefix marking a literal replacement
pub const RAW_PREFIX: &str = "raw:";
/// Prefix marking an expression to evaluate
pub const EVAL_PREFIX: &str = "eval:";

/// The JSON-level type an evaluation result is required to have
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonType {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl JsonType {
    /// Whether `v` satisfies this type.
    ///
    /// Number accepts both integer and float representations; Array accepts
    /// any sequence kind.
    pub fn matches(&self, v: &Value) -> bool {
        match self {
            JsonType::Null => v.is_null(),
            JsonType::Bool => v.is_bool(),
            JsonType::Number => v.is_number(),
            JsonType::String => v.is_string(),
            JsonType::Array => v.is_sequence(),
            JsonType::Object => v.is_mapping(),
        }
    }

    fn from_token(token: &str) -> Option<JsonType> {
        match token {
            "string" => Some(JsonType::String),
            "number" => Some(JsonType::Number),
            "null" => Some(JsonType::Null),
            "bool" => Some(JsonType::Bool),
            "object" => Some(JsonType::Object),
            "array" => Some(JsonType::Array),
            _ => None,
        }
    }
}

impl fmt::Display for JsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JsonType::Null => "null",
            JsonType::Bool => "bool",
            JsonType::Number => "number",
            JsonType::String => "string",
            JsonType::Array => "array",
            JsonType::Object => "object",
        };
        write!(f, "{}", name)
    }
}

/// How a string should be treated by the rewrite processors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sentinel<'a> {
    /// `raw:` - the remainder is the final value
    Raw(&'a str),
    /// `eval:` - the remainder is an expression with an expected result type
    Eval {
        expression: &'a str,
        expected: JsonType,
    },
    /// No sentinel prefix
    Plain,
}

/// Classify a string by its sentinel prefix
pub fn classify(s: &str) -> Sentinel<'_> {
    if let Some(rest) = s.strip_prefix(RAW_PREFIX) {
        Sentinel::Raw(rest)
    } else if let Some(rest) = s.strip_prefix(EVAL_PREFIX) {
        let (expression, expected) = split_expression(rest);
        Sentinel::Eval {
            expression,
            expected,
        }
    } else {
        Sentinel::Plain
    }
}

/// True when the string carries either sentinel prefix
pub fn has_sentinel_prefix(s: &str) -> bool {
    s.starts_with(RAW_PREFIX) || s.starts_with(EVAL_PREFIX)
}

/// Split an `eval:` remainder into `(expression, expected type)`.
///
/// The remainder matches `TYPE:EXPR` only when `TYPE` is a known token;
/// otherwise the whole remainder is the expression and the type is string.
pub fn split_expression(rest: &str) -> (&str, JsonType) {
    if let Some(colon) = rest.find(':') {
        if let Some(t) = JsonType::from_token(&rest[..colon]) {
            return (&rest[colon + 1..], t);
        }
    }
    (rest, JsonType::String)
}
