//! JMESPath expressions used by body matchers.
//!
//! An expression is written inline as `${...}`; everything else is treated as a literal.

use serde_json::Value;

/// Returns true if the string is an inline `${...}` expression.
pub fn is_expression(s: &str) -> bool {
    s.len() > 3 && s.starts_with("${") && s.ends_with('}')
}

/// Strip the `${` `}` wrapper. Returns `None` for plain strings.
pub fn unwrap_expression(s: &str) -> Option<&str> {
    if !is_expression(s) {
        return None;
    }
    s.strip_prefix("${").and_then(|s| s.strip_suffix('}'))
}

/// Evaluate `expression` against `data` and report whether the result is truthy.
///
/// Invalid expressions and evaluation errors never match.
pub fn match_with_jmespath(expression: &str, data: &Value) -> bool {
    let Ok(expr) = jmespath::compile(expression) else {
        return false;
    };
    expr.search(data)
        .map(|result| result.is_truthy())
        .unwrap_or(false)
}
