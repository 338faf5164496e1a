//! Request body matching with object intersection and JMESPath expressions.

use crate::expression::match_with_jmespath;
use crate::types::request::BodyMatcher;
use serde_json::Value;

/// Check if subset JSON object is contained in target JSON object.
/// Supports deep comparison of nested objects, arrays, and primitive types.
/// Returns true if subset is None, Null, or empty object (matches any target).
pub fn object_intersects(target: Option<&Value>, subset: Option<&Value>) -> bool {
    let subset = match subset {
        None | Some(Value::Null) => return true,
        Some(Value::Object(o)) if o.is_empty() => return true,
        Some(s) => s,
    };

    let target = match target {
        None | Some(Value::Null) => return false,
        Some(t) => t,
    };

    value_intersects(target, subset)
}

fn value_intersects(target: &Value, subset: &Value) -> bool {
    match (target, subset) {
        (Value::Object(t), Value::Object(s)) => s
            .iter()
            .all(|(k, sv)| t.get(k).is_some_and(|tv| value_intersects(tv, sv))),
        (Value::Array(t), Value::Array(s)) => s
            .iter()
            .all(|sv| t.iter().any(|tv| value_intersects(tv, sv))),
        _ => target == subset,
    }
}

/// Match a raw request body against a registered matcher.
///
/// No matcher matches anything. A string subset is compared against the raw body
/// when the body is not JSON.
pub fn body_matches(matcher: Option<&BodyMatcher>, body: Option<&[u8]>) -> bool {
    let Some(matcher) = matcher else {
        return true;
    };
    let parsed = body.and_then(|b| serde_json::from_slice::<Value>(b).ok());

    match (matcher, parsed) {
        (BodyMatcher::Expression(expr), Some(json)) => match_with_jmespath(expr, &json),
        (BodyMatcher::Expression(_), None) => false,
        (BodyMatcher::Subset(expected), Some(json)) => object_intersects(Some(&json), Some(expected)),
        (BodyMatcher::Subset(Value::String(expected)), None) => {
            body.is_some_and(|b| String::from_utf8_lossy(b) == expected.as_str())
        }
        (BodyMatcher::Subset(expected), None) => object_intersects(None, Some(expected)),
    }
}
