//! Query string parsing.

use std::collections::HashMap;

/// Parse query string into HashMap with URL decoding.
///
/// `+` is decoded as a space. Repeated keys are joined with commas.
pub fn parse_query_string(query_str: &str) -> HashMap<String, String> {
    let mut result: HashMap<String, String> = HashMap::new();

    for pair in query_str.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode(key);
        let value = decode(value);

        if let Some(existing) = result.get_mut(&key) {
            existing.push(',');
            existing.push_str(&value);
        } else {
            result.insert(key, value);
        }
    }

    result
}

fn decode(raw: &str) -> String {
    let raw = raw.replace('+', " ");
    let decoded = urlencoding::decode(&raw).map(|s| s.into_owned());
    decoded.unwrap_or(raw)
}
