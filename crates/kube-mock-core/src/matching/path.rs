//! Path pattern matching with `{param}` placeholders.

use regex::Regex;
use std::collections::HashMap;

/// Variables captured from a matched path pattern.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PathMatch {
    pub params: HashMap<String, String>,
}

/// Match `path` against `pattern`. Placeholders match exactly one non-empty segment.
pub fn path_matches(pattern: &str, path: &str) -> Option<PathMatch> {
    let pattern = normalize_path(pattern);
    let path = normalize_path(path);

    if !pattern.contains('{') {
        return (pattern == path).then(PathMatch::default);
    }

    let (regex, param_names) = pattern_to_regex(&pattern)?;
    let caps = regex.captures(&path)?;

    let params = param_names
        .into_iter()
        .enumerate()
        .filter_map(|(i, name)| caps.get(i + 1).map(|m| (name, m.as_str().to_owned())))
        .collect();

    Some(PathMatch { params })
}

fn normalize_path(path: &str) -> String {
    let without_query = path.split('?').next().unwrap_or("");
    let trimmed = without_query.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".into()
    } else {
        trimmed.into()
    }
}

fn pattern_to_regex(pattern: &str) -> Option<(Regex, Vec<String>)> {
    let mut param_names = Vec::new();
    let mut regex_str = String::new();
    let mut rest = pattern;

    while let Some(start) = rest.find('{') {
        regex_str.push_str(&regex::escape(&rest[..start]));
        let after = &rest[start + 1..];
        let end = after.find('}')?;
        param_names.push(after[..end].to_string());
        regex_str.push_str("([^/]+)");
        rest = &after[end + 1..];
    }
    regex_str.push_str(&regex::escape(rest));

    let regex = Regex::new(&format!("^{regex_str}$")).ok()?;
    Some((regex, param_names))
}
