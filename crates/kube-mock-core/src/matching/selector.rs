//! Label and field selectors as accepted by the `labelSelector` and `fieldSelector`
//! query parameters.

use crate::types::resource::labels;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("invalid label selector requirement: '{0}'")]
    InvalidLabel(String),
    #[error("invalid field selector requirement: '{0}'")]
    InvalidField(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LabelRequirement {
    Equals(String, String),
    NotEquals(String, String),
    In(String, Vec<String>),
    NotIn(String, Vec<String>),
    Exists(String),
    NotExists(String),
}

impl LabelRequirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            LabelRequirement::Equals(k, v) => labels.get(k) == Some(v),
            LabelRequirement::NotEquals(k, v) => labels.get(k) != Some(v),
            LabelRequirement::In(k, values) => labels.get(k).is_some_and(|v| values.contains(v)),
            LabelRequirement::NotIn(k, values) => labels.get(k).map_or(true, |v| !values.contains(v)),
            LabelRequirement::Exists(k) => labels.contains_key(k),
            LabelRequirement::NotExists(k) => !labels.contains_key(k),
        }
    }
}

/// Conjunction of label requirements. The empty selector matches everything.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LabelSelector {
    requirements: Vec<LabelRequirement>,
}

impl LabelSelector {
    pub fn parse(selector: &str) -> Result<Self, SelectorError> {
        let set_based = Regex::new(r"^([A-Za-z0-9./_-]+)\s+(in|notin)\s+\(([^()]*)\)$")
            .map_err(|_| SelectorError::InvalidLabel(selector.to_string()))?;
        let mut requirements = Vec::new();

        for term in split_top_level(selector) {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }
            let invalid = || SelectorError::InvalidLabel(term.to_string());

            let requirement = if let Some(caps) = set_based.captures(term) {
                let key = caps[1].to_string();
                let values: Vec<String> = caps[3]
                    .split(',')
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .collect();
                if values.iter().any(|v| !is_valid_value(v)) {
                    return Err(invalid());
                }
                if &caps[2] == "in" {
                    LabelRequirement::In(key, values)
                } else {
                    LabelRequirement::NotIn(key, values)
                }
            } else if let Some(key) = term.strip_prefix('!') {
                LabelRequirement::NotExists(valid_key(key.trim()).ok_or_else(invalid)?)
            } else if let Some((k, v)) = term.split_once("!=") {
                LabelRequirement::NotEquals(
                    valid_key(k.trim()).ok_or_else(invalid)?,
                    valid_value(v.trim()).ok_or_else(invalid)?,
                )
            } else if let Some((k, v)) = term.split_once("==").or_else(|| term.split_once('=')) {
                LabelRequirement::Equals(
                    valid_key(k.trim()).ok_or_else(invalid)?,
                    valid_value(v.trim()).ok_or_else(invalid)?,
                )
            } else {
                LabelRequirement::Exists(valid_key(term).ok_or_else(invalid)?)
            };
            requirements.push(requirement);
        }

        Ok(Self { requirements })
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    /// Match against the `metadata.labels` of an object.
    pub fn matches_object(&self, obj: &Value) -> bool {
        self.is_empty() || self.matches(&labels(obj))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FieldRequirement {
    path: String,
    value: String,
    negated: bool,
}

/// Conjunction of field equality requirements over dotted object paths.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldSelector {
    requirements: Vec<FieldRequirement>,
}

impl FieldSelector {
    pub fn parse(selector: &str) -> Result<Self, SelectorError> {
        let mut requirements = Vec::new();

        for term in selector.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let invalid = || SelectorError::InvalidField(term.to_string());
            let (path, value, negated) = if let Some((p, v)) = term.split_once("!=") {
                (p, v, true)
            } else if let Some((p, v)) = term.split_once("==").or_else(|| term.split_once('=')) {
                (p, v, false)
            } else {
                return Err(invalid());
            };
            let path = path.trim();
            if path.is_empty() || path.split('.').any(str::is_empty) {
                return Err(invalid());
            }
            requirements.push(FieldRequirement {
                path: path.to_string(),
                value: value.trim().to_string(),
                negated,
            });
        }

        Ok(Self { requirements })
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(&self, obj: &Value) -> bool {
        self.requirements.iter().all(|r| {
            let actual = field_value(obj, &r.path);
            (actual == r.value) != r.negated
        })
    }

    /// Name pinned by a `metadata.name=` requirement, if any.
    pub fn required_name(&self) -> Option<&str> {
        self.requirements
            .iter()
            .find(|r| !r.negated && r.path == "metadata.name")
            .map(|r| r.value.as_str())
    }
}

/// String form of the value at a dotted path; missing fields read as empty.
fn field_value(obj: &Value, path: &str) -> String {
    let found = path
        .split('.')
        .try_fold(obj, |current, segment| current.get(segment));
    match found {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Split on commas that are not inside parentheses.
fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn valid_key(key: &str) -> Option<String> {
    let ok = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'));
    ok.then(|| key.to_string())
}

fn is_valid_value(value: &str) -> bool {
    value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn valid_value(value: &str) -> Option<String> {
    is_valid_value(value).then(|| value.to_string())
}
