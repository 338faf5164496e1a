//! Request types: registered request patterns and requests received by the server.

use crate::expression::{is_expression, unwrap_expression};
use crate::matching::{body_matches, parse_query_string, path_matches, PathMatch};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// HTTP method for request matching
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }

    /// Parse a method name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "POST" => Some(HttpMethod::Post),
            "PUT" => Some(HttpMethod::Put),
            "PATCH" => Some(HttpMethod::Patch),
            "DELETE" => Some(HttpMethod::Delete),
            "HEAD" => Some(HttpMethod::Head),
            "OPTIONS" => Some(HttpMethod::Options),
            _ => None,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request body matcher - either a JSON subset or a `${...}` JMESPath expression
#[derive(Debug, Clone, PartialEq)]
pub enum BodyMatcher {
    /// Every field of the value must be present (deeply) in the request body
    Subset(Value),
    /// JMESPath expression evaluated against the request body, matches when truthy
    Expression(String),
}

impl Serialize for BodyMatcher {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            BodyMatcher::Subset(v) => v.serialize(serializer),
            BodyMatcher::Expression(expr) => format!("${{{}}}", expr).serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for BodyMatcher {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        match &value {
            Value::String(s) if is_expression(s) => Ok(BodyMatcher::Expression(
                unwrap_expression(s).unwrap_or_default().to_string(),
            )),
            _ => Ok(BodyMatcher::Subset(value)),
        }
    }
}

/// A registered request pattern.
///
/// `path` may contain `{param}` placeholders matching a single path segment; a query
/// string in the path becomes a set of required query parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerRequest {
    pub method: HttpMethod,
    pub path: String,
    /// Query parameters that must be present with these values
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub query: HashMap<String, String>,
    /// Request body to match (for POST/PUT/PATCH)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<BodyMatcher>,
}

impl ServerRequest {
    pub fn new(method: HttpMethod, path: &str) -> Self {
        let (path, query) = split_query(path);
        Self {
            method,
            path: path.to_string(),
            query: query.map(parse_query_string).unwrap_or_default(),
            body: None,
        }
    }

    /// Move a query string embedded in `path` into `query`.
    ///
    /// Patterns loaded from fixture files keep the path verbatim until normalized.
    pub fn normalize(mut self) -> Self {
        if let Some((path, query)) = self.path.split_once('?') {
            let parsed = parse_query_string(query);
            self.path = path.to_string();
            for (k, v) in parsed {
                self.query.entry(k).or_insert(v);
            }
        }
        self
    }

    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        self.query.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: BodyMatcher) -> Self {
        self.body = Some(body);
        self
    }

    /// Match against an incoming request, returning the extracted path variables.
    pub fn matches(&self, request: &IncomingRequest) -> Option<PathMatch> {
        if self.method != request.method {
            return None;
        }
        let (path, _) = split_query(&self.path);
        let path_match = path_matches(path, &request.path)?;
        let query_ok = self
            .query
            .iter()
            .all(|(k, v)| request.query.get(k) == Some(v));
        if !query_ok || !body_matches(self.body.as_ref(), request.body.as_deref()) {
            return None;
        }
        Some(path_match)
    }

    /// Ordering key for "most specific pattern wins".
    pub fn specificity(&self) -> (usize, usize, usize) {
        let (path, _) = split_query(&self.path);
        let literal_segments = path
            .split('/')
            .filter(|s| !s.is_empty() && !s.contains('{'))
            .count();
        (literal_segments, self.query.len(), usize::from(self.body.is_some()))
    }
}

/// HTTP request received by the mock server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingRequest {
    pub method: HttpMethod,
    /// Path without query string
    pub path: String,
    /// Decoded query parameters
    pub query: HashMap<String, String>,
    /// Request headers, names lowercased
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
}

impl IncomingRequest {
    /// Build a request from a method and a url (path plus optional query string).
    pub fn new(method: HttpMethod, url: &str) -> Self {
        let (path, query) = split_query(url);
        Self {
            method,
            path: path.to_string(),
            query: query.map(parse_query_string).unwrap_or_default(),
            headers: HashMap::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_json(self, body: &Value) -> Self {
        self.with_header("content-type", "application/json")
            .with_body(body.to_string())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Media type of the body without parameters such as `charset`.
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
            .and_then(|ct| ct.split(';').next())
            .map(str::trim)
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}

fn split_query(url: &str) -> (&str, Option<&str>) {
    match url.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (url, None),
    }
}
