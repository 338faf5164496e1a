//! Scripted responses and rendered HTTP responses.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_TEXT: &str = "text/plain; charset=utf-8";

/// Body of a scripted response.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ResponseBody {
    #[default]
    Empty,
    Json(Value),
    Bytes(Vec<u8>),
    /// Text with `{param}` placeholders, filled from the matched path variables
    Template(String),
}

impl ResponseBody {
    fn render(&self, params: &HashMap<String, String>) -> Vec<u8> {
        match self {
            ResponseBody::Empty => Vec::new(),
            ResponseBody::Json(v) => v.to_string().into_bytes(),
            ResponseBody::Bytes(b) => b.clone(),
            ResponseBody::Template(t) => render_template(t, params).into_bytes(),
        }
    }

    fn default_content_type(&self) -> Option<&'static str> {
        match self {
            ResponseBody::Empty => None,
            ResponseBody::Json(_) => Some(CONTENT_TYPE_JSON),
            ResponseBody::Bytes(_) => Some("application/octet-stream"),
            ResponseBody::Template(t) => {
                let trimmed = t.trim_start();
                if trimmed.starts_with('{') || trimmed.starts_with('[') {
                    Some(CONTENT_TYPE_JSON)
                } else {
                    Some(CONTENT_TYPE_TEXT)
                }
            }
        }
    }
}

impl From<Value> for ResponseBody {
    fn from(v: Value) -> Self {
        ResponseBody::Json(v)
    }
}

impl From<&str> for ResponseBody {
    fn from(s: &str) -> Self {
        ResponseBody::Template(s.to_string())
    }
}

impl From<String> for ResponseBody {
    fn from(s: String) -> Self {
        ResponseBody::Template(s)
    }
}

impl From<Vec<u8>> for ResponseBody {
    fn from(b: Vec<u8>) -> Self {
        ResponseBody::Bytes(b)
    }
}

impl Serialize for ResponseBody {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            ResponseBody::Empty => serializer.serialize_none(),
            ResponseBody::Json(v) => v.serialize(serializer),
            ResponseBody::Bytes(b) => String::from_utf8_lossy(b).serialize(serializer),
            ResponseBody::Template(t) => t.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ResponseBody {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(match value {
            Value::Null => ResponseBody::Empty,
            Value::String(s) => ResponseBody::Template(s),
            other => ResponseBody::Json(other),
        })
    }
}

/// A scripted response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerResponse {
    /// HTTP status code (100-599)
    pub status: u16,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: ResponseBody,
}

impl ServerResponse {
    pub fn new(status: u16, body: impl Into<ResponseBody>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    /// Render the response for a request whose path produced `params`.
    pub fn render(&self, params: &HashMap<String, String>) -> HttpResponse {
        let mut headers: Vec<(String, String)> = self
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let has_content_type = headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case("content-type"));
        if !has_content_type {
            if let Some(ct) = self.body.default_content_type() {
                headers.push(("content-type".to_string(), ct.to_string()));
            }
        }
        HttpResponse {
            status: self.status,
            headers,
            body: self.body.render(params),
        }
    }
}

/// Replace `{name}` placeholders; unknown placeholders are left untouched.
fn render_template(template: &str, params: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) if params.contains_key(&after[..end]) => {
                out.push_str(&params[&after[..end]]);
                rest = &after[end + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Fully rendered response, ready to be written to the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn json(status: u16, body: &Value) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), CONTENT_TYPE_JSON.to_string())],
            body: body.to_string().into_bytes(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[rstest]
    #[case("hello {name}", &[("name", "a")], "hello a")]
    #[case("{ns}/{name}", &[("ns", "x"), ("name", "y")], "x/y")]
    #[case("{missing} stays", &[], "{missing} stays")]
    #[case("{\"kind\":\"Pod\"}", &[], "{\"kind\":\"Pod\"}")]
    #[case("no placeholders", &[("a", "b")], "no placeholders")]
    fn test_render_template(
        #[case] template: &str,
        #[case] pairs: &[(&str, &str)],
        #[case] expected: &str,
    ) {
        assert_eq!(render_template(template, &params(pairs)), expected);
    }

    #[rstest]
    fn test_render_json_sets_content_type() {
        let response = ServerResponse::new(200, json!({"kind": "Pod"}));
        let rendered = response.render(&HashMap::new());
        assert_eq!(rendered.status, 200);
        assert_eq!(rendered.header("Content-Type"), Some(CONTENT_TYPE_JSON));
        assert_eq!(rendered.body_json(), Some(json!({"kind": "Pod"})));
    }

    #[rstest]
    fn test_explicit_content_type_wins() {
        let response = ServerResponse::new(200, "plain {name}").with_header("Content-Type", "text/csv");
        let rendered = response.render(&params(&[("name", "a")]));
        assert_eq!(rendered.header("content-type"), Some("text/csv"));
        assert_eq!(rendered.body_text(), "plain a");
    }

    #[rstest]
    fn test_empty_body_has_no_content_type() {
        let rendered = ServerResponse::new(204, ResponseBody::Empty).render(&HashMap::new());
        assert!(rendered.header("content-type").is_none());
        assert!(rendered.body.is_empty());
    }

    #[rstest]
    fn test_response_deserialize_yaml() {
        let yaml = r#"
status: 200
headers:
  X-Trace: abc
body:
  kind: Pod
  metadata:
    name: a
"#;
        let response: ServerResponse = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.headers.get("X-Trace").map(String::as_str), Some("abc"));
        assert_eq!(
            response.body,
            ResponseBody::Json(json!({"kind": "Pod", "metadata": {"name": "a"}}))
        );

        let text: ServerResponse = serde_yaml::from_str("status: 404\nbody: missing {name}").unwrap();
        assert_eq!(text.body, ResponseBody::Template("missing {name}".to_string()));

        let empty: ServerResponse = serde_yaml::from_str("status: 204").unwrap();
        assert_eq!(empty.body, ResponseBody::Empty);
    }
}
