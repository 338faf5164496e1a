//! Mock server configuration and expectation fixtures.

use crate::config::error::ConfigError;
use crate::config::parser::{load_all, read_config_file};
use crate::types::request::ServerRequest;
use crate::types::response::ServerResponse;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_NAMESPACE: &str = "test";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

/// Configuration of one mock server and its client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MockConfig {
    /// Back the server with a stateful resource store instead of expectations
    #[serde(default)]
    pub crud: bool,
    #[serde(default)]
    pub https: bool,
    /// Namespace used by the client when none is given
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Glob patterns of fixture files preloaded into the expectation store
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expectations: Vec<String>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            crud: false,
            https: false,
            namespace: default_namespace(),
            request_timeout_ms: default_request_timeout_ms(),
            expectations: Vec::new(),
        }
    }
}

impl MockConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn crud() -> Self {
        Self::default().with_crud(true)
    }

    pub fn with_crud(mut self, crud: bool) -> Self {
        self.crud = crud;
        self
    }

    pub fn with_https(mut self, https: bool) -> Self {
        self.https = https;
        self
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    pub fn with_request_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.request_timeout_ms = timeout_ms;
        self
    }

    pub fn with_expectations(mut self, pattern: &str) -> Self {
        self.expectations.push(pattern.to_string());
        self
    }

    /// Load and validate a config file (YAML, JSON or JSONC).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: MockConfig = read_config_file(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.trim().is_empty() {
            return Err(ConfigError::Invalid("namespace must not be empty".to_string()));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "requestTimeoutMs must be greater than zero".to_string(),
            ));
        }
        if self.crud && !self.expectations.is_empty() {
            return Err(ConfigError::Invalid(
                "expectation fixtures cannot be used in CRUD mode".to_string(),
            ));
        }
        Ok(())
    }

    /// Read every fixture file matched by `expectations`, in pattern order.
    pub fn load_fixtures(&self) -> Result<Vec<ExpectationFixture>, ConfigError> {
        let mut fixtures = Vec::new();
        for pattern in &self.expectations {
            fixtures.extend(load_fixtures(pattern)?);
        }
        Ok(fixtures)
    }
}

/// One request pattern with its queue of responses, as stored in fixture files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ExpectationFixture {
    pub request: ServerRequest,
    pub responses: Vec<ServerResponse>,
}

/// Load fixtures from every file matching `pattern`.
pub fn load_fixtures(pattern: &str) -> Result<Vec<ExpectationFixture>, ConfigError> {
    let fixtures: Vec<ExpectationFixture> = load_all(pattern)?;
    if let Some(empty) = fixtures.iter().find(|f| f.responses.is_empty()) {
        return Err(ConfigError::Invalid(format!(
            "fixture for {} {} has no responses",
            empty.request.method, empty.request.path
        )));
    }
    Ok(fixtures)
}
