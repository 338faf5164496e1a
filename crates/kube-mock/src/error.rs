//! Error type of the server, client and lifecycle surface.

use crate::lifecycle::Scope;
use kube_mock_core::ConfigError;
use serde_json::Value;
use thiserror::Error;

pub type Result<T, E = MockError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum MockError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to bind mock server endpoint: {0}")]
    Bind(#[source] std::io::Error),

    #[error("failed to start mock server runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("watch stream read failed: {0}")]
    WatchRead(#[source] std::io::Error),

    #[error("response body is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),

    /// Non-2xx answer from the server
    #[error("{status} {reason}: {message}")]
    Api {
        status: u16,
        reason: String,
        message: String,
    },

    #[error("server runs in CRUD mode, expectations cannot be registered")]
    CrudMode,

    #[error("server has been destroyed")]
    ServerDestroyed,

    #[error("server is not running")]
    NotRunning,

    #[error("{0} scope is already active")]
    ScopeActive(Scope),

    #[error("{0} scope is not active")]
    ScopeInactive(Scope),

    #[error("no scope is active")]
    NoActiveScope,

    #[error("client has been closed")]
    ClientClosed,
}

impl MockError {
    /// Build an [`MockError::Api`] from a status code and a response body, reading the
    /// `reason` and `message` of a Kubernetes `Status` object when present.
    pub fn from_response(status: u16, body: &[u8]) -> Self {
        let parsed: Option<Value> = serde_json::from_slice(body).ok();
        let field = |key: &str| {
            parsed
                .as_ref()
                .and_then(|v| v.get(key))
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        MockError::Api {
            status,
            reason: field("reason").unwrap_or_else(|| "Unknown".to_string()),
            message: field("message")
                .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned()),
        }
    }

    /// HTTP status of an API error.
    pub fn status(&self) -> Option<u16> {
        match self {
            MockError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub fn is_conflict(&self) -> bool {
        self.status() == Some(409)
    }
}
