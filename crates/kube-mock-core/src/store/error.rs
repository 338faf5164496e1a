//! Errors returned by the resource store, rendered as Kubernetes `Status` responses.

use crate::matching::SelectorError;
use crate::types::resource::status_object;
use crate::types::response::HttpResponse;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{resource} \"{name}\" not found")]
    NotFound { resource: String, name: String },
    #[error("{resource} \"{name}\" already exists")]
    AlreadyExists { resource: String, name: String },
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    MethodNotAllowed(String),
    #[error("{0}")]
    UnsupportedMediaType(String),
    /// Requested watch version is older than the retained history
    #[error("too old resource version: {requested} ({oldest})")]
    Expired { requested: u64, oldest: u64 },
}

impl StoreError {
    pub fn not_found(resource: impl ToString, name: &str) -> Self {
        StoreError::NotFound {
            resource: resource.to_string(),
            name: name.to_string(),
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            StoreError::NotFound { .. } => 404,
            StoreError::AlreadyExists { .. } | StoreError::Conflict(_) => 409,
            StoreError::BadRequest(_) => 400,
            StoreError::Invalid(_) => 422,
            StoreError::MethodNotAllowed(_) => 405,
            StoreError::UnsupportedMediaType(_) => 415,
            StoreError::Expired { .. } => 410,
        }
    }

    /// Machine-readable `reason` of the `Status` body.
    pub fn reason(&self) -> &'static str {
        match self {
            StoreError::NotFound { .. } => "NotFound",
            StoreError::AlreadyExists { .. } => "AlreadyExists",
            StoreError::Conflict(_) => "Conflict",
            StoreError::BadRequest(_) => "BadRequest",
            StoreError::Invalid(_) => "Invalid",
            StoreError::MethodNotAllowed(_) => "MethodNotAllowed",
            StoreError::UnsupportedMediaType(_) => "UnsupportedMediaType",
            StoreError::Expired { .. } => "Expired",
        }
    }

    pub fn to_status(&self) -> Value {
        status_object(self.status_code(), self.reason(), &self.to_string())
    }

    pub fn to_response(&self) -> HttpResponse {
        HttpResponse::json(self.status_code(), &self.to_status())
    }
}

impl From<SelectorError> for StoreError {
    fn from(e: SelectorError) -> Self {
        StoreError::BadRequest(e.to_string())
    }
}
