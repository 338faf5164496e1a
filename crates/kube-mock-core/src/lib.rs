//! Core engine of the Kubernetes API mock.
//!
//! The crate is transport-agnostic: it turns an [`IncomingRequest`] into either a
//! finished [`HttpResponse`] or a live [`WatchSession`]. Two dispatcher modes exist:
//! - expectation mode, backed by scripted [`ServerRequest`] -> [`ServerResponse`] queues
//! - CRUD mode, backed by the versioned in-memory [`ResourceStore`]
//!
//! [`IncomingRequest`]: types::request::IncomingRequest
//! [`HttpResponse`]: types::response::HttpResponse
//! [`ServerRequest`]: types::request::ServerRequest
//! [`ServerResponse`]: types::response::ServerResponse
//! [`WatchSession`]: store::watch::WatchSession
//! [`ResourceStore`]: store::ResourceStore

pub mod config;
pub mod dispatcher;
pub mod expectations;
pub mod expression;
pub mod matching;
pub mod store;
pub mod types;

pub use config::settings::{ExpectationFixture, MockConfig};
pub use config::ConfigError;
pub use dispatcher::{Dispatch, Dispatcher, DispatcherMode};
pub use expectations::ExpectationStore;
pub use store::{ListOptions, PatchType, ResourceStore, StoreError, WatchSession};
pub use types::request::{HttpMethod, IncomingRequest, ServerRequest};
pub use types::resource::ResourceType;
pub use types::response::{HttpResponse, ResponseBody, ServerResponse};
pub use types::watch::{WatchEvent, WatchEventType};
