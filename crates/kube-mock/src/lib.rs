//! Mock Kubernetes API server for tests.
//!
//! A [`MockServer`] serves the [`kube_mock_core`] dispatcher over HTTP or HTTPS on a
//! loopback port. [`KubeMockClient`] is a blocking handle bound to one server, and
//! [`LifecycleManager`] pairs the two per test scope.
//!
//! ```no_run
//! use kube_mock::{LifecycleManager, MockConfig, ResourceType, Scope};
//! use serde_json::json;
//!
//! let mut lifecycle = LifecycleManager::new();
//! let fixture = lifecycle.acquire(Scope::Instant, &MockConfig::crud()).unwrap();
//! let pods = fixture.client.resource(ResourceType::core("v1", "pods"));
//! pods.create(&json!({"metadata": {"name": "a"}})).unwrap();
//! lifecycle.release(Scope::Instant);
//! ```

pub mod client;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod server;
pub mod tls;

pub use client::{ApiResponse, KubeMockClient, ListParams, ResourceClient, WatchStream};
pub use error::{MockError, Result};
pub use lifecycle::{Capability, LifecycleManager, MockFixture, Scope, ScopeGuard};
pub use logging::init_tracing;
pub use server::MockServer;
pub use tls::TlsMaterial;

pub use kube_mock_core::{
    ConfigError, HttpMethod, MockConfig, PatchType, ResourceType, ServerRequest, ServerResponse,
    WatchEvent, WatchEventType,
};

/// Library version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
