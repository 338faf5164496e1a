//! Shared helpers for the kube-mock integration harnesses.
//!
//! Import with `mod common; use common::*;` at the top of each harness file.

#![allow(dead_code)]

use kube_mock::{init_tracing, KubeMockClient, MockConfig, MockServer, ResourceType};
use serde_json::{json, Value};

pub fn pods() -> ResourceType {
    ResourceType::core("v1", "pods")
}

pub fn deployments() -> ResourceType {
    ResourceType::new("apps", "v1", "deployments")
}

pub fn pod(name: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {"name": name},
        "spec": {"containers": [{"name": "main", "image": "busybox"}]}
    })
}

pub fn labelled_pod(name: &str, app: &str) -> Value {
    let mut pod = pod(name);
    pod["metadata"]["labels"] = json!({"app": app});
    pod
}

pub fn version_of(object: &Value) -> u64 {
    object["metadata"]["resourceVersion"]
        .as_str()
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| panic!("object without resourceVersion: {object}"))
}

/// Running server plus a client bound to it.
pub fn start(config: MockConfig) -> (MockServer, KubeMockClient) {
    init_tracing();
    let server = MockServer::start(config).expect("server starts");
    let client = server.create_client().expect("client connects");
    (server, client)
}

pub fn crud_server() -> (MockServer, KubeMockClient) {
    start(MockConfig::crud())
}
