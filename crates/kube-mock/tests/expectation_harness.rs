//! Expectation mode over HTTP.

mod common;

use common::*;
use kube_mock::{HttpMethod, MockConfig, MockError};
use rstest::rstest;
use serde_json::json;

const PODS: &str = "/api/v1/namespaces/test/pods";

#[rstest]
fn test_last_response_replays() {
    let (server, client) = start(MockConfig::default());
    server.expect().unwrap().get().with_path(PODS).and_return(200, json!({"n": 1})).once();
    server.expect().unwrap().get().with_path(PODS).and_return(200, json!({"n": 2})).once();

    let bodies: Vec<i64> = (0..3)
        .map(|_| {
            client.request(HttpMethod::Get, PODS, None).unwrap().json().unwrap()["n"]
                .as_i64()
                .unwrap()
        })
        .collect();
    assert_eq!(bodies, vec![1, 2, 2]);
}

#[rstest]
fn test_unmatched_request_is_not_found() {
    let (server, client) = start(MockConfig::default());
    server.expect().unwrap().get().with_path(PODS).and_return(200, "ok").once();

    let response = client.request(HttpMethod::Delete, PODS, None).unwrap();
    assert_eq!(response.status, 404);
    assert_eq!(response.json().unwrap()["reason"], "NotFound");

    assert_eq!(client.request(HttpMethod::Get, PODS, None).unwrap().text(), "ok");
}

#[rstest]
fn test_path_params_and_headers() {
    let (server, client) = start(MockConfig::default());
    server
        .expect()
        .unwrap()
        .get()
        .with_path("/api/v1/namespaces/{ns}/pods/{name}")
        .and_return(200, "pod {name} in {ns}")
        .with_header("x-mock", "yes")
        .once();

    let response = client
        .request(HttpMethod::Get, "/api/v1/namespaces/ns1/pods/a", None)
        .unwrap();
    assert_eq!(response.text(), "pod a in ns1");
    assert_eq!(response.header("x-mock"), Some("yes"));
}

#[rstest]
fn test_body_matcher_and_journal() {
    let (server, client) = start(MockConfig::default());
    server
        .expect()
        .unwrap()
        .post()
        .with_path(PODS)
        .with_body(json!({"metadata": {"name": "a"}}))
        .and_return(201, json!({"created": true}))
        .once();

    let created = client
        .resource(pods())
        .create(&pod("a"))
        .unwrap();
    assert_eq!(created["created"], true);
    assert!(client.resource(pods()).create(&pod("b")).unwrap_err().is_not_found());

    let first = server.take_request().unwrap();
    assert_eq!(first.method, HttpMethod::Post);
    assert!(String::from_utf8(first.body.unwrap()).unwrap().contains("\"a\""));
    assert_eq!(server.request_count(), 2);
}

#[rstest]
fn test_fixtures_loaded_from_config() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("pods.yaml"),
        r#"
- request:
    method: GET
    path: /api/v1/namespaces/test/pods/a
  responses:
    - status: 200
      body: {kind: Pod, metadata: {name: a}}
"#,
    )
    .unwrap();
    let config = MockConfig::default().with_expectations(&format!("{}/*.yaml", dir.path().display()));

    let (_server, client) = start(config);
    let pod = client.resource(pods()).get("a").unwrap();
    assert_eq!(pod["kind"], "Pod");
}

#[rstest]
fn test_crud_server_rejects_expectations() {
    let (server, _client) = crud_server();
    assert!(matches!(server.expect(), Err(MockError::CrudMode)));
}
