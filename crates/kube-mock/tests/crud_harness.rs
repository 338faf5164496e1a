//! CRUD mode over HTTP.

mod common;

use common::*;
use kube_mock::{HttpMethod, ListParams, MockConfig, PatchType};
use rstest::rstest;
use serde_json::json;

#[rstest]
fn test_create_read_update_conflict_delete() {
    let (_server, client) = crud_server();
    let pods = client.resource(pods()).namespaced("ns1");

    let created = pods.create(&pod("a")).unwrap();
    assert_eq!(created["metadata"]["namespace"], "ns1");
    let read = pods.get("a").unwrap();
    assert_eq!(version_of(&read), 1);

    let mut update = read.clone();
    update["spec"]["containers"][0]["image"] = json!("nginx");
    let updated = pods.replace("a", &update).unwrap();
    assert_eq!(version_of(&updated), 2);

    let stale = pods.replace("a", &read).unwrap_err();
    assert!(stale.is_conflict(), "{stale}");

    pods.delete("a").unwrap();
    assert!(pods.get("a").unwrap_err().is_not_found());
}

#[rstest]
fn test_duplicate_create_leaves_first_object() {
    let (_server, client) = crud_server();
    let pods = client.resource(pods());

    let first = pods.create(&labelled_pod("a", "web")).unwrap();
    let error = pods.create(&labelled_pod("a", "db")).unwrap_err();
    assert!(error.is_conflict());
    assert_eq!(pods.get("a").unwrap(), first);
}

#[rstest]
fn test_versions_increase_across_mutations() {
    let (_server, client) = crud_server();
    let pods = client.resource(pods());

    let mut versions = vec![version_of(&pods.create(&pod("a")).unwrap())];
    versions.push(version_of(&pods.patch_merge("a", &json!({"metadata": {"labels": {"x": "1"}}})).unwrap()));
    versions.push(version_of(&pods.create(&pod("b")).unwrap()));
    versions.push(version_of(&pods.delete("a").unwrap()));
    versions.push(version_of(&pods.create(&pod("a")).unwrap()));

    assert!(versions.windows(2).all(|w| w[0] < w[1]), "{versions:?}");
}

#[rstest]
fn test_list_with_label_selector_ordered_by_name() {
    let (_server, client) = crud_server();
    let pods = client.resource(pods());
    for (name, app) in [("c", "web"), ("a", "web"), ("b", "db")] {
        pods.create(&labelled_pod(name, app)).unwrap();
    }

    let list = pods.list(&ListParams::default().labels("app=web")).unwrap();
    let names: Vec<&str> = list["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["metadata"]["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["a", "c"]);
    assert_eq!(list["kind"], "PodList");
    assert_eq!(list["metadata"]["resourceVersion"], "3");
}

#[rstest]
fn test_all_namespaces_list() {
    let (_server, client) = crud_server();
    client.resource(pods()).namespaced("ns1").create(&pod("a")).unwrap();
    client.resource(pods()).namespaced("ns2").create(&pod("a")).unwrap();

    let list = client.resource(pods()).cluster().list(&ListParams::default()).unwrap();
    assert_eq!(list["items"].as_array().unwrap().len(), 2);
}

#[rstest]
fn test_generated_name() {
    let (_server, client) = crud_server();
    let deployments = client.resource(deployments());
    let body = json!({"kind": "Deployment", "metadata": {"generateName": "web-"}, "spec": {"replicas": 1}});

    let a = deployments.create(&body).unwrap();
    let b = deployments.create(&body).unwrap();
    let name_a = a["metadata"]["name"].as_str().unwrap();
    assert!(name_a.starts_with("web-"));
    assert_ne!(a["metadata"]["name"], b["metadata"]["name"]);
    assert_eq!(a["apiVersion"], "apps/v1");
}

#[rstest]
fn test_json_patch_and_status() {
    let (_server, client) = crud_server();
    let pods = client.resource(pods());
    pods.create(&pod("a")).unwrap();

    let patched = pods
        .patch(
            "a",
            PatchType::Json,
            &json!([{"op": "add", "path": "/metadata/labels", "value": {"tier": "front"}}]),
        )
        .unwrap();
    assert_eq!(patched["metadata"]["labels"]["tier"], "front");

    let status = pods
        .patch_status("a", &json!({"status": {"phase": "Running"}, "spec": {"containers": []}}))
        .unwrap();
    assert_eq!(status["status"]["phase"], "Running");
    assert_eq!(status["spec"], pod("a")["spec"]);
}

#[rstest]
fn test_finalizers_delay_delete() {
    let (_server, client) = crud_server();
    let pods = client.resource(pods());
    let mut body = pod("a");
    body["metadata"]["finalizers"] = json!(["example.com/cleanup"]);
    pods.create(&body).unwrap();

    let terminating = pods.delete("a").unwrap();
    assert!(terminating["metadata"]["deletionTimestamp"].is_string());
    assert!(pods.get("a").is_ok());

    pods.patch_merge("a", &json!({"metadata": {"finalizers": null}})).unwrap();
    assert!(pods.get("a").unwrap_err().is_not_found());
}

#[rstest]
fn test_delete_collection() {
    let (_server, client) = crud_server();
    let pods = client.resource(pods());
    for (name, app) in [("a", "web"), ("b", "web"), ("c", "db")] {
        pods.create(&labelled_pod(name, app)).unwrap();
    }

    let deleted = pods.delete_collection(&ListParams::default().labels("app=web")).unwrap();
    assert_eq!(deleted["items"].as_array().unwrap().len(), 2);
    let rest = pods.list(&ListParams::default()).unwrap();
    assert_eq!(rest["items"][0]["metadata"]["name"], "c");
}

#[rstest]
#[case(HttpMethod::Post, "/api/v1/namespaces/test/pods", Some("{not json"), 400)]
#[case(HttpMethod::Get, "/api/v1/namespaces/test/pods?labelSelector=a%20b", None, 400)]
#[case(HttpMethod::Get, "/api/v1/namespaces/test/pods/missing", None, 404)]
#[case(HttpMethod::Post, "/api/v1/namespaces/test/pods/a", Some("{}"), 405)]
#[case(HttpMethod::Get, "/healthz", None, 404)]
fn test_request_errors_are_status_responses(
    #[case] method: HttpMethod,
    #[case] path: &str,
    #[case] body: Option<&str>,
    #[case] status: u16,
) {
    let (server, client) = crud_server();
    let response = match body {
        Some(body) => client
            .request_with(method, path, "application/json", body.as_bytes().to_vec())
            .unwrap(),
        None => client.request(method, path, None).unwrap(),
    };
    assert_eq!(response.status, status);
    assert_eq!(response.json().unwrap()["kind"], "Status");
    assert!(server.store().unwrap().is_empty());
}

#[rstest]
fn test_version_endpoint_and_journal() {
    let (server, client) = crud_server();
    assert!(client.version().unwrap()["gitVersion"].is_string());

    let request = server.last_request().unwrap();
    assert_eq!(request.method, HttpMethod::Get);
    assert_eq!(request.path, "/version");
    assert_eq!(server.request_count(), 1);
}

#[rstest]
fn test_client_namespace_from_config() {
    let (_server, client) = start(MockConfig::crud().with_namespace("team-a"));
    let created = client.resource(pods()).create(&pod("a")).unwrap();
    assert_eq!(created["metadata"]["namespace"], "team-a");
}

#[rstest]
fn test_closed_client_refuses_calls() {
    let (server, client) = crud_server();
    client.close();
    assert!(matches!(
        client.resource(pods()).create(&pod("a")),
        Err(kube_mock::MockError::ClientClosed)
    ));
    assert_eq!(server.request_count(), 0);

    let fresh = server.create_client().unwrap();
    assert!(fresh.resource(pods()).create(&pod("a")).is_ok());
}
