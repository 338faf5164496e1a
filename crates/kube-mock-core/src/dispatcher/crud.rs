//! REST verb routing against the resource store.

use crate::dispatcher::Dispatch;
use crate::store::{ApiPath, ListOptions, PatchType, ResourceStore, StoreError, WatchFilter};
use crate::types::request::{HttpMethod, IncomingRequest};
use crate::types::response::HttpResponse;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

pub(crate) fn handle(store: &ResourceStore, request: &IncomingRequest) -> Dispatch {
    match route(store, request) {
        Ok(dispatch) => dispatch,
        Err(e) => {
            debug!(method = %request.method, path = %request.path, status = e.status_code(), error = %e, "request rejected");
            Dispatch::Response(e.to_response())
        }
    }
}

fn route(store: &ResourceStore, request: &IncomingRequest) -> Result<Dispatch, StoreError> {
    if request.path.trim_end_matches('/') == "/version" {
        return match request.method {
            HttpMethod::Get => Ok(ok(200, version_document())),
            other => Err(not_allowed(other, &request.path)),
        };
    }

    let path = ApiPath::parse(&request.path)
        .ok_or_else(|| StoreError::not_found("path", &request.path))?;
    let resource_type = &path.resource_type;
    let ns = path.namespace.as_deref();
    let watch = path.watch || is_true(request.query_param("watch"));
    let options = ListOptions::parse(
        request.query_param("labelSelector"),
        request.query_param("fieldSelector"),
    )?;

    match (request.method, path.name.as_deref(), path.subresource.as_deref()) {
        (HttpMethod::Get, name, None) if watch => open_watch(store, &path, name, options, request),
        (HttpMethod::Get, None, None) => Ok(ok(200, store.list(resource_type, ns, &options))),
        (HttpMethod::Get, Some(name), None | Some("status")) => {
            Ok(ok(200, store.get(resource_type, ns, name)?))
        }
        (HttpMethod::Post, None, None) => {
            Ok(ok(201, store.create(resource_type, ns, parse_body(request)?)?))
        }
        (HttpMethod::Put, Some(name), None | Some("finalize")) => {
            Ok(ok(200, store.replace(resource_type, ns, name, parse_body(request)?)?))
        }
        (HttpMethod::Put, Some(name), Some("status")) => Ok(ok(
            200,
            store.replace_status(resource_type, ns, name, parse_body(request)?)?,
        )),
        (HttpMethod::Patch, Some(name), sub @ (None | Some("status"))) => {
            let patch_type = patch_type(request)?;
            let patch = parse_body(request)?;
            let status_only = sub.is_some();
            Ok(ok(
                200,
                store.patch(resource_type, ns, name, patch_type, &patch, status_only)?,
            ))
        }
        (HttpMethod::Delete, Some(name), None) => Ok(ok(200, store.delete(resource_type, ns, name)?)),
        (HttpMethod::Delete, None, None) => {
            Ok(ok(200, store.delete_collection(resource_type, ns, &options)))
        }
        (_, Some(name), Some(sub)) if !matches!(sub, "status" | "finalize") => Err(
            StoreError::not_found(format!("{resource_type}/{sub}"), name),
        ),
        (method, _, _) => Err(not_allowed(method, &request.path)),
    }
}

fn open_watch(
    store: &ResourceStore,
    path: &ApiPath,
    name: Option<&str>,
    options: ListOptions,
    request: &IncomingRequest,
) -> Result<Dispatch, StoreError> {
    let since = match request.query_param("resourceVersion").filter(|v| !v.is_empty()) {
        Some(raw) => Some(raw.parse::<u64>().map_err(|_| {
            StoreError::BadRequest(format!("invalid resourceVersion '{raw}'"))
        })?),
        None => None,
    };
    let timeout = match request.query_param("timeoutSeconds").filter(|v| !v.is_empty()) {
        Some(raw) => Some(Duration::from_secs(raw.parse::<u64>().map_err(|_| {
            StoreError::BadRequest(format!("invalid timeoutSeconds '{raw}'"))
        })?)),
        None => None,
    };

    let filter = WatchFilter::new(path.resource_type.clone(), path.namespace.as_deref())
        .with_name(name)
        .with_labels(options.labels)
        .with_fields(options.fields);
    let session = store.watch(filter, since)?;
    debug!(path = %request.path, since = ?since, timeout = ?timeout, "watch started");
    Ok(Dispatch::Watch { session, timeout })
}

fn ok(status: u16, body: Value) -> Dispatch {
    Dispatch::Response(HttpResponse::json(status, &body))
}

fn not_allowed(method: HttpMethod, path: &str) -> StoreError {
    StoreError::MethodNotAllowed(format!("method {method} is not supported on {path}"))
}

fn is_true(value: Option<&str>) -> bool {
    matches!(value, Some("true" | "1"))
}

fn patch_type(request: &IncomingRequest) -> Result<PatchType, StoreError> {
    match request.content_type() {
        None => Ok(PatchType::Merge),
        Some(ct) => PatchType::from_content_type(ct).ok_or_else(|| {
            StoreError::UnsupportedMediaType(format!("the body of the request was in an unknown format: {ct}"))
        }),
    }
}

/// Decode the request body; apply patches may be YAML.
fn parse_body(request: &IncomingRequest) -> Result<Value, StoreError> {
    let body = request
        .body
        .as_deref()
        .filter(|b| !b.is_empty())
        .ok_or_else(|| StoreError::BadRequest("request body is required".to_string()))?;

    let parsed = if request.content_type() == Some(PatchType::APPLY_YAML) {
        serde_yaml::from_slice(body).map_err(|e| e.to_string())
    } else {
        serde_json::from_slice(body).map_err(|e| e.to_string())
    };
    parsed.map_err(|e| StoreError::BadRequest(format!("malformed request body: {e}")))
}

fn version_document() -> Value {
    json!({
        "major": "1",
        "minor": "31",
        "gitVersion": "v1.31.0",
        "gitCommit": "0000000000000000000000000000000000000000",
        "gitTreeState": "clean",
        "buildDate": "2024-08-13T00:00:00Z",
        "goVersion": "go1.22.5",
        "compiler": "gc",
        "platform": "linux/amd64"
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::watch::WatchEventType;
    use rstest::{fixture, rstest};

    #[fixture]
    fn store() -> ResourceStore {
        ResourceStore::new()
    }

    fn response(dispatch: Dispatch) -> HttpResponse {
        match dispatch {
            Dispatch::Response(response) => response,
            Dispatch::Watch { .. } => panic!("expected a plain response"),
        }
    }

    fn send(store: &ResourceStore, request: IncomingRequest) -> HttpResponse {
        response(handle(store, &request))
    }

    fn post(url: &str, body: Value) -> IncomingRequest {
        IncomingRequest::new(HttpMethod::Post, url).with_json(&body)
    }

    #[rstest]
    fn test_rest_round_trip(store: ResourceStore) {
        let collection = "/apis/apps/v1/namespaces/ns1/deployments";
        let created = send(&store, post(collection, json!({"kind": "Deployment", "metadata": {"name": "web"}})));
        assert_eq!(created.status, 201);
        let body = created.body_json().unwrap();
        assert_eq!(body["apiVersion"], "apps/v1");
        assert_eq!(body["metadata"]["resourceVersion"], "1");

        let item = format!("{collection}/web");
        let read = send(&store, IncomingRequest::new(HttpMethod::Get, &item));
        assert_eq!(read.status, 200);

        let replaced = send(
            &store,
            IncomingRequest::new(HttpMethod::Put, &item).with_json(&json!({
                "kind": "Deployment",
                "metadata": {"name": "web", "resourceVersion": "1"},
                "spec": {"replicas": 2}
            })),
        );
        assert_eq!(replaced.status, 200);
        assert_eq!(replaced.body_json().unwrap()["metadata"]["resourceVersion"], "2");

        let list = send(&store, IncomingRequest::new(HttpMethod::Get, collection));
        let list = list.body_json().unwrap();
        assert_eq!(list["kind"], "DeploymentList");
        assert_eq!(list["metadata"]["resourceVersion"], "2");

        assert_eq!(send(&store, IncomingRequest::new(HttpMethod::Delete, &item)).status, 200);
        let gone = send(&store, IncomingRequest::new(HttpMethod::Get, &item));
        assert_eq!(gone.status, 404);
        assert_eq!(gone.body_json().unwrap()["reason"], "NotFound");
    }

    #[rstest]
    #[case(PatchType::MERGE, json!({"spec": {"replicas": 3}}))]
    #[case(PatchType::STRATEGIC_MERGE, json!({"spec": {"replicas": 3}}))]
    #[case(PatchType::JSON, json!([{"op": "replace", "path": "/spec/replicas", "value": 3}]))]
    fn test_patch_content_types(store: ResourceStore, #[case] content_type: &str, #[case] patch: Value) {
        send(&store, post("/api/v1/namespaces/ns1/pods", json!({"metadata": {"name": "a"}, "spec": {"replicas": 1}})));
        let patched = send(
            &store,
            IncomingRequest::new(HttpMethod::Patch, "/api/v1/namespaces/ns1/pods/a")
                .with_header("Content-Type", content_type)
                .with_body(patch.to_string()),
        );
        assert_eq!(patched.status, 200);
        assert_eq!(patched.body_json().unwrap()["spec"]["replicas"], 3);
    }

    #[rstest]
    fn test_apply_patch_accepts_yaml(store: ResourceStore) {
        send(&store, post("/api/v1/namespaces/ns1/configmaps", json!({"metadata": {"name": "cm"}})));
        let patched = send(
            &store,
            IncomingRequest::new(HttpMethod::Patch, "/api/v1/namespaces/ns1/configmaps/cm")
                .with_header("Content-Type", PatchType::APPLY_YAML)
                .with_body("data:\n  key: value\n"),
        );
        assert_eq!(patched.status, 200);
        assert_eq!(patched.body_json().unwrap()["data"]["key"], "value");
    }

    #[rstest]
    fn test_status_subresource(store: ResourceStore) {
        send(&store, post("/api/v1/namespaces/ns1/pods", json!({"metadata": {"name": "a"}})));
        let updated = send(
            &store,
            IncomingRequest::new(HttpMethod::Put, "/api/v1/namespaces/ns1/pods/a/status")
                .with_json(&json!({"metadata": {"name": "a"}, "status": {"phase": "Running"}})),
        );
        assert_eq!(updated.status, 200);
        let read = send(&store, IncomingRequest::new(HttpMethod::Get, "/api/v1/namespaces/ns1/pods/a/status"));
        assert_eq!(read.body_json().unwrap()["status"]["phase"], "Running");
    }

    #[rstest]
    fn test_cluster_scoped_namespaces(store: ResourceStore) {
        let created = send(&store, post("/api/v1/namespaces", json!({"kind": "Namespace", "metadata": {"name": "ns1"}})));
        assert_eq!(created.status, 201);
        assert!(created.body_json().unwrap()["metadata"].get("namespace").is_none());

        let read = send(&store, IncomingRequest::new(HttpMethod::Get, "/api/v1/namespaces/ns1"));
        assert_eq!(read.status, 200);
        let list = send(&store, IncomingRequest::new(HttpMethod::Get, "/api/v1/namespaces"));
        assert_eq!(list.body_json().unwrap()["items"].as_array().unwrap().len(), 1);
    }

    #[rstest]
    #[case(IncomingRequest::new(HttpMethod::Post, "/api/v1/namespaces/ns1/pods"), 400)]
    #[case(IncomingRequest::new(HttpMethod::Post, "/api/v1/namespaces/ns1/pods").with_body("{not json"), 400)]
    #[case(IncomingRequest::new(HttpMethod::Get, "/api/v1/namespaces/ns1/pods?labelSelector=a%20b"), 400)]
    #[case(IncomingRequest::new(HttpMethod::Get, "/api/v1/namespaces/ns1/pods?watch=true&resourceVersion=abc"), 400)]
    #[case(IncomingRequest::new(HttpMethod::Post, "/api/v1/namespaces/ns1/pods/a").with_body("{}"), 405)]
    #[case(IncomingRequest::new(HttpMethod::Put, "/api/v1/namespaces/ns1/pods").with_body("{}"), 405)]
    #[case(IncomingRequest::new(HttpMethod::Get, "/api/v1/namespaces/ns1/pods/a/log"), 404)]
    #[case(IncomingRequest::new(HttpMethod::Get, "/metrics"), 404)]
    #[case(IncomingRequest::new(HttpMethod::Patch, "/api/v1/namespaces/ns1/pods/a").with_header("content-type", "text/plain").with_body("{}"), 415)]
    fn test_rejected_requests(store: ResourceStore, #[case] request: IncomingRequest, #[case] status: u16) {
        let rejected = send(&store, request);
        assert_eq!(rejected.status, status);
        assert_eq!(rejected.body_json().unwrap()["kind"], "Status");
        assert!(store.is_empty());
    }

    #[rstest]
    fn test_version_endpoint(store: ResourceStore) {
        let version = send(&store, IncomingRequest::new(HttpMethod::Get, "/version"));
        assert_eq!(version.status, 200);
        assert_eq!(version.body_json().unwrap()["major"], "1");
    }

    #[rstest]
    #[case("/api/v1/namespaces/ns1/pods?watch=true&resourceVersion=0&timeoutSeconds=5", Some(5))]
    #[case("/api/v1/watch/namespaces/ns1/pods?resourceVersion=0", None)]
    #[case("/api/v1/namespaces/ns1/pods?watch=1&resourceVersion=0&fieldSelector=metadata.name%3Da", None)]
    fn test_watch_requests(store: ResourceStore, #[case] url: &str, #[case] timeout_secs: Option<u64>) {
        send(&store, post("/api/v1/namespaces/ns1/pods", json!({"metadata": {"name": "a"}})));
        send(&store, post("/api/v1/namespaces/ns1/pods", json!({"metadata": {"name": "b"}})));

        let Dispatch::Watch { mut session, timeout } = handle(&store, &IncomingRequest::new(HttpMethod::Get, url)) else {
            panic!("expected a watch");
        };
        assert_eq!(timeout, timeout_secs.map(Duration::from_secs));
        let first = session.try_next().unwrap();
        assert_eq!(first.event_type, WatchEventType::Added);
        assert_eq!(first.object["metadata"]["name"], "a");
    }

    #[rstest]
    fn test_item_watch_is_name_scoped(store: ResourceStore) {
        let Dispatch::Watch { mut session, .. } = handle(
            &store,
            &IncomingRequest::new(HttpMethod::Get, "/api/v1/namespaces/ns1/pods/a?watch=true"),
        ) else {
            panic!("expected a watch");
        };
        send(&store, post("/api/v1/namespaces/ns1/pods", json!({"metadata": {"name": "b"}})));
        send(&store, post("/api/v1/namespaces/ns1/pods", json!({"metadata": {"name": "a"}})));
        let events = session.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].object["metadata"]["name"], "a");
    }
}
