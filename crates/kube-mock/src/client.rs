//! Blocking client bound to one mock server.

use crate::error::{MockError, Result};
use crate::tls::TlsMaterial;
use kube_mock_core::{HttpMethod, PatchType, ResourceType, WatchEvent};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use std::io::{BufRead, BufReader};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Handle to a mock server endpoint.
///
/// Clones and [`KubeMockClient::in_namespace`] views share the closed state: closing
/// one closes all of them. Must not be used (or dropped) inside an async runtime.
#[derive(Debug, Clone)]
pub struct KubeMockClient {
    http: Client,
    base_url: String,
    namespace: String,
    timeout: Duration,
    closed: Arc<AtomicBool>,
}

impl KubeMockClient {
    /// Client for `base_url`. With `tls`, only that certificate is trusted.
    pub fn new(
        base_url: &str,
        namespace: &str,
        timeout: Duration,
        tls: Option<&TlsMaterial>,
    ) -> Result<Self> {
        let mut builder = Client::builder()
            .use_rustls_tls()
            .no_proxy()
            .timeout(None::<Duration>);
        if let Some(material) = tls {
            builder = builder
                .tls_built_in_root_certs(false)
                .add_root_certificate(material.client_certificate()?);
        }

        Ok(Self {
            http: builder.build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            namespace: namespace.to_string(),
            timeout,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Namespace used by [`KubeMockClient::resource`].
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Same endpoint, different default namespace.
    pub fn in_namespace(&self, namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            ..self.clone()
        }
    }

    /// Refuse every further call. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(url = %self.base_url, "client closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(MockError::ClientClosed)
        } else {
            Ok(())
        }
    }

    fn builder(&self, method: HttpMethod, path: &str) -> RequestBuilder {
        let method = match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Head => reqwest::Method::HEAD,
            HttpMethod::Options => reqwest::Method::OPTIONS,
        };
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header(ACCEPT, "application/json")
    }

    /// Send a request and return the answer whatever its status.
    pub fn request(&self, method: HttpMethod, path: &str, body: Option<&Value>) -> Result<ApiResponse> {
        let body = body
            .map(|b| serde_json::to_vec(b).map(|bytes| ("application/json", bytes)))
            .transpose()?;
        self.send(method, path, body)
    }

    /// Send a request with a body of an explicit media type.
    pub fn request_with(
        &self,
        method: HttpMethod,
        path: &str,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<ApiResponse> {
        self.send(method, path, Some((content_type, body)))
    }

    fn send(&self, method: HttpMethod, path: &str, body: Option<(&str, Vec<u8>)>) -> Result<ApiResponse> {
        self.ensure_open()?;
        let mut request = self.builder(method, path).timeout(self.timeout);
        if let Some((content_type, bytes)) = body {
            request = request.header(CONTENT_TYPE, content_type).body(bytes);
        }

        let response = request.send()?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes()?.to_vec();
        debug!(%method, path, status, "response");

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }

    /// Typed access to one resource type in the client's namespace.
    pub fn resource(&self, resource_type: ResourceType) -> ResourceClient<'_> {
        ResourceClient {
            client: self,
            resource_type,
            namespace: Some(self.namespace.clone()),
        }
    }

    /// `GET /version`.
    pub fn version(&self) -> Result<Value> {
        self.request(HttpMethod::Get, "/version", None)?.into_json()
    }
}

/// Raw answer of [`KubeMockClient::request`].
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> Result<Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Body of a successful response; other statuses become [`MockError::Api`].
    pub fn into_json(self) -> Result<Value> {
        if self.is_success() {
            self.json()
        } else {
            Err(MockError::from_response(self.status, &self.body))
        }
    }
}

/// Query parameters of list, delete-collection and watch calls.
#[derive(Debug, Clone, Default)]
pub struct ListParams {
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
    pub resource_version: Option<String>,
    pub timeout_seconds: Option<u64>,
}

impl ListParams {
    pub fn labels(mut self, selector: &str) -> Self {
        self.label_selector = Some(selector.to_string());
        self
    }

    pub fn fields(mut self, selector: &str) -> Self {
        self.field_selector = Some(selector.to_string());
        self
    }

    /// Watch from this version on.
    pub fn at(mut self, resource_version: &str) -> Self {
        self.resource_version = Some(resource_version.to_string());
        self
    }

    /// Server-side watch timeout.
    pub fn timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    fn query(&self, watch: bool) -> String {
        let mut pairs = Vec::new();
        if watch {
            pairs.push("watch=true".to_string());
        }
        let mut push = |key: &str, value: Option<&str>| {
            if let Some(value) = value {
                pairs.push(format!("{key}={}", urlencoding::encode(value)));
            }
        };
        push("labelSelector", self.label_selector.as_deref());
        push("fieldSelector", self.field_selector.as_deref());
        push("resourceVersion", self.resource_version.as_deref());
        let timeout = self.timeout_seconds.map(|t| t.to_string());
        push("timeoutSeconds", timeout.as_deref());

        if pairs.is_empty() {
            String::new()
        } else {
            format!("?{}", pairs.join("&"))
        }
    }
}

/// Typed calls for one resource type, bound to a namespace or to the whole cluster.
#[derive(Debug, Clone)]
pub struct ResourceClient<'a> {
    client: &'a KubeMockClient,
    resource_type: ResourceType,
    namespace: Option<String>,
}

impl ResourceClient<'_> {
    pub fn namespaced(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    /// Cluster-scoped types, or every namespace of a namespaced type.
    pub fn cluster(mut self) -> Self {
        self.namespace = None;
        self
    }

    pub fn resource_type(&self) -> &ResourceType {
        &self.resource_type
    }

    fn collection(&self) -> String {
        self.resource_type.collection_path(self.namespace.as_deref())
    }

    fn item(&self, name: &str) -> String {
        self.resource_type
            .item_path(self.namespace.as_deref(), name)
    }

    pub fn create(&self, body: &Value) -> Result<Value> {
        self.client
            .request(HttpMethod::Post, &self.collection(), Some(body))?
            .into_json()
    }

    pub fn get(&self, name: &str) -> Result<Value> {
        self.client
            .request(HttpMethod::Get, &self.item(name), None)?
            .into_json()
    }

    /// Replace the object; a `metadata.resourceVersion` in `body` must match the stored one.
    pub fn replace(&self, name: &str, body: &Value) -> Result<Value> {
        self.client
            .request(HttpMethod::Put, &self.item(name), Some(body))?
            .into_json()
    }

    pub fn replace_status(&self, name: &str, body: &Value) -> Result<Value> {
        self.client
            .request(HttpMethod::Put, &format!("{}/status", self.item(name)), Some(body))?
            .into_json()
    }

    pub fn patch(&self, name: &str, patch_type: PatchType, patch: &Value) -> Result<Value> {
        self.send_patch(&self.item(name), patch_type, patch)
    }

    pub fn patch_merge(&self, name: &str, patch: &Value) -> Result<Value> {
        self.patch(name, PatchType::Merge, patch)
    }

    pub fn patch_json(&self, name: &str, operations: &Value) -> Result<Value> {
        self.patch(name, PatchType::Json, operations)
    }

    /// Merge patch of the status sub-resource.
    pub fn patch_status(&self, name: &str, patch: &Value) -> Result<Value> {
        self.send_patch(&format!("{}/status", self.item(name)), PatchType::Merge, patch)
    }

    fn send_patch(&self, path: &str, patch_type: PatchType, patch: &Value) -> Result<Value> {
        self.client
            .request_with(
                HttpMethod::Patch,
                path,
                patch_type.content_type(),
                serde_json::to_vec(patch)?,
            )?
            .into_json()
    }

    pub fn delete(&self, name: &str) -> Result<Value> {
        self.client
            .request(HttpMethod::Delete, &self.item(name), None)?
            .into_json()
    }

    pub fn delete_collection(&self, params: &ListParams) -> Result<Value> {
        let path = format!("{}{}", self.collection(), params.query(false));
        self.client
            .request(HttpMethod::Delete, &path, None)?
            .into_json()
    }

    pub fn list(&self, params: &ListParams) -> Result<Value> {
        let path = format!("{}{}", self.collection(), params.query(false));
        self.client
            .request(HttpMethod::Get, &path, None)?
            .into_json()
    }

    /// Open a watch. Reads block until the next event arrives.
    pub fn watch(&self, params: &ListParams) -> Result<WatchStream> {
        self.client.ensure_open()?;
        let path = format!("{}{}", self.collection(), params.query(true));
        let response = self.client.builder(HttpMethod::Get, &path).send()?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.bytes()?;
            return Err(MockError::from_response(status, &body));
        }
        debug!(path = %path, "watch opened");
        Ok(WatchStream {
            reader: Some(BufReader::new(response)),
        })
    }
}

/// Events of an open watch, one per line of the response body.
///
/// Iteration ends when the server closes the stream (timeout or server shutdown) or
/// after [`WatchStream::close`].
pub struct WatchStream {
    reader: Option<BufReader<Response>>,
}

impl std::fmt::Debug for WatchStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchStream")
            .field("closed", &self.reader.is_none())
            .finish()
    }
}

impl WatchStream {
    /// Drop the connection. The server stops delivering to this session.
    pub fn close(&mut self) {
        if self.reader.take().is_some() {
            debug!("watch closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.reader.is_none()
    }
}

impl Iterator for WatchStream {
    type Item = Result<WatchEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        let reader = self.reader.as_mut()?;
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => {
                    self.reader = None;
                    return None;
                }
                Ok(_) if line.trim().is_empty() => continue,
                Ok(_) => return Some(serde_json::from_str(line.trim()).map_err(MockError::from)),
                Err(e) => {
                    self.reader = None;
                    return Some(Err(MockError::WatchRead(e)));
                }
            }
        }
    }
}
