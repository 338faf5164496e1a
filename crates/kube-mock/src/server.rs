//! HTTP/HTTPS endpoint serving a [`Dispatcher`].
//!
//! Each server owns a multi-threaded tokio runtime, so it can be shared by tests that
//! run one after another and outlive any of them. The public API is blocking and must
//! not be called from inside another async runtime.

use crate::client::KubeMockClient;
use crate::error::{MockError, Result};
use crate::tls::TlsMaterial;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use kube_mock_core::expectations::ExpectationBuilder;
use kube_mock_core::{
    Dispatch, Dispatcher, ExpectationStore, HttpMethod, HttpResponse, IncomingRequest, MockConfig,
    ResourceStore, WatchSession,
};
use std::convert::Infallible;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

/// How long `destroy` waits for the endpoint to be released.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
/// Grace period for in-flight responses once shutdown starts.
const GRACE_PERIOD: Duration = Duration::from_millis(250);

struct Running {
    runtime: Runtime,
    handle: Handle,
    done: mpsc::Receiver<io::Result<()>>,
    addr: SocketAddr,
    tls: Option<TlsMaterial>,
}

#[derive(Default)]
struct ServerState {
    running: Option<Running>,
    destroyed: bool,
}

pub struct MockServer {
    config: MockConfig,
    dispatcher: Arc<Dispatcher>,
    state: Mutex<ServerState>,
}

impl fmt::Debug for MockServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockServer")
            .field("url", &self.url())
            .field("crud", &self.config.crud)
            .field("https", &self.config.https)
            .finish()
    }
}

impl MockServer {
    /// Build a server for `config` without binding it yet.
    pub fn new(config: MockConfig) -> Result<Self> {
        let dispatcher = Dispatcher::from_config(&config)?;
        Ok(Self {
            config,
            dispatcher: Arc::new(dispatcher),
            state: Mutex::new(ServerState::default()),
        })
    }

    /// Build and bind a server.
    pub fn start(config: MockConfig) -> Result<Self> {
        let server = Self::new(config)?;
        server.init()?;
        Ok(server)
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bind `127.0.0.1` on a free port and start serving. Calling it on a running
    /// server does nothing.
    pub fn init(&self) -> Result<()> {
        let mut state = self.state();
        if state.destroyed {
            return Err(MockError::ServerDestroyed);
        }
        if state.running.is_some() {
            return Ok(());
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("kube-mock-server")
            .enable_all()
            .build()
            .map_err(MockError::Runtime)?;

        let tls = if self.config.https {
            Some(TlsMaterial::self_signed()?)
        } else {
            None
        };

        let bind_addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let handle = Handle::new();
        let app = router(Arc::clone(&self.dispatcher));
        let serving: BoxFuture<'static, io::Result<()>> = match &tls {
            Some(material) => {
                let rustls = RustlsConfig::from_config(material.server_config()?);
                axum_server::tls_rustls::bind_rustls(bind_addr, rustls)
                    .handle(handle.clone())
                    .serve(app.into_make_service())
                    .boxed()
            }
            None => axum_server::bind(bind_addr)
                .handle(handle.clone())
                .serve(app.into_make_service())
                .boxed(),
        };

        let (done_tx, done) = mpsc::channel();
        runtime.spawn(async move {
            let _ = done_tx.send(serving.await);
        });

        let Some(addr) = runtime.block_on(handle.listening()) else {
            let error = match done.recv_timeout(SHUTDOWN_TIMEOUT) {
                Ok(Err(e)) => e,
                _ => io::Error::other("server stopped before listening"),
            };
            runtime.shutdown_background();
            return Err(MockError::Bind(error));
        };

        info!(%addr, https = self.config.https, crud = self.config.crud, "mock server listening");
        state.running = Some(Running {
            runtime,
            handle,
            done,
            addr,
            tls,
        });
        Ok(())
    }

    /// Close every watch session, stop accepting connections and release the
    /// endpoint. Safe to call more than once; a server is not restarted afterwards.
    pub fn destroy(&self) {
        let running = {
            let mut state = self.state();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.running.take()
        };

        self.dispatcher.shutdown();
        let Some(running) = running else {
            return;
        };

        running.handle.graceful_shutdown(Some(GRACE_PERIOD));
        match running.done.recv_timeout(SHUTDOWN_TIMEOUT) {
            Ok(Ok(())) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                info!(addr = %running.addr, "mock server stopped");
            }
            Ok(Err(e)) => warn!(addr = %running.addr, error = %e, "mock server stopped with an error"),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(addr = %running.addr, "mock server did not release its endpoint in time");
            }
        }
        running.runtime.shutdown_background();
    }

    pub fn is_running(&self) -> bool {
        self.state().running.is_some()
    }

    pub fn address(&self) -> Option<SocketAddr> {
        self.state().running.as_ref().map(|r| r.addr)
    }

    /// Base url, e.g. `http://127.0.0.1:41234`.
    pub fn url(&self) -> Option<String> {
        let scheme = if self.config.https { "https" } else { "http" };
        self.address().map(|addr| format!("{scheme}://{addr}"))
    }

    pub fn config(&self) -> &MockConfig {
        &self.config
    }

    pub fn is_crud(&self) -> bool {
        self.dispatcher.is_crud()
    }

    /// PEM certificate of an HTTPS server.
    pub fn certificate_pem(&self) -> Option<String> {
        self.state()
            .running
            .as_ref()
            .and_then(|r| r.tls.as_ref())
            .map(|tls| tls.cert_pem().to_string())
    }

    /// Client bound to this server's endpoint, trusting its certificate.
    pub fn create_client(&self) -> Result<KubeMockClient> {
        let (url, tls) = {
            let state = self.state();
            if state.destroyed {
                return Err(MockError::ServerDestroyed);
            }
            let running = state.running.as_ref().ok_or(MockError::NotRunning)?;
            let scheme = if running.tls.is_some() { "https" } else { "http" };
            (format!("{scheme}://{}", running.addr), running.tls.clone())
        };
        KubeMockClient::new(
            &url,
            &self.config.namespace,
            Duration::from_millis(self.config.request_timeout_ms),
            tls.as_ref(),
        )
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn expectations(&self) -> Result<&ExpectationStore> {
        self.dispatcher.expectations().ok_or(MockError::CrudMode)
    }

    /// Start registering an expectation.
    pub fn expect(&self) -> Result<ExpectationBuilder<'_>> {
        Ok(self.expectations()?.expect())
    }

    /// Resource store of a CRUD server.
    pub fn store(&self) -> Option<&ResourceStore> {
        self.dispatcher.store()
    }

    pub fn request_count(&self) -> usize {
        self.dispatcher.request_count()
    }

    pub fn last_request(&self) -> Option<IncomingRequest> {
        self.dispatcher.last_request()
    }

    pub fn take_request(&self) -> Option<IncomingRequest> {
        self.dispatcher.take_request()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new().fallback(handle_request).with_state(dispatcher)
}

async fn handle_request(
    State(dispatcher): State<Arc<Dispatcher>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(method) = HttpMethod::parse(method.as_str()) else {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    };
    let url = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());

    let mut request = IncomingRequest::new(method, url);
    for (name, value) in &headers {
        if let Ok(value) = value.to_str() {
            request = request.with_header(name.as_str(), value);
        }
    }
    if !body.is_empty() {
        request = request.with_body(body.to_vec());
    }

    debug!(%method, url, "request");
    match dispatcher.dispatch(request) {
        Dispatch::Response(response) => into_response(response),
        Dispatch::Watch { session, timeout } => watch_response(session, timeout),
    }
}

fn into_response(response: HttpResponse) -> Response {
    let mut out = Response::new(Body::from(response.body));
    *out.status_mut() =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    for (name, value) in &response.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                out.headers_mut().append(name, value);
            }
            _ => warn!(header = %name, "dropping invalid response header"),
        }
    }
    out
}

/// Stream watch events as newline-delimited JSON until the session closes or the
/// timeout elapses.
fn watch_response(session: WatchSession, timeout: Option<Duration>) -> Response {
    let id = session.id();
    debug!(watch = id, ?timeout, "watch opened");
    let events = UnboundedReceiverStream::new(session.into_receiver())
        .map(|event| Ok::<_, Infallible>(Bytes::from(event.to_line())));

    let body = match timeout {
        Some(timeout) => Body::from_stream(events.take_until(tokio::time::sleep(timeout))),
        None => Body::from_stream(events),
    };
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response()
}
