//! Request dispatch.
//!
//! A [`Dispatcher`] is built once per server in one of two modes and never changes
//! mode afterwards. Every request is recorded in a journal before it is answered.

mod crud;

use crate::config::error::ConfigError;
use crate::config::settings::MockConfig;
use crate::expectations::ExpectationStore;
use crate::store::{ResourceStore, WatchSession};
use crate::types::request::IncomingRequest;
use crate::types::resource::status_object;
use crate::types::response::HttpResponse;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

/// Backend answering requests.
#[derive(Debug)]
pub enum DispatcherMode {
    /// Scripted responses
    Expectation(ExpectationStore),
    /// Stateful Kubernetes-like resource store
    Crud(ResourceStore),
}

/// Outcome of dispatching one request.
#[derive(Debug)]
pub enum Dispatch {
    Response(HttpResponse),
    /// Stream the session's events until it ends or `timeout` elapses
    Watch {
        session: WatchSession,
        timeout: Option<Duration>,
    },
}

#[derive(Debug, Default)]
struct Journal {
    pending: VecDeque<IncomingRequest>,
    total: usize,
}

#[derive(Debug)]
pub struct Dispatcher {
    mode: DispatcherMode,
    journal: Mutex<Journal>,
}

impl Dispatcher {
    pub fn new(mode: DispatcherMode) -> Self {
        Self {
            mode,
            journal: Mutex::new(Journal::default()),
        }
    }

    pub fn expectation() -> Self {
        Self::new(DispatcherMode::Expectation(ExpectationStore::new()))
    }

    pub fn crud() -> Self {
        Self::new(DispatcherMode::Crud(ResourceStore::new()))
    }

    /// Build the dispatcher a config asks for, preloading expectation fixtures.
    pub fn from_config(config: &MockConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        if config.crud {
            return Ok(Self::crud());
        }
        let expectations = ExpectationStore::new();
        expectations.register_all(config.load_fixtures()?);
        Ok(Self::new(DispatcherMode::Expectation(expectations)))
    }

    pub fn mode(&self) -> &DispatcherMode {
        &self.mode
    }

    pub fn is_crud(&self) -> bool {
        matches!(self.mode, DispatcherMode::Crud(_))
    }

    pub fn expectations(&self) -> Option<&ExpectationStore> {
        match &self.mode {
            DispatcherMode::Expectation(store) => Some(store),
            DispatcherMode::Crud(_) => None,
        }
    }

    pub fn store(&self) -> Option<&ResourceStore> {
        match &self.mode {
            DispatcherMode::Crud(store) => Some(store),
            DispatcherMode::Expectation(_) => None,
        }
    }

    fn journal(&self) -> MutexGuard<'_, Journal> {
        self.journal
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn dispatch(&self, request: IncomingRequest) -> Dispatch {
        {
            let mut journal = self.journal();
            journal.total += 1;
            journal.pending.push_back(request.clone());
        }

        match &self.mode {
            DispatcherMode::Expectation(expectations) => {
                let response = expectations.handle(&request).unwrap_or_else(|| {
                    debug!(method = %request.method, path = %request.path, "no expectation matched");
                    let message = format!(
                        "no expectation matches {} {}",
                        request.method, request.path
                    );
                    HttpResponse::json(404, &status_object(404, "NotFound", &message))
                });
                Dispatch::Response(response)
            }
            DispatcherMode::Crud(store) => crud::handle(store, &request),
        }
    }

    /// Requests received so far, including ones already taken.
    pub fn request_count(&self) -> usize {
        self.journal().total
    }

    pub fn last_request(&self) -> Option<IncomingRequest> {
        self.journal().pending.back().cloned()
    }

    /// Oldest request not yet taken.
    pub fn take_request(&self) -> Option<IncomingRequest> {
        self.journal().pending.pop_front()
    }

    /// End every open watch. The dispatcher keeps answering requests.
    pub fn shutdown(&self) {
        if let DispatcherMode::Crud(store) = &self.mode {
            info!(watches = store.watch_count(), "closing watch sessions");
            store.close_watches();
        }
    }
}
