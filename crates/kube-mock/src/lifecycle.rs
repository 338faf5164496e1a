//! Server/client pairs per test scope.
//!
//! A [`LifecycleManager`] keeps a stack of active scopes. The static scope lives for a
//! whole group of tests, the instant scope for a single test; each owns its own
//! [`MockServer`] and therefore its own stores. Handles are looked up by capability
//! type from the innermost active scope:
//!
//! ```no_run
//! use kube_mock::{KubeMockClient, LifecycleManager, MockConfig, MockServer, Scope};
//! use std::sync::Arc;
//!
//! let mut lifecycle = LifecycleManager::new();
//! lifecycle.before_all(&MockConfig::crud()).unwrap();
//! {
//!     let guard = lifecycle.enter(Scope::Instant, &MockConfig::default()).unwrap();
//!     let client: KubeMockClient = guard.get().unwrap();
//!     let server: Arc<MockServer> = guard.get().unwrap();
//!     assert!(!server.is_crud());
//!     client.version().unwrap_or_default();
//! }
//! lifecycle.after_all();
//! ```

use crate::client::KubeMockClient;
use crate::error::{MockError, Result};
use crate::logging::init_tracing;
use crate::server::MockServer;
use kube_mock_core::MockConfig;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Shared by every test of a group
    Static,
    /// One test
    Instant,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Static => f.write_str("static"),
            Scope::Instant => f.write_str("instant"),
        }
    }
}

/// Live server and client of one scope.
#[derive(Debug, Clone)]
pub struct MockFixture {
    pub server: Arc<MockServer>,
    pub client: KubeMockClient,
}

/// A handle type that can be taken from an active scope.
pub trait Capability: Sized {
    fn from_fixture(fixture: &MockFixture) -> Self;
}

impl Capability for KubeMockClient {
    fn from_fixture(fixture: &MockFixture) -> Self {
        fixture.client.clone()
    }
}

impl Capability for Arc<MockServer> {
    fn from_fixture(fixture: &MockFixture) -> Self {
        Arc::clone(&fixture.server)
    }
}

impl Capability for MockFixture {
    fn from_fixture(fixture: &MockFixture) -> Self {
        fixture.clone()
    }
}

#[derive(Debug)]
pub struct LifecycleManager {
    scopes: Vec<(Scope, MockFixture)>,
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleManager {
    pub fn new() -> Self {
        init_tracing();
        Self { scopes: Vec::new() }
    }

    /// Start a server for `scope` and bind a client to it.
    pub fn acquire(&mut self, scope: Scope, config: &MockConfig) -> Result<MockFixture> {
        if self.is_active(scope) {
            return Err(MockError::ScopeActive(scope));
        }

        let server = Arc::new(MockServer::start(config.clone())?);
        let client = server.create_client()?;
        info!(%scope, url = %client.base_url(), crud = config.crud, https = config.https, "scope acquired");

        let fixture = MockFixture { server, client };
        self.scopes.push((scope, fixture.clone()));
        Ok(fixture)
    }

    /// Close the client and destroy the server of `scope`. Nothing happens when the
    /// scope is not active.
    pub fn release(&mut self, scope: Scope) {
        let Some(index) = self.scopes.iter().position(|(s, _)| *s == scope) else {
            debug!(%scope, "release of an inactive scope ignored");
            return;
        };
        let (_, fixture) = self.scopes.remove(index);
        fixture.client.close();
        fixture.server.destroy();
        info!(%scope, "scope released");
    }

    pub fn is_active(&self, scope: Scope) -> bool {
        self.scopes.iter().any(|(s, _)| *s == scope)
    }

    /// Innermost active scope.
    pub fn active_scope(&self) -> Option<Scope> {
        self.scopes.last().map(|(scope, _)| *scope)
    }

    /// Handle from the innermost active scope.
    pub fn get<T: Capability>(&self) -> Result<T> {
        self.scopes
            .last()
            .map(|(_, fixture)| T::from_fixture(fixture))
            .ok_or(MockError::NoActiveScope)
    }

    /// Handle from a given scope.
    pub fn get_in<T: Capability>(&self, scope: Scope) -> Result<T> {
        self.scopes
            .iter()
            .find(|(s, _)| *s == scope)
            .map(|(_, fixture)| T::from_fixture(fixture))
            .ok_or(MockError::ScopeInactive(scope))
    }

    pub fn client(&self) -> Result<KubeMockClient> {
        self.get()
    }

    pub fn server(&self) -> Result<Arc<MockServer>> {
        self.get()
    }

    /// Acquire `scope` until the returned guard is dropped.
    pub fn enter(&mut self, scope: Scope, config: &MockConfig) -> Result<ScopeGuard<'_>> {
        self.acquire(scope, config)?;
        Ok(ScopeGuard {
            manager: self,
            scope,
        })
    }

    pub fn before_all(&mut self, config: &MockConfig) -> Result<MockFixture> {
        self.acquire(Scope::Static, config)
    }

    pub fn after_all(&mut self) {
        self.release(Scope::Static);
    }

    pub fn before_each(&mut self, config: &MockConfig) -> Result<MockFixture> {
        self.acquire(Scope::Instant, config)
    }

    pub fn after_each(&mut self) {
        self.release(Scope::Instant);
    }
}

impl Drop for LifecycleManager {
    fn drop(&mut self) {
        while let Some(scope) = self.active_scope() {
            self.release(scope);
        }
    }
}

/// Releases its scope on drop. Dereferences to the manager, so nested scopes can be
/// entered through it.
#[derive(Debug)]
pub struct ScopeGuard<'a> {
    manager: &'a mut LifecycleManager,
    scope: Scope,
}

impl ScopeGuard<'_> {
    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn fixture(&self) -> Result<MockFixture> {
        self.manager.get_in(self.scope)
    }
}

impl Deref for ScopeGuard<'_> {
    type Target = LifecycleManager;

    fn deref(&self) -> &Self::Target {
        self.manager
    }
}

impl DerefMut for ScopeGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.manager
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.manager.release(self.scope);
    }
}
