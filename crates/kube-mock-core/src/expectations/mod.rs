//! Scripted expectation queues.
//!
//! `ExpectationStore` keeps an ordered list of request patterns, each with a FIFO
//! queue of responses. A matching request takes the head of the queue; the last
//! remaining response is never removed and answers every later match.

use crate::config::settings::ExpectationFixture;
use crate::matching::PathMatch;
use crate::types::request::{BodyMatcher, HttpMethod, IncomingRequest, ServerRequest};
use crate::types::response::{HttpResponse, ResponseBody, ServerResponse};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Clone)]
struct Expectation {
    request: ServerRequest,
    responses: VecDeque<ServerResponse>,
}

impl Expectation {
    fn next_response(&mut self) -> Option<ServerResponse> {
        if self.responses.len() > 1 {
            self.responses.pop_front()
        } else {
            self.responses.front().cloned()
        }
    }
}

/// Registered request patterns with their response queues.
#[derive(Debug, Default)]
pub struct ExpectationStore {
    expectations: Mutex<Vec<Expectation>>,
}

impl ExpectationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Expectation>> {
        // A panic while holding the lock cannot leave a queue half-updated.
        self.expectations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append `responses` to the queue of `request`, creating it if needed.
    pub fn register(&self, request: ServerRequest, responses: Vec<ServerResponse>) {
        if responses.is_empty() {
            return;
        }
        let request = request.normalize();
        debug!(method = %request.method, path = %request.path, count = responses.len(), "register expectation");

        let mut expectations = self.lock();
        match expectations.iter_mut().find(|e| e.request == request) {
            Some(existing) => existing.responses.extend(responses),
            None => expectations.push(Expectation {
                request,
                responses: responses.into(),
            }),
        }
    }

    pub fn register_all(&self, fixtures: Vec<ExpectationFixture>) {
        for fixture in fixtures {
            self.register(fixture.request, fixture.responses);
        }
    }

    /// Start a fluent registration.
    pub fn expect(&self) -> ExpectationBuilder<'_> {
        ExpectationBuilder {
            store: self,
            request: ServerRequest::new(HttpMethod::Get, "/"),
        }
    }

    /// Answer `request` from the most specific matching queue.
    ///
    /// Among equally specific patterns the earliest registered wins. `None` when
    /// nothing matches; no queue is touched in that case.
    pub fn handle(&self, request: &IncomingRequest) -> Option<HttpResponse> {
        let mut expectations = self.lock();

        let mut best: Option<(usize, (usize, usize, usize), PathMatch)> = None;
        for (index, expectation) in expectations.iter().enumerate() {
            if expectation.responses.is_empty() {
                continue;
            }
            let Some(path_match) = expectation.request.matches(request) else {
                continue;
            };
            let specificity = expectation.request.specificity();
            if best.as_ref().map_or(true, |(_, s, _)| specificity > *s) {
                best = Some((index, specificity, path_match));
            }
        }

        let (index, _, path_match) = best?;
        let expectation = &mut expectations[index];
        let response = expectation.next_response()?;
        debug!(
            method = %request.method,
            path = %request.path,
            pattern = %expectation.request.path,
            status = response.status,
            "expectation matched"
        );
        Some(response.render(&path_match.params))
    }

    /// Number of registered patterns.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Responses still queued for `request`, counting the replayed last one.
    pub fn remaining(&self, request: &ServerRequest) -> usize {
        let request = request.clone().normalize();
        self.lock()
            .iter()
            .find(|e| e.request == request)
            .map_or(0, |e| e.responses.len())
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// Request half of a fluent registration.
#[must_use = "an expectation is only registered by `and_return(..).once()` or `.times(n)`"]
pub struct ExpectationBuilder<'a> {
    store: &'a ExpectationStore,
    request: ServerRequest,
}

impl<'a> ExpectationBuilder<'a> {
    pub fn method(mut self, method: HttpMethod) -> Self {
        self.request.method = method;
        self
    }

    pub fn get(self) -> Self {
        self.method(HttpMethod::Get)
    }

    pub fn post(self) -> Self {
        self.method(HttpMethod::Post)
    }

    pub fn put(self) -> Self {
        self.method(HttpMethod::Put)
    }

    pub fn patch(self) -> Self {
        self.method(HttpMethod::Patch)
    }

    pub fn delete(self) -> Self {
        self.method(HttpMethod::Delete)
    }

    /// Path or path template; an embedded query string becomes query constraints.
    pub fn with_path(mut self, path: &str) -> Self {
        let parsed = ServerRequest::new(self.request.method, path);
        self.request.path = parsed.path;
        self.request.query.extend(parsed.query);
        self
    }

    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        self.request = self.request.with_query(key, value);
        self
    }

    /// Require the request body to contain `subset`.
    pub fn with_body(mut self, subset: Value) -> Self {
        self.request = self.request.with_body(BodyMatcher::Subset(subset));
        self
    }

    /// Require a JMESPath expression over the request body to be truthy.
    pub fn with_body_expression(mut self, expression: &str) -> Self {
        self.request = self
            .request
            .with_body(BodyMatcher::Expression(expression.to_string()));
        self
    }

    pub fn and_return(self, status: u16, body: impl Into<ResponseBody>) -> ResponseBuilder<'a> {
        self.and_reply(ServerResponse::new(status, body))
    }

    pub fn and_reply(self, response: ServerResponse) -> ResponseBuilder<'a> {
        ResponseBuilder {
            store: self.store,
            request: self.request,
            response,
        }
    }
}

/// Response half of a fluent registration.
#[must_use = "call `.once()` or `.times(n)` to register the expectation"]
pub struct ResponseBuilder<'a> {
    store: &'a ExpectationStore,
    request: ServerRequest,
    response: ServerResponse,
}

impl ResponseBuilder<'_> {
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.response = self.response.with_header(name, value);
        self
    }

    pub fn once(self) {
        self.times(1);
    }

    /// Queue the response `n` times. `n == 0` registers nothing.
    pub fn times(self, n: usize) {
        let responses = vec![self.response; n];
        self.store.register(self.request, responses);
    }
}
