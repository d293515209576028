//! Backend pool and request handling.
//!
//! # Responsibilities
//! - Own the ordered backend list and its rotation cursor
//! - Select the next backend under the configured policy
//! - Forward requests, failing over to the next backend on transport errors

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::ConnectInfo;
use axum::http::request::Parts;
use axum::http::{Request, Response};
use hyper::body::Body as HttpBody;

use crate::config::{RetryConfig, SelectionPolicy};
use crate::error::ProxyError;
use crate::http::request::request_id;
use crate::load_balancer::backend::Backend;
use crate::load_balancer::round_robin::RoundRobin;

/// Response extension naming the backend that produced a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServedBy(pub String);

/// Round-robin balancer over a fixed, ordered pool of backends.
#[derive(Debug)]
pub struct Balancer {
    backends: Vec<Arc<dyn Backend>>,
    rotation: RoundRobin,
    policy: SelectionPolicy,
    retries: RetryConfig,
}

impl Balancer {
    /// Create a balancer; rotation follows the order of `backends`.
    pub fn new(backends: Vec<Arc<dyn Backend>>) -> Result<Self, ProxyError> {
        if backends.is_empty() {
            return Err(ProxyError::Configuration(
                "backend pool must contain at least one backend".to_string(),
            ));
        }

        Ok(Self {
            backends,
            rotation: RoundRobin::new(),
            policy: SelectionPolicy::default(),
            retries: RetryConfig::default(),
        })
    }

    pub fn with_policy(mut self, policy: SelectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_retries(mut self, retries: RetryConfig) -> Self {
        self.retries = retries;
        self
    }

    pub fn backends(&self) -> &[Arc<dyn Backend>] {
        &self.backends
    }

    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }

    /// Total cursor advancements so far.
    pub fn cursor(&self) -> usize {
        self.rotation.cursor()
    }

    /// Pick the backend for the next request.
    pub fn select_next(&self) -> Result<Arc<dyn Backend>, ProxyError> {
        let index = self.rotation.next_index(self.policy, &self.backends)?;
        Ok(self.backends[index].clone())
    }

    /// Forward one inbound request and return the response to relay.
    ///
    /// Idempotent requests whose body fits in `retries.max_body_bytes` are
    /// retried when a forward fails, walking the pool in rotation order from
    /// the first pick, so each backend is tried at most once. Retries skip
    /// backends reported dead and do not move the cursor. Everything else
    /// gets a single streamed attempt.
    pub async fn handle(&self, request: Request<Body>) -> Result<Response<Body>, ProxyError> {
        let request_id = request_id(&request).to_string();

        if !self.is_replayable(&request) {
            let backend = self.select_next()?;
            return self.forward_to(&backend, request, &request_id, 1).await;
        }

        let (parts, body) = request.into_parts();
        let body = axum::body::to_bytes(body, self.retries.max_body_bytes)
            .await
            .map_err(|e| ProxyError::InvalidRequest(format!("failed to read request body: {}", e)))?;

        let first = self.rotation.next_index(self.policy, &self.backends)?;

        let mut attempts = 0;
        let mut last_error = None;
        for backend in self.failover_order(first) {
            attempts += 1;
            if let Some(e) = &last_error {
                tracing::warn!(
                    request_id = %request_id,
                    backend = backend.address(),
                    attempt = attempts,
                    error = %e,
                    "Forward failed, trying next backend"
                );
            }

            let request = rebuild_request(&parts, &body);
            match self.forward_to(backend, request, &request_id, attempts).await {
                Ok(response) => return Ok(response),
                Err(e @ ProxyError::BackendUnavailable { .. }) => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }

        tracing::error!(
            request_id = %request_id,
            method = %parts.method,
            path = %parts.uri.path(),
            attempts,
            "All backends failed"
        );
        Err(last_error.unwrap_or(ProxyError::NoLiveBackends))
    }

    /// The first pick, then every other live backend in rotation order.
    fn failover_order(&self, first: usize) -> impl Iterator<Item = &Arc<dyn Backend>> {
        let len = self.backends.len();
        let retries = (1..len)
            .map(move |offset| &self.backends[(first + offset) % len])
            .filter(|backend| backend.is_alive());
        std::iter::once(&self.backends[first]).chain(retries)
    }

    async fn forward_to(
        &self,
        backend: &Arc<dyn Backend>,
        request: Request<Body>,
        request_id: &str,
        attempt: usize,
    ) -> Result<Response<Body>, ProxyError> {
        tracing::debug!(
            request_id = %request_id,
            backend = backend.address(),
            attempt,
            method = %request.method(),
            path = %request.uri().path(),
            "Forwarding request to backend"
        );

        let mut response = backend.forward(request).await?;
        response
            .extensions_mut()
            .insert(ServedBy(backend.address().to_string()));
        Ok(response)
    }

    fn is_replayable(&self, request: &Request<Body>) -> bool {
        if !self.retries.enabled || self.backends.len() < 2 || !request.method().is_idempotent() {
            return false;
        }
        // Only bodies whose length is known up front; a partially read
        // stream could not be forwarded anymore.
        let max = self.retries.max_body_bytes as u64;
        matches!(request.body().size_hint().upper(), Some(len) if len <= max)
    }
}

/// Recreate a buffered request for another attempt.
fn rebuild_request(parts: &Parts, body: &Bytes) -> Request<Body> {
    let mut request = Request::new(Body::from(body.clone()));
    *request.method_mut() = parts.method.clone();
    *request.uri_mut() = parts.uri.clone();
    *request.version_mut() = parts.version;
    *request.headers_mut() = parts.headers.clone();

    if let Some(info) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
        request.extensions_mut().insert(info.clone());
    }
    request
}
