//! In-memory backend used by the selection and handling tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};

use crate::error::ProxyError;
use crate::load_balancer::backend::Backend;

/// Backend with controllable liveness, failure and latency.
#[derive(Debug)]
pub struct FakeBackend {
    address: String,
    alive: AtomicBool,
    failing: AtomicBool,
    latency: Duration,
    forwarded: AtomicUsize,
}

impl FakeBackend {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            alive: AtomicBool::new(true),
            failing: AtomicBool::new(false),
            latency: Duration::ZERO,
            forwarded: AtomicUsize::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    /// Make every forward fail as if the upstream refused the connection.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of requests that reached this backend, failed or not.
    pub fn forwarded(&self) -> usize {
        self.forwarded.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for FakeBackend {
    fn address(&self) -> &str {
        &self.address
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn forward(&self, _request: Request<Body>) -> Result<Response<Body>, ProxyError> {
        self.forwarded.fetch_add(1, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(ProxyError::unavailable(&self.address, "connection refused"));
        }

        Ok(Response::new(Body::from(self.address.clone())))
    }
}
