//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe backends
//! - Update backend health state based on results

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, Uri};
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::config::HealthCheckConfig;
use crate::http::request::upstream_uri;
use crate::load_balancer::backend::{HttpBackend, UpstreamClient};

pub struct HealthMonitor {
    backends: Vec<Arc<HttpBackend>>,
    config: HealthCheckConfig,
    client: UpstreamClient,
}

impl HealthMonitor {
    pub fn new(
        backends: Vec<Arc<HttpBackend>>,
        config: HealthCheckConfig,
        client: UpstreamClient,
    ) -> Self {
        Self {
            backends,
            config,
            client,
        }
    }

    /// Probe on every tick until `shutdown` fires.
    ///
    /// Only built when `health_check.active` is set.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let period = Duration::from_secs(self.config.interval_secs);
        tracing::info!(
            interval = ?period,
            path = %self.config.path,
            backends = self.backends.len(),
            "Active health checks enabled"
        );

        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => self.check_all().await,
            }
        }
        tracing::debug!("Health monitor stopped");
    }

    /// Probe every backend once.
    pub async fn check_all(&self) {
        for backend in &self.backends {
            let healthy = self.probe(backend).await;
            backend.record_health(healthy);
        }
    }

    async fn probe(&self, backend: &HttpBackend) -> bool {
        let path = match self.config.path.parse::<Uri>() {
            Ok(path) => path,
            Err(e) => {
                tracing::error!(path = %self.config.path, error = %e, "Invalid health check path");
                return false;
            }
        };
        let uri = match upstream_uri(backend.base_url(), &path) {
            Ok(uri) => uri,
            Err(e) => {
                tracing::error!(backend = backend.display_name(), error = %e, "Failed to build health check URI");
                return false;
            }
        };

        let request = match Request::get(uri)
            .header(header::USER_AGENT, "round-robin-proxy-health-check")
            .body(Body::empty())
        {
            Ok(request) => request,
            Err(e) => {
                tracing::error!("Failed to build health check request: {}", e);
                return false;
            }
        };

        let timeout = Duration::from_secs(self.config.timeout_secs);
        match time::timeout(timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let success = response.status().is_success();
                if !success {
                    tracing::warn!(
                        backend = backend.display_name(),
                        status = %response.status(),
                        "Health check failed: non-success status"
                    );
                }
                success
            }
            Ok(Err(e)) => {
                tracing::warn!(backend = backend.display_name(), error = %e, "Health check failed: connection error");
                false
            }
            Err(_) => {
                tracing::warn!(backend = backend.display_name(), "Health check failed: timeout");
                false
            }
        }
    }
}
