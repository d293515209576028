//! Backend abstraction.
//!
//! # Responsibilities
//! - Define the capability set every upstream exposes: address, liveness, forward
//! - Provide the network-backed implementation (`HttpBackend`)
//! - Track health state when passive or active checks are enabled

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::time;
use url::Url;

use crate::config::{BackendConfig, HealthCheckConfig, TimeoutConfig};
use crate::error::ProxyError;
use crate::health::state::{HealthState, HealthTracker};
use crate::http::request::prepare_upstream_request;
use crate::http::response::relay_response;
use crate::observability::metrics;

/// HTTP client shared by every backend in the pool.
pub type UpstreamClient = Client<HttpConnector, Body>;

/// Build the upstream client with the configured connect timeout.
pub fn build_client(timeouts: &TimeoutConfig) -> UpstreamClient {
    let mut connector = HttpConnector::new();
    connector.set_connect_timeout(Some(Duration::from_secs(timeouts.connect_secs)));
    Client::builder(TokioExecutor::new()).build(connector)
}

/// Parse and check an upstream base URL.
pub fn parse_upstream_url(address: &str) -> Result<Url, String> {
    if address.trim().is_empty() {
        return Err("backend address is empty".to_string());
    }

    let url = Url::parse(address)
        .map_err(|e| format!("'{}' is not a valid URL: {}", address, e))?;

    if url.scheme() != "http" {
        return Err(format!(
            "'{}' uses unsupported scheme '{}' (only http upstreams are proxied)",
            address,
            url.scheme()
        ));
    }
    if url.host_str().is_none() {
        return Err(format!("'{}' has no host", address));
    }

    Ok(url)
}

/// One upstream server.
///
/// The balancer only relies on this contract, so test doubles and
/// alternative transports plug in without touching selection.
#[async_trait]
pub trait Backend: Send + Sync + fmt::Debug {
    /// The immutable upstream address.
    fn address(&self) -> &str;

    /// Whether the backend is currently believed able to serve requests.
    fn is_alive(&self) -> bool;

    /// Relay one request to the upstream.
    ///
    /// The returned response body streams from the upstream as it arrives.
    /// Transport failures are reported as [`ProxyError::BackendUnavailable`].
    async fn forward(&self, request: Request<Body>) -> Result<Response<Body>, ProxyError>;
}

/// A backend reached over HTTP through the shared upstream client.
pub struct HttpBackend {
    address: String,
    name: Option<String>,
    base_url: Url,
    client: UpstreamClient,
    request_timeout: Duration,
    health: HealthTracker,
    passive_health: bool,
    /// Passive-only checking has no probe to bring a backend back, so a down
    /// backend is offered traffic again after this long without failures.
    readmit_after: Option<Duration>,
}

impl HttpBackend {
    /// Create a backend with default timeouts and no health checking.
    pub fn new(address: &str) -> Result<Self, ProxyError> {
        let timeouts = TimeoutConfig::default();
        Self::from_config(
            &BackendConfig::new(address),
            build_client(&timeouts),
            &timeouts,
            &HealthCheckConfig::default(),
        )
    }

    /// Create a backend from its configuration entry.
    pub fn from_config(
        config: &BackendConfig,
        client: UpstreamClient,
        timeouts: &TimeoutConfig,
        health: &HealthCheckConfig,
    ) -> Result<Self, ProxyError> {
        let base_url = parse_upstream_url(&config.address).map_err(ProxyError::Configuration)?;

        Ok(Self {
            address: config.address.clone(),
            name: config.name.clone(),
            base_url,
            client,
            request_timeout: Duration::from_secs(timeouts.request_secs),
            health: HealthTracker::new(health.unhealthy_threshold, health.healthy_threshold),
            passive_health: health.passive,
            readmit_after: (health.passive && !health.active)
                .then(|| Duration::from_secs(health.interval_secs)),
        })
    }

    /// Get a display name for the backend (name or address).
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn health_state(&self) -> HealthState {
        self.health.state()
    }

    /// Feed one health observation into the state machine.
    pub fn record_health(&self, healthy: bool) {
        let transition = if healthy {
            self.health.mark_success()
        } else {
            self.health.mark_failure()
        };

        match transition {
            Some(HealthState::Unhealthy) => {
                tracing::warn!(backend = self.display_name(), "Backend marked as down");
            }
            Some(HealthState::Healthy) => {
                tracing::info!(backend = self.display_name(), "Backend marked as up");
            }
            _ => {}
        }

        metrics::record_backend_health(&self.address, self.health.is_healthy());
    }

    fn record_outcome(&self, healthy: bool) {
        if self.passive_health {
            self.record_health(healthy);
        }
    }
}

impl fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpBackend")
            .field("address", &self.address)
            .field("name", &self.name)
            .field("state", &self.health.state())
            .finish()
    }
}

/// Render an error with its sources, e.g. `client error (Connect): connection refused`.
fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Upstream statuses that indicate the backend itself is failing.
fn is_gateway_failure(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

#[async_trait]
impl Backend for HttpBackend {
    fn address(&self) -> &str {
        &self.address
    }

    fn is_alive(&self) -> bool {
        match self.health.unhealthy_for() {
            None => true,
            Some(quiet) => self.readmit_after.is_some_and(|after| quiet >= after),
        }
    }

    async fn forward(&self, request: Request<Body>) -> Result<Response<Body>, ProxyError> {
        let request = prepare_upstream_request(request, &self.base_url)
            .map_err(|reason| ProxyError::unavailable(&self.address, reason))?;

        tracing::trace!(
            backend = self.display_name(),
            uri = %request.uri(),
            "Sending request upstream"
        );

        match time::timeout(self.request_timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                self.record_outcome(!is_gateway_failure(response.status()));
                Ok(relay_response(response))
            }
            Ok(Err(e)) => {
                self.record_outcome(false);
                Err(ProxyError::unavailable(&self.address, error_chain(&e)))
            }
            Err(_) => {
                self.record_outcome(false);
                Err(ProxyError::unavailable(
                    &self.address,
                    format!("no response within {:?}", self.request_timeout),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_upstream_url() {
        let url = parse_upstream_url("http://127.0.0.1:9001").unwrap();
        assert_eq!(url.port(), Some(9001));

        assert!(parse_upstream_url("").is_err());
        assert!(parse_upstream_url("   ").is_err());
        assert!(parse_upstream_url("not a url").is_err());
        assert!(parse_upstream_url("https://gmail.com").is_err());
        assert!(parse_upstream_url("http://").is_err());
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_address() {
        let err = HttpBackend::new("::invalid::").unwrap_err();
        assert!(matches!(err, ProxyError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_always_alive_without_health_checks() {
        let backend = HttpBackend::new("http://127.0.0.1:9001").unwrap();
        assert_eq!(backend.address(), "http://127.0.0.1:9001");
        assert!(backend.is_alive());

        // observations are ignored unless passive checks are on
        backend.record_outcome(false);
        backend.record_outcome(false);
        backend.record_outcome(false);
        assert!(backend.is_alive());
    }

    #[tokio::test]
    async fn test_passive_health_marks_backend_down() {
        let timeouts = TimeoutConfig::default();
        let health = HealthCheckConfig {
            passive: true,
            unhealthy_threshold: 2,
            ..HealthCheckConfig::default()
        };
        let backend = HttpBackend::from_config(
            &BackendConfig::new("http://127.0.0.1:9001"),
            build_client(&timeouts),
            &timeouts,
            &health,
        )
        .unwrap();

        backend.record_outcome(false);
        assert!(backend.is_alive());
        backend.record_outcome(false);
        assert!(!backend.is_alive());
        assert_eq!(backend.health_state(), HealthState::Unhealthy);
    }

    #[tokio::test]
    async fn test_passive_only_readmits_after_quiet_period() {
        let timeouts = TimeoutConfig::default();
        let health = HealthCheckConfig {
            passive: true,
            unhealthy_threshold: 1,
            healthy_threshold: 2,
            ..HealthCheckConfig::default()
        };
        let mut backend = HttpBackend::from_config(
            &BackendConfig::new("http://127.0.0.1:9001"),
            build_client(&timeouts),
            &timeouts,
            &health,
        )
        .unwrap();
        assert_eq!(backend.readmit_after, Some(Duration::from_secs(10)));
        backend.readmit_after = Some(Duration::from_millis(50));

        backend.record_outcome(false);
        assert!(!backend.is_alive());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(backend.is_alive());

        // a failure while readmitted closes the window again
        backend.record_outcome(false);
        assert!(!backend.is_alive());

        tokio::time::sleep(Duration::from_millis(60)).await;
        backend.record_outcome(true);
        backend.record_outcome(true);
        assert_eq!(backend.health_state(), HealthState::Healthy);
        assert!(backend.is_alive());
    }

    #[tokio::test]
    async fn test_active_checks_own_recovery() {
        let timeouts = TimeoutConfig::default();
        let health = HealthCheckConfig {
            passive: true,
            active: true,
            unhealthy_threshold: 1,
            ..HealthCheckConfig::default()
        };
        let backend = HttpBackend::from_config(
            &BackendConfig::new("http://127.0.0.1:9001"),
            build_client(&timeouts),
            &timeouts,
            &health,
        )
        .unwrap();
        assert_eq!(backend.readmit_after, None);

        backend.record_outcome(false);
        assert!(!backend.is_alive());
    }

    #[tokio::test]
    async fn test_forward_to_closed_port_is_unavailable() {
        // Bind then drop to obtain a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let backend = HttpBackend::new(&format!("http://{}", addr)).unwrap();
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();

        let err = backend.forward(request).await.unwrap_err();
        match err {
            ProxyError::BackendUnavailable { address, .. } => {
                assert_eq!(address, format!("http://{}", addr));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_gateway_failure_statuses() {
        assert!(is_gateway_failure(StatusCode::BAD_GATEWAY));
        assert!(!is_gateway_failure(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!is_gateway_failure(StatusCode::NOT_FOUND));
    }
}
