//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with a single catch-all handler
//! - Wire up middleware (request ID, tracing)
//! - Build the backend pool and health monitor from configuration
//! - Serve on an injected listener until shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::health::HealthMonitor;
use crate::http::request::{request_id, UuidRequestId, X_REQUEST_ID};
use crate::load_balancer::backend::{build_client, Backend, HttpBackend};
use crate::load_balancer::{Balancer, ServedBy};
use crate::observability::metrics;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub balancer: Arc<Balancer>,
}

/// HTTP server for the proxy.
pub struct HttpServer {
    router: Router,
    balancer: Arc<Balancer>,
    monitor: Option<HealthMonitor>,
}

impl HttpServer {
    /// Build the backend pool described by `config`.
    pub fn new(config: ProxyConfig) -> Result<Self, ProxyError> {
        let client = build_client(&config.timeouts);

        let http_backends = config
            .backends
            .iter()
            .map(|b| {
                HttpBackend::from_config(b, client.clone(), &config.timeouts, &config.health_check)
                    .map(Arc::new)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let pool: Vec<Arc<dyn Backend>> = http_backends
            .iter()
            .map(|b| b.clone() as Arc<dyn Backend>)
            .collect();

        let balancer = Balancer::new(pool)?
            .with_policy(config.balancer.policy)
            .with_retries(config.retries.clone());

        let monitor = config
            .health_check
            .active
            .then(|| HealthMonitor::new(http_backends, config.health_check.clone(), client));

        Ok(Self::with_monitor(Arc::new(balancer), monitor))
    }

    /// Serve an already built balancer, e.g. one with custom backends.
    pub fn from_balancer(balancer: Arc<Balancer>) -> Self {
        Self::with_monitor(balancer, None)
    }

    fn with_monitor(balancer: Arc<Balancer>, monitor: Option<HealthMonitor>) -> Self {
        let router = Self::build_router(AppState {
            balancer: balancer.clone(),
        });
        Self {
            router,
            balancer,
            monitor,
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::new(X_REQUEST_ID, UuidRequestId))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::new(X_REQUEST_ID)),
            )
    }

    pub fn balancer(&self) -> &Arc<Balancer> {
        &self.balancer
    }

    /// Run the server on `listener` until `shutdown` fires, then drain.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            backends = self.balancer.backends().len(),
            policy = ?self.balancer.policy(),
            "HTTP server starting"
        );

        if let Some(monitor) = self.monitor {
            let monitor_shutdown = shutdown.resubscribe();
            tokio::spawn(monitor.run(monitor_shutdown));
        }

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Catch-all proxy handler: every method and path goes to the balancer.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let request_id = request_id(&request).to_string();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    match state.balancer.handle(request).await {
        Ok(response) => {
            let backend = response
                .extensions()
                .get::<ServedBy>()
                .map(|s| s.0.as_str())
                .unwrap_or("unknown");
            metrics::record_request(method.as_str(), response.status().as_u16(), backend, start_time);
            response
        }
        Err(e) => {
            tracing::error!(
                request_id = %request_id,
                method = %method,
                path = %path,
                error = %e,
                "Proxy request failed"
            );
            metrics::record_request(method.as_str(), e.status_code().as_u16(), "none", start_time);
            e.into_response()
        }
    }
}
