//! Error taxonomy for the proxy.
//!
//! Construction-time errors (`Configuration`, `Listen`) are fatal and abort
//! startup. Per-request errors (`BackendUnavailable`, `NoLiveBackends`,
//! `InvalidRequest`) are confined to the request that produced them and
//! rendered as an HTTP response for that client only.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors produced by the balancer, its backends and the listener.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Invalid backend address or empty backend pool.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The selected backend failed to relay the request.
    #[error("backend {address} unavailable: {reason}")]
    BackendUnavailable { address: String, reason: String },

    /// The inbound request could not be read.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Every backend in the pool reports not-alive.
    #[error("no live backends in pool")]
    NoLiveBackends,

    /// The listener could not bind its address.
    #[error("failed to bind {address}: {source}")]
    Listen {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

impl ProxyError {
    pub(crate) fn unavailable(address: &str, reason: impl ToString) -> Self {
        ProxyError::BackendUnavailable {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }

    /// HTTP status reported to the client for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::BackendUnavailable { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::NoLiveBackends => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Configuration(_) | ProxyError::Listen { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            ProxyError::BackendUnavailable { .. } => "Upstream request failed",
            ProxyError::NoLiveBackends => "No live backends",
            ProxyError::InvalidRequest(_) => "Bad request",
            _ => "Proxy misconfigured",
        };
        (status, [(header::CONTENT_TYPE, "text/plain")], body).into_response()
    }
}
