//! Round-robin reverse proxy library.
//!
//! Inbound requests are forwarded to a fixed, ordered pool of backends chosen
//! in rotation; the backend response is streamed back to the client.

pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;

pub use config::schema::ProxyConfig;
pub use error::ProxyError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use load_balancer::{Backend, Balancer, HttpBackend};
