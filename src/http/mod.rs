//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, catch-all handler, request ID, tracing)
//!     → Balancer::handle (pick a backend, forward)
//!     → request.rs (rewrite URI and headers for the upstream)
//!     → response.rs (strip hop-by-hop headers, stream body back)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{UuidRequestId, X_REQUEST_ID};
pub use server::HttpServer;
