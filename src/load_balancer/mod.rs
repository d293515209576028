//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → pool.rs (Balancer::handle)
//!     → round_robin.rs (advance cursor, consult liveness)
//!     → backend.rs (Backend::forward relays to the upstream)
//!     → on BackendUnavailable: next backend in rotation, at most N - 1 times
//!     → streamed response or ProxyError
//! ```
//!
//! # Design Decisions
//! - Backend is a trait; `HttpBackend` is the network-backed implementation
//! - Cursor is a single atomic counter; no lock is held across a forward
//! - Pool contents are fixed after construction

pub mod backend;
pub mod pool;
pub mod round_robin;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{Backend, HttpBackend};
pub use pool::{Balancer, ServedBy};
pub use round_robin::RoundRobin;
