//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe each backend
//!     → Update state.rs
//!
//! Passive health checks (HttpBackend::forward):
//!     Request outcome observed
//!     → Update state.rs
//!
//! State machine (state.rs):
//!     Healthy ←→ Unhealthy
//!     With thresholds to prevent flapping
//! ```
//!
//! # Design Decisions
//! - Both kinds of checks are off by default; backends then always report alive
//! - State transitions require consecutive successes/failures
//! - Health state is per-backend and only read through `Backend::is_alive`

pub mod active;
pub mod state;

pub use active::HealthMonitor;
pub use state::{HealthState, HealthTracker};
