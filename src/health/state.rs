//! Backend health state machine.
//!
//! # States
//! - Unknown: never checked, still receives traffic
//! - Healthy: backend receives traffic
//! - Unhealthy: backend reports not-alive
//!
//! # State Transitions
//! ```text
//! Unknown/Healthy → Unhealthy: consecutive failures >= unhealthy_threshold
//! Unknown/Unhealthy → Healthy: consecutive successes >= healthy_threshold
//! ```
//!
//! The tracker also remembers when the last failure was reported, so a down
//! backend can be offered traffic again once it has been quiet long enough.

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Health State enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Healthy,
            2 => HealthState::Unhealthy,
            _ => HealthState::Unknown,
        }
    }
}

/// Lock-free health tracker for one backend.
#[derive(Debug)]
pub struct HealthTracker {
    state: AtomicU8,
    consecutive_failures: AtomicUsize,
    consecutive_successes: AtomicUsize,
    unhealthy_threshold: usize,
    healthy_threshold: usize,
    epoch: Instant,
    /// Milliseconds since `epoch` at the last reported failure.
    last_failure_ms: AtomicU64,
}

impl HealthTracker {
    pub fn new(unhealthy_threshold: u32, healthy_threshold: u32) -> Self {
        Self {
            state: AtomicU8::new(HealthState::Unknown as u8),
            consecutive_failures: AtomicUsize::new(0),
            consecutive_successes: AtomicUsize::new(0),
            unhealthy_threshold: unhealthy_threshold.max(1) as usize,
            healthy_threshold: healthy_threshold.max(1) as usize,
            epoch: Instant::now(),
            last_failure_ms: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Relaxed))
    }

    /// True unless the backend has been marked Unhealthy.
    pub fn is_healthy(&self) -> bool {
        self.state() != HealthState::Unhealthy
    }

    /// Time since the last failure while Unhealthy, `None` otherwise.
    pub fn unhealthy_for(&self) -> Option<Duration> {
        if self.state() != HealthState::Unhealthy {
            return None;
        }
        let last_failure = Duration::from_millis(self.last_failure_ms.load(Ordering::Relaxed));
        Some(self.epoch.elapsed().saturating_sub(last_failure))
    }

    /// Report a successful request/check.
    ///
    /// Returns the new state when this call caused a transition.
    pub fn mark_success(&self) -> Option<HealthState> {
        self.consecutive_failures.store(0, Ordering::Relaxed);

        if self.state() == HealthState::Healthy {
            return None;
        }

        let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
        if successes >= self.healthy_threshold {
            self.consecutive_successes.store(0, Ordering::Relaxed);
            self.state.store(HealthState::Healthy as u8, Ordering::Relaxed);
            return Some(HealthState::Healthy);
        }
        None
    }

    /// Report a failed request/check.
    ///
    /// Returns the new state when this call caused a transition.
    pub fn mark_failure(&self) -> Option<HealthState> {
        self.consecutive_successes.store(0, Ordering::Relaxed);
        let now_ms = self.epoch.elapsed().as_millis() as u64;
        self.last_failure_ms.store(now_ms, Ordering::Relaxed);

        if self.state() == HealthState::Unhealthy {
            return None;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.unhealthy_threshold {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            self.state.store(HealthState::Unhealthy as u8, Ordering::Relaxed);
            return Some(HealthState::Unhealthy);
        }
        None
    }
}
