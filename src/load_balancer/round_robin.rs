//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::SelectionPolicy;
use crate::error::ProxyError;
use crate::load_balancer::backend::Backend;

/// Round-robin selector.
/// Stores the rotation cursor shared by all concurrent selectors.
///
/// Every selection moves the cursor with a single atomic update, so each one
/// owns a distinct cursor value and no update is lost under contention.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the rotation at an arbitrary cursor value.
    pub fn starting_at(cursor: usize) -> Self {
        Self {
            cursor: AtomicUsize::new(cursor),
        }
    }

    /// Current cursor value (total advancements, wrapping).
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    fn advance(&self) -> usize {
        self.cursor.fetch_add(1, Ordering::AcqRel)
    }

    /// Pick the index of the next backend under `policy`.
    pub fn next_index(
        &self,
        policy: SelectionPolicy,
        backends: &[Arc<dyn Backend>],
    ) -> Result<usize, ProxyError> {
        if backends.is_empty() {
            return Err(ProxyError::Configuration(
                "cannot select from an empty backend pool".to_string(),
            ));
        }

        match policy {
            SelectionPolicy::SingleSkip => Ok(self.single_skip(backends)),
            SelectionPolicy::Scan => self.scan(backends).ok_or(ProxyError::NoLiveBackends),
        }
    }

    /// Take the candidate at the cursor; if it is dead, take the one after it
    /// whatever its state. The cursor moves past everything inspected.
    ///
    /// Read, liveness check and advance commit as one compare-and-swap, so a
    /// concurrent selector can never move the skip target. Two consecutive
    /// dead backends still yield a dead pick.
    fn single_skip(&self, backends: &[Arc<dyn Backend>]) -> usize {
        let len = backends.len();
        let mut picked = 0;
        // The closure always yields a new value, so the update cannot fail.
        let _ = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                let candidate = current % len;
                if backends[candidate].is_alive() {
                    picked = candidate;
                    Some(current.wrapping_add(1))
                } else {
                    picked = current.wrapping_add(1) % len;
                    Some(current.wrapping_add(2))
                }
            });
        picked
    }

    /// Advance once, then return the first live backend at or after the
    /// candidate, wrapping around the pool at most once.
    fn scan(&self, backends: &[Arc<dyn Backend>]) -> Option<usize> {
        let len = backends.len();
        let start = self.advance();

        (0..len)
            .map(|i| start.wrapping_add(i) % len)
            .find(|&index| backends[index].is_alive())
    }
}
