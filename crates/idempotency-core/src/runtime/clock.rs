// crates/idempotency-core/src/runtime/clock.rs
// ============================================================================
// Module: Manual Clock
// Description: Deterministic, advanceable clock for tests and demos.
// Purpose: Exercise stale-claim windows without sleeping.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! [`ManualClock`] only moves when told to. Clones share the same instant so
//! a test can advance time underneath a running coordinator.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::core::Timestamp;
use crate::interfaces::Clock;

// ============================================================================
// SECTION: Manual Clock
// ============================================================================

/// Shared, manually advanced clock.
#[derive(Debug, Clone)]
pub struct ManualClock {
    /// Current unix milliseconds.
    millis: Arc<AtomicI64>,
}

impl ManualClock {
    /// Creates a clock fixed at `start`.
    #[must_use]
    pub fn new(start: Timestamp) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(start.as_unix_millis())),
        }
    }

    /// Moves the clock forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        let step = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        let _ = self.millis.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
            Some(current.saturating_add(step))
        });
    }

    /// Sets the clock to `instant`.
    pub fn set(&self, instant: Timestamp) {
        self.millis.store(instant.as_unix_millis(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_unix_millis(self.millis.load(Ordering::SeqCst))
    }
}
