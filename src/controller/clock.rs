//! Injected time source
//!
//! Disrupted-pod aging and eviction admission both compare stored
//! timestamps against "now". Reconcilers and the webhook take the clock
//! through their shared context so tests can pin it.

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub use fixed::FixedClock;
