//! Clock abstraction so recovery/timeout logic is testable without sleeping.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

/// Source of the current time. Injected into every component per the
/// explicit-context design (no ambient `Utc::now()` calls in business logic).
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that can be frozen and advanced manually, for deterministic tests
/// of timeout/recovery/backoff logic.
#[derive(Clone)]
pub struct FrozenClock {
    at: Arc<RwLock<DateTime<Utc>>>,
}

impl FrozenClock {
    #[must_use]
    pub fn at(at: DateTime<Utc>) -> Self {
        Self { at: Arc::new(RwLock::new(at)) }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.at.write();
        *guard += delta;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.at.write() = at;
    }
}

impl Clock for FrozenClock {
    fn now(&self) -> DateTime<Utc> {
        *self.at.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frozen_clock_advances_deterministically() {
        let start = Utc::now();
        let clock = FrozenClock::at(start);
        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(clock.now(), start + chrono::Duration::minutes(5));
    }
}
