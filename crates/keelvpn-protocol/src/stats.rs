//! Session Statistics
//!
//! Counter sink injected into the stack engine. Hosts plug in their own
//! aggregation; [`SessionCounters`] is the shipped default.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Countable error events raised by the stack engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatEvent {
    /// Fatal SSL engine failure
    SslError,
    /// Fatal encapsulation failure
    EncapsulationError,
}

/// Sink for stack engine statistics
pub trait StatsSink {
    /// Record one occurrence of an event
    fn record(&self, event: StatEvent);
}

/// Atomic per-session counters
#[derive(Debug, Default)]
pub struct SessionCounters {
    ssl_errors: AtomicU64,
    encapsulation_errors: AtomicU64,
}

impl SessionCounters {
    /// Create a zeroed, shareable counter set
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of fatal SSL errors recorded
    pub fn ssl_errors(&self) -> u64 {
        self.ssl_errors.load(Ordering::Relaxed)
    }

    /// Number of fatal encapsulation errors recorded
    pub fn encapsulation_errors(&self) -> u64 {
        self.encapsulation_errors.load(Ordering::Relaxed)
    }
}

impl StatsSink for SessionCounters {
    fn record(&self, event: StatEvent) {
        match event {
            StatEvent::SslError => self.ssl_errors.fetch_add(1, Ordering::Relaxed),
            StatEvent::EncapsulationError => {
                self.encapsulation_errors.fetch_add(1, Ordering::Relaxed)
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_record() {
        let counters = SessionCounters::new();
        counters.record(StatEvent::SslError);
        counters.record(StatEvent::SslError);
        counters.record(StatEvent::EncapsulationError);

        assert_eq!(counters.ssl_errors(), 2);
        assert_eq!(counters.encapsulation_errors(), 1);
    }
}
