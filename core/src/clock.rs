use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

use dnsgate_types::EpochMillis;

/// Wall-clock source. Deadlines are persisted as wall-clock epoch millis, so
/// they stay meaningful across restarts.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> EpochMillis;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> EpochMillis {
        Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    #[must_use]
    pub const fn new(now: EpochMillis) -> Self {
        Self(AtomicI64::new(now))
    }

    pub fn set(&self, now: EpochMillis) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.0.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> EpochMillis {
        self.0.load(Ordering::SeqCst)
    }
}
