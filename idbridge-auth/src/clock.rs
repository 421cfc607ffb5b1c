//! Time source for expiration checks, in nanoseconds since the Unix epoch

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Nanoseconds in one hour
pub const NANOS_PER_HOUR: u64 = 3_600_000_000_000;

pub trait Clock: Send + Sync {
    fn now_nanos(&self) -> u64;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_nanos(&self) -> u64 {
        Utc::now()
            .timestamp_nanos_opt()
            .map_or(u64::MAX, |nanos| nanos.max(0) as u64)
    }
}

/// Manually driven clock
#[derive(Debug, Default)]
pub struct FixedClock {
    now: AtomicU64,
}

impl FixedClock {
    pub fn new(now: u64) -> Self {
        Self {
            now: AtomicU64::new(now),
        }
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, nanos: u64) {
        self.now.fetch_add(nanos, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_nanos(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
