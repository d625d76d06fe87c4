// src/clock.rs
use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of "now" in Unix milliseconds
pub trait Clock: Send + Sync + 'static {
    fn now_millis(&self) -> i64;
}

/// Wall clock backed by `chrono::Utc`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to. Useful for driving tick maturity
/// deterministically.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(now_millis),
        }
    }

    pub fn set(&self, now_millis: i64) {
        self.now.store(now_millis, Ordering::SeqCst);
    }

    /// Move forward by `millis` and return the new time, saturating at the
    /// bounds of `i64`
    pub fn advance(&self, millis: i64) -> i64 {
        let step = |now: i64| now.saturating_add(millis);
        match self
            .now
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |now| Some(step(now)))
        {
            Ok(prev) | Err(prev) => step(prev),
        }
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
