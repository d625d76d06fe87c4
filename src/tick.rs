// src/tick.rs
//! Tick arithmetic shared by the producer and consumer paths.
//!
//! A tick is the index of a fixed-width window of `interval` milliseconds.
//! Producers round their target time *up* so a task never lands in a window
//! that has already started; sweepers round `now - 1` *down* so they only
//! look at windows that have fully elapsed.

use crate::{DelayTaskError, Result};

pub const INTERVAL_MILLISECONDS: i64 = 1;
pub const INTERVAL_SECONDS: i64 = 1000;
pub const INTERVAL_MINUTES: i64 = 60 * 1000;
pub const INTERVAL_HOUR: i64 = 60 * 60 * 1000;

/// Interval used by `push_task` / `pull_task` when none is given.
pub const DEFAULT_INTERVAL: i64 = INTERVAL_SECONDS;

/// Reject zero and negative intervals before any arithmetic or round trip.
pub fn ensure_interval(interval: i64) -> Result<()> {
    if interval <= 0 {
        return Err(DelayTaskError::InvalidInterval(interval));
    }
    Ok(())
}

/// Bucket a producer timestamp: `ceil(timestamp / interval)`.
pub fn push_tick(timestamp: i64, interval: i64) -> Result<i64> {
    ensure_interval(interval)?;
    let quotient = timestamp.div_euclid(interval);
    if timestamp.rem_euclid(interval) == 0 {
        Ok(quotient)
    } else {
        Ok(quotient + 1)
    }
}

/// Most recent fully elapsed tick as of `now`: `floor((now - 1) / interval)`.
pub fn matured_tick(now: i64, interval: i64) -> Result<i64> {
    ensure_interval(interval)?;
    Ok(now.saturating_sub(1).div_euclid(interval))
}

/// First millisecond covered by `tick`.
pub fn tick_start(tick: i64, interval: i64) -> i64 {
    tick.saturating_mul(interval)
}
