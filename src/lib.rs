// src/lib.rs
//! dtaskq: a Redis-backed delay task queue for Rust
//!
//! Producers drop opaque payloads into per-tick buckets
//! (`dtaskq:{taskname}:<tick>`); sweepers share one cursor per task name
//! (`dtaskt:{taskname}`) and drain buckets in tick order once each tick has
//! matured. Every push and pull is a single Lua script run, so any number of
//! producers and sweepers can work against the same Redis without a broker.

pub mod clock;
pub mod context;
pub mod error;
pub mod keys;
pub mod lua;
pub mod queue;
pub mod sweeper;
pub mod tick;

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::TaskContext;
pub use error::{DelayTaskError, Result};
pub use queue::{DelayQueue, QueueOptions, Sweep};
pub use sweeper::{Sweeper, SweeperBuilder, SweeperConfig, SweeperStats, TaskHandler};
pub use tick::{
    DEFAULT_INTERVAL, INTERVAL_HOUR, INTERVAL_MILLISECONDS, INTERVAL_MINUTES, INTERVAL_SECONDS,
};

// Re-export commonly used types
pub use async_trait::async_trait;
