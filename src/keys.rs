// src/keys.rs
//! Redis key layout. These names are shared with existing deployments and
//! must not change without a version bump.
//!
//! The `{taskname}` hash tag keeps every bucket and the cursor of one task
//! name in the same cluster slot, which the pull script relies on. An empty
//! tag (`{}`) is ignored by cluster hashing, so empty task names are rejected.

use crate::{DelayTaskError, Result};

pub const BUCKET_NAMESPACE: &str = "dtaskq";
pub const CURSOR_NAMESPACE: &str = "dtaskt";

pub fn ensure_taskname(taskname: &str) -> Result<()> {
    if taskname.is_empty() {
        return Err(DelayTaskError::InvalidTaskName);
    }
    Ok(())
}

/// `dtaskq:{taskname}:` — a bucket key minus its tick.
pub fn bucket_key_prefix(taskname: &str) -> String {
    format!("{}:{{{}}}:", BUCKET_NAMESPACE, taskname)
}

/// `dtaskq:{taskname}:<tick>` — list of payloads for one tick.
pub fn bucket_key(taskname: &str, tick: i64) -> String {
    format!("{}{}", bucket_key_prefix(taskname), tick)
}

/// `dtaskt:{taskname}` — the shared sweeper cursor.
pub fn cursor_key(taskname: &str) -> String {
    format!("{}:{{{}}}", CURSOR_NAMESPACE, taskname)
}
