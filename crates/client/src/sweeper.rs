// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic cache sweep task.
//!
//! Lazy read-time purging only reaches keys that are still being asked for;
//! the sweeper walks both tiers on a fixed timer so abandoned entries do
//! not accumulate.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use sq_core::CacheStore;

/// Spawns a task that sweeps expired entries every `every`.
///
/// Abort the returned handle to stop sweeping (e.g. on shutdown).
pub fn spawn_cache_sweeper(store: CacheStore, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let removed = store.sweep_expired();
            if removed > 0 {
                debug!(removed, "periodic cache sweep");
            }
        }
    })
}

#[cfg(test)]
#[path = "sweeper_tests.rs"]
mod tests;
