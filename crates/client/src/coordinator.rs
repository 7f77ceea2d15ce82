// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Glue between connectivity recovery and offline queue replay.
//!
//! The coordinator owns no domain state. It watches a boolean connectivity
//! signal; on each offline-to-online transition it waits a settle delay (so
//! the realtime connection can re-establish), broadcasts an auto-sync
//! signal, and drives [`OfflineMutationQueue::flush`] with the caller's
//! sync function. The queue's debounce makes racing triggers harmless.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::time::sleep;
use tracing::{debug, info};

use sq_core::{OfflineMutationQueue, ResilienceConfig, Result};

use crate::connection::ConnectionState;

/// Capacity of the auto-sync broadcast channel.
const SIGNAL_CAPACITY: usize = 16;

/// Wires the "network became available" signal to queue replay.
pub struct SyncCoordinator {
    queue: Arc<OfflineMutationQueue>,
    settle_delay: Duration,
    signal_tx: broadcast::Sender<()>,
}

impl SyncCoordinator {
    /// Creates a coordinator over the given queue.
    pub fn new(queue: Arc<OfflineMutationQueue>, config: &ResilienceConfig) -> Self {
        let (signal_tx, _) = broadcast::channel(SIGNAL_CAPACITY);
        SyncCoordinator {
            queue,
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            signal_tx,
        }
    }

    /// Subscribes to the auto-sync signal raised after each settle delay.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.signal_tx.subscribe()
    }

    /// Watches `online_rx` until its sender is dropped.
    ///
    /// Every offline-to-online transition schedules one replay: settle
    /// delay, auto-sync broadcast, then `flush(sync_fn)`. Going offline
    /// only updates the queue's connectivity hint.
    pub async fn run<F, Fut>(&self, mut online_rx: watch::Receiver<bool>, sync_fn: F)
    where
        F: Fn(String, String, Vec<String>) -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let mut was_online = *online_rx.borrow();
        self.queue.set_online(was_online);

        while online_rx.changed().await.is_ok() {
            let online = *online_rx.borrow_and_update();
            if online == was_online {
                continue;
            }
            was_online = online;
            self.queue.set_online(online);

            if !online {
                debug!("connectivity lost");
                continue;
            }

            sleep(self.settle_delay).await;

            // The connection may have dropped again while settling.
            if !*online_rx.borrow() {
                continue;
            }

            let _ = self.signal_tx.send(());
            let report = self.queue.flush(&sync_fn).await;
            if report.success > 0 || report.failed > 0 {
                info!(
                    success = report.success,
                    failed = report.failed,
                    skipped = report.skipped,
                    "auto-sync finished"
                );
            }
        }
    }
}

/// Maps connection state transitions onto a boolean connectivity signal.
///
/// Spawns a forwarding task; the returned receiver is `true` while the
/// connection manager reports `Connected`.
pub fn online_from_state(
    mut state_rx: watch::Receiver<ConnectionState>,
) -> watch::Receiver<bool> {
    let initial = matches!(*state_rx.borrow(), ConnectionState::Connected);
    let (tx, rx) = watch::channel(initial);

    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let online = matches!(*state_rx.borrow_and_update(), ConnectionState::Connected);
            if tx.send(online).is_err() {
                break;
            }
        }
    });

    rx
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
