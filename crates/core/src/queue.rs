// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Durable queue of quest completions awaiting replay.
//!
//! Completions that could not reach the server are appended here and flushed
//! in batches once connectivity returns. The queue is transport-agnostic:
//! the network call is injected into [`OfflineMutationQueue::flush`] by the
//! caller.
//!
//! The whole queue persists as a single JSON array under one fixed key in
//! the durable storage tier, rewritten on every mutation. Records carry
//! their own retry accounting; a record that fails the cap is parked as
//! `sync_failed` until explicitly retried.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::backend::StorageBackend;
use crate::clock::ClockSource;
use crate::completion::{OfflineCompletion, SyncStatus};
use crate::config::ResilienceConfig;
use crate::error::Result;

/// Durable key holding the serialized queue.
///
/// Lives outside the cache namespace so sweeps and clears never touch it.
pub const QUEUE_KEY: &str = "sidequest:queue:completions";

const MS_PER_DAY: u64 = 86_400_000;

/// Outcome of one [`OfflineMutationQueue::flush`] call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FlushReport {
    /// Records removed after a successful group sync.
    pub success: usize,
    /// Records that failed this round and were retry-counted.
    pub failed: usize,
    /// Records already parked as `sync_failed` and not attempted.
    pub skipped: usize,
    /// Quest IDs settled this round.
    pub synced_quests: Vec<String>,
    /// Quest IDs that failed this round.
    pub failed_quests: Vec<String>,
}

/// Aggregate counters returned by [`OfflineMutationQueue::stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStats {
    /// Records waiting for (or in) a flush.
    pub total_pending: usize,
    /// Records parked after exhausting the retry cap.
    pub sync_failed: usize,
    /// When the last successful sync finished (epoch milliseconds).
    pub last_sync_time: Option<u64>,
    /// Last connectivity hint given to the queue.
    pub is_online: bool,
}

#[derive(Debug, Default)]
struct FlushState {
    last_flush_ms: Option<u64>,
    last_sync_time: Option<u64>,
    is_online: bool,
}

/// Durable queue of pending quest completions.
pub struct OfflineMutationQueue {
    backend: Arc<dyn StorageBackend>,
    clock: Arc<dyn ClockSource>,
    max_retries: u32,
    debounce_ms: u64,
    state: Mutex<FlushState>,
}

impl OfflineMutationQueue {
    /// Creates a queue over the durable backend.
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        clock: Arc<dyn ClockSource>,
        config: &ResilienceConfig,
    ) -> Self {
        OfflineMutationQueue {
            backend,
            clock,
            max_retries: config.queue_max_retries,
            debounce_ms: config.queue_debounce_ms,
            state: Mutex::new(FlushState::default()),
        }
    }

    /// Queues a completion for later replay.
    ///
    /// Rejects (returns false) if a record already exists for the same
    /// `(quest_id, user_id, group_name)` triple; the UI may re-fire
    /// completion events after a reconnect and the queue must stay
    /// idempotent. The stored record always starts `pending_sync` with a
    /// zero retry count, whatever the caller passed.
    pub fn enqueue(&self, completion: OfflineCompletion) -> bool {
        let mut records = self.load();

        if records
            .iter()
            .any(|r| r.matches(&completion.quest_id, &completion.user_id, &completion.group_name))
        {
            debug!(
                quest_id = %completion.quest_id,
                user_id = %completion.user_id,
                group_name = %completion.group_name,
                "duplicate completion rejected"
            );
            return false;
        }

        records.push(OfflineCompletion {
            status: SyncStatus::PendingSync,
            retry_count: 0,
            last_sync_attempt: None,
            ..completion
        });
        self.save(&records)
    }

    /// Returns true if a completion for the triple is queued and not parked.
    pub fn is_pending(&self, quest_id: &str, user_id: &str, group_name: &str) -> bool {
        self.load().iter().any(|r| {
            r.matches(quest_id, user_id, group_name) && r.status != SyncStatus::SyncFailed
        })
    }

    /// Lists `pending_sync` records, optionally filtered by user and group.
    pub fn list_pending(
        &self,
        user_id: Option<&str>,
        group_name: Option<&str>,
    ) -> Vec<OfflineCompletion> {
        self.load()
            .into_iter()
            .filter(|r| r.status == SyncStatus::PendingSync)
            .filter(|r| user_id.is_none_or(|u| r.user_id == u))
            .filter(|r| group_name.is_none_or(|g| r.group_name == g))
            .collect()
    }

    /// Reports queue counters, optionally filtered by user and group.
    pub fn stats(&self, user_id: Option<&str>, group_name: Option<&str>) -> QueueStats {
        let records: Vec<OfflineCompletion> = self
            .load()
            .into_iter()
            .filter(|r| user_id.is_none_or(|u| r.user_id == u))
            .filter(|r| group_name.is_none_or(|g| r.group_name == g))
            .collect();

        let state = self.state();
        QueueStats {
            total_pending: records.iter().filter(|r| r.status != SyncStatus::SyncFailed).count(),
            sync_failed: records.iter().filter(|r| r.status == SyncStatus::SyncFailed).count(),
            last_sync_time: state.last_sync_time,
            is_online: state.is_online,
        }
    }

    /// Records the current connectivity hint (surfaced through `stats`).
    pub fn set_online(&self, online: bool) {
        self.state().is_online = online;
    }

    /// Replays pending records through `sync_fn`, one call per
    /// `(user_id, group_name)` group.
    ///
    /// Calls arriving within the debounce window of the previous call are
    /// no-ops returning an all-zero report; independent triggers (manual
    /// retry, reconnect, periodic check) race to call this and must not
    /// double-sync a group.
    ///
    /// `sync_fn` receives the user, the group, and the batch's quest
    /// titles. `Ok(true)` settles the group and removes its records; an
    /// `Ok(false)` or `Err` outcome retry-counts every record in the group,
    /// parking records that reach the cap as `sync_failed`.
    pub async fn flush<F, Fut>(&self, sync_fn: F) -> FlushReport
    where
        F: Fn(String, String, Vec<String>) -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let now = self.clock.now_ms();
        {
            let mut state = self.state();
            if let Some(last) = state.last_flush_ms {
                if now.saturating_sub(last) < self.debounce_ms {
                    debug!("flush debounced");
                    return FlushReport::default();
                }
            }
            state.last_flush_ms = Some(now);
        }

        let mut records = self.load();
        let mut report = FlushReport {
            skipped: records.iter().filter(|r| r.status == SyncStatus::SyncFailed).count(),
            ..FlushReport::default()
        };

        // One sync call settles a whole group; the server API is group-scoped.
        let mut groups: BTreeMap<(String, String), Vec<String>> = BTreeMap::new();
        for record in records.iter().filter(|r| r.status == SyncStatus::PendingSync) {
            groups.entry(record.group_key()).or_default().push(record.quest_id.clone());
        }

        for ((user_id, group_name), quest_ids) in groups {
            let mut titles = Vec::new();
            for record in records
                .iter_mut()
                .filter(|r| r.user_id == user_id && r.group_name == group_name)
                .filter(|r| quest_ids.contains(&r.quest_id))
            {
                record.status = SyncStatus::Syncing;
                record.last_sync_attempt = Some(now);
                titles.push(record.quest_title.clone());
            }
            self.save(&records);

            let synced = match sync_fn(user_id.clone(), group_name.clone(), titles).await {
                Ok(synced) => synced,
                Err(e) => {
                    warn!(user_id = %user_id, group_name = %group_name, error = %e, "sync call failed");
                    false
                }
            };

            if synced {
                records.retain(|r| {
                    !(r.user_id == user_id
                        && r.group_name == group_name
                        && quest_ids.contains(&r.quest_id))
                });
                report.success += quest_ids.len();
                report.synced_quests.extend(quest_ids);
            } else {
                for record in records
                    .iter_mut()
                    .filter(|r| r.user_id == user_id && r.group_name == group_name)
                    .filter(|r| quest_ids.contains(&r.quest_id))
                {
                    record.retry_count += 1;
                    record.status = if record.retry_count >= self.max_retries {
                        SyncStatus::SyncFailed
                    } else {
                        SyncStatus::PendingSync
                    };
                }
                report.failed += quest_ids.len();
                report.failed_quests.extend(quest_ids);
            }
            self.save(&records);
        }

        if report.success > 0 {
            self.state().last_sync_time = Some(self.clock.now_ms());
        }

        report
    }

    /// Resets every `sync_failed` record to `pending_sync` with a clean
    /// retry count. Returns the number of records reset.
    pub fn retry_failed(&self) -> usize {
        let mut records = self.load();
        let mut reset = 0;

        for record in records.iter_mut().filter(|r| r.status == SyncStatus::SyncFailed) {
            record.status = SyncStatus::PendingSync;
            record.retry_count = 0;
            reset += 1;
        }

        if reset > 0 {
            self.save(&records);
        }
        reset
    }

    /// Purges records completed before the cutoff, regardless of status.
    /// Returns the number of records removed.
    pub fn cleanup_older_than(&self, days: u32) -> usize {
        let cutoff = self.clock.now_ms().saturating_sub(u64::from(days) * MS_PER_DAY);
        let mut records = self.load();
        let before = records.len();

        records.retain(|r| r.completed_at >= cutoff);

        let removed = before - records.len();
        if removed > 0 {
            self.save(&records);
        }
        removed
    }

    /// Number of records in the queue, in any status.
    pub fn len(&self) -> usize {
        self.load().len()
    }

    /// Returns true if the queue holds no records.
    pub fn is_empty(&self) -> bool {
        self.load().is_empty()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FlushState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Loads the stored record list. A missing or corrupt value loads as
    /// empty; the queue never refuses to operate.
    fn load(&self) -> Vec<OfflineCompletion> {
        let raw = match self.backend.get(QUEUE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(error = %e, "offline queue read failed; treating as empty");
                return Vec::new();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "corrupted offline queue; starting empty");
                Vec::new()
            }
        }
    }

    fn save(&self, records: &[OfflineCompletion]) -> bool {
        let serialized = match serde_json::to_string(records) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "offline queue serialization failed");
                return false;
            }
        };
        match self.backend.put(QUEUE_KEY, &serialized) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "offline queue write failed");
                false
            }
        }
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
