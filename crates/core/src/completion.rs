// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Offline quest completion records.
//!
//! When a quest completion cannot reach the server, the intent is captured as
//! an [`OfflineCompletion`] and queued for later replay. Records are keyed by
//! the `(quest_id, user_id, group_name)` triple; the queue guarantees at most
//! one record per triple.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Sync state of a queued completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Waiting for the next flush. Initial state for new records.
    PendingSync,
    /// A flush attempt is in progress for this record's group.
    Syncing,
    /// Retry cap exhausted; requires an explicit retry to resume.
    SyncFailed,
}

impl SyncStatus {
    /// Returns the string representation used in storage and display.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::PendingSync => "pending_sync",
            SyncStatus::Syncing => "syncing",
            SyncStatus::SyncFailed => "sync_failed",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_lowercase().as_str() {
            "pending_sync" => Ok(SyncStatus::PendingSync),
            "syncing" => Ok(SyncStatus::Syncing),
            "sync_failed" => Ok(SyncStatus::SyncFailed),
            _ => Err(Error::InvalidStatus(s.to_string())),
        }
    }
}

/// A quest completion awaiting replay to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineCompletion {
    /// The completed quest.
    pub quest_id: String,
    /// Quest title, carried so the sync call does not need a lookup.
    pub quest_title: String,
    /// Group the quest belongs to. The server sync API is group-scoped.
    pub group_name: String,
    /// User who completed the quest.
    pub user_id: String,
    /// When the quest was completed (epoch milliseconds).
    pub completed_at: u64,
    /// Current sync state.
    pub status: SyncStatus,
    /// Number of failed flush attempts so far.
    pub retry_count: u32,
    /// When the last flush attempt touched this record (epoch milliseconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_attempt: Option<u64>,
}

impl OfflineCompletion {
    /// Constructs a record in the initial `pending_sync` state.
    pub fn new(
        quest_id: impl Into<String>,
        quest_title: impl Into<String>,
        group_name: impl Into<String>,
        user_id: impl Into<String>,
        completed_at: u64,
    ) -> Self {
        OfflineCompletion {
            quest_id: quest_id.into(),
            quest_title: quest_title.into(),
            group_name: group_name.into(),
            user_id: user_id.into(),
            completed_at,
            status: SyncStatus::PendingSync,
            retry_count: 0,
            last_sync_attempt: None,
        }
    }

    /// Returns true if this record matches the given identity triple.
    pub fn matches(&self, quest_id: &str, user_id: &str, group_name: &str) -> bool {
        self.quest_id == quest_id && self.user_id == user_id && self.group_name == group_name
    }

    /// The `(user_id, group_name)` pair used for flush batching.
    pub fn group_key(&self) -> (String, String) {
        (self.user_id.clone(), self.group_name.clone())
    }
}

#[cfg(test)]
#[path = "completion_tests.rs"]
mod tests;
