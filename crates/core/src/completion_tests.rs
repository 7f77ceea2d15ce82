// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use yare::parameterized;

#[parameterized(
    pending = { "pending_sync", SyncStatus::PendingSync },
    syncing = { "syncing", SyncStatus::Syncing },
    failed = { "sync_failed", SyncStatus::SyncFailed },
)]
fn status_parse_roundtrip(s: &str, expected: SyncStatus) {
    let parsed: SyncStatus = s.parse().unwrap();
    assert_eq!(parsed, expected);
    assert_eq!(parsed.as_str(), s);
    assert_eq!(parsed.to_string(), s);
}

#[parameterized(
    empty = { "" },
    unknown = { "synced" },
    dashed = { "pending-sync" },
)]
fn status_parse_errors(s: &str) {
    assert!(s.parse::<SyncStatus>().is_err());
}

#[test]
fn new_completion_is_pending() {
    let c = OfflineCompletion::new("q1", "Slay the inbox", "g1", "u1", 1_000);

    assert_eq!(c.status, SyncStatus::PendingSync);
    assert_eq!(c.retry_count, 0);
    assert!(c.last_sync_attempt.is_none());
    assert_eq!(c.completed_at, 1_000);
}

#[test]
fn completion_matches_triple() {
    let c = OfflineCompletion::new("q1", "Title", "g1", "u1", 1_000);

    assert!(c.matches("q1", "u1", "g1"));
    assert!(!c.matches("q1", "u2", "g1"));
    assert!(!c.matches("q2", "u1", "g1"));
    assert!(!c.matches("q1", "u1", "g2"));
}

#[test]
fn completion_group_key() {
    let c = OfflineCompletion::new("q1", "Title", "g1", "u1", 1_000);
    assert_eq!(c.group_key(), ("u1".to_string(), "g1".to_string()));
}

#[test]
fn completion_serde_snake_case() {
    let c = OfflineCompletion::new("q1", "Title", "g1", "u1", 1_000);
    let json = serde_json::to_string(&c).unwrap();

    assert!(json.contains("\"status\":\"pending_sync\""));
    assert!(json.contains("\"quest_id\":\"q1\""));
    // Unset optional fields are omitted from storage.
    assert!(!json.contains("last_sync_attempt"));

    let back: OfflineCompletion = serde_json::from_str(&json).unwrap();
    assert_eq!(back, c);
}
