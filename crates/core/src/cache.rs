// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Versioned, TTL-bounded, dual-tier cache for memoized server reads.
//!
//! Entries are JSON blobs stamped with a creation time, an expiry time, and
//! the store-wide schema version. An entry is readable only while the stamp
//! matches the current schema version and the expiry is in the future; any
//! other state is a miss and the entry is purged by the access that saw it.
//!
//! Two tiers back the store: a fixed allow-list of session-scoped logical
//! keys routes to the ephemeral tier, everything else to the durable tier.
//!
//! Failure policy: storage and parse anomalies never escape this module.
//! Reads degrade to misses and writes to `false`; details go to the log.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::StorageBackend;
use crate::clock::ClockSource;
use crate::config::ResilienceConfig;

/// Namespace prefix for cache keys at the backend boundary.
///
/// Distinct from the offline queue's key space, which shares the durable
/// backend; sweeps and clears must never touch queue state.
pub const CACHE_PREFIX: &str = "sidequest:cache:";

/// Logical keys routed to the ephemeral session tier.
///
/// Session-scoped identity data must not outlive the process.
const SESSION_KEYS: &[&str] = &["auth:token", "auth:identity", "user:session"];

/// Storage tier for a logical key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Ephemeral; cleared at session end.
    Session,
    /// Durable; survives restarts.
    Local,
}

impl Tier {
    /// Policy table mapping a logical key to its tier.
    pub fn for_key(key: &str) -> Tier {
        if SESSION_KEYS.contains(&key) {
            Tier::Session
        } else {
            Tier::Local
        }
    }
}

/// The stored representation of one cached value.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    data: serde_json::Value,
    created_at: u64,
    expires_at: u64,
    schema_version: String,
}

/// Aggregate counters returned by [`CacheStore::stats`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CacheStats {
    /// Entries resident across both tiers, valid or not.
    pub total_items: usize,
    /// Entries resident in the session tier.
    pub session_items: usize,
    /// Entries resident in the local tier.
    pub local_items: usize,
    /// Resident entries that are expired, version-stale, or unreadable.
    pub expired_items: usize,
    /// Total serialized size across both tiers, in kilobytes.
    pub total_size_kb: f64,
}

/// Versioned, TTL-bounded key/value store over two storage tiers.
#[derive(Clone)]
pub struct CacheStore {
    session: Arc<dyn StorageBackend>,
    local: Arc<dyn StorageBackend>,
    clock: Arc<dyn ClockSource>,
    schema_version: String,
    max_item_bytes: usize,
}

impl CacheStore {
    /// Creates a store over the given tiers.
    ///
    /// `schema_version` and the per-item size cap come from `config`.
    pub fn new(
        session: Arc<dyn StorageBackend>,
        local: Arc<dyn StorageBackend>,
        clock: Arc<dyn ClockSource>,
        config: &ResilienceConfig,
    ) -> Self {
        CacheStore {
            session,
            local,
            clock,
            schema_version: config.schema_version.clone(),
            max_item_bytes: config.cache_max_item_bytes,
        }
    }

    fn backend(&self, key: &str) -> &Arc<dyn StorageBackend> {
        match Tier::for_key(key) {
            Tier::Session => &self.session,
            Tier::Local => &self.local,
        }
    }

    fn storage_key(key: &str) -> String {
        format!("{CACHE_PREFIX}{key}")
    }

    /// Caches a value under `key` for `ttl`.
    ///
    /// Returns false (and stores nothing) for an empty key, a value that
    /// serializes to JSON `null`, an entry over the size cap, or a storage
    /// failure. An existing entry for the key is overwritten.
    pub fn set<T: Serialize>(&self, key: &str, data: &T, ttl: Duration) -> bool {
        if key.is_empty() {
            debug!("cache set rejected: empty key");
            return false;
        }

        let value = match serde_json::to_value(data) {
            Ok(v) => v,
            Err(e) => {
                debug!(key, error = %e, "cache set rejected: unserializable value");
                return false;
            }
        };
        if value.is_null() {
            debug!(key, "cache set rejected: null value");
            return false;
        }

        let now = self.clock.now_ms();
        let entry = CacheEntry {
            data: value,
            created_at: now,
            expires_at: now.saturating_add(ttl.as_millis() as u64),
            schema_version: self.schema_version.clone(),
        };

        let serialized = match serde_json::to_string(&entry) {
            Ok(s) => s,
            Err(e) => {
                debug!(key, error = %e, "cache set rejected: entry serialization failed");
                return false;
            }
        };
        if serialized.len() > self.max_item_bytes {
            debug!(key, size = serialized.len(), cap = self.max_item_bytes, "cache set rejected: over size cap");
            return false;
        }

        match self.backend(key).put(&Self::storage_key(key), &serialized) {
            Ok(()) => true,
            Err(e) => {
                warn!(key, error = %e, "cache write failed");
                false
            }
        }
    }

    /// Reads a value. Missing, expired, version-stale, and unreadable
    /// entries all read as `None`; the invalid ones are purged.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entry = self.load_valid(key)?;
        match serde_json::from_value(entry.data) {
            Ok(data) => Some(data),
            Err(e) => {
                warn!(key, error = %e, "cached value failed to deserialize; purging");
                self.purge(key);
                None
            }
        }
    }

    /// Returns true if `key` holds a currently valid entry.
    ///
    /// Same validity rules as [`CacheStore::get`] without touching the data.
    pub fn has(&self, key: &str) -> bool {
        self.load_valid(key).is_some()
    }

    /// Removes an entry. Returns true if one was stored.
    pub fn remove(&self, key: &str) -> bool {
        match self.backend(key).remove(&Self::storage_key(key)) {
            Ok(existed) => existed,
            Err(e) => {
                warn!(key, error = %e, "cache remove failed");
                false
            }
        }
    }

    /// Pushes an entry's expiry further out, preserving its creation time.
    ///
    /// Returns false without writing if the entry is already invalid.
    pub fn extend_ttl(&self, key: &str, extra: Duration) -> bool {
        let Some(mut entry) = self.load_valid(key) else {
            return false;
        };

        entry.expires_at = entry.expires_at.saturating_add(extra.as_millis() as u64);

        let serialized = match serde_json::to_string(&entry) {
            Ok(s) => s,
            Err(e) => {
                warn!(key, error = %e, "cache ttl extension failed to serialize");
                return false;
            }
        };
        match self.backend(key).put(&Self::storage_key(key), &serialized) {
            Ok(()) => true,
            Err(e) => {
                warn!(key, error = %e, "cache ttl extension failed");
                false
            }
        }
    }

    /// Removes every cache entry in both tiers.
    ///
    /// Only keys in the cache namespace are touched; other state sharing a
    /// backend (the offline queue) is left alone.
    pub fn clear_all(&self) {
        for backend in [&self.session, &self.local] {
            let keys = match backend.keys_with_prefix(CACHE_PREFIX) {
                Ok(keys) => keys,
                Err(e) => {
                    warn!(error = %e, "cache clear: key listing failed");
                    continue;
                }
            };
            for key in keys {
                if let Err(e) = backend.remove(&key) {
                    warn!(key, error = %e, "cache clear: remove failed");
                }
            }
        }
    }

    /// Removes entries whose logical key matches `pattern`.
    ///
    /// Returns the number of entries removed.
    pub fn clear_by_pattern(&self, pattern: &Regex) -> usize {
        let mut removed = 0;
        for backend in [&self.session, &self.local] {
            let keys = match backend.keys_with_prefix(CACHE_PREFIX) {
                Ok(keys) => keys,
                Err(e) => {
                    warn!(error = %e, "cache pattern clear: key listing failed");
                    continue;
                }
            };
            for key in keys {
                let logical = key.trim_start_matches(CACHE_PREFIX);
                if pattern.is_match(logical) && backend.remove(&key).unwrap_or(false) {
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Purges every invalid entry across both tiers.
    ///
    /// Run from a periodic timer so abandoned keys do not accumulate; lazy
    /// read-time purging only reaches keys that are still being asked for.
    /// Returns the number of entries removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut removed = 0;
        for backend in [&self.session, &self.local] {
            let keys = match backend.keys_with_prefix(CACHE_PREFIX) {
                Ok(keys) => keys,
                Err(e) => {
                    warn!(error = %e, "cache sweep: key listing failed");
                    continue;
                }
            };
            for key in keys {
                let stale = match backend.get(&key) {
                    Ok(Some(raw)) => !self.entry_is_valid(&raw, now),
                    Ok(None) => false,
                    Err(e) => {
                        warn!(key, error = %e, "cache sweep: read failed");
                        false
                    }
                };
                if stale && backend.remove(&key).unwrap_or(false) {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            debug!(removed, "cache sweep purged entries");
        }
        removed
    }

    /// Reports entry counts and total size across both tiers.
    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now_ms();
        let mut stats = CacheStats::default();
        let mut total_bytes = 0usize;

        for (tier, backend) in [(Tier::Session, &self.session), (Tier::Local, &self.local)] {
            let keys = match backend.keys_with_prefix(CACHE_PREFIX) {
                Ok(keys) => keys,
                Err(e) => {
                    warn!(error = %e, "cache stats: key listing failed");
                    continue;
                }
            };
            for key in keys {
                let Ok(Some(raw)) = backend.get(&key) else { continue };
                stats.total_items += 1;
                match tier {
                    Tier::Session => stats.session_items += 1,
                    Tier::Local => stats.local_items += 1,
                }
                if !self.entry_is_valid(&raw, now) {
                    stats.expired_items += 1;
                }
                total_bytes += raw.len();
            }
        }

        stats.total_size_kb = total_bytes as f64 / 1024.0;
        stats
    }

    /// Loads the entry for `key` if it is currently valid; purges it if the
    /// read observed it to be invalid.
    fn load_valid(&self, key: &str) -> Option<CacheEntry> {
        let raw = match self.backend(key).get(&Self::storage_key(key)) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "cache read failed");
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key, error = %e, "corrupted cache entry; purging");
                self.purge(key);
                return None;
            }
        };

        if entry.schema_version != self.schema_version {
            debug!(key, stored = %entry.schema_version, current = %self.schema_version, "schema version mismatch; purging");
            self.purge(key);
            return None;
        }

        if self.clock.now_ms() >= entry.expires_at {
            debug!(key, "cache entry expired; purging");
            self.purge(key);
            return None;
        }

        Some(entry)
    }

    fn entry_is_valid(&self, raw: &str, now: u64) -> bool {
        match serde_json::from_str::<CacheEntry>(raw) {
            Ok(entry) => entry.schema_version == self.schema_version && now < entry.expires_at,
            Err(_) => false,
        }
    }

    fn purge(&self, key: &str) {
        if let Err(e) = self.backend(key).remove(&Self::storage_key(key)) {
            warn!(key, error = %e, "cache purge failed");
        }
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
