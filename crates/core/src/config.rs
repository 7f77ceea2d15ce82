// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Resilience layer configuration.
//!
//! Every tunable of the cache, queue, and connection components lives here.
//! Defaults match the reference constants; deployments can override any
//! subset from a TOML file.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for the client resilience layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// WebSocket server URL (`ws://` or `wss://`).
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Keepalive ping interval in milliseconds.
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,

    /// Base reconnect delay in milliseconds; attempt N waits `base * N`.
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,

    /// Reconnect attempts before the connection is left disconnected.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Default cache entry TTL in milliseconds.
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_default_ttl_ms: u64,

    /// Largest serialized cache entry accepted, in bytes.
    #[serde(default = "default_cache_max_item_bytes")]
    pub cache_max_item_bytes: usize,

    /// Interval between expired-entry sweeps in milliseconds.
    #[serde(default = "default_cache_sweep_interval_ms")]
    pub cache_sweep_interval_ms: u64,

    /// Schema version stamped on every cache entry. Bumping it invalidates
    /// the whole store at once.
    #[serde(default = "default_schema_version")]
    pub schema_version: String,

    /// Failed flush attempts per record before it is marked `sync_failed`.
    #[serde(default = "default_queue_max_retries")]
    pub queue_max_retries: u32,

    /// Window within which repeated flush calls are no-ops, in milliseconds.
    #[serde(default = "default_queue_debounce_ms")]
    pub queue_debounce_ms: u64,

    /// Delay after connectivity recovery before the queue is flushed,
    /// in milliseconds.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

fn default_server_url() -> String {
    "ws://localhost:7890".to_string()
}

fn default_keepalive_interval_ms() -> u64 {
    30_000
}

fn default_reconnect_base_ms() -> u64 {
    3_000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_cache_ttl_ms() -> u64 {
    600_000
}

fn default_cache_max_item_bytes() -> usize {
    64 * 1024
}

fn default_cache_sweep_interval_ms() -> u64 {
    300_000
}

fn default_schema_version() -> String {
    "1".to_string()
}

fn default_queue_max_retries() -> u32 {
    3
}

fn default_queue_debounce_ms() -> u64 {
    1_000
}

fn default_settle_delay_ms() -> u64 {
    2_000
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        ResilienceConfig {
            server_url: default_server_url(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
            reconnect_base_ms: default_reconnect_base_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            cache_default_ttl_ms: default_cache_ttl_ms(),
            cache_max_item_bytes: default_cache_max_item_bytes(),
            cache_sweep_interval_ms: default_cache_sweep_interval_ms(),
            schema_version: default_schema_version(),
            queue_max_retries: default_queue_max_retries(),
            queue_debounce_ms: default_queue_debounce_ms(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

impl ResilienceConfig {
    /// Loads configuration from a TOML file, applying defaults for any
    /// missing field.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: ResilienceConfig = toml::from_str(&content)
            .map_err(|e| Error::InvalidConfig(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if !self.server_url.starts_with("ws://") && !self.server_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "server_url '{}' must start with ws:// or wss://",
                self.server_url
            )));
        }
        if self.cache_max_item_bytes == 0 {
            return Err(Error::InvalidConfig("cache_max_item_bytes must be nonzero".into()));
        }
        if self.reconnect_base_ms == 0 {
            return Err(Error::InvalidConfig("reconnect_base_ms must be nonzero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
