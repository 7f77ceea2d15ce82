// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! sq-core: Shared library for the sidequest client resilience layer.
//!
//! This crate provides the storage-side half of the resilience layer used by
//! the sidequest habit/quest platform client:
//!
//! - [`CacheStore`] - versioned, TTL-bounded, dual-tier cache for memoized
//!   server reads
//! - [`OfflineMutationQueue`] - durable queue of quest completions awaiting
//!   replay, with retry accounting and group batching
//! - [`Envelope`] - the realtime wire protocol exchanged with the server
//! - [`ResilienceConfig`] - every tunable in one injectable struct
//!
//! The network-side half (transport, connection manager, sync coordinator)
//! lives in the `sq-client` crate.

pub mod backend;
pub mod cache;
pub mod clock;
pub mod completion;
pub mod config;
pub mod envelope;
pub mod error;
pub mod queue;

pub use backend::{MemoryBackend, SqliteBackend, StorageBackend};
pub use cache::{CacheStats, CacheStore, Tier};
pub use clock::{ClockSource, ManualClock, SystemClock};
pub use completion::{OfflineCompletion, SyncStatus};
pub use config::ResilienceConfig;
pub use envelope::{Envelope, PresenceUser};
pub use error::{Error, Result};
pub use queue::{FlushReport, OfflineMutationQueue, QueueStats};
