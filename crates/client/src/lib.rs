// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! sq-client: network-side half of the sidequest resilience layer.
//!
//! Provides the realtime connection machinery over the storage primitives
//! in `sq-core`.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection  │────►│  Transport  │────►│   Server    │
//! │   Manager    │◄────│   (trait)   │◄────│             │
//! └──────────────┘     └─────────────┘     └─────────────┘
//!        │ state (watch)
//!        ▼
//! ┌──────────────┐     ┌─────────────┐
//! │     Sync     │────►│   Offline   │  (sq-core)
//! │ Coordinator  │     │    Queue    │
//! └──────────────┘     └─────────────┘
//! ```
//!
//! # Features
//!
//! - WebSocket connection with keepalive and linear-backoff reconnection
//! - Typed dispatch of chat, presence, and typing frames to subscribers
//! - Observable connection state over a `watch` channel
//! - Auto-sync of the offline queue after connectivity recovery
//! - Injectable transport trait for testing

pub mod connection;
pub mod coordinator;
pub mod sweeper;
pub mod transport;

pub use connection::{ClientEvent, ConnectionManager, ConnectionState, Identity, TypingUser};
pub use coordinator::{online_from_state, SyncCoordinator};
pub use sweeper::spawn_cache_sweeper;
pub use transport::{Transport, TransportError, TransportEvent, WebSocketTransport};

#[cfg(test)]
mod test_support;
