// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Realtime wire protocol for the bidirectional message connection.
//!
//! Frames are JSON text; the `type` tag selects the dispatch route. The
//! protocol is deliberately small:
//! - chat messages within a group channel
//! - presence join/leave and full roster snapshots
//! - typing start/stop indicators
//! - a bare ping keepalive with no required response

use serde::{Deserialize, Serialize};

/// A user visible on the realtime connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUser {
    /// Stable user identifier.
    pub user_id: String,
    /// Display name shown in rosters.
    pub username: String,
}

impl PresenceUser {
    /// Creates a presence record.
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        PresenceUser { user_id: user_id.into(), username: username.into() }
    }
}

/// The unit exchanged over the realtime connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// A chat message within a channel.
    ///
    /// Republished to subscribers with a fresh receive timestamp.
    ChatMessage {
        /// Message body.
        payload: String,
        /// Channel the message belongs to.
        channel_id: String,
        /// Sending user.
        user_id: String,
        /// Epoch milliseconds; stamped by the receiver on dispatch.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// A user joined; upserts the online roster.
    UserJoined {
        /// The joining user.
        payload: PresenceUser,
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// A user left; removes them from the online roster.
    UserLeft {
        /// The departing user.
        user_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// A user started typing in a channel.
    TypingStart {
        channel_id: String,
        user_id: String,
        username: String,
    },

    /// A user stopped typing in a channel.
    TypingStop { channel_id: String, user_id: String },

    /// Full roster snapshot; replaces the online list wholesale.
    PresenceSnapshot {
        /// Everyone currently online.
        payload: Vec<PresenceUser>,
    },

    /// Keepalive frame. The peer is not required to respond.
    Ping,
}

impl Envelope {
    /// Creates a chat message frame.
    pub fn chat(payload: impl Into<String>, channel_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Envelope::ChatMessage {
            payload: payload.into(),
            channel_id: channel_id.into(),
            user_id: user_id.into(),
            timestamp: None,
        }
    }

    /// Creates a join frame.
    pub fn user_joined(user: PresenceUser) -> Self {
        Envelope::UserJoined { payload: user, timestamp: None }
    }

    /// Creates a leave frame.
    pub fn user_left(user_id: impl Into<String>) -> Self {
        Envelope::UserLeft { user_id: user_id.into(), timestamp: None }
    }

    /// Creates a typing-start frame.
    pub fn typing_start(
        channel_id: impl Into<String>,
        user_id: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Envelope::TypingStart {
            channel_id: channel_id.into(),
            user_id: user_id.into(),
            username: username.into(),
        }
    }

    /// Creates a typing-stop frame.
    pub fn typing_stop(channel_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Envelope::TypingStop { channel_id: channel_id.into(), user_id: user_id.into() }
    }

    /// Creates a roster snapshot frame.
    pub fn presence_snapshot(users: Vec<PresenceUser>) -> Self {
        Envelope::PresenceSnapshot { payload: users }
    }

    /// Creates a keepalive frame.
    pub fn ping() -> Self {
        Envelope::Ping
    }

    /// Serializes the envelope to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes an envelope from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
