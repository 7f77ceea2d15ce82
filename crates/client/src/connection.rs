// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Connection manager for the long-lived realtime channel.
//!
//! A state machine over an injected [`Transport`]:
//!
//! - `disconnected -> connecting -> connected` on dial
//! - `connected -> reconnecting` on abnormal close, with linearly growing
//!   backoff (`base * attempt`) up to a fixed attempt cap
//! - `-> disconnected` on normal close, explicit [`disconnect`], or when the
//!   cap is reached; a manager disconnected this way never redials on its own
//!
//! While connected, [`run`] pumps inbound frames, sends a keepalive ping on a
//! fixed interval, and auto-stops an outstanding typing indicator after a
//! short idle window. Inbound frames are parsed as [`Envelope`]s and routed
//! by type: chat messages are re-timestamped and republished, presence
//! frames maintain a deduplicated online roster, typing frames maintain an
//! auto-expiring typing list. Malformed frames are dropped and reported on
//! the error stream; they never take the manager down.
//!
//! [`disconnect`]: ConnectionManager::disconnect
//! [`run`]: ConnectionManager::run

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::time::{interval_at, sleep, sleep_until, Instant};
use tracing::{debug, warn};

use sq_core::{ClockSource, Envelope, PresenceUser, ResilienceConfig};

use crate::transport::{Transport, TransportEvent, TransportResult};

/// How long an inbound typing indicator stays visible without a refresh.
const TYPING_EXPIRY_MS: u64 = 5_000;

/// Idle time after which an outstanding local typing indicator auto-stops.
const TYPING_STOP_DELAY: Duration = Duration::from_secs(3);

/// Capacity of the event and error broadcast channels.
const CHANNEL_CAPACITY: usize = 256;

/// State of the realtime connection.
///
/// Owned by the manager; the rest of the app observes it through
/// [`ConnectionManager::subscribe_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected.
    Disconnected,
    /// Attempting to connect.
    Connecting,
    /// Connected to the server.
    Connected,
    /// Waiting out the backoff before redialing.
    Reconnecting { attempt: u32 },
}

/// Who this client presents as on the realtime channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable user identifier.
    pub user_id: String,
    /// Name shown to other users.
    pub display_name: String,
}

impl Identity {
    /// Creates an identity.
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Identity { user_id: user_id.into(), display_name: display_name.into() }
    }
}

/// A user currently typing in a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingUser {
    pub user_id: String,
    pub username: String,
    pub channel_id: String,
    /// When the indicator was (last) received (epoch milliseconds).
    pub started_at: u64,
}

/// Typed events republished to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A chat message, re-timestamped with the local receive time.
    Chat(Envelope),
    /// The online roster changed; carries the full deduplicated list.
    PresenceChanged(Vec<PresenceUser>),
    /// The typing list changed; carries the unexpired entries.
    TypingChanged(Vec<TypingUser>),
}

/// State machine over a long-lived bidirectional connection.
pub struct ConnectionManager<T: Transport> {
    transport: T,
    clock: Arc<dyn ClockSource>,
    server_url: String,
    keepalive_interval: Duration,
    reconnect_base: Duration,
    max_reconnect_attempts: u32,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<ClientEvent>,
    errors_tx: broadcast::Sender<String>,
    identity: Option<Identity>,
    online: Vec<PresenceUser>,
    typing: Vec<TypingUser>,
    attempts: u32,
    typing_stop_at: Option<Instant>,
    typing_channel: Option<String>,
}

impl<T: Transport> ConnectionManager<T> {
    /// Creates a manager over the given transport.
    pub fn new(transport: T, clock: Arc<dyn ClockSource>, config: &ResilienceConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (errors_tx, _) = broadcast::channel(CHANNEL_CAPACITY);

        ConnectionManager {
            transport,
            clock,
            server_url: config.server_url.clone(),
            keepalive_interval: Duration::from_millis(config.keepalive_interval_ms),
            reconnect_base: Duration::from_millis(config.reconnect_base_ms),
            max_reconnect_attempts: config.max_reconnect_attempts,
            state_tx,
            events_tx,
            errors_tx,
            identity: None,
            online: Vec::new(),
            typing: Vec::new(),
            attempts: 0,
            typing_stop_at: None,
            typing_channel: None,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Read-only observation of state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Subscribes to typed dispatch events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events_tx.subscribe()
    }

    /// Subscribes to the error stream (malformed frames, dropped sends,
    /// transport errors).
    pub fn subscribe_errors(&self) -> broadcast::Receiver<String> {
        self.errors_tx.subscribe()
    }

    /// The deduplicated online roster.
    pub fn online_users(&self) -> Vec<PresenceUser> {
        self.online.clone()
    }

    /// Users currently typing, with expired indicators pruned.
    pub fn typing_users(&mut self) -> Vec<TypingUser> {
        self.prune_typing();
        self.typing.clone()
    }

    /// Dials the server and presents `identity`.
    ///
    /// A no-op when already connected. On success the attempt counter is
    /// reset and an initial presence frame is sent.
    pub async fn connect(&mut self, identity: &Identity) -> TransportResult<()> {
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }

        self.identity = Some(identity.clone());
        self.set_state(ConnectionState::Connecting);

        let url = self.dial_url(identity);
        match self.transport.connect(&url).await {
            Ok(()) => {
                self.attempts = 0;
                self.set_state(ConnectionState::Connected);
                let hello = Envelope::user_joined(PresenceUser::new(
                    identity.user_id.clone(),
                    identity.display_name.clone(),
                ));
                self.send(hello).await;
                Ok(())
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Closes the connection cleanly and clears session bookkeeping.
    ///
    /// A manager disconnected this way never auto-reconnects; a later
    /// [`ConnectionManager::connect`] call starts a fresh cycle.
    pub async fn disconnect(&mut self) -> TransportResult<()> {
        let result = self.transport.disconnect().await;
        self.reset_session_state();
        self.attempts = 0;
        self.set_state(ConnectionState::Disconnected);
        result
    }

    /// Sends an envelope over the transport.
    ///
    /// A no-op returning false when the transport is not open; the drop is
    /// reported on the error stream, never raised as an error.
    pub async fn send(&mut self, envelope: Envelope) -> bool {
        if self.state() != ConnectionState::Connected || !self.transport.is_connected() {
            self.report_error("outbound frame dropped: not connected");
            return false;
        }

        let frame = match envelope.to_json() {
            Ok(frame) => frame,
            Err(e) => {
                self.report_error(format!("outbound frame failed to serialize: {e}"));
                return false;
            }
        };

        match self.transport.send(frame).await {
            Ok(()) => true,
            Err(e) => {
                self.report_error(format!("send failed: {e}"));
                false
            }
        }
    }

    /// Sends a typing-start frame and arms the auto-stop timer.
    ///
    /// Call again on every keystroke; each call pushes the auto-stop out by
    /// the idle window.
    pub async fn start_typing(&mut self, channel_id: &str) -> bool {
        let Some(identity) = self.identity.clone() else {
            self.report_error("typing indicator dropped: no identity");
            return false;
        };

        let frame =
            Envelope::typing_start(channel_id, identity.user_id, identity.display_name);
        let sent = self.send(frame).await;
        if sent {
            self.typing_stop_at = Some(Instant::now() + TYPING_STOP_DELAY);
            self.typing_channel = Some(channel_id.to_string());
        }
        sent
    }

    /// Sends a typing-stop frame and clears the auto-stop timer.
    pub async fn stop_typing(&mut self) -> bool {
        self.typing_stop_at = None;
        let (Some(identity), Some(channel_id)) =
            (self.identity.clone(), self.typing_channel.take())
        else {
            return false;
        };
        self.send(Envelope::typing_stop(channel_id, identity.user_id)).await
    }

    /// Drives the connection until it reaches a terminal disconnect.
    ///
    /// While connected: pumps inbound frames, pings on the keepalive
    /// interval, and auto-stops an idle typing indicator. On abnormal close:
    /// waits out the backoff and redials with the last-known identity, up to
    /// the attempt cap.
    pub async fn run(&mut self) {
        let mut keepalive =
            interval_at(Instant::now() + self.keepalive_interval, self.keepalive_interval);

        loop {
            match self.state() {
                ConnectionState::Connected => {
                    let typing_deadline = self.typing_stop_at;
                    tokio::select! {
                        _ = keepalive.tick() => {
                            self.send(Envelope::ping()).await;
                        }
                        _ = deadline_elapsed(typing_deadline) => {
                            self.stop_typing().await;
                        }
                        event = self.transport.recv() => match event {
                            Ok(TransportEvent::Frame(text)) => self.handle_frame(&text),
                            Ok(TransportEvent::Closed { normal }) => self.handle_close(normal),
                            Err(e) => {
                                self.report_error(format!("transport error: {e}"));
                                // An error alone does not reconnect, but a
                                // transport that observed its connection die
                                // counts as an abnormal close.
                                if !self.transport.is_connected() {
                                    self.handle_close(false);
                                }
                            }
                        }
                    }
                }
                ConnectionState::Reconnecting { attempt } => {
                    sleep(self.reconnect_delay(attempt)).await;
                    let Some(identity) = self.identity.clone() else {
                        self.set_state(ConnectionState::Disconnected);
                        continue;
                    };
                    debug!(attempt, "redialing");
                    if self.connect(&identity).await.is_err() {
                        self.handle_close(false);
                    }
                }
                ConnectionState::Disconnected | ConnectionState::Connecting => break,
            }
        }
    }

    /// Backoff before reconnect attempt `attempt` (1-based): linear growth.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        self.reconnect_base * attempt
    }

    /// Routes one inbound frame.
    fn handle_frame(&mut self, text: &str) {
        let envelope = match Envelope::from_json(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.report_error(format!("malformed inbound frame dropped: {e}"));
                return;
            }
        };

        match envelope {
            Envelope::ChatMessage { payload, channel_id, user_id, .. } => {
                let stamped = Envelope::ChatMessage {
                    payload,
                    channel_id,
                    user_id,
                    timestamp: Some(self.clock.now_ms()),
                };
                self.publish(ClientEvent::Chat(stamped));
            }
            Envelope::UserJoined { payload, .. } => {
                // Re-joins replace rather than duplicate.
                self.online.retain(|u| u.user_id != payload.user_id);
                self.online.push(payload);
                let roster = self.online.clone();
                self.publish(ClientEvent::PresenceChanged(roster));
            }
            Envelope::UserLeft { user_id, .. } => {
                self.online.retain(|u| u.user_id != user_id);
                let roster = self.online.clone();
                self.publish(ClientEvent::PresenceChanged(roster));
            }
            Envelope::PresenceSnapshot { payload } => {
                self.online = payload;
                let roster = self.online.clone();
                self.publish(ClientEvent::PresenceChanged(roster));
            }
            Envelope::TypingStart { channel_id, user_id, username } => {
                self.typing
                    .retain(|t| !(t.user_id == user_id && t.channel_id == channel_id));
                self.typing.push(TypingUser {
                    user_id,
                    username,
                    channel_id,
                    started_at: self.clock.now_ms(),
                });
                let typing = self.typing_users();
                self.publish(ClientEvent::TypingChanged(typing));
            }
            Envelope::TypingStop { channel_id, user_id } => {
                self.typing
                    .retain(|t| !(t.user_id == user_id && t.channel_id == channel_id));
                let typing = self.typing_users();
                self.publish(ClientEvent::TypingChanged(typing));
            }
            Envelope::Ping => {
                // Peer keepalive; no response required.
            }
        }
    }

    /// Applies a close observation to the state machine.
    fn handle_close(&mut self, normal: bool) {
        if normal {
            debug!("connection closed normally");
            self.reset_session_state();
            self.set_state(ConnectionState::Disconnected);
        } else if self.attempts < self.max_reconnect_attempts {
            self.attempts += 1;
            debug!(attempt = self.attempts, "abnormal close; scheduling reconnect");
            self.set_state(ConnectionState::Reconnecting { attempt: self.attempts });
        } else {
            warn!(attempts = self.attempts, "reconnect attempts exhausted; staying disconnected");
            self.reset_session_state();
            self.set_state(ConnectionState::Disconnected);
        }
    }

    fn dial_url(&self, identity: &Identity) -> String {
        match url::Url::parse_with_params(
            &self.server_url,
            &[("user_id", identity.user_id.as_str()), ("display_name", identity.display_name.as_str())],
        ) {
            Ok(url) => url.into(),
            Err(e) => {
                // Let the transport reject it; the failure path is the same.
                warn!(url = %self.server_url, error = %e, "server url failed to parse");
                self.server_url.clone()
            }
        }
    }

    fn prune_typing(&mut self) {
        let now = self.clock.now_ms();
        self.typing.retain(|t| now.saturating_sub(t.started_at) < TYPING_EXPIRY_MS);
    }

    fn reset_session_state(&mut self) {
        self.online.clear();
        self.typing.clear();
        self.typing_stop_at = None;
        self.typing_channel = None;
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn publish(&self, event: ClientEvent) {
        let _ = self.events_tx.send(event);
    }

    fn report_error(&self, message: impl Into<String>) {
        let message = message.into();
        debug!(%message, "connection error reported");
        let _ = self.errors_tx.send(message);
    }
}

/// Resolves when the deadline passes; pends forever if there is none.
async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
