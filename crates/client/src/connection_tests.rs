// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Tests for the connection manager.

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use super::*;
use crate::test_support::{MockHandle, MockTransport};
use sq_core::ManualClock;
use std::time::Duration;
use tokio::time::timeout;

const START_MS: u64 = 1_000_000;

fn manager() -> (ConnectionManager<MockTransport>, MockHandle, Arc<ManualClock>) {
    let (transport, handle) = MockTransport::new();
    let clock = Arc::new(ManualClock::new(START_MS));
    let config = ResilienceConfig::default();
    let mgr = ConnectionManager::new(transport, clock.clone() as Arc<dyn ClockSource>, &config);
    (mgr, handle, clock)
}

fn identity() -> Identity {
    Identity::new("u1", "Ava")
}

async fn connected() -> (ConnectionManager<MockTransport>, MockHandle, Arc<ManualClock>) {
    let (mut mgr, handle, clock) = manager();
    mgr.connect(&identity()).await.unwrap();
    (mgr, handle, clock)
}

#[tokio::test]
async fn connect_transitions_and_sends_presence() {
    let (mut mgr, handle, _clock) = manager();
    assert_eq!(mgr.state(), ConnectionState::Disconnected);

    mgr.connect(&identity()).await.unwrap();

    assert_eq!(mgr.state(), ConnectionState::Connected);
    let sent = handle.sent_envelopes();
    assert_eq!(sent, vec![Envelope::user_joined(PresenceUser::new("u1", "Ava"))]);

    // Identity travels as query parameters on the dial URL.
    let urls = handle.connect_urls();
    assert!(urls[0].contains("user_id=u1"));
    assert!(urls[0].contains("display_name=Ava"));
}

#[tokio::test]
async fn connect_is_noop_when_already_connected() {
    let (mut mgr, handle, _clock) = connected().await;

    mgr.connect(&identity()).await.unwrap();

    assert_eq!(handle.connect_urls().len(), 1);
    assert_eq!(mgr.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn failed_dial_leaves_manager_disconnected() {
    let (mut mgr, handle, _clock) = manager();
    handle.fail_next_connects(1);

    let result = mgr.connect(&identity()).await;

    assert!(result.is_err());
    assert_eq!(mgr.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn disconnect_clears_session_state() {
    let (mut mgr, _handle, _clock) = connected().await;
    mgr.handle_frame(&Envelope::user_joined(PresenceUser::new("u2", "Bo")).to_json().unwrap());
    assert_eq!(mgr.online_users().len(), 1);

    mgr.disconnect().await.unwrap();

    assert_eq!(mgr.state(), ConnectionState::Disconnected);
    assert!(mgr.online_users().is_empty());
    assert!(mgr.typing_users().is_empty());
}

#[tokio::test]
async fn send_while_disconnected_is_a_reported_noop() {
    let (mut mgr, handle, _clock) = manager();
    let mut errors = mgr.subscribe_errors();

    assert!(!mgr.send(Envelope::ping()).await);

    assert!(errors.try_recv().unwrap().contains("not connected"));
    assert!(handle.sent().is_empty());
}

#[tokio::test]
async fn chat_messages_are_restamped_on_dispatch() {
    let (mut mgr, _handle, clock) = connected().await;
    let mut events = mgr.subscribe();

    clock.advance(500);
    mgr.handle_frame(&Envelope::chat("gg", "c1", "u2").to_json().unwrap());

    match events.try_recv().unwrap() {
        ClientEvent::Chat(Envelope::ChatMessage { payload, timestamp, .. }) => {
            assert_eq!(payload, "gg");
            assert_eq!(timestamp, Some(START_MS + 500));
        }
        other => panic!("expected chat event, got {other:?}"),
    }
}

#[tokio::test]
async fn repeated_join_replaces_rather_than_duplicates() {
    let (mut mgr, _handle, _clock) = connected().await;
    let mut events = mgr.subscribe();

    mgr.handle_frame(&Envelope::user_joined(PresenceUser::new("u2", "Bo")).to_json().unwrap());
    mgr.handle_frame(&Envelope::user_joined(PresenceUser::new("u2", "Bobby")).to_json().unwrap());

    let roster = mgr.online_users();
    assert_eq!(roster, vec![PresenceUser::new("u2", "Bobby")]);

    // Both joins published a roster update.
    assert!(matches!(events.try_recv().unwrap(), ClientEvent::PresenceChanged(_)));
    assert!(matches!(events.try_recv().unwrap(), ClientEvent::PresenceChanged(_)));
}

#[tokio::test]
async fn user_left_removes_from_roster() {
    let (mut mgr, _handle, _clock) = connected().await;

    mgr.handle_frame(&Envelope::user_joined(PresenceUser::new("u2", "Bo")).to_json().unwrap());
    mgr.handle_frame(&Envelope::user_left("u2").to_json().unwrap());

    assert!(mgr.online_users().is_empty());
}

#[tokio::test]
async fn snapshot_replaces_roster_wholesale() {
    let (mut mgr, _handle, _clock) = connected().await;
    mgr.handle_frame(&Envelope::user_joined(PresenceUser::new("u2", "Bo")).to_json().unwrap());

    let snapshot = vec![PresenceUser::new("u3", "Cy"), PresenceUser::new("u4", "Dee")];
    mgr.handle_frame(&Envelope::presence_snapshot(snapshot.clone()).to_json().unwrap());

    assert_eq!(mgr.online_users(), snapshot);
}

#[tokio::test]
async fn malformed_frames_are_dropped_and_reported() {
    let (mut mgr, _handle, _clock) = connected().await;
    let mut events = mgr.subscribe();
    let mut errors = mgr.subscribe_errors();

    mgr.handle_frame("{definitely not an envelope");

    assert!(errors.try_recv().unwrap().contains("malformed"));
    assert!(events.try_recv().is_err());

    // The manager keeps dispatching afterwards.
    mgr.handle_frame(&Envelope::user_joined(PresenceUser::new("u2", "Bo")).to_json().unwrap());
    assert!(matches!(events.try_recv().unwrap(), ClientEvent::PresenceChanged(_)));
}

#[tokio::test]
async fn typing_indicators_expire_after_fixed_window() {
    let (mut mgr, _handle, clock) = connected().await;

    mgr.handle_frame(&Envelope::typing_start("c1", "u2", "Bo").to_json().unwrap());
    assert_eq!(mgr.typing_users().len(), 1);

    // A refresh replaces the entry instead of duplicating it.
    clock.advance(1_000);
    mgr.handle_frame(&Envelope::typing_start("c1", "u2", "Bo").to_json().unwrap());
    assert_eq!(mgr.typing_users().len(), 1);

    clock.advance(TYPING_EXPIRY_MS);
    assert!(mgr.typing_users().is_empty());
}

#[tokio::test]
async fn typing_stop_clears_indicator() {
    let (mut mgr, _handle, _clock) = connected().await;

    mgr.handle_frame(&Envelope::typing_start("c1", "u2", "Bo").to_json().unwrap());
    mgr.handle_frame(&Envelope::typing_stop("c1", "u2").to_json().unwrap());

    assert!(mgr.typing_users().is_empty());
}

#[test]
fn reconnect_delay_grows_linearly() {
    let (transport, _handle) = MockTransport::new();
    let clock = Arc::new(ManualClock::new(START_MS));
    let mgr = ConnectionManager::new(
        transport,
        clock as Arc<dyn ClockSource>,
        &ResilienceConfig::default(),
    );

    let delays: Vec<u64> =
        (1..=5).map(|n| mgr.reconnect_delay(n).as_millis() as u64).collect();
    assert_eq!(delays, vec![3_000, 6_000, 9_000, 12_000, 15_000]);
}

#[tokio::test]
async fn abnormal_closes_escalate_then_exhaust() {
    let (mut mgr, _handle, _clock) = connected().await;

    for attempt in 1..=5 {
        mgr.handle_close(false);
        assert_eq!(mgr.state(), ConnectionState::Reconnecting { attempt });
    }

    // Cap reached: no further automatic reconnection.
    mgr.handle_close(false);
    assert_eq!(mgr.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn normal_close_goes_straight_to_disconnected() {
    let (mut mgr, _handle, _clock) = connected().await;
    mgr.handle_frame(&Envelope::user_joined(PresenceUser::new("u2", "Bo")).to_json().unwrap());

    mgr.handle_close(true);

    assert_eq!(mgr.state(), ConnectionState::Disconnected);
    assert!(mgr.online_users().is_empty());
}

#[tokio::test(start_paused = true)]
async fn run_returns_on_normal_close() {
    let (mut mgr, handle, _clock) = connected().await;
    let mut events = mgr.subscribe();

    handle.push_frame(&Envelope::chat("hello", "c1", "u2"));
    handle.push_close(true);

    mgr.run().await;

    assert_eq!(mgr.state(), ConnectionState::Disconnected);
    assert!(matches!(events.try_recv().unwrap(), ClientEvent::Chat(_)));
}

#[tokio::test(start_paused = true)]
async fn run_backs_off_linearly_until_the_attempt_cap() {
    let (mut mgr, handle, _clock) = connected().await;
    handle.push_close(false);
    handle.fail_next_connects(5);

    let start = tokio::time::Instant::now();
    mgr.run().await;

    // Five redials at 3s, 6s, 9s, 12s, 15s; then terminal disconnect.
    assert_eq!(start.elapsed(), Duration::from_secs(45));
    assert_eq!(handle.connect_urls().len(), 6); // initial dial + 5 redials
    assert_eq!(mgr.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn run_recovers_on_successful_redial() {
    let (mut mgr, handle, _clock) = connected().await;
    handle.push_close(false);
    // The redial succeeds; a normal close afterwards ends the run.
    handle.push_close(true);

    mgr.run().await;

    assert_eq!(handle.connect_urls().len(), 2);
    // A successful reconnect re-announced presence.
    let joins = handle
        .sent_envelopes()
        .into_iter()
        .filter(|e| matches!(e, Envelope::UserJoined { .. }))
        .count();
    assert_eq!(joins, 2);
}

#[tokio::test(start_paused = true)]
async fn run_sends_keepalive_pings_on_interval() {
    let (mut mgr, handle, _clock) = connected().await;

    // Nothing scripted on the receive side: only timers drive the loop.
    let _ = timeout(Duration::from_secs(95), mgr.run()).await;

    let pings = handle
        .sent_envelopes()
        .into_iter()
        .filter(|e| matches!(e, Envelope::Ping))
        .count();
    assert_eq!(pings, 3); // at 30s, 60s, 90s
}

#[tokio::test(start_paused = true)]
async fn run_auto_stops_idle_typing_indicator() {
    let (mut mgr, handle, _clock) = connected().await;
    assert!(mgr.start_typing("c1").await);

    let _ = timeout(Duration::from_secs(10), mgr.run()).await;

    let sent = handle.sent_envelopes();
    assert!(sent.contains(&Envelope::typing_start("c1", "u1", "Ava")));
    assert_eq!(sent.last().unwrap(), &Envelope::typing_stop("c1", "u1"));
}

#[tokio::test]
async fn transport_error_alone_does_not_reconnect() {
    let (mut mgr, handle, _clock) = connected().await;
    let mut errors = mgr.subscribe_errors();

    handle.push_error("tls hiccup");
    handle.push_close(true); // end the run afterwards

    mgr.run().await;

    assert!(errors.try_recv().unwrap().contains("tls hiccup"));
    // The error never produced a reconnecting state; the normal close ended
    // the cycle directly.
    assert_eq!(handle.connect_urls().len(), 1);
}
