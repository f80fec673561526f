// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_docs_in_private_items
)]

//! Presence and typing-indicator tests against an in-process gateway.
//!
//! Covers online/offline broadcasts, the snapshot replayed to a joining
//! client, and the debounced typing flow from keystroke to the trailing
//! stop signal.

use std::time::Duration;

use tokio::sync::mpsc;

use venturechat::config::SessionConfig;
use venturechat::session::{ChatSession, SessionEvent};
use venturechat_proto::identity::{Identity, Role};

fn dev(id: i64) -> Identity {
    Identity::new(Role::Developer, id)
}

fn ent(id: i64) -> Identity {
    Identity::new(Role::Entrepreneur, id)
}

fn test_config(addr: std::net::SocketAddr) -> SessionConfig {
    SessionConfig {
        gateway_url: format!("ws://{addr}/ws"),
        api_base_url: format!("http://{addr}"),
        connect_timeout: Duration::from_secs(5),
        request_timeout: Duration::from_secs(5),
        typing_quiet_period: Duration::from_millis(300),
        backoff_initial: Duration::from_millis(100),
        backoff_max: Duration::from_secs(1),
        ..SessionConfig::default()
    }
}

async fn wait_for(
    rx: &mut mpsc::Receiver<SessionEvent>,
    mut pred: impl FnMut(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.expect("session event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for session event")
}

async fn connect(
    me: Identity,
    addr: std::net::SocketAddr,
) -> (ChatSession, mpsc::Receiver<SessionEvent>) {
    let (session, mut rx) = ChatSession::connect(me, test_config(addr)).unwrap();
    wait_for(&mut rx, |e| matches!(e, SessionEvent::Connected { .. })).await;
    (session, rx)
}

#[tokio::test(flavor = "multi_thread")]
async fn presence_broadcasts_online_and_offline() {
    let (addr, server, _state) = venturechat_gateway::gateway::start_server("127.0.0.1:0")
        .await
        .unwrap();

    let (dev_session, mut dev_rx) = connect(dev(5), addr).await;
    assert!(!dev_session.is_online(ent(9)));

    let (ent_session, _ent_rx) = connect(ent(9), addr).await;
    wait_for(&mut dev_rx, |e| {
        matches!(
            e,
            SessionEvent::PresenceChanged { identity, online: true } if *identity == ent(9)
        )
    })
    .await;
    assert!(dev_session.is_online(ent(9)));

    ent_session.shutdown().await;
    wait_for(&mut dev_rx, |e| {
        matches!(
            e,
            SessionEvent::PresenceChanged { identity, online: false } if *identity == ent(9)
        )
    })
    .await;
    assert!(!dev_session.is_online(ent(9)));

    dev_session.shutdown().await;
    server.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn joiner_receives_the_online_snapshot() {
    let (addr, server, _state) = venturechat_gateway::gateway::start_server("127.0.0.1:0")
        .await
        .unwrap();

    // Two users are already online before the developer joins.
    let (ent_a, _rx_a) = connect(ent(9), addr).await;
    let (ent_b, _rx_b) = connect(ent(12), addr).await;

    let (dev_session, mut dev_rx) = connect(dev(5), addr).await;
    wait_for(&mut dev_rx, |e| {
        matches!(
            e,
            SessionEvent::PresenceChanged { identity, online: true } if *identity == ent(12)
        )
    })
    .await;
    assert!(dev_session.is_online(ent(9)));
    assert!(dev_session.is_online(ent(12)));

    dev_session.shutdown().await;
    ent_a.shutdown().await;
    ent_b.shutdown().await;
    server.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn typing_starts_on_keystroke_and_stops_after_quiet_period() {
    let (addr, server, _state) = venturechat_gateway::gateway::start_server("127.0.0.1:0")
        .await
        .unwrap();

    let (mut dev_session, mut dev_rx) = connect(dev(5), addr).await;
    let (mut ent_session, mut ent_rx) = connect(ent(9), addr).await;

    // Both sides open the shared conversation.
    dev_session.select_contact(ent(9));
    ent_session.select_contact(dev(5));
    wait_for(&mut dev_rx, |e| {
        matches!(e, SessionEvent::ConversationUpdated(c) if *c == ent(9))
    })
    .await;
    wait_for(&mut ent_rx, |e| {
        matches!(e, SessionEvent::ConversationUpdated(c) if *c == dev(5))
    })
    .await;

    ent_session.on_input().await;
    wait_for(&mut dev_rx, |e| {
        matches!(
            e,
            SessionEvent::TypingChanged { counterpart, is_typing: true } if *counterpart == ent(9)
        )
    })
    .await;
    assert!(dev_session.is_typing(ent(9)));

    // No further keystrokes: the quiet period elapses and the indicator
    // clears on the developer side.
    wait_for(&mut dev_rx, |e| {
        matches!(
            e,
            SessionEvent::TypingChanged { counterpart, is_typing: false } if *counterpart == ent(9)
        )
    })
    .await;
    assert!(!dev_session.is_typing(ent(9)));

    dev_session.shutdown().await;
    ent_session.shutdown().await;
    server.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn sending_a_message_stops_the_typing_indicator() {
    let (addr, server, _state) = venturechat_gateway::gateway::start_server("127.0.0.1:0")
        .await
        .unwrap();

    let (mut dev_session, mut dev_rx) = connect(dev(5), addr).await;
    let (mut ent_session, mut ent_rx) = connect(ent(9), addr).await;

    dev_session.select_contact(ent(9));
    ent_session.select_contact(dev(5));
    wait_for(&mut dev_rx, |e| {
        matches!(e, SessionEvent::ConversationUpdated(c) if *c == ent(9))
    })
    .await;
    wait_for(&mut ent_rx, |e| {
        matches!(e, SessionEvent::ConversationUpdated(c) if *c == dev(5))
    })
    .await;

    ent_session.on_input().await;
    wait_for(&mut dev_rx, |e| {
        matches!(e, SessionEvent::TypingChanged { is_typing: true, .. })
    })
    .await;

    // The send flushes the typing state well before the quiet period.
    ent_session.send("done typing").await.unwrap();
    wait_for(&mut dev_rx, |e| {
        matches!(e, SessionEvent::TypingChanged { is_typing: false, .. })
    })
    .await;

    dev_session.shutdown().await;
    ent_session.shutdown().await;
    server.abort();
}
