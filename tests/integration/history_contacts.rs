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

//! History backfill and contact-directory tests against an in-process
//! gateway with pre-seeded conversations.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use tokio::sync::mpsc;

use venturechat::config::SessionConfig;
use venturechat::session::{ChatSession, SessionEvent};
use venturechat_proto::identity::{Identity, Role};
use venturechat_proto::record::MessageRecord;

fn dev(id: i64) -> Identity {
    Identity::new(Role::Developer, id)
}

fn ent(id: i64) -> Identity {
    Identity::new(Role::Entrepreneur, id)
}

fn record(sender: Identity, receiver: Identity, body: &str, sec: u32) -> MessageRecord {
    MessageRecord {
        sender_type: sender.role,
        sender_id: sender.id,
        receiver_type: receiver.role,
        receiver_id: receiver.id,
        message: body.into(),
        timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, sec).unwrap(),
        id: None,
        is_read: None,
        temp_id: None,
    }
}

fn test_config(addr: std::net::SocketAddr) -> SessionConfig {
    SessionConfig {
        gateway_url: format!("ws://{addr}/ws"),
        api_base_url: format!("http://{addr}"),
        connect_timeout: Duration::from_secs(5),
        request_timeout: Duration::from_secs(5),
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
async fn selecting_a_contact_backfills_ordered_history() {
    let (addr, server, state) = venturechat_gateway::gateway::start_server("127.0.0.1:0")
        .await
        .unwrap();

    // Seed an existing conversation plus an unrelated one.
    state.store.append(record(dev(5), ent(9), "pitch?", 10)).await;
    state.store.append(record(ent(9), dev(5), "sure, tomorrow", 20)).await;
    state.store.append(record(dev(6), ent(9), "noise", 15)).await;

    let (mut session, mut rx) = connect(dev(5), addr).await;
    assert_eq!(session.messages(ent(9)).len(), 0);

    session.select_contact(ent(9));
    wait_for(&mut rx, |e| {
        matches!(e, SessionEvent::ConversationUpdated(c) if *c == ent(9))
    })
    .await;

    let messages = session.messages(ent(9));
    let bodies: Vec<_> = messages.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, ["pitch?", "sure, tomorrow"]);
    assert!(messages[0].outgoing);
    assert!(!messages[1].outgoing);
    assert!(messages.iter().all(|m| m.server_id.is_some()));

    session.shutdown().await;
    server.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn live_message_is_not_duplicated_by_a_later_backfill() {
    let (addr, server, _state) = venturechat_gateway::gateway::start_server("127.0.0.1:0")
        .await
        .unwrap();

    let (receiver, mut receiver_rx) = connect(dev(5), addr).await;
    let (mut sender, mut sender_rx) = connect(ent(9), addr).await;
    sender.select_contact(dev(5));
    wait_for(&mut sender_rx, |e| {
        matches!(e, SessionEvent::ConversationUpdated(c) if *c == dev(5))
    })
    .await;

    // The message arrives live before the developer ever opens the thread.
    sender.send("are you around?").await.unwrap();
    wait_for(&mut receiver_rx, |e| {
        matches!(e, SessionEvent::ConversationUpdated(c) if *c == ent(9))
    })
    .await;
    assert_eq!(receiver.unread(ent(9)), 1);

    // Opening the thread triggers the backfill, which contains the same
    // record; the merge must not duplicate it.
    let mut receiver = receiver;
    receiver.select_contact(ent(9));
    wait_for(&mut receiver_rx, |e| {
        matches!(e, SessionEvent::ConversationUpdated(c) if *c == ent(9))
    })
    .await;

    let messages = receiver.messages(ent(9));
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].body, "are you around?");
    assert_eq!(receiver.unread(ent(9)), 0);

    sender.shutdown().await;
    receiver.shutdown().await;
    server.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn entrepreneur_sees_named_developer_contacts() {
    let (addr, server, state) = venturechat_gateway::gateway::start_server("127.0.0.1:0")
        .await
        .unwrap();

    state.store.append(record(dev(6), ent(9), "hi", 0)).await;
    state.store.append(record(dev(5), ent(9), "hello", 1)).await;
    state.store.append(record(ent(9), dev(6), "hey", 2)).await;

    let (session, _rx) = connect(ent(9), addr).await;
    let contacts = session.contacts().await.unwrap();

    assert_eq!(contacts.len(), 2);
    assert_eq!(contacts[0].identity, dev(6));
    assert_eq!(contacts[0].display_name.as_deref(), Some("Developer 6"));
    assert_eq!(contacts[1].identity, dev(5));

    session.shutdown().await;
    server.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn developer_sees_entrepreneur_ids_without_names() {
    let (addr, server, state) = venturechat_gateway::gateway::start_server("127.0.0.1:0")
        .await
        .unwrap();

    state.store.append(record(dev(5), ent(9), "a", 0)).await;
    state.store.append(record(dev(5), ent(12), "b", 1)).await;
    state.store.append(record(ent(9), dev(5), "c", 2)).await;

    let (mut session, mut rx) = connect(dev(5), addr).await;
    let contacts = session.contacts().await.unwrap();

    assert_eq!(contacts.len(), 2);
    assert_eq!(contacts[0].identity, ent(9));
    assert!(contacts[0].display_name.is_none());
    assert_eq!(contacts[1].identity, ent(12));

    // The first directory entry is the conventional default selection.
    let first = session.select_first_contact().await.unwrap().unwrap();
    assert_eq!(first.identity, ent(9));
    assert_eq!(session.active_contact(), Some(ent(9)));
    wait_for(&mut rx, |e| {
        matches!(e, SessionEvent::ConversationUpdated(c) if *c == ent(9))
    })
    .await;
    assert_eq!(session.messages(ent(9)).len(), 2);

    session.shutdown().await;
    server.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn backfill_finishing_after_a_switch_lands_in_its_own_conversation() {
    let (addr, server, state) = venturechat_gateway::gateway::start_server("127.0.0.1:0")
        .await
        .unwrap();
    state.store.append(record(dev(5), ent(9), "for nine", 0)).await;
    state.store.append(record(dev(5), ent(12), "for twelve", 0)).await;

    let (mut session, mut rx) = connect(dev(5), addr).await;

    // Switch away immediately; the first fetch may well resolve after
    // the second selection.
    session.select_contact(ent(9));
    session.select_contact(ent(12));
    assert_eq!(session.active_contact(), Some(ent(12)));

    let mut seen = std::collections::HashSet::new();
    while seen.len() < 2 {
        if let SessionEvent::ConversationUpdated(c) =
            wait_for(&mut rx, |e| matches!(e, SessionEvent::ConversationUpdated(_))).await
        {
            seen.insert(c);
        }
    }

    // Each backfill ended up in its own thread, and the active one only
    // holds its own messages.
    assert_eq!(session.messages(ent(9)).len(), 1);
    assert_eq!(session.messages(ent(9))[0].body, "for nine");
    assert_eq!(session.messages(ent(12)).len(), 1);
    assert_eq!(session.messages(ent(12))[0].body, "for twelve");

    session.shutdown().await;
    server.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_backfill_is_retried_on_reselect() {
    let (addr, server, state) = venturechat_gateway::gateway::start_server("127.0.0.1:0")
        .await
        .unwrap();
    state.store.append(record(dev(5), ent(9), "kept", 0)).await;

    // Point the REST side at a dead port while keeping the WebSocket up.
    let mut config = test_config(addr);
    config.api_base_url = "http://127.0.0.1:9".into();
    config.request_timeout = Duration::from_millis(500);
    let (mut session, mut rx) = ChatSession::connect(dev(5), config).unwrap();
    wait_for(&mut rx, |e| matches!(e, SessionEvent::Connected { .. })).await;

    session.select_contact(ent(9));
    wait_for(&mut rx, |e| {
        matches!(e, SessionEvent::HistoryFailed { counterpart } if *counterpart == ent(9))
    })
    .await;
    assert!(session.messages(ent(9)).is_empty());

    // Re-selecting after a failure re-runs the fetch instead of staying
    // stuck in the failed state.
    session.select_contact(ent(9));
    wait_for(&mut rx, |e| {
        matches!(e, SessionEvent::HistoryFailed { counterpart } if *counterpart == ent(9))
    })
    .await;
    session.shutdown().await;

    // A fresh session with a working API base recovers on selection.
    let (mut session, mut rx) = connect(dev(5), addr).await;
    session.select_contact(ent(9));
    wait_for(&mut rx, |e| {
        matches!(e, SessionEvent::ConversationUpdated(c) if *c == ent(9))
    })
    .await;
    assert_eq!(session.messages(ent(9)).len(), 1);

    session.shutdown().await;
    server.abort();
}
