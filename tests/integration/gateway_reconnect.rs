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

//! Reconnect behavior tests: backoff reconnect with re-join, presence
//! rebuild from the replayed snapshot, and fail-fast sends while the
//! connection is down.

use std::time::Duration;

use tokio::sync::mpsc;

use venturechat::config::SessionConfig;
use venturechat::convo::Delivery;
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
        backoff_initial: Duration::from_millis(100),
        backoff_max: Duration::from_millis(500),
        ack_timeout: Duration::from_secs(2),
        ..SessionConfig::default()
    }
}

async fn wait_for(
    rx: &mut mpsc::Receiver<SessionEvent>,
    mut pred: impl FnMut(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(10), async {
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

#[tokio::test(flavor = "multi_thread")]
async fn client_reconnects_and_rejoins_after_close() {
    let (addr, server, state) = venturechat_gateway::gateway::start_server("127.0.0.1:0")
        .await
        .unwrap();

    let (session, mut rx) = ChatSession::connect(dev(5), test_config(addr)).unwrap();
    let first = wait_for(&mut rx, |e| matches!(e, SessionEvent::Connected { .. })).await;
    assert!(matches!(first, SessionEvent::Connected { reconnect: false }));

    state.close_all_connections().await;

    wait_for(&mut rx, |e| matches!(e, SessionEvent::Disconnected)).await;
    let again = wait_for(&mut rx, |e| matches!(e, SessionEvent::Connected { .. })).await;
    assert!(matches!(again, SessionEvent::Connected { reconnect: true }));

    // The re-join re-registered the identity with the gateway.
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if state.online_identities().await.contains(&dev(5)) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("identity never re-registered");

    session.shutdown().await;
    server.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn presence_resets_on_disconnect_and_rebuilds_from_snapshot() {
    let (addr, server, state) = venturechat_gateway::gateway::start_server("127.0.0.1:0")
        .await
        .unwrap();

    let (dev_session, mut dev_rx) = ChatSession::connect(dev(5), test_config(addr)).unwrap();
    wait_for(&mut dev_rx, |e| matches!(e, SessionEvent::Connected { .. })).await;

    let (ent_session, mut ent_rx) = ChatSession::connect(ent(9), test_config(addr)).unwrap();
    wait_for(&mut ent_rx, |e| matches!(e, SessionEvent::Connected { .. })).await;
    wait_for(&mut dev_rx, |e| {
        matches!(e, SessionEvent::PresenceChanged { online: true, .. })
    })
    .await;
    assert!(dev_session.is_online(ent(9)));

    state.close_all_connections().await;

    // While down, nobody is considered online.
    wait_for(&mut dev_rx, |e| matches!(e, SessionEvent::Disconnected)).await;
    assert!(!dev_session.is_online(ent(9)));

    // After both clients re-join, the snapshot restores the presence view.
    wait_for(&mut dev_rx, |e| {
        matches!(e, SessionEvent::Connected { reconnect: true })
    })
    .await;
    wait_for(&mut dev_rx, |e| {
        matches!(
            e,
            SessionEvent::PresenceChanged { identity, online: true } if *identity == ent(9)
        )
    })
    .await;
    assert!(dev_session.is_online(ent(9)));

    dev_session.shutdown().await;
    ent_session.shutdown().await;
    server.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn retry_after_reconnect_delivers_the_message() {
    let (addr, server, state) = venturechat_gateway::gateway::start_server("127.0.0.1:0")
        .await
        .unwrap();

    let (mut session, mut rx) = ChatSession::connect(dev(5), test_config(addr)).unwrap();
    wait_for(&mut rx, |e| matches!(e, SessionEvent::Connected { .. })).await;
    session.select_contact(ent(9));
    wait_for(&mut rx, |e| {
        matches!(e, SessionEvent::ConversationUpdated(c) if *c == ent(9))
    })
    .await;

    // Bring the gateway down and let the send fail locally.
    server.abort();
    state.close_all_connections().await;
    wait_for(&mut rx, |e| matches!(e, SessionEvent::Disconnected)).await;
    let msg = session.send("second try incoming").await.unwrap().unwrap();
    wait_for(&mut rx, |e| {
        matches!(e, SessionEvent::ConversationUpdated(c) if *c == ent(9))
    })
    .await;
    assert_eq!(session.messages(ent(9))[0].delivery, Delivery::Failed);

    // Revive the gateway on the same port; the client reconnects on its
    // own and the retry goes through.
    let (_addr2, server2, _state2) =
        venturechat_gateway::gateway::start_server(&addr.to_string())
            .await
            .unwrap();
    wait_for(&mut rx, |e| {
        matches!(e, SessionEvent::Connected { reconnect: true })
    })
    .await;

    session.retry(ent(9), &msg.local_id).await.unwrap();
    wait_for(&mut rx, |e| {
        matches!(e, SessionEvent::ConversationUpdated(c) if *c == ent(9))
    })
    .await;
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let stored = session.messages(ent(9));
            if stored[0].delivery == Delivery::Confirmed {
                assert!(stored[0].server_id.is_some());
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("retried message never confirmed");

    session.shutdown().await;
    server2.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn send_while_disconnected_fails_locally() {
    let (addr, server, state) = venturechat_gateway::gateway::start_server("127.0.0.1:0")
        .await
        .unwrap();

    let (mut session, mut rx) = ChatSession::connect(dev(5), test_config(addr)).unwrap();
    wait_for(&mut rx, |e| matches!(e, SessionEvent::Connected { .. })).await;
    session.select_contact(ent(9));
    wait_for(&mut rx, |e| {
        matches!(e, SessionEvent::ConversationUpdated(c) if *c == ent(9))
    })
    .await;

    // Take the gateway down for good.
    server.abort();
    state.close_all_connections().await;
    wait_for(&mut rx, |e| matches!(e, SessionEvent::Disconnected)).await;

    let msg = session.send("anyone there?").await.unwrap().unwrap();
    assert_eq!(msg.delivery, Delivery::Pending);

    // The transport answers with a local failure instead of queueing.
    wait_for(&mut rx, |e| {
        matches!(e, SessionEvent::ConversationUpdated(c) if *c == ent(9))
    })
    .await;
    let stored = session.messages(ent(9));
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].delivery, Delivery::Failed);
    assert!(stored[0].server_id.is_none());

    session.shutdown().await;
}
