//! Gateway core: connection registry, WebSocket handler, and routing.
//!
//! Every client connects to `/ws` and must send `join` first. From then
//! on the gateway routes `sendMessage` and `typing` frames to the
//! receiver's connection, persists messages in the [`HistoryStore`], acks
//! senders with `messageDelivered`, and broadcasts `userOnline` presence
//! changes. The REST endpoints serve history backfill and the two contact
//! directories.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, ws::WebSocketUpgrade};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Json;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{RwLock, mpsc};

use venturechat_proto::event::{
    ClientEvent, DeliveryAck, PresenceNotice, ServerEvent, TypingNotice, decode_client,
    encode_server,
};
use venturechat_proto::identity::{Identity, Role};
use venturechat_proto::record::{MAX_BODY_LEN, MessageRecord};

use crate::store::{DeveloperContact, EntrepreneurIdsResponse, HistoryStore};

/// Shared gateway state: who is connected, and everything persisted.
pub struct GatewayState {
    /// Maps a joined identity to the sender half of its writer channel.
    connections: RwLock<HashMap<Identity, mpsc::UnboundedSender<Message>>>,
    /// Message persistence behind the REST endpoints.
    pub store: HistoryStore,
    /// Maximum accepted message body length in bytes.
    max_body_len: usize,
}

impl Default for GatewayState {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayState {
    /// Creates an empty state with the default body limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MAX_BODY_LEN)
    }

    /// Creates an empty state with a custom body limit.
    #[must_use]
    pub fn with_config(max_body_len: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            store: HistoryStore::new(),
            max_body_len,
        }
    }

    /// Registers a connection, returning the previous sender if the same
    /// identity was already connected (the old writer task then closes).
    pub async fn register(
        &self,
        identity: Identity,
        sender: mpsc::UnboundedSender<Message>,
    ) -> Option<mpsc::UnboundedSender<Message>> {
        self.connections.write().await.insert(identity, sender)
    }

    /// Removes a connection from the registry.
    pub async fn unregister(&self, identity: Identity) -> Option<mpsc::UnboundedSender<Message>> {
        self.connections.write().await.remove(&identity)
    }

    /// Sends a frame to one connected user; silently dropped when offline.
    pub async fn send_to(&self, identity: Identity, event: &ServerEvent) {
        let Ok(frame) = encode_server(event) else {
            tracing::error!("failed to encode server event");
            return;
        };
        let conns = self.connections.read().await;
        if let Some(sender) = conns.get(&identity) {
            let _ = sender.send(Message::Text(frame.into()));
        }
    }

    /// Sends a frame to every connection except `skip`.
    pub async fn broadcast_except(&self, skip: Identity, event: &ServerEvent) {
        let Ok(frame) = encode_server(event) else {
            tracing::error!("failed to encode server event");
            return;
        };
        let conns = self.connections.read().await;
        for (identity, sender) in conns.iter() {
            if *identity != skip {
                let _ = sender.send(Message::Text(frame.clone().into()));
            }
        }
    }

    /// Snapshot of everyone currently connected.
    pub async fn online_identities(&self) -> Vec<Identity> {
        let mut out: Vec<Identity> = self.connections.read().await.keys().copied().collect();
        out.sort_unstable();
        out
    }

    /// Sends a close frame to every connection. Used for graceful
    /// shutdown and for exercising client reconnect behavior in tests.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for (identity, sender) in conns.iter() {
            tracing::info!(user = %identity, "sending close frame");
            let _ = sender.send(Message::Close(None));
        }
    }
}

/// Handles one upgraded WebSocket connection.
///
/// Lifecycle: wait for `join`, register, announce presence, replay the
/// online snapshot to the joiner, then route frames until disconnect.
pub async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let Some(identity) = wait_for_join(&mut ws_receiver).await else {
        tracing::warn!("connection closed before join");
        return;
    };
    tracing::info!(user = %identity, "user joining");

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    if state.register(identity, tx).await.is_some() {
        tracing::info!(user = %identity, "replaced existing connection");
    }

    state
        .broadcast_except(
            identity,
            &ServerEvent::UserOnline(PresenceNotice {
                role: identity.role,
                id: identity.id,
                online: true,
            }),
        )
        .await;

    // Replay the online set so a reconnecting client can rebuild its
    // presence view from scratch.
    for online in state.online_identities().await {
        if online == identity {
            continue;
        }
        let event = ServerEvent::UserOnline(PresenceNotice {
            role: online.role,
            id: online.id,
            online: true,
        });
        let Ok(frame) = encode_server(&event) else {
            continue;
        };
        if ws_sender.send(Message::Text(frame.into())).await.is_err() {
            state.unregister(identity).await;
            return;
        }
    }

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let is_close = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() || is_close {
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_frame(identity, text.as_str(), &reader_state).await;
                }
                Message::Close(_) => {
                    tracing::debug!(user = %identity, "received close frame");
                    break;
                }
                Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => write_task.abort(),
        _ = &mut write_task => read_task.abort(),
    }

    state.unregister(identity).await;
    state
        .broadcast_except(
            identity,
            &ServerEvent::UserOnline(PresenceNotice {
                role: identity.role,
                id: identity.id,
                online: false,
            }),
        )
        .await;
    tracing::info!(user = %identity, "user disconnected");
}

/// Waits for the first frame, expecting `join`.
async fn wait_for_join(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<Identity> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match decode_client(text.as_str()) {
                Ok(ClientEvent::Join(identity)) => return Some(identity),
                Ok(other) => {
                    tracing::warn!(event = ?other, "expected join as first frame");
                    return None;
                }
                Err(err) => {
                    tracing::warn!(err = %err, "undecodable frame before join");
                    return None;
                }
            },
            Message::Close(_) => return None,
            Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => {}
        }
    }
    None
}

/// Routes one frame from a joined client.
async fn handle_frame(sender: Identity, frame: &str, state: &Arc<GatewayState>) {
    let event = match decode_client(frame) {
        Ok(event) => event,
        Err(err) => {
            tracing::warn!(user = %sender, err = %err, "undecodable frame");
            return;
        }
    };

    match event {
        ClientEvent::SendMessage(mut record) => {
            if record.message.len() > state.max_body_len {
                tracing::warn!(
                    user = %sender,
                    len = record.message.len(),
                    "dropping oversized message"
                );
                return;
            }
            // The joined identity is authoritative; clients cannot send
            // on someone else's behalf.
            record.sender_type = sender.role;
            record.sender_id = sender.id;

            let temp_id = record.temp_id.take();
            let receiver = record.receiver();
            let persisted = state.store.append(record).await;

            if let (Some(temp_id), Some(id)) = (temp_id, persisted.id) {
                state
                    .send_to(
                        sender,
                        &ServerEvent::MessageDelivered(DeliveryAck { temp_id, id }),
                    )
                    .await;
            }
            state
                .send_to(receiver, &ServerEvent::NewMessage(persisted))
                .await;
        }
        ClientEvent::Typing(signal) => {
            let receiver = Identity::new(signal.receiver_type, signal.receiver_id);
            state
                .send_to(
                    receiver,
                    &ServerEvent::UserTyping(TypingNotice {
                        sender_type: sender.role,
                        sender_id: sender.id,
                        is_typing: signal.is_typing,
                    }),
                )
                .await;
        }
        ClientEvent::Join(_) => {
            tracing::debug!(user = %sender, "ignoring repeated join");
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP surface
// ---------------------------------------------------------------------------

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn messages_handler(
    Path((self_role, self_id, other_role, other_id)): Path<(String, i64, String, i64)>,
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<Vec<MessageRecord>>, StatusCode> {
    let a: Role = self_role.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
    let b: Role = other_role.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
    let records = state
        .store
        .conversation(Identity::new(a, self_id), Identity::new(b, other_id))
        .await;
    Ok(Json(records))
}

#[derive(serde::Deserialize)]
struct DeveloperQuery {
    entrepreneur_id: i64,
}

async fn developers_handler(
    Query(query): Query<DeveloperQuery>,
    State(state): State<Arc<GatewayState>>,
) -> Json<Vec<DeveloperContact>> {
    Json(state.store.developer_contacts(query.entrepreneur_id).await)
}

#[derive(serde::Deserialize)]
struct EntrepreneurQuery {
    developer_id: i64,
}

async fn entrepreneurs_handler(
    Query(query): Query<EntrepreneurQuery>,
    State(state): State<Arc<GatewayState>>,
) -> Json<EntrepreneurIdsResponse> {
    Json(EntrepreneurIdsResponse {
        entrepreneur_ids: state.store.entrepreneur_ids(query.developer_id).await,
    })
}

fn router(state: Arc<GatewayState>) -> axum::Router {
    axum::Router::new()
        .route("/ws", get(ws_handler))
        .route(
            "/messages/{self_role}/{self_id}/{other_role}/{other_id}",
            get(messages_handler),
        )
        .route("/unique-developers", get(developers_handler))
        .route("/unique-entrepreneurs", get(entrepreneurs_handler))
        .with_state(state)
}

/// Starts the gateway with a fresh state.
///
/// Binds the listener before returning, so `addr` may be `127.0.0.1:0`
/// for an OS-assigned port in tests. The returned state handle lets tests
/// inspect the store or force-close connections.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>, Arc<GatewayState>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let state = Arc::new(GatewayState::new());
    let (bound, handle) = start_server_with_state(addr, Arc::clone(&state)).await?;
    Ok((bound, handle, state))
}

/// Starts the gateway with a pre-configured state.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<GatewayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            tracing::error!(err = %err, "gateway server error");
        }
    });

    Ok((bound_addr, handle))
}
