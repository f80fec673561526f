//! Session coordinator.
//!
//! [`ChatSession`] is the single object an embedding frontend drives. It
//! owns the conversation store, presence tracker, typing debouncer, REST
//! client, and the transport channels, runs the inbound event loop in a
//! background task, and surfaces state changes as [`SessionEvent`]s.
//!
//! Routing rules for inbound traffic: messages for the active counterpart
//! update the thread directly; messages for anyone else bump that
//! conversation's unread counter; typing indicators are only surfaced for
//! the active counterpart; presence applies globally; delivery acks
//! reconcile whichever conversation the send originated from, active or
//! not.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use venturechat_proto::event::TypingSignal;
use venturechat_proto::identity::Identity;
use venturechat_proto::record::{MAX_BODY_LEN, MessageRecord};

use crate::api::contacts::Contact;
use crate::api::{ApiClient, FetchError};
use crate::config::SessionConfig;
use crate::convo::{ChatMessage, ConversationStore, LoadState};
use crate::presence::PresenceTracker;
use crate::transport::{self, TransportCommand, TransportConfig, TransportEvent};
use crate::typing::{TypingDebouncer, TypingEmit};

/// Errors surfaced directly to the embedding frontend.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The REST client could not be constructed or a fetch failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The message body exceeds the wire limit.
    #[error("message too long: {len} bytes (max {max})")]
    MessageTooLong {
        /// Actual body length in bytes.
        len: usize,
        /// Maximum allowed length.
        max: usize,
    },

    /// The session has been shut down; its channels are closed.
    #[error("session closed")]
    Closed,
}

/// State-change notifications for a presentation layer.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The gateway connection is up.
    Connected {
        /// `true` when this follows an earlier connection this session.
        reconnect: bool,
    },
    /// The gateway connection dropped; reconnecting in the background.
    Disconnected,
    /// Messages, delivery states, or history changed for a conversation.
    ConversationUpdated(Identity),
    /// A user's presence changed.
    PresenceChanged {
        /// The affected user.
        identity: Identity,
        /// Their new presence.
        online: bool,
    },
    /// The active counterpart started or stopped typing.
    TypingChanged {
        /// The typing counterpart.
        counterpart: Identity,
        /// Whether they are typing now.
        is_typing: bool,
    },
    /// A history backfill failed; the conversation may be retried by
    /// selecting it again.
    HistoryFailed {
        /// The conversation whose fetch failed.
        counterpart: Identity,
    },
}

/// A live chat session for one local user.
pub struct ChatSession {
    me: Identity,
    config: SessionConfig,
    store: Arc<ConversationStore>,
    presence: Arc<PresenceTracker>,
    api: ApiClient,
    cmd_tx: mpsc::Sender<TransportCommand>,
    session_tx: mpsc::Sender<SessionEvent>,
    active: Arc<Mutex<Option<Identity>>>,
    pending_routes: Arc<Mutex<HashMap<String, Identity>>>,
    debouncer: TypingDebouncer,
    transport_handle: JoinHandle<()>,
    router_handle: JoinHandle<()>,
    typing_pump_handle: JoinHandle<()>,
}

impl ChatSession {
    /// Starts a session: spawns the transport supervisor, the event
    /// router, and the typing pump. Returns the session handle and the
    /// receiver the frontend drains for [`SessionEvent`]s.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Fetch`] if the REST client cannot be built.
    pub fn connect(
        me: Identity,
        config: SessionConfig,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>), SessionError> {
        let api = ApiClient::new(
            config.api_base_url.clone(),
            config.auth_token.clone(),
            config.request_timeout,
        )?;

        let (cmd_tx, transport_rx, transport_handle) = transport::spawn(TransportConfig {
            gateway_url: config.gateway_url.clone(),
            auth_token: config.auth_token.clone(),
            identity: me,
            connect_timeout: config.connect_timeout,
            channel_capacity: config.channel_capacity,
            backoff_initial: config.backoff_initial,
            backoff_max: config.backoff_max,
        });

        let (session_tx, session_rx) = mpsc::channel(config.channel_capacity);
        let store = Arc::new(ConversationStore::new(me));
        let presence = Arc::new(PresenceTracker::new());
        let active = Arc::new(Mutex::new(None));
        let pending_routes = Arc::new(Mutex::new(HashMap::new()));

        let router = Router {
            store: Arc::clone(&store),
            presence: Arc::clone(&presence),
            active: Arc::clone(&active),
            pending_routes: Arc::clone(&pending_routes),
            session_tx: session_tx.clone(),
        };
        let router_handle = tokio::spawn(router.run(transport_rx));

        let (typing_tx, typing_rx) = mpsc::channel(config.channel_capacity);
        let debouncer = TypingDebouncer::new(config.typing_quiet_period, typing_tx);
        let typing_pump_handle = tokio::spawn(pump_typing(me, typing_rx, cmd_tx.clone()));

        Ok((
            Self {
                me,
                config,
                store,
                presence,
                api,
                cmd_tx,
                session_tx,
                active,
                pending_routes,
                debouncer,
                transport_handle,
                router_handle,
                typing_pump_handle,
            },
            session_rx,
        ))
    }

    /// The local user's identity.
    #[must_use]
    pub const fn me(&self) -> Identity {
        self.me
    }

    /// Fetches the contact directory for the local user.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Fetch`] on HTTP failure.
    pub async fn contacts(&self) -> Result<Vec<Contact>, SessionError> {
        Ok(self.api.contacts(self.me).await?)
    }

    /// Makes `counterpart` the active conversation.
    ///
    /// Clears its unread counter and, if its history has never loaded (or
    /// last failed), kicks off a backfill in the background. A fetch that
    /// resolves after another counterpart was selected still merges into
    /// its own conversation and never touches the newly active one.
    pub fn select_contact(&mut self, counterpart: Identity) {
        let previous = self.active.lock().replace(counterpart);
        if previous != Some(counterpart) {
            self.debouncer.abort_timer();
        }
        self.store.clear_unread(counterpart);

        match self.store.load_state(counterpart) {
            LoadState::NotLoaded | LoadState::Failed => {
                self.store.set_load_state(counterpart, LoadState::Loading);
                self.spawn_history_fetch(counterpart);
            }
            LoadState::Loading | LoadState::Loaded => {}
        }
    }

    /// Fetches the contact directory and selects the first entry, the
    /// usual opening move of a frontend. Returns the selected contact.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Fetch`] on HTTP failure.
    pub async fn select_first_contact(&mut self) -> Result<Option<Contact>, SessionError> {
        let contacts = self.contacts().await?;
        let Some(first) = contacts.into_iter().next() else {
            return Ok(None);
        };
        self.select_contact(first.identity);
        Ok(Some(first))
    }

    fn spawn_history_fetch(&self, counterpart: Identity) {
        let api = self.api.clone();
        let store = Arc::clone(&self.store);
        let session_tx = self.session_tx.clone();
        let me = self.me;
        tokio::spawn(async move {
            match api.message_history(me, counterpart).await {
                Ok(records) => {
                    store.merge_history(counterpart, &records);
                    let _ = session_tx
                        .send(SessionEvent::ConversationUpdated(counterpart))
                        .await;
                }
                Err(err) => {
                    warn!(counterpart = %counterpart, err = %err, "history backfill failed");
                    store.set_load_state(counterpart, LoadState::Failed);
                    let _ = session_tx
                        .send(SessionEvent::HistoryFailed { counterpart })
                        .await;
                }
            }
        });
    }

    /// Sends a message to the active counterpart.
    ///
    /// The body is trimmed first; an empty result or no active counterpart
    /// is a silent no-op (`Ok(None)`). The message is appended as pending
    /// immediately, transmitted, and armed with an ack timeout that marks
    /// it failed if no `messageDelivered` reconciles it first.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MessageTooLong`] for oversized bodies and
    /// [`SessionError::Closed`] after shutdown.
    pub async fn send(&mut self, body: &str) -> Result<Option<ChatMessage>, SessionError> {
        let Some(counterpart) = *self.active.lock() else {
            return Ok(None);
        };
        let body = body.trim();
        if body.is_empty() {
            return Ok(None);
        }
        if body.len() > MAX_BODY_LEN {
            return Err(SessionError::MessageTooLong {
                len: body.len(),
                max: MAX_BODY_LEN,
            });
        }

        let msg = self
            .store
            .append_outgoing(counterpart, body.to_string(), Utc::now());
        self.pending_routes
            .lock()
            .insert(msg.local_id.clone(), counterpart);

        self.transmit(counterpart, &msg).await?;
        // The composer is empty now; stop the typing indicator right away.
        self.debouncer.stop_now().await;
        Ok(Some(msg))
    }

    /// Retries a failed message, keeping its local id so a late ack for
    /// the original transmission still reconciles it.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] after shutdown.
    pub async fn retry(&self, counterpart: Identity, local_id: &str) -> Result<(), SessionError> {
        let Some(msg) = self.store.mark_retrying(counterpart, local_id) else {
            debug!(local_id, "retry requested for a message that is not failed");
            return Ok(());
        };
        self.pending_routes
            .lock()
            .insert(msg.local_id.clone(), counterpart);
        self.transmit(counterpart, &msg).await?;
        let _ = self
            .session_tx
            .send(SessionEvent::ConversationUpdated(counterpart))
            .await;
        Ok(())
    }

    async fn transmit(
        &self,
        counterpart: Identity,
        msg: &ChatMessage,
    ) -> Result<(), SessionError> {
        let record = MessageRecord {
            sender_type: self.me.role,
            sender_id: self.me.id,
            receiver_type: counterpart.role,
            receiver_id: counterpart.id,
            message: msg.body.clone(),
            timestamp: msg.timestamp,
            id: None,
            is_read: None,
            temp_id: Some(msg.local_id.clone()),
        };
        self.cmd_tx
            .send(TransportCommand::Send(record))
            .await
            .map_err(|_| SessionError::Closed)?;
        self.arm_ack_timeout(counterpart, msg.local_id.clone());
        Ok(())
    }

    fn arm_ack_timeout(&self, counterpart: Identity, local_id: String) {
        spawn_ack_timeout(
            Arc::clone(&self.store),
            Arc::clone(&self.pending_routes),
            self.session_tx.clone(),
            self.config.ack_timeout,
            counterpart,
            local_id,
        );
    }

    /// Registers a keystroke in the composer; debounced typing signals go
    /// to the active counterpart.
    pub async fn on_input(&mut self) {
        let active = *self.active.lock();
        if let Some(counterpart) = active {
            self.debouncer.on_input(counterpart).await;
        }
    }

    /// Ordered snapshot of a conversation.
    #[must_use]
    pub fn messages(&self, counterpart: Identity) -> Vec<ChatMessage> {
        self.store.messages(counterpart)
    }

    /// Unread count for a conversation.
    #[must_use]
    pub fn unread(&self, counterpart: Identity) -> u32 {
        self.store.unread_count(counterpart)
    }

    /// Whether a user is currently online.
    #[must_use]
    pub fn is_online(&self, identity: Identity) -> bool {
        self.presence.is_online(identity)
    }

    /// Whether a counterpart is currently typing.
    #[must_use]
    pub fn is_typing(&self, counterpart: Identity) -> bool {
        self.store.is_typing(counterpart)
    }

    /// The currently selected counterpart, if any.
    #[must_use]
    pub fn active_contact(&self) -> Option<Identity> {
        *self.active.lock()
    }

    /// Shuts the session down: closes the gateway connection and waits
    /// for the background tasks to exit.
    pub async fn shutdown(mut self) {
        self.debouncer.abort_timer();
        let _ = self.cmd_tx.send(TransportCommand::Shutdown).await;
        let _ = self.transport_handle.await;
        // The router exits once the transport event channel closes.
        let _ = self.router_handle.await;
        self.typing_pump_handle.abort();
    }
}

/// Arms the pending-to-failed transition for one transmission.
/// `mark_failed` only fires while the message is still pending, so an
/// ack that arrives before the timer wins the race. A message that does
/// fail also gives up its ack route; `retry` re-registers it.
fn spawn_ack_timeout(
    store: Arc<ConversationStore>,
    pending_routes: Arc<Mutex<HashMap<String, Identity>>>,
    session_tx: mpsc::Sender<SessionEvent>,
    timeout: Duration,
    counterpart: Identity,
    local_id: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        if store.mark_failed(counterpart, &local_id) {
            warn!(local_id, "no delivery ack within timeout, marking failed");
            pending_routes.lock().remove(&local_id);
            let _ = session_tx
                .send(SessionEvent::ConversationUpdated(counterpart))
                .await;
        }
    })
}

/// Forwards debounced typing emissions as `typing` frames.
async fn pump_typing(
    me: Identity,
    mut typing_rx: mpsc::Receiver<TypingEmit>,
    cmd_tx: mpsc::Sender<TransportCommand>,
) {
    while let Some(emit) = typing_rx.recv().await {
        let signal = TypingSignal::new(me, emit.counterpart, emit.is_typing);
        if cmd_tx.send(TransportCommand::Typing(signal)).await.is_err() {
            return;
        }
    }
}

/// Inbound event router, extracted from the session so the routing rules
/// are testable without a live socket.
struct Router {
    store: Arc<ConversationStore>,
    presence: Arc<PresenceTracker>,
    active: Arc<Mutex<Option<Identity>>>,
    pending_routes: Arc<Mutex<HashMap<String, Identity>>>,
    session_tx: mpsc::Sender<SessionEvent>,
}

impl Router {
    async fn run(self, mut transport_rx: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = transport_rx.recv().await {
            if !self.handle(event).await {
                return;
            }
        }
    }

    /// Applies one transport event; returns `false` once the frontend has
    /// dropped its event receiver.
    async fn handle(&self, event: TransportEvent) -> bool {
        match event {
            TransportEvent::Connected { reconnect } => {
                self.emit(SessionEvent::Connected { reconnect }).await
            }
            TransportEvent::Disconnected => {
                // Presence is server state; the snapshot after the next
                // join rebuilds it.
                self.presence.reset();
                self.emit(SessionEvent::Disconnected).await
            }
            TransportEvent::Message(record) => {
                let Some(counterpart) = self.store.append_live(&record) else {
                    debug!("dropping message not addressed to this user");
                    return true;
                };
                if *self.active.lock() != Some(counterpart) {
                    self.store.note_unread(counterpart);
                }
                self.emit(SessionEvent::ConversationUpdated(counterpart))
                    .await
            }
            TransportEvent::Typing(notice) => {
                let counterpart = notice.sender();
                self.store.set_typing(counterpart, notice.is_typing);
                if *self.active.lock() == Some(counterpart) {
                    return self
                        .emit(SessionEvent::TypingChanged {
                            counterpart,
                            is_typing: notice.is_typing,
                        })
                        .await;
                }
                true
            }
            TransportEvent::Presence(notice) => {
                let identity = self.presence.apply(&notice);
                self.emit(SessionEvent::PresenceChanged {
                    identity,
                    online: notice.online,
                })
                .await
            }
            TransportEvent::Delivered(ack) => {
                let route = self.pending_routes.lock().remove(&ack.temp_id);
                let Some(counterpart) = route else {
                    debug!(temp_id = %ack.temp_id, "ack without a pending route");
                    return true;
                };
                if self.store.confirm_delivery(counterpart, &ack.temp_id, ack.id) {
                    return self
                        .emit(SessionEvent::ConversationUpdated(counterpart))
                        .await;
                }
                true
            }
            TransportEvent::SendFailed { temp_id } => {
                let Some(temp_id) = temp_id else { return true };
                let route = self.pending_routes.lock().get(&temp_id).copied();
                let Some(counterpart) = route else { return true };
                if self.store.mark_failed(counterpart, &temp_id) {
                    // A failed message holds no route; retry re-registers it.
                    self.pending_routes.lock().remove(&temp_id);
                    return self
                        .emit(SessionEvent::ConversationUpdated(counterpart))
                        .await;
                }
                true
            }
        }
    }

    async fn emit(&self, event: SessionEvent) -> bool {
        self.session_tx.send(event).await.is_ok()
    }
}
