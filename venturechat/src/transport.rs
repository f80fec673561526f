//! Realtime WebSocket transport.
//!
//! One physical connection per session, owned by a supervisor task that
//! the rest of the client talks to over channels:
//!
//! ```text
//! session  ─── TransportCommand →  supervisor task ⇄ gateway WebSocket
//!          ←── TransportEvent ───
//! ```
//!
//! The supervisor connects with a bearer token on the upgrade request,
//! sends `join` immediately after the handshake, then pumps frames until
//! the socket drops. On a drop it reconnects with exponential backoff and
//! re-joins; commands arriving while disconnected are answered with
//! [`TransportEvent::SendFailed`] instead of being queued, so the caller
//! can mark the message failed right away. Teardown is explicit via
//! [`TransportCommand::Shutdown`].

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use venturechat_proto::event::{
    ClientEvent, DeliveryAck, PresenceNotice, ServerEvent, TypingNotice, TypingSignal,
    decode_server, encode_client,
};
use venturechat_proto::identity::Identity;
use venturechat_proto::record::MessageRecord;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Errors from establishing or using the gateway connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The gateway URL could not be turned into a handshake request.
    #[error("invalid gateway url: {0}")]
    BadUrl(String),

    /// The connect handshake did not complete in time.
    #[error("gateway connect timed out")]
    Timeout,

    /// The WebSocket handshake failed.
    #[error("gateway connect failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),

    /// Encoding an outbound frame failed.
    #[error(transparent)]
    Codec(#[from] venturechat_proto::event::CodecError),
}

/// Commands from the session into the supervisor.
#[derive(Debug)]
pub enum TransportCommand {
    /// Transmit a `sendMessage` frame.
    Send(MessageRecord),
    /// Transmit a `typing` frame.
    Typing(TypingSignal),
    /// Close the connection and exit the supervisor.
    Shutdown,
}

/// Events from the supervisor out to the session.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The connection is up and `join` has been sent.
    Connected {
        /// `true` if a previous connection existed this session.
        reconnect: bool,
    },
    /// The connection dropped; a reconnect attempt follows.
    Disconnected,
    /// Inbound `newMessage`.
    Message(MessageRecord),
    /// Inbound `userTyping`.
    Typing(TypingNotice),
    /// Inbound `userOnline`.
    Presence(PresenceNotice),
    /// Inbound `messageDelivered`.
    Delivered(DeliveryAck),
    /// A send could not be transmitted; the message should be marked
    /// failed locally.
    SendFailed {
        /// `tempId` of the record that failed, when it carried one.
        temp_id: Option<String>,
    },
}

/// Connection parameters for the supervisor.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Gateway WebSocket URL.
    pub gateway_url: String,
    /// Bearer token for the upgrade request.
    pub auth_token: Option<String>,
    /// Identity announced in the `join` frame.
    pub identity: Identity,
    /// Handshake timeout.
    pub connect_timeout: Duration,
    /// Command/event channel capacity.
    pub channel_capacity: usize,
    /// First reconnect delay.
    pub backoff_initial: Duration,
    /// Reconnect delay cap.
    pub backoff_max: Duration,
}

/// Spawns the supervisor task and returns its channel endpoints.
#[must_use]
pub fn spawn(
    config: TransportConfig,
) -> (
    mpsc::Sender<TransportCommand>,
    mpsc::Receiver<TransportEvent>,
    tokio::task::JoinHandle<()>,
) {
    let (cmd_tx, cmd_rx) = mpsc::channel(config.channel_capacity);
    let (event_tx, event_rx) = mpsc::channel(config.channel_capacity);
    let handle = tokio::spawn(supervise(config, cmd_rx, event_tx));
    (cmd_tx, event_rx, handle)
}

/// Why a live connection ended.
enum ConnectionExit {
    /// Shutdown command received; the supervisor must stop.
    Shutdown,
    /// The socket dropped or errored; reconnect.
    Dropped,
}

async fn supervise(
    config: TransportConfig,
    mut cmd_rx: mpsc::Receiver<TransportCommand>,
    event_tx: mpsc::Sender<TransportEvent>,
) {
    let mut attempt: u32 = 0;
    let mut ever_connected = false;

    loop {
        match connect_once(&config).await {
            Ok(ws) => {
                attempt = 0;
                info!(url = %config.gateway_url, reconnect = ever_connected, "gateway connected");
                if event_tx
                    .send(TransportEvent::Connected {
                        reconnect: ever_connected,
                    })
                    .await
                    .is_err()
                {
                    return;
                }
                ever_connected = true;
                match run_connection(ws, &mut cmd_rx, &event_tx).await {
                    ConnectionExit::Shutdown => return,
                    ConnectionExit::Dropped => {
                        if event_tx.send(TransportEvent::Disconnected).await.is_err() {
                            return;
                        }
                    }
                }
            }
            Err(err) => {
                warn!(url = %config.gateway_url, err = %err, "gateway connect failed");
            }
        }

        let delay = backoff_delay(attempt, config.backoff_initial, config.backoff_max);
        attempt = attempt.saturating_add(1);
        debug!(?delay, attempt, "waiting before reconnect");
        if let ConnectionExit::Shutdown = wait_backoff(delay, &mut cmd_rx, &event_tx).await {
            return;
        }
    }
}

/// Connects, authenticates, and sends the `join` frame.
async fn connect_once(config: &TransportConfig) -> Result<WsStream, TransportError> {
    let url = url::Url::parse(&config.gateway_url)
        .map_err(|_| TransportError::BadUrl(config.gateway_url.clone()))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(TransportError::BadUrl(config.gateway_url.clone()));
    }
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|_| TransportError::BadUrl(config.gateway_url.clone()))?;
    if let Some(token) = &config.auth_token {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| TransportError::BadUrl(config.gateway_url.clone()))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    let (mut ws, _response) = tokio::time::timeout(config.connect_timeout, connect_async(request))
        .await
        .map_err(|_| TransportError::Timeout)??;

    let join = encode_client(&ClientEvent::Join(config.identity))?;
    ws.send(Message::Text(join.into())).await?;
    Ok(ws)
}

/// Pumps commands and frames until shutdown or a socket drop.
async fn run_connection(
    mut ws: WsStream,
    cmd_rx: &mut mpsc::Receiver<TransportCommand>,
    event_tx: &mpsc::Sender<TransportEvent>,
) -> ConnectionExit {
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(TransportCommand::Send(record)) => {
                    let temp_id = record.temp_id.clone();
                    if let Err(err) = send_frame(&mut ws, &ClientEvent::SendMessage(record)).await {
                        warn!(err = %err, "sendMessage transmit failed");
                        let _ = event_tx.send(TransportEvent::SendFailed { temp_id }).await;
                        return ConnectionExit::Dropped;
                    }
                }
                Some(TransportCommand::Typing(signal)) => {
                    // Typing signals are best-effort; a lost one only
                    // delays the indicator.
                    if let Err(err) = send_frame(&mut ws, &ClientEvent::Typing(signal)).await {
                        warn!(err = %err, "typing transmit failed");
                        return ConnectionExit::Dropped;
                    }
                }
                Some(TransportCommand::Shutdown) | None => {
                    let _ = ws.close(None).await;
                    return ConnectionExit::Shutdown;
                }
            },
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match decode_server(text.as_str()) {
                        Ok(event) => {
                            if dispatch(event, event_tx).await.is_err() {
                                return ConnectionExit::Shutdown;
                            }
                        }
                        Err(err) => {
                            // Unknown events are skipped, not fatal, so the
                            // gateway can grow its vocabulary.
                            debug!(err = %err, "ignoring undecodable frame");
                        }
                    }
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    debug!("gateway closed the connection");
                    return ConnectionExit::Dropped;
                }
                Some(Err(err)) => {
                    warn!(err = %err, "gateway read error");
                    return ConnectionExit::Dropped;
                }
            },
        }
    }
}

async fn send_frame(ws: &mut WsStream, event: &ClientEvent) -> Result<(), TransportError> {
    let frame = encode_client(event)?;
    ws.send(Message::Text(frame.into())).await?;
    Ok(())
}

async fn dispatch(event: ServerEvent, event_tx: &mpsc::Sender<TransportEvent>) -> Result<(), ()> {
    let out = match event {
        ServerEvent::NewMessage(record) => TransportEvent::Message(record),
        ServerEvent::UserTyping(notice) => TransportEvent::Typing(notice),
        ServerEvent::UserOnline(notice) => TransportEvent::Presence(notice),
        ServerEvent::MessageDelivered(ack) => TransportEvent::Delivered(ack),
    };
    event_tx.send(out).await.map_err(|_| ())
}

/// Waits out a backoff delay while still answering commands: sends fail
/// fast instead of queueing, and shutdown aborts the wait.
async fn wait_backoff(
    delay: Duration,
    cmd_rx: &mut mpsc::Receiver<TransportCommand>,
    event_tx: &mpsc::Sender<TransportEvent>,
) -> ConnectionExit {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            () = &mut sleep => return ConnectionExit::Dropped,
            cmd = cmd_rx.recv() => match cmd {
                Some(TransportCommand::Send(record)) => {
                    let _ = event_tx
                        .send(TransportEvent::SendFailed { temp_id: record.temp_id })
                        .await;
                }
                Some(TransportCommand::Typing(_)) => {}
                Some(TransportCommand::Shutdown) | None => return ConnectionExit::Shutdown,
            },
        }
    }
}

/// Exponential backoff: `initial * 2^attempt`, capped at `max`.
fn backoff_delay(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.min(16));
    initial.saturating_mul(factor).min(max)
}
