//! WebSocket server: accept loop and per-session task management.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Upgrading each connection to a WebSocket session, refusing it with
//!    `401` if its `?token=` is not a known member.
//! 3. Admitting the session to the [`ServerCore`].
//! 4. Running two halves per session:
//!    - **reader**: text frames from the browser go to the message router.
//!    - **writer**: drains the session's [`OutboundQueue`] as JSON text frames
//!      and its media channel as binary frames, each write bounded by the
//!      configured send timeout.
//! 5. Removing the session from the core when either half ends.
//!
//! # Binary media frames
//!
//! ```text
//! ┌──────────────────┬────────┬───────────────┐
//! │ sequence: u64 BE │ flags  │ encoded bytes │
//! └──────────────────┴────────┴───────────────┘
//!        8 bytes       1 byte     variable
//! ```
//!
//! `flags` bit 0 is set for keyframes.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{Error as WsError, Message as WsMessage},
    WebSocketStream,
};
use tracing::{debug, error, info, warn};

use deskcast_core::protocol::messages::ErrorKind;
use deskcast_core::{encode_server_message, EncodedFrame, ServerMessage, SessionId};

use crate::application::media_bridge::{MediaError, MediaTransport};
use crate::application::outbound::{OutboundQueue, OverflowPolicy, TransportError};
use crate::application::server_core::ServerCore;
use crate::application::session_registry::{RegistryError, SessionTransport};
use crate::infrastructure::members::{token_from_query, Admission, MemberDirectory};
use crate::infrastructure::storage::config::ServerConfig;

/// Media frames buffered between the bridge and the socket writer.
const MEDIA_CHANNEL_FRAMES: usize = 4;

/// Length of the binary media frame header.
pub const MEDIA_HEADER_LEN: usize = 9;

/// Flag bit marking a keyframe in the media header.
pub const FLAG_KEYFRAME: u8 = 0x01;

/// Per-connection settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub outbound_queue: usize,
    pub overflow_policy: OverflowPolicy,
    pub send_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            outbound_queue: 256,
            overflow_policy: OverflowPolicy::DropOldest,
            send_timeout: Duration::from_secs(5),
        }
    }
}

impl ConnectionSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            outbound_queue: config.session.outbound_queue,
            overflow_policy: config.session.overflow_policy,
            send_timeout: config.send_timeout(),
        }
    }
}

// ── Transports ────────────────────────────────────────────────────────────────

/// Control channel of one WebSocket session.
struct WsTransport {
    queue: Arc<OutboundQueue>,
    media: Arc<WsMediaTransport>,
}

impl SessionTransport for WsTransport {
    fn send(&self, message: ServerMessage) -> Result<(), TransportError> {
        self.queue.push(message)
    }

    fn media_channel(&self) -> Option<Arc<dyn MediaTransport>> {
        Some(Arc::clone(&self.media) as Arc<dyn MediaTransport>)
    }

    fn close(&self) {
        self.queue.close();
    }
}

/// Media channel multiplexed on the same WebSocket as binary frames.
struct WsMediaTransport {
    tx: mpsc::Sender<Vec<u8>>,
    send_timeout: Duration,
}

#[async_trait]
impl MediaTransport for WsMediaTransport {
    async fn write_frame(&self, frame: &EncodedFrame) -> Result<(), MediaError> {
        match timeout(self.send_timeout, self.tx.send(encode_media_frame(frame))).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(MediaError::Closed),
            Err(_) => Err(MediaError::Timeout),
        }
    }
}

/// Serialises a frame into the binary wire layout.
pub fn encode_media_frame(frame: &EncodedFrame) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(MEDIA_HEADER_LEN + frame.len());
    bytes.extend_from_slice(&frame.sequence.to_be_bytes());
    bytes.push(if frame.keyframe { FLAG_KEYFRAME } else { 0 });
    bytes.extend_from_slice(&frame.data);
    bytes
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds the configured address and serves until `running` is cleared.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot be bound (e.g., the port is
/// already in use or the process lacks permission to bind).
pub async fn run_server(
    config: &ServerConfig,
    core: Arc<ServerCore>,
    members: Arc<MemberDirectory>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let addr = config.socket_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {addr}"))?;
    info!("deskcast listening on {addr}");

    serve(listener, core, members, ConnectionSettings::from_config(config), running).await
}

/// Runs the accept loop on an already bound listener until `running` is
/// cleared.
///
/// Each accepted connection is handed off to its own Tokio task so that one
/// slow client never blocks others.
pub async fn serve(
    listener: TcpListener,
    core: Arc<ServerCore>,
    members: Arc<MemberDirectory>,
    settings: ConnectionSettings,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        // Short timeout so the loop notices the shutdown flag while idle.
        match timeout(Duration::from_millis(200), listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                debug!("new connection from {peer_addr}");
                let core = Arc::clone(&core);
                let members = Arc::clone(&members);
                tokio::spawn(async move {
                    handle_connection(stream, peer_addr, core, members, settings).await;
                });
            }
            Ok(Err(e)) => {
                // Transient accept error (e.g., too many open file descriptors).
                error!("accept error: {e}");
            }
            Err(_) => {}
        }
    }

    Ok(())
}

// ── Per-session handler ───────────────────────────────────────────────────────

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    core: Arc<ServerCore>,
    members: Arc<MemberDirectory>,
    settings: ConnectionSettings,
) {
    match run_session(stream, peer_addr, core, members, settings).await {
        Ok(()) => debug!("connection {peer_addr} closed"),
        Err(e) => warn!("connection {peer_addr} closed with error: {e:#}"),
    }
}

/// Completes the handshake, resolving the member behind `?token=`.
async fn accept_member(
    stream: TcpStream,
    members: &MemberDirectory,
) -> Result<(WebSocketStream<TcpStream>, Admission), WsError> {
    let mut admission = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let token = token_from_query(request.uri().query());
        match members.admit(token.as_deref()) {
            Some(member) => {
                admission = Some(member);
                Ok(response)
            }
            None => {
                let mut refusal = ErrorResponse::new(Some("unknown member token".to_string()));
                *refusal.status_mut() = StatusCode::UNAUTHORIZED;
                Err(refusal)
            }
        }
    };
    let ws_stream = accept_hdr_async(stream, callback).await?;
    // The callback only returns Ok after filling in `admission`.
    let admission = admission.ok_or(WsError::ConnectionClosed)?;
    Ok((ws_stream, admission))
}

async fn run_session(
    stream: TcpStream,
    peer_addr: SocketAddr,
    core: Arc<ServerCore>,
    members: Arc<MemberDirectory>,
    settings: ConnectionSettings,
) -> anyhow::Result<()> {
    let (ws_stream, Admission { id, profile }) = accept_member(stream, &members)
        .await
        .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let queue = Arc::new(OutboundQueue::new(
        settings.outbound_queue,
        settings.overflow_policy,
    ));
    let (media_tx, media_rx) = mpsc::channel::<Vec<u8>>(MEDIA_CHANNEL_FRAMES);
    let transport = Arc::new(WsTransport {
        queue: Arc::clone(&queue),
        media: Arc::new(WsMediaTransport {
            tx: media_tx,
            send_timeout: settings.send_timeout,
        }),
    });

    let session = match core.admit(id.clone(), profile, transport) {
        Ok(session) => session,
        Err(RegistryError::DuplicateSession(id)) => {
            info!(session_id = %id, "refusing second connection for connected member");
            let reply = ServerMessage::error(
                None,
                ErrorKind::DuplicateSession,
                format!("{id} is already connected"),
            );
            let text = encode_server_message(&reply)?;
            let _ = timeout(settings.send_timeout, ws_tx.send(WsMessage::Text(text))).await;
            let _ = timeout(settings.send_timeout, ws_tx.close()).await;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    info!(session_id = %id, "session connected from {peer_addr}");

    let mut writer = tokio::spawn(write_loop(
        ws_tx,
        Arc::clone(&queue),
        media_rx,
        settings.send_timeout,
        id.clone(),
    ));

    loop {
        let frame = tokio::select! {
            frame = ws_rx.next() => frame,
            _ = &mut writer => {
                debug!(session_id = %id, "writer finished; ending session");
                break;
            }
        };

        match frame {
            Some(Ok(WsMessage::Text(text))) => core.handle_message(&session, &text),
            Some(Ok(WsMessage::Binary(_))) => {
                debug!(session_id = %id, "unexpected binary frame (ignored)");
            }
            Some(Ok(WsMessage::Close(_))) => {
                debug!(session_id = %id, "close frame received");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(WsError::ConnectionClosed | WsError::Protocol(_))) | None => {
                debug!(session_id = %id, "browser stream ended");
                break;
            }
            Some(Err(e)) => {
                warn!(session_id = %id, "WebSocket error: {e}");
                break;
            }
        }
    }

    core.disconnect(&id);
    queue.close();
    if !writer.is_finished() {
        let _ = timeout(settings.send_timeout, &mut writer).await;
        writer.abort();
    }
    info!(session_id = %id, "session disconnected");
    Ok(())
}

/// Drains the outbound queue and media channel onto the socket.
///
/// Ends when the queue is closed or a write fails or times out; in every case
/// the queue is closed on the way out so producers see `Closed`.
async fn write_loop<S>(
    mut sink: S,
    queue: Arc<OutboundQueue>,
    mut media_rx: mpsc::Receiver<Vec<u8>>,
    send_timeout: Duration,
    id: SessionId,
) where
    S: futures_util::Sink<WsMessage, Error = WsError> + Unpin,
{
    loop {
        let message = tokio::select! {
            message = queue.recv() => match message {
                Some(message) => match encode_server_message(&message) {
                    Ok(text) => WsMessage::Text(text),
                    Err(e) => {
                        error!(session_id = %id, event = message.event(), "encode error: {e}");
                        continue;
                    }
                },
                None => break,
            },
            Some(bytes) = media_rx.recv() => WsMessage::Binary(bytes),
        };

        match timeout(send_timeout, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(session_id = %id, "WebSocket send failed: {e}");
                break;
            }
            Err(_) => {
                warn!(session_id = %id, "send timed out; closing slow session");
                break;
            }
        }
    }

    queue.close();
    let _ = timeout(send_timeout, sink.close()).await;
}
