//! WebSocket handlers.
//!
//! Each accepted socket gets its own task running [`run_socket`]. The flow
//! is:
//!   1. Force-create a session (a WebSocket never resumes one)
//!   2. Attach a full-duplex receiver bound to an outbound channel
//!   3. Loop: forward outbound chunks as text messages, decode inbound
//!      text messages into the session
//!
//! The loop ends when either side closes. A drop guard then marks the
//! receiver closed, which detaches it from the session.

use std::io;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Request, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use socklet_protocol::decode_messages;
use socklet_session::{Session, SessionError, SessionId};
use socklet_transport::{PeerAddrs, TransportError, WebSocketMode, WebSocketReceiver};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::Service;
use crate::handler::{ReceiverGuard, SessionPath, detach_hook, peer_addrs};

/// GET /{server}/{session}/websocket: protocol frames over a WebSocket.
pub(crate) async fn framed(
    State(service): State<Service>,
    Path(path): Path<SessionPath>,
    ws: WebSocketUpgrade,
    request: Request,
) -> Response {
    let addrs = peer_addrs(request.extensions());
    let id = path.session_id();
    ws.on_upgrade(move |socket| run_socket(service, socket, id, WebSocketMode::Framed, addrs))
}

/// GET /websocket: bare messages for plain WebSocket clients.
pub(crate) async fn raw(
    State(service): State<Service>,
    ws: WebSocketUpgrade,
    request: Request,
) -> Response {
    let addrs = peer_addrs(request.extensions());
    let id = SessionId::new(format!("rawwebsocket-{}", rand::random::<u64>()));
    ws.on_upgrade(move |socket| run_socket(service, socket, id, WebSocketMode::Raw, addrs))
}

async fn run_socket(
    service: Service,
    socket: WebSocket,
    id: SessionId,
    mode: WebSocketMode,
    addrs: PeerAddrs,
) {
    let session = service.registry().force_create_session(&id);
    let (sink, mut outbound) = mpsc::unbounded_channel();
    let receiver = Arc::new(WebSocketReceiver::new(mode, sink, addrs));
    let _guard = ReceiverGuard::new(Arc::clone(&receiver), WebSocketReceiver::base);

    if let Err(err) = session.attach(receiver.clone()).await {
        debug!(session = %id, error = %err, "websocket attach failed");
        return;
    }
    receiver.base().set_detach_hook(detach_hook(session.clone()));
    info!(session = %id, ?mode, "websocket connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            chunk = outbound.recv() => {
                let Some(chunk) = chunk else {
                    // The receiver closed: the session is done with us.
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                };
                let text = String::from_utf8_lossy(&chunk).into_owned();
                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                    debug!(session = %id, "websocket send failed");
                    break;
                }
            }

            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if !deliver(&session, mode, text.as_str()) {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        let cause = TransportError::Io(io::Error::other(err));
                        session.fail(SessionError::Transport(cause));
                        break;
                    }
                }
            }
        }
    }

    debug!(session = %id, "websocket disconnected");
}

/// Hands one inbound text message to the session. Returns `false` once
/// the session is gone.
///
/// A message that doesn't decode fails the session; the loop keeps
/// running so the resulting close frame still reaches the client.
fn deliver(session: &Session, mode: WebSocketMode, text: &str) -> bool {
    if text.is_empty() {
        return true;
    }
    let messages = match mode {
        WebSocketMode::Raw => vec![text.to_owned()],
        WebSocketMode::Framed => match decode_messages(text) {
            Ok(messages) => messages,
            Err(err) => {
                session.fail(SessionError::ProtocolViolation(err.to_string()));
                return true;
            }
        },
    };
    session.receive(messages).is_ok()
}
