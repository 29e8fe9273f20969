//! HTTP transport handlers: polling, streaming, send, greeting and info.
//!
//! Every receiving request follows the same flow:
//!   1. Build a receiver around a fresh chunk channel
//!   2. Look up or create the session and attach the receiver
//!   3. Stream the channel out as the response body
//!
//! The response body owns a [`ReceiverGuard`]. When the client goes away
//! axum drops the body, the guard marks the receiver closed, and the
//! receiver's detach hook tells the session.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, FromRequest, Path, Query, Request, State};
use axum::http::{Extensions, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use socklet_protocol::{ProtocolError, decode_messages};
use socklet_session::{Session, SessionError, SessionId};
use socklet_transport::{
    DetachHook, PeerAddrs, PollingFormat, PollingReceiver, Receiver, ReceiverBase,
    StreamingFormat, StreamingReceiver,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use crate::{ConnectionInfo, Service, SockletError};

pub(crate) const NO_CACHE: &str = "no-store, no-cache, must-revalidate, max-age=0";
const CONTENT_TYPE_FORM: &str = "application/x-www-form-urlencoded";
const MAX_SEND_BODY: usize = 1024 * 1024;

// ---------------------------------------------------------------------------
// Path and query shapes
// ---------------------------------------------------------------------------

/// `/{server}/{session}/...`. The server segment only helps load balancers
/// and is ignored.
#[derive(Debug, Deserialize)]
pub(crate) struct SessionPath {
    session: String,
}

impl SessionPath {
    pub(crate) fn session_id(&self) -> SessionId {
        SessionId::from(self.session.as_str())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CallbackQuery {
    c: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendForm {
    d: Option<String>,
}

#[derive(Debug, Serialize)]
struct InfoResponse {
    websocket: bool,
    origins: [&'static str; 1],
    cookie_needed: bool,
    entropy: u32,
}

// ---------------------------------------------------------------------------
// Greeting and info
// ---------------------------------------------------------------------------

/// GET / on a service.
pub(crate) async fn greeting() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, crate::CONTENT_TYPE_PLAIN)],
        "Welcome to SockJS!\n",
    )
}

/// GET /info: what the client may use.
pub(crate) async fn info(State(service): State<Service>) -> Response {
    let config = service.config();
    let body = InfoResponse {
        websocket: config.websocket_enabled,
        origins: ["*:*"],
        cookie_needed: config.cookie_needed,
        entropy: rand::random(),
    };
    ([(header::CACHE_CONTROL, NO_CACHE)], Json(body)).into_response()
}

// ---------------------------------------------------------------------------
// Polling
// ---------------------------------------------------------------------------

/// POST /{server}/{session}/xhr
pub(crate) async fn xhr_poll(
    State(service): State<Service>,
    Path(path): Path<SessionPath>,
    request: Request,
) -> Response {
    let addrs = peer_addrs(request.extensions());
    poll(service, path.session_id(), PollingFormat::Xhr, addrs).await
}

/// GET /{server}/{session}/jsonp?c=callback
pub(crate) async fn jsonp_poll(
    State(service): State<Service>,
    Path(path): Path<SessionPath>,
    Query(query): Query<CallbackQuery>,
    request: Request,
) -> Result<Response, SockletError> {
    let format = PollingFormat::jsonp(query.c)?;
    let addrs = peer_addrs(request.extensions());
    Ok(poll(service, path.session_id(), format, addrs).await)
}

async fn poll(service: Service, id: SessionId, format: PollingFormat, addrs: PeerAddrs) -> Response {
    let content_type = format.content_type();
    let (sink, chunks) = mpsc::unbounded_channel();
    let receiver = Arc::new(PollingReceiver::new(format, sink, addrs));
    let guard = ReceiverGuard::new(Arc::clone(&receiver), PollingReceiver::base);

    connect(&service, &id, receiver.clone(), receiver.base()).await;
    chunked_response(content_type, chunks, guard)
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

/// POST /{server}/{session}/xhr_streaming
pub(crate) async fn xhr_streaming(
    State(service): State<Service>,
    Path(path): Path<SessionPath>,
    request: Request,
) -> Response {
    let addrs = peer_addrs(request.extensions());
    stream(service, path.session_id(), StreamingFormat::XhrStreaming, addrs).await
}

/// GET /{server}/{session}/eventsource
pub(crate) async fn eventsource(
    State(service): State<Service>,
    Path(path): Path<SessionPath>,
    request: Request,
) -> Response {
    let addrs = peer_addrs(request.extensions());
    stream(service, path.session_id(), StreamingFormat::EventSource, addrs).await
}

/// GET /{server}/{session}/htmlfile?c=callback
pub(crate) async fn htmlfile(
    State(service): State<Service>,
    Path(path): Path<SessionPath>,
    Query(query): Query<CallbackQuery>,
    request: Request,
) -> Result<Response, SockletError> {
    let format = StreamingFormat::htmlfile(query.c)?;
    let addrs = peer_addrs(request.extensions());
    Ok(stream(service, path.session_id(), format, addrs).await)
}

async fn stream(
    service: Service,
    id: SessionId,
    format: StreamingFormat,
    addrs: PeerAddrs,
) -> Response {
    let content_type = format.content_type();
    let limit = service.config().max_response_size;
    let (sink, chunks) = mpsc::unbounded_channel();
    let receiver = Arc::new(StreamingReceiver::new(format, limit, sink, addrs));
    let guard = ReceiverGuard::new(Arc::clone(&receiver), StreamingReceiver::base);

    connect(&service, &id, receiver.clone(), receiver.base()).await;
    chunked_response(content_type, chunks, guard)
}

// ---------------------------------------------------------------------------
// Send
// ---------------------------------------------------------------------------

/// POST /{server}/{session}/xhr_send
pub(crate) async fn xhr_send(
    State(service): State<Service>,
    Path(path): Path<SessionPath>,
    request: Request,
) -> Result<Response, SockletError> {
    deliver(&service, &path.session_id(), request).await?;
    Ok((StatusCode::NO_CONTENT, no_cache_headers(crate::CONTENT_TYPE_PLAIN)).into_response())
}

/// POST /{server}/{session}/jsonp_send
pub(crate) async fn jsonp_send(
    State(service): State<Service>,
    Path(path): Path<SessionPath>,
    request: Request,
) -> Result<Response, SockletError> {
    deliver(&service, &path.session_id(), request).await?;
    Ok((no_cache_headers(crate::CONTENT_TYPE_PLAIN), "ok").into_response())
}

/// Decodes a send request and hands its messages to an existing session.
async fn deliver(service: &Service, id: &SessionId, request: Request) -> Result<(), SockletError> {
    let session = service.registry().get_session(id)?;
    let payload = read_payload(request).await?;
    let messages = decode_messages(&payload)?;
    debug!(session = %id, count = messages.len(), "messages received over http");
    session.receive(messages)?;
    Ok(())
}

/// The raw payload of a send request: the body, or its `d` field when
/// form-encoded.
async fn read_payload(request: Request) -> Result<String, SockletError> {
    let is_form = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with(CONTENT_TYPE_FORM));

    let payload = if is_form {
        let axum::Form(form) = axum::Form::<SendForm>::from_request(request, &())
            .await
            .map_err(|_| SockletError::PayloadExpected)?;
        form.d.ok_or(SockletError::PayloadExpected)?
    } else {
        let body = axum::body::to_bytes(request.into_body(), MAX_SEND_BODY).await?;
        String::from_utf8(body.to_vec())
            .map_err(|_| ProtocolError::InvalidPayload("payload is not UTF-8".into()))?
    };

    if payload.is_empty() {
        return Err(SockletError::PayloadExpected);
    }
    Ok(payload)
}

// ---------------------------------------------------------------------------
// Shared plumbing
// ---------------------------------------------------------------------------

/// Attaches `receiver` to the session for `id`, creating it if needed.
///
/// A session can close between lookup and attach; the registry then hands
/// out a fresh one, so one retry is enough. A conflict needs no handling
/// here: the receiver already carries the 2010 close frame.
async fn connect(
    service: &Service,
    id: &SessionId,
    receiver: Arc<dyn Receiver>,
    base: &ReceiverBase,
) {
    let registry = service.registry();
    let mut session = registry.get_or_create_session(id);
    let mut result = session.attach(Arc::clone(&receiver)).await;
    if matches!(result, Err(SessionError::Closed(_))) {
        session = registry.get_or_create_session(id);
        result = session.attach(receiver).await;
    }

    match result {
        Ok(()) => base.set_detach_hook(detach_hook(session)),
        Err(SessionError::ReceiverConflict(_)) => {}
        Err(err) => {
            debug!(session = %id, error = %err, "attach failed");
            base.mark_closed();
        }
    }
}

/// Detaches the receiver from `session` once it closes.
pub(crate) fn detach_hook(session: Session) -> DetachHook {
    Box::new(move |receiver_id| session.detach(receiver_id))
}

/// Addresses of the connection a request arrived on, if the server
/// recorded them.
pub(crate) fn peer_addrs(extensions: &Extensions) -> PeerAddrs {
    if let Some(ConnectInfo(info)) = extensions.get::<ConnectInfo<ConnectionInfo>>() {
        return (*info).into();
    }
    match extensions.get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(remote)) => PeerAddrs::new(None, Some(*remote)),
        None => PeerAddrs::default(),
    }
}

fn no_cache_headers(content_type: &'static str) -> [(header::HeaderName, HeaderValue); 4] {
    [
        (header::CONTENT_TYPE, HeaderValue::from_static(content_type)),
        (header::CACHE_CONTROL, HeaderValue::from_static(NO_CACHE)),
        (header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*")),
        (
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        ),
    ]
}

fn chunked_response<R: Send + Sync + 'static>(
    content_type: &'static str,
    chunks: mpsc::UnboundedReceiver<Bytes>,
    guard: ReceiverGuard<R>,
) -> Response {
    let body = Body::from_stream(ChunkStream {
        chunks: UnboundedReceiverStream::new(chunks),
        _guard: guard,
    });
    (no_cache_headers(content_type), body).into_response()
}

/// Marks a receiver closed when dropped.
pub(crate) struct ReceiverGuard<R: Send + Sync + 'static> {
    receiver: Arc<R>,
    base: fn(&R) -> &ReceiverBase,
}

impl<R: Send + Sync + 'static> ReceiverGuard<R> {
    pub(crate) fn new(receiver: Arc<R>, base: fn(&R) -> &ReceiverBase) -> Self {
        Self { receiver, base }
    }
}

impl<R: Send + Sync + 'static> Drop for ReceiverGuard<R> {
    fn drop(&mut self) {
        if (self.base)(&self.receiver).mark_closed() {
            debug!("response dropped, receiver closed");
        }
    }
}

/// Response body fed by a receiver's chunk channel.
struct ChunkStream<R: Send + Sync + 'static> {
    chunks: UnboundedReceiverStream<Bytes>,
    _guard: ReceiverGuard<R>,
}

impl<R: Send + Sync + 'static> Stream for ChunkStream<R> {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.chunks.poll_next_unpin(cx).map(|chunk| chunk.map(Ok))
    }
}
