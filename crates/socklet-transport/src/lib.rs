//! Receiver contract and transport framings for Socklet.
//!
//! A [`Receiver`] is the session's view of one physical connection. The
//! session never knows whether it is talking to a long-poll response, a
//! chunked stream or a WebSocket; it only calls this trait.
//!
//! Three families implement it:
//!
//! - [`PollingReceiver`]: one frame per HTTP response (xhr, jsonp).
//! - [`StreamingReceiver`]: many frames on one response until a byte
//!   ceiling is reached (xhr_streaming, eventsource, htmlfile).
//! - [`WebSocketReceiver`]: one WebSocket text message per frame.
//!
//! Every receiver writes into an [`OutboundSink`], an unbounded channel of
//! byte chunks that the HTTP layer turns into a response body or a socket
//! sink. Closing a receiver drops its sender, which ends that body.

mod base;
mod error;
mod polling;
mod streaming;
mod websocket;

pub use base::{DetachHook, OutboundSink, ReceiverBase};
pub use error::TransportError;
pub use polling::{PollingFormat, PollingReceiver};
pub use streaming::{StreamingFormat, StreamingReceiver};
pub use websocket::{WebSocketMode, WebSocketReceiver};

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use socklet_protocol::CloseReason;

/// Counter for generating unique receiver IDs.
static NEXT_RECEIVER_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReceiverId(u64);

impl ReceiverId {
    /// Creates a `ReceiverId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next process-wide unique id.
    pub fn next() -> Self {
        Self(NEXT_RECEIVER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ReceiverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "recv-{}", self.0)
    }
}

/// Socket addresses of the physical connection behind a receiver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerAddrs {
    pub local: Option<SocketAddr>,
    pub remote: Option<SocketAddr>,
}

impl PeerAddrs {
    pub fn new(local: Option<SocketAddr>, remote: Option<SocketAddr>) -> Self {
        Self { local, remote }
    }
}

/// The capability set every transport provides to a session.
///
/// All methods are synchronous and must not block: they push bytes into a
/// channel and return. A `false` return means nothing reached the
/// connection, and the session treats it as an implicit disconnect.
pub trait Receiver: Send + Sync + 'static {
    /// Unique id of this receiver.
    fn id(&self) -> ReceiverId;

    /// Writes the open frame.
    fn open(&self) -> bool;

    /// Writes one message frame carrying `messages` in order.
    fn write(&self, messages: &[String]) -> bool;

    /// Writes a heartbeat frame.
    fn heartbeat(&self) -> bool;

    /// Writes a close frame and ends the connection.
    fn close(&self, reason: &CloseReason) -> bool;

    /// Whether the receiver can no longer accept writes.
    fn is_closed(&self) -> bool;

    fn local_addr(&self) -> Option<SocketAddr>;

    fn remote_addr(&self) -> Option<SocketAddr>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receiver_id_new_and_into_inner() {
        let id = ReceiverId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_receiver_id_display() {
        let id = ReceiverId::new(7);
        assert_eq!(id.to_string(), "recv-7");
    }

    #[test]
    fn test_receiver_id_next_is_unique() {
        let a = ReceiverId::next();
        let b = ReceiverId::next();
        assert_ne!(a, b);
        assert!(b.into_inner() > a.into_inner());
    }

    #[test]
    fn test_peer_addrs_default_is_empty() {
        let addrs = PeerAddrs::default();
        assert_eq!(addrs.local, None);
        assert_eq!(addrs.remote, None);
    }
}
