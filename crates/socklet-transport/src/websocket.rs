//! Full-duplex receiver for WebSocket connections.
//!
//! Each chunk pushed into the sink becomes one WebSocket text message. The
//! adapter closes the socket when the sink's sender is dropped.

use std::net::SocketAddr;

use bytes::Bytes;
use socklet_protocol::{CloseReason, Frame};

use crate::{DetachHook, OutboundSink, PeerAddrs, Receiver, ReceiverBase, ReceiverId};

/// What goes over the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebSocketMode {
    /// Protocol frames, one per text message.
    Framed,
    /// Bare application messages for plain WebSocket clients. No open,
    /// heartbeat or close frames are sent.
    Raw,
}

/// Receiver bound to one WebSocket connection.
#[derive(Debug)]
pub struct WebSocketReceiver {
    base: ReceiverBase,
    mode: WebSocketMode,
}

impl WebSocketReceiver {
    pub fn new(mode: WebSocketMode, sink: OutboundSink, addrs: PeerAddrs) -> Self {
        Self {
            base: ReceiverBase::new(sink, addrs),
            mode,
        }
    }

    /// Sets the hook run once when this receiver closes.
    pub fn with_detach_hook(self, hook: DetachHook) -> Self {
        self.base.set_detach_hook(hook);
        self
    }

    pub fn base(&self) -> &ReceiverBase {
        &self.base
    }

    pub fn mode(&self) -> WebSocketMode {
        self.mode
    }

    fn send_frame(&self, frame: Frame) -> bool {
        self.base.send_chunk(Bytes::from(frame.encode())).is_ok()
    }
}

impl Receiver for WebSocketReceiver {
    fn id(&self) -> ReceiverId {
        self.base.id()
    }

    fn open(&self) -> bool {
        match self.mode {
            WebSocketMode::Framed => self.send_frame(Frame::Open),
            WebSocketMode::Raw => !self.base.is_closed(),
        }
    }

    fn write(&self, messages: &[String]) -> bool {
        match self.mode {
            WebSocketMode::Framed => self.send_frame(Frame::Message(messages.to_vec())),
            WebSocketMode::Raw => messages
                .iter()
                .all(|m| self.base.send_chunk(Bytes::from(m.clone())).is_ok()),
        }
    }

    fn heartbeat(&self) -> bool {
        match self.mode {
            WebSocketMode::Framed => self.send_frame(Frame::Heartbeat),
            WebSocketMode::Raw => !self.base.is_closed(),
        }
    }

    fn close(&self, reason: &CloseReason) -> bool {
        let sent = match self.mode {
            WebSocketMode::Framed => self.send_frame(Frame::Close(reason.clone())),
            WebSocketMode::Raw => !self.base.is_closed(),
        };
        self.base.mark_closed();
        sent
    }

    fn is_closed(&self) -> bool {
        self.base.is_closed()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.base.local_addr()
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.base.remote_addr()
    }
}
