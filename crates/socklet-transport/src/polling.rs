//! Single-response receivers: xhr polling and JSONP polling.
//!
//! Each HTTP request gets exactly one frame back. After that frame the
//! receiver closes itself, which ends the response; the browser then opens
//! the next poll.

use std::net::SocketAddr;

use bytes::Bytes;
use socklet_protocol::{escape_into, CloseReason, Frame};

use crate::{DetachHook, OutboundSink, PeerAddrs, Receiver, ReceiverBase, ReceiverId, TransportError};

/// How a polling response wraps its frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollingFormat {
    /// `<frame>\n`
    Xhr,
    /// `<callback>("<escaped frame>");\r\n`
    Jsonp { callback: String },
}

impl PollingFormat {
    /// JSONP format from the request's `c` query parameter.
    ///
    /// # Errors
    /// [`TransportError::MissingCallback`] if `callback` is absent or empty.
    pub fn jsonp(callback: Option<String>) -> Result<Self, TransportError> {
        match callback {
            Some(callback) if !callback.is_empty() => Ok(Self::Jsonp { callback }),
            _ => Err(TransportError::MissingCallback),
        }
    }

    /// `Content-Type` of the response body. Both formats are script.
    pub fn content_type(&self) -> &'static str {
        "application/javascript; charset=UTF-8"
    }

    /// Wraps an encoded frame for the wire.
    pub fn wrap(&self, frame: &str) -> String {
        match self {
            Self::Xhr => {
                let mut out = String::with_capacity(frame.len() + 1);
                out.push_str(frame);
                out.push('\n');
                out
            }
            Self::Jsonp { callback } => {
                let mut out = String::with_capacity(callback.len() + frame.len() + 8);
                out.push_str(callback);
                out.push_str("(\"");
                escape_into(&mut out, frame);
                out.push_str("\");\r\n");
                out
            }
        }
    }
}

/// Receiver that answers one poll with one frame.
#[derive(Debug)]
pub struct PollingReceiver {
    base: ReceiverBase,
    format: PollingFormat,
}

impl PollingReceiver {
    pub fn new(format: PollingFormat, sink: OutboundSink, addrs: PeerAddrs) -> Self {
        Self {
            base: ReceiverBase::new(sink, addrs),
            format,
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

    /// Sends the only frame this receiver will ever carry, then closes.
    fn respond(&self, frame: Frame) -> bool {
        if self.base.is_closed() {
            return false;
        }
        let body = self.format.wrap(&frame.encode());
        let sent = self.base.send_chunk(Bytes::from(body)).is_ok();
        self.base.mark_closed();
        sent
    }
}

impl Receiver for PollingReceiver {
    fn id(&self) -> ReceiverId {
        self.base.id()
    }

    fn open(&self) -> bool {
        self.respond(Frame::Open)
    }

    fn write(&self, messages: &[String]) -> bool {
        self.respond(Frame::Message(messages.to_vec()))
    }

    fn heartbeat(&self) -> bool {
        self.respond(Frame::Heartbeat)
    }

    fn close(&self, reason: &CloseReason) -> bool {
        self.respond(Frame::Close(reason.clone()))
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
