//! Streaming receivers: xhr_streaming, eventsource and htmlfile.
//!
//! One long-lived response carries many frames. Browsers keep the whole
//! response in memory, so once `max_response_size` bytes of frames have
//! been written the receiver ends the response on its own. The session is
//! left untouched: it just becomes detached until the browser opens the
//! next stream.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use socklet_protocol::{escape_into, CloseReason, Frame};
use tracing::debug;

use crate::{DetachHook, OutboundSink, PeerAddrs, Receiver, ReceiverBase, ReceiverId, TransportError};

/// Length of the `h` run that opens an xhr_streaming response.
const XHR_STREAMING_PRELUDE_LEN: usize = 2048;

/// Minimum size of the htmlfile document head before frames start.
const HTMLFILE_MIN_HEAD: usize = 1024;

const HTMLFILE_HEAD_START: &str = "<!doctype html>\n\
<html><head>\n  \
<meta http-equiv=\"X-UA-Compatible\" content=\"IE=edge\" />\n  \
<meta http-equiv=\"Content-Type\" content=\"text/html; charset=UTF-8\" />\n\
</head><body><h2>Don't panic!</h2>\n  \
<script>\n    \
document.domain = document.domain;\n    \
var c = parent.";

const HTMLFILE_HEAD_END: &str = ";\n    \
c.start();\n    \
function p(d) {c.message(d);};\n    \
window.onload = function() {c.stop();};\n  \
</script>";

/// How a streaming response opens and wraps each frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamingFormat {
    /// `<frame>\n` chunks after a 2048-byte `h` prelude.
    XhrStreaming,
    /// `data: <frame>\r\n\r\n` server-sent events.
    EventSource,
    /// `<script>` blocks calling `p(...)` inside a padded HTML page.
    HtmlFile { callback: String },
}

impl StreamingFormat {
    /// htmlfile format from the request's `c` query parameter.
    ///
    /// # Errors
    /// [`TransportError::MissingCallback`] if `callback` is absent or empty.
    pub fn htmlfile(callback: Option<String>) -> Result<Self, TransportError> {
        match callback {
            Some(callback) if !callback.is_empty() => Ok(Self::HtmlFile { callback }),
            _ => Err(TransportError::MissingCallback),
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::XhrStreaming => "application/javascript; charset=UTF-8",
            Self::EventSource => "text/event-stream; charset=UTF-8",
            Self::HtmlFile { .. } => "text/html; charset=UTF-8",
        }
    }

    /// Bytes written once, before any frame.
    pub fn prelude(&self) -> String {
        match self {
            Self::XhrStreaming => {
                let mut out = "h".repeat(XHR_STREAMING_PRELUDE_LEN);
                out.push('\n');
                out
            }
            Self::EventSource => "\r\n".to_string(),
            Self::HtmlFile { callback } => {
                let mut out = String::with_capacity(HTMLFILE_MIN_HEAD + 32);
                out.push_str(HTMLFILE_HEAD_START);
                out.push_str(callback);
                out.push_str(HTMLFILE_HEAD_END);
                // Some browsers won't render until they've seen 1KiB.
                let padding = HTMLFILE_MIN_HEAD.saturating_sub(out.len()) + 20;
                out.extend(std::iter::repeat_n(' ', padding));
                out.push_str("\r\n\r\n");
                out
            }
        }
    }

    /// Wraps an encoded frame for the wire.
    pub fn wrap(&self, frame: &str) -> String {
        match self {
            Self::XhrStreaming => format!("{frame}\n"),
            Self::EventSource => format!("data: {frame}\r\n\r\n"),
            Self::HtmlFile { .. } => {
                let mut out = String::with_capacity(frame.len() + 32);
                out.push_str("<script>\np(\"");
                escape_into(&mut out, frame);
                out.push_str("\");\n</script>\r\n");
                out
            }
        }
    }
}

/// Receiver writing many frames to one response, up to a byte ceiling.
#[derive(Debug)]
pub struct StreamingReceiver {
    base: ReceiverBase,
    format: StreamingFormat,
    max_response_size: usize,
    bytes_sent: AtomicUsize,
}

impl StreamingReceiver {
    /// Creates the receiver and writes the format's prelude.
    pub fn new(
        format: StreamingFormat,
        max_response_size: usize,
        sink: OutboundSink,
        addrs: PeerAddrs,
    ) -> Self {
        let base = ReceiverBase::new(sink, addrs);
        // A failed prelude already closed the base.
        let _ = base.send_chunk(Bytes::from(format.prelude()));
        Self {
            base,
            format,
            max_response_size,
            bytes_sent: AtomicUsize::new(0),
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

    /// Frame bytes written so far, prelude excluded.
    pub fn bytes_sent(&self) -> usize {
        self.bytes_sent.load(Ordering::Acquire)
    }

    fn send_frame(&self, frame: Frame) -> bool {
        if self.base.is_closed() {
            return false;
        }
        let chunk = self.format.wrap(&frame.encode());
        let len = chunk.len();
        if self.base.send_chunk(Bytes::from(chunk)).is_err() {
            return false;
        }

        let total = self.bytes_sent.fetch_add(len, Ordering::AcqRel) + len;
        if total >= self.max_response_size {
            debug!(
                receiver = %self.base.id(),
                total,
                limit = self.max_response_size,
                "response size ceiling reached, ending stream"
            );
            self.base.mark_closed();
        }
        true
    }
}

impl Receiver for StreamingReceiver {
    fn id(&self) -> ReceiverId {
        self.base.id()
    }

    fn open(&self) -> bool {
        self.send_frame(Frame::Open)
    }

    fn write(&self, messages: &[String]) -> bool {
        self.send_frame(Frame::Message(messages.to_vec()))
    }

    fn heartbeat(&self) -> bool {
        self.send_frame(Frame::Heartbeat)
    }

    fn close(&self, reason: &CloseReason) -> bool {
        let sent = self.send_frame(Frame::Close(reason.clone()));
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
