//! Frame types: the envelopes that travel on the wire.
//!
//! Every byte a Socklet server sends to a browser belongs to exactly one of
//! four frames. The encoding is a single-character tag followed by an
//! optional JSON payload:
//!
//! ```text
//! o                      open
//! h                      heartbeat
//! a["hello","world"]     message batch
//! c[3000,"Go away!"]     close
//! ```

use std::fmt;

use crate::codec::{escape_into, quote_json};
use crate::ProtocolError;

// ---------------------------------------------------------------------------
// CloseReason
// ---------------------------------------------------------------------------

/// The status code and human-readable reason carried by a close frame.
///
/// Status codes follow the browser client's conventions: `1000` for a
/// normal close, `2010` when a second connection is rejected, `3000` when
/// the server refuses a session outright.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CloseReason {
    /// Numeric close status.
    pub status: u16,
    /// Free-form text shown to the client.
    pub reason: String,
}

impl CloseReason {
    /// Creates a close reason from a status and text.
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }

    /// `1000 "Normal closure"`, what `Session::close()` sends.
    pub fn normal() -> Self {
        Self::new(1000, "Normal closure")
    }

    /// `2010 "Another connection still open"`, sent to a receiver that
    /// tries to attach while another one is already attached.
    pub fn another_connection() -> Self {
        Self::new(2010, "Another connection still open")
    }

    /// `3000 "Go away!"`, sent when a session is torn down by the server
    /// (for example, replaced by a forced re-creation).
    pub fn go_away() -> Self {
        Self::new(3000, "Go away!")
    }
}

impl Default for CloseReason {
    fn default() -> Self {
        Self::normal()
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status, self.reason)
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// One protocol frame.
///
/// This is a closed set: transports never invent frames of their own, they
/// only decide how to wrap the encoded text (a newline for XHR, `data: ` for
/// EventSource, a `<script>` tag for htmlfile, and so on).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Sent once, when the first receiver attaches to a new session.
    Open,
    /// Keeps idle connections from being reclaimed by proxies.
    Heartbeat,
    /// An ordered batch of application messages.
    Message(Vec<String>),
    /// Tells the client the session is over.
    Close(CloseReason),
}

impl Frame {
    /// Single-character tag used on the wire.
    pub fn tag(&self) -> char {
        match self {
            Frame::Open => 'o',
            Frame::Heartbeat => 'h',
            Frame::Message(_) => 'a',
            Frame::Close(_) => 'c',
        }
    }

    /// Encodes the frame into its exact wire text.
    ///
    /// Message strings and close reasons are escaped with
    /// [`escape_into`], so the output is safe to embed in browser string
    /// literals.
    pub fn encode(&self) -> String {
        match self {
            Frame::Open => "o".to_string(),
            Frame::Heartbeat => "h".to_string(),
            Frame::Message(messages) => {
                let capacity =
                    messages.iter().map(|m| m.len() + 3).sum::<usize>() + 3;
                let mut out = String::with_capacity(capacity);
                out.push_str("a[");
                for (i, message) in messages.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push('"');
                    escape_into(&mut out, message);
                    out.push('"');
                }
                out.push(']');
                out
            }
            Frame::Close(close) => {
                format!("c[{},{}]", close.status, quote_json(&close.reason))
            }
        }
    }

    /// Parses encoded wire text back into a frame.
    ///
    /// This is the inverse of [`Frame::encode`]; the server never needs it
    /// for inbound traffic (clients send bare payloads, see
    /// [`decode_messages`](crate::decode_messages)) but it is what a client
    /// or a test uses to read server output.
    ///
    /// # Errors
    /// - [`ProtocolError::InvalidFrame`] for an unknown tag or a body that
    ///   doesn't fit the tag.
    /// - [`ProtocolError::Decode`] if the JSON body is malformed.
    pub fn decode(text: &str) -> Result<Frame, ProtocolError> {
        let mut chars = text.chars();
        let tag = chars
            .next()
            .ok_or_else(|| ProtocolError::InvalidFrame("empty frame".into()))?;
        let body = chars.as_str();

        match tag {
            'o' | 'h' if !body.is_empty() => Err(ProtocolError::InvalidFrame(
                format!("unexpected body after '{tag}'"),
            )),
            'o' => Ok(Frame::Open),
            'h' => Ok(Frame::Heartbeat),
            'a' => {
                let messages: Vec<String> = serde_json::from_str(body)?;
                Ok(Frame::Message(messages))
            }
            'c' => {
                let (status, reason): (u16, String) =
                    serde_json::from_str(body)?;
                Ok(Frame::Close(CloseReason { status, reason }))
            }
            other => Err(ProtocolError::InvalidFrame(format!(
                "unknown frame tag '{other}'"
            ))),
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

// =========================================================================
// Tests
// =========================================================================
