//! Error types for the protocol layer.
//!
//! Each crate in Socklet defines its own error enum. When you see a
//! `ProtocolError`, you know the problem is in the text that came over the
//! wire, not in networking or session bookkeeping.

/// Errors that can occur while decoding protocol text.
///
/// Encoding never fails: every [`Frame`](crate::Frame) has a textual form,
/// so only the inbound direction needs an error type.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The input was not valid JSON.
    ///
    /// The inner `serde_json::Error` carries the line/column of the
    /// problem, which is handy in debug logs.
    #[error("decode failed: {0}")]
    Decode(#[from] serde_json::Error),

    /// The input was valid JSON but not a string or an array of strings.
    ///
    /// Clients send either `"msg"` or `["msg1","msg2"]`; numbers, objects,
    /// or arrays with non-string elements are rejected.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The text does not start with a known frame tag or its body is
    /// malformed for that tag.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}
