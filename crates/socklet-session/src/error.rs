//! Error types for the session layer.

use socklet_transport::TransportError;

use crate::SessionId;

/// Errors that can occur while managing sessions.
///
/// Only [`ProtocolViolation`](Self::ProtocolViolation) and
/// [`Transport`](Self::Transport) are fatal to a session. The others are
/// reported to the caller and leave the session as it was.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No session is registered under this id.
    /// The HTTP layer answers these with a 404.
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// A receiver tried to attach while another one is still attached.
    /// The newcomer has already been sent a 2010 close frame.
    #[error("session {0} already has a receiver attached")]
    ReceiverConflict(SessionId),

    /// The session has reached its terminal state.
    #[error("session {0} is closed")]
    Closed(SessionId),

    /// The client broke the protocol, e.g. sent a message before the
    /// session was open, or sent a payload that doesn't decode.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The physical connection failed in a way the session can't recover
    /// from.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// An application callback returned an error.
    #[error("callback failed: {0}")]
    Callback(String),
}
