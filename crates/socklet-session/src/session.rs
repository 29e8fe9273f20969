//! Session types: the handle applications and adapters hold.
//!
//! A [`Session`] does not own any state itself. The state lives in a
//! session actor (see `actor.rs`); the handle posts commands to it and
//! reads a few published values (state, addresses) without waiting.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use socklet_protocol::CloseReason;
use socklet_transport::{PeerAddrs, Receiver, ReceiverId};
use tokio::sync::{mpsc, oneshot, watch};

use crate::SessionError;

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

/// The key a browser picks for its session (the `{session}` URL segment).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Lifecycle of a session.
///
/// ```text
///   Connecting ──(first attach)──→ Open ──(close)──→ Closing
///       │                            │                  │
///       └──(timeout)──→ Closed ←──(timeout)─────────────┘
///                         ↑
///              (close frame written, or fatal error)
/// ```
///
/// `Closed` is terminal: the session is removed from its registry and its
/// actor stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Commands sent to a session actor through its channel.
pub(crate) enum SessionCommand {
    Attach {
        receiver: Arc<dyn Receiver>,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Detach {
        receiver_id: ReceiverId,
    },
    Send {
        message: String,
    },
    Close {
        reason: CloseReason,
    },
    Inbound {
        messages: Vec<String>,
    },
    Fail {
        cause: SessionError,
    },
    /// Forced teardown, used when the registry replaces the session.
    Shutdown {
        reason: CloseReason,
    },
    HeartbeatFired {
        receiver_id: ReceiverId,
        generation: u64,
    },
    TimeoutFired {
        generation: u64,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

/// A point-in-time view of a session's internals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    /// Messages waiting for a receiver.
    pub queued: usize,
    pub receiver: Option<ReceiverId>,
    pub heartbeat_armed: bool,
    pub timeout_armed: bool,
    pub close_reason: Option<CloseReason>,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub(crate) struct SessionShared {
    pub(crate) id: SessionId,
    pub(crate) commands: mpsc::UnboundedSender<SessionCommand>,
    pub(crate) state: watch::Receiver<SessionState>,
    pub(crate) addrs: watch::Receiver<PeerAddrs>,
}

/// Handle to a running session.
///
/// Cheap to clone. Two handles are the *same* session only if
/// [`Session::ptr_eq`] says so; a registry may replace a session with a new
/// one under the same id.
#[derive(Clone)]
pub struct Session {
    pub(crate) inner: Arc<SessionShared>,
}

impl Session {
    pub fn id(&self) -> &SessionId {
        &self.inner.id
    }

    /// Current state, as last published by the actor.
    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Local address of the attached receiver, `None` while detached.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.addrs.borrow().local
    }

    /// Remote address of the attached receiver, `None` while detached.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.addrs.borrow().remote
    }

    /// Whether both handles point at the same session instance.
    pub fn ptr_eq(a: &Session, b: &Session) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Attaches a receiver.
    ///
    /// The first attach opens the session. Attaching to a closing session
    /// delivers the pending messages and the close frame.
    ///
    /// # Errors
    /// - [`SessionError::ReceiverConflict`] if another receiver is attached.
    ///   `receiver` has been sent `c[2010,"Another connection still open"]`.
    /// - [`SessionError::Closed`] if the session already terminated.
    pub async fn attach(&self, receiver: Arc<dyn Receiver>) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.command(SessionCommand::Attach { receiver, reply })?;
        rx.await.map_err(|_| self.closed_error())?
    }

    /// Detaches a receiver. Ignored unless it is the one attached.
    pub fn detach(&self, receiver_id: ReceiverId) {
        let _ = self.command(SessionCommand::Detach { receiver_id });
    }

    /// Queues a message for the client and flushes it if a receiver is
    /// attached. Never blocks.
    ///
    /// # Errors
    /// [`SessionError::Closed`] if the session already terminated.
    pub fn send(&self, message: impl Into<String>) -> Result<(), SessionError> {
        self.command(SessionCommand::Send {
            message: message.into(),
        })
    }

    /// Closes with `1000 "Normal closure"`.
    pub fn close(&self) {
        self.close_with(CloseReason::normal());
    }

    /// Starts closing with a custom status. A no-op once closing.
    pub fn close_with(&self, reason: CloseReason) {
        let _ = self.command(SessionCommand::Close { reason });
    }

    /// Delivers messages sent by the client.
    ///
    /// Receiving while the session isn't open is a protocol violation and
    /// terminates the session.
    ///
    /// # Errors
    /// [`SessionError::Closed`] if the session already terminated.
    pub fn receive(&self, messages: Vec<String>) -> Result<(), SessionError> {
        self.command(SessionCommand::Inbound { messages })
    }

    /// Reports a fatal error. The session closes immediately.
    pub fn fail(&self, cause: SessionError) {
        let _ = self.command(SessionCommand::Fail { cause });
    }

    /// Reads the actor's internal state.
    ///
    /// Because commands are handled in order, the snapshot reflects every
    /// command sent before this call.
    ///
    /// # Errors
    /// [`SessionError::Closed`] if the session already terminated.
    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.command(SessionCommand::Snapshot { reply })?;
        rx.await.map_err(|_| self.closed_error())
    }

    /// Waits until the session is closed.
    pub async fn closed(&self) {
        let mut state = self.inner.state.clone();
        // An error means the actor is gone, which only happens once closed.
        let _ = state.wait_for(|s| *s == SessionState::Closed).await;
    }

    pub(crate) fn shutdown(&self, reason: CloseReason) {
        let _ = self.command(SessionCommand::Shutdown { reason });
    }

    pub(crate) fn command(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.inner
            .commands
            .send(command)
            .map_err(|_| self.closed_error())
    }

    fn closed_error(&self) -> SessionError {
        SessionError::Closed(self.inner.id.clone())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}
