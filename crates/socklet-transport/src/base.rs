//! Behaviour shared by every receiver: identity, addresses, the outbound
//! channel and close-once bookkeeping.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{PeerAddrs, ReceiverId, TransportError};

/// Channel end a receiver writes its encoded chunks into.
pub type OutboundSink = mpsc::UnboundedSender<Bytes>;

/// Runs once when a receiver closes, with that receiver's id.
///
/// HTTP adapters use it to detach the receiver from its session.
pub type DetachHook = Box<dyn FnOnce(ReceiverId) + Send + 'static>;

/// Shared state embedded in every concrete receiver.
pub struct ReceiverBase {
    id: ReceiverId,
    addrs: PeerAddrs,
    closed: AtomicBool,
    sink: Mutex<Option<OutboundSink>>,
    detach: Mutex<Option<DetachHook>>,
}

impl ReceiverBase {
    pub fn new(sink: OutboundSink, addrs: PeerAddrs) -> Self {
        Self {
            id: ReceiverId::next(),
            addrs,
            closed: AtomicBool::new(false),
            sink: Mutex::new(Some(sink)),
            detach: Mutex::new(None),
        }
    }

    pub fn id(&self) -> ReceiverId {
        self.id
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.addrs.local
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.addrs.remote
    }

    /// Installs the hook run when this receiver closes.
    ///
    /// If the receiver is already closed the hook runs immediately.
    pub fn set_detach_hook(&self, hook: DetachHook) {
        if self.is_closed() {
            hook(self.id);
            return;
        }
        *lock(&self.detach) = Some(hook);
        // mark_closed may have raced between the check and the store.
        if self.is_closed() {
            if let Some(hook) = lock(&self.detach).take() {
                hook(self.id);
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Pushes one chunk to the connection.
    ///
    /// A send into a dropped channel closes the receiver.
    ///
    /// # Errors
    /// [`TransportError::ConnectionClosed`] if the receiver is closed or the
    /// other end of the channel is gone.
    pub fn send_chunk(&self, chunk: Bytes) -> Result<(), TransportError> {
        let sent = match lock(&self.sink).as_ref() {
            Some(sink) => sink.send(chunk).is_ok(),
            None => false,
        };
        if sent {
            Ok(())
        } else {
            self.mark_closed();
            Err(TransportError::ConnectionClosed(self.id))
        }
    }

    /// Closes the receiver: drops the outbound channel and runs the detach
    /// hook. Only the first call has any effect; it returns `true`.
    pub fn mark_closed(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        lock(&self.sink).take();
        debug!(receiver = %self.id, "receiver closed");
        if let Some(hook) = lock(&self.detach).take() {
            hook(self.id);
        }
        true
    }
}

impl fmt::Debug for ReceiverBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceiverBase")
            .field("id", &self.id)
            .field("addrs", &self.addrs)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
