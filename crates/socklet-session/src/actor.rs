//! Session actor: the task that owns a session's state.
//!
//! Everything that can change a session (adapter calls, application calls,
//! timer fires) arrives as a [`SessionCommand`] on one channel and is
//! handled to completion before the next one is read. Timers never touch
//! state directly; they post a command tagged with the generation they were
//! armed with, and a fire whose generation is no longer current is dropped.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use socklet_protocol::CloseReason;
use socklet_timer::{Scheduler, TimerHandle};
use socklet_transport::{PeerAddrs, Receiver, ReceiverId};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use crate::registry::RegistryInner;
use crate::session::{SessionCommand, SessionShared};
use crate::{
    CallbackResult, Session, SessionCallback, SessionConfig, SessionError, SessionId,
    SessionSnapshot, SessionState,
};

/// An armed timer and the generation its fires carry.
struct Armed {
    generation: u64,
    handle: TimerHandle,
}

impl Armed {
    fn cancel(self) {
        self.handle.cancel();
    }
}

pub(crate) struct SessionActor {
    session: Session,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    state: SessionState,
    /// Set once `on_open` has fired.
    opened: bool,
    state_tx: watch::Sender<SessionState>,
    addrs_tx: watch::Sender<PeerAddrs>,
    queue: VecDeque<String>,
    receiver: Option<Arc<dyn Receiver>>,
    close_reason: Option<CloseReason>,
    heartbeat: Option<Armed>,
    timeout: Option<Armed>,
    next_generation: u64,
    config: SessionConfig,
    scheduler: Arc<dyn Scheduler>,
    callback: Box<dyn SessionCallback>,
    registry: Weak<RegistryInner>,
}

/// Spawns a session actor and returns its handle.
///
/// The session starts in `Connecting` with its timeout already armed, so
/// a session nobody attaches to still expires.
///
/// # Panics
/// Panics if called outside a Tokio runtime.
pub(crate) fn spawn_session(
    id: SessionId,
    config: SessionConfig,
    scheduler: Arc<dyn Scheduler>,
    callback: Box<dyn SessionCallback>,
    registry: Weak<RegistryInner>,
) -> Session {
    let (commands_tx, commands) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
    let (addrs_tx, addrs_rx) = watch::channel(PeerAddrs::default());

    let session = Session {
        inner: Arc::new(SessionShared {
            id,
            commands: commands_tx,
            state: state_rx,
            addrs: addrs_rx,
        }),
    };

    let mut actor = SessionActor {
        session: session.clone(),
        commands,
        state: SessionState::Connecting,
        opened: false,
        state_tx,
        addrs_tx,
        queue: VecDeque::new(),
        receiver: None,
        close_reason: None,
        heartbeat: None,
        timeout: None,
        next_generation: 0,
        config,
        scheduler,
        callback,
        registry,
    };
    actor.arm_timeout();

    debug!(session = %session.id(), "session created");
    tokio::spawn(actor.run());
    session
}

impl SessionActor {
    async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            self.handle(command);
            if self.state == SessionState::Closed {
                break;
            }
        }
        debug!(session = %self.session.id(), "session actor stopped");
    }

    fn handle(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Attach { receiver, reply } => {
                let result = self.handle_attach(receiver);
                let _ = reply.send(result);
            }
            SessionCommand::Detach { receiver_id } => self.handle_detach(receiver_id),
            SessionCommand::Send { message } => self.handle_send(message),
            SessionCommand::Close { reason } => self.handle_close(reason),
            SessionCommand::Inbound { messages } => self.handle_inbound(messages),
            SessionCommand::Fail { cause } => self.handle_fail(cause),
            SessionCommand::Shutdown { reason } => self.handle_shutdown(reason),
            SessionCommand::HeartbeatFired {
                receiver_id,
                generation,
            } => self.handle_heartbeat(receiver_id, generation),
            SessionCommand::TimeoutFired { generation } => self.handle_timeout(generation),
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    // -----------------------------------------------------------------------
    // Command handlers
    // -----------------------------------------------------------------------

    fn handle_attach(&mut self, receiver: Arc<dyn Receiver>) -> Result<(), SessionError> {
        let id = self.session.id().clone();
        if self.state == SessionState::Closed {
            return Err(SessionError::Closed(id));
        }

        self.reap_closed_receiver();
        if let Some(current) = &self.receiver {
            debug!(
                session = %id,
                attached = %current.id(),
                rejected = %receiver.id(),
                "receiver conflict"
            );
            receiver.close(&CloseReason::another_connection());
            return Err(SessionError::ReceiverConflict(id));
        }

        debug!(session = %id, receiver = %receiver.id(), state = %self.state, "receiver attached");
        self.addrs_tx.send_replace(PeerAddrs::new(
            receiver.local_addr(),
            receiver.remote_addr(),
        ));
        self.cancel_timeout();
        self.receiver = Some(Arc::clone(&receiver));

        match self.state {
            SessionState::Closing => {
                if self.flush() && !receiver.is_closed() {
                    self.write_close(&receiver);
                }
            }
            SessionState::Connecting => {
                self.set_state(SessionState::Open);
                self.opened = true;
                self.arm_heartbeat(receiver.id());
                if !receiver.open() {
                    self.release_receiver();
                }
                info!(session = %id, "session opened");
                self.invoke(|callback, session| callback.on_open(session));
                self.flush();
            }
            SessionState::Open => {
                self.arm_heartbeat(receiver.id());
                self.flush();
            }
            SessionState::Closed => {}
        }

        self.reap_closed_receiver();
        Ok(())
    }

    fn handle_detach(&mut self, receiver_id: ReceiverId) {
        if self.is_attached(receiver_id) {
            debug!(session = %self.session.id(), receiver = %receiver_id, "receiver detached");
            self.release_receiver();
        }
    }

    fn handle_send(&mut self, message: String) {
        if self.state == SessionState::Closed {
            return;
        }
        self.queue.push_back(message);
        self.flush();
        self.reap_closed_receiver();
    }

    fn handle_close(&mut self, reason: CloseReason) {
        if !matches!(self.state, SessionState::Connecting | SessionState::Open) {
            return;
        }
        debug!(session = %self.session.id(), %reason, "close requested");
        self.close_reason = Some(reason);
        self.set_state(SessionState::Closing);
        self.cancel_heartbeat();

        self.reap_closed_receiver();
        if let Some(receiver) = self.receiver.clone() {
            if self.flush() && !receiver.is_closed() {
                self.write_close(&receiver);
            }
        }
        self.reap_closed_receiver();
    }

    fn handle_inbound(&mut self, messages: Vec<String>) {
        if self.state != SessionState::Open {
            let violation = format!("message received while {}", self.state);
            self.handle_fail(SessionError::ProtocolViolation(violation));
            return;
        }
        for message in messages {
            trace!(session = %self.session.id(), "message received");
            self.invoke(|callback, session| callback.on_message(session, message));
        }
    }

    fn handle_fail(&mut self, cause: SessionError) {
        if self.state == SessionState::Closed {
            return;
        }
        warn!(session = %self.session.id(), error = %cause, "session failed");

        if let Some(receiver) = self.receiver.take() {
            receiver.close(&CloseReason::go_away());
        }
        self.enter_closed();
        if self.opened {
            self.invoke(|callback, session| callback.on_close(session));
        }
        self.report(&cause);
    }

    fn handle_shutdown(&mut self, reason: CloseReason) {
        if self.state == SessionState::Closed {
            return;
        }
        info!(session = %self.session.id(), %reason, "session shut down");

        self.reap_closed_receiver();
        if let Some(receiver) = self.receiver.clone() {
            self.flush();
            receiver.close(&reason);
        }
        self.close_reason.get_or_insert(reason);
        self.enter_closed();
        if self.opened {
            self.invoke(|callback, session| callback.on_close(session));
        }
    }

    fn handle_heartbeat(&mut self, receiver_id: ReceiverId, generation: u64) {
        let current = self.heartbeat.as_ref().map(|armed| armed.generation);
        if current != Some(generation)
            || self.state != SessionState::Open
            || !self.is_attached(receiver_id)
        {
            // Stale fire racing a detach or re-arm.
            return;
        }

        self.reap_closed_receiver();
        let Some(receiver) = self.receiver.clone() else {
            return;
        };
        trace!(session = %self.session.id(), receiver = %receiver_id, "heartbeat");
        if !receiver.heartbeat() {
            self.release_receiver();
        }
        self.reap_closed_receiver();
    }

    fn handle_timeout(&mut self, generation: u64) {
        let current = self.timeout.as_ref().map(|armed| armed.generation);
        if current != Some(generation) || self.receiver.is_some() {
            return;
        }
        self.timeout = None;
        info!(session = %self.session.id(), state = %self.state, "session timed out");
        self.enter_closed();
        self.invoke(|callback, session| callback.on_close(session));
    }

    // -----------------------------------------------------------------------
    // Receiver slot
    // -----------------------------------------------------------------------

    fn is_attached(&self, receiver_id: ReceiverId) -> bool {
        self.receiver
            .as_ref()
            .is_some_and(|receiver| receiver.id() == receiver_id)
    }

    /// Treats a receiver that closed itself as detached.
    fn reap_closed_receiver(&mut self) {
        if self.receiver.as_ref().is_some_and(|r| r.is_closed()) {
            self.release_receiver();
        }
    }

    /// Clears the receiver slot and starts the countdown to expiry.
    fn release_receiver(&mut self) {
        if self.receiver.take().is_none() {
            return;
        }
        self.cancel_heartbeat();
        self.addrs_tx.send_replace(PeerAddrs::default());
        if self.state != SessionState::Closed {
            self.arm_timeout();
        }
    }

    /// Writes every queued message to the attached receiver as one batch.
    ///
    /// Returns `false` if the write failed; the messages stay queued and
    /// the receiver is released.
    fn flush(&mut self) -> bool {
        self.reap_closed_receiver();
        let Some(receiver) = self.receiver.clone() else {
            return false;
        };
        if self.queue.is_empty() {
            return true;
        }

        self.cancel_heartbeat();
        let written = receiver.write(self.queue.make_contiguous());
        if written {
            trace!(session = %self.session.id(), count = self.queue.len(), "flushed");
            self.queue.clear();
            if self.state == SessionState::Open && !receiver.is_closed() {
                self.arm_heartbeat(receiver.id());
            }
        } else {
            debug!(session = %self.session.id(), receiver = %receiver.id(), "flush failed");
            self.release_receiver();
        }
        written
    }

    /// Writes the close frame. Success completes the close.
    fn write_close(&mut self, receiver: &Arc<dyn Receiver>) {
        let reason = self.close_reason.clone().unwrap_or_default();
        if receiver.close(&reason) {
            self.receiver = None;
            self.enter_closed();
            self.invoke(|callback, session| callback.on_close(session));
        } else {
            self.release_receiver();
        }
    }

    // -----------------------------------------------------------------------
    // State and timers
    // -----------------------------------------------------------------------

    fn set_state(&mut self, state: SessionState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }

    /// Moves to `Closed`: timers off, slot cleared, removed from the
    /// registry. Callbacks are the caller's business.
    ///
    /// The registry entry is gone before `Closed` is published, so anyone
    /// who observes the state also observes the removal.
    fn enter_closed(&mut self) {
        self.cancel_heartbeat();
        self.cancel_timeout();
        self.receiver = None;
        self.addrs_tx.send_replace(PeerAddrs::default());
        self.state = SessionState::Closed;

        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.session);
        }
        self.state_tx.send_replace(SessionState::Closed);
        info!(session = %self.session.id(), "session closed");
    }

    fn arm_heartbeat(&mut self, receiver_id: ReceiverId) {
        self.cancel_heartbeat();
        let generation = self.next_generation();
        let commands = self.session.inner.commands.clone();
        let handle = self.scheduler.schedule_repeating(
            self.config.heartbeat_delay(),
            Box::new(move || {
                let _ = commands.send(SessionCommand::HeartbeatFired {
                    receiver_id,
                    generation,
                });
            }),
        );
        self.heartbeat = Some(Armed { generation, handle });
    }

    fn cancel_heartbeat(&mut self) {
        if let Some(armed) = self.heartbeat.take() {
            armed.cancel();
        }
    }

    fn arm_timeout(&mut self) {
        self.cancel_timeout();
        let generation = self.next_generation();
        let commands = self.session.inner.commands.clone();
        let handle = self.scheduler.schedule(
            self.config.timeout_delay(),
            Box::new(move || {
                let _ = commands.send(SessionCommand::TimeoutFired { generation });
            }),
        );
        self.timeout = Some(Armed { generation, handle });
    }

    fn cancel_timeout(&mut self) {
        if let Some(armed) = self.timeout.take() {
            armed.cancel();
        }
    }

    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    // -----------------------------------------------------------------------
    // Callbacks
    // -----------------------------------------------------------------------

    fn invoke(&mut self, f: impl FnOnce(&mut dyn SessionCallback, &Session) -> CallbackResult) {
        if let Err(err) = f(self.callback.as_mut(), &self.session) {
            self.report(&SessionError::Callback(err.to_string()));
        }
    }

    fn report(&mut self, error: &SessionError) {
        if self.callback.on_error(&self.session, error) {
            debug!(session = %self.session.id(), %error, "error handled by callback");
        } else {
            warn!(session = %self.session.id(), %error, "unhandled session error");
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            queued: self.queue.len(),
            receiver: self.receiver.as_ref().map(|r| r.id()),
            heartbeat_armed: self.heartbeat.is_some(),
            timeout_armed: self.timeout.is_some(),
            close_reason: self.close_reason.clone(),
        }
    }
}
