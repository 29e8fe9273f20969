//! Application hooks.
//!
//! The session actor owns exactly one [`SessionCallback`] and calls it
//! from its own task, one event at a time. That is why the methods take
//! `&mut self` and the trait only needs `Send`: no two events for the same
//! session ever run concurrently.

use std::error::Error;

use crate::{Session, SessionError, SessionId};

/// What a callback returns. Errors are routed to
/// [`SessionCallback::on_error`] and never change the session's state.
pub type CallbackResult = Result<(), Box<dyn Error + Send + Sync>>;

/// Reacts to the events of one session.
///
/// Callbacks run inside the session's actor, so they must not block.
/// Calling [`Session::send`] or [`Session::close`] from a callback is fine:
/// both just queue a command for the actor.
///
/// ```ignore
/// struct Echo;
///
/// impl SessionCallback for Echo {
///     fn on_message(&mut self, session: &Session, message: String) -> CallbackResult {
///         session.send(message)?;
///         Ok(())
///     }
/// }
/// ```
pub trait SessionCallback: Send + 'static {
    /// The first receiver attached and the open frame was written.
    fn on_open(&mut self, _session: &Session) -> CallbackResult {
        Ok(())
    }

    /// The session reached its terminal state. Called at most once.
    fn on_close(&mut self, _session: &Session) -> CallbackResult {
        Ok(())
    }

    /// The client sent a message.
    fn on_message(&mut self, session: &Session, message: String) -> CallbackResult;

    /// Something went wrong: a callback failed or the session died.
    ///
    /// Return `true` if the error was handled. The session's own state has
    /// already been decided either way; the return value only controls
    /// whether the error is logged as a warning.
    fn on_error(&mut self, _session: &Session, _error: &SessionError) -> bool {
        false
    }
}

/// Creates the callback for each new session.
///
/// Any `Fn(&SessionId) -> Box<dyn SessionCallback>` closure works:
///
/// ```ignore
/// let registry = SessionRegistry::new(config, scheduler, |_: &SessionId| {
///     Box::new(Echo) as Box<dyn SessionCallback>
/// });
/// ```
pub trait SessionCallbackFactory: Send + Sync + 'static {
    fn create(&self, id: &SessionId) -> Box<dyn SessionCallback>;
}

impl<F> SessionCallbackFactory for F
where
    F: Fn(&SessionId) -> Box<dyn SessionCallback> + Send + Sync + 'static,
{
    fn create(&self, id: &SessionId) -> Box<dyn SessionCallback> {
        self(id)
    }
}
