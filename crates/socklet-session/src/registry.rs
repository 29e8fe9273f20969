//! The session registry: every live session, keyed by id.
//!
//! The registry decides *which* session a request talks to:
//!
//! - [`get_or_create_session`](SessionRegistry::get_or_create_session) for
//!   polling and streaming receivers, which reconnect to the same session.
//! - [`force_create_session`](SessionRegistry::force_create_session) for
//!   WebSockets, where each connection is a fresh session.
//! - [`get_session`](SessionRegistry::get_session) for send endpoints,
//!   which must not conjure a session out of thin air.
//!
//! # Concurrency note
//!
//! The map is a [`DashMap`], so lookups from many adapter tasks don't
//! contend on one lock. Creation goes through the entry API: when two
//! requests race to create the same id, exactly one session is spawned and
//! both get it.
//!
//! Sessions remove themselves when they close. They hold only a `Weak`
//! reference back to the registry, and removal checks identity, so a
//! session that was already replaced can't evict its successor.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use socklet_protocol::CloseReason;
use socklet_timer::Scheduler;
use tracing::{debug, info};

use crate::actor::spawn_session;
use crate::{Session, SessionCallbackFactory, SessionConfig, SessionError, SessionId, SessionState};

pub(crate) struct RegistryInner {
    sessions: DashMap<SessionId, Session>,
    config: SessionConfig,
    scheduler: Arc<dyn Scheduler>,
    factory: Box<dyn SessionCallbackFactory>,
}

impl RegistryInner {
    /// Removes `session` if it is still the one registered under its id.
    pub(crate) fn remove(&self, session: &Session) -> bool {
        let removed = self
            .sessions
            .remove_if(session.id(), |_, current| Session::ptr_eq(current, session))
            .is_some();
        if removed {
            debug!(session = %session.id(), remaining = self.sessions.len(), "session removed");
        }
        removed
    }
}

/// Concurrent map from session id to [`Session`].
///
/// Cheap to clone; clones share the same map.
///
/// All creating methods spawn a session actor, so they must be called from
/// within a Tokio runtime.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    ///
    /// `scheduler` supplies heartbeat and timeout timers for every session;
    /// `factory` creates the application callback for each new one.
    pub fn new(
        config: SessionConfig,
        scheduler: Arc<dyn Scheduler>,
        factory: impl SessionCallbackFactory,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: DashMap::new(),
                config,
                scheduler,
                factory: Box::new(factory),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Returns the session for `id`, creating it if absent.
    ///
    /// A session that has closed but not yet removed itself is replaced.
    pub fn get_or_create_session(&self, id: &SessionId) -> Session {
        if let Some(existing) = self.inner.sessions.get(id) {
            if existing.state() != SessionState::Closed {
                return existing.clone();
            }
        }

        match self.inner.sessions.entry(id.clone()) {
            Entry::Occupied(entry) if entry.get().state() != SessionState::Closed => {
                entry.get().clone()
            }
            Entry::Occupied(mut entry) => {
                let session = self.spawn(id);
                entry.insert(session.clone());
                session
            }
            Entry::Vacant(entry) => {
                let session = self.spawn(id);
                entry.insert(session.clone());
                session
            }
        }
    }

    /// Returns the session for `id` without creating one.
    ///
    /// # Errors
    /// [`SessionError::NotFound`] if no session is registered under `id`.
    pub fn get_session(&self, id: &SessionId) -> Result<Session, SessionError> {
        self.inner
            .sessions
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SessionError::NotFound(id.clone()))
    }

    /// Installs a brand-new session under `id`.
    ///
    /// A session previously registered under `id` is shut down with
    /// `3000 "Go away!"`.
    pub fn force_create_session(&self, id: &SessionId) -> Session {
        let session = self.spawn(id);
        if let Some(previous) = self.inner.sessions.insert(id.clone(), session.clone()) {
            info!(session = %id, "replacing existing session");
            previous.shutdown(CloseReason::go_away());
        }
        session
    }

    /// Removes `session` only if it is still the registered instance for its
    /// id. Returns whether anything was removed.
    pub fn remove_session(&self, session: &Session) -> bool {
        self.inner.remove(session)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.inner.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    fn spawn(&self, id: &SessionId) -> Session {
        let callback = self.inner.factory.create(id);
        spawn_session(
            id.clone(),
            self.inner.config.clone(),
            Arc::clone(&self.inner.scheduler),
            callback,
            Arc::downgrade(&self.inner),
        )
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .field("config", &self.inner.config)
            .finish()
    }
}
