//! Session engine for Socklet.
//!
//! A *session* is the logical channel a browser keeps open across many
//! physical connections. A long-polling client makes a new HTTP request for
//! every batch, yet the application sees one continuous conversation. This
//! crate provides:
//!
//! 1. **The state machine** ([`Session`]): queueing, the single attached
//!    receiver, heartbeat and timeout timers, open/close frames.
//! 2. **Application hooks** ([`SessionCallback`]): what your code
//!    implements to react to open, message, close and error events.
//! 3. **The registry** ([`SessionRegistry`]): session id → session, with
//!    reuse, forced replacement and must-exist lookups.
//!
//! # How it fits in the stack
//!
//! ```text
//! HTTP adapters (above)  ← build receivers, call attach/receive
//!     ↕
//! Session layer (this crate)  ← state machine + registry
//!     ↕
//! Transport / Protocol (below)  ← Receiver trait, Frame encoding
//! ```
//!
//! # Concurrency
//!
//! Every session runs as its own Tokio task (an actor). [`Session`] is a
//! cheap handle that posts commands to it, so attach, detach, send, close
//! and timer fires are applied strictly one at a time without locks.

mod actor;
mod callback;
mod config;
mod error;
mod registry;
mod session;

pub use callback::{CallbackResult, SessionCallback, SessionCallbackFactory};
pub use config::SessionConfig;
pub use error::SessionError;
pub use registry::SessionRegistry;
pub use session::{Session, SessionId, SessionSnapshot, SessionState};
