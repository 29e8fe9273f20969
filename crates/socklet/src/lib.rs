//! # Socklet
//!
//! Browser-compatible virtual sockets for Rust servers.
//!
//! A browser gets one logical, bidirectional, message-oriented channel per
//! session, carried over whichever physical transport works for it: a
//! WebSocket, a long-lived streaming HTTP response, or a series of
//! short polling requests. Applications implement [`SessionCallback`] and
//! Socklet handles framing, reconnection, heartbeats and timeouts.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use socklet::prelude::*;
//!
//! struct Echo;
//!
//! impl SessionCallback for Echo {
//!     fn on_message(&mut self, session: &Session, message: String) -> CallbackResult {
//!         session.send(message)?;
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> Result<(), SockletError> {
//! let echo = ServiceBuilder::new()
//!     .prefix("/echo")
//!     .build(|_: &SessionId| Box::new(Echo) as Box<dyn SessionCallback>);
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8090").await?;
//! socklet::serve(listener, echo.router()).await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod service;
mod websocket;

pub use config::ServiceConfig;
pub use error::SockletError;
pub use service::{ConnectionInfo, Service, ServiceBuilder, serve};

pub use socklet_protocol as protocol;
pub use socklet_session as session;
pub use socklet_timer as timer;
pub use socklet_transport as transport;

pub(crate) const CONTENT_TYPE_PLAIN: &str = "text/plain; charset=UTF-8";

/// Everything an application needs to define and run a service.
pub mod prelude {
    pub use crate::{Service, ServiceBuilder, ServiceConfig, SockletError, serve};
    pub use socklet_protocol::CloseReason;
    pub use socklet_session::{
        CallbackResult, Session, SessionCallback, SessionCallbackFactory, SessionConfig,
        SessionError, SessionId, SessionState,
    };
}
