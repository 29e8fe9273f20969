//! `Service` builder and router.
//!
//! A service is one URL prefix with one callback factory. It owns the
//! session registry and knows how to turn itself into an axum [`Router`];
//! several services can be merged into one application.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::connect_info::Connected;
use axum::routing::{get, post};
use axum::serve::IncomingStream;
use socklet_session::{SessionCallbackFactory, SessionConfig, SessionRegistry};
use socklet_timer::{Scheduler, TokioScheduler};
use socklet_transport::PeerAddrs;
use tokio::net::TcpListener;

use crate::{ServiceConfig, SockletError, handler, websocket};

/// Builder for a [`Service`].
///
/// # Example
///
/// ```rust,ignore
/// use socklet::prelude::*;
///
/// let echo = ServiceBuilder::new()
///     .prefix("/echo")
///     .build(|_: &SessionId| Box::new(Echo) as Box<dyn SessionCallback>);
/// socklet::serve(listener, echo.router()).await?;
/// ```
pub struct ServiceBuilder {
    config: ServiceConfig,
    scheduler: Option<Arc<dyn Scheduler>>,
}

impl ServiceBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ServiceConfig::default(),
            scheduler: None,
        }
    }

    /// Starts from an existing configuration.
    pub fn from_config(config: ServiceConfig) -> Self {
        Self {
            config,
            scheduler: None,
        }
    }

    /// Sets the URL prefix, e.g. `/echo`.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.prefix = prefix.into();
        self
    }

    pub fn websocket_enabled(mut self, enabled: bool) -> Self {
        self.config.websocket_enabled = enabled;
        self
    }

    /// Sets the byte ceiling of one streaming response.
    pub fn max_response_size(mut self, bytes: usize) -> Self {
        self.config.max_response_size = bytes;
        self
    }

    pub fn cookie_needed(mut self, needed: bool) -> Self {
        self.config.cookie_needed = needed;
        self
    }

    /// Sets the heartbeat and timeout delays.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.config.session = config;
        self
    }

    /// Uses `scheduler` for session timers instead of Tokio's clock.
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Builds the service. `factory` creates the callback for each session.
    ///
    /// # Panics
    /// Panics if no scheduler was set and this is called outside a Tokio
    /// runtime.
    pub fn build(self, factory: impl SessionCallbackFactory) -> Service {
        let scheduler = self
            .scheduler
            .unwrap_or_else(|| Arc::new(TokioScheduler::new()));
        let registry = SessionRegistry::new(self.config.session.clone(), scheduler, factory);
        Service {
            inner: Arc::new(ServiceInner {
                config: self.config,
                registry,
            }),
        }
    }
}

impl Default for ServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct ServiceInner {
    config: ServiceConfig,
    registry: SessionRegistry,
}

/// A built service. Cheap to clone; clones share sessions.
#[derive(Clone)]
pub struct Service {
    inner: Arc<ServiceInner>,
}

impl Service {
    /// Creates a new builder.
    pub fn builder() -> ServiceBuilder {
        ServiceBuilder::new()
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    /// The sessions of this service.
    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    /// Builds the axum router, already nested under the service prefix.
    pub fn router(&self) -> Router {
        let mut routes = Router::new()
            .route("/", get(handler::greeting))
            .route("/info", get(handler::info))
            .route("/{server}/{session}/xhr", post(handler::xhr_poll))
            .route("/{server}/{session}/jsonp", get(handler::jsonp_poll))
            .route("/{server}/{session}/xhr_streaming", post(handler::xhr_streaming))
            .route("/{server}/{session}/eventsource", get(handler::eventsource))
            .route("/{server}/{session}/htmlfile", get(handler::htmlfile))
            .route("/{server}/{session}/xhr_send", post(handler::xhr_send))
            .route("/{server}/{session}/jsonp_send", post(handler::jsonp_send));

        if self.inner.config.websocket_enabled {
            routes = routes
                .route("/{server}/{session}/websocket", get(websocket::framed))
                .route("/websocket", get(websocket::raw));
        }

        let routes = routes.with_state(self.clone());
        let prefix = self.inner.config.normalized_prefix();
        if prefix.is_empty() {
            routes
        } else {
            Router::new().nest(&prefix, routes)
        }
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("config", &self.inner.config)
            .field("sessions", &self.inner.registry.len())
            .finish()
    }
}

/// Both ends of an accepted TCP connection, recorded by [`serve`] so
/// sessions can report their local and remote addresses.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionInfo {
    pub local: Option<SocketAddr>,
    pub remote: SocketAddr,
}

impl From<ConnectionInfo> for PeerAddrs {
    fn from(info: ConnectionInfo) -> Self {
        PeerAddrs::new(info.local, Some(info.remote))
    }
}

impl Connected<IncomingStream<'_, TcpListener>> for ConnectionInfo {
    fn connect_info(stream: IncomingStream<'_, TcpListener>) -> Self {
        Self {
            local: stream.io().local_addr().ok(),
            remote: *stream.remote_addr(),
        }
    }
}

/// Serves `router` on `listener` until the process stops.
///
/// Use this rather than `axum::serve` directly so handlers can see
/// connection addresses.
///
/// # Errors
/// Returns [`SockletError::Io`] if the accept loop fails.
pub async fn serve(listener: TcpListener, router: Router) -> Result<(), SockletError> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "socklet listening");
    }
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<ConnectionInfo>(),
    )
    .await?;
    Ok(())
}
