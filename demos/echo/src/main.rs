use std::sync::Arc;

use axum::Router;
use dashmap::DashMap;
use socklet::prelude::*;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_BIND: &str = "127.0.0.1:8090";

// ---------------------------------------------------------------------------
// Echo
// ---------------------------------------------------------------------------

/// Sends every message straight back.
struct Echo;

impl SessionCallback for Echo {
    fn on_message(&mut self, session: &Session, message: String) -> CallbackResult {
        session.send(message)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Close
// ---------------------------------------------------------------------------

/// Closes every session as soon as it opens.
struct CloseOnOpen;

impl SessionCallback for CloseOnOpen {
    fn on_open(&mut self, session: &Session) -> CallbackResult {
        session.close_with(CloseReason::go_away());
        Ok(())
    }

    fn on_message(&mut self, _: &Session, _: String) -> CallbackResult {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Broadcast
// ---------------------------------------------------------------------------

type Members = Arc<DashMap<SessionId, Session>>;

/// Relays every message to all open sessions of the service.
struct Broadcast {
    members: Members,
}

impl SessionCallback for Broadcast {
    fn on_open(&mut self, session: &Session) -> CallbackResult {
        self.members.insert(session.id().clone(), session.clone());
        Ok(())
    }

    fn on_close(&mut self, session: &Session) -> CallbackResult {
        self.members
            .remove_if(session.id(), |_, member| Session::ptr_eq(member, session));
        Ok(())
    }

    fn on_message(&mut self, _: &Session, message: String) -> CallbackResult {
        // Shard locks must not be held across a send.
        let members: Vec<Session> = self.members.iter().map(|m| m.value().clone()).collect();
        for member in members {
            // Members may be closing.
            let _ = member.send(message.clone());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Server bootstrap
// ---------------------------------------------------------------------------

fn app() -> Router {
    let echo = ServiceBuilder::new()
        .prefix("/echo")
        .build(|_: &SessionId| Box::new(Echo) as Box<dyn SessionCallback>);

    let no_websocket = ServiceBuilder::new()
        .prefix("/disabled_websocket_echo")
        .websocket_enabled(false)
        .build(|_: &SessionId| Box::new(Echo) as Box<dyn SessionCallback>);

    let close = ServiceBuilder::new()
        .prefix("/close")
        .build(|_: &SessionId| Box::new(CloseOnOpen) as Box<dyn SessionCallback>);

    let members = Members::default();
    let broadcast = ServiceBuilder::new().prefix("/broadcast").build(move |_: &SessionId| {
        Box::new(Broadcast {
            members: Arc::clone(&members),
        }) as Box<dyn SessionCallback>
    });

    echo.router()
        .merge(no_websocket.router())
        .merge(close.router())
        .merge(broadcast.router())
}

#[tokio::main]
async fn main() -> Result<(), SockletError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let bind = std::env::var("SOCKLET_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_owned());
    let listener = TcpListener::bind(&bind).await?;
    info!(addr = %listener.local_addr()?, "echo demo listening");

    socklet::serve(listener, app()).await
}
