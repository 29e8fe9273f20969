//! Error type of the `socklet` crate and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use socklet_protocol::ProtocolError;
use socklet_session::SessionError;
use socklet_transport::TransportError;

/// Any failure surfaced by a service: sub-crate errors plus request and
/// listener problems.
///
/// HTTP handlers return it directly. The [`IntoResponse`] impl picks the
/// status and plain-text body a SockJS client expects.
#[derive(Debug, thiserror::Error)]
pub enum SockletError {
    /// A transport-level error (closed receiver, missing callback).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (payload that doesn't decode).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (unknown session, closed session).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A send request carried no payload.
    #[error("payload expected")]
    PayloadExpected,

    /// Reading a request body failed.
    #[error("request body: {0}")]
    Body(#[from] axum::Error),

    /// Binding or serving failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl IntoResponse for SockletError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::Session(SessionError::NotFound(_) | SessionError::Closed(_)) => (
                StatusCode::NOT_FOUND,
                "Session not found. Cannot send data to non-existing session.",
            ),
            Self::Transport(TransportError::MissingCallback) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "\"callback\" parameter required",
            ),
            Self::Protocol(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Broken JSON encoding."),
            Self::PayloadExpected => (StatusCode::INTERNAL_SERVER_ERROR, "Payload expected."),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        };
        tracing::debug!(error = %self, status = status.as_u16(), "request failed");
        (status, [(axum::http::header::CONTENT_TYPE, crate::CONTENT_TYPE_PLAIN)], body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use socklet_session::SessionId;
    use socklet_transport::ReceiverId;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed(ReceiverId::new(7));
        let socklet_err: SockletError = err.into();
        assert!(matches!(socklet_err, SockletError::Transport(_)));
        assert!(socklet_err.to_string().contains("recv-7"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidPayload("bad".into());
        let socklet_err: SockletError = err.into();
        assert!(matches!(socklet_err, SockletError::Protocol(_)));
    }

    #[test]
    fn test_from_session_error() {
        let err = SessionError::NotFound(SessionId::from("abc"));
        let socklet_err: SockletError = err.into();
        assert!(matches!(socklet_err, SockletError::Session(_)));
        assert!(socklet_err.to_string().contains("abc"));
    }

    #[test]
    fn test_into_response_not_found_is_404() {
        let err = SockletError::from(SessionError::NotFound(SessionId::from("abc")));
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_into_response_missing_callback_is_500() {
        let err = SockletError::from(TransportError::MissingCallback);
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
