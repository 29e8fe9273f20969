use crate::ReceiverId;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The receiver was already closed when a chunk was pushed to it.
    #[error("connection closed: {0}")]
    ConnectionClosed(ReceiverId),

    /// A JSONP or htmlfile request arrived without its `c` parameter.
    #[error("\"callback\" parameter required")]
    MissingCallback,

    /// The physical connection failed while reading or writing.
    #[error("connection error: {0}")]
    Io(#[source] std::io::Error),
}
