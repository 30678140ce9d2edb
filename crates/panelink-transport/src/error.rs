/// Errors that can occur on the byte link.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// An I/O error occurred on the underlying stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No stream is currently attached (the link is between sessions).
    #[error("transport not connected")]
    NotConnected,

    /// The remote end has gone away for good.
    #[error("transport closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;
