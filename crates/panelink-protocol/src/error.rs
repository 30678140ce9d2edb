/// Errors surfaced to callers of the delivery layer.
///
/// Stream-level trouble (corrupt frames, duplicates, stray acks) is
/// recovered internally and only logged.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Frame-level error (e.g. payload larger than the configured maximum).
    #[error("frame error: {0}")]
    Frame(#[from] panelink_frame::FrameError),

    /// No acknowledgement arrived within the timeout on any attempt.
    #[error("frame {sequence} not acknowledged after {attempts} attempt(s)")]
    DeliveryTimeout { sequence: u16, attempts: u32 },

    /// A send for this sequence number is already waiting for its ack.
    #[error("sequence {0} already has a pending send")]
    SequenceInUse(u16),

    /// The caller's cancellation token fired.
    #[error("send cancelled")]
    Cancelled,

    /// The protocol has been shut down.
    #[error("protocol closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
