/// Errors that can occur during frame encoding/decoding.
///
/// Corrupt input on the wire is never an error: the parser resynchronizes
/// and logs instead.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The body exceeds the configured maximum size.
    #[error("frame body too large ({size} bytes, max {max})")]
    BodyTooLarge { size: usize, max: usize },

    /// The caller-provided output buffer cannot hold the encoded frame.
    #[error("output buffer too small ({available} bytes, need {needed})")]
    BufferTooSmall { needed: usize, available: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended before another complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
