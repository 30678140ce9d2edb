//! Reliable delivery to the display controller over a noisy byte link.
//!
//! [`FrameProtocol`] layers acknowledgements, retransmission and duplicate
//! suppression on top of the checksummed frames from `panelink-frame`:
//!
//! - every data frame carries a sequence number and is retransmitted with
//!   the same number until the peer acks it or the retry budget runs out
//! - only one data frame is in flight at a time
//! - inbound data frames are always acked, and delivered at most once in
//!   increasing (wrapping) sequence order
//! - a transport reconnect resets inbound ordering, since the peer restarts
//!   its own numbering

pub mod config;
pub mod error;
mod incoming;
mod pending;
pub mod protocol;
mod session;

pub use config::{
    ProtocolConfig, SendOptions, DEFAULT_ACK_TIMEOUT, DEFAULT_READ_BUFFER_SIZE,
    DEFAULT_RETRY_COUNT, DEFAULT_RETRY_DELAY,
};
pub use error::{ProtocolError, Result};
pub use incoming::Incoming;
pub use protocol::{FrameProtocol, ProtocolStats};
pub use tokio_util::sync::CancellationToken;
