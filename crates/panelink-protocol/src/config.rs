use std::time::Duration;

use panelink_frame::FrameConfig;

/// Default time to wait for an ack before retransmitting.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of transmissions per send, including the first.
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// Default pause between an ack timeout and the retransmission.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Default size of the reader's transport read buffer.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 2 * 1024;

/// Per-send delivery policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOptions {
    /// How long each transmission waits for its ack.
    pub timeout: Duration,
    /// Total transmissions before giving up. Zero is treated as one.
    pub retry_count: u32,
    /// Pause after a timed-out transmission before the next one.
    pub retry_delay: Duration,
}

impl SendOptions {
    pub(crate) fn attempts(&self) -> u32 {
        self.retry_count.max(1)
    }
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_ACK_TIMEOUT,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Configuration for a [`FrameProtocol`](crate::FrameProtocol) instance.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Framing limits shared by the parser and outbound frames.
    pub frame: FrameConfig,
    /// Bytes requested from the transport per read.
    pub read_buffer_size: usize,
    /// Policy used by [`FrameProtocol::send`](crate::FrameProtocol::send).
    pub send: SendOptions,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            send: SendOptions::default(),
        }
    }
}
