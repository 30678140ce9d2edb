//! Reliable framed messaging between a host service and a display controller.
//!
//! The controller hangs off a serial cable or an RFCOMM socket whose byte
//! stream is shared with its diagnostic console and occasionally corrupted.
//! panelink turns that stream into acknowledged, ordered, deduplicated
//! message delivery in both directions.
//!
//! # Crate Structure
//!
//! - [`transport`]: the byte-link contract plus stream and in-memory links
//! - [`frame`]: checksummed wire format and the resynchronizing parser
//! - [`protocol`]: acks, retransmission, duplicate suppression

/// Re-export transport types.
pub mod transport {
    pub use panelink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use panelink_frame::*;
}

/// Re-export protocol types.
pub mod protocol {
    pub use panelink_protocol::*;
}
