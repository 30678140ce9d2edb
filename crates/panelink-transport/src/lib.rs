//! Byte-link transport contract.
//!
//! The reliable framing layer only needs three things from the link to the
//! display controller: a way to read whatever bytes are available, a way to
//! write a complete buffer, and a notification whenever the session has been
//! re-established. Opening and reopening the serial port or RFCOMM socket is
//! left to the owner of the transport.
//!
//! - [`StreamTransport`] adapts any tokio duplex stream and can be re-attached
//!   to a fresh stream after a reconnect.
//! - [`MemoryTransport`] is an in-memory pair used for loopback and tests.

pub mod error;
pub mod memory;
pub mod stream;
pub mod traits;

pub use error::{Result, TransportError};
pub use memory::MemoryTransport;
pub use stream::StreamTransport;
pub use traits::Transport;
