//! Checksummed, resynchronizing framing for noisy serial links.
//!
//! Every message on the link to the display controller is framed with:
//! - A 2-byte magic number (`0x19 0x16`) for stream synchronization
//! - A 2-byte big-endian body length
//! - A 2-byte big-endian sequence number
//! - A 1-byte kind (data or ack)
//! - The body, then a big-endian CRC-16/CCITT over everything before it
//!
//! The parser tolerates arbitrary read boundaries, diagnostic text sharing
//! the link, and corrupted frames: it resynchronizes on the next magic and
//! only ever yields frames whose checksum matched.

pub mod codec;
pub mod crc;
pub mod error;
pub mod framer;
pub mod kind;
pub mod reader;
pub mod writer;

pub use codec::{
    encode_frame, encode_into, frame_size, Frame, FrameConfig, CHECKSUM_SIZE, DEFAULT_MAX_BODY,
    HEADER_SIZE, MAGIC, MAX_BODY_SIZE,
};
pub use crc::{checksum, checksum_parts, Crc16};
pub use error::{FrameError, Result};
pub use framer::{DecodeStats, FrameCodec, Framer, ParseState};
pub use kind::FrameKind;
pub use reader::FrameReader;
pub use writer::FrameWriter;
