use bytes::{BufMut, Bytes, BytesMut};

use crate::crc::{checksum, Crc16};
use crate::error::{FrameError, Result};
use crate::kind::FrameKind;

/// Magic bytes opening every frame.
pub const MAGIC: [u8; 2] = [0x19, 0x16];

/// Header: magic (2) + length (2) + sequence (2) + kind (1) = 7 bytes.
pub const HEADER_SIZE: usize = 7;

/// Trailing CRC-16.
pub const CHECKSUM_SIZE: usize = 2;

/// Largest body the 16-bit length field can describe.
pub const MAX_BODY_SIZE: usize = u16::MAX as usize;

/// Default maximum body size accepted by the parser.
pub const DEFAULT_MAX_BODY: usize = MAX_BODY_SIZE;

pub(crate) const LENGTH_OFFSET: usize = 2;
pub(crate) const SEQUENCE_OFFSET: usize = 4;
pub(crate) const KIND_OFFSET: usize = 6;

/// A validated frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Sequence number, wraps at 65535.
    pub sequence: u16,
    /// Data or acknowledgement.
    pub kind: FrameKind,
    /// Opaque application payload (empty for acks).
    pub body: Bytes,
}

impl Frame {
    /// Create a data frame.
    pub fn data(sequence: u16, body: impl Into<Bytes>) -> Self {
        Self {
            sequence,
            kind: FrameKind::Data,
            body: body.into(),
        }
    }

    /// Create an acknowledgement for `sequence`.
    pub fn ack(sequence: u16) -> Self {
        Self {
            sequence,
            kind: FrameKind::Ack,
            body: Bytes::new(),
        }
    }

    /// The total wire size of this frame.
    pub fn wire_size(&self) -> usize {
        frame_size(self.body.len())
    }
}

/// Exact number of wire bytes for a frame with a `body_len`-byte body.
pub const fn frame_size(body_len: usize) -> usize {
    HEADER_SIZE + body_len + CHECKSUM_SIZE
}

/// Serialize a frame into a caller-provided buffer without allocating.
///
/// Wire format (all integers big-endian):
/// ```text
/// ┌────────────┬──────────┬──────────┬──────┬──────────────┬──────────┐
/// │ Magic (2B) │ Length   │ Sequence │ Kind │ Body         │ CRC-16   │
/// │ 0x19 0x16  │ (2B BE)  │ (2B BE)  │ (1B) │ (Length B)   │ (2B BE)  │
/// └────────────┴──────────┴──────────┴──────┴──────────────┴──────────┘
/// ```
/// The CRC covers magic through body. Returns the number of bytes written.
pub fn encode_into(sequence: u16, kind: FrameKind, body: &[u8], dst: &mut [u8]) -> Result<usize> {
    if body.len() > MAX_BODY_SIZE {
        return Err(FrameError::BodyTooLarge {
            size: body.len(),
            max: MAX_BODY_SIZE,
        });
    }
    let needed = frame_size(body.len());
    if dst.len() < needed {
        return Err(FrameError::BufferTooSmall {
            needed,
            available: dst.len(),
        });
    }

    let body_end = HEADER_SIZE + body.len();
    dst[..LENGTH_OFFSET].copy_from_slice(&MAGIC);
    dst[LENGTH_OFFSET..SEQUENCE_OFFSET].copy_from_slice(&(body.len() as u16).to_be_bytes());
    dst[SEQUENCE_OFFSET..KIND_OFFSET].copy_from_slice(&sequence.to_be_bytes());
    dst[KIND_OFFSET] = kind.as_byte();
    dst[HEADER_SIZE..body_end].copy_from_slice(body);

    let crc = Crc16::new()
        .update(&dst[..HEADER_SIZE])
        .update(body)
        .finish();
    dst[body_end..needed].copy_from_slice(&crc.to_be_bytes());

    Ok(needed)
}

/// Append an encoded frame to a growable buffer.
pub fn encode_frame(sequence: u16, kind: FrameKind, body: &[u8], dst: &mut BytesMut) -> Result<()> {
    if body.len() > MAX_BODY_SIZE {
        return Err(FrameError::BodyTooLarge {
            size: body.len(),
            max: MAX_BODY_SIZE,
        });
    }
    let start = dst.len();
    dst.reserve(frame_size(body.len()));
    dst.put_slice(&MAGIC);
    dst.put_u16(body.len() as u16);
    dst.put_u16(sequence);
    dst.put_u8(kind.as_byte());
    dst.put_slice(body);
    let crc = checksum(&dst[start..]);
    dst.put_u16(crc);
    Ok(())
}

/// Configuration for frame parsing and writing.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum body size in bytes. Values above 65535 are clamped.
    ///
    /// A length field above this limit is treated as a false magic match,
    /// which keeps a corrupted length from stalling the parser.
    pub max_body_size: usize,
}

impl FrameConfig {
    /// The configured limit, clamped to what the length field can express.
    pub fn effective_max_body(&self) -> usize {
        self.max_body_size.min(MAX_BODY_SIZE)
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_body_size: DEFAULT_MAX_BODY,
        }
    }
}
