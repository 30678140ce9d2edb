//! Incremental, resynchronizing frame parser.
//!
//! The link to the peripheral is shared with its diagnostic console, so the
//! parser cannot assume the stream starts on a frame boundary or that every
//! magic-looking byte starts a frame. Bytes are kept from the first byte of
//! the current candidate frame; whenever a candidate fails validation the
//! parser drops exactly that first byte and scans again, so a real frame that
//! overlaps a false start is still found.

use bytes::{Buf, BytesMut};
use tracing::{debug, trace, warn};

use crate::codec::{
    Frame, FrameConfig, CHECKSUM_SIZE, HEADER_SIZE, KIND_OFFSET, LENGTH_OFFSET, MAGIC,
    SEQUENCE_OFFSET,
};
use crate::crc::Crc16;
use crate::kind::FrameKind;

const INITIAL_BUFFER_CAPACITY: usize = 2 * 1024;

/// Where the parse cursor currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    SeekingMagic,
    ReadingLength,
    ReadingSequence,
    ReadingKind,
    ReadingBody,
    ReadingChecksum,
}

/// Counters describing what the parser has seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Frames emitted.
    pub frames: u64,
    /// Candidates dropped because the CRC did not match.
    pub checksum_errors: u64,
    /// Candidates dropped because the length field exceeded the maximum.
    pub oversized: u64,
    /// Valid frames ignored because of an unknown KIND byte.
    pub unknown_kind: u64,
    /// Bytes discarded while searching for a frame start.
    pub skipped_bytes: u64,
}

/// Frame parser state machine over an externally owned buffer.
///
/// `src` must be the same buffer across calls, with new bytes appended at
/// the end; the codec never looks at bytes before the current candidate.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_body_size: usize,
    state: ParseState,
    length: usize,
    sequence: u16,
    kind: u8,
    stats: DecodeStats,
}

impl FrameCodec {
    pub fn new(config: &FrameConfig) -> Self {
        Self {
            max_body_size: config.effective_max_body(),
            state: ParseState::SeekingMagic,
            length: 0,
            sequence: 0,
            kind: 0,
            stats: DecodeStats::default(),
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    /// Forget the current candidate. The caller should clear its buffer too.
    pub fn reset(&mut self) {
        self.state = ParseState::SeekingMagic;
        self.length = 0;
        self.sequence = 0;
        self.kind = 0;
    }

    /// Try to extract the next frame from `src`.
    ///
    /// Returns `None` when more bytes are needed. Validated frames are
    /// removed from `src`; garbage before a candidate is discarded.
    pub fn decode_frame(&mut self, src: &mut BytesMut) -> Option<Frame> {
        loop {
            match self.state {
                ParseState::SeekingMagic => {
                    match src.iter().position(|&b| b == MAGIC[0]) {
                        Some(pos) => self.skip(src, pos),
                        None => {
                            let len = src.len();
                            self.skip(src, len);
                            return None;
                        }
                    }
                    if src.len() < MAGIC.len() {
                        return None;
                    }
                    if src[..MAGIC.len()] != MAGIC {
                        self.skip(src, 1);
                        continue;
                    }
                    self.state = ParseState::ReadingLength;
                }
                ParseState::ReadingLength => {
                    if src.len() < SEQUENCE_OFFSET {
                        return None;
                    }
                    let length =
                        usize::from(u16::from_be_bytes([src[LENGTH_OFFSET], src[LENGTH_OFFSET + 1]]));
                    if length > self.max_body_size {
                        debug!(
                            length,
                            max = self.max_body_size,
                            "implausible frame length; resynchronizing"
                        );
                        self.stats.oversized += 1;
                        self.resync(src);
                        continue;
                    }
                    self.length = length;
                    self.state = ParseState::ReadingSequence;
                }
                ParseState::ReadingSequence => {
                    if src.len() < KIND_OFFSET {
                        return None;
                    }
                    self.sequence = u16::from_be_bytes([src[SEQUENCE_OFFSET], src[SEQUENCE_OFFSET + 1]]);
                    self.state = ParseState::ReadingKind;
                }
                ParseState::ReadingKind => {
                    if src.len() < HEADER_SIZE {
                        return None;
                    }
                    self.kind = src[KIND_OFFSET];
                    self.state = ParseState::ReadingBody;
                }
                ParseState::ReadingBody => {
                    if src.len() < HEADER_SIZE + self.length {
                        return None;
                    }
                    self.state = ParseState::ReadingChecksum;
                }
                ParseState::ReadingChecksum => {
                    let body_end = HEADER_SIZE + self.length;
                    let frame_end = body_end + CHECKSUM_SIZE;
                    if src.len() < frame_end {
                        return None;
                    }

                    let expected = u16::from_be_bytes([src[body_end], src[body_end + 1]]);
                    let actual = Crc16::new()
                        .update(&src[..HEADER_SIZE])
                        .update(&src[HEADER_SIZE..body_end])
                        .finish();
                    if expected != actual {
                        warn!(
                            sequence = self.sequence,
                            length = self.length,
                            expected,
                            actual,
                            "frame checksum mismatch; resynchronizing"
                        );
                        self.stats.checksum_errors += 1;
                        self.resync(src);
                        continue;
                    }

                    let Some(kind) = FrameKind::from_byte(self.kind) else {
                        warn!(
                            kind = self.kind,
                            sequence = self.sequence,
                            "unknown frame kind; ignoring frame"
                        );
                        self.stats.unknown_kind += 1;
                        src.advance(frame_end);
                        self.reset();
                        continue;
                    };

                    src.advance(HEADER_SIZE);
                    let body = src.split_to(self.length).freeze();
                    src.advance(CHECKSUM_SIZE);

                    let frame = Frame {
                        sequence: self.sequence,
                        kind,
                        body,
                    };
                    trace!(sequence = frame.sequence, kind = %frame.kind, len = frame.body.len(), "frame decoded");
                    self.stats.frames += 1;
                    self.reset();
                    return Some(frame);
                }
            }
        }
    }

    fn skip(&mut self, src: &mut BytesMut, count: usize) {
        if count > 0 {
            src.advance(count);
            self.stats.skipped_bytes += count as u64;
        }
    }

    /// Drop the candidate's first byte and go back to scanning.
    fn resync(&mut self, src: &mut BytesMut) {
        self.reset();
        self.skip(src, 1);
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(&FrameConfig::default())
    }
}

/// Push-style parser that owns its buffer.
///
/// Feed it whatever the link produced, in pieces of any size, and collect the
/// frames that became complete.
#[derive(Debug)]
pub struct Framer {
    codec: FrameCodec,
    buf: BytesMut,
}

impl Framer {
    pub fn new() -> Self {
        Self::with_config(&FrameConfig::default())
    }

    pub fn with_config(config: &FrameConfig) -> Self {
        Self {
            codec: FrameCodec::new(config),
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Append `input` and return every frame completed by it, in order.
    pub fn push(&mut self, input: &[u8]) -> Vec<Frame> {
        self.buf.extend_from_slice(input);
        let mut frames = Vec::new();
        while let Some(frame) = self.codec.decode_frame(&mut self.buf) {
            frames.push(frame);
        }
        frames
    }

    /// Drop any partially received candidate, e.g. after a reconnect.
    pub fn reset(&mut self) {
        if !self.buf.is_empty() {
            debug!(len = self.buf.len(), "discarding partial frame");
        }
        self.buf.clear();
        self.codec.reset();
    }

    /// Bytes held for the current candidate.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn state(&self) -> ParseState {
        self.codec.state()
    }

    pub fn stats(&self) -> DecodeStats {
        self.codec.stats()
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "async")]
mod tokio_codec {
    use bytes::BytesMut;
    use tokio_util::codec::{Decoder, Encoder};
    use tracing::debug;

    use super::FrameCodec;
    use crate::codec::{encode_frame, Frame};
    use crate::error::{FrameError, Result};

    impl Decoder for FrameCodec {
        type Item = Frame;
        type Error = FrameError;

        fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
            Ok(self.decode_frame(src))
        }

        fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
            if let Some(frame) = self.decode_frame(src) {
                return Ok(Some(frame));
            }
            if !src.is_empty() {
                debug!(len = src.len(), "discarding partial frame at end of stream");
                src.clear();
                self.reset();
            }
            Ok(None)
        }
    }

    impl Encoder<Frame> for FrameCodec {
        type Error = FrameError;

        fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
            if item.body.len() > self.max_body_size() {
                return Err(FrameError::BodyTooLarge {
                    size: item.body.len(),
                    max: self.max_body_size(),
                });
            }
            encode_frame(item.sequence, item.kind, &item.body, dst)
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, Bytes};

    use super::*;
    use crate::codec::{encode_frame, frame_size, MAX_BODY_SIZE};

    fn wire(frame: &Frame) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_frame(frame.sequence, frame.kind, &frame.body, &mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn roundtrip_data_and_ack() {
        let frames = [
            Frame::data(0, Bytes::new()),
            Frame::data(1, vec![0xAA, 0xBB]),
            Frame::data(u16::MAX, b"stream-snapshot".to_vec()),
            Frame::ack(42),
        ];
        for frame in frames {
            let mut framer = Framer::new();
            assert_eq!(framer.push(&wire(&frame)), vec![frame]);
            assert_eq!(framer.buffered(), 0);
            assert_eq!(framer.state(), ParseState::SeekingMagic);
        }
    }

    #[test]
    fn roundtrip_maximum_body() {
        let body: Vec<u8> = (0..MAX_BODY_SIZE).map(|i| (i % 251) as u8).collect();
        let frame = Frame::data(9, body);
        let bytes = wire(&frame);
        assert_eq!(bytes.len(), frame_size(MAX_BODY_SIZE));

        let mut framer = Framer::new();
        assert_eq!(framer.push(&bytes), vec![frame]);
    }

    #[test]
    fn any_single_bit_flip_is_rejected() {
        // A small limit makes a flipped length bit fail fast instead of
        // waiting for a body that never arrives.
        let cfg = FrameConfig { max_body_size: 16 };
        let frame = Frame::data(0x0102, b"mute".to_vec());
        let clean = wire(&frame);
        for byte in 0..clean.len() {
            for bit in 0..8 {
                let mut corrupted = clean.clone();
                corrupted[byte] ^= 1 << bit;
                let mut framer = Framer::with_config(&cfg);
                let frames = framer.push(&corrupted);
                assert!(
                    frames.is_empty(),
                    "flip of bit {bit} in byte {byte} produced {frames:?}"
                );
                // The parser keeps going: a clean frame afterwards is found.
                assert_eq!(framer.push(&clean), vec![frame.clone()]);
            }
        }
    }

    #[test]
    fn resync_after_garbage_sharing_magic_prefix() {
        let frame = Frame::data(3, b"volume".to_vec());
        let mut stream = b"I (1234) boot: diag text\r\n".to_vec();
        stream.extend_from_slice(&[MAGIC[0], 0x00, MAGIC[0], MAGIC[0], 0x42]);
        stream.extend_from_slice(&wire(&frame));

        let mut framer = Framer::new();
        assert_eq!(framer.push(&stream), vec![frame]);
        assert!(framer.stats().skipped_bytes >= 26);
    }

    #[test]
    fn magic_split_across_pushes() {
        let frame = Frame::data(5, b"x".to_vec());
        let bytes = wire(&frame);
        let mut framer = Framer::new();

        assert!(framer.push(&bytes[..1]).is_empty());
        assert_eq!(framer.state(), ParseState::SeekingMagic);
        assert_eq!(framer.buffered(), 1);
        assert_eq!(framer.push(&bytes[1..]), vec![frame]);
    }

    #[test]
    fn byte_at_a_time_matches_whole() {
        let frame = Frame::data(0x7FFF, b"icon-response payload".to_vec());
        let bytes = wire(&frame);

        let mut framer = Framer::new();
        let mut out = Vec::new();
        for byte in &bytes {
            out.extend(framer.push(std::slice::from_ref(byte)));
        }
        assert_eq!(out, vec![frame]);
    }

    #[test]
    fn arbitrary_split_points() {
        let frame = Frame::data(77, (0u8..=200).collect::<Vec<_>>());
        let bytes = wire(&frame);
        for chunk in [2usize, 3, 5, 7, 64, 150] {
            let mut framer = Framer::new();
            let mut out = Vec::new();
            for piece in bytes.chunks(chunk) {
                out.extend(framer.push(piece));
            }
            assert_eq!(out, vec![frame.clone()], "chunk size {chunk}");
        }
    }

    #[test]
    fn multiple_frames_in_one_buffer() {
        let frames: Vec<Frame> = (0..8u16)
            .map(|i| {
                if i % 3 == 0 {
                    Frame::ack(i)
                } else {
                    Frame::data(i, format!("msg-{i}").into_bytes())
                }
            })
            .collect();
        let stream: Vec<u8> = frames.iter().flat_map(wire).collect();

        let mut framer = Framer::new();
        assert_eq!(framer.push(&stream), frames);
        assert_eq!(framer.stats().frames, 8);
    }

    #[test]
    fn oversized_length_is_a_false_match() {
        let cfg = FrameConfig { max_body_size: 16 };
        let frame = Frame::data(1, b"ok".to_vec());

        let mut stream = BytesMut::new();
        stream.put_slice(&MAGIC);
        stream.put_u16(1024);
        stream.put_slice(&wire(&frame));

        let mut framer = Framer::with_config(&cfg);
        assert_eq!(framer.push(&stream), vec![frame]);
        assert_eq!(framer.stats().oversized, 1);
    }

    #[test]
    fn corrupt_length_does_not_swallow_following_frame() {
        // A header promising a large body must not block a real frame that
        // starts inside that would-be body.
        let frame = Frame::data(2, b"next".to_vec());
        let mut stream = BytesMut::new();
        stream.put_slice(&MAGIC);
        stream.put_u16(40);
        stream.put_u16(9);
        stream.put_u8(0);
        stream.put_slice(&wire(&frame));
        stream.put_slice(&[0u8; 40]);

        let mut framer = Framer::new();
        assert_eq!(framer.push(&stream), vec![frame]);
        assert_eq!(framer.stats().checksum_errors, 1);
    }

    #[test]
    fn checksum_failure_rescans_inside_candidate() {
        let inner = Frame::data(11, b"inner".to_vec());
        let mut stream = BytesMut::new();
        stream.put_slice(&MAGIC);
        stream.put_u16(frame_size(inner.body.len()) as u16);
        stream.put_u16(10);
        stream.put_u8(0);
        stream.put_slice(&wire(&inner));
        stream.put_u16(0xDEAD);

        let mut framer = Framer::new();
        assert_eq!(framer.push(&stream), vec![inner]);
    }

    #[test]
    fn unknown_kind_is_ignored() {
        let mut bad = BytesMut::new();
        bad.put_slice(&MAGIC);
        bad.put_u16(1);
        bad.put_u16(4);
        bad.put_u8(7);
        bad.put_u8(0x55);
        let crc = crate::crc::checksum(&bad);
        bad.put_u16(crc);

        let good = Frame::data(5, b"y".to_vec());
        bad.put_slice(&wire(&good));

        let mut framer = Framer::new();
        assert_eq!(framer.push(&bad), vec![good]);
        assert_eq!(framer.stats().unknown_kind, 1);
    }

    #[test]
    fn reset_discards_partial_candidate() {
        let frame = Frame::data(8, b"partial".to_vec());
        let bytes = wire(&frame);
        let mut framer = Framer::new();

        assert!(framer.push(&bytes[..6]).is_empty());
        assert_ne!(framer.state(), ParseState::SeekingMagic);
        framer.reset();
        assert_eq!(framer.buffered(), 0);
        assert_eq!(framer.state(), ParseState::SeekingMagic);

        assert!(framer.push(&bytes[6..]).is_empty());
        assert_eq!(framer.push(&bytes), vec![frame]);
    }

    #[test]
    fn garbage_without_magic_is_not_buffered() {
        let mut framer = Framer::new();
        assert!(framer.push(&[0x00; 4096]).is_empty());
        assert_eq!(framer.buffered(), 0);
        assert_eq!(framer.stats().skipped_bytes, 4096);
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn framed_read_over_chunked_stream() {
        use futures_util::{SinkExt, StreamExt};
        use tokio_util::codec::{FramedRead, FramedWrite};

        let (client, server) = tokio::io::duplex(16);
        let mut sink = FramedWrite::new(client, FrameCodec::default());
        let mut stream = FramedRead::new(server, FrameCodec::default());

        let sent = vec![
            Frame::data(1, b"one".to_vec()),
            Frame::ack(1),
            Frame::data(2, vec![0x19; 40]),
        ];
        let writer = {
            let sent = sent.clone();
            tokio::spawn(async move {
                for frame in sent {
                    sink.send(frame).await.unwrap();
                }
            })
        };

        let mut received = Vec::new();
        while received.len() < sent.len() {
            received.push(stream.next().await.unwrap().unwrap());
        }
        writer.await.unwrap();
        assert_eq!(received, sent);
    }
}
