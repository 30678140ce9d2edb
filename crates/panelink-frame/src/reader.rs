use std::collections::VecDeque;
use std::io::{ErrorKind, Read};

use crate::codec::{Frame, FrameConfig};
use crate::error::{FrameError, Result};
use crate::framer::{DecodeStats, Framer};

const READ_CHUNK_SIZE: usize = 2 * 1024;

/// Reads validated frames from any blocking `Read` source.
///
/// Partial reads, interleaved garbage and corrupt frames are handled
/// internally; callers only ever see frames whose checksum matched.
pub struct FrameReader<T> {
    inner: T,
    framer: Framer,
    ready: VecDeque<Frame>,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            framer: Framer::with_config(&config),
            ready: VecDeque::new(),
        }
    }

    /// Read the next valid frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Ok(frame);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.ready.extend(self.framer.push(&chunk[..read]));
        }
    }

    /// Parser counters accumulated so far.
    pub fn stats(&self) -> DecodeStats {
        self.framer.stats()
    }

    /// Bytes held for a frame candidate that has not completed yet.
    pub fn buffered(&self) -> usize {
        self.framer.buffered()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::codec::{encode_frame, MAGIC};
    use crate::kind::FrameKind;

    fn wire(frames: &[Frame]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for frame in frames {
            encode_frame(frame.sequence, frame.kind, &frame.body, &mut buf).unwrap();
        }
        buf.to_vec()
    }

    #[test]
    fn read_multiple_frames() {
        let frames = vec![
            Frame::data(1, b"one".to_vec()),
            Frame::ack(1),
            Frame::data(2, b"three".to_vec()),
        ];
        let mut reader = FrameReader::new(Cursor::new(wire(&frames)));

        for expected in &frames {
            assert_eq!(&reader.read_frame().unwrap(), expected);
        }
        assert!(matches!(
            reader.read_frame().unwrap_err(),
            FrameError::ConnectionClosed
        ));
    }

    #[test]
    fn partial_read_handling() {
        let frame = Frame::data(4, b"slow".to_vec());
        let byte_reader = ByteByByteReader {
            bytes: wire(std::slice::from_ref(&frame)),
            pos: 0,
        };
        let mut reader = FrameReader::new(byte_reader);
        assert_eq!(reader.read_frame().unwrap(), frame);
    }

    #[test]
    fn skips_console_noise_between_frames() {
        let mut stream = b"E (812) wifi: boot\n".to_vec();
        stream.extend(wire(&[Frame::data(1, b"a".to_vec())]));
        stream.extend_from_slice(b"W (900) app: low heap\n");
        stream.extend(wire(&[Frame::data(2, b"b".to_vec())]));

        let mut reader = FrameReader::new(Cursor::new(stream));
        assert_eq!(reader.read_frame().unwrap().sequence, 1);
        assert_eq!(reader.read_frame().unwrap().sequence, 2);
        assert!(reader.stats().skipped_bytes > 0);
    }

    #[test]
    fn connection_closed_mid_frame() {
        let mut partial = BytesMut::new();
        partial.put_slice(&MAGIC);
        partial.put_u16(16);
        partial.put_u16(2);
        partial.put_u8(FrameKind::Data.as_byte());
        partial.put_slice(b"only-part");

        let mut reader = FrameReader::new(Cursor::new(partial.to_vec()));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn interrupted_read_retries() {
        let reader = InterruptedThenData {
            interrupted: false,
            inner: Cursor::new(wire(&[Frame::data(8, b"ok".to_vec())])),
        };
        let mut framed = FrameReader::new(reader);
        let frame = framed.read_frame().unwrap();
        assert_eq!(frame.sequence, 8);
        assert_eq!(frame.body.as_ref(), b"ok");
    }

    #[test]
    fn io_error_propagates() {
        let mut framed = FrameReader::new(FailingReader);
        let err = framed.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::BrokenPipe));
    }

    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct InterruptedThenData {
        interrupted: bool,
        inner: Cursor<Vec<u8>>,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.inner.read(buf)
        }
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::BrokenPipe))
        }
    }
}
