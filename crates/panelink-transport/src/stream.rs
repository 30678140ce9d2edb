use std::io::ErrorKind;
use std::sync::{Mutex as StdMutex, PoisonError};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::Transport;

/// Adapts a tokio duplex stream (serial port, RFCOMM socket, Unix socket) to
/// the [`Transport`] contract.
///
/// The stream is opened by the caller. When the session drops, reads park
/// until [`StreamTransport::reattach`] installs a replacement stream, which
/// also bumps the reconnect generation. A [`single_session`] transport
/// reports the end of its stream as EOF instead.
///
/// [`single_session`]: StreamTransport::single_session
pub struct StreamTransport<S> {
    reader: Mutex<Option<ReadHalf<S>>>,
    staged_reader: StdMutex<Option<ReadHalf<S>>>,
    writer: Mutex<Option<WriteHalf<S>>>,
    generation: watch::Sender<u64>,
    single_session: bool,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wrap an already-open stream. The session generation starts at 0.
    pub fn new(stream: S) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Mutex::new(Some(reader)),
            staged_reader: StdMutex::new(None),
            writer: Mutex::new(Some(writer)),
            generation: watch::Sender::new(0),
            single_session: false,
        }
    }

    /// Wrap a stream that will never be replaced. Once the peer closes it or
    /// a read fails, [`Transport::read`] returns `Ok(0)` for good.
    pub fn single_session(stream: S) -> Self {
        Self {
            single_session: true,
            ..Self::new(stream)
        }
    }

    /// A transport with no stream yet; reads wait for the first [`reattach`].
    ///
    /// [`reattach`]: StreamTransport::reattach
    pub fn detached() -> Self {
        Self {
            reader: Mutex::new(None),
            staged_reader: StdMutex::new(None),
            writer: Mutex::new(None),
            generation: watch::Sender::new(0),
            single_session: false,
        }
    }

    /// Install a freshly opened stream and announce the new session.
    pub async fn reattach(&self, stream: S) {
        let (reader, writer) = tokio::io::split(stream);
        *self
            .staged_reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(reader);
        *self.writer.lock().await = Some(writer);
        self.generation.send_modify(|generation| *generation += 1);
        info!(generation = *self.generation.borrow(), "transport session attached");
    }

    /// Current session generation.
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    fn take_staged_reader(&self) -> Option<ReadHalf<S>> {
        self.staged_reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut generations = self.generation.subscribe();
        loop {
            let mut slot = self.reader.lock().await;
            if let Some(staged) = self.take_staged_reader() {
                *slot = Some(staged);
            }

            let Some(half) = slot.as_mut() else {
                if self.single_session {
                    return Ok(0);
                }
                drop(slot);
                generations
                    .changed()
                    .await
                    .map_err(|_| TransportError::Closed)?;
                continue;
            };

            tokio::select! {
                result = half.read(buf) => match result {
                    Ok(0) if self.single_session => {
                        debug!("stream reached EOF");
                        *slot = None;
                        return Ok(0);
                    }
                    Ok(0) => {
                        debug!("stream reached EOF; waiting for reattach");
                        *slot = None;
                    }
                    Ok(n) => return Ok(n),
                    Err(err) if err.kind() == ErrorKind::Interrupted => {}
                    Err(err) if self.single_session => {
                        warn!(%err, "stream read failed");
                        *slot = None;
                        return Err(err.into());
                    }
                    Err(err) => {
                        warn!(%err, "stream read failed; waiting for reattach");
                        *slot = None;
                    }
                },
                changed = generations.changed() => {
                    changed.map_err(|_| TransportError::Closed)?;
                    debug!("session replaced during read");
                }
            }
        }
    }

    async fn write_all(&self, buf: &[u8]) -> Result<()> {
        let mut slot = self.writer.lock().await;
        let half = slot.as_mut().ok_or(TransportError::NotConnected)?;

        let result = async {
            half.write_all(buf).await?;
            half.flush().await
        }
        .await;

        if let Err(err) = result {
            warn!(%err, "stream write failed; dropping writer half");
            *slot = None;
            return Err(err.into());
        }
        Ok(())
    }

    fn reconnects(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }
}

impl<S> std::fmt::Debug for StreamTransport<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTransport")
            .field("generation", &*self.generation.borrow())
            .field("single_session", &self.single_session)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_and_write_through_duplex() {
        let (near, mut far) = tokio::io::duplex(64);
        let transport = StreamTransport::new(near);

        transport.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        far.write_all(b"pong").await.unwrap();
        let mut buf = [0u8; 16];
        let n = transport.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"pong");
    }

    #[tokio::test]
    async fn single_session_reports_peer_close_as_eof() {
        let (near, mut far) = tokio::io::duplex(64);
        let transport = StreamTransport::single_session(near);

        far.write_all(b"last").await.unwrap();
        drop(far);

        let mut buf = [0u8; 16];
        let n = transport.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"last");
        assert_eq!(transport.read(&mut buf).await.unwrap(), 0);
        assert_eq!(transport.read(&mut buf).await.unwrap(), 0);
        assert_eq!(transport.generation(), 0);
    }

    #[tokio::test]
    async fn detached_write_is_not_connected() {
        let transport = StreamTransport::<tokio::io::DuplexStream>::detached();
        let err = transport.write_all(b"x").await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }

    #[tokio::test]
    async fn reattach_bumps_generation_and_resumes_reads() {
        let (near, far) = tokio::io::duplex(64);
        let transport = std::sync::Arc::new(StreamTransport::new(near));
        let mut reconnects = transport.reconnects();

        let reader = {
            let transport = std::sync::Arc::clone(&transport);
            tokio::spawn(async move {
                let mut buf = [0u8; 16];
                let n = transport.read(&mut buf).await.unwrap();
                buf[..n].to_vec()
            })
        };

        // First session dies; the pending read must survive it.
        drop(far);
        tokio::task::yield_now().await;

        let (near, mut far) = tokio::io::duplex(64);
        transport.reattach(near).await;
        reconnects.changed().await.unwrap();
        assert_eq!(*reconnects.borrow(), 1);
        assert_eq!(transport.generation(), 1);

        far.write_all(b"again").await.unwrap();
        assert_eq!(reader.await.unwrap(), b"again");

        transport.write_all(b"ok").await.unwrap();
        let mut buf = [0u8; 2];
        far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ok");
    }
}
