use bytes::{Buf, Bytes};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::trace;

use crate::error::{Result, TransportError};
use crate::traits::Transport;

/// One end of an in-memory byte link.
///
/// Every `write_all` call arrives at the other end as one chunk; a `read`
/// never returns bytes from more than one chunk, so tests can observe
/// exactly how the writer split its output. Reconnects are simulated with
/// [`MemoryTransport::notify_reconnected`].
#[derive(Debug)]
pub struct MemoryTransport {
    inbound: Mutex<Inbound>,
    outbound: mpsc::UnboundedSender<Bytes>,
    generation: watch::Sender<u64>,
}

#[derive(Debug)]
struct Inbound {
    rx: mpsc::UnboundedReceiver<Bytes>,
    pending: Bytes,
}

impl MemoryTransport {
    /// Create two connected ends.
    pub fn pair() -> (Self, Self) {
        let (left_tx, left_rx) = mpsc::unbounded_channel();
        let (right_tx, right_rx) = mpsc::unbounded_channel();
        (Self::new(left_tx, right_rx), Self::new(right_tx, left_rx))
    }

    fn new(outbound: mpsc::UnboundedSender<Bytes>, rx: mpsc::UnboundedReceiver<Bytes>) -> Self {
        Self {
            inbound: Mutex::new(Inbound {
                rx,
                pending: Bytes::new(),
            }),
            outbound,
            generation: watch::Sender::new(0),
        }
    }

    /// Announce a new session on this end.
    pub fn notify_reconnected(&self) {
        self.generation.send_modify(|generation| *generation += 1);
    }
}

impl Transport for MemoryTransport {
    async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut inbound = self.inbound.lock().await;
        if inbound.pending.is_empty() {
            match inbound.rx.recv().await {
                Some(chunk) => inbound.pending = chunk,
                None => return Ok(0),
            }
        }

        let n = inbound.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&inbound.pending[..n]);
        inbound.pending.advance(n);
        trace!(len = n, "memory transport read");
        Ok(n)
    }

    async fn write_all(&self, buf: &[u8]) -> Result<()> {
        self.outbound
            .send(Bytes::copy_from_slice(buf))
            .map_err(|_| TransportError::Closed)
    }

    fn reconnects(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }
}
