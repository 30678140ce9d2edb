//! Stop-and-wait delivery over a [`Transport`].
//!
//! One background reader turns transport bytes into frames, acks every valid
//! data frame, suppresses duplicates and completes pending sends when their
//! ack arrives. One background writer drains a queue of encoded frames onto
//! the transport, so acks and retransmissions never wait on each other and
//! no lock is held across transport I/O.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::{Bytes, BytesMut};
use panelink_frame::{encode_frame, DecodeStats, Frame, FrameError, FrameKind, Framer};
use panelink_transport::Transport;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, trace, warn};

use crate::config::{ProtocolConfig, SendOptions};
use crate::error::{ProtocolError, Result};
use crate::incoming::Incoming;
use crate::pending::PendingAcks;
use crate::session::{SequenceCheck, SessionState};

/// Counters describing the protocol's traffic since it started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtocolStats {
    /// Data frames handed to the writer, including retransmissions.
    pub frames_sent: u64,
    /// Data frames sent again after an ack timeout.
    pub retransmissions: u64,
    /// Sends that ended in [`ProtocolError::DeliveryTimeout`].
    pub delivery_failures: u64,
    /// Acks that completed a pending send.
    pub acks_received: u64,
    /// Acks for a sequence nobody was waiting on.
    pub stray_acks: u64,
    /// Acks sent for inbound data frames.
    pub acks_sent: u64,
    /// Inbound messages handed to [`Incoming`].
    pub delivered: u64,
    /// Inbound retransmissions of the last delivered frame.
    pub duplicates_dropped: u64,
    /// Inbound frames older than the last delivered one.
    pub stale_dropped: u64,
    /// Session resets observed on the transport.
    pub reconnects: u64,
    /// Parser counters for the inbound byte stream.
    pub decode: DecodeStats,
}

#[derive(Debug, Default)]
struct Counters {
    frames_sent: AtomicU64,
    retransmissions: AtomicU64,
    delivery_failures: AtomicU64,
    acks_received: AtomicU64,
    stray_acks: AtomicU64,
    acks_sent: AtomicU64,
    delivered: AtomicU64,
    duplicates_dropped: AtomicU64,
    stale_dropped: AtomicU64,
    reconnects: AtomicU64,
    decode: Mutex<DecodeStats>,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Work for the writer task, processed strictly in queue order.
enum Outbound {
    Frame(Bytes),
    /// Resolves once everything queued before it has been written.
    Flush(oneshot::Sender<()>),
}

struct Shared<T> {
    transport: Arc<T>,
    config: ProtocolConfig,
    session: SessionState,
    pending: Arc<PendingAcks>,
    counters: Counters,
    send_permit: Semaphore,
    outbound: mpsc::UnboundedSender<Outbound>,
    shutdown: CancellationToken,
}

/// Reliable, ordered message delivery to the peripheral.
///
/// Cloning yields another handle to the same protocol instance. The
/// background tasks stop when [`shutdown`](Self::shutdown) is called, when
/// the transport reports end-of-stream or a read error, or when the last
/// handle is dropped.
pub struct FrameProtocol<T> {
    shared: Arc<Shared<T>>,
    _guard: Arc<DropGuard>,
}

impl<T> Clone for FrameProtocol<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            _guard: Arc::clone(&self._guard),
        }
    }
}

impl<T> std::fmt::Debug for FrameProtocol<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameProtocol")
            .field("config", &self.shared.config)
            .field("closed", &self.shared.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> FrameProtocol<T> {
    /// Start the protocol with default configuration.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(transport: Arc<T>) -> (Self, Incoming) {
        Self::start_with_config(transport, ProtocolConfig::default())
    }

    /// Start the protocol, spawning its reader and writer tasks.
    pub fn start_with_config(transport: Arc<T>, config: ProtocolConfig) -> (Self, Incoming) {
        Self::start_with_session(transport, config, SessionState::new())
    }

    fn start_with_session(
        transport: Arc<T>,
        config: ProtocolConfig,
        session: SessionState,
    ) -> (Self, Incoming) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let shared = Arc::new(Shared {
            transport: Arc::clone(&transport),
            config,
            session,
            pending: Arc::new(PendingAcks::default()),
            counters: Counters::default(),
            send_permit: Semaphore::new(1),
            outbound: outbound_tx,
            shutdown: shutdown.clone(),
        });

        tokio::spawn(write_loop(transport, outbound_rx, shutdown.clone()));
        tokio::spawn(read_loop(Arc::clone(&shared), inbound_tx));
        debug!("frame protocol started");

        let protocol = Self {
            shared,
            _guard: Arc::new(shutdown.drop_guard()),
        };
        (protocol, Incoming::new(inbound_rx))
    }

    /// Send `payload` using the configured [`SendOptions`].
    ///
    /// Resolves with the frame's sequence number once the peer acked it.
    pub async fn send(&self, payload: &[u8]) -> Result<u16> {
        let options = self.shared.config.send.clone();
        self.send_with(payload, &options).await
    }

    /// Send `payload` with explicit timeout and retry policy.
    pub async fn send_with(&self, payload: &[u8], options: &SendOptions) -> Result<u16> {
        self.send_with_cancel(payload, options, &CancellationToken::new())
            .await
    }

    /// Send `payload`, giving up early if `cancel` fires.
    ///
    /// Sends are serialized: at most one frame is awaiting its ack at any
    /// time, and later callers wait (cancellably) for their turn. Every
    /// transmission of one send carries the same sequence number.
    pub async fn send_with_cancel(
        &self,
        payload: &[u8],
        options: &SendOptions,
        cancel: &CancellationToken,
    ) -> Result<u16> {
        let shared = &*self.shared;
        let max = shared.config.frame.effective_max_body();
        if payload.len() > max {
            return Err(FrameError::BodyTooLarge {
                size: payload.len(),
                max,
            }
            .into());
        }

        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProtocolError::Cancelled),
            _ = shared.shutdown.cancelled() => return Err(ProtocolError::Closed),
            permit = shared.send_permit.acquire() => {
                permit.map_err(|_| ProtocolError::Closed)?
            }
        };

        let sequence = shared.session.next_sequence();
        let mut pending = shared.pending.register(sequence)?;
        let wire = encode(sequence, FrameKind::Data, payload)?;
        let attempts = options.attempts();

        for attempt in 1..=attempts {
            if pending.is_acked() {
                return Ok(sequence);
            }
            if shared.outbound.send(Outbound::Frame(wire.clone())).is_err() {
                return Err(ProtocolError::Closed);
            }
            bump(&shared.counters.frames_sent);
            if attempt > 1 {
                bump(&shared.counters.retransmissions);
            }
            debug!(sequence, attempt, attempts, len = payload.len(), "data frame queued");

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(sequence, "send cancelled");
                    return Err(ProtocolError::Cancelled);
                }
                _ = shared.shutdown.cancelled() => return Err(ProtocolError::Closed),
                outcome = tokio::time::timeout(options.timeout, pending.acked()) => outcome,
            };

            match outcome {
                Ok(Ok(())) => {
                    trace!(sequence, attempt, "send acknowledged");
                    return Ok(sequence);
                }
                Ok(Err(_)) => return Err(ProtocolError::Closed),
                Err(_) if attempt < attempts => {
                    warn!(
                        sequence,
                        attempt,
                        attempts,
                        timeout_ms = options.timeout.as_millis() as u64,
                        "ack timeout, retransmitting"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(ProtocolError::Cancelled),
                        _ = shared.shutdown.cancelled() => return Err(ProtocolError::Closed),
                        _ = tokio::time::sleep(options.retry_delay) => {}
                    }
                }
                Err(_) => {}
            }
        }

        bump(&shared.counters.delivery_failures);
        warn!(sequence, attempts, "delivery failed, no ack received");
        Err(ProtocolError::DeliveryTimeout { sequence, attempts })
    }

    /// Wait until every frame queued so far (including acks for data already
    /// delivered to [`Incoming`]) has been handed to the transport.
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.shared
            .outbound
            .send(Outbound::Flush(tx))
            .map_err(|_| ProtocolError::Closed)?;
        tokio::select! {
            biased;
            flushed = rx => flushed.map_err(|_| ProtocolError::Closed),
            _ = self.shared.shutdown.cancelled() => Err(ProtocolError::Closed),
        }
    }

    /// Stop the background tasks. Waiting and future sends fail with
    /// [`ProtocolError::Closed`]; [`Incoming`] ends.
    pub fn shutdown(&self) {
        if !self.shared.shutdown.is_cancelled() {
            info!("frame protocol shutting down");
        }
        self.shared.shutdown.cancel();
        self.shared.send_permit.close();
        self.shared.pending.close_all();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Sequence of the last delivered inbound frame, if any since the last
    /// session reset.
    pub fn last_read_sequence(&self) -> Option<u16> {
        self.shared.session.last_read_sequence()
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.shared.config
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.shared.transport
    }

    pub fn stats(&self) -> ProtocolStats {
        let c = &self.shared.counters;
        ProtocolStats {
            frames_sent: c.frames_sent.load(Ordering::Relaxed),
            retransmissions: c.retransmissions.load(Ordering::Relaxed),
            delivery_failures: c.delivery_failures.load(Ordering::Relaxed),
            acks_received: c.acks_received.load(Ordering::Relaxed),
            stray_acks: c.stray_acks.load(Ordering::Relaxed),
            acks_sent: c.acks_sent.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            duplicates_dropped: c.duplicates_dropped.load(Ordering::Relaxed),
            stale_dropped: c.stale_dropped.load(Ordering::Relaxed),
            reconnects: c.reconnects.load(Ordering::Relaxed),
            decode: *c.decode.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

impl<T: Transport> Shared<T> {
    fn dispatch(&self, frame: Frame, inbound: &mpsc::UnboundedSender<Bytes>) {
        let sequence = frame.sequence;
        match frame.kind {
            FrameKind::Ack => {
                if self.pending.complete(sequence) {
                    bump(&self.counters.acks_received);
                    trace!(sequence, "ack received");
                } else {
                    bump(&self.counters.stray_acks);
                    debug!(sequence, "ack for unknown sequence ignored");
                }
            }
            FrameKind::Data => {
                // Ack every valid data frame, so the peer stops retransmitting
                // even when we drop it below.
                self.queue_ack(sequence);
                match self.session.accept_inbound(sequence) {
                    SequenceCheck::New => {
                        bump(&self.counters.delivered);
                        trace!(sequence, len = frame.body.len(), "data frame delivered");
                        if inbound.send(frame.body).is_err() {
                            debug!(sequence, "inbound receiver gone, message discarded");
                        }
                    }
                    SequenceCheck::Duplicate => {
                        bump(&self.counters.duplicates_dropped);
                        debug!(sequence, "duplicate data frame dropped");
                    }
                    SequenceCheck::Stale { last } => {
                        bump(&self.counters.stale_dropped);
                        warn!(sequence, last, "out-of-order data frame dropped");
                    }
                }
            }
        }
    }

    fn queue_ack(&self, sequence: u16) {
        match encode(sequence, FrameKind::Ack, &[]) {
            Ok(wire) => {
                if self.outbound.send(Outbound::Frame(wire)).is_ok() {
                    bump(&self.counters.acks_sent);
                }
            }
            Err(err) => warn!(sequence, error = %err, "failed to encode ack"),
        }
    }

    fn record_decode(&self, stats: DecodeStats) {
        *self
            .counters
            .decode
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = stats;
    }
}

fn encode(sequence: u16, kind: FrameKind, body: &[u8]) -> std::result::Result<Bytes, FrameError> {
    let mut wire = BytesMut::new();
    encode_frame(sequence, kind, body, &mut wire)?;
    Ok(wire.freeze())
}

async fn read_loop<T: Transport>(shared: Arc<Shared<T>>, inbound: mpsc::UnboundedSender<Bytes>) {
    let mut framer = Framer::with_config(&shared.config.frame);
    let mut buf = vec![0u8; shared.config.read_buffer_size.max(1)];
    let mut reconnects = shared.transport.reconnects();
    reconnects.borrow_and_update();
    let mut watching_reconnects = true;

    loop {
        tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => break,
            changed = reconnects.changed(), if watching_reconnects => {
                if changed.is_err() {
                    watching_reconnects = false;
                    continue;
                }
                let generation = *reconnects.borrow_and_update();
                bump(&shared.counters.reconnects);
                info!(generation, "peer session re-established, resetting inbound sequence");
                shared.session.reset_inbound();
                framer.reset();
            }
            read = shared.transport.read(&mut buf) => match read {
                Ok(0) => {
                    info!("transport closed");
                    break;
                }
                Ok(n) => {
                    trace!(len = n, "transport bytes received");
                    for frame in framer.push(&buf[..n]) {
                        shared.dispatch(frame, &inbound);
                    }
                    shared.record_decode(framer.stats());
                }
                Err(err) => {
                    warn!(error = %err, "transport read failed");
                    break;
                }
            },
        }
    }

    // Without a reader no ack can arrive; fail pending and future sends now.
    shared.shutdown.cancel();
    shared.send_permit.close();
    shared.pending.close_all();
    debug!("reader stopped");
}

async fn write_loop<T: Transport>(
    transport: Arc<T>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    shutdown: CancellationToken,
) {
    loop {
        let wire = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = outbound.recv() => match next {
                Some(Outbound::Frame(wire)) => wire,
                Some(Outbound::Flush(done)) => {
                    let _ = done.send(());
                    continue;
                }
                None => break,
            },
        };
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            written = transport.write_all(&wire) => {
                if let Err(err) = written {
                    warn!(error = %err, len = wire.len(), "transport write failed");
                }
            }
        }
    }
    debug!("writer stopped");
}
