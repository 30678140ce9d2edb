use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::sync::mpsc;

/// Message bodies delivered by the peer, in order, each exactly once.
///
/// Ends (`None`) once the protocol has stopped reading: after
/// [`FrameProtocol::shutdown`](crate::FrameProtocol::shutdown), after every
/// protocol handle is dropped, or when the transport closes for good.
#[derive(Debug)]
pub struct Incoming {
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl Incoming {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Bytes>) -> Self {
        Self { rx }
    }

    /// Wait for the next delivered message.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Take a message if one is already queued.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }
}

impl futures_core::Stream for Incoming {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        self.rx.poll_recv(cx)
    }
}
