use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;

use crate::error::{ProtocolError, Result};

/// Sends waiting for their ack, keyed by sequence.
#[derive(Debug, Default)]
pub(crate) struct PendingAcks {
    waiters: Mutex<HashMap<u16, oneshot::Sender<()>>>,
}

impl PendingAcks {
    /// Register a waiter. The entry lives as long as the returned guard.
    pub(crate) fn register(self: &Arc<Self>, sequence: u16) -> Result<PendingAck> {
        let (tx, rx) = oneshot::channel();
        let mut waiters = self.lock();
        if waiters.contains_key(&sequence) {
            return Err(ProtocolError::SequenceInUse(sequence));
        }
        waiters.insert(sequence, tx);
        Ok(PendingAck {
            table: Arc::clone(self),
            sequence,
            rx,
        })
    }

    /// Signal the waiter for `sequence`. Returns `false` if nobody is waiting.
    pub(crate) fn complete(&self, sequence: u16) -> bool {
        match self.lock().remove(&sequence) {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Drop every waiter; their guards observe the protocol as closed.
    pub(crate) fn close_all(&self) {
        self.lock().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn remove(&self, sequence: u16) {
        self.lock().remove(&sequence);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u16, oneshot::Sender<()>>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A registered waiter; removes its table entry when dropped, whatever the
/// outcome of the send (ack, timeout, cancellation, panic).
#[derive(Debug)]
pub(crate) struct PendingAck {
    table: Arc<PendingAcks>,
    sequence: u16,
    rx: oneshot::Receiver<()>,
}

impl PendingAck {
    /// Wait for the ack. Errors if the waiter was dropped without one.
    pub(crate) async fn acked(&mut self) -> std::result::Result<(), oneshot::error::RecvError> {
        (&mut self.rx).await
    }

    /// Non-blocking check, used before retransmitting.
    pub(crate) fn is_acked(&mut self) -> bool {
        self.rx.try_recv().is_ok()
    }
}

impl Drop for PendingAck {
    fn drop(&mut self) {
        self.table.remove(self.sequence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn complete_wakes_waiter() {
        let table = Arc::new(PendingAcks::default());
        let mut waiter = table.register(3).unwrap();
        assert!(table.complete(3));
        waiter.acked().await.unwrap();
        assert!(!table.complete(3));
    }

    #[test]
    fn guard_drop_removes_entry() {
        let table = Arc::new(PendingAcks::default());
        let waiter = table.register(9).unwrap();
        assert_eq!(table.len(), 1);
        drop(waiter);
        assert_eq!(table.len(), 0);
        assert!(!table.complete(9));
    }

    #[test]
    fn duplicate_registration_rejected() {
        let table = Arc::new(PendingAcks::default());
        let _first = table.register(1).unwrap();
        assert!(matches!(
            table.register(1),
            Err(ProtocolError::SequenceInUse(1))
        ));
    }

    #[tokio::test]
    async fn close_all_fails_waiters() {
        let table = Arc::new(PendingAcks::default());
        let mut waiter = table.register(2).unwrap();
        table.close_all();
        assert!(waiter.acked().await.is_err());
    }

    #[test]
    fn is_acked_polls_without_blocking() {
        let table = Arc::new(PendingAcks::default());
        let mut waiter = table.register(5).unwrap();
        assert!(!waiter.is_acked());
        table.complete(5);
        assert!(waiter.is_acked());
    }
}
