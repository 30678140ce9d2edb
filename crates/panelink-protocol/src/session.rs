//! Sequence bookkeeping for one protocol instance.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Mutex, PoisonError};

/// Outcome of checking an inbound data frame against the delivered high-water mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SequenceCheck {
    /// Ahead of everything delivered so far; deliver it.
    New,
    /// Same sequence as the last delivered frame: a retransmission.
    Duplicate,
    /// Behind the last delivered frame.
    Stale { last: u16 },
}

/// `true` if `candidate` lies strictly ahead of `reference` in modulo-65536
/// order, i.e. within the half of the sequence space following it.
///
/// `0` is ahead of `65535`; `40000` is behind `10`.
pub(crate) fn is_ahead(candidate: u16, reference: u16) -> bool {
    let distance = candidate.wrapping_sub(reference);
    distance != 0 && distance < 0x8000
}

/// Outbound sequence counter plus inbound high-water mark.
///
/// Shared between `send` callers and the reader task. The outbound counter
/// is lock-free; the inbound mark sits behind a mutex that is never held
/// across an await.
#[derive(Debug)]
pub(crate) struct SessionState {
    next_sequence: AtomicU16,
    last_read_sequence: Mutex<Option<u16>>,
}

impl SessionState {
    pub(crate) fn new() -> Self {
        Self::starting_at(0)
    }

    /// Start the outbound counter so that the first allocated sequence is
    /// `last + 1`.
    pub(crate) fn starting_at(last: u16) -> Self {
        Self {
            next_sequence: AtomicU16::new(last),
            last_read_sequence: Mutex::new(None),
        }
    }

    /// Allocate the next outbound sequence, wrapping 65535 to 0.
    pub(crate) fn next_sequence(&self) -> u16 {
        self.next_sequence
            .fetch_add(1, Ordering::Relaxed)
            .wrapping_add(1)
    }

    /// Classify an inbound data sequence and advance the mark if it is new.
    ///
    /// Right after construction or [`reset_inbound`](Self::reset_inbound)
    /// any sequence is accepted.
    pub(crate) fn accept_inbound(&self, sequence: u16) -> SequenceCheck {
        let mut last = self
            .last_read_sequence
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match *last {
            Some(prev) if prev == sequence => SequenceCheck::Duplicate,
            Some(prev) if !is_ahead(sequence, prev) => SequenceCheck::Stale { last: prev },
            _ => {
                *last = Some(sequence);
                SequenceCheck::New
            }
        }
    }

    /// Forget the inbound mark; the peer restarts its numbering after a reconnect.
    pub(crate) fn reset_inbound(&self) {
        *self
            .last_read_sequence
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub(crate) fn last_read_sequence(&self) -> Option<u16> {
        *self
            .last_read_sequence
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_ordering_wraps() {
        assert!(is_ahead(1, 0));
        assert!(is_ahead(0, u16::MAX));
        assert!(is_ahead(5, u16::MAX - 3));
        assert!(!is_ahead(7, 7));
        assert!(!is_ahead(6, 7));
        assert!(!is_ahead(u16::MAX, 0));
        assert!(!is_ahead(40_000, 10));
    }

    #[test]
    fn outbound_sequence_starts_at_one_and_wraps() {
        let session = SessionState::new();
        assert_eq!(session.next_sequence(), 1);
        assert_eq!(session.next_sequence(), 2);

        let session = SessionState::starting_at(u16::MAX - 1);
        assert_eq!(session.next_sequence(), u16::MAX);
        assert_eq!(session.next_sequence(), 0);
        assert_eq!(session.next_sequence(), 1);
    }

    #[test]
    fn duplicates_and_stale_frames_are_not_new() {
        let session = SessionState::new();
        assert_eq!(session.accept_inbound(4), SequenceCheck::New);
        assert_eq!(session.accept_inbound(4), SequenceCheck::Duplicate);
        assert_eq!(session.accept_inbound(3), SequenceCheck::Stale { last: 4 });
        assert_eq!(session.accept_inbound(5), SequenceCheck::New);
        assert_eq!(session.last_read_sequence(), Some(5));
    }

    #[test]
    fn wraparound_is_forward_progress() {
        let session = SessionState::new();
        assert_eq!(session.accept_inbound(u16::MAX), SequenceCheck::New);
        assert_eq!(session.accept_inbound(0), SequenceCheck::New);
        assert_eq!(session.accept_inbound(1), SequenceCheck::New);
        assert_eq!(
            session.accept_inbound(u16::MAX),
            SequenceCheck::Stale { last: 1 }
        );
    }

    #[test]
    fn reset_accepts_previous_sequence_again() {
        let session = SessionState::new();
        assert_eq!(session.accept_inbound(40_000), SequenceCheck::New);
        session.reset_inbound();
        assert_eq!(session.last_read_sequence(), None);
        assert_eq!(session.accept_inbound(40_000), SequenceCheck::New);

        session.reset_inbound();
        assert_eq!(session.accept_inbound(1), SequenceCheck::New);
    }
}
