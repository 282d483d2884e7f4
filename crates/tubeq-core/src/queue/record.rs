//! Message record: per-message metadata held by a tube.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::domain::{LeaseId, MAX_DURATION, Message, MessageId, MessageState, Payload, TubeName};

/// `now + after`, saturating at the furthest deadline the clock can hold.
pub(crate) fn deadline_after(now: Instant, after: Duration) -> Instant {
    now.checked_add(after)
        .or_else(|| now.checked_add(MAX_DURATION))
        .unwrap_or(now)
}

/// Metadata for a message in a tube.
///
/// - This is the single source of truth for message state.
/// - Tube sub-structures (ready/delayed/reserved/buried) hold ids only.
/// - The body lives in the `MessageStore`.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub id: MessageId,
    pub priority: u32,
    pub ttr: Duration,
    pub state: MessageState,

    /// Promotion time (Delayed) or lease deadline (Reserved).
    pub due_at: Option<Instant>,

    pub reserve_count: u32,

    /// Position key inside the current ordered set (ready, delayed or buried).
    /// Kept while Reserved so an undone reservation can go back to its slot.
    pub seq: u64,

    /// Live lease while Reserved.
    pub lease: Option<LeaseId>,

    pub created_at: DateTime<Utc>,
}

impl MessageRecord {
    pub fn new(id: MessageId, priority: u32, ttr: Duration, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            priority,
            ttr,
            state: MessageState::Ready,
            due_at: None,
            reserve_count: 0,
            seq: 0,
            lease: None,
            created_at,
        }
    }

    pub fn mark_ready(&mut self, seq: u64) {
        self.state = MessageState::Ready;
        self.due_at = None;
        self.lease = None;
        self.seq = seq;
    }

    pub fn mark_delayed(&mut self, due_at: Instant, seq: u64) {
        self.state = MessageState::Delayed;
        self.due_at = Some(due_at);
        self.lease = None;
        self.seq = seq;
    }

    /// Ready -> Reserved. Returns the lease deadline.
    pub fn start_reservation(&mut self, lease: LeaseId, now: Instant) -> Instant {
        let deadline = deadline_after(now, self.ttr);
        self.state = MessageState::Reserved;
        self.due_at = Some(deadline);
        self.lease = Some(lease);
        self.reserve_count += 1;
        deadline
    }

    /// Undo a reservation that never reached the caller.
    ///
    /// `reserve_count` keeps the attempt: it never goes down.
    pub fn undo_reservation(&mut self) {
        let seq = self.seq;
        self.mark_ready(seq);
    }

    pub fn mark_buried(&mut self, seq: u64) {
        self.state = MessageState::Buried;
        self.due_at = None;
        self.lease = None;
        self.seq = seq;
    }

    pub fn to_message(&self, tube: TubeName, payload: Payload) -> Message {
        Message {
            id: self.id,
            tube,
            payload,
            priority: self.priority,
            state: self.state,
            due_at: self.due_at,
            reserve_count: self.reserve_count,
            ttr: self.ttr,
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn record() -> MessageRecord {
        MessageRecord::new(
            MessageId::from_ulid(Ulid::new()),
            10,
            Duration::from_secs(5),
            Utc::now(),
        )
    }

    #[test]
    fn reservation_sets_deadline_and_counts() {
        let mut r = record();
        r.mark_ready(3);
        let now = Instant::now();
        let lease = LeaseId::from_ulid(Ulid::new());

        let deadline = r.start_reservation(lease, now);

        assert_eq!(deadline, now + Duration::from_secs(5));
        assert_eq!(r.state, MessageState::Reserved);
        assert_eq!(r.reserve_count, 1);
        assert_eq!(r.lease, Some(lease));
        assert_eq!(r.seq, 3);
    }

    #[test]
    fn deadline_saturates_instead_of_overflowing() {
        let now = Instant::now();
        assert_eq!(deadline_after(now, Duration::from_secs(5)), now + Duration::from_secs(5));
        assert!(deadline_after(now, Duration::MAX) > now);
    }

    #[test]
    fn undo_restores_ready_slot() {
        let mut r = record();
        r.mark_ready(42);
        r.start_reservation(LeaseId::from_ulid(Ulid::new()), Instant::now());

        r.undo_reservation();

        assert_eq!(r.state, MessageState::Ready);
        assert_eq!(r.reserve_count, 1);
        assert_eq!(r.seq, 42);
        assert!(r.lease.is_none());
        assert!(r.due_at.is_none());
    }
}
