//! Tube state: the four lifecycle sets of one tube.
//!
//! Everything here is synchronous and takes `now` as an argument; locking,
//! waiting and the message store live in `TubeQueue`.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::time::Duration;

use tokio::time::Instant;

use super::lease::LeaseTable;
use super::record::{MessageRecord, deadline_after};
use super::redelivery::{ExpiryAction, RedeliveryPolicy};
use crate::domain::{LeaseId, MessageId, MessageState, QueueError, TubeName, TubeStats};

/// Ready ordering: lower priority first, then ready-entry order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ReadyKey {
    priority: u32,
    seq: u64,
    id: MessageId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct DelayedKey {
    due_at: Instant,
    seq: u64,
    id: MessageId,
}

/// What one scheduler pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub promoted: usize,
    /// Expired leases: message id, what happened to it, its reserve count.
    pub expired: Vec<(MessageId, ExpiryAction, u32)>,
}

impl TickReport {
    /// New messages became reservable.
    pub fn made_ready(&self) -> bool {
        self.promoted > 0
            || self
                .expired
                .iter()
                .any(|(_, action, _)| *action == ExpiryAction::Redeliver)
    }

    pub fn is_empty(&self) -> bool {
        self.promoted == 0 && self.expired.is_empty()
    }
}

#[derive(Debug, Default)]
struct Counters {
    submitted: u64,
    reserved: u64,
    reclaimed: u64,
    finished: u64,
    buried: u64,
    kicked: u64,
}

/// The lifecycle sets of one tube.
///
/// Invariant: every record is referenced by exactly one of `ready`,
/// `delayed`, `leases` or `buried`, matching its `state`.
#[derive(Debug, Default)]
pub struct TubeState {
    records: HashMap<MessageId, MessageRecord>,
    ready: BinaryHeap<Reverse<ReadyKey>>,
    delayed: BinaryHeap<Reverse<DelayedKey>>,
    leases: LeaseTable,
    buried: BTreeMap<u64, MessageId>,
    next_seq: u64,
    counters: Counters,
}

impl TubeState {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Enter the ready set at the back of the message's priority class.
    fn push_ready(&mut self, id: MessageId) {
        let seq = self.allocate_seq();
        if let Some(record) = self.records.get_mut(&id) {
            record.mark_ready(seq);
            self.ready.push(Reverse(ReadyKey {
                priority: record.priority,
                seq,
                id,
            }));
        }
    }

    fn push_delayed(&mut self, id: MessageId, due_at: Instant) {
        let seq = self.allocate_seq();
        if let Some(record) = self.records.get_mut(&id) {
            record.mark_delayed(due_at, seq);
            self.delayed.push(Reverse(DelayedKey { due_at, seq, id }));
        }
    }

    fn push_buried(&mut self, id: MessageId) {
        let seq = self.allocate_seq();
        if let Some(record) = self.records.get_mut(&id) {
            record.mark_buried(seq);
            self.buried.insert(seq, id);
        }
    }

    fn end_lease(&mut self, lease_id: &LeaseId) -> Result<MessageId, QueueError> {
        self.leases
            .end(lease_id)
            .map(|lease| lease.message_id)
            .ok_or_else(|| QueueError::not_found(lease_id))
    }

    fn state_of(&self, id: MessageId) -> Result<(MessageState, u64), QueueError> {
        self.records
            .get(&id)
            .map(|r| (r.state, r.seq))
            .ok_or_else(|| QueueError::not_found(id))
    }

    pub fn insert(&mut self, record: MessageRecord, delay: Duration, now: Instant) {
        let id = record.id;
        self.records.insert(id, record);
        self.counters.submitted += 1;
        if delay.is_zero() {
            self.push_ready(id);
        } else {
            self.push_delayed(id, deadline_after(now, delay));
        }
    }

    /// Ready -> Reserved for the head of the ready set.
    pub fn reserve_next(&mut self, lease_id: LeaseId, now: Instant) -> Option<MessageRecord> {
        while let Some(Reverse(key)) = self.ready.pop() {
            let Some(record) = self.records.get_mut(&key.id) else {
                continue;
            };
            if record.state != MessageState::Ready || record.seq != key.seq {
                continue;
            }
            let deadline = record.start_reservation(lease_id, now);
            let snapshot = record.clone();
            self.leases.grant(lease_id, key.id, deadline);
            self.counters.reserved += 1;
            return Some(snapshot);
        }
        None
    }

    /// Put a reservation that never reached its caller back where it was.
    pub fn undo_reserve(&mut self, lease_id: &LeaseId) -> bool {
        let Some(lease) = self.leases.end(lease_id) else {
            return false;
        };
        let Some(record) = self.records.get_mut(&lease.message_id) else {
            return false;
        };
        record.undo_reservation();
        self.ready.push(Reverse(ReadyKey {
            priority: record.priority,
            seq: record.seq,
            id: record.id,
        }));
        self.counters.reserved = self.counters.reserved.saturating_sub(1);
        true
    }

    /// Reserved -> Done through a live lease.
    pub fn finish_lease(&mut self, lease_id: &LeaseId) -> Result<MessageId, QueueError> {
        let id = self.end_lease(lease_id)?;
        self.records.remove(&id);
        self.counters.finished += 1;
        Ok(id)
    }

    /// Buried -> Done.
    pub fn finish_buried(&mut self, id: MessageId) -> Result<(), QueueError> {
        let (state, seq) = self.state_of(id)?;
        if state != MessageState::Buried {
            return Err(QueueError::invalid_state(id, state, "finish"));
        }
        self.buried.remove(&seq);
        self.records.remove(&id);
        self.counters.finished += 1;
        Ok(())
    }

    /// Reserved -> Ready, or Delayed when `delay` is non-zero.
    pub fn release(
        &mut self,
        lease_id: &LeaseId,
        priority: Option<u32>,
        delay: Duration,
        now: Instant,
    ) -> Result<(MessageId, MessageState), QueueError> {
        let id = self.end_lease(lease_id)?;
        if let (Some(priority), Some(record)) = (priority, self.records.get_mut(&id)) {
            record.priority = priority;
        }
        if delay.is_zero() {
            self.push_ready(id);
            Ok((id, MessageState::Ready))
        } else {
            self.push_delayed(id, deadline_after(now, delay));
            Ok((id, MessageState::Delayed))
        }
    }

    /// Reserved -> Buried.
    pub fn bury(&mut self, lease_id: &LeaseId) -> Result<MessageId, QueueError> {
        let id = self.end_lease(lease_id)?;
        self.push_buried(id);
        self.counters.buried += 1;
        Ok(id)
    }

    /// Buried -> Ready.
    pub fn kick(&mut self, id: MessageId) -> Result<(), QueueError> {
        let (state, seq) = self.state_of(id)?;
        if state != MessageState::Buried {
            return Err(QueueError::invalid_state(id, state, "kick"));
        }
        self.buried.remove(&seq);
        self.push_ready(id);
        self.counters.kicked += 1;
        Ok(())
    }

    /// Kick up to `limit` buried messages, oldest burial first.
    pub fn kick_many(&mut self, limit: usize) -> Vec<MessageId> {
        let mut kicked = Vec::new();
        while kicked.len() < limit {
            let Some((_, id)) = self.buried.pop_first() else {
                break;
            };
            self.push_ready(id);
            self.counters.kicked += 1;
            kicked.push(id);
        }
        kicked
    }

    /// Restart a live lease's ttr from `now`.
    pub fn touch(&mut self, lease_id: &LeaseId, now: Instant) -> Result<Instant, QueueError> {
        let lease = self
            .leases
            .get(lease_id)
            .copied()
            .ok_or_else(|| QueueError::not_found(lease_id))?;
        let record = self
            .records
            .get_mut(&lease.message_id)
            .ok_or_else(|| QueueError::not_found(lease.message_id))?;
        let deadline = deadline_after(now, record.ttr);
        record.due_at = Some(deadline);
        self.leases.extend(lease_id, deadline);
        Ok(deadline)
    }

    /// Promote due delayed messages and reclaim expired leases.
    pub fn tick(&mut self, now: Instant, policy: &RedeliveryPolicy) -> TickReport {
        let mut report = TickReport::default();

        while let Some(Reverse(key)) = self.delayed.peek().copied() {
            if key.due_at > now {
                break;
            }
            self.delayed.pop();
            match self.records.get(&key.id) {
                Some(r) if r.state == MessageState::Delayed && r.seq == key.seq => {}
                _ => continue,
            }
            self.push_ready(key.id);
            report.promoted += 1;
        }

        while let Some((_, lease)) = self.leases.pop_expired(now) {
            let id = lease.message_id;
            let Some(reserve_count) = self.records.get(&id).map(|r| r.reserve_count) else {
                continue;
            };
            self.counters.reclaimed += 1;
            let action = policy.on_expiry(reserve_count);
            match action {
                ExpiryAction::Redeliver => self.push_ready(id),
                ExpiryAction::Bury => {
                    self.push_buried(id);
                    self.counters.buried += 1;
                }
            }
            report.expired.push((id, action, reserve_count));
        }

        report
    }

    /// Earliest delayed due time or lease deadline.
    pub fn next_due(&mut self) -> Option<Instant> {
        let delayed = self.delayed.peek().map(|Reverse(key)| key.due_at);
        match (delayed, self.leases.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Up to `limit` ready records in delivery order.
    pub fn peek_ready(&self, limit: usize) -> Vec<MessageRecord> {
        if limit == 1 {
            return self
                .ready
                .peek()
                .and_then(|Reverse(key)| self.records.get(&key.id))
                .cloned()
                .into_iter()
                .collect();
        }
        let mut keys: Vec<ReadyKey> = self.ready.iter().map(|Reverse(key)| *key).collect();
        keys.sort_unstable();
        keys.into_iter()
            .filter_map(|key| self.records.get(&key.id))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &MessageId) -> Option<&MessageRecord> {
        self.records.get(id)
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn stats(&self, name: TubeName) -> TubeStats {
        TubeStats {
            ready: self.ready.len(),
            delayed: self.delayed.len(),
            reserved: self.leases.len(),
            buried: self.buried.len(),
            submitted: self.counters.submitted,
            reserved_total: self.counters.reserved,
            reclaimed: self.counters.reclaimed,
            finished: self.counters.finished,
            buried_total: self.counters.buried,
            kicked: self.counters.kicked,
            ..TubeStats::new(name)
        }
    }

    /// Empty every set, one set at a time until it reports nothing left.
    /// Returns the removed ids; their bodies are the caller's to delete.
    pub fn drain(&mut self) -> Vec<MessageId> {
        let mut removed = Vec::with_capacity(self.records.len());
        let mut take = |id: MessageId, records: &mut HashMap<MessageId, MessageRecord>| {
            if records.remove(&id).is_some() {
                removed.push(id);
            }
        };
        while let Some(Reverse(key)) = self.delayed.pop() {
            take(key.id, &mut self.records);
        }
        while let Some((_, id)) = self.buried.pop_first() {
            take(id, &mut self.records);
        }
        while let Some(Reverse(key)) = self.ready.pop() {
            take(key.id, &mut self.records);
        }
        for id in self.leases.drain() {
            take(id, &mut self.records);
        }
        removed
    }
}
