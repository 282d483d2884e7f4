//! Lease table: the reserved set of a tube.
//!
//! Leases are keyed by `LeaseId`. A min-heap on deadline finds expired
//! leases; entries for leases that ended early (or were touched) stay in the
//! heap and are skipped when they reach the top.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use tokio::time::Instant;

use crate::domain::{LeaseId, MessageId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub message_id: MessageId,
    pub deadline: Instant,
}

#[derive(Debug, Default)]
pub struct LeaseTable {
    active: HashMap<LeaseId, Lease>,
    expiry: BinaryHeap<Reverse<(Instant, LeaseId)>>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&mut self, lease_id: LeaseId, message_id: MessageId, deadline: Instant) {
        self.active.insert(
            lease_id,
            Lease {
                message_id,
                deadline,
            },
        );
        self.expiry.push(Reverse((deadline, lease_id)));
    }

    pub fn get(&self, lease_id: &LeaseId) -> Option<&Lease> {
        self.active.get(lease_id)
    }

    /// End a lease. `None` when it already ended.
    pub fn end(&mut self, lease_id: &LeaseId) -> Option<Lease> {
        let lease = self.active.remove(lease_id);
        self.compact_if_sparse();
        lease
    }

    /// Move a live lease's deadline.
    pub fn extend(&mut self, lease_id: &LeaseId, deadline: Instant) -> Option<Lease> {
        let lease = self.active.get_mut(lease_id)?;
        lease.deadline = deadline;
        self.expiry.push(Reverse((deadline, *lease_id)));
        Some(*lease)
    }

    /// Remove and return one lease whose deadline is at or before `now`.
    pub fn pop_expired(&mut self, now: Instant) -> Option<(LeaseId, Lease)> {
        while let Some(Reverse((deadline, lease_id))) = self.expiry.peek().copied() {
            if deadline > now {
                return None;
            }
            self.expiry.pop();
            match self.active.get(&lease_id) {
                Some(lease) if lease.deadline == deadline => {
                    let lease = *lease;
                    self.active.remove(&lease_id);
                    return Some((lease_id, lease));
                }
                _ => continue, // ended or touched since
            }
        }
        None
    }

    /// Earliest live deadline.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((deadline, lease_id))) = self.expiry.peek().copied() {
            match self.active.get(&lease_id) {
                Some(lease) if lease.deadline == deadline => return Some(deadline),
                _ => {
                    self.expiry.pop();
                }
            }
        }
        None
    }

    /// Drop every lease, returning the message ids they covered.
    pub fn drain(&mut self) -> Vec<MessageId> {
        self.expiry.clear();
        self.active.drain().map(|(_, lease)| lease.message_id).collect()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    fn compact_if_sparse(&mut self) {
        if self.expiry.len() > 64 && self.expiry.len() > self.active.len() * 4 {
            let active = &self.active;
            self.expiry
                .retain(|Reverse((deadline, id))| active.get(id).is_some_and(|l| l.deadline == *deadline));
        }
    }
}
