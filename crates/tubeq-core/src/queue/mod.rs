//! Queue module: tube state, leases, redelivery policy, and the in-memory
//! engine behind the `JobQueue` trait.

mod lease;
mod memory;
mod record;
mod redelivery;
mod tube;

pub use memory::{TubeParts, TubeQueue};
pub use record::MessageRecord;
pub use redelivery::{ExpiryAction, RedeliveryPolicy};
pub use tube::TickReport;

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::domain::{
    LeaseId, Message, MessageId, Payload, QueueError, ReleaseOptions, SubmitOptions, TubeName,
    TubeStats,
};

/// A message handed out by `reserve`, with the lease that covers it.
///
/// The worker holding this must `finish`, `release` or `bury` it (through
/// `lease`) before `message.due_at`, or `touch` it to get more time. Once the
/// scheduler reclaims the lease every operation on it fails with `NotFound`.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub lease: LeaseId,
    pub message: Message,
}

impl Reservation {
    pub fn id(&self) -> MessageId {
        self.message.id
    }

    pub fn payload(&self) -> &Payload {
        &self.message.payload
    }

    pub fn job_ref(&self) -> JobRef {
        JobRef::Lease(self.lease)
    }
}

/// What `finish` acts on.
///
/// - `Lease`: a reserved message, through the lease that reserved it.
/// - `Message`: a buried message, by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRef {
    Lease(LeaseId),
    Message(MessageId),
}

impl From<LeaseId> for JobRef {
    fn from(value: LeaseId) -> Self {
        JobRef::Lease(value)
    }
}

impl From<MessageId> for JobRef {
    fn from(value: MessageId) -> Self {
        JobRef::Message(value)
    }
}

impl From<&Reservation> for JobRef {
    fn from(value: &Reservation) -> Self {
        value.job_ref()
    }
}

/// Job queue port (interface).
///
/// `TubeQueue` is the in-memory engine; a networked client would implement
/// the same trait.
#[async_trait]
pub trait JobQueue: Send + Sync {
    fn name(&self) -> &TubeName;

    /// Enqueue a new message. Never blocks.
    async fn submit(&self, payload: Payload, options: SubmitOptions)
    -> Result<MessageId, QueueError>;

    /// Reserve the next ready message.
    ///
    /// - `Some(Duration::ZERO)`: do not wait.
    /// - `Some(d)`: wait up to `d`.
    /// - `None`: use the tube's default reserve timeout (forever unless
    ///   configured).
    ///
    /// `Ok(None)` means the wait ended with nothing to hand out.
    async fn reserve(&self, timeout: Option<Duration>) -> Result<Option<Reservation>, QueueError>;

    /// Reserve and finish in one step. The returned message is `Done`.
    async fn take(&self, timeout: Option<Duration>) -> Result<Option<Message>, QueueError>;

    async fn release(&self, lease: LeaseId, options: ReleaseOptions) -> Result<(), QueueError>;

    async fn finish(&self, target: JobRef) -> Result<(), QueueError>;

    async fn bury(&self, lease: LeaseId) -> Result<(), QueueError>;

    /// Same as `bury`.
    async fn abort(&self, lease: LeaseId) -> Result<(), QueueError> {
        self.bury(lease).await
    }

    async fn kick(&self, id: MessageId) -> Result<(), QueueError>;

    /// Kick up to `limit` buried messages; returns how many moved.
    async fn kick_many(&self, limit: usize) -> Result<usize, QueueError>;

    /// Restart the lease's ttr; returns the new deadline.
    async fn touch(&self, lease: LeaseId) -> Result<Instant, QueueError>;

    /// Up to `limit` ready messages in delivery order, without changing
    /// anything. Store failures yield an empty list.
    async fn peek(&self, limit: usize) -> Result<Vec<Message>, QueueError>;

    /// Inspect one live message in any state.
    async fn get(&self, id: MessageId) -> Result<Message, QueueError>;

    /// Number of ready messages. Never fails; an unusable tube reports 0.
    async fn count(&self) -> usize;

    async fn stats(&self) -> TubeStats;

    /// Remove every message in every state; returns how many were removed.
    async fn flush(&self) -> Result<usize, QueueError>;

    /// Health check for the backing store.
    async fn ping(&self) -> Result<(), QueueError>;
}
