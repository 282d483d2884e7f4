//! In-memory tube engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::redelivery::{ExpiryAction, RedeliveryPolicy};
use super::tube::{TickReport, TubeState};
use super::{JobQueue, JobRef, MessageRecord, Reservation};
use crate::domain::{
    LeaseId, Message, MessageId, MessageState, Payload, QueueError, ReleaseOptions,
    SubmitOptions, TubeName, TubeSettings, TubeStats,
};
use crate::impls::InMemoryStore;
use crate::ports::{Clock, IdGenerator, MessageStore, StorageError, SystemClock, UlidGenerator};

/// Collaborators of a tube. A broker hands the same parts to every tube so
/// ids stay unique and one store holds every body.
#[derive(Clone)]
pub struct TubeParts {
    pub store: Arc<dyn MessageStore>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,

    /// Poked whenever this tube gets an earlier due time (new delayed
    /// message, new lease), so a sleeping scheduler can recompute.
    pub schedule_signal: Option<Arc<Notify>>,
}

impl Default for TubeParts {
    fn default() -> Self {
        Self {
            store: Arc::new(InMemoryStore::new()),
            clock: Arc::new(SystemClock),
            ids: Arc::new(UlidGenerator::new(SystemClock)),
            schedule_signal: None,
        }
    }
}

enum ReserveAttempt {
    Granted(Reservation),
    Empty { next_due: Option<Instant> },
}

/// One tube: its lifecycle sets behind a mutex, plus the wakeup used by
/// blocked reservers.
///
/// Time-driven transitions (promotion of due messages, reclaim of expired
/// leases) are applied at the start of every operation as well as by the
/// broker's scheduler, so a lease is valid exactly until its deadline.
pub struct TubeQueue {
    name: TubeName,
    settings: TubeSettings,
    policy: RedeliveryPolicy,
    state: Mutex<TubeState>,
    parts: TubeParts,
    ready_signal: Notify,
    closed: AtomicBool,
}

impl TubeQueue {
    /// Standalone tube with its own in-memory store.
    pub fn new(name: TubeName, settings: TubeSettings) -> Self {
        Self::with_parts(name, settings, TubeParts::default())
    }

    pub fn with_parts(name: TubeName, settings: TubeSettings, parts: TubeParts) -> Self {
        let policy = RedeliveryPolicy {
            max_reserves: settings.max_reserves,
        };
        Self {
            name,
            settings,
            policy,
            state: Mutex::new(TubeState::new()),
            parts,
            ready_signal: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &TubeSettings {
        &self.settings
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop serving. Blocked reservers wake up with `QueueError::Closed`.
    /// Messages stay where they are; `flush` still works on a closed tube.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(tube = %self.name, "tube closed");
        }
        self.ready_signal.notify_waiters();
    }

    /// One scheduler pass. Returns when this tube next needs one.
    pub fn tick(&self) -> Option<Instant> {
        if self.is_closed() {
            return None;
        }
        let now = self.parts.clock.now();
        let mut state = self.state();
        self.tick_locked(&mut state, now);
        state.next_due()
    }

    /// Stats as they are, without applying due transitions first.
    #[cfg(test)]
    pub(crate) fn stats_without_tick(&self) -> TubeStats {
        self.state().stats(self.name.clone())
    }

    fn state(&self) -> MutexGuard<'_, TubeState> {
        // TubeState methods do not panic mid-transition: deadlines
        // saturate and every lookup returns before mutating.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed(self.name.clone()));
        }
        Ok(())
    }

    /// Lock the state with time-driven transitions applied.
    fn current_state(&self, now: Instant) -> MutexGuard<'_, TubeState> {
        let mut state = self.state();
        self.tick_locked(&mut state, now);
        state
    }

    fn tick_locked(&self, state: &mut TubeState, now: Instant) {
        let report = state.tick(now, &self.policy);
        if report.is_empty() {
            return;
        }
        self.log_tick(&report);
        if report.made_ready() {
            self.ready_signal.notify_waiters();
        }
    }

    fn log_tick(&self, report: &TickReport) {
        if report.promoted > 0 {
            debug!(tube = %self.name, promoted = report.promoted, "promoted delayed messages");
        }
        for (id, action, reserve_count) in &report.expired {
            match action {
                ExpiryAction::Redeliver => {
                    info!(tube = %self.name, %id, reserve_count, "lease expired, message back to ready")
                }
                ExpiryAction::Bury => {
                    warn!(tube = %self.name, %id, reserve_count, "lease expired too many times, message buried")
                }
            }
        }
    }

    fn signal_schedule(&self) {
        if let Some(signal) = &self.parts.schedule_signal {
            signal.notify_one();
        }
    }

    /// A delayed entry may now be the earliest due time. Blocked reservers
    /// sleep until the old one, so they recompute it.
    fn wake_for_new_due(&self) {
        self.ready_signal.notify_waiters();
        self.signal_schedule();
    }

    fn load(&self, record: &MessageRecord) -> Result<Message, StorageError> {
        match self.parts.store.get(record.id)? {
            Some(payload) => Ok(record.to_message(self.name.clone(), payload)),
            None => Err(StorageError::MissingBody(record.id)),
        }
    }

    fn remove_body(&self, id: MessageId) {
        if let Err(e) = self.parts.store.remove(id) {
            warn!(tube = %self.name, %id, error = %e, "failed to delete message body");
        }
    }

    /// Grant a lease on the ready head, or report when to look again.
    ///
    /// Synchronous on purpose: a caller dropping `reserve` mid-wait can
    /// never observe a granted-but-undelivered lease.
    fn try_reserve(&self) -> Result<ReserveAttempt, QueueError> {
        let now = self.parts.clock.now();
        let lease = self.parts.ids.generate_lease_id();
        let (record, more_ready) = {
            let mut state = self.current_state(now);
            match state.reserve_next(lease, now) {
                Some(record) => (record, state.ready_len() > 0),
                None => {
                    return Ok(ReserveAttempt::Empty {
                        next_due: state.next_due(),
                    });
                }
            }
        };
        self.signal_schedule();
        if more_ready {
            self.ready_signal.notify_one();
        }

        match self.load(&record) {
            Ok(message) => {
                debug!(
                    tube = %self.name,
                    id = %message.id,
                    %lease,
                    reserve_count = message.reserve_count,
                    "reserved"
                );
                Ok(ReserveAttempt::Granted(Reservation { lease, message }))
            }
            Err(e) => {
                let mut state = self.state();
                if let StorageError::MissingBody(_) = e {
                    // Handing it out again would fail the same way.
                    match state.bury(&lease) {
                        Ok(id) => {
                            warn!(tube = %self.name, %id, "message body missing, message buried")
                        }
                        Err(bury_err) => {
                            warn!(tube = %self.name, id = %record.id, error = %bury_err, "message body missing, lease already gone")
                        }
                    }
                } else if state.undo_reserve(&lease) {
                    drop(state);
                    self.ready_signal.notify_one();
                    warn!(tube = %self.name, id = %record.id, error = %e, "failed to load message body, reservation undone");
                }
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl JobQueue for TubeQueue {
    fn name(&self) -> &TubeName {
        &self.name
    }

    async fn submit(
        &self,
        payload: Payload,
        options: SubmitOptions,
    ) -> Result<MessageId, QueueError> {
        self.ensure_open()?;
        let (priority, delay, ttr) = self.settings.resolve(&options);
        let id = self.parts.ids.generate_message_id();
        self.parts.store.put(id, &payload)?;

        let record = MessageRecord::new(id, priority, ttr, self.parts.clock.wall());
        let now = self.parts.clock.now();
        self.current_state(now).insert(record, delay, now);

        if delay.is_zero() {
            self.ready_signal.notify_one();
        } else {
            self.wake_for_new_due();
        }
        debug!(tube = %self.name, %id, priority, delay_ms = delay.as_millis() as u64, "submitted");
        Ok(id)
    }

    async fn reserve(&self, timeout: Option<Duration>) -> Result<Option<Reservation>, QueueError> {
        let timeout = timeout.or(self.settings.reserve_timeout);
        // An unrepresentable deadline blocks like no timeout.
        let now = self.parts.clock.now();
        let give_up_at = timeout.and_then(|t| now.checked_add(t));

        loop {
            // Register interest before looking, so a submit landing between
            // the look and the wait is not missed.
            let notified = self.ready_signal.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.ensure_open()?;
            let next_due = match self.try_reserve()? {
                ReserveAttempt::Granted(reservation) => return Ok(Some(reservation)),
                ReserveAttempt::Empty { next_due } => next_due,
            };

            let now = self.parts.clock.now();
            if give_up_at.is_some_and(|at| now >= at) {
                return Ok(None);
            }
            let wake_at = match (give_up_at, next_due) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            match wake_at {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {},
                        _ = tokio::time::sleep_until(at) => {},
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn take(&self, timeout: Option<Duration>) -> Result<Option<Message>, QueueError> {
        let Some(reservation) = self.reserve(timeout).await? else {
            return Ok(None);
        };
        self.finish(reservation.job_ref()).await?;
        let mut message = reservation.message;
        message.state = MessageState::Done;
        message.due_at = None;
        Ok(Some(message))
    }

    async fn release(&self, lease: LeaseId, options: ReleaseOptions) -> Result<(), QueueError> {
        self.ensure_open()?;
        let now = self.parts.clock.now();
        let delay = options.resolved_delay();
        let (id, new_state) =
            self.current_state(now)
                .release(&lease, options.priority, delay, now)?;

        if new_state.is_ready() {
            self.ready_signal.notify_one();
        } else {
            self.wake_for_new_due();
        }
        debug!(tube = %self.name, %id, %lease, state = %new_state, "released");
        Ok(())
    }

    async fn finish(&self, target: JobRef) -> Result<(), QueueError> {
        self.ensure_open()?;
        let now = self.parts.clock.now();
        let id = {
            let mut state = self.current_state(now);
            match target {
                JobRef::Lease(lease) => state.finish_lease(&lease)?,
                JobRef::Message(id) => {
                    state.finish_buried(id)?;
                    id
                }
            }
        };
        self.remove_body(id);
        debug!(tube = %self.name, %id, "finished");
        Ok(())
    }

    async fn bury(&self, lease: LeaseId) -> Result<(), QueueError> {
        self.ensure_open()?;
        let now = self.parts.clock.now();
        let id = self.current_state(now).bury(&lease)?;
        info!(tube = %self.name, %id, %lease, "buried");
        Ok(())
    }

    async fn kick(&self, id: MessageId) -> Result<(), QueueError> {
        self.ensure_open()?;
        let now = self.parts.clock.now();
        self.current_state(now).kick(id)?;
        self.ready_signal.notify_one();
        info!(tube = %self.name, %id, "kicked");
        Ok(())
    }

    async fn kick_many(&self, limit: usize) -> Result<usize, QueueError> {
        self.ensure_open()?;
        let now = self.parts.clock.now();
        let kicked = self.current_state(now).kick_many(limit);
        if !kicked.is_empty() {
            self.ready_signal.notify_waiters();
            info!(tube = %self.name, kicked = kicked.len(), "kicked buried messages");
        }
        Ok(kicked.len())
    }

    async fn touch(&self, lease: LeaseId) -> Result<Instant, QueueError> {
        self.ensure_open()?;
        let now = self.parts.clock.now();
        let deadline = self.current_state(now).touch(&lease, now)?;
        debug!(tube = %self.name, %lease, "touched");
        Ok(deadline)
    }

    async fn peek(&self, limit: usize) -> Result<Vec<Message>, QueueError> {
        self.ensure_open()?;
        if let Some(window) = self.settings.peek_window
            && limit > window
        {
            return Err(QueueError::Unsupported(format!(
                "tube {} can only peek {window} message(s) at a time",
                self.name
            )));
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let now = self.parts.clock.now();
        let records = self.current_state(now).peek_ready(limit);
        let mut messages = Vec::with_capacity(records.len());
        for record in &records {
            match self.parts.store.get(record.id) {
                Ok(Some(payload)) => messages.push(record.to_message(self.name.clone(), payload)),
                // finished since the snapshot
                Ok(None) => continue,
                Err(e) => {
                    warn!(tube = %self.name, error = %e, "peek: store unavailable, reporting empty");
                    return Ok(Vec::new());
                }
            }
        }
        Ok(messages)
    }

    async fn get(&self, id: MessageId) -> Result<Message, QueueError> {
        self.ensure_open()?;
        let now = self.parts.clock.now();
        let record = self
            .current_state(now)
            .get(&id)
            .cloned()
            .ok_or_else(|| QueueError::not_found(id))?;
        match self.parts.store.get(id)? {
            Some(payload) => Ok(record.to_message(self.name.clone(), payload)),
            None => Err(QueueError::not_found(id)),
        }
    }

    async fn count(&self) -> usize {
        if self.is_closed() {
            return 0;
        }
        self.current_state(self.parts.clock.now()).ready_len()
    }

    async fn stats(&self) -> TubeStats {
        self.current_state(self.parts.clock.now())
            .stats(self.name.clone())
    }

    async fn flush(&self) -> Result<usize, QueueError> {
        let removed = self.state().drain();
        let mut first_error = None;
        for id in &removed {
            if let Err(e) = self.parts.store.remove(*id) {
                warn!(tube = %self.name, %id, error = %e, "flush: failed to delete message body");
                first_error.get_or_insert(e);
            }
        }
        info!(tube = %self.name, removed = removed.len(), "flushed");
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(removed.len()),
        }
    }

    async fn ping(&self) -> Result<(), QueueError> {
        self.ensure_open()?;
        self.parts.store.ping()?;
        Ok(())
    }
}
