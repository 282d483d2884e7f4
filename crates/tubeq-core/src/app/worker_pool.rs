//! WorkerPool - reserve → handle → finish/release/bury を回すワーカー群

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::{Message, QueueError, ReleaseOptions};
use crate::queue::JobQueue;

/// Delay before a message whose handler failed is offered again.
pub const ERROR_RELEASE_DELAY: Duration = Duration::from_secs(1);

/// Pause after a failed reserve, so a broken store is not spun on.
const RESERVE_BACKOFF: Duration = Duration::from_millis(200);

/// What the worker does with the reservation once the handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Finish,
    Release(ReleaseOptions),
    Bury,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// JobHandler は reserve されたメッセージを処理する
///
/// - `Ok(disposition)` はそのまま queue に反映
/// - `Err(_)` は `ERROR_RELEASE_DELAY` 後に再配送（release）
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<Disposition, HandlerError>;
}

/// Worker pool handle.
/// - `request_shutdown()` で新しい reserve をやめる（処理中のメッセージは最後まで処理）
/// - `shutdown_and_join()` で全ワーカーの終了を待てる
/// - tube が閉じられた場合もワーカーは自分で止まる
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `n` workers over `queue`.
    pub fn spawn(n: usize, queue: Arc<dyn JobQueue>, handler: Arc<dyn JobHandler>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let q = Arc::clone(&queue);
            let h = Arc::clone(&handler);
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                worker_loop(worker_id, q, h, &mut rx).await;
            });
            joins.push(join);
        }

        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    pub fn request_shutdown(&self) {
        // ignore send error: every worker may already have stopped
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        self.join().await;
    }

    /// Wait for every worker without asking them to stop.
    pub async fn join(self) {
        for j in self.joins {
            let _ = j.await;
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    debug!(worker_id, tube = %queue.name(), "worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // reserve は待つので shutdown と競合させる（途中で drop しても lease は残らない）
        let reserved = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            reserved = queue.reserve(None) => reserved,
        };

        let reservation = match reserved {
            Ok(Some(reservation)) => reservation,
            // the tube's default reserve timeout elapsed
            Ok(None) => continue,
            Err(QueueError::Closed(_)) => break,
            Err(e) => {
                warn!(worker_id, error = %e, "reserve failed");
                tokio::time::sleep(RESERVE_BACKOFF).await;
                continue;
            }
        };

        let id = reservation.id();
        let lease = reservation.lease;
        let settled = match handler.handle(&reservation.message).await {
            Ok(Disposition::Finish) => queue.finish(lease.into()).await,
            Ok(Disposition::Release(options)) => queue.release(lease, options).await,
            Ok(Disposition::Bury) => queue.bury(lease).await,
            Err(e) => {
                warn!(worker_id, %id, error = %e, "handler failed, releasing");
                queue
                    .release(lease, ReleaseOptions::new().delay(ERROR_RELEASE_DELAY))
                    .await
            }
        };
        if let Err(e) = settled {
            // typically the lease expired while the handler ran
            warn!(worker_id, %id, error = %e, "could not settle reservation");
        }
    }
    debug!(worker_id, "worker stopped");
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::domain::{MessageId, Payload, SubmitOptions, TubeName, TubeSettings};
    use crate::queue::TubeQueue;

    fn tube() -> Arc<TubeQueue> {
        Arc::new(TubeQueue::new(
            TubeName::new("pool").unwrap(),
            TubeSettings::default(),
        ))
    }

    /// Finishes everything, counting deliveries per message.
    #[derive(Default)]
    struct Counting {
        seen: Mutex<HashMap<MessageId, usize>>,
    }

    #[async_trait]
    impl JobHandler for Counting {
        async fn handle(&self, message: &Message) -> Result<Disposition, HandlerError> {
            *self.seen.lock().unwrap().entry(message.id).or_default() += 1;
            Ok(Disposition::Finish)
        }
    }

    /// Fails the first delivery of every message.
    #[derive(Default)]
    struct FailOnce {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler for FailOnce {
        async fn handle(&self, message: &Message) -> Result<Disposition, HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if message.reserve_count == 1 {
                return Err(HandlerError::new("transient"));
            }
            Ok(Disposition::Finish)
        }
    }

    struct BuryAll;

    #[async_trait]
    impl JobHandler for BuryAll {
        async fn handle(&self, _message: &Message) -> Result<Disposition, HandlerError> {
            Ok(Disposition::Bury)
        }
    }

    async fn wait_until(tube: &TubeQueue, done: impl Fn(&crate::domain::TubeStats) -> bool) {
        for _ in 0..1000 {
            if done(&tube.stats().await) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached: {:?}", tube.stats().await);
    }

    #[tokio::test(start_paused = true)]
    async fn pool_processes_every_message_once() {
        let tube = tube();
        let handler = Arc::new(Counting::default());
        let pool = WorkerPool::spawn(3, tube.clone(), handler.clone());
        assert_eq!(pool.len(), 3);

        for i in 0..10 {
            tube.submit(Payload::from(format!("job-{i}")), SubmitOptions::new())
                .await
                .unwrap();
        }
        wait_until(&tube, |s| s.finished == 10).await;
        pool.shutdown_and_join().await;

        let seen = handler.seen.lock().unwrap();
        assert_eq!(seen.len(), 10);
        assert!(seen.values().all(|n| *n == 1));
    }

    #[tokio::test(start_paused = true)]
    async fn handler_error_releases_for_retry() {
        let tube = tube();
        let handler = Arc::new(FailOnce::default());
        let pool = WorkerPool::spawn(1, tube.clone(), handler.clone());

        tube.submit(Payload::from("flaky"), SubmitOptions::new())
            .await
            .unwrap();
        wait_until(&tube, |s| s.finished == 1).await;
        pool.shutdown_and_join().await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert_eq!(tube.stats().await.reserved_total, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn bury_disposition_sidelines_the_message() {
        let tube = tube();
        let pool = WorkerPool::spawn(2, tube.clone(), Arc::new(BuryAll));

        tube.submit(Payload::from("poison"), SubmitOptions::new())
            .await
            .unwrap();
        wait_until(&tube, |s| s.buried == 1).await;
        pool.shutdown_and_join().await;

        assert_eq!(tube.count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn workers_stop_when_the_tube_closes() {
        let tube = tube();
        let pool = WorkerPool::spawn(2, tube.clone(), Arc::new(Counting::default()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        tube.close();

        pool.join().await;
    }
}
