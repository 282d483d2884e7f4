//! Scheduler - 遅延メッセージの昇格と期限切れ lease の回収
//!
//! # フロー
//! 1. 登録済みの全 tube に `TubeQueue::tick()` をかける
//! 2. 各 tube の次の期限の最小値と poll 間隔の早い方まで眠る
//! 3. tube 側から schedule signal が来たら早めに起きて再計算

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::domain::TubeName;
use crate::ports::Clock;
use crate::queue::TubeQueue;

/// Name → tube map shared by the broker and its scheduler.
#[derive(Default)]
pub struct TubeRegistry {
    tubes: RwLock<BTreeMap<TubeName, Arc<TubeQueue>>>,
}

impl TubeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &TubeName) -> Option<Arc<TubeQueue>> {
        self.read().get(name).cloned()
    }

    /// Existing tube, or the one `create` builds.
    pub fn get_or_insert_with(
        &self,
        name: &TubeName,
        create: impl FnOnce() -> TubeQueue,
    ) -> (Arc<TubeQueue>, bool) {
        if let Some(tube) = self.get(name) {
            return (tube, false);
        }
        let mut tubes = self.tubes.write().unwrap_or_else(PoisonError::into_inner);
        // another caller may have won between the read and the write lock
        if let Some(tube) = tubes.get(name) {
            return (tube.clone(), false);
        }
        let tube = Arc::new(create());
        tubes.insert(name.clone(), tube.clone());
        (tube, true)
    }

    pub fn remove(&self, name: &TubeName) -> Option<Arc<TubeQueue>> {
        self.tubes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    pub fn names(&self) -> Vec<TubeName> {
        self.read().keys().cloned().collect()
    }

    /// Every tube, cloned out so no registry lock is held while ticking.
    pub fn snapshot(&self) -> Vec<Arc<TubeQueue>> {
        self.read().values().cloned().collect()
    }

    pub fn drain(&self) -> Vec<Arc<TubeQueue>> {
        let mut tubes = self.tubes.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *tubes).into_values().collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<TubeName, Arc<TubeQueue>>> {
        self.tubes.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Background timer for every tube of a broker.
pub struct Scheduler {
    registry: Arc<TubeRegistry>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    signal: Arc<Notify>,
}

/// Running scheduler task.
/// - `shutdown()` で停止要求を送り、終了を待つ
/// - handle を drop しても送信側が落ちるので task は止まる
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    pub async fn shutdown(self) {
        // ignore send error: the task may already be gone
        let _ = self.shutdown_tx.send(true);
        let _ = self.join.await;
    }
}

impl Scheduler {
    pub fn new(
        registry: Arc<TubeRegistry>,
        clock: Arc<dyn Clock>,
        poll_interval: Duration,
        signal: Arc<Notify>,
    ) -> Self {
        Self {
            registry,
            clock,
            poll_interval,
            signal,
        }
    }

    /// Must be called inside a tokio runtime.
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(shutdown_rx));
        SchedulerHandle { shutdown_tx, join }
    }

    /// One pass over every tube. Returns the earliest next due time.
    pub fn tick_all(&self) -> Option<Instant> {
        self.registry
            .snapshot()
            .iter()
            .filter_map(|tube| tube.tick())
            .min()
    }

    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(poll_interval_ms = self.poll_interval.as_millis() as u64, "scheduler started");
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let next_due = self.tick_all();
            let poll_at = self.clock.now() + self.poll_interval;
            let wake_at = next_due.map_or(poll_at, |due| due.min(poll_at));
            debug!(?next_due, "scheduler sleeping");

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = self.signal.notified() => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
        info!("scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Payload, SubmitOptions, TubeSettings};
    use crate::ports::SystemClock;
    use crate::queue::{JobQueue, TubeParts};

    fn registry_with(names: &[&str], signal: &Arc<Notify>) -> Arc<TubeRegistry> {
        let registry = Arc::new(TubeRegistry::new());
        for name in names {
            let name = TubeName::new(*name).unwrap();
            let parts = TubeParts {
                schedule_signal: Some(signal.clone()),
                ..TubeParts::default()
            };
            registry.get_or_insert_with(&name, || {
                TubeQueue::with_parts(name.clone(), TubeSettings::default(), parts)
            });
        }
        registry
    }

    #[test]
    fn registry_returns_the_same_tube_twice() {
        let registry = TubeRegistry::new();
        let name = TubeName::new("jobs").unwrap();

        let (first, created) = registry
            .get_or_insert_with(&name, || TubeQueue::new(name.clone(), TubeSettings::default()));
        assert!(created);
        let (second, created) = registry
            .get_or_insert_with(&name, || TubeQueue::new(name.clone(), TubeSettings::default()));

        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.names(), vec![name.clone()]);
        assert!(registry.remove(&name).is_some());
        assert!(registry.get(&name).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn tick_all_reports_earliest_due_time() {
        let signal = Arc::new(Notify::new());
        let registry = registry_with(&["a", "b"], &signal);
        let scheduler = Scheduler::new(
            registry.clone(),
            Arc::new(SystemClock),
            Duration::from_secs(1),
            signal,
        );
        let a = registry.get(&TubeName::new("a").unwrap()).unwrap();
        let b = registry.get(&TubeName::new("b").unwrap()).unwrap();
        let start = Instant::now();

        a.submit(Payload::from("x"), SubmitOptions::new().delay(Duration::from_secs(9)))
            .await
            .unwrap();
        b.submit(Payload::from("y"), SubmitOptions::new().delay(Duration::from_secs(4)))
            .await
            .unwrap();

        assert_eq!(scheduler.tick_all(), Some(start + Duration::from_secs(4)));
    }

    #[tokio::test(start_paused = true)]
    async fn background_pass_reclaims_expired_leases() {
        let signal = Arc::new(Notify::new());
        let registry = registry_with(&["work"], &signal);
        let handle = Scheduler::new(
            registry.clone(),
            Arc::new(SystemClock),
            Duration::from_secs(60),
            signal,
        )
        .spawn();
        let tube = registry.get(&TubeName::new("work").unwrap()).unwrap();

        tube.submit(Payload::from("job"), SubmitOptions::new().ttr(Duration::from_secs(2)))
            .await
            .unwrap();
        tube.reserve(Some(Duration::ZERO)).await.unwrap().unwrap();

        // no caller touches the tube; only the scheduler can reclaim
        tokio::time::sleep(Duration::from_secs(3)).await;

        let stats = tube.stats_without_tick();
        assert_eq!(stats.reclaimed, 1);
        assert_eq!(stats.ready, 1);

        handle.shutdown().await;
    }
}
