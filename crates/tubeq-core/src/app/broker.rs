//! Broker - tube の登録簿とスケジューラを束ねる
//!
//! tube は `open` で作られ、`close` / `shutdown` で閉じられる。
//! 閉じた tube への操作は `QueueError::Closed` になる。

use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;

use super::config::EngineConfig;
use super::scheduler::{SchedulerHandle, TubeRegistry};
use super::status::BrokerStatus;
use crate::domain::{QueueError, TubeName};
use crate::queue::{JobQueue, TubeParts, TubeQueue};

/// Built by `BrokerBuilder`.
pub struct Broker {
    config: EngineConfig,
    parts: TubeParts,
    registry: Arc<TubeRegistry>,
    scheduler: Mutex<Option<SchedulerHandle>>,
}

impl Broker {
    pub(crate) fn new(
        config: EngineConfig,
        parts: TubeParts,
        registry: Arc<TubeRegistry>,
        scheduler: SchedulerHandle,
    ) -> Self {
        Self {
            config,
            parts,
            registry,
            scheduler: Mutex::new(Some(scheduler)),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The tube named `name`, created with its configured settings on first use.
    pub fn open(&self, name: &TubeName) -> Arc<TubeQueue> {
        let (tube, created) = self.registry.get_or_insert_with(name, || {
            TubeQueue::with_parts(
                name.clone(),
                self.config.settings_for(name),
                self.parts.clone(),
            )
        });
        if created {
            info!(tube = %name, settings = ?tube.settings(), "tube opened");
        }
        tube
    }

    /// An already open tube.
    pub fn tube(&self, name: &TubeName) -> Option<Arc<TubeQueue>> {
        self.registry.get(name)
    }

    pub fn tubes(&self) -> Vec<TubeName> {
        self.registry.names()
    }

    /// Close and forget a tube. Its messages stay in it; holders of the
    /// `Arc` can still `flush`. Returns false when no such tube is open.
    pub fn close(&self, name: &TubeName) -> bool {
        match self.registry.remove(name) {
            Some(tube) => {
                tube.close();
                true
            }
            None => false,
        }
    }

    pub async fn status(&self) -> BrokerStatus {
        let mut tubes = Vec::new();
        for tube in self.registry.snapshot() {
            tubes.push(tube.stats().await);
        }
        BrokerStatus::from_tubes(tubes)
    }

    /// Health check for the shared message store.
    pub fn ping(&self) -> Result<(), QueueError> {
        self.parts.store.ping()?;
        Ok(())
    }

    /// Stop the scheduler and close every tube. Idempotent.
    pub async fn shutdown(&self) {
        let scheduler = self
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(scheduler) = scheduler {
            scheduler.shutdown().await;
        }
        let tubes = self.registry.drain();
        let closed = tubes.len();
        for tube in tubes {
            tube.close();
        }
        info!(closed, "broker shut down");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::app::BrokerBuilder;
    use crate::domain::{Payload, SubmitOptions};

    fn name(s: &str) -> TubeName {
        TubeName::new(s).unwrap()
    }

    fn config(toml: &str) -> EngineConfig {
        EngineConfig::from_toml_str(toml).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn open_is_idempotent_and_uses_tube_settings() {
        let broker = BrokerBuilder::new()
            .config(config("[tubes.emails]\nttr_secs = 7\n"))
            .build()
            .unwrap();

        let a = broker.open(&name("emails"));
        let b = broker.open(&name("emails"));

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.settings().ttr, Duration::from_secs(7));
        assert_eq!(broker.open(&name("other")).settings().ttr, Duration::from_secs(60));
        broker.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn tubes_are_independent() {
        let broker = BrokerBuilder::new().build().unwrap();
        let a = broker.open(&name("a"));
        let b = broker.open(&name("b"));

        a.submit(Payload::from("for a"), SubmitOptions::new()).await.unwrap();

        assert_eq!(a.count().await, 1);
        assert_eq!(b.count().await, 0);
        assert!(b.reserve(Some(Duration::ZERO)).await.unwrap().is_none());
        broker.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn close_fails_later_operations() {
        let broker = BrokerBuilder::new().build().unwrap();
        let tube = broker.open(&name("gone"));

        assert!(broker.close(&name("gone")));
        assert!(!broker.close(&name("gone")));

        assert!(broker.tube(&name("gone")).is_none());
        assert!(matches!(
            tube.submit(Payload::from("x"), SubmitOptions::new()).await,
            Err(QueueError::Closed(_))
        ));
        assert_eq!(tube.count().await, 0);
        broker.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_promotes_delayed_messages_without_callers() {
        let broker = BrokerBuilder::new().build().unwrap();
        let tube = broker.open(&name("later"));
        tube.submit(Payload::from("x"), SubmitOptions::new().delay(Duration::from_secs(5)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(tube.stats_without_tick().ready, 1);
        broker.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn status_covers_every_open_tube() {
        let broker = BrokerBuilder::new().build().unwrap();
        for tube in ["a", "b"] {
            broker
                .open(&name(tube))
                .submit(Payload::from(tube), SubmitOptions::new())
                .await
                .unwrap();
        }

        let status = broker.status().await;

        assert_eq!(status.tubes.len(), 2);
        assert_eq!(status.totals.ready, 2);
        broker.ping().unwrap();
        broker.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_wakes_blocked_reservers() {
        let broker = BrokerBuilder::new().build().unwrap();
        let tube = broker.open(&name("idle"));
        let waiter = tokio::spawn({
            let tube = tube.clone();
            async move { tube.reserve(None).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        broker.shutdown().await;
        broker.shutdown().await;

        assert!(matches!(waiter.await.unwrap(), Err(QueueError::Closed(_))));
        assert!(broker.tubes().is_empty());
    }
}
