//! BrokerBuilder - broker の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 開発体験の改善（明確なエラーメッセージ）

use std::sync::Arc;

use tokio::sync::Notify;
use tracing::info;

use super::broker::Broker;
use super::config::{ConfigError, EngineConfig};
use super::scheduler::{Scheduler, TubeRegistry};
use crate::domain::{TubeName, TubeNameError};
use crate::impls::InMemoryStore;
use crate::ports::{Clock, IdGenerator, MessageStore, SystemClock, UlidGenerator};
use crate::queue::TubeParts;

/// BrokerBuilder は Broker を構築
///
/// # 使用例
/// ```ignore
/// let broker = BrokerBuilder::new()
///     .config(EngineConfig::load("tubeq.toml")?)
///     .open_tubes(&["emails", "thumbnails"])
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - 設定値の検証は build() 時に行う
/// - open_tubes() と設定ファイルにある tube 名は build() 時に検証して開く
/// - 不正があれば BuildError を返す
pub struct BrokerBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn MessageStore>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    tubes: Vec<String>,
}

/// BuildError は broker 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid tube name {name:?}: {source}")]
    TubeName {
        name: String,
        #[source]
        source: TubeNameError,
    },

    #[error("broker must be built inside a tokio runtime (the scheduler is a tokio task)")]
    NoRuntime,
}

impl BrokerBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            store: None,
            clock: None,
            ids: None,
            tubes: Vec::new(),
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Body store shared by every tube. Defaults to `InMemoryStore`.
    pub fn store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Defaults to ULIDs stamped by the builder's clock.
    pub fn ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Tubes to open at build time, on top of those named in the config.
    pub fn open_tubes(mut self, names: &[&str]) -> Self {
        self.tubes.extend(names.iter().map(|n| n.to_string()));
        self
    }

    /// # 検証
    /// - 設定値（`EngineConfig::validate`）
    /// - tube 名
    /// - tokio runtime の中で呼ばれているか
    pub fn build(self) -> Result<Broker, BuildError> {
        self.config.validate()?;
        let mut names = self.config.configured_tubes()?;
        for name in &self.tubes {
            let tube = TubeName::new(name.as_str()).map_err(|source| BuildError::TubeName {
                name: name.clone(),
                source,
            })?;
            if !names.contains(&tube) {
                names.push(tube);
            }
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(BuildError::NoRuntime);
        }

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids: Arc<dyn IdGenerator> = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone())));
        let store: Arc<dyn MessageStore> = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStore::new()));
        let signal = Arc::new(Notify::new());
        let parts = TubeParts {
            store,
            clock: clock.clone(),
            ids,
            schedule_signal: Some(signal.clone()),
        };

        let registry = Arc::new(TubeRegistry::new());
        let scheduler = Scheduler::new(
            registry.clone(),
            clock,
            self.config.scheduler.poll_interval(),
            signal,
        )
        .spawn();

        let broker = Broker::new(self.config, parts, registry, scheduler);
        for name in &names {
            broker.open(name);
        }
        info!(tubes = names.len(), "broker started");
        Ok(broker)
    }
}

impl Default for BrokerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Payload, SubmitOptions};
    use crate::queue::JobQueue;

    #[tokio::test]
    async fn test_build_opens_configured_and_requested_tubes() {
        let config = EngineConfig::from_toml_str("[tubes.emails]\nmax_reserves = 3\n").unwrap();
        let broker = BrokerBuilder::new()
            .config(config)
            .open_tubes(&["thumbnails", "emails"])
            .build()
            .unwrap();

        let names: Vec<String> = broker.tubes().iter().map(|t| t.to_string()).collect();
        assert_eq!(names, vec!["emails", "thumbnails"]);
        broker.shutdown().await;
    }

    #[tokio::test]
    async fn test_build_invalid_tube_name() {
        let result = BrokerBuilder::new().open_tubes(&["bad name"]).build();
        assert!(matches!(
            result,
            Err(BuildError::TubeName { name, .. }) if name == "bad name"
        ));
    }

    #[tokio::test]
    async fn test_build_invalid_config() {
        let mut config = EngineConfig::default();
        config.scheduler.poll_interval_ms = 0;

        let result = BrokerBuilder::new().config(config).build();

        assert!(matches!(result, Err(BuildError::Config(ConfigError::Invalid(_)))));
    }

    #[test]
    fn test_build_outside_runtime() {
        let result = BrokerBuilder::new().build();
        assert!(matches!(result, Err(BuildError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_build_with_shared_store() {
        let store = Arc::new(InMemoryStore::new());
        let broker = BrokerBuilder::new().store(store.clone()).build().unwrap();

        broker
            .open(&TubeName::new("a").unwrap())
            .submit(Payload::from("x"), SubmitOptions::new())
            .await
            .unwrap();
        broker
            .open(&TubeName::new("b").unwrap())
            .submit(Payload::from("y"), SubmitOptions::new())
            .await
            .unwrap();

        assert_eq!(store.len(), 2);
        broker.shutdown().await;
    }
}
