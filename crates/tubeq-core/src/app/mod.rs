//! App - アプリケーション層
//!
//! このモジュールは、tube を組み合わせて broker として動かします。
//!
//! # 主要コンポーネント
//! - **BrokerBuilder**: broker の構築とワイヤリング（Fail-fast 検証）
//! - **Broker**: tube の登録簿（open / close / shutdown / status）
//! - **Scheduler**: 遅延メッセージの昇格と期限切れ lease の回収
//! - **WorkerPool**: reserve → handle → finish/release/bury のループ
//! - **EngineConfig**: TOML 設定

pub mod broker;
pub mod builder;
pub mod config;
pub mod scheduler;
pub mod status;
pub mod worker_pool;

// 主要な型を再エクスポート
pub use self::broker::Broker;
pub use self::builder::{BrokerBuilder, BuildError};
pub use self::config::{
    ConfigError, ConnectionConfig, EngineConfig, SchedulerConfig, TubeDefaults, TubeOverrides,
};
pub use self::scheduler::{Scheduler, SchedulerHandle, TubeRegistry};
pub use self::status::{BrokerStatus, StateCounts};
pub use self::worker_pool::{Disposition, ERROR_RELEASE_DELAY, HandlerError, JobHandler, WorkerPool};
