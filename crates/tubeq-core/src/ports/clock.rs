//! Clock port - 時刻の抽象化
//!
//! - `now()`: 単調増加の時刻（lease の期限・delay の判定に使う）
//! - `wall()`: 壁時計（ID の timestamp 部分と `created_at` に使う）

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Clock は現在時刻を提供
///
/// `now()` は tokio の `Instant` を返すので、`tokio::time::pause` 下の
/// テストでは仮想時間に従います。
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    fn wall(&self) -> DateTime<Utc>;
}

/// 本番用
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// テスト用: 壁時計を固定する
///
/// 単調時刻は tokio に任せる（`start_paused` と組み合わせて使う）。
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    wall: DateTime<Utc>,
}

impl FixedClock {
    pub fn new(wall: DateTime<Utc>) -> Self {
        Self { wall }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall(&self) -> DateTime<Utc> {
        self.wall
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn wall(&self) -> DateTime<Utc> {
        (**self).wall()
    }
}
