//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use crate::domain::ids::{LeaseId, MessageId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は message / lease の ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数 tube から共有する）
pub trait IdGenerator: Send + Sync {
    fn generate_message_id(&self) -> MessageId;

    fn generate_lease_id(&self) -> LeaseId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// Clock の壁時計を timestamp 部分に使い、残り 80 bit はランダム。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.wall().timestamp_millis() as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_message_id(&self) -> MessageId {
        MessageId::from(self.next_ulid())
    }

    fn generate_lease_id(&self) -> LeaseId {
        LeaseId::from(self.next_ulid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};
    use std::collections::HashSet;

    #[test]
    fn ulid_generator_generates_unique_ids() {
        let id_gen = UlidGenerator::new(SystemClock);

        let ids: HashSet<MessageId> = (0..1000).map(|_| id_gen.generate_message_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn ulid_generator_with_fixed_clock_shares_timestamp() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));

        let id1 = id_gen.generate_message_id();
        let id2 = id_gen.generate_message_id();

        // ランダム部分があるので ID は異なる
        assert_ne!(id1, id2);

        // timestamp 部分は同じ
        assert_eq!(id1.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
        assert_eq!(id2.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
    }

    #[test]
    fn different_id_types_are_generated() {
        let id_gen = UlidGenerator::new(SystemClock);

        assert!(id_gen.generate_message_id().to_string().starts_with("msg-"));
        assert!(id_gen.generate_lease_id().to_string().starts_with("lease-"));
    }
}
