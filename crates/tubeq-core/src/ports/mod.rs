//! Ports - 抽象化レイヤー
//!
//! engine が外部に依存する部分（時刻、ID 採番、message body の保存先）を
//! trait として切り出しています。

pub mod clock;
pub mod id_generator;
pub mod message_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::message_store::{MessageStore, StorageError, StorageResult};
