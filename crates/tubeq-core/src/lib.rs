//! tubeq-core
//!
//! Reservation job queue engine: named tubes, priorities, delayed delivery,
//! time-to-run leases with redelivery, and bury/kick for poison messages.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, tube name, message, options, errors, stats）
//! - **ports**: 抽象化レイヤー（Clock, IdGenerator, MessageStore）
//! - **impls**: 実装（InMemoryStore）
//! - **queue**: `JobQueue` trait と tube エンジン（`TubeQueue`）
//! - **app**: broker, scheduler, worker pool, config
//! - **typed**: 型付き Job API（JSON payload）

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod typed;

pub use crate::app::{Broker, BrokerBuilder, EngineConfig};
pub use crate::domain::{
    LeaseId, Message, MessageId, MessageState, Payload, QueueError, ReleaseOptions,
    SubmitOptions, TubeName, TubeStats,
};
pub use crate::queue::{JobQueue, JobRef, Reservation, TubeQueue};
