//! Typed - 型付き Job API
//!
//! エンジンは payload をバイト列のまま扱う。この層は JSON を介して
//! Rust の型と payload を対応付け、Job 型と tube の取り違えを型で防ぐ。
//!
//! # 二層構造
//! - **表層（Typed）**: `Job` trait, `Handler<J>` trait, `TypedQueue<J>` - 型安全
//! - **内部（Dyn）**: `JobHandler` trait - object-safe, `WorkerPool` が使う

pub mod codec;
pub mod handler;
pub mod job;

// 主要な trait/型 を再エクスポート
pub use self::codec::{CodecError, PayloadCodec};
pub use self::handler::{Handler, TypedHandler};
pub use self::job::{Job, TypedError, TypedQueue};
