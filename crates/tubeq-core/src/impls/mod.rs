//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryStore**: プロセス内の message body ストア
//!
//! 永続ストアは `MessageStore` を実装した別クレートとして追加する想定です。

pub mod inmem_store;

pub use self::inmem_store::InMemoryStore;
