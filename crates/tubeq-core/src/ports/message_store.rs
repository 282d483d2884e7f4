//! MessageStore port - message body の保存先
//!
//! tube は順序・状態・lease などのメタデータだけを持ち、payload は
//! このポートの向こうに置きます。engine は store を呼ぶ間 tube の
//! ロックを保持しません。

use crate::domain::{MessageId, Payload};

/// Low-level storage errors. Store operations only fail with
/// infrastructure errors, never domain errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("message body missing for {0}")]
    MissingBody(MessageId),

    #[error("storage error: {0}")]
    Backend(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Storage for message bodies. Implementations must be thread-safe.
///
/// Keys are engine-wide unique message ids, so one store can serve every
/// tube of a broker.
pub trait MessageStore: Send + Sync {
    /// Store the body of a new message.
    fn put(&self, id: MessageId, payload: &Payload) -> StorageResult<()>;

    /// Read a body. `Ok(None)` when nothing is stored under `id`.
    fn get(&self, id: MessageId) -> StorageResult<Option<Payload>>;

    /// Delete a body. Deleting a missing body is not an error.
    fn remove(&self, id: MessageId) -> StorageResult<()>;

    /// Cheap reachability check for health checks. `count` cannot tell an
    /// empty tube from an unreachable store; this can.
    fn ping(&self) -> StorageResult<()> {
        Ok(())
    }
}
