//! InMemoryStore - プロセス内の message body ストア
//!
//! HashMap<MessageId, Payload> を Mutex で守るだけの実装です。
//! クラッシュすれば内容は失われます。

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::domain::{MessageId, Payload};
use crate::ports::{MessageStore, StorageError, StorageResult};

#[derive(Default)]
pub struct InMemoryStore {
    bodies: Mutex<HashMap<MessageId, Payload>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored bodies.
    pub fn len(&self) -> usize {
        self.bodies().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn bodies(&self) -> StorageResult<MutexGuard<'_, HashMap<MessageId, Payload>>> {
        self.bodies
            .lock()
            .map_err(|_| StorageError::Backend("in-memory store lock poisoned".into()))
    }
}

impl MessageStore for InMemoryStore {
    fn put(&self, id: MessageId, payload: &Payload) -> StorageResult<()> {
        self.bodies()?.insert(id, payload.clone());
        Ok(())
    }

    fn get(&self, id: MessageId) -> StorageResult<Option<Payload>> {
        Ok(self.bodies()?.get(&id).cloned())
    }

    fn remove(&self, id: MessageId) -> StorageResult<()> {
        self.bodies()?.remove(&id);
        Ok(())
    }

    fn ping(&self) -> StorageResult<()> {
        self.bodies().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn put_get_remove() {
        let store = InMemoryStore::new();
        let id = MessageId::from_ulid(Ulid::new());

        store.put(id, &Payload::from("hello")).unwrap();
        assert_eq!(store.get(id).unwrap(), Some(Payload::from("hello")));
        assert_eq!(store.len(), 1);

        store.remove(id).unwrap();
        assert_eq!(store.get(id).unwrap(), None);
        assert!(store.is_empty());
    }

    #[test]
    fn removing_missing_body_is_ok() {
        let store = InMemoryStore::new();
        store.remove(MessageId::from_ulid(Ulid::new())).unwrap();
    }

    #[test]
    fn ping_succeeds() {
        InMemoryStore::new().ping().unwrap();
    }
}
