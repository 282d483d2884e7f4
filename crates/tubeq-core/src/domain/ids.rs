//! Domain identifiers (strongly-typed IDs).
//!
//! ULID ベースの ID を Phantom type パターンで型付けしています。
//!
//! - `MessageId`: submit 時に engine が払い出す。再利用されない。
//! - `LeaseId`: reserve が成功するたびに払い出す。lease を終わらせる操作
//!   （finish / release / bury / touch）はこの ID で対象を指定する。
//!
//! 両者は同じ `Id<T>` 実装を共有しますが、コンパイル時に混同できません。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display / FromStr で使うプレフィックス（"msg-", "lease-"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
///
/// `T` は PhantomData で、実行時にはメモリを消費しません。
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Parse error for textual ids (`msg-01H...`, `lease-01H...`).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid id {input:?}: expected {expected}<ulid>")]
pub struct ParseIdError {
    input: String,
    expected: &'static str,
}

impl<T: IdMarker> FromStr for Id<T> {
    type Err = ParseIdError;

    /// Accepts the `Display` form. A bare ULID is accepted as well so ids
    /// coming back from a wire protocol do not need the prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw)
            .map(Self::from_ulid)
            .map_err(|_| ParseIdError {
                input: s.to_string(),
                expected: T::prefix(),
            })
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Message のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Message {}

impl IdMarker for Message {
    fn prefix() -> &'static str {
        "msg-"
    }
}

/// Lease のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Lease {}

impl IdMarker for Lease {
    fn prefix() -> &'static str {
        "lease-"
    }
}

/// Identifier of a message (submit unit, unique for the engine's lifetime).
pub type MessageId = Id<Message>;

/// Identifier of one reservation of a message.
pub type LeaseId = Id<Lease>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let ulid1 = Ulid::new();
        let ulid2 = Ulid::new();

        let message = MessageId::from_ulid(ulid1);
        let lease = LeaseId::from_ulid(ulid2);

        assert_eq!(message.as_ulid(), ulid1);
        assert_eq!(lease.as_ulid(), ulid2);

        assert!(message.to_string().starts_with("msg-"));
        assert!(lease.to_string().starts_with("lease-"));

        // let _: MessageId = lease; // <- does not compile
    }

    #[test]
    fn display_form_parses_back() {
        let id = MessageId::from_ulid(Ulid::new());
        let parsed: MessageId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn bare_ulid_parses() {
        let ulid = Ulid::new();
        let parsed: LeaseId = ulid.to_string().parse().unwrap();
        assert_eq!(parsed.as_ulid(), ulid);
    }

    #[test]
    fn wrong_prefix_is_rejected() {
        let lease = LeaseId::from_ulid(Ulid::new());
        let err = lease.to_string().parse::<MessageId>().unwrap_err();
        assert!(err.to_string().contains("msg-"));
    }

    #[test]
    fn ulid_ids_can_be_serialized() {
        let id = MessageId::from_ulid(Ulid::new());

        let serialized = serde_json::to_string(&id).unwrap();
        let deserialized: MessageId = serde_json::from_str(&serialized).unwrap();

        assert_eq!(id, deserialized);
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;

        assert_eq!(size_of::<MessageId>(), size_of::<Ulid>());
        assert_eq!(size_of::<LeaseId>(), size_of::<Ulid>());
    }
}
