//! Message: what callers submit, reserve and inspect.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::{MessageId, TubeName};

/// Opaque message body. The engine stores and returns these bytes verbatim.
#[derive(Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Payload(Vec<u8>);

impl Payload {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "Payload({s:?})"),
            Err(_) => write!(f, "Payload({} bytes)", self.0.len()),
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl From<&[u8]> for Payload {
    fn from(value: &[u8]) -> Self {
        Self(value.to_vec())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self(value.into_bytes())
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

/// Lifecycle state of a message.
///
/// State transitions:
/// - Delayed -> Ready (due time reached)
/// - Ready -> Reserved (reserve)
/// - Reserved -> Ready (release, or lease expired)
/// - Reserved -> Delayed (release with delay)
/// - Reserved -> Buried (bury, or lease expired past max_reserves)
/// - Reserved | Buried -> Done (finish; the message is removed)
/// - Buried -> Ready (kick)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    Delayed,
    Ready,
    Reserved,
    Buried,
    Done,
}

impl MessageState {
    /// Eligible for reserve right now.
    pub fn is_ready(self) -> bool {
        matches!(self, MessageState::Ready)
    }
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageState::Delayed => "delayed",
            MessageState::Ready => "ready",
            MessageState::Reserved => "reserved",
            MessageState::Buried => "buried",
            MessageState::Done => "done",
        };
        f.write_str(s)
    }
}

/// A snapshot of one message, as handed out by reserve/peek/get.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: MessageId,
    pub tube: TubeName,
    pub payload: Payload,
    pub priority: u32,
    pub state: MessageState,

    /// Promotion time while Delayed, lease deadline while Reserved.
    #[serde(skip)]
    pub due_at: Option<Instant>,

    /// Successful reservations so far (the first delivery counts as 1).
    pub reserve_count: u32,

    pub ttr: Duration,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// How many times this message went back to the queue before the
    /// current delivery (`reserve_count - 1`, never negative).
    pub fn releases(&self) -> u32 {
        self.reserve_count.saturating_sub(1)
    }

    /// Redelivered at least once.
    pub fn is_redelivery(&self) -> bool {
        self.reserve_count > 1
    }
}
