//! PayloadCodec - 型付きの値と Payload の相互変換
//!
//! エンジン自体は payload をバイト列のまま扱う。JSON への変換は
//! この層だけで行う。

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::Payload;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("json encode: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("json decode: {0}")]
    Decode(#[source] serde_json::Error),
}

/// JSON codec for payloads.
pub struct PayloadCodec;

impl PayloadCodec {
    pub fn encode<T: Serialize>(value: &T) -> Result<Payload, CodecError> {
        serde_json::to_vec(value)
            .map(Payload::from)
            .map_err(CodecError::Encode)
    }

    pub fn decode<T: DeserializeOwned>(payload: &Payload) -> Result<T, CodecError> {
        serde_json::from_slice(payload.as_bytes()).map_err(CodecError::Decode)
    }
}
