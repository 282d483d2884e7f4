//! Job trait - 型付き Job と tube の対応付け
//!
//! # 学習ポイント
//! - Associated Constants (`const TUBE`)
//! - Trait bounds の組み合わせ (Serialize + DeserializeOwned + Send + Sync + 'static)

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::codec::{CodecError, PayloadCodec};
use crate::domain::{MessageId, QueueError, SubmitOptions, TubeName, TubeNameError};
use crate::queue::{JobQueue, Reservation};

/// Job は payload の型と tube を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct SendEmail {
///     to: String,
/// }
///
/// impl Job for SendEmail {
///     const TUBE: &'static str = "emails";
/// }
/// ```
pub trait Job: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// 投入先の tube 名
    const TUBE: &'static str;

    fn tube() -> Result<TubeName, TubeNameError> {
        TubeName::new(Self::TUBE)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TypedError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// A `JobQueue` seen through one job type: payloads go in and come out as `J`.
pub struct TypedQueue<J: Job> {
    queue: Arc<dyn JobQueue>,
    _marker: PhantomData<fn() -> J>,
}

impl<J: Job> TypedQueue<J> {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self {
            queue,
            _marker: PhantomData,
        }
    }

    pub async fn submit(&self, job: &J, options: SubmitOptions) -> Result<MessageId, TypedError> {
        let payload = PayloadCodec::encode(job)?;
        Ok(self.queue.submit(payload, options).await?)
    }

    /// Reserve and decode. A payload that does not decode stays reserved;
    /// the caller decides whether to bury it.
    pub async fn reserve(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Option<(Reservation, Result<J, CodecError>)>, QueueError> {
        let Some(reservation) = self.queue.reserve(timeout).await? else {
            return Ok(None);
        };
        let job = PayloadCodec::decode(reservation.payload());
        Ok(Some((reservation, job)))
    }

    /// Reserve, finish and decode in one step.
    pub async fn take(&self, timeout: Option<Duration>) -> Result<Option<J>, TypedError> {
        match self.queue.take(timeout).await? {
            Some(message) => Ok(Some(PayloadCodec::decode(&message.payload)?)),
            None => Ok(None),
        }
    }
}

impl<J: Job> Clone for TypedQueue<J> {
    fn clone(&self) -> Self {
        Self::new(self.queue.clone())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::{Payload, TubeSettings};
    use crate::queue::TubeQueue;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub(crate) struct SendEmail {
        pub to: String,
        pub attempts_allowed: u8,
    }

    impl Job for SendEmail {
        const TUBE: &'static str = "emails";
    }

    pub(crate) fn email_tube() -> Arc<TubeQueue> {
        Arc::new(TubeQueue::new(SendEmail::tube().unwrap(), TubeSettings::default()))
    }

    fn email(to: &str) -> SendEmail {
        SendEmail {
            to: to.into(),
            attempts_allowed: 3,
        }
    }

    #[tokio::test]
    async fn submit_then_take_round_trips_the_job() {
        let queue = TypedQueue::<SendEmail>::new(email_tube());

        queue.submit(&email("a@example.com"), SubmitOptions::new()).await.unwrap();

        let job = queue.take(Some(Duration::ZERO)).await.unwrap();
        assert_eq!(job, Some(email("a@example.com")));
        assert!(queue.take(Some(Duration::ZERO)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn undecodable_payload_stays_reserved() {
        let tube = email_tube();
        tube.submit(Payload::from("not json"), SubmitOptions::new())
            .await
            .unwrap();
        let queue = TypedQueue::<SendEmail>::new(tube.clone());

        let (reservation, job) = queue.reserve(Some(Duration::ZERO)).await.unwrap().unwrap();

        assert!(matches!(job, Err(CodecError::Decode(_))));
        assert_eq!(tube.stats().await.reserved, 1);
        tube.bury(reservation.lease).await.unwrap();
    }

    #[test]
    fn job_tube_name_is_validated() {
        assert_eq!(SendEmail::tube().unwrap().as_str(), "emails");
    }
}
