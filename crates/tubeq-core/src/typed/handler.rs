//! Handler trait - 型付き Job を処理する Handler の定義
//!
//! # 学習ポイント
//! - ジェネリック trait (Handler<J>)
//! - Object-safe trait (JobHandler) への型消去 (TypedHandler<J, H> → JobHandler)

use std::marker::PhantomData;

use async_trait::async_trait;
use tracing::warn;

use super::codec::PayloadCodec;
use super::job::Job;
use crate::app::{Disposition, HandlerError, JobHandler};
use crate::domain::Message;

/// Handler は decode 済みの Job を処理する
///
/// # 使用例
/// ```ignore
/// struct Mailer;
///
/// #[async_trait]
/// impl Handler<SendEmail> for Mailer {
///     async fn handle(&self, job: SendEmail, _message: &Message) -> Result<Disposition, HandlerError> {
///         send(&job.to).await.map_err(|e| HandlerError::new(e.to_string()))?;
///         Ok(Disposition::Finish)
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<J: Job>: Send + Sync {
    async fn handle(&self, job: J, message: &Message) -> Result<Disposition, HandlerError>;
}

/// `Handler<J>` を `WorkerPool` が扱える `JobHandler` に変換する
///
/// decode できない payload は何度配送しても decode できないので bury する。
pub struct TypedHandler<J: Job, H: Handler<J>> {
    handler: H,
    _marker: PhantomData<fn() -> J>,
}

impl<J: Job, H: Handler<J>> TypedHandler<J, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<J: Job, H: Handler<J>> JobHandler for TypedHandler<J, H> {
    async fn handle(&self, message: &Message) -> Result<Disposition, HandlerError> {
        let job: J = match PayloadCodec::decode(&message.payload) {
            Ok(job) => job,
            Err(e) => {
                warn!(id = %message.id, tube = %message.tube, error = %e, "undecodable payload, burying");
                return Ok(Disposition::Bury);
            }
        };
        self.handler.handle(job, message).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::app::WorkerPool;
    use crate::domain::{Payload, SubmitOptions};
    use crate::queue::JobQueue;
    use crate::typed::job::tests::{SendEmail, email_tube};
    use crate::typed::TypedQueue;

    struct Mailer;

    #[async_trait]
    impl Handler<SendEmail> for Mailer {
        async fn handle(&self, job: SendEmail, _message: &Message) -> Result<Disposition, HandlerError> {
            if job.to.ends_with("@invalid") {
                return Ok(Disposition::Bury);
            }
            Ok(Disposition::Finish)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn typed_handler_decodes_and_dispatches() {
        let tube = email_tube();
        let typed = TypedQueue::<SendEmail>::new(tube.clone());
        for to in ["a@example.com", "b@invalid"] {
            typed
                .submit(
                    &SendEmail {
                        to: to.into(),
                        attempts_allowed: 1,
                    },
                    SubmitOptions::new(),
                )
                .await
                .unwrap();
        }
        tube.submit(Payload::from("{broken"), SubmitOptions::new())
            .await
            .unwrap();

        let pool = WorkerPool::spawn(1, tube.clone(), Arc::new(TypedHandler::<SendEmail, _>::new(Mailer)));
        for _ in 0..100 {
            let stats = tube.stats().await;
            if stats.finished == 1 && stats.buried == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        pool.shutdown_and_join().await;

        let stats = tube.stats().await;
        assert_eq!(stats.finished, 1);
        assert_eq!(stats.buried, 2);
    }
}
