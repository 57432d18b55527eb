//! Durable update queue adapters.
//!
//! [`SqsUpdateQueue`] publishes each job as one SQS message whose body is the
//! JSON-encoded [`UpdateJob`]. On FIFO queues the job id is the deduplication
//! id and the multiple reference is the message group, so jobs of one multiple
//! are delivered in order and a re-submitted job is dropped by the broker.
//!
//! [`InMemoryUpdateQueue`] records jobs for tests and in-memory mode.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use aws_sdk_sqs::Client;
use aws_sdk_sqs::error::{DisplayErrorContext, SdkError};
use futures::FutureExt;
use futures::future::{self, BoxFuture};
use parking_lot::Mutex;

use crate::application::{DurableUpdateQueue, QueueAck, QueueError};
use crate::domain::UpdateJob;

// =============================================================================
// SQS
// =============================================================================

/// [`DurableUpdateQueue`] backed by Amazon SQS.
#[derive(Debug, Clone)]
pub struct SqsUpdateQueue {
    client: Client,
    queue_url: Arc<str>,
}

impl SqsUpdateQueue {
    /// Wraps an existing client.
    #[must_use]
    pub fn new(client: Client, queue_url: impl Into<Arc<str>>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
        }
    }

    /// Builds a client from the ambient AWS configuration, optionally
    /// overriding the endpoint (e.g. `LocalStack`).
    pub async fn connect(endpoint: Option<&str>, queue_url: impl Into<Arc<str>>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let config = loader.load().await;
        Self::new(Client::new(&config), queue_url)
    }

    /// Returns `true` for FIFO queues.
    #[must_use]
    pub fn is_fifo(&self) -> bool {
        self.queue_url.ends_with(".fifo")
    }
}

impl DurableUpdateQueue for SqsUpdateQueue {
    fn enqueue(&self, job: UpdateJob) -> BoxFuture<'static, Result<QueueAck, QueueError>> {
        let client = self.client.clone();
        let queue_url = Arc::clone(&self.queue_url);
        let fifo = self.is_fifo();

        async move {
            let body = serde_json::to_string(&job)
                .map_err(|error| QueueError::Serialization(error.to_string()))?;

            let mut request = client
                .send_message()
                .queue_url(queue_url.as_ref())
                .message_body(body);
            if fifo {
                request = request
                    .message_group_id(job.multiple_reference.as_str())
                    .message_deduplication_id(job.job_id.to_string());
            }

            let output = request.send().await.map_err(|error| match &error {
                SdkError::ServiceError(_) => {
                    QueueError::Rejected(DisplayErrorContext(&error).to_string())
                }
                _ => QueueError::Transport(DisplayErrorContext(&error).to_string()),
            })?;

            let message_id = output.message_id().unwrap_or_default().to_string();
            tracing::debug!(
                job_id = %job.job_id,
                multiple_reference = %job.multiple_reference,
                cases = job.case_references.len(),
                message_id = %message_id,
                "update job enqueued"
            );
            Ok(QueueAck {
                job_id: job.job_id,
                message_id,
            })
        }
        .boxed()
    }
}

// =============================================================================
// In-Memory
// =============================================================================

/// [`DurableUpdateQueue`] that keeps every acknowledged job in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryUpdateQueue {
    jobs: Arc<Mutex<Vec<UpdateJob>>>,
    failures: Arc<Mutex<Vec<QueueError>>>,
    sequence: Arc<AtomicU64>,
}

impl InMemoryUpdateQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects the next enqueue with `error`. Calls stack.
    pub fn fail_next(&self, error: QueueError) {
        self.failures.lock().push(error);
    }

    /// Acknowledged jobs in arrival order.
    #[must_use]
    pub fn jobs(&self) -> Vec<UpdateJob> {
        self.jobs.lock().clone()
    }

    /// Removes and returns the acknowledged jobs, as a consumer would.
    pub fn drain(&self) -> Vec<UpdateJob> {
        std::mem::take(&mut *self.jobs.lock())
    }
}

impl DurableUpdateQueue for InMemoryUpdateQueue {
    fn enqueue(&self, job: UpdateJob) -> BoxFuture<'static, Result<QueueAck, QueueError>> {
        let result = {
            let mut failures = self.failures.lock();
            if failures.is_empty() {
                let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
                let ack = QueueAck {
                    job_id: job.job_id,
                    message_id: format!("in-memory-{sequence}"),
                };
                self.jobs.lock().push(job);
                Ok(ack)
            } else {
                Err(failures.remove(0))
            }
        };
        future::ready(result).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CaseReference, ChangeSet, MultipleReference};
    use rstest::rstest;

    fn job(case: &str) -> UpdateJob {
        UpdateJob::new(
            MultipleReference::new("6000001").unwrap(),
            Some(1),
            vec![CaseReference::new(case).unwrap()],
            ChangeSet::detach(MultipleReference::new("6000001").unwrap()),
        )
    }

    // =========================================================================
    // In-Memory
    // =========================================================================

    #[rstest]
    #[tokio::test]
    async fn enqueue_acknowledges_with_job_id() {
        let queue = InMemoryUpdateQueue::new();
        let job = job("A");

        let ack = queue.enqueue(job.clone()).await.unwrap();

        assert_eq!(ack.job_id, job.job_id);
        assert_eq!(ack.message_id, "in-memory-1");
        assert_eq!(queue.jobs(), vec![job]);
    }

    #[rstest]
    #[tokio::test]
    async fn scripted_rejection_is_consumed_once() {
        let queue = InMemoryUpdateQueue::new();
        queue.fail_next(QueueError::Rejected("throttled".to_string()));

        let first = queue.enqueue(job("A")).await;
        let second = queue.enqueue(job("A")).await;

        assert_eq!(first, Err(QueueError::Rejected("throttled".to_string())));
        assert!(second.is_ok());
        assert_eq!(queue.jobs().len(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn drain_empties_the_queue() {
        let queue = InMemoryUpdateQueue::new();
        queue.enqueue(job("A")).await.unwrap();
        queue.enqueue(job("B")).await.unwrap();

        assert_eq!(queue.drain().len(), 2);
        assert!(queue.jobs().is_empty());
    }

    // =========================================================================
    // SQS
    // =========================================================================

    fn sqs(queue_url: &str) -> SqsUpdateQueue {
        let config = aws_sdk_sqs::Config::builder()
            .behavior_version(aws_sdk_sqs::config::BehaviorVersion::latest())
            .region(aws_sdk_sqs::config::Region::new("eu-west-2"))
            .build();
        SqsUpdateQueue::new(Client::from_conf(config), queue_url)
    }

    #[rstest]
    #[case("http://localhost:4566/000000000000/updates.fifo", true)]
    #[case("http://localhost:4566/000000000000/updates", false)]
    fn fifo_detection(#[case] queue_url: &str, #[case] expected: bool) {
        assert_eq!(sqs(queue_url).is_fifo(), expected);
    }
}
