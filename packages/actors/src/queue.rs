//! Dispatch queue: a FIFO of job hints.
//!
//! The queue only carries `{job_id, job_type, payload}`; the job store stays
//! authoritative, so losing queue entries is recovered by re-enqueueing from
//! the store. [`InMemoryQueue`] serves one process;
//! [`RedisQueue`](crate::RedisQueue) is shared by every process pointed at
//! the same list.

use std::collections::VecDeque;
use std::time::Duration;

use dispatch_core::QueueItem;
use futures_util::future::BoxFuture;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

/// Queue backend errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    /// An entry that does not decode as a job hint. It has been removed.
    #[error("Malformed queue entry: {0}")]
    Malformed(String),
}

/// A FIFO shared by every producer and worker.
pub trait JobQueue: Send + Sync + 'static {
    /// Append to the tail.
    fn enqueue(&self, item: QueueItem) -> BoxFuture<'_, Result<(), QueueError>>;

    /// Pop the head, waiting up to `timeout` for one to arrive.
    fn dequeue(&self, timeout: Duration) -> BoxFuture<'_, Result<Option<QueueItem>, QueueError>>;

    /// Number of waiting items.
    fn len(&self) -> BoxFuture<'_, Result<usize, QueueError>>;
}

/// In-process queue. Not durable.
#[derive(Default)]
pub struct InMemoryQueue {
    items: Mutex<VecDeque<QueueItem>>,
    notify: Notify,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobQueue for InMemoryQueue {
    fn enqueue(&self, item: QueueItem) -> BoxFuture<'_, Result<(), QueueError>> {
        Box::pin(async move {
            self.items.lock().await.push_back(item);
            self.notify.notify_one();
            Ok(())
        })
    }

    fn dequeue(&self, timeout: Duration) -> BoxFuture<'_, Result<Option<QueueItem>, QueueError>> {
        Box::pin(async move {
            let deadline = Instant::now() + timeout;
            loop {
                // register interest before checking so a concurrent
                // enqueue cannot slip between the check and the wait
                let notified = self.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if let Some(item) = self.items.lock().await.pop_front() {
                    return Ok(Some(item));
                }

                if tokio::time::timeout_at(deadline, notified).await.is_err() {
                    return Ok(None);
                }
            }
        })
    }

    fn len(&self) -> BoxFuture<'_, Result<usize, QueueError>> {
        Box::pin(async move { Ok(self.items.lock().await.len()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_core::JobId;
    use std::sync::Arc;

    fn item(job_type: &str) -> QueueItem {
        QueueItem {
            job_id: JobId::new(),
            job_type: job_type.to_string(),
            payload: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn preserves_fifo_order() {
        let queue = InMemoryQueue::new();
        let (a, b, c) = (item("a"), item("b"), item("c"));
        queue.enqueue(a.clone()).await.unwrap();
        queue.enqueue(b.clone()).await.unwrap();
        queue.enqueue(c.clone()).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 3);

        let timeout = Duration::from_millis(10);
        assert_eq!(queue.dequeue(timeout).await.unwrap(), Some(a));
        assert_eq!(queue.dequeue(timeout).await.unwrap(), Some(b));
        assert_eq!(queue.dequeue(timeout).await.unwrap(), Some(c));
        assert_eq!(queue.dequeue(timeout).await.unwrap(), None);
    }

    #[tokio::test]
    async fn empty_dequeue_times_out() {
        let queue = InMemoryQueue::new();
        let started = std::time::Instant::now();
        let got = queue.dequeue(Duration::from_millis(50)).await.unwrap();
        assert!(got.is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn blocked_consumer_wakes_on_enqueue() {
        let queue = Arc::new(InMemoryQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        let sent = item("wake");
        queue.enqueue(sent.clone()).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer should wake")
            .expect("task should not panic")
            .unwrap();
        assert_eq!(got, Some(sent));
    }
}
