//! In-memory broker for dev/tests.
//!
//! Single-process only: the worker loop must run in the same process as the
//! submitter. Mirrors the semantics of the Redis implementation (ready
//! ordering, delayed requeue, in-flight tracking, task states).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use uuid::Uuid;

use bloodwork_core::{TaskId, TaskState};

use super::{Broker, BrokerError, Delivery, TaskPayload};

#[derive(Debug, Clone)]
struct QueuedMessage {
    message_id: String,
    task_id: TaskId,
    task: TaskPayload,
    attempt: u32,
    not_before: Option<Instant>,
}

impl QueuedMessage {
    fn is_ready(&self, now: Instant) -> bool {
        self.not_before.map_or(true, |at| now >= at)
    }
}

#[derive(Debug)]
struct InFlight {
    consumer: String,
    message: QueuedMessage,
}

#[derive(Debug, Default)]
struct Inner {
    queue: VecDeque<QueuedMessage>,
    in_flight: HashMap<String, InFlight>,
    states: HashMap<TaskId, TaskState>,
}

#[derive(Debug, Default)]
pub struct InMemoryBroker {
    inner: Mutex<Inner>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages waiting or in flight (test visibility).
    pub fn depth(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.queue.len() + inner.in_flight.len()
    }

    /// Push all in-flight messages back onto the queue, simulating the
    /// redelivery that follows a worker crash before acknowledgment.
    pub fn redeliver_in_flight(&self) {
        let mut inner = self.inner.lock().unwrap();
        let messages: Vec<_> = inner.in_flight.drain().map(|(_, f)| f.message).collect();
        for message in messages {
            inner.queue.push_back(message);
        }
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn enqueue(&self, task: TaskPayload) -> Result<TaskId, BrokerError> {
        let task_id = TaskId::new();
        let mut inner = self.inner.lock().unwrap();
        inner.queue.push_back(QueuedMessage {
            message_id: Uuid::now_v7().to_string(),
            task_id,
            task,
            attempt: 1,
            not_before: None,
        });
        inner.states.insert(task_id, TaskState::Pending);
        Ok(task_id)
    }

    async fn receive(&self, consumer: &str) -> Result<Option<Delivery>, BrokerError> {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();

        // One in-flight message per consumer, as with COUNT 1 prefetch: a
        // consumer that has not settled its previous delivery gets nothing.
        if inner.in_flight.values().any(|f| f.consumer == consumer) {
            return Ok(None);
        }

        let position = inner.queue.iter().position(|m| m.is_ready(now));
        let Some(position) = position else {
            return Ok(None);
        };

        let message = inner.queue.remove(position).expect("position just found");
        let delivery = Delivery {
            message_id: message.message_id.clone(),
            task_id: message.task_id,
            task: message.task.clone(),
            attempt: message.attempt,
        };
        inner.in_flight.insert(
            message.message_id.clone(),
            InFlight {
                consumer: consumer.to_string(),
                message,
            },
        );
        Ok(Some(delivery))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.inner
            .lock()
            .unwrap()
            .in_flight
            .remove(&delivery.message_id);
        Ok(())
    }

    async fn retry_later(&self, delivery: &Delivery, delay: Duration) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock().unwrap();
        let mut message = inner
            .in_flight
            .remove(&delivery.message_id)
            .map(|f| f.message)
            .ok_or_else(|| {
                BrokerError::Command(format!("message not in flight: {}", delivery.message_id))
            })?;
        message.attempt += 1;
        message.not_before = Some(Instant::now() + delay);
        inner.queue.push_back(message);
        Ok(())
    }

    async fn set_state(&self, task_id: TaskId, state: TaskState) -> Result<(), BrokerError> {
        self.inner.lock().unwrap().states.insert(task_id, state);
        Ok(())
    }

    async fn task_state(&self, task_id: TaskId) -> Result<Option<TaskState>, BrokerError> {
        Ok(self.inner.lock().unwrap().states.get(&task_id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bloodwork_core::JobId;

    fn payload() -> TaskPayload {
        TaskPayload {
            job_id: JobId::new(),
            token: "ciphertext".to_string(),
            query: "Summarize".to_string(),
        }
    }

    #[tokio::test]
    async fn enqueue_receive_ack() {
        let broker = InMemoryBroker::new();
        let task_id = broker.enqueue(payload()).await.unwrap();

        let delivery = broker.receive("worker-1").await.unwrap().unwrap();
        assert_eq!(delivery.task_id, task_id);
        assert_eq!(delivery.attempt, 1);

        // Unacked messages are not visible to other consumers.
        assert!(broker.receive("worker-2").await.unwrap().is_none());

        broker.ack(&delivery).await.unwrap();
        assert_eq!(broker.depth(), 0);
    }

    #[tokio::test]
    async fn consumer_holds_at_most_one_unacked_delivery() {
        let broker = InMemoryBroker::new();
        broker.enqueue(payload()).await.unwrap();
        broker.enqueue(payload()).await.unwrap();

        let first = broker.receive("worker-1").await.unwrap().unwrap();
        // The same consumer is blocked until it settles the first message;
        // another consumer can still take the second one.
        assert!(broker.receive("worker-1").await.unwrap().is_none());
        let second = broker.receive("worker-2").await.unwrap().unwrap();
        assert_ne!(first.message_id, second.message_id);

        broker.ack(&first).await.unwrap();
        broker.enqueue(payload()).await.unwrap();
        assert!(broker.receive("worker-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn retry_later_increments_attempt_and_delays() {
        let broker = InMemoryBroker::new();
        broker.enqueue(payload()).await.unwrap();

        let first = broker.receive("w").await.unwrap().unwrap();
        broker
            .retry_later(&first, Duration::from_millis(20))
            .await
            .unwrap();

        // Not ready before the backoff elapses.
        assert!(broker.receive("w").await.unwrap().is_none());
        tokio::time::sleep(Duration::from_millis(30)).await;

        let second = broker.receive("w").await.unwrap().unwrap();
        assert_eq!(second.attempt, 2);
        assert_eq!(second.message_id, first.message_id);
    }

    #[tokio::test]
    async fn crash_redelivery_keeps_attempt() {
        let broker = InMemoryBroker::new();
        broker.enqueue(payload()).await.unwrap();

        let first = broker.receive("w").await.unwrap().unwrap();
        broker.redeliver_in_flight();

        let redelivered = broker.receive("w").await.unwrap().unwrap();
        assert_eq!(redelivered.attempt, first.attempt);
    }

    #[tokio::test]
    async fn task_state_tracking() {
        let broker = InMemoryBroker::new();
        let task_id = broker.enqueue(payload()).await.unwrap();
        assert_eq!(
            broker.task_state(task_id).await.unwrap(),
            Some(TaskState::Pending)
        );

        broker.set_state(task_id, TaskState::Running).await.unwrap();
        assert_eq!(
            broker.task_state(task_id).await.unwrap(),
            Some(TaskState::Running)
        );

        assert_eq!(broker.task_state(TaskId::new()).await.unwrap(), None);
    }
}
