//! Broker client: durable task queue between the API and worker processes.
//!
//! Delivery semantics are at-least-once with late acknowledgment: a message
//! stays pending until the handler acks it, so a worker crash mid-processing
//! causes redelivery rather than silent loss. Each worker slot receives at
//! most one in-flight message at a time.

mod in_memory;

#[cfg(feature = "redis")]
mod redis;

pub use in_memory::InMemoryBroker;

#[cfg(feature = "redis")]
pub use redis::RedisBroker;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use bloodwork_core::{JobId, TaskId, TaskState};

/// Payload enqueued per job: ciphertext token plus query, keyed back to the
/// durable record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub job_id: JobId,
    /// Codec token of the uploaded document. Plaintext never crosses the
    /// broker.
    pub token: String,
    pub query: String,
}

/// One received message awaiting acknowledgment.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Broker-native message id, used for ack/requeue.
    pub message_id: String,
    pub task_id: TaskId,
    pub task: TaskPayload,
    /// 1-based attempt counter; incremented by explicit requeues, not by
    /// crash redeliveries.
    pub attempt: u32,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("broker command error: {0}")]
    Command(String),

    #[error("broker serialization error: {0}")]
    Serialization(String),

    #[error("broker deserialization error: {0}")]
    Deserialization(String),
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Append a task to the queue and start tracking its state as pending.
    /// Returns once the broker has confirmed the write.
    async fn enqueue(&self, task: TaskPayload) -> Result<TaskId, BrokerError>;

    /// Receive the next ready message for this consumer, or `None` when the
    /// queue is empty. At most one in-flight message per consumer slot.
    async fn receive(&self, consumer: &str) -> Result<Option<Delivery>, BrokerError>;

    /// Acknowledge a delivery, removing it from the queue. Deferred until
    /// handler completion (late ack).
    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Requeue a delivery for a later attempt after `delay`.
    async fn retry_later(&self, delivery: &Delivery, delay: Duration) -> Result<(), BrokerError>;

    /// Record the broker-tracked execution state of a task.
    async fn set_state(&self, task_id: TaskId, state: TaskState) -> Result<(), BrokerError>;

    /// Look up the broker-tracked state, if still retained.
    async fn task_state(&self, task_id: TaskId) -> Result<Option<TaskState>, BrokerError>;
}
