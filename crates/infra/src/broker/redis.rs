//! Redis Streams broker (durable, at-least-once delivery).
//!
//! - Stream key `bloodwork:analysis`; one consumer group `analysis.workers`
//!   shared by all worker processes.
//! - `XREADGROUP COUNT 1` bounds prefetch to one in-flight message per
//!   worker slot.
//! - Messages stay pending until `XACK` (late acknowledgment); entries idle
//!   longer than the pending timeout are reclaimed with `XAUTOCLAIM`, which
//!   covers worker crashes mid-processing.
//! - Delayed retries are a copy of the message with an incremented attempt
//!   counter and a `not_before` timestamp; the original is acked.
//! - Task states live in per-task string keys with a TTL equal to the result
//!   retention window.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use redis::Value;
use redis::aio::MultiplexedConnection;
use tracing::debug;
use uuid::Uuid;

use bloodwork_core::{JobId, TaskId, TaskState};

use super::{Broker, BrokerError, Delivery, TaskPayload};

const STREAM_KEY: &str = "bloodwork:analysis";
const GROUP_NAME: &str = "analysis.workers";
const STATE_KEY_PREFIX: &str = "bloodwork:task:";

/// Pending entries idle longer than this are reclaimed (worker crash).
const PENDING_TIMEOUT: Duration = Duration::from_secs(7200);

#[derive(Clone)]
pub struct RedisBroker {
    conn: MultiplexedConnection,
    /// TTL on task-state keys.
    state_retention: Duration,
}

impl RedisBroker {
    /// Connect and ensure the consumer group exists (idempotent).
    pub async fn connect(
        redis_url: &str,
        state_retention: Duration,
    ) -> Result<Self, BrokerError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        // XGROUP CREATE with MKSTREAM creates the stream on first use; the
        // BUSYGROUP error on subsequent calls is expected and ignored.
        let _: Result<String, _> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(STREAM_KEY)
            .arg(GROUP_NAME)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        Ok(Self {
            conn,
            state_retention,
        })
    }

    fn state_key(task_id: TaskId) -> String {
        format!("{STATE_KEY_PREFIX}{task_id}")
    }

    fn now_millis() -> u128 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis()
    }

    async fn xadd(
        &self,
        task_id: TaskId,
        task: &TaskPayload,
        attempt: u32,
        not_before_millis: u128,
    ) -> Result<String, BrokerError> {
        let mut conn = self.conn.clone();
        redis::cmd("XADD")
            .arg(STREAM_KEY)
            .arg("*")
            .arg("task_id")
            .arg(task_id.to_string())
            .arg("job_id")
            .arg(task.job_id.to_string())
            .arg("token")
            .arg(&task.token)
            .arg("query")
            .arg(&task.query)
            .arg("attempt")
            .arg(attempt.to_string())
            .arg("not_before")
            .arg(not_before_millis.to_string())
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::Command(format!("XADD failed: {e}")))
    }

    async fn xack(&self, message_id: &str) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let _: u64 = redis::cmd("XACK")
            .arg(STREAM_KEY)
            .arg(GROUP_NAME)
            .arg(message_id)
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::Command(format!("XACK failed: {e}")))?;
        Ok(())
    }

    /// Reclaim one entry that has sat unacknowledged past the pending
    /// timeout (crashed worker), if any.
    async fn claim_stale(&self, consumer: &str) -> Result<Option<Delivery>, BrokerError> {
        let mut conn = self.conn.clone();
        let reply: Value = redis::cmd("XAUTOCLAIM")
            .arg(STREAM_KEY)
            .arg(GROUP_NAME)
            .arg(consumer)
            .arg(PENDING_TIMEOUT.as_millis().to_string())
            .arg("0-0")
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::Command(format!("XAUTOCLAIM failed: {e}")))?;

        // Reply: [next-cursor, entries, ...]
        let Value::Bulk(parts) = reply else {
            return Ok(None);
        };
        let Some(Value::Bulk(entries)) = parts.get(1) else {
            return Ok(None);
        };
        for entry in entries {
            if let Some((delivery, _)) = parse_entry(entry)? {
                debug!(message_id = %delivery.message_id, "reclaimed stale delivery");
                return Ok(Some(delivery));
            }
        }
        Ok(None)
    }

    async fn read_new(&self, consumer: &str) -> Result<Option<Delivery>, BrokerError> {
        let mut conn = self.conn.clone();
        let reply: Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(GROUP_NAME)
            .arg(consumer)
            .arg("COUNT")
            .arg(1)
            .arg("STREAMS")
            .arg(STREAM_KEY)
            .arg(">")
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::Command(format!("XREADGROUP failed: {e}")))?;

        // Reply: [[stream_key, [entry, ...]], ...]; Nil when empty.
        let Value::Bulk(streams) = reply else {
            return Ok(None);
        };
        for stream in &streams {
            let Value::Bulk(pair) = stream else { continue };
            let Some(Value::Bulk(entries)) = pair.get(1) else {
                continue;
            };
            for entry in entries {
                let Some((delivery, not_before)) = parse_entry(entry)? else {
                    continue;
                };
                if not_before > Self::now_millis() {
                    // Delayed retry that is not due yet: put a copy back and
                    // ack the one we just consumed.
                    self.xadd(delivery.task_id, &delivery.task, delivery.attempt, not_before)
                        .await?;
                    self.xack(&delivery.message_id).await?;
                    continue;
                }
                return Ok(Some(delivery));
            }
        }
        Ok(None)
    }
}

fn data_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Data(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        _ => None,
    }
}

/// Entry format: `[message_id, [field, value, field, value, ...]]`.
///
/// Returns the delivery plus its `not_before` timestamp (unix millis, 0 for
/// immediately-ready messages).
fn parse_entry(entry: &Value) -> Result<Option<(Delivery, u128)>, BrokerError> {
    let Value::Bulk(parts) = entry else {
        return Ok(None);
    };
    let (Some(id_value), Some(Value::Bulk(field_values))) = (parts.first(), parts.get(1)) else {
        return Ok(None);
    };
    let message_id = data_to_string(id_value)
        .ok_or_else(|| BrokerError::Deserialization("missing message id".to_string()))?;

    let mut fields = HashMap::new();
    for chunk in field_values.chunks(2) {
        if let [key, value] = chunk {
            if let (Some(key), Some(value)) = (data_to_string(key), data_to_string(value)) {
                fields.insert(key, value);
            }
        }
    }

    let field = |name: &str| -> Result<String, BrokerError> {
        fields
            .get(name)
            .cloned()
            .ok_or_else(|| BrokerError::Deserialization(format!("missing field: {name}")))
    };

    let task_id = field("task_id")?
        .parse::<Uuid>()
        .map(TaskId::from_uuid)
        .map_err(|e| BrokerError::Deserialization(format!("bad task_id: {e}")))?;
    let job_id = field("job_id")?
        .parse::<Uuid>()
        .map(JobId::from_uuid)
        .map_err(|e| BrokerError::Deserialization(format!("bad job_id: {e}")))?;
    let attempt: u32 = field("attempt")?
        .parse()
        .map_err(|e| BrokerError::Deserialization(format!("bad attempt: {e}")))?;
    let not_before: u128 = fields
        .get("not_before")
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);

    Ok(Some((
        Delivery {
            message_id,
            task_id,
            task: TaskPayload {
                job_id,
                token: field("token")?,
                query: field("query")?,
            },
            attempt,
        },
        not_before,
    )))
}

#[async_trait]
impl Broker for RedisBroker {
    async fn enqueue(&self, task: TaskPayload) -> Result<TaskId, BrokerError> {
        let task_id = TaskId::new();
        self.xadd(task_id, &task, 1, 0).await?;
        self.set_state(task_id, TaskState::Pending).await?;
        Ok(task_id)
    }

    async fn receive(&self, consumer: &str) -> Result<Option<Delivery>, BrokerError> {
        let delivery = match self.claim_stale(consumer).await? {
            Some(d) => Some(d),
            None => self.read_new(consumer).await?,
        };
        Ok(delivery)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.xack(&delivery.message_id).await
    }

    async fn retry_later(&self, delivery: &Delivery, delay: Duration) -> Result<(), BrokerError> {
        let not_before = Self::now_millis() + delay.as_millis();
        self.xadd(
            delivery.task_id,
            &delivery.task,
            delivery.attempt + 1,
            not_before,
        )
        .await?;
        self.xack(&delivery.message_id).await
    }

    async fn set_state(&self, task_id: TaskId, state: TaskState) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("SET")
            .arg(Self::state_key(task_id))
            .arg(state.as_str())
            .arg("EX")
            .arg(self.state_retention.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::Command(format!("SET failed: {e}")))?;
        Ok(())
    }

    async fn task_state(&self, task_id: TaskId) -> Result<Option<TaskState>, BrokerError> {
        let mut conn = self.conn.clone();
        let state: Option<String> = redis::cmd("GET")
            .arg(Self::state_key(task_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::Command(format!("GET failed: {e}")))?;

        Ok(state.and_then(|s| match s.as_str() {
            "pending" => Some(TaskState::Pending),
            "running" => Some(TaskState::Running),
            "succeeded" => Some(TaskState::Succeeded),
            "failed" => Some(TaskState::Failed),
            _ => None,
        }))
    }
}
