//! Worker-side job execution: receive loop, pipeline executor, retry policy.

mod executor;
mod retry;

pub use executor::{AnalysisExecutor, Outcome};
pub use retry::RetryPolicy;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::broker::Broker;

/// How long to sleep when the queue is empty or the broker errors.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Long-running receive loop for one worker slot.
///
/// One in-flight message at a time; each delivery is bounded by the hard
/// time limit. A timed-out attempt is simply dropped without acknowledgment,
/// so the broker redelivers it per the at-least-once contract.
pub async fn run_worker(
    executor: Arc<AnalysisExecutor>,
    broker: Arc<dyn Broker>,
    consumer: String,
    hard_time_limit: Duration,
) {
    info!(consumer = %consumer, "analysis worker started");

    loop {
        match broker.receive(&consumer).await {
            Ok(Some(delivery)) => {
                let job_id = delivery.task.job_id;
                let attempt = delivery.attempt;
                let work = executor.process(delivery);
                match tokio::time::timeout(hard_time_limit, work).await {
                    Ok(outcome) => {
                        info!(job_id = %job_id, attempt, outcome = ?outcome, "delivery handled");
                    }
                    Err(_) => {
                        warn!(
                            job_id = %job_id,
                            attempt,
                            limit_secs = hard_time_limit.as_secs(),
                            "hard time limit exceeded; message will be redelivered"
                        );
                    }
                }
            }
            Ok(None) => tokio::time::sleep(POLL_INTERVAL).await,
            Err(e) => {
                error!(error = %e, "failed to receive from broker");
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }
}
