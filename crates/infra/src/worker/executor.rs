//! The per-delivery pipeline: decrypt, extract, analyze, persist.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use bloodwork_analysis::Analyzer;
use bloodwork_core::{ErrorClass, PipelineError, TaskState};
use bloodwork_crypto::PayloadCodec;
use bloodwork_extract::TextExtractor;

use crate::broker::{Broker, Delivery};
use crate::memory::MemorySink;
use crate::records::{JobStore, JobStoreError};

use super::retry::RetryPolicy;

/// How a delivery was resolved. Returned for logging and tests; all durable
/// effects have already been applied.
#[derive(Debug)]
pub enum Outcome {
    /// Result persisted, record completed, message acked.
    Completed,
    /// Terminal failure persisted, message acked.
    Failed(String),
    /// Transient failure with attempts remaining; message requeued.
    Retrying { attempt: u32, delay: Duration },
    /// Redelivery of a job already terminal; acked without reprocessing.
    AlreadyTerminal,
}

/// Worker-side executor for one analysis job per call.
///
/// Every collaborator is injected: the codec, the extraction and analysis
/// capabilities, the record store, the broker, and the memory side channel.
/// The only durable side effect is the idempotent terminal-state write, which
/// is what makes at-least-once redelivery safe.
pub struct AnalysisExecutor {
    store: Arc<dyn JobStore>,
    broker: Arc<dyn Broker>,
    codec: PayloadCodec,
    extractor: Arc<dyn TextExtractor>,
    analyzer: Arc<dyn Analyzer>,
    memory: Arc<dyn MemorySink>,
    retry: RetryPolicy,
    soft_time_limit: Duration,
}

impl AnalysisExecutor {
    pub fn new(
        store: Arc<dyn JobStore>,
        broker: Arc<dyn Broker>,
        codec: PayloadCodec,
        extractor: Arc<dyn TextExtractor>,
        analyzer: Arc<dyn Analyzer>,
        memory: Arc<dyn MemorySink>,
    ) -> Self {
        Self {
            store,
            broker,
            codec,
            extractor,
            analyzer,
            memory,
            retry: RetryPolicy::default(),
            soft_time_limit: Duration::from_secs(600),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_soft_time_limit(mut self, limit: Duration) -> Self {
        self.soft_time_limit = limit;
        self
    }

    /// Handle one delivery to a terminal decision.
    pub async fn process(&self, delivery: Delivery) -> Outcome {
        let job_id = delivery.task.job_id;

        // Idempotent terminal check: a redelivered job that already reached a
        // terminal state is acked without reprocessing.
        match self.store.get(job_id).await {
            Ok(Some(job)) if job.status.is_terminal() => {
                debug!(job_id = %job_id, "record already terminal; acking redelivery");
                let mirrored = match job.status {
                    bloodwork_core::JobStatus::Completed => TaskState::Succeeded,
                    _ => TaskState::Failed,
                };
                self.set_state(&delivery, mirrored).await;
                self.ack(&delivery).await;
                return Outcome::AlreadyTerminal;
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                // The record write can trail the enqueue; give redelivery a
                // chance to observe it.
                return self
                    .resolve_failure(
                        &delivery,
                        ErrorClass::Transient,
                        format!("job record not found: {job_id}"),
                    )
                    .await;
            }
            Err(e) => {
                return self
                    .resolve_failure(&delivery, ErrorClass::Transient, e.to_string())
                    .await;
            }
        }

        self.set_state(&delivery, TaskState::Running).await;

        match self.run_pipeline(&delivery).await {
            Ok(document) => self.resolve_success(&delivery, document).await,
            Err(e) => {
                let reason = e.to_string();
                self.resolve_failure(&delivery, e.class(), reason).await
            }
        }
    }

    /// Steps 1-3 of the job state machine; no durable writes besides the
    /// best-effort memory side channel.
    async fn run_pipeline(&self, delivery: &Delivery) -> Result<JsonValue, PipelineError> {
        let task = &delivery.task;

        // 1. Decrypt. Failure is permanent: the ciphertext will never become
        // valid under this key.
        let bytes = self
            .codec
            .decrypt(&task.token)
            .map_err(|e| PipelineError::decryption(e.to_string()))?;

        // 2. Extract. Re-run on every attempt, even though submission already
        // validated the document once.
        let text = self
            .extractor
            .extract(&bytes)
            .map_err(|e| PipelineError::extraction(e.to_string()))?;
        if text.trim().is_empty() {
            return Err(PipelineError::extraction("no recoverable text"));
        }

        // Best-effort semantic index write; never aborts the job.
        let metadata = serde_json::json!({
            "source": "blood_report",
            "query": task.query,
            "job_id": task.job_id,
        });
        if let Err(e) = self.memory.add(&text, metadata) {
            warn!(job_id = %task.job_id, error = %e, "memory sink write failed");
        }

        // 3. Analyze. Potentially slow (seconds to minutes); run off the
        // async runtime and bounded by the soft time limit. A blocking
        // analyzer thread cannot be killed, so expiry abandons the attempt
        // as a transient failure and leaves the hard limit as the outer
        // kill switch.
        let analyzer = Arc::clone(&self.analyzer);
        let query = task.query.clone();
        let analysis_started = Instant::now();
        let analysis = tokio::task::spawn_blocking(move || analyzer.analyze(&text, &query));
        let report = match tokio::time::timeout(self.soft_time_limit, analysis).await {
            Ok(joined) => joined
                .map_err(|e| PipelineError::analysis(format!("analysis task aborted: {e}")))?
                .map_err(|e| PipelineError::analysis(e.to_string()))?,
            Err(_) => {
                warn!(
                    job_id = %task.job_id,
                    limit_secs = self.soft_time_limit.as_secs(),
                    "soft time limit exceeded; abandoning analysis attempt"
                );
                return Err(PipelineError::analysis(format!(
                    "analysis exceeded the soft time limit of {}s",
                    self.soft_time_limit.as_secs()
                )));
            }
        }
        .with_processing_time(analysis_started.elapsed());

        serde_json::to_value(report).map_err(|e| PipelineError::analysis(e.to_string()))
    }

    /// Step 4: persist the result. The single durability point; once the
    /// completed write lands the job is permanently terminal.
    async fn resolve_success(&self, delivery: &Delivery, document: JsonValue) -> Outcome {
        let job_id = delivery.task.job_id;
        match self.store.mark_completed(job_id, document).await {
            Ok(()) => {
                self.set_state(delivery, TaskState::Succeeded).await;
                self.ack(delivery).await;
                Outcome::Completed
            }
            Err(JobStoreError::TerminalState(_)) => {
                // A concurrent redelivery won the race; its result stands.
                self.ack(delivery).await;
                Outcome::AlreadyTerminal
            }
            Err(e) => {
                self.resolve_failure(delivery, ErrorClass::Transient, e.to_string())
                    .await
            }
        }
    }

    /// Step 5: the retry decision, branched on the error class.
    async fn resolve_failure(
        &self,
        delivery: &Delivery,
        class: ErrorClass,
        reason: String,
    ) -> Outcome {
        let job_id = delivery.task.job_id;

        if class == ErrorClass::Transient && self.retry.should_retry(delivery.attempt) {
            let delay = self.retry.delay();
            debug!(
                job_id = %job_id,
                attempt = delivery.attempt,
                delay_secs = delay.as_secs(),
                reason = %reason,
                "transient failure; scheduling retry"
            );
            self.set_state(delivery, TaskState::Pending).await;
            if let Err(e) = self.broker.retry_later(delivery, delay).await {
                // Leave the message unacked; pending-timeout redelivery takes
                // over.
                warn!(job_id = %job_id, error = %e, "requeue failed");
            }
            return Outcome::Retrying {
                attempt: delivery.attempt,
                delay,
            };
        }

        warn!(
            job_id = %job_id,
            attempt = delivery.attempt,
            reason = %reason,
            "job failed terminally"
        );
        match self.store.mark_failed(job_id, &reason).await {
            Ok(()) | Err(JobStoreError::TerminalState(_)) => {}
            Err(e) => warn!(job_id = %job_id, error = %e, "failed to persist failure reason"),
        }
        self.set_state(delivery, TaskState::Failed).await;
        self.ack(delivery).await;
        Outcome::Failed(reason)
    }

    async fn set_state(&self, delivery: &Delivery, state: TaskState) {
        if let Err(e) = self.broker.set_state(delivery.task_id, state).await {
            warn!(task_id = %delivery.task_id, error = %e, "failed to record task state");
        }
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = self.broker.ack(delivery).await {
            warn!(message_id = %delivery.message_id, error = %e, "ack failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use bloodwork_analysis::{AnalysisError, AnalysisReport};
    use bloodwork_core::{Job, JobId, JobStatus};
    use bloodwork_crypto::KEY_LEN;
    use bloodwork_extract::PlainTextExtractor;

    use crate::broker::{InMemoryBroker, TaskPayload};
    use crate::memory::InMemoryMemorySink;
    use crate::records::InMemoryJobStore;

    const SAMPLE_DOC: &[u8] = b"Lab Panel\nHemoglobin 9.2 Reference Range 13-17 g/dL\nUnits g/dL\n";

    struct StaticAnalyzer;

    impl Analyzer for StaticAnalyzer {
        fn analyze(&self, _text: &str, _query: &str) -> Result<AnalysisReport, AnalysisError> {
            Ok(AnalysisReport::new("valid", "summary", "diet", "exercise"))
        }
    }

    /// Fails the first `failures` calls, then succeeds.
    struct FlakyAnalyzer {
        failures: u32,
        calls: Mutex<u32>,
    }

    impl FlakyAnalyzer {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: Mutex::new(0),
            }
        }

        fn call_count(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    impl Analyzer for FlakyAnalyzer {
        fn analyze(&self, _text: &str, _query: &str) -> Result<AnalysisReport, AnalysisError> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls <= self.failures {
                Err(AnalysisError::Failed(format!("flaky failure {calls}")))
            } else {
                Ok(AnalysisReport::new("valid", "third time lucky", "diet", "exercise"))
            }
        }
    }

    struct Harness {
        store: Arc<InMemoryJobStore>,
        broker: Arc<InMemoryBroker>,
        memory: Arc<InMemoryMemorySink>,
        codec: PayloadCodec,
        executor: AnalysisExecutor,
    }

    fn harness(analyzer: Arc<dyn Analyzer>, retry: RetryPolicy) -> Harness {
        let store = Arc::new(InMemoryJobStore::new());
        let broker = Arc::new(InMemoryBroker::new());
        let memory = Arc::new(InMemoryMemorySink::new());
        let codec = PayloadCodec::new([5u8; KEY_LEN]);

        let executor = AnalysisExecutor::new(
            store.clone(),
            broker.clone(),
            codec.clone(),
            Arc::new(PlainTextExtractor),
            analyzer,
            memory.clone(),
        )
        .with_retry_policy(retry);

        Harness {
            store,
            broker,
            memory,
            codec,
            executor,
        }
    }

    /// Enqueue a job the way the submission service does: encrypt, enqueue,
    /// create the record.
    async fn submit(h: &Harness, document: &[u8]) -> JobId {
        let job_id = JobId::new();
        let token = h.codec.encrypt(document).unwrap();
        let task_id = h
            .broker
            .enqueue(TaskPayload {
                job_id,
                token: token.clone(),
                query: "Summarize".to_string(),
            })
            .await
            .unwrap();
        h.store
            .create(Job::new(job_id, task_id, "report.pdf", "Summarize", token))
            .await
            .unwrap();
        job_id
    }

    async fn drain(h: &Harness) -> Vec<Outcome> {
        let mut outcomes = Vec::new();
        while let Some(delivery) = h.broker.receive("test-worker").await.unwrap() {
            outcomes.push(h.executor.process(delivery).await);
        }
        outcomes
    }

    #[tokio::test]
    async fn successful_job_persists_result_and_acks() {
        let h = harness(Arc::new(StaticAnalyzer), RetryPolicy::default());
        let job_id = submit(&h, SAMPLE_DOC).await;

        let outcomes = drain(&h).await;
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0], Outcome::Completed));

        let job = h.store.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        let result = job.result.unwrap();
        assert_eq!(result["doctor_analysis"], "summary");
        assert!(result["processing_time"].as_str().unwrap().ends_with("seconds"));

        assert_eq!(
            h.broker.task_state(job.task_id).await.unwrap(),
            Some(TaskState::Succeeded)
        );
        assert_eq!(h.broker.depth(), 0);
    }

    #[tokio::test]
    async fn extraction_output_lands_in_memory_sink() {
        let h = harness(Arc::new(StaticAnalyzer), RetryPolicy::default());
        submit(&h, SAMPLE_DOC).await;
        drain(&h).await;

        let entries = h.memory.all();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].text.contains("Hemoglobin 9.2"));
        assert_eq!(entries[0].metadata["source"], "blood_report");
    }

    #[tokio::test]
    async fn decryption_failure_is_not_retried() {
        let h = harness(Arc::new(StaticAnalyzer), RetryPolicy::default());

        // Valid-looking record whose token was produced under another key.
        let other = PayloadCodec::new([9u8; KEY_LEN]);
        let job_id = JobId::new();
        let token = other.encrypt(SAMPLE_DOC).unwrap();
        let task_id = h
            .broker
            .enqueue(TaskPayload {
                job_id,
                token: token.clone(),
                query: "Summarize".to_string(),
            })
            .await
            .unwrap();
        h.store
            .create(Job::new(job_id, task_id, "report.pdf", "Summarize", token))
            .await
            .unwrap();

        let outcomes = drain(&h).await;
        assert_eq!(outcomes.len(), 1, "permanent failure must not requeue");
        assert!(matches!(outcomes[0], Outcome::Failed(_)));

        let job = h.store.get(job_id).await.unwrap().unwrap();
        assert!(
            matches!(job.status, JobStatus::Failed { ref error } if error.contains("decryption"))
        );
        assert_eq!(
            h.broker.task_state(task_id).await.unwrap(),
            Some(TaskState::Failed)
        );
    }

    #[tokio::test]
    async fn transient_failures_exhaust_the_retry_cap() {
        // Always failing analyzer: exactly max_retries + 1 attempts.
        let analyzer = Arc::new(FlakyAnalyzer::new(u32::MAX));
        let h = harness(analyzer.clone(), RetryPolicy::fixed(2, Duration::ZERO));
        let job_id = submit(&h, SAMPLE_DOC).await;

        let outcomes = drain(&h).await;
        assert_eq!(outcomes.len(), 3);
        assert!(matches!(outcomes[0], Outcome::Retrying { attempt: 1, .. }));
        assert!(matches!(outcomes[1], Outcome::Retrying { attempt: 2, .. }));
        assert!(matches!(outcomes[2], Outcome::Failed(_)));
        assert_eq!(analyzer.call_count(), 3);

        let job = h.store.get(job_id).await.unwrap().unwrap();
        assert!(
            matches!(job.status, JobStatus::Failed { ref error } if error.contains("flaky"))
        );
    }

    #[tokio::test]
    async fn flaky_analyzer_succeeds_on_third_attempt() {
        let analyzer = Arc::new(FlakyAnalyzer::new(2));
        let h = harness(analyzer.clone(), RetryPolicy::fixed(2, Duration::ZERO));
        let job_id = submit(&h, SAMPLE_DOC).await;

        let outcomes = drain(&h).await;
        assert_eq!(outcomes.len(), 3);
        assert!(matches!(outcomes[2], Outcome::Completed));
        assert_eq!(analyzer.call_count(), 3);

        let job = h.store.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.result.unwrap()["doctor_analysis"], "third time lucky");
    }

    #[tokio::test]
    async fn terminal_redelivery_acks_without_reprocessing() {
        let analyzer = Arc::new(FlakyAnalyzer::new(0));
        let h = harness(analyzer.clone(), RetryPolicy::default());
        let job_id = submit(&h, SAMPLE_DOC).await;

        drain(&h).await;
        let completed = h.store.get(job_id).await.unwrap().unwrap();
        let first_result = completed.result.clone().unwrap();

        // Redelivery of the same logical job after completion.
        h.broker
            .enqueue(TaskPayload {
                job_id,
                token: completed.encrypted_payload.clone(),
                query: completed.query.clone(),
            })
            .await
            .unwrap();

        let outcomes = drain(&h).await;
        assert!(matches!(outcomes[0], Outcome::AlreadyTerminal));
        assert_eq!(analyzer.call_count(), 1, "analysis must not re-run");

        let job = h.store.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result.unwrap(), first_result);
    }

    #[tokio::test]
    async fn soft_time_limit_aborts_a_stuck_analysis() {
        struct StallingAnalyzer;
        impl Analyzer for StallingAnalyzer {
            fn analyze(&self, _text: &str, _query: &str) -> Result<AnalysisReport, AnalysisError> {
                std::thread::sleep(Duration::from_millis(200));
                Ok(AnalysisReport::new("late", "late", "late", "late"))
            }
        }

        let store = Arc::new(InMemoryJobStore::new());
        let broker = Arc::new(InMemoryBroker::new());
        let codec = PayloadCodec::new([5u8; KEY_LEN]);
        let executor = AnalysisExecutor::new(
            store.clone(),
            broker.clone(),
            codec.clone(),
            Arc::new(PlainTextExtractor),
            Arc::new(StallingAnalyzer),
            Arc::new(InMemoryMemorySink::new()),
        )
        .with_retry_policy(RetryPolicy::fixed(1, Duration::ZERO))
        .with_soft_time_limit(Duration::from_millis(20));

        let job_id = JobId::new();
        let token = codec.encrypt(SAMPLE_DOC).unwrap();
        let task_id = broker
            .enqueue(TaskPayload {
                job_id,
                token: token.clone(),
                query: "Summarize".to_string(),
            })
            .await
            .unwrap();
        store
            .create(Job::new(job_id, task_id, "report.pdf", "Summarize", token))
            .await
            .unwrap();

        // Expiry counts as a transient failure: one retry, then terminal.
        let first = broker.receive("w").await.unwrap().unwrap();
        assert!(matches!(
            executor.process(first).await,
            Outcome::Retrying { attempt: 1, .. }
        ));

        let second = broker.receive("w").await.unwrap().unwrap();
        let outcome = executor.process(second).await;
        assert!(
            matches!(outcome, Outcome::Failed(ref reason) if reason.contains("soft time limit"))
        );

        let job = store.get(job_id).await.unwrap().unwrap();
        assert!(
            matches!(job.status, JobStatus::Failed { ref error } if error.contains("soft time limit"))
        );
    }

    #[tokio::test]
    async fn missing_record_is_retried_then_failed() {
        let h = harness(
            Arc::new(StaticAnalyzer),
            RetryPolicy::fixed(1, Duration::ZERO),
        );
        let token = h.codec.encrypt(SAMPLE_DOC).unwrap();
        h.broker
            .enqueue(TaskPayload {
                job_id: JobId::new(),
                token,
                query: "Summarize".to_string(),
            })
            .await
            .unwrap();

        let outcomes = drain(&h).await;
        assert_eq!(outcomes.len(), 2);
        assert!(matches!(outcomes[0], Outcome::Retrying { .. }));
        assert!(matches!(outcomes[1], Outcome::Failed(_)));
        assert_eq!(h.broker.depth(), 0);
    }
}
