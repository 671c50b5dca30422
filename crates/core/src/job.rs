//! The job record and its lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::id::{JobId, TaskId};

/// Persisted status of a job record.
///
/// Terminal states are write-once: no transition leaves `Completed` or
/// `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, waiting for the worker to reach a terminal state.
    Pending,
    /// Analysis succeeded; `result` is present on the record.
    Completed,
    /// Retries exhausted or a permanent failure occurred.
    Failed { error: String },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed { .. })
    }
}

/// Broker-tracked execution state, the four-value enum exposed at the
/// status boundary.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One submitted document+query unit of work and its persisted lifecycle
/// record.
///
/// The submission service owns record creation; the worker owns the terminal
/// transition and the result write; the record store owns durability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Durable record key, generated at submission time.
    pub id: JobId,
    /// Broker task handle captured at enqueue time.
    pub task_id: TaskId,
    /// Original document name, for display only.
    pub filename: String,
    /// User-supplied free text, immutable once submitted.
    pub query: String,
    /// Codec token of the uploaded bytes; written exactly once, opaque to
    /// everything but the crypto codec.
    pub encrypted_payload: String,
    pub status: JobStatus,
    /// Serialized analysis document, present only on `Completed`. Not further
    /// interpreted by the pipeline.
    pub result: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        id: JobId,
        task_id: TaskId,
        filename: impl Into<String>,
        query: impl Into<String>,
        encrypted_payload: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            task_id,
            filename: filename.into(),
            query: query.into(),
            encrypted_payload: encrypted_payload.into(),
            status: JobStatus::Pending,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Transition to `Completed` and attach the result document.
    ///
    /// Returns `false` without touching the record when the job is already
    /// terminal (monotonic status).
    pub fn mark_completed(&mut self, result: JsonValue) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = JobStatus::Completed;
        self.result = Some(result);
        self.updated_at = Utc::now();
        true
    }

    /// Transition to `Failed` with a reason.
    ///
    /// Returns `false` without touching the record when the job is already
    /// terminal.
    pub fn mark_failed(&mut self, error: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = JobStatus::Failed {
            error: error.into(),
        };
        self.updated_at = Utc::now();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> Job {
        Job::new(
            JobId::new(),
            TaskId::new(),
            "report.pdf",
            "Summarize my blood test report",
            "dG9rZW4=",
        )
    }

    #[test]
    fn fresh_job_is_pending() {
        let job = sample_job();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.result.is_none());
    }

    #[test]
    fn completion_attaches_result_once() {
        let mut job = sample_job();
        assert!(job.mark_completed(serde_json::json!({"verification": "ok"})));
        assert_eq!(job.status, JobStatus::Completed);

        // Terminal states are write-once.
        assert!(!job.mark_completed(serde_json::json!({"verification": "overwrite"})));
        assert!(!job.mark_failed("late failure"));
        assert_eq!(
            job.result,
            Some(serde_json::json!({"verification": "ok"}))
        );
    }

    #[test]
    fn failure_is_terminal() {
        let mut job = sample_job();
        assert!(job.mark_failed("analysis failed: boom"));
        assert!(job.status.is_terminal());
        assert!(!job.mark_completed(serde_json::json!({})));
        assert!(matches!(job.status, JobStatus::Failed { ref error } if error.contains("boom")));
    }
}
