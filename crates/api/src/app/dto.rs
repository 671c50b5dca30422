use serde::Serialize;
use serde_json::Value as JsonValue;

use bloodwork_core::{JobId, JobStatus, TaskId};

use crate::app::services::{JobStatusView, SubmissionReceipt};

/// Receipt returned by `POST /analyze`.
#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub status: &'static str,
    pub job_id: JobId,
    pub task_id: TaskId,
    pub file_processed: String,
    pub query: String,
}

impl From<SubmissionReceipt> for AnalyzeResponse {
    fn from(receipt: SubmissionReceipt) -> Self {
        Self {
            status: "queued",
            job_id: receipt.job_id,
            task_id: receipt.task_id,
            file_processed: receipt.filename,
            query: receipt.query,
        }
    }
}

/// Body of `GET /status/:id`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub job_id: JobId,
    pub task_id: TaskId,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<JobStatusView> for StatusResponse {
    fn from(view: JobStatusView) -> Self {
        let error = match &view.job.status {
            JobStatus::Failed { error } => Some(error.clone()),
            _ => None,
        };
        Self {
            job_id: view.job.id,
            task_id: view.job.task_id,
            status: view.state,
            result: view.job.result,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bloodwork_core::Job;

    #[test]
    fn analyze_response_reports_queued() {
        let response = AnalyzeResponse::from(SubmissionReceipt {
            job_id: JobId::new(),
            task_id: TaskId::new(),
            filename: "report.pdf".to_string(),
            query: "Summarize".to_string(),
        });
        assert_eq!(response.status, "queued");
        assert_eq!(response.file_processed, "report.pdf");
    }

    #[test]
    fn status_response_carries_result_for_succeeded_jobs() {
        let mut job = Job::new(JobId::new(), TaskId::new(), "r.pdf", "q", "token");
        job.mark_completed(serde_json::json!({"doctor_analysis": "fine"}));

        let response = StatusResponse::from(JobStatusView {
            job,
            state: "succeeded",
        });
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "succeeded");
        assert_eq!(value["result"]["doctor_analysis"], "fine");
        assert!(value.get("error").is_none());
    }

    #[test]
    fn status_response_carries_error_for_failed_jobs() {
        let mut job = Job::new(JobId::new(), TaskId::new(), "r.pdf", "q", "token");
        job.mark_failed("analysis failed: boom");

        let response = StatusResponse::from(JobStatusView {
            job,
            state: "failed",
        });
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["error"], "analysis failed: boom");
        assert!(value.get("result").is_none());
    }
}
