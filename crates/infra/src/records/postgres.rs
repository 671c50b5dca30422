//! Postgres-backed job store.
//!
//! One row per job in `analysis_jobs`; encrypted payload and result are the
//! only large columns. Terminal monotonicity is enforced in SQL: terminal
//! updates only match rows still in `pending`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use bloodwork_core::{Job, JobId, JobStatus, TaskId};

use super::store::{JobStore, JobStoreError};

pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the backing table if it does not exist.
    pub async fn migrate(&self) -> Result<(), JobStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS analysis_jobs (
                id UUID PRIMARY KEY,
                task_id UUID NOT NULL,
                filename TEXT NOT NULL,
                query TEXT NOT NULL,
                encrypted_payload TEXT NOT NULL,
                status TEXT NOT NULL,
                error TEXT,
                result JSONB,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| JobStoreError::Storage(e.to_string()))?;
        Ok(())
    }

    fn row_to_job(row: &PgRow) -> Result<Job, JobStoreError> {
        let status_text: String = row.get("status");
        let error: Option<String> = row.get("error");
        let status = match status_text.as_str() {
            "pending" => JobStatus::Pending,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed {
                error: error.unwrap_or_default(),
            },
            other => {
                return Err(JobStoreError::Storage(format!(
                    "unknown status in analysis_jobs: {other}"
                )));
            }
        };

        let created_at: DateTime<Utc> = row.get("created_at");
        let updated_at: DateTime<Utc> = row.get("updated_at");

        Ok(Job {
            id: JobId::from_uuid(row.get::<Uuid, _>("id")),
            task_id: TaskId::from_uuid(row.get::<Uuid, _>("task_id")),
            filename: row.get("filename"),
            query: row.get("query"),
            encrypted_payload: row.get("encrypted_payload"),
            status,
            result: row.get::<Option<JsonValue>, _>("result"),
            created_at,
            updated_at,
        })
    }

    /// Distinguish "row missing" from "row already terminal" after an
    /// UPDATE matched nothing.
    async fn classify_unmatched(&self, id: JobId) -> JobStoreError {
        match self.get(id).await {
            Ok(Some(_)) => JobStoreError::TerminalState(id),
            Ok(None) => JobStoreError::NotFound(id),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn create(&self, job: Job) -> Result<(), JobStoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO analysis_jobs
                (id, task_id, filename, query, encrypted_payload, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.task_id.as_uuid())
        .bind(&job.filename)
        .bind(&job.query)
        .bind(&job.encrypted_payload)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(JobStoreError::DuplicateId(job.id))
            }
            Err(e) => Err(JobStoreError::Storage(e.to_string())),
        }
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query("SELECT * FROM analysis_jobs WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| JobStoreError::Storage(e.to_string()))?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn mark_completed(&self, id: JobId, result: JsonValue) -> Result<(), JobStoreError> {
        let outcome = sqlx::query(
            r#"
            UPDATE analysis_jobs
            SET status = 'completed', result = $2, updated_at = $3
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id.as_uuid())
        .bind(result)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| JobStoreError::Storage(e.to_string()))?;

        if outcome.rows_affected() == 0 {
            return Err(self.classify_unmatched(id).await);
        }
        Ok(())
    }

    async fn mark_failed(&self, id: JobId, reason: &str) -> Result<(), JobStoreError> {
        let outcome = sqlx::query(
            r#"
            UPDATE analysis_jobs
            SET status = 'failed', error = $2, updated_at = $3
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id.as_uuid())
        .bind(reason)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| JobStoreError::Storage(e.to_string()))?;

        if outcome.rows_affected() == 0 {
            return Err(self.classify_unmatched(id).await);
        }
        Ok(())
    }
}
